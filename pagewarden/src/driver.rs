//! Abstract capability contract for the page-automation driver.
//!
//! The engine never talks to a browser directly; it consumes this trait,
//! letting hosts plug in a WebDriver session, a CDP connection, or a scripted
//! fake. Every capability reports failure through the closed
//! [`DriverError`] kind set so callers can switch on kind instead of catching
//! named exception classes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DriverError;

/// Opaque identity of one live element instance.
///
/// Handles are minted by the driver; two handles compare equal exactly when
/// they refer to the same element instance in the same document. A reload or
/// navigation yields fresh handles, which is what the page-change gate relies
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub u64);

/// Opaque identity of a nested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameHandle(pub u64);

/// Coarse element classification used to pick how content is read and how an
/// empty-value action activates the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Input,
    Label,
    Other,
}

/// Driver capabilities the engine requires.
///
/// All methods may fail with any [`DriverError`] kind; the engine treats
/// exactly the four recoverable kinds as skip conditions per
/// [`DriverError::is_recoverable`].
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// URL of the current evaluation context (top document or entered frame).
    async fn current_location(&self) -> Result<String, DriverError>;

    /// Resolve a locator string to an element in the current context.
    async fn find_element(&self, locator: &str) -> Result<ElementHandle, DriverError>;

    async fn element_kind(&self, el: &ElementHandle) -> Result<ElementKind, DriverError>;

    /// Visible text content of the element.
    async fn element_text(&self, el: &ElementHandle) -> Result<String, DriverError>;

    /// Named attribute of the element, empty string when absent.
    async fn element_attribute(
        &self,
        el: &ElementHandle,
        name: &str,
    ) -> Result<String, DriverError>;

    /// Clear the element and set its content to `text`.
    async fn set_element_content(
        &self,
        el: &ElementHandle,
        text: &str,
    ) -> Result<(), DriverError>;

    async fn click_element(&self, el: &ElementHandle) -> Result<(), DriverError>;

    /// Send the platform "activate/submit" keystroke to the element.
    async fn send_activation_key(&self, el: &ElementHandle) -> Result<(), DriverError>;

    async fn list_frames(&self) -> Result<Vec<FrameHandle>, DriverError>;

    async fn frame_location(&self, frame: &FrameHandle) -> Result<String, DriverError>;

    /// Switch the evaluation context into `frame`.
    async fn enter_frame(&self, frame: &FrameHandle) -> Result<(), DriverError>;

    /// Switch the evaluation context back to the top document.
    async fn reset_to_top_frame(&self) -> Result<(), DriverError>;

    /// Whether a modal alert is currently open.
    async fn has_open_alert(&self) -> Result<bool, DriverError>;
}
