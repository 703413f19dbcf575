//! Page-transition detection.

use crate::driver::{ElementHandle, PageDriver};
use crate::errors::DriverError;

/// Default locator for the element whose identity stands in for the document.
pub const DOCUMENT_LOCATOR: &str = "head";

/// Tracks whether the document has changed since the last capture.
///
/// The baseline is the handle of a designated document element; a reload or
/// navigation makes the driver mint a fresh handle, so inequality means the
/// page moved on. Failure to resolve the element at all is read the same way:
/// assume navigation rather than surfacing an error.
#[derive(Debug, Clone)]
pub struct PageTracker {
    locator: String,
    baseline: Option<ElementHandle>,
}

impl PageTracker {
    pub fn new(locator: &str) -> Self {
        Self {
            locator: locator.to_string(),
            baseline: None,
        }
    }

    /// `true` when the document differs from the captured baseline. A fresh
    /// tracker always reports `true`.
    pub async fn has_changed(&self, driver: &dyn PageDriver) -> bool {
        let Some(baseline) = self.baseline else {
            return true;
        };
        match driver.find_element(&self.locator).await {
            Ok(current) => current != baseline,
            Err(_) => true,
        }
    }

    /// Store the current document handle as the new baseline. Call once per
    /// rule cycle, after the change gate has passed.
    pub async fn capture(&mut self, driver: &dyn PageDriver) -> Result<(), DriverError> {
        self.baseline = Some(driver.find_element(&self.locator).await?);
        Ok(())
    }

    /// Drop the baseline; the next observation counts as changed.
    pub fn reset(&mut self) {
        self.baseline = None;
    }

    pub fn baseline(&self) -> Option<ElementHandle> {
        self.baseline
    }
}

impl Default for PageTracker {
    fn default() -> Self {
        Self::new(DOCUMENT_LOCATOR)
    }
}
