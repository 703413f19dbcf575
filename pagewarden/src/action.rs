//! Single-action execution.
//!
//! An action resolves its target element, re-validates its gates, performs
//! its effect and reports what happened. Element trouble on the target —
//! missing, stale, refusing interaction, or a driver read timeout — is a
//! skip, never an abort: pages redraw under the engine all the time and the
//! next tick gets another chance.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::condition;
use crate::driver::{ElementHandle, ElementKind, PageDriver};
use crate::errors::{DriverError, EngineError};
use crate::events::{EventSink, Notifier};
use crate::flags::FlagStore;
use crate::page::PageTracker;
use crate::rules::Action;

static NOTIFY_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"UserEvent::Notify\((.+)\)").expect("static regex"));

const NOTIFY_FALLBACK: &str = "ERROR in UserEvent::Notify call";

/// What one action execution amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Disabled, or the target element was unavailable.
    Skipped,
    /// The page moved on under the owning rule; the rest of the rule's
    /// actions must not run against the stale baseline.
    Abandoned,
    /// A criterion or flag gate said no. No effect, no error.
    Gated,
    /// A notify directive fired.
    Notified,
    /// The element was cleared and filled with the action's value.
    Filled,
    /// The element was activated (submit keystroke or click).
    Activated,
}

/// Executes one action against the driver, in the context of its owning
/// rule's page baseline and the shared flag store.
pub struct ActionExecutor<'a> {
    pub driver: &'a dyn PageDriver,
    pub tracker: &'a PageTracker,
    pub flags: &'a mut FlagStore,
    pub notifier: &'a dyn Notifier,
    pub events: &'a dyn EventSink,
}

impl ActionExecutor<'_> {
    pub async fn execute(&mut self, action: &Action) -> Result<ExecutionOutcome, EngineError> {
        if !action.enable {
            return Ok(ExecutionOutcome::Skipped);
        }

        if self.tracker.has_changed(self.driver).await {
            return Ok(ExecutionOutcome::Abandoned);
        }

        let element = match self.driver.find_element(&action.element_finder).await {
            Ok(element) => element,
            Err(err) if err.is_recoverable() => {
                debug!(finder = %action.element_finder, %err, "target unavailable, skipping");
                return Ok(ExecutionOutcome::Skipped);
            }
            Err(err) => return Err(err.into()),
        };

        match self.check_criterion(action).await {
            Ok(true) => {}
            Ok(false) => return Ok(ExecutionOutcome::Gated),
            Err(EngineError::Driver(err)) if err.is_recoverable() => {
                debug!(%err, "criterion element unavailable, skipping");
                return Ok(ExecutionOutcome::Skipped);
            }
            Err(err) => return Err(err),
        }
        if let Some(flag) = &action.flag {
            if !flag.evaluate(self.flags)? {
                return Ok(ExecutionOutcome::Gated);
            }
        }

        let outcome = match self.perform_effect(action, &element).await {
            Ok(outcome) => outcome,
            Err(EngineError::Driver(err)) if err.is_recoverable() => {
                if matches!(err, DriverError::Timeout(_)) {
                    self.events.log(&format!("Timed out during action: {err}"));
                }
                return Ok(ExecutionOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };

        if let Some(mutations) = &action.flag_set {
            self.flags.apply_all(mutations)?;
        }

        Ok(outcome)
    }

    /// Evaluate the addon criterion. Absent criterion or an empty finder
    /// passes; a criterion whose element cannot be found fails the gate
    /// rather than erroring.
    async fn check_criterion(&self, action: &Action) -> Result<bool, EngineError> {
        let Some(criterion) = &action.addon else {
            return Ok(true);
        };
        if criterion.element_finder.is_empty() {
            return Ok(true);
        }

        let element = match self.driver.find_element(&criterion.element_finder).await {
            Ok(element) => element,
            Err(DriverError::ElementNotFound(_)) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let observed = observed_value(self.driver, &element).await?;
        condition::evaluate(&observed, &criterion.value, &criterion.condition)
    }

    async fn perform_effect(
        &self,
        action: &Action,
        element: &ElementHandle,
    ) -> Result<ExecutionOutcome, EngineError> {
        let value = action.value.resolve();

        if value.contains("UserEvent::Notify") {
            let payload = NOTIFY_DIRECTIVE
                .captures(&value)
                .map(|caps| caps[1].to_string())
                .unwrap_or_else(|| NOTIFY_FALLBACK.to_string());
            let content = observed_value(self.driver, element).await?;
            let message = payload.replace("{0}", &content);
            self.events.log(&message);
            self.notifier.notify(&message);
            return Ok(ExecutionOutcome::Notified);
        }

        if !value.is_empty() {
            self.driver.set_element_content(element, &value).await?;
            return Ok(ExecutionOutcome::Filled);
        }

        // empty value: activate. Text inputs get the submit keystroke, the
        // rest a click.
        let kind = self.driver.element_kind(element).await?;
        let is_text_input = kind == ElementKind::Input
            && self.driver.element_attribute(element, "type").await? == "text";
        if is_text_input {
            self.driver.send_activation_key(element).await?;
        } else {
            self.driver.click_element(element).await?;
        }
        Ok(ExecutionOutcome::Activated)
    }
}

/// Read an element's observed content by kind: inputs expose their `value`
/// attribute, labels and everything else their text.
pub(crate) async fn observed_value(
    driver: &dyn PageDriver,
    element: &ElementHandle,
) -> Result<String, DriverError> {
    match driver.element_kind(element).await? {
        ElementKind::Input => driver.element_attribute(element, "value").await,
        ElementKind::Label | ElementKind::Other => driver.element_text(element).await,
    }
}
