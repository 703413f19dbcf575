//! Rule-driven automation for live web pages.
//!
//! This crate replays a declarative, ordered set of rules against a page that
//! keeps changing underneath it, reacting to actual page state instead of
//! following a fixed script. On every tick the engine walks the rules in
//! document order, gates each on its URL and on the page having genuinely
//! changed, and runs the rule's actions with randomized waits, criterion and
//! flag gates, and a watchdog that abandons anything scheduled against a page
//! that has since navigated away.
//!
//! The browser itself is behind the [`PageDriver`] capability trait, and
//! outbound alerts behind [`Notifier`], so the engine runs the same against a
//! WebDriver session, a CDP connection or a scripted fake.

pub mod action;
pub mod condition;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod events;
pub mod flags;
pub mod page;
pub mod rules;
#[cfg(test)]
mod tests;
pub mod wait;

pub use action::{ActionExecutor, ExecutionOutcome};
pub use condition::CompareOp;
pub use driver::{ElementHandle, ElementKind, FrameHandle, PageDriver};
pub use engine::{Engine, EngineConfig, EngineControl, EngineState};
pub use errors::{DriverError, EngineError};
pub use events::{EventSink, Notifier};
pub use flags::FlagStore;
pub use page::PageTracker;
pub use rules::{Action, ActionValue, Criterion, FlagExpr, FlagMutation, Rule, RuleSet};
pub use wait::WaitSpec;
