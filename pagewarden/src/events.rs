//! Observer interfaces the engine reports through.
//!
//! Both are explicit sinks passed into the engine by reference; there is no
//! global dispatch bus.

/// Receives operator-facing progress from the engine.
///
/// `status` carries the current rule/action headline, `log` the free-form
/// journal, and `progress` a countdown in seconds (emitted at the start of
/// every configured wait and again with `0` when the wait ends).
pub trait EventSink: Send + Sync {
    fn status(&self, text: &str);
    fn log(&self, text: &str);
    fn progress(&self, remaining_secs: u64);
}

/// Outbound alert channel.
///
/// Fire-and-forget: delivery failure is the implementor's problem to log and
/// is never surfaced back to the engine.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}
