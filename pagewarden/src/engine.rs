//! The rule-set driver.
//!
//! One [`Engine::tick`] is one full pass over the rule set in document order.
//! Rules are gated on being enabled, on a URL match (falling back to nested
//! frames) and on the page actually having changed since the last captured
//! baseline, so a page that sits still is never re-processed. Waits race a
//! timer against a page-change watchdog and the pause/stop cancellation
//! token; whichever finishes first wins and the losers are dropped.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::action::{ActionExecutor, ExecutionOutcome};
use crate::driver::PageDriver;
use crate::errors::{DriverError, EngineError};
use crate::events::{EventSink, Notifier};
use crate::flags::FlagStore;
use crate::page::{PageTracker, DOCUMENT_LOCATOR};
use crate::rules::{Rule, RuleSet};
use crate::wait::WaitSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    /// Terminal; a stopped engine cannot be restarted.
    Stopped,
}

/// Clonable handle for driving the engine's state machine from outside the
/// tick loop. Pausing or stopping cancels any in-flight wait promptly;
/// resuming installs a fresh cancellation token.
#[derive(Debug, Clone)]
pub struct EngineControl {
    shared: Arc<ControlShared>,
}

#[derive(Debug)]
struct ControlShared {
    state: Mutex<EngineState>,
    wait_cancel: Mutex<CancellationToken>,
}

impl EngineControl {
    fn new() -> Self {
        Self {
            shared: Arc::new(ControlShared {
                state: Mutex::new(EngineState::Idle),
                wait_cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock().expect("control lock poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    pub fn start(&self) {
        self.to_running();
    }

    pub fn resume(&self) {
        self.to_running();
    }

    pub fn pause(&self) {
        let mut state = self.shared.state.lock().expect("control lock poisoned");
        if *state == EngineState::Stopped {
            return;
        }
        *state = EngineState::Paused;
        self.cancel_waits();
    }

    pub fn stop(&self) {
        let mut state = self.shared.state.lock().expect("control lock poisoned");
        *state = EngineState::Stopped;
        self.cancel_waits();
    }

    fn to_running(&self) {
        let mut state = self.shared.state.lock().expect("control lock poisoned");
        if *state == EngineState::Stopped {
            return;
        }
        *state = EngineState::Running;
        // re-arm: the previous token stays cancelled forever
        *self.shared.wait_cancel.lock().expect("control lock poisoned") =
            CancellationToken::new();
    }

    fn cancel_waits(&self) {
        self.shared
            .wait_cancel
            .lock()
            .expect("control lock poisoned")
            .cancel();
    }

    pub(crate) fn wait_token(&self) -> CancellationToken {
        self.shared
            .wait_cancel
            .lock()
            .expect("control lock poisoned")
            .clone()
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Locator of the element whose identity stands in for the document.
    pub document_locator: String,
    /// How often the mid-wait watchdog re-checks the page.
    pub page_poll_interval: Duration,
    /// When set, every rule keeps its own page baseline instead of sharing
    /// one, so several rules can each run once against the same fresh page.
    pub per_rule_baseline: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            document_locator: DOCUMENT_LOCATOR.to_string(),
            page_poll_interval: Duration::from_millis(500),
            per_rule_baseline: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    NoWait,
    Completed,
    PageChanged,
    Cancelled,
}

/// Drives a [`RuleSet`] against a [`PageDriver`], reporting through an
/// [`EventSink`] and escalating through a [`Notifier`].
pub struct Engine {
    driver: Arc<dyn PageDriver>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
    control: EngineControl,
    rules: RuleSet,
    rules_path: Option<PathBuf>,
    flags: FlagStore,
    tracker: PageTracker,
    rule_trackers: Vec<PageTracker>,
}

impl Engine {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_config(driver, notifier, events, EngineConfig::default())
    }

    pub fn with_config(
        driver: Arc<dyn PageDriver>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Self {
        let tracker = PageTracker::new(&config.document_locator);
        Self {
            driver,
            notifier,
            events,
            config,
            control: EngineControl::new(),
            rules: RuleSet::default(),
            rules_path: None,
            flags: FlagStore::new(),
            tracker,
            rule_trackers: Vec::new(),
        }
    }

    /// Handle for pausing/resuming/stopping, safe to hand to other tasks.
    pub fn control(&self) -> EngineControl {
        self.control.clone()
    }

    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    pub fn flags(&self) -> &FlagStore {
        &self.flags
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Install an in-memory rule set.
    pub fn set_rules(&mut self, rules: RuleSet) {
        self.install_rules(rules);
        self.rules_path = None;
    }

    /// Load rules from a file and remember the path so later ticks reload it
    /// when its modification time advances.
    pub fn load_rules(&mut self, path: impl Into<PathBuf>) -> Result<(), EngineError> {
        let path = path.into();
        self.events
            .log(&format!("Loading rules file '{}'", path.display()));
        let set = RuleSet::load(&path)?;
        self.install_rules(set);
        self.rules_path = Some(path);
        self.events.log("Rules file loaded");
        Ok(())
    }

    /// Session reset: forget the page baselines and all flags.
    pub fn clear(&mut self) {
        self.tracker.reset();
        for tracker in &mut self.rule_trackers {
            tracker.reset();
        }
        self.flags.clear();
    }

    /// Run one pass over the rule set. A no-op unless the engine is Running.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) {
        if self.control.state() != EngineState::Running {
            return;
        }

        self.reload_if_stale();
        if self.control.state() != EngineState::Running {
            return;
        }

        if let Err(err) = self.run_pass().await {
            self.triage(err).await;
        }
    }

    /// Tick on an interval until stopped. Pausing interrupts an in-flight
    /// pass; stopping ends the loop.
    pub async fn run_until_stopped(&mut self, interval: Duration) {
        loop {
            match self.control.state() {
                EngineState::Stopped => return,
                EngineState::Running => {
                    self.tick().await;
                    let token = self.control.wait_token();
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = token.cancelled() => {}
                    }
                }
                EngineState::Idle | EngineState::Paused => {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    fn install_rules(&mut self, rules: RuleSet) {
        self.rule_trackers = (0..rules.len())
            .map(|_| PageTracker::new(&self.config.document_locator))
            .collect();
        // a new rule set starts against a fresh baseline; flags survive,
        // they are only dropped on an explicit session reset
        self.tracker.reset();
        self.rules = rules;
    }

    fn reload_if_stale(&mut self) {
        let Some(path) = self.rules_path.clone() else {
            return;
        };
        if !self.rules.source_changed(&path) {
            return;
        }
        self.events
            .log(&format!("Loading rules file '{}'", path.display()));
        match RuleSet::load(&path) {
            Ok(set) => {
                self.install_rules(set);
                self.events.log("Rules file loaded");
            }
            Err(err) => {
                self.events.log(&format!("ERROR reading rules file: {err}"));
                self.events.log("Please fix and reload");
                self.control.pause();
            }
        }
    }

    async fn run_pass(&mut self) -> Result<(), EngineError> {
        if self.driver.has_open_alert().await? {
            self.events.log("in Alert");
            return Ok(());
        }

        self.events.status("Running...");
        for index in 0..self.rules.len() {
            if !self.control.is_running() {
                return Ok(());
            }
            let rule = self.rules.rules[index].clone();
            self.run_rule(index, &rule).await?;
        }
        Ok(())
    }

    async fn run_rule(&mut self, index: usize, rule: &Rule) -> Result<(), EngineError> {
        if !rule.enable {
            return Ok(());
        }
        if !self.match_url(&rule.url).await? {
            return Ok(());
        }

        // the page gate: only a document not yet seen by this baseline runs
        let driver = self.driver.clone();
        let tracker = self.tracker_mut(index);
        if tracker.has_changed(driver.as_ref()).await {
            tracker.capture(driver.as_ref()).await?;
        } else {
            return Ok(());
        }

        self.events.status(&format!(
            "Running Rule: '{}'. Initwait: {}",
            rule.name, rule.init_wait
        ));
        if let WaitOutcome::Cancelled = self
            .wait_in_page(&rule.init_wait, self.tracker_ref(index))
            .await?
        {
            return Ok(());
        }
        self.run_actions(index, rule).await
    }

    async fn run_actions(&mut self, index: usize, rule: &Rule) -> Result<(), EngineError> {
        let driver = self.driver.clone();
        for (idx, action) in rule.actions.iter().enumerate() {
            if !self.control.is_running() {
                return Ok(());
            }
            self.events.status(&format!(
                "Running Rule: '{}'. Initwait: {} [Action #{idx}: '{}'. Initwait: {}]",
                rule.name, rule.init_wait, action.name, action.init_wait
            ));
            if !action.enable {
                continue;
            }

            // an action queued for a page that is already gone must not even
            // start counting down
            if self.tracker_ref(index).has_changed(driver.as_ref()).await {
                break;
            }

            if let WaitOutcome::Cancelled = self
                .wait_in_page(&action.init_wait, self.tracker_ref(index))
                .await?
            {
                return Ok(());
            }

            let tracker = if self.config.per_rule_baseline {
                &self.rule_trackers[index]
            } else {
                &self.tracker
            };
            let mut executor = ActionExecutor {
                driver: driver.as_ref(),
                tracker,
                flags: &mut self.flags,
                notifier: self.notifier.as_ref(),
                events: self.events.as_ref(),
            };
            match executor.execute(action).await? {
                ExecutionOutcome::Abandoned => break,
                outcome => {
                    debug!(rule = %rule.name, action = %action.name, ?outcome, "action finished")
                }
            }
        }
        Ok(())
    }

    /// Match a rule's URL against the current location, falling back to
    /// nested frames and entering the first one that matches.
    async fn match_url(&self, url: &str) -> Result<bool, EngineError> {
        let driver = self.driver.as_ref();
        if driver.current_location().await?.contains(url) {
            return Ok(true);
        }

        let fallback: Result<bool, DriverError> = async {
            driver.reset_to_top_frame().await?;
            for frame in driver.list_frames().await? {
                if driver.frame_location(&frame).await?.contains(url) {
                    driver.enter_frame(&frame).await?;
                    return Ok(true);
                }
            }
            Ok(false)
        }
        .await;

        match fallback {
            Ok(found) => Ok(found),
            Err(DriverError::ElementNotFound(_)) | Err(DriverError::ElementStale(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Suspend for the spec's duration, racing a page-change watchdog and
    /// the pause/stop token. Progress is announced at start and again with
    /// zero on every exit path; an empty spec announces nothing.
    async fn wait_in_page(
        &self,
        spec_text: &str,
        tracker: &PageTracker,
    ) -> Result<WaitOutcome, EngineError> {
        let spec = match WaitSpec::parse(spec_text) {
            Ok(spec) => spec,
            Err(err) => {
                self.events.log(&format!("{err}; continuing without wait"));
                return Ok(WaitOutcome::NoWait);
            }
        };
        if spec.is_none() {
            return Ok(WaitOutcome::NoWait);
        }
        let secs = spec.resolve()?;

        self.events.progress(secs);
        let outcome = if secs == 0 {
            WaitOutcome::Completed
        } else {
            let token = self.control.wait_token();
            let driver = self.driver.clone();
            let poll = self.config.page_poll_interval;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => WaitOutcome::Completed,
                _ = watch_for_change(driver, tracker, poll) => WaitOutcome::PageChanged,
                _ = token.cancelled() => WaitOutcome::Cancelled,
            }
        };
        self.events.progress(0);
        Ok(outcome)
    }

    /// Sort an escaped error into the recovery ladder: definition errors and
    /// a lost driver pause the engine, a timeout gets a health probe first,
    /// anything else only costs the rest of the pass.
    async fn triage(&mut self, err: EngineError) {
        match err {
            EngineError::Driver(DriverError::ConnectionLost(ref reason)) => {
                let message = format!("Houston, we have a problem! {reason}");
                self.events.log(&message);
                self.notifier.notify(&message);
                self.control.pause();
            }
            EngineError::Driver(DriverError::Timeout(_)) => {
                self.events.log("TIMEOUT when running rules!");
                match self.driver.current_location().await {
                    Ok(_) => {
                        // session alive: the page is wedged, not the driver.
                        // drop the baselines so the next tick starts fresh
                        self.tracker.reset();
                        for tracker in &mut self.rule_trackers {
                            tracker.reset();
                        }
                    }
                    Err(probe) => {
                        let message = format!("Houston, we have a problem! {probe}");
                        self.events.log(&message);
                        self.notifier.notify(&message);
                        self.control.pause();
                    }
                }
            }
            EngineError::Driver(ref driver_err) => {
                self.events.log(&format!("Rule pass aborted: {driver_err}"));
            }
            ref err if err.is_definition_error() => {
                self.events.log(&format!("Error in rules file: {err}"));
                self.events.log("Please fix and reload");
                self.control.pause();
            }
            ref err => {
                self.events.log(&format!("Unhandled error: {err}"));
            }
        }
    }

    fn tracker_ref(&self, index: usize) -> &PageTracker {
        if self.config.per_rule_baseline {
            &self.rule_trackers[index]
        } else {
            &self.tracker
        }
    }

    fn tracker_mut(&mut self, index: usize) -> &mut PageTracker {
        if self.config.per_rule_baseline {
            &mut self.rule_trackers[index]
        } else {
            &mut self.tracker
        }
    }
}

async fn watch_for_change(driver: Arc<dyn PageDriver>, tracker: &PageTracker, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if tracker.has_changed(driver.as_ref()).await {
            return;
        }
    }
}
