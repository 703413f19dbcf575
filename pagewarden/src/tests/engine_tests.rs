use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use super::mock::{CaptureNotifier, CaptureSink, Effect, MockDriver};
use crate::driver::ElementKind;
use crate::engine::{Engine, EngineConfig, EngineState};
use crate::errors::DriverError;
use crate::rules::{Action, Criterion, FlagMutation, Rule, RuleSet};

struct Harness {
    driver: Arc<MockDriver>,
    notifier: Arc<CaptureNotifier>,
    events: Arc<CaptureSink>,
    engine: Engine,
}

impl Harness {
    fn new(location: &str) -> Self {
        Self::with_config(location, EngineConfig::default())
    }

    fn with_config(location: &str, config: EngineConfig) -> Self {
        super::init_tracing();
        let driver = MockDriver::new(location);
        let notifier = CaptureNotifier::new();
        let events = CaptureSink::new();
        let engine = Engine::with_config(
            driver.clone(),
            notifier.clone(),
            events.clone(),
            config,
        );
        Self {
            driver,
            notifier,
            events,
            engine,
        }
    }

    fn start_with(&mut self, rules: Vec<Rule>) {
        self.engine.set_rules(RuleSet::new(rules));
        self.engine.control().start();
    }
}

fn rule(url: &str, init_wait: &str, actions: Vec<Action>) -> Rule {
    Rule {
        name: "test rule".to_string(),
        url: url.to_string(),
        enable: true,
        init_wait: init_wait.to_string(),
        actions,
    }
}

fn action(finder: &str, value: &str) -> Action {
    Action {
        name: "test action".to_string(),
        enable: true,
        init_wait: String::new(),
        element_finder: finder.to_string(),
        value: value.into(),
        addon: None,
        flag: None,
        flag_set: None,
    }
}

#[tokio::test]
async fn executes_a_fresh_page_exactly_once() {
    let mut h = Harness::new("https://example.com/watch");
    let input = h.driver.add_element("//search", ElementKind::Input, "");
    h.driver.set_attribute("//search", "type", "text");
    h.start_with(vec![rule("example.com", "", vec![action("//search", "")])]);

    h.engine.tick().await;
    assert_eq!(
        h.driver.effects(),
        vec![Effect::ActivationKey { handle: input.0 }]
    );

    // same page handle: the rule must not run again
    h.engine.tick().await;
    assert_eq!(h.driver.effects().len(), 1);

    // a reload mints a fresh head, so the rule fires once more
    h.driver.navigate("https://example.com/watch");
    h.engine.tick().await;
    assert_eq!(h.driver.effects().len(), 2);
}

#[tokio::test]
async fn notify_directive_reaches_the_notifier() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//price", ElementKind::Label, "42");
    h.start_with(vec![rule(
        "example.com",
        "",
        vec![action("//price", "UserEvent::Notify(Saw value {0})")],
    )]);

    h.engine.tick().await;
    assert_eq!(h.notifier.messages(), vec!["Saw value 42".to_string()]);
}

#[tokio::test]
async fn disabled_rules_and_url_mismatches_do_nothing() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");

    let mut disabled = rule("example.com", "", vec![action("//btn", "")]);
    disabled.enable = false;
    let elsewhere = rule("another-site.net", "", vec![action("//btn", "")]);
    h.start_with(vec![disabled, elsewhere]);

    h.engine.tick().await;
    assert!(h.driver.effects().is_empty());
}

#[tokio::test]
async fn url_match_falls_back_to_nested_frames() {
    let mut h = Harness::new("https://portal.test/outer");
    let frame = h.driver.add_frame("https://example.com/inner");
    let button = h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "", vec![action("//btn", "")])]);

    h.engine.tick().await;
    let effects = h.driver.effects();
    assert!(effects.contains(&Effect::ResetTopFrame));
    assert!(effects.contains(&Effect::EnterFrame { frame: frame.0 }));
    assert!(effects.contains(&Effect::Click { handle: button.0 }));
}

#[tokio::test]
async fn shared_baseline_lets_only_the_first_fresh_rule_run() {
    let mut h = Harness::new("https://example.com");
    let first = h.driver.add_element("//a", ElementKind::Other, "");
    h.driver.add_element("//b", ElementKind::Other, "");
    h.start_with(vec![
        rule("example.com", "", vec![action("//a", "")]),
        rule("example.com", "", vec![action("//b", "")]),
    ]);

    h.engine.tick().await;
    assert_eq!(h.driver.effects(), vec![Effect::Click { handle: first.0 }]);
}

#[tokio::test]
async fn per_rule_baselines_let_every_rule_see_the_fresh_page() {
    let config = EngineConfig {
        per_rule_baseline: true,
        ..EngineConfig::default()
    };
    let mut h = Harness::with_config("https://example.com", config);
    let a = h.driver.add_element("//a", ElementKind::Other, "");
    let b = h.driver.add_element("//b", ElementKind::Other, "");
    h.start_with(vec![
        rule("example.com", "", vec![action("//a", "")]),
        rule("example.com", "", vec![action("//b", "")]),
    ]);

    h.engine.tick().await;
    assert_eq!(
        h.driver.effects(),
        vec![
            Effect::Click { handle: a.0 },
            Effect::Click { handle: b.0 }
        ]
    );
}

#[tokio::test]
async fn definition_errors_pause_the_engine() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.driver.add_element("//status", ElementKind::Label, "ready");
    let mut bad = action("//btn", "");
    bad.addon = Some(Criterion {
        element_finder: "//status".to_string(),
        value: "ready".to_string(),
        condition: "<>".to_string(),
    });
    h.start_with(vec![rule("example.com", "", vec![bad])]);

    h.engine.tick().await;
    assert_eq!(h.engine.state(), EngineState::Paused);
    let logs = h.events.logs();
    assert!(logs.iter().any(|l| l.contains("Unknown condition operator")));
    assert!(logs.contains(&"Please fix and reload".to_string()));
}

#[tokio::test]
async fn non_numeric_flag_arithmetic_pauses_the_engine() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    let mut act = action("//btn", "");
    act.flag_set = Some(vec![FlagMutation {
        name: "counter".to_string(),
        value: "1".to_string(),
        op: "incr".to_string(),
    }]);
    h.start_with(vec![rule("example.com", "", vec![act])]);

    h.engine.tick().await;
    assert_eq!(h.engine.state(), EngineState::Paused);
}

#[tokio::test]
async fn open_alert_suspends_the_pass() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.driver.set_alert(true);
    h.start_with(vec![rule("example.com", "", vec![action("//btn", "")])]);

    h.engine.tick().await;
    assert!(h.driver.effects().is_empty());
    assert!(h.events.logs().contains(&"in Alert".to_string()));
}

#[tokio::test]
async fn pausing_interrupts_an_in_flight_wait() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "8", vec![action("//btn", "")])]);

    let control = h.engine.control();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        control.pause();
    });

    let started = Instant::now();
    h.engine.tick().await;
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "pause should cut the 8s wait short"
    );
    assert!(h.driver.effects().is_empty());
    assert_eq!(h.engine.state(), EngineState::Paused);
}

#[tokio::test]
async fn watchdog_abandons_actions_when_the_page_moves_on() {
    let config = EngineConfig {
        page_poll_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let mut h = Harness::with_config("https://example.com", config);
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    let mut act = action("//btn", "");
    act.init_wait = "8".to_string();
    h.start_with(vec![rule("example.com", "", vec![act])]);

    let driver = h.driver.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        driver.navigate("https://example.com/next");
    });

    let started = Instant::now();
    h.engine.tick().await;
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "navigation should cut the 8s wait short"
    );
    assert!(h.driver.effects().is_empty(), "stale action must not fire");
    assert_eq!(h.engine.state(), EngineState::Running);
}

#[tokio::test]
async fn timeout_with_a_healthy_driver_drops_the_baseline_and_continues() {
    let mut h = Harness::new("https://example.com");
    let button = h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "", vec![action("//btn", "")])]);
    h.driver
        .queue_location_failure(DriverError::Timeout("page wedged".into()));

    h.engine.tick().await;
    assert_eq!(h.engine.state(), EngineState::Running);
    assert!(h
        .events
        .logs()
        .contains(&"TIMEOUT when running rules!".to_string()));

    // driver answered the health probe, so the next tick starts fresh
    h.engine.tick().await;
    assert_eq!(h.driver.effects(), vec![Effect::Click { handle: button.0 }]);
}

#[tokio::test]
async fn lost_connection_notifies_and_pauses() {
    let mut h = Harness::new("https://example.com");
    h.start_with(vec![rule("example.com", "", vec![])]);
    h.driver
        .queue_location_failure(DriverError::ConnectionLost("session gone".into()));

    h.engine.tick().await;
    assert_eq!(h.engine.state(), EngineState::Paused);
    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Houston, we have a problem!"));
}

fn temp_rules_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pagewarden-{name}-{}.json", std::process::id()))
}

fn bump_mtime(path: &PathBuf) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

#[tokio::test]
async fn rewritten_rules_file_is_reloaded_between_ticks() {
    let path = temp_rules_path("reload");
    std::fs::write(
        &path,
        r#"[{"name":"fill","url":"example.com","enable":true,"initWait":"",
            "actions":[{"initWait":"","elementFinder":"//field","value":"one"}]}]"#,
    )
    .unwrap();

    let mut h = Harness::new("https://example.com");
    let field = h.driver.add_element("//field", ElementKind::Input, "");
    h.engine.load_rules(&path).unwrap();
    h.engine.control().start();

    h.engine.tick().await;
    assert_eq!(
        h.driver.effects(),
        vec![Effect::Fill {
            handle: field.0,
            text: "one".to_string()
        }]
    );

    std::fs::write(
        &path,
        r#"[{"name":"fill","url":"example.com","enable":true,"initWait":"",
            "actions":[{"initWait":"","elementFinder":"//field","value":"two"}]}]"#,
    )
    .unwrap();
    bump_mtime(&path);

    h.engine.tick().await;
    assert_eq!(
        h.driver.effects().last(),
        Some(&Effect::Fill {
            handle: field.0,
            text: "two".to_string()
        })
    );

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn malformed_rules_on_reload_pause_the_engine() {
    let path = temp_rules_path("malformed");
    std::fs::write(
        &path,
        r#"[{"name":"ok","url":"example.com","enable":true,"initWait":"","actions":[]}]"#,
    )
    .unwrap();

    let mut h = Harness::new("https://example.com");
    h.engine.load_rules(&path).unwrap();
    h.engine.control().start();
    h.engine.tick().await;

    std::fs::write(&path, "this is not json").unwrap();
    bump_mtime(&path);

    h.engine.tick().await;
    assert_eq!(h.engine.state(), EngineState::Paused);
    assert!(h
        .events
        .logs()
        .iter()
        .any(|l| l.starts_with("ERROR reading rules file")));

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn clear_resets_flags_and_page_baseline() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    let mut act = action("//btn", "");
    act.flag_set = Some(vec![FlagMutation {
        name: "x".to_string(),
        value: "5".to_string(),
        op: "set".to_string(),
    }]);
    h.start_with(vec![rule("example.com", "", vec![act])]);

    h.engine.tick().await;
    assert_eq!(h.engine.flags().get("x"), "5");
    assert_eq!(h.driver.effects().len(), 1);

    h.engine.clear();
    assert_eq!(h.engine.flags().get("x"), "");

    // the baseline is gone too, so the same page runs again
    h.engine.tick().await;
    assert_eq!(h.driver.effects().len(), 2);
}

#[tokio::test]
async fn configured_zero_wait_still_announces_progress() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "0", vec![action("//btn", "")])]);

    h.engine.tick().await;
    assert_eq!(h.events.progress_values(), vec![0, 0]);
    assert_eq!(h.driver.effects().len(), 1);
}

#[tokio::test]
async fn empty_wait_spec_is_silent() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "", vec![action("//btn", "")])]);

    h.engine.tick().await;
    assert!(h.events.progress_values().is_empty());
}

#[tokio::test]
async fn malformed_wait_spec_logs_a_diagnostic_and_continues() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "abc", vec![action("//btn", "")])]);

    h.engine.tick().await;
    assert_eq!(h.driver.effects().len(), 1, "malformed wait is non-fatal");
    assert!(h
        .events
        .logs()
        .iter()
        .any(|l| l.contains("Malformed wait spec")));
    assert_eq!(h.engine.state(), EngineState::Running);
}

#[tokio::test]
async fn reversed_wait_range_is_a_definition_error() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "9e3", vec![action("//btn", "")])]);

    h.engine.tick().await;
    assert!(h.driver.effects().is_empty());
    assert_eq!(h.engine.state(), EngineState::Paused);
}

#[tokio::test]
async fn idle_engine_ignores_ticks() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.engine
        .set_rules(RuleSet::new(vec![rule("example.com", "", vec![action("//btn", "")])]));

    h.engine.tick().await;
    assert!(h.driver.effects().is_empty());
    assert_eq!(h.engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn recoverable_driver_error_escaping_capture_only_aborts_the_pass() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "", vec![action("//btn", "")])]);

    // the document element vanishes entirely: the change gate reads that as
    // "changed", then capturing the new baseline fails
    h.driver.remove_element("head");
    h.engine.tick().await;
    assert_eq!(h.engine.state(), EngineState::Running);
    assert!(h
        .events
        .logs()
        .iter()
        .any(|l| l.starts_with("Rule pass aborted")));
    assert!(h.driver.effects().is_empty());
}

#[tokio::test]
async fn stopped_is_terminal() {
    let mut h = Harness::new("https://example.com");
    h.driver.add_element("//btn", ElementKind::Other, "Go");
    h.start_with(vec![rule("example.com", "", vec![action("//btn", "")])]);

    let control = h.engine.control();
    control.stop();
    control.start();
    assert_eq!(h.engine.state(), EngineState::Stopped);

    h.engine.tick().await;
    assert!(h.driver.effects().is_empty());
}

#[tokio::test]
async fn run_until_stopped_exits_promptly_on_stop() {
    let mut h = Harness::new("https://example.com");
    h.start_with(vec![]);

    let control = h.engine.control();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        control.stop();
    });

    let started = Instant::now();
    h.engine.run_until_stopped(Duration::from_secs(30)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.engine.state(), EngineState::Stopped);
}
