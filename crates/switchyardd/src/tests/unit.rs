//! Unit tests for bootstrap and dispatcher collaborators.

use std::fs;
use std::sync::Arc;

use mockall::mock;
use mockall::predicate::function;
use rstest::rstest;

use crate::bootstrap_with;
use crate::dispatch::Event;
use crate::evaluator::{AppKind, LaunchDescriptor};
use crate::launcher::{LaunchError, Launcher};
use crate::requests::RequestLog;
use crate::ui::UiMessage;

use super::support::{
    BROWSER_X_SCRIPT, FailingConfigLoader, HealthEvent, RecordingHealthReporter, RoutingWorld,
    TestConfigLoader,
};

mock! {
    Opener {}
    impl Launcher for Opener {
        fn launch(&self, descriptor: &LaunchDescriptor) -> Result<(), LaunchError>;
    }
}

#[rstest]
fn bootstrap_creates_the_cache_layout() {
    let loader = TestConfigLoader::new();
    let reporter = Arc::new(RecordingHealthReporter::default());

    let bootstrapped = bootstrap_with(&loader, reporter.clone()).expect("bootstrap should succeed");

    assert!(bootstrapped.paths().transform_dir().is_dir());
    assert!(bootstrapped.paths().root().starts_with(loader.dir()));
    let events = reporter.events();
    assert_eq!(
        events,
        vec![HealthEvent::BootstrapStarting, HealthEvent::BootstrapSucceeded]
    );
}

#[rstest]
fn bootstrap_reports_configuration_failures() {
    let reporter = Arc::new(RecordingHealthReporter::default());

    let error = bootstrap_with(&FailingConfigLoader, reporter.clone())
        .err()
        .expect("bootstrap should fail");

    assert!(error.to_string().contains("failed to load configuration"));
    let events = reporter.events();
    assert!(matches!(
        events.as_slice(),
        [HealthEvent::BootstrapStarting, HealthEvent::BootstrapFailed(_)]
    ));
}

#[rstest]
fn routed_descriptors_reach_the_launcher() {
    let mut opener = MockOpener::new();
    opener
        .expect_launch()
        .with(function(|descriptor: &LaunchDescriptor| {
            descriptor.target == "BrowserX" && descriptor.kind == AppKind::AppName
        }))
        .once()
        .returning(|_| Ok(()));
    let mut world = RoutingWorld::new();
    world.write_script(BROWSER_X_SCRIPT);
    world.build_with_launcher(Arc::new(opener));
    world.dispatcher_mut().start();

    world.route("https://example.com/");
}

#[rstest]
fn launch_failures_do_not_stop_the_dispatcher() {
    let mut opener = MockOpener::new();
    opener.expect_launch().times(2).returning(|descriptor| {
        Err(LaunchError::Spawn {
            program: descriptor.target.clone(),
            source: std::io::Error::other("no such helper"),
        })
    });
    let mut world = RoutingWorld::new();
    world.build_with_launcher(Arc::new(opener));
    world.dispatcher_mut().start();

    world.route("https://example.com/");
    world.route("https://example.org/");

    assert_eq!(world.exit(), None);
}

#[rstest]
fn start_announces_the_version_before_the_configuration() {
    let mut world = RoutingWorld::new();
    world.start();

    let messages = world.ui.messages();
    assert!(
        matches!(messages.first(), Some(UiMessage::Version(_))),
        "{messages:?}"
    );
    assert!(
        messages
            .iter()
            .any(|message| matches!(message, UiMessage::Config(_))),
        "{messages:?}"
    );
}

#[rstest]
fn request_logging_follows_the_script_option() {
    let mut world = RoutingWorld::new();
    world.write_script(
        r#"#{
            default_browser: "Firefox",
            options: #{ log_requests: true },
        }"#,
    );
    world.start();
    assert!(world.dispatcher().options().log_requests);

    world.route("https://example.com/");

    let log = RequestLog::new(world.request_log_path());
    let contents = fs::read_to_string(log.path()).expect("request log should exist");
    let entry: serde_json::Value =
        serde_json::from_str(contents.lines().next().expect("one entry")).expect("json entry");
    assert_eq!(entry["url"], "https://example.com/");
    assert_eq!(entry["launch"]["target"], "Firefox");
}

#[rstest]
fn reported_errors_use_the_default_browser_and_show_the_ui() {
    let mut world = RoutingWorld::new();
    world.write_script(
        r#"#{
            default_browser: "Firefox",
            handlers: [#{ matches: |u, o| { throw "boom"; }, browser: "BrowserX" }],
        }"#,
    );
    world.start();

    world.route("https://example.com/");

    assert_eq!(world.launcher.targets(), vec!["Firefox".to_owned()]);
    assert!(world.ui.was_shown());
    assert!(world.dispatcher().last_error().is_some());
}

#[rstest]
fn watcher_closure_is_not_fatal() {
    let mut world = RoutingWorld::new();
    world.start();

    world.send(Event::WatcherClosed("backend gone".to_owned()));

    assert_eq!(world.exit(), None);
}
