//! End-to-end runs of the dispatcher through its launch plan.

use std::fs;
use std::sync::Arc;

use rstest::rstest;

use crate::dispatch::ExitReason;
use crate::health::HealthReporter;
use crate::launcher::Launcher;
use crate::process::launch::{LaunchPlan, ProcessControl, ServiceDeps, run_dispatcher_with};
use crate::process::StartupError;
use crate::ui::UiBridge;
use crate::updates::NoReleaseSource;

use super::support::{
    FailingConfigLoader, HealthEvent, RecordingHealthReporter, RecordingLauncher, RecordingUi,
    SHORT_LIVED_SCRIPT, TestConfigLoader, TestShutdownSignal,
};

struct Recorders {
    reporter: Arc<RecordingHealthReporter>,
    launcher: Arc<RecordingLauncher>,
    ui: Arc<RecordingUi>,
}

impl Recorders {
    fn new() -> Self {
        Self {
            reporter: Arc::new(RecordingHealthReporter::default()),
            launcher: Arc::new(RecordingLauncher::default()),
            ui: Arc::new(RecordingUi::default()),
        }
    }

    fn plan<L>(
        &self,
        loader: L,
        shutdown: TestShutdownSignal,
        urls: Vec<String>,
    ) -> LaunchPlan<L, TestShutdownSignal> {
        LaunchPlan {
            process: ProcessControl { shutdown, urls },
            services: ServiceDeps {
                loader,
                reporter: self.reporter.clone() as Arc<dyn HealthReporter>,
                launcher: Some(self.launcher.clone() as Arc<dyn Launcher>),
                ui: Some(self.ui.clone() as Arc<dyn UiBridge>),
                releases: Arc::new(NoReleaseSource),
            },
        }
    }
}

#[rstest]
fn command_line_urls_are_routed_before_an_idle_exit() {
    let loader = TestConfigLoader::new().with_idle_timeout_ms(50);
    let script = loader.dir().join("switchyard.rhai");
    fs::write(&script, SHORT_LIVED_SCRIPT).expect("write routing script");
    let loader = loader.with_script(&script);
    let recorders = Recorders::new();
    let shutdown = TestShutdownSignal::new();

    let reason = run_dispatcher_with(recorders.plan(
        loader,
        shutdown.clone(),
        vec!["https://example.com/docs".to_owned()],
    ))
    .expect("dispatcher should run");
    shutdown.trigger();

    assert_eq!(reason, ExitReason::Idle);
    assert_eq!(recorders.launcher.targets(), vec!["BrowserX".to_owned()]);
    let events = recorders.reporter.events();
    assert!(events.contains(&HealthEvent::BootstrapSucceeded));
    assert!(events.contains(&HealthEvent::ReloadSucceeded(Some(1))));
    assert!(events.contains(&HealthEvent::UrlRouted("BrowserX".to_owned())));
}

#[rstest]
fn routing_errors_without_a_window_still_exit_when_idle() {
    let loader = TestConfigLoader::new().with_idle_timeout_ms(50);
    let script = loader.dir().join("switchyard.rhai");
    fs::write(
        &script,
        r#"#{
            default_browser: "Firefox",
            handlers: [#{ matches: |u, o| { throw "boom"; }, browser: "BrowserX" }],
            options: #{ keep_running: false, check_for_updates: false },
        }"#,
    )
    .expect("write routing script");
    let loader = loader.with_script(&script);
    let recorders = Recorders::new();
    let shutdown = TestShutdownSignal::new();
    let mut plan = recorders.plan(
        loader,
        shutdown.clone(),
        vec!["https://example.com/".to_owned()],
    );
    plan.services.ui = None;

    let reason = run_dispatcher_with(plan).expect("dispatcher should run");
    shutdown.trigger();

    assert_eq!(reason, ExitReason::Idle);
    assert_eq!(recorders.launcher.targets(), vec!["Firefox".to_owned()]);
}

#[rstest]
fn shutdown_signal_ends_a_resident_dispatcher() {
    let loader = TestConfigLoader::new();
    let recorders = Recorders::new();
    let shutdown = TestShutdownSignal::new();
    shutdown.trigger();

    let reason = run_dispatcher_with(recorders.plan(loader, shutdown, Vec::new()))
        .expect("dispatcher should run");

    assert_eq!(reason, ExitReason::Shutdown);
    assert!(recorders.launcher.launches().is_empty());
}

#[rstest]
fn configuration_failures_abort_startup() {
    let recorders = Recorders::new();
    let shutdown = TestShutdownSignal::new();

    let error = run_dispatcher_with(recorders.plan(
        FailingConfigLoader,
        shutdown.clone(),
        Vec::new(),
    ))
    .expect_err("startup should fail");
    shutdown.trigger();

    assert!(matches!(error, StartupError::Bootstrap(_)), "{error:?}");
    assert!(recorders.launcher.launches().is_empty());
}
