//! Test harness utilities shared by the dispatcher suites.

mod config_loader;
mod launcher;
mod reporter;
mod routing_world;
mod shutdown;
mod ui;
mod world;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use launcher::RecordingLauncher;
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use routing_world::{IDLE_TIMEOUT, RoutingWorld, routing_world};
pub use shutdown::TestShutdownSignal;
pub use ui::RecordingUi;
pub use world::{TestWorld, world};

/// Routing script sending `example.com` to `BrowserX`.
pub const BROWSER_X_SCRIPT: &str = r#"#{
    default_browser: "Firefox",
    handlers: [#{ matches: "example.com/*", browser: "BrowserX" }],
}"#;

/// Routing script that lets the dispatcher exit when idle.
pub const SHORT_LIVED_SCRIPT: &str = r#"#{
    default_browser: "Firefox",
    handlers: [#{ matches: "example.com/*", browser: "BrowserX" }],
    options: #{ keep_running: false, check_for_updates: false },
}"#;

/// `BROWSER_X_SCRIPT` written in the older JavaScript-flavoured dialect.
pub const LEGACY_SCRIPT: &str = r#"var target = "BrowserX";
module.exports = #{
    default_browser: "Firefox",
    handlers: [#{ matches: |url, opener| url.host === "example.com", browser: target }],
};
"#;

/// Script the build pipeline rejects.
pub const BROKEN_SCRIPT: &str = "let = ;";
