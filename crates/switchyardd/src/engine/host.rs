//! Host capabilities exposed to routing scripts.
//!
//! Environment probes sit behind [`HostCapabilities`] so tests can pin them.
//! URL parsing, wildcard matching and app-kind detection are pure helpers and
//! are always registered.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, Map};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::SCRIPT_TARGET;

const PROTOCOL_PREFIXES: &[&str] = &[
    "https:", "http:", "ftp:", "mailto:", "file:", "tel:", "sms:", "data:",
];

/// Machine identity reported to scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    /// Human readable machine name.
    pub localized_name: String,
    /// Network host name.
    pub name: String,
    /// Operating system family.
    pub os: String,
}

/// Modifier keys held while the URL was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierKeys {
    /// Shift.
    pub shift: bool,
    /// Option or Alt.
    pub option: bool,
    /// Command or Super.
    pub command: bool,
    /// Control.
    pub control: bool,
    /// Caps lock.
    pub caps_lock: bool,
    /// Function.
    #[serde(rename = "fn")]
    pub function: bool,
}

/// Power source snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerInfo {
    /// A battery reports it is charging.
    pub is_charging: bool,
    /// External power is connected.
    pub is_connected: bool,
    /// Battery charge percentage, when a battery exists.
    pub percentage: Option<i64>,
}

/// Environment probes available to scripts. Fixed for an engine's lifetime.
pub trait HostCapabilities: Send + Sync {
    /// Describes the machine.
    fn system_info(&self) -> SystemInfo;
    /// Reports held modifier keys.
    fn modifier_keys(&self) -> ModifierKeys;
    /// Reports the power source.
    fn power_info(&self) -> PowerInfo;
    /// Returns `true` when an application with `name` is running.
    fn is_app_running(&self, name: &str) -> bool;
}

impl<T> HostCapabilities for Arc<T>
where
    T: HostCapabilities + ?Sized,
{
    fn system_info(&self) -> SystemInfo {
        self.as_ref().system_info()
    }

    fn modifier_keys(&self) -> ModifierKeys {
        self.as_ref().modifier_keys()
    }

    fn power_info(&self) -> PowerInfo {
        self.as_ref().power_info()
    }

    fn is_app_running(&self, name: &str) -> bool {
        self.as_ref().is_app_running(name)
    }
}

/// Probes the running system.
///
/// Keyboard state is unavailable to a headless daemon, so every modifier
/// reads as released.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl HostCapabilities for SystemHost {
    fn system_info(&self) -> SystemInfo {
        let name = fs::read_to_string("/etc/hostname")
            .ok()
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_default();
        SystemInfo {
            localized_name: name.clone(),
            name,
            os: std::env::consts::OS.to_owned(),
        }
    }

    fn modifier_keys(&self) -> ModifierKeys {
        ModifierKeys::default()
    }

    fn power_info(&self) -> PowerInfo {
        read_power_supplies(Path::new("/sys/class/power_supply"))
    }

    fn is_app_running(&self, name: &str) -> bool {
        let Ok(entries) = fs::read_dir("/proc") else {
            return false;
        };
        entries.filter_map(Result::ok).any(|entry| {
            fs::read_to_string(entry.path().join("comm"))
                .is_ok_and(|comm| comm.trim().eq_ignore_ascii_case(name))
        })
    }
}

fn read_power_supplies(root: &Path) -> PowerInfo {
    let mut info = PowerInfo::default();
    let Ok(entries) = fs::read_dir(root) else {
        return info;
    };
    for entry in entries.filter_map(Result::ok) {
        let read = |file: &str| {
            fs::read_to_string(entry.path().join(file))
                .map(|text| text.trim().to_owned())
                .unwrap_or_default()
        };
        match read("type").as_str() {
            "Battery" => {
                info.is_charging |= read("status") == "Charging";
                if let Ok(capacity) = read("capacity").parse::<i64>() {
                    info.percentage = Some(capacity);
                }
            }
            "Mains" | "USB" => info.is_connected |= read("online") == "1",
            _ => {}
        }
    }
    info
}

/// Splits a URL into its WHATWG-style parts.
pub fn parse_url(text: &str) -> Result<Map, url::ParseError> {
    let url = Url::parse(text)?;
    let host = url.host_str().unwrap_or_default();
    let port = url.port().map(|port| port.to_string()).unwrap_or_default();
    let mut parts = Map::new();
    let mut put = |key: &str, value: String| {
        parts.insert(key.into(), Dynamic::from(value));
    };
    put("href", url.as_str().to_owned());
    put("protocol", format!("{}:", url.scheme()));
    put("username", url.username().to_owned());
    put("password", url.password().unwrap_or_default().to_owned());
    put(
        "host",
        if port.is_empty() {
            host.to_owned()
        } else {
            format!("{host}:{port}")
        },
    );
    put("hostname", host.to_owned());
    put("port", port);
    put("pathname", url.path().to_owned());
    put(
        "search",
        url.query().map(|query| format!("?{query}")).unwrap_or_default(),
    );
    put(
        "hash",
        url.fragment()
            .map(|fragment| format!("#{fragment}"))
            .unwrap_or_default(),
    );
    Ok(parts)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    Any,
}

/// Matches `text` against a wildcard `pattern`.
///
/// `*` matches any run and `\*` a literal asterisk. Patterns without a scheme
/// also match URLs carrying a common scheme prefix, and a scheme pattern
/// ending in `//` matches anything after it. An empty pattern never matches.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if !pattern.contains('*') {
        return pattern == text;
    }

    let mut tokens = tokenize(pattern);
    if has_scheme(pattern) {
        if pattern.ends_with("//") {
            tokens.push(Token::Any);
        }
        return glob(&tokens, text);
    }
    if pattern.starts_with('*') {
        return glob(&tokens, text);
    }
    scheme_variants(text).any(|candidate| glob(&tokens, candidate))
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'*') => {
                chars.next();
                tokens.push(Token::Char('*'));
            }
            '*' => tokens.push(Token::Any),
            other => tokens.push(Token::Char(other)),
        }
    }
    tokens
}

fn has_scheme(pattern: &str) -> bool {
    pattern.split_once(':').is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    })
}

fn scheme_variants(text: &str) -> impl Iterator<Item = &str> {
    let stripped = PROTOCOL_PREFIXES
        .iter()
        .filter_map(move |prefix| text.strip_prefix(prefix));
    std::iter::once(Some(text))
        .chain(stripped.flat_map(|rest| [Some(rest), rest.strip_prefix("//")]))
        .chain(std::iter::once(text.strip_prefix("//")))
        .flatten()
}

fn glob(tokens: &[Token], text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let (mut token, mut position) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while position < chars.len() {
        match tokens.get(token) {
            Some(Token::Any) => {
                backtrack = Some((token, position));
                token += 1;
            }
            Some(Token::Char(expected)) if chars.get(position) == Some(expected) => {
                token += 1;
                position += 1;
            }
            _ => {
                let Some((star, start)) = backtrack else {
                    return false;
                };
                token = star + 1;
                position = start + 1;
                backtrack = Some((star, start + 1));
            }
        }
    }
    tokens
        .get(token..)
        .is_some_and(|rest| rest.iter().all(|remaining| *remaining == Token::Any))
}

/// Classifies an application string as `appName`, `bundleId` or `path`.
pub fn app_kind(name: &str) -> &'static str {
    let all = |allowed: fn(char) -> bool| !name.is_empty() && name.chars().all(allowed);
    if all(|ch| ch.is_ascii_alphanumeric() || ch == ' ') {
        return "appName";
    }
    if all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '-') {
        return "bundleId";
    }
    let rooted = name.starts_with('/') || name.starts_with("~/");
    if rooted && name.ends_with(".app") && name.matches('/').count() >= 2 {
        return "path";
    }
    "appName"
}

fn serialise<T: Serialize>(value: &T) -> Result<Dynamic, Box<EvalAltResult>> {
    rhai::serde::to_dynamic(value)
}

/// Registers host functions and script logging on `engine`.
pub(crate) fn register(engine: &mut Engine, host: Arc<dyn HostCapabilities>) {
    engine.on_print(|text| info!(target: SCRIPT_TARGET, "{text}"));
    engine.on_debug(|text, source, position| {
        debug!(
            target: SCRIPT_TARGET,
            source = source.unwrap_or_default(),
            position = %position,
            "{text}"
        );
    });
    engine.register_fn("warn", |message: &str| {
        warn!(target: SCRIPT_TARGET, "{message}");
    });

    let probe = Arc::clone(&host);
    engine.register_fn("system_info", move || serialise(&probe.system_info()));
    let probe = Arc::clone(&host);
    engine.register_fn("modifier_keys", move || serialise(&probe.modifier_keys()));
    let probe = Arc::clone(&host);
    engine.register_fn("power_info", move || serialise(&probe.power_info()));
    engine.register_fn("is_app_running", move |name: &str| {
        host.is_app_running(name)
    });

    engine.register_fn(
        "parse_url",
        |text: &str| -> Result<Map, Box<EvalAltResult>> {
            parse_url(text).map_err(|error| format!("invalid URL '{text}': {error}").into())
        },
    );
    engine.register_fn("wildcard_match", |pattern: &str, text: &str| {
        wildcard_match(pattern, text)
    });
    engine.register_fn("app_kind", |name: &str| app_kind(name).to_owned());
}
