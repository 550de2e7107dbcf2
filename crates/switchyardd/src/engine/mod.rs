//! Embedded Rhai runtime hosting the rule API and the user's configuration.
//!
//! Loading runs four gated phases: the API script is bootstrapped, the bundled
//! user script is evaluated, its value is merged with defaults and the merged
//! configuration is validated. A failed phase yields a [`LoadError`] and no
//! engine.

use std::fmt;
use std::fs;
use std::sync::Arc;

use rhai::module_resolvers::StaticModuleResolver;
use rhai::{
    Array, CallFnOptions, Dynamic, Engine, EvalAltResult, FuncArgs, Map, Module, Scope, Shared,
    AST,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

mod host;

pub use host::{
    HostCapabilities, ModifierKeys, PowerInfo, SystemHost, SystemInfo, app_kind, parse_url,
    wildcard_match,
};

use crate::pipeline::{BundleArtifact, BundleModule, CompiledConfig, DEFAULT_NAMESPACE};

pub(crate) const SCRIPT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::script");
const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Rule API evaluated before every user script.
pub const API_SOURCE: &str = include_str!("api.rhai");

const MAX_OPERATIONS: u64 = 5_000_000;
const MAX_CALL_LEVELS: usize = 64;

/// Stage of [`ScriptEngine::load`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Compiling or running the rule API.
    Bootstrap,
    /// Reading the bundle or evaluating the user's script.
    UserScript,
    /// Merging the user's value with defaults.
    Merge,
    /// Validating the merged configuration.
    Validation,
}

impl LoadPhase {
    /// Stable identifier used in logs and UI messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::UserScript => "user_script",
            Self::Merge => "merge",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to bring up a [`ScriptEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("configuration {phase} failed: {message}")]
pub struct LoadError {
    /// Phase that failed.
    pub phase: LoadPhase,
    /// Human readable cause.
    pub message: String,
    /// Individual validation problems; empty for other phases.
    pub problems: Vec<String>,
}

impl LoadError {
    fn new(phase: LoadPhase, message: impl fmt::Display) -> Self {
        Self {
            phase,
            message: message.to_string(),
            problems: Vec::new(),
        }
    }

    fn validation(problems: Vec<String>) -> Self {
        Self {
            phase: LoadPhase::Validation,
            message: problems.join("; "),
            problems,
        }
    }
}

/// Read-only summary reported by the loaded script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfigState {
    /// Number of handler rules.
    pub handlers: usize,
    /// Number of rewrite rules.
    pub rewrites: usize,
    /// Label of the default browser.
    pub default_browser: String,
    /// Whether the configuration validates.
    pub is_valid: bool,
}

#[derive(Debug, Deserialize)]
struct ScriptState {
    handlers: i64,
    rewrites: i64,
    default_browser: String,
    is_valid: bool,
}

/// Behavioural options read from `config.options`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOptions {
    /// Stay resident after handling URLs.
    pub keep_running: bool,
    /// Hide the status icon.
    pub hide_icon: bool,
    /// Append routed URLs to the request log.
    pub log_requests: bool,
    /// Poll for new releases.
    pub check_for_updates: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            keep_running: true,
            hide_icon: false,
            log_requests: false,
            check_for_updates: true,
        }
    }
}

impl ConfigOptions {
    /// Reads every option, substituting defaults when no engine is loaded.
    pub fn read(engine: Option<&ScriptEngine>) -> Self {
        let defaults = Self::default();
        Self {
            keep_running: option_or(engine, "keep_running", defaults.keep_running),
            hide_icon: option_or(engine, "hide_icon", defaults.hide_icon),
            log_requests: option_or(engine, "log_requests", defaults.log_requests),
            check_for_updates: option_or(engine, "check_for_updates", defaults.check_for_updates),
        }
    }
}

/// A loaded routing configuration.
pub struct ScriptEngine {
    engine: Engine,
    program: AST,
    scope: Scope<'static>,
    config: Dynamic,
    namespace: String,
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("namespace", &self.namespace)
            .field("functions", &self.program.iter_functions().count())
            .finish_non_exhaustive()
    }
}

impl ScriptEngine {
    /// Loads `api_source` and, when present, the bundled user script.
    ///
    /// Host functions are registered first so the user's script may call them
    /// while it evaluates.
    pub fn load(
        api_source: &str,
        bundle: Option<&CompiledConfig>,
        host: Arc<dyn HostCapabilities>,
    ) -> Result<Self, LoadError> {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        host::register(&mut engine, host);

        let api = engine
            .compile(api_source)
            .map_err(|error| LoadError::new(LoadPhase::Bootstrap, error))?;
        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &api)
            .map_err(|error| LoadError::new(LoadPhase::Bootstrap, error))?;

        let (namespace, program, user_value) = match bundle {
            Some(compiled) => {
                let artifact = read_artifact(compiled)?;
                install_modules(&mut engine, &artifact.modules)?;
                let entry = engine
                    .compile(&artifact.entry.source)
                    .map_err(|error| user_script_error(&artifact.entry, error))?;
                let merged = api.merge(&entry);
                let value = engine
                    .eval_ast_with_scope::<Dynamic>(&mut scope, &merged)
                    .map_err(|error| user_script_error(&artifact.entry, error))?;
                (
                    compiled.namespace.clone(),
                    merged.clone_functions_only(),
                    value,
                )
            }
            None => (
                DEFAULT_NAMESPACE.to_owned(),
                api.clone_functions_only(),
                Dynamic::from_map(Map::new()),
            ),
        };
        scope.push_constant_dynamic(namespace.clone(), user_value.clone());

        let mut loaded = Self {
            engine,
            program,
            scope,
            config: Dynamic::UNIT,
            namespace,
        };
        loaded.config = loaded
            .call::<Dynamic>("get_configuration", (user_value,))
            .map_err(|error| LoadError::new(LoadPhase::Merge, error))?;

        let problems = loaded
            .call::<Array>("validate_config", (loaded.config.clone(),))
            .map_err(|error| LoadError::new(LoadPhase::Validation, error))?;
        if !problems.is_empty() {
            return Err(LoadError::validation(
                problems.into_iter().map(|problem| problem.to_string()).collect(),
            ));
        }

        debug!(target: ENGINE_TARGET, namespace = %loaded.namespace, "script engine loaded");
        Ok(loaded)
    }

    /// Global the user's value is bound to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Summary of the loaded configuration.
    pub fn state(&self) -> Result<RuntimeConfigState, Box<EvalAltResult>> {
        let value = self.call::<Dynamic>("config_state", (self.config.clone(),))?;
        let state: ScriptState = rhai::serde::from_dynamic(&value)?;
        Ok(RuntimeConfigState {
            handlers: usize::try_from(state.handlers).unwrap_or_default(),
            rewrites: usize::try_from(state.rewrites).unwrap_or_default(),
            default_browser: state.default_browser,
            is_valid: state.is_valid,
        })
    }

    /// Reads `config.options[name]`, falling back to `default`.
    ///
    /// Failures are logged and never surface to the caller.
    pub fn option<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        let value = match self.call::<Dynamic>("get_option", (name.to_owned(), self.config.clone()))
        {
            Ok(value) => value,
            Err(error) => {
                warn!(target: ENGINE_TARGET, option = name, error = %error, "option query failed");
                return default;
            }
        };
        if value.is_unit() {
            return default;
        }
        rhai::serde::from_dynamic(&value).unwrap_or_else(|error| {
            warn!(
                target: ENGINE_TARGET,
                option = name,
                value = %value,
                error = %error,
                "option has an unexpected type"
            );
            default
        })
    }

    /// Invokes the rule API's `open_url` for `url` and `opener`.
    pub fn open_url(&self, url: &str, opener: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
        self.call::<Dynamic>("open_url", (url.to_owned(), opener, self.config.clone()))
    }

    /// Calls a script function in a scope private to this call.
    fn call<T>(&self, name: &str, args: impl FuncArgs) -> Result<T, Box<EvalAltResult>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut scope = self.scope.clone();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        self.engine
            .call_fn_with_options(options, &mut scope, &self.program, name, args)
    }
}

/// Reads an option from an optional engine.
pub fn option_or<T: DeserializeOwned>(engine: Option<&ScriptEngine>, name: &str, default: T) -> T {
    match engine {
        Some(engine) => engine.option(name, default),
        None => default,
    }
}

fn read_artifact(compiled: &CompiledConfig) -> Result<BundleArtifact, LoadError> {
    let text = fs::read_to_string(&compiled.bundle_path).map_err(|error| {
        LoadError::new(
            LoadPhase::UserScript,
            format!(
                "failed to read bundle '{}': {error}",
                compiled.bundle_path.display()
            ),
        )
    })?;
    BundleArtifact::parse(&text).map_err(|error| {
        LoadError::new(
            LoadPhase::UserScript,
            format!("{}: {error}", compiled.bundle_path.display()),
        )
    })
}

/// Evaluates module sections in dependency order and exposes them by id and
/// by alias.
fn install_modules(engine: &mut Engine, sections: &[BundleModule]) -> Result<(), LoadError> {
    let mut resolver = StaticModuleResolver::new();
    for section in sections {
        engine.set_module_resolver(resolver.clone());
        let ast = engine
            .compile(&section.source)
            .map_err(|error| user_script_error(section, error))?;
        let module = Module::eval_ast_as_new(Scope::new(), &ast, engine)
            .map_err(|error| user_script_error(section, error))?;
        resolver.insert(section.id.as_str(), module.clone());
        let module = Shared::new(module);
        for alias in &section.aliases {
            engine.register_static_module(alias.as_str(), Shared::clone(&module));
        }
    }
    engine.set_module_resolver(resolver);
    Ok(())
}

fn user_script_error(section: &BundleModule, error: impl fmt::Display) -> LoadError {
    LoadError::new(
        LoadPhase::UserScript,
        format!("{}: {error}", section.origin.display()),
    )
}
