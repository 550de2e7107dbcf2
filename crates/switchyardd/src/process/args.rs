//! Separates configuration flags from the URLs passed on the command line.
//!
//! Configuration flags must precede URLs. Scanning stops at the first token
//! that is not a known flag; that token and everything after it are URLs.

use std::ffi::{OsStr, OsString};

/// Flags forwarded to `ortho-config`, paired with whether they take a value.
pub(crate) const CONFIG_CLI_FLAGS: &[(&str, bool)] = &[
    ("--config", true),
    ("--config-path", true),
    ("--log-filter", true),
    ("--log-format", true),
    ("--cache-dir", true),
    ("--idle-timeout-ms", true),
    ("--window", false),
    ("--dry-run", false),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn process_config_flag(argument: &OsStr) -> FlagAction {
    let argument_text = argument.to_string_lossy();
    if !argument_text.starts_with("--") {
        return FlagAction::Skip;
    }

    let (flag, has_inline_value) = match argument_text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (argument_text.as_ref(), false),
    };

    CONFIG_CLI_FLAGS
        .iter()
        .find(|(known, _)| *known == flag)
        .map_or(FlagAction::Skip, |(_, takes_value)| FlagAction::Include {
            needs_value: *takes_value && !has_inline_value,
        })
}

/// Result of splitting the process arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    /// Program name followed by the configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Index of the first URL argument.
    pub(crate) command_start: usize,
}

impl ConfigArgumentSplit {
    /// URLs following the configuration flags.
    pub(crate) fn urls(&self, args: &[OsString]) -> Vec<String> {
        args.get(self.command_start..)
            .unwrap_or_default()
            .iter()
            .map(|argument| argument.to_string_lossy().into_owned())
            .collect()
    }
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut filtered = vec![program.clone()];
    let mut command_start = 1usize;
    let mut pending_value = false;

    for argument in rest {
        if pending_value {
            filtered.push(argument.clone());
            pending_value = false;
            command_start += 1;
            continue;
        }

        match process_config_flag(argument.as_os_str()) {
            FlagAction::Include { needs_value } => {
                filtered.push(argument.clone());
                command_start += 1;
                pending_value = needs_value;
            }
            FlagAction::Skip => break,
        }
    }

    ConfigArgumentSplit {
        config_arguments: filtered,
        command_start,
    }
}
