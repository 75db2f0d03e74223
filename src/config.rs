//! Purpose: Process-level configuration for the hook and the ssh backend.
//! Exports: `RuntimeConfig`, `BackendConfig`, `parse_override`.
//! Role: Captures the raw argv once and resolves backend settings from overrides/env.
//! Invariants: `-D` overrides apply to the local process only and are never forwarded.
//! Invariants: Tokens after `--` are positionals, never overrides.
//! Invariants: Resolution order is `-D` override, then environment, then default.

use std::collections::BTreeMap;

use crate::core::error::{Error, ErrorKind};

/// Prefix of inline configuration override tokens (`-Dkey=value`).
pub const OVERRIDE_PREFIX: &str = "-D";

pub const DEFAULT_SSH_PROGRAM: &str = "ssh";
pub const DEFAULT_SSH_OPTIONS: &str = "-o PasswordAuthentication=no";
pub const DEFAULT_SCRIPT: &str = "redispatch";
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    argv: Vec<String>,
    overrides: BTreeMap<String, String>,
}

impl RuntimeConfig {
    /// Wraps the literal tokens the process was launched with, program path first.
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        let overrides = argv
            .iter()
            .skip(1)
            .take_while(|token| token.as_str() != "--")
            .filter_map(|token| token.strip_prefix(OVERRIDE_PREFIX))
            .filter_map(parse_override)
            .collect();
        Self { argv, overrides }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn overrides(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }
}

/// Splits `key=value`; a bare `key` means `1`. Empty keys are ignored.
pub fn parse_override(raw: &str) -> Option<(String, String)> {
    let (key, value) = match raw.split_once('=') {
        Some((key, value)) => (key, value),
        None => (raw, "1"),
    };
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub ssh_program: String,
    pub ssh_options: Vec<String>,
    pub script: String,
    pub concurrency: usize,
    pub simulate: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ssh_program: DEFAULT_SSH_PROGRAM.to_string(),
            ssh_options: DEFAULT_SSH_OPTIONS
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            script: DEFAULT_SCRIPT.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            simulate: false,
        }
    }
}

struct Setting {
    key: &'static str,
    env: &'static str,
}

const SSH_PROGRAM: Setting = Setting {
    key: "ssh.program",
    env: "REDISPATCH_SSH",
};
const SSH_OPTIONS: Setting = Setting {
    key: "ssh.options",
    env: "REDISPATCH_SSH_OPTIONS",
};
const SCRIPT: Setting = Setting {
    key: "backend.script",
    env: "REDISPATCH_SCRIPT",
};
const CONCURRENCY: Setting = Setting {
    key: "backend.concurrency",
    env: "REDISPATCH_CONCURRENCY",
};
const SIMULATE: Setting = Setting {
    key: "backend.simulate",
    env: "REDISPATCH_SIMULATE",
};

impl BackendConfig {
    pub fn from_env(runtime: &RuntimeConfig) -> Result<Self, Error> {
        Self::resolve(runtime, |name| std::env::var(name).ok())
    }

    pub fn resolve<F>(runtime: &RuntimeConfig, env: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |setting: &Setting| {
            runtime
                .get(setting.key)
                .map(str::to_string)
                .or_else(|| env(setting.env))
        };

        let mut config = Self::default();
        if let Some(program) = lookup(&SSH_PROGRAM) {
            if program.trim().is_empty() {
                return Err(invalid_setting(&SSH_PROGRAM, "must not be empty"));
            }
            config.ssh_program = program;
        }
        if let Some(options) = lookup(&SSH_OPTIONS) {
            config.ssh_options = shlex::split(&options)
                .ok_or_else(|| invalid_setting(&SSH_OPTIONS, "has unbalanced quotes"))?;
        }
        if let Some(script) = lookup(&SCRIPT) {
            if script.trim().is_empty() {
                return Err(invalid_setting(&SCRIPT, "must not be empty"));
            }
            config.script = script;
        }
        if let Some(raw) = lookup(&CONCURRENCY) {
            config.concurrency = match raw.trim().parse::<usize>() {
                Ok(value) if value > 0 => value,
                _ => return Err(invalid_setting(&CONCURRENCY, "must be a positive integer")),
            };
        }
        if let Some(raw) = lookup(&SIMULATE) {
            config.simulate = parse_bool(&raw)
                .ok_or_else(|| invalid_setting(&SIMULATE, "must be a boolean"))?;
        }
        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid_setting(setting: &Setting, problem: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("invalid config `{}`: {problem}", setting.key))
        .with_hint(format!(
            "Fix -D{}=... or the {} environment variable.",
            setting.key, setting.env
        ))
}
