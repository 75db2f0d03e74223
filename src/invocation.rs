//! Purpose: Read-only snapshot of a parsed CLI invocation.
//! Exports: `ParsedInvocation`, `OptionValue`.
//! Role: Input handed to the redispatch hook before any command runs.
//! Invariants: Absent options are missing keys, never `Flag(false)` placeholders.
//! Invariants: The snapshot is immutable once built; the hook only reads it.

use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    Flag(bool),
    Text(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedInvocation {
    command: Option<String>,
    command_index: Option<usize>,
    args: Vec<String>,
    options: BTreeMap<String, OptionValue>,
    interactive: bool,
}

impl ParsedInvocation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// Position of the command token in the raw argv (program path is 0).
    pub fn with_command_index(mut self, index: Option<usize>) -> Self {
        self.command_index = index;
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options
            .insert(name.into(), OptionValue::Text(value.into()));
        self
    }

    /// Sets `name` when `value` is present; `None` leaves the option absent.
    pub fn with_optional(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with_option(name, value),
            None => self,
        }
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.options.insert(name.into(), OptionValue::Flag(value));
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn command_index(&self) -> Option<usize> {
        self.command_index
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Text value of `name`; flags read as absent.
    pub fn option_str(&self, name: &str) -> Option<&str> {
        match self.options.get(name) {
            Some(OptionValue::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn root(&self) -> Option<&str> {
        self.option_str("root")
    }

    pub fn uri(&self) -> Option<&str> {
        self.option_str("uri")
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}
