//! Purpose: Command-level capability tags consulted before dispatch.
//! Exports: `AnnotationSet`, `HANDLE_REMOTE_COMMANDS`.
//! Role: Lets individual commands opt out of generic behavior such as redispatch.

use std::collections::BTreeSet;

/// The command talks to remote hosts on its own; generic redispatch is skipped.
pub const HANDLE_REMOTE_COMMANDS: &str = "handle-remote-commands";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    tags: BTreeSet<String>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn has(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

impl<'a> FromIterator<&'a str> for AnnotationSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().map(str::to_string).collect(),
        }
    }
}
