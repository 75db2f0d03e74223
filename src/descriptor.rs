//! Purpose: Data shapes produced by the redispatch decision.
//! Exports: `RedispatchTarget`, `SiteTarget`, `ExecutionFlags`, `InvocationDescriptor`.
//! Role: Owned, serializable request describing one command for the remote side.
//! Invariants: A descriptor is built fresh per redispatch and moved into the backend.
//! Invariants: Site keys serialize as `remote-host`, `remote-user`, `root`, `uri`.

use serde::Serialize;
use serde_json::{Map, Value};

/// Where a command should run instead of the local machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedispatchTarget {
    pub host: String,
    pub user: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteTarget {
    pub remote_host: Option<String>,
    pub remote_user: Option<String>,
    pub root: Option<String>,
    pub uri: Option<String>,
}

impl SiteTarget {
    /// `user@host`, or just `host` for an anonymous target.
    pub fn ssh_destination(&self) -> Option<String> {
        let host = self.remote_host.as_deref().filter(|host| !host.is_empty())?;
        match self.remote_user.as_deref().filter(|user| !user.is_empty()) {
            Some(user) => Some(format!("{user}@{host}")),
            None => Some(host.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionFlags {
    pub integrate: bool,
    pub backend: bool,
    pub tty: bool,
    pub interactive: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvocationDescriptor {
    pub command: String,
    pub args: Vec<String>,
    pub options: Map<String, Value>,
    pub target: SiteTarget,
    pub flags: ExecutionFlags,
}
