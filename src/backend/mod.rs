//! Purpose: Contract between the redispatch hook and the command-invocation backend.
//! Exports: `BackendInvoker`, `BackendRequest`, `BackendOptions`, `Invocation`,
//! `InvocationOutput`, `BackendResult`, `SshBackend`.
//! Role: The hook hands one request in and reads `error_status` back out.
//! Invariants: A request always carries at least one invocation.
//! Invariants: `error_status` is the first non-zero child status in submission order, else 0.

mod ssh;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::error::Error;
use crate::descriptor::{ExecutionFlags, InvocationDescriptor, SiteTarget};

pub use ssh::SshBackend;

/// Runs a batch of invocations and reports their combined status.
pub trait BackendInvoker {
    fn invoke_concurrent(&self, request: BackendRequest) -> Result<BackendResult, Error>;
}

impl<T: BackendInvoker + ?Sized> BackendInvoker for &T {
    fn invoke_concurrent(&self, request: BackendRequest) -> Result<BackendResult, Error> {
        (**self).invoke_concurrent(request)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub command: Option<String>,
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackendOptions {
    /// Program to run on the target; `None` uses the configured script.
    #[serde(rename = "drush-script")]
    pub script: Option<String>,
    pub remote_host: Option<String>,
    pub remote_user: Option<String>,
    pub additional_global_options: Vec<String>,
    pub integrate: bool,
    pub backend: bool,
    #[serde(rename = "#tty", skip_serializing_if = "is_false")]
    pub tty: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub interactive: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl BackendOptions {
    pub fn for_site(site: &SiteTarget, flags: ExecutionFlags) -> Self {
        Self {
            script: None,
            remote_host: site.remote_host.clone(),
            remote_user: site.remote_user.clone(),
            additional_global_options: Vec::new(),
            integrate: flags.integrate,
            backend: flags.backend,
            tty: flags.tty,
            interactive: flags.interactive,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackendRequest {
    pub invocations: Vec<Invocation>,
    pub options: Map<String, Value>,
    pub backend_options: BackendOptions,
    pub default_command: Option<String>,
    pub default_site: SiteTarget,
    pub context: Option<Value>,
}

impl BackendRequest {
    /// Wraps one descriptor as a single-element batch.
    pub fn single(descriptor: InvocationDescriptor) -> Self {
        let backend_options = BackendOptions::for_site(&descriptor.target, descriptor.flags);
        Self {
            invocations: vec![Invocation {
                command: Some(descriptor.command),
                args: descriptor.args,
            }],
            options: descriptor.options,
            backend_options,
            default_command: None,
            default_site: descriptor.target,
            context: None,
        }
    }

    /// Remote destination, preferring backend options over the default site.
    pub fn site(&self) -> SiteTarget {
        let remote_host = self
            .backend_options
            .remote_host
            .clone()
            .or_else(|| self.default_site.remote_host.clone());
        let remote_user = self
            .backend_options
            .remote_user
            .clone()
            .or_else(|| self.default_site.remote_user.clone());
        SiteTarget {
            remote_host,
            remote_user,
            root: self.default_site.root.clone(),
            uri: self.default_site.uri.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvocationOutput {
    pub command: String,
    pub exit_code: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackendResult {
    pub error_status: i32,
    pub results: Vec<InvocationOutput>,
}

impl BackendResult {
    pub fn from_outputs(results: Vec<InvocationOutput>) -> Self {
        let error_status = results
            .iter()
            .map(|output| output.exit_code)
            .find(|code| *code != 0)
            .unwrap_or(0);
        Self {
            error_status,
            results,
        }
    }

    pub fn with_status(error_status: i32) -> Self {
        Self {
            error_status,
            results: Vec::new(),
        }
    }
}
