//! Purpose: `BackendInvoker` that runs invocations over ssh (or locally).
//! Exports: `SshBackend`.
//! Role: Turns a `BackendRequest` into child processes and collects their statuses.
//! Invariants: Target-selection options are stripped so the remote side never redispatches.
//! Invariants: Batches run on scoped threads, at most `concurrency` at a time.
//! Invariants: Simulate mode prints command lines to stderr and spawns nothing.
//! Invariants: Children share our stdio; only integrated requests are accepted.

use std::io;
use std::process::{Command, ExitStatus};
use std::thread;

use serde_json::Value;
use tracing::debug;

use super::{BackendInvoker, BackendRequest, BackendResult, Invocation, InvocationOutput};
use crate::config::BackendConfig;
use crate::core::error::{Error, ErrorKind};
use crate::descriptor::SiteTarget;

/// Options that select the target; they are consumed locally.
const TARGET_OPTIONS: [&str; 2] = ["--remote-host", "--remote-user"];

#[derive(Clone, Debug)]
pub struct SshBackend {
    config: BackendConfig,
}

impl SshBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Full argv (program first) that would run `invocation`.
    pub fn command_line(
        &self,
        request: &BackendRequest,
        invocation: &Invocation,
    ) -> Result<Vec<String>, Error> {
        let words = self.remote_words(request, invocation)?;
        let site = request.site();
        let Some(destination) = site.ssh_destination() else {
            return Ok(words);
        };

        let borrowed: Vec<&str> = words.iter().map(String::as_str).collect();
        let remote = quote_words(&borrowed)?;

        let mut argv = Vec::with_capacity(self.config.ssh_options.len() + 4);
        argv.push(self.config.ssh_program.clone());
        argv.extend(self.config.ssh_options.iter().cloned());
        if request.backend_options.tty {
            argv.push("-t".to_string());
        }
        argv.push(destination);
        argv.push(remote);
        Ok(argv)
    }

    /// Argv for an ssh session on `site`, starting in its root when one is set.
    /// An empty `command` opens a login shell and always requests a tty.
    pub fn shell_command_line(
        &self,
        site: &SiteTarget,
        command: &[String],
        tty: bool,
    ) -> Result<Vec<String>, Error> {
        let destination = site.ssh_destination().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("no remote host for ssh")
                .with_hint("Pass --remote-host=<host> (and optionally --remote-user).")
        })?;

        let mut remote = String::new();
        if let Some(root) = site.root.as_deref().filter(|root| !root.is_empty()) {
            remote.push_str("cd ");
            remote.push_str(&quote_words(&[root])?);
            remote.push_str(" && ");
        }
        if command.is_empty() {
            remote.push_str("exec \"$SHELL\" -l");
        } else {
            let words: Vec<&str> = command.iter().map(String::as_str).collect();
            remote.push_str(&quote_words(&words)?);
        }

        let mut argv = vec![self.config.ssh_program.clone()];
        argv.extend(self.config.ssh_options.iter().cloned());
        if tty || command.is_empty() {
            argv.push("-t".to_string());
        }
        argv.push(destination);
        argv.push(remote);
        Ok(argv)
    }

    /// Runs an ssh session with inherited stdio and returns its exit code.
    pub fn run_shell(&self, site: &SiteTarget, command: &[String], tty: bool) -> Result<i32, Error> {
        let argv = self.shell_command_line(site, command, tty)?;
        Ok(self.run(&argv)?.exit_code)
    }

    fn remote_words(
        &self,
        request: &BackendRequest,
        invocation: &Invocation,
    ) -> Result<Vec<String>, Error> {
        let command = invocation
            .command
            .clone()
            .or_else(|| request.default_command.clone())
            .filter(|command| !command.is_empty())
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("invocation has no command")
                    .with_hint("Provide a command per invocation or a default command.")
            })?;
        let args = strip_target_options(&invocation.args);

        let mut words = vec![
            request
                .backend_options
                .script
                .clone()
                .unwrap_or_else(|| self.config.script.clone()),
        ];
        words.extend(request.backend_options.additional_global_options.iter().cloned());

        let site = request.site();
        if let Some(root) = site.root.filter(|root| !root.is_empty()) {
            if !has_option(&args, "--root") {
                words.push(format!("--root={root}"));
            }
        }
        if let Some(uri) = site.uri.filter(|uri| !uri.is_empty()) {
            if !has_option(&args, "--uri") {
                words.push(format!("--uri={uri}"));
            }
        }
        for (name, value) in &request.options {
            match value {
                Value::Bool(true) => words.push(format!("--{name}")),
                Value::Bool(false) | Value::Null => {}
                Value::String(text) => words.push(format!("--{name}={text}")),
                other => words.push(format!("--{name}={other}")),
            }
        }

        words.push(command);
        words.extend(args);
        Ok(words)
    }

    fn run(&self, argv: &[String]) -> Result<InvocationOutput, Error> {
        let line = shlex::try_join(argv.iter().map(String::as_str))
            .unwrap_or_else(|_| argv.join(" "));
        if self.config.simulate {
            eprintln!("simulate: {line}");
            return Ok(InvocationOutput {
                command: line,
                exit_code: 0,
            });
        }

        let (program, rest) = argv.split_first().ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("empty backend command line")
        })?;
        debug!(command = %line, "backend invoke");

        let status = Command::new(program)
            .args(rest)
            .status()
            .map_err(|err| spawn_error(program, err))?;
        Ok(InvocationOutput {
            command: line,
            exit_code: exit_code(status),
        })
    }
}

impl BackendInvoker for SshBackend {
    fn invoke_concurrent(&self, request: BackendRequest) -> Result<BackendResult, Error> {
        if request.invocations.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("backend request has no invocations")
                .with_hint("Submit at least one invocation."));
        }
        if !request.backend_options.integrate {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("output capture is not supported by the ssh backend")
                .with_hint("Set integrate so child output streams to this process."));
        }

        let command_lines = request
            .invocations
            .iter()
            .map(|invocation| self.command_line(&request, invocation))
            .collect::<Result<Vec<_>, _>>()?;

        if let [argv] = command_lines.as_slice() {
            return Ok(BackendResult::from_outputs(vec![self.run(argv)?]));
        }

        let mut outputs = Vec::with_capacity(command_lines.len());
        for batch in command_lines.chunks(self.config.concurrency.max(1)) {
            let joined = thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|argv| scope.spawn(move || self.run(argv)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join())
                    .collect::<Vec<_>>()
            });
            for result in joined {
                let output = result.map_err(|_| {
                    Error::new(ErrorKind::Internal).with_message("backend worker panicked")
                })??;
                outputs.push(output);
            }
        }
        Ok(BackendResult::from_outputs(outputs))
    }
}

fn strip_target_options(args: &[String]) -> Vec<String> {
    let mut kept = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--" {
            kept.push(arg.clone());
            kept.extend(iter.by_ref().cloned());
            break;
        }
        if TARGET_OPTIONS.contains(&arg.as_str()) {
            iter.next();
            continue;
        }
        let inline = TARGET_OPTIONS.iter().any(|name| {
            arg.strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('='))
        });
        if !inline {
            kept.push(arg.clone());
        }
    }
    kept
}

fn quote_words(words: &[&str]) -> Result<String, Error> {
    shlex::try_join(words.iter().copied()).map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("argument cannot be quoted for the remote shell")
            .with_hint("Remove NUL bytes from the command arguments.")
    })
}

fn has_option(args: &[String], name: &str) -> bool {
    args.iter()
        .take_while(|arg| arg.as_str() != "--")
        .any(|arg| {
            arg == name
                || arg
                    .strip_prefix(name)
                    .is_some_and(|rest| rest.starts_with('='))
        })
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn spawn_error(program: &str, err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(format!("failed to run `{program}`"))
        .with_hint("Check that the program exists, or set -Dssh.program / REDISPATCH_SSH.")
        .with_source(err)
}
