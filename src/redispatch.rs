//! Purpose: Decide whether a command runs here or on the remote site it targets.
//! Exports: `RedispatchDecider`, `Outcome`.
//! Role: Init hook run before every command; hands remote invocations to the backend.
//! Invariants: The hook either returns `Outcome::Local` or reports the backend's status verbatim.
//! Invariants: Exactly one token (the command name) is removed after the program path.
//! Invariants: `-D` override tokens never reach the remote side.
//! Invariants: The process is never exited here; `main` owns the exit.

use serde_json::{Map, Value};
use tracing::debug;

use crate::annotations::{AnnotationSet, HANDLE_REMOTE_COMMANDS};
use crate::backend::{BackendInvoker, BackendRequest};
use crate::config::{OVERRIDE_PREFIX, RuntimeConfig};
use crate::core::error::{Error, ErrorKind};
use crate::descriptor::{ExecutionFlags, InvocationDescriptor, RedispatchTarget, SiteTarget};
use crate::invocation::{OptionValue, ParsedInvocation};

/// Options that would be forwarded to the remote side if propagation were enabled.
const REDISPATCH_OPTION_LIST: [&str; 2] = ["root", "uri"];

/// Propagation is locked down: the arguments already carry what the user typed.
const PROPAGATE_OPTIONS: bool = false;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Continue with local execution.
    Local,
    /// The command ran elsewhere; exit with this status.
    Redispatched(i32),
}

impl Outcome {
    pub fn exit_code(self) -> Option<i32> {
        match self {
            Outcome::Local => None,
            Outcome::Redispatched(code) => Some(code),
        }
    }
}

pub struct RedispatchDecider<B> {
    runtime: RuntimeConfig,
    backend: B,
}

impl<B: BackendInvoker> RedispatchDecider<B> {
    pub fn new(runtime: RuntimeConfig, backend: B) -> Self {
        Self { runtime, backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    /// Init hook entry point.
    ///
    /// Commands annotated with `handle-remote-commands` always run locally, even
    /// when a remote host is given; they manage remote fan-out themselves.
    pub fn initialize(
        &self,
        invocation: &ParsedInvocation,
        annotations: &AnnotationSet,
    ) -> Result<Outcome, Error> {
        if Self::should_short_circuit(annotations) {
            return Ok(Outcome::Local);
        }
        self.redispatch_if_remote(invocation)
    }

    pub fn should_short_circuit(annotations: &AnnotationSet) -> bool {
        annotations.has(HANDLE_REMOTE_COMMANDS)
    }

    pub fn redispatch_if_remote(&self, invocation: &ParsedInvocation) -> Result<Outcome, Error> {
        match Self::detect_remote_target(invocation) {
            Some(target) => self.redispatch(invocation, &target),
            None => Ok(Outcome::Local),
        }
    }

    pub fn detect_remote_target(invocation: &ParsedInvocation) -> Option<RedispatchTarget> {
        let host = invocation
            .option_str("remote-host")
            .filter(|host| !host.is_empty())?;
        Some(RedispatchTarget {
            host: host.to_string(),
            user: invocation.option_str("remote-user").map(str::to_string),
        })
    }

    /// Runs `invocation` on `target` as a one-element batch and reports the
    /// backend's `error_status` as the outcome.
    pub fn redispatch(
        &self,
        invocation: &ParsedInvocation,
        target: &RedispatchTarget,
    ) -> Result<Outcome, Error> {
        let descriptor = self.build_descriptor(invocation, target)?;
        debug!(command = %descriptor.command, "redispatch hook");

        let result = self
            .backend
            .invoke_concurrent(BackendRequest::single(descriptor))?;

        debug!(status = result.error_status, "redispatch hook exit early");
        Ok(Outcome::Redispatched(result.error_status))
    }

    pub fn build_descriptor(
        &self,
        invocation: &ParsedInvocation,
        target: &RedispatchTarget,
    ) -> Result<InvocationDescriptor, Error> {
        let (command, args) = split_command(
            self.runtime.argv(),
            invocation.command_index(),
            invocation.command(),
        )?;
        let interactive = invocation.is_interactive();
        Ok(InvocationDescriptor {
            command,
            args: alter_args_for_redispatch(args),
            options: redispatch_options(invocation),
            target: SiteTarget {
                remote_host: Some(target.host.clone()),
                remote_user: target.user.clone(),
                root: invocation.root().map(str::to_string),
                uri: invocation.uri().map(str::to_string),
            },
            flags: ExecutionFlags {
                integrate: true,
                backend: false,
                tty: interactive,
                interactive,
            },
        })
    }
}

/// Drops the program path and the command token from the raw argv.
///
/// The command sits at `index` as recorded by the parser; without one it is
/// the second token. The token there must match the parsed command name.
fn split_command(
    argv: &[String],
    index: Option<usize>,
    parsed: Option<&str>,
) -> Result<(String, Vec<String>), Error> {
    if argv.len() < 2 {
        return Err(mismatch(format!(
            "redispatch needs a program path and a command name, got {} token(s)",
            argv.len()
        )));
    }

    let index = index.unwrap_or(1);
    if index == 0 || index >= argv.len() {
        return Err(mismatch(format!(
            "command position {index} is outside the {} raw token(s)",
            argv.len()
        )));
    }
    if let Some(name) = parsed {
        if argv[index] != name {
            return Err(mismatch(format!(
                "raw token `{}` at position {index} is not the command `{name}`",
                argv[index]
            )));
        }
    }

    let mut args = argv[1..].to_vec();
    let command = args.remove(index - 1);
    Ok((command, args))
}

fn mismatch(message: String) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message(message)
        .with_hint("The raw argument vector does not match the parsed invocation.")
}

/// Removes tokens that only matter to the local process (`-D` overrides).
/// Everything from `--` on is positional and kept as is.
pub fn alter_args_for_redispatch(args: Vec<String>) -> Vec<String> {
    let mut positional = false;
    args.into_iter()
        .filter(|arg| {
            positional |= arg == "--";
            positional || !arg.starts_with(OVERRIDE_PREFIX)
        })
        .collect()
}

fn redispatch_options(invocation: &ParsedInvocation) -> Map<String, Value> {
    let mut result = Map::new();
    if !PROPAGATE_OPTIONS {
        return result;
    }
    for option in REDISPATCH_OPTION_LIST {
        match invocation.option(option) {
            Some(OptionValue::Flag(true)) => {
                result.insert(option.to_string(), Value::Bool(true));
            }
            Some(OptionValue::Text(value)) if !value.is_empty() => {
                result.insert(option.to_string(), Value::String(value.clone()));
            }
            _ => {}
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::{Outcome, RedispatchDecider, alter_args_for_redispatch, split_command};
    use crate::annotations::{AnnotationSet, HANDLE_REMOTE_COMMANDS};
    use crate::backend::{BackendInvoker, BackendRequest, BackendResult};
    use crate::config::RuntimeConfig;
    use crate::core::error::{Error, ErrorKind};
    use crate::descriptor::RedispatchTarget;
    use crate::invocation::ParsedInvocation;
    use serde_json::json;
    use std::cell::RefCell;

    struct RecordingBackend {
        status: i32,
        requests: RefCell<Vec<BackendRequest>>,
    }

    impl RecordingBackend {
        fn returning(status: i32) -> Self {
            Self {
                status,
                requests: RefCell::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<BackendRequest> {
            self.requests.borrow().clone()
        }
    }

    impl BackendInvoker for RecordingBackend {
        fn invoke_concurrent(&self, request: BackendRequest) -> Result<BackendResult, Error> {
            self.requests.borrow_mut().push(request);
            Ok(BackendResult::with_status(self.status))
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn decider(argv: &[&str], status: i32) -> RedispatchDecider<RecordingBackend> {
        RedispatchDecider::new(
            RuntimeConfig::from_argv(argv.iter().copied()),
            RecordingBackend::returning(status),
        )
    }

    fn remote_invocation(interactive: bool) -> ParsedInvocation {
        ParsedInvocation::new("status")
            .with_option("remote-host", "h1")
            .with_option("remote-user", "u1")
            .with_option("root", "/r")
            .with_option("uri", "http://x")
            .with_interactive(interactive)
    }

    const REMOTE_ARGV: [&str; 6] = [
        "redispatch",
        "status",
        "--remote-host=h1",
        "--remote-user=u1",
        "--root=/r",
        "--uri=http://x",
    ];

    #[test]
    fn annotation_short_circuits_even_with_remote_host() {
        let annotations = AnnotationSet::new().with(HANDLE_REMOTE_COMMANDS);
        assert!(RedispatchDecider::<RecordingBackend>::should_short_circuit(
            &annotations
        ));

        let decider = decider(&REMOTE_ARGV, 0);
        let outcome = decider
            .initialize(&remote_invocation(false), &annotations)
            .expect("initialize");
        assert_eq!(outcome, Outcome::Local);
        assert!(decider.backend().requests().is_empty());
    }

    #[test]
    fn missing_or_empty_host_means_local() {
        type Decider = RedispatchDecider<RecordingBackend>;
        let absent = ParsedInvocation::new("status").with_option("remote-user", "u1");
        assert_eq!(Decider::detect_remote_target(&absent), None);

        let empty = ParsedInvocation::new("status").with_option("remote-host", "");
        assert_eq!(Decider::detect_remote_target(&empty), None);

        let decider = decider(&["redispatch", "status"], 0);
        let outcome = decider
            .initialize(&empty, &AnnotationSet::new())
            .expect("initialize");
        assert_eq!(outcome, Outcome::Local);
        assert!(decider.backend().requests().is_empty());
    }

    #[test]
    fn target_carries_host_and_user_verbatim() {
        type Decider = RedispatchDecider<RecordingBackend>;
        let with_user = ParsedInvocation::new("status")
            .with_option("remote-host", "h1")
            .with_option("remote-user", "u1");
        assert_eq!(
            Decider::detect_remote_target(&with_user),
            Some(RedispatchTarget {
                host: "h1".to_string(),
                user: Some("u1".to_string()),
            })
        );

        let anonymous = ParsedInvocation::new("status").with_option("remote-host", "h1");
        assert_eq!(
            Decider::detect_remote_target(&anonymous).and_then(|target| target.user),
            None
        );
    }

    #[test]
    fn filter_is_idempotent_and_order_preserving() {
        let args = strings(&["-Da=1", "b", "--c", "-D", "d", "-Dx", "e"]);
        let once = alter_args_for_redispatch(args);
        assert_eq!(once, strings(&["b", "--c", "d", "e"]));
        assert_eq!(alter_args_for_redispatch(once.clone()), once);
    }

    #[test]
    fn filter_keeps_positionals_after_separator() {
        let args = strings(&["-Da=1", "x", "--", "-D", "y", "-Db=2"]);
        let once = alter_args_for_redispatch(args);
        assert_eq!(once, strings(&["x", "--", "-D", "y", "-Db=2"]));
        assert_eq!(alter_args_for_redispatch(once.clone()), once);
    }

    #[test]
    fn descriptor_drops_overrides_and_keeps_order() {
        let decider = decider(
            &[
                "drush",
                "status",
                "--remote-host=example.com",
                "-Dfoo=bar",
                "extra",
            ],
            0,
        );
        let invocation = ParsedInvocation::new("status").with_option("remote-host", "example.com");
        let target = RedispatchDecider::<RecordingBackend>::detect_remote_target(&invocation)
            .expect("target");
        let descriptor = decider
            .build_descriptor(&invocation, &target)
            .expect("descriptor");
        assert_eq!(descriptor.command, "status");
        assert_eq!(
            descriptor.args,
            strings(&["--remote-host=example.com", "extra"])
        );
        assert!(descriptor.options.is_empty());
    }

    #[test]
    fn anonymous_target_has_null_user() {
        let decider = decider(&["redispatch", "status"], 0);
        let target = RedispatchTarget {
            host: "h".to_string(),
            user: None,
        };
        let descriptor = decider
            .build_descriptor(&ParsedInvocation::new("status"), &target)
            .expect("descriptor");
        let value = serde_json::to_value(&descriptor.target).expect("json");
        assert_eq!(value["remote-host"], json!("h"));
        assert_eq!(value["remote-user"], json!(null));
    }

    #[test]
    fn root_and_uri_are_never_propagated_as_options() {
        let decider = decider(&REMOTE_ARGV, 0);
        let invocation = remote_invocation(false).with_flag("verbose", true);
        let target = RedispatchTarget {
            host: "h1".to_string(),
            user: None,
        };
        let descriptor = decider
            .build_descriptor(&invocation, &target)
            .expect("descriptor");
        assert!(descriptor.options.is_empty());
        assert_eq!(descriptor.target.root.as_deref(), Some("/r"));
        assert_eq!(descriptor.target.uri.as_deref(), Some("http://x"));
    }

    #[test]
    fn end_to_end_non_interactive() {
        let decider = decider(&REMOTE_ARGV, 0);
        let outcome = decider
            .initialize(&remote_invocation(false), &AnnotationSet::new())
            .expect("initialize");
        assert_eq!(outcome, Outcome::Redispatched(0));

        let requests = decider.backend().requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.invocations.len(), 1);
        assert_eq!(request.invocations[0].command.as_deref(), Some("status"));
        assert_eq!(
            serde_json::to_value(&request.default_site).expect("json"),
            json!({
                "remote-host": "h1",
                "remote-user": "u1",
                "root": "/r",
                "uri": "http://x",
            })
        );
        assert!(!request.backend_options.tty);
        assert!(!request.backend_options.interactive);
        let options = serde_json::to_value(&request.backend_options).expect("json");
        assert!(options.get("#tty").is_none());
        assert!(options.get("interactive").is_none());
        assert_eq!(options["integrate"], json!(true));
        assert_eq!(options["backend"], json!(false));
    }

    #[test]
    fn end_to_end_interactive_sets_tty() {
        let decider = decider(&REMOTE_ARGV, 0);
        decider
            .initialize(&remote_invocation(true), &AnnotationSet::new())
            .expect("initialize");
        let requests = decider.backend().requests();
        let options = serde_json::to_value(&requests[0].backend_options).expect("json");
        assert_eq!(options["#tty"], json!(true));
        assert_eq!(options["interactive"], json!(true));
    }

    #[test]
    fn backend_status_passes_through() {
        for status in [0, 17] {
            let decider = decider(&REMOTE_ARGV, status);
            let outcome = decider
                .initialize(&remote_invocation(false), &AnnotationSet::new())
                .expect("initialize");
            assert_eq!(outcome, Outcome::Redispatched(status));
            assert_eq!(outcome.exit_code(), Some(status));
        }
        assert_eq!(Outcome::Local.exit_code(), None);
    }

    #[test]
    fn short_argv_is_internal_error() {
        for argv in [&[][..], &["redispatch"][..]] {
            let decider = decider(argv, 0);
            let err = decider
                .initialize(&remote_invocation(false), &AnnotationSet::new())
                .expect_err("short argv");
            assert_eq!(err.kind(), ErrorKind::Internal);
            assert!(decider.backend().requests().is_empty());
        }
    }

    #[test]
    fn command_index_picks_the_parsed_token() {
        let argv = strings(&[
            "redispatch",
            "--root",
            "echo",
            "--uri",
            "x",
            "echo",
            "hi",
            "--remote-host=h1",
        ]);
        let (command, args) = split_command(&argv, Some(5), Some("echo")).expect("split");
        assert_eq!(command, "echo");
        assert_eq!(
            args,
            strings(&["--root", "echo", "--uri", "x", "hi", "--remote-host=h1"])
        );

        let decider = decider(&argv.iter().map(String::as_str).collect::<Vec<_>>(), 0);
        let invocation = ParsedInvocation::new("echo")
            .with_command_index(Some(5))
            .with_option("remote-host", "h1")
            .with_option("root", "echo")
            .with_option("uri", "x");
        let target = RedispatchTarget {
            host: "h1".to_string(),
            user: None,
        };
        let descriptor = decider
            .build_descriptor(&invocation, &target)
            .expect("descriptor");
        assert_eq!(descriptor.command, "echo");
        assert_eq!(descriptor.args[..4], strings(&["--root", "echo", "--uri", "x"])[..]);
    }

    #[test]
    fn command_index_must_match_parsed_name() {
        let argv = strings(&["redispatch", "--root", "echo", "echo"]);
        for index in [Some(0), Some(4), Some(1)] {
            let err = split_command(&argv, index, Some("echo")).expect_err("mismatch");
            assert_eq!(err.kind(), ErrorKind::Internal);
        }
        let (command, args) = split_command(&argv, None, None).expect("second token");
        assert_eq!(command, "--root");
        assert_eq!(args, strings(&["echo", "echo"]));
    }
}
