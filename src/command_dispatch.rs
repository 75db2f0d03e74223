//! Purpose: Hold local command execution for `redispatch`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and the redispatch hook.
//! Invariants: Only reached when the hook returned `Outcome::Local`.
//! Invariants: JSON goes to stdout; diagnostics go to stderr.

use super::*;

use redispatch::descriptor::SiteTarget;

pub(super) fn dispatch_command(
    command: Command,
    invocation: &ParsedInvocation,
    decider: &RedispatchDecider<SshBackend>,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Status => {
            let root = match invocation.root() {
                Some(root) => root.to_string(),
                None => std::env::current_dir()
                    .map_err(|err| {
                        Error::new(ErrorKind::Io)
                            .with_message("failed to read current directory")
                            .with_source(err)
                    })?
                    .display()
                    .to_string(),
            };
            emit_json(json!({
                "status": {
                    "root": root,
                    "uri": invocation.uri(),
                    "interactive": invocation.is_interactive(),
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }));
            Ok(RunOutcome::ok())
        }
        Command::Echo { words } => {
            println!("{}", words.join(" "));
            Ok(RunOutcome::ok())
        }
        Command::Config => {
            let config = decider.backend().config();
            emit_json(json!({
                "config": {
                    "ssh.program": config.ssh_program,
                    "ssh.options": config.ssh_options,
                    "backend.script": config.script,
                    "backend.concurrency": config.concurrency,
                    "backend.simulate": config.simulate,
                },
                "overrides": decider.runtime().overrides(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            println!("redispatch {}", env!("CARGO_PKG_VERSION"));
            Ok(RunOutcome::ok())
        }
        Command::Ssh { command, tty } => {
            let site = SiteTarget {
                remote_host: invocation.option_str("remote-host").map(str::to_string),
                remote_user: invocation.option_str("remote-user").map(str::to_string),
                root: invocation.root().map(str::to_string),
                uri: invocation.uri().map(str::to_string),
            };
            let exit_code = decider.backend().run_shell(&site, &command, tty)?;
            Ok(RunOutcome::with_code(exit_code))
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "redispatch", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
    }
}
