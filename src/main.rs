//! Purpose: `redispatch` CLI entry point.
//! Role: Binary crate root; parses args, runs the redispatch hook, then the local command.
//! Invariants: The redispatch hook runs before every command.
//! Invariants: A redispatched command exits with the remote status, verbatim.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: This is the only place the process exits.
use std::ffi::OsString;
use std::io::{self, IsTerminal};

use clap::{
    ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing::debug;

mod command_dispatch;

use redispatch::annotations::{AnnotationSet, HANDLE_REMOTE_COMMANDS};
use redispatch::backend::SshBackend;
use redispatch::config::{BackendConfig, OVERRIDE_PREFIX, RuntimeConfig};
use redispatch::invocation::ParsedInvocation;
use redispatch::logging::init_tracing;
use redispatch::redispatch::{Outcome, RedispatchDecider};
use redispatch::{Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let args = normalize_args(std::env::args_os());
    let cli = match Cli::try_parse_from(args.iter().cloned()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing(cli.global.debug);
    let color_mode = cli.color;

    let command_index = command_index(&args);
    let runtime =
        RuntimeConfig::from_argv(args.iter().map(|arg| arg.to_string_lossy().into_owned()));

    run_command(cli.command, cli.global, command_index, runtime)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn run_command(
    command: Command,
    global: GlobalArgs,
    command_index: Option<usize>,
    runtime: RuntimeConfig,
) -> Result<RunOutcome, Error> {
    let backend_config = BackendConfig::from_env(&runtime)?;
    debug!(overrides = global.define.len(), "local config overrides");
    let invocation = parsed_invocation(&command, &global, command_index);
    let annotations = command_annotations(&command);
    let decider = RedispatchDecider::new(runtime, SshBackend::new(backend_config));

    match decider.initialize(&invocation, &annotations)? {
        Outcome::Redispatched(exit_code) => Ok(RunOutcome::with_code(exit_code)),
        Outcome::Local => command_dispatch::dispatch_command(command, &invocation, &decider),
    }
}

/// Joins a detached `-D key=value` into `-Dkey=value` so every override is one token.
/// Tokens from `--` on are positionals and pass through untouched.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut normalized = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg.to_str() == Some("--") {
            normalized.push(arg);
            normalized.extend(iter);
            break;
        }
        if arg.to_str() == Some(OVERRIDE_PREFIX) {
            if let Some(value) = iter.next() {
                let mut joined = OsString::from(OVERRIDE_PREFIX);
                joined.push(value);
                normalized.push(joined);
                continue;
            }
        }
        normalized.push(arg);
    }
    normalized
}

/// Position of the subcommand token in `args`.
///
/// Walks the global options using clap's own argument table, so an option
/// value that happens to equal the command name is skipped with its option.
fn command_index(args: &[OsString]) -> Option<usize> {
    let cli = Cli::command();
    let value_args: Vec<&clap::Arg> = cli
        .get_arguments()
        .filter(|arg| arg.get_action().takes_values())
        .collect();
    let long_values: Vec<&str> = value_args.iter().filter_map(|arg| arg.get_long()).collect();
    let short_values: Vec<char> = value_args.iter().filter_map(|arg| arg.get_short()).collect();

    let mut index = 1;
    while index < args.len() {
        let token = args[index].to_string_lossy();
        if token == "--" {
            return None;
        }
        if let Some(long) = token.strip_prefix("--") {
            if !long.contains('=') && long_values.contains(&long) {
                index += 1;
            }
        } else if let Some(shorts) = token.strip_prefix('-').filter(|rest| !rest.is_empty()) {
            // A value-taking short owns the rest of the token, or the next token when last.
            if let Some((pos, short)) = shorts
                .char_indices()
                .find(|(_, short)| short_values.contains(short))
            {
                if pos + short.len_utf8() == shorts.len() {
                    index += 1;
                }
            }
        } else {
            return Some(index);
        }
        index += 1;
    }
    None
}

fn parsed_invocation(
    command: &Command,
    global: &GlobalArgs,
    command_index: Option<usize>,
) -> ParsedInvocation {
    ParsedInvocation::new(command.name())
        .with_command_index(command_index)
        .with_args(command.positionals())
        .with_optional("remote-host", global.remote_host.clone())
        .with_optional("remote-user", global.remote_user.clone())
        .with_optional("root", global.root.clone())
        .with_optional("uri", global.uri.clone())
        .with_flag("debug", global.debug)
        .with_flag("no-interaction", global.no_interaction)
        .with_interactive(io::stdin().is_terminal() && !global.no_interaction)
}

fn command_annotations(command: &Command) -> AnnotationSet {
    match command {
        Command::Ssh { .. } | Command::Completion { .. } => {
            AnnotationSet::new().with(HANDLE_REMOTE_COMMANDS)
        }
        _ => AnnotationSet::new(),
    }
}

#[derive(Parser)]
#[command(
    name = "redispatch",
    version,
    about = "Run commands on the site they target, locally or over ssh",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Every command checks --remote-host first. When it is set, the same command
line (minus -D overrides) runs on that host over ssh and its exit status
becomes ours.
"#,
    after_help = r#"EXAMPLES
  $ redispatch status
  $ redispatch status --remote-host=web1 --remote-user=deploy --root=/var/www
  $ redispatch -Dbackend.simulate status --remote-host=web1   # print, don't run
  $ redispatch ssh --remote-host=web1 -- tail -f /var/log/app.log

CONFIG (-Dkey=value, local only)
  ssh.program          REDISPATCH_SSH           (default: ssh)
  ssh.options          REDISPATCH_SSH_OPTIONS   (default: -o PasswordAuthentication=no)
  backend.script       REDISPATCH_SCRIPT        (default: redispatch)
  backend.concurrency  REDISPATCH_CONCURRENCY   (default: 4)
  backend.simulate     REDISPATCH_SIMULATE      (default: off)"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Run the command on this host over ssh")]
    remote_host: Option<String>,
    #[arg(long, global = true, help = "User for --remote-host (default: ssh's choice)")]
    remote_user: Option<String>,
    #[arg(long, global = true, help = "Site root directory")]
    root: Option<String>,
    #[arg(long, global = true, help = "Site URI")]
    uri: Option<String>,
    #[arg(
        short = 'D',
        value_name = "KEY=VALUE",
        global = true,
        action = ArgAction::Append,
        help = "Set a config value for this process only (never forwarded)"
    )]
    define: Vec<String>,
    #[arg(short, long, global = true, help = "Show debug diagnostics on stderr")]
    debug: bool,
    #[arg(
        short = 'n',
        long,
        global = true,
        help = "Never prompt; remote commands run without a tty"
    )]
    no_interaction: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Show the local site as JSON")]
    Status,
    #[command(about = "Print arguments, space separated")]
    Echo {
        #[arg(help = "Words to print")]
        words: Vec<String>,
    },
    #[command(about = "Show effective backend config and -D overrides as JSON")]
    Config,
    #[command(about = "Print version")]
    Version,
    #[command(
        about = "Open a shell or run a command on --remote-host",
        after_help = r#"EXAMPLES
  $ redispatch ssh --remote-host=web1
  $ redispatch ssh --remote-host=web1 --root=/var/www -- ls -la

NOTES
  - Starts in --root when given
  - Runs locally; generic redispatch is skipped for this command"#
    )]
    Ssh {
        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            help = "Command to run (default: login shell)"
        )]
        command: Vec<String>,
        #[arg(long, help = "Request a tty even when a command is given")]
        tty: bool,
    },
    #[command(arg_required_else_help = true, about = "Generate shell completions")]
    Completion {
        #[arg(value_enum, help = "Target shell")]
        shell: Shell,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Echo { .. } => "echo",
            Command::Config => "config",
            Command::Version => "version",
            Command::Ssh { .. } => "ssh",
            Command::Completion { .. } => "completion",
        }
    }

    fn positionals(&self) -> Vec<String> {
        match self {
            Command::Echo { words } => words.clone(),
            Command::Ssh { command, .. } => command.clone(),
            Command::Completion { shell } => vec![shell.to_string()],
            Command::Status | Command::Config | Command::Version => Vec::new(),
        }
    }
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint("I/O error. Check the program path and permissions.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with --debug and share command/context if it persists.",
    )
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

impl AnsiColor {
    fn label(self, label: &str, enabled: bool) -> String {
        let code = match self {
            AnsiColor::Red => "31",
            AnsiColor::Yellow => "33",
        };
        if enabled {
            format!("\u{1b}[{code}m{label}\u{1b}[0m")
        } else {
            label.to_string()
        }
    }
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", err.kind()))
}

fn error_causes(err: &Error) -> Vec<String> {
    std::iter::successors(err.source(), |&cause| cause.source())
        .map(|cause| cause.to_string())
        .collect()
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }
    json!({ "error": inner })
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        AnsiColor::Red.label("error:", use_color),
        error_message(err)
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", AnsiColor::Yellow.label("hint:", use_color)));
    }
    for cause in error_causes(err) {
        lines.push(format!(
            "{} {cause}",
            AnsiColor::Yellow.label("caused by:", use_color)
        ));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.strip_prefix("error:").unwrap_or(line).trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    match rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim)
    {
        Some(usage) => format!("Usage: {usage}. Try `redispatch --help`."),
        None => "Try `redispatch --help`.".to_string(),
    }
}
