//! Purpose: `exthub` CLI entry point.
//! Role: Binary crate root; parses args, bootstraps logging, runs commands, prints result messages.
//! Invariants: Each successful statement prints exactly one result message on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Logs go to stderr so stdout carries only results.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{
    CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use exthub::api::{
    DEFAULT_EXTENSION_REPO, Error, ErrorKind, ExtensionManager, ExtensionStatus,
    default_extension_home, to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

fn main() {
    init_tracing();
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
    let cli = match Cli::try_parse() {
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
                return Ok(RunOutcome { exit_code });
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

    let home = cli.dir.unwrap_or_else(default_extension_home);
    let manager = ExtensionManager::with_home(&home).with_default_repo(cli.repo);
    let color_mode = cli.color;

    command_dispatch::dispatch_command(cli.command, &manager)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "exthub",
    version,
    about = "Install and load engine extensions",
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
    before_help = r#"Extensions are optional modules. Some are compiled into the engine (static);
the rest are installed from a repository and loaded on demand.

Mental model:
  - `install` stages an extension from a repository (once)
  - `update` re-fetches it unconditionally
  - `load` activates it in the running process
"#,
    after_help = r#"EXAMPLES
  $ exthub install httpfs
  $ exthub install httpfs --from https://example.org/ext
  $ exthub update httpfs
  $ exthub load httpfs
  $ exthub exec "INSTALL fts; LOAD fts"

LEARN MORE
  $ exthub <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "EXTHUB_HOME",
        help = "Extension home directory (default: ~/.exthub/extensions)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "EXTHUB_REPO",
        default_value = DEFAULT_EXTENSION_REPO,
        help = "Default repository for install/update (URL or directory)"
    )]
    repo: String,
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
    #[command(
        arg_required_else_help = true,
        about = "Install an extension from a repository",
        long_about = r#"Install an extension from a repository.

Statically linked extensions are never fetched. An extension that is already
installed is left untouched unless --force is given."#,
        after_help = r#"EXAMPLES
  $ exthub install httpfs
  $ exthub install httpfs --from https://example.org/ext
  $ exthub install fts --from ./local-repo --force"#
    )]
    Install {
        #[arg(help = "Extension name")]
        name: String,
        #[arg(long = "from", help = "Repository URL or directory (default: --repo)")]
        from: Option<String>,
        #[arg(long, help = "Re-fetch even if already installed")]
        force: bool,
        #[arg(long, help = "Emit the result message as JSON")]
        json: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Re-install an extension unconditionally (same as install --force)"
    )]
    Update {
        #[arg(help = "Extension name")]
        name: String,
        #[arg(long = "from", help = "Repository URL or directory (default: --repo)")]
        from: Option<String>,
        #[arg(long, help = "Emit the result message as JSON")]
        json: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Load an extension into this process",
        long_about = r#"Load an extension by official name, library path, or http(s) URL.

Official names resolve to the installed artifact. Loading is idempotent."#
    )]
    Load {
        #[arg(help = "Extension name, library path, or URL", value_hint = ValueHint::AnyPath)]
        path: String,
        #[arg(long, help = "Emit the result message as JSON")]
        json: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Remove an installed extension"
    )]
    Uninstall {
        #[arg(help = "Extension name")]
        name: String,
        #[arg(long, help = "Emit the result message as JSON")]
        json: bool,
    },
    #[command(about = "List known extensions and their state")]
    List {
        #[arg(long, help = "Emit JSON even on a terminal")]
        json: bool,
    },
    #[command(
        about = "Run extension statements (INSTALL, UPDATE, LOAD, UNINSTALL)",
        long_about = r#"Run extension statements separated by `;`.

Reads the script from stdin when no argument is given. Stops at the first error."#,
        after_help = r#"EXAMPLES
  $ exthub exec "INSTALL httpfs FROM 'https://example.org/ext'"
  $ exthub exec "INSTALL fts FORCE; LOAD fts"
  $ echo "LOAD EXTENSION '/opt/ext/libgeo.so'" | exthub exec"#
    )]
    Exec {
        #[arg(help = "Statement script")]
        script: Option<String>,
        #[arg(long, help = "Emit result messages as JSON lines")]
        json: bool,
    },
    #[command(about = "Print version info")]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completion scripts"
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn read_script(script: Option<String>) -> Result<String, Error> {
    if let Some(script) = script {
        return Ok(script);
    }
    if io::stdin().is_terminal() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("exec requires a script argument or stdin")
            .with_hint("Use `exthub exec \"INSTALL httpfs\"` or pipe statements on stdin."));
    }
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read stdin")
            .with_source(err)
    })?;
    Ok(input)
}

fn emit_result(message: &str, json: bool) {
    if json {
        emit_json(json!({ "message": message }));
    } else {
        println!("{message}");
    }
}

fn status_json(status: &ExtensionStatus) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), json!(status.name));
    map.insert("official".to_string(), json!(status.official));
    map.insert("state".to_string(), json!(status.resolution.as_str()));
    map.insert("loaded".to_string(), json!(status.loaded));
    Value::Object(map)
}

fn emit_list(statuses: &[ExtensionStatus], json: bool) {
    if json || !io::stdout().is_terminal() {
        let values = statuses.iter().map(status_json).collect::<Vec<_>>();
        emit_json(json!({ "extensions": values }));
        return;
    }
    let width = statuses
        .iter()
        .map(|status| status.name.len())
        .max()
        .unwrap_or(4)
        .max(4);
    println!("{:<width$}  {:<13}  LOADED", "NAME", "STATE");
    for status in statuses {
        println!(
            "{:<width$}  {:<13}  {}",
            status.name,
            status.resolution.as_str(),
            if status.loaded { "yes" } else { "no" }
        );
    }
}

fn emit_version_output(manager: &ExtensionManager) {
    if io::stdout().is_terminal() {
        println!(
            "exthub {} ({}, repo: {})",
            env!("CARGO_PKG_VERSION"),
            exthub::api::platform(),
            manager.default_repo()
        );
    } else {
        emit_json(json!({
            "name": "exthub",
            "version": env!("CARGO_PKG_VERSION"),
            "platform": exthub::api::platform(),
            "repo": manager.default_repo(),
            "home": manager.registry().home().display().to_string(),
        }));
    }
}

/// Pretty on a terminal, one line per document when piped.
fn render_json(value: &Value, pretty: bool) -> String {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
}

fn emit_json(value: Value) {
    println!("{}", render_json(&value, io::stdout().is_terminal()));
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
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
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Incompatible => "incompatible extension".to_string(),
        ErrorKind::Network => "network error".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(extension) = err.extension() {
        inner.insert("extension".to_string(), json!(extension));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(extension) = err.extension() {
        lines.push(format!(
            "{} {extension}",
            colorize_label("extension:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check directory permissions or use --dir to a writable location.",
        ),
        ErrorKind::Busy => err.with_hint("Extension is in use. Retry once it is released."),
        ErrorKind::Network => {
            err.with_hint("Repository unreachable. Check the URL, network, or use --from <dir>.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

/// Points at the subcommand's help when clap names one in its usage line.
fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let subcommand = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: exthub "))
        .and_then(|rest| rest.split_whitespace().next())
        .filter(|token| !token.starts_with(['-', '<', '[']));
    match subcommand {
        Some(name) => format!("Try `exthub {name} --help`."),
        None => "Try `exthub --help`.".to_string(),
    }
}
