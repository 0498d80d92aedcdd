//! Purpose: `lpy` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: `send` prints exactly one protocol `Response` as JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`; `quit` exits 0.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};

mod command_dispatch;
mod serve;

use lpy::api::{Error, ErrorKind, to_exit_code};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 7330;
const DEFAULT_MAX_BODY_BYTES: &str = "8M";
const DEFAULT_URL: &str = "http://127.0.0.1:7330";
/// Exit code of `send` when the server answered with `type=error`.
const RESPONSE_ERROR_EXIT_CODE: i32 = 1;

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
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint(clap_error_hint(&err)),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "lpy",
    version,
    about = "Live execution server with an in-memory module registry",
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
    before_help = r#"Push module source into a running process and execute code in its namespaces.

Mental model:
  - `serve` hosts the namespaces and answers POST /execute
  - `send` posts one message (eval, exec, status, quit) and prints the response
"#,
    after_help = r#"EXAMPLES
  $ lpy serve --register util=./util.lpy
  $ lpy send --type exec --module app --create-method create --code 'from util import *'
  $ lpy send --type eval --module app --code 'greeting + "!"'
  $ lpy send --type quit

LEARN MORE
  $ lpy <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and pretty JSON output: auto|always|never"
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
        about = "Run the execution server",
        long_about = r#"Run the HTTP execution server.

Requests are JSON messages posted to /execute. Modules resolve from --module-path
directories first, then from the in-memory registry (--register, register_module)."#,
        after_help = r#"EXAMPLES
  $ lpy serve
  $ lpy serve --port 7331 --module-path ./lib
  $ lpy serve --register app.util=./util.lpy --register pkg.__init__=./pkg.lpy

NOTES
  - Non-loopback binds require --allow-non-loopback; requests are not authenticated
  - A `quit` message stops the server and exits with status 0"#
    )]
    Serve(ServeArgs),
    #[command(
        about = "Send one message to a running server",
        long_about = r#"Build a protocol message from flags, post it, and print the response JSON."#,
        after_help = r#"EXAMPLES
  $ lpy send --type status
  $ lpy send --type eval --code '1 + 1'
  $ lpy send --type exec --module scratch --create-method import_or_create --code-file cell.lpy
  $ cat cell.lpy | lpy send --type exec --code-file -

NOTES
  - Exit status is 1 when the response has type=error
  - --raw prints captured stdout/stderr and the result instead of the JSON envelope"#
    )]
    Send(SendArgs),
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        long_about = r#"Generate shell completion scripts for lpy."#,
        after_help = r#"EXAMPLES
  $ lpy completion bash > ~/.local/share/bash-completion/completions/lpy
  $ lpy completion zsh > ~/.zfunc/_lpy
  $ lpy completion fish > ~/.config/fish/completions/lpy.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(
        long,
        env = "LPY_HOST",
        default_value = DEFAULT_HOST,
        help = "Bind host",
        help_heading = "Connection"
    )]
    host: String,
    #[arg(
        long,
        env = "LPY_PORT",
        default_value_t = DEFAULT_PORT,
        help = "Bind port",
        help_heading = "Connection"
    )]
    port: u16,
    #[arg(
        long = "module-path",
        value_name = "DIR",
        value_hint = ValueHint::DirPath,
        help = "Directory searched for NAME.lpy and NAME/__init__.lpy (repeatable)",
        help_heading = "Modules"
    )]
    module_path: Vec<PathBuf>,
    #[arg(
        long,
        value_name = "NAME=PATH",
        help = "Register a module from a file at startup (repeatable)",
        help_heading = "Modules"
    )]
    register: Vec<String>,
    #[arg(
        long,
        env = "LPY_ALLOW_NON_LOOPBACK",
        help = "Allow non-loopback binds (requests are unauthenticated)",
        help_heading = "Safety"
    )]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value = DEFAULT_MAX_BODY_BYTES,
        help = "Max request body size (bytes or K/M/G)",
        help_heading = "Safety"
    )]
    max_body_bytes: String,
}

#[derive(Args)]
struct SendArgs {
    #[arg(
        long = "type",
        default_value = "exec",
        help = "Message type: eval|exec|status|quit"
    )]
    kind: String,
    #[arg(long, help = "Code to evaluate or execute", conflicts_with = "code_file")]
    code: Option<String>,
    #[arg(
        long = "code-file",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        help = "Read code from a file (`-` for stdin)"
    )]
    code_file: Option<String>,
    #[arg(long, help = "Target module (default: global namespace)")]
    module: Option<String>,
    #[arg(
        long = "create-method",
        value_name = "METHOD",
        help = "How a missing module is created: create|import|import_or_create"
    )]
    create_method: Option<String>,
    #[arg(long, env = "LPY_URL", default_value = DEFAULT_URL, help = "Server URL")]
    url: String,
    #[arg(long, help = "Print captured output and result instead of JSON")]
    raw: bool,
}

fn resolve_bind(host: &str, port: u16) -> Result<SocketAddr, Error> {
    let invalid = || {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid bind host: {host}"))
            .with_hint("Use an IP address or resolvable host name, e.g. 127.0.0.1.")
    };
    let mut addrs = (host, port).to_socket_addrs().map_err(|err| invalid().with_source(err))?;
    addrs.next().ok_or_else(invalid)
}

fn parse_registration(input: &str) -> Result<serve::Registration, Error> {
    let Some((name, path)) = input.split_once('=') else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid --register value: {input}"))
            .with_hint("Use NAME=PATH, e.g. --register app.util=./util.lpy."));
    };
    let name = name.trim();
    if name.is_empty() || path.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid --register value: {input}"))
            .with_hint("Both NAME and PATH must be non-empty."));
    }
    Ok(serve::Registration {
        name: name.to_string(),
        path: PathBuf::from(path),
    })
}

fn parse_size(input: &str) -> Result<u64, Error> {
    let trimmed = input.trim();
    let split = trimmed
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(idx, _)| idx)
        .unwrap_or(trimmed.len());
    let digits = trimmed[..split].trim();
    let suffix = trimmed[split..].trim();

    let value: u64 = digits.parse().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid size")
            .with_hint("Use bytes or K/M/G (e.g. 8M).")
            .with_source(err)
    })?;

    let multiplier = match suffix {
        "" => 1,
        "K" | "k" => 1024,
        "M" | "m" => 1024 * 1024,
        "G" | "g" => 1024 * 1024 * 1024,
        _ => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("invalid size suffix")
                .with_hint("Use K/M/G (e.g. 8M)."));
        }
    };

    value.checked_mul(multiplier).ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message("size overflow")
            .with_hint("Use a smaller size value.")
    })
}

fn serve_config_from_args(args: ServeArgs) -> Result<serve::ServeConfig, Error> {
    let bind = resolve_bind(&args.host, args.port)?;
    let registrations = args
        .register
        .iter()
        .map(|raw| parse_registration(raw))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(serve::ServeConfig {
        bind,
        search_paths: args.module_path,
        registrations,
        max_body_bytes: parse_size(&args.max_body_bytes)?,
        allow_non_loopback: args.allow_non_loopback,
    })
}

fn read_code_file(path: &str) -> Result<String, Error> {
    if path == "-" {
        let mut code = String::new();
        io::stdin().read_to_string(&mut code).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read code from stdin")
                .with_source(err)
        })?;
        return Ok(code);
    }
    std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to read code file {path}"))
            .with_source(err)
    })
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let pretty = is_tty || color_mode.use_color(is_tty);
    let json = if pretty {
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
    inner.insert("message".to_string(), json!(err.description()));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(module) = err.module() {
        inner.insert("module".to_string(), json!(module));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
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
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        err.description()
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(module) = err.module() {
        lines.push(format!(
            "{} {module}",
            colorize_label("module:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint("I/O error. Check the path, the server address, and that the port is free.")
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

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let subcommand = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .and_then(|usage| {
            let mut tokens = usage.split_whitespace();
            tokens.find(|token| *token == "lpy")?;
            tokens.next().filter(|token| {
                !token.starts_with('-') && !token.starts_with('<') && !token.starts_with('[')
            })
        });
    match subcommand {
        Some(name) => format!("Try `lpy {name} --help`."),
        None => "Try `lpy --help`.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Cli, Command, Error, ErrorKind, error_json, error_text, parse_registration, parse_size,
        resolve_bind, serve_config_from_args,
    };
    use clap::Parser;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn parse_size_accepts_bytes_and_kmg() {
        assert_eq!(parse_size("42").expect("bytes"), 42);
        assert_eq!(parse_size("1K").expect("k"), 1024);
        assert_eq!(parse_size("8M").expect("m"), 8 * 1024 * 1024);
        assert_eq!(parse_size("1g").expect("g"), 1024 * 1024 * 1024);
        assert_eq!(parse_size("7X").expect_err("suffix").kind(), ErrorKind::Usage);
    }

    #[test]
    fn registration_requires_name_and_path() {
        let registration = parse_registration("app.util=./util.lpy").expect("registration");
        assert_eq!(registration.name, "app.util");
        assert_eq!(registration.path, PathBuf::from("./util.lpy"));
        assert!(parse_registration("util").is_err());
        assert!(parse_registration("=./util.lpy").is_err());
        assert!(parse_registration("util=").is_err());
    }

    #[test]
    fn bind_resolves_ip_literals() {
        let addr = resolve_bind("127.0.0.1", 7330).expect("bind");
        assert_eq!(addr.to_string(), "127.0.0.1:7330");
        let addr = resolve_bind("::1", 0).expect("bind");
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn serve_defaults_match_documented_values() {
        let cli = Cli::try_parse_from(["lpy", "serve"]).expect("parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = serve_config_from_args(args).expect("config");
        assert_eq!(config.bind.to_string(), "127.0.0.1:7330");
        assert_eq!(config.max_body_bytes, 8 * 1024 * 1024);
        assert!(!config.allow_non_loopback);
        assert!(config.registrations.is_empty());
    }

    #[test]
    fn send_rejects_code_and_code_file_together() {
        let result = Cli::try_parse_from([
            "lpy",
            "send",
            "--code",
            "1",
            "--code-file",
            "cell.lpy",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn error_json_carries_module_and_line() {
        let err = Error::new(ErrorKind::Execution)
            .with_message("boom")
            .with_module("app")
            .with_line(3);
        assert_eq!(
            error_json(&err),
            json!({"error": {"kind": "Execution", "message": "boom", "module": "app", "line": 3}})
        );
        let text = error_text(&err, false);
        assert!(text.starts_with("error: boom"));
        assert!(text.contains("module: app"));
    }
}
