//! Purpose: Hold top-level CLI command dispatch for `lpy`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `serve` ending with `quit` exits the process with status 0 immediately.
//! Invariants: Helpers in `main.rs` remain the source of flag parsing logic.

use super::*;
use lpy::api::{EXECUTION_STACK_BYTES, Message, RemoteClient, Response};

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "lpy", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let config = serve_config_from_args(args)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_stack_size(EXECUTION_STACK_BYTES)
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            match runtime.block_on(serve::serve(config))? {
                // Skips runtime teardown, which would wait on still-running executions.
                serve::ServeExit::Quit => std::process::exit(0),
                serve::ServeExit::Signal => Ok(RunOutcome::ok()),
            }
        }
        Command::Send(args) => {
            let code = match (args.code, args.code_file.as_deref()) {
                (Some(code), _) => Some(code),
                (None, Some(path)) => Some(read_code_file(path)?),
                (None, None) => None,
            };
            let mut message = Message::new(args.kind);
            message.code = code;
            message.module = args.module;
            message.module_create_method = args.create_method;

            let client = RemoteClient::new(args.url)?;
            let response = client.execute(&message)?;
            if args.raw {
                emit_raw(&response);
            } else {
                let value = serde_json::to_value(&response).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode response")
                        .with_source(err)
                })?;
                emit_json(value, color_mode);
            }
            if response.is_error() {
                return Ok(RunOutcome::with_code(RESPONSE_ERROR_EXIT_CODE));
            }
            Ok(RunOutcome::ok())
        }
    }
}

fn emit_raw(response: &Response) {
    print!("{}", response.stdout);
    eprint!("{}", response.stderr);
    match (&response.result, &response.error) {
        (Some(Value::Null), _) | (None, None) => {}
        (Some(value), _) => println!("{value}"),
        (None, Some(error)) => eprintln!("error: {error}"),
    }
}
