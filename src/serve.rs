//! Purpose: Provide the HTTP/JSON execution server for lpy.
//! Exports: `ServeConfig`, `Registration`, `ServeExit`, `serve`.
//! Role: Axum-based loopback server exposing `POST /execute` over one shared `ExecutionService`.
//! Invariants: Protocol outcomes (including errors) are HTTP 200; undecodable bodies are HTTP 400.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Execution runs on blocking workers; the async runtime never evaluates code.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::post;
use axum::{Json, Router};
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use lpy::api::{
    CapturedOutput, Error, ErrorKind, ExecutionService, Message, ModuleSystem, Response,
};
use lpy::script::ScriptEvaluator;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const QUIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub search_paths: Vec<PathBuf>,
    pub registrations: Vec<Registration>,
    pub max_body_bytes: u64,
    pub allow_non_loopback: bool,
}

/// A module registered from a file at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Registration {
    pub name: String,
    pub path: PathBuf,
}

/// Why the server stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServeExit {
    Quit,
    Signal,
}

#[derive(Clone)]
struct AppState {
    service: Arc<ExecutionService>,
    quit_tx: mpsc::Sender<()>,
}

pub async fn serve(config: ServeConfig) -> Result<ServeExit, Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let modules = build_module_system(&config)?;
    let (quit_tx, mut quit_rx) = mpsc::channel::<()>(1);
    let state = Arc::new(AppState {
        service: Arc::new(ExecutionService::new(modules)),
        quit_tx,
    });

    let app = Router::new()
        .route("/execute", post(execute))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    let local_addr = listener.local_addr().unwrap_or(config.bind);
    tracing::info!(addr = %local_addr, "lpy server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    let exit = tokio::select! {
        result = &mut server => {
            result.map_err(server_failed)?;
            ServeExit::Signal
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await {
                Ok(result) => result.map_err(server_failed)?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
            ServeExit::Signal
        }
        _ = quit_rx.recv() => {
            tracing::info!("quit requested");
            let _ = shutdown_tx.send(());
            // In-flight executions are abandoned once the quit response is flushed.
            if tokio::time::timeout(QUIT_DRAIN_TIMEOUT, &mut server).await.is_err() {
                tracing::warn!("connections still open at quit; exiting anyway");
            }
            ServeExit::Quit
        }
    };
    Ok(exit)
}

fn server_failed(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("server failed")
        .with_source(err)
}

fn build_module_system(config: &ServeConfig) -> Result<ModuleSystem, Error> {
    let modules = ModuleSystem::with_search_paths(
        Arc::new(ScriptEvaluator::new()),
        config.search_paths.clone(),
    );
    for registration in &config.registrations {
        let content = std::fs::read_to_string(&registration.path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!(
                    "failed to read module source {}",
                    registration.path.display()
                ))
                .with_hint("Check the path given to --register NAME=PATH.")
                .with_source(err)
        })?;
        modules.registry().register(
            registration.name.as_str(),
            content,
            registration.path.display().to_string(),
        );
    }
    Ok(modules)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 8388608."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    for path in &config.search_paths {
        if !path.is_dir() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("module path is not a directory: {}", path.display()))
                .with_hint("Pass an existing directory to --module-path."));
        }
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn execute(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Message>, JsonRejection>,
) -> HttpResponse {
    let message = match payload {
        Ok(Json(message)) => message,
        Err(rejection) => {
            let detail = rejection.body_text();
            tracing::warn!(status = %rejection.status(), error = %detail, "rejected request body");
            let body = Response::error(
                format!("invalid message: {detail}"),
                CapturedOutput::default(),
            );
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let service = state.service.clone();
    let outcome = match tokio::task::spawn_blocking(move || service.execute(&message)).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(error = %err, "execution worker failed");
            let body = Response::error("execution worker failed", CapturedOutput::default());
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
    };

    if outcome.quit {
        let _ = state.quit_tx.try_send(());
    }
    tracing::debug!(kind = ?outcome.response.kind, "execute complete");
    (StatusCode::OK, Json(outcome.response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::{
        ErrorKind, Registration, ServeConfig, build_module_system, serve, validate_config,
    };
    use std::path::PathBuf;

    fn config(bind: &str) -> ServeConfig {
        ServeConfig {
            bind: bind.parse().expect("bind"),
            search_paths: Vec::new(),
            registrations: Vec::new(),
            max_body_bytes: 8 * 1024 * 1024,
            allow_non_loopback: false,
        }
    }

    #[tokio::test]
    async fn serve_rejects_non_loopback_bind() {
        let err = serve(config("0.0.0.0:0"))
            .await
            .expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn non_loopback_requires_allow_flag() {
        let err = validate_config(&config("0.0.0.0:0")).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let mut allowed = config("0.0.0.0:0");
        allowed.allow_non_loopback = true;
        validate_config(&allowed).expect("allowed");
    }

    #[test]
    fn zero_body_limit_is_rejected() {
        let mut config = config("127.0.0.1:0");
        config.max_body_bytes = 0;
        let err = validate_config(&config).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn missing_module_path_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = config("[::1]:0");
        config.search_paths = vec![temp.path().join("absent")];
        let err = validate_config(&config).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn registrations_are_loaded_from_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("greet.lpy");
        std::fs::write(&path, "greeting = \"hi\"\n").expect("write");
        let mut config = config("127.0.0.1:0");
        config.registrations = vec![Registration {
            name: "greet".to_string(),
            path: path.clone(),
        }];
        let modules = build_module_system(&config).expect("modules");
        let spec = modules.registry().resolve("greet").expect("registered");
        assert_eq!(spec.content, "greeting = \"hi\"\n");
        assert_eq!(PathBuf::from(spec.filepath), path);
    }

    #[test]
    fn unreadable_registration_is_io_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = config("127.0.0.1:0");
        config.registrations = vec![Registration {
            name: "gone".to_string(),
            path: temp.path().join("gone.lpy"),
        }];
        let err = build_module_system(&config).err().expect("expected io error");
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
