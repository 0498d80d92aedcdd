//! Purpose: End-to-end tests for the `lpy serve` HTTP server and the `lpy send` client.
//! Exports: None (integration test module).
//! Role: Validate `/execute` over TCP, startup registration, CLI plumbing and `quit`.
//! Invariants: Uses loopback-only servers on freshly picked ports.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Server processes are cleaned up on drop.

use lpy::api::{Message, RemoteClient, Response, ResponseType};
use serde_json::{Value, json};
use std::io::Read;
use std::net::TcpListener;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(extra_args: &[String]) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let base_url = format!("http://127.0.0.1:{port}");

            let mut child = Command::new(env!("CARGO_BIN_EXE_lpy"))
                .arg("serve")
                .arg("--host")
                .arg("127.0.0.1")
                .arg("--port")
                .arg(port.to_string())
                .args(extra_args)
                .env_remove("LPY_HOST")
                .env_remove("LPY_PORT")
                .env("RUST_LOG", "warn")
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, &base_url) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn client(&self) -> TestResult<RemoteClient> {
        Ok(RemoteClient::new(self.base_url.clone())?.with_timeout(Duration::from_secs(10)))
    }

    fn wait_for_exit(&mut self, limit: Duration) -> TestResult<ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() > limit {
                return Err("server did not exit in time".into());
            }
            sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, base_url: &str) -> TestResult<()> {
    let client = RemoteClient::new(base_url)?.with_timeout(Duration::from_secs(1));
    let start = Instant::now();
    loop {
        if let Ok(response) = client.status() {
            if response.result == Some(json!({"alive": true})) {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}

fn run_send(base_url: &str, args: &[&str]) -> TestResult<(Option<i32>, Value)> {
    let output = Command::new(env!("CARGO_BIN_EXE_lpy"))
        .arg("send")
        .arg("--url")
        .arg(base_url)
        .args(args)
        .env_remove("LPY_URL")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;
    let value = serde_json::from_str(stdout.trim())?;
    Ok((output.status.code(), value))
}

#[test]
fn eval_and_exec_over_http() -> TestResult<()> {
    let server = TestServer::start(&[])?;
    let client = server.client()?;

    let response = client.execute(&Message::eval("1 + 1"))?;
    assert_eq!(response.kind, ResponseType::Result);
    assert_eq!(response.result, Some(json!(2)));
    assert_eq!(response.stdout, "");

    let response = client.execute(
        &Message::exec("print(\"hello\")\ngreeting = \"hi\"")
            .with_module("scratch")
            .with_create_method("create"),
    )?;
    assert_eq!(response.stdout, "hello\n");
    assert_eq!(response.result, Some(Value::Null));

    let response = client.execute(&Message::eval("greeting").with_module("scratch"))?;
    assert_eq!(response.result, Some(json!("hi")));
    Ok(())
}

#[test]
fn protocol_errors_are_http_200() -> TestResult<()> {
    let server = TestServer::start(&[])?;
    let client = server.client()?;

    let response = client.execute(&Message::new("bogus"))?;
    assert_eq!(response.kind, ResponseType::Error);
    assert_eq!(response.error.as_deref(), Some("Unknown type: bogus"));

    let response = client.execute(&Message::eval("1 +"))?;
    assert_eq!(response.kind, ResponseType::Error);
    assert!(response.stderr.contains("invalid syntax"));
    Ok(())
}

#[test]
fn malformed_body_is_rejected_with_error_response() -> TestResult<()> {
    let server = TestServer::start(&[])?;
    let url = format!("{}/execute", server.base_url);
    let result = ureq::post(&url)
        .set("Content-Type", "application/json")
        .send_string("{not json");
    let Err(ureq::Error::Status(status, response)) = result else {
        return Err("expected http error status".into());
    };
    assert_eq!(status, 400);
    let body: Response = serde_json::from_str(&response.into_string()?)?;
    assert_eq!(body.kind, ResponseType::Error);
    assert!(body.error.as_deref().unwrap_or("").starts_with("invalid message"));
    assert_eq!(body.stdout, "");
    Ok(())
}

#[test]
fn startup_registrations_and_module_paths_resolve() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let registered = temp.path().join("util.lpy");
    std::fs::write(&registered, "fn twice(x) { return x * 2 }\n")?;
    let lib_dir = temp.path().join("lib");
    std::fs::create_dir(&lib_dir)?;
    std::fs::write(lib_dir.join("consts.lpy"), "answer = 21\n")?;

    let server = TestServer::start(&[
        "--register".to_string(),
        format!("util={}", registered.display()),
        "--module-path".to_string(),
        lib_dir.display().to_string(),
    ])?;
    let client = server.client()?;

    let response = client.execute(&Message::exec("from util import twice\nimport consts"))?;
    assert_eq!(response.kind, ResponseType::Result, "{:?}", response.error);
    let response = client.execute(&Message::eval("twice(consts.answer)"))?;
    assert_eq!(response.result, Some(json!(42)));

    let response = client.execute(&Message::eval("__file__").with_module("util"))?;
    assert_eq!(response.result, Some(json!(registered.display().to_string())));
    Ok(())
}

#[test]
fn send_command_prints_response_json() -> TestResult<()> {
    let server = TestServer::start(&[])?;

    let (code, value) = run_send(&server.base_url, &["--type", "eval", "--code", "6 * 7"])?;
    assert_eq!(code, Some(0));
    assert_eq!(value["type"], json!("result"));
    assert_eq!(value["result"], json!(42));

    let (code, value) = run_send(&server.base_url, &["--type", "eval", "--code", "nope"])?;
    assert_eq!(code, Some(1));
    assert_eq!(value["type"], json!("error"));
    assert_eq!(value["error"], json!("name 'nope' is not defined"));
    Ok(())
}

#[test]
fn quit_exits_with_status_zero() -> TestResult<()> {
    let mut server = TestServer::start(&[])?;
    let client = server.client()?;

    let response = client.quit()?;
    assert_eq!(response.kind, ResponseType::Result);
    assert_eq!(response.result, Some(Value::Null));

    let status = server.wait_for_exit(Duration::from_secs(10))?;
    assert_eq!(status.code(), Some(0));
    Ok(())
}

#[test]
fn non_loopback_bind_requires_opt_in() -> TestResult<()> {
    let output = Command::new(env!("CARGO_BIN_EXE_lpy"))
        .args(["serve", "--host", "0.0.0.0", "--port", "0"])
        .env_remove("LPY_ALLOW_NON_LOOPBACK")
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr)?;
    let value: Value = serde_json::from_str(stderr.trim())?;
    assert_eq!(value["error"]["kind"], json!("Usage"));
    assert_eq!(
        value["error"]["message"],
        json!("non-loopback bind requires explicit opt-in")
    );
    Ok(())
}
