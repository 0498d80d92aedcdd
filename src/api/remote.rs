//! Purpose: Provide an HTTP client for the `/execute` protocol.
//! Exports: `RemoteClient`.
//! Role: Blocking client used by `lpy send` and the end-to-end tests.
//! Invariants: Base URLs are origin-only (`http(s)://host:port/`); requests go to `/execute`.
//! Invariants: HTTP 400 bodies that carry a protocol `Response` are returned, not raised.
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::message::{Message, Response};
use crate::core::error::{Error, ErrorKind};

type ApiResult<T> = Result<T, Error>;

pub const EXECUTE_PATH: &str = "execute";

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<RemoteClientInner>,
}

struct RemoteClientInner {
    base_url: Url,
    execute_url: Url,
    agent: ureq::Agent,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let execute_url = build_url(&base_url, &[EXECUTE_PATH])?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RemoteClientInner {
                base_url,
                execute_url,
                agent,
            }),
        })
    }

    /// Applies a whole-request timeout (connect, send and read).
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            inner: Arc::new(RemoteClientInner {
                base_url: self.inner.base_url.clone(),
                execute_url: self.inner.execute_url.clone(),
                agent,
            }),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn execute(&self, message: &Message) -> ApiResult<Response> {
        let payload = serde_json::to_string(message).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_source(err)
        })?;
        tracing::debug!(url = %self.inner.execute_url, body = %payload, "send message");
        let response = self
            .inner
            .agent
            .post(self.inner.execute_url.as_str())
            .set("Accept", "application/json")
            .set("Content-Type", "application/json")
            .send_string(&payload);

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => parse_error_response(code, resp),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_hint(format!("Is `lpy serve` listening on {}?", self.inner.base_url))
                .with_source(err)),
        }
    }

    pub fn status(&self) -> ApiResult<Response> {
        self.execute(&Message::status())
    }

    pub fn quit(&self) -> ApiResult<Response> {
        self.execute(&Message::quit())
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid server url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("server url must use http or https scheme")
        );
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("server url must not include a path")
            .with_hint("Use the origin only, e.g. http://127.0.0.1:7330."));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("server url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response(response: ureq::Response) -> ApiResult<Response> {
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    tracing::debug!(body = %body, "received response");
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Protocol)
            .with_message("invalid response json")
            .with_source(err)
    })
}

/// Protocol-level rejections still carry a `Response`; anything else is an error.
fn parse_error_response(status: u16, response: ureq::Response) -> ApiResult<Response> {
    let body = response.into_string().unwrap_or_default();
    match serde_json::from_str::<Response>(&body) {
        Ok(parsed) if status == 400 => Ok(parsed),
        Ok(parsed) => Err(Error::new(error_kind_from_status(status)).with_message(
            parsed
                .error
                .unwrap_or_else(|| format!("server error status {status}")),
        )),
        Err(_) => Err(Error::new(error_kind_from_status(status))
            .with_message(format!("server error status {status}"))),
    }
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 415 | 422 => ErrorKind::Protocol,
        404 | 405 => ErrorKind::Usage,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::{RemoteClient, error_kind_from_status, normalize_base_url};
    use crate::core::error::ErrorKind;

    #[test]
    fn normalize_base_url_adds_root_path() {
        let url = normalize_base_url("http://localhost:7330".to_string()).expect("url");
        assert_eq!(url.as_str(), "http://localhost:7330/");
    }

    #[test]
    fn normalize_base_url_rejects_paths_and_schemes() {
        let err = normalize_base_url("http://localhost:7330/execute".to_string())
            .expect_err("path rejected");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = normalize_base_url("ftp://localhost".to_string()).expect_err("scheme rejected");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn client_targets_execute_endpoint() {
        let client = RemoteClient::new("http://127.0.0.1:7330").expect("client");
        assert_eq!(client.inner.execute_url.as_str(), "http://127.0.0.1:7330/execute");
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:7330/");
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert_eq!(error_kind_from_status(400), ErrorKind::Protocol);
        assert_eq!(error_kind_from_status(404), ErrorKind::Usage);
        assert_eq!(error_kind_from_status(500), ErrorKind::Internal);
    }
}
