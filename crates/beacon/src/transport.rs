use std::time::Duration;

use async_trait::async_trait;
use beacon_core::error::ClientError;
use beacon_protocol::{ErrorBody, ValidationErrorBody};
use futures_util::StreamExt as _;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Decoded `data:` payloads of one server-sent-event response. Dropping the
/// stream stops the reader task.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Result<Value, ClientError>>,
    join: JoinHandle<()>,
}

impl EventStream {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Result<Value, ClientError>>,
        join: JoinHandle<()>,
    ) -> Self {
        Self { rx, join }
    }

    pub async fn recv(&mut self) -> Option<Result<Value, ClientError>> {
        self.rx.recv().await
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.join.abort();
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError>;

    async fn stream(
        &self,
        path: &str,
        body: Value,
        cancel: CancellationToken,
    ) -> Result<EventStream, ClientError>;

    fn set_token(&mut self, token: Option<String>);

    fn set_base_url(&mut self, base_url: &str) -> Result<(), ClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        // No client-wide timeout: it would also cut off long-lived streams.
        let client = reqwest::Client::builder()
            .user_agent(format!("beacon/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
            token: None,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ClientError::Transport(format!("invalid request path {path}: {err}")))
    }

    fn builder(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method.as_reqwest(), url);
        match self.token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// Base URLs always end in `/` so relative joins keep any path prefix.
fn parse_base_url(raw: &str) -> Result<Url, ClientError> {
    let raw = raw.trim();
    let with_slash = if raw.ends_with('/') {
        raw.to_owned()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&with_slash)
        .map_err(|err| ClientError::Transport(format!("invalid server url {raw}: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ClientError::Transport(format!(
            "unsupported url scheme {other}: {raw}"
        ))),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let url = self.url(path)?;
        let mut req = self.builder(method, url).timeout(self.request_timeout);
        if let Some(body) = body.as_ref() {
            req = req.json(body);
        }

        tracing::debug!(method = ?method, path, "request");
        let resp = req.send().await.map_err(send_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(send_error)?;

        if !status.is_success() {
            tracing::debug!(path, %status, "request failed");
            return Err(map_status(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn stream(
        &self,
        path: &str,
        body: Value,
        cancel: CancellationToken,
    ) -> Result<EventStream, ClientError> {
        let url = self.url(path)?;
        let req = self
            .builder(Method::Post, url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);

        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ClientError::Transport("cancelled".to_owned()));
            }
            resp = req.send() => resp.map_err(send_error)?,
        };
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut decoder = SseDecoder::default();
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return,
                    chunk = bytes.next() => chunk,
                };
                let payloads = match chunk {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(err)) => {
                        let _ = tx.send(Err(send_error(err)));
                        return;
                    }
                    None => {
                        for payload in decoder.finish() {
                            let _ = tx.send(decode_payload(&payload));
                        }
                        return;
                    }
                };
                for payload in payloads {
                    if tx.send(decode_payload(&payload)).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(EventStream::new(rx, join))
    }

    fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    fn set_base_url(&mut self, base_url: &str) -> Result<(), ClientError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(())
    }
}

fn decode_payload(payload: &str) -> Result<Value, ClientError> {
    Ok(serde_json::from_str(payload)?)
}

fn send_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Transport(format!("timed out: {err}"))
    } else if err.is_connect() {
        ClientError::Transport(format!("connect failed: {err}"))
    } else {
        ClientError::Transport(err.to_string())
    }
}

fn error_message(status: StatusCode, text: &str) -> String {
    if let Ok(body) = serde_json::from_str::<ErrorBody>(text) {
        if !body.error.trim().is_empty() {
            return body.error;
        }
    }
    let text = text.trim();
    if text.is_empty() {
        status.to_string()
    } else {
        text.to_owned()
    }
}

pub fn map_status(status: StatusCode, text: &str) -> ClientError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth,
        StatusCode::NOT_FOUND => ClientError::NotFound(error_message(status, text)),
        StatusCode::UNPROCESSABLE_ENTITY => {
            let body: ValidationErrorBody = serde_json::from_str(text).unwrap_or_default();
            ClientError::ServerValidation {
                message: body.message,
                fields: body.errors,
            }
        }
        s if s.is_server_error() => ClientError::Transport(format!(
            "server error ({status}): {}",
            error_message(status, text)
        )),
        _ => ClientError::Execution(error_message(status, text)),
    }
}

/// Incremental `text/event-stream` parser. Only `data:` fields matter; an
/// event is dispatched on the blank line that terminates it.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            self.line(line, &mut out);
        }
        out
    }

    /// Flushes an event left unterminated at end of stream.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.buf.is_empty() {
            let raw = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.line(line.trim_end_matches('\r'), &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    fn line(&mut self, line: &str, out: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_owned());
        }
    }

    fn dispatch(&mut self, out: &mut Vec<String>) {
        if self.data.is_empty() {
            return;
        }
        out.push(self.data.join("\n"));
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_chunks_and_comments() {
        let mut d = SseDecoder::default();
        assert!(d.push(b": keepalive\n\ndata: {\"type\":").is_empty());
        let out = d.push(b"\"chunk\",\"text\":\"hi\"}\r\n\r\n");
        assert_eq!(out, vec![r#"{"type":"chunk","text":"hi"}"#.to_owned()]);
    }

    #[test]
    fn decoder_joins_multiline_data_and_ignores_other_fields() {
        let mut d = SseDecoder::default();
        let out = d.push(b"event: message\nid: 7\ndata: a\ndata: b\n\n");
        assert_eq!(out, vec!["a\nb".to_owned()]);
    }

    #[test]
    fn decoder_keeps_multibyte_split_across_chunks() {
        let mut d = SseDecoder::default();
        let bytes = "data: héllo\n\n".as_bytes();
        let (a, b) = bytes.split_at(8);
        assert!(d.push(a).is_empty());
        assert_eq!(d.push(b), vec!["héllo".to_owned()]);
    }

    #[test]
    fn decoder_flushes_unterminated_event() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"type\":\"done\"}").is_empty());
        assert_eq!(d.finish(), vec![r#"{"type":"done"}"#.to_owned()]);
        assert!(d.finish().is_empty());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(map_status(StatusCode::UNAUTHORIZED, ""), ClientError::Auth);
        assert_eq!(map_status(StatusCode::FORBIDDEN, ""), ClientError::Auth);
        assert_eq!(
            map_status(StatusCode::NOT_FOUND, r#"{"error":"no such run"}"#),
            ClientError::NotFound("no such run".to_owned())
        );
        let err = map_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"errors":{"api_key":"invalid"}}"#,
        );
        assert_eq!(err.field_errors().unwrap()["api_key"], "invalid");
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "upstream"),
            ClientError::Transport(_)
        ));
        assert_eq!(
            map_status(StatusCode::CONFLICT, "already exists"),
            ClientError::Execution("already exists".to_owned())
        );
    }

    #[test]
    fn base_url_keeps_path_prefix() {
        let t = HttpTransport::new("http://localhost:9000/api", Duration::from_secs(1)).unwrap();
        assert_eq!(t.url("/runs").unwrap().as_str(), "http://localhost:9000/api/runs");
        assert!(HttpTransport::new("ftp://x", Duration::from_secs(1)).is_err());
    }
}
