use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn parse_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn text_snippet(&self, max_chars: usize) -> String {
        String::from_utf8_lossy(&self.body)
            .chars()
            .take(max_chars)
            .collect()
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

pub type Header<'a> = (&'a str, &'a str);

pub trait HttpTransport: Send + Sync {
    fn post_json(
        &self,
        url: &str,
        headers: &[Header<'_>],
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError>;

    fn get(
        &self,
        url: &str,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> Result<HttpReply, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn send(
        &self,
        mut request: reqwest::blocking::RequestBuilder,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.timeout(timeout).send().map_err(transport_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(transport_error)?.to_vec();
        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(
        &self,
        url: &str,
        headers: &[Header<'_>],
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        self.send(self.client.post(url).json(body), headers, timeout)
    }

    fn get(
        &self,
        url: &str,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        self.send(self.client.get(url), headers, timeout)
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    TransportError {
        timed_out: err.is_timeout(),
        message: err.to_string(),
    }
}

/// Waits between poll attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
