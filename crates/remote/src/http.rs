//! HTTP implementation of [`RemoteStore`] against a bot-style API.
//!
//! Uploads are multipart `sendDocument` calls; downloads resolve the object
//! with `getFile` and fetch `file/bot<token>/<path>`. Uploads and byte
//! fetches can be routed through a relay as `<relay>?url=<encoded target>`.

use std::fmt;
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use relaydrive_protocol::{ApiResponse, RemoteFile, SentMessage};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::store::{RemoteStore, StoreFuture, StoredObject};
use crate::{DEFAULT_API_BASE, RemoteError};

/// Characters left alone by a URI component encoder.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Longest error body carried into an error message.
const MAX_ERROR_BODY: usize = 256;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Whole-request limit; sized for a full shard on a slow uplink.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection settings for [`HttpRemoteStore`].
#[derive(Clone)]
pub struct HttpStoreConfig {
    pub bot_token: String,
    /// Channel that receives uploaded shards.
    pub channel_id: String,
    pub api_base: String,
    pub relay_url: Option<String>,
    pub connect_timeout: Duration,
    /// A stalled call fails after this long and is retried like any
    /// transient error.
    pub request_timeout: Duration,
}

impl HttpStoreConfig {
    pub fn new(bot_token: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            channel_id: channel_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            relay_url: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Debug for HttpStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStoreConfig")
            .field("bot_token", &"[redacted]")
            .field("channel_id", &self.channel_id)
            .field("api_base", &self.api_base)
            .field("relay_url", &self.relay_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Remote store reached over HTTP.
pub struct HttpRemoteStore {
    http: reqwest::Client,
    config: HttpStoreConfig,
}

impl HttpRemoteStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, RemoteError> {
        if config.bot_token.trim().is_empty() {
            return Err(RemoteError::Config("bot token is empty".into()));
        }
        if config.channel_id.trim().is_empty() {
            return Err(RemoteError::Config("channel id is empty".into()));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn api_base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base(), self.config.bot_token)
    }

    fn file_url(&self, path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.api_base(),
            self.config.bot_token,
            path.trim_start_matches('/')
        )
    }

    /// Routes `target` through the relay when one is configured.
    fn relayed(&self, target: &str) -> String {
        match &self.config.relay_url {
            Some(relay) => format!("{relay}?url={}", utf8_percent_encode(target, URI_COMPONENT)),
            None => target.to_string(),
        }
    }

    async fn send_document(&self, name: &str, bytes: Vec<u8>) -> Result<StoredObject, RemoteError> {
        let size = bytes.len();
        let form = Form::new()
            .text("chat_id", self.config.channel_id.clone())
            .part("document", Part::bytes(bytes).file_name(name.to_string()));

        let resp = self
            .http
            .post(self.relayed(&self.method_url("sendDocument")))
            .multipart(form)
            .send()
            .await?;
        let message: SentMessage = read_envelope(resp).await?;
        let document = message
            .document
            .ok_or_else(|| RemoteError::Malformed("sendDocument result has no document".into()))?;

        debug!(name, size, message_id = message.message_id, "object stored");
        Ok(StoredObject {
            message_id: message.message_id,
            remote_id: document.file_id,
        })
    }

    async fn get_file(&self, remote_id: &str) -> Result<String, RemoteError> {
        let resp = self
            .http
            .get(self.method_url("getFile"))
            .query(&[("file_id", remote_id)])
            .send()
            .await?;
        let file: RemoteFile = read_envelope(resp).await?;
        file.file_path
            .ok_or_else(|| RemoteError::NotFound(format!("no retrieval path for {remote_id}")))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let resp = self.http.get(self.relayed(&self.file_url(path))).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(
                match serde_json::from_slice::<ApiResponse<serde_json::Value>>(&body) {
                    Ok(envelope) => envelope_error(status, &envelope),
                    Err(_) => status_error(status, &body),
                },
            );
        }
        Ok(body.to_vec())
    }

    async fn delete_message(&self, message_id: i64) -> Result<(), RemoteError> {
        let payload = serde_json::json!({
            "chat_id": self.config.channel_id,
            "message_id": message_id,
        });
        let resp = self
            .http
            .post(self.method_url("deleteMessage"))
            .json(&payload)
            .send()
            .await?;
        let _: serde_json::Value = read_envelope(resp).await?;
        debug!(message_id, "object deleted");
        Ok(())
    }
}

impl RemoteStore for HttpRemoteStore {
    fn put_object<'a>(&'a self, name: &'a str, bytes: Vec<u8>) -> StoreFuture<'a, StoredObject> {
        Box::pin(self.send_document(name, bytes))
    }

    fn resolve<'a>(&'a self, remote_id: &'a str) -> StoreFuture<'a, String> {
        Box::pin(self.get_file(remote_id))
    }

    fn fetch<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(self.download(path))
    }

    fn delete_object(&self, message_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(self.delete_message(message_id))
    }
}

/// Decodes an API envelope, mapping failures to [`RemoteError`].
async fn read_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, RemoteError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    let envelope: ApiResponse<T> = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => return Err(RemoteError::Malformed(e.to_string())),
        Err(_) => return Err(status_error(status, &body)),
    };
    if envelope.ok {
        return envelope
            .result
            .ok_or_else(|| RemoteError::Malformed("ok response without result".into()));
    }
    Err(envelope_error(status, &envelope))
}

fn envelope_error<T>(status: StatusCode, envelope: &ApiResponse<T>) -> RemoteError {
    let limited = status == StatusCode::TOO_MANY_REQUESTS || envelope.error_code == Some(429);
    if limited && let Some(retry_after) = envelope.retry_after() {
        return RemoteError::RateLimited { retry_after };
    }
    RemoteError::Api {
        status: envelope.error_code.unwrap_or(status.as_u16()),
        description: envelope.describe(),
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> RemoteError {
    let text = String::from_utf8_lossy(body);
    let description = match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    };
    RemoteError::Api {
        status: status.as_u16(),
        description,
    }
}
