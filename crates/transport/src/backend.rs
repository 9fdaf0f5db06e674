//! HTTP side of the transport: RPC calls, direct sets, route partials, the
//! poll endpoint and the push stream.

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use jrx_protocol::{CallRequest, CallResult, OutboundSet};
use reqwest::{Client, Response};
use serde_json::Value;

pub const PARTIAL_HEADER: &str = "X-Partial";

/// Raw byte chunks of a push stream.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Everything the client asks of the server over plain HTTP.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// `POST /call/<qualified>`. Never fails: network errors become a failed
    /// [`CallResult`].
    async fn call(&self, qualified: &str, request: &CallRequest) -> CallResult;

    /// `POST /jrx/set?path=<route>` with `{k, v}`.
    async fn set(&self, route: &str, edit: &OutboundSet) -> Result<()>;

    /// `GET <route>` with `X-Partial: 1`.
    async fn fetch_partial(&self, route: &str) -> Result<String>;

    /// `GET /jrx/poll?path=<route>&since=<seq>`; the raw batch envelope.
    async fn poll(&self, route: &str, since: u64) -> Result<String>;

    /// `GET /jrx/sse?path=<route>&since=<seq>` as a byte stream.
    async fn push_stream(&self, route: &str, since: u64) -> Result<ByteStream>;
}

/// [`HttpBackend`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    config: TransportConfig,
    client: Client,
    /// No overall timeout: push responses stay open indefinitely
    stream_client: Client,
}

impl ReqwestBackend {
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate().map_err(TransportError::Config)?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let stream_client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            config,
            client,
            stream_client,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

/// Decode a response body as JSON, keeping non-JSON text as a string.
fn body_value(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn call(&self, qualified: &str, request: &CallRequest) -> CallResult {
        let url = match self.config.call_url(qualified) {
            Ok(url) => url,
            Err(e) => return CallResult::network_failure(e.to_string()),
        };
        let response = match self.client.post(url).json(request).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Call {qualified} did not reach the server: {e}");
                return CallResult::network_failure(e.to_string());
            }
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(text) => CallResult::from_response(status, body_value(text)),
            Err(e) => CallResult::network_failure(e.to_string()),
        }
    }

    async fn set(&self, route: &str, edit: &OutboundSet) -> Result<()> {
        let url = self.config.set_url(route)?;
        let response = self.client.post(url).json(edit).send().await?;
        check_status(response)?;
        Ok(())
    }

    async fn fetch_partial(&self, route: &str) -> Result<String> {
        let url = self.config.partial_url(route)?;
        let response = self
            .client
            .get(url)
            .header(PARTIAL_HEADER, "1")
            .send()
            .await?;
        Ok(check_status(response)?.text().await?)
    }

    async fn poll(&self, route: &str, since: u64) -> Result<String> {
        let url = self.config.poll_url(route, since)?;
        let response = self.client.get(url).send().await?;
        Ok(check_status(response)?.text().await?)
    }

    async fn push_stream(&self, route: &str, since: u64) -> Result<ByteStream> {
        let url = self.config.push_url(route, since)?;
        let response = self
            .stream_client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let stream = check_status(response)?
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from));
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn bodies_decode_leniently() {
        assert_eq!(body_value(String::new()), Value::Null);
        assert_eq!(body_value(r#"{"ok":true}"#.to_string()), json!({"ok": true}));
        assert_eq!(body_value("Bad Gateway".to_string()), json!("Bad Gateway"));
    }

    #[test]
    fn backend_rejects_invalid_config() {
        let config = TransportConfig::with_base_url("not a url");
        assert!(matches!(
            ReqwestBackend::new(config),
            Err(TransportError::Config(_))
        ));
    }
}
