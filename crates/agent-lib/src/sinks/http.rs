//! Shared outbound HTTP plumbing for network sinks

use super::SinkError;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace};

/// Upper bound for one complete request
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(1200);

/// Upper bound for establishing the connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(800);

/// Build a client with bounded timeouts, optionally presenting a client
/// certificate through a prebuilt TLS context
pub fn build_http_client(tls: Option<rustls::ClientConfig>) -> Result<Client, SinkError> {
    let mut builder = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT);

    if let Some(tls) = tls {
        builder = builder.use_preconfigured_tls(tls);
    }

    builder
        .build()
        .map_err(|e| SinkError::ClientBuild(e.to_string()))
}

/// POST a JSON body and treat anything but 2xx as a failure
pub(crate) async fn post_json(
    client: &Client,
    url: &str,
    body: Vec<u8>,
    authorization: Option<&str>,
) -> Result<(), SinkError> {
    let mut request = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(body);
    if let Some(value) = authorization {
        request = request.header(AUTHORIZATION, value);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    trace!(url = %url, status = status.as_u16(), body = %text, "Received response");

    if !status.is_success() {
        return Err(SinkError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    debug!(url = %url, status = status.as_u16(), "Metric delivered");
    Ok(())
}
