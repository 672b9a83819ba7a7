//! Minimal JSON-over-HTTP/1.1 client.
//!
//! One connection per request, driven on a background task, with the whole
//! exchange (connect, handshake, send, read body) bounded by a timeout.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("http handshake failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("request to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}

/// Raw response: status plus the fully buffered body.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub status: http::StatusCode,
    pub body: Bytes,
}

impl JsonResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }

    /// Body as lossy UTF-8, for error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// POST `body` as JSON to `http://{address}{path}`.
///
/// `bearer` is sent as an `authorization: Bearer` header when present.
pub async fn post_json<B: Serialize>(
    address: &str,
    path: &str,
    bearer: Option<&str>,
    body: &B,
    timeout: Duration,
) -> Result<JsonResponse, HttpError> {
    let payload = serde_json::to_vec(body).map_err(|e| HttpError::Encode(e.to_string()))?;
    send(http::Method::POST, address, path, bearer, Some(payload), timeout).await
}

/// GET `http://{address}{path}`.
pub async fn get(
    address: &str,
    path: &str,
    bearer: Option<&str>,
    timeout: Duration,
) -> Result<JsonResponse, HttpError> {
    send(http::Method::GET, address, path, bearer, None, timeout).await
}

async fn send(
    method: http::Method,
    address: &str,
    path: &str,
    bearer: Option<&str>,
    payload: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<JsonResponse, HttpError> {
    let uri = format!("http://{address}{path}");

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| HttpError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HttpError::Handshake(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "http connection closed with error");
            }
        });

        let mut builder = http::Request::builder()
            .method(method)
            .uri(path)
            .header("host", address)
            .header("user-agent", "fleet/0.1");
        if payload.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = builder
            .body(Full::new(Bytes::from(payload.unwrap_or_default())))
            .map_err(|e| HttpError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| HttpError::Request(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| HttpError::Request(e.to_string()))?
            .to_bytes();

        debug!(%uri, %status, bytes = body.len(), "http exchange complete");
        Ok::<_, HttpError>(JsonResponse { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(HttpError::Timeout {
            address: address.to_string(),
            timeout,
        }),
    }
}
