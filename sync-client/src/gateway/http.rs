//! HTTP gateway over reqwest.

use super::{ApiRequest, Gateway, Method};
use crate::error::GatewayError;
use async_trait::async_trait;
use novaclub_sync_types::ErrorBody;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Gateway that speaks JSON over HTTP(S).
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    root_url: Url,
    token: Mutex<Option<String>>,
}

impl HttpGateway {
    /// Create a gateway for the API at `base_url` (e.g. `https://host/api/v1`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(base_url.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let root_url = base
            .join("/")
            .map_err(|e| GatewayError::InvalidUrl(e.to_string()))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base,
            root_url,
            token: Mutex::new(None),
        })
    }

    /// Resolve a request path to a full URL.
    pub fn url_for(&self, request: &ApiRequest) -> Result<Url, GatewayError> {
        let base = if request.root {
            &self.root_url
        } else {
            &self.base_url
        };
        base.join(request.path.trim_start_matches('/'))
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", request.path, e)))
    }
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_builder() {
        GatewayError::InvalidUrl(err.to_string())
    } else if err.is_decode() {
        GatewayError::Decode(err.to_string())
    } else {
        GatewayError::Connectivity(err.to_string())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send(&self, request: ApiRequest) -> Result<Value, GatewayError> {
        let url = self.url_for(&request)?;
        tracing::debug!("{} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(token) = self.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("{} {} refused the session token", request.method, request.path);
            self.set_token(None);
            return Err(GatewayError::Unauthorized);
        }

        let bytes = response.bytes().await.map_err(classify)?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|body| body.message())
                .unwrap_or_else(|_| "request failed".to_string());
            return Err(GatewayError::Application {
                status: status.as_u16(),
                message,
            });
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response; the task yields the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{}/api/v1", addr), task)
    }

    #[test]
    fn urls_resolve_against_base_and_root() {
        let gateway =
            HttpGateway::new("http://dojo.local:8000/api/v1", Duration::from_secs(5)).unwrap();

        let url = gateway.url_for(&ApiRequest::get("/members/")).unwrap();
        assert_eq!(url.as_str(), "http://dojo.local:8000/api/v1/members/");

        let url = gateway
            .url_for(&ApiRequest::get("/health").at_root())
            .unwrap();
        assert_eq!(url.as_str(), "http://dojo.local:8000/health");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            HttpGateway::new("not a url", Duration::from_secs(5)),
            Err(GatewayError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn success_body_is_decoded_and_token_attached() {
        let (base, server) = serve_once("200 OK", r#"{"id":"u-1","email":"a@b.c"}"#).await;
        let gateway = HttpGateway::new(&base, Duration::from_secs(5)).unwrap();
        gateway.set_token(Some("tok-123".into()));

        let value = gateway.send(ApiRequest::get("/auth/me")).await.unwrap();
        assert_eq!(value["email"], json!("a@b.c"));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("GET /api/v1/auth/me "));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer tok-123"));
    }

    #[tokio::test]
    async fn unauthorized_clears_token() {
        let (base, server) =
            serve_once("401 Unauthorized", r#"{"detail":"Could not validate credentials"}"#).await;
        let gateway = HttpGateway::new(&base, Duration::from_secs(5)).unwrap();
        gateway.set_token(Some("expired".into()));

        let err = gateway.send(ApiRequest::get("/auth/me")).await.unwrap_err();
        assert_eq!(err, GatewayError::Unauthorized);
        assert!(gateway.token().is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn error_status_carries_detail_message() {
        let (base, server) = serve_once(
            "422 Unprocessable Entity",
            r#"{"detail":[{"loc":["body","email"],"msg":"field required"}]}"#,
        )
        .await;
        let gateway = HttpGateway::new(&base, Duration::from_secs(5)).unwrap();

        let err = gateway
            .send(ApiRequest::post("/sync/push", json!({})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Application {
                status: 422,
                message: "field required".into()
            }
        );

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/v1/sync/push "));
    }

    #[tokio::test]
    async fn non_json_error_falls_back() {
        let (base, server) = serve_once("500 Internal Server Error", "oops").await;
        let gateway = HttpGateway::new(&base, Duration::from_secs(5)).unwrap();

        let err = gateway.send(ApiRequest::get("/members/")).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Application {
                status: 500,
                message: "request failed".into()
            }
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let (base, server) = serve_once("200 OK", "").await;
        let gateway = HttpGateway::new(&base, Duration::from_secs(5)).unwrap();

        let value = gateway.send(ApiRequest::get("/members/")).await.unwrap();
        assert_eq!(value, Value::Null);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_connectivity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gateway =
            HttpGateway::new(&format!("http://{}/api/v1", addr), Duration::from_secs(5)).unwrap();
        let err = gateway.send(ApiRequest::get("/health").at_root()).await.unwrap_err();
        assert!(err.is_connectivity(), "got {:?}", err);
    }
}
