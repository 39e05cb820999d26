//! Mock gateway for testing.
//!
//! Allows scripting responses per path and capturing sent requests for verification.

use super::{ApiRequest, Gateway};
use crate::error::GatewayError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A request captured by [`MockGateway`], with the token it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// The request as sent.
    pub request: ApiRequest,
    /// Bearer token attached to it.
    pub token: Option<String>,
}

/// Mock gateway for testing.
///
/// Responses are scripted per path and consumed in order. A path with no
/// scripted response answers `404 Not Found`.
#[derive(Debug, Default, Clone)]
pub struct MockGateway {
    inner: Arc<Mutex<MockGatewayInner>>,
}

#[derive(Debug, Default)]
struct MockGatewayInner {
    token: Option<String>,
    requests: Vec<RecordedRequest>,
    responses: HashMap<String, VecDeque<Result<Value, GatewayError>>>,
}

impl MockGateway {
    /// Create a new mock gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockGatewayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a successful response for the next request to `path`.
    pub fn respond(&self, path: &str, body: Value) {
        self.lock()
            .responses
            .entry(path.to_string())
            .or_default()
            .push_back(Ok(body));
    }

    /// Cause the next request to `path` to fail with the given error.
    pub fn fail_next(&self, path: &str, error: GatewayError) {
        self.lock()
            .responses
            .entry(path.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Get all requests that were sent.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Get the requests that were sent to `path`.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.request.path == path)
            .cloned()
            .collect()
    }

    /// Get the last request that was sent.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.lock().requests.last().cloned()
    }

    /// Clear recorded requests and scripted responses.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.requests.clear();
        inner.responses.clear();
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn send(&self, request: ApiRequest) -> Result<Value, GatewayError> {
        let mut inner = self.lock();

        let path = request.path.clone();
        let token = inner.token.clone();
        inner.requests.push(RecordedRequest { request, token });

        let result = inner
            .responses
            .get_mut(&path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(GatewayError::Application {
                    status: 404,
                    message: "Not Found".into(),
                })
            });

        if result == Err(GatewayError::Unauthorized) {
            inner.token = None;
        }
        result
    }

    fn set_token(&self, token: Option<String>) {
        self.lock().token = token;
    }

    fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_responses_are_consumed_in_order() {
        let gateway = MockGateway::new();
        gateway.respond("/members/", json!([1]));
        gateway.respond("/members/", json!([2]));

        let first = gateway.send(ApiRequest::get("/members/")).await.unwrap();
        let second = gateway.send(ApiRequest::get("/members/")).await.unwrap();
        assert_eq!(first, json!([1]));
        assert_eq!(second, json!([2]));

        let err = gateway.send(ApiRequest::get("/members/")).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn records_requests_with_token() {
        let gateway = MockGateway::new();
        gateway.set_token(Some("tok".into()));
        gateway.respond("/sync/push", json!({}));

        gateway
            .send(ApiRequest::post("/sync/push", json!({"members": []})))
            .await
            .unwrap();

        let sent = gateway.last_request().unwrap();
        assert_eq!(sent.token.as_deref(), Some("tok"));
        assert_eq!(sent.request.body, Some(json!({"members": []})));
        assert_eq!(gateway.requests_to("/sync/push").len(), 1);
        assert!(gateway.requests_to("/sync/pull").is_empty());
    }

    #[tokio::test]
    async fn unauthorized_clears_token() {
        let gateway = MockGateway::new();
        gateway.set_token(Some("tok".into()));
        gateway.fail_next("/auth/me", GatewayError::Unauthorized);

        let err = gateway.send(ApiRequest::get("/auth/me")).await.unwrap_err();
        assert_eq!(err, GatewayError::Unauthorized);
        assert!(gateway.token().is_none());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let gateway = MockGateway::new();
        let clone = gateway.clone();
        clone.respond("/health", json!({"status": "ok"}));

        gateway
            .send(ApiRequest::get("/health").at_root())
            .await
            .unwrap();
        assert_eq!(clone.requests().len(), 1);

        clone.reset();
        assert!(gateway.requests().is_empty());
    }
}
