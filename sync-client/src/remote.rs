//! Typed calls to the remote service.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use novaclub_sync_types::{
    EntityType, LoginRequest, PullRequest, PullResponse, PushRequest, PushResponse, Record,
    RecordId, TokenResponse, UserProfile,
};

use crate::error::GatewayError;
use crate::gateway::{ApiRequest, Gateway};

/// Typed wrapper over a [`Gateway`].
pub struct RemoteApi<G> {
    gateway: Arc<G>,
}

impl<G> Clone for RemoteApi<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

fn encode<T: Serialize>(body: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(body).map_err(|e| GatewayError::Decode(format!("encode: {}", e)))
}

impl<G: Gateway> RemoteApi<G> {
    /// Wrap a gateway.
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// The underlying gateway.
    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, GatewayError> {
        let path = request.path.clone();
        let value = self.gateway.send(request).await?;
        serde_json::from_value(value).map_err(|e| GatewayError::Decode(format!("{}: {}", path, e)))
    }

    /// Submit queued changes (`POST /sync/push`).
    pub async fn push(&self, request: &PushRequest) -> Result<PushResponse, GatewayError> {
        self.call(ApiRequest::post("/sync/push", encode(request)?))
            .await
    }

    /// Fetch changes after the given watermarks (`POST /sync/pull`).
    pub async fn pull(&self, request: &PullRequest) -> Result<PullResponse, GatewayError> {
        self.call(ApiRequest::post("/sync/pull", encode(request)?))
            .await
    }

    /// Exchange credentials for a bearer token (`POST /auth/login`).
    ///
    /// Does not set the token on the gateway.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, GatewayError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.call(ApiRequest::post("/auth/login", encode(&body)?))
            .await
    }

    /// Resolve the current token to a profile (`GET /auth/me`).
    pub async fn whoami(&self) -> Result<UserProfile, GatewayError> {
        self.call(ApiRequest::get("/auth/me")).await
    }

    /// Every record of an entity type (`GET /{entity}/`).
    pub async fn list(&self, entity: &EntityType) -> Result<Vec<Record>, GatewayError> {
        self.call(ApiRequest::get(format!("/{}/", entity))).await
    }

    /// One record (`GET /{entity}/{id}`); `None` on 404.
    pub async fn fetch(
        &self,
        entity: &EntityType,
        id: &RecordId,
    ) -> Result<Option<Record>, GatewayError> {
        match self
            .call(ApiRequest::get(format!("/{}/{}", entity, id)))
            .await
        {
            Ok(record) => Ok(Some(record)),
            Err(GatewayError::Application { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check whether the service answers at `path` (resolved against the server root).
    ///
    /// Any answer, even an error status, counts as reachable.
    pub async fn probe(&self, path: &str) -> bool {
        match self.gateway.send(ApiRequest::get(path).at_root()).await {
            Ok(_) => true,
            Err(e) => !e.is_connectivity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Method, MockGateway};
    use novaclub_sync_types::Timestamp;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn api() -> (MockGateway, RemoteApi<MockGateway>) {
        let gateway = MockGateway::new();
        (gateway.clone(), RemoteApi::new(Arc::new(gateway)))
    }

    fn members() -> EntityType {
        EntityType::new("members").unwrap()
    }

    #[tokio::test]
    async fn push_decodes_rich_results() {
        let (gateway, api) = api();
        gateway.respond(
            "/sync/push",
            json!({
                "results": {
                    "success": [{"entity": "members", "id": "m-1", "action": "created"}],
                    "errors": [{"entity": "members", "id": "m-2", "error": "invalid email"}]
                },
                "sync_timestamp": "2024-01-15T10:30:00.123456"
            }),
        );

        let response = api.push(&PushRequest::default()).await.unwrap();
        assert_eq!(response.results.success.len(), 1);
        assert_eq!(response.results.errors[0].error, "invalid email");
        assert!(response.sync_timestamp.is_some());

        let sent = gateway.last_request().unwrap();
        assert_eq!(sent.request.method, Method::Post);
        assert_eq!(sent.request.path, "/sync/push");
    }

    #[tokio::test]
    async fn pull_sends_null_for_first_sync() {
        let (gateway, api) = api();
        gateway.respond(
            "/sync/pull",
            json!({
                "changes": {"members": [{"data": {"id": "m-1", "first_name": "Aiko"}}]},
                "sync_timestamp": "2024-01-15T10:30:00"
            }),
        );

        let mut watermarks = BTreeMap::new();
        watermarks.insert(members(), None::<Timestamp>);
        let response = api.pull(&PullRequest { watermarks }).await.unwrap();
        assert_eq!(response.record_count(), 1);

        let body = gateway.last_request().unwrap().request.body.unwrap();
        assert_eq!(body, json!({"members": null}));
    }

    #[tokio::test]
    async fn login_posts_json_credentials() {
        let (gateway, api) = api();
        gateway.respond(
            "/auth/login",
            json!({"access_token": "tok", "token_type": "bearer"}),
        );

        let token = api.login("sensei@dojo.fr", "s3cret").await.unwrap();
        assert_eq!(token.access_token, "tok");
        assert!(gateway.token().is_none(), "login does not set the token");

        let body = gateway.last_request().unwrap().request.body.unwrap();
        assert_eq!(body, json!({"email": "sensei@dojo.fr", "password": "s3cret"}));
    }

    #[tokio::test]
    async fn list_and_fetch_use_crud_paths() {
        let (gateway, api) = api();
        gateway.respond("/members/", json!([{"id": "m-1"}, {"id": "m-2"}]));
        gateway.respond("/members/m-1", json!({"id": "m-1", "first_name": "Aiko"}));

        assert_eq!(api.list(&members()).await.unwrap().len(), 2);
        let record = api
            .fetch(&members(), &RecordId::new("m-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.field("first_name"), Some(&json!("Aiko")));

        // Unscripted path answers 404.
        assert!(api
            .fetch(&members(), &RecordId::new("m-404"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let (gateway, api) = api();
        gateway.respond("/auth/me", json!({"unexpected": true}));

        let err = api.whoami().await.unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn probe_treats_only_connectivity_as_unreachable() {
        let (gateway, api) = api();
        gateway.respond("/health", json!({"status": "ok"}));
        gateway.fail_next("/health", GatewayError::Connectivity("refused".into()));

        assert!(api.probe("/health").await);
        assert!(!api.probe("/health").await);
        // Unscripted: 404 still proves the server answered.
        assert!(api.probe("/health").await);
        assert!(gateway.requests().iter().all(|r| r.request.root));
    }
}
