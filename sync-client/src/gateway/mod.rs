//! Network gateway abstraction for novaclub sync.
//!
//! The gateway sends JSON requests to the remote service and classifies
//! every failure into a [`GatewayError`]:
//!
//! - `Unauthorized`: the bearer token was refused; the gateway drops it
//! - `Application`: the server answered with an error status
//! - `Connectivity`: the request never got an answer
//!
//! # Example
//!
//! ```ignore
//! let gateway = MockGateway::new();
//! gateway.respond("/auth/me", json!({"id": "u-1", "email": "a@b.c"}));
//! let profile = gateway.send(ApiRequest::get("/auth/me")).await?;
//! ```

mod http;
mod mock;

pub use http::HttpGateway;
pub use mock::{MockGateway, RecordedRequest};

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::error::GatewayError;

/// HTTP method of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A request to the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API base (or to the server root if `root`).
    pub path: String,
    /// JSON body.
    pub body: Option<Value>,
    /// Resolve `path` against the server root instead of the API base.
    pub root: bool,
}

impl ApiRequest {
    /// A GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            root: false,
        }
    }

    /// A POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
            root: false,
        }
    }

    /// Resolve the path against the server root (health checks).
    pub fn at_root(mut self) -> Self {
        self.root = true;
        self
    }
}

/// Gateway trait for talking to the remote service.
///
/// Implementations attach the bearer token when one is set, and clear it
/// when the server answers 401.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send a request and return the decoded JSON body (`Null` if empty).
    async fn send(&self, request: ApiRequest) -> Result<Value, GatewayError>;

    /// Set or clear the bearer token.
    fn set_token(&self, token: Option<String>);

    /// Current bearer token.
    fn token(&self) -> Option<String>;
}
