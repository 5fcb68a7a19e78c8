use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde_json::Value;

use jobba_core::TaskRegistry;

use crate::app::errors::json_error;
use crate::config::ServerConfig;
use crate::route::RouteInfo;

/// Read-only view of the server a request is handled by.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    routes: Arc<Vec<RouteInfo>>,
    config: Arc<ServerConfig>,
}

impl ServerInfo {
    pub fn new(routes: Vec<RouteInfo>, config: ServerConfig) -> Self {
        Self {
            routes: Arc::new(routes),
            config: Arc::new(config),
        }
    }

    /// The route table as registered, in registration order.
    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Per-application context attached to every request by the context
/// injection middleware.
#[derive(Clone)]
pub struct AppContext {
    pub server: ServerInfo,
    pub tasks: TaskRegistry,
}

/// Request body after body parsing: JSON as-is, text as a string, empty or
/// anything else as `null`.
#[derive(Debug, Clone, Default)]
pub struct ParsedBody(pub Value);

/// Everything a route handler gets for one request.
#[derive(Clone)]
pub struct RequestContext {
    pub server: ServerInfo,
    pub tasks: TaskRegistry,
    /// Path parameters (`/tasks/:task` → `task`).
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
}

impl RequestContext {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Deserialize the parsed body, answering 400 when it does not fit `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, Response> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string())
        })
    }
}
