//! Route table entries.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use axum::response::{IntoResponse, Response};
use serde::{Serialize, Serializer};

use jobba_engine::BoxFuture;

use crate::context::RequestContext;

/// Type-erased request handler.
pub type Handler = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Response> + Send + Sync>;

/// One entry of the server's route table.
#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub method: Method,
    /// Informational; served verbatim by `GET /routes`.
    pub description: String,
    pub handler: Handler,
}

impl Route {
    pub fn new<F, Fut, R>(method: Method, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        let handler: Handler = Arc::new(
            move |ctx: RequestContext| -> BoxFuture<'static, Response> {
                let fut = f(ctx);
                Box::pin(async move { fut.await.into_response() })
            },
        );

        Self {
            path: path.into(),
            method,
            description: String::new(),
            handler,
        }
    }

    pub fn get<F, Fut, R>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Self::new(Method::GET, path, f)
    }

    pub fn post<F, Fut, R>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Self::new(Method::POST, path, f)
    }

    pub fn put<F, Fut, R>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Self::new(Method::PUT, path, f)
    }

    pub fn delete<F, Fut, R>(path: impl Into<String>, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Self::new(Method::DELETE, path, f)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn info(&self) -> RouteInfo {
        RouteInfo {
            path: self.path.clone(),
            method: self.method.clone(),
            description: self.description.clone(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Route table entry as served by `GET /routes` (handler omitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub path: String,
    #[serde(serialize_with = "method_name")]
    pub method: Method,
    pub description: String,
}

fn method_name<S: Serializer>(method: &Method, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(method.as_str())
}
