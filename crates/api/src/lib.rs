//! HTTP API: server, routing, and request/response mapping.
//!
//! [`Server`] composes a route table with a [`jobba_core::TaskRegistry`] into
//! one axum application. Handlers receive an explicit [`RequestContext`]
//! carrying the registry, the server's route table and the parsed request.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
pub mod route;
pub mod server;

pub use config::ServerConfig;
pub use context::{AppContext, RequestContext, ServerInfo};
pub use route::{Handler, Route, RouteInfo};
pub use server::{Server, ServerError};
