//! HTTP application wiring (axum router built from the route table).
//!
//! - `routes/`: built-in routes (status check, route table, task endpoints)
//! - `dispatch.rs`: first-match resolution over the route table
//! - `dto.rs`: request/response DTOs and parsing helpers
//! - `errors.rs`: consistent error responses

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::Query,
    http::{Method, StatusCode, Uri},
    response::Response,
    routing::on,
};
use tower::ServiceBuilder;

use crate::context::{AppContext, ParsedBody, RequestContext};
use crate::middleware;
use crate::route::Route;

use dispatch::{Dispatcher, Resolved};
use errors::json_error;

pub mod dispatch;
pub mod dto;
pub mod errors;
pub mod routes;

/// Mount `table` as an axum router behind the body-parsing and context
/// injection middleware.
///
/// Every request is answered by the first route, in table order, whose
/// method and path pattern match; a route registered later never shadows an
/// earlier one, whatever axum's own path priorities. When the same
/// `(method, path)` pair appears more than once the first registration wins
/// and later ones are skipped.
pub fn mount(table: &[Route], ctx: AppContext, body_limit: usize) -> Router {
    let dispatcher = Arc::new(Dispatcher::new(table));

    let mut router = Router::new();
    if let Some(filter) = dispatcher.methods() {
        for path in dispatcher.paths() {
            router = router.route(path, on(filter, endpoint(dispatcher.clone())));
        }
    }

    router.layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn_with_state(
                body_limit,
                middleware::body_parser,
            ))
            .layer(axum::middleware::from_fn_with_state(
                ctx,
                middleware::inject_context,
            )),
    )
}

/// Adapt the dispatcher to an axum handler: resolve the route, then collect
/// the request pieces the middleware attached into an explicit
/// [`RequestContext`].
fn endpoint(
    dispatcher: Arc<Dispatcher>,
) -> impl Fn(
    Extension<AppContext>,
    Extension<ParsedBody>,
    Method,
    Uri,
    Query<HashMap<String, String>>,
) -> jobba_engine::BoxFuture<'static, Response>
+ Clone
+ Send
+ Sync
+ 'static {
    move |Extension(app): Extension<AppContext>,
          Extension(ParsedBody(body)): Extension<ParsedBody>,
          method: Method,
          uri: Uri,
          Query(query): Query<HashMap<String, String>>|
          -> jobba_engine::BoxFuture<'static, Response> {
        let (handler, params) = match dispatcher.resolve(&method, uri.path()) {
            Resolved::Found { handler, params } => (handler.clone(), params),
            Resolved::MethodNotAllowed => {
                let res = json_error(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "method_not_allowed",
                    format!("{method} is not allowed on {}", uri.path()),
                );
                return Box::pin(async move { res });
            }
            Resolved::NotFound => {
                let res = json_error(StatusCode::NOT_FOUND, "not_found", uri.path().to_string());
                return Box::pin(async move { res });
            }
        };

        handler(RequestContext {
            server: app.server,
            tasks: app.tasks,
            params,
            query,
            body,
        })
    }
}
