use axum::Json;

use crate::context::RequestContext;
use crate::route::{Route, RouteInfo};

/// `GET /`: liveness check.
pub fn status() -> Route {
    Route::get("/", |_ctx| async { Json(true) }).describe("Status check.")
}

/// `GET /routes`: the registered route table, handlers omitted.
pub fn route_table() -> Route {
    Route::get("/routes", list_routes).describe("Lists every registered route.")
}

async fn list_routes(ctx: RequestContext) -> Json<Vec<RouteInfo>> {
    Json(ctx.server.routes().to_vec())
}
