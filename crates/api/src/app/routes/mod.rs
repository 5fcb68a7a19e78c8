use crate::route::Route;

pub mod system;
pub mod tasks;

/// Routes every server carries ahead of caller-supplied ones.
pub fn app_routes() -> Vec<Route> {
    let mut routes = vec![system::status()];
    routes.extend(tasks::routes());
    routes
}
