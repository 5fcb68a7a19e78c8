//! Server composition: route table + task registry in one axum process.
//!
//! Lifecycle: `Constructed → Initialized → Listening`. [`Server::new`] runs
//! the initialisation steps (application routes, `GET /routes`, task
//! registration); middleware and the route table are mounted when the server
//! starts listening. The route table is frozen from then on.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use axum::http::Method;
use axum::routing::{MethodFilter, any};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use jobba_core::{RegistryError, TaskDescriptor, TaskRegistry};
use jobba_engine::QueueEngine;

use crate::app;
use crate::config::ServerConfig;
use crate::context::{AppContext, ServerInfo};
use crate::route::{Handler, Route, RouteInfo};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already listening; routes can no longer be registered")]
    AlreadyListening,

    #[error("server was already started")]
    AlreadyStarted,

    #[error("invalid route {method} {path}: {reason}")]
    InvalidRoute {
        method: Method,
        path: String,
        reason: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Constructed,
    Initialized,
    Listening,
}

struct State {
    phase: Phase,
    routes: Vec<Route>,
}

pub struct Server {
    config: ServerConfig,
    tasks: TaskRegistry,
    state: Mutex<State>,
}

impl Server {
    /// Build and initialise a server.
    ///
    /// Registers, in order: the application routes (`GET /` and the task
    /// endpoints), `routes`, the synthetic `GET /routes`, then every task in
    /// `tasks`.
    pub async fn new(
        config: ServerConfig,
        engine: Arc<dyn QueueEngine>,
        routes: Vec<Route>,
        tasks: Vec<TaskDescriptor>,
    ) -> Result<Self, ServerError> {
        info!("initializing server");
        let server = Self {
            config,
            tasks: TaskRegistry::new(engine),
            state: Mutex::new(State {
                phase: Phase::Constructed,
                routes: Vec::new(),
            }),
        };

        info!("registering routes");
        for route in app::routes::app_routes().into_iter().chain(routes) {
            server.register(route)?;
        }
        server.register(app::routes::system::route_table())?;

        info!("registering tasks");
        for task in tasks {
            server.tasks.register_task(task).await?;
        }

        server.lock().phase = Phase::Initialized;
        Ok(server)
    }

    /// Append `route` to the route table.
    ///
    /// Paths the router could not mount next to the routes already in the
    /// table (e.g. `/tasks/:name` beside `/tasks/:task/jobs`) are rejected
    /// with [`ServerError::InvalidRoute`].
    pub fn register(&self, route: Route) -> Result<(), ServerError> {
        let mut state = self.lock();
        if state.phase == Phase::Listening {
            return Err(ServerError::AlreadyListening);
        }
        validate(&route, &state.routes)?;
        state.routes.push(route);
        Ok(())
    }

    /// Append a route given as a bare path, method and handler.
    pub fn register_path(
        &self,
        path: impl Into<String>,
        method: Method,
        handler: Handler,
    ) -> Result<(), ServerError> {
        self.register(Route {
            path: path.into(),
            method,
            description: String::new(),
            handler,
        })
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// The route table in registration order, handlers omitted.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.lock().routes.iter().map(Route::info).collect()
    }

    /// Mount the current route table behind body parsing and context
    /// injection.
    pub fn router(&self) -> Router {
        let routes = self.lock().routes.clone();
        let ctx = AppContext {
            server: ServerInfo::new(routes.iter().map(Route::info).collect(), self.config.clone()),
            tasks: self.tasks.clone(),
        };
        app::mount(&routes, ctx, self.config.body_limit)
    }

    /// Bind `host:port` from the config and serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.address()).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// Only one call per server succeeds; later calls fail with
    /// [`ServerError::AlreadyStarted`].
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = {
            let mut state = self.lock();
            if state.phase == Phase::Listening {
                return Err(ServerError::AlreadyStarted);
            }
            state.phase = Phase::Listening;
            drop(state);
            self.router()
        };

        info!(address = %listener.local_addr()?, "listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("server stopped");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate(route: &Route, existing: &[Route]) -> Result<(), ServerError> {
    let invalid = |reason: String| ServerError::InvalidRoute {
        method: route.method.clone(),
        path: route.path.clone(),
        reason,
    };

    if !route.path.starts_with('/') {
        return Err(invalid("path must start with `/`".to_string()));
    }
    if MethodFilter::try_from(route.method.clone()).is_err() {
        return Err(invalid("unsupported method".to_string()));
    }
    if existing.iter().any(|r| r.path == route.path) {
        return Ok(());
    }

    // axum panics on paths its router cannot hold together; try the
    // resulting path set on a scratch router first.
    let mut paths: Vec<&str> = Vec::with_capacity(existing.len() + 1);
    for path in existing.iter().map(|r| r.path.as_str()).chain([route.path.as_str()]) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    let mounted = panic::catch_unwind(AssertUnwindSafe(|| {
        paths
            .iter()
            .fold(Router::<()>::new(), |router, path| {
                router.route(path, any(|| async {}))
            })
    }));

    match mounted {
        Ok(_) => Ok(()),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "conflicts with a registered path".to_string());
            Err(invalid(reason))
        }
    }
}
