//! The application context.
//!
//! An [`App`] owns everything the framework needs for one application:
//! configuration, the model registry, the relational store and the router.
//! It is built once at startup; [`App::wake`] then migrates and serves.

use crate::config::Config;
use crate::core::{BootError, MigrationError, RegistrationError};
use crate::migration::{self, MigrationOutcome, MigrationReport};
use crate::model::{Model, ModelRegistry};
use crate::store::RelationalStore;
use crate::web::lifecycle::{Runtime, lifecycle};
use axum::Router;
use axum::handler::Handler;
use axum::middleware;
use axum::routing::{self, MethodRouter};
use http::Method;
use std::fmt::{self, Write as _};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const BANNER: &str = concat!("\n  LEVIATHAN ", env!("CARGO_PKG_VERSION"), "\n\n");

/// One listed route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
    pub handler: &'static str,
}

pub struct App {
    config: Config,
    registry: ModelRegistry,
    store: Arc<dyn RelationalStore>,
    router: Router,
    routes: Vec<RouteInfo>,
}

impl App {
    pub fn new(config: Config, store: impl RelationalStore + 'static) -> Self {
        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(config: Config, store: Arc<dyn RelationalStore>) -> Self {
        Self {
            config,
            registry: ModelRegistry::new(),
            store,
            router: Router::new(),
            routes: Vec::new(),
        }
    }

    /// Registers a batch of models; see [`ModelRegistry::register`].
    pub fn register<I>(mut self, models: I) -> Result<Self, RegistrationError>
    where
        I: IntoIterator<Item = Arc<dyn Model>>,
    {
        self.registry.register(models)?;
        Ok(self)
    }

    /// Adds an unlisted route.
    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.router = self.router.route(path, method_router);
        self
    }

    pub fn get<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.listed(Method::GET, path, std::any::type_name::<H>(), routing::get(handler))
    }

    pub fn post<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.listed(Method::POST, path, std::any::type_name::<H>(), routing::post(handler))
    }

    pub fn put<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.listed(Method::PUT, path, std::any::type_name::<H>(), routing::put(handler))
    }

    pub fn patch<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.listed(
            Method::PATCH,
            path,
            std::any::type_name::<H>(),
            routing::patch(handler),
        )
    }

    pub fn delete<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.listed(
            Method::DELETE,
            path,
            std::any::type_name::<H>(),
            routing::delete(handler),
        )
    }

    fn listed(
        mut self,
        method: Method,
        path: &str,
        handler: &'static str,
        method_router: MethodRouter,
    ) -> Self {
        self.routes.push(RouteInfo {
            method,
            path: path.to_string(),
            handler,
        });
        self.route(path, method_router)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn RelationalStore> {
        Arc::clone(&self.store)
    }

    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    /// Every route wrapped in the request lifecycle, inside an HTTP trace span.
    pub fn router(&self) -> Router {
        let runtime = Arc::new(Runtime::new(&self.config, Arc::clone(&self.store)));
        self.router
            .clone()
            .layer(middleware::from_fn_with_state(runtime, lifecycle))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn migrate(&self) -> Result<MigrationReport, MigrationError> {
        migration::migrate_up(self.store.as_ref(), &self.registry).await
    }

    pub async fn migrate_down(
        &self,
        table: &str,
        to: u32,
    ) -> Result<MigrationOutcome, MigrationError> {
        migration::migrate_down(self.store.as_ref(), &self.registry, table, to).await
    }

    /// Runs additive schema sync for every table model.
    pub async fn auto_migrate(&self) -> Result<(), MigrationError> {
        for model in self.registry.tables() {
            migration::auto_migrate(self.store.as_ref(), model.as_ref()).await?;
        }
        Ok(())
    }

    /// Boot listing of routes, sorted by path.
    pub fn route_listing(&self) -> String {
        let mut routes: Vec<&RouteInfo> = self.routes.iter().collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));

        let mut out = String::from("ROUTES\n\n");
        for route in routes {
            let _ = writeln!(
                out,
                "{:>8} {} --> {}",
                route.method.as_str(),
                route.path,
                route.handler
            );
        }
        out.push('\n');
        out
    }

    /// Validates the configuration, migrates, then serves until shutdown.
    ///
    /// Every error is fatal to the boot and returned to the caller.
    pub async fn wake(self) -> Result<(), BootError> {
        self.config.validate()?;
        print!("{BANNER}");

        let report = self.migrate().await?;
        info!(
            tables = self.registry.tables().len(),
            steps = report.applied_steps(),
            "migrations complete"
        );
        if self.config.auto_migrate {
            self.auto_migrate().await?;
        }

        print!("{}", self.registry.listing());
        print!("{}", self.route_listing());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await?;
        println!("WOKE :{}\n", self.config.port);
        info!(address = %addr, production = self.config.production, "listening");

        axum::serve(
            listener,
            self.router().into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("shut down");
        Ok(())
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
