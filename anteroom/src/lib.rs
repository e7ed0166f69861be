//! # anteroom: role-aware access control for a multi-tenant dashboard
//!
//! `anteroom` sits in front of a dashboard whose routes are split into a
//! public surface and a protected area with an admin-only section. It decides,
//! for every navigation, whether the visitor may see the requested page, and
//! where to send them instead when they may not.
//!
//! ## Overview
//!
//! Authentication state lives in an external identity and profile store,
//! reached through the [`store::IdentityStore`] trait. A user's role (`user`
//! or `admin`) can be cached in the session identity's metadata bag or read
//! from the durable profile record; the [`auth::resolver`] module reconciles
//! the two with a metadata-first fast path and a lazy write-back.
//!
//! Admission itself is a pure function of role and path, implemented once in
//! [`auth::policy`] and enforced twice:
//!
//! - **request-time**: [`auth::middleware`] runs before routing and either
//!   forwards the request or answers with a 307 redirect. Store failures fail
//!   closed towards the sign-in page.
//! - **client-time**: [`client`] watches one protected path for a browser
//!   tab, re-resolving on every auth state change published by the store and
//!   exposing `Loading` / `Authorized` / `Redirecting` through a watch
//!   channel. Stale resolution passes are discarded by generation, so a slow
//!   store response can never overwrite a newer decision.
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); the bundled
//! [`store::InMemoryStore`] backend makes the whole crate runnable without
//! external services.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use anteroom::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = anteroom::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     anteroom::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use auth::middleware::route_guard_middleware;
use auth::policy::RoutePolicy;
use axum::http::HeaderValue;
use axum::{
    http,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router, ServiceExt,
};
use bon::Builder;
pub use config::Config;
use store::{IdentityStore, InMemoryStore};
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, instrument, Level};

pub use types::UserId;

/// Application state shared across all request handlers.
///
/// One instance per running guard deployment: the store handle, the loaded
/// configuration, and the admission policy frozen from it.
#[derive(Clone, Builder)]
pub struct AppState {
    pub store: Arc<dyn IdentityStore>,
    pub config: Config,
    pub policy: RoutePolicy,
}

/// Build an in-memory store populated with the configured seed accounts.
pub fn build_seeded_store(config: &Config) -> anyhow::Result<InMemoryStore> {
    let store = InMemoryStore::with_session_ttl(config.session.timeout);
    for seed in &config.seed_users {
        let id = store.sign_up(&seed.email, &seed.username, &seed.password)?;
        store.set_profile_role(id, &seed.role);
    }
    Ok(store)
}

/// Create CORS layer from configuration. With no explicit origins configured,
/// the dashboard itself is the one allowed origin.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    if config.cors.allowed_origins.is_empty() {
        origins.push(config.dashboard_url.origin().ascii_serialization().parse::<HeaderValue>()?);
    }
    for origin in &config.cors.allowed_origins {
        origins.push(origin.parse::<HeaderValue>()?);
    }

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    Ok(cors)
}

/// Build the application router: authentication endpoints, the dashboard
/// pages the policy points at, and a health endpoint. The route guard is NOT
/// part of this router; it is layered around it at serve time so it runs
/// before path matching.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let routes = &state.config.routes;

    // Authentication routes (at root level)
    let auth_routes = Router::new()
        .route("/authentication/login", post(api::handlers::auth::login))
        .route("/authentication/logout", post(api::handlers::auth::logout))
        .route("/authentication/me", get(api::handlers::auth::me))
        .with_state(state.clone());

    // The pages every policy decision can land on. Paths come from config so
    // they always line up with the redirect targets.
    let page_routes = Router::new()
        .route(&routes.sign_in_path, get(api::handlers::pages::sign_in_page))
        .route(&routes.protected_prefix, get(api::handlers::pages::dashboard_redirector))
        .route(&routes.user_home, get(api::handlers::pages::user_dashboard))
        .route(&routes.admin_home, get(api::handlers::pages::admin_dashboard))
        .route(
            &format!("{}/users", routes.admin_home.trim_end_matches('/')),
            get(api::handlers::pages::admin_users_page),
        )
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(auth_routes)
        .merge(page_routes);

    let cors_layer = create_cors_layer(&state.config)?;
    let router = router.layer(cors_layer);

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] builds the store, the admission policy
///    and the router
/// 2. **Serve**: [`Application::serve`] binds a TCP port, layers the route
///    guard around the router and handles requests until shutdown
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn IdentityStore> = Arc::new(build_seeded_store(&config)?);
        let policy = RoutePolicy::new(&config.routes);
        policy.validate()?;

        let app_state = AppState::builder().store(store).config(config.clone()).policy(policy).build();
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Access-control layer listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        // Apply the guard before path matching
        let middleware = from_fn_with_state(self.app_state, route_guard_middleware);
        let service = middleware.layer(self.router);

        // Run the server with graceful shutdown
        axum::serve(listener, service.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
