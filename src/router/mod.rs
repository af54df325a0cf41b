//! HTTP router module
//!
//! Wires the session, execute, file, git, port, and process handlers into
//! a single axum `Router`, under the permissive CORS policy the broker
//! runs with inside its container: the orchestrator is the only expected
//! caller, reached over a private network.

pub mod handlers;
pub mod sse;
pub mod state;

pub use state::AppState;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router with all routes
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Sessions
        .route("/session/create", post(handlers::session::create))
        .route("/session/list", get(handlers::session::list))

        // Command execution
        .route("/execute", post(handlers::execute::execute))
        .route("/execute/stream", post(handlers::execute::execute_stream))

        // Git
        .route("/git/checkout", post(handlers::git::checkout))
        .route("/git/branch", get(handlers::git::branch))
        .route("/git/branches", get(handlers::git::branches))

        // Files
        .route("/mkdir", post(handlers::files::mkdir))
        .route("/write", post(handlers::files::write))
        .route("/read", post(handlers::files::read))
        .route("/delete", post(handlers::files::delete))
        .route("/rename", post(handlers::files::rename))
        .route("/move", post(handlers::files::move_file))
        .route("/list-files", post(handlers::files::list_files))

        // Ports
        .route("/expose-port", post(handlers::port::expose))
        .route("/unexpose-port", delete(handlers::port::unexpose))
        .route("/exposed-ports", get(handlers::port::list))

        // Background processes
        .route("/process/start", post(handlers::process::start))
        .route("/process/list", get(handlers::process::list))
        .route("/process/kill-all", delete(handlers::process::kill_all))
        .route("/process/:id", get(handlers::process::get))
        .route("/process/:id", delete(handlers::process::kill))
        .route("/process/:id/logs", get(handlers::process::logs))
        .route("/process/:id/stream", get(handlers::process::stream))

        // Liveness
        .route("/ping", get(handlers::ping::ping))
        .route("/health", get(handlers::ping::health));

    Router::new()
        .nest("/api", api_routes)
        // Reverse proxy lives outside `/api`, per the external interface
        // table's `ANY /proxy/{port}/{rest…}`.
        .route("/proxy/:port", axum::routing::any(handlers::port::passthrough_root))
        .route("/proxy/:port/*rest", axum::routing::any(handlers::port::passthrough))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
