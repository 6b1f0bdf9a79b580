//! HTTP host for the privileged runtime channel (native only).

mod routes;

pub use routes::{create_router, create_router_with_name, serve, AppState};
