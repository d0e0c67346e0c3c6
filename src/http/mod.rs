//! HTTP API surface: protected routes and the rate limit gate in front of them.

mod gate;
pub mod routes;
mod server;

pub use gate::{enforce, too_many_requests, AuthenticatedUser, RouteGate};
pub use routes::AppState;
pub use server::{build_router, HttpServer};
