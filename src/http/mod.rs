//! HTTP surface: admission control, authentication, request logging and
//! statistics endpoints.

mod addr;
mod auth;
mod error;
mod handlers;
mod middleware;
mod server;
mod state;

pub use addr::{client_address, ClientAddr, UNKNOWN_SOURCE};
pub use auth::{require_basic_auth, SessionAuth, CSRF_HEADER, SESSION_COOKIE};
pub use middleware::admission;
pub use server::{router, HttpServer};
pub use state::{AppState, Credentials};
