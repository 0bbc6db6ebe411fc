//! HTTP surface the transport bridge delivers events through

pub mod handlers;
pub mod models;
pub mod routes;

pub use handlers::AppState;
pub use models::{ApiError, EventPayload, EventRequest, EventResponse};
pub use routes::{build_router, TOKEN_HEADER};
