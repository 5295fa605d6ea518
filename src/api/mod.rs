pub mod handlers;
pub mod server;

pub use handlers::{ApiError, AppState};
pub use server::{build_router, build_state, record_request_timing, run_server, UNMATCHED_ROUTE};
