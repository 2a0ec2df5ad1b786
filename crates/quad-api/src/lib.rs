pub mod admin;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod requests;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, AppStateInner};
