pub mod access;
pub mod error;
pub mod reports;
pub mod routes;
pub mod tracking;

use std::sync::Arc;

use crate::access::AccessGate;
use crate::cursor::CursorSigner;
use crate::storage::Storage;
use crate::tracking::TrackingEngine;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub engine: Arc<TrackingEngine>,
    pub gate: Arc<AccessGate>,
    pub cursor: CursorSigner,
}
