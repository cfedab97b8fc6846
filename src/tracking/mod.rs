pub mod bot;
pub mod engine;
pub mod error;
pub mod geoip;
pub mod ip_extractor;
pub mod models;

pub use engine::TrackingEngine;
pub use error::{TrackError, TrackResult};
pub use geoip::GeoResolver;
pub use ip_extractor::resolve_client_address;
pub use models::{Beacon, EventKind, IgnoreReason, TrackOutcome, TrackingEvent, TrackingRequest};
