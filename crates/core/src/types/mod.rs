//! Core types for Rota.
//!
//! This module provides type-safe wrappers for the domain concepts shared by
//! the sync pipeline, the CLI and the HTTP API.

pub mod address;
pub mod coordinates;
pub mod customer;
pub mod id;
pub mod postal_code;
pub mod sale;
pub mod state;
pub mod status;
pub mod sync_log;

pub use address::{AddressParts, COUNTRY, normalize_address};
pub use coordinates::{BRAZIL, BoundingBox, COORDINATE_TOLERANCE, Coordinates, EARTH_RADIUS_KM};
pub use customer::{Customer, GeocodingUpdate};
pub use id::*;
pub use postal_code::{PostalCode, PostalCodeError, normalize_postal_code};
pub use sale::{Sale, SalesSummary};
pub use state::{STATES, fold_name, state_code};
pub use status::*;
pub use sync_log::SyncLog;
