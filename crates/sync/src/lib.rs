//! Rota sync library.
//!
//! Imports customers and deals from the Ploomes CRM, resolves customer
//! addresses to coordinates and serves the dashboard API.
//!
//! # Pipeline
//!
//! ```text
//! BatchDriver -> GeocodeRequest (normalized address)
//!             -> GeocodingCache -> ProviderChain (Google, Nominatim, estimator)
//!             -> PersistenceWriter (write, read back, verify)
//!             -> checkpoint / backup / report files
//! ```
//!
//! Everything talks to storage through the traits in [`store`]:
//! [`db::PgStore`] in production, [`memory::MemoryStore`] in tests.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod batch;
pub mod config;
pub mod db;
pub mod geocoding;
pub mod job;
pub mod memory;
pub mod ploomes;
pub mod store;
pub mod sync;
pub mod writer;
