//! Rota Core - Shared types library.
//!
//! This crate provides the domain types used across all Rota components:
//! - `sync` - CRM import, geocoding pipeline and HTTP API
//! - `cli` - Command-line entry points for the batch jobs
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! database access, no HTTP clients. The `postgres` feature adds `sqlx`
//! encoding for the newtypes.
//!
//! # Modules
//!
//! - [`types`] - Ids, postal codes, address normalization, coordinates,
//!   states, customers, sales and sync logs
//! - [`routing`] - Haversine tours over a set of stops (nearest neighbour
//!   plus 2-opt) and travel time estimates

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod routing;
pub mod types;

pub use types::*;
