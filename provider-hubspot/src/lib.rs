//! # HubSpot Provider
//!
//! Implements the `RecordSource` trait for the HubSpot CRM v3 API.
//!
//! ## Overview
//!
//! This module provides:
//! - Cursor-paginated object listing (full loads and id-only projections)
//! - Filtered search over the last-modified property with `GTE`/`LT`
//!   operators (the windowed incremental path)
//! - Batch read/create endpoints (≤100 inputs per call)
//! - Rate-limit handling: `Retry-After` on 429, exponential backoff on
//!   5xx and transport errors, immediate failure on other 4xx
//! - Bearer-token authentication via the injected `HttpClient`

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{HubSpotConnector, BATCH_LIMIT, PAGE_LIMIT};
pub use error::{ErrorKind, HubSpotError, Result};
