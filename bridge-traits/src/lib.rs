//! # Bridge Traits
//!
//! Service abstractions and the shared origin data model.
//!
//! This crate defines the seams the rest of the workspace is built against:
//!
//! - **HTTP** (`http`): the [`HttpClient`] trait with request/response types
//!   and the [`RetryPolicy`] used by the origin connector.
//! - **Time** (`time`): the [`Clock`] trait for injectable time.
//! - **Origin model** (`origin`): [`Record`], [`ObjectSpec`], [`IdSet`] and
//!   the [`RecordSource`] trait implemented by origin API connectors.
//!
//! Implementations live in `bridge-native` (reqwest) and `provider-hubspot`.

pub mod error;
pub mod http;
pub mod origin;
pub mod time;

pub use error::{BridgeError, Result};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use origin::{
    IdPage, IdSet, ObjectSpec, Record, RecordPage, RecordSource, SearchPage, TimeRange,
};
pub use time::{Clock, SystemClock};
