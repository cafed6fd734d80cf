//! # Native Bridge Implementations
//!
//! Production implementations of the `bridge-traits` abstractions for a
//! plain server/CLI process: a reqwest-backed [`HttpClient`].
//!
//! [`HttpClient`]: bridge_traits::http::HttpClient

pub mod http;

pub use http::ReqwestHttpClient;
