//! Request pipeline for the EquityCompass REST API
//!
//! Every backend call goes through [`ApiClient`]: bearer-token injection,
//! envelope unwrapping, error normalization and global 401 handling.

mod client;
pub mod types;

pub use client::{Anonymous, ApiClient, AuthHooks};
pub use reqwest::Method;
pub use types::*;
