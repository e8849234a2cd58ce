//! Tollgate library crate.
//!
//! Provides an OAuth 2.0 authorization server core: token and client stores,
//! grant policy evaluation, local or remote bearer token verification and
//! organization claims merged into token responses.

pub mod config;
pub mod directory;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod storage;
