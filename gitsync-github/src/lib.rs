//! gitsync GitHub - access tokens for the sync pipeline
//!
//! This crate implements [`gitsync_core::TokenProvider`] on top of octocrab:
//! installation tokens for a GitHub App, or a fixed personal access token.

mod client;
mod error;

pub use client::{AppAuthConfig, AppTokenProvider, StaticTokenProvider, TokenAuthConfig};
pub use error::{Error, Result};
