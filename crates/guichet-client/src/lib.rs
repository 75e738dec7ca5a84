//! # guichet-client
//!
//! Dashboard-side engine for Guichet: a typed HTTP client for the API
//! server, the screen router, the optimistic inbox cache and the realtime
//! subscription with its reconnect policy.
//!
//! The crate is UI-agnostic.  A frontend owns one [`state::AppState`],
//! calls the `ops` functions for remote work, feeds [`realtime::SyncUpdate`]s
//! into the inbox, and renders whatever [`session::Screen`] the router says.

pub mod api;
pub mod config;
pub mod inbox;
pub mod ops;
pub mod realtime;
pub mod session;
pub mod state;

mod error;

pub use api::ApiClient;
pub use config::ClientConfig;
pub use error::ClientError;
