//! # guichet-shared
//!
//! Types and pure logic shared between the Guichet server and client crates.
//!
//! Everything here is transport-agnostic: domain models, the segment
//! resolver, template variable handling, dispatch validation, realtime
//! event payloads and the signed token formats.  Neither side should have
//! to reimplement any of these rules.

pub mod constants;
pub mod dispatch;
pub mod events;
pub mod models;
pub mod segment;
pub mod template;
pub mod token;
pub mod types;

mod error;

pub use error::SharedError;
pub use models::*;
pub use types::*;
