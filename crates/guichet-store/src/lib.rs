//! # guichet-store
//!
//! SQLite persistence for the Guichet server.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model.  Every helper takes the organization id and scopes its query by
//! it; there is no way to read another tenant's rows through this API.

pub mod campaigns;
pub mod contacts;
pub mod conversations;
pub mod database;
pub mod enrollments;
pub mod integrations;
pub mod lists;
pub mod messages;
pub mod migrations;
pub mod organizations;
pub mod properties;
pub mod tasks;
pub mod templates;
pub mod users;
pub mod workflows;

mod convert;
mod error;

pub use database::Database;
pub use error::StoreError;
