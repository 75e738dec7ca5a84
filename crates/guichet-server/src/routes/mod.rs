//! Endpoint handlers, one module per domain area.

pub mod auth;
pub mod campaigns;
pub mod contacts;
pub mod conversations;
pub mod events;
pub mod lists;
pub mod orgs;
pub mod tasks;
pub mod templates;
pub mod workflows;
