//! Remote operations, one module per domain area.
//!
//! Every function takes the [`ApiClient`](crate::ApiClient) it should call
//! through, stays free of client-side state, and returns the shared model
//! structs the server replies with.  Validation that can fail without a
//! network round-trip happens here, before any request is sent.

pub mod auth;
pub mod campaigns;
pub mod contacts;
pub mod conversations;
pub mod lists;
pub mod orgs;
pub mod tasks;
pub mod templates;
pub mod workflows;
