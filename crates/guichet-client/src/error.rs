use thiserror::Error;

/// Client-side error taxonomy.
///
/// The category decides how the UI reacts: validation errors render inline
/// next to the offending field, remote failures become a dismissible
/// notice (after rolling back any optimistic change), realtime failures
/// are a transient warning, and an auth failure sends the user back to
/// the login screen.  None of these should ever abort the session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Caught before any network call was made.
    #[error("{0}")]
    Validation(String),

    /// The server refused the call or could not be reached.
    #[error("Request failed: {0}")]
    Remote(String),

    /// The event stream could not be established or was lost.
    #[error("Realtime connection lost: {0}")]
    Realtime(String),

    /// The session token is missing, expired or was rejected.
    #[error("Session rejected: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Remote(e.to_string())
    }
}

impl From<guichet_shared::dispatch::DispatchError> for ClientError {
    fn from(e: guichet_shared::dispatch::DispatchError) -> Self {
        ClientError::Validation(e.to_string())
    }
}
