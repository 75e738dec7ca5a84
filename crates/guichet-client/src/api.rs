//! Typed HTTP wrapper around the API server.
//!
//! [`ApiClient`] is cheap to clone and immutable: opening a session swaps
//! in a new client carrying the token instead of mutating a shared one.
//! All helpers speak JSON and translate non-2xx replies into
//! [`ClientError`], with 401 singled out so the router can fall back to
//! the login screen.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use guichet_shared::types::OrgId;

use crate::config::ClientConfig;
use crate::error::ClientError;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.server_url.clone(),
            request_timeout: config.request_timeout,
            token: None,
        }
    }

    /// A copy of this client that authenticates with `token`.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..self.clone()
        }
    }

    /// A copy with no session attached.
    pub fn without_token(&self) -> Self {
        Self {
            token: None,
            ..self.clone()
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let builder = self
            .http
            .get(self.url(path))
            .timeout(self.request_timeout);
        let response = self.authorize(builder).send().await?;
        read_json(response).await
    }

    pub async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let builder = self
            .http
            .get(self.url(path))
            .query(query)
            .timeout(self.request_timeout);
        let response = self.authorize(builder).send().await?;
        read_json(response).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let builder = self
            .http
            .post(self.url(path))
            .json(body)
            .timeout(self.request_timeout);
        let response = self.authorize(builder).send().await?;
        read_json(response).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let builder = self
            .http
            .put(self.url(path))
            .json(body)
            .timeout(self.request_timeout);
        let response = self.authorize(builder).send().await?;
        read_json(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let builder = self
            .http
            .delete(self.url(path))
            .timeout(self.request_timeout);
        let response = self.authorize(builder).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response).await)
        }
    }

    /// DELETE whose reply body matters, e.g. a renumbered collection.
    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let builder = self
            .http
            .delete(self.url(path))
            .timeout(self.request_timeout);
        let response = self.authorize(builder).send().await?;
        read_json(response).await
    }

    /// Opens the organization's SSE stream.  No timeout: the connection is
    /// expected to stay up until the server or the subscriber closes it.
    pub(crate) async fn open_events(&self, org_id: OrgId) -> Result<reqwest::Response, ClientError> {
        let builder = self
            .http
            .get(self.url(&format!("orgs/{org_id}/events")))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = self.authorize(builder).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from(response).await)
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(error_from(response).await)
    }
}

/// Error replies carry `{"error": "..."}`; fall back to the status line
/// when the body is something else (a proxy page, an empty reply).
async fn error_from(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    if status == StatusCode::UNAUTHORIZED {
        ClientError::Auth(message)
    } else {
        ClientError::Remote(message)
    }
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let api = ApiClient::new(&ClientConfig::new("http://localhost:8080/"));
        assert_eq!(api.url("/orgs"), "http://localhost:8080/orgs");
        assert_eq!(api.url("orgs"), "http://localhost:8080/orgs");
    }

    #[test]
    fn test_with_token_leaves_the_original_untouched() {
        let api = ApiClient::new(&ClientConfig::default());
        let signed_in = api.with_token("abc");
        assert!(!api.has_token());
        assert!(signed_in.has_token());
        assert!(!signed_in.without_token().has_token());
    }
}
