//! HTTP collaborators of the chat service.
//!
//! [`ChatApi`] covers the request/response endpoints the session core depends
//! on: anonymous sign-in, logout, conversation retrieval, and the conversation
//! list.  The live conversation itself runs over the protocol client.

use std::time::Instant;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::observability::{HTTP_REQUESTS, HTTP_REQUEST_DURATION, HTTP_REQUEST_ERRORS};
use crate::types::{AuthSession, ChatRecord, ChatSummary, ConversationRef};

/// Client for the chat service's HTTP endpoints.
#[derive(Debug, Clone)]
pub struct ChatApi {
    client: ReqwestClient,
    config: ClientConfig,
}

impl ChatApi {
    /// Create a new client for the deployment described by `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self { client, config })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sign in anonymously and return the issued credential.
    pub async fn sign_in_anonymously(&self) -> Result<AuthSession> {
        let url = self.config.api_url("api/auth/anonymous")?;
        let request = self.client.post(url).headers(self.default_headers());
        self.execute_json(request).await
    }

    /// Invalidate `token` on the service.
    pub async fn logout(&self, token: &str) -> Result<()> {
        let url = self.config.api_url("api/auth/logout")?;
        let request = self
            .client
            .post(url)
            .headers(self.default_headers())
            .bearer_auth(token);
        self.execute(request).await.map(|_| ())
    }

    /// Fetch the persisted record of conversation `id`.
    pub async fn get_chat(&self, token: &str, id: &ConversationRef) -> Result<ChatRecord> {
        let url = self.chat_url(id)?;
        let request = self
            .client
            .get(url)
            .headers(self.default_headers())
            .bearer_auth(token);
        self.execute_json(request).await.map_err(|err| match err {
            Error::NotFound { message, .. } => Error::not_found(
                message,
                Some("chat".to_string()),
                Some(id.to_string()),
            ),
            other => other,
        })
    }

    /// List the caller's conversations, most recent first.
    pub async fn list_chats(&self, token: &str) -> Result<Vec<ChatSummary>> {
        let url = self.config.api_url("api/chats")?;
        let request = self
            .client
            .get(url)
            .headers(self.default_headers())
            .bearer_auth(token);
        self.execute_json(request).await
    }

    fn chat_url(&self, id: &ConversationRef) -> Result<Url> {
        let mut url = self.config.api_url("api/chats")?;
        let base = url.to_string();
        url.path_segments_mut()
            .map_err(|_| Error::url(format!("cannot-be-a-base URL: {base}"), None))?
            .push(id.as_str());
        Ok(url)
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        HTTP_REQUESTS.click();
        let start = Instant::now();
        let result = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("Request timed out: {}", e),
                    Some(self.config.timeout.as_secs_f64()),
                )
            } else if e.is_connect() {
                Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
            } else {
                Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
            }
        });
        HTTP_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                HTTP_REQUEST_ERRORS.click();
                return Err(err);
            }
        };
        if !response.status().is_success() {
            HTTP_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };
        status_to_error(status_code, error_message(&error_body))
    }
}

/// Extract a human-readable message from an error body.
fn error_message(body: &str) -> String {
    // The service reports errors as `{"detail": ...}`.
    #[derive(Deserialize)]
    struct ErrorResponse {
        detail: Option<serde_json::Value>,
    }

    match serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|parsed| parsed.detail)
    {
        Some(serde_json::Value::String(detail)) => detail,
        Some(other) => other.to_string(),
        None => body.to_string(),
    }
}

/// Map an HTTP status code to the matching error variant.
fn status_to_error(status_code: u16, message: String) -> Error {
    match status_code {
        400 | 422 => Error::bad_request(message),
        401 => Error::authentication(message),
        403 => Error::permission(message),
        404 => Error::not_found(message, None, None),
        408 => Error::timeout(message, None),
        500..=599 => Error::server(status_code, message),
        _ => Error::api(status_code, message),
    }
}
