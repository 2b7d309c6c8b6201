//! REST data access: stateless request helpers over one HTTP client.
//!
//! Every authenticated call takes the bearer access token as a parameter;
//! the session layer owns the tokens, this layer never stores them. There
//! is no retry or backoff here — that policy belongs to the realtime
//! connection manager alone.

use std::path::Path;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Message, NewRoom, Room, RoomDetail, User};

/// Errors surfaced by the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: &'static str,
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("reading upload file: {0}")]
    Upload(#[from] std::io::Error),
}

impl ApiError {
    /// True for a 401 response — the session layer reacts to these by
    /// refreshing or logging out.
    pub fn unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

/// Token pair issued on login.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Replacement access token issued on refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedToken {
    pub access: String,
}

/// Registration response: the created user plus a fresh token pair.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub user: User,
    pub access: String,
    pub refresh: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ApiError> {
        let path = "/api/token/";
        let response = self
            .http
            .post(self.url(path))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        read("POST", path, StatusCode::OK, response).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, ApiError> {
        let path = "/api/token/refresh/";
        let response = self
            .http
            .post(self.url(path))
            .json(&json!({ "refresh": refresh_token }))
            .send()
            .await?;
        read("POST", path, StatusCode::OK, response).await
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<Registration, ApiError> {
        let path = "/api/register/";
        let mut body = json!({ "username": username, "password": password });
        if let Some(email) = email {
            body["email"] = json!(email);
        }
        let response = self.http.post(self.url(path)).json(&body).send().await?;
        read("POST", path, StatusCode::CREATED, response).await
    }

    pub async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        let path = "/api/user/";
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?;
        read("GET", path, StatusCode::OK, response).await
    }

    pub async fn list_rooms(&self, token: &str) -> Result<Vec<Room>, ApiError> {
        let path = "/api/rooms/";
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?;
        read("GET", path, StatusCode::OK, response).await
    }

    /// Create a room. Only a 201 with the created room counts as success;
    /// any other status is a failure.
    pub async fn create_room(&self, token: &str, room: &NewRoom) -> Result<Room, ApiError> {
        let path = "/api/rooms/";
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .json(room)
            .send()
            .await?;
        read("POST", path, StatusCode::CREATED, response).await
    }

    pub async fn room_detail(&self, token: &str, room_id: Uuid) -> Result<RoomDetail, ApiError> {
        let path = format!("/api/rooms/{room_id}/");
        let response = self
            .http
            .get(self.url(&path))
            .bearer_auth(token)
            .send()
            .await?;
        read_owned("GET", path, StatusCode::OK, response).await
    }

    /// Messages for a room in chronological order, optionally paginated.
    pub async fn list_messages(
        &self,
        token: &str,
        room_id: Uuid,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Message>, ApiError> {
        let path = format!("/api/rooms/{room_id}/messages/");
        let mut request = self.http.get(self.url(&path)).bearer_auth(token);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        if let Some(offset) = offset {
            request = request.query(&[("offset", offset)]);
        }
        let response = request.send().await?;
        read_owned("GET", path, StatusCode::OK, response).await
    }

    /// The newest message in a room, if any. Used after a `new_message`
    /// notification — the socket never carries the message body.
    pub async fn latest_message(
        &self,
        token: &str,
        room_id: Uuid,
    ) -> Result<Option<Message>, ApiError> {
        let messages = self.list_messages(token, room_id, Some(1), Some(0)).await?;
        Ok(messages.into_iter().next())
    }

    pub async fn send_message(
        &self,
        token: &str,
        room_id: Uuid,
        plaintext: &str,
    ) -> Result<Message, ApiError> {
        let path = format!("/api/rooms/{room_id}/messages/");
        let response = self
            .http
            .post(self.url(&path))
            .bearer_auth(token)
            .json(&json!({ "plaintext": plaintext }))
            .send()
            .await?;
        read_owned("POST", path, StatusCode::CREATED, response).await
    }

    /// Upload a file (with optional accompanying text) as a multipart
    /// request; the backend turns it into a message with an attachment.
    pub async fn upload_file(
        &self,
        token: &str,
        room_id: Uuid,
        file: &Path,
        plaintext: Option<&str>,
    ) -> Result<Message, ApiError> {
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let mime = mime_guess::from_path(file).first_or_octet_stream();
        debug!(file = %file.display(), size = bytes.len(), mime = %mime, "uploading");

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.as_ref())?;
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(plaintext) = plaintext {
            form = form.text("plaintext", plaintext.to_string());
        }

        let path = format!("/api/rooms/{room_id}/upload/");
        let response = self
            .http
            .post(self.url(&path))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        read_owned("POST", path, StatusCode::CREATED, response).await
    }
}

async fn read<T: DeserializeOwned>(
    method: &'static str,
    path: &str,
    expected: StatusCode,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    read_owned(method, path.to_string(), expected, response).await
}

async fn read_owned<T: DeserializeOwned>(
    method: &'static str,
    path: String,
    expected: StatusCode,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    if status != expected {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            method,
            path,
            status,
            body,
        });
    }
    Ok(response.json::<T>().await?)
}
