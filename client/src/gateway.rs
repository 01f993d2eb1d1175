//! Authenticated request gateway.
//!
//! Every backend call goes through [`Gateway::send`], which attaches a bearer
//! token, refreshes it when it is stale or rejected, and replays a rejected
//! request once with the new token. Concurrent callers that need a refresh
//! share one network call to the refresh endpoint.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::claims::{self, DEFAULT_SKEW_SECS};
use crate::config::ClientConfig;
use crate::credentials::Credentials;
use crate::errors::{ensure_success, Error, Result};

pub const REFRESH_PATH: &str = "/api/token/refresh/";

/// One field of a multipart body
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        bytes: Vec<u8>,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormPart::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read a file from disk into a file part named `name`
    pub async fn from_path(name: impl Into<String>, path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|file_name| file_name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        Ok(Self::file(name, file_name, bytes))
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// Kept as plain parts so the form can be rebuilt for a retry
    Multipart(Vec<FormPart>),
}

/// A request described independently of any token, so it can be sent twice
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }
}

fn build_form(parts: &[FormPart]) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                bytes,
            } => {
                let mime = mime_guess::from_path(file_name).first_or_octet_stream();
                let file = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime.as_ref())?;
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access: Option<String>,
}

type PendingRefresh = Shared<BoxFuture<'static, Option<String>>>;

struct Inner {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: Credentials,
    in_flight: Mutex<Option<PendingRefresh>>,
}

impl Inner {
    fn in_flight(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything one refresh needs. The pending future owns this rather than the
/// gateway, so an abandoned refresh never keeps `Inner` alive.
struct RefreshTask {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: Credentials,
}

impl RefreshTask {
    #[tracing::instrument(name = "refresh_once", skip_all)]
    async fn run(self) -> Option<String> {
        let Some((scope, refresh_token)) = self.credentials.refresh_token() else {
            debug!("No refresh token stored");
            return None;
        };

        let access = match self.request_access_token(&refresh_token).await {
            Ok(access) => access,
            Err(err) => {
                warn!("Token refresh failed: {}", err);
                return None;
            }
        };

        if let Err(err) = self.credentials.set_access_token(scope, &access) {
            warn!("Could not store refreshed access token: {}", err);
        }
        info!(?scope, "Refreshed access token");
        Some(access)
    }

    async fn request_access_token(&self, refresh_token: &str) -> Result<String> {
        let url = self.config.endpoint(REFRESH_PATH)?;
        let response = self
            .http
            .post(url)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let body: RefreshResponse = serde_json::from_slice(&response.bytes().await?)?;
        body.access
            .filter(|access| !access.is_empty())
            .ok_or_else(|| Error::Invalid("refresh response had no access token".to_string()))
    }
}

/// Cheap to clone; clones share credentials and the in-flight refresh
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("api_url", &self.inner.config.api_url().as_str())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(config: ClientConfig, credentials: Credentials) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().user_agent(concat!("noteshare/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self::with_client(http, config, credentials))
    }

    pub fn with_client(http: reqwest::Client, config: ClientConfig, credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                config,
                credentials,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.inner.in_flight()
    }

    /// Send `request` with the current access token.
    ///
    /// Any HTTP status comes back as `Ok`. A 401 triggers at most one refresh
    /// and one replay; if the session cannot be renewed the stored credentials
    /// are purged and the original 401 response is returned.
    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<Response> {
        let token = self.valid_access_token().await;
        let response = self.dispatch(&request, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if self.inner.credentials.refresh_token().is_none() {
            warn!("Request was unauthorized and no refresh token is stored");
            self.purge();
            return Ok(response);
        }

        match self.refresh().await {
            Some(new_token) => {
                debug!("Replaying request with refreshed access token");
                self.dispatch(&request, Some(&new_token)).await
            }
            None => {
                warn!("Could not refresh access token after 401");
                self.purge();
                Ok(response)
            }
        }
    }

    /// `send`, then fail on any non-2xx status
    pub async fn send_ok(&self, request: ApiRequest) -> Result<Response> {
        ensure_success(self.send(request).await?).await
    }

    /// Send without credentials, for endpoints that establish them (login, register, reset)
    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send_public(&self, request: ApiRequest) -> Result<Response> {
        self.dispatch(&request, None).await
    }

    /// A stored access token that is not about to expire, refreshing if needed
    pub async fn valid_access_token(&self) -> Option<String> {
        if let Some(token) = self.inner.credentials.access_token() {
            if !claims::is_expired(&token, DEFAULT_SKEW_SECS) {
                return Some(token);
            }
            debug!("Stored access token is expired or about to expire");
        }

        self.refresh().await
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Joins a refresh that is already underway instead of starting another.
    /// Failures of any kind yield `None` and leave storage untouched.
    pub async fn refresh(&self) -> Option<String> {
        let pending = {
            let mut slot = self.in_flight();
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let task = RefreshTask {
                        http: self.inner.http.clone(),
                        config: self.inner.config.clone(),
                        credentials: self.inner.credentials.clone(),
                    };
                    let owner = Arc::downgrade(&self.inner);
                    let pending = async move {
                        let outcome = task.run().await;
                        // Settled: the next caller starts a new refresh
                        if let Some(inner) = owner.upgrade() {
                            inner.in_flight().take();
                        }
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response> {
        let url = self.inner.config.endpoint(&request.path)?;
        let mut builder = self.inner.http.request(request.method.clone(), url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        let response = builder.send().await?;
        debug!(status = %response.status(), authorized = token.is_some(), "Response received");
        Ok(response)
    }

    fn purge(&self) {
        if let Err(err) = self.inner.credentials.purge() {
            warn!("Could not clear stored credentials: {}", err);
        }
    }
}
