//! Persistent HTTP response cache sitting between the API client and the
//! network.
//!
//! Requests whose path starts with the API prefix are served network-first:
//! successful GET responses are stored, and on a transport failure the last
//! stored response for the same request is returned instead. Every other
//! request (static assets) is served cache-first. Entries live in the
//! `http_cache` table of the [`LocalStore`] and are tagged with a cache
//! generation; [`RequestCache::activate`] drops every other generation.

use chrono::Utc;
use reqwest::{multipart, Client, Method, Url};
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::LocalStore;
use crate::error::{AppError, AppResult};

/// Cache generation used when nothing else is configured.
pub const DEFAULT_CACHE_VERSION: &str = "barcode-inventory-v1";

/// Path prefix that marks a request as an API call.
pub const DEFAULT_API_PREFIX: &str = "/api/";

/// Default timeout for backend requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Single-file multipart upload.
    File {
        field: String,
        filename: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: RequestBody,
    /// Skip the cache fallback: the caller needs what the server holds now.
    pub network_only: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: RequestBody::Empty,
            network_only: false,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: RequestBody::Empty,
            network_only: false,
        }
    }

    pub fn put_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::PUT,
            url: url.into(),
            body: RequestBody::Json(body),
            network_only: false,
        }
    }

    pub fn upload(
        url: impl Into<String>,
        field: impl Into<String>,
        filename: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: RequestBody::File {
                field: field.into(),
                filename: filename.into(),
                bytes,
            },
            network_only: false,
        }
    }

    pub fn network_only(mut self) -> Self {
        self.network_only = true;
        self
    }

    /// Identity of the request in the cache: method plus full URL.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// True when the network was bypassed or unreachable.
    pub from_cache: bool,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AppError::Network(format!("Malformed response body: {e}")))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    NetworkFirst,
    CacheFirst,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct RequestCache {
    client: Client,
    store: Arc<LocalStore>,
    generation: String,
    api_prefix: String,
}

impl RequestCache {
    pub fn new(
        store: Arc<LocalStore>,
        generation: impl Into<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            store,
            generation: generation.into(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
        })
    }

    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn policy_for(&self, url: &str) -> CachePolicy {
        let path = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        if path.starts_with(&self.api_prefix) {
            CachePolicy::NetworkFirst
        } else {
            CachePolicy::CacheFirst
        }
    }

    /// Perform `request` under the policy its URL selects.
    ///
    /// Non-2xx responses are handed back unchanged and never stored. A
    /// transport failure with nothing cached surfaces as
    /// [`AppError::Network`]. A `network_only` request always goes to the
    /// network and never falls back; a successful GET still refreshes the
    /// stored entry.
    pub async fn fetch(&self, request: &HttpRequest) -> AppResult<HttpResponse> {
        let key = request.cache_key();
        if request.network_only {
            let response = self.send(request).await?;
            if request.method == Method::GET && response.is_success() {
                self.store_entry(&key, &response)?;
            }
            return Ok(response);
        }
        match self.policy_for(&request.url) {
            CachePolicy::NetworkFirst => match self.send(request).await {
                Ok(response) => {
                    if request.method == Method::GET && response.is_success() {
                        self.store_entry(&key, &response)?;
                    }
                    Ok(response)
                }
                Err(err) => {
                    if let Some(cached) = self.lookup(&key)? {
                        warn!(key = %key, error = %err, "Network unavailable, serving cached response");
                        return Ok(cached);
                    }
                    Err(err)
                }
            },
            CachePolicy::CacheFirst => {
                if let Some(cached) = self.lookup(&key)? {
                    debug!(key = %key, "cache hit");
                    return Ok(cached);
                }
                let response = self.send(request).await?;
                if response.is_success() {
                    self.store_entry(&key, &response)?;
                }
                Ok(response)
            }
        }
    }

    /// Delete entries of every generation other than the active one.
    /// Returns the number of entries removed.
    pub fn activate(&self) -> AppResult<usize> {
        let conn = self.store.lock()?;
        let removed = conn.execute(
            "DELETE FROM http_cache WHERE generation != ?1",
            params![self.generation],
        )?;
        info!(
            generation = %self.generation,
            removed,
            "Request cache activated"
        );
        Ok(removed)
    }

    /// Number of stored entries in the active generation.
    pub fn entry_count(&self) -> AppResult<i64> {
        let conn = self.store.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM http_cache WHERE generation = ?1",
            params![self.generation],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn send(&self, request: &HttpRequest) -> AppResult<HttpResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::File {
                field,
                filename,
                bytes,
            } => {
                let part = multipart::Part::bytes(bytes.clone()).file_name(filename.clone());
                builder.multipart(multipart::Form::new().part(field.clone(), part))
            }
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| AppError::Network(friendly_error(&request.url, &e)))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| AppError::Network(friendly_error(&request.url, &e)))?
            .to_vec();

        debug!(method = %request.method, url = %request.url, status, "HTTP response");
        Ok(HttpResponse {
            status,
            content_type,
            body,
            from_cache: false,
        })
    }

    fn lookup(&self, key: &str) -> AppResult<Option<HttpResponse>> {
        let conn = self.store.lock()?;
        let entry = conn
            .query_row(
                "SELECT status, content_type, body FROM http_cache
                  WHERE generation = ?1 AND cache_key = ?2",
                params![self.generation, key],
                |row| {
                    Ok(HttpResponse {
                        status: row.get(0)?,
                        content_type: row.get(1)?,
                        body: row.get(2)?,
                        from_cache: true,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn store_entry(&self, key: &str, response: &HttpResponse) -> AppResult<()> {
        let conn = self.store.lock()?;
        conn.execute(
            "INSERT INTO http_cache (generation, cache_key, status, content_type, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(generation, cache_key) DO UPDATE SET
                status = excluded.status,
                content_type = excluded.content_type,
                body = excluded.body,
                stored_at = excluded.stored_at",
            params![
                self.generation,
                key,
                response.status,
                response.content_type,
                response.body,
                Utc::now().to_rfc3339()
            ],
        )?;
        debug!(key = %key, bytes = response.body.len(), "cached response");
        Ok(())
    }
}

/// Convert a reqwest transport error into a user-facing message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach inventory server at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid inventory server URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}
