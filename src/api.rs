//! Inventory backend API client.
//!
//! Thin typed wrapper over the backend's REST endpoints. Every call goes
//! through the [`RequestCache`], so reads keep working from the last good
//! response while the backend is unreachable.

use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::model::{Product, ProductPage, ProductQuery, Session};
use crate::request_cache::{HttpRequest, HttpResponse, RequestCache};

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend API URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - make sure the base ends with the `/api` segment
pub fn normalize_api_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if !url.ends_with("/api") {
        url.push_str("/api");
    }

    url
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "Inventory server rejected the request".to_string(),
        404 => "Inventory server endpoint not found".to_string(),
        s if s >= 500 => "Inventory server error".to_string(),
        _ => "Unexpected response from inventory server".to_string(),
    }
}

/// Build the error message for a non-2xx response, preferring the backend's
/// own `detail`/`error`/`message` field.
fn response_error(response: &HttpResponse) -> String {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body_text = response.text();
    let message = serde_json::from_str::<Value>(&body_text).ok().and_then(|json| {
        json.get("detail")
            .or_else(|| json.get("error"))
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match message {
        Some(message) => format!("{message} (HTTP {})", response.status),
        None if !body_text.trim().is_empty() => format!(
            "{} (HTTP {}): {}",
            status_error(status),
            response.status,
            body_text.trim()
        ),
        None => format!("{} (HTTP {})", status_error(status), response.status),
    }
}

/// Path prefix of every endpoint under `base`, with a trailing slash, so the
/// request cache recognises API calls behind a reverse-proxy path.
fn api_prefix(base: &str) -> String {
    let path = Url::parse(base)
        .map(|u| u.path().trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "/api".to_string());
    format!("{path}/")
}

fn ensure_success(response: HttpResponse) -> AppResult<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(AppError::Network(response_error(&response)))
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    session: Option<Session>,
}

/// Backend answer to `POST /upload`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UploadSummary {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub total_products: i64,
    #[serde(default)]
    pub products_with_barcode: i64,
}

/// `PUT /products/{id}/barcode` answers either `{ success, product }` or the
/// bare record.
fn updated_product(body: Value) -> AppResult<Product> {
    let record = match body {
        Value::Object(mut map) if map.contains_key("product") => {
            map.remove("product").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(record)
        .map_err(|e| AppError::Network(format!("Malformed product in response: {e}")))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ApiClient {
    base: String,
    cache: RequestCache,
}

impl ApiClient {
    pub fn new(api_url: &str, cache: RequestCache) -> Self {
        let base = normalize_api_url(api_url);
        let cache = cache.with_api_prefix(api_prefix(&base));
        Self { base, cache }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// `GET /session`. `None` when the backend has no active session.
    pub async fn get_session(&self) -> AppResult<Option<Session>> {
        self.read_session(HttpRequest::get(self.endpoint("/session")))
            .await
    }

    /// `GET /session` straight from the backend, never from the cache.
    pub async fn fetch_session_fresh(&self) -> AppResult<Option<Session>> {
        self.read_session(HttpRequest::get(self.endpoint("/session")).network_only())
            .await
    }

    async fn read_session(&self, request: HttpRequest) -> AppResult<Option<Session>> {
        let response = self.cache.fetch(&request).await?;
        let envelope: SessionEnvelope = ensure_success(response)?.json()?;
        Ok(envelope.session)
    }

    /// `GET /products` with the query's filters as query parameters.
    pub async fn get_products(&self, query: &ProductQuery) -> AppResult<ProductPage> {
        let request = HttpRequest::get(self.products_url(query)?);
        let response = self.cache.fetch(&request).await?;
        ensure_success(response)?.json()
    }

    /// `GET /products` straight from the backend, never from the cache.
    pub async fn fetch_products_fresh(&self, query: &ProductQuery) -> AppResult<ProductPage> {
        let request = HttpRequest::get(self.products_url(query)?).network_only();
        let response = self.cache.fetch(&request).await?;
        ensure_success(response)?.json()
    }

    fn products_url(&self, query: &ProductQuery) -> AppResult<String> {
        let mut url = Url::parse(&self.endpoint("/products"))
            .map_err(|e| AppError::InvalidInput(format!("Invalid API URL {}: {e}", self.base)))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(has_barcode) = query.has_barcode {
                pairs.append_pair("has_barcode", if has_barcode { "true" } else { "false" });
            }
            if let Some(search) = query.search_text() {
                pairs.append_pair("search", search);
            }
            pairs.append_pair("skip", &query.skip.to_string());
            pairs.append_pair("limit", &query.limit.to_string());
        }
        Ok(url.into())
    }

    /// `PUT /products/{id}/barcode`. A 404 maps to [`AppError::NotFound`].
    pub async fn update_product_barcode(
        &self,
        id: &str,
        barcode: Option<&str>,
        quantity_actual: Option<f64>,
    ) -> AppResult<Product> {
        let request = HttpRequest::put_json(
            self.endpoint(&format!("/products/{id}/barcode")),
            serde_json::json!({
                "barcode": barcode,
                "quantity_actual": quantity_actual,
            }),
        );
        let response = self.cache.fetch(&request).await?;
        if response.status == StatusCode::NOT_FOUND.as_u16() {
            return Err(AppError::product_not_found(id));
        }
        let body: Value = ensure_success(response)?.json()?;
        let product = updated_product(body)?;
        info!(id = %id, barcode = ?product.barcode, "Barcode committed to backend");
        Ok(product)
    }

    /// `POST /upload` with the raw spreadsheet as the `file` part.
    pub async fn upload(&self, filename: &str, bytes: Vec<u8>) -> AppResult<UploadSummary> {
        let request = HttpRequest::upload(self.endpoint("/upload"), "file", filename, bytes);
        let response = self.cache.fetch(&request).await?;
        let summary: UploadSummary = ensure_success(response)?.json()?;
        info!(
            filename = %filename,
            total = summary.total_products,
            with_barcode = summary.products_with_barcode,
            "Spreadsheet uploaded"
        );
        Ok(summary)
    }

    /// `GET /download`: the backend's spreadsheet with barcodes written back.
    pub async fn download(&self) -> AppResult<Vec<u8>> {
        let response = self
            .cache
            .fetch(&HttpRequest::get(self.endpoint("/download")))
            .await?;
        Ok(ensure_success(response)?.body)
    }

    /// `GET /load-default`: ask the backend to ingest its bundled file.
    pub async fn load_default(&self) -> AppResult<()> {
        let response = self
            .cache
            .fetch(&HttpRequest::get(self.endpoint("/load-default")))
            .await?;
        ensure_success(response)?;
        Ok(())
    }
}
