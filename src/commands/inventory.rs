use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::diagnostics;
use crate::error::{AppError, AppResult};
use crate::model::ProductQuery;
use crate::request_cache::RequestCache;
use crate::sync::SyncFacade;

fn read_file(path: &Path) -> AppResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| AppError::InvalidInput(format!("Cannot read {}: {e}", path.display())))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

/// Auto-load the configured default file before a read. Failures only warn:
/// the read itself still runs against whatever is stored.
async fn ensure_loaded(facade: &SyncFacade, config: &AppConfig) {
    match facade.ensure_session(config.default_file.as_deref()).await {
        Ok(Some(summary)) => info!(filename = %summary.filename, "Default inventory loaded"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Default inventory could not be loaded"),
    }
}

pub async fn ingest(facade: &SyncFacade, path: &Path) -> AppResult<Value> {
    let bytes = read_file(path)?;
    let summary = facade.ingest_and_persist(&bytes, &file_name(path)).await?;
    Ok(json!({
        "filename": summary.filename,
        "total_products": summary.total_products,
        "products_with_barcode": summary.products_with_barcode,
        "mirrored": summary.mirrored,
        "parse_mode": facade.parse_mode(),
    }))
}

pub async fn session(facade: &SyncFacade, config: &AppConfig) -> AppResult<Value> {
    ensure_loaded(facade, config).await;
    let session = facade.session().await?;
    let without = session.as_ref().map(|s| s.products_without_barcode());
    Ok(json!({
        "mode": facade.mode(),
        "session": session,
        "products_without_barcode": without,
    }))
}

pub async fn products(
    facade: &SyncFacade,
    config: &AppConfig,
    query: &ProductQuery,
) -> AppResult<Value> {
    ensure_loaded(facade, config).await;
    let page = facade.list_products(query).await?;
    Ok(json!({
        "total": page.total,
        "products": page.products,
    }))
}

/// Write the export to `out`; a directory gets the suggested file name.
pub async fn export(facade: &SyncFacade, out: &Path) -> AppResult<Value> {
    let file = facade.export().await?;
    let target = if out.is_dir() {
        out.join(&file.filename)
    } else {
        out.to_path_buf()
    };
    std::fs::write(&target, &file.bytes)
        .map_err(|e| AppError::Export(format!("Cannot write {}: {e}", target.display())))?;
    info!(path = %target.display(), bytes = file.bytes.len(), "Export written");
    Ok(json!({
        "path": target.display().to_string(),
        "bytes": file.bytes.len(),
    }))
}

pub async fn load_default(
    facade: &SyncFacade,
    config: &AppConfig,
    file: Option<&Path>,
) -> AppResult<Value> {
    let file = file.or(config.default_file.as_deref());
    let summary = facade.load_default(file).await?;
    Ok(serde_json::to_value(summary)?)
}

pub async fn pull(facade: &SyncFacade) -> AppResult<Value> {
    let session = facade.pull_remote().await?;
    Ok(json!({ "session": session }))
}

pub fn cache_activate(facade: &SyncFacade, config: &AppConfig) -> AppResult<Value> {
    let removed = match facade.api() {
        Some(api) => api.cache().activate()?,
        None => RequestCache::new(
            facade.store().clone(),
            config.cache_version.clone(),
            config.http_timeout,
        )?
        .activate()?,
    };
    Ok(json!({
        "generation": config.cache_version,
        "removed": removed,
    }))
}

pub fn about(facade: &SyncFacade, config: &AppConfig) -> AppResult<Value> {
    Ok(json!({
        "about": diagnostics::get_about_info(),
        "mode": facade.mode(),
        "apiUrl": config.api_url,
        "parseMode": facade.parse_mode(),
        "dataDir": config.data_dir.display().to_string(),
        "store": diagnostics::get_store_health(facade.store())?,
    }))
}
