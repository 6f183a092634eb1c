use serde_json::{json, Value};

use crate::config::{SETTING_API_URL, SETTING_HTTP_TIMEOUT, SETTING_PARSE_MODE};
use crate::db::LocalStore;
use crate::error::{AppError, AppResult};
use crate::ingest::ParseMode;

/// Split `category.key`; a bare key lands in `general`.
fn split_key(raw: &str) -> AppResult<(String, String)> {
    let trimmed = raw.trim();
    let (category, key) = match trimmed.split_once('.') {
        Some((cat, key)) => (cat.trim(), key.trim()),
        None => ("general", trimmed),
    };
    if category.is_empty() || key.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "Setting key must look like category.key, got '{raw}'"
        )));
    }
    Ok((category.to_string(), key.to_string()))
}

/// Reject values the configuration layer would later fail to parse.
fn validate_value(category: &str, key: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    let pair = (category, key);
    if pair == SETTING_PARSE_MODE {
        let mode: ParseMode = value.parse().map_err(AppError::InvalidInput)?;
        return Ok(mode.as_str().to_string());
    }
    if pair == SETTING_HTTP_TIMEOUT && value.parse::<u64>().is_err() {
        return Err(AppError::InvalidInput(format!(
            "HTTP timeout must be whole seconds, got '{value}'"
        )));
    }
    if pair == SETTING_API_URL && value.contains(char::is_whitespace) {
        return Err(AppError::InvalidInput(format!("Invalid API URL '{value}'")));
    }
    Ok(value.to_string())
}

pub fn get(store: &LocalStore, raw_key: &str) -> AppResult<Value> {
    let (category, key) = split_key(raw_key)?;
    let value = store.get_setting(&category, &key);
    Ok(json!({
        "key": format!("{category}.{key}"),
        "value": value,
    }))
}

pub fn set(store: &LocalStore, raw_key: &str, value: &str) -> AppResult<Value> {
    let (category, key) = split_key(raw_key)?;
    let value = validate_value(&category, &key, value)?;
    store.set_setting(&category, &key, &value)?;
    Ok(json!({
        "key": format!("{category}.{key}"),
        "value": value,
    }))
}

pub fn list(store: &LocalStore) -> AppResult<Value> {
    Ok(json!({ "settings": store.get_all_settings()? }))
}
