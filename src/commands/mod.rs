//! Command handlers behind the CLI subcommands.
//!
//! Handlers return `AppResult<Value>`; [`respond`] turns the outcome into the
//! JSON document printed on stdout, so every failure reaches the user as a
//! `{ success: false, error, message }` payload.

pub mod barcode;
pub mod inventory;
pub mod settings;

use serde_json::{json, Value};
use tracing::warn;

use crate::error::{AppError, AppResult};

/// Mark `payload` as a successful result.
pub fn success(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert("success".into(), Value::Bool(true));
            Value::Object(map)
        }
        other => json!({ "success": true, "data": other }),
    }
}

pub fn failure(err: &AppError) -> Value {
    let mut payload = json!({
        "success": false,
        "error": err.kind(),
        "message": err.to_string(),
    });
    if let AppError::DuplicateBarcode { product_id, .. } = err {
        payload["productId"] = Value::String(product_id.clone());
    }
    payload
}

pub fn respond(result: AppResult<Value>) -> Value {
    match result {
        Ok(payload) => success(payload),
        Err(err) => {
            warn!(kind = err.kind(), error = %err, "Command failed");
            failure(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_marks_objects() {
        let out = respond(Ok(json!({ "total": 3 })));
        assert_eq!(out["success"], true);
        assert_eq!(out["total"], 3);

        let wrapped = success(json!([1, 2]));
        assert_eq!(wrapped["data"], json!([1, 2]));
    }

    #[test]
    fn test_failure_carries_kind_and_message() {
        let out = respond(Err(AppError::product_not_found("product-7")));
        assert_eq!(out["success"], false);
        assert_eq!(out["error"], "not_found");
        assert_eq!(out["message"], "Product product-7 not found");

        let dup = failure(&AppError::DuplicateBarcode {
            barcode: "4601234567890".into(),
            product_id: "product-1".into(),
        });
        assert_eq!(dup["productId"], "product-1");
    }
}
