use serde_json::{json, Value};
use tokio::io::AsyncBufRead;

use crate::error::{AppError, AppResult};
use crate::scanner;
use crate::sync::SyncFacade;

pub async fn assign(
    facade: &SyncFacade,
    id: &str,
    barcode: &str,
    quantity_actual: Option<f64>,
) -> AppResult<Value> {
    let product = facade.assign_barcode(id, Some(barcode), quantity_actual).await?;
    Ok(json!({ "product": product }))
}

pub async fn clear(facade: &SyncFacade, id: &str) -> AppResult<Value> {
    let product = facade.clear_barcode(id).await?;
    Ok(json!({ "product": product }))
}

/// Wait for one scan on `source` and assign it to product `id`.
pub async fn scan<R>(
    facade: &SyncFacade,
    id: &str,
    quantity_actual: Option<f64>,
    source: R,
    source_name: &str,
) -> AppResult<Value>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    // Fail before waiting on the scanner if the product is unknown locally.
    if facade.api().is_none() {
        facade.store().get_product_by_id(id)?;
    }

    let mut handle = scanner::start(source, source_name);
    let event = handle.next_scan().await;
    handle.stop().await;

    let event = event.ok_or_else(|| AppError::InvalidInput("No barcode was scanned".into()))?;
    let product = facade
        .assign_barcode(id, Some(&event.code), quantity_actual)
        .await?;
    Ok(json!({
        "scan": event,
        "product": product,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LocalStore;
    use crate::ingest::ParseMode;
    use crate::model::Product;
    use std::io::Cursor;
    use std::sync::Arc;

    fn facade() -> SyncFacade {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let mut bolt = Product::new("product-1", "Болт М6");
        bolt.quantity_warehouse = Some(7.0);
        store.save_products(&[bolt]).unwrap();
        SyncFacade::local(store, ParseMode::Heuristic)
    }

    #[tokio::test]
    async fn test_scan_assigns_first_code() {
        let facade = facade();
        let input = Cursor::new(b"\nxy\n4006381333931\n96385074\n".to_vec());

        let out = scan(&facade, "product-1", Some(6.0), input, "stdin")
            .await
            .unwrap();
        assert_eq!(out["scan"]["code"], "4006381333931");
        assert_eq!(out["scan"]["symbology"], "ean13");
        assert_eq!(out["product"]["barcode"], "4006381333931");
        assert_eq!(out["product"]["quantity_actual"], 6.0);
    }

    #[tokio::test]
    async fn test_scan_without_input_fails() {
        let err = scan(&facade(), "product-1", None, Cursor::new(Vec::new()), "stdin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn test_scan_unknown_product_fails_fast() {
        let err = scan(
            &facade(),
            "product-9",
            None,
            Cursor::new(b"4006381333931\n".to_vec()),
            "stdin",
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_assign_then_clear() {
        let facade = facade();
        let assigned = assign(&facade, "product-1", "4006381333931", None).await.unwrap();
        assert_eq!(assigned["product"]["barcode"], "4006381333931");

        let cleared = clear(&facade, "product-1").await.unwrap();
        assert!(cleared["product"]["barcode"].is_null());
        assert_eq!(cleared["product"]["quantity_actual"], 7.0);
    }
}
