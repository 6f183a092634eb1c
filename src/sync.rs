//! Sync facade between the ingestor, the local store and the backend.
//!
//! In `Local` mode the [`LocalStore`] is authoritative. In `Remote` mode the
//! backend is authoritative and the store holds a mirror of its products and
//! session: writes go to the backend first and are then copied into the
//! mirror, reads go through the request cache and fall back to the mirror
//! when neither the network nor the cache can answer. Writes are never
//! queued; a failed write leaves the store as it was.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::db::LocalStore;
use crate::error::{AppError, AppResult};
use crate::export;
use crate::ingest::{self, ParseMode};
use crate::model::{Product, ProductPage, ProductPatch, ProductQuery, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub filename: String,
    pub total_products: i64,
    pub products_with_barcode: i64,
    /// True when the counts come from the backend mirror.
    pub mirrored: bool,
}

impl IngestSummary {
    fn from_session(session: &Session, mirrored: bool) -> Self {
        Self {
            filename: session.filename.clone(),
            total_products: session.total_products,
            products_with_barcode: session.products_with_barcode,
            mirrored,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Trim `raw` and check it is a digit string a scanner could have produced.
/// Blank input means "no barcode".
pub fn normalize_barcode(raw: Option<&str>) -> AppResult<Option<String>> {
    let Some(code) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidInput(format!(
            "Barcode must contain digits only: {code}"
        )));
    }
    if code.len() > crate::scanner::MAX_CODE_LEN {
        return Err(AppError::InvalidInput(format!(
            "Barcode is longer than {} digits",
            crate::scanner::MAX_CODE_LEN
        )));
    }
    Ok(Some(code.to_string()))
}

fn validate_quantity(quantity: Option<f64>) -> AppResult<Option<f64>> {
    match quantity {
        Some(q) if !q.is_finite() || q < 0.0 => Err(AppError::InvalidInput(format!(
            "Quantity must be a non-negative number, got {q}"
        ))),
        other => Ok(other),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("default.xls")
        .to_string()
}

pub struct SyncFacade {
    store: Arc<LocalStore>,
    remote: Option<ApiClient>,
    parse_mode: ParseMode,
}

impl SyncFacade {
    pub fn local(store: Arc<LocalStore>, parse_mode: ParseMode) -> Self {
        Self {
            store,
            remote: None,
            parse_mode,
        }
    }

    pub fn remote(store: Arc<LocalStore>, api: ApiClient, parse_mode: ParseMode) -> Self {
        Self {
            store,
            remote: Some(api),
            parse_mode,
        }
    }

    pub fn mode(&self) -> SyncMode {
        if self.remote.is_some() {
            SyncMode::Remote
        } else {
            SyncMode::Local
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn api(&self) -> Option<&ApiClient> {
        self.remote.as_ref()
    }

    pub fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }

    /// Mode used to check a file before it is stored or uploaded. The
    /// backend always parses uploads as accounting exports, so Remote mode
    /// checks them the same way.
    fn precheck_mode(&self) -> ParseMode {
        if self.remote.is_some() {
            ParseMode::Heuristic
        } else {
            self.parse_mode
        }
    }

    fn require_remote(&self) -> AppResult<&ApiClient> {
        self.remote
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("No inventory server configured".into()))
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Parse `bytes` and make the result the current product set.
    ///
    /// A parse failure leaves the store untouched. In Remote mode the file is
    /// uploaded and the mirror is refreshed from the backend.
    pub async fn ingest_and_persist(&self, bytes: &[u8], filename: &str) -> AppResult<IngestSummary> {
        let mode = self.precheck_mode();
        if mode != self.parse_mode {
            debug!(configured = %self.parse_mode, used = %mode, "Backend parses uploads heuristically");
        }
        let ingested = ingest::parse(bytes, filename, mode)?;

        let Some(api) = &self.remote else {
            self.store.save_products(&ingested.products)?;
            let upload_id = Uuid::new_v4().to_string();
            let session = self
                .store
                .save_session(&Session::for_file(filename, Some(upload_id)))?;
            info!(
                filename = %filename,
                total = session.total_products,
                with_barcode = session.products_with_barcode,
                "Inventory loaded locally"
            );
            return Ok(IngestSummary::from_session(&session, false));
        };

        api.upload(filename, bytes.to_vec()).await?;
        match self.pull_remote().await? {
            Some(session) => Ok(IngestSummary::from_session(&session, true)),
            None => Err(AppError::Network(
                "Inventory server accepted the upload but reports no session".into(),
            )),
        }
    }

    /// Replace the mirror with the backend's full product list and session.
    ///
    /// Both reads bypass the request cache: a stale cached list would undo
    /// assignments already copied into the mirror. When the backend is
    /// unreachable the mirror is kept and the error returned.
    pub async fn pull_remote(&self) -> AppResult<Option<Session>> {
        let api = self.require_remote()?;
        let page = api.fetch_products_fresh(&ProductQuery::everything()).await?;
        let remote_session = api.fetch_session_fresh().await?;

        let mut products = page.products;
        products.retain(|p| !p.name.trim().is_empty());
        if (products.len() as i64) < page.total {
            warn!(
                received = products.len(),
                total = page.total,
                "Backend returned a partial product list"
            );
        }
        self.store.save_products(&products)?;

        let Some(remote) = remote_session else {
            self.store.clear_session()?;
            info!(products = products.len(), "Mirror refreshed, backend has no session");
            return Ok(None);
        };

        let mut session = Session::for_file(remote.filename, Some(remote.id));
        session.created_at = remote.created_at;
        let session = self.store.save_session(&session)?;
        info!(
            products = session.total_products,
            with_barcode = session.products_with_barcode,
            "Mirror refreshed from backend"
        );
        Ok(Some(session))
    }

    /// Ingest the default file when no session exists yet.
    pub async fn ensure_session(&self, default_file: Option<&Path>) -> AppResult<Option<IngestSummary>> {
        if self.session().await?.is_some() {
            debug!("Session present, default load skipped");
            return Ok(None);
        }
        if self.remote.is_none() && default_file.is_none() {
            return Ok(None);
        }
        self.load_default(default_file).await.map(Some)
    }

    /// Load the default inventory unconditionally. Remote mode asks the
    /// backend to load its own default file.
    pub async fn load_default(&self, default_file: Option<&Path>) -> AppResult<IngestSummary> {
        if let Some(api) = &self.remote {
            api.load_default().await?;
            return match self.pull_remote().await? {
                Some(session) => Ok(IngestSummary::from_session(&session, true)),
                None => Err(AppError::NotFound("Default inventory on server".into())),
            };
        }

        let path = default_file
            .ok_or_else(|| AppError::InvalidInput("No default file configured".into()))?;
        let bytes = std::fs::read(path).map_err(|e| {
            AppError::InvalidInput(format!("Cannot read {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Loading default inventory file");
        self.ingest_and_persist(&bytes, &file_label(path)).await
    }

    // -----------------------------------------------------------------------
    // Barcode assignment
    // -----------------------------------------------------------------------

    /// Set or clear the barcode of one product and record the counted
    /// quantity. Repeating the same call changes nothing further.
    pub async fn assign_barcode(
        &self,
        id: &str,
        barcode: Option<&str>,
        quantity_actual: Option<f64>,
    ) -> AppResult<Product> {
        let barcode = normalize_barcode(barcode)?;
        let quantity_actual = validate_quantity(quantity_actual)?;

        let mirrored = match self.store.get_product_by_id(id) {
            Ok(product) => Some(product),
            Err(AppError::NotFound(_)) if self.remote.is_some() => None,
            Err(e) => return Err(e),
        };

        if let Some(code) = &barcode {
            if let Some(holder) = self.store.find_by_barcode(code)? {
                if holder.id != id {
                    warn!(barcode = %code, holder = %holder.id, requested = %id, "Duplicate barcode rejected");
                    return Err(AppError::DuplicateBarcode {
                        barcode: code.clone(),
                        product_id: holder.id,
                    });
                }
            }
        }

        let product = match &self.remote {
            None => self.store.update_product_with_session(
                id,
                &ProductPatch::assignment(barcode.clone(), quantity_actual),
            )?,
            Some(api) => {
                let committed = api
                    .update_product_barcode(id, barcode.as_deref(), quantity_actual)
                    .await?;
                if mirrored.is_some() {
                    self.store.update_product_with_session(
                        id,
                        &ProductPatch::assignment(
                            committed.barcode.clone(),
                            committed.quantity_actual,
                        ),
                    )?;
                } else {
                    warn!(id = %id, "Product missing from mirror; it will appear after the next pull");
                }
                committed
            }
        };

        info!(id = %id, barcode = ?product.barcode, quantity_actual = ?product.quantity_actual, "Barcode assigned");
        Ok(product)
    }

    /// Remove the barcode and set the actual quantity back to the warehouse
    /// quantity.
    pub async fn clear_barcode(&self, id: &str) -> AppResult<Product> {
        let current = self.current_product(id).await?;
        self.assign_barcode(id, None, current.quantity_warehouse).await
    }

    /// The record as the authoritative side holds it. Remote mode looks in
    /// the mirror first and asks the backend when the mirror has not caught
    /// up yet.
    async fn current_product(&self, id: &str) -> AppResult<Product> {
        let api = match (self.store.get_product_by_id(id), &self.remote) {
            (Ok(product), _) => return Ok(product),
            (Err(AppError::NotFound(_)), Some(api)) => api,
            (Err(e), _) => return Err(e),
        };
        debug!(id = %id, "Product not mirrored, looking it up on the backend");
        let page = api.fetch_products_fresh(&ProductQuery::everything()).await?;
        page.products
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::product_not_found(id))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn session(&self) -> AppResult<Option<Session>> {
        if let Some(api) = &self.remote {
            match api.get_session().await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_network() => {
                    warn!(error = %e, "Backend session unavailable, reading mirror");
                }
                Err(e) => return Err(e),
            }
        }
        self.store.get_session()
    }

    pub async fn list_products(&self, query: &ProductQuery) -> AppResult<ProductPage> {
        if let Some(api) = &self.remote {
            match api.get_products(query).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_network() => {
                    warn!(error = %e, "Backend products unavailable, reading mirror");
                }
                Err(e) => return Err(e),
            }
        }
        self.store.query_products(query)
    }

    /// Spreadsheet with the current barcodes. Remote mode downloads the
    /// backend's rendition and falls back to a local export of the mirror.
    pub async fn export(&self) -> AppResult<ExportFile> {
        let session = self.store.get_session()?;
        let filename = export::export_filename(session.as_ref());

        if let Some(api) = &self.remote {
            match api.download().await {
                Ok(bytes) => return Ok(ExportFile { filename, bytes }),
                Err(e) if e.is_network() => {
                    warn!(error = %e, "Backend download failed, exporting mirror");
                }
                Err(e) => return Err(e),
            }
        }

        let products = self.store.get_all_products()?;
        let bytes = export::export_products(&products)?;
        Ok(ExportFile { filename, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures;
    use crate::request_cache::{RequestCache, DEFAULT_CACHE_VERSION};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn memory_store() -> Arc<LocalStore> {
        Arc::new(LocalStore::open_in_memory().expect("store"))
    }

    fn local_facade() -> SyncFacade {
        SyncFacade::local(memory_store(), ParseMode::Heuristic)
    }

    fn remote_facade(store: Arc<LocalStore>, uri: &str) -> SyncFacade {
        let cache = RequestCache::new(store.clone(), DEFAULT_CACHE_VERSION, Duration::from_secs(5))
            .expect("cache");
        SyncFacade::remote(store, ApiClient::new(uri, cache), ParseMode::Heuristic)
    }

    fn seeded(store: &LocalStore) {
        let mut bolt = Product::new("product-1", "Болт М6");
        bolt.quantity_warehouse = Some(7.0);
        let mut nut = Product::new("product-2", "Гайка М8");
        nut.barcode = Some("4601111111111".into());
        nut.quantity_warehouse = Some(40.0);
        store.save_products(&[bolt, nut]).unwrap();
        store
            .save_session(&Session::for_file("seed.xls", Some("seed".into())))
            .unwrap();
    }

    #[test]
    fn test_normalize_barcode() {
        assert_eq!(normalize_barcode(Some("  4601234567890 ")).unwrap().as_deref(), Some("4601234567890"));
        assert_eq!(normalize_barcode(Some("   ")).unwrap(), None);
        assert_eq!(normalize_barcode(None).unwrap(), None);
        assert!(matches!(
            normalize_barcode(Some("46012AB")),
            Err(AppError::InvalidInput(_))
        ));
    }

    // ------------------------------------------------------------------
    // Local mode
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_heuristic_file_end_to_end() {
        let facade = local_facade();
        let summary = facade
            .ingest_and_persist(&fixtures::heuristic_workbook(), "ostatki.xls")
            .await
            .unwrap();

        assert_eq!(summary.total_products, 3);
        assert_eq!(summary.products_with_barcode, 2);
        assert!(!summary.mirrored);

        let session = facade.session().await.unwrap().expect("session");
        assert_eq!(session.filename, "ostatki.xls");
        assert_eq!(session.total_products, 3);
        assert_eq!(facade.store().get_all_products().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reingest_replaces_previous_set() {
        let facade = local_facade();
        let bytes = fixtures::heuristic_workbook();
        facade.ingest_and_persist(&bytes, "a.xls").await.unwrap();
        let first = facade.session().await.unwrap().unwrap();

        facade.ingest_and_persist(&bytes, "a.xls").await.unwrap();
        let second = facade.session().await.unwrap().unwrap();

        assert_eq!(facade.store().get_all_products().unwrap().len(), 3);
        assert_ne!(first.upload_id, second.upload_id);
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_store_untouched() {
        let facade = local_facade();
        seeded(facade.store());

        let err = facade
            .ingest_and_persist(b"definitely not a workbook", "broken.xls")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse_error");
        assert_eq!(facade.store().get_all_products().unwrap().len(), 2);
        assert_eq!(facade.store().get_session().unwrap().unwrap().filename, "seed.xls");
    }

    #[tokio::test]
    async fn test_assign_is_idempotent_and_updates_counts() {
        let facade = local_facade();
        seeded(facade.store());

        let once = facade
            .assign_barcode("product-1", Some("4600000000017"), Some(6.0))
            .await
            .unwrap();
        let twice = facade
            .assign_barcode("product-1", Some("4600000000017"), Some(6.0))
            .await
            .unwrap();
        assert_eq!(once, twice);

        let session = facade.store().get_session().unwrap().unwrap();
        assert_eq!(session.products_with_barcode, 2);
        assert_eq!(session.products_without_barcode(), 0);
    }

    #[tokio::test]
    async fn test_clear_restores_warehouse_quantity() {
        let facade = local_facade();
        seeded(facade.store());
        facade
            .assign_barcode("product-1", Some("4600000000017"), Some(3.0))
            .await
            .unwrap();

        let cleared = facade.clear_barcode("product-1").await.unwrap();
        assert!(cleared.barcode.is_none());
        assert_eq!(cleared.quantity_actual, Some(7.0));
        assert_eq!(
            facade.store().get_session().unwrap().unwrap().products_with_barcode,
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_barcode_rejected() {
        let facade = local_facade();
        seeded(facade.store());

        let err = facade
            .assign_barcode("product-1", Some("4601111111111"), None)
            .await
            .unwrap_err();
        match err {
            AppError::DuplicateBarcode { product_id, .. } => assert_eq!(product_id, "product-2"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(facade.store().get_product_by_id("product-1").unwrap().barcode.is_none());
    }

    #[tokio::test]
    async fn test_assign_unknown_product_is_not_found() {
        let facade = local_facade();
        seeded(facade.store());
        let err = facade
            .assign_barcode("product-99", Some("4600000000017"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = facade
            .assign_barcode("product-1", None, Some(-1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_ensure_session_loads_default_once() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("default.xls");
        std::fs::write(&default, fixtures::heuristic_workbook()).unwrap();

        let facade = local_facade();
        let loaded = facade.ensure_session(Some(&default)).await.unwrap();
        assert_eq!(loaded.map(|s| s.total_products), Some(3));

        let again = facade.ensure_session(Some(&default)).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_ensure_session_without_default_is_noop() {
        let facade = local_facade();
        assert!(facade.ensure_session(None).await.unwrap().is_none());
        assert!(facade.store().get_session().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_export_reads_back() {
        let facade = local_facade();
        facade
            .ingest_and_persist(&fixtures::heuristic_workbook(), "ostatki.xls")
            .await
            .unwrap();

        let file = facade.export().await.unwrap();
        assert_eq!(file.filename, "updated_ostatki.xlsx");
        let back = ingest::parse(&file.bytes, &file.filename, ParseMode::Strict).unwrap();
        assert_eq!(back.products.len(), 3);
    }

    // ------------------------------------------------------------------
    // Remote mode
    // ------------------------------------------------------------------

    async fn mount_clear(server: &MockServer) {
        Mock::given(method("PUT"))
            .and(path("/api/products/b2/barcode"))
            .and(body_partial_json(serde_json::json!({
                "barcode": null, "quantity_actual": 5.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "product": { "id": "b2", "name": "Товар Б", "barcode": null,
                             "quantity_warehouse": 5.0, "quantity_actual": 5.0 }
            })))
            .with_priority(1)
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_backend(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "session_id": "s-1",
                "total_products": 2, "products_with_barcode": 1
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 2,
                "products": [
                    { "id": "a1", "name": "Товар А", "barcode": "4601234567890",
                      "quantity_warehouse": 12.0, "quantity_actual": null, "row_index": 8 },
                    { "id": "b2", "name": "Товар Б", "barcode": null,
                      "quantity_warehouse": 5.0, "quantity_actual": null, "row_index": 10 }
                ]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session": { "id": "s-1", "filename": "ostatki.xls",
                             "total_products": 2, "products_with_barcode": 1,
                             "created_at": "2024-03-01T10:00:00" }
            })))
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/products/b2/barcode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "product": { "id": "b2", "name": "Товар Б", "barcode": "4607001234567",
                             "quantity_warehouse": 5.0, "quantity_actual": 4.0 }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_remote_ingest_mirrors_backend() {
        let server = MockServer::start().await;
        mount_backend(&server).await;

        let facade = remote_facade(memory_store(), &server.uri());
        assert_eq!(facade.mode(), SyncMode::Remote);

        let summary = facade
            .ingest_and_persist(&fixtures::heuristic_workbook(), "ostatki.xls")
            .await
            .unwrap();
        assert!(summary.mirrored);
        assert_eq!(summary.total_products, 2);
        assert_eq!(summary.products_with_barcode, 1);

        let mirror = facade.store().get_all_products().unwrap();
        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror[0].id, "a1");

        let updated = facade
            .assign_barcode("b2", Some("4607001234567"), Some(4.0))
            .await
            .unwrap();
        assert_eq!(updated.quantity_actual, Some(4.0));
        let stored = facade.store().get_product_by_id("b2").unwrap();
        assert_eq!(stored.barcode.as_deref(), Some("4607001234567"));
        assert_eq!(
            facade.store().get_session().unwrap().unwrap().products_with_barcode,
            2
        );
    }

    #[tokio::test]
    async fn test_remote_ingest_offline_leaves_store_untouched() {
        let server = MockServer::builder().start().await;
        let uri = server.uri();
        drop(server);

        let store = memory_store();
        seeded(&store);
        let facade = remote_facade(store, &uri);

        let err = facade
            .ingest_and_persist(&fixtures::heuristic_workbook(), "ostatki.xls")
            .await
            .unwrap_err();
        assert!(err.is_network());
        assert_eq!(facade.store().get_all_products().unwrap().len(), 2);
        assert_eq!(facade.store().get_session().unwrap().unwrap().filename, "seed.xls");
    }

    #[tokio::test]
    async fn test_remote_reads_fall_back_to_mirror() {
        let server = MockServer::builder().start().await;
        let uri = server.uri();
        drop(server);

        let store = memory_store();
        seeded(&store);
        let facade = remote_facade(store, &uri);

        let page = facade.list_products(&ProductQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        let session = facade.session().await.unwrap().expect("mirror session");
        assert_eq!(session.filename, "seed.xls");

        let err = facade
            .assign_barcode("product-1", Some("4600000000017"), None)
            .await
            .unwrap_err();
        assert!(err.is_network(), "writes are not queued offline");
        assert!(facade.store().get_product_by_id("product-1").unwrap().barcode.is_none());
    }

    #[tokio::test]
    async fn test_pull_while_offline_keeps_mirror() {
        let server = MockServer::builder().start().await;
        mount_backend(&server).await;
        let facade = remote_facade(memory_store(), &server.uri());

        facade.pull_remote().await.unwrap();
        facade
            .assign_barcode("b2", Some("4607001234567"), Some(4.0))
            .await
            .unwrap();

        drop(server);

        let err = facade.pull_remote().await.unwrap_err();
        assert!(err.is_network());
        let stored = facade.store().get_product_by_id("b2").unwrap();
        assert_eq!(stored.barcode.as_deref(), Some("4607001234567"));
        assert_eq!(facade.store().get_all_products().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_clear_of_unmirrored_product() {
        let server = MockServer::start().await;
        mount_clear(&server).await;
        mount_backend(&server).await;
        let facade = remote_facade(memory_store(), &server.uri());

        facade
            .assign_barcode("b2", Some("4607001234567"), Some(4.0))
            .await
            .unwrap();
        assert!(facade.store().get_all_products().unwrap().is_empty());

        let cleared = facade.clear_barcode("b2").await.unwrap();
        assert!(cleared.barcode.is_none());
        assert_eq!(cleared.quantity_actual, Some(5.0));
    }

    #[tokio::test]
    async fn test_remote_clear_of_unknown_product_is_not_found() {
        let server = MockServer::start().await;
        mount_backend(&server).await;
        let facade = remote_facade(memory_store(), &server.uri());

        let err = facade.clear_barcode("zz9").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_remote_precheck_is_heuristic() {
        let store = memory_store();
        let local = SyncFacade::local(store.clone(), ParseMode::Strict);
        assert_eq!(local.precheck_mode(), ParseMode::Strict);

        let cache = RequestCache::new(store.clone(), DEFAULT_CACHE_VERSION, Duration::from_secs(5))
            .expect("cache");
        let remote = SyncFacade::remote(
            store,
            ApiClient::new("http://localhost:8001", cache),
            ParseMode::Strict,
        );
        assert_eq!(remote.precheck_mode(), ParseMode::Heuristic);
        assert_eq!(remote.parse_mode(), ParseMode::Strict);
    }
}
