//! Canonical records shared by every layer: [`Product`], [`Session`], the
//! partial update [`ProductPatch`] and the list filter [`ProductQuery`].

use serde::{Deserialize, Serialize};

/// Fixed primary key of the singleton session record.
pub const SESSION_KEY: &str = "current";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub quantity_warehouse: Option<f64>,
    #[serde(default)]
    pub quantity_actual: Option<f64>,
    /// Sheet row of the name row this record was recovered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
    /// Internal grouping code that followed the item in the source report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nomenclature_code: Option<String>,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            barcode: None,
            quantity_warehouse: None,
            quantity_actual: None,
            row_index: None,
            nomenclature_code: None,
        }
    }

    /// Merge the set fields of `patch` into this record.
    pub fn apply(&mut self, patch: &ProductPatch) {
        if let Some(barcode) = &patch.barcode {
            self.barcode = barcode.clone();
        }
        if let Some(quantity) = patch.quantity_actual {
            self.quantity_actual = quantity;
        }
    }
}

/// Partial update for a stored product. The outer `Option` means "leave
/// unchanged"; `Some(None)` clears the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPatch {
    pub barcode: Option<Option<String>>,
    pub quantity_actual: Option<Option<f64>>,
}

impl ProductPatch {
    pub fn assignment(barcode: Option<String>, quantity_actual: Option<f64>) -> Self {
        Self {
            barcode: Some(barcode),
            quantity_actual: Some(quantity_actual),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "default_session_id")]
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub total_products: i64,
    #[serde(default)]
    pub products_with_barcode: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn default_session_id() -> String {
    SESSION_KEY.to_string()
}

impl Session {
    /// A fresh session for `filename`; counts are filled in by the store.
    pub fn for_file(filename: impl Into<String>, upload_id: Option<String>) -> Self {
        Self {
            id: SESSION_KEY.to_string(),
            filename: filename.into(),
            total_products: 0,
            products_with_barcode: 0,
            upload_id,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn products_without_barcode(&self) -> i64 {
        (self.total_products - self.products_with_barcode).max(0)
    }
}

/// Filter for product listings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuery {
    pub has_barcode: Option<bool>,
    pub search: Option<String>,
    pub skip: usize,
    pub limit: usize,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            has_barcode: None,
            search: None,
            skip: 0,
            limit: 50,
        }
    }
}

impl ProductQuery {
    /// Query matching every product, used for full mirror pulls.
    pub fn everything() -> Self {
        Self {
            limit: 100_000,
            ..Self::default()
        }
    }

    /// Trimmed search text, `None` when blank.
    pub fn search_text(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// One page of products plus the unpaged match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total: i64,
}
