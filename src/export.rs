//! Tabular spreadsheet export of the products collection.
//!
//! The layout is the one the strict ingestion mode reads back: a header row,
//! then one product per row with name, barcode, warehouse and actual
//! quantities.

use rust_xlsxwriter::{Format, Workbook};
use tracing::info;

use crate::error::AppResult;
use crate::model::{Product, Session};

pub const EXPORT_HEADER: [&str; 4] = ["Name", "Barcode", "Warehouse Qty", "Actual Qty"];

const SHEET_NAME: &str = "Inventory";

/// Render `products` as an xlsx workbook.
pub fn export_products(products: &[Product]) -> AppResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    let bold = Format::new().set_bold();
    for (col, title) in EXPORT_HEADER.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &bold)?;
    }
    sheet.set_column_width(0, 48)?;
    sheet.set_column_width(1, 18)?;
    sheet.set_column_width(2, 14)?;
    sheet.set_column_width(3, 14)?;

    for (idx, product) in products.iter().enumerate() {
        let row = idx as u32 + 1;
        sheet.write_string(row, 0, &product.name)?;
        // Barcodes stay text so leading zeros survive.
        if let Some(barcode) = &product.barcode {
            sheet.write_string(row, 1, barcode)?;
        }
        if let Some(qty) = product.quantity_warehouse {
            sheet.write_number(row, 2, qty)?;
        }
        if let Some(qty) = product.quantity_actual {
            sheet.write_number(row, 3, qty)?;
        }
    }

    let bytes = workbook.save_to_buffer()?;
    info!(rows = products.len(), bytes = bytes.len(), "Products exported");
    Ok(bytes)
}

/// Suggested file name for an export of `session`.
pub fn export_filename(session: Option<&Session>) -> String {
    match session {
        Some(session) => {
            let stem = session
                .filename
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(&session.filename);
            format!("updated_{stem}.xlsx")
        }
        None => "inventory.xlsx".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{parse, read_grid, Cell, ParseMode};

    fn products() -> Vec<Product> {
        let mut nut = Product::new("product-1", "Гайка М8");
        nut.barcode = Some("0460111111111".into());
        nut.quantity_warehouse = Some(40.0);
        nut.quantity_actual = Some(38.0);

        let mut washer = Product::new("product-2", "Шайба 8");
        washer.quantity_warehouse = Some(100.0);
        vec![nut, washer]
    }

    #[test]
    fn test_export_has_header_row() {
        let bytes = export_products(&products()).unwrap();
        let grid = read_grid(&bytes).unwrap();
        let header: Vec<String> = grid[0].iter().filter_map(Cell::text).collect();
        assert_eq!(header, EXPORT_HEADER);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn test_export_reads_back_in_strict_mode() {
        let bytes = export_products(&products()).unwrap();
        let ingested = parse(&bytes, "export.xlsx", ParseMode::Strict).unwrap();

        assert_eq!(ingested.products.len(), 2);
        let nut = &ingested.products[0];
        assert_eq!(nut.name, "Гайка М8");
        assert_eq!(nut.barcode.as_deref(), Some("0460111111111"));
        assert_eq!(nut.quantity_warehouse, Some(40.0));
        assert_eq!(nut.quantity_actual, Some(38.0));
        assert!(ingested.products[1].barcode.is_none());
    }

    #[test]
    fn test_export_empty_collection() {
        let bytes = export_products(&[]).unwrap();
        let grid = read_grid(&bytes).unwrap();
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn test_export_filename() {
        let session = Session::for_file("остатки март.xls", None);
        assert_eq!(export_filename(Some(&session)), "updated_остатки март.xlsx");
        assert_eq!(export_filename(None), "inventory.xlsx");
    }
}
