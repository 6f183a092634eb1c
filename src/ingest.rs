//! Spreadsheet ingestion: raw workbook bytes → canonical [`Product`] list.
//!
//! The workbook is decoded with `calamine` and flattened into an
//! absolute-position grid (row 0 is the first sheet row even when the used
//! range starts lower down), so the positional rules below do not depend on
//! how the exporting program trimmed empty rows.
//!
//! Two layouts are supported:
//! - **Strict**: one item per row after a header row.
//! - **Heuristic**: accounting "turnover" reports where every item name row is
//!   followed by a quantity row whose second cell is the `Кол.` sentinel.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::model::Product;

/// First sheet row scanned in heuristic mode; everything above is report header.
pub const HEURISTIC_START_ROW: usize = 8;

/// Second-cell marker of the quantity row paired with an item row.
pub const QUANTITY_SENTINEL: &str = "Кол.";

/// Column of the item row that carries an already-known barcode.
const BARCODE_COLUMN: usize = 8;

/// Column of the quantity row that carries the warehouse quantity.
const QUANTITY_COLUMN: usize = 2;

/// First-cell labels of report header/footer rows.
const SKIP_LABELS: &[&str] = &["НaN", "Номенклатура", "Счет", "nan", "Итого"];

// ---------------------------------------------------------------------------
// Parse mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// One row per item: name, barcode, warehouse qty, actual qty.
    Strict,
    /// Paired name/quantity rows of an accounting export.
    #[default]
    Heuristic,
}

impl ParseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseMode::Strict => "strict",
            ParseMode::Heuristic => "heuristic",
        }
    }
}

impl fmt::Display for ParseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "tabular" => Ok(ParseMode::Strict),
            "heuristic" | "accounting" => Ok(ParseMode::Heuristic),
            other => Err(format!(
                "unknown parse mode '{other}' (expected 'strict' or 'heuristic')"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Cell grid
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    /// Trimmed display text, `None` for blank cells.
    pub fn text(&self) -> Option<String> {
        let raw = match self {
            Cell::Empty => return None,
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => format_number(*n),
            Cell::Bool(b) => b.to_string(),
        };
        if raw.is_empty() {
            None
        } else {
            Some(raw)
        }
    }

    /// Numeric value, parsing text cells (`"12"`, `"3,5"`) when needed.
    pub fn number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Text(s) => {
                let normalized: String = s
                    .trim()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .map(|c| if c == ',' { '.' } else { c })
                    .collect();
                normalized.parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }
}

impl From<&Data> for Cell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::Error(_) => Cell::Empty,
            other => Cell::Text(other.to_string()),
        }
    }
}

/// Integral floats print without a fractional part so numeric barcodes and
/// codes keep their digit form.
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn cell_at(row: &[Cell], col: usize) -> &Cell {
    row.get(col).unwrap_or(&EMPTY_CELL)
}

/// Decode the first worksheet of `bytes` into an absolute-position grid.
pub fn read_grid(bytes: &[u8]) -> AppResult<Vec<Vec<Cell>>> {
    if bytes.is_empty() {
        return Err(AppError::Parse("file is empty".into()));
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Parse("workbook contains no worksheets".into()))??;

    let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
    let mut grid: Vec<Vec<Cell>> = vec![Vec::new(); row_offset as usize];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; col_offset as usize];
        cells.extend(row.iter().map(Cell::from));
        grid.push(cells);
    }
    Ok(grid)
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub filename: String,
    pub products: Vec<Product>,
}

/// Parse spreadsheet bytes into products using `mode`.
pub fn parse(bytes: &[u8], filename: &str, mode: ParseMode) -> AppResult<Ingested> {
    let grid = read_grid(bytes).map_err(|e| {
        warn!(filename = %filename, error = %e, "Spreadsheet decode failed");
        e
    })?;
    let products = parse_rows(&grid, mode);
    info!(
        filename = %filename,
        mode = %mode,
        rows = grid.len(),
        products = products.len(),
        "Spreadsheet ingested"
    );
    Ok(Ingested {
        filename: filename.to_string(),
        products,
    })
}

/// Parse an already-decoded grid.
pub fn parse_rows(rows: &[Vec<Cell>], mode: ParseMode) -> Vec<Product> {
    let products = match mode {
        ParseMode::Strict => parse_strict(rows),
        ParseMode::Heuristic => parse_heuristic(rows),
    };
    validate(products)
}

fn next_id(counter: &mut usize) -> String {
    *counter += 1;
    format!("product-{counter}")
}

fn parse_strict(rows: &[Vec<Cell>]) -> Vec<Product> {
    let mut products = Vec::new();
    let mut counter = 0usize;

    // Row 0 is the header.
    for (row_idx, row) in rows.iter().enumerate().skip(1) {
        let Some(name) = cell_at(row, 0).text() else {
            continue;
        };
        let mut product = Product::new(next_id(&mut counter), name);
        product.barcode = cell_at(row, 1).text();
        product.quantity_warehouse = Some(cell_at(row, 2).number().unwrap_or(0.0));
        product.quantity_actual = cell_at(row, 3).number();
        product.row_index = u32::try_from(row_idx).ok();
        products.push(product);
    }
    products
}

fn is_nomenclature_code(name: &str) -> bool {
    let compact: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    !compact.is_empty() && compact.chars().all(|c| c.is_ascii_digit())
}

fn parse_heuristic(rows: &[Vec<Cell>]) -> Vec<Product> {
    let mut products: Vec<Product> = Vec::new();
    let mut counter = 0usize;
    let mut i = HEURISTIC_START_ROW;

    while i + 1 < rows.len() {
        let row = &rows[i];
        let Some(name) = cell_at(row, 0).text() else {
            i += 1;
            continue;
        };
        if SKIP_LABELS.contains(&name.as_str()) {
            i += 1;
            continue;
        }

        let next = &rows[i + 1];
        let quantity_follows = cell_at(next, 1).text().as_deref() == Some(QUANTITY_SENTINEL);
        if !quantity_follows {
            i += 1;
            continue;
        }

        if is_nomenclature_code(&name) {
            if let Some(previous) = products.last_mut() {
                if previous.nomenclature_code.is_none() {
                    previous.nomenclature_code = Some(name);
                }
            }
            i += 2;
            continue;
        }

        let mut product = Product::new(next_id(&mut counter), name);
        product.barcode = cell_at(row, BARCODE_COLUMN).text();
        product.quantity_warehouse = Some(cell_at(next, QUANTITY_COLUMN).number().unwrap_or(0.0));
        product.row_index = u32::try_from(i).ok();
        products.push(product);
        i += 2;
    }
    products
}

/// Boundary checks applied to every parsed list.
fn validate(products: Vec<Product>) -> Vec<Product> {
    let mut seen_barcodes: HashSet<String> = HashSet::new();
    let mut validated = Vec::with_capacity(products.len());

    for mut product in products {
        if product.name.trim().is_empty() {
            debug!(id = %product.id, "Dropping product with blank name");
            continue;
        }
        if let Some(quantity) = product.quantity_warehouse {
            if quantity < 0.0 {
                warn!(id = %product.id, quantity, "Negative warehouse quantity clamped to 0");
                product.quantity_warehouse = Some(0.0);
            }
        }
        if let Some(barcode) = product.barcode.clone() {
            if !seen_barcodes.insert(barcode.clone()) {
                warn!(
                    id = %product.id,
                    barcode = %barcode,
                    "Barcode repeats an earlier row; leaving this product unassigned"
                );
                product.barcode = None;
            }
        }
        validated.push(product);
    }
    validated
}

// ===========================================================================
// Tests
// ===========================================================================
