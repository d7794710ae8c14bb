//! Owned cell grids decoded from XLSX workbooks.
//!
//! The parsers never touch calamine types directly; they run over `Sheet`
//! grids, so tests can feed synthetic layouts without workbook fixtures.

use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};

use crate::error::UpdateError;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

static EMPTY: Cell = Cell::Empty;

#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Sheet {
            name: name.into(),
            rows,
        }
    }

    /// Cell at 0-based (row, col); out-of-range reads are empty, so the
    /// scanners don't need bounds bookkeeping.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Trimmed text rendering of a cell. Numbers render without a
    /// trailing `.0` so numeric labels still compare as text.
    pub fn text(&self, row: usize, col: usize) -> String {
        match self.cell(row, col) {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
        }
    }

    /// Numeric value of a cell; text parses after comma removal. Anything
    /// else is absent, never zero.
    pub fn number(&self, row: usize, col: usize) -> Option<f64> {
        match self.cell(row, col) {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => {
                let cleaned = compact(s).replace(',', "");
                if cleaned.is_empty() {
                    None
                } else {
                    cleaned.parse::<f64>().ok()
                }
            }
            Cell::Empty => None,
        }
    }
}

/// Strip ASCII and full-width spaces; the source sheets pad labels
/// inconsistently (全 国, 宿泊 数).
pub fn compact(s: &str) -> String {
    s.chars().filter(|c| *c != ' ' && *c != '\u{3000}').collect()
}

#[derive(Debug, Clone)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn from_sheets(sheets: Vec<Sheet>) -> Self {
        Workbook { sheets }
    }

    /// Decode every sheet of an XLSX workbook into grids with absolute
    /// coordinates (the used area is re-padded to start at A1, matching
    /// how the fixed layouts are described).
    pub fn from_xlsx_bytes(bytes: &[u8]) -> Result<Self, UpdateError> {
        let mut wb: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
            .map_err(|e| UpdateError::Parse(format!("failed to open xlsx: {e}")))?;

        let mut sheets = Vec::new();
        for name in wb.sheet_names() {
            let range = wb
                .worksheet_range(&name)
                .map_err(|e| UpdateError::Parse(format!("failed to read sheet {name}: {e}")))?;

            let (row_off, col_off) = match range.start() {
                Some((r, c)) => (r as usize, c as usize),
                None => (0, 0),
            };

            let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_off];
            for src_row in range.rows() {
                let mut row = vec![Cell::Empty; col_off];
                row.extend(src_row.iter().map(convert_cell));
                rows.push(row);
            }
            sheets.push(Sheet::from_rows(name, rows));
        }
        Ok(Workbook::from_sheets(sheets))
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn first_sheet(&self) -> Option<&Sheet> {
        self.sheets.first()
    }
}

fn convert_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}
