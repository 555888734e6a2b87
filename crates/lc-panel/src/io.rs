//! Reading and writing panel tables.
//!
//! Inputs are CSV/TSV (via `csv`) or spreadsheets (XLSX/XLS/ODS via
//! `calamine`). Outputs are CSV or multi-sheet XLSX (via `rust_xlsxwriter`).

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use lc_core::{Error, Result};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::table::{Column, Table};

/// A raw spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Num(f64),
    Text(String),
}

impl Cell {
    /// Parse a CSV field: empty, number, or text.
    pub fn parse(field: &str) -> Cell {
        let s = field.trim();
        if s.is_empty() {
            Cell::Empty
        } else if let Ok(v) = s.parse::<f64>() {
            Cell::Num(v)
        } else {
            Cell::Text(field.to_string())
        }
    }

    fn from_data(d: &Data) -> Cell {
        match d {
            Data::Empty => Cell::Empty,
            Data::Int(v) => Cell::Num(*v as f64),
            Data::Float(v) => Cell::Num(*v),
            Data::Bool(b) => Cell::Num(if *b { 1.0 } else { 0.0 }),
            Data::DateTime(dt) => Cell::Num(dt.as_f64()),
            Data::String(s) if s.trim().is_empty() => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Error(_) => Cell::Empty,
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Num(v) => format!("{}", v),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// Header row plus data rows, before any typing.
#[derive(Debug, Clone, Default)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawSheet {
    /// Cell `(row, col)`; short rows read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows[row].get(col).unwrap_or(&Cell::Empty)
    }

    /// Type every column: numeric when each cell is empty or a number,
    /// text otherwise.
    pub fn into_table(self) -> Result<Table> {
        let mut cols = Vec::with_capacity(self.headers.len());
        for (j, name) in self.headers.iter().enumerate() {
            let cells: Vec<&Cell> = (0..self.rows.len()).map(|i| self.cell(i, j)).collect();
            let numeric = cells.iter().all(|c| matches!(c, Cell::Empty | Cell::Num(_)));
            let col = if numeric {
                Column::Num(
                    cells
                        .iter()
                        .map(|c| if let Cell::Num(v) = c { *v } else { f64::NAN })
                        .collect(),
                )
            } else {
                Column::Text(cells.iter().map(|c| c.to_text()).collect())
            };
            cols.push((name.clone(), col));
        }
        Table::from_columns(cols)
    }
}

/// Worksheet selector: by name or zero-based index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetRef {
    Index(usize),
    Name(String),
}

impl Default for SheetRef {
    fn default() -> Self {
        SheetRef::Index(0)
    }
}

/// How to locate the header and data in a source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Worksheet (spreadsheets only).
    #[serde(default)]
    pub sheet: SheetRef,
    /// Zero-based row holding the column names; rows above it are skipped.
    #[serde(default)]
    pub header_row: usize,
    /// Field delimiter for text files; defaults by extension.
    #[serde(default)]
    pub delimiter: Option<char>,
}

fn extension(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase()
}

fn is_spreadsheet(path: &Path) -> bool {
    matches!(extension(path).as_str(), "xlsx" | "xlsm" | "xlsb" | "xls" | "ods")
}

/// Read the header and data rows of a CSV/TSV or spreadsheet file.
pub fn read_raw(path: &Path, opts: &ReadOptions) -> Result<RawSheet> {
    let rows = if is_spreadsheet(path) { read_sheet_rows(path, &opts.sheet)? } else { read_text_rows(path, opts)? };
    let mut rows = rows.into_iter().skip(opts.header_row);
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| Error::Format(format!("{}: no header row {}", path.display(), opts.header_row)))?
        .iter()
        .map(|c| c.to_text().trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(Error::Format(format!("{}: header row is empty", path.display())));
    }
    let rows: Vec<Vec<Cell>> = rows.filter(|r| r.iter().any(|c| *c != Cell::Empty)).collect();
    debug!(path = %path.display(), n_cols = headers.len(), n_rows = rows.len(), "read source");
    Ok(RawSheet { headers, rows })
}

/// Read a file and type its columns.
pub fn read_table(path: &Path, opts: &ReadOptions) -> Result<Table> {
    read_raw(path, opts)?.into_table()
}

fn read_text_rows(path: &Path, opts: &ReadOptions) -> Result<Vec<Vec<Cell>>> {
    let delimiter = match opts.delimiter {
        Some(c) if c.is_ascii() => c as u8,
        Some(c) => return Err(Error::Validation(format!("delimiter '{}' must be ASCII", c))),
        None if matches!(extension(path).as_str(), "tsv" | "tab") => b'\t',
        None => b',',
    };
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Format(format!("failed to open {}: {}", path.display(), e)))?;
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| Error::Format(format!("{}: {}", path.display(), e)))?;
        rows.push(record.iter().map(|f| Cell::parse(f.trim_start_matches('\u{feff}'))).collect());
    }
    Ok(rows)
}

fn read_sheet_rows(path: &Path, sheet: &SheetRef) -> Result<Vec<Vec<Cell>>> {
    let mut wb = open_workbook_auto(path)
        .map_err(|e| Error::Format(format!("failed to open {}: {}", path.display(), e)))?;
    let names = wb.sheet_names();
    let name = match sheet {
        SheetRef::Name(n) => n.clone(),
        SheetRef::Index(i) => names.get(*i).cloned().ok_or_else(|| {
            Error::Format(format!("{}: no sheet at index {} ({} sheets)", path.display(), i, names.len()))
        })?,
    };
    let range = wb
        .worksheet_range(&name)
        .map_err(|e| Error::Format(format!("{}: sheet '{}': {}", path.display(), name, e)))?;
    Ok(range.rows().map(|r| r.iter().map(Cell::from_data).collect()).collect())
}

/// Write `table` as CSV. Missing values are written as empty fields.
pub fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| Error::Format(format!("failed to create {}: {}", path.display(), e)))?;
    let fmt = |e: csv::Error| Error::Format(format!("{}: {}", path.display(), e));
    wtr.write_record(table.names()).map_err(fmt)?;
    let cols: Vec<&Column> = table.columns().map(|(_, c)| c).collect();
    for i in 0..table.n_rows() {
        wtr.write_record(cols.iter().map(|c| c.display(i))).map_err(fmt)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write one worksheet per `(name, table)`.
pub fn write_xlsx(path: &Path, sheets: &[(&str, &Table)]) -> Result<()> {
    let fmt = |e: rust_xlsxwriter::XlsxError| Error::Format(format!("{}: {}", path.display(), e));
    let mut workbook = Workbook::new();
    for (name, table) in sheets {
        let ws = workbook.add_worksheet();
        ws.set_name(*name).map_err(fmt)?;
        for (j, (col_name, col)) in table.columns().enumerate() {
            let c = u16::try_from(j).map_err(|_| Error::Format(format!("sheet '{}' has too many columns", name)))?;
            ws.write_string(0, c, col_name).map_err(fmt)?;
            for i in 0..table.n_rows() {
                let r = u32::try_from(i + 1)
                    .map_err(|_| Error::Format(format!("sheet '{}' has too many rows", name)))?;
                match col {
                    Column::Num(v) if v[i].is_finite() => {
                        ws.write_number(r, c, v[i]).map_err(fmt)?;
                    }
                    Column::Num(_) => {}
                    Column::Text(v) => {
                        if !v[i].is_empty() {
                            ws.write_string(r, c, &v[i]).map_err(fmt)?;
                        }
                    }
                }
            }
        }
    }
    workbook.save(path).map_err(fmt)?;
    debug!(path = %path.display(), n_sheets = sheets.len(), "wrote workbook");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{CITY, YEAR};
    use std::path::PathBuf;

    fn tmp_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("lc_panel_{}_{}_{}", std::process::id(), nanos, name))
    }

    #[test]
    fn test_cell_parse() {
        assert_eq!(Cell::parse(""), Cell::Empty);
        assert_eq!(Cell::parse(" 2.5 "), Cell::Num(2.5));
        assert_eq!(Cell::parse("北京市"), Cell::Text("北京市".into()));
    }

    #[test]
    fn test_csv_roundtrip_with_header_offset() {
        let path = tmp_path("in.csv");
        std::fs::write(&path, "source: yearbook\ncity_name,year,gdp\n北京市,2010,1.5\n上海市,2010,\n").unwrap();
        let opts = ReadOptions { header_row: 1, ..ReadOptions::default() };
        let t = read_table(&path, &opts).unwrap();
        assert_eq!(t.names(), &[CITY, YEAR, "gdp"]);
        assert_eq!(t.cities().unwrap(), &["北京市", "上海市"]);
        assert!(t.num("gdp").unwrap()[1].is_nan());

        let out = tmp_path("out.csv");
        write_csv(&out, &t).unwrap();
        let back = read_table(&out, &ReadOptions::default()).unwrap();
        assert_eq!(back.years().unwrap(), vec![2010, 2010]);
        assert_eq!(back.num("gdp").unwrap()[0], 1.5);
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(out);
    }

    #[test]
    fn test_mixed_column_becomes_text() {
        let raw = RawSheet {
            headers: vec!["fdi".into()],
            rows: vec![vec![Cell::Num(1.0)], vec![Cell::Text("n/a".into())], vec![]],
        };
        let t = raw.into_table().unwrap();
        assert_eq!(t.text("fdi").unwrap(), &["1", "n/a", ""]);
    }

    #[test]
    fn test_xlsx_roundtrip() {
        let t = Table::from_columns(vec![
            (CITY.into(), Column::Text(vec!["吉林市".into(), "".into()])),
            (YEAR.into(), Column::Num(vec![2012.0, 2013.0])),
            ("x".into(), Column::Num(vec![f64::NAN, 0.25])),
        ])
        .unwrap();
        let path = tmp_path("out.xlsx");
        write_xlsx(&path, &[("panel", &t)]).unwrap();
        let opts = ReadOptions { sheet: SheetRef::Name("panel".into()), ..ReadOptions::default() };
        let back = read_table(&path, &opts).unwrap();
        assert_eq!(back.text(CITY).unwrap(), &["吉林市", ""]);
        assert_eq!(back.years().unwrap(), vec![2012, 2013]);
        assert!(back.num("x").unwrap()[0].is_nan());
        assert!(read_table(&path, &ReadOptions { sheet: SheetRef::Index(3), ..ReadOptions::default() }).is_err());
        let _ = std::fs::remove_file(path);
    }
}
