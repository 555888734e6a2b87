//! City-year panel handling for lcdid.
//!
//! Everything between the raw yearbook files and the estimators:
//!
//! - [`io`]: CSV/TSV and spreadsheet readers, CSV and XLSX writers
//! - [`schema`]: named-column extraction checked against documented positions
//! - [`city`]: city-name cleaning, canonical names and join keys
//! - [`merge`]: left joins on (city key, year) with match reports
//! - [`pilot`]: pilot roster, `treat`/`post`/`did` construction and checks
//! - [`transform`]: logs, squares, ratios, deflation, winsorizing, filling
//! - [`diagnostics`]: data-quality warnings
//! - [`describe`]: descriptive statistics
//! - [`simulate`]: synthetic panels with a known effect

pub mod city;
pub mod describe;
pub mod diagnostics;
pub mod io;
pub mod merge;
pub mod pilot;
pub mod schema;
pub mod simulate;
pub mod table;
pub mod transform;

pub use diagnostics::{DiagnosticWarning, DiagnosticsConfig, DiagnosticsReport, diagnose};
pub use io::{ReadOptions, SheetRef, read_raw, read_table, write_csv, write_xlsx};
pub use merge::{Dedupe, MergeOptions, MergeReport, left_join};
pub use pilot::{DidSummary, PilotAssignment, PilotBatch, PilotRoster, apply_did, relative_years, verify_did};
pub use schema::{ColumnSpec, SourceSchema};
pub use simulate::{SimulatedPanel, SimulationConfig, simulate_panel};
pub use table::{CITY, CITY_CODE, Column, ColumnKind, Table, YEAR};
pub use transform::{Derive, FillMethod, LogPolicy, WinsorizeSummary};
