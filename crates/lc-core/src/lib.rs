//! Core types shared by the lcdid crates: the error enum every library
//! crate returns and the coefficient/fit summary types that estimators hand
//! to reporting code.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Estimate, FitSummary, significance_stars};
