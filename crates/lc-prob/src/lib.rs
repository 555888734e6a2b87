//! Probability building blocks for lcdid.
//!
//! - small numeric helpers (stable log/exp/sigmoid primitives)
//! - Student-t tail probabilities and critical values for coefficient tests
//! - descriptive summaries over columns with missing values

pub mod math;
pub mod student_t;
pub mod summary;
