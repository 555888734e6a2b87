//! # lc-inference
//!
//! Estimators behind lcdid:
//!
//! - [`regression`]: design matrices, closed-form OLS, L2-penalised logistic
//!   regression (propensity scores).
//! - [`econometrics`]: cluster-robust OLS, dummy / absorbed fixed effects,
//!   two-way fixed-effects DID and event studies.
//! - [`psm`]: per-year nearest-neighbour propensity-score matching.
//! - [`balance`]: covariate balance before and after matching.

pub mod balance;
pub mod econometrics;
pub mod psm;
pub mod regression;

pub use balance::{BalanceRow, balance_table, pooled_t_test, standardized_bias};
pub use econometrics::{
    DofPolicy, DummyEncoder, EventStudyFit, EventStudySpec, EventTerm, EventWindow, FeMethod,
    FixedEffectsSolver, OlsFit, OlsOptions, TwfeFit, TwfeSpec, Variance, event_study, fit_ols,
    fit_ols_clustered, twfe_did,
};
pub use psm::{MatchPair, PsmConfig, PsmResult, YearMatch, match_nearest_neighbor, propensity_match};
pub use regression::{DesignMatrix, LogisticFit, LogisticRegression};
