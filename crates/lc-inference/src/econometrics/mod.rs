//! Panel econometrics for the pilot-policy DID design.
//!
//! - **OLS** with homoskedastic, HC1 or cluster-robust (CR1) covariance and
//!   an explicit rank check on the design.
//! - **Fixed effects** as drop-first dummies or absorbed by alternating
//!   projections.
//! - **Two-way fixed-effects DID** and a binned **event study** with
//!   Student-t confidence intervals.

pub mod did;
pub mod dummies;
pub mod hdfe;
pub mod panel;

pub use did::{
    EventStudyFit, EventStudySpec, EventTerm, EventWindow, FeMethod, TwfeFit, TwfeSpec,
    event_study, twfe_did,
};
pub use dummies::DummyEncoder;
pub use hdfe::FixedEffectsSolver;
pub use panel::{
    DofPolicy, OlsFit, OlsOptions, Variance, cluster_robust_vcov, collinear_columns,
    fit_ols, fit_ols_clustered, hc1_vcov,
};
