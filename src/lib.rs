//! Sequential risk measurement for comparison audits.
//!
//! Each audited assertion is tested with a betting martingale: a sample of
//! comparison assort values is drawn one at a time, a bet is placed on each
//! draw from the errors seen so far, and the test stops once the
//! accumulated wealth crosses `1 / risk_limit`.

pub mod betting;
pub mod config;
pub mod error;
pub mod error_counts;
pub mod estimator;
pub mod logging;
pub mod martingale;
pub mod numeric;
pub mod persist;
pub mod population;
pub mod report;
pub mod sampler;
pub mod simulate;
pub mod taus;
pub mod tracker;

pub use error::{AuditError, Result};
