//! Stratified LD-score regression (library crate).
//!
//! LD scores from PLINK panels, regression weights, block-jackknife
//! heritability partitioning and the file pipeline around them.

pub mod error;
pub mod logging;
pub mod types;

pub mod config;
pub mod io;
pub mod parallel;

pub mod genotype;
pub mod ldscore;
pub mod window;

pub mod design;
pub mod jackknife;
pub mod regression;
pub mod weights;

pub mod annotation;
pub mod inputs;
pub mod munge;
pub mod overlap;
pub mod pipeline;
pub mod sumstats;
