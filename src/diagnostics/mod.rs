//! # Diagnostics
//!
//! Operational verification tooling. Not part of the pipeline's data path,
//! but the acceptance oracle for its consistency contract.

pub mod convergence;

pub use convergence::{ConvergenceChecker, ConvergenceReport};
