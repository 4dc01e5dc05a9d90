//! # ns-unbinned
//!
//! Event-level (unbinned) likelihood models for NextStat.
//!
//! This crate provides:
//! - Parametric one-dimensional PDFs truncated to the observable range.
//! - An extended unbinned mixture model with yields, implementing
//!   [`ns_core::DensityModel`] so the hypothesis-test calculators can fit,
//!   integrate and sample it.
//! - A multi-channel NLL with Gaussian constraints and its loss builder.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod loss;
pub mod model;
pub mod pdf;

pub use loss::{Constraint, UnbinnedLossBuilder, UnbinnedNll};
pub use model::{Process, UnbinnedModel, YieldExpr};
pub use pdf::{ExponentialPdf, GaussianPdf, UnbinnedPdf};
