//! Core types for NextStat hypothesis testing
//!
//! Everything the inference layer consumes from a statistical model lives here:
//! the error type, datasets, fit results, the parameter set with scoped fixing,
//! and the capability traits a model backend and a minimizer implement.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod params;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use params::{FixGuard, Parameter, ParameterSet};
pub use traits::{DensityModel, Loss, LossBuilder, Minimizer, numerical_gradient};
pub use types::{Dataset, FitResult};
