//! Probability building blocks for NextStat.
//!
//! Normal-distribution math for turning test statistics into p-values and
//! significances, and small numeric helpers for stable log-space arithmetic.

pub mod math;
pub mod normal;
