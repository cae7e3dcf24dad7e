//! Utility library for the lossweep experiments

pub mod other;
pub mod results;
