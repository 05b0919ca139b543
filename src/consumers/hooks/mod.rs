//! Ready-to-use lifecycle hooks.

pub mod pre_start;
