#![allow(clippy::new_without_default)]

//! Cross-cutting infrastructure shared by the wiremesh crates: structured logging,
//! declarative configuration loading and small time helpers. None of this is part of the
//! wire protocol or concurrency pipeline -- it is the ambient stack every binary built on
//! top of `wiremesh-core` is expected to carry.

pub mod config;
pub mod logging;
pub mod time;
