//! Core reconciliation logic and pipeline orchestration for eva3d.
//!
//! This crate ties together BOM parsing, archive reconciliation, CAD
//! fetching, aggregation and packaging into end-to-end workflows
//! (e.g., [`pipeline::unpack_all`]).

pub mod cache;
pub mod pipeline;
pub mod reconciler;
pub mod superbom;
pub mod vendor;
