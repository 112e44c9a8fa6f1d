//! CAD service access and concurrent assembly fetching.
//!
//! This crate provides:
//! - [`CadService`]: the abstraction the pipeline consumes (BOM, preview, part export)
//! - [`OnshapeClient`]: an HTTP implementation of [`CadService`]
//! - [`Downloader`]: bounded, fail-fast fetch orchestration across pages

pub mod client;
pub mod fetch;
pub mod service;

pub use client::OnshapeClient;
pub use fetch::{
    Downloader, ExportedPart, FetchProgress, FetchRequest, FetchedAssembly, PageFetchOutcome,
    SilentFetchProgress,
};
pub use service::{CadBom, CadBomItem, CadService, PartSource};
