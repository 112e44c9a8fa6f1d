//! Shared types, error model, and configuration for eva3d.
//!
//! This crate is the foundation depended on by all other eva3d crates.
//! It provides:
//! - [`Eva3dError`]: the unified error type
//! - Domain types ([`LineItem`], [`BillOfMaterials`], [`SuperbomEntry`], [`CadReference`], [`Page`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CadConfig, FetchConfig, FetchSettings, PageEntry, PathsConfig, VendorEntry,
    config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_credentials,
};
pub use error::{Eva3dError, MalformedBomReason, Result};
pub use types::{
    BillOfMaterials, CadReference, LineItem, Page, PartType, PurchaseLine,
    ReconciliationResult, ResolvedSuperbomEntry, SuperbomEntry, VendorMapping,
    VendorMappingEntry, WvmType, format_quantity, is_plain_file_name, slugify,
};
