//! Output artifacts: the packaged printable tree and CSV reports.
//!
//! - [`gather_tree`] / [`archive_tree`] / [`package`]: flat printable tree and its zip
//! - [`write_superbom_template`], [`write_superbom_resolved`], [`write_purchasing_list`]: CSV writers

mod package;
mod report;

pub use package::{PackageResult, archive_tree, gather_tree, package};
pub use report::{
    PURCHASING_HEADER, SUPERBOM_RESOLVED_HEADER, SUPERBOM_TEMPLATE_HEADER, write_purchasing_list,
    write_superbom_resolved, write_superbom_template,
};
