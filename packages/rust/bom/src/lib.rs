//! Bill-of-materials and vendor-mapping table parsers.
//!
//! Both formats are comma-delimited CSV with double-quote quoting and a
//! header row. BOM rows are never merged here: every row becomes one
//! [`LineItem`](eva3d_shared::LineItem) and merging happens when the
//! superbom is aggregated.

mod parser;
mod vendor;

pub use parser::{
    MATERIAL_COLUMN, NAME_COLUMN, QUANTITY_COLUMN, load_page_bom, parse_bom, parse_bom_file,
};
pub use vendor::{VENDOR_COLUMNS, parse_vendor_mapping, parse_vendor_mapping_file};
