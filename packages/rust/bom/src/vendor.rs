//! Vendor mapping CSV parsing.

use std::io::Read;
use std::path::Path;

use eva3d_shared::{Eva3dError, Result, VendorMapping, VendorMappingEntry};

/// Required vendor mapping headers, in canonical order.
pub const VENDOR_COLUMNS: [&str; 5] = [
    "eva_part_name",
    "eva_part_type",
    "vendor_part_name",
    "vendor_sku",
    "vendor_ignore",
];

/// Parse a vendor substitution table for `vendor`.
pub fn parse_vendor_mapping<R: Read>(reader: R, vendor: &str, source: &str) -> Result<VendorMapping> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| Eva3dError::validation(format!("{source}: unreadable header: {e}")))?
        .clone();

    let mut idx = [0usize; 5];
    for (slot, column) in idx.iter_mut().zip(VENDOR_COLUMNS) {
        *slot = headers.iter().position(|h| h == column).ok_or_else(|| {
            Eva3dError::validation(format!("{source}: missing column '{column}'"))
        })?;
    }
    let [name_idx, type_idx, part_idx, sku_idx, ignore_idx] = idx;

    let mut mapping = VendorMapping::new(vendor);
    for (n, record) in reader.records().enumerate() {
        let row = n + 2;
        let record = record
            .map_err(|e| Eva3dError::validation(format!("{source}: row {row}: {e}")))?;
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();

        let eva_part_name = field(name_idx);
        if eva_part_name.is_empty() {
            return Err(Eva3dError::validation(format!(
                "{source}: row {row}: empty eva_part_name"
            )));
        }

        let raw_ignore = field(ignore_idx);
        let ignore = parse_flag(&raw_ignore).ok_or_else(|| {
            Eva3dError::validation(format!(
                "{source}: row {row}: vendor_ignore '{raw_ignore}' is not a boolean"
            ))
        })?;

        mapping.insert(VendorMappingEntry {
            eva_part_name,
            eva_part_type: field(type_idx),
            vendor_part_name: field(part_idx),
            vendor_sku: field(sku_idx),
            ignore,
        });
    }

    tracing::debug!(vendor, entries = mapping.len(), "parsed vendor mapping");
    Ok(mapping)
}

/// Parse a vendor mapping CSV file.
pub fn parse_vendor_mapping_file(path: &Path, vendor: &str) -> Result<VendorMapping> {
    let file = std::fs::File::open(path).map_err(|e| Eva3dError::io(path, e))?;
    parse_vendor_mapping(file, vendor, &path.display().to_string())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "x" => Some(true),
        "" | "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "eva_part_name, eva_part_type, vendor_part_name, vendor_sku, vendor_ignore\n\
                         M3x10,hardware,\"Screw M3 x 10, DIN912\",ACME-310,\n\
                         M3 nut, hardware, Hex nut M3, ACME-N3, TRUE\n\
                         Zip tie, hardware, , , yes\n";

    #[test]
    fn parses_rows_and_flags() {
        let mapping = parse_vendor_mapping(TABLE.as_bytes(), "acme", "inline").expect("parse");
        assert_eq!(mapping.vendor, "acme");
        assert_eq!(mapping.len(), 3);

        let screw = mapping.get("M3x10").unwrap();
        assert_eq!(screw.vendor_part_name, "Screw M3 x 10, DIN912");
        assert_eq!(screw.vendor_sku, "ACME-310");
        assert!(!screw.ignore);

        assert!(mapping.get("M3 nut").unwrap().ignore);
        assert!(mapping.get("Zip tie").unwrap().ignore);
    }

    #[test]
    fn missing_column_is_reported() {
        let table = "eva_part_name,vendor_part_name,vendor_sku,vendor_ignore\nX,Y,Z,\n";
        let err = parse_vendor_mapping(table.as_bytes(), "acme", "acme.csv").unwrap_err();
        assert!(err.to_string().contains("eva_part_type"));
    }

    #[test]
    fn unknown_ignore_flag_is_rejected() {
        let table = "eva_part_name,eva_part_type,vendor_part_name,vendor_sku,vendor_ignore\n\
                     X,hardware,Y,Z,maybe\n";
        let err = parse_vendor_mapping(table.as_bytes(), "acme", "acme.csv").unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }
}
