//! CSV writers for the superbom and the purchasing list.

use std::io::Write;

use csv::Writer;

use eva3d_shared::{
    Eva3dError, PurchaseLine, ResolvedSuperbomEntry, Result, SuperbomEntry, format_quantity,
};

pub const SUPERBOM_TEMPLATE_HEADER: [&str; 7] = [
    "namespace",
    "eva_part_name",
    "qty",
    "type",
    "vendor_part_name",
    "vendor_sku",
    "vendor_ignore",
];

pub const SUPERBOM_RESOLVED_HEADER: [&str; 6] = [
    "namespace",
    "eva_part_name",
    "qty",
    "type",
    "vendor_part_name",
    "vendor_sku",
];

pub const PURCHASING_HEADER: [&str; 4] = ["qty", "vendor_sku", "vendor_part_name", "eva_part_name"];

const CSV_OUTPUT: &str = "CSV output";

fn csv_err(e: csv::Error) -> Eva3dError {
    let source = match e.into_kind() {
        csv::ErrorKind::Io(err) => err,
        other => std::io::Error::other(format!("{other:?}")),
    };
    Eva3dError::io(CSV_OUTPUT, source)
}

/// Superbom with blank vendor columns, ready to be filled in as a mapping.
pub fn write_superbom_template<W: Write>(entries: &[SuperbomEntry], out: W) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    writer
        .write_record(SUPERBOM_TEMPLATE_HEADER)
        .map_err(csv_err)?;
    for entry in entries {
        writer
            .write_record([
                entry.namespace.as_str(),
                entry.name.as_str(),
                format_quantity(entry.quantity).as_str(),
                entry.part_type.as_str(),
                "",
                "",
                "",
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| Eva3dError::io(CSV_OUTPUT, e))
}

/// Superbom with vendor columns joined in; printable rows keep them blank.
pub fn write_superbom_resolved<W: Write>(entries: &[ResolvedSuperbomEntry], out: W) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    writer
        .write_record(SUPERBOM_RESOLVED_HEADER)
        .map_err(csv_err)?;
    for resolved in entries {
        let entry = &resolved.entry;
        let (vendor_part_name, vendor_sku) = resolved
            .vendor
            .as_ref()
            .map(|v| (v.vendor_part_name.as_str(), v.vendor_sku.as_str()))
            .unwrap_or(("", ""));
        writer
            .write_record([
                entry.namespace.as_str(),
                entry.name.as_str(),
                format_quantity(entry.quantity).as_str(),
                entry.part_type.as_str(),
                vendor_part_name,
                vendor_sku,
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| Eva3dError::io(CSV_OUTPUT, e))
}

/// Purchasing list: `qty,vendor_sku,vendor_part_name,eva_part_name`.
pub fn write_purchasing_list<W: Write>(lines: &[PurchaseLine], out: W) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    writer.write_record(PURCHASING_HEADER).map_err(csv_err)?;
    for line in lines {
        writer
            .write_record([
                format_quantity(line.quantity).as_str(),
                line.vendor_sku.as_str(),
                line.vendor_part_name.as_str(),
                line.eva_part_name.as_str(),
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| Eva3dError::io(CSV_OUTPUT, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eva3d_shared::{PartType, VendorMappingEntry};

    fn entry(name: &str, quantity: f64, part_type: PartType) -> SuperbomEntry {
        SuperbomEntry {
            namespace: "hotend".into(),
            name: name.into(),
            quantity,
            part_type,
            url: None,
        }
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn template_leaves_vendor_columns_blank() {
        let entries = vec![
            entry("Bracket", 2.0, PartType::Printable),
            entry("M3x10", 4.0, PartType::Hardware),
        ];
        let out = render(|buf| write_superbom_template(&entries, buf));
        assert_eq!(
            out,
            "namespace,eva_part_name,qty,type,vendor_part_name,vendor_sku,vendor_ignore\n\
             hotend,Bracket,2,printable,,,\n\
             hotend,M3x10,4,hardware,,,\n"
        );
    }

    #[test]
    fn resolved_joins_vendor_columns() {
        let entries = vec![
            ResolvedSuperbomEntry {
                entry: entry("Bracket", 1.0, PartType::Printable),
                vendor: None,
            },
            ResolvedSuperbomEntry {
                entry: entry("M3x10", 4.0, PartType::Hardware),
                vendor: Some(VendorMappingEntry {
                    eva_part_name: "M3x10".into(),
                    eva_part_type: "hardware".into(),
                    vendor_part_name: "Screw M3 x 10, DIN912".into(),
                    vendor_sku: "ACME-310".into(),
                    ignore: false,
                }),
            },
        ];
        let out = render(|buf| write_superbom_resolved(&entries, buf));
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[1], "hotend,Bracket,1,printable,,");
        assert_eq!(
            lines[2],
            "hotend,M3x10,4,hardware,\"Screw M3 x 10, DIN912\",ACME-310"
        );
    }

    #[test]
    fn purchasing_list_header_and_rows() {
        let lines = vec![PurchaseLine {
            quantity: 12.0,
            vendor_sku: "ACME-310".into(),
            vendor_part_name: "M3 SHCS".into(),
            eva_part_name: "M3x10".into(),
        }];
        let out = render(|buf| write_purchasing_list(&lines, buf));
        assert_eq!(
            out,
            "qty,vendor_sku,vendor_part_name,eva_part_name\n12,ACME-310,M3 SHCS,M3x10\n"
        );
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_are_io_errors() {
        let lines = vec![PurchaseLine {
            quantity: 4.0,
            vendor_sku: "A-1".into(),
            vendor_part_name: "Screw".into(),
            eva_part_name: "M3x10".into(),
        }];
        let err = write_purchasing_list(&lines, ClosedPipe).unwrap_err();
        match err {
            Eva3dError::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::BrokenPipe)
            }
            other => panic!("expected an I/O error, got {other}"),
        }
    }
}
