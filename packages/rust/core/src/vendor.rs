//! Vendor mapping of hardware parts into purchasing rows.

use std::collections::HashMap;

use tracing::debug;

use eva3d_shared::{
    Eva3dError, PartType, PurchaseLine, ResolvedSuperbomEntry, Result, SuperbomEntry,
    VendorMapping, VendorMappingEntry,
};

fn lookup<'m>(mapping: &'m VendorMapping, name: &str) -> Result<&'m VendorMappingEntry> {
    mapping.get(name).ok_or_else(|| Eva3dError::UnmappedPart {
        name: name.to_string(),
    })
}

/// Purchasing rows for every hardware part in the superbom.
///
/// Hardware entries are grouped by part name across namespaces (quantities
/// summed, first-appearance order). Every hardware part must have a mapping
/// row; rows marked ignore are dropped.
pub fn purchasing_list(
    superbom: &[SuperbomEntry],
    mapping: &VendorMapping,
) -> Result<Vec<PurchaseLine>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut totals: Vec<(&str, f64)> = Vec::new();
    for entry in superbom.iter().filter(|e| e.part_type == PartType::Hardware) {
        match index.get(entry.name.as_str()) {
            Some(&at) => totals[at].1 += entry.quantity,
            None => {
                index.insert(entry.name.as_str(), totals.len());
                totals.push((entry.name.as_str(), entry.quantity));
            }
        }
    }

    let mut lines = Vec::with_capacity(totals.len());
    for (name, quantity) in totals {
        let row = lookup(mapping, name)?;
        if row.ignore {
            debug!(part = name, vendor = %mapping.vendor, "ignored by vendor mapping");
            continue;
        }
        lines.push(PurchaseLine {
            quantity,
            vendor_sku: row.vendor_sku.clone(),
            vendor_part_name: row.vendor_part_name.clone(),
            eva_part_name: name.to_string(),
        });
    }
    Ok(lines)
}

/// Join each superbom entry with its vendor row.
///
/// Printable entries carry no vendor row. Hardware entries must be mapped;
/// ignored ones are dropped.
pub fn resolve_superbom(
    superbom: &[SuperbomEntry],
    mapping: &VendorMapping,
) -> Result<Vec<ResolvedSuperbomEntry>> {
    let mut resolved = Vec::with_capacity(superbom.len());
    for entry in superbom {
        let vendor = match entry.part_type {
            PartType::Printable => None,
            PartType::Hardware => {
                let row = lookup(mapping, &entry.name)?;
                if row.ignore {
                    continue;
                }
                Some(row.clone())
            }
        };
        resolved.push(ResolvedSuperbomEntry {
            entry: entry.clone(),
            vendor,
        });
    }
    Ok(resolved)
}
