//! Superbom aggregation across every stored page BOM.

use std::collections::HashMap;

use tracing::{debug, instrument};

use eva3d_shared::{BillOfMaterials, Eva3dError, Result, SuperbomEntry};
use eva3d_storage::Storage;

/// Group line items by `(namespace, name)` and sum their quantities.
///
/// Entries keep the order in which each key was first seen. Rows sharing a
/// key must agree on printable vs hardware, otherwise
/// [`Eva3dError::InconsistentMaterial`] is returned.
pub fn aggregate(boms: &[BillOfMaterials]) -> Result<Vec<SuperbomEntry>> {
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    let mut entries: Vec<SuperbomEntry> = Vec::new();

    for bom in boms {
        for item in &bom.items {
            let key = (bom.namespace.as_str(), item.name.as_str());
            match index.get(&key) {
                Some(&at) => {
                    let entry = &mut entries[at];
                    if entry.part_type != item.part_type() {
                        return Err(Eva3dError::InconsistentMaterial {
                            namespace: bom.namespace.clone(),
                            name: item.name.clone(),
                        });
                    }
                    entry.quantity += item.quantity;
                }
                None => {
                    index.insert(key, entries.len());
                    entries.push(SuperbomEntry {
                        namespace: bom.namespace.clone(),
                        name: item.name.clone(),
                        quantity: item.quantity,
                        part_type: item.part_type(),
                        url: item.url(),
                    });
                }
            }
        }
    }

    Ok(entries)
}

/// Recompute the superbom from the current contents of storage.
#[instrument(skip_all)]
pub async fn rebuild_superbom(storage: &Storage) -> Result<Vec<SuperbomEntry>> {
    let boms = storage.list_boms().await?;
    let entries = aggregate(&boms)?;
    debug!(boms = boms.len(), entries = entries.len(), "superbom rebuilt");
    Ok(entries)
}
