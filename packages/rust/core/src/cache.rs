//! Per-run cache of parsed page BOMs.

use std::collections::HashMap;

use tracing::debug;

use eva3d_shared::{BillOfMaterials, Page, Result};

/// Parsed BOMs keyed by `namespace + source path`.
///
/// Nothing is evicted implicitly; call [`BomCache::invalidate`] or
/// [`BomCache::clear`] when sources change.
#[derive(Debug, Default)]
pub struct BomCache {
    entries: HashMap<String, BillOfMaterials>,
}

impl BomCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(namespace: &str, source: &str) -> String {
        format!("{namespace}:{source}")
    }

    /// The page BOM, parsed on first access. `None` when the page has no
    /// `bom/` directory.
    pub fn get_or_load(&mut self, page: &Page) -> Result<Option<&BillOfMaterials>> {
        let key = Self::key(&page.namespace, &page.bom_dir().display().to_string());
        if !self.entries.contains_key(&key) {
            let Some(bom) = eva3d_bom::load_page_bom(page)? else {
                return Ok(None);
            };
            debug!(key = %key, "BOM cache miss");
            self.entries.insert(key.clone(), bom);
        }
        Ok(self.entries.get(&key))
    }

    /// Drop every cached BOM of `namespace`. Returns how many were dropped.
    pub fn invalidate(&mut self, namespace: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, bom| bom.namespace != namespace);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
