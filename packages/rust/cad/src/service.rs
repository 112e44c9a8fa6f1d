//! The CAD service abstraction consumed by the fetch orchestrator.

use async_trait::async_trait;

use eva3d_shared::{BillOfMaterials, CadReference, LineItem, Result, WvmType};

/// Where a single part lives in the CAD service, as reported by a BOM row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSource {
    pub document_id: String,
    pub wvm_type: WvmType,
    pub wvm_id: String,
    pub element_id: String,
    pub part_id: String,
    /// Encoded configuration string; empty for the default configuration.
    pub configuration: String,
}

/// A BOM row together with the export source of its part.
#[derive(Debug, Clone, PartialEq)]
pub struct CadBomItem {
    pub item: LineItem,
    /// `None` for rows the service could not attribute to a part (sub-assemblies, etc.).
    pub source: Option<PartSource>,
}

/// Bill of materials snapshot of an assembly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CadBom {
    pub items: Vec<CadBomItem>,
}

impl CadBom {
    pub fn printable(&self) -> impl Iterator<Item = &CadBomItem> {
        self.items.iter().filter(|row| row.item.is_printable())
    }

    /// Drop export sources, keeping one line item per row.
    pub fn to_bill_of_materials(&self, namespace: &str, source: &str) -> BillOfMaterials {
        let mut bom = BillOfMaterials::new(namespace, source);
        bom.items = self.items.iter().map(|row| row.item.clone()).collect();
        bom
    }
}

/// Operations the pipeline needs from the CAD service.
///
/// Implementations are shared across concurrently running page fetches.
#[async_trait]
pub trait CadService: Send + Sync {
    /// Bill of materials of the assembly at `reference`.
    async fn get_assembly_bom(&self, reference: &CadReference) -> Result<CadBom>;

    /// Preview image of the assembly (PNG bytes).
    async fn get_shaded_view(&self, reference: &CadReference) -> Result<Vec<u8>>;

    /// Binary mesh export of one part.
    async fn export_part(&self, source: &PartSource) -> Result<Vec<u8>>;
}
