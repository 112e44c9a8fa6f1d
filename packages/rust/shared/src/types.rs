//! Core domain types for eva3d asset reconciliation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Eva3dError, Result};

/// Material string that marks a line item as 3D-printable.
const PRINTABLE_MATERIAL: &str = "PETG";

/// Extension of exported printable parts.
const PRINTABLE_EXTENSION: &str = "stl";

// ---------------------------------------------------------------------------
// PartType
// ---------------------------------------------------------------------------

/// Whether a part is printed from a CAD export or bought off the shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartType {
    Printable,
    Hardware,
}

impl PartType {
    /// Classify a raw material string (case-insensitive).
    pub fn from_material(material: &str) -> Self {
        if material.trim().eq_ignore_ascii_case(PRINTABLE_MATERIAL) {
            Self::Printable
        } else {
            Self::Hardware
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Printable => "printable",
            Self::Hardware => "hardware",
        }
    }
}

impl std::fmt::Display for PartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LineItem / BillOfMaterials
// ---------------------------------------------------------------------------

/// One row of a bill of materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Part name, trimmed. Never empty.
    pub name: String,
    /// Positive quantity.
    pub quantity: f64,
    /// Raw material string as it appeared in the source.
    pub material: String,
}

impl LineItem {
    pub fn is_printable(&self) -> bool {
        self.part_type() == PartType::Printable
    }

    pub fn part_type(&self) -> PartType {
        PartType::from_material(&self.material)
    }

    /// File name the printable export is published under (`<name>.stl`).
    pub fn canonical_file_name(&self) -> String {
        format!("{}.{PRINTABLE_EXTENSION}", self.name)
    }

    /// Site URL of the printable file, `None` for hardware.
    pub fn url(&self) -> Option<String> {
        self.is_printable()
            .then(|| format!("/stls/{}", self.canonical_file_name()))
    }
}

/// An ordered bill of materials owned by one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillOfMaterials {
    /// Namespace of the owning page.
    pub namespace: String,
    /// Where the rows came from (a `bom/` directory, a CSV file, or a CAD URL).
    pub source: String,
    /// Line items in source order, one per row.
    pub items: Vec<LineItem>,
}

impl BillOfMaterials {
    pub fn new(namespace: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            source: source.into(),
            items: Vec::new(),
        }
    }

    pub fn printable_items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(|item| item.is_printable())
    }

    /// Canonical file names of every printable part this BOM requires.
    pub fn required_files(&self) -> BTreeSet<String> {
        self.printable_items()
            .map(LineItem::canonical_file_name)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Superbom / vendor mapping
// ---------------------------------------------------------------------------

/// Aggregated quantity for one `(namespace, name)` across all BOMs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperbomEntry {
    pub namespace: String,
    pub name: String,
    pub quantity: f64,
    pub part_type: PartType,
    /// Set only for printable parts.
    pub url: Option<String>,
}

/// One row of a vendor substitution table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorMappingEntry {
    pub eva_part_name: String,
    pub eva_part_type: String,
    pub vendor_part_name: String,
    pub vendor_sku: String,
    pub ignore: bool,
}

/// Internal part name → vendor row, for a single vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorMapping {
    pub vendor: String,
    entries: BTreeMap<String, VendorMappingEntry>,
}

impl VendorMapping {
    pub fn new(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Insert a row; a later row for the same part replaces the earlier one.
    pub fn insert(&mut self, entry: VendorMappingEntry) {
        self.entries.insert(entry.eva_part_name.clone(), entry);
    }

    pub fn get(&self, eva_part_name: &str) -> Option<&VendorMappingEntry> {
        self.entries.get(eva_part_name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &VendorMappingEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A superbom entry joined with its vendor row, if it has one.
///
/// Printable parts never carry a vendor row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSuperbomEntry {
    pub entry: SuperbomEntry,
    pub vendor: Option<VendorMappingEntry>,
}

/// One row of a purchasing list.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseLine {
    pub quantity: f64,
    pub vendor_sku: String,
    pub vendor_part_name: String,
    pub eva_part_name: String,
}

/// Render a quantity without a trailing `.0` when it is whole.
pub fn format_quantity(quantity: f64) -> String {
    if quantity.is_finite() && quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        format!("{quantity:.0}")
    } else {
        quantity.to_string()
    }
}

/// Whether `name` can be joined onto a directory without leaving it:
/// non-empty, no path separators, and not `.` or `..`.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

// ---------------------------------------------------------------------------
// CAD reference
// ---------------------------------------------------------------------------

static CAD_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"documents/(?P<did>[^/]+)/(?P<wvm>[wvm])/(?P<wvmid>[^/]+)/e/(?P<eid>[^/?#]+)",
    )
    .expect("CAD URL pattern is valid")
});

/// Whether a CAD reference points at a workspace, version, or microversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WvmType {
    Workspace,
    Version,
    Microversion,
}

impl WvmType {
    /// Single-letter path segment used by the CAD service (`w`, `v`, `m`).
    pub fn as_path_segment(&self) -> &'static str {
        match self {
            Self::Workspace => "w",
            Self::Version => "v",
            Self::Microversion => "m",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "w" => Some(Self::Workspace),
            "v" => Some(Self::Version),
            "m" => Some(Self::Microversion),
            _ => None,
        }
    }
}

/// The document / workspace / element triple of a CAD assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CadReference {
    pub document_id: String,
    pub wvm_type: WvmType,
    pub wvm_id: String,
    pub element_id: String,
}

impl CadReference {
    /// Parse a CAD URL of the shape `.../documents/{d}/{w|v|m}/{id}/e/{e}`.
    pub fn parse(url: &str) -> Result<Self> {
        let bad = || Eva3dError::BadCadReference {
            url: url.to_string(),
        };
        let caps = CAD_URL_PATTERN.captures(url).ok_or_else(bad)?;
        let wvm_type = WvmType::from_path_segment(&caps["wvm"]).ok_or_else(bad)?;

        Ok(Self {
            document_id: caps["did"].to_string(),
            wvm_type,
            wvm_id: caps["wvmid"].to_string(),
            element_id: caps["eid"].to_string(),
        })
    }
}

impl std::fmt::Display for CadReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "documents/{}/{}/{}/e/{}",
            self.document_id,
            self.wvm_type.as_path_segment(),
            self.wvm_id,
            self.element_id
        )
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// A validated documentation page describing one assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Unique page identifier, the aggregation key for the superbom.
    pub namespace: String,
    /// Anchor directory holding `bom/`, `downloads/`, `stls/`, `assets/`.
    pub dir: PathBuf,
    /// Live CAD assembly, when the page is fetched rather than pre-exported.
    pub cad: Option<CadReference>,
    pub title: Option<String>,
}

impl Page {
    pub fn bom_dir(&self) -> PathBuf {
        self.dir.join("bom")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.dir.join("downloads")
    }

    pub fn stls_dir(&self) -> PathBuf {
        self.dir.join("stls")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.dir.join("assets")
    }

    /// Where the CAD preview image for this page is written.
    pub fn image_path(&self) -> PathBuf {
        self.assets_dir().join(format!("{}.png", slugify(&self.namespace)))
    }
}

// ---------------------------------------------------------------------------
// ReconciliationResult
// ---------------------------------------------------------------------------

/// Outcome of matching a page's required printable files against its archives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub page: String,
    pub required: BTreeSet<String>,
    pub extracted: BTreeSet<String>,
    /// Names produced by more than one archive entry (last one kept).
    pub duplicates: BTreeSet<String>,
    /// Archives that were opened for this page.
    pub archives: Vec<PathBuf>,
}

impl ReconciliationResult {
    /// `required − extracted`.
    pub fn missing(&self) -> BTreeSet<String> {
        self.required
            .difference(&self.extracted)
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.required.is_subset(&self.extracted)
    }
}

/// Lowercase, hyphen-separated, filesystem-safe form of an identifier.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, quantity: f64, material: &str) -> LineItem {
        LineItem {
            name: name.into(),
            quantity,
            material: material.into(),
        }
    }

    #[test]
    fn petg_is_printable_in_any_case() {
        for material in ["PETG", "petg", "PeTg", " petg "] {
            let line = item("Bracket", 1.0, material);
            assert!(line.is_printable(), "{material} should be printable");
            assert_eq!(line.url().as_deref(), Some("/stls/Bracket.stl"));
        }
    }

    #[test]
    fn other_materials_are_hardware_without_url() {
        for material in ["Steel", "PLA", "", "PETG-CF"] {
            let line = item("M3x10", 4.0, material);
            assert_eq!(line.part_type(), PartType::Hardware);
            assert!(line.url().is_none());
        }
    }

    #[test]
    fn required_files_only_lists_printables() {
        let mut bom = BillOfMaterials::new("hotend", "bom/");
        bom.items = vec![
            item("Bracket", 1.0, "PETG"),
            item("M3x10", 4.0, "Steel"),
            item("Mount", 2.0, "petg"),
        ];
        let required: Vec<_> = bom.required_files().into_iter().collect();
        assert_eq!(required, vec!["Bracket.stl", "Mount.stl"]);
    }

    #[test]
    fn parse_workspace_cad_url() {
        let url = "https://cad.onshape.com/documents/abc123/w/def456/e/ghi789";
        let reference = CadReference::parse(url).expect("parse");
        assert_eq!(reference.document_id, "abc123");
        assert_eq!(reference.wvm_type, WvmType::Workspace);
        assert_eq!(reference.wvm_id, "def456");
        assert_eq!(reference.element_id, "ghi789");
        assert_eq!(reference.to_string(), "documents/abc123/w/def456/e/ghi789");
    }

    #[test]
    fn parse_version_and_microversion_cad_urls() {
        let v = CadReference::parse("https://cad.onshape.com/documents/d1/v/v1/e/e1").unwrap();
        assert_eq!(v.wvm_type, WvmType::Version);
        let m = CadReference::parse("https://cad.onshape.com/documents/d1/m/m1/e/e1?foo=1")
            .unwrap();
        assert_eq!(m.wvm_type, WvmType::Microversion);
        assert_eq!(m.element_id, "e1");
    }

    #[test]
    fn reject_malformed_cad_urls() {
        for url in [
            "https://cad.onshape.com/documents/abc/e/ghi",
            "https://example.com/not-a-cad-link",
            "https://cad.onshape.com/documents/d/x/y/e/z",
        ] {
            let err = CadReference::parse(url).unwrap_err();
            assert!(matches!(err, Eva3dError::BadCadReference { .. }), "{url}");
        }
    }

    #[test]
    fn reconciliation_missing_is_set_difference() {
        let result = ReconciliationResult {
            page: "p".into(),
            required: ["Bracket.stl", "Mount.stl"].map(String::from).into(),
            extracted: ["Bracket.stl"].map(String::from).into(),
            ..Default::default()
        };
        assert!(!result.is_complete());
        assert_eq!(
            result.missing().into_iter().collect::<Vec<_>>(),
            vec!["Mount.stl"]
        );
    }

    #[test]
    fn whole_quantities_print_without_fraction() {
        assert_eq!(format_quantity(4.0), "4");
        assert_eq!(format_quantity(2.5), "2.5");
    }

    #[test]
    fn plain_file_names() {
        assert!(is_plain_file_name("Bracket.stl"));
        assert!(is_plain_file_name("...stl"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../../escaped.stl"));
        assert!(!is_plain_file_name("Frame/Left.stl"));
        assert!(!is_plain_file_name("Frame\\Left.stl"));
    }

    #[test]
    fn slugify_identifiers() {
        assert_eq!(slugify("Hotend / Dragon HF"), "hotend-dragon-hf");
        assert_eq!(slugify("--BMG_extruder--"), "bmg-extruder");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn vendor_mapping_later_row_wins() {
        let mut mapping = VendorMapping::new("acme");
        for sku in ["A-1", "A-2"] {
            mapping.insert(VendorMappingEntry {
                eva_part_name: "M3x10".into(),
                eva_part_type: "hardware".into(),
                vendor_part_name: "M3 x 10 SHCS".into(),
                vendor_sku: sku.into(),
                ignore: false,
            });
        }
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("M3x10").unwrap().vendor_sku, "A-2");
    }
}
