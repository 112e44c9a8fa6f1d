//! BOM CSV parsing.

use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use eva3d_shared::{BillOfMaterials, Eva3dError, LineItem, MalformedBomReason, Page, Result};

pub const NAME_COLUMN: &str = "Name";
pub const QUANTITY_COLUMN: &str = "Quantity";
pub const MATERIAL_COLUMN: &str = "Material";

/// Parse a BOM table. `source` names the input in errors and in the result.
///
/// Required headers are `Name`, `Quantity` and `Material` (case-sensitive);
/// any other column is ignored.
pub fn parse_bom<R: Read>(
    reader: R,
    namespace: &str,
    source: &str,
) -> Result<BillOfMaterials> {
    let mut bom = BillOfMaterials::new(namespace, source);
    append_rows(reader, source, &mut bom.items)?;
    Ok(bom)
}

/// Parse a single BOM CSV file.
pub fn parse_bom_file(path: &Path, namespace: &str) -> Result<BillOfMaterials> {
    let file = std::fs::File::open(path).map_err(|e| Eva3dError::io(path, e))?;
    parse_bom(file, namespace, &path.display().to_string())
}

/// Load the BOM of a page: every `*.csv` in its `bom/` directory, in file
/// name order, concatenated.
///
/// Returns `None` when the page has no `bom/` directory.
#[instrument(skip_all, fields(namespace = %page.namespace))]
pub fn load_page_bom(page: &Page) -> Result<Option<BillOfMaterials>> {
    let bom_dir = page.bom_dir();
    if !bom_dir.is_dir() {
        debug!(dir = %bom_dir.display(), "page has no bom directory");
        return Ok(None);
    }

    let mut bom = BillOfMaterials::new(&page.namespace, bom_dir.display().to_string());
    for path in csv_files(&bom_dir)? {
        let file = std::fs::File::open(&path).map_err(|e| Eva3dError::io(&path, e))?;
        append_rows(file, &path.display().to_string(), &mut bom.items)?;
    }

    debug!(items = bom.items.len(), "loaded page BOM");
    Ok(Some(bom))
}

fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Eva3dError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Eva3dError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn append_rows<R: Read>(reader: R, source: &str, items: &mut Vec<LineItem>) -> Result<()> {
    let malformed = |reason| Eva3dError::malformed_bom(source, reason);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| {
            malformed(MalformedBomReason::UnreadableRecord {
                row: 1,
                message: e.to_string(),
            })
        })?
        .clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| malformed(MalformedBomReason::MissingColumn(name.to_string())))
    };
    let name_idx = column(NAME_COLUMN)?;
    let quantity_idx = column(QUANTITY_COLUMN)?;
    let material_idx = column(MATERIAL_COLUMN)?;

    for (idx, record) in reader.records().enumerate() {
        // Header is row 1.
        let row = idx + 2;
        let record = record.map_err(|e| {
            malformed(MalformedBomReason::UnreadableRecord {
                row,
                message: e.to_string(),
            })
        })?;

        let name = record.get(name_idx).unwrap_or_default().trim();
        if name.is_empty() {
            return Err(malformed(MalformedBomReason::EmptyName { row }));
        }

        let raw_quantity = record.get(quantity_idx).unwrap_or_default().trim();
        let quantity = parse_quantity(raw_quantity).ok_or_else(|| {
            malformed(MalformedBomReason::NonNumericQuantity {
                row,
                value: raw_quantity.to_string(),
            })
        })?;
        if quantity <= 0.0 {
            return Err(malformed(MalformedBomReason::NonPositiveQuantity {
                row,
                value: raw_quantity.to_string(),
            }));
        }

        items.push(LineItem {
            name: name.to_string(),
            quantity,
            material: record.get(material_idx).unwrap_or_default().trim().to_string(),
        });
    }

    Ok(())
}

fn parse_quantity(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|q| q.is_finite())
}
