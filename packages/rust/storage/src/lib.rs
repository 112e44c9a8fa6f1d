//! libSQL storage for parsed BOM rows and vendor mapping tables.
//!
//! The [`Storage`] struct wraps a local libSQL database. BOMs are stored
//! row-for-row as parsed (no merging); page rebuilds delete every BOM of a
//! namespace before inserting the fresh one. Vendor mappings are truncated
//! and replaced per vendor on each load.
//!
//! **Access rules:** page processing is sequential, so there is at most one
//! writer per namespace at a time and no locking is done here.

mod migrations;

use std::path::Path;

use chrono::Utc;
use eva3d_shared::{BillOfMaterials, Eva3dError, LineItem, Result, VendorMapping, VendorMappingEntry};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn db_err(e: impl std::fmt::Display) -> Eva3dError {
    Eva3dError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Eva3dError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (reporting commands).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    Eva3dError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(Eva3dError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // BOM operations
    // -----------------------------------------------------------------------

    /// Insert a BOM and all of its rows. Returns the generated BOM id.
    pub async fn insert_bom(&self, bom: &BillOfMaterials) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(db_err)?;
        tx.execute(
            "INSERT INTO boms (id, seq, namespace, source, created_at)
             VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM boms), ?2, ?3, ?4)",
            params![
                id.as_str(),
                bom.namespace.as_str(),
                bom.source.as_str(),
                now.as_str()
            ],
        )
        .await
        .map_err(db_err)?;

        for (position, item) in bom.items.iter().enumerate() {
            tx.execute(
                "INSERT INTO bom_items (bom_id, position, name, material, quantity)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    position as i64,
                    item.name.as_str(),
                    item.material.as_str(),
                    item.quantity
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        tracing::debug!(
            namespace = %bom.namespace,
            items = bom.items.len(),
            "stored BOM"
        );
        Ok(id)
    }

    /// Delete every BOM (and its rows) stored under `namespace`.
    /// Returns the number of BOMs removed.
    pub async fn delete_boms_for_namespace(&self, namespace: &str) -> Result<u64> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        tx.execute(
            "DELETE FROM bom_items WHERE bom_id IN (SELECT id FROM boms WHERE namespace = ?1)",
            params![namespace],
        )
        .await
        .map_err(db_err)?;
        let removed = tx
            .execute("DELETE FROM boms WHERE namespace = ?1", params![namespace])
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    /// Replace the stored BOMs of `bom.namespace` with `bom`.
    pub async fn replace_bom(&self, bom: &BillOfMaterials) -> Result<String> {
        self.delete_boms_for_namespace(&bom.namespace).await?;
        self.insert_bom(bom).await
    }

    /// List every stored BOM in insertion order, rows in source order.
    pub async fn list_boms(&self) -> Result<Vec<BillOfMaterials>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, namespace, source FROM boms ORDER BY seq",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut headers = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            headers.push((
                row.get::<String>(0).map_err(db_err)?,
                BillOfMaterials::new(
                    row.get::<String>(1).map_err(db_err)?,
                    row.get::<String>(2).map_err(db_err)?,
                ),
            ));
        }

        let mut boms = Vec::with_capacity(headers.len());
        for (id, mut bom) in headers {
            bom.items = self.list_items(&id).await?;
            boms.push(bom);
        }
        Ok(boms)
    }

    async fn list_items(&self, bom_id: &str) -> Result<Vec<LineItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, material, quantity FROM bom_items
                 WHERE bom_id = ?1 ORDER BY position",
                params![bom_id],
            )
            .await
            .map_err(db_err)?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            items.push(LineItem {
                name: row.get::<String>(0).map_err(db_err)?,
                material: row.get::<String>(1).map_err(db_err)?,
                quantity: row.get::<f64>(2).map_err(db_err)?,
            });
        }
        Ok(items)
    }

    // -----------------------------------------------------------------------
    // Vendor mapping operations
    // -----------------------------------------------------------------------

    /// Truncate and reload the mapping table for `mapping.vendor`.
    pub async fn replace_vendor_mapping(&self, mapping: &VendorMapping) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        tx.execute(
            "DELETE FROM vendor_mappings WHERE vendor = ?1",
            params![mapping.vendor.as_str()],
        )
        .await
        .map_err(db_err)?;

        for entry in mapping.entries() {
            tx.execute(
                "INSERT INTO vendor_mappings
                   (vendor, eva_part_name, eva_part_type, vendor_part_name, vendor_sku, vendor_ignore)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    mapping.vendor.as_str(),
                    entry.eva_part_name.as_str(),
                    entry.eva_part_type.as_str(),
                    entry.vendor_part_name.as_str(),
                    entry.vendor_sku.as_str(),
                    i64::from(entry.ignore)
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        tracing::info!(
            vendor = %mapping.vendor,
            entries = mapping.len(),
            "vendor mapping replaced"
        );
        Ok(())
    }

    /// Load the stored mapping table for `vendor` (empty if never loaded).
    pub async fn load_vendor_mapping(&self, vendor: &str) -> Result<VendorMapping> {
        let mut rows = self
            .conn
            .query(
                "SELECT eva_part_name, eva_part_type, vendor_part_name, vendor_sku, vendor_ignore
                 FROM vendor_mappings WHERE vendor = ?1",
                params![vendor],
            )
            .await
            .map_err(db_err)?;

        let mut mapping = VendorMapping::new(vendor);
        while let Ok(Some(row)) = rows.next().await {
            mapping.insert(VendorMappingEntry {
                eva_part_name: row.get::<String>(0).map_err(db_err)?,
                eva_part_type: row.get::<String>(1).map_err(db_err)?,
                vendor_part_name: row.get::<String>(2).map_err(db_err)?,
                vendor_sku: row.get::<String>(3).map_err(db_err)?,
                ignore: row.get::<i64>(4).map_err(db_err)? != 0,
            });
        }
        Ok(mapping)
    }
}
