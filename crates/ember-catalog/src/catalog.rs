//! Table catalog.
//!
//! The catalog stores the tables (object types) known to the engine and
//! their fields. Every structural change bumps the catalog generation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use ember_common::error::{EmberError, EmberResult};
use ember_common::types::{FieldPosition, ObjectId, ObjectType};

/// A field of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    /// Position of the field in the table's schema.
    pub position: FieldPosition,
    /// Field name.
    pub name: String,
    /// Inactive fields remain in the schema but cannot be subscribed to.
    pub active: bool,
}

/// A table (object type) in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRecord {
    /// Catalog record id.
    pub id: ObjectId,
    /// Table name.
    pub name: String,
    /// Runtime type of the table's rows.
    pub object_type: ObjectType,
    /// Fields, ordered by position.
    pub fields: Vec<FieldRecord>,
    /// System tables are owned by the engine.
    pub is_system: bool,
}

impl TableRecord {
    /// Returns the field at `position`.
    pub fn field(&self, position: FieldPosition) -> Option<&FieldRecord> {
        self.fields.iter().find(|f| f.position == position)
    }

    /// Returns the field named `name`.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldRecord> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Source of the type-to-record-id mapping.
///
/// The type cache builds itself from a full scan of an implementation of
/// this trait.
pub trait CatalogScan: Send + Sync {
    /// Returns every `(type, catalog record id)` pair.
    fn scan_types(&self) -> EmberResult<Vec<(ObjectType, ObjectId)>>;

    /// Returns the current structural generation.
    fn generation(&self) -> u64;
}

#[derive(Debug, Default)]
struct CatalogInner {
    /// Tables by record id.
    tables: BTreeMap<ObjectId, TableRecord>,
    by_type: HashMap<ObjectType, ObjectId>,
    by_name: HashMap<String, ObjectId>,
    next_record_id: u64,
}

/// Table catalog.
#[derive(Debug)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
    generation: AtomicU64,
}

impl Catalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner {
                next_record_id: 1,
                ..Default::default()
            }),
            generation: AtomicU64::new(0),
        }
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Creates a table whose rows have type `object_type`.
    ///
    /// Fields get positions in the order given.
    pub fn create_table(
        &self,
        name: &str,
        object_type: ObjectType,
        fields: &[&str],
    ) -> EmberResult<ObjectId> {
        self.create(name, object_type, fields, false)
    }

    /// Creates an engine-owned table.
    pub fn create_system_table(
        &self,
        name: &str,
        object_type: ObjectType,
        fields: &[&str],
    ) -> EmberResult<ObjectId> {
        self.create(name, object_type, fields, true)
    }

    fn create(
        &self,
        name: &str,
        object_type: ObjectType,
        fields: &[&str],
        is_system: bool,
    ) -> EmberResult<ObjectId> {
        if !object_type.is_valid() {
            return Err(EmberError::invalid_argument("table type must be valid"));
        }
        if name.is_empty() {
            return Err(EmberError::invalid_argument("table name cannot be empty"));
        }

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) || inner.by_type.contains_key(&object_type) {
            return Err(EmberError::TableExists {
                table: name.to_string(),
            });
        }

        let mut records = Vec::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if records.iter().any(|f: &FieldRecord| f.name == *field) {
                return Err(EmberError::FieldExists {
                    table: name.to_string(),
                    field: (*field).to_string(),
                });
            }
            let position = u16::try_from(i)
                .map_err(|_| EmberError::invalid_argument("too many fields"))?;
            records.push(FieldRecord {
                position: FieldPosition::new(position),
                name: (*field).to_string(),
                active: true,
            });
        }

        let id = ObjectId::new(inner.next_record_id);
        inner.next_record_id += 1;
        inner.by_name.insert(name.to_string(), id);
        inner.by_type.insert(object_type, id);
        inner.tables.insert(
            id,
            TableRecord {
                id,
                name: name.to_string(),
                object_type,
                fields: records,
                is_system,
            },
        );
        drop(inner);

        self.bump();
        debug!(table = name, %object_type, record_id = %id, "table created");
        Ok(id)
    }

    /// Drops a table.
    pub fn drop_table(&self, name: &str) -> EmberResult<TableRecord> {
        let mut inner = self.inner.write();
        let id = inner
            .by_name
            .remove(name)
            .ok_or_else(|| EmberError::TableNotFound {
                table: name.to_string(),
            })?;
        let record = inner
            .tables
            .remove(&id)
            .ok_or_else(|| EmberError::internal(format!("catalog index lost table {name}")))?;
        inner.by_type.remove(&record.object_type);
        drop(inner);

        self.bump();
        debug!(table = name, "table dropped");
        Ok(record)
    }

    /// Appends a field to a table.
    pub fn add_field(&self, table: &str, field: &str) -> EmberResult<FieldPosition> {
        let mut inner = self.inner.write();
        let record = Self::table_mut(&mut inner, table)?;
        if record.field_by_name(field).is_some() {
            return Err(EmberError::FieldExists {
                table: table.to_string(),
                field: field.to_string(),
            });
        }
        let position = u16::try_from(record.fields.len())
            .map_err(|_| EmberError::invalid_argument("too many fields"))?;
        let position = FieldPosition::new(position);
        record.fields.push(FieldRecord {
            position,
            name: field.to_string(),
            active: true,
        });
        drop(inner);

        self.bump();
        Ok(position)
    }

    /// Marks a field inactive. Its position is never reused.
    pub fn deactivate_field(&self, table: &str, position: FieldPosition) -> EmberResult<()> {
        let mut inner = self.inner.write();
        let record = Self::table_mut(&mut inner, table)?;
        let field = record
            .fields
            .iter_mut()
            .find(|f| f.position == position)
            .ok_or_else(|| EmberError::FieldNotFound {
                table: table.to_string(),
                position,
            })?;
        field.active = false;
        drop(inner);

        self.bump();
        Ok(())
    }

    fn table_mut<'a>(inner: &'a mut CatalogInner, table: &str) -> EmberResult<&'a mut TableRecord> {
        let id = *inner
            .by_name
            .get(table)
            .ok_or_else(|| EmberError::TableNotFound {
                table: table.to_string(),
            })?;
        inner
            .tables
            .get_mut(&id)
            .ok_or_else(|| EmberError::internal(format!("catalog index lost table {table}")))
    }

    /// Gets a table by name.
    pub fn table(&self, name: &str) -> Option<TableRecord> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.tables.get(id))
            .cloned()
    }

    /// Gets a table by row type.
    pub fn table_by_type(&self, object_type: ObjectType) -> Option<TableRecord> {
        let inner = self.inner.read();
        inner
            .by_type
            .get(&object_type)
            .and_then(|id| inner.tables.get(id))
            .cloned()
    }

    /// Returns every table, ordered by record id.
    pub fn scan(&self) -> Vec<TableRecord> {
        self.inner.read().tables.values().cloned().collect()
    }

    /// Returns the number of tables.
    pub fn table_count(&self) -> usize {
        self.inner.read().tables.len()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogScan for Catalog {
    fn scan_types(&self) -> EmberResult<Vec<(ObjectType, ObjectId)>> {
        let inner = self.inner.read();
        Ok(inner
            .tables
            .values()
            .map(|t| (t.object_type, t.id))
            .collect())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
