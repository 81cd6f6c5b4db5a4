use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::types::{Make, Model, Record, Trim, Value};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Failed to encode records: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Make,
    Model,
    Trim,
}

impl NodeKind {
    pub fn table(&self) -> &'static str {
        match self {
            NodeKind::Make => "makes",
            NodeKind::Model => "models",
            NodeKind::Trim => "trims",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Specs,
    Options,
}

impl RecordKind {
    fn column(&self) -> &'static str {
        match self {
            RecordKind::Specs => "specs",
            RecordKind::Options => "options",
        }
    }
}

/// SQLite-backed store for the make/model/trim hierarchy.
///
/// All writes are idempotent upserts keyed by entity id; unique-key conflicts
/// are logged and treated as already-present.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS makes (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                raw_markup TEXT,
                UNIQUE (name, url)
            );
            CREATE TABLE IF NOT EXISTS models (
                id INTEGER PRIMARY KEY,
                make_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                raw_markup TEXT,
                FOREIGN KEY (make_id) REFERENCES makes (id),
                UNIQUE (make_id, name, url)
            );
            CREATE TABLE IF NOT EXISTS trims (
                id INTEGER PRIMARY KEY,
                model_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                production TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL,
                raw_markup TEXT,
                specs TEXT,
                options TEXT,
                FOREIGN KEY (model_id) REFERENCES models (id),
                UNIQUE (model_id, name, url)
            );
            CREATE TABLE IF NOT EXISTS trim_fields (
                trim_id INTEGER PRIMARY KEY REFERENCES trims (id)
            );",
        )?;
        Ok(())
    }

    /// Next id for a table: max existing id plus one, starting at 1.
    ///
    /// Ids are only unique within their own table, not across the hierarchy.
    pub fn next_id(&self, kind: NodeKind) -> Result<i64, StoreError> {
        let max: Option<i64> = self.conn.query_row(
            &format!("SELECT MAX(id) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn insert_make(&self, make: &Make) -> Result<(), StoreError> {
        log::debug!("Inserting {} into the database", make.name);
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO makes (id, name, url) VALUES (?1, ?2, ?3)",
            params![make.id, make.name, make.children_url],
        )?;
        if inserted == 0 {
            log::warn!("The make {} is already in the database", make.name);
        }
        Ok(())
    }

    pub fn insert_model(&self, model: &Model) -> Result<(), StoreError> {
        log::debug!("Inserting {} into the database", model.name);
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO models (id, make_id, name, url) VALUES (?1, ?2, ?3, ?4)",
            params![model.id, model.make_id, model.name, model.children_url],
        )?;
        if inserted == 0 {
            log::warn!("The model {} is already in the database", model.name);
        }
        Ok(())
    }

    pub fn insert_trim(&self, trim: &Trim) -> Result<(), StoreError> {
        log::debug!("Inserting {} into the database", trim.name);
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO trims (id, model_id, name, production, url)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                trim.id,
                trim.model_id,
                trim.name,
                trim.production,
                trim.children_url
            ],
        )?;
        if inserted == 0 {
            log::warn!("The trim {} is already in the database", trim.name);
        }
        Ok(())
    }

    pub fn write_raw(&self, kind: NodeKind, id: i64, raw_markup: &str) -> Result<(), StoreError> {
        self.conn.execute(
            &format!("UPDATE {} SET raw_markup = ?1 WHERE id = ?2", kind.table()),
            params![raw_markup, id],
        )?;
        Ok(())
    }

    pub fn read_raw(&self, kind: NodeKind, id: i64) -> Result<Option<String>, StoreError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT raw_markup FROM {} WHERE id = ?1", kind.table()),
                params![id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(raw.flatten())
    }

    pub fn write_records(
        &self,
        trim_id: i64,
        kind: RecordKind,
        records: &[Record],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(records)?;
        self.conn.execute(
            &format!("UPDATE trims SET {} = ?1 WHERE id = ?2", kind.column()),
            params![json, trim_id],
        )?;
        Ok(())
    }

    /// Alternate persistence pipeline for filtering: one column per distinct
    /// top-level field name, added to the side table on first sight.
    ///
    /// Plain text values are stored as-is; sections and packages are stored
    /// JSON-encoded.
    pub fn flatten_fields(&self, trim_id: i64, records: &[Record]) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO trim_fields (trim_id) VALUES (?1)",
            params![trim_id],
        )?;
        for record in records {
            for (field, value) in &record.data {
                self.ensure_field_column(field)?;
                let text = match value {
                    Value::Text(text) => text.clone(),
                    other => serde_json::to_string(other)?,
                };
                self.conn.execute(
                    &format!(
                        "UPDATE trim_fields SET \"{}\" = ?1 WHERE trim_id = ?2",
                        field.replace('"', "\"\"")
                    ),
                    params![text, trim_id],
                )?;
            }
        }
        Ok(())
    }

    fn ensure_field_column(&self, field: &str) -> Result<(), StoreError> {
        let exists = self
            .conn
            .prepare("SELECT 1 FROM pragma_table_info('trim_fields') WHERE name = ?1")?
            .exists(params![field])?;
        if !exists {
            self.conn.execute(
                &format!(
                    "ALTER TABLE trim_fields ADD COLUMN \"{}\" TEXT",
                    field.replace('"', "\"\"")
                ),
                [],
            )?;
        }
        Ok(())
    }

    /// Rebuilds the full nested hierarchy, including parsed records.
    pub fn load_makes(&self) -> Result<Vec<Make>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, url, raw_markup FROM makes ORDER BY id")?;
        let mut makes = stmt
            .query_map([], |row| {
                Ok(Make {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    children_url: row.get(2)?,
                    raw_markup: row.get(3)?,
                    models: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for make in &mut makes {
            make.models = self.load_models(make.id)?;
        }
        Ok(makes)
    }

    fn load_models(&self, make_id: i64) -> Result<Vec<Model>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, make_id, name, url, raw_markup FROM models
             WHERE make_id = ?1 ORDER BY id",
        )?;
        let mut models = stmt
            .query_map(params![make_id], |row| {
                Ok(Model {
                    id: row.get(0)?,
                    make_id: row.get(1)?,
                    name: row.get(2)?,
                    children_url: row.get(3)?,
                    raw_markup: row.get(4)?,
                    trims: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for model in &mut models {
            model.trims = self.load_trims(model.id)?;
        }
        Ok(models)
    }

    fn load_trims(&self, model_id: i64) -> Result<Vec<Trim>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, model_id, name, production, url, raw_markup, specs, options
             FROM trims WHERE model_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![model_id], |row| {
            Ok((
                Trim {
                    id: row.get(0)?,
                    model_id: row.get(1)?,
                    name: row.get(2)?,
                    production: row.get(3)?,
                    children_url: row.get(4)?,
                    raw_markup: row.get(5)?,
                    specs: Vec::new(),
                    options: Vec::new(),
                },
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut trims = Vec::new();
        for row in rows {
            let (mut trim, specs_json, options_json) = row?;
            if let Some(json) = specs_json {
                trim.specs = serde_json::from_str(&json)?;
            }
            if let Some(json) = options_json {
                trim.options = serde_json::from_str(&json)?;
            }
            trims.push(trim);
        }
        Ok(trims)
    }
}
