use crate::custom_fields::{CustomFieldDef, CustomFields};
use crate::error::{LiftError, Result};
use crate::progress::{ProgressCallback, ProgressUpdate};
use crate::store::{LexObject, LexiconStore, MemoryStore, ObjectKind};
use crate::writing_systems::WritingSystems;
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::sync::{Arc, Mutex};
use std::time::Instant;

// --- Schema Definition ---

const SCHEMA_VERSION: u32 = 1;

/// Objects written between two progress updates while saving.
const REPORT_EVERY: u64 = 500;

const CREATE_METADATA_TABLE: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);";

const CREATE_OBJECTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS objects (
    guid TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    owner TEXT,
    owning_field TEXT,
    position INTEGER NOT NULL, -- Creation order, restored on load
    headword_lower TEXT, -- Entries only, for case-insensitive lookup
    payload TEXT NOT NULL -- serde_json of the whole object
);";

const CREATE_WRITING_SYSTEMS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS writing_systems (
    handle INTEGER PRIMARY KEY,
    tag TEXT NOT NULL
);";

const CREATE_CUSTOM_FIELDS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS custom_fields (
    class TEXT NOT NULL,
    name TEXT NOT NULL,
    definition TEXT NOT NULL,
    PRIMARY KEY (class, name)
);";

// --- Indices ---

const CREATE_OBJECT_KIND_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_object_kind ON objects (kind);";
const CREATE_OBJECT_OWNER_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_object_owner ON objects (owner);";
const CREATE_OBJECT_HEADWORD_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_object_headword ON objects (headword_lower);";

// --- Initialization Function ---

/// Creates all necessary tables and indices in the database if they don't exist.
/// Also checks and sets the schema version.
pub fn initialize_database(conn: &mut Connection) -> Result<()> {
    info!("Initializing database schema (version {})...", SCHEMA_VERSION);
    let tx = conn.transaction()?;

    tx.execute(CREATE_METADATA_TABLE, [])?;
    tx.execute(CREATE_OBJECTS_TABLE, [])?;
    tx.execute(CREATE_WRITING_SYSTEMS_TABLE, [])?;
    tx.execute(CREATE_CUSTOM_FIELDS_TABLE, [])?;

    tx.execute(CREATE_OBJECT_KIND_INDEX, [])?;
    tx.execute(CREATE_OBJECT_OWNER_INDEX, [])?;
    tx.execute(CREATE_OBJECT_HEADWORD_INDEX, [])?;

    let existing_version_str: Option<String> = tx
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing_version_str {
        Some(v_str) => {
            let existing_version: u32 = v_str.parse().map_err(|e| {
                LiftError::ParseError(format!(
                    "Failed to parse existing schema version '{}': {}",
                    v_str, e
                ))
            })?;
            match existing_version.cmp(&SCHEMA_VERSION) {
                std::cmp::Ordering::Less => {
                    warn!(
                        "Database schema version ({}) is older than expected ({}). Migration needed.",
                        existing_version, SCHEMA_VERSION
                    );
                    tx.execute(
                        "UPDATE metadata SET value = ?1 WHERE key = 'schema_version'",
                        params![SCHEMA_VERSION.to_string()],
                    )?;
                    info!("Updated schema version in metadata table.");
                }
                std::cmp::Ordering::Greater => {
                    warn!(
                        "Database schema version ({}) is newer than expected ({}). Using potentially incompatible schema.",
                        existing_version, SCHEMA_VERSION
                    );
                }
                std::cmp::Ordering::Equal => {
                    debug!(
                        "Database schema version ({}) matches expected version.",
                        existing_version
                    );
                }
            }
        }
        None => {
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            info!("Set initial schema version in metadata table.");
        }
    }

    tx.commit()?;
    info!("Database schema initialization complete.");
    Ok(())
}

// --- Save / Load ---

/// Replaces the persisted lexicon with the contents of `store`.
/// Runs in one transaction, so a failed save leaves the previous state.
pub fn save_store(
    conn: &mut Connection,
    store: &MemoryStore,
    reporter: Arc<Mutex<Option<ProgressCallback>>>,
) -> Result<()> {
    info!("Saving {} objects to the database...", store.len());
    let start_time = Instant::now();
    let total = store.len() as u64;

    let maybe_report = |update: ProgressUpdate| {
        if let Ok(mut guard) = reporter.lock() {
            if let Some(cb) = guard.as_mut() {
                let _ = cb(update); // Saving is not cancellable
            }
        }
    };

    let tx = conn.transaction()?;
    clear_database_data(&tx)?;

    let mut ws_stmt = tx.prepare("INSERT INTO writing_systems (handle, tag) VALUES (?1, ?2)")?;
    for (handle, tag) in store.writing_systems().iter() {
        ws_stmt.execute(params![handle, tag])?;
    }

    let mut field_stmt =
        tx.prepare("INSERT INTO custom_fields (class, name, definition) VALUES (?1, ?2, ?3)")?;
    for def in store.custom_fields().iter() {
        field_stmt.execute(params![def.class, def.name, serde_json::to_string(def)?])?;
    }

    let mut object_stmt = tx.prepare(
        "INSERT INTO objects (guid, kind, owner, owning_field, position, headword_lower, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    maybe_report(ProgressUpdate::new_stage("Saving".to_string(), Some(total)));
    let mut current = 0u64;
    for object in store.iter() {
        let headword = (object.kind() == ObjectKind::Entry)
            .then(|| store.headword(object.guid).to_lowercase());
        object_stmt.execute(params![
            object.guid.to_string(),
            object.kind().as_str(),
            object.owner.map(|(g, _)| g.to_string()),
            object.owner.map(|(_, field)| format!("{:?}", field)),
            current as i64,
            headword,
            serde_json::to_string(object)?,
        ])?;
        current += 1;
        if current % REPORT_EVERY == 0 || current == total {
            maybe_report(ProgressUpdate {
                stage_description: "Saving".to_string(),
                current_item: current,
                total_items: Some(total),
                message: Some(format!("{} objects", current)),
            });
        }
    }

    drop(ws_stmt);
    drop(field_stmt);
    drop(object_stmt);
    tx.commit()?;

    info!("Database save complete. Took {:.2?}", start_time.elapsed());
    Ok(())
}

/// Reads the persisted lexicon into a fresh `MemoryStore`.
pub fn load_store(conn: &Connection) -> Result<MemoryStore> {
    let start_time = Instant::now();
    let mut store = MemoryStore::new();

    let mut stmt = conn.prepare("SELECT tag FROM writing_systems ORDER BY handle")?;
    let tags = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    store.set_writing_systems(WritingSystems::from_tags(tags));

    let mut fields = CustomFields::new();
    let mut stmt = conn.prepare("SELECT definition FROM custom_fields")?;
    for definition in stmt.query_map([], |row| row.get::<_, String>(0))? {
        let def: CustomFieldDef = serde_json::from_str(&definition?)?;
        fields.insert(def);
    }
    store.set_custom_fields(fields);

    let mut stmt = conn.prepare("SELECT payload FROM objects ORDER BY position")?;
    for payload in stmt.query_map([], |row| row.get::<_, String>(0))? {
        let object: LexObject = serde_json::from_str(&payload?)?;
        store.restore(object);
    }

    debug!(
        "Loaded {} objects in {:.2?}",
        store.len(),
        start_time.elapsed()
    );
    Ok(store)
}

/// Object counts per kind, as stored.
pub fn count_objects_by_kind(conn: &Connection) -> Result<Vec<(ObjectKind, usize)>> {
    let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM objects GROUP BY kind ORDER BY kind")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut counts = Vec::new();
    for row in rows {
        let (kind, count) = row?;
        counts.push((kind.parse::<ObjectKind>()?, count as usize));
    }
    Ok(counts)
}

/// GUIDs of entries whose headword matches `headword`, ignoring case.
pub fn find_entries_by_headword(conn: &Connection, headword: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT guid FROM objects WHERE kind = ?1 AND headword_lower = ?2 ORDER BY position",
    )?;
    let guids = stmt
        .query_map(params![ObjectKind::Entry.as_str(), headword.to_lowercase()], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(guids)
}

/// Helper to clear all lexicon data; the schema version is kept.
pub fn clear_database_data(tx: &Transaction) -> Result<()> {
    info!("Clearing existing data from database tables...");
    tx.execute("DELETE FROM objects", [])?;
    tx.execute("DELETE FROM writing_systems", [])?;
    tx.execute("DELETE FROM custom_fields", [])?;
    info!("Finished clearing data.");
    Ok(())
}
