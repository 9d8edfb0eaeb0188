// Declare modules
pub mod custom_fields;
pub mod db;
pub mod entry_refs;
pub mod error;
pub mod identity;
pub mod importer;
pub mod merge;
pub mod models;
pub mod orphans;
pub mod parse;
pub mod possibility;
pub mod progress;
pub mod relations;
pub mod report;
pub mod residue;
pub mod store;
pub mod writing_systems;

// Re-export key types for easier use
pub use error::{LiftError, Result};
pub use importer::{ImportOptions, LiftImporter, import};
pub use merge::MergeStyle;
pub use models::LiftDocument;
pub use parse::{parse_lift, parse_lift_str};
pub use progress::{Checkpoint, ProgressCallback, ProgressUpdate};
pub use report::ImportReport;
pub use store::{Guid, LexiconStore, MemoryStore, ObjectKind};

use directories_next::ProjectDirs;
use log::{debug, error, info, warn};
use rusqlite::{Connection, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use store::{
    EntryData, EntryRefData, LexRefTypeData, LexReferenceData, MsaData, MultiString, OwningField,
    PossibilityData, RefKind, SenseData,
};
use writing_systems::WritingSystemRegistry;

const APP_SUBDIR: &str = "lift_rs";
const DB_FILENAME: &str = "lexicon.db";

/// Options for opening a lexicon database.
#[derive(Debug, Default, Clone)]
pub struct LexiconOptions {
    /// Optional path to a specific database file to use or create.
    /// If None, the default location based on ProjectDirs will be used.
    pub db_path: Option<PathBuf>,
    /// Discard whatever the database holds before use.
    pub force_reset: bool,
}

/// One entry as shown by lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryView {
    pub guid: Guid,
    pub headword: String,
    pub lift_id: Option<String>,
    pub senses: Vec<SenseView>,
    pub relations: Vec<RelationView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SenseView {
    pub part_of_speech: Option<String>,
    /// (writing system tag, text) pairs.
    pub gloss: Vec<(String, String)>,
    pub definition: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationView {
    pub relation_type: String,
    pub targets: Vec<String>,
}

/// A lexicon persisted in SQLite.
#[derive(Clone)]
pub struct Lexicon {
    conn: Arc<Mutex<Connection>>,
    db_file_path: Arc<PathBuf>,
}

// Helper function to open/create the database connection
fn open_db_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;

    // WAL so readers don't block the save transaction
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "cache_size", "-64000")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    Ok(conn)
}

impl Lexicon {
    /// Opens the lexicon at the default location.
    pub fn open_default() -> Result<Self> {
        Self::open(LexiconOptions::default())
    }

    /// Opens (or creates) a lexicon database.
    pub fn open(options: LexiconOptions) -> Result<Self> {
        let db_path = match options.db_path {
            Some(path) => {
                info!("Using provided database path: {:?}", path);
                path
            }
            None => Self::get_default_db_path()?,
        };

        let mut conn = open_db_connection(&db_path)?;
        db::initialize_database(&mut conn)?;

        if options.force_reset {
            info!("Reset requested. Clearing existing database data...");
            let tx = conn.transaction()?;
            db::clear_database_data(&tx)?;
            tx.commit()?;
        }

        Ok(Lexicon {
            conn: Arc::new(Mutex::new(conn)),
            db_file_path: Arc::new(db_path),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_file_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LiftError::Internal("Mutex poisoned".to_string()))
    }

    /// A snapshot of the persisted lexicon.
    pub fn store(&self) -> Result<MemoryStore> {
        db::load_store(&*self.lock()?)
    }

    /// Imports a LIFT file into the lexicon.
    ///
    /// The whole run happens against an in-memory copy of the lexicon, which
    /// is written back only when the import succeeded and was not cancelled.
    /// A failed or cancelled run leaves the database untouched.
    pub async fn import_file(
        &self,
        path: &Path,
        options: ImportOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<ImportReport> {
        info!("Reading and parsing LIFT file: {:?}", path);
        let xml_content = tokio::fs::read_to_string(path).await?;
        let document = parse_lift(xml_content).await?;

        let mut options = options;
        if options.source_dir.is_none() {
            options.source_dir = path.parent().map(Path::to_path_buf);
        }

        let reporter = Arc::new(Mutex::new(progress));
        let forward = Arc::clone(&reporter);
        let callback: ProgressCallback = Box::new(move |update: ProgressUpdate| match forward.lock() {
            Ok(mut guard) => guard.as_mut().is_none_or(|cb| cb(update)),
            Err(_) => true,
        });

        let mut conn = self.lock()?;
        let mut store = db::load_store(&*conn)?;
        debug!("Loaded {} existing objects", store.len());

        let report = match import(&mut store, &document, &options, Some(callback)) {
            Ok(report) => report,
            Err(e) => {
                error!("Import of {:?} failed, nothing was saved: {}", path, e);
                return Err(e);
            }
        };
        if report.cancelled {
            warn!("Import of {:?} was cancelled; the database was not changed.", path);
            return Ok(report);
        }

        db::save_store(&mut *conn, &store, reporter)?;
        Ok(report)
    }

    /// Number of stored objects per kind.
    pub fn stats(&self) -> Result<Vec<(ObjectKind, usize)>> {
        db::count_objects_by_kind(&*self.lock()?)
    }

    /// Entries whose headword matches, ignoring case, with their senses and
    /// relations.
    pub fn lookup_headword(&self, headword: &str) -> Result<Vec<EntryView>> {
        debug!("lookup_headword: '{}'", headword);
        let conn = self.lock()?;
        let guids = db::find_entries_by_headword(&*conn, headword)?;
        if guids.is_empty() {
            debug!("No entries found for headword '{}'", headword);
            return Ok(Vec::new());
        }
        let store = db::load_store(&*conn)?;
        let mut entries = Vec::new();
        for stored in guids {
            let Some(guid) = identity::parse_guid(Some(stored.as_str())) else {
                warn!("Stored entry id {} is not a GUID", stored);
                continue;
            };
            match entry_view(&store, guid) {
                Some(view) => entries.push(view),
                None => warn!("Entry {} found in index but not loadable.", guid),
            }
        }
        Ok(entries)
    }

    /// Gets the default path for the SQLite database file.
    pub fn get_default_db_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("org", "LiftRs", APP_SUBDIR).ok_or(LiftError::DataDirNotFound)?;
        let data_dir = project_dirs.data_dir();
        fs::create_dir_all(data_dir)?;
        Ok(data_dir.join(DB_FILENAME))
    }

    /// Deletes a lexicon database file and its WAL/SHM side files.
    ///
    /// If `db_path_override` is `None`, the default database is removed.
    pub fn clear_database(db_path_override: Option<PathBuf>) -> Result<()> {
        let path_to_clear = match db_path_override {
            Some(path) => path,
            None => Self::get_default_db_path()?,
        };
        info!("Attempting to clear database file: {:?}", path_to_clear);

        if !path_to_clear.exists() {
            info!("Database file not found, nothing to clear: {:?}", path_to_clear);
            return Ok(());
        }
        match fs::remove_file(&path_to_clear) {
            Ok(_) => {
                info!("Successfully deleted database file: {:?}", path_to_clear);
                for suffix in ["-wal", "-shm"] {
                    let mut side = path_to_clear.clone().into_os_string();
                    side.push(suffix);
                    let side = PathBuf::from(side);
                    if side.exists() {
                        let _ = fs::remove_file(side); // Ignore error if deletion fails
                    }
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to delete database file {:?}: {}", path_to_clear, e);
                Err(LiftError::Io(e))
            }
        }
    }
}

// --- View helpers ---

fn alternatives<S: LexiconStore>(store: &S, value: &MultiString) -> Vec<(String, String)> {
    value
        .iter()
        .filter(|(_, text)| !text.is_empty())
        .map(|(ws, text)| {
            let tag = store.writing_systems().tag(*ws).unwrap_or("?").to_string();
            (tag, text.clone())
        })
        .collect()
}

fn first_text(value: &MultiString) -> Option<String> {
    value.values().find(|t| !t.is_empty()).cloned()
}

fn entry_view<S: LexiconStore>(store: &S, guid: Guid) -> Option<EntryView> {
    let data = store.get::<EntryData>(guid)?;
    let senses: Vec<Guid> = store.senses_of_entry(guid);

    let sense_views = senses
        .iter()
        .filter_map(|sense| store.get::<SenseData>(*sense))
        .map(|sense| SenseView {
            part_of_speech: sense
                .msa
                .and_then(|m| store.get::<MsaData>(m))
                .and_then(|m| m.part_of_speech)
                .and_then(|p| store.get::<PossibilityData>(p))
                .and_then(|p| first_text(&p.name)),
            gloss: alternatives(store, &sense.gloss),
            definition: alternatives(store, &sense.definition),
        })
        .collect();

    let mut relations = Vec::new();
    let members: Vec<Guid> = std::iter::once(guid).chain(senses.iter().copied()).collect();
    for reference in store.all_of_kind(ObjectKind::LexReference) {
        let Some(targets) = store.get::<LexReferenceData>(reference).map(|d| &d.targets) else {
            continue;
        };
        if !targets.iter().any(|t| members.contains(t)) {
            continue;
        }
        let relation_type = store
            .owner_of(reference)
            .and_then(|t| store.get::<LexRefTypeData>(t))
            .and_then(|t| first_text(&t.name))
            .unwrap_or_else(|| "relation".to_string());
        relations.push(RelationView {
            relation_type,
            targets: targets
                .iter()
                .filter(|t| !members.contains(t))
                .map(|t| store.headword(*t))
                .collect(),
        });
    }
    for entry_ref in store.owned(guid, OwningField::EntryRefs) {
        let Some(data) = store.get::<EntryRefData>(*entry_ref) else {
            continue;
        };
        let relation_type = match data.kind {
            RefKind::ComplexForm => "Components",
            RefKind::Variant => "Variant of",
        };
        relations.push(RelationView {
            relation_type: relation_type.to_string(),
            targets: data.components.iter().map(|t| store.headword(*t)).collect(),
        });
    }

    Some(EntryView {
        guid,
        headword: store.headword(guid),
        lift_id: data.lift_id.clone(),
        senses: sense_views,
        relations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ANIMALS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<lift version="0.13" producer="SIL.FLEx 8.3">
  <entry id="cat_1">
    <lexical-unit><form lang="en"><text>cat</text></form></lexical-unit>
    <sense id="cat_1_s1">
      <grammatical-info value="Noun"/>
      <gloss lang="en"><text>feline</text></gloss>
    </sense>
    <relation type="synonym" ref="puss_2"/>
  </entry>
  <entry id="puss_2">
    <lexical-unit><form lang="en"><text>puss</text></form></lexical-unit>
    <relation type="synonym" ref="cat_1"/>
  </entry>
</lift>"#;

    fn write_lift(dir: &Path, name: &str, xml: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, xml).unwrap();
        path
    }

    fn open_in(dir: &Path) -> Lexicon {
        Lexicon::open(LexiconOptions {
            db_path: Some(dir.join("lexicon.db")),
            force_reset: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_import_persists_and_reimport_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = write_lift(dir.path(), "animals.lift", ANIMALS);
        let lexicon = open_in(dir.path());

        let report = lexicon.import_file(&path, ImportOptions::default(), None).await.unwrap();
        assert_eq!(report.entries_created, 2);
        let first = lexicon.store().unwrap();

        let report = lexicon.import_file(&path, ImportOptions::default(), None).await.unwrap();
        assert_eq!(report.entries_created, 0);
        let second = lexicon.store().unwrap();
        assert_eq!(second.len(), first.len());
        assert_eq!(second.count_of_kind(ObjectKind::LexReference), 1);
    }

    #[tokio::test]
    async fn test_lookup_headword_and_stats() {
        let dir = tempdir().unwrap();
        let path = write_lift(dir.path(), "animals.lift", ANIMALS);
        let lexicon = open_in(dir.path());
        lexicon.import_file(&path, ImportOptions::default(), None).await.unwrap();

        let entries = lexicon.lookup_headword("CAT").unwrap();
        assert_eq!(entries.len(), 1);
        let cat = &entries[0];
        assert_eq!(cat.lift_id.as_deref(), Some("cat_1"));
        assert_eq!(cat.senses.len(), 1);
        assert_eq!(cat.senses[0].part_of_speech.as_deref(), Some("Noun"));
        assert_eq!(cat.senses[0].gloss, vec![("en".to_string(), "feline".to_string())]);
        assert_eq!(cat.relations.len(), 1);
        assert_eq!(cat.relations[0].targets, vec!["puss".to_string()]);
        assert!(lexicon.lookup_headword("dog").unwrap().is_empty());

        let stats = lexicon.stats().unwrap();
        assert!(stats.contains(&(ObjectKind::Entry, 2)));
    }

    #[tokio::test]
    async fn test_failed_and_cancelled_imports_leave_database_unchanged() {
        let dir = tempdir().unwrap();
        let lexicon = open_in(dir.path());
        let good = write_lift(dir.path(), "animals.lift", ANIMALS);

        let cancel: ProgressCallback = Box::new(|_| false);
        let report = lexicon
            .import_file(&good, ImportOptions::default(), Some(cancel))
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(lexicon.store().unwrap().is_empty());

        let malformed = write_lift(
            dir.path(),
            "bad.lift",
            r#"<lift version="0.13">
  <header><fields>
    <field tag="Plural"><form lang="qaa-x-spec"><text>Class=LexEntry; Type=kcptHologram</text></form></field>
  </fields></header>
  <entry id="cat_1"><lexical-unit><form lang="en"><text>cat</text></form></lexical-unit></entry>
</lift>"#,
        );
        let result = lexicon.import_file(&malformed, ImportOptions::default(), None).await;
        assert!(matches!(result, Err(LiftError::MalformedEnum { .. })));
        assert!(lexicon.store().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_force_reset_and_clear_database() {
        let dir = tempdir().unwrap();
        let path = write_lift(dir.path(), "animals.lift", ANIMALS);
        let lexicon = open_in(dir.path());
        lexicon.import_file(&path, ImportOptions::default(), None).await.unwrap();
        drop(lexicon);

        let reset = Lexicon::open(LexiconOptions {
            db_path: Some(dir.path().join("lexicon.db")),
            force_reset: true,
        })
        .unwrap();
        assert!(reset.store().unwrap().is_empty());
        drop(reset);

        let db_path = dir.path().join("lexicon.db");
        Lexicon::clear_database(Some(db_path.clone())).unwrap();
        assert!(!db_path.exists());
        Lexicon::clear_database(Some(db_path)).unwrap();
    }
}
