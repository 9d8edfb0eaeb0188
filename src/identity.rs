//! Maps interchange identifiers onto store objects.
//!
//! An input record may carry an explicit GUID, an id string that embeds a
//! GUID (`cat_0ae89610-fc01-4bfd-a0d6-1125b7281dd1`), or a plain id. Ids are
//! also persisted on entries and senses so inputs without GUIDs still find
//! their objects on a later run.

use crate::error::Result;
use crate::store::{EntryData, Guid, LexiconStore, ObjectKind, OwningField, SenseData};
use log::{debug, trace};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn guid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .expect("GUID pattern is a valid regex")
    })
}

/// The last GUID embedded in `id`, if any.
pub fn find_guid_in_string(id: &str) -> Option<Guid> {
    guid_pattern()
        .find_iter(id)
        .last()
        .and_then(|m| Guid::parse_str(m.as_str()).ok())
}

/// Parses an explicit `guid` attribute, ignoring junk.
pub fn parse_guid(value: Option<&str>) -> Option<Guid> {
    value.and_then(|v| Guid::parse_str(v.trim()).ok())
}

#[derive(Debug, Default)]
pub struct IdentityResolver {
    /// Interchange id -> object, for everything seen this run.
    ids: HashMap<String, Guid>,
    /// GUIDs deleted during this run. They are never reissued.
    deleted: HashSet<Guid>,
    /// Persisted ids, built lazily per kind.
    persisted: HashMap<ObjectKind, HashMap<String, Vec<Guid>>>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: &str, guid: Guid) {
        if !id.is_empty() {
            self.ids.insert(id.to_string(), guid);
        }
    }

    /// Bars `guid` from being reissued. Id mappings that still point at it
    /// are skipped on lookup once the object is gone from the store.
    pub fn mark_deleted(&mut self, guid: Guid) {
        self.deleted.insert(guid);
    }

    pub fn was_deleted(&self, guid: Guid) -> bool {
        self.deleted.contains(&guid)
    }

    fn persisted_index<S: LexiconStore>(&mut self, store: &S, kind: ObjectKind) -> &HashMap<String, Vec<Guid>> {
        self.persisted.entry(kind).or_insert_with(|| {
            let mut index = HashMap::new();
            for guid in store.all_of_kind(kind) {
                let lift_id = match kind {
                    ObjectKind::Entry => store.get::<EntryData>(guid).and_then(|d| d.lift_id.clone()),
                    ObjectKind::Sense => store.get::<SenseData>(guid).and_then(|d| d.lift_id.clone()),
                    _ => None,
                };
                if let Some(id) = lift_id {
                    index.entry(id).or_insert_with(Vec::new).push(guid);
                }
            }
            trace!("Indexed {} persisted {} ids", index.len(), kind);
            index
        })
    }

    /// Resolves a live object of `kind` for the given id/guid without creating one.
    pub fn find_existing<S: LexiconStore>(
        &mut self,
        store: &S,
        kind: ObjectKind,
        id: Option<&str>,
        explicit: Option<Guid>,
    ) -> Option<Guid> {
        self.find_within(store, kind, id, explicit, None)
    }

    /// Like `find_existing`. When `entry` is given, a match by interchange id
    /// must be owned by that entry.
    fn find_within<S: LexiconStore>(
        &mut self,
        store: &S,
        kind: ObjectKind,
        id: Option<&str>,
        explicit: Option<Guid>,
        entry: Option<Guid>,
    ) -> Option<Guid> {
        let live = |g: Guid| store.kind_of(g) == Some(kind);
        let placed = |g: Guid| live(g) && entry.is_none_or(|e| store.owning_entry(g) == Some(e));
        if let Some(guid) = explicit.filter(|g| live(*g)) {
            return Some(guid);
        }
        let id = id.filter(|i| !i.is_empty())?;
        if let Some(guid) = self.ids.get(id).copied().filter(|g| placed(*g)) {
            return Some(guid);
        }
        if let Some(guid) = find_guid_in_string(id).filter(|g| live(*g)) {
            return Some(guid);
        }
        self.persisted_index(store, kind)
            .get(id)
            .and_then(|found| found.iter().copied().find(|g| placed(*g)))
    }

    /// Finds or creates the object an input record refers to.
    ///
    /// Returns the GUID and whether the object was created. A GUID used by an
    /// object of a different kind is ignored, and a GUID deleted during this
    /// run is never reused.
    pub fn resolve<S: LexiconStore>(
        &mut self,
        store: &mut S,
        kind: ObjectKind,
        owner: Option<(Guid, OwningField)>,
        id: Option<&str>,
        explicit: Option<Guid>,
    ) -> Result<(Guid, bool)> {
        let entry = match kind {
            ObjectKind::Sense => owner.and_then(|(g, _)| store.owning_entry(g)),
            _ => None,
        };
        if let Some(guid) = self.find_within(store, kind, id, explicit, entry) {
            if let Some(id) = id {
                self.record(id, guid);
            }
            return Ok((guid, false));
        }

        let embedded = id.and_then(find_guid_in_string);
        let usable = |g: &Guid| !store.contains(*g) && !self.was_deleted(*g);
        let forced = explicit.filter(usable).or_else(|| embedded.filter(usable));
        if let Some(guid) = explicit.filter(|g| store.contains(*g)) {
            debug!(
                "GUID {} already belongs to a {:?}; creating a new {}",
                guid,
                store.kind_of(guid),
                kind
            );
        }

        let guid = store.create(kind, owner, forced)?;
        if let Some(id) = id {
            self.record(id, guid);
        }
        Ok((guid, true))
    }

    /// Resolves the `ref` of a relation to any object seen or stored.
    pub fn lookup<S: LexiconStore>(&mut self, store: &S, target: &str) -> Option<Guid> {
        if target.is_empty() {
            return None;
        }
        if let Some(guid) = self.ids.get(target).copied().filter(|g| store.contains(*g)) {
            return Some(guid);
        }
        if let Some(guid) = find_guid_in_string(target).filter(|g| store.contains(*g)) {
            return Some(guid);
        }
        for kind in [ObjectKind::Entry, ObjectKind::Sense] {
            if let Some(guid) = self
                .persisted_index(store, kind)
                .get(target)
                .and_then(|found| found.iter().copied().find(|g| store.contains(*g)))
            {
                return Some(guid);
            }
        }
        None
    }
}
