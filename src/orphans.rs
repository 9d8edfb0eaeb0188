//! Removal of data a replace-all import did not carry forward.

use crate::identity::IdentityResolver;
use crate::report::ImportReport;
use crate::store::{
    Guid, LexReferenceData, LexiconStore, ObjectKind, SenseData, WordformAnalysisData,
};
use log::{debug, info, warn};
use std::collections::HashSet;

/// Objects that existed before the run and were not matched by it.
#[derive(Debug, Default)]
pub struct Untouched {
    pub lex_references: HashSet<Guid>,
    pub entry_refs: HashSet<Guid>,
    pub entries: Vec<Guid>,
}

pub struct OrphanCleaner<'a, S: LexiconStore> {
    store: &'a mut S,
    identity: &'a mut IdentityResolver,
    report: &'a mut ImportReport,
}

impl<'a, S: LexiconStore> OrphanCleaner<'a, S> {
    pub fn new(store: &'a mut S, identity: &'a mut IdentityResolver, report: &'a mut ImportReport) -> Self {
        OrphanCleaner {
            store,
            identity,
            report,
        }
    }

    /// Deletes the untouched objects, then runs one cleanup pass over
    /// associations, analyses and wordform analyses left dangling.
    pub fn run(mut self, untouched: Untouched) {
        let mut lex_references: Vec<Guid> = untouched.lex_references.into_iter().collect();
        lex_references.sort();
        let mut entry_refs: Vec<Guid> = untouched.entry_refs.into_iter().collect();
        entry_refs.sort();

        for guid in lex_references.into_iter().chain(entry_refs) {
            if self.delete(guid) {
                self.report.objects_deleted += 1;
            }
        }
        for guid in untouched.entries {
            if self.delete(guid) {
                self.report.entries_deleted += 1;
            }
        }

        let short = self.short_associations();
        let unused_msas = self.unused_analyses();
        let mut removed = 0;
        for guid in short.into_iter().chain(unused_msas) {
            if self.delete(guid) {
                removed += 1;
            }
        }
        // Wordform analyses are checked after the analyses they point at are gone.
        for guid in self.dead_wordform_analyses() {
            if self.delete(guid) {
                removed += 1;
            }
        }
        self.report.objects_deleted += removed;
        info!(
            "Orphan cleanup removed {} entries and {} other objects",
            self.report.entries_deleted, self.report.objects_deleted
        );
    }

    /// Deletes one object. Failures are logged and skipped.
    fn delete(&mut self, guid: Guid) -> bool {
        if !self.store.contains(guid) {
            return false;
        }
        let kind = self.store.kind_of(guid);
        match self.store.delete(guid) {
            Ok(()) => {
                debug!("Deleted {:?} {}", kind, guid);
                self.identity.mark_deleted(guid);
                true
            }
            Err(e) => {
                warn!("Could not delete {:?} {}: {}", kind, guid, e);
                false
            }
        }
    }

    fn short_associations(&self) -> Vec<Guid> {
        self.store
            .all_of_kind(ObjectKind::LexReference)
            .into_iter()
            .filter(|g| {
                self.store
                    .get::<LexReferenceData>(*g)
                    .is_some_and(|d| d.targets.len() < 2)
            })
            .collect()
    }

    /// Grammatical analyses no sense of their entry points at.
    fn unused_analyses(&self) -> Vec<Guid> {
        let mut used = HashSet::new();
        for sense in self.store.all_of_kind(ObjectKind::Sense) {
            if let Some(msa) = self.store.get::<SenseData>(sense).and_then(|d| d.msa) {
                used.insert(msa);
            }
        }
        self.store
            .all_of_kind(ObjectKind::Msa)
            .into_iter()
            .filter(|g| !used.contains(g))
            .collect()
    }

    fn dead_wordform_analyses(&self) -> Vec<Guid> {
        let live = |g: Option<Guid>, kind: ObjectKind| g.is_some_and(|g| self.store.kind_of(g) == Some(kind));
        self.store
            .all_of_kind(ObjectKind::WordformAnalysis)
            .into_iter()
            .filter(|g| {
                self.store.get::<WordformAnalysisData>(*g).is_some_and(|d| {
                    !d.bundles.iter().any(|b| {
                        live(b.msa, ObjectKind::Msa) || live(b.morph, ObjectKind::Allomorph)
                    })
                })
            })
            .collect()
    }
}
