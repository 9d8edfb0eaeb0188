//! The push-driven import engine.
//!
//! A parser (or [`LiftImporter::import_document`]) calls one `on_*` method per
//! record in document order. Each call merges its record into the store at
//! once; relations are queued and resolved by [`LiftImporter::finalize_relations`]
//! once every entry is known.

use crate::custom_fields::{class_name, Registration};
use crate::entry_refs::{
    is_entry_ref_relation, is_ignored_relation, EntryRefResolver, LegacyEntryInfo, PendingLexEntryRef,
};
use crate::error::Result;
use crate::identity::{parse_guid, IdentityResolver};
use crate::merge::{
    merge_multi_string, merge_string, texts_equal, MediaDirectory, MergeOutcome, MergeStyle, StringConflict,
};
use crate::models::{
    LiftDocument, LiftEntry, LiftEtymology, LiftExample, LiftField, LiftFieldDefinition, LiftForm,
    LiftNote, LiftPronunciation, LiftRangeElement, LiftRelation, LiftSense, LiftTrait, LiftVariant,
};
use crate::orphans::{OrphanCleaner, Untouched};
use crate::parse::parse_lift_date;
use crate::possibility::{PossibilityItem, PossibilityResolver};
use crate::progress::{Checkpoint, ProgressCallback, ProgressUpdate};
use crate::relations::{find_or_create_relation_type, PendingRelation, RelationResolver, RELATION_TYPE_LIST};
use crate::report::{ImportReport, MergeConflict, RefusedField};
use crate::residue::{field_xml, forms_xml, note_xml, relation_content_xml, trait_xml, ResidueStore};
use crate::store::{
    AllomorphData, EntryData, EtymologyData, ExampleData, Guid, LexRefTypeData, LexiconStore,
    MappingKind, MsaData, MultiString, ObjectKind, OwningField, Payload, PossibilityData,
    PronunciationData, SenseData,
};
use crate::writing_systems::{resolve_forms, IncomingText, WritingSystemRegistry};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

/// List that receives parts of speech.
pub const GRAMMATICAL_INFO_LIST: &str = "grammatical-info";
/// List that receives semantic domains.
pub const SEMANTIC_DOMAIN_LIST: &str = "semantic-domain-ddp4";

const SEMANTIC_DOMAIN_TRAITS: [&str; 2] = ["semantic-domain-ddp4", "semantic-domain"];
const ENTRY_TYPE_FIELD: &str = "entry-type";
const MINOR_ENTRY_CONDITION_FIELD: &str = "minor-entry-condition";
const EXCLUDE_AS_HEADWORD_TRAIT: &str = "exclude-as-headword";
const REFERENCE_TYPE_TRAIT: &str = "referenceType";
const GENERAL_NOTE: &str = "general";

/// Per-run settings.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub merge_style: MergeStyle,
    /// Directory of the LIFT file; audio is read from its `audio/` folder.
    pub source_dir: Option<PathBuf>,
    /// Root of the managed media directory. Audio is copied only when both
    /// directories are known.
    pub media_dir: Option<PathBuf>,
}

impl ImportOptions {
    pub fn with_merge_style(merge_style: MergeStyle) -> Self {
        ImportOptions {
            merge_style,
            ..Default::default()
        }
    }

    fn media(&self) -> Option<MediaDirectory> {
        match (&self.source_dir, &self.media_dir) {
            (Some(source), Some(media)) => Some(MediaDirectory::new(source, media)),
            _ => None,
        }
    }
}

pub struct LiftImporter<'a, S: LexiconStore> {
    store: &'a mut S,
    style: MergeStyle,
    media: Option<MediaDirectory>,
    progress: Option<ProgressCallback>,
    producer: Option<String>,

    identity: IdentityResolver,
    possibilities: PossibilityResolver,
    residue: ResidueStore,
    report: ImportReport,

    pending_relations: Vec<PendingRelation>,
    pending_entry_refs: Vec<PendingLexEntryRef>,
    pending_modify_times: Vec<(Guid, DateTime<Utc>)>,

    unmatched_lex_refs: HashSet<Guid>,
    unmatched_entry_refs: HashSet<Guid>,
    original_entries: Vec<Guid>,
    touched_entries: HashSet<Guid>,

    /// Set when the current entry (or anything it owns) changed.
    dirty: bool,
    run_time: DateTime<Utc>,
    started: Instant,
    finalized: bool,
}

impl<'a, S: LexiconStore> LiftImporter<'a, S> {
    pub fn new(store: &'a mut S, options: &ImportOptions) -> Self {
        store.custom_fields_mut().clear_refused();
        let unmatched_lex_refs = store.all_of_kind(ObjectKind::LexReference).into_iter().collect();
        let unmatched_entry_refs = store.all_of_kind(ObjectKind::EntryRef).into_iter().collect();
        let original_entries = store.all_of_kind(ObjectKind::Entry);
        LiftImporter {
            store,
            style: options.merge_style,
            media: options.media(),
            progress: None,
            producer: None,
            identity: IdentityResolver::new(),
            possibilities: PossibilityResolver::new(),
            residue: ResidueStore::new(),
            report: ImportReport::new(),
            pending_relations: Vec::new(),
            pending_entry_refs: Vec::new(),
            pending_modify_times: Vec::new(),
            unmatched_lex_refs,
            unmatched_entry_refs,
            original_entries,
            touched_entries: HashSet::new(),
            dirty: false,
            run_time: Utc::now(),
            started: Instant::now(),
            finalized: false,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Producer string of the input, used for producer-specific defaults.
    pub fn set_producer(&mut self, producer: Option<&str>) {
        self.producer = producer.map(str::to_string);
    }

    pub fn report(&self) -> &ImportReport {
        &self.report
    }

    // --- Helpers ---

    fn forms(&mut self, forms: &[LiftForm]) -> Vec<IncomingText> {
        resolve_forms(self.store.writing_systems_mut(), forms)
    }

    fn parse_date(&mut self, object: Option<Guid>, field: &str, value: Option<&str>) -> Option<DateTime<Utc>> {
        let value = value.filter(|v| !v.trim().is_empty())?;
        match parse_lift_date(value) {
            Ok(date) => Some(date),
            Err(e) => {
                warn!("Ignoring {} '{}': {}", field, value, e);
                self.report.add_invalid_data(object, field, value, e.to_string());
                None
            }
        }
    }

    fn attach(&mut self, object: Guid, fragment: String) -> Result<()> {
        self.residue.attach(self.store, object, fragment)
    }

    /// Records the effects of one merge: change flag, conflicts, audio copies.
    fn apply(&mut self, object: Guid, field: &str, outcome: MergeOutcome) {
        self.dirty |= outcome.changed;
        let object_kind = self.store.kind_of(object).unwrap_or(ObjectKind::Entry);
        for conflict in outcome.conflicts {
            let writing_system = self
                .store
                .writing_systems()
                .tag(conflict.ws)
                .unwrap_or_default()
                .to_string();
            let added = self.report.add_conflict(MergeConflict {
                object,
                object_kind,
                field: field.to_string(),
                writing_system,
                kept: conflict.kept,
                rejected: conflict.rejected,
            });
            if added {
                debug!("Kept existing {} of {} {}", field, object_kind, object);
            }
        }
        for file in outcome.audio_files {
            self.copy_audio(object, &file);
        }
    }

    fn copy_audio(&mut self, object: Guid, file: &str) {
        let Some(media) = &self.media else {
            debug!("No media directory configured; not copying '{}'", file);
            return;
        };
        if let Err(e) = media.copy_audio(file) {
            warn!("Could not copy audio file '{}': {}", file, e);
            self.report.add_invalid_data(Some(object), "audio", file, e.to_string());
        }
    }

    fn merge_field<T: Payload>(
        &mut self,
        object: Guid,
        field: &str,
        created: bool,
        incoming: &[IncomingText],
        select: impl FnOnce(&mut T) -> &mut MultiString,
    ) -> Result<()> {
        let style = self.style;
        let data = self.store.expect_data_mut::<T>(object)?;
        let outcome = merge_multi_string(select(data), incoming, style, created);
        self.apply(object, field, outcome);
        Ok(())
    }

    /// An unclaimed child of `owner` satisfying `matches`.
    fn match_child<T: Payload>(
        &self,
        owner: Guid,
        field: OwningField,
        claimed: &HashSet<Guid>,
        matches: impl Fn(&T) -> bool,
    ) -> Option<Guid> {
        self.store
            .owned(owner, field)
            .iter()
            .copied()
            .filter(|g| !claimed.contains(g))
            .find(|g| self.store.get::<T>(*g).is_some_and(&matches))
    }

    fn find_or_create_child<T: Payload>(
        &mut self,
        owner: Guid,
        field: OwningField,
        claimed: &HashSet<Guid>,
        matches: impl Fn(&T) -> bool,
    ) -> Result<(Guid, bool)> {
        if let Some(existing) = self.match_child(owner, field, claimed, matches) {
            return Ok((existing, false));
        }
        let guid = self.store.create(T::KIND, Some((owner, field)), None)?;
        self.dirty = true;
        Ok((guid, true))
    }

    /// Under KeepOnlyNew, deletes children of an existing owner that the
    /// input no longer carries.
    fn prune_children(&mut self, owner: Guid, field: OwningField, kept: &HashSet<Guid>) {
        if self.style != MergeStyle::KeepOnlyNew {
            return;
        }
        let stale: Vec<Guid> = self
            .store
            .owned(owner, field)
            .iter()
            .copied()
            .filter(|g| !kept.contains(g))
            .collect();
        for guid in stale {
            match self.store.delete(guid) {
                Ok(()) => {
                    debug!("Removed {:?} {} no longer in the input", field, guid);
                    self.identity.mark_deleted(guid);
                    self.report.objects_deleted += 1;
                    self.dirty = true;
                }
                Err(e) => warn!("Could not remove {}: {}", guid, e),
            }
        }
    }

    fn checkpoint(&mut self, checkpoint: Checkpoint, message: String) -> bool {
        info!("{} ({:.2?}): {}", checkpoint.description(), self.started.elapsed(), message);
        let keep_going = match self.progress.as_mut() {
            Some(callback) => callback(ProgressUpdate::checkpoint(checkpoint, Some(message))),
            None => true,
        };
        if !keep_going {
            warn!("Import cancelled after: {}", checkpoint.description());
            self.report.cancelled = true;
        }
        keep_going
    }

    // --- Header ---

    /// Registers one element of a header range.
    pub fn on_range_element(&mut self, range: &str, element: &LiftRangeElement) -> Result<Guid> {
        let label = element.label.as_ref().map(|l| self.forms(&l.forms)).unwrap_or_default();
        let abbrev = element.abbrev.as_ref().map(|a| self.forms(&a.forms)).unwrap_or_default();
        let description = element
            .description
            .as_ref()
            .map(|d| self.forms(&d.forms))
            .unwrap_or_default();

        if range == RELATION_TYPE_LIST {
            return self.on_relation_type(element, &label, &abbrev);
        }

        let list = self.store.list(range)?;
        let item = PossibilityItem {
            id: &element.id,
            guid: parse_guid(element.guid.as_deref()),
            parent: element.parent.as_deref(),
            label: label.clone(),
            abbrev: abbrev.clone(),
        };
        let (guid, created) = self.possibilities.find_or_create(self.store, list, &item)?;
        self.merge_field::<PossibilityData>(guid, "name", created, &label, |d| &mut d.name)?;
        self.merge_field::<PossibilityData>(guid, "abbreviation", created, &abbrev, |d| &mut d.abbreviation)?;
        self.merge_field::<PossibilityData>(guid, "description", created, &description, |d| &mut d.description)?;
        self.possibilities.remember(&*self.store, list, guid);
        Ok(guid)
    }

    fn on_relation_type(
        &mut self,
        element: &LiftRangeElement,
        label: &[IncomingText],
        abbrev: &[IncomingText],
    ) -> Result<Guid> {
        let mapping = element
            .traits
            .iter()
            .find(|t| t.name == REFERENCE_TYPE_TRAIT)
            .map(|t| t.value.trim().parse::<MappingKind>())
            .transpose()?;
        let name = label
            .iter()
            .map(|t| t.text.as_str())
            .find(|t| !t.is_empty())
            .unwrap_or(element.id.as_str())
            .to_string();
        let known: HashSet<Guid> = self.store.all_of_kind(ObjectKind::LexRefType).into_iter().collect();
        let guid = find_or_create_relation_type(
            self.store,
            &name,
            mapping == Some(MappingKind::Sequence),
            self.producer.as_deref(),
        )?;
        let created = !known.contains(&guid);
        self.merge_field::<LexRefTypeData>(guid, "name", created, label, |d| &mut d.name)?;
        self.merge_field::<LexRefTypeData>(guid, "abbreviation", created, abbrev, |d| &mut d.abbreviation)?;
        if let Some(mapping) = mapping.filter(|_| created) {
            self.store.expect_data_mut::<LexRefTypeData>(guid)?.mapping = mapping;
        }
        Ok(guid)
    }

    /// Registers a custom field definition from the header.
    pub fn on_field_definition(&mut self, definition: &LiftFieldDefinition) -> Result<()> {
        let (def, registration) = self.store.custom_fields_mut().register(definition)?;
        if let Registration::Refused { existing, incoming } = registration {
            self.report.refused_fields.push(RefusedField {
                class: def.class,
                name: def.name,
                existing,
                incoming,
            });
        }
        Ok(())
    }

    // --- Entries ---

    /// Merges one entry and everything it owns. Returns `None` for a deletion
    /// marker.
    pub fn on_entry(&mut self, entry: &LiftEntry) -> Result<Option<Guid>> {
        let explicit = parse_guid(entry.guid.as_deref());
        let id = entry.id.as_deref().filter(|i| !i.is_empty());

        if entry.date_deleted.is_some() {
            if let Some(existing) = self.identity.find_existing(&*self.store, ObjectKind::Entry, id, explicit) {
                self.store.delete(existing)?;
                self.identity.mark_deleted(existing);
                self.report.entries_deleted += 1;
                debug!("Deleted entry {} marked as deleted in the input", existing);
            }
            return Ok(None);
        }

        let (guid, created) = self
            .identity
            .resolve(self.store, ObjectKind::Entry, None, id, explicit)?;
        self.touched_entries.insert(guid);
        self.dirty = false;
        if created {
            self.report.entries_created += 1;
            debug!("Created entry {} ({})", guid, id.unwrap_or("no id"));
        }
        if let Some(id) = id {
            self.store.expect_data_mut::<EntryData>(guid)?.lift_id = Some(id.to_string());
            self.residue.set_id(self.store, guid, id)?;
        }
        let date_created = self.parse_date(Some(guid), "dateCreated", entry.date_created.as_deref());
        let date_modified = self.parse_date(Some(guid), "dateModified", entry.date_modified.as_deref());

        let lexeme = entry.lexical_unit.as_ref().map(|m| self.forms(&m.forms)).unwrap_or_default();
        self.merge_field::<EntryData>(guid, "lexeme form", created, &lexeme, |d| &mut d.lexeme_form)?;
        let citation = entry.citation.as_ref().map(|m| self.forms(&m.forms)).unwrap_or_default();
        self.merge_field::<EntryData>(guid, "citation form", created, &citation, |d| &mut d.citation_form)?;

        let mut legacy = LegacyEntryInfo {
            lexeme_form: entry
                .lexical_unit
                .as_ref()
                .and_then(|m| m.first_text())
                .map(str::to_string),
            ..Default::default()
        };
        for field in &entry.fields {
            match field.field_type.as_str() {
                ENTRY_TYPE_FIELD => legacy.entry_type = field.forms.first().map(|f| f.text.clone()),
                MINOR_ENTRY_CONDITION_FIELD => {
                    legacy.minor_entry_condition = field.forms.first().map(|f| f.text.clone())
                }
                _ => self.on_field(guid, created, field)?,
            }
        }
        for item in &entry.traits {
            if item.name == EXCLUDE_AS_HEADWORD_TRAIT {
                legacy.exclude_as_headword = item.value.eq_ignore_ascii_case("true");
            } else {
                self.on_trait(guid, created, item)?;
            }
        }
        for note in &entry.notes {
            self.on_note(guid, created, note)?;
        }

        let mut kept = HashSet::new();
        for sense in &entry.senses {
            kept.insert(self.on_sense(guid, OwningField::Senses, sense)?);
        }
        if !created {
            self.prune_children(guid, OwningField::Senses, &kept);
        }

        kept.clear();
        for pronunciation in &entry.pronunciations {
            kept.insert(self.on_pronunciation(guid, pronunciation, &kept)?);
        }
        if !created {
            self.prune_children(guid, OwningField::Pronunciations, &kept);
        }

        kept.clear();
        for variant in &entry.variants {
            kept.insert(self.on_variant(guid, variant, &kept)?);
        }
        if !created {
            self.prune_children(guid, OwningField::Allomorphs, &kept);
        }

        kept.clear();
        for etymology in &entry.etymologies {
            kept.insert(self.on_etymology(guid, etymology, &kept)?);
        }
        if !created {
            self.prune_children(guid, OwningField::Etymologies, &kept);
        }

        for relation in &entry.relations {
            self.on_relation(guid, relation, &legacy)?;
        }
        self.ensure_sense_analyses(guid)?;

        let changed = self.dirty;
        let data = self.store.expect_data_mut::<EntryData>(guid)?;
        if created {
            data.date_created = Some(date_created.unwrap_or(self.run_time));
            data.date_modified = Some(date_modified.unwrap_or(self.run_time));
        } else if let Some(modified) = date_modified {
            self.pending_modify_times.push((guid, modified));
        } else if changed {
            data.date_modified = Some(self.run_time);
        }

        for subentry in &entry.subentries {
            self.on_entry(subentry)?;
        }
        Ok(Some(guid))
    }

    /// Every sense of an entry refers to some grammatical analysis.
    fn ensure_sense_analyses(&mut self, entry: Guid) -> Result<()> {
        for sense in self.store.senses_of_entry(entry) {
            let has_msa = self
                .store
                .get::<SenseData>(sense)
                .and_then(|d| d.msa)
                .is_some_and(|m| self.store.contains(m));
            if !has_msa {
                let msa = self.find_or_create_msa(entry, None)?;
                self.store.expect_data_mut::<SenseData>(sense)?.msa = Some(msa);
            }
        }
        Ok(())
    }

    fn find_or_create_msa(&mut self, entry: Guid, part_of_speech: Option<Guid>) -> Result<Guid> {
        let existing = self
            .store
            .owned(entry, OwningField::Msas)
            .iter()
            .copied()
            .find(|m| {
                self.store
                    .get::<MsaData>(*m)
                    .is_some_and(|d| d.part_of_speech == part_of_speech)
            });
        if let Some(msa) = existing {
            return Ok(msa);
        }
        let msa = self.store.create(ObjectKind::Msa, Some((entry, OwningField::Msas)), None)?;
        self.store.expect_data_mut::<MsaData>(msa)?.part_of_speech = part_of_speech;
        self.dirty = true;
        Ok(msa)
    }

    // --- Senses and examples ---

    /// Merges one sense (or subsense) owned by `owner`.
    pub fn on_sense(&mut self, owner: Guid, field: OwningField, sense: &LiftSense) -> Result<Guid> {
        let id = sense.id.as_deref().filter(|i| !i.is_empty());
        let (guid, created) = self
            .identity
            .resolve(self.store, ObjectKind::Sense, Some((owner, field)), id, None)?;
        if created {
            self.report.senses_created += 1;
            self.dirty = true;
        }
        if let Some(id) = id {
            self.store.expect_data_mut::<SenseData>(guid)?.lift_id = Some(id.to_string());
            self.residue.set_id(self.store, guid, id)?;
        }
        let date_created = self.parse_date(Some(guid), "dateCreated", sense.date_created.as_deref());
        let date_modified = self.parse_date(Some(guid), "dateModified", sense.date_modified.as_deref());
        {
            let data = self.store.expect_data_mut::<SenseData>(guid)?;
            if date_created.is_some() && (created || data.date_created.is_none()) {
                data.date_created = date_created;
            }
            if date_modified.is_some() {
                data.date_modified = date_modified;
            }
        }

        let gloss = self.forms(&sense.glosses);
        self.merge_field::<SenseData>(guid, "gloss", created, &gloss, |d| &mut d.gloss)?;
        let definition = sense.definition.as_ref().map(|m| self.forms(&m.forms)).unwrap_or_default();
        self.merge_field::<SenseData>(guid, "definition", created, &definition, |d| &mut d.definition)?;

        if let Some(info) = &sense.grammatical_info {
            self.set_grammatical_info(guid, created, &info.value)?;
            for item in &info.traits {
                self.attach(guid, trait_xml(item))?;
            }
        }

        let mut domains = Vec::new();
        for item in &sense.traits {
            if SEMANTIC_DOMAIN_TRAITS.contains(&item.name.as_str()) {
                match item.value.trim() {
                    "" => self.attach(guid, trait_xml(item))?,
                    value => domains.push(self.resolve_range_value(SEMANTIC_DOMAIN_LIST, value)?),
                }
            } else {
                self.on_trait(guid, created, item)?;
            }
        }
        self.merge_semantic_domains(guid, created, domains)?;

        for field in &sense.fields {
            self.on_field(guid, created, field)?;
        }
        for note in &sense.notes {
            self.on_note(guid, created, note)?;
        }
        for illustration in &sense.illustrations {
            let mut xml = format!(
                "<illustration href=\"{}\"",
                quick_xml::escape::escape(&illustration.href)
            );
            match &illustration.label {
                Some(label) => {
                    xml.push_str(">\n<label>\n");
                    xml.push_str(&forms_xml("form", &label.forms));
                    xml.push_str("</label>\n</illustration>\n");
                }
                None => xml.push_str("/>\n"),
            }
            self.attach(guid, xml)?;
        }

        let mut kept = HashSet::new();
        for example in &sense.examples {
            kept.insert(self.on_example(guid, example, &kept)?);
        }
        if !created {
            self.prune_children(guid, OwningField::Examples, &kept);
        }
        kept.clear();
        for subsense in &sense.subsenses {
            kept.insert(self.on_sense(guid, OwningField::Subsenses, subsense)?);
        }
        if !created {
            self.prune_children(guid, OwningField::Subsenses, &kept);
        }
        for relation in &sense.relations {
            self.on_relation(guid, relation, &LegacyEntryInfo::default())?;
        }
        Ok(guid)
    }

    fn set_grammatical_info(&mut self, sense: Guid, created: bool, value: &str) -> Result<()> {
        let Some(entry) = self.store.owning_entry(sense) else {
            return Ok(());
        };
        let part_of_speech = match value.trim() {
            "" => None,
            value => Some(self.resolve_range_value(GRAMMATICAL_INFO_LIST, value)?),
        };
        let current = self.store.expect_data::<SenseData>(sense)?.msa;
        let current_pos = current.and_then(|m| self.store.get::<MsaData>(m)).map(|d| d.part_of_speech);
        if current_pos == Some(part_of_speech) {
            return Ok(());
        }
        if let (Some(Some(kept)), MergeStyle::KeepOld, false) = (current_pos, self.style, created) {
            let kept_name = self.possibility_name(kept);
            self.apply(
                sense,
                "grammatical-info",
                MergeOutcome {
                    conflicts: vec![StringConflict {
                        ws: 0,
                        kept: kept_name,
                        rejected: value.to_string(),
                    }],
                    ..Default::default()
                },
            );
            return Ok(());
        }
        let msa = self.find_or_create_msa(entry, part_of_speech)?;
        self.store.expect_data_mut::<SenseData>(sense)?.msa = Some(msa);
        self.dirty = true;
        Ok(())
    }

    fn possibility_name(&self, guid: Guid) -> String {
        self.store
            .get::<PossibilityData>(guid)
            .and_then(|d| d.name.values().next().cloned())
            .unwrap_or_else(|| guid.to_string())
    }

    /// Finds or creates a value in a named list.
    fn resolve_range_value(&mut self, list_name: &str, value: &str) -> Result<Guid> {
        let list = self.store.list(list_name)?;
        let (guid, created) = self
            .possibilities
            .find_or_create(self.store, list, &PossibilityItem::named(value))?;
        if created {
            debug!("Added '{}' to {}", value, list_name);
        }
        Ok(guid)
    }

    fn merge_semantic_domains(&mut self, sense: Guid, created: bool, incoming: Vec<Guid>) -> Result<()> {
        let style = self.style;
        let data = self.store.expect_data_mut::<SenseData>(sense)?;
        let before = data.semantic_domains.clone();
        if style == MergeStyle::KeepOnlyNew && !created {
            data.semantic_domains.retain(|d| incoming.contains(d));
        }
        for domain in incoming {
            if !data.semantic_domains.contains(&domain) {
                data.semantic_domains.push(domain);
            }
        }
        self.dirty |= data.semantic_domains != before;
        Ok(())
    }

    pub fn on_example(&mut self, sense: Guid, example: &LiftExample, claimed: &HashSet<Guid>) -> Result<Guid> {
        let content = self.forms(&example.forms);
        let (guid, created) = self.find_or_create_child::<ExampleData>(
            sense,
            OwningField::Examples,
            claimed,
            |d| shares_alternative(&d.content, &content),
        )?;
        self.merge_field::<ExampleData>(guid, "example", created, &content, |d| &mut d.content)?;
        let translation: Vec<LiftForm> = example
            .translations
            .iter()
            .flat_map(|t| t.forms.iter().cloned())
            .collect();
        let translation = self.forms(&translation);
        self.merge_field::<ExampleData>(guid, "translation", created, &translation, |d| &mut d.translation)?;
        for kind in example.translations.iter().filter_map(|t| t.translation_type.as_ref()) {
            self.attach(
                guid,
                format!("<translation type=\"{}\"/>\n", quick_xml::escape::escape(kind)),
            )?;
        }
        let style = self.style;
        let outcome = {
            let data = self.store.expect_data_mut::<ExampleData>(guid)?;
            merge_string(&mut data.source, example.source.as_deref(), style, created)
        };
        self.apply(guid, "source", outcome);

        for note in &example.notes {
            self.on_note(guid, created, note)?;
        }
        for field in &example.fields {
            self.on_field(guid, created, field)?;
        }
        for item in &example.traits {
            self.on_trait(guid, created, item)?;
        }
        Ok(guid)
    }

    // --- Entry-owned records ---

    pub fn on_pronunciation(
        &mut self,
        entry: Guid,
        pronunciation: &LiftPronunciation,
        claimed: &HashSet<Guid>,
    ) -> Result<Guid> {
        let form = self.forms(&pronunciation.forms);
        let media: Vec<String> = pronunciation.media.iter().map(|m| m.href.clone()).collect();
        let (guid, created) = self.find_or_create_child::<PronunciationData>(
            entry,
            OwningField::Pronunciations,
            claimed,
            |d| {
                shares_alternative(&d.form, &form)
                    || (form.iter().all(|t| t.text.is_empty()) && media.iter().any(|m| d.media.contains(m)))
            },
        )?;
        self.merge_field::<PronunciationData>(guid, "pronunciation", created, &form, |d| &mut d.form)?;

        let added: Vec<String> = {
            let data = self.store.expect_data_mut::<PronunciationData>(guid)?;
            let added: Vec<String> = media.iter().filter(|m| !data.media.contains(m)).cloned().collect();
            data.media.extend(added.iter().cloned());
            added
        };
        for file in &added {
            self.dirty = true;
            self.copy_audio(guid, file);
        }
        for field in &pronunciation.fields {
            self.on_field(guid, created, field)?;
        }
        for item in &pronunciation.traits {
            self.on_trait(guid, created, item)?;
        }
        Ok(guid)
    }

    /// An alternate form of the entry.
    pub fn on_variant(&mut self, entry: Guid, variant: &LiftVariant, claimed: &HashSet<Guid>) -> Result<Guid> {
        let form = self.forms(&variant.forms);
        let (guid, created) = self.find_or_create_child::<AllomorphData>(
            entry,
            OwningField::Allomorphs,
            claimed,
            |d| shares_alternative(&d.form, &form),
        )?;
        self.merge_field::<AllomorphData>(guid, "variant", created, &form, |d| &mut d.form)?;
        if let Some(reference) = &variant.reference {
            self.attach(
                guid,
                format!("<variant-ref ref=\"{}\"/>\n", quick_xml::escape::escape(reference)),
            )?;
        }
        for pronunciation in &variant.pronunciations {
            let mut xml = String::from("<pronunciation>\n");
            xml.push_str(&forms_xml("form", &pronunciation.forms));
            xml.push_str("</pronunciation>\n");
            self.attach(guid, xml)?;
        }
        for relation in &variant.relations {
            self.on_relation(entry, relation, &LegacyEntryInfo::default())?;
        }
        for field in &variant.fields {
            self.on_field(guid, created, field)?;
        }
        for item in &variant.traits {
            self.on_trait(guid, created, item)?;
        }
        Ok(guid)
    }

    pub fn on_etymology(&mut self, entry: Guid, etymology: &LiftEtymology, claimed: &HashSet<Guid>) -> Result<Guid> {
        let form = self.forms(&etymology.forms);
        let gloss = self.forms(&etymology.glosses);
        let source = etymology.source.clone();
        let (guid, created) = self.find_or_create_child::<EtymologyData>(
            entry,
            OwningField::Etymologies,
            claimed,
            |d| d.source == source && (shares_alternative(&d.form, &form) || form.is_empty()),
        )?;
        self.merge_field::<EtymologyData>(guid, "etymology", created, &form, |d| &mut d.form)?;
        self.merge_field::<EtymologyData>(guid, "etymology gloss", created, &gloss, |d| &mut d.gloss)?;
        let style = self.style;
        let outcome = {
            let data = self.store.expect_data_mut::<EtymologyData>(guid)?;
            let mut outcome = merge_string(&mut data.etymology_type, etymology.etymology_type.as_deref(), style, created);
            outcome.absorb(merge_string(&mut data.source, etymology.source.as_deref(), style, created));
            outcome
        };
        self.apply(guid, "etymology source", outcome);
        for field in &etymology.fields {
            self.on_field(guid, created, field)?;
        }
        for item in &etymology.traits {
            self.on_trait(guid, created, item)?;
        }
        Ok(guid)
    }

    // --- Relations, notes, fields, traits ---

    /// Queues a relation of `source` for resolution after the main pass.
    pub fn on_relation(&mut self, source: Guid, relation: &LiftRelation, legacy: &LegacyEntryInfo) -> Result<()> {
        if is_ignored_relation(&relation.relation_type) {
            return Ok(());
        }
        let date_created = self.parse_date(Some(source), "relation dateCreated", relation.date_created.as_deref());
        let date_modified = self.parse_date(Some(source), "relation dateModified", relation.date_modified.as_deref());

        if is_entry_ref_relation(relation) && self.store.kind_of(source) == Some(ObjectKind::Entry) {
            let mut relation = relation.clone();
            let pending = PendingLexEntryRef::new(source, &mut relation, legacy, date_created, date_modified);
            self.pending_entry_refs.push(pending);
            return Ok(());
        }
        let residue = relation_content_xml(relation);
        self.pending_relations
            .push(PendingRelation::new(source, relation, date_created, date_modified, residue));
        Ok(())
    }

    /// Merges a note into the object's notes, or keeps it as residue when
    /// the object has no notes.
    pub fn on_note(&mut self, object: Guid, created: bool, note: &LiftNote) -> Result<()> {
        let incoming = self.forms(&note.forms);
        let key = note.note_type.clone().unwrap_or_else(|| GENERAL_NOTE.to_string());
        let style = self.style;
        let outcome = self
            .store
            .find_mut(object)
            .and_then(|o| o.data.notes_mut())
            .map(|notes| merge_multi_string(notes.entry(key.clone()).or_default(), &incoming, style, created));
        match outcome {
            Some(outcome) => {
                self.apply(object, &format!("note ({})", key), outcome);
                Ok(())
            }
            None => self.attach(object, note_xml(note)),
        }
    }

    /// Stores a field in its custom field, or as residue when no usable
    /// definition exists.
    pub fn on_field(&mut self, object: Guid, created: bool, field: &LiftField) -> Result<()> {
        let Some(kind) = self.store.kind_of(object) else {
            return Ok(());
        };
        let class = class_name(kind);
        if self.store.custom_fields().find(class, &field.field_type).is_none() {
            if self.store.custom_fields().is_refused(class, &field.field_type) {
                debug!("Field '{}' on {} was refused; keeping it as residue", field.field_type, class);
            }
            return self.attach(object, field_xml(field));
        }
        let incoming = self.forms(&field.forms);
        let style = self.style;
        let name = field.field_type.clone();
        let outcome = self
            .store
            .find_mut(object)
            .and_then(|o| o.data.custom_mut())
            .map(|custom| merge_multi_string(custom.entry(name.clone()).or_default(), &incoming, style, created));
        match outcome {
            Some(outcome) => {
                self.apply(object, &name, outcome);
                for item in &field.traits {
                    self.attach(object, trait_xml(item))?;
                }
                Ok(())
            }
            None => self.attach(object, field_xml(field)),
        }
    }

    /// Stores a trait naming a custom field there; everything else is residue.
    pub fn on_trait(&mut self, object: Guid, created: bool, item: &LiftTrait) -> Result<()> {
        let Some(kind) = self.store.kind_of(object) else {
            return Ok(());
        };
        if self.store.custom_fields().find(class_name(kind), &item.name).is_none() {
            let list = self.store.find_list(&item.name);
            if let Some(list) = list.filter(|_| !item.value.trim().is_empty()) {
                let (value, _) = self
                    .possibilities
                    .find_or_create(self.store, list, &PossibilityItem::named(item.value.trim()))?;
                debug!("Trait {}={} resolved to {}", item.name, item.value, value);
            }
            return self.attach(object, trait_xml(item));
        }
        let incoming = [IncomingText {
            ws: 0,
            text: item.value.clone(),
            audio: false,
        }];
        let style = self.style;
        let outcome = self
            .store
            .find_mut(object)
            .and_then(|o| o.data.custom_mut())
            .map(|custom| merge_multi_string(custom.entry(item.name.clone()).or_default(), &incoming, style, created));
        match outcome {
            Some(outcome) => {
                self.apply(object, &item.name, outcome);
                Ok(())
            }
            None => self.attach(object, trait_xml(item)),
        }
    }

    // --- Whole documents and finalization ---

    /// Drives the push API over a parsed document, then finalizes.
    pub fn import_document(&mut self, document: &LiftDocument) -> Result<()> {
        self.set_producer(document.producer.as_deref());
        if let Some(header) = &document.header {
            if let Some(ranges) = &header.ranges {
                for range in &ranges.ranges {
                    for element in &range.elements {
                        self.on_range_element(&range.id, element)?;
                    }
                }
            }
            if let Some(fields) = &header.fields {
                for definition in &fields.fields {
                    self.on_field_definition(definition)?;
                }
            }
        }
        for entry in &document.entries {
            self.on_entry(entry)?;
        }
        self.finalize_relations()
    }

    /// Resolves queued relations and entry references, then removes orphans
    /// under KeepOnlyNew. Progress is reported and cancellation checked
    /// between phases.
    pub fn finalize_relations(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let message = format!(
            "{} entries imported; {} relations pending",
            self.touched_entries.len(),
            self.pending_relations.len() + self.pending_entry_refs.len()
        );
        if !self.checkpoint(Checkpoint::MainPass, message) {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending_relations);
        RelationResolver::new(
            self.store,
            &mut self.identity,
            &mut self.residue,
            &mut self.report,
            &mut self.unmatched_lex_refs,
            self.producer.clone(),
        )
        .resolve(&pending)?;
        let message = format!("{} relations resolved", pending.len());
        if !self.checkpoint(Checkpoint::Relations, message) {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending_entry_refs);
        EntryRefResolver::new(
            self.store,
            &mut self.identity,
            &mut self.possibilities,
            &mut self.report,
            &mut self.unmatched_entry_refs,
        )
        .resolve(&pending)?;
        let message = format!("{} entry references resolved", pending.len());
        if !self.checkpoint(Checkpoint::EntryRefs, message) {
            return Ok(());
        }

        if self.style.deletes_unmatched() {
            let entries = self
                .original_entries
                .iter()
                .copied()
                .filter(|g| !self.touched_entries.contains(g))
                .collect();
            let untouched = Untouched {
                lex_references: std::mem::take(&mut self.unmatched_lex_refs),
                entry_refs: std::mem::take(&mut self.unmatched_entry_refs),
                entries,
            };
            OrphanCleaner::new(self.store, &mut self.identity, &mut self.report).run(untouched);
        }
        let message = format!(
            "{} entries and {} other objects deleted",
            self.report.entries_deleted, self.report.objects_deleted
        );
        self.checkpoint(Checkpoint::OrphanCleanup, message);
        Ok(())
    }

    /// Writes residue and pending modification times, and returns the report.
    pub fn finish(mut self) -> Result<ImportReport> {
        self.finalize_relations()?;
        let written = self.residue.write_all(self.store);
        debug!("Wrote residue for {} objects", written);

        if !self.report.cancelled {
            for (guid, modified) in std::mem::take(&mut self.pending_modify_times) {
                let Some(data) = self.store.get_mut::<EntryData>(guid) else {
                    continue;
                };
                let same_second = data
                    .date_modified
                    .is_some_and(|current| current.timestamp() == modified.timestamp());
                if !same_second {
                    data.date_modified = Some(modified);
                }
            }
        }
        self.report.elapsed = self.started.elapsed();
        info!(
            "Import finished in {:.2?}: {} entries created, {} deleted, {} problems",
            self.report.elapsed,
            self.report.entries_created,
            self.report.entries_deleted,
            self.report.problem_count()
        );
        Ok(self.report)
    }
}

/// Some incoming alternative equals the stored one in the same writing system.
fn shares_alternative(existing: &MultiString, incoming: &[IncomingText]) -> bool {
    incoming
        .iter()
        .filter(|t| !t.text.is_empty())
        .any(|t| existing.get(&t.ws).is_some_and(|v| texts_equal(v, &t.text)))
}

/// Imports a parsed document into `store` in one run.
pub fn import<S: LexiconStore>(
    store: &mut S,
    document: &LiftDocument,
    options: &ImportOptions,
    progress: Option<ProgressCallback>,
) -> Result<ImportReport> {
    let mut importer = LiftImporter::new(store, options);
    if let Some(progress) = progress {
        importer = importer.with_progress(progress);
    }
    importer.import_document(document)?;
    importer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_lift_str;
    use crate::residue::ResidueDocument;
    use crate::store::{EntryRefData, LexReferenceData, MemoryStore, RefKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    const SYNONYMS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<lift version="0.13" producer="SIL.FLEx 8.3">
  <entry id="cat_1" dateModified="2024-01-01T10:00:00Z">
    <lexical-unit><form lang="en"><text>cat</text></form></lexical-unit>
    <sense id="cat_1_s1"><gloss lang="en"><text>feline</text></gloss></sense>
    <relation type="synonym" ref="dog_2"/>
  </entry>
  <entry id="dog_2" dateModified="2024-01-01T10:00:00Z">
    <lexical-unit><form lang="en"><text>dog</text></form></lexical-unit>
    <sense id="dog_2_s1"><gloss lang="en"><text>canine</text></gloss></sense>
    <relation type="synonym" ref="cat_1"/>
  </entry>
</lift>"#;

    fn run(store: &mut MemoryStore, xml: &str, style: MergeStyle) -> ImportReport {
        let document = parse_lift_str(xml).unwrap();
        import(store, &document, &ImportOptions::with_merge_style(style), None).unwrap()
    }

    fn entry_by_id(store: &MemoryStore, id: &str) -> Guid {
        store
            .all_of_kind(ObjectKind::Entry)
            .into_iter()
            .find(|g| store.get::<EntryData>(*g).unwrap().lift_id.as_deref() == Some(id))
            .unwrap()
    }

    fn text(store: &MemoryStore, value: &MultiString, tag: &str) -> Option<String> {
        store.text_in(value, tag)
    }

    #[test]
    fn test_mirrored_synonyms_give_one_association() {
        let mut store = MemoryStore::new();
        let report = run(&mut store, SYNONYMS, MergeStyle::Combine);
        assert_eq!(report.entries_created, 2);
        assert_eq!(report.senses_created, 2);
        let associations = store.all_of_kind(ObjectKind::LexReference);
        assert_eq!(associations.len(), 1);
        let targets = &store.get::<LexReferenceData>(associations[0]).unwrap().targets;
        let cat = entry_by_id(&store, "cat_1");
        let dog = entry_by_id(&store, "dog_2");
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&cat) && targets.contains(&dog));
    }

    #[test]
    fn test_reimport_under_combine_is_idempotent() {
        let mut store = MemoryStore::new();
        run(&mut store, SYNONYMS, MergeStyle::Combine);
        let objects = store.len();
        let cat = entry_by_id(&store, "cat_1");
        let modified = store.get::<EntryData>(cat).unwrap().date_modified;

        let report = run(&mut store, SYNONYMS, MergeStyle::Combine);
        assert_eq!(report.entries_created, 0);
        assert_eq!(report.senses_created, 0);
        assert_eq!(store.len(), objects);
        assert_eq!(store.all_of_kind(ObjectKind::LexReference).len(), 1);
        assert_eq!(store.get::<EntryData>(cat).unwrap().date_modified, modified);
    }

    const BANK: &str = r#"<lift version="0.13">
  <entry id="bank_3" dateModified="2024-03-01T08:00:00Z">
    <lexical-unit><form lang="en"><text>bank</text></form></lexical-unit>
    <sense id="bank_3_s1"><gloss lang="en"><text>riverside</text></gloss></sense>
  </entry>
</lift>"#;

    const BANK_FRENCH: &str = r#"<lift version="0.13">
  <entry id="bank_3">
    <lexical-unit><form lang="en"><text>bank</text></form></lexical-unit>
    <sense id="bank_3_s1">
      <gloss lang="en"><text>riverside</text></gloss>
      <gloss lang="fr"><text>rive</text></gloss>
    </sense>
  </entry>
</lift>"#;

    #[test]
    fn test_adding_french_gloss_under_combine() {
        let mut store = MemoryStore::new();
        run(&mut store, BANK, MergeStyle::Combine);
        let bank = entry_by_id(&store, "bank_3");
        let sense = store.owned(bank, OwningField::Senses)[0];

        run(&mut store, BANK_FRENCH, MergeStyle::Combine);
        let gloss = store.get::<SenseData>(sense).unwrap().gloss.clone();
        assert_eq!(text(&store, &gloss, "en").as_deref(), Some("riverside"));
        assert_eq!(text(&store, &gloss, "fr").as_deref(), Some("rive"));
        let modified = store.get::<EntryData>(bank).unwrap().date_modified;
        assert!(modified.is_some());

        // Identical content again: no modification time bump.
        run(&mut store, BANK_FRENCH, MergeStyle::Combine);
        assert_eq!(store.get::<EntryData>(bank).unwrap().date_modified, modified);
        assert_eq!(store.owned(bank, OwningField::Senses).len(), 1);
    }

    #[test]
    fn test_keep_old_keeps_existing_text_and_reports_conflict() {
        let mut store = MemoryStore::new();
        run(&mut store, BANK, MergeStyle::Combine);
        let changed = BANK.replace("riverside", "money house");
        let report = run(&mut store, &changed, MergeStyle::KeepOld);
        let bank = entry_by_id(&store, "bank_3");
        let sense = store.owned(bank, OwningField::Senses)[0];
        let gloss = store.get::<SenseData>(sense).unwrap().gloss.clone();
        assert_eq!(text(&store, &gloss, "en").as_deref(), Some("riverside"));
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].rejected, "money house");
        assert_eq!(report.conflicts[0].field, "gloss");
    }

    #[test]
    fn test_keep_only_new_drops_missing_alternatives() {
        let mut store = MemoryStore::new();
        run(&mut store, BANK_FRENCH, MergeStyle::Combine);
        run(&mut store, BANK, MergeStyle::KeepOnlyNew);
        let bank = entry_by_id(&store, "bank_3");
        let sense = store.owned(bank, OwningField::Senses)[0];
        let gloss = store.get::<SenseData>(sense).unwrap().gloss.clone();
        assert_eq!(gloss.len(), 1);
        assert_eq!(text(&store, &gloss, "fr"), None);
    }

    #[test]
    fn test_keep_only_new_removes_children_missing_from_reimport() {
        let full = r#"<lift version="0.13">
  <entry id="run_1">
    <lexical-unit><form lang="en"><text>run</text></form></lexical-unit>
    <pronunciation><form lang="en-fonipa"><text>rʌn</text></form></pronunciation>
    <pronunciation><form lang="en-fonipa"><text>ɹʌn</text></form></pronunciation>
    <sense id="run_1_s1">
      <gloss lang="en"><text>move fast</text></gloss>
      <example><form lang="en"><text>I run daily.</text></form></example>
      <example><form lang="en"><text>She runs home.</text></form></example>
    </sense>
    <sense id="run_1_s2"><gloss lang="en"><text>manage</text></gloss></sense>
  </entry>
</lift>"#;
        let trimmed = r#"<lift version="0.13">
  <entry id="run_1">
    <lexical-unit><form lang="en"><text>run</text></form></lexical-unit>
    <pronunciation><form lang="en-fonipa"><text>rʌn</text></form></pronunciation>
    <sense id="run_1_s1">
      <gloss lang="en"><text>move fast</text></gloss>
      <example><form lang="en"><text>I run daily.</text></form></example>
    </sense>
  </entry>
</lift>"#;
        let mut store = MemoryStore::new();
        run(&mut store, full, MergeStyle::Combine);
        let entry = entry_by_id(&store, "run_1");
        assert_eq!(store.owned(entry, OwningField::Senses).len(), 2);
        assert_eq!(store.owned(entry, OwningField::Pronunciations).len(), 2);

        let report = run(&mut store, trimmed, MergeStyle::KeepOnlyNew);
        assert_eq!(report.objects_deleted, 3);
        let senses = store.owned(entry, OwningField::Senses).to_vec();
        assert_eq!(senses.len(), 1);
        assert_eq!(store.get::<SenseData>(senses[0]).unwrap().lift_id.as_deref(), Some("run_1_s1"));
        let examples = store.owned(senses[0], OwningField::Examples).to_vec();
        assert_eq!(examples.len(), 1);
        let content = store.get::<ExampleData>(examples[0]).unwrap().content.clone();
        assert_eq!(text(&store, &content, "en").as_deref(), Some("I run daily."));
        let pronunciations = store.owned(entry, OwningField::Pronunciations).to_vec();
        assert_eq!(pronunciations.len(), 1);
        let form = store.get::<PronunciationData>(pronunciations[0]).unwrap().form.clone();
        assert_eq!(text(&store, &form, "en-fonipa").as_deref(), Some("rʌn"));
        assert_eq!(store.all_of_kind(ObjectKind::Example).len(), 1);
        assert_eq!(store.all_of_kind(ObjectKind::Sense).len(), 1);

        // Combine never removes what the input leaves out.
        let report = run(&mut store, full, MergeStyle::Combine);
        assert_eq!(report.objects_deleted, 0);
        let report = run(&mut store, trimmed, MergeStyle::Combine);
        assert_eq!(report.objects_deleted, 0);
        assert_eq!(store.owned(entry, OwningField::Senses).len(), 2);
    }

    #[test]
    fn test_replace_all_deletes_absent_entry_and_its_association() {
        let mut store = MemoryStore::new();
        run(&mut store, SYNONYMS, MergeStyle::Combine);
        let only_cat = r#"<lift version="0.13" producer="SIL.FLEx 8.3">
  <entry id="cat_1" dateModified="2024-01-01T10:00:00Z">
    <lexical-unit><form lang="en"><text>cat</text></form></lexical-unit>
    <sense id="cat_1_s1"><gloss lang="en"><text>feline</text></gloss></sense>
  </entry>
</lift>"#;
        let report = run(&mut store, only_cat, MergeStyle::KeepOnlyNew);
        assert_eq!(report.entries_deleted, 1);
        assert_eq!(store.all_of_kind(ObjectKind::Entry).len(), 1);
        assert!(store.all_of_kind(ObjectKind::LexReference).is_empty());
        // The deleted entry's analysis went with it; the survivor keeps one.
        assert_eq!(store.all_of_kind(ObjectKind::Msa).len(), 1);
    }

    #[test]
    fn test_deletion_marker_removes_entry() {
        let mut store = MemoryStore::new();
        run(&mut store, BANK, MergeStyle::Combine);
        let deleted = r#"<lift version="0.13">
  <entry id="bank_3" dateDeleted="2024-05-01T00:00:00Z"/>
</lift>"#;
        let report = run(&mut store, deleted, MergeStyle::Combine);
        assert_eq!(report.entries_deleted, 1);
        assert!(store.all_of_kind(ObjectKind::Entry).is_empty());
    }

    #[test]
    fn test_unknown_content_and_dangling_relation_become_residue() {
        let xml = r#"<lift version="0.13">
  <entry id="cat_1">
    <lexical-unit><form lang="en"><text>cat</text></form></lexical-unit>
    <trait name="do-not-publish" value="true"/>
    <field type="Plural"><form lang="en"><text>cats &amp; kittens</text></form></field>
    <relation type="synonym" ref="ghost_9"/>
  </entry>
</lift>"#;
        let mut store = MemoryStore::new();
        let report = run(&mut store, xml, MergeStyle::Combine);
        assert_eq!(report.invalid_relations.len(), 1);
        let cat = entry_by_id(&store, "cat_1");
        let residue = store.get::<EntryData>(cat).unwrap().lift_residue.clone().unwrap();
        let document = ResidueDocument::parse(&residue).unwrap();
        assert_eq!(document.id.as_deref(), Some("cat_1"));
        assert_eq!(
            document.fragments,
            vec![
                "<field type=\"Plural\">\n<form lang=\"en\"><text>cats &amp; kittens</text></form>\n</field>\n"
                    .to_string(),
                "<trait name=\"do-not-publish\" value=\"true\"/>\n".to_string(),
                "<relation type=\"synonym\" ref=\"ghost_9\"/>\n".to_string(),
            ]
        );
    }

    #[test]
    fn test_custom_fields_and_refusal() {
        let xml = r#"<lift version="0.13">
  <header>
    <fields>
      <field tag="Plural"><form lang="qaa-x-spec"><text>Class=LexEntry; Type=MultiUnicode; WsSelector=kwsVern</text></form></field>
    </fields>
  </header>
  <entry id="cat_1">
    <lexical-unit><form lang="en"><text>cat</text></form></lexical-unit>
    <field type="Plural"><form lang="en"><text>cats</text></form></field>
  </entry>
</lift>"#;
        let mut store = MemoryStore::new();
        run(&mut store, xml, MergeStyle::Combine);
        let cat = entry_by_id(&store, "cat_1");
        let plural = store.get::<EntryData>(cat).unwrap().custom["Plural"].clone();
        assert_eq!(text(&store, &plural, "en").as_deref(), Some("cats"));

        let conflicting = xml.replace("Type=MultiUnicode", "Type=Integer");
        let report = run(&mut store, &conflicting, MergeStyle::Combine);
        assert_eq!(report.refused_fields.len(), 1);
        assert!(store.get::<EntryData>(cat).unwrap().lift_residue.clone().unwrap().contains("Plural"));

        let malformed = xml.replace("Type=MultiUnicode", "Type=kcptHologram");
        let document = parse_lift_str(&malformed).unwrap();
        let mut fresh = MemoryStore::new();
        assert!(import(&mut fresh, &document, &ImportOptions::default(), None).is_err());
    }

    #[test]
    fn test_grammatical_info_and_semantic_domains() {
        let xml = r#"<lift version="0.13">
  <header>
    <ranges>
      <range id="semantic-domain-ddp4">
        <range-element id="1 Universe"><label><form lang="en"><text>Universe</text></form></label></range-element>
        <range-element id="1.1 Sky" parent="1 Universe"><label><form lang="en"><text>Sky</text></form></label></range-element>
      </range>
    </ranges>
  </header>
  <entry id="sun_1">
    <lexical-unit><form lang="en"><text>sun</text></form></lexical-unit>
    <sense id="sun_1_s1">
      <grammatical-info value="Noun"/>
      <gloss lang="en"><text>sun</text></gloss>
      <trait name="semantic-domain-ddp4" value="1.1 Sky"/>
    </sense>
    <sense id="sun_1_s2">
      <grammatical-info value="Noun"/>
      <gloss lang="en"><text>day</text></gloss>
    </sense>
  </entry>
</lift>"#;
        let mut store = MemoryStore::new();
        run(&mut store, xml, MergeStyle::Combine);
        let sun = entry_by_id(&store, "sun_1");
        let senses = store.owned(sun, OwningField::Senses).to_vec();
        let first = store.get::<SenseData>(senses[0]).unwrap().clone();
        let second = store.get::<SenseData>(senses[1]).unwrap().clone();
        assert_eq!(first.msa, second.msa);
        assert_eq!(store.all_of_kind(ObjectKind::Msa).len(), 1);
        let pos = store.get::<MsaData>(first.msa.unwrap()).unwrap().part_of_speech.unwrap();
        assert_eq!(store.owner_of(pos), Some(store.list(GRAMMATICAL_INFO_LIST).unwrap()));
        assert_eq!(first.semantic_domains.len(), 1);
        let sky = first.semantic_domains[0];
        let universe = store.owner_of(sky).unwrap();
        assert_eq!(store.kind_of(universe), Some(ObjectKind::Possibility));
    }

    #[test]
    fn test_trait_named_after_range_resolves_value() {
        let xml = r#"<lift version="0.13">
  <header>
    <ranges>
      <range id="usage-type">
        <range-element id="archaic"><label><form lang="en"><text>archaic</text></form></label></range-element>
      </range>
    </ranges>
  </header>
  <entry id="thee_1">
    <lexical-unit><form lang="en"><text>thee</text></form></lexical-unit>
    <trait name="usage-type" value="poetic"/>
  </entry>
</lift>"#;
        let mut store = MemoryStore::new();
        run(&mut store, xml, MergeStyle::Combine);
        let list = store.list("usage-type").unwrap();
        assert_eq!(store.owned(list, OwningField::Possibilities).len(), 2);
        let thee = entry_by_id(&store, "thee_1");
        let residue = store.get::<EntryData>(thee).unwrap().lift_residue.clone().unwrap();
        assert!(residue.contains(r#"<trait name="usage-type" value="poetic"/>"#));
    }

    #[test]
    fn test_blank_trait_values_create_no_possibilities() {
        let xml = r#"<lift version="0.13">
  <header>
    <ranges>
      <range id="usage-type">
        <range-element id="archaic"><label><form lang="en"><text>archaic</text></form></label></range-element>
      </range>
      <range id="semantic-domain-ddp4">
        <range-element id="1 Universe"><label><form lang="en"><text>Universe</text></form></label></range-element>
      </range>
    </ranges>
  </header>
  <entry id="thee_1">
    <lexical-unit><form lang="en"><text>thee</text></form></lexical-unit>
    <trait name="usage-type" value=""/>
    <sense id="thee_1_s1">
      <gloss lang="en"><text>you</text></gloss>
      <trait name="semantic-domain-ddp4" value="  "/>
    </sense>
  </entry>
</lift>"#;
        let mut store = MemoryStore::new();
        run(&mut store, xml, MergeStyle::Combine);
        let possibilities = store.all_of_kind(ObjectKind::Possibility).len();
        assert_eq!(possibilities, 2);
        let usage = store.list("usage-type").unwrap();
        assert_eq!(store.owned(usage, OwningField::Possibilities).len(), 1);
        let domains = store.list(SEMANTIC_DOMAIN_LIST).unwrap();
        assert_eq!(store.owned(domains, OwningField::Possibilities).len(), 1);

        let thee = entry_by_id(&store, "thee_1");
        let sense = store.owned(thee, OwningField::Senses)[0];
        let data = store.get::<SenseData>(sense).unwrap();
        assert!(data.semantic_domains.is_empty());
        let residue = data.lift_residue.clone().unwrap();
        assert!(residue.contains(r#"<trait name="semantic-domain-ddp4" value="  "/>"#));
        assert_eq!(store.all_of_kind(ObjectKind::Possibility).len(), possibilities);
    }

    fn generated_lift(count: usize) -> String {
        let mut xml = String::from(
            "<lift version=\"0.13\">\n<header><ranges><range id=\"semantic-domain-ddp4\">\
             <range-element id=\"1.1 Sky\"><label><form lang=\"en\"><text>Sky</text></form></label></range-element>\
             </range></ranges></header>\n",
        );
        for i in 0..count {
            let pair = i ^ 1;
            xml.push_str(&format!(
                "<entry id=\"w_{i}\"><lexical-unit><form lang=\"en\"><text>word{i}</text></form></lexical-unit>\
                 <sense id=\"w_{i}_s1\"><grammatical-info value=\"Noun\"/>\
                 <gloss lang=\"en\"><text>gloss {i}</text></gloss>\
                 <trait name=\"semantic-domain-ddp4\" value=\"1.1 Sky\"/></sense>\
                 <relation type=\"synonym\" ref=\"w_{pair}\"/>\
                 <relation type=\"compare\" ref=\"w_{}\"/></entry>\n",
                (i + 1) % count
            ));
        }
        xml.push_str("</lift>");
        xml
    }

    fn timed_import_and_prune(count: usize) -> std::time::Duration {
        let full = generated_lift(count);
        let half = generated_lift(count / 2);
        let mut store = MemoryStore::new();
        let started = Instant::now();
        let report = run(&mut store, &full, MergeStyle::Combine);
        assert_eq!(report.entries_created, count);
        let report = run(&mut store, &half, MergeStyle::KeepOnlyNew);
        assert_eq!(store.count_of_kind(ObjectKind::Entry), count / 2);
        assert_eq!(report.entries_deleted, count / 2);
        started.elapsed()
    }

    #[test]
    fn test_large_import_scales_linearly() {
        let small = timed_import_and_prune(1000);
        let large = timed_import_and_prune(4000);
        assert!(large.as_secs() < 30, "4000 entries took {large:?}");
        // Quadratic work would make the larger run about 16 times slower.
        let ratio = large.as_secs_f64() / small.as_secs_f64().max(0.001);
        assert!(ratio < 10.0, "1000 entries took {small:?}, 4000 took {large:?}");
    }

    #[test]
    fn test_components_become_entry_refs() {
        let xml = r#"<lift version="0.13">
  <entry id="black_1"><lexical-unit><form lang="en"><text>black</text></form></lexical-unit></entry>
  <entry id="bird_2"><lexical-unit><form lang="en"><text>bird</text></form></lexical-unit></entry>
  <entry id="blackbird_3">
    <lexical-unit><form lang="en"><text>blackbird</text></form></lexical-unit>
    <relation type="_component-lexeme" ref="black_1" order="0">
      <trait name="complex-form-type" value="Compound"/>
    </relation>
    <relation type="_component-lexeme" ref="bird_2" order="1">
      <trait name="complex-form-type" value="Compound"/>
      <trait name="is-primary" value="true"/>
    </relation>
  </entry>
</lift>"#;
        let mut store = MemoryStore::new();
        let report = run(&mut store, xml, MergeStyle::Combine);
        let blackbird = entry_by_id(&store, "blackbird_3");
        let refs = store.owned(blackbird, OwningField::EntryRefs).to_vec();
        assert_eq!(refs.len(), 1);
        let data = store.get::<EntryRefData>(refs[0]).unwrap();
        assert_eq!(data.kind, RefKind::ComplexForm);
        assert_eq!(data.components.len(), 2);
        assert_eq!(data.primary_lexemes, vec![entry_by_id(&store, "bird_2")]);
        assert!(store.all_of_kind(ObjectKind::LexReference).is_empty());
        // The compound had no senses and gets an empty one.
        assert_eq!(store.owned(blackbird, OwningField::Senses).len(), 1);
        assert_eq!(report.senses_created, 1);

        let report = run(&mut store, xml, MergeStyle::Combine);
        assert_eq!(report.senses_created, 0);
        assert_eq!(store.all_of_kind(ObjectKind::EntryRef).len(), 1);
    }

    #[test]
    fn test_cancellation_stops_later_phases() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let progress: ProgressCallback = Box::new(move |update| {
            seen.fetch_add(1, Ordering::SeqCst);
            update.current_item < Checkpoint::MainPass.ordinal()
        });
        let mut store = MemoryStore::new();
        let document = parse_lift_str(SYNONYMS).unwrap();
        let report = import(&mut store, &document, &ImportOptions::default(), Some(progress)).unwrap();
        assert!(report.cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Entries from the main pass stay; relations were never resolved.
        assert_eq!(store.all_of_kind(ObjectKind::Entry).len(), 2);
        assert!(store.all_of_kind(ObjectKind::LexReference).is_empty());
    }

    #[test]
    fn test_audio_alternative_is_copied_to_media_directory() {
        let source = tempdir().unwrap();
        let media = tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("audio")).unwrap();
        std::fs::write(source.path().join("audio").join("cat.wav"), b"RIFF").unwrap();
        let xml = r#"<lift version="0.13">
  <entry id="cat_1">
    <lexical-unit>
      <form lang="en"><text>cat</text></form>
      <form lang="en-Zxxx-x-audio"><text>cat.wav</text></form>
    </lexical-unit>
  </entry>
</lift>"#;
        let options = ImportOptions {
            merge_style: MergeStyle::Combine,
            source_dir: Some(source.path().to_path_buf()),
            media_dir: Some(media.path().to_path_buf()),
        };
        let mut store = MemoryStore::new();
        let report = import(&mut store, &parse_lift_str(xml).unwrap(), &options, None).unwrap();
        assert!(report.invalid_data.is_empty());
        assert!(media.path().join("AudioVisual").join("cat.wav").is_file());
    }
}
