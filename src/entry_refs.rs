//! Complex-form and variant links between entries.
//!
//! Component relations are queued like ordinary relations and resolved after
//! the main pass into `EntryRef` objects owned by the complex or variant entry.

use crate::error::Result;
use crate::identity::IdentityResolver;
use crate::merge::texts_equal;
use crate::models::{LiftForm, LiftRelation};
use crate::possibility::{PossibilityItem, PossibilityResolver};
use crate::report::{CombinedCollection, ImportReport, MissingComponent};
use crate::residue::{association_residue, relation_content_xml};
use crate::store::{
    EntryRefData, Guid, LexiconStore, MultiString, ObjectKind, OwningField,
    PossibilityData, RefKind, SenseData,
};
use crate::writing_systems::{DEFAULT_ANALYSIS_TAG, IncomingText, WritingSystemRegistry, resolve_forms};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashSet;

pub const COMPLEX_FORM_TYPE_LIST: &str = "complex-form-types";
pub const VARIANT_TYPE_LIST: &str = "variant-types";

/// Relation types that always describe an entry reference.
pub const COMPONENT_RELATION: &str = "_component-lexeme";
pub const MAIN_RELATION: &str = "main";
pub const BASE_FORM_RELATION: &str = "BaseForm";

const ENTRY_REF_TRAITS: [&str; 4] = ["complex-form-type", "variant-type", "hide-minor-entry", "is-primary"];

/// Back-references written by older exporters alongside the real links.
pub fn is_ignored_relation(relation_type: &str) -> bool {
    matches!(relation_type, "minorentry" | "subentry")
}

/// Whether a relation should be resolved as an entry reference rather than
/// an ordinary lexical relation.
pub fn is_entry_ref_relation(relation: &LiftRelation) -> bool {
    match relation.relation_type.as_str() {
        COMPONENT_RELATION | MAIN_RELATION => true,
        BASE_FORM_RELATION => relation
            .traits
            .iter()
            .any(|t| ENTRY_REF_TRAITS.contains(&t.name.as_str())),
        _ => false,
    }
}

/// Entry-level values older files use to describe a minor entry.
#[derive(Debug, Clone, Default)]
pub struct LegacyEntryInfo {
    pub entry_type: Option<String>,
    pub minor_entry_condition: Option<String>,
    pub exclude_as_headword: bool,
    pub lexeme_form: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingLexEntryRef {
    pub source: Guid,
    pub relation_type: String,
    pub target_id: String,
    pub target: Option<Guid>,
    pub order: i32,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    pub complex_form_types: Vec<String>,
    pub variant_types: Vec<String>,
    pub is_primary: bool,
    pub hide_minor_entry: i32,
    pub exclude_as_headword: bool,
    pub entry_type: Option<String>,
    pub minor_entry_condition: Option<String>,
    pub summary: Vec<LiftForm>,
    pub lexeme_form: Option<String>,
    /// Serialized relation content left after the known traits were taken.
    pub residue: String,
}

impl PendingLexEntryRef {
    /// Builds the pending reference, removing the traits and the summary field
    /// it consumes from `relation` so that only unknown content remains.
    pub fn new(
        source: Guid,
        relation: &mut LiftRelation,
        legacy: &LegacyEntryInfo,
        date_created: Option<DateTime<Utc>>,
        date_modified: Option<DateTime<Utc>>,
    ) -> Self {
        let mut pending = PendingLexEntryRef {
            source,
            relation_type: relation.relation_type.clone(),
            target_id: relation.target.clone(),
            target: None,
            order: relation.order.unwrap_or(-1),
            date_created,
            date_modified,
            complex_form_types: Vec::new(),
            variant_types: Vec::new(),
            is_primary: false,
            hide_minor_entry: 0,
            exclude_as_headword: legacy.exclude_as_headword,
            entry_type: legacy.entry_type.clone(),
            minor_entry_condition: legacy.minor_entry_condition.clone(),
            summary: Vec::new(),
            lexeme_form: legacy.lexeme_form.clone(),
            residue: String::new(),
        };

        relation.traits.retain(|t| {
            match t.name.as_str() {
                "complex-form-type" => pending.complex_form_types.push(t.value.clone()),
                "variant-type" => pending.variant_types.push(t.value.clone()),
                "hide-minor-entry" => pending.hide_minor_entry = t.value.trim().parse().unwrap_or(0),
                "is-primary" => {
                    pending.is_primary = t.value.eq_ignore_ascii_case("true");
                    pending.exclude_as_headword = pending.is_primary;
                }
                _ => return true,
            }
            false
        });
        if let Some(index) = relation.fields.iter().position(|f| f.field_type == "summary") {
            pending.summary = relation.fields.remove(index).forms;
        }
        pending.residue = relation_content_xml(relation);
        pending
    }

    /// Whether `next` continues the same reference as `self`.
    fn continues_with(&self, next: &PendingLexEntryRef) -> bool {
        self.source == next.source
            && self.entry_type == next.entry_type
            && self.minor_entry_condition == next.minor_entry_condition
            && self.date_created == next.date_created
            && self.date_modified == next.date_modified
            && next.order >= self.order
            && self.complex_form_types.len() == next.complex_form_types.len()
            && next
                .complex_form_types
                .iter()
                .all(|t| self.complex_form_types.contains(t))
    }
}

/// Length of the run of pending references starting at `start` that belong
/// to one entry reference. A drop in order number ends a run.
pub fn entry_ref_group_length(pending: &[PendingLexEntryRef], start: usize) -> usize {
    if start >= pending.len() {
        return 0;
    }
    let mut len = 1;
    while start + len < pending.len() && pending[start + len - 1].continues_with(&pending[start + len]) {
        len += 1;
    }
    len
}

fn legacy_entry_type(name: &str) -> &str {
    match name {
        "Derivation" => "Derivative",
        "derivation" => "derivative",
        "Inflectional Variant" => "Irregularly Inflected Form",
        "inflectional variant" => "irregularly inflected form",
        other => other,
    }
}

/// Empty on both sides, or sharing at least one element.
fn sets_compatible(incoming: &[Guid], existing: &[Guid]) -> bool {
    (incoming.is_empty() && existing.is_empty()) || incoming.iter().any(|g| existing.contains(g))
}

/// The values an entry reference should end up holding.
#[derive(Debug, Default)]
struct EntryRefShape {
    kind: Option<RefKind>,
    complex_entry_types: Vec<Guid>,
    variant_entry_types: Vec<Guid>,
    components: Vec<Guid>,
    primary_lexemes: Vec<Guid>,
}

impl EntryRefShape {
    fn ref_kind(&self) -> RefKind {
        self.kind.unwrap_or(RefKind::Variant)
    }
}

pub struct EntryRefResolver<'a, S: LexiconStore> {
    store: &'a mut S,
    identity: &'a mut IdentityResolver,
    possibilities: &'a mut PossibilityResolver,
    report: &'a mut ImportReport,
    /// Entry references that existed before the run and have not been matched.
    unmatched: &'a mut HashSet<Guid>,
}

impl<'a, S: LexiconStore> EntryRefResolver<'a, S> {
    pub fn new(
        store: &'a mut S,
        identity: &'a mut IdentityResolver,
        possibilities: &'a mut PossibilityResolver,
        report: &'a mut ImportReport,
        unmatched: &'a mut HashSet<Guid>,
    ) -> Self {
        EntryRefResolver {
            store,
            identity,
            possibilities,
            report,
            unmatched,
        }
    }

    pub fn resolve(mut self, pending: &[PendingLexEntryRef]) -> Result<()> {
        let mut i = 0;
        while i < pending.len() {
            let len = entry_ref_group_length(pending, i).max(1);
            let mut group = pending[i..i + len].to_vec();
            i += len;
            for member in &mut group {
                member.target = self.identity.lookup(&*self.store, &member.target_id);
            }
            self.process_group(&mut group)?;
        }
        let missing = self.report.missing_components.len();
        if missing > 0 {
            warn!(
                "{} component or variant references name entries absent from the input; they were skipped",
                missing
            );
        }
        Ok(())
    }

    fn process_group(&mut self, group: &mut [PendingLexEntryRef]) -> Result<()> {
        let first = &group[0];
        let mut main_component = None;
        let owner = if group.len() == 1 && first.relation_type == MAIN_RELATION {
            main_component = Some(first.source);
            match first
                .target
                .filter(|g| self.store.kind_of(*g) == Some(ObjectKind::Entry))
            {
                Some(entry) => entry,
                None => {
                    warn!("Relation 'main' from {} names unknown entry '{}'", first.source, first.target_id);
                    self.report
                        .add_invalid_relation(first.source, MAIN_RELATION, &first.target_id, "main entry not found");
                    return Ok(());
                }
            }
        } else {
            first.source
        };
        if self.store.kind_of(owner) != Some(ObjectKind::Entry) {
            return Ok(());
        }
        if group[0].hide_minor_entry == 0 && group[0].exclude_as_headword {
            group[0].hide_minor_entry = 1;
        }

        let mut shape = self.determine_types(&group[0])?;
        for (index, pending) in group.iter().enumerate() {
            if let (0, Some(component)) = (index, main_component) {
                shape.components.push(component);
                shape.primary_lexemes.push(component);
            } else if let Some(target) = pending.target {
                shape.components.push(target);
                if pending.is_primary || pending.relation_type == MAIN_RELATION {
                    shape.primary_lexemes.push(target);
                }
            } else if !pending.target_id.is_empty() {
                let headword = group[0]
                    .lexeme_form
                    .clone()
                    .unwrap_or_else(|| "<empty form>".to_string());
                self.report.missing_components.push(MissingComponent {
                    entry: owner,
                    headword,
                    target: pending.target_id.clone(),
                });
            }
        }

        if shape.complex_entry_types.is_empty()
            && shape.variant_entry_types.is_empty()
            && group[0].relation_type == BASE_FORM_RELATION
            && shape.components.len() == 1
            && shape.primary_lexemes.is_empty()
        {
            shape.primary_lexemes.push(shape.components[0]);
            let base = self.find_or_create_type(COMPLEX_FORM_TYPE_LIST, BASE_FORM_RELATION)?;
            shape.complex_entry_types.push(base);
            shape.kind = Some(RefKind::ComplexForm);
        }

        let summary = resolve_forms(self.store.writing_systems_mut(), &group[0].summary);
        let mut matched = None;
        for candidate in self.store.owned(owner, OwningField::EntryRefs).to_vec() {
            if self.matches(candidate, &shape, &summary) {
                matched.get_or_insert(candidate);
                self.unmatched.remove(&candidate);
            }
        }

        let entry_ref = match matched {
            Some(existing) => {
                self.adjust_contents(existing, owner, &shape)?;
                existing
            }
            None => self.create_entry_ref(owner, &shape, &summary, &group[0])?,
        };
        self.ensure_sense(owner, entry_ref)
    }

    fn determine_types(&mut self, first: &PendingLexEntryRef) -> Result<EntryRefShape> {
        let mut shape = EntryRefShape::default();
        if !first.complex_form_types.is_empty() {
            shape.kind = Some(RefKind::ComplexForm);
        }
        if !first.variant_types.is_empty() {
            shape.kind = Some(RefKind::Variant);
        }
        for name in first.complex_form_types.iter().filter(|n| !n.is_empty()) {
            let guid = self.find_or_create_type(COMPLEX_FORM_TYPE_LIST, name)?;
            shape.complex_entry_types.push(guid);
        }
        for name in first.variant_types.iter().filter(|n| !n.is_empty()) {
            let guid = self.find_or_create_type(VARIANT_TYPE_LIST, name)?;
            shape.variant_entry_types.push(guid);
        }
        if !shape.complex_entry_types.is_empty() || !shape.variant_entry_types.is_empty() {
            return Ok(shape);
        }

        let Some(old_type) = first.entry_type.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(shape);
        };
        let old_type = legacy_entry_type(old_type);
        let condition = first.minor_entry_condition.as_deref().filter(|c| !c.is_empty());

        if let Some(complex) = self.find_type(COMPLEX_FORM_TYPE_LIST, old_type)? {
            shape.complex_entry_types.push(complex);
            shape.kind = Some(RefKind::ComplexForm);
            return Ok(shape);
        }
        let mut variant = self.find_type(VARIANT_TYPE_LIST, old_type)?;
        if variant.is_none() && !old_type.eq_ignore_ascii_case("main entry") {
            match condition {
                None => {
                    let complex = self.find_or_create_type(COMPLEX_FORM_TYPE_LIST, old_type)?;
                    shape.complex_entry_types.push(complex);
                    shape.kind = Some(RefKind::ComplexForm);
                }
                Some(_) => variant = Some(self.find_or_create_type(VARIANT_TYPE_LIST, old_type)?),
            }
        }
        if let Some(variant) = variant {
            let chosen = match condition {
                None => variant,
                Some(condition) => self.find_or_create_subtype(variant, condition)?,
            };
            shape.variant_entry_types.push(chosen);
            shape.kind = Some(RefKind::Variant);
        }
        Ok(shape)
    }

    fn find_type(&mut self, list_name: &str, name: &str) -> Result<Option<Guid>> {
        let list = self.store.list(list_name)?;
        Ok(self.possibilities.find(&*self.store, list, name))
    }

    fn find_or_create_type(&mut self, list_name: &str, name: &str) -> Result<Guid> {
        let list = self.store.list(list_name)?;
        let (guid, created) = self
            .possibilities
            .find_or_create(self.store, list, &PossibilityItem::named(name))?;
        if created {
            debug!("Created entry type '{}' in {}", name, list_name);
        }
        Ok(guid)
    }

    /// A child of `variant` matching the condition by name, abbreviation or
    /// reverse abbreviation, created when absent.
    fn find_or_create_subtype(&mut self, variant: Guid, condition: &str) -> Result<Guid> {
        let ws = self.store.writing_systems_mut().resolve_or_create(DEFAULT_ANALYSIS_TAG);
        let children = self.store.owned(variant, OwningField::SubPossibilities).to_vec();
        let existing = children.into_iter().find(|child| {
            self.store.get::<PossibilityData>(*child).is_some_and(|d| {
                [&d.name, &d.abbreviation, &d.reverse_abbreviation]
                    .iter()
                    .any(|ms| ms.get(&ws).is_some_and(|v| v == condition))
            })
        });
        if let Some(subtype) = existing {
            return Ok(subtype);
        }
        let subtype = self
            .store
            .create(ObjectKind::Possibility, Some((variant, OwningField::SubPossibilities)), None)?;
        let data = self.store.expect_data_mut::<PossibilityData>(subtype)?;
        data.name.insert(ws, condition.to_string());
        data.abbreviation.insert(ws, condition.to_string());
        data.reverse_abbreviation.insert(ws, condition.to_string());
        debug!("Created variant subtype '{}'", condition);
        Ok(subtype)
    }

    fn matches(&self, candidate: Guid, shape: &EntryRefShape, summary: &[IncomingText]) -> bool {
        let Some(existing) = self.store.get::<EntryRefData>(candidate) else {
            return false;
        };
        existing.kind == shape.ref_kind()
            && summary_matches(&existing.summary, summary)
            && sets_compatible(&shape.complex_entry_types, &existing.complex_entry_types)
            && sets_compatible(&shape.variant_entry_types, &existing.variant_entry_types)
            && sets_compatible(&shape.components, &existing.components)
            && sets_compatible(&shape.primary_lexemes, &existing.primary_lexemes)
    }

    fn create_entry_ref(
        &mut self,
        owner: Guid,
        shape: &EntryRefShape,
        summary: &[IncomingText],
        first: &PendingLexEntryRef,
    ) -> Result<Guid> {
        let guid = self
            .store
            .create(ObjectKind::EntryRef, Some((owner, OwningField::EntryRefs)), None)?;
        let data = self.store.expect_data_mut::<EntryRefData>(guid)?;
        data.kind = shape.ref_kind();
        data.complex_entry_types = shape.complex_entry_types.clone();
        data.variant_entry_types = shape.variant_entry_types.clone();
        data.components = shape.components.clone();
        data.primary_lexemes = shape.primary_lexemes.clone();
        data.hide_minor_entry = first.hide_minor_entry;
        data.lift_residue = association_residue(
            first.date_created.as_ref(),
            first.date_modified.as_ref(),
            Some(first.residue.as_str()),
        );
        for text in summary.iter().filter(|t| !t.text.is_empty()) {
            data.summary.insert(text.ws, text.text.clone());
        }
        debug!("Created {:?} entry reference {} on {}", data.kind, guid, owner);
        Ok(guid)
    }

    /// Unions each incoming set into the matched reference. Sets that overlap
    /// without nesting are reported.
    fn adjust_contents(&mut self, entry_ref: Guid, owner: Guid, shape: &EntryRefShape) -> Result<()> {
        let existing = self.store.expect_data::<EntryRefData>(entry_ref)?.clone();
        let type_name = if existing.variant_entry_types.is_empty() {
            "Complex Form Type"
        } else {
            "Variant Type"
        };
        let mut updated = existing.clone();
        let pairs = [
            (&shape.complex_entry_types, &mut updated.complex_entry_types),
            (&shape.variant_entry_types, &mut updated.variant_entry_types),
            (&shape.components, &mut updated.components),
            (&shape.primary_lexemes, &mut updated.primary_lexemes),
        ];
        let mut combined = Vec::new();
        for (incoming, current) in pairs {
            let nested = incoming.iter().all(|g| current.contains(g)) || current.iter().all(|g| incoming.contains(g));
            if !nested {
                combined.extend(incoming.iter().copied());
            }
            for guid in incoming {
                if !current.contains(guid) {
                    current.push(*guid);
                }
            }
        }
        if updated != existing {
            *self.store.expect_data_mut::<EntryRefData>(entry_ref)? = updated;
        }

        let headword = self.store.headword(owner);
        for item in combined {
            let combined_item = self.item_label(item);
            warn!(
                "Combining overlapping {} sets on '{}': added '{}'",
                type_name, headword, combined_item
            );
            self.report.combined_collections.push(CombinedCollection {
                owner,
                type_name: type_name.to_string(),
                combined_item,
                headword: headword.clone(),
            });
        }
        Ok(())
    }

    /// Headword for entries and senses, name for entry types.
    fn item_label(&self, guid: Guid) -> String {
        match self.store.kind_of(guid) {
            Some(ObjectKind::Possibility) => self
                .store
                .get::<PossibilityData>(guid)
                .and_then(|d| d.name.values().next().cloned())
                .unwrap_or_else(|| guid.to_string()),
            _ => self.store.headword(guid),
        }
    }

    /// A composed entry needs at least one sense.
    fn ensure_sense(&mut self, owner: Guid, entry_ref: Guid) -> Result<()> {
        let needs_sense = self.store.get::<EntryRefData>(entry_ref).is_some_and(|d| {
            !d.complex_entry_types.is_empty() || !d.primary_lexemes.is_empty()
        });
        if !needs_sense || !self.store.owned(owner, OwningField::Senses).is_empty() {
            return Ok(());
        }
        let sense = self
            .store
            .create(ObjectKind::Sense, Some((owner, OwningField::Senses)), None)?;
        let msa = match self.store.owned(owner, OwningField::Msas).first().copied() {
            Some(msa) => msa,
            None => self.store.create(ObjectKind::Msa, Some((owner, OwningField::Msas)), None)?,
        };
        self.store.expect_data_mut::<SenseData>(sense)?.msa = Some(msa);
        self.report.senses_created += 1;
        debug!("Added empty sense {} to composed entry {}", sense, owner);
        Ok(())
    }
}

/// Every incoming alternative equals the stored one.
fn summary_matches(existing: &MultiString, incoming: &[IncomingText]) -> bool {
    incoming
        .iter()
        .filter(|t| !t.text.is_empty())
        .all(|t| existing.get(&t.ws).is_some_and(|v| texts_equal(v, &t.text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LiftField, LiftTrait};
    use crate::store::{EntryData, MemoryStore};

    struct Fixture {
        store: MemoryStore,
        identity: IdentityResolver,
        possibilities: PossibilityResolver,
        report: ImportReport,
        unmatched: HashSet<Guid>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                store: MemoryStore::new(),
                identity: IdentityResolver::new(),
                possibilities: PossibilityResolver::new(),
                report: ImportReport::new(),
                unmatched: HashSet::new(),
            }
        }

        fn entry(&mut self, id: &str) -> Guid {
            let (guid, _) = self
                .identity
                .resolve(&mut self.store, ObjectKind::Entry, None, Some(id), None)
                .unwrap();
            let en = self.store.writing_systems_mut().resolve_or_create("en");
            self.store
                .get_mut::<EntryData>(guid)
                .unwrap()
                .lexeme_form
                .insert(en, id.to_string());
            guid
        }

        fn resolve(&mut self, pending: &[PendingLexEntryRef]) {
            EntryRefResolver::new(
                &mut self.store,
                &mut self.identity,
                &mut self.possibilities,
                &mut self.report,
                &mut self.unmatched,
            )
            .resolve(pending)
            .unwrap();
        }

        fn refs_of(&self, entry: Guid) -> Vec<EntryRefData> {
            self.store
                .owned(entry, OwningField::EntryRefs)
                .iter()
                .map(|g| self.store.get::<EntryRefData>(*g).unwrap().clone())
                .collect()
        }

        fn type_named(&mut self, list: &str, name: &str) -> Guid {
            let list = self.store.list(list).unwrap();
            self.possibilities.find(&self.store, list, name).unwrap()
        }
    }

    fn component(source: Guid, target: &str, order: Option<i32>, traits: &[(&str, &str)]) -> PendingLexEntryRef {
        let mut relation = LiftRelation::new(COMPONENT_RELATION, target);
        relation.order = order;
        relation.traits = traits.iter().map(|(n, v)| LiftTrait::new(n, v)).collect();
        PendingLexEntryRef::new(source, &mut relation, &LegacyEntryInfo::default(), None, None)
    }

    #[test]
    fn test_new_consumes_known_traits_and_summary() {
        let mut relation = LiftRelation::new(COMPONENT_RELATION, "believe_1");
        relation.traits = vec![
            LiftTrait::new("complex-form-type", "Compound"),
            LiftTrait::new("is-primary", "TRUE"),
            LiftTrait::new("hide-minor-entry", "2"),
            LiftTrait::new("colour", "blue"),
        ];
        relation.fields = vec![LiftField {
            field_type: "summary".to_string(),
            forms: vec![LiftForm::new("en", "un + believe")],
            ..Default::default()
        }];
        let pending = PendingLexEntryRef::new(Guid::new_v4(), &mut relation, &LegacyEntryInfo::default(), None, None);
        assert_eq!(pending.complex_form_types, vec!["Compound".to_string()]);
        assert!(pending.is_primary);
        assert!(pending.exclude_as_headword);
        assert_eq!(pending.hide_minor_entry, 2);
        assert_eq!(pending.summary.len(), 1);
        assert_eq!(relation.traits.len(), 1);
        assert!(relation.fields.is_empty());
    }

    #[test]
    fn test_order_drop_splits_groups() {
        let source = Guid::new_v4();
        let pending = vec![
            component(source, "a", Some(0), &[("complex-form-type", "Compound")]),
            component(source, "b", Some(1), &[("complex-form-type", "Compound")]),
            component(source, "c", Some(0), &[("complex-form-type", "Compound")]),
            component(source, "d", Some(1), &[("complex-form-type", "Idiom")]),
        ];
        assert_eq!(entry_ref_group_length(&pending, 0), 2);
        assert_eq!(entry_ref_group_length(&pending, 2), 1);
        assert_eq!(entry_ref_group_length(&pending, 3), 1);
        assert_eq!(entry_ref_group_length(&pending, 4), 0);
    }

    #[test]
    fn test_compound_creates_complex_form_ref() {
        let mut fx = Fixture::new();
        let un = fx.entry("un_1");
        let believe = fx.entry("believe_2");
        let word = fx.entry("unbelieve_3");
        let pending = vec![
            component(word, "un_1", Some(0), &[("complex-form-type", "Compound")]),
            component(
                word,
                "believe_2",
                Some(1),
                &[("complex-form-type", "Compound"), ("is-primary", "true")],
            ),
        ];
        fx.resolve(&pending);
        let refs = fx.refs_of(word);
        assert_eq!(refs.len(), 1);
        let compound = fx.type_named(COMPLEX_FORM_TYPE_LIST, "compound");
        assert_eq!(refs[0].kind, RefKind::ComplexForm);
        assert_eq!(refs[0].complex_entry_types, vec![compound]);
        assert_eq!(refs[0].components, vec![un, believe]);
        assert_eq!(refs[0].primary_lexemes, vec![believe]);
        // A composed entry gets a sense.
        assert_eq!(fx.store.owned(word, OwningField::Senses).len(), 1);
        assert_eq!(fx.report.senses_created, 1);

        // Re-importing the same components matches the existing reference.
        fx.resolve(&pending);
        assert_eq!(fx.refs_of(word).len(), 1);
        assert_eq!(fx.store.owned(word, OwningField::Senses).len(), 1);
    }

    #[test]
    fn test_overlapping_components_are_unioned_and_reported() {
        let mut fx = Fixture::new();
        let a = fx.entry("a");
        let b = fx.entry("b");
        let c = fx.entry("c");
        let word = fx.entry("word");
        fx.resolve(&[
            component(word, "a", Some(0), &[("complex-form-type", "Compound")]),
            component(word, "b", Some(1), &[("complex-form-type", "Compound")]),
        ]);
        fx.resolve(&[
            component(word, "a", Some(0), &[("complex-form-type", "Compound")]),
            component(word, "c", Some(1), &[("complex-form-type", "Compound")]),
        ]);
        let refs = fx.refs_of(word);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].components, vec![a, b, c]);
        assert!(!fx.report.combined_collections.is_empty());
        assert_eq!(fx.report.combined_collections[0].type_name, "Complex Form Type");
    }

    #[test]
    fn test_variant_with_legacy_condition_creates_subtype() {
        let mut fx = Fixture::new();
        let go = fx.entry("go");
        let went = fx.entry("went");
        let legacy = LegacyEntryInfo {
            entry_type: Some("Inflectional Variant".to_string()),
            minor_entry_condition: Some("past".to_string()),
            exclude_as_headword: true,
            lexeme_form: Some("went".to_string()),
        };
        let mut relation = LiftRelation::new(COMPONENT_RELATION, "go");
        let pending = PendingLexEntryRef::new(went, &mut relation, &legacy, None, None);
        fx.resolve(&[pending]);

        let refs = fx.refs_of(went);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, RefKind::Variant);
        assert_eq!(refs[0].components, vec![go]);
        assert_eq!(refs[0].hide_minor_entry, 1);
        let parent = fx.type_named(VARIANT_TYPE_LIST, "Irregularly Inflected Form");
        assert_eq!(fx.store.owner_of(refs[0].variant_entry_types[0]), Some(parent));
        // Variants without complex types or primaries need no sense.
        assert!(fx.store.owned(went, OwningField::Senses).is_empty());
    }

    #[test]
    fn test_main_relation_is_owned_by_target() {
        let mut fx = Fixture::new();
        let major = fx.entry("major");
        let minor = fx.entry("minor");
        let mut relation = LiftRelation::new(MAIN_RELATION, "major");
        let pending = PendingLexEntryRef::new(minor, &mut relation, &LegacyEntryInfo::default(), None, None);
        fx.resolve(&[pending]);
        let refs = fx.refs_of(major);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].components, vec![minor]);
        assert_eq!(refs[0].primary_lexemes, vec![minor]);
        assert!(fx.refs_of(minor).is_empty());
    }

    #[test]
    fn test_missing_component_is_reported() {
        let mut fx = Fixture::new();
        let word = fx.entry("word");
        let mut relation = LiftRelation::new(COMPONENT_RELATION, "absent_7");
        relation.traits = vec![LiftTrait::new("variant-type", "Spelling")];
        let legacy = LegacyEntryInfo {
            lexeme_form: Some("word".to_string()),
            ..Default::default()
        };
        let mut empty = LiftRelation::new(COMPONENT_RELATION, "");
        let pending = vec![
            PendingLexEntryRef::new(word, &mut relation, &legacy, None, None),
            PendingLexEntryRef::new(word, &mut empty, &legacy, None, None),
        ];
        fx.resolve(&pending);
        assert_eq!(fx.report.missing_components.len(), 1);
        assert_eq!(fx.report.missing_components[0].target, "absent_7");
        assert_eq!(fx.report.missing_components[0].headword, "word");
    }

    #[test]
    fn test_base_form_without_types_becomes_primary_complex_form() {
        let mut fx = Fixture::new();
        let root = fx.entry("root");
        let derived = fx.entry("derived");
        let mut relation = LiftRelation::new(BASE_FORM_RELATION, "root");
        relation.traits = vec![LiftTrait::new("hide-minor-entry", "0")];
        assert!(is_entry_ref_relation(&relation));
        let pending = PendingLexEntryRef::new(derived, &mut relation, &LegacyEntryInfo::default(), None, None);
        fx.resolve(&[pending]);
        let refs = fx.refs_of(derived);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, RefKind::ComplexForm);
        assert_eq!(refs[0].primary_lexemes, vec![root]);
        assert!(!is_entry_ref_relation(&LiftRelation::new(BASE_FORM_RELATION, "root")));
        assert!(is_ignored_relation("subentry"));
    }
}
