//! Deferred resolution of cross-entry relations.
//!
//! Relations are queued while entries are imported and resolved in one pass
//! once every id is known. A relation exported from each of its members shows
//! up several times in the input; the matching below keeps one association
//! per logical relation.

use crate::error::Result;
use crate::identity::IdentityResolver;
use crate::merge::fold;
use crate::models::LiftRelation;
use crate::report::{CombinedCollection, ImportReport};
use crate::residue::{association_residue, relation_xml, ResidueStore};
use crate::store::{
    Guid, LexRefTypeData, LexReferenceData, LexiconStore, MappingKind, ObjectKind, OwningField,
};
use crate::writing_systems::{DEFAULT_ANALYSIS_TAG, WritingSystemRegistry};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// Name of the possibility list that owns relation types.
pub const RELATION_TYPE_LIST: &str = "lexical-relation";

#[derive(Debug, Clone, PartialEq)]
pub struct PendingRelation {
    pub source: Guid,
    pub relation_type: String,
    pub target_id: String,
    pub target: Option<Guid>,
    /// Position in a sequence, or -1.
    pub order: i32,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    /// Serialized content of the relation element the engine does not model.
    pub residue: String,
    /// The whole relation element, kept for the source's residue if the target
    /// never resolves.
    pub echo: String,
}

impl PendingRelation {
    pub fn new(
        source: Guid,
        relation: &LiftRelation,
        date_created: Option<DateTime<Utc>>,
        date_modified: Option<DateTime<Utc>>,
        residue: String,
    ) -> Self {
        PendingRelation {
            source,
            relation_type: relation.relation_type.clone(),
            target_id: relation.target.clone(),
            target: None,
            order: relation.order.unwrap_or(-1),
            date_created,
            date_modified,
            residue,
            echo: relation_xml(relation),
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.order >= 0
    }

    fn same_instance(&self, other: &PendingRelation) -> bool {
        self.source == other.source
            && self.relation_type == other.relation_type
            && self.date_created == other.date_created
            && self.date_modified == other.date_modified
            && self.residue == other.residue
    }
}

/// Length of the run of relations starting at `start` that form one logical
/// relation: same source, type, dates and residue.
pub fn group_length(pending: &[PendingRelation], start: usize) -> usize {
    let Some(first) = pending.get(start) else {
        return 0;
    };
    pending[start..]
        .iter()
        .take_while(|p| p.same_instance(first))
        .count()
}

/// Members of one group, stably sorted if their order numbers are inverted.
fn ordered_group(members: &[PendingRelation]) -> Vec<PendingRelation> {
    let mut group = members.to_vec();
    let inverted = group.windows(2).any(|w| w[1].order < w[0].order);
    if inverted {
        group.sort_by_key(|p| p.order);
    }
    group
}

/// Transitively connected collection members of one relation type.
#[derive(Debug, Default)]
struct CollectionGroup {
    ids: Vec<Guid>,
    relations: Vec<PendingRelation>,
    /// Unordered member pairs already linked, so mirrored exports are kept once.
    links: HashSet<(Guid, Guid)>,
}

fn link_key(a: Guid, b: Guid) -> (Guid, Guid) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Collection groups of one relation type, with a member -> group lookup.
#[derive(Debug, Default)]
struct CollectionSets {
    groups: Vec<Option<CollectionGroup>>,
    slot: HashMap<Guid, usize>,
}

impl CollectionSets {
    /// Adds one resolved relation, merging every group it connects into the
    /// oldest of them.
    fn add(&mut self, rel: PendingRelation, target: Guid) {
        let mut touching: Vec<usize> = [rel.source, target]
            .iter()
            .filter_map(|id| self.slot.get(id).copied())
            .collect();
        touching.sort_unstable();
        touching.dedup();

        let Some(&keep) = touching.first() else {
            let ids = if rel.source == target {
                vec![rel.source]
            } else {
                vec![rel.source, target]
            };
            let index = self.groups.len();
            for id in &ids {
                self.slot.insert(*id, index);
            }
            self.groups.push(Some(CollectionGroup {
                ids,
                links: HashSet::from([link_key(rel.source, target)]),
                relations: vec![rel],
            }));
            return;
        };
        for &other in &touching[1..] {
            let Some(absorbed) = self.groups[other].take() else {
                continue;
            };
            for id in &absorbed.ids {
                self.slot.insert(*id, keep);
            }
            if let Some(kept) = self.groups[keep].as_mut() {
                kept.ids.extend(absorbed.ids);
                kept.relations.extend(absorbed.relations);
                kept.links.extend(absorbed.links);
            }
        }
        let Some(kept) = self.groups[keep].as_mut() else {
            return;
        };
        if kept.links.insert(link_key(rel.source, target)) {
            for id in [rel.source, target] {
                if self.slot.insert(id, keep) != Some(keep) {
                    kept.ids.push(id);
                }
            }
            kept.relations.push(rel);
        }
    }

    fn into_groups(self) -> impl Iterator<Item = CollectionGroup> {
        self.groups.into_iter().flatten()
    }
}

/// Associations of one relation type, indexed by the objects they link.
#[derive(Debug, Default)]
struct MemberIndex {
    /// Position of each association among the type's members.
    rank: HashMap<Guid, usize>,
    by_member: HashMap<Guid, Vec<Guid>>,
}

impl MemberIndex {
    fn build<S: LexiconStore>(store: &S, lrt: Guid) -> Self {
        let mut index = MemberIndex::default();
        for lr in store.owned(lrt, OwningField::Members) {
            let targets = store
                .get::<LexReferenceData>(*lr)
                .map(|d| d.targets.as_slice())
                .unwrap_or_default();
            index.insert(*lr, targets);
        }
        index
    }

    fn insert(&mut self, lr: Guid, targets: &[Guid]) {
        let next = self.rank.len();
        self.rank.entry(lr).or_insert(next);
        for target in targets {
            push_unique(self.by_member.entry(*target).or_default(), lr);
        }
    }

    fn remove(&mut self, lr: Guid, targets: &[Guid]) {
        for target in targets {
            if let Some(lrs) = self.by_member.get_mut(target) {
                lrs.retain(|g| *g != lr);
            }
        }
    }

    /// Associations linking any of `ids`, in member order.
    fn containing(&self, ids: &[Guid]) -> Vec<Guid> {
        let mut found = Vec::new();
        for id in ids {
            for lr in self.by_member.get(id).into_iter().flatten() {
                push_unique(&mut found, *lr);
            }
        }
        found.sort_by_key(|lr| self.rank.get(lr).copied().unwrap_or(usize::MAX));
        found
    }
}

fn push_unique(list: &mut Vec<Guid>, guid: Guid) {
    if !list.contains(&guid) {
        list.push(guid);
    }
}

fn same_members(a: &[Guid], b: &[Guid]) -> bool {
    a.len() == b.len() && contains_all(a, b)
}

fn contains_all(haystack: &[Guid], needles: &[Guid]) -> bool {
    let haystack: HashSet<&Guid> = haystack.iter().collect();
    needles.iter().all(|g| haystack.contains(g))
}

/// Finds the relation type for `name` by name, then by reverse name, creating
/// one if neither matches.
pub fn find_or_create_relation_type<S: LexiconStore>(
    store: &mut S,
    name: &str,
    is_sequence: bool,
    producer: Option<&str>,
) -> Result<Guid> {
    let key = fold(name);
    let types = store.all_of_kind(ObjectKind::LexRefType);
    let matches = |values: &crate::store::MultiString| values.values().any(|v| fold(v) == key);
    let by_name = types
        .iter()
        .copied()
        .find(|g| store.get::<LexRefTypeData>(*g).is_some_and(|d| matches(&d.name)));
    let by_reverse = || {
        types.iter().copied().find(|g| {
            store
                .get::<LexRefTypeData>(*g)
                .is_some_and(|d| matches(&d.reverse_name))
        })
    };
    if let Some(guid) = by_name.or_else(by_reverse) {
        return Ok(guid);
    }

    let list = store.list(RELATION_TYPE_LIST)?;
    let ws = store.writing_systems_mut().resolve_or_create(DEFAULT_ANALYSIS_TAG);
    let guid = store.create(ObjectKind::LexRefType, Some((list, OwningField::Possibilities)), None)?;
    let data = store.expect_data_mut::<LexRefTypeData>(guid)?;
    data.name.insert(ws, name.to_string());
    let older_producer = producer.is_none_or(|p| p.is_empty() || p.starts_with("WeSay"));
    if older_producer && name == "BaseForm" {
        data.abbreviation.insert(ws, "base".to_string());
        data.reverse_name.insert(ws, "Derived Forms".to_string());
        data.reverse_abbreviation.insert(ws, "deriv".to_string());
        data.mapping = MappingKind::Tree;
    } else {
        data.abbreviation.insert(ws, name.to_string());
        data.mapping = if is_sequence {
            MappingKind::Sequence
        } else {
            MappingKind::Collection
        };
    }
    debug!("Created relation type '{}' ({:?})", name, data.mapping);
    Ok(guid)
}

/// Whether `relation_type` names the forward direction of `lrt` (its name or
/// abbreviation) rather than the reverse one.
pub fn is_forward_name<S: LexiconStore>(store: &S, relation_type: &str, lrt: Guid) -> bool {
    let key = fold(relation_type);
    store.get::<LexRefTypeData>(lrt).is_some_and(|d| {
        d.abbreviation
            .values()
            .chain(d.name.values())
            .any(|v| fold(v) == key)
    })
}

/// Resolves all queued relations for one import run.
pub struct RelationResolver<'a, S: LexiconStore> {
    store: &'a mut S,
    identity: &'a mut IdentityResolver,
    residue: &'a mut ResidueStore,
    report: &'a mut ImportReport,
    /// Associations that existed before the run and have not been matched yet.
    unmatched: &'a mut HashSet<Guid>,
    producer: Option<String>,
    collections: Vec<(String, CollectionSets)>,
    pending_tree: Vec<PendingRelation>,
    indexes: HashMap<Guid, MemberIndex>,
}

impl<'a, S: LexiconStore> RelationResolver<'a, S> {
    pub fn new(
        store: &'a mut S,
        identity: &'a mut IdentityResolver,
        residue: &'a mut ResidueStore,
        report: &'a mut ImportReport,
        unmatched: &'a mut HashSet<Guid>,
        producer: Option<String>,
    ) -> Self {
        RelationResolver {
            store,
            identity,
            residue,
            report,
            unmatched,
            producer,
            collections: Vec::new(),
            pending_tree: Vec::new(),
            indexes: HashMap::new(),
        }
    }

    /// Runs the whole relation phase over `pending`, in input order.
    pub fn resolve(mut self, pending: &[PendingRelation]) -> Result<()> {
        let mut i = 0;
        while i < pending.len() {
            let len = group_length(pending, i).max(1);
            let group = ordered_group(&pending[i..i + len]);
            i += len;
            self.process_group(group)?;
        }
        self.store_collections()?;
        self.store_remaining_tree_relations()?;
        Ok(())
    }

    fn process_group(&mut self, mut group: Vec<PendingRelation>) -> Result<()> {
        for rel in &mut group {
            rel.target = self.identity.lookup(&*self.store, &rel.target_id);
            if rel.target.is_none() {
                warn!(
                    "Relation '{}' from {} names unknown target '{}'",
                    rel.relation_type, rel.source, rel.target_id
                );
                self.residue
                    .attach(self.store, rel.source, rel.echo.clone())?;
                self.report.add_invalid_relation(
                    rel.source,
                    &rel.relation_type,
                    &rel.target_id,
                    "target not found",
                );
            }
        }
        group.retain(|r| r.target.is_some());
        let Some(first) = group.first() else {
            return Ok(());
        };

        let lrt = find_or_create_relation_type(
            self.store,
            &first.relation_type,
            first.order != -1,
            self.producer.as_deref(),
        )?;
        let mapping = self.store.expect_data::<LexRefTypeData>(lrt)?.mapping;
        match mapping {
            MappingKind::AsymmetricPair => {
                let forward = is_forward_name(&*self.store, &first.relation_type, lrt);
                self.store_asymmetric_pairs(lrt, &group, forward)
            }
            MappingKind::Pair => self.store_pairs(lrt, &group),
            MappingKind::Collection => {
                self.collapse_collection(group);
                Ok(())
            }
            MappingKind::Sequence => self.store_sequence(lrt, &group),
            MappingKind::Tree => self.store_tree(lrt, group),
        }
    }

    // --- Association helpers ---

    /// Associations of `lrt` that link any of `ids`, in member order.
    fn containing(&mut self, lrt: Guid, ids: &[Guid]) -> Vec<Guid> {
        let store = &*self.store;
        self.indexes
            .entry(lrt)
            .or_insert_with(|| MemberIndex::build(store, lrt))
            .containing(ids)
    }

    fn targets(&self, lr: Guid) -> Vec<Guid> {
        self.store
            .get::<LexReferenceData>(lr)
            .map(|d| d.targets.clone())
            .unwrap_or_default()
    }

    fn set_targets(&mut self, lr: Guid, targets: Vec<Guid>) -> Result<()> {
        let data = self.store.expect_data_mut::<LexReferenceData>(lr)?;
        let old = std::mem::replace(&mut data.targets, targets);
        let lrt = self.store.owner_of(lr);
        if let Some(index) = lrt.and_then(|lrt| self.indexes.get_mut(&lrt)) {
            index.remove(lr, &old);
            if let Some(data) = self.store.get::<LexReferenceData>(lr) {
                index.insert(lr, &data.targets);
            }
        }
        Ok(())
    }

    fn create_association(&mut self, lrt: Guid, targets: Vec<Guid>) -> Result<Guid> {
        let lr = self
            .store
            .create(ObjectKind::LexReference, Some((lrt, OwningField::Members)), None)?;
        if let Some(index) = self.indexes.get_mut(&lrt) {
            index.insert(lr, &targets);
        }
        self.store.expect_data_mut::<LexReferenceData>(lr)?.targets = targets;
        Ok(lr)
    }

    fn store_association_residue(&mut self, lr: Guid, rel: &PendingRelation) -> Result<()> {
        let content = Some(rel.residue.as_str()).filter(|r| !r.is_empty());
        if let Some(xml) =
            association_residue(rel.date_created.as_ref(), rel.date_modified.as_ref(), content)
        {
            self.store.expect_data_mut::<LexReferenceData>(lr)?.lift_residue = Some(xml);
        }
        Ok(())
    }

    fn matched(&mut self, lr: Guid) {
        self.unmatched.remove(&lr);
    }

    fn type_label(&self, lrt: Guid) -> String {
        let Some(data) = self.store.get::<LexRefTypeData>(lrt) else {
            return String::new();
        };
        data.abbreviation
            .values()
            .chain(data.name.values())
            .find(|v| !v.is_empty())
            .cloned()
            .unwrap_or_default()
    }

    // --- Pairs ---

    fn store_asymmetric_pairs(&mut self, lrt: Guid, group: &[PendingRelation], forward: bool) -> Result<()> {
        for rel in group {
            let Some(target) = rel.target else { continue };
            let wanted = if forward {
                [rel.source, target]
            } else {
                [target, rel.source]
            };
            let existing = self
                .containing(lrt, &wanted)
                .into_iter()
                .find(|lr| self.targets(*lr) == wanted);
            if let Some(lr) = existing {
                self.matched(lr);
                continue;
            }
            let lr = self.create_association(lrt, wanted.to_vec())?;
            self.store_association_residue(lr, rel)?;
        }
        Ok(())
    }

    fn store_pairs(&mut self, lrt: Guid, group: &[PendingRelation]) -> Result<()> {
        for rel in group {
            let Some(target) = rel.target else { continue };
            let existing = self.containing(lrt, &[rel.source, target]).into_iter().find(|lr| {
                let t = self.targets(*lr);
                t.len() == 2
                    && ((t[0] == rel.source && t[1] == target) || (t[0] == target && t[1] == rel.source))
            });
            if let Some(lr) = existing {
                self.matched(lr);
                continue;
            }
            let lr = self.create_association(lrt, vec![rel.source, target])?;
            self.store_association_residue(lr, rel)?;
        }
        Ok(())
    }

    // --- Sequences ---

    /// An association of `lrt` sharing at least one member with `ids`.
    fn find_sharing(&mut self, lrt: Guid, ids: &[Guid]) -> Option<Guid> {
        self.containing(lrt, ids).into_iter().next()
    }

    fn store_sequence(&mut self, lrt: Guid, group: &[PendingRelation]) -> Result<()> {
        let targets: Vec<Guid> = group.iter().filter_map(|r| r.target).collect();
        let exact = self
            .containing(lrt, &targets)
            .into_iter()
            .find(|lr| self.targets(*lr) == targets);
        if let Some(lr) = exact {
            self.matched(lr);
            return Ok(());
        }
        let lr = match self.find_sharing(lrt, &targets) {
            Some(lr) => {
                self.set_targets(lr, targets)?;
                self.matched(lr);
                lr
            }
            None => self.create_association(lrt, targets)?,
        };
        self.store_association_residue(lr, &group[0])
    }

    // --- Collections ---

    /// Folds a group into the per-type collection sets, merging sets that the
    /// new members connect.
    fn collapse_collection(&mut self, group: Vec<PendingRelation>) {
        for rel in group {
            let Some(target) = rel.target else { continue };
            let index = match self
                .collections
                .iter()
                .position(|(t, _)| *t == rel.relation_type)
            {
                Some(index) => index,
                None => {
                    self.collections
                        .push((rel.relation_type.clone(), CollectionSets::default()));
                    self.collections.len() - 1
                }
            };
            self.collections[index].1.add(rel, target);
        }
    }

    fn store_collections(&mut self) -> Result<()> {
        let collections = std::mem::take(&mut self.collections);
        for (relation_type, sets) in collections {
            let lrt = find_or_create_relation_type(self.store, &relation_type, false, self.producer.as_deref())?;
            for group in sets.into_groups() {
                let exact = self
                    .containing(lrt, &group.ids)
                    .into_iter()
                    .find(|lr| same_members(&self.targets(*lr), &group.ids));
                if let Some(lr) = exact {
                    self.matched(lr);
                    continue;
                }
                match self.find_sharing(lrt, &group.ids) {
                    Some(lr) => {
                        self.matched(lr);
                        self.replace_collection_contents(lrt, lr, &group.ids)?;
                    }
                    None => {
                        let lr = self.create_association(lrt, group.ids.clone())?;
                        for rel in &group.relations {
                            self.store_association_residue(lr, rel)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Nested sets replace the association's members; overlapping but
    /// non-nested sets are unioned and reported.
    fn replace_collection_contents(&mut self, lrt: Guid, lr: Guid, incoming: &[Guid]) -> Result<()> {
        let current = self.targets(lr);
        let incoming_set: HashSet<Guid> = incoming.iter().copied().collect();
        let Some(&anchor) = current.iter().find(|g| incoming_set.contains(g)) else {
            return Ok(());
        };
        let nested = contains_all(&current, incoming) || contains_all(incoming, &current);
        if nested {
            if !same_members(&current, incoming) {
                self.set_targets(lr, incoming.to_vec())?;
            }
            return Ok(());
        }

        let type_name = self.type_label(lrt);
        let headword = self.store.headword(anchor);
        for item in current.iter().filter(|g| !incoming_set.contains(g)) {
            let combined_item = self.store.headword(*item);
            warn!(
                "Combining overlapping '{}' sets: '{}' joins the set of '{}'",
                type_name, combined_item, headword
            );
            self.report.combined_collections.push(CombinedCollection {
                owner: anchor,
                type_name: type_name.clone(),
                combined_item,
                headword: headword.clone(),
            });
        }
        let mut seen: HashSet<Guid> = current.iter().copied().collect();
        let mut union = current;
        union.extend(incoming.iter().copied().filter(|id| seen.insert(*id)));
        self.set_targets(lr, union)
    }

    // --- Trees ---

    fn store_tree(&mut self, lrt: Guid, group: Vec<PendingRelation>) -> Result<()> {
        if self.extend_existing_tree(lrt, &group)? {
            return Ok(());
        }
        let first = &group[0];
        if is_forward_name(&*self.store, &first.relation_type, lrt) {
            let mut targets = vec![first.source];
            targets.extend(group.iter().filter_map(|r| r.target));
            let lr = self.create_association(lrt, targets)?;
            self.store_association_residue(lr, first)?;
        } else {
            self.pending_tree.extend(group);
        }
        Ok(())
    }

    /// Updates a tree headed by the group's source. Children missing from the
    /// group are removed, the head never is.
    fn extend_existing_tree(&mut self, lrt: Guid, group: &[PendingRelation]) -> Result<bool> {
        let source = group[0].source;
        let forward = is_forward_name(&*self.store, &group[0].relation_type, lrt);
        let Some(lr) = self
            .containing(lrt, &[source])
            .into_iter()
            .find(|lr| self.targets(*lr).first() == Some(&source))
        else {
            return Ok(false);
        };

        let mut unused = self.targets(lr);
        for rel in group {
            let Some(child) = rel.target else { continue };
            if forward {
                let mut targets = self.targets(lr);
                if targets.contains(&child) {
                    unused.retain(|g| *g != child);
                } else {
                    targets.push(child);
                    self.set_targets(lr, targets)?;
                }
            } else {
                unused.retain(|g| *g != child);
                self.pending_tree.push(rel.clone());
            }
        }
        self.matched(lr);
        for child in unused {
            if self.store.contains(lr) && child != source {
                let mut targets = self.targets(lr);
                targets.retain(|g| *g != child);
                self.set_targets(lr, targets)?;
            }
        }
        Ok(true)
    }

    /// Reverse-direction tree members, handled once all forward trees exist.
    fn store_remaining_tree_relations(&mut self) -> Result<()> {
        let remaining = std::mem::take(&mut self.pending_tree);
        for rel in remaining {
            let Some(target) = rel.target else { continue };
            let lrt = find_or_create_relation_type(self.store, &rel.relation_type, false, self.producer.as_deref())?;
            let forward = is_forward_name(&*self.store, &rel.relation_type, lrt);
            let (head, child) = if forward {
                (rel.source, target)
            } else {
                (target, rel.source)
            };
            let existing = self
                .containing(lrt, &[head])
                .into_iter()
                .find(|lr| self.targets(*lr).first() == Some(&head));
            match existing {
                Some(lr) => {
                    let mut targets = self.targets(lr);
                    if !targets.contains(&child) {
                        targets.push(child);
                        self.set_targets(lr, targets)?;
                    }
                    self.matched(lr);
                }
                None => {
                    let lr = self.create_association(lrt, vec![head, child])?;
                    self.store_association_residue(lr, &rel)?;
                }
            }
        }
        Ok(())
    }
}
