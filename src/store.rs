//! In-memory object graph of the lexicon.
//!
//! Every object has a GUID, a kind, at most one owner, and typed payload data.
//! Owned objects are listed per owning field on their owner, in order.
//! Non-owning references (relation targets, entry-ref components, sense MSAs)
//! are plain GUIDs that `delete` scrubs when their target disappears.

use crate::custom_fields::CustomFields;
use crate::error::{LiftError, Result};
use crate::writing_systems::{WritingSystemRegistry, WritingSystems, WsHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type Guid = Uuid;

/// Alternatives of one logical string, keyed by writing system.
pub type MultiString = BTreeMap<WsHandle, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Entry,
    Sense,
    Example,
    Pronunciation,
    Allomorph,
    Etymology,
    Msa,
    EntryRef,
    LexRefType,
    LexReference,
    PossibilityList,
    Possibility,
    WordformAnalysis,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Entry => "entry",
            ObjectKind::Sense => "sense",
            ObjectKind::Example => "example",
            ObjectKind::Pronunciation => "pronunciation",
            ObjectKind::Allomorph => "allomorph",
            ObjectKind::Etymology => "etymology",
            ObjectKind::Msa => "msa",
            ObjectKind::EntryRef => "entry-ref",
            ObjectKind::LexRefType => "relation-type",
            ObjectKind::LexReference => "relation",
            ObjectKind::PossibilityList => "possibility-list",
            ObjectKind::Possibility => "possibility",
            ObjectKind::WordformAnalysis => "wordform-analysis",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "entry" => ObjectKind::Entry,
            "sense" => ObjectKind::Sense,
            "example" => ObjectKind::Example,
            "pronunciation" => ObjectKind::Pronunciation,
            "allomorph" => ObjectKind::Allomorph,
            "etymology" => ObjectKind::Etymology,
            "msa" => ObjectKind::Msa,
            "entry-ref" => ObjectKind::EntryRef,
            "relation-type" => ObjectKind::LexRefType,
            "relation" => ObjectKind::LexReference,
            "possibility-list" => ObjectKind::PossibilityList,
            "possibility" => ObjectKind::Possibility,
            "wordform-analysis" => ObjectKind::WordformAnalysis,
            _ => {
                return Err(LiftError::MalformedEnum {
                    kind: "object kind".to_string(),
                    value: s.to_string(),
                });
            }
        };
        Ok(kind)
    }
}

/// The owning collections objects can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OwningField {
    Senses,
    Subsenses,
    Examples,
    Pronunciations,
    Allomorphs,
    Etymologies,
    Msas,
    EntryRefs,
    Members,
    Possibilities,
    SubPossibilities,
}

/// How the members of a relation association are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingKind {
    Collection,
    Pair,
    AsymmetricPair,
    Sequence,
    Tree,
}

impl MappingKind {
    /// Decodes the numeric mapping codes used by relation-type range elements.
    /// Entry, sense and mixed variants of a mapping share one kind here.
    pub fn from_code(code: i32) -> Result<Self> {
        let kind = match code {
            0 | 4 | 8 => MappingKind::Collection,
            1 | 5 | 9 => MappingKind::Pair,
            2 | 6 | 10 | 15 | 16 | 17 => MappingKind::Tree,
            3 | 7 | 11 => MappingKind::Sequence,
            12..=14 => MappingKind::AsymmetricPair,
            _ => {
                return Err(LiftError::MalformedEnum {
                    kind: "relation mapping".to_string(),
                    value: code.to_string(),
                });
            }
        };
        Ok(kind)
    }
}

impl FromStr for MappingKind {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(code) = s.trim().parse::<i32>() {
            return MappingKind::from_code(code);
        }
        match s.trim().to_ascii_lowercase().as_str() {
            "collection" => Ok(MappingKind::Collection),
            "pair" => Ok(MappingKind::Pair),
            "asymmetric-pair" | "asymmetricpair" => Ok(MappingKind::AsymmetricPair),
            "sequence" => Ok(MappingKind::Sequence),
            "tree" | "unidirectional" => Ok(MappingKind::Tree),
            _ => Err(LiftError::MalformedEnum {
                kind: "relation mapping".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefKind {
    Variant,
    ComplexForm,
}

// --- Payloads ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryData {
    pub lift_id: Option<String>,
    pub lexeme_form: MultiString,
    pub citation_form: MultiString,
    pub notes: BTreeMap<String, MultiString>,
    pub custom: BTreeMap<String, MultiString>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    /// Unstructured leftovers from older importers.
    pub import_residue: String,
    pub lift_residue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenseData {
    pub lift_id: Option<String>,
    pub gloss: MultiString,
    pub definition: MultiString,
    pub msa: Option<Guid>,
    pub semantic_domains: Vec<Guid>,
    pub notes: BTreeMap<String, MultiString>,
    pub custom: BTreeMap<String, MultiString>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    pub import_residue: String,
    pub lift_residue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExampleData {
    pub content: MultiString,
    pub translation: MultiString,
    pub source: Option<String>,
    pub notes: BTreeMap<String, MultiString>,
    pub custom: BTreeMap<String, MultiString>,
    pub lift_residue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PronunciationData {
    pub form: MultiString,
    pub media: Vec<String>,
    pub custom: BTreeMap<String, MultiString>,
    pub lift_residue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllomorphData {
    pub form: MultiString,
    pub custom: BTreeMap<String, MultiString>,
    pub lift_residue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EtymologyData {
    pub etymology_type: Option<String>,
    pub source: Option<String>,
    pub form: MultiString,
    pub gloss: MultiString,
    pub custom: BTreeMap<String, MultiString>,
    pub lift_residue: Option<String>,
}

/// Morphosyntactic analysis of an entry, referenced by its senses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsaData {
    pub part_of_speech: Option<Guid>,
    pub lift_residue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRefData {
    pub kind: RefKind,
    pub complex_entry_types: Vec<Guid>,
    pub variant_entry_types: Vec<Guid>,
    pub components: Vec<Guid>,
    pub primary_lexemes: Vec<Guid>,
    pub hide_minor_entry: i32,
    pub summary: MultiString,
    pub lift_residue: Option<String>,
}

impl Default for EntryRefData {
    fn default() -> Self {
        EntryRefData {
            kind: RefKind::Variant,
            complex_entry_types: Vec::new(),
            variant_entry_types: Vec::new(),
            components: Vec::new(),
            primary_lexemes: Vec::new(),
            hide_minor_entry: 0,
            summary: MultiString::new(),
            lift_residue: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexRefTypeData {
    pub name: MultiString,
    pub abbreviation: MultiString,
    pub reverse_name: MultiString,
    pub reverse_abbreviation: MultiString,
    pub mapping: MappingKind,
}

impl Default for LexRefTypeData {
    fn default() -> Self {
        LexRefTypeData {
            name: MultiString::new(),
            abbreviation: MultiString::new(),
            reverse_name: MultiString::new(),
            reverse_abbreviation: MultiString::new(),
            mapping: MappingKind::Collection,
        }
    }
}

/// One association. For trees, the first target is the head.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexReferenceData {
    pub targets: Vec<Guid>,
    pub lift_residue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PossibilityListData {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PossibilityData {
    pub lift_id: Option<String>,
    pub name: MultiString,
    pub abbreviation: MultiString,
    pub reverse_abbreviation: MultiString,
    pub description: MultiString,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MorphBundle {
    pub msa: Option<Guid>,
    pub morph: Option<Guid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordformAnalysisData {
    pub bundles: Vec<MorphBundle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectData {
    Entry(EntryData),
    Sense(SenseData),
    Example(ExampleData),
    Pronunciation(PronunciationData),
    Allomorph(AllomorphData),
    Etymology(EtymologyData),
    Msa(MsaData),
    EntryRef(EntryRefData),
    LexRefType(LexRefTypeData),
    LexReference(LexReferenceData),
    PossibilityList(PossibilityListData),
    Possibility(PossibilityData),
    WordformAnalysis(WordformAnalysisData),
}

impl ObjectData {
    /// Blank payload for a freshly created object of `kind`.
    pub fn empty(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Entry => ObjectData::Entry(EntryData::default()),
            ObjectKind::Sense => ObjectData::Sense(SenseData::default()),
            ObjectKind::Example => ObjectData::Example(ExampleData::default()),
            ObjectKind::Pronunciation => ObjectData::Pronunciation(PronunciationData::default()),
            ObjectKind::Allomorph => ObjectData::Allomorph(AllomorphData::default()),
            ObjectKind::Etymology => ObjectData::Etymology(EtymologyData::default()),
            ObjectKind::Msa => ObjectData::Msa(MsaData::default()),
            ObjectKind::EntryRef => ObjectData::EntryRef(EntryRefData::default()),
            ObjectKind::LexRefType => ObjectData::LexRefType(LexRefTypeData::default()),
            ObjectKind::LexReference => ObjectData::LexReference(LexReferenceData::default()),
            ObjectKind::PossibilityList => {
                ObjectData::PossibilityList(PossibilityListData::default())
            }
            ObjectKind::Possibility => ObjectData::Possibility(PossibilityData::default()),
            ObjectKind::WordformAnalysis => {
                ObjectData::WordformAnalysis(WordformAnalysisData::default())
            }
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectData::Entry(_) => ObjectKind::Entry,
            ObjectData::Sense(_) => ObjectKind::Sense,
            ObjectData::Example(_) => ObjectKind::Example,
            ObjectData::Pronunciation(_) => ObjectKind::Pronunciation,
            ObjectData::Allomorph(_) => ObjectKind::Allomorph,
            ObjectData::Etymology(_) => ObjectKind::Etymology,
            ObjectData::Msa(_) => ObjectKind::Msa,
            ObjectData::EntryRef(_) => ObjectKind::EntryRef,
            ObjectData::LexRefType(_) => ObjectKind::LexRefType,
            ObjectData::LexReference(_) => ObjectKind::LexReference,
            ObjectData::PossibilityList(_) => ObjectKind::PossibilityList,
            ObjectData::Possibility(_) => ObjectKind::Possibility,
            ObjectData::WordformAnalysis(_) => ObjectKind::WordformAnalysis,
        }
    }

    /// The residue slot, for kinds that have one.
    pub fn lift_residue_mut(&mut self) -> Option<&mut Option<String>> {
        match self {
            ObjectData::Entry(d) => Some(&mut d.lift_residue),
            ObjectData::Sense(d) => Some(&mut d.lift_residue),
            ObjectData::Example(d) => Some(&mut d.lift_residue),
            ObjectData::Pronunciation(d) => Some(&mut d.lift_residue),
            ObjectData::Allomorph(d) => Some(&mut d.lift_residue),
            ObjectData::Etymology(d) => Some(&mut d.lift_residue),
            ObjectData::Msa(d) => Some(&mut d.lift_residue),
            ObjectData::EntryRef(d) => Some(&mut d.lift_residue),
            ObjectData::LexReference(d) => Some(&mut d.lift_residue),
            _ => None,
        }
    }

    pub fn lift_residue(&self) -> Option<&str> {
        match self {
            ObjectData::Entry(d) => d.lift_residue.as_deref(),
            ObjectData::Sense(d) => d.lift_residue.as_deref(),
            ObjectData::Example(d) => d.lift_residue.as_deref(),
            ObjectData::Pronunciation(d) => d.lift_residue.as_deref(),
            ObjectData::Allomorph(d) => d.lift_residue.as_deref(),
            ObjectData::Etymology(d) => d.lift_residue.as_deref(),
            ObjectData::Msa(d) => d.lift_residue.as_deref(),
            ObjectData::EntryRef(d) => d.lift_residue.as_deref(),
            ObjectData::LexReference(d) => d.lift_residue.as_deref(),
            _ => None,
        }
    }

    /// The legacy import-residue text, for kinds that carry one.
    pub fn import_residue_mut(&mut self) -> Option<&mut String> {
        match self {
            ObjectData::Entry(d) => Some(&mut d.import_residue),
            ObjectData::Sense(d) => Some(&mut d.import_residue),
            _ => None,
        }
    }

    pub fn custom_mut(&mut self) -> Option<&mut BTreeMap<String, MultiString>> {
        match self {
            ObjectData::Entry(d) => Some(&mut d.custom),
            ObjectData::Sense(d) => Some(&mut d.custom),
            ObjectData::Example(d) => Some(&mut d.custom),
            ObjectData::Pronunciation(d) => Some(&mut d.custom),
            ObjectData::Allomorph(d) => Some(&mut d.custom),
            ObjectData::Etymology(d) => Some(&mut d.custom),
            _ => None,
        }
    }

    pub fn notes_mut(&mut self) -> Option<&mut BTreeMap<String, MultiString>> {
        match self {
            ObjectData::Entry(d) => Some(&mut d.notes),
            ObjectData::Sense(d) => Some(&mut d.notes),
            ObjectData::Example(d) => Some(&mut d.notes),
            _ => None,
        }
    }

    /// Non-owning references held by this payload.
    fn references(&self) -> Vec<Guid> {
        match self {
            ObjectData::Sense(d) => d.msa.into_iter().chain(d.semantic_domains.iter().copied()).collect(),
            ObjectData::Msa(d) => d.part_of_speech.into_iter().collect(),
            ObjectData::EntryRef(d) => d
                .complex_entry_types
                .iter()
                .chain(&d.variant_entry_types)
                .chain(&d.components)
                .chain(&d.primary_lexemes)
                .copied()
                .collect(),
            ObjectData::LexReference(d) => d.targets.clone(),
            ObjectData::WordformAnalysis(d) => d
                .bundles
                .iter()
                .flat_map(|b| b.msa.into_iter().chain(b.morph))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Drops every reference to an object in `gone`.
    fn scrub(&mut self, gone: &HashSet<Guid>) {
        let keep = |g: &Guid| !gone.contains(g);
        match self {
            ObjectData::Sense(d) => {
                if d.msa.is_some_and(|m| gone.contains(&m)) {
                    d.msa = None;
                }
                d.semantic_domains.retain(keep);
            }
            ObjectData::Msa(d) => {
                if d.part_of_speech.is_some_and(|p| gone.contains(&p)) {
                    d.part_of_speech = None;
                }
            }
            ObjectData::EntryRef(d) => {
                d.complex_entry_types.retain(keep);
                d.variant_entry_types.retain(keep);
                d.components.retain(keep);
                d.primary_lexemes.retain(keep);
            }
            ObjectData::LexReference(d) => d.targets.retain(keep),
            ObjectData::WordformAnalysis(d) => {
                for bundle in &mut d.bundles {
                    if bundle.msa.is_some_and(|m| gone.contains(&m)) {
                        bundle.msa = None;
                    }
                    if bundle.morph.is_some_and(|m| gone.contains(&m)) {
                        bundle.morph = None;
                    }
                }
            }
            _ => {}
        }
    }
}

/// Typed view of one payload variant.
pub trait Payload: Sized {
    const KIND: ObjectKind;
    fn from_data(data: &ObjectData) -> Option<&Self>;
    fn from_data_mut(data: &mut ObjectData) -> Option<&mut Self>;
}

macro_rules! impl_payload {
    ($ty:ty, $variant:ident) => {
        impl Payload for $ty {
            const KIND: ObjectKind = ObjectKind::$variant;

            fn from_data(data: &ObjectData) -> Option<&Self> {
                match data {
                    ObjectData::$variant(d) => Some(d),
                    _ => None,
                }
            }

            fn from_data_mut(data: &mut ObjectData) -> Option<&mut Self> {
                match data {
                    ObjectData::$variant(d) => Some(d),
                    _ => None,
                }
            }
        }
    };
}

impl_payload!(EntryData, Entry);
impl_payload!(SenseData, Sense);
impl_payload!(ExampleData, Example);
impl_payload!(PronunciationData, Pronunciation);
impl_payload!(AllomorphData, Allomorph);
impl_payload!(EtymologyData, Etymology);
impl_payload!(MsaData, Msa);
impl_payload!(EntryRefData, EntryRef);
impl_payload!(LexRefTypeData, LexRefType);
impl_payload!(LexReferenceData, LexReference);
impl_payload!(PossibilityListData, PossibilityList);
impl_payload!(PossibilityData, Possibility);
impl_payload!(WordformAnalysisData, WordformAnalysis);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexObject {
    pub guid: Guid,
    pub owner: Option<(Guid, OwningField)>,
    pub owned: BTreeMap<OwningField, Vec<Guid>>,
    pub data: ObjectData,
}

impl LexObject {
    pub fn kind(&self) -> ObjectKind {
        self.data.kind()
    }
}

/// The store API the import engine is written against.
pub trait LexiconStore {
    fn find(&self, guid: Guid) -> Option<&LexObject>;
    fn find_mut(&mut self, guid: Guid) -> Option<&mut LexObject>;

    /// Creates an empty object of `kind`, appended to `owner`'s field if given.
    /// `explicit` forces the GUID; it must not be in use.
    fn create(
        &mut self,
        kind: ObjectKind,
        owner: Option<(Guid, OwningField)>,
        explicit: Option<Guid>,
    ) -> Result<Guid>;

    /// Deletes an object and everything it owns, detaches it from its owner,
    /// and removes references to the deleted objects from the rest of the graph.
    fn delete(&mut self, guid: Guid) -> Result<()>;

    /// The ordered contents of one owning field.
    fn owned(&self, owner: Guid, field: OwningField) -> &[Guid];

    /// Live objects of `kind` in creation order.
    fn all_of_kind(&self, kind: ObjectKind) -> Vec<Guid>;

    fn writing_systems(&self) -> &WritingSystems;
    fn writing_systems_mut(&mut self) -> &mut WritingSystems;
    fn custom_fields(&self) -> &CustomFields;
    fn custom_fields_mut(&mut self) -> &mut CustomFields;

    fn contains(&self, guid: Guid) -> bool {
        self.find(guid).is_some()
    }

    fn kind_of(&self, guid: Guid) -> Option<ObjectKind> {
        self.find(guid).map(LexObject::kind)
    }

    fn owner_of(&self, guid: Guid) -> Option<Guid> {
        self.find(guid).and_then(|o| o.owner).map(|(g, _)| g)
    }

    fn get<T: Payload>(&self, guid: Guid) -> Option<&T>
    where
        Self: Sized,
    {
        self.find(guid).and_then(|o| T::from_data(&o.data))
    }

    fn get_mut<T: Payload>(&mut self, guid: Guid) -> Option<&mut T>
    where
        Self: Sized,
    {
        self.find_mut(guid).and_then(|o| T::from_data_mut(&mut o.data))
    }

    /// Like `get`, but a missing or mistyped object is an error.
    fn expect_data<T: Payload>(&self, guid: Guid) -> Result<&T>
    where
        Self: Sized,
    {
        let object = self.find(guid).ok_or(LiftError::ObjectNotFound(guid))?;
        T::from_data(&object.data).ok_or_else(|| LiftError::WrongKind {
            guid,
            expected: T::KIND.to_string(),
            found: object.kind().to_string(),
        })
    }

    fn expect_data_mut<T: Payload>(&mut self, guid: Guid) -> Result<&mut T>
    where
        Self: Sized,
    {
        let object = self.find_mut(guid).ok_or(LiftError::ObjectNotFound(guid))?;
        let found = object.kind();
        T::from_data_mut(&mut object.data).ok_or_else(|| LiftError::WrongKind {
            guid,
            expected: T::KIND.to_string(),
            found: found.to_string(),
        })
    }

    /// The possibility list called `name`, if there is one.
    fn find_list(&self, name: &str) -> Option<Guid>;

    /// Finds the possibility list called `name`, creating it if needed.
    fn list(&mut self, name: &str) -> Result<Guid>;

    /// The owning entry of a sense, subsense or entry-owned object.
    fn owning_entry(&self, guid: Guid) -> Option<Guid> {
        let mut current = guid;
        loop {
            let object = self.find(current)?;
            if object.kind() == ObjectKind::Entry {
                return Some(current);
            }
            current = object.owner?.0;
        }
    }

    /// All senses of an entry, subsenses included, depth first.
    fn senses_of_entry(&self, entry: Guid) -> Vec<Guid> {
        let mut result = Vec::new();
        let mut stack: Vec<Guid> = self.owned(entry, OwningField::Senses).iter().rev().copied().collect();
        while let Some(sense) = stack.pop() {
            result.push(sense);
            stack.extend(self.owned(sense, OwningField::Subsenses).iter().rev().copied());
        }
        result
    }

    /// Display form of an entry or sense, for reports.
    fn headword(&self, guid: Guid) -> String
    where
        Self: Sized,
    {
        let Some(entry) = self.owning_entry(guid) else {
            return guid.to_string();
        };
        let Some(data) = self.get::<EntryData>(entry) else {
            return guid.to_string();
        };
        data.citation_form
            .values()
            .chain(data.lexeme_form.values())
            .find(|s| !s.is_empty())
            .cloned()
            .or_else(|| data.lift_id.clone())
            .unwrap_or_else(|| guid.to_string())
    }

    /// First alternative of a multistring in the given writing system tag.
    fn text_in(&self, value: &MultiString, tag: &str) -> Option<String> {
        let ws = self.writing_systems().handle(tag)?;
        value.get(&ws).cloned()
    }
}

/// HashMap-backed implementation of [`LexiconStore`].
///
/// Objects are indexed by creation order and kind. Incoming references are
/// tracked per target so a delete only scrubs the objects that pointed at
/// what it removed; payloads borrowed mutably are reindexed lazily before
/// the next delete.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: HashMap<Guid, LexObject>,
    order: HashMap<Guid, u64>,
    sequence: BTreeMap<u64, Guid>,
    by_kind: HashMap<ObjectKind, BTreeMap<u64, Guid>>,
    next_order: u64,
    lists: HashMap<String, Guid>,
    /// References each object held when it was last indexed.
    outgoing: HashMap<Guid, Vec<Guid>>,
    /// Target -> objects referencing it.
    incoming: HashMap<Guid, HashSet<Guid>>,
    /// Objects whose payload may have changed since they were indexed.
    stale: HashSet<Guid>,
    writing_systems: WritingSystems,
    custom_fields: CustomFields,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All objects in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &LexObject> {
        self.sequence.values().filter_map(|g| self.objects.get(g))
    }

    pub fn count_of_kind(&self, kind: ObjectKind) -> usize {
        self.by_kind.get(&kind).map_or(0, BTreeMap::len)
    }

    /// Reinstates a persisted object as-is. Owners must be restored before
    /// their owned objects are queried, but not before they are inserted.
    pub fn restore(&mut self, object: LexObject) {
        let guid = object.guid;
        let kind = object.kind();
        if let ObjectData::PossibilityList(list) = &object.data {
            self.lists.entry(list.name.clone()).or_insert(guid);
        }
        if let Some(previous) = self.objects.insert(guid, object) {
            if let Some(position) = self.order.get(&guid) {
                if let Some(index) = self.by_kind.get_mut(&previous.kind()) {
                    index.remove(position);
                }
                self.by_kind.entry(kind).or_default().insert(*position, guid);
            }
        } else {
            self.track(guid, kind);
        }
        self.stale.insert(guid);
    }

    fn track(&mut self, guid: Guid, kind: ObjectKind) {
        let position = self.next_order;
        self.next_order += 1;
        self.order.insert(guid, position);
        self.sequence.insert(position, guid);
        self.by_kind.entry(kind).or_default().insert(position, guid);
    }

    fn untrack(&mut self, object: &LexObject) {
        if let Some(position) = self.order.remove(&object.guid) {
            self.sequence.remove(&position);
            if let Some(index) = self.by_kind.get_mut(&object.kind()) {
                index.remove(&position);
            }
        }
        if let ObjectData::PossibilityList(list) = &object.data {
            if self.lists.get(&list.name) == Some(&object.guid) {
                self.lists.remove(&list.name);
            }
        }
    }

    /// Brings the incoming-reference index up to date for every stale object.
    fn reindex(&mut self) {
        for guid in std::mem::take(&mut self.stale) {
            for target in self.outgoing.remove(&guid).unwrap_or_default() {
                if let Some(referrers) = self.incoming.get_mut(&target) {
                    referrers.remove(&guid);
                }
            }
            let Some(object) = self.objects.get(&guid) else {
                continue;
            };
            let targets = object.data.references();
            for target in &targets {
                self.incoming.entry(*target).or_default().insert(guid);
            }
            self.outgoing.insert(guid, targets);
        }
    }

    pub fn set_writing_systems(&mut self, ws: WritingSystems) {
        self.writing_systems = ws;
    }

    pub fn set_custom_fields(&mut self, fields: CustomFields) {
        self.custom_fields = fields;
    }

    fn collect_subtree(&self, root: Guid) -> Vec<Guid> {
        let mut result = Vec::new();
        let mut stack = vec![root];
        while let Some(guid) = stack.pop() {
            if let Some(object) = self.objects.get(&guid) {
                result.push(guid);
                for owned in object.owned.values() {
                    stack.extend(owned.iter().copied());
                }
            }
        }
        result
    }
}

impl LexiconStore for MemoryStore {
    fn find(&self, guid: Guid) -> Option<&LexObject> {
        self.objects.get(&guid)
    }

    fn find_mut(&mut self, guid: Guid) -> Option<&mut LexObject> {
        let object = self.objects.get_mut(&guid)?;
        self.stale.insert(guid);
        Some(object)
    }

    fn create(
        &mut self,
        kind: ObjectKind,
        owner: Option<(Guid, OwningField)>,
        explicit: Option<Guid>,
    ) -> Result<Guid> {
        let guid = explicit.unwrap_or_else(Uuid::new_v4);
        if self.objects.contains_key(&guid) {
            return Err(LiftError::InvalidArgument(format!(
                "GUID {} is already in use",
                guid
            )));
        }
        if let Some((owner_guid, field)) = owner {
            let owner_object = self
                .objects
                .get_mut(&owner_guid)
                .ok_or(LiftError::ObjectNotFound(owner_guid))?;
            owner_object.owned.entry(field).or_default().push(guid);
        }
        self.objects.insert(
            guid,
            LexObject {
                guid,
                owner,
                owned: BTreeMap::new(),
                data: ObjectData::empty(kind),
            },
        );
        self.track(guid, kind);
        Ok(guid)
    }

    fn delete(&mut self, guid: Guid) -> Result<()> {
        let owner = self
            .objects
            .get(&guid)
            .ok_or(LiftError::ObjectNotFound(guid))?
            .owner;
        self.reindex();
        let doomed = self.collect_subtree(guid);
        let gone: HashSet<Guid> = doomed.iter().copied().collect();

        if let Some((owner_guid, field)) = owner {
            if let Some(owner_object) = self.objects.get_mut(&owner_guid) {
                if let Some(list) = owner_object.owned.get_mut(&field) {
                    list.retain(|g| *g != guid);
                }
            }
        }

        let mut referrers = HashSet::new();
        for g in &doomed {
            if let Some(incoming) = self.incoming.remove(g) {
                referrers.extend(incoming.into_iter().filter(|r| !gone.contains(r)));
            }
            for target in self.outgoing.remove(g).unwrap_or_default() {
                if let Some(incoming) = self.incoming.get_mut(&target) {
                    incoming.remove(g);
                }
            }
            if let Some(object) = self.objects.remove(g) {
                self.untrack(&object);
            }
        }
        for referrer in referrers {
            if let Some(object) = self.objects.get_mut(&referrer) {
                object.data.scrub(&gone);
                self.stale.insert(referrer);
            }
        }
        Ok(())
    }

    fn owned(&self, owner: Guid, field: OwningField) -> &[Guid] {
        self.objects
            .get(&owner)
            .and_then(|o| o.owned.get(&field))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn all_of_kind(&self, kind: ObjectKind) -> Vec<Guid> {
        self.by_kind
            .get(&kind)
            .map(|index| index.values().copied().collect())
            .unwrap_or_default()
    }

    fn find_list(&self, name: &str) -> Option<Guid> {
        self.lists.get(name).copied()
    }

    fn list(&mut self, name: &str) -> Result<Guid> {
        if let Some(guid) = self.find_list(name) {
            return Ok(guid);
        }
        let guid = self.create(ObjectKind::PossibilityList, None, None)?;
        self.expect_data_mut::<PossibilityListData>(guid)?.name = name.to_string();
        self.lists.insert(name.to_string(), guid);
        Ok(guid)
    }

    fn writing_systems(&self) -> &WritingSystems {
        &self.writing_systems
    }

    fn writing_systems_mut(&mut self) -> &mut WritingSystems {
        &mut self.writing_systems
    }

    fn custom_fields(&self) -> &CustomFields {
        &self.custom_fields
    }

    fn custom_fields_mut(&mut self) -> &mut CustomFields {
        &mut self.custom_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_sense(store: &mut MemoryStore, form: &str) -> (Guid, Guid) {
        let en = store.writing_systems_mut().resolve_or_create("en");
        let entry = store.create(ObjectKind::Entry, None, None).unwrap();
        store
            .get_mut::<EntryData>(entry)
            .unwrap()
            .lexeme_form
            .insert(en, form.to_string());
        let sense = store
            .create(ObjectKind::Sense, Some((entry, OwningField::Senses)), None)
            .unwrap();
        (entry, sense)
    }

    #[test]
    fn test_create_with_owner_and_explicit_guid() {
        let mut store = MemoryStore::new();
        let explicit = Uuid::new_v4();
        let entry = store.create(ObjectKind::Entry, None, Some(explicit)).unwrap();
        assert_eq!(entry, explicit);
        let sense = store
            .create(ObjectKind::Sense, Some((entry, OwningField::Senses)), None)
            .unwrap();
        assert_eq!(store.owned(entry, OwningField::Senses), &[sense]);
        assert_eq!(store.owner_of(sense), Some(entry));
        assert_eq!(store.kind_of(sense), Some(ObjectKind::Sense));
        assert!(store.create(ObjectKind::Entry, None, Some(explicit)).is_err());
    }

    #[test]
    fn test_delete_cascades_and_scrubs_references() {
        let mut store = MemoryStore::new();
        let (cat, cat_sense) = entry_with_sense(&mut store, "cat");
        let (dog, _) = entry_with_sense(&mut store, "dog");
        let example = store
            .create(ObjectKind::Example, Some((cat_sense, OwningField::Examples)), None)
            .unwrap();

        let list = store.list("lexical-relation").unwrap();
        let lrt = store
            .create(ObjectKind::LexRefType, Some((list, OwningField::Possibilities)), None)
            .unwrap();
        let lr = store
            .create(ObjectKind::LexReference, Some((lrt, OwningField::Members)), None)
            .unwrap();
        store.get_mut::<LexReferenceData>(lr).unwrap().targets = vec![cat, dog];

        store.delete(cat).unwrap();
        assert!(!store.contains(cat));
        assert!(!store.contains(cat_sense));
        assert!(!store.contains(example));
        assert_eq!(store.get::<LexReferenceData>(lr).unwrap().targets, vec![dog]);
        assert_eq!(store.all_of_kind(ObjectKind::Entry), vec![dog]);
    }

    #[test]
    fn test_delete_detaches_from_owner() {
        let mut store = MemoryStore::new();
        let (entry, sense) = entry_with_sense(&mut store, "bank");
        let msa = store
            .create(ObjectKind::Msa, Some((entry, OwningField::Msas)), None)
            .unwrap();
        store.get_mut::<SenseData>(sense).unwrap().msa = Some(msa);
        store.delete(msa).unwrap();
        assert!(store.owned(entry, OwningField::Msas).is_empty());
        assert_eq!(store.get::<SenseData>(sense).unwrap().msa, None);
        assert!(matches!(
            store.delete(msa),
            Err(LiftError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_typed_access_reports_wrong_kind() {
        let mut store = MemoryStore::new();
        let (entry, sense) = entry_with_sense(&mut store, "cat");
        assert!(store.get::<SenseData>(entry).is_none());
        assert!(matches!(
            store.expect_data::<EntryData>(sense),
            Err(LiftError::WrongKind { .. })
        ));
        assert_eq!(store.owning_entry(sense), Some(entry));
        assert_eq!(store.headword(sense), "cat");
    }

    #[test]
    fn test_list_is_found_or_created_once() {
        let mut store = MemoryStore::new();
        let first = store.list("grammatical-info").unwrap();
        let second = store.list("grammatical-info").unwrap();
        let other = store.list("semantic-domain-ddp4").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_senses_of_entry_includes_subsenses() {
        let mut store = MemoryStore::new();
        let (entry, sense) = entry_with_sense(&mut store, "run");
        let sub = store
            .create(ObjectKind::Sense, Some((sense, OwningField::Subsenses)), None)
            .unwrap();
        let second = store
            .create(ObjectKind::Sense, Some((entry, OwningField::Senses)), None)
            .unwrap();
        assert_eq!(store.senses_of_entry(entry), vec![sense, sub, second]);
        assert_eq!(store.owning_entry(sub), Some(entry));
    }

    #[test]
    fn test_mapping_kind_codes() {
        assert_eq!(MappingKind::from_code(0).unwrap(), MappingKind::Collection);
        assert_eq!(MappingKind::from_code(6).unwrap(), MappingKind::Tree);
        assert_eq!(MappingKind::from_code(13).unwrap(), MappingKind::AsymmetricPair);
        assert_eq!("sequence".parse::<MappingKind>().unwrap(), MappingKind::Sequence);
        assert!(matches!(
            MappingKind::from_code(42),
            Err(LiftError::MalformedEnum { .. })
        ));
    }
}
