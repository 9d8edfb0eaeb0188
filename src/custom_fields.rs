//! Custom field definitions declared in the LIFT header.
//!
//! A definition's machine-readable part is a `;`-separated `Key=Value` string
//! such as `Class=LexEntry; Type=MultiUnicode; WsSelector=kwsVern`. A field
//! that already exists with an incompatible type is refused; values for it
//! are kept as residue instead.

use crate::error::{LiftError, Result};
use crate::models::LiftFieldDefinition;
use crate::store::ObjectKind;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Language tag under which the type string is written.
pub const SPEC_TAG: &str = "qaa-x-spec";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Boolean,
    Integer,
    Numeric,
    Float,
    Time,
    Guid,
    Image,
    GenDate,
    Binary,
    String,
    MultiString,
    Unicode,
    MultiUnicode,
    OwningAtomic,
    ReferenceAtomic,
    OwningCollection,
    ReferenceCollection,
    OwningSequence,
    ReferenceSequence,
}

impl FieldType {
    /// Answers whether a field of `self` can receive values declared as `other`.
    pub fn compatible_with(self, other: FieldType) -> bool {
        use FieldType::*;
        if self == other {
            return true;
        }
        matches!(
            (self, other),
            (Binary, Image)
                | (Image, Binary)
                | (OwningCollection, OwningSequence)
                | (OwningSequence, OwningCollection)
                | (ReferenceCollection, ReferenceSequence)
                | (ReferenceSequence, ReferenceCollection)
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for FieldType {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let name = trimmed.strip_prefix("kcpt").unwrap_or(trimmed);
        let field_type = match name.to_ascii_lowercase().as_str() {
            "boolean" => FieldType::Boolean,
            "integer" => FieldType::Integer,
            "numeric" => FieldType::Numeric,
            "float" => FieldType::Float,
            "time" => FieldType::Time,
            "guid" => FieldType::Guid,
            "image" => FieldType::Image,
            "gendate" => FieldType::GenDate,
            "binary" => FieldType::Binary,
            "string" => FieldType::String,
            "multistring" => FieldType::MultiString,
            "unicode" => FieldType::Unicode,
            "multiunicode" => FieldType::MultiUnicode,
            "owningatom" | "owningatomic" => FieldType::OwningAtomic,
            "referenceatom" | "referenceatomic" => FieldType::ReferenceAtomic,
            "owningcollection" => FieldType::OwningCollection,
            "referencecollection" => FieldType::ReferenceCollection,
            "owningsequence" => FieldType::OwningSequence,
            "referencesequence" => FieldType::ReferenceSequence,
            _ => {
                return Err(LiftError::MalformedEnum {
                    kind: "custom field type".to_string(),
                    value: trimmed.to_string(),
                });
            }
        };
        Ok(field_type)
    }
}

/// Parsed form of a definition's type string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub class: String,
    pub field_type: FieldType,
    pub ws_selector: Option<String>,
    pub dst_class: Option<String>,
    pub list_root: Option<String>,
}

impl FieldSpec {
    /// Parses `Key=Value; Key=Value`. A missing `Type` defaults to MultiUnicode
    /// and a missing `Class` to LexEntry; an unknown `Type` is fatal.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut result = FieldSpec {
            class: "LexEntry".to_string(),
            field_type: FieldType::MultiUnicode,
            ws_selector: None,
            dst_class: None,
            list_root: None,
        };
        for part in spec.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Class" => result.class = value.to_string(),
                "Type" => result.field_type = value.parse()?,
                "WsSelector" => result.ws_selector = Some(value.to_string()),
                "DstCls" => result.dst_class = Some(value.to_string()),
                "range" => result.list_root = Some(value.to_string()),
                other => debug!("Ignoring custom field spec key '{}'", other),
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldDef {
    pub class: String,
    pub name: String,
    pub spec: FieldSpec,
    pub description: String,
}

/// What happened when a header definition was registered.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Created,
    Existing,
    Refused { existing: FieldType, incoming: FieldType },
}

/// Registry of custom fields, keyed by owning class and field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomFields {
    defs: BTreeMap<String, CustomFieldDef>,
    /// Fields refused during the current run. Not persisted.
    #[serde(skip)]
    refused: BTreeSet<String>,
}

fn key(class: &str, name: &str) -> String {
    format!("{}/{}", class, name)
}

/// The class name custom fields use for objects of `kind`.
pub fn class_name(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Entry => "LexEntry",
        ObjectKind::Sense => "LexSense",
        ObjectKind::Example => "LexExampleSentence",
        ObjectKind::Pronunciation => "LexPronunciation",
        ObjectKind::Allomorph => "MoForm",
        ObjectKind::Etymology => "LexEtymology",
        ObjectKind::Msa => "MoMorphSynAnalysis",
        ObjectKind::EntryRef => "LexEntryRef",
        ObjectKind::LexRefType => "LexRefType",
        ObjectKind::LexReference => "LexReference",
        ObjectKind::PossibilityList => "CmPossibilityList",
        ObjectKind::Possibility => "CmPossibility",
        ObjectKind::WordformAnalysis => "WfiAnalysis",
    }
}

impl CustomFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CustomFieldDef> {
        self.defs.values()
    }

    pub fn insert(&mut self, def: CustomFieldDef) {
        self.defs.insert(key(&def.class, &def.name), def);
    }

    /// A usable (not refused) definition for `name` on `class`.
    pub fn find(&self, class: &str, name: &str) -> Option<&CustomFieldDef> {
        let k = key(class, name);
        if self.refused.contains(&k) {
            return None;
        }
        self.defs.get(&k)
    }

    pub fn is_refused(&self, class: &str, name: &str) -> bool {
        self.refused.contains(&key(class, name))
    }

    pub fn clear_refused(&mut self) {
        self.refused.clear();
    }

    /// Registers a header definition, or checks it against the existing one.
    pub fn register(&mut self, definition: &LiftFieldDefinition) -> Result<(CustomFieldDef, Registration)> {
        let spec_text = spec_text(definition);
        let spec = match spec_text {
            Some(text) => FieldSpec::parse(text)?,
            None => FieldSpec::parse("")?,
        };
        let description = definition
            .forms
            .iter()
            .find(|f| f.lang != SPEC_TAG && !f.text.starts_with("Type=kcpt"))
            .map(|f| f.text.clone())
            .unwrap_or_default();
        let k = key(&spec.class, &definition.tag);

        if let Some(existing) = self.defs.get(&k) {
            let existing_type = existing.spec.field_type;
            if !existing_type.compatible_with(spec.field_type) {
                warn!(
                    "Refusing custom field '{}' on {}: existing type {} is incompatible with {}",
                    definition.tag, spec.class, existing_type, spec.field_type
                );
                self.refused.insert(k);
                let def = existing.clone();
                return Ok((
                    def,
                    Registration::Refused {
                        existing: existing_type,
                        incoming: spec.field_type,
                    },
                ));
            }
            return Ok((existing.clone(), Registration::Existing));
        }

        let def = CustomFieldDef {
            class: spec.class.clone(),
            name: definition.tag.clone(),
            spec,
            description,
        };
        debug!("Created custom field '{}' on {}", def.name, def.class);
        self.defs.insert(k, def.clone());
        Ok((def, Registration::Created))
    }
}

/// The type string of a definition: the `qaa-x-spec` form, or an older
/// description that starts with `Type=kcpt`.
fn spec_text(definition: &LiftFieldDefinition) -> Option<&str> {
    definition
        .forms
        .iter()
        .find(|f| f.lang == SPEC_TAG)
        .or_else(|| {
            definition
                .forms
                .iter()
                .find(|f| f.lang == "en" && f.text.starts_with("Type=kcpt"))
        })
        .map(|f| f.text.as_str())
}
