use serde::{Deserialize, Serialize};

// --- Document ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "lift")]
pub struct LiftDocument {
    #[serde(rename = "@version", default)]
    pub version: Option<String>,
    #[serde(rename = "@producer", default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub header: Option<LiftHeader>,
    #[serde(rename = "entry", default)]
    pub entries: Vec<LiftEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftHeader {
    #[serde(default)]
    pub description: Option<LiftMultiText>,
    #[serde(default)]
    pub ranges: Option<LiftRanges>,
    #[serde(default)]
    pub fields: Option<LiftFieldDefinitions>,
}

/// `<ranges>` inside the header, or the root of a `.lift-ranges` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftRanges {
    #[serde(rename = "range", default)]
    pub ranges: Vec<LiftRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftRange {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@href", default)]
    pub href: Option<String>,
    #[serde(rename = "range-element", default)]
    pub elements: Vec<LiftRangeElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftRangeElement {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@guid", default)]
    pub guid: Option<String>,
    #[serde(rename = "@parent", default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub label: Option<LiftMultiText>,
    #[serde(default)]
    pub abbrev: Option<LiftMultiText>,
    #[serde(default)]
    pub description: Option<LiftMultiText>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftFieldDefinitions {
    #[serde(rename = "field", default)]
    pub fields: Vec<LiftFieldDefinition>,
}

/// Header declaration of a custom field. The forms carry a human description
/// plus, under the `qaa-x-spec` tag, the machine-readable type string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftFieldDefinition {
    #[serde(rename = "@tag")]
    pub tag: String,
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
}

// --- Text ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiftForm {
    #[serde(rename = "@lang")]
    pub lang: String,
    #[serde(default)]
    pub text: String,
}

impl LiftForm {
    pub fn new(lang: &str, text: &str) -> Self {
        LiftForm {
            lang: lang.to_string(),
            text: text.to_string(),
        }
    }
}

/// Any element whose content is a list of `<form>` children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiftMultiText {
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
}

impl LiftMultiText {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        LiftMultiText {
            forms: pairs.iter().map(|(l, t)| LiftForm::new(l, t)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.forms.iter().all(|f| f.text.is_empty())
    }

    /// First non-empty alternative, used for labels in reports.
    pub fn first_text(&self) -> Option<&str> {
        self.forms
            .iter()
            .map(|f| f.text.as_str())
            .find(|t| !t.is_empty())
    }

    pub fn get(&self, lang: &str) -> Option<&str> {
        self.forms
            .iter()
            .find(|f| f.lang == lang)
            .map(|f| f.text.as_str())
    }
}

// --- Extensible content ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftTrait {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@value")]
    pub value: String,
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
}

impl LiftTrait {
    pub fn new(name: &str, value: &str) -> Self {
        LiftTrait {
            name: name.to_string(),
            value: value.to_string(),
            id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftField {
    #[serde(rename = "@type")]
    pub field_type: String,
    #[serde(rename = "@dateCreated", default)]
    pub date_created: Option<String>,
    #[serde(rename = "@dateModified", default)]
    pub date_modified: Option<String>,
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftNote {
    #[serde(rename = "@type", default)]
    pub note_type: Option<String>,
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftUrlRef {
    #[serde(rename = "@href")]
    pub href: String,
    #[serde(default)]
    pub label: Option<LiftMultiText>,
}

// --- Relations ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftRelation {
    #[serde(rename = "@type")]
    pub relation_type: String,
    #[serde(rename = "@ref", default)]
    pub target: String,
    #[serde(rename = "@order", default)]
    pub order: Option<i32>,
    #[serde(rename = "@dateCreated", default)]
    pub date_created: Option<String>,
    #[serde(rename = "@dateModified", default)]
    pub date_modified: Option<String>,
    #[serde(default)]
    pub usage: Option<LiftMultiText>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
    #[serde(rename = "field", default)]
    pub fields: Vec<LiftField>,
}

impl LiftRelation {
    pub fn new(relation_type: &str, target: &str) -> Self {
        LiftRelation {
            relation_type: relation_type.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }
}

// --- Entry ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftEntry {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(rename = "@guid", default)]
    pub guid: Option<String>,
    #[serde(rename = "@order", default)]
    pub order: Option<i32>,
    #[serde(rename = "@dateCreated", default)]
    pub date_created: Option<String>,
    #[serde(rename = "@dateModified", default)]
    pub date_modified: Option<String>,
    #[serde(rename = "@dateDeleted", default)]
    pub date_deleted: Option<String>,
    #[serde(rename = "lexical-unit", default)]
    pub lexical_unit: Option<LiftMultiText>,
    #[serde(default)]
    pub citation: Option<LiftMultiText>,
    #[serde(rename = "pronunciation", default)]
    pub pronunciations: Vec<LiftPronunciation>,
    #[serde(rename = "variant", default)]
    pub variants: Vec<LiftVariant>,
    #[serde(rename = "sense", default)]
    pub senses: Vec<LiftSense>,
    #[serde(rename = "note", default)]
    pub notes: Vec<LiftNote>,
    #[serde(rename = "relation", default)]
    pub relations: Vec<LiftRelation>,
    #[serde(rename = "etymology", default)]
    pub etymologies: Vec<LiftEtymology>,
    #[serde(rename = "field", default)]
    pub fields: Vec<LiftField>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
    /// Nested records some producers emit for subentries.
    #[serde(rename = "entry", default)]
    pub subentries: Vec<LiftEntry>,
}

impl LiftEntry {
    pub fn new(id: &str) -> Self {
        LiftEntry {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftSense {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(rename = "@order", default)]
    pub order: Option<i32>,
    #[serde(rename = "@dateCreated", default)]
    pub date_created: Option<String>,
    #[serde(rename = "@dateModified", default)]
    pub date_modified: Option<String>,
    #[serde(rename = "grammatical-info", default)]
    pub grammatical_info: Option<LiftGrammaticalInfo>,
    #[serde(rename = "gloss", default)]
    pub glosses: Vec<LiftForm>,
    #[serde(default)]
    pub definition: Option<LiftMultiText>,
    #[serde(rename = "relation", default)]
    pub relations: Vec<LiftRelation>,
    #[serde(rename = "note", default)]
    pub notes: Vec<LiftNote>,
    #[serde(rename = "example", default)]
    pub examples: Vec<LiftExample>,
    #[serde(rename = "subsense", default)]
    pub subsenses: Vec<LiftSense>,
    #[serde(rename = "illustration", default)]
    pub illustrations: Vec<LiftUrlRef>,
    #[serde(rename = "field", default)]
    pub fields: Vec<LiftField>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftGrammaticalInfo {
    #[serde(rename = "@value")]
    pub value: String,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftExample {
    #[serde(rename = "@source", default)]
    pub source: Option<String>,
    #[serde(rename = "@dateCreated", default)]
    pub date_created: Option<String>,
    #[serde(rename = "@dateModified", default)]
    pub date_modified: Option<String>,
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
    #[serde(rename = "translation", default)]
    pub translations: Vec<LiftTranslation>,
    #[serde(rename = "note", default)]
    pub notes: Vec<LiftNote>,
    #[serde(rename = "field", default)]
    pub fields: Vec<LiftField>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftTranslation {
    #[serde(rename = "@type", default)]
    pub translation_type: Option<String>,
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftPronunciation {
    #[serde(rename = "@dateCreated", default)]
    pub date_created: Option<String>,
    #[serde(rename = "@dateModified", default)]
    pub date_modified: Option<String>,
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
    #[serde(rename = "media", default)]
    pub media: Vec<LiftUrlRef>,
    #[serde(rename = "field", default)]
    pub fields: Vec<LiftField>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
}

/// An alternate form of the lexeme (allomorph).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftVariant {
    #[serde(rename = "@ref", default)]
    pub reference: Option<String>,
    #[serde(rename = "@dateCreated", default)]
    pub date_created: Option<String>,
    #[serde(rename = "@dateModified", default)]
    pub date_modified: Option<String>,
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
    #[serde(rename = "pronunciation", default)]
    pub pronunciations: Vec<LiftPronunciation>,
    #[serde(rename = "relation", default)]
    pub relations: Vec<LiftRelation>,
    #[serde(rename = "field", default)]
    pub fields: Vec<LiftField>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiftEtymology {
    #[serde(rename = "@type", default)]
    pub etymology_type: Option<String>,
    #[serde(rename = "@source", default)]
    pub source: Option<String>,
    #[serde(rename = "form", default)]
    pub forms: Vec<LiftForm>,
    #[serde(rename = "gloss", default)]
    pub glosses: Vec<LiftForm>,
    #[serde(rename = "field", default)]
    pub fields: Vec<LiftField>,
    #[serde(rename = "trait", default)]
    pub traits: Vec<LiftTrait>,
}
