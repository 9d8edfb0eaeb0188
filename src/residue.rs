//! Preservation of input the schema has no place for.
//!
//! Each object that receives unrecognized content gets one residue document
//! for the run: `<lift-residue id="...">fragment fragment ...</lift-residue>`.
//! Documents are written to the objects when the import finishes, replacing
//! whatever residue the object carried before.

use crate::error::{LiftError, Result};
use crate::models::{LiftField, LiftForm, LiftNote, LiftRelation, LiftTrait};
use crate::parse::format_lift_date;
use crate::store::{Guid, LexiconStore};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::fmt::Write as _;

const RESIDUE_OPEN: &str = "<lift-residue";
const RESIDUE_CLOSE: &str = "</lift-residue>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidueDocument {
    pub id: Option<String>,
    pub fragments: Vec<String>,
}

impl ResidueDocument {
    pub fn to_xml(&self) -> String {
        let mut xml = String::from(RESIDUE_OPEN);
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            let _ = write!(xml, " id=\"{}\"", escape(id));
        }
        xml.push('>');
        for fragment in &self.fragments {
            xml.push_str(fragment);
        }
        xml.push_str(RESIDUE_CLOSE);
        xml
    }

    /// Parses a stored residue document. Each top-level child element, plus
    /// any whitespace that follows it, becomes one fragment, byte for byte.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut document = ResidueDocument::default();
        let mut depth = 0usize;
        let mut fragment_start = 0usize;
        let mut after_fragment = false;

        loop {
            let before = reader.buffer_position() as usize;
            let event = reader.read_event()?;
            let after = reader.buffer_position() as usize;
            match event {
                Event::Start(e) => {
                    if depth == 0 {
                        document.id = read_id(&e)?;
                    } else if depth == 1 {
                        fragment_start = before;
                    }
                    after_fragment = false;
                    depth += 1;
                }
                Event::Empty(e) => {
                    if depth == 0 {
                        document.id = read_id(&e)?;
                        break;
                    }
                    if depth == 1 {
                        document.fragments.push(xml[before..after].to_string());
                        after_fragment = true;
                    }
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth == 1 {
                        document.fragments.push(xml[fragment_start..after].to_string());
                        after_fragment = true;
                    } else if depth == 0 {
                        break;
                    }
                }
                Event::Text(_) if depth == 1 && after_fragment => {
                    if let Some(last) = document.fragments.last_mut() {
                        last.push_str(&xml[before..after]);
                    }
                }
                Event::Eof => {
                    if depth > 0 {
                        return Err(LiftError::ParseError(
                            "unterminated lift-residue element".to_string(),
                        ));
                    }
                    break;
                }
                _ => {}
            }
        }
        Ok(document)
    }
}

fn read_id(element: &quick_xml::events::BytesStart<'_>) -> Result<Option<String>> {
    let attribute = element
        .try_get_attribute("id")
        .map_err(quick_xml::Error::from)?;
    match attribute {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Moves a `<lift-residue>` block out of legacy import residue text.
/// Returns the extracted block, if there was one.
pub fn take_legacy_residue(import_residue: &mut String) -> Option<String> {
    let start = import_residue.find(RESIDUE_OPEN)?;
    let end = import_residue[start..]
        .find(RESIDUE_CLOSE)
        .map(|i| start + i + RESIDUE_CLOSE.len())
        .unwrap_or(import_residue.len());
    let block = import_residue[start..end].to_string();
    import_residue.replace_range(start..end, "");
    Some(block)
}

/// Run-scoped residue documents, keyed by object.
#[derive(Debug, Default)]
pub struct ResidueStore {
    documents: HashMap<Guid, ResidueDocument>,
    order: Vec<Guid>,
}

impl ResidueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The document for `guid`, created on first touch. Creating it migrates
    /// any residue block left in the legacy import-residue text.
    fn document<S: LexiconStore>(
        &mut self,
        store: &mut S,
        guid: Guid,
        id: Option<&str>,
    ) -> Result<&mut ResidueDocument> {
        if !self.documents.contains_key(&guid) {
            let mut document = ResidueDocument {
                id: id.map(str::to_string),
                fragments: Vec::new(),
            };
            let legacy = store
                .find_mut(guid)
                .and_then(|o| o.data.import_residue_mut())
                .and_then(take_legacy_residue);
            if let Some(block) = legacy {
                debug!("Migrating legacy residue of {}", guid);
                let old = ResidueDocument::parse(&block)?;
                document.fragments = old.fragments;
                if document.id.is_none() {
                    document.id = old.id;
                }
            }
            self.documents.insert(guid, document);
            self.order.push(guid);
        }
        let document = self
            .documents
            .get_mut(&guid)
            .ok_or_else(|| LiftError::Internal("residue document vanished".to_string()))?;
        if let Some(id) = id {
            if document.id.as_deref().is_none_or(str::is_empty) {
                document.id = Some(id.to_string());
            }
        }
        Ok(document)
    }

    /// Records the interchange id of an object without adding content.
    pub fn set_id<S: LexiconStore>(&mut self, store: &mut S, guid: Guid, id: &str) -> Result<()> {
        if !has_residue_slot(store, guid) {
            return Ok(());
        }
        self.document(store, guid, Some(id))?;
        Ok(())
    }

    /// Appends one fragment to the object's residue. Objects without a
    /// residue slot drop the content with a trace message.
    pub fn attach<S: LexiconStore>(&mut self, store: &mut S, guid: Guid, fragment: String) -> Result<()> {
        if fragment.is_empty() {
            return Ok(());
        }
        if !has_residue_slot(store, guid) {
            trace!("No residue slot on {}; dropping {}", guid, fragment);
            return Ok(());
        }
        self.document(store, guid, None)?.fragments.push(fragment);
        Ok(())
    }

    /// Fragments currently held for `guid`: the in-run document if there is
    /// one, otherwise the residue persisted on the object.
    pub fn extract<S: LexiconStore>(&self, store: &S, guid: Guid) -> Result<Vec<String>> {
        if let Some(document) = self.documents.get(&guid) {
            return Ok(document.fragments.clone());
        }
        match store.find(guid).and_then(|o| o.data.lift_residue()) {
            Some(xml) if !xml.is_empty() => Ok(ResidueDocument::parse(xml)?.fragments),
            _ => Ok(Vec::new()),
        }
    }

    /// Serializes every document onto its object. Returns the number written.
    pub fn write_all<S: LexiconStore>(&mut self, store: &mut S) -> usize {
        let mut written = 0;
        for guid in self.order.drain(..) {
            let Some(document) = self.documents.remove(&guid) else {
                continue;
            };
            if document.fragments.is_empty() && document.id.is_none() {
                continue;
            }
            if let Some(slot) = store.find_mut(guid).and_then(|o| o.data.lift_residue_mut()) {
                *slot = Some(document.to_xml());
                written += 1;
            }
        }
        written
    }
}

fn has_residue_slot<S: LexiconStore>(store: &mut S, guid: Guid) -> bool {
    store
        .find_mut(guid)
        .is_some_and(|o| o.data.lift_residue_mut().is_some())
}

// --- Fragment builders ---

fn push_date_attributes(xml: &mut String, created: Option<&str>, modified: Option<&str>) {
    if let Some(created) = created {
        let _ = write!(xml, " dateCreated=\"{}\"", escape(created));
    }
    if let Some(modified) = modified {
        let _ = write!(xml, " dateModified=\"{}\"", escape(modified));
    }
}

/// `<{tag} lang="..."><text>...</text></{tag}>` per alternative, one per line.
pub fn forms_xml(tag: &str, forms: &[LiftForm]) -> String {
    let mut xml = String::new();
    for form in forms {
        let _ = writeln!(
            xml,
            "<{0} lang=\"{1}\"><text>{2}</text></{0}>",
            tag,
            escape(&form.lang),
            partial_escape(&form.text)
        );
    }
    xml
}

pub fn trait_xml(item: &LiftTrait) -> String {
    let mut xml = format!(
        "<trait name=\"{}\" value=\"{}\"",
        escape(&item.name),
        escape(&item.value)
    );
    if let Some(id) = &item.id {
        let _ = write!(xml, " id=\"{}\"", escape(id));
    }
    xml.push_str("/>\n");
    xml
}

pub fn field_xml(field: &LiftField) -> String {
    let mut xml = format!("<field type=\"{}\"", escape(&field.field_type));
    push_date_attributes(
        &mut xml,
        field.date_created.as_deref(),
        field.date_modified.as_deref(),
    );
    xml.push_str(">\n");
    xml.push_str(&forms_xml("form", &field.forms));
    for item in &field.traits {
        xml.push_str(&trait_xml(item));
    }
    xml.push_str("</field>\n");
    xml
}

pub fn note_xml(note: &LiftNote) -> String {
    let mut xml = String::from("<note");
    if let Some(note_type) = &note.note_type {
        let _ = write!(xml, " type=\"{}\"", escape(note_type));
    }
    xml.push_str(">\n");
    xml.push_str(&forms_xml("form", &note.forms));
    xml.push_str("</note>\n");
    xml
}

/// A relation that could not be stored as an association.
pub fn relation_xml(relation: &LiftRelation) -> String {
    let mut xml = format!(
        "<relation type=\"{}\" ref=\"{}\"",
        escape(&relation.relation_type),
        escape(&relation.target)
    );
    if let Some(order) = relation.order {
        let _ = write!(xml, " order=\"{}\"", order);
    }
    push_date_attributes(
        &mut xml,
        relation.date_created.as_deref(),
        relation.date_modified.as_deref(),
    );
    let content = relation_content_xml(relation);
    if content.is_empty() {
        xml.push_str("/>\n");
        return xml;
    }
    xml.push_str(">\n");
    xml.push_str(&content);
    xml.push_str("</relation>\n");
    xml
}

/// The children of a relation element: usage, fields and traits.
pub fn relation_content_xml(relation: &LiftRelation) -> String {
    let mut xml = String::new();
    if let Some(usage) = &relation.usage {
        xml.push_str("<usage>\n");
        xml.push_str(&forms_xml("form", &usage.forms));
        xml.push_str("</usage>\n");
    }
    for field in &relation.fields {
        xml.push_str(&field_xml(field));
    }
    for item in &relation.traits {
        xml.push_str(&trait_xml(item));
    }
    xml
}

/// Residue stored on an association: the relation's dates plus any content
/// the relation carried.
pub fn association_residue(
    created: Option<&DateTime<Utc>>,
    modified: Option<&DateTime<Utc>>,
    content: Option<&str>,
) -> Option<String> {
    if created.is_none() && modified.is_none() && content.is_none_or(str::is_empty) {
        return None;
    }
    let created = created.map(format_lift_date);
    let modified = modified.map(format_lift_date);
    let mut xml = String::from(RESIDUE_OPEN);
    push_date_attributes(&mut xml, created.as_deref(), modified.as_deref());
    xml.push_str(">\n");
    xml.push_str(content.unwrap_or_default());
    xml.push_str(RESIDUE_CLOSE);
    Some(xml)
}
