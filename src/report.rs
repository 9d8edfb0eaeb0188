//! Per-run summary of what an import did and what it could not do.

use crate::store::{Guid, ObjectKind};
use crate::custom_fields::FieldType;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// KeepOld kept an existing value that differs from the incoming one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub object: Guid,
    pub object_kind: ObjectKind,
    pub field: String,
    pub writing_system: String,
    pub kept: String,
    pub rejected: String,
}

/// A value that could not be interpreted, such as an unparsable date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidData {
    pub object: Option<Guid>,
    pub field: String,
    pub value: String,
    pub message: String,
}

/// A relation whose target or owner could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRelation {
    pub source: Guid,
    pub relation_type: String,
    pub target: String,
    pub message: String,
}

/// Two overlapping but non-nested sets were combined into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedCollection {
    pub owner: Guid,
    pub type_name: String,
    pub combined_item: String,
    pub headword: String,
}

/// A component reference that named no known entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingComponent {
    pub entry: Guid,
    pub headword: String,
    pub target: String,
}

/// A header field definition that conflicts with an existing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefusedField {
    pub class: String,
    pub name: String,
    pub existing: FieldType,
    pub incoming: FieldType,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub entries_created: usize,
    pub entries_deleted: usize,
    pub senses_created: usize,
    pub objects_deleted: usize,
    pub conflicts: Vec<MergeConflict>,
    pub invalid_data: Vec<InvalidData>,
    pub invalid_relations: Vec<InvalidRelation>,
    pub combined_collections: Vec<CombinedCollection>,
    pub missing_components: Vec<MissingComponent>,
    pub refused_fields: Vec<RefusedField>,
    pub cancelled: bool,
    pub elapsed: Duration,
    reported_conflicts: HashSet<(String, String, String, Guid)>,
}

impl ImportReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a conflict unless the same (new, old, field, object) was already reported.
    pub fn add_conflict(&mut self, conflict: MergeConflict) -> bool {
        let key = (
            conflict.rejected.clone(),
            conflict.kept.clone(),
            conflict.field.clone(),
            conflict.object,
        );
        if !self.reported_conflicts.insert(key) {
            return false;
        }
        self.conflicts.push(conflict);
        true
    }

    pub fn add_invalid_data(&mut self, object: Option<Guid>, field: &str, value: &str, message: impl Into<String>) {
        self.invalid_data.push(InvalidData {
            object,
            field: field.to_string(),
            value: value.to_string(),
            message: message.into(),
        });
    }

    pub fn add_invalid_relation(&mut self, source: Guid, relation_type: &str, target: &str, message: impl Into<String>) {
        self.invalid_relations.push(InvalidRelation {
            source,
            relation_type: relation_type.to_string(),
            target: target.to_string(),
            message: message.into(),
        });
    }

    pub fn problem_count(&self) -> usize {
        self.conflicts.len()
            + self.invalid_data.len()
            + self.invalid_relations.len()
            + self.combined_collections.len()
            + self.missing_components.len()
            + self.refused_fields.len()
    }

    pub fn has_problems(&self) -> bool {
        self.problem_count() > 0
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Entries: {} created, {} deleted; senses created: {}; other objects deleted: {}",
            self.entries_created, self.entries_deleted, self.senses_created, self.objects_deleted
        )?;
        if self.cancelled {
            writeln!(f, "Import was cancelled before all phases ran.")?;
        }
        writeln!(f, "Elapsed: {:.2?}", self.elapsed)?;

        if !self.conflicts.is_empty() {
            writeln!(f, "\nConflicting values (existing value kept):")?;
            for c in &self.conflicts {
                writeln!(
                    f,
                    "  {} {} {} [{}]: kept '{}', ignored '{}'",
                    c.object_kind, c.object, c.field, c.writing_system, c.kept, c.rejected
                )?;
            }
        }
        if !self.invalid_data.is_empty() {
            writeln!(f, "\nInvalid data:")?;
            for d in &self.invalid_data {
                match d.object {
                    Some(object) => writeln!(f, "  {} {} = '{}': {}", object, d.field, d.value, d.message)?,
                    None => writeln!(f, "  {} = '{}': {}", d.field, d.value, d.message)?,
                }
            }
        }
        if !self.invalid_relations.is_empty() {
            writeln!(f, "\nUnresolved relations:")?;
            for r in &self.invalid_relations {
                writeln!(f, "  {} {} -> '{}': {}", r.source, r.relation_type, r.target, r.message)?;
            }
        }
        if !self.combined_collections.is_empty() {
            writeln!(f, "\nCombined overlapping sets:")?;
            for c in &self.combined_collections {
                writeln!(
                    f,
                    "  {} ({}): '{}' was merged into the set of '{}'",
                    c.type_name, c.owner, c.combined_item, c.headword
                )?;
            }
        }
        if !self.missing_components.is_empty() {
            writeln!(f, "\nMissing components:")?;
            for m in &self.missing_components {
                writeln!(f, "  {}: no entry for '{}'", m.headword, m.target)?;
            }
        }
        if !self.refused_fields.is_empty() {
            writeln!(f, "\nRefused custom fields:")?;
            for r in &self.refused_fields {
                writeln!(
                    f,
                    "  {}.{}: existing type {} cannot hold {}",
                    r.class, r.name, r.existing, r.incoming
                )?;
            }
        }
        Ok(())
    }
}
