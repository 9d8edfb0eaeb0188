//! Lookup of controlled-vocabulary items (parts of speech, semantic domains,
//! entry types and the like) by guid, id, label or abbreviation.

use crate::error::Result;
use crate::merge::fold;
use crate::store::{Guid, LexiconStore, ObjectKind, OwningField, PossibilityData};
use crate::writing_systems::{DEFAULT_ANALYSIS_TAG, IncomingText, WritingSystemRegistry};
use log::debug;
use std::collections::HashMap;

/// A range element or trait value to be located in a list.
#[derive(Debug, Clone, Default)]
pub struct PossibilityItem<'a> {
    pub id: &'a str,
    pub guid: Option<Guid>,
    pub parent: Option<&'a str>,
    pub label: Vec<IncomingText>,
    pub abbrev: Vec<IncomingText>,
}

impl<'a> PossibilityItem<'a> {
    pub fn named(id: &'a str) -> Self {
        PossibilityItem {
            id,
            ..Default::default()
        }
    }
}

/// Caches one lookup table per list, built on first use.
#[derive(Debug, Default)]
pub struct PossibilityResolver {
    indexes: HashMap<Guid, HashMap<String, Guid>>,
}

impl PossibilityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(index: &mut HashMap<String, Guid>, guid: Guid, data: &PossibilityData) {
        if let Some(id) = &data.lift_id {
            index.entry(fold(id)).or_insert(guid);
        }
        for (ws, name) in &data.name {
            index.entry(fold(name)).or_insert(guid);
            if let Some(abbr) = data.abbreviation.get(ws) {
                index.entry(fold(&format!("{} {}", abbr, name))).or_insert(guid);
            }
        }
        for abbr in data.abbreviation.values() {
            index.entry(fold(abbr)).or_insert(guid);
        }
    }

    fn build_index<S: LexiconStore>(store: &S, list: Guid) -> HashMap<String, Guid> {
        let mut index = HashMap::new();
        let mut stack: Vec<Guid> = store.owned(list, OwningField::Possibilities).to_vec();
        while let Some(guid) = stack.pop() {
            if let Some(data) = store.get::<PossibilityData>(guid) {
                Self::register(&mut index, guid, data);
            }
            stack.extend(store.owned(guid, OwningField::SubPossibilities).iter().copied());
        }
        index
    }

    /// Finds a live possibility in `list` whose id, name or abbreviation matches `label`.
    pub fn find<S: LexiconStore>(&mut self, store: &S, list: Guid, label: &str) -> Option<Guid> {
        let index = self
            .indexes
            .entry(list)
            .or_insert_with(|| Self::build_index(store, list));
        index.get(&fold(label)).copied().filter(|g| store.contains(*g))
    }

    /// Locates `item` in `list`, creating it (and a placeholder parent) if absent.
    /// Returns the possibility and whether it was created.
    pub fn find_or_create<S: LexiconStore>(
        &mut self,
        store: &mut S,
        list: Guid,
        item: &PossibilityItem<'_>,
    ) -> Result<(Guid, bool)> {
        if let Some(guid) = item.guid {
            if store.kind_of(guid) == Some(ObjectKind::Possibility) {
                self.remember(store, list, guid);
                return Ok((guid, false));
            }
        }
        if let Some(guid) = self.find(store, list, item.id) {
            return Ok((guid, false));
        }
        for text in item.label.iter().chain(item.abbrev.iter()) {
            if let Some(guid) = self.find(store, list, &text.text) {
                return Ok((guid, false));
            }
        }

        let owner = match item.parent.filter(|p| !p.is_empty()) {
            Some(parent) => {
                let (parent_guid, _) = self.find_or_create(store, list, &PossibilityItem::named(parent))?;
                (parent_guid, OwningField::SubPossibilities)
            }
            None => (list, OwningField::Possibilities),
        };
        let explicit = item.guid.filter(|g| !store.contains(*g));
        let guid = store.create(ObjectKind::Possibility, Some(owner), explicit)?;

        let default_ws = store.writing_systems_mut().resolve_or_create(DEFAULT_ANALYSIS_TAG);
        let data = store.expect_data_mut::<PossibilityData>(guid)?;
        data.lift_id = Some(item.id.to_string());
        for text in item.label.iter().filter(|t| !t.text.is_empty()) {
            data.name.insert(text.ws, text.text.clone());
        }
        for text in item.abbrev.iter().filter(|t| !t.text.is_empty()) {
            data.abbreviation.insert(text.ws, text.text.clone());
        }
        if data.name.is_empty() {
            data.name.insert(default_ws, item.id.to_string());
        }
        debug!("Created possibility '{}' ({})", item.id, guid);
        self.remember(store, list, guid);
        Ok((guid, true))
    }

    /// Adds (or refreshes) the keys of `guid` in the index for `list`.
    pub fn remember<S: LexiconStore>(&mut self, store: &S, list: Guid, guid: Guid) {
        let index = self
            .indexes
            .entry(list)
            .or_insert_with(|| Self::build_index(store, list));
        if let Some(data) = store.get::<PossibilityData>(guid) {
            Self::register(index, guid, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn text(store: &mut MemoryStore, lang: &str, value: &str) -> IncomingText {
        let ws = store.writing_systems_mut().resolve_or_create(lang);
        IncomingText {
            ws,
            text: value.to_string(),
            audio: false,
        }
    }

    #[test]
    fn test_find_by_id_label_and_abbreviation() {
        let mut store = MemoryStore::new();
        let list = store.list("grammatical-info").unwrap();
        let mut resolver = PossibilityResolver::new();
        let item = PossibilityItem {
            id: "Noun",
            label: vec![text(&mut store, "en", "Noun")],
            abbrev: vec![text(&mut store, "en", "n")],
            ..Default::default()
        };
        let (noun, created) = resolver.find_or_create(&mut store, list, &item).unwrap();
        assert!(created);
        assert_eq!(resolver.find(&store, list, "noun"), Some(noun));
        assert_eq!(resolver.find(&store, list, "N"), Some(noun));
        assert_eq!(resolver.find(&store, list, "n Noun"), Some(noun));

        let (again, created) = resolver
            .find_or_create(&mut store, list, &PossibilityItem::named("NOUN"))
            .unwrap();
        assert_eq!(again, noun);
        assert!(!created);
    }

    #[test]
    fn test_index_is_rebuilt_from_existing_store() {
        let mut store = MemoryStore::new();
        let list = store.list("grammatical-info").unwrap();
        let (verb, _) = PossibilityResolver::new()
            .find_or_create(&mut store, list, &PossibilityItem::named("Verb"))
            .unwrap();
        let mut fresh = PossibilityResolver::new();
        assert_eq!(fresh.find(&store, list, "verb"), Some(verb));
    }

    #[test]
    fn test_parent_placeholder_is_created_under_list() {
        let mut store = MemoryStore::new();
        let list = store.list("semantic-domain-ddp4").unwrap();
        let mut resolver = PossibilityResolver::new();
        let child = PossibilityItem {
            id: "1.1 Sky",
            parent: Some("1 Universe"),
            ..Default::default()
        };
        let (sky, _) = resolver.find_or_create(&mut store, list, &child).unwrap();
        let universe = resolver.find(&store, list, "1 Universe").unwrap();
        assert_eq!(store.owner_of(sky), Some(universe));
        assert_eq!(store.owner_of(universe), Some(list));

        let (found, created) = resolver
            .find_or_create(&mut store, list, &PossibilityItem::named("1 universe"))
            .unwrap();
        assert_eq!(found, universe);
        assert!(!created);
    }

    #[test]
    fn test_explicit_guid_is_used() {
        let mut store = MemoryStore::new();
        let list = store.list("status").unwrap();
        let guid = Guid::new_v4();
        let item = PossibilityItem {
            id: "Confirmed",
            guid: Some(guid),
            ..Default::default()
        };
        let mut resolver = PossibilityResolver::new();
        let (created, _) = resolver.find_or_create(&mut store, list, &item).unwrap();
        assert_eq!(created, guid);
        let (reused, fresh) = resolver.find_or_create(&mut store, list, &item).unwrap();
        assert_eq!(reused, guid);
        assert!(!fresh);
    }
}
