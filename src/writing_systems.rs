//! Writing-system registry: maps language tags to the numeric handles used as
//! keys in every multilingual string.

use crate::models::LiftForm;
use serde::{Deserialize, Serialize};

/// Numeric handle for a writing system. Zero is never issued.
pub type WsHandle = u32;

/// Tag used when the engine has to invent analysis text (new possibilities,
/// new relation types).
pub const DEFAULT_ANALYSIS_TAG: &str = "en";

/// Writing systems whose tag carries this suffix hold audio file names.
const AUDIO_SUFFIX: &str = "-zxxx-x-audio";

/// The writing-system API consumed by the importer.
pub trait WritingSystemRegistry {
    /// Returns the handle for `tag`, registering it if unknown.
    fn resolve_or_create(&mut self, tag: &str) -> WsHandle;
    fn handle(&self, tag: &str) -> Option<WsHandle>;
    fn tag(&self, handle: WsHandle) -> Option<&str>;

    fn is_audio(&self, handle: WsHandle) -> bool {
        self.tag(handle).is_some_and(is_audio_tag)
    }
}

/// Answers whether `tag` names an audio writing system (e.g. `seh-Zxxx-x-audio`).
pub fn is_audio_tag(tag: &str) -> bool {
    tag.to_ascii_lowercase().ends_with(AUDIO_SUFFIX)
}

/// Simple registry persisted alongside the object store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WritingSystems {
    tags: Vec<String>,
}

impl WritingSystems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// All registered (handle, tag) pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (WsHandle, &str)> {
        self.tags
            .iter()
            .enumerate()
            .map(|(i, t)| (i as WsHandle + 1, t.as_str()))
    }

    /// Rebuilds a registry from persisted pairs. Handles must be dense from 1.
    pub fn from_tags(tags: Vec<String>) -> Self {
        WritingSystems { tags }
    }
}

impl WritingSystemRegistry for WritingSystems {
    fn resolve_or_create(&mut self, tag: &str) -> WsHandle {
        if let Some(handle) = self.handle(tag) {
            return handle;
        }
        self.tags.push(tag.to_string());
        self.tags.len() as WsHandle
    }

    fn handle(&self, tag: &str) -> Option<WsHandle> {
        self.tags
            .iter()
            .position(|t| t.eq_ignore_ascii_case(tag))
            .map(|i| i as WsHandle + 1)
    }

    fn tag(&self, handle: WsHandle) -> Option<&str> {
        if handle == 0 {
            return None;
        }
        self.tags.get(handle as usize - 1).map(String::as_str)
    }
}

/// One incoming alternative after its language tag has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingText {
    pub ws: WsHandle,
    pub text: String,
    pub audio: bool,
}

/// Resolves the language tags of `forms`, registering unknown ones.
pub fn resolve_forms<'f, R>(registry: &mut R, forms: impl IntoIterator<Item = &'f LiftForm>) -> Vec<IncomingText>
where
    R: WritingSystemRegistry + ?Sized,
{
    forms
        .into_iter()
        .map(|form| {
            let ws = registry.resolve_or_create(&form.lang);
            IncomingText {
                ws,
                text: form.text.clone(),
                audio: registry.is_audio(ws),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_stable_and_case_insensitive() {
        let mut ws = WritingSystems::new();
        let en = ws.resolve_or_create("en");
        let fr = ws.resolve_or_create("fr");
        assert_eq!(en, 1);
        assert_eq!(fr, 2);
        assert_eq!(ws.resolve_or_create("EN"), en);
        assert_eq!(ws.tag(fr), Some("fr"));
        assert_eq!(ws.tag(0), None);
        assert_eq!(ws.len(), 2);
    }

    #[test]
    fn test_audio_writing_system_detection() {
        let mut ws = WritingSystems::new();
        let audio = ws.resolve_or_create("seh-Zxxx-x-audio");
        let text = ws.resolve_or_create("seh");
        assert!(ws.is_audio(audio));
        assert!(!ws.is_audio(text));
        assert!(is_audio_tag("qaa-ZXXX-X-AUDIO"));
    }

    #[test]
    fn test_resolve_forms_registers_tags() {
        let mut ws = WritingSystems::new();
        let forms = vec![LiftForm::new("en", "cat"), LiftForm::new("fr", "chat")];
        let resolved = resolve_forms(&mut ws, &forms);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].text, "chat");
        assert_eq!(ws.handle("fr"), Some(resolved[1].ws));
    }
}
