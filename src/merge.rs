//! Merge policies for multilingual strings, and the managed media directory
//! that audio alternatives are copied into.

use crate::error::{LiftError, Result};
use crate::store::MultiString;
use crate::writing_systems::{IncomingText, WsHandle};
use log::debug;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use unicode_normalization::UnicodeNormalization;

/// How incoming data is reconciled with data already in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStyle {
    /// Existing non-empty alternatives win; differences are reported.
    KeepOld,
    /// The incoming data replaces everything, and unmatched objects are deleted.
    KeepOnlyNew,
    /// Incoming alternatives overwrite; nothing is dropped.
    #[default]
    Combine,
}

impl MergeStyle {
    /// Whether the post-pass orphan cleanup runs.
    pub fn deletes_unmatched(self) -> bool {
        self == MergeStyle::KeepOnlyNew
    }
}

impl fmt::Display for MergeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeStyle::KeepOld => "keep-old",
            MergeStyle::KeepOnlyNew => "keep-only-new",
            MergeStyle::Combine => "combine",
        };
        f.write_str(name)
    }
}

impl FromStr for MergeStyle {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "keep-old" | "keepold" => Ok(MergeStyle::KeepOld),
            "keep-only-new" | "keeponlynew" | "replace-all" | "replaceall" => {
                Ok(MergeStyle::KeepOnlyNew)
            }
            "combine" | "keep-both" | "keepboth" | "keep-new" => Ok(MergeStyle::Combine),
            _ => Err(LiftError::InvalidArgument(format!(
                "Unknown merge style '{}'. Expected keep-old, keep-only-new (replace-all) or combine.",
                s
            ))),
        }
    }
}

/// Canonical decomposed form, used for every string equality test.
pub fn normalize(s: &str) -> String {
    s.nfd().collect()
}

/// Lookup key for names and labels: trimmed, decomposed and lowercased.
pub fn fold(text: &str) -> String {
    normalize(text.trim()).to_lowercase()
}

pub fn texts_equal(a: &str, b: &str) -> bool {
    a == b || normalize(a) == normalize(b)
}

/// An existing alternative that KeepOld preserved over a different incoming one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringConflict {
    pub ws: WsHandle,
    pub kept: String,
    pub rejected: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub changed: bool,
    pub conflicts: Vec<StringConflict>,
    /// Audio file names written into the string, to be copied into the media directory.
    pub audio_files: Vec<String>,
}

impl MergeOutcome {
    pub fn absorb(&mut self, other: MergeOutcome) {
        self.changed |= other.changed;
        self.conflicts.extend(other.conflicts);
        self.audio_files.extend(other.audio_files);
    }
}

/// Merges `incoming` into `existing` according to `style`.
///
/// `creating` is set for objects made during this run; their strings are
/// always written regardless of style.
pub fn merge_multi_string(
    existing: &mut MultiString,
    incoming: &[IncomingText],
    style: MergeStyle,
    creating: bool,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut seen = HashSet::new();

    for alt in incoming.iter().filter(|a| !a.text.is_empty()) {
        seen.insert(alt.ws);
        match existing.get(&alt.ws) {
            Some(old) if *old == alt.text => continue,
            Some(old) if !old.is_empty() && style == MergeStyle::KeepOld && !creating => {
                if !texts_equal(old, &alt.text) {
                    outcome.conflicts.push(StringConflict {
                        ws: alt.ws,
                        kept: old.clone(),
                        rejected: alt.text.clone(),
                    });
                }
                continue;
            }
            _ => {}
        }
        existing.insert(alt.ws, alt.text.clone());
        outcome.changed = true;
        if alt.audio {
            outcome.audio_files.push(alt.text.clone());
        }
    }

    if style == MergeStyle::KeepOnlyNew {
        let before = existing.len();
        existing.retain(|ws, _| seen.contains(ws));
        outcome.changed |= existing.len() != before;
    }
    outcome
}

/// Single-valued counterpart of [`merge_multi_string`].
pub fn merge_string(
    existing: &mut Option<String>,
    incoming: Option<&str>,
    style: MergeStyle,
    creating: bool,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let Some(new) = incoming else {
        if style == MergeStyle::KeepOnlyNew {
            outcome.changed = existing.take().is_some();
        }
        return outcome;
    };
    if let Some(old) = existing.as_deref() {
        if old == new {
            return outcome;
        }
        if !old.is_empty() && style == MergeStyle::KeepOld && !creating {
            if !texts_equal(old, new) {
                outcome.conflicts.push(StringConflict {
                    ws: 0,
                    kept: old.to_string(),
                    rejected: new.to_string(),
                });
            }
            return outcome;
        }
    }
    *existing = Some(new.to_string());
    outcome.changed = true;
    outcome
}

/// Subdirectory of the media root that receives audio files.
pub const MEDIA_SUBDIR: &str = "AudioVisual";

/// Copies audio referenced by the input into the managed media directory.
#[derive(Debug, Clone)]
pub struct MediaDirectory {
    source_dir: PathBuf,
    media_dir: PathBuf,
}

impl MediaDirectory {
    /// `source_dir` is the directory of the LIFT file; audio is read from its
    /// `audio/` subdirectory.
    pub fn new(source_dir: impl Into<PathBuf>, media_dir: impl Into<PathBuf>) -> Self {
        MediaDirectory {
            source_dir: source_dir.into(),
            media_dir: media_dir.into(),
        }
    }

    pub fn target_dir(&self) -> PathBuf {
        self.media_dir.join(MEDIA_SUBDIR)
    }

    /// Copies one audio file, returning its managed path. An existing copy is kept.
    pub fn copy_audio(&self, file_name: &str) -> Result<PathBuf> {
        let name = Path::new(file_name).file_name().ok_or_else(|| {
            LiftError::InvalidArgument(format!("'{}' is not an audio file name", file_name))
        })?;
        let source = self.source_dir.join("audio").join(name);
        if !source.is_file() {
            return Err(LiftError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("audio file {} not found", source.display()),
            )));
        }
        let target_dir = self.target_dir();
        fs::create_dir_all(&target_dir)?;
        let target = target_dir.join(name);
        if target.exists() {
            debug!("Audio file {} already present", target.display());
            return Ok(target);
        }

        let mut temp = NamedTempFile::new_in(&target_dir)?;
        let mut input = fs::File::open(&source)?;
        io::copy(&mut input, temp.as_file_mut())?;
        temp.persist(&target).map_err(|e| LiftError::Io(e.error))?;
        debug!("Copied {} to {}", source.display(), target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn alt(ws: WsHandle, text: &str) -> IncomingText {
        IncomingText {
            ws,
            text: text.to_string(),
            audio: false,
        }
    }

    fn ms(pairs: &[(WsHandle, &str)]) -> MultiString {
        pairs.iter().map(|(w, t)| (*w, t.to_string())).collect()
    }

    #[test]
    fn test_keep_old_preserves_and_reports() {
        let mut existing = ms(&[(1, "bank")]);
        let outcome = merge_multi_string(
            &mut existing,
            &[alt(1, "riverbank"), alt(2, "rive")],
            MergeStyle::KeepOld,
            false,
        );
        assert_eq!(existing, ms(&[(1, "bank"), (2, "rive")]));
        assert!(outcome.changed);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].kept, "bank");
        assert_eq!(outcome.conflicts[0].rejected, "riverbank");
    }

    #[test]
    fn test_keep_old_ignores_normalization_differences() {
        // Precomposed vs decomposed e-acute.
        let mut existing = ms(&[(1, "caf\u{e9}")]);
        let outcome = merge_multi_string(
            &mut existing,
            &[alt(1, "cafe\u{301}")],
            MergeStyle::KeepOld,
            false,
        );
        assert!(outcome.conflicts.is_empty());
        assert!(!outcome.changed);
    }

    #[test]
    fn test_keep_old_never_changes_filled_alternatives() {
        // (existing, incoming, conflict expected) per writing system.
        let cases: [(Option<&str>, Option<&str>, bool); 8] = [
            (Some("bank"), Some("riverbank"), true),
            (Some("bank"), Some("bank"), false),
            (Some("caf\u{e9}"), Some("cafe\u{301}"), false),
            (Some("cafe\u{301}"), Some("caf\u{e9}s"), true),
            (Some("rive"), None, false),
            (Some("rive"), Some(""), false),
            (Some(""), Some("banco"), false),
            (None, Some("Ufer"), false),
        ];
        let handle = |i: usize| i as WsHandle + 1;
        let existing_before: MultiString = cases
            .iter()
            .enumerate()
            .filter_map(|(i, (old, _, _))| old.map(|t| (handle(i), t.to_string())))
            .collect();
        let incoming: Vec<IncomingText> = cases
            .iter()
            .enumerate()
            .filter_map(|(i, (_, new, _))| new.map(|t| alt(handle(i), t)))
            .collect();

        let mut existing = existing_before.clone();
        let outcome = merge_multi_string(&mut existing, &incoming, MergeStyle::KeepOld, false);
        for (i, (old, new, conflict)) in cases.iter().enumerate() {
            let ws = handle(i);
            match old.filter(|t| !t.is_empty()) {
                Some(old) => assert_eq!(existing[&ws].as_bytes(), old.as_bytes(), "ws {}", ws),
                None => assert_eq!(existing.get(&ws).map(String::as_str), new.or(*old), "ws {}", ws),
            }
            assert_eq!(
                outcome.conflicts.iter().any(|c| c.ws == ws),
                *conflict,
                "conflict for ws {}",
                ws
            );
        }
        assert_eq!(outcome.conflicts.len(), cases.iter().filter(|c| c.2).count());

        // Objects created during the run take the incoming text as-is.
        let mut created = existing_before.clone();
        let outcome = merge_multi_string(&mut created, &incoming, MergeStyle::KeepOld, true);
        assert!(outcome.conflicts.is_empty());
        for text in &incoming {
            if !text.text.is_empty() {
                assert_eq!(created[&text.ws], text.text);
            }
        }
        assert_eq!(created[&handle(4)], "rive");
    }

    #[test]
    fn test_keep_old_writes_new_objects() {
        let mut existing = MultiString::new();
        let outcome = merge_multi_string(&mut existing, &[alt(1, "dog")], MergeStyle::KeepOld, true);
        assert!(outcome.changed);
        assert_eq!(existing, ms(&[(1, "dog")]));
    }

    #[test]
    fn test_keep_only_new_matches_incoming_keys() {
        let mut existing = ms(&[(1, "cat"), (2, "chat"), (3, "gato")]);
        let outcome = merge_multi_string(
            &mut existing,
            &[alt(1, "cat"), alt(4, "Katze")],
            MergeStyle::KeepOnlyNew,
            false,
        );
        assert!(outcome.changed);
        let keys: Vec<WsHandle> = existing.keys().copied().collect();
        assert_eq!(keys, vec![1, 4]);
    }

    #[test]
    fn test_combine_overwrites_and_keeps_others() {
        let mut existing = ms(&[(1, "cat"), (2, "chat")]);
        let outcome = merge_multi_string(&mut existing, &[alt(1, "kitty")], MergeStyle::Combine, false);
        assert!(outcome.changed);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(existing, ms(&[(1, "kitty"), (2, "chat")]));

        let again = merge_multi_string(&mut existing, &[alt(1, "kitty")], MergeStyle::Combine, false);
        assert!(!again.changed);
    }

    #[test]
    fn test_merge_string_styles() {
        let mut value = Some("Smith 1990".to_string());
        let outcome = merge_string(&mut value, Some("Jones 2001"), MergeStyle::KeepOld, false);
        assert_eq!(value.as_deref(), Some("Smith 1990"));
        assert_eq!(outcome.conflicts.len(), 1);

        let outcome = merge_string(&mut value, None, MergeStyle::KeepOnlyNew, false);
        assert!(outcome.changed);
        assert!(value.is_none());
    }

    #[test]
    fn test_merge_style_parsing() {
        assert_eq!("replace-all".parse::<MergeStyle>().unwrap(), MergeStyle::KeepOnlyNew);
        assert_eq!("keep_old".parse::<MergeStyle>().unwrap(), MergeStyle::KeepOld);
        assert_eq!("Combine".parse::<MergeStyle>().unwrap(), MergeStyle::Combine);
        assert!("overwrite".parse::<MergeStyle>().is_err());
        assert_eq!(MergeStyle::KeepOnlyNew.to_string(), "keep-only-new");
    }

    #[test]
    fn test_audio_alternative_is_reported_and_copied() {
        let source = tempdir().unwrap();
        let media = tempdir().unwrap();
        fs::create_dir_all(source.path().join("audio")).unwrap();
        fs::write(source.path().join("audio").join("cat.wav"), b"RIFF").unwrap();

        let mut existing = MultiString::new();
        let incoming = [IncomingText {
            ws: 7,
            text: "cat.wav".to_string(),
            audio: true,
        }];
        let outcome = merge_multi_string(&mut existing, &incoming, MergeStyle::Combine, true);
        assert_eq!(outcome.audio_files, vec!["cat.wav".to_string()]);

        let dir = MediaDirectory::new(source.path(), media.path());
        let copied = dir.copy_audio("cat.wav").unwrap();
        assert_eq!(copied, media.path().join(MEDIA_SUBDIR).join("cat.wav"));
        assert_eq!(fs::read(&copied).unwrap(), b"RIFF");
        assert!(dir.copy_audio("missing.wav").is_err());
    }
}
