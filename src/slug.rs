//! Human-readable `organization/dataset` names for dataset ids.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::DataCollectiveError;

/// Map of `organization/dataset` slugs to dataset ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlugIndex {
    slugs: BTreeMap<String, String>,
}

impl SlugIndex {
    pub fn from_map(slugs: BTreeMap<String, String>) -> Self {
        Self { slugs }
    }

    /// Read a JSON object of slug -> id. A missing file gives an empty index.
    pub fn load(path: &Path) -> Result<Self, DataCollectiveError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        let slugs = serde_json::from_str(&text).map_err(|err| {
            DataCollectiveError::Config(format!("invalid slug file {}: {err}", path.display()))
        })?;
        Ok(Self { slugs })
    }

    /// The id for a known slug; anything else is assumed to already be an id.
    pub fn resolve<'a>(&'a self, slug_or_id: &'a str) -> &'a str {
        self.slugs
            .get(slug_or_id.trim())
            .map(String::as_str)
            .unwrap_or(slug_or_id)
    }

    pub fn len(&self) -> usize {
        self.slugs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slugs.is_empty()
    }
}

/// Lowercase, hyphen-separated ASCII form of a display name.
///
/// Runs of whitespace, `.`, `_` and `-` become one hyphen; other
/// punctuation and non-ASCII characters are dropped.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for ch in value.trim().chars().filter(char::is_ascii) {
        if ch.is_whitespace() || matches!(ch, '.' | '_' | '-') {
            pending_separator = true;
            continue;
        }
        if !ch.is_ascii_alphanumeric() {
            continue;
        }
        if pending_separator {
            slug.push('-');
            pending_separator = false;
        }
        slug.push(ch.to_ascii_lowercase());
    }
    if pending_separator {
        slug.push('-');
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_slugs_resolve_to_ids() {
        let mut map = BTreeMap::new();
        map.insert(
            "mozilla-foundation/common-voice-scripted-speech-english".to_string(),
            "cmf123".to_string(),
        );
        let index = SlugIndex::from_map(map);

        assert_eq!(
            index.resolve("mozilla-foundation/common-voice-scripted-speech-english"),
            "cmf123"
        );
        assert_eq!(index.resolve("cmf999"), "cmf999");
    }

    #[test]
    fn missing_slug_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let index = SlugIndex::load(&temp.path().join("slugs.json")).expect("load");
        assert!(index.is_empty());
    }

    #[test]
    fn slugify_normalizes_names() {
        assert_eq!(slugify("  Common Voice Scripted Speech 23.0 - English "), "common-voice-scripted-speech-23-0-english");
        assert_eq!(slugify("Mozilla Foundation"), "mozilla-foundation");
        assert_eq!(slugify("a__b..c"), "a-b-c");
        assert_eq!(slugify("Data (beta)!"), "data-beta");
    }
}
