//! Tag serialisation for the stored `tags` column.
//!
//! Tags are written as a JSON object. The legacy import format reserved the
//! single quote, so the codec strips it from keys and values before
//! serialising. Stripping is lossy: two keys that differ only by the reserved
//! character collapse into one, and the last value wins.

use std::collections::BTreeMap;

use thiserror::Error;

/// Delimiter stripped by the legacy importer.
pub const LEGACY_RESERVED_DELIMITER: char = '\'';

/// Errors raised while encoding tags.
#[derive(Debug, Error)]
pub enum TagCodecError {
    /// `serde_json` rejected the sanitised map.
    #[error("failed to serialise tags to JSON")]
    Serialise {
        /// Source error produced by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
}

/// Canonical tag encoding plus a record of what sanitisation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTags {
    /// JSON object with keys in sorted order.
    pub json: String,
    /// Number of input pairs whose key or value contained the delimiter.
    pub stripped_pairs: usize,
    /// Number of pairs that overwrote an earlier pair with the same key.
    pub collisions: usize,
}

impl EncodedTags {
    /// Whether encoding altered or dropped any input.
    pub const fn is_lossy(&self) -> bool {
        self.stripped_pairs > 0 || self.collisions > 0
    }
}

/// Serialises ordered key/value pairs into a JSON object.
///
/// # Examples
///
/// ```
/// use osm_history_core::TagCodec;
///
/// # fn main() -> Result<(), osm_history_core::TagCodecError> {
/// let encoded = TagCodec::default().encode([("name", "Sainte-Dévote"), ("note", "l'église")])?;
/// assert_eq!(encoded.json, r#"{"name":"Sainte-Dévote","note":"léglise"}"#);
/// assert!(encoded.is_lossy());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagCodec {
    reserved: char,
}

impl Default for TagCodec {
    fn default() -> Self {
        Self::with_reserved(LEGACY_RESERVED_DELIMITER)
    }
}

impl TagCodec {
    /// Codec stripping a custom reserved character.
    pub const fn with_reserved(reserved: char) -> Self {
        Self { reserved }
    }

    /// Character removed from keys and values.
    pub const fn reserved(&self) -> char {
        self.reserved
    }

    /// Encode pairs, stripping the reserved character.
    ///
    /// Output key order is sorted; duplicate keys keep the last value.
    pub fn encode<I, K, V>(&self, pairs: I) -> Result<EncodedTags, TagCodecError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        let mut stripped_pairs = 0;
        let mut collisions = 0;
        for (key, value) in pairs {
            let (clean_key, key_stripped) = self.strip(key.as_ref());
            let (clean_value, value_stripped) = self.strip(value.as_ref());
            if key_stripped || value_stripped {
                stripped_pairs += 1;
            }
            if map.insert(clean_key, clean_value).is_some() {
                collisions += 1;
            }
        }
        let json =
            serde_json::to_string(&map).map_err(|source| TagCodecError::Serialise { source })?;
        Ok(EncodedTags {
            json,
            stripped_pairs,
            collisions,
        })
    }

    fn strip(&self, text: &str) -> (String, bool) {
        if text.contains(self.reserved) {
            (text.replace(self.reserved, ""), true)
        } else {
            (text.to_owned(), false)
        }
    }
}
