//! Entity tag computation and classification.
//!
//! Strong tags are derived from the full content, weak tags from metadata
//! only. The resolver only ever compares tags for equality.

use std::time::UNIX_EPOCH;

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::EntityMeta;

/// Computes a strong entity tag over the complete content.
pub fn strong(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let hash = base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest);
    format!("\"{:x}-{}\"", content.len(), hash)
}

/// Computes a weak entity tag from size and modification time.
pub fn weak(meta: &EntityMeta) -> String {
    let mtime = meta
        .mtime
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|since| since.as_secs())
        .unwrap_or(0);
    format!("W/\"{:x}-{:x}\"", meta.size, mtime)
}

/// A header value that matched the entity-tag grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTag<'a> {
    /// Tag including its surrounding quotes.
    Strong(&'a str),
    /// Tag including its surrounding quotes, without the `W/` prefix.
    Weak(&'a str),
}

impl<'a> EntityTag<'a> {
    /// Classifies `value`, returning `None` when it is not an entity tag.
    pub fn parse(value: &'a str) -> Option<EntityTag<'a>> {
        let value = value.trim();
        let (weak, tag) = match value.strip_prefix("W/") {
            Some(tag) => (true, tag),
            None => (false, value),
        };

        let opaque = tag.strip_prefix('"')?.strip_suffix('"')?;
        // etagc = %x21 / %x23-7E / obs-text
        let valid = opaque
            .bytes()
            .all(|b| b == 0x21 || (0x23..=0x7e).contains(&b) || b >= 0x80);
        if !valid {
            return None;
        }

        Some(if weak { EntityTag::Weak(tag) } else { EntityTag::Strong(tag) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn test_strong_is_quoted_and_stable() {
        let tag = strong(b"Hello world");
        assert!(tag.starts_with("\"b-"));
        assert!(tag.ends_with('"'));
        assert_eq!(tag, strong(b"Hello world"));
        assert_ne!(tag, strong(b"Hello world!"));
    }

    #[test]
    fn test_weak_uses_metadata() {
        let meta = EntityMeta::new(255).with_mtime(UNIX_EPOCH + Duration::from_secs(16));
        assert_eq!("W/\"ff-10\"", weak(&meta));
        assert_eq!("W/\"ff-0\"", weak(&EntityMeta::new(255)));
    }

    #[test]
    fn test_parse() {
        assert_eq!(Some(EntityTag::Strong("\"abc\"")), EntityTag::parse("\"abc\""));
        assert_eq!(Some(EntityTag::Weak("\"abc\"")), EntityTag::parse(" W/\"abc\" "));
        assert_eq!(Some(EntityTag::Strong("\"\"")), EntityTag::parse("\"\""));
        assert_eq!(None, EntityTag::parse("abc"));
        assert_eq!(None, EntityTag::parse("\"a\"b\""));
        assert_eq!(None, EntityTag::parse("Wed, 21 Oct 2015 07:28:00 GMT"));
    }

    #[test]
    fn test_parse_roundtrips_computed_tags() {
        let meta = EntityMeta::new(10);
        let content_tag = strong(b"0123456789");
        assert_matches::assert_matches!(EntityTag::parse(&content_tag), Some(EntityTag::Strong(_)));
        let meta_tag = weak(&meta);
        assert_matches::assert_matches!(EntityTag::parse(&meta_tag), Some(EntityTag::Weak(_)));
    }
}
