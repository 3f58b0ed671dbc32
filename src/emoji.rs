//! Platform-agnostic emoji canonicalization.
//!
//! Upstream reaction payloads carry raw emoji glyphs (`"👍"`); the core only
//! ever sees a stable textual name (`"thumbs_up"`). Canonicalization and its
//! inverse are both backed by the `emojis` crate's Unicode CLDR names rather
//! than a hand-maintained table.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Canonicalize a raw emoji glyph to its stable textual name, e.g.
/// `"👍"` → `"thumbs_up"`. Glyphs the table doesn't recognize pass through
/// unchanged (platforms occasionally send custom/guild emoji shortcodes that
/// already look like names).
pub fn canonicalize(raw: &str) -> String {
    if let Some(emoji) = emojis::get(raw) {
        to_canonical_name(emoji.name())
    } else {
        raw.to_string()
    }
}

/// Reverse lookup: canonical name → emoji glyph, for outbound requests.
/// Returns `None` when the name isn't a recognized emoji, which the caller
/// surfaces as `PlatformError::UnknownEmoji`.
pub fn glyph_for(canonical_name: &str) -> Option<&'static str> {
    reverse_index().get(canonical_name).copied()
}

fn to_canonical_name(cldr_name: &str) -> String {
    cldr_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn reverse_index() -> &'static HashMap<String, &'static str> {
    static INDEX: OnceLock<HashMap<String, &'static str>> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut map = HashMap::new();
        for emoji in emojis::iter() {
            map.entry(to_canonical_name(emoji.name())).or_insert_with(|| emoji.as_str());
        }
        map
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_thumbs_up() {
        assert_eq!(canonicalize("👍"), "thumbs_up");
    }

    #[test]
    fn round_trips_through_glyph_for() {
        let canonical = canonicalize("👍");
        assert_eq!(glyph_for(&canonical), Some("👍"));
    }

    #[test]
    fn unknown_glyph_is_none() {
        assert_eq!(glyph_for("not_a_real_emoji_name"), None);
    }

    #[test]
    fn unrecognized_input_passes_through() {
        assert_eq!(canonicalize(":custom_guild_emoji:"), ":custom_guild_emoji:");
    }
}
