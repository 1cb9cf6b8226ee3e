// Token grammar: ENTITY_TYPE "_" HEX8.
//
// Tokens are the only identifiers allowed to cross the trust boundary.
// The scanner below finds token-shaped words; a shape match alone is never
// treated as a token — the vault must confirm it. That keeps arbitrary
// 8-char hex substrings (commit ids, color codes) from being rewritten.

use uuid::Uuid;

/// Length of the hex suffix in a token.
pub const SUFFIX_LEN: usize = 8;

/// Mint a fresh token for an entity type, e.g. `PERSON_a1b2c3d4`.
///
/// Uniqueness is enforced by the vault's primary key, not here; the vault
/// retries with a new suffix on collision.
pub fn mint(entity_type: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", entity_type, &suffix[..SUFFIX_LEN])
}

/// Normalize an oracle-supplied entity label into the token grammar's
/// uppercase-with-underscore form (`credit card` -> `CREDIT_CARD`).
pub fn normalize_entity_type(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = mapped.trim_matches('_').to_string();
    if cleaned.is_empty() {
        "ENTITY".to_string()
    } else {
        cleaned
    }
}

pub fn is_hex8(s: &str) -> bool {
    s.len() == SUFFIX_LEN && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

fn is_entity_prefix(s: &str) -> bool {
    !s.is_empty()
        && s.starts_with(|c: char| c.is_ascii_uppercase())
        && s.chars().all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit())
}

/// Split a fully-qualified token into `(entity_type, suffix)`.
pub fn split_qualified(word: &str) -> Option<(&str, &str)> {
    let idx = word.rfind('_')?;
    let (prefix, rest) = word.split_at(idx);
    let suffix = &rest[1..];
    if is_entity_prefix(prefix) && is_hex8(suffix) {
        Some((prefix, suffix))
    } else {
        None
    }
}

/// A token-shaped word found in text. `prefixed` distinguishes the
/// fully-qualified form from the bare suffix some tool paths emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCandidate {
    pub text: String,
    pub prefixed: bool,
}

/// Scan text for token-shaped words.
///
/// Longest-match and prefix-aware: a word is examined as a whole, so the
/// hex8 tail of `PERSON_a1b2c3d4` never surfaces as a separate bare match,
/// and an 8-char slice of a longer hex run is not a candidate at all.
/// Candidates are deduplicated in order of first appearance.
pub fn scan(text: &str) -> Vec<TokenCandidate> {
    let mut out: Vec<TokenCandidate> = Vec::new();

    for word in split_words(text) {
        let candidate = if split_qualified(word).is_some() {
            Some(TokenCandidate {
                text: word.to_string(),
                prefixed: true,
            })
        } else if is_hex8(word) {
            Some(TokenCandidate {
                text: word.to_string(),
                prefixed: false,
            })
        } else {
            None
        };

        if let Some(c) = candidate {
            if !out.iter().any(|existing| existing.text == c.text) {
                out.push(c);
            }
        }
    }

    out
}

/// Maximal runs of `[A-Za-z0-9_]` — the alphabet tokens are built from.
fn split_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}
