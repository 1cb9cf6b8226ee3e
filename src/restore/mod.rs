// Restoration bridge: map tokens in returned text back to real values.
//
// Restoration is best-effort and never fatal. A candidate that the vault
// does not recognize stays in the text verbatim and is reported as
// unresolved, which also makes the whole pass idempotent: restored text
// contains no registered tokens for a second pass to find.

use tracing::{debug, info};

use crate::error::Result;
use crate::token;
use crate::vault::IdentityVault;

/// What a restoration pass did, for auditability: the final text, every
/// substitution performed, and every token-shaped match left untouched.
#[derive(Debug, Clone)]
pub struct RestorationReport {
    pub text: String,
    /// (matched substring, restored value) pairs, in replacement order.
    pub restored: Vec<(String, String)>,
    pub unresolved: Vec<String>,
}

pub struct RestorationBridge {
    vault: IdentityVault,
    /// Display-name stand-ins the remote side is known to emit next to a
    /// token. Rewritten only after at least one token resolved. Injected
    /// via config, empty by default.
    placeholder_aliases: Vec<String>,
}

impl RestorationBridge {
    pub fn new(vault: IdentityVault, placeholder_aliases: Vec<String>) -> Self {
        Self {
            vault,
            placeholder_aliases,
        }
    }

    pub fn restore(&self, text: &str) -> Result<RestorationReport> {
        let mut candidates = token::scan(text);
        // Fully-qualified forms first: a bare suffix is a substring of its
        // qualified form, and must not be rewritten inside it.
        candidates.sort_by(|a, b| b.text.len().cmp(&a.text.len()));

        let mut out = text.to_string();
        let mut restored: Vec<(String, String)> = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();

        for candidate in &candidates {
            match self.vault.resolve_flexible(&candidate.text)? {
                Some(record) => {
                    debug!(token = %candidate.text, "token restored");
                    out = out.replace(&candidate.text, &record.original_value);
                    restored.push((candidate.text.clone(), record.original_value));
                }
                None => {
                    if out.contains(&candidate.text) {
                        unresolved.push(candidate.text.clone());
                    }
                }
            }
        }

        // Known-placeholder cleanup, deliberately narrow: only after a token
        // in this response resolved, and only for configured literals. The
        // first restored value is the response's primary subject.
        if let Some((_, primary_value)) = restored.first() {
            for alias in &self.placeholder_aliases {
                if !alias.is_empty() && out.contains(alias.as_str()) {
                    debug!(alias = %alias, "placeholder alias rewritten");
                    out = out.replace(alias.as_str(), primary_value);
                }
            }
        }

        info!(
            restored = restored.len(),
            unresolved = unresolved.len(),
            "restoration complete"
        );

        Ok(RestorationReport {
            text: out,
            restored,
            unresolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn fixtures() -> (IdentityVault, RestorationBridge) {
        let vault = IdentityVault::new(Database::open_in_memory().unwrap());
        let bridge = RestorationBridge::new(vault.clone(), Vec::new());
        (vault, bridge)
    }

    #[test]
    fn test_restores_qualified_token() {
        let (vault, bridge) = fixtures();
        let tok = vault.get_or_create_token("Bob Smith", "PERSON").unwrap();

        let report = bridge
            .restore(&format!("Confirmed transfer to {}.", tok))
            .unwrap();
        assert_eq!(report.text, "Confirmed transfer to Bob Smith.");
        assert_eq!(report.restored.len(), 1);
        assert!(report.unresolved.is_empty());
    }

    #[test]
    fn test_restores_bare_suffix() {
        let (vault, bridge) = fixtures();
        let tok = vault.get_or_create_token("Bob Smith", "PERSON").unwrap();
        let suffix = token::split_qualified(&tok).unwrap().1.to_string();

        let report = bridge.restore(&format!("Record {} updated.", suffix)).unwrap();
        assert_eq!(report.text, "Record Bob Smith updated.");
    }

    #[test]
    fn test_mixed_qualified_and_bare_forms() {
        let (vault, bridge) = fixtures();
        let tok = vault.get_or_create_token("Bob Smith", "PERSON").unwrap();
        let suffix = token::split_qualified(&tok).unwrap().1.to_string();

        let report = bridge
            .restore(&format!("{} is also shown as {}.", tok, suffix))
            .unwrap();
        assert_eq!(report.text, "Bob Smith is also shown as Bob Smith.");
    }

    #[test]
    fn test_unknown_tokens_left_verbatim() {
        let (vault, bridge) = fixtures();
        let tok = vault.get_or_create_token("Bob Smith", "PERSON").unwrap();

        let input = format!("{} and PERSON_00000000 and commit deadbeef", tok);
        let report = bridge.restore(&input).unwrap();
        assert!(report.text.contains("Bob Smith"));
        assert!(report.text.contains("PERSON_00000000"));
        assert!(report.text.contains("deadbeef"));
        assert_eq!(report.unresolved.len(), 2);
    }

    #[test]
    fn test_restoration_is_idempotent() {
        let (vault, bridge) = fixtures();
        let tok = vault.get_or_create_token("Sarah Jones", "PERSON").unwrap();

        let once = bridge.restore(&format!("Done for {}.", tok)).unwrap();
        let twice = bridge.restore(&once.text).unwrap();
        assert_eq!(once.text, twice.text);
        assert!(twice.restored.is_empty());
    }

    #[test]
    fn test_plain_text_is_untouched() {
        let (_, bridge) = fixtures();
        let report = bridge.restore("No tokens in this sentence.").unwrap();
        assert_eq!(report.text, "No tokens in this sentence.");
        assert!(report.restored.is_empty());
        assert!(report.unresolved.is_empty());
    }

    #[test]
    fn test_placeholder_alias_rewritten_after_restore() {
        let vault = IdentityVault::new(Database::open_in_memory().unwrap());
        let tok = vault.get_or_create_token("Sarah Jones", "PERSON").unwrap();
        let bridge =
            RestorationBridge::new(vault.clone(), vec!["David Smith".to_string()]);

        let input = format!("Booked for {} (displayed as David Smith).", tok);
        let report = bridge.restore(&input).unwrap();
        assert_eq!(
            report.text,
            "Booked for Sarah Jones (displayed as Sarah Jones)."
        );
    }

    #[test]
    fn test_placeholder_alias_untouched_without_a_restored_token() {
        let vault = IdentityVault::new(Database::open_in_memory().unwrap());
        let bridge = RestorationBridge::new(vault, vec!["David Smith".to_string()]);

        let report = bridge.restore("David Smith has no token here.").unwrap();
        assert_eq!(report.text, "David Smith has no token here.");
    }
}
