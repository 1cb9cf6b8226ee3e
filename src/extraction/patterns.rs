// Deterministic PII detectors.
//
// The oracle is good at names and fuzzy identifiers but can miss mechanical
// formats, so well-known shapes (emails, URLs, card numbers, phone numbers,
// national ids) are also caught by regex and merged into the oracle's
// entity list. Oracle spans win on overlap.

use regex::Regex;

use super::ExtractedEntity;

pub struct PatternDetector {
    email_regex: Regex,
    url_regex: Regex,
    phone_regex: Regex,
    credit_card_regex: Regex,
    ssn_regex: Regex,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternDetector {
    pub fn new() -> Self {
        Self {
            // Email: RFC-lite regex
            email_regex: Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").unwrap(),

            // URL: HTTP/HTTPS with optional query params
            url_regex: Regex::new(r"https?://[^\s<>\[\]{}|\\^`\x00-\x1f]+").unwrap(),

            // Phone: International formats including E.164
            phone_regex: Regex::new(
                r"(?:\+\d{1,3}[-.\s]?)?\(?\d{2,4}\)?[-.\s]\d{2,4}[-.\s]\d{2,4}(?:[-.\s]?\d{1,4})?",
            )
            .unwrap(),

            // Credit card: common formats (13-19 digits with optional separators)
            credit_card_regex: Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{1,4}\b").unwrap(),

            // US SSN pattern
            ssn_regex: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
        }
    }

    /// Detect mechanical PII shapes in `input`. Overlapping matches are
    /// resolved longest-first, so a URL containing an email-like query
    /// string is reported once, as a URL.
    pub fn detect(&self, input: &str) -> Vec<ExtractedEntity> {
        let mut all_matches: Vec<(usize, usize, String, &'static str)> = Vec::new();

        for mat in self.url_regex.find_iter(input) {
            all_matches.push((mat.start(), mat.end(), mat.as_str().to_string(), "URL"));
        }

        for mat in self.email_regex.find_iter(input) {
            all_matches.push((mat.start(), mat.end(), mat.as_str().to_string(), "EMAIL"));
        }

        for mat in self.credit_card_regex.find_iter(input) {
            let digits: String = mat.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
            if (13..=19).contains(&digits.len()) && luhn_check(&digits) {
                all_matches.push((mat.start(), mat.end(), mat.as_str().to_string(), "CREDIT_CARD"));
            }
        }

        for mat in self.ssn_regex.find_iter(input) {
            all_matches.push((mat.start(), mat.end(), mat.as_str().to_string(), "NATIONAL_ID"));
        }

        for mat in self.phone_regex.find_iter(input) {
            let matched = mat.as_str();
            let digit_count = matched.chars().filter(|c| c.is_ascii_digit()).count();
            // Below 7 digits is more likely an amount or a date; above 12 is
            // card territory and handled above.
            if matched.len() >= 7 && (7..=12).contains(&digit_count) {
                all_matches.push((mat.start(), mat.end(), matched.to_string(), "PHONE"));
            }
        }

        // Longer matches first, then by position, so overlap filtering keeps
        // the most specific span.
        all_matches.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));

        let mut filtered: Vec<(usize, usize, String, &'static str)> = Vec::new();
        for mat in all_matches {
            let overlaps = filtered
                .iter()
                .any(|existing| mat.0 < existing.1 && mat.1 > existing.0);
            if !overlaps {
                filtered.push(mat);
            }
        }

        filtered.sort_by_key(|m| m.0);
        filtered
            .into_iter()
            .map(|(_, _, text, entity_type)| ExtractedEntity {
                text,
                entity_type: entity_type.to_string(),
                context: None,
            })
            .collect()
    }
}

/// Luhn algorithm for credit card validation
fn luhn_check(digits: &str) -> bool {
    let mut sum = 0;
    let mut alternate = false;

    for c in digits.chars().rev() {
        if let Some(mut digit) = c.to_digit(10) {
            if alternate {
                digit *= 2;
                if digit > 9 {
                    digit -= 9;
                }
            }
            sum += digit;
            alternate = !alternate;
        }
    }

    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_email() {
        let d = PatternDetector::new();
        let found = d.detect("Contact me at john.doe@example.com please");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_type, "EMAIL");
        assert_eq!(found[0].text, "john.doe@example.com");
    }

    #[test]
    fn test_detects_url_over_contained_email() {
        let d = PatternDetector::new();
        let found = d.detect("See https://example.com/u?mail=a@b.com for details");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_type, "URL");
    }

    #[test]
    fn test_detects_valid_card_only() {
        let d = PatternDetector::new();
        // 4532015112830366 passes Luhn; 4532015112830367 does not.
        let found = d.detect("Card 4532-0151-1283-0366 vs 4532-0151-1283-0367");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_type, "CREDIT_CARD");
        assert!(found[0].text.ends_with("0366"));
    }

    #[test]
    fn test_detects_phone() {
        let d = PatternDetector::new();
        let found = d.detect("Call me at +1-555-123-4567 today");
        assert!(found.iter().any(|e| e.entity_type == "PHONE"));
    }

    #[test]
    fn test_detects_ssn() {
        let d = PatternDetector::new();
        let found = d.detect("SSN on file: 123-45-6789");
        assert!(found.iter().any(|e| e.entity_type == "NATIONAL_ID"));
    }

    #[test]
    fn test_plain_prose_is_clean() {
        let d = PatternDetector::new();
        assert!(d.detect("Transfer the funds before Friday.").is_empty());
    }
}
