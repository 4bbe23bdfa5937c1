use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::OnceLock;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_check_number,
    r"(?i)\b(?:chq|cheque|check|ck)\.?\s*(?:no\.?|#)?\s*(\d{1,6})\b");
re!(re_reserve_number,
    r"\b(\d{6})\b");
re!(re_hash_code,
    r"#\s*([A-Za-z0-9]{4,8})\b");
re!(re_reference_code,
    r"(?i)\b(?:ref(?:erence)?|code|msg)\s*[:#]?\s*([A-Za-z0-9]{4,8})\b");

/// An identifier recovered from free text (memo, e-mail subject, description).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IdentifierHint {
    /// Direct six-digit charter reserve number.
    ReserveNumber(String),
    /// Short code that only resolves through the ledger tables.
    ShortCode(String),
    CheckNumber(String),
}

impl IdentifierHint {
    pub fn value(&self) -> &str {
        match self {
            IdentifierHint::ReserveNumber(v)
            | IdentifierHint::ShortCode(v)
            | IdentifierHint::CheckNumber(v) => v,
        }
    }
}

/// Layered extraction: cheque numbers, then bare reserve numbers, then
/// hash-prefixed or labelled short codes. Text already claimed by an earlier
/// layer is not reused by a later one. Output is de-duplicated and keeps
/// first-seen order.
pub fn extract_hints(text: &str) -> Vec<IdentifierHint> {
    let mut hints = Vec::new();
    let mut claimed: Vec<Range<usize>> = Vec::new();

    for caps in re_check_number().captures_iter(text) {
        if let Some(m) = caps.get(1) {
            claimed.push(m.range());
            push_unique(&mut hints, IdentifierHint::CheckNumber(trim_zeros(m.as_str())));
        }
    }

    for caps in re_reserve_number().captures_iter(text) {
        if let Some(m) = caps.get(1) {
            if overlaps(&claimed, &m.range()) {
                continue;
            }
            claimed.push(m.range());
            push_unique(&mut hints, IdentifierHint::ReserveNumber(m.as_str().to_string()));
        }
    }

    for re in [re_hash_code(), re_reference_code()] {
        for caps in re.captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            if overlaps(&claimed, &m.range()) {
                continue;
            }
            let code = m.as_str();
            // A pure-digit code longer than a reserve number is a bank reference.
            if code.chars().all(|c| c.is_ascii_digit()) && code.len() != 6 {
                continue;
            }
            claimed.push(m.range());
            push_unique(&mut hints, IdentifierHint::ShortCode(code.to_uppercase()));
        }
    }

    hints
}

fn overlaps(claimed: &[Range<usize>], r: &Range<usize>) -> bool {
    claimed.iter().any(|c| c.start < r.end && r.start < c.end)
}

fn push_unique(hints: &mut Vec<IdentifierHint>, hint: IdentifierHint) {
    if !hints.contains(&hint) {
        hints.push(hint);
    }
}

fn trim_zeros(s: &str) -> String {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_reserve_number() {
        assert_eq!(
            extract_hints("INTERAC E-TRANSFER 019233 J SMITH"),
            vec![IdentifierHint::ReserveNumber("019233".to_string())]
        );
    }

    #[test]
    fn long_bank_references_are_not_reserve_numbers() {
        assert!(extract_hints("POS PURCHASE#000001078131 PLENTY OF LIQUO").is_empty());
    }

    #[test]
    fn hash_prefixed_six_digits_is_a_reserve_number() {
        assert_eq!(
            extract_hints("Deposit for charter #019233"),
            vec![IdentifierHint::ReserveNumber("019233".to_string())]
        );
    }

    #[test]
    fn hash_short_code() {
        assert_eq!(
            extract_hints("Payment for #K7QX2 wedding"),
            vec![IdentifierHint::ShortCode("K7QX2".to_string())]
        );
    }

    #[test]
    fn labelled_reference_code() {
        assert_eq!(
            extract_hints("e-Transfer ref: ab12cd"),
            vec![IdentifierHint::ShortCode("AB12CD".to_string())]
        );
    }

    #[test]
    fn cheque_number_claims_its_digits() {
        assert_eq!(
            extract_hints("CHQ #000204"),
            vec![IdentifierHint::CheckNumber("204".to_string())]
        );
        assert_eq!(
            extract_hints("Cheque No. 1187 for 019233"),
            vec![
                IdentifierHint::CheckNumber("1187".to_string()),
                IdentifierHint::ReserveNumber("019233".to_string()),
            ]
        );
    }

    #[test]
    fn duplicates_collapse() {
        assert_eq!(extract_hints("019233 / 019233").len(), 1);
        assert_eq!(extract_hints("019233 019234").len(), 2);
    }

    #[test]
    fn plain_text_has_no_hints() {
        assert!(extract_hints("MONTHLY SERVICE CHARGE").is_empty());
    }
}
