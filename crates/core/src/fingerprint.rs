use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    #[error("Incomplete record: missing {missing} ({context})")]
    IncompleteRecord {
        missing: &'static str,
        context: String,
    },
}

/// Lowercase hex SHA-256 over the canonical (date, description, amount) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the fingerprint of a record. The sign of `amount` is ignored.
///
/// A missing date or amount is an error; partial data is never hashed.
pub fn fingerprint(
    occurred_on: Option<NaiveDate>,
    description: &str,
    amount: Option<Money>,
) -> Result<Fingerprint, FingerprintError> {
    let occurred_on = occurred_on.ok_or_else(|| FingerprintError::IncompleteRecord {
        missing: "date",
        context: description.to_string(),
    })?;
    let amount = amount.ok_or_else(|| FingerprintError::IncompleteRecord {
        missing: "amount",
        context: format!("{occurred_on} {description}"),
    })?;

    let canonical = format!(
        "{}|{}|{:.2}",
        occurred_on.format("%Y-%m-%d"),
        normalize_description(description),
        amount.abs().as_decimal()
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Case-folds, drops currency markers and masked card numbers, and
/// collapses whitespace.
pub fn normalize_description(description: &str) -> String {
    description
        .to_lowercase()
        .replace(['$', '\u{a0}'], " ")
        .split_whitespace()
        .filter(|token| !is_currency_token(token) && !is_masked_card(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_currency_token(token: &str) -> bool {
    matches!(token, "cad" | "usd" | "c$" | "us$")
}

/// `4506********1234`, `xxxx1234`, `****1234`.
fn is_masked_card(token: &str) -> bool {
    let masked = token.chars().filter(|c| matches!(c, '*' | 'x' | '#')).count();
    masked >= 4
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | 'x' | '#' | '-'))
}

/// Pre-insert guard over the fingerprints already known for a source population.
#[derive(Debug, Default)]
pub struct DuplicateGuard {
    seen: HashSet<Fingerprint>,
}

impl DuplicateGuard {
    pub fn new(known: impl IntoIterator<Item = Fingerprint>) -> Self {
        Self {
            seen: known.into_iter().collect(),
        }
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.seen.contains(fp)
    }

    /// Returns `true` the first time a fingerprint is offered, `false` after.
    pub fn admit(&mut self, fp: &Fingerprint) -> bool {
        self.seen.insert(fp.clone())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn fp(desc: &str, cents: i64) -> Fingerprint {
        fingerprint(date(2013, 6, 10), desc, Some(Money::from_cents(cents))).unwrap()
    }

    #[test]
    fn deterministic_across_calls() {
        assert_eq!(fp("E-TRANSFER 019233", 120_000), fp("E-TRANSFER 019233", 120_000));
    }

    #[test]
    fn known_vector_is_stable_across_processes() {
        // sha256("2013-06-10|deposit|1200.00")
        let mut hasher = Sha256::new();
        hasher.update(b"2013-06-10|deposit|1200.00");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(fp("DEPOSIT", 120_000).as_str(), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn cosmetic_variants_collide() {
        assert_eq!(fp("POS Purchase  CENTEX", 4_510), fp("pos purchase centex ", 4_510));
        assert_eq!(fp("CENTEX $45.10 CAD", 4_510), fp("centex 45.10", 4_510));
    }

    #[test]
    fn masked_card_numbers_are_ignored() {
        assert_eq!(
            fp("FAS GAS 4506********1234", 6_000),
            fp("FAS GAS 4506********9876", 6_000)
        );
    }

    #[test]
    fn sign_is_ignored() {
        assert_eq!(fp("CHQ 204", -5_000), fp("CHQ 204", 5_000));
    }

    #[test]
    fn different_amounts_differ() {
        assert_ne!(fp("DEPOSIT", 120_000), fp("DEPOSIT", 120_001));
    }

    #[test]
    fn missing_date_is_incomplete() {
        let err = fingerprint(None, "DEPOSIT", Some(Money::from_cents(1))).unwrap_err();
        assert!(matches!(err, FingerprintError::IncompleteRecord { missing: "date", .. }));
    }

    #[test]
    fn missing_amount_is_incomplete() {
        let err = fingerprint(date(2013, 6, 10), "DEPOSIT", None).unwrap_err();
        assert!(matches!(err, FingerprintError::IncompleteRecord { missing: "amount", .. }));
    }

    #[test]
    fn guard_admits_each_fingerprint_once() {
        let mut guard = DuplicateGuard::new(vec![fp("A", 1)]);
        assert!(!guard.admit(&fp("A", 1)));
        assert!(guard.admit(&fp("B", 1)));
        assert!(!guard.admit(&fp("B", 1)));
        assert_eq!(guard.len(), 2);
    }
}
