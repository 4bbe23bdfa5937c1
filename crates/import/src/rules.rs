use ledgerlink_core::{AccountCode, Classification, Money};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::util::levenshtein_distance;

pub const DEFAULT_CLASSIFIER_RULES: &str = include_str!("../rules/classifier.toml");

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to parse rules TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Rule '{name}' has an invalid pattern: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("IO error reading rules: {0}")]
    Io(#[from] std::io::Error),
}

/// Rule tiers, evaluated in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTier {
    /// Matched against the canonical vendor.
    Vendor,
    /// Matched against the raw description.
    Keyword,
    /// Broad fallback over vendor and description together.
    Category,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    Regex,
    Fuzzy {
        threshold: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Money in.
    Credit,
    /// Money out.
    Debit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub name: String,
    pub tier: RuleTier,
    #[serde(default)]
    pub priority: i32,
    pub pattern: String,
    #[serde(default, rename = "match")]
    pub match_type: MatchType,
    pub account: AccountCode,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub amount_min: Option<Money>,
    #[serde(default)]
    pub amount_max: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<ClassifierRule>,
}

#[derive(Debug, Clone)]
pub struct ClassifyInput<'a> {
    pub canonical_vendor: &'a str,
    pub description: &'a str,
    /// Signed. Rules with a direction or amount bounds never fire without it.
    pub amount: Option<Money>,
}

struct CompiledRule {
    rule: ClassifierRule,
    compiled_regex: Option<regex::Regex>,
}

pub struct Classifier {
    rules: Vec<CompiledRule>,
}

impl Classifier {
    pub fn new(rules: Vec<ClassifierRule>) -> Result<Self, RuleError> {
        let mut compiled = rules
            .into_iter()
            .map(|rule| {
                let compiled_regex = match &rule.match_type {
                    MatchType::Regex => Some(
                        regex::RegexBuilder::new(&rule.pattern)
                            .case_insensitive(true)
                            .build()
                            .map_err(|source| RuleError::Pattern {
                                name: rule.name.clone(),
                                source,
                            })?,
                    ),
                    _ => None,
                };
                Ok(CompiledRule { rule, compiled_regex })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;
        // Tier first, then highest priority; stable for equal keys.
        compiled.sort_by(|a, b| {
            a.rule
                .tier
                .cmp(&b.rule.tier)
                .then(b.rule.priority.cmp(&a.rule.priority))
        });
        Ok(Self { rules: compiled })
    }

    pub fn from_toml(toml_content: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(toml_content)?;
        Self::new(file.rule)
    }

    pub fn with_default_rules() -> Result<Self, RuleError> {
        Self::from_toml(DEFAULT_CLASSIFIER_RULES)
    }

    pub fn load(path: &Path) -> Result<Self, RuleError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `Unclassified` when no rule fires; there is no best guess.
    pub fn classify(&self, input: &ClassifyInput<'_>) -> Classification {
        match self.find_matching_rule(input) {
            Some(rule) => Classification::Account(rule.account),
            None => Classification::Unclassified,
        }
    }

    pub fn find_matching_rule(&self, input: &ClassifyInput<'_>) -> Option<&ClassifierRule> {
        self.rules
            .iter()
            .find(|cr| rule_matches(cr, input))
            .map(|cr| &cr.rule)
    }
}

fn rule_matches(cr: &CompiledRule, input: &ClassifyInput<'_>) -> bool {
    let rule = &cr.rule;

    if rule.direction.is_some() || rule.amount_min.is_some() || rule.amount_max.is_some() {
        let Some(amount) = input.amount else {
            return false;
        };
        match rule.direction {
            Some(Direction::Credit) if amount.is_negative() || amount.is_zero() => return false,
            Some(Direction::Debit) if !amount.is_negative() => return false,
            _ => {}
        }
        if rule.amount_min.is_some_and(|min| amount.abs() < min) {
            return false;
        }
        if rule.amount_max.is_some_and(|max| amount.abs() > max) {
            return false;
        }
    }

    let text = match rule.tier {
        RuleTier::Vendor => input.canonical_vendor.to_string(),
        RuleTier::Keyword => input.description.to_string(),
        RuleTier::Category => format!("{} {}", input.canonical_vendor, input.description),
    };
    if text.trim().is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    let pattern = rule.pattern.to_lowercase();

    match &rule.match_type {
        MatchType::Contains => lowered.contains(&pattern),
        MatchType::Exact => lowered.trim() == pattern,
        MatchType::Regex => cr
            .compiled_regex
            .as_ref()
            .is_some_and(|re| re.is_match(&text)),
        MatchType::Fuzzy { threshold } => fuzzy_score(lowered.trim(), &pattern) >= *threshold,
    }
}

fn fuzzy_score(s1: &str, s2: &str) -> f32 {
    let max_len = s1.len().max(s2.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein_distance(s1, s2) as f32 / max_len as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(vendor: &'a str, description: &'a str, cents: i64) -> ClassifyInput<'a> {
        ClassifyInput {
            canonical_vendor: vendor,
            description,
            amount: Some(Money::from_cents(cents)),
        }
    }

    fn rule(name: &str, tier: RuleTier, pattern: &str, match_type: MatchType, account: AccountCode) -> ClassifierRule {
        ClassifierRule {
            name: name.to_string(),
            tier,
            priority: 0,
            pattern: pattern.to_string(),
            match_type,
            account,
            direction: None,
            amount_min: None,
            amount_max: None,
        }
    }

    #[test]
    fn vendor_tier_beats_keyword_tier() {
        let classifier = Classifier::new(vec![
            rule("kw", RuleTier::Keyword, "liquor", MatchType::Contains, AccountCode::Meals),
            rule("vendor", RuleTier::Vendor, "plenty of liquor", MatchType::Exact, AccountCode::ClientBeverages),
        ])
        .unwrap();
        let c = classifier.classify(&input("Plenty of Liquor", "POS PURCHASE PLENTY OF LIQUO", -4_599));
        assert_eq!(c, Classification::Account(AccountCode::ClientBeverages));
    }

    #[test]
    fn keyword_tier_beats_category_fallback() {
        let classifier = Classifier::new(vec![
            rule("cat", RuleTier::Category, "gas", MatchType::Contains, AccountCode::Fuel),
            rule("kw", RuleTier::Keyword, "insurance", MatchType::Contains, AccountCode::VehicleInsurance),
        ])
        .unwrap();
        let c = classifier.classify(&input("Gas Insurance Co", "GAS INSURANCE PREMIUM", -10_000));
        assert_eq!(c, Classification::Account(AccountCode::VehicleInsurance));
    }

    #[test]
    fn priority_orders_within_a_tier() {
        let mut low = rule("low", RuleTier::Keyword, "telus", MatchType::Contains, AccountCode::OfficeSupplies);
        low.priority = 1;
        let mut high = rule("high", RuleTier::Keyword, "telus", MatchType::Contains, AccountCode::Telephone);
        high.priority = 10;
        let classifier = Classifier::new(vec![low, high]).unwrap();
        assert_eq!(
            classifier.classify(&input("", "TELUS MOBILITY", -8_000)),
            Classification::Account(AccountCode::Telephone)
        );
    }

    #[test]
    fn no_rule_means_unclassified() {
        let classifier = Classifier::new(vec![rule(
            "fuel",
            RuleTier::Vendor,
            "centex",
            MatchType::Contains,
            AccountCode::Fuel,
        )])
        .unwrap();
        assert_eq!(
            classifier.classify(&input("Mystery Shop", "MYSTERY SHOP 4411", -1_000)),
            Classification::Unclassified
        );
    }

    #[test]
    fn direction_requires_matching_sign() {
        let mut r = rule("deposits", RuleTier::Keyword, "e-transfer", MatchType::Contains, AccountCode::CharterRevenue);
        r.direction = Some(Direction::Credit);
        let classifier = Classifier::new(vec![r]).unwrap();
        assert!(classifier.classify(&input("", "E-TRANSFER 019233", 120_000)).is_classified());
        assert!(!classifier.classify(&input("", "E-TRANSFER SENT", -120_000)).is_classified());
        let no_amount = ClassifyInput {
            canonical_vendor: "",
            description: "E-TRANSFER 019233",
            amount: None,
        };
        assert_eq!(classifier.classify(&no_amount), Classification::Unclassified);
    }

    #[test]
    fn amount_bounds_use_absolute_value() {
        let mut r = rule("big fuel", RuleTier::Keyword, "fuel", MatchType::Contains, AccountCode::Fuel);
        r.amount_min = Some(Money::from_cents(10_000));
        let classifier = Classifier::new(vec![r]).unwrap();
        assert!(classifier.classify(&input("", "BULK FUEL", -10_000)).is_classified());
        assert!(!classifier.classify(&input("", "BULK FUEL", -9_999)).is_classified());
    }

    #[test]
    fn regex_is_case_insensitive() {
        let classifier = Classifier::new(vec![rule(
            "fees",
            RuleTier::Keyword,
            r"\b(service charge|nsf|overdraft)\b",
            MatchType::Regex,
            AccountCode::BankFees,
        )])
        .unwrap();
        assert!(classifier.classify(&input("", "Monthly Service Charge", -1_295)).is_classified());
        assert!(!classifier.classify(&input("", "SERVICES RENDERED", -1_295)).is_classified());
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let result = Classifier::new(vec![rule("bad", RuleTier::Keyword, "(", MatchType::Regex, AccountCode::Fuel)]);
        assert!(matches!(result, Err(RuleError::Pattern { .. })));
    }

    #[test]
    fn fuzzy_tolerates_truncation() {
        let classifier = Classifier::new(vec![rule(
            "liquor",
            RuleTier::Vendor,
            "plenty of liquor",
            MatchType::Fuzzy { threshold: 0.9 },
            AccountCode::ClientBeverages,
        )])
        .unwrap();
        assert!(classifier.classify(&input("PLENTY OF LIQUO", "", -100)).is_classified());
    }

    #[test]
    fn default_rules_load_and_cover_common_vendors() {
        let classifier = Classifier::with_default_rules().unwrap();
        assert!(!classifier.is_empty());
        assert_eq!(
            classifier.classify(&input("Fas Gas", "FAS GAS 4506", -6_000)),
            Classification::Account(AccountCode::Fuel)
        );
        assert_eq!(
            classifier.classify(&input("Plenty of Liquor", "POS PURCHASE PLENTY OF LIQUO", -4_599)),
            Classification::Account(AccountCode::ClientBeverages)
        );
    }

    #[test]
    fn fuzzy_score_identical_is_one() {
        assert_eq!(fuzzy_score("centex", "centex"), 1.0);
        assert_eq!(fuzzy_score("", ""), 1.0);
    }
}
