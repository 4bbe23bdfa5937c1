//! Vendor canonicalization.
//!
//! Priority order: the curated alias table, then structural pattern rules,
//! then light cleanup of the original text. Aliases and rules are both data;
//! adding one never touches this module.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::rules::RuleError;
use crate::util::fold;

pub const DEFAULT_VENDOR_PATTERNS: &str = include_str!("../rules/vendor_patterns.toml");

const PATTERN_CONFIDENCE: f32 = 0.8;
const FALLBACK_CONFIDENCE: f32 = 0.3;
const FAMILY_SUGGESTION_CONFIDENCE: f32 = 0.5;
const CATEGORY_SUGGESTION_CONFIDENCE: f32 = 0.25;

#[derive(Debug, Error)]
pub enum AliasError {
    #[error("IO error reading alias file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Alias file error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Alias on line {line} is invalid: {reason}")]
    Invalid { line: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasMatch {
    #[default]
    Exact,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    ManuallyVerified,
    PatternSuggested,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::ManuallyVerified => "manually_verified",
            Provenance::PatternSuggested => "pattern_suggested",
        }
    }
}

/// One row of the curation file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorAlias {
    pub raw: String,
    pub canonical: String,
    #[serde(rename = "match", default)]
    pub match_kind: Option<AliasMatch>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub note: Option<String>,
}

impl VendorAlias {
    pub fn exact(raw: &str, canonical: &str) -> Self {
        Self {
            raw: raw.to_string(),
            canonical: canonical.to_string(),
            match_kind: Some(AliasMatch::Exact),
            confidence: Some(1.0),
            provenance: Some(Provenance::ManuallyVerified),
            note: None,
        }
    }

    pub fn contains(raw: &str, canonical: &str) -> Self {
        Self {
            match_kind: Some(AliasMatch::Contains),
            ..Self::exact(raw, canonical)
        }
    }
}

struct AliasEntry {
    key: String,
    match_kind: AliasMatch,
    alias: VendorAlias,
}

/// Read-only view of the curation file.
#[derive(Default)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn new(aliases: Vec<VendorAlias>) -> Self {
        let mut entries: Vec<AliasEntry> = aliases
            .into_iter()
            .filter(|a| !a.raw.trim().is_empty())
            .map(|alias| AliasEntry {
                key: fold(&alias.raw),
                match_kind: alias.match_kind.unwrap_or_default(),
                alias,
            })
            .collect();
        // Exact entries first, then the longest substring.
        entries.sort_by(|a, b| {
            (a.match_kind == AliasMatch::Contains)
                .cmp(&(b.match_kind == AliasMatch::Contains))
                .then(b.key.len().cmp(&a.key.len()))
        });
        Self { entries }
    }

    /// Header: `raw,canonical,match,confidence,provenance,note`; only the
    /// first two columns are required.
    pub fn from_csv<R: Read>(data: R) -> Result<Self, AliasError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(data);
        let mut aliases = Vec::new();
        for (idx, row) in reader.deserialize::<VendorAlias>().enumerate() {
            let alias = row?;
            if alias.canonical.trim().is_empty() {
                return Err(AliasError::Invalid {
                    line: idx + 2,
                    reason: format!("'{}' has no canonical name", alias.raw),
                });
            }
            if let Some(c) = alias.confidence {
                if !(0.0..=1.0).contains(&c) {
                    return Err(AliasError::Invalid {
                        line: idx + 2,
                        reason: format!("confidence {c} outside 0..=1"),
                    });
                }
            }
            aliases.push(alias);
        }
        Ok(Self::new(aliases))
    }

    pub fn load(path: &Path) -> Result<Self, AliasError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv(file)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `folded` must already be upper-cased and whitespace-collapsed.
    pub fn lookup(&self, folded: &str) -> Option<&VendorAlias> {
        self.entries
            .iter()
            .find(|e| match e.match_kind {
                AliasMatch::Exact => e.key == folded,
                AliasMatch::Contains => folded.contains(&e.key),
            })
            .map(|e| &e.alias)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripRule {
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyRule {
    pub name: String,
    pub pattern: String,
    pub canonical: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Default, Deserialize)]
struct PatternFile {
    #[serde(default)]
    strip: Vec<StripRule>,
    #[serde(default)]
    family: Vec<FamilyRule>,
    #[serde(default)]
    category: Vec<CategoryRule>,
}

fn compile(name: &str, pattern: &str) -> Result<Regex, RuleError> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| RuleError::Pattern {
            name: name.to_string(),
            source,
        })
}

/// Ordered structural rules, compiled once.
pub struct VendorPatterns {
    strip: Vec<(String, Regex)>,
    family: Vec<(FamilyRule, Regex)>,
    category: Vec<(String, Regex)>,
}

impl VendorPatterns {
    pub fn from_toml(content: &str) -> Result<Self, RuleError> {
        let file: PatternFile = toml::from_str(content)?;
        Ok(Self {
            strip: file
                .strip
                .into_iter()
                .map(|r| Ok((r.name.clone(), compile(&r.name, &r.pattern)?)))
                .collect::<Result<_, RuleError>>()?,
            family: file
                .family
                .into_iter()
                .map(|r| {
                    let re = compile(&r.name, &r.pattern)?;
                    Ok((r, re))
                })
                .collect::<Result<_, RuleError>>()?,
            category: file
                .category
                .into_iter()
                .map(|r| Ok((r.name.clone(), compile(&r.name, &r.pattern)?)))
                .collect::<Result<_, RuleError>>()?,
        })
    }

    pub fn load(path: &Path) -> Result<Self, RuleError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn with_defaults() -> Result<Self, RuleError> {
        Self::from_toml(DEFAULT_VENDOR_PATTERNS)
    }

    /// Applies every strip rule in order, re-collapsing whitespace after each.
    pub fn strip_noise(&self, folded: &str) -> String {
        self.strip.iter().fold(folded.to_string(), |text, (_, re)| {
            fold(&re.replace_all(&text, " "))
        })
    }

    fn family_of(&self, text: &str) -> Option<&FamilyRule> {
        self.family
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(rule, _)| rule)
    }

    fn category_of(&self, text: &str) -> Option<&str> {
        self.category
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorSource {
    Alias,
    Pattern,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalVendor {
    pub name: String,
    pub source: VendorSource,
    pub confidence: f32,
}

/// A pattern-derived guess awaiting human promotion into the alias file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorSuggestion {
    pub raw_text: String,
    pub suggested_name: String,
    pub category: Option<String>,
    pub confidence: f32,
    pub rule: String,
}

pub struct Canonicalizer {
    aliases: AliasTable,
    patterns: VendorPatterns,
}

impl Canonicalizer {
    pub fn new(aliases: AliasTable, patterns: VendorPatterns) -> Self {
        Self { aliases, patterns }
    }

    pub fn canonicalize(&self, raw: &str) -> CanonicalVendor {
        self.canonicalize_with_suggestion(raw).0
    }

    /// Suggestion mode: also returns a low-confidence suggestion when no alias
    /// matched but a family or category rule fired. Suggestions are never
    /// applied as aliases here.
    pub fn canonicalize_with_suggestion(
        &self,
        raw: &str,
    ) -> (CanonicalVendor, Option<VendorSuggestion>) {
        let folded = fold(raw);
        if let Some(alias) = self.aliases.lookup(&folded) {
            return (from_alias(alias), None);
        }

        let stripped = self.patterns.strip_noise(&folded);
        if let Some(alias) = self.aliases.lookup(&stripped) {
            return (from_alias(alias), None);
        }

        if let Some(family) = self.patterns.family_of(&stripped) {
            let vendor = CanonicalVendor {
                name: family.canonical.clone(),
                source: VendorSource::Pattern,
                confidence: PATTERN_CONFIDENCE,
            };
            let suggestion = VendorSuggestion {
                raw_text: folded,
                suggested_name: family.canonical.clone(),
                category: self.patterns.category_of(&stripped).map(str::to_string),
                confidence: FAMILY_SUGGESTION_CONFIDENCE,
                rule: family.name.clone(),
            };
            return (vendor, Some(suggestion));
        }

        let cleaned = if stripped.is_empty() { folded.clone() } else { stripped };
        let suggestion = self.patterns.category_of(&cleaned).map(|category| VendorSuggestion {
            raw_text: folded.clone(),
            suggested_name: cleaned.clone(),
            category: Some(category.to_string()),
            confidence: CATEGORY_SUGGESTION_CONFIDENCE,
            rule: format!("category:{category}"),
        });
        let vendor = CanonicalVendor {
            name: cleaned,
            source: VendorSource::Fallback,
            confidence: FALLBACK_CONFIDENCE,
        };
        (vendor, suggestion)
    }
}

fn from_alias(alias: &VendorAlias) -> CanonicalVendor {
    CanonicalVendor {
        name: alias.canonical.clone(),
        source: VendorSource::Alias,
        confidence: alias.confidence.unwrap_or(1.0),
    }
}
