pub mod csv;
pub mod hints;
pub mod match_engine;
pub mod rules;
pub mod vendor;
pub(crate) mod util;

pub use csv::{read_rows, ColumnMapping, CsvError, ImportRow, SourceImportProfile};
pub use hints::{extract_hints, IdentifierHint};
pub use match_engine::{
    compare_amount, decide, find_candidates, score, AmountMatch, MatchCandidate, MatchDecision,
};
pub use rules::{
    Classifier, ClassifierRule, ClassifyInput, Direction, MatchType as RuleMatchType, RuleError,
    RuleTier,
};
pub use vendor::{
    AliasError, AliasMatch, AliasTable, CanonicalVendor, Canonicalizer, Provenance, VendorAlias,
    VendorPatterns, VendorSource, VendorSuggestion,
};
