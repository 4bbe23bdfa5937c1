pub mod account;
pub mod config;
pub mod fingerprint;
pub mod money;
pub mod period;
pub mod record;

pub use account::{AccountCode, Classification, CHART_OF_ACCOUNTS};
pub use config::{ConfigError, MatchConfig};
pub use fingerprint::{fingerprint, normalize_description, DuplicateGuard, Fingerprint, FingerprintError};
pub use money::{Money, MoneyError};
pub use period::{day_gap, DateRange, ReconciliationWindow};
pub use record::{
    AmountField, AuditAction, AuditEntry, LinkState, NewSourceRecord, Payment, PaymentId,
    SourceId, SourceKind, SourceRecord, TargetId, TargetKind, TargetRecord,
};
