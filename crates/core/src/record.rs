use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::account::Classification;
use crate::fingerprint::Fingerprint;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentId(pub i64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    BankDebit,
    BankCredit,
    PaymentImport,
    ReceiptImport,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::BankDebit => "bank_debit",
            SourceKind::BankCredit => "bank_credit",
            SourceKind::PaymentImport => "payment_import",
            SourceKind::ReceiptImport => "receipt_import",
        }
    }

    /// Money coming in is matched against charters, money going out against receipts.
    pub fn target_kind(self) -> TargetKind {
        match self {
            SourceKind::BankCredit | SourceKind::PaymentImport => TargetKind::Charter,
            SourceKind::BankDebit | SourceKind::ReceiptImport => TargetKind::Receipt,
        }
    }

    pub fn is_bank(self) -> bool {
        matches!(self, SourceKind::BankDebit | SourceKind::BankCredit)
    }

    /// Kind of one statement row. Bank statements carry both directions, so
    /// the amount's sign decides; other imports keep their declared kind.
    pub fn for_amount(self, amount: Money) -> SourceKind {
        match self {
            SourceKind::BankDebit | SourceKind::BankCredit if amount.is_negative() => SourceKind::BankDebit,
            SourceKind::BankDebit | SourceKind::BankCredit => SourceKind::BankCredit,
            other => other,
        }
    }

    /// Every kind a file declared as `self` can produce.
    pub fn row_kinds(self) -> &'static [SourceKind] {
        match self {
            SourceKind::BankDebit | SourceKind::BankCredit => &[SourceKind::BankDebit, SourceKind::BankCredit],
            SourceKind::PaymentImport => &[SourceKind::PaymentImport],
            SourceKind::ReceiptImport => &[SourceKind::ReceiptImport],
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_debit" => Ok(SourceKind::BankDebit),
            "bank_credit" => Ok(SourceKind::BankCredit),
            "payment_import" => Ok(SourceKind::PaymentImport),
            "receipt_import" => Ok(SourceKind::ReceiptImport),
            other => Err(format!("Unknown source kind: '{other}'")),
        }
    }
}

/// A fingerprinted record that has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSourceRecord {
    pub occurred_on: NaiveDate,
    pub raw_description: String,
    pub memo: Option<String>,
    pub amount: Money,
    pub source_kind: SourceKind,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: SourceId,
    pub occurred_on: NaiveDate,
    pub raw_description: String,
    pub memo: Option<String>,
    /// Signed; debits negative.
    pub amount: Money,
    pub source_kind: SourceKind,
    pub fingerprint: Fingerprint,
    pub canonical_vendor: Option<String>,
    pub classification: Classification,
    /// The only field that changes after ingestion.
    pub linked_target: Option<TargetId>,
    pub superseded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Unlinked,
    Linked(TargetId),
}

impl SourceRecord {
    pub fn link_state(&self) -> LinkState {
        match self.linked_target {
            Some(target) => LinkState::Linked(target),
            None => LinkState::Unlinked,
        }
    }

    /// Free text searched for identifier hints.
    pub fn hint_text(&self) -> String {
        match &self.memo {
            Some(memo) => format!("{} {}", self.raw_description, memo),
            None => self.raw_description.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Charter,
    Receipt,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Charter => "charter",
            TargetKind::Receipt => "receipt",
        }
    }
}

impl std::str::FromStr for TargetKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charter" => Ok(TargetKind::Charter),
            "receipt" => Ok(TargetKind::Receipt),
            other => Err(format!("Unknown target kind: '{other}'")),
        }
    }
}

/// Amount fields of a target, in the fixed order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountField {
    DueAmount,
    Balance,
    Retainer,
}

impl AmountField {
    pub fn as_str(self) -> &'static str {
        match self {
            AmountField::DueAmount => "due_amount",
            AmountField::Balance => "balance",
            AmountField::Retainer => "retainer",
        }
    }

    pub fn is_primary(self) -> bool {
        matches!(self, AmountField::DueAmount)
    }
}

impl std::str::FromStr for AmountField {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "due_amount" => Ok(AmountField::DueAmount),
            "balance" => Ok(AmountField::Balance),
            "retainer" => Ok(AmountField::Retainer),
            other => Err(format!("Unknown amount field: '{other}'")),
        }
    }
}

/// A charter booking or a standalone receipt that payments are attributed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: TargetId,
    pub kind: TargetKind,
    /// Six-digit reserve number for charters.
    pub reference: Option<String>,
    pub event_date: NaiveDate,
    pub due_amount: Money,
    pub retainer_amount: Option<Money>,
    pub paid_amount: Money,
    /// Always `due_amount - paid_amount`; recomputed from linked payments.
    pub balance: Money,
}

impl TargetRecord {
    pub fn amount_fields(&self) -> Vec<(AmountField, Money)> {
        let mut fields = vec![
            (AmountField::DueAmount, self.due_amount),
            (AmountField::Balance, self.balance),
        ];
        if let Some(retainer) = self.retainer_amount {
            fields.push((AmountField::Retainer, retainer));
        }
        fields
    }
}

/// A realized link from one source record to one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub source_id: SourceId,
    pub target_id: TargetId,
    pub amount: Money,
    pub matched_field: Option<AmountField>,
    pub score: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Link,
    Unlink,
    Reclassify,
    Delete,
    Supersede,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Link => "link",
            AuditAction::Unlink => "unlink",
            AuditAction::Reclassify => "reclassify",
            AuditAction::Delete => "delete",
            AuditAction::Supersede => "supersede",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link" => Ok(AuditAction::Link),
            "unlink" => Ok(AuditAction::Unlink),
            "reclassify" => Ok(AuditAction::Reclassify),
            "delete" => Ok(AuditAction::Delete),
            "supersede" => Ok(AuditAction::Supersede),
            other => Err(format!("Unknown audit action: '{other}'")),
        }
    }
}

/// Append-only record of one mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Option<i64>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub process: String,
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: i64,
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub detail: serde_json::Value,
}
