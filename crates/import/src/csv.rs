use chrono::NaiveDate;
use ledgerlink_core::{fingerprint, FingerprintError, Money, NewSourceRecord, SourceKind};
use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub date_column: Option<usize>,
    pub description_column: Option<usize>,
    pub amount_column: Option<usize>,
    pub debit_column: Option<usize>,
    pub credit_column: Option<usize>,
    pub memo_column: Option<usize>,
    pub date_format: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            date_column: Some(0),
            description_column: Some(1),
            amount_column: Some(2),
            debit_column: None,
            credit_column: None,
            memo_column: None,
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

/// How one export (bank statement, payment import, receipt import) is laid out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceImportProfile {
    pub name: String,
    pub source_kind: SourceKind,
    #[serde(default)]
    pub mapping: ColumnMapping,
    #[serde(default = "default_true")]
    pub has_header: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_true() -> bool {
    true
}

fn default_delimiter() -> String {
    ",".to_string()
}

impl SourceImportProfile {
    pub fn new(name: &str, source_kind: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            source_kind,
            mapping: ColumnMapping::default(),
            has_header: true,
            delimiter: default_delimiter(),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, CsvError> {
        toml::from_str(content).map_err(|e| CsvError::Profile(e.to_string()))
    }
}

/// One parsed line. Date and amount stay optional so incomplete rows can be
/// routed to review instead of failing the whole file.
#[derive(Debug, Clone)]
pub struct ImportRow {
    /// 1-based line number in the file, header included.
    pub line: usize,
    pub occurred_on: Option<NaiveDate>,
    pub description: String,
    pub memo: Option<String>,
    pub amount: Option<Money>,
    pub raw: String,
}

impl ImportRow {
    /// `kind` is the file's declared kind; bank rows are re-signed per row.
    pub fn into_source_record(self, kind: SourceKind) -> Result<NewSourceRecord, FingerprintError> {
        let fp = fingerprint(self.occurred_on, &self.description, self.amount)?;
        match (self.occurred_on, self.amount) {
            (Some(occurred_on), Some(amount)) => Ok(NewSourceRecord {
                occurred_on,
                raw_description: self.description,
                memo: self.memo,
                amount,
                source_kind: kind.for_amount(amount),
                fingerprint: fp,
            }),
            _ => Err(FingerprintError::IncompleteRecord {
                missing: "date or amount",
                context: self.raw,
            }),
        }
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid import profile: {0}")]
    Profile(String),
    #[error("Profile '{0}' maps no date column")]
    NoDateColumn(String),
    #[error("Profile '{0}' maps neither an amount column nor a debit/credit pair")]
    NoAmountColumns(String),
}

pub fn read_rows<R: Read>(data: R, profile: &SourceImportProfile) -> Result<Vec<ImportRow>, CsvError> {
    let mapping = &profile.mapping;
    if mapping.date_column.is_none() {
        return Err(CsvError::NoDateColumn(profile.name.clone()));
    }
    let has_pair = mapping.debit_column.is_some() && mapping.credit_column.is_some();
    if mapping.amount_column.is_none() && !has_pair {
        return Err(CsvError::NoAmountColumns(profile.name.clone()));
    }

    let delimiter = profile.delimiter.as_bytes().first().copied().unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(profile.has_header)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    let offset = if profile.has_header { 2 } else { 1 };
    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let field = |col: Option<usize>| {
            col.and_then(|c| record.get(c))
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let occurred_on = field(mapping.date_column).and_then(|s| parse_date(s, &mapping.date_format));
        let amount = if mapping.amount_column.is_some() {
            field(mapping.amount_column).and_then(|s| Money::parse(s).ok())
        } else {
            let debit = field(mapping.debit_column).and_then(|s| Money::parse(s).ok());
            let credit = field(mapping.credit_column).and_then(|s| Money::parse(s).ok());
            match (debit, credit) {
                (Some(d), None) => Some(-d.abs()),
                (None, Some(c)) => Some(c.abs()),
                (Some(d), Some(c)) => Some(c.abs() - d.abs()),
                (None, None) => None,
            }
        };

        rows.push(ImportRow {
            line: idx + offset,
            occurred_on,
            description: field(mapping.description_column).unwrap_or_default().to_string(),
            memo: field(mapping.memo_column).map(str::to_string),
            amount,
            raw: record.iter().collect::<Vec<_>>().join(","),
        });
    }

    Ok(rows)
}

fn parse_date(s: &str, format: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Some(date);
    }

    ["%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d", "%m-%d-%Y", "%d-%b-%Y", "%b %d, %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}
