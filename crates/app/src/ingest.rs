use anyhow::Context;
use ledgerlink_core::{DuplicateGuard, FingerprintError, SourceKind};
use ledgerlink_import::{
    read_rows, AliasTable, Canonicalizer, Classifier, ClassifyInput, ImportRow, SourceImportProfile,
    VendorPatterns,
};
use ledgerlink_storage::{
    insert_source, is_fatal, load_fingerprints, queue_for_review, reclassify_source,
    record_suggestion, DbPool, ReclassifyOutcome, WriteMode,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::summary::RunSummary;

/// Where the rule data comes from. `None` means the built-in defaults (or,
/// for aliases, an empty curation table).
#[derive(Debug, Clone, Default)]
pub struct RuleSources {
    pub aliases: Option<PathBuf>,
    pub vendor_patterns: Option<PathBuf>,
    pub classifier_rules: Option<PathBuf>,
}

pub struct Engines {
    pub canonicalizer: Canonicalizer,
    pub classifier: Classifier,
}

impl Engines {
    pub fn load(sources: &RuleSources) -> anyhow::Result<Self> {
        let aliases = match &sources.aliases {
            Some(path) => AliasTable::load(path)
                .with_context(|| format!("failed to load vendor aliases from {}", path.display()))?,
            None => AliasTable::default(),
        };
        let patterns = match &sources.vendor_patterns {
            Some(path) => VendorPatterns::load(path)
                .with_context(|| format!("failed to load vendor patterns from {}", path.display()))?,
            None => VendorPatterns::with_defaults()?,
        };
        let classifier = match &sources.classifier_rules {
            Some(path) => Classifier::load(path)
                .with_context(|| format!("failed to load classifier rules from {}", path.display()))?,
            None => Classifier::with_default_rules()?,
        };
        info!(aliases = aliases.len(), classifier_rules = classifier.len(), "Loaded rule data");

        Ok(Self {
            canonicalizer: Canonicalizer::new(aliases, patterns),
            classifier,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub kind: SourceKind,
    /// On a fingerprint collision, refresh vendor and account code in place.
    pub reclassify: bool,
    pub mode: WriteMode,
}

pub fn read_file(path: &Path, profile: &SourceImportProfile) -> anyhow::Result<Vec<ImportRow>> {
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_rows(file, profile).with_context(|| format!("failed to read {}", path.display()))
}

/// Fingerprints, dedupes, canonicalizes and classifies each row, then stores
/// it. The whole file runs in one transaction that is rolled back in
/// dry-run mode.
pub async fn run_ingest(
    pool: &DbPool,
    rows: Vec<ImportRow>,
    engines: &Engines,
    options: &IngestOptions,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    let kind = options.kind;
    let mut guards = HashMap::new();
    for row_kind in kind.row_kinds() {
        let known = load_fingerprints(pool, *row_kind).await?;
        info!(run = %summary.run_id, kind = %row_kind, known = known.len(), "Loaded fingerprints");
        guards.insert(*row_kind, DuplicateGuard::new(known));
    }
    info!(run = %summary.run_id, kind = %kind, rows = rows.len(), "Starting ingest");

    let mut tx = pool.begin().await?;
    for row in rows {
        let line = row.line;
        let raw = row.raw.clone();
        let record = match row.into_source_record(kind) {
            Ok(record) => record,
            Err(FingerprintError::IncompleteRecord { missing, .. }) => {
                warn!(line, %raw, missing, "Incomplete row sent to review");
                let reason = format!("missing {missing}");
                let queued = queue_for_review(&mut tx, kind, line, &raw, &reason, &summary.run_id).await;
                if per_record(queued, line, summary)?.is_some() {
                    summary.incomplete += 1;
                }
                continue;
            }
        };

        let (vendor, suggestion) = engines
            .canonicalizer
            .canonicalize_with_suggestion(&record.raw_description);
        let classification = engines.classifier.classify(&ClassifyInput {
            canonical_vendor: &vendor.name,
            description: &record.raw_description,
            amount: Some(record.amount),
        });

        let admitted = guards
            .entry(record.source_kind)
            .or_insert_with(|| DuplicateGuard::new(Vec::new()))
            .admit(&record.fingerprint);
        if !admitted {
            if options.reclassify {
                let outcome = reclassify_source(
                    &mut tx,
                    record.source_kind,
                    &record.fingerprint,
                    Some(&vendor.name),
                    classification,
                    &summary.run_id,
                )
                .await;
                match per_record(outcome, line, summary)? {
                    Some(ReclassifyOutcome::Updated(_)) => summary.reclassified += 1,
                    Some(_) => summary.duplicates += 1,
                    None => {}
                }
            } else {
                summary.duplicates += 1;
            }
            continue;
        }

        let inserted = insert_source(&mut tx, &record, Some(&vendor.name), classification).await;
        match per_record(inserted, line, summary)? {
            Some(Some(_)) => summary.ingested += 1,
            Some(None) => summary.duplicates += 1,
            None => continue,
        }

        if let Some(suggestion) = suggestion {
            let recorded = record_suggestion(&mut tx, &suggestion).await;
            if per_record(recorded, line, summary)? == Some(true) {
                summary.suggestions += 1;
            }
        }
    }

    if options.mode.is_write() {
        tx.commit().await?;
    } else {
        tx.rollback().await?;
    }

    info!(
        run = %summary.run_id,
        ingested = summary.ingested,
        duplicates = summary.duplicates,
        reclassified = summary.reclassified,
        incomplete = summary.incomplete,
        "Ingest finished"
    );
    Ok(())
}

/// Per-record database errors are counted and skipped; fatal ones abort.
fn per_record<T>(result: Result<T, sqlx::Error>, line: usize, summary: &mut RunSummary) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_fatal(&e) => Err(e.into()),
        Err(e) => {
            error!(line, error = %e, "Row failed");
            summary.errored += 1;
            Ok(None)
        }
    }
}
