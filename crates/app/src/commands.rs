use anyhow::Context;
use ledgerlink_core::{MatchConfig, SourceId};
use ledgerlink_import::{AliasMatch, Provenance, SourceImportProfile, VendorAlias, VendorSuggestion};
use ledgerlink_storage::{
    get_review_queue, get_suggestions, retire_source, unlink, DbPool, LinkError, WriteMode,
};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use crate::cli::{IngestArgs, ReconcileArgs};
use crate::ingest::{read_file, run_ingest, Engines, IngestOptions, RuleSources};
use crate::reconcile::{run_reconcile, ReconcileOptions};
use crate::summary::RunSummary;

pub async fn ingest(
    pool: &DbPool,
    args: &IngestArgs,
    mode: WriteMode,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    let profile = match &args.profile {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read profile {}", path.display()))?;
            let profile = SourceImportProfile::from_toml(&content)?;
            if profile.source_kind.row_kinds() != args.kind.row_kinds() {
                anyhow::bail!(
                    "profile '{}' is for {} but --kind is {}",
                    profile.name,
                    profile.source_kind,
                    args.kind
                );
            }
            profile
        }
        None => SourceImportProfile::new(&profile_name(&args.file), args.kind),
    };

    let engines = Engines::load(&RuleSources {
        aliases: args.aliases.clone(),
        vendor_patterns: args.vendor_rules.clone(),
        classifier_rules: args.classifier_rules.clone(),
    })?;
    let rows = read_file(&args.file, &profile)?;

    let options = IngestOptions {
        kind: args.kind,
        reclassify: args.reclassify,
        mode,
    };
    run_ingest(pool, rows, &engines, &options, summary).await
}

fn profile_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("import")
        .to_string()
}

pub async fn reconcile(
    pool: &DbPool,
    args: &ReconcileArgs,
    config: MatchConfig,
    mode: WriteMode,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    let config = args.overrides.apply(config);
    config.validate()?;
    let options = ReconcileOptions {
        kind: args.kind,
        config,
        mode,
    };
    run_reconcile(pool, &options, summary).await?;
    Ok(())
}

pub async fn unlink_source(pool: &DbPool, source: i64, mode: WriteMode, run_id: &str) -> anyhow::Result<()> {
    match unlink(pool, SourceId(source), mode, run_id).await {
        Ok(result) => {
            info!(
                source = %result.source_id,
                target = %result.target_id,
                balance = %result.balance_after,
                committed = result.committed,
                "Unlink"
            );
            println!(
                "{} {} from {} (balance {} -> {})",
                if result.committed { "Unlinked" } else { "Would unlink" },
                result.source_id,
                result.target_id,
                result.balance_before,
                result.balance_after
            );
            Ok(())
        }
        Err(LinkError::NotLinked(id)) => {
            warn!(source = %id, "Nothing to unlink");
            println!("{id} is not linked");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn retire(pool: &DbPool, source: i64, mode: WriteMode, run_id: &str) -> anyhow::Result<()> {
    let id = SourceId(source);
    match retire_source(pool, id, mode, run_id).await? {
        Some(outcome) => println!(
            "{} {id}: {outcome:?}",
            if mode.is_write() { "Retired" } else { "Would retire" }
        ),
        None => println!("{id} does not exist or is already superseded"),
    }
    Ok(())
}

/// Suggestions are written in the curation-file layout, marked as
/// pattern-suggested, so promoting one is a copy-paste into the alias file.
pub async fn export_suggestions(pool: &DbPool, output: Option<&Path>) -> anyhow::Result<usize> {
    let suggestions = get_suggestions(pool).await?;
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    write_suggestions(sink, &suggestions)?;
    Ok(suggestions.len())
}

pub fn write_suggestions<W: Write>(sink: W, suggestions: &[VendorSuggestion]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(sink);
    for s in suggestions {
        writer.serialize(VendorAlias {
            raw: s.raw_text.clone(),
            canonical: s.suggested_name.clone(),
            match_kind: Some(AliasMatch::Exact),
            confidence: Some(s.confidence),
            provenance: Some(Provenance::PatternSuggested),
            note: Some(match &s.category {
                Some(category) => format!("{} ({category})", s.rule),
                None => s.rule.clone(),
            }),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub async fn review(pool: &DbPool, json: bool) -> anyhow::Result<()> {
    let queue = get_review_queue(pool).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&queue)?);
        return Ok(());
    }
    if queue.is_empty() {
        println!("Review queue is empty");
    }
    for item in queue {
        println!("{:>5}  {:<14}  line {:<5}  {:<16}  {}", item.id, item.source_kind, item.line, item.reason, item.raw);
    }
    Ok(())
}
