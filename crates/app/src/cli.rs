use clap::{Args, Parser, Subcommand};
use ledgerlink_core::{MatchConfig, Money, SourceKind};
use std::path::PathBuf;

/// Top-level CLI parser for the `ledgerlink` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ledgerlink",
    version,
    about = "Fingerprint, canonicalize and reconcile bookkeeping records"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// SQLite database file
    #[arg(long, global = true, default_value = "ledger.db")]
    pub database: PathBuf,

    /// Matching config (TOML); built-in defaults otherwise
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Commit changes. Without it every pass is a dry run.
    #[arg(long, global = true)]
    pub write: bool,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a CSV export as source records
    Ingest(IngestArgs),
    /// Match unlinked source records against charters and receipts
    Reconcile(ReconcileArgs),
    /// Remove the link of one source record
    Unlink {
        /// Source record id
        source: i64,
    },
    /// Retire a duplicate source record (delete, or supersede if it has a payment)
    Retire {
        /// Source record id
        source: i64,
    },
    /// Export pending vendor alias suggestions as curation-file CSV
    Suggestions {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List rows parked for manual review
    Review,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// CSV file to import
    pub file: PathBuf,

    /// bank_debit, bank_credit, payment_import or receipt_import. Bank rows
    /// are stored as debits or credits by the sign of their amount.
    #[arg(long)]
    pub kind: SourceKind,

    /// Column-mapping profile (TOML)
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Vendor alias curation file (CSV)
    #[arg(long)]
    pub aliases: Option<PathBuf>,

    /// Vendor pattern rules (TOML)
    #[arg(long)]
    pub vendor_rules: Option<PathBuf>,

    /// Classifier rules (TOML)
    #[arg(long)]
    pub classifier_rules: Option<PathBuf>,

    /// Update vendor and account code of already-known records
    #[arg(long)]
    pub reclassify: bool,
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Only match sources of this kind
    #[arg(long)]
    pub kind: Option<SourceKind>,

    #[command(flatten)]
    pub overrides: MatchOverrides,
}

#[derive(Debug, Clone, Default, Args)]
pub struct MatchOverrides {
    /// Absolute amount tolerance, e.g. 0.01
    #[arg(long)]
    pub tolerance: Option<Money>,

    /// Standard reconciliation window in days
    #[arg(long)]
    pub window_days: Option<i64>,

    /// Advance-payment window in days
    #[arg(long)]
    pub advance_window_days: Option<i64>,

    /// Minimum score a unique top candidate needs
    #[arg(long)]
    pub min_score: Option<i32>,
}

impl MatchOverrides {
    pub fn apply(&self, mut config: MatchConfig) -> MatchConfig {
        if let Some(tolerance) = self.tolerance {
            config.amount_tolerance = tolerance;
        }
        if let Some(days) = self.window_days {
            config.standard_window_days = days;
        }
        if let Some(days) = self.advance_window_days {
            config.advance_payment_window_days = days;
        }
        if let Some(score) = self.min_score {
            config.min_accept_score = score;
        }
        config
    }
}
