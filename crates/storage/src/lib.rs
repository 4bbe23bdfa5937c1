pub mod audit;
pub mod db;
pub mod links;
pub mod sources;
pub mod suggestions;
pub mod targets;

pub use audit::{get_audit_for_process, get_audit_trail};
pub use db::{create_db, is_fatal, DbPool, StorageError, WriteMode, SCHEMA_VERSION};
pub use links::{
    apply_link, count_links, get_payments_for_target, unlink, LinkError, LinkRequest, LinkResult,
    UnlinkResult,
};
pub use sources::{
    count_sources, get_review_queue, get_source, get_unlinked_sources, insert_source,
    load_fingerprints, queue_for_review, reclassify_source, retire_source, ReclassifyOutcome,
    RetireOutcome, ReviewItem,
};
pub use suggestions::{get_suggestions, record_suggestion};
pub use targets::{
    get_target, get_target_pool, get_targets_by_ids, insert_ledger_entry, insert_target,
    register_cheque, register_short_code, resolve_hints, NewTargetRecord,
};
