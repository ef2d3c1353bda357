//! Cleanup of blobs left behind by partially failed writes.
//!
//! Uploads and deletes that fail halfway append the affected filename to the
//! `orphans` key. Reconciliation walks that list and deletes every blob the
//! carousel no longer references.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::state::load_carousel;
use super::{CarouselService, OrphanRecord, ORPHANS_KEY};
use crate::error::{CarouselError, StoreError};
use crate::store::{CasOutcome, MetadataStore};

/// What a reconciliation pass did (or would do, for a dry run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Number of orphan records examined
    pub examined: usize,

    /// Blobs deleted, or that would be deleted on a dry run
    pub deleted: Vec<String>,

    /// Blobs the carousel still references; their records are dropped
    pub still_referenced: Vec<String>,

    /// Blobs whose deletion failed; their records are kept
    pub failed: Vec<String>,
}

pub(crate) async fn load_orphans(
    store: &dyn MetadataStore,
) -> Result<(Vec<OrphanRecord>, u64), StoreError> {
    match store.get(ORPHANS_KEY).await? {
        None => Ok((Vec::new(), 0)),
        Some(versioned) => {
            let records =
                serde_json::from_str(&versioned.value).map_err(|e| StoreError::Corrupt {
                    key: ORPHANS_KEY.to_string(),
                    message: e.to_string(),
                })?;
            Ok((records, versioned.version))
        }
    }
}

/// Rewrite the orphan list with compare-and-swap, retrying on conflict.
async fn update_orphans<F>(
    store: &dyn MetadataStore,
    max_attempts: u32,
    mut update: F,
) -> Result<(), CarouselError>
where
    F: FnMut(&mut Vec<OrphanRecord>) + Send,
{
    for _ in 0..max_attempts {
        let (mut records, version) = load_orphans(store).await?;
        update(&mut records);

        let encoded = serde_json::to_string(&records)
            .map_err(|e| CarouselError::InvalidRequest(e.to_string()))?;
        if let CasOutcome::Written { .. } =
            store.compare_and_swap(ORPHANS_KEY, version, &encoded).await?
        {
            return Ok(());
        }
    }

    Err(CarouselError::Contention {
        key: ORPHANS_KEY,
        attempts: max_attempts,
    })
}

/// Note a blob that may be unreferenced. Failures are logged, not returned,
/// since this only ever runs on an error path already being reported.
pub(crate) async fn record_orphan(
    store: &dyn MetadataStore,
    filename: &str,
    reason: &str,
    max_attempts: u32,
) {
    let record = OrphanRecord {
        filename: filename.to_string(),
        reason: reason.to_string(),
        recorded_at: Utc::now(),
    };

    let result = update_orphans(store, max_attempts, |records| {
        records.push(record.clone());
    })
    .await;

    match result {
        Ok(()) => warn!(key = %filename, reason, "Recorded orphaned blob"),
        Err(e) => error!(
            key = %filename,
            reason,
            "Could not record orphaned blob, it must be cleaned up by hand: {}",
            e
        ),
    }
}

/// Delete recorded orphan blobs that the carousel no longer references.
///
/// With `dry_run` nothing is deleted and the orphan list is left as is; the
/// report lists what a real run would delete.
pub async fn reconcile_orphans(
    service: &CarouselService,
    dry_run: bool,
) -> Result<ReconcileReport, CarouselError> {
    let (records, _) = load_orphans(service.metadata()).await?;
    let mut report = ReconcileReport {
        examined: records.len(),
        ..Default::default()
    };

    if records.is_empty() {
        debug!("No orphaned blobs recorded");
        return Ok(report);
    }

    let (carousel, _) = load_carousel(service.metadata()).await?;
    let referenced: HashSet<&str> = carousel.iter().map(|p| p.filename.as_str()).collect();

    let mut handled = HashSet::new();
    for record in &records {
        if !handled.insert(record.filename.clone()) {
            continue;
        }

        if referenced.contains(record.filename.as_str()) {
            debug!(key = %record.filename, "Orphan record refers to a live photo");
            report.still_referenced.push(record.filename.clone());
            continue;
        }

        if dry_run {
            report.deleted.push(record.filename.clone());
            continue;
        }

        match service.objects().delete(&record.filename).await {
            Ok(()) => {
                info!(key = %record.filename, reason = %record.reason, "Deleted orphaned blob");
                report.deleted.push(record.filename.clone());
            }
            Err(e) => {
                warn!(key = %record.filename, "Failed to delete orphaned blob: {}", e);
                report.failed.push(record.filename.clone());
            }
        }
    }

    if !dry_run {
        let failed: HashSet<String> = report.failed.iter().cloned().collect();
        // Records appended while this pass ran are not in `handled` and survive
        update_orphans(
            service.metadata(),
            service.max_attempts(),
            |current| {
                current.retain(|r| !handled.contains(&r.filename) || failed.contains(&r.filename))
            },
        )
        .await?;
    }

    Ok(report)
}
