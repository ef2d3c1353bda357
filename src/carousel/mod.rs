//! Carousel state and operations.
//!
//! The carousel is an ordered list of photo records; position in the list is
//! the display order. Alongside it the metadata store holds a `current`
//! pointer (an index, only meaningful modulo the carousel length) and the
//! `autoinc` counter (the last id handed out).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │  RequestContext (auth + CarouselState)
//!                      ▼
//! ┌─────────────────────────────────────────┐   ┌───────────────────┐
//! │            CarouselService              │◄──│ RotationScheduler │
//! │  upload / delete / reorder / set_current│   └───────────────────┘
//! │  versioned writes, retry on conflict    │
//! └──────────┬─────────────────┬────────────┘
//!            ▼                 ▼
//!     MetadataStore       ObjectStore
//! ```

mod reconcile;
mod rotation;
mod service;
mod state;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CarouselError;

pub use reconcile::{reconcile_orphans, ReconcileReport};
pub use rotation::{RotationOutcome, RotationScheduler};
pub use service::{CarouselService, NewPhoto, DEFAULT_MAX_ATTEMPTS};
pub use state::{load_carousel, load_current, load_next_id, load_state, CarouselState};

/// Metadata key holding the JSON array of photo records.
pub const CAROUSEL_KEY: &str = "carousel";

/// Metadata key holding the display pointer.
pub const CURRENT_KEY: &str = "current";

/// Metadata key holding the last id handed out.
pub const COUNTER_KEY: &str = "autoinc";

/// Metadata key holding blobs awaiting cleanup.
pub const ORPHANS_KEY: &str = "orphans";

/// Title used when an upload names neither a title nor a file.
pub const UNTITLED: &str = "Untitled";

/// A photo in the carousel. Never mutated after upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: u64,
    pub title: String,

    /// Object store key of the image bytes
    pub filename: String,
}

/// The ordered photo list.
pub type Carousel = Vec<PhotoRecord>;

/// A blob that may no longer be referenced by the carousel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanRecord {
    pub filename: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Position of the record with this id.
pub fn position_of(carousel: &[PhotoRecord], id: u64) -> Option<usize> {
    carousel.iter().position(|photo| photo.id == id)
}

/// Effective display index for a pointer, or `None` for an empty carousel.
pub fn effective_index(current: usize, len: usize) -> Option<usize> {
    if len == 0 {
        None
    } else {
        Some(current % len)
    }
}

/// Pointer value after one rotation step, or `None` for an empty carousel.
pub fn next_index(current: usize, len: usize) -> Option<usize> {
    effective_index(current, len).map(|index| (index + 1) % len)
}

/// Build the reordered carousel for a full list of ids.
///
/// Checks run in order and fail fast: the list must be non-empty, free of
/// duplicates, and exactly as long as the carousel. Ids that no longer exist
/// are skipped, but if that leaves the result shorter than the carousel the
/// reorder is refused rather than dropping photos.
pub fn plan_reorder(carousel: &[PhotoRecord], order: &[u64]) -> Result<Carousel, CarouselError> {
    if order.is_empty() {
        return Err(CarouselError::EmptyOrder);
    }

    let mut seen = HashSet::with_capacity(order.len());
    for id in order {
        if !seen.insert(*id) {
            return Err(CarouselError::DuplicateId(*id));
        }
    }

    if order.len() != carousel.len() {
        return Err(CarouselError::LengthMismatch {
            expected: carousel.len(),
            actual: order.len(),
        });
    }

    let reordered: Carousel = order
        .iter()
        .filter_map(|id| carousel.iter().find(|photo| photo.id == *id).cloned())
        .collect();

    if reordered.len() != carousel.len() {
        return Err(CarouselError::Inconsistent {
            expected: carousel.len(),
            actual: reordered.len(),
        });
    }

    Ok(reordered)
}

/// Pick the title for an upload: the given title, else the original file
/// name, else "Untitled".
pub fn resolve_title(title: Option<&str>, original_name: Option<&str>) -> String {
    title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| original_name.map(str::trim).filter(|n| !n.is_empty()))
        .unwrap_or(UNTITLED)
        .to_string()
}

/// Storage key for an upload: a nanosecond timestamp plus the original
/// file's extension, so re-uploading the same file never collides.
pub fn generate_filename(original_name: Option<&str>, now: DateTime<Utc>) -> String {
    let extension = original_name
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    format!("{}{}", now.format("%Y%m%d%H%M%S%f"), extension)
}
