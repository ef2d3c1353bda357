//! Per-request carousel state, rebuilt from the metadata store.
//!
//! Absent keys bootstrap a fresh frame (empty carousel, pointer 0, counter 0).
//! Keys that exist but cannot be decoded are reported as corrupt instead of
//! being silently reset.

use tracing::debug;

use super::{Carousel, PhotoRecord, CAROUSEL_KEY, COUNTER_KEY, CURRENT_KEY};
use crate::error::StoreError;
use crate::store::MetadataStore;

/// Snapshot of the carousel metadata taken at the start of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarouselState {
    pub carousel: Carousel,

    /// Display pointer; meaningful modulo `carousel.len()`
    pub current: usize,

    /// Next id to assign (persisted counter + 1)
    pub next_id: u64,

    /// Version of `carousel` this snapshot was read at
    pub carousel_version: u64,

    /// Version of `current` this snapshot was read at
    pub current_version: u64,
}

impl CarouselState {
    /// The photo on display, or `None` if the carousel is empty.
    pub fn current_photo(&self) -> Option<&PhotoRecord> {
        super::effective_index(self.current, self.carousel.len()).map(|i| &self.carousel[i])
    }

    pub fn find(&self, id: u64) -> Option<&PhotoRecord> {
        self.carousel.iter().find(|photo| photo.id == id)
    }

    /// Id for the next upload.
    ///
    /// Normally `next_id`, but never at or below an id already in the
    /// carousel, in case the counter write lagged behind the list write.
    pub fn assignable_id(&self) -> Result<u64, StoreError> {
        let mut id = self.next_id;
        for photo in &self.carousel {
            let above = photo
                .id
                .checked_add(1)
                .ok_or_else(|| ids_exhausted(CAROUSEL_KEY))?;
            id = id.max(above);
        }
        Ok(id)
    }
}

/// Load the carousel list and its version.
pub async fn load_carousel(store: &dyn MetadataStore) -> Result<(Carousel, u64), StoreError> {
    match store.get(CAROUSEL_KEY).await? {
        None => {
            debug!(key = CAROUSEL_KEY, "No carousel stored yet, starting empty");
            Ok((Carousel::new(), 0))
        }
        Some(versioned) => {
            let carousel: Carousel =
                serde_json::from_str(&versioned.value).map_err(|e| StoreError::Corrupt {
                    key: CAROUSEL_KEY.to_string(),
                    message: e.to_string(),
                })?;
            Ok((carousel, versioned.version))
        }
    }
}

/// Load the display pointer and its version. Absent means 0.
pub async fn load_current(store: &dyn MetadataStore) -> Result<(usize, u64), StoreError> {
    match store.get(CURRENT_KEY).await? {
        None => Ok((0, 0)),
        Some(versioned) => {
            let current = parse_integer(CURRENT_KEY, &versioned.value)?;
            let current = usize::try_from(current).map_err(|_| StoreError::Corrupt {
                key: CURRENT_KEY.to_string(),
                message: format!("pointer {} does not fit in usize", current),
            })?;
            Ok((current, versioned.version))
        }
    }
}

/// Load the id counter and return the next assignable id with the counter's
/// version.
///
/// The stored value is the last id handed out, so the next id is one more.
/// An absent counter means no id has been used and the next id is 0.
pub async fn load_next_id(store: &dyn MetadataStore) -> Result<(u64, u64), StoreError> {
    match store.get(COUNTER_KEY).await? {
        None => Ok((0, 0)),
        Some(versioned) => {
            let last_used = parse_integer(COUNTER_KEY, &versioned.value)?;
            let next_id = last_used
                .checked_add(1)
                .ok_or_else(|| ids_exhausted(COUNTER_KEY))?;
            Ok((next_id, versioned.version))
        }
    }
}

/// Load the full state. The three reads are independent and run concurrently.
pub async fn load_state(store: &dyn MetadataStore) -> Result<CarouselState, StoreError> {
    let ((carousel, carousel_version), (current, current_version), (next_id, _)) = tokio::try_join!(
        load_carousel(store),
        load_current(store),
        load_next_id(store)
    )?;

    Ok(CarouselState {
        carousel,
        current,
        next_id,
        carousel_version,
        current_version,
    })
}

/// No id above the stored one can be represented.
pub(crate) fn ids_exhausted(key: &str) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        message: "photo id space exhausted".to_string(),
    }
}

pub(crate) fn parse_integer(key: &str, value: &str) -> Result<u64, StoreError> {
    value.trim().parse::<u64>().map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: format!("expected a non-negative integer, got {:?}: {}", value, e),
    })
}
