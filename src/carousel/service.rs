//! Carousel mutations and queries.
//!
//! Every mutation is a read-modify-write against the metadata store. Writes
//! are compare-and-swap on the version observed when the state was loaded; if
//! another writer got in first, the state is reloaded and the mutation is
//! re-applied to the fresh state, up to a bounded number of attempts.
//!
//! Writes that span both backends are ordered so that a partial failure can
//! only leave an unreferenced blob:
//!
//! - upload: blob first, then metadata
//! - delete: metadata first, then blob
//!
//! When that happens the blob is recorded under the `orphans` key for later
//! cleanup (see [`reconcile_orphans`](super::reconcile_orphans)).

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::reconcile::record_orphan;
use super::state::{ids_exhausted, load_carousel, load_current, load_next_id, load_state};
use super::{
    generate_filename, next_index, plan_reorder, position_of, resolve_title, Carousel,
    CarouselState, PhotoRecord, RotationOutcome, CAROUSEL_KEY, COUNTER_KEY, CURRENT_KEY,
};
use crate::error::CarouselError;
use crate::store::{CasOutcome, MetadataStore, ObjectStore, StoredObject, Stores};

/// Default number of attempts for a versioned write before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// An incoming upload.
#[derive(Debug, Clone, Default)]
pub struct NewPhoto {
    /// Title given by the uploader
    pub title: Option<String>,

    /// Name of the file on the uploader's machine
    pub original_name: Option<String>,

    /// Content type declared by the uploader
    pub content_type: Option<String>,

    pub data: Bytes,
}

/// Display pointer together with the carousel it indexes into.
struct PointerView {
    carousel: Carousel,
    carousel_version: u64,
    current: usize,
    current_version: u64,
}

impl From<CarouselState> for PointerView {
    fn from(state: CarouselState) -> Self {
        Self {
            carousel: state.carousel,
            carousel_version: state.carousel_version,
            current: state.current,
            current_version: state.current_version,
        }
    }
}

/// Carousel operations over a metadata store and an object store.
#[derive(Clone)]
pub struct CarouselService {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    max_attempts: u32,
}

impl CarouselService {
    pub fn new(stores: Stores) -> Self {
        Self {
            metadata: stores.metadata,
            objects: stores.objects,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set how many times a conflicting write is retried.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn metadata(&self) -> &dyn MetadataStore {
        self.metadata.as_ref()
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Load a fresh snapshot of the carousel metadata.
    pub async fn load_state(&self) -> Result<CarouselState, CarouselError> {
        Ok(load_state(self.metadata()).await?)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Store a new photo and append it to the end of the carousel.
    pub async fn upload(
        &self,
        snapshot: CarouselState,
        photo: NewPhoto,
    ) -> Result<PhotoRecord, CarouselError> {
        if photo.data.is_empty() {
            return Err(CarouselError::MissingFile);
        }

        let original_name = photo.original_name.as_deref();
        let filename = generate_filename(original_name, Utc::now());
        let title = resolve_title(photo.title.as_deref(), original_name);
        let content_type = photo
            .content_type
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
            .unwrap_or_else(|| {
                mime_guess::from_path(&filename)
                    .first_or_octet_stream()
                    .to_string()
            });
        let size = photo.data.len();

        self.objects
            .put(&filename, photo.data, &content_type)
            .await
            .inspect_err(|e| {
                error!(
                    operation = e.operation(),
                    key = %filename,
                    "Failed to store uploaded photo: {}",
                    e
                );
            })?;

        let committed = self
            .commit_carousel(snapshot, |state| {
                let record = PhotoRecord {
                    id: state.assignable_id()?,
                    title: title.clone(),
                    filename: filename.clone(),
                };
                state.next_id = record
                    .id
                    .checked_add(1)
                    .ok_or_else(|| ids_exhausted(COUNTER_KEY))?;
                state.carousel.push(record.clone());
                Ok(record)
            })
            .await;

        match committed {
            Ok(record) => {
                info!(
                    id = record.id,
                    filename = %record.filename,
                    size,
                    "Uploaded photo"
                );
                Ok(record)
            }
            Err(e) => {
                error!(key = %filename, "Photo stored but carousel update failed: {}", e);
                record_orphan(
                    self.metadata(),
                    &filename,
                    &format!("upload not committed: {}", e),
                    self.max_attempts,
                )
                .await;
                Err(e)
            }
        }
    }

    /// Remove a photo from the carousel and delete its bytes.
    ///
    /// The pointer is left alone; if it now points past the end it wraps on
    /// the next lookup or rotation.
    pub async fn delete(
        &self,
        snapshot: CarouselState,
        id: u64,
    ) -> Result<PhotoRecord, CarouselError> {
        let removed = self
            .commit_carousel(snapshot, |state| {
                let position =
                    position_of(&state.carousel, id).ok_or(CarouselError::PhotoNotFound { id })?;
                let removed = state.carousel.remove(position);
                // A counter left behind the list must not hand this id out again
                let above = removed
                    .id
                    .checked_add(1)
                    .ok_or_else(|| ids_exhausted(CAROUSEL_KEY))?;
                state.next_id = state.next_id.max(above);
                Ok(removed)
            })
            .await?;

        if let Err(e) = self.objects.delete(&removed.filename).await {
            error!(
                id,
                operation = e.operation(),
                key = %removed.filename,
                "Photo removed from carousel but blob delete failed: {}",
                e
            );
            record_orphan(
                self.metadata(),
                &removed.filename,
                &format!("blob delete failed: {}", e),
                self.max_attempts,
            )
            .await;
            return Err(e.into());
        }

        info!(id, filename = %removed.filename, "Deleted photo");
        Ok(removed)
    }

    /// Reorder the carousel to match a full list of ids.
    pub async fn reorder(
        &self,
        snapshot: CarouselState,
        order: Vec<u64>,
    ) -> Result<Carousel, CarouselError> {
        let carousel = self
            .commit_carousel(snapshot, |state| {
                let reordered = plan_reorder(&state.carousel, &order)?;
                state.carousel = reordered.clone();
                Ok(reordered)
            })
            .await?;

        info!(count = carousel.len(), "Reordered carousel");
        Ok(carousel)
    }

    /// Point the display at the photo with this id. Returns its position.
    pub async fn set_current(
        &self,
        snapshot: CarouselState,
        id: u64,
    ) -> Result<usize, CarouselError> {
        let (_, position) = self
            .commit_pointer(snapshot.into(), |carousel, _| {
                position_of(carousel, id)
                    .map(Some)
                    .ok_or(CarouselError::PhotoNotFound { id })
            })
            .await?
            .ok_or(CarouselError::PhotoNotFound { id })?;

        info!(id, position, "Set current photo");
        Ok(position)
    }

    /// Advance the display pointer by one, wrapping at the end.
    ///
    /// Reads only the carousel and the pointer. An empty carousel is a no-op.
    pub async fn rotate(&self) -> Result<RotationOutcome, CarouselError> {
        let view = self.load_pointer_view().await?;

        let outcome = self
            .commit_pointer(view, |carousel, current| {
                Ok(next_index(current, carousel.len()))
            })
            .await?;

        Ok(match outcome {
            Some((from, to)) => RotationOutcome::Advanced { from, to },
            None => RotationOutcome::Skipped,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Fetch the bytes of a photo in the snapshot.
    pub async fn fetch_image(
        &self,
        state: &CarouselState,
        id: u64,
    ) -> Result<(PhotoRecord, StoredObject), CarouselError> {
        let record = state
            .find(id)
            .cloned()
            .ok_or(CarouselError::PhotoNotFound { id })?;

        match self.objects.get(&record.filename).await? {
            Some(object) => Ok((record, object)),
            None => {
                warn!(id, key = %record.filename, "Carousel references a missing blob");
                Err(CarouselError::PhotoNotFound { id })
            }
        }
    }

    // =========================================================================
    // Versioned writes
    // =========================================================================

    /// Apply `mutate` to the carousel and persist it with compare-and-swap.
    ///
    /// If `mutate` raised `next_id`, the counter is raised before the list is
    /// written, so every listed id is covered by the counter even if the list
    /// write then fails. Errors from `mutate` abort without writing anything.
    async fn commit_carousel<T, F>(
        &self,
        snapshot: CarouselState,
        mut mutate: F,
    ) -> Result<T, CarouselError>
    where
        T: Send,
        F: FnMut(&mut CarouselState) -> Result<T, CarouselError> + Send,
    {
        let mut state = snapshot;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                state = self.load_state().await?;
            }

            let mut draft = state.clone();
            let output = mutate(&mut draft)?;
            let encoded = serde_json::to_string(&draft.carousel).map_err(|e| {
                CarouselError::InvalidRequest(format!("cannot encode carousel: {}", e))
            })?;

            if draft.next_id > state.next_id {
                self.raise_counter(draft.next_id - 1).await?;
            }

            let outcome = self
                .metadata
                .compare_and_swap(CAROUSEL_KEY, state.carousel_version, &encoded)
                .await?;

            match outcome {
                CasOutcome::Written { version } => {
                    debug!(key = CAROUSEL_KEY, version, attempt, "Carousel written");
                    return Ok(output);
                }
                CasOutcome::Conflict => {
                    debug!(
                        key = CAROUSEL_KEY,
                        expected_version = state.carousel_version,
                        attempt,
                        "Carousel changed concurrently, retrying"
                    );
                }
            }
        }

        warn!(
            key = CAROUSEL_KEY,
            attempts = self.max_attempts,
            "Giving up on carousel write"
        );
        Err(CarouselError::Contention {
            key: CAROUSEL_KEY,
            attempts: self.max_attempts,
        })
    }

    async fn load_pointer_view(&self) -> Result<PointerView, CarouselError> {
        let ((carousel, carousel_version), (current, current_version)) =
            tokio::try_join!(load_carousel(self.metadata()), load_current(self.metadata()))?;
        Ok(PointerView {
            carousel,
            carousel_version,
            current,
            current_version,
        })
    }

    /// Choose a new pointer value and persist it with compare-and-swap.
    ///
    /// `choose` returns `None` to leave the pointer alone. On success returns
    /// the previous and new pointer values.
    async fn commit_pointer<F>(
        &self,
        mut view: PointerView,
        mut choose: F,
    ) -> Result<Option<(usize, usize)>, CarouselError>
    where
        F: FnMut(&Carousel, usize) -> Result<Option<usize>, CarouselError> + Send,
    {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                view = self.load_pointer_view().await?;
            }

            let Some(next) = choose(&view.carousel, view.current)? else {
                return Ok(None);
            };

            let outcome = self
                .metadata
                .compare_and_swap(CURRENT_KEY, view.current_version, &next.to_string())
                .await?;

            match outcome {
                CasOutcome::Written { version } => {
                    debug!(key = CURRENT_KEY, version, from = view.current, to = next, "Pointer written");
                    let settled = self.settle_pointer(&view, next, version, &mut choose).await?;
                    return Ok(Some((view.current, settled)));
                }
                CasOutcome::Conflict => {
                    debug!(key = CURRENT_KEY, attempt, "Pointer changed concurrently, retrying");
                }
            }
        }

        warn!(
            key = CURRENT_KEY,
            attempts = self.max_attempts,
            "Giving up on pointer write"
        );
        Err(CarouselError::Contention {
            key: CURRENT_KEY,
            attempts: self.max_attempts,
        })
    }

    /// Make a freshly written pointer agree with the carousel now stored.
    ///
    /// The pointer and the list are separate keys, so the list may have been
    /// reordered or shrunk between loading the view and writing the pointer.
    /// While the list version keeps moving, `choose` is re-run against the new
    /// list (from the same starting pointer) and the pointer rewritten. If
    /// another pointer write lands on top of ours, that later write wins.
    async fn settle_pointer<F>(
        &self,
        view: &PointerView,
        mut written: usize,
        mut version: u64,
        choose: &mut F,
    ) -> Result<usize, CarouselError>
    where
        F: FnMut(&Carousel, usize) -> Result<Option<usize>, CarouselError> + Send,
    {
        let mut seen_version = view.carousel_version;

        for attempt in 1..=self.max_attempts {
            let (carousel, carousel_version) = load_carousel(self.metadata()).await?;
            if carousel_version == seen_version {
                return Ok(written);
            }
            seen_version = carousel_version;

            let Some(next) = choose(&carousel, view.current)? else {
                return Ok(written);
            };
            if next == written {
                continue;
            }

            debug!(
                key = CURRENT_KEY,
                attempt,
                stale = written,
                next,
                "Carousel changed under pointer write, rewriting"
            );
            match self
                .metadata
                .compare_and_swap(CURRENT_KEY, version, &next.to_string())
                .await?
            {
                CasOutcome::Written { version: latest } => {
                    written = next;
                    version = latest;
                }
                CasOutcome::Conflict => {
                    debug!(key = CURRENT_KEY, "Pointer superseded by a later write");
                    return Ok(written);
                }
            }
        }

        Err(CarouselError::Contention {
            key: CAROUSEL_KEY,
            attempts: self.max_attempts,
        })
    }

    /// Raise the stored counter to at least `last_used`. Never lowers it.
    async fn raise_counter(&self, last_used: u64) -> Result<(), CarouselError> {
        for attempt in 1..=self.max_attempts {
            let (next_id, version) = load_next_id(self.metadata()).await?;
            if next_id > last_used {
                return Ok(());
            }

            let outcome = self
                .metadata
                .compare_and_swap(COUNTER_KEY, version, &last_used.to_string())
                .await?;
            if outcome.is_written() {
                return Ok(());
            }
            debug!(key = COUNTER_KEY, attempt, "Counter changed concurrently, retrying");
        }

        Err(CarouselError::Contention {
            key: COUNTER_KEY,
            attempts: self.max_attempts,
        })
    }
}
