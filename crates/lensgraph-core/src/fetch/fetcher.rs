use crate::cancel::CancelSignal;
use crate::error::{FetchError, UpstreamError};
use crate::fetch::{
    Checkpoint, CheckpointStore, Cursor, FetchConfig, FetchPolicy, Page, PageRequest, PageSource,
    QueryShape, RateLimiter,
};
use crate::ingest;
use crate::types::Record;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// One paginated listing to drain.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub shape: QueryShape,

    /// Items per page. Must be positive.
    pub page_size: usize,

    /// Soft cap on raw items. Whole pages are kept, so the result can exceed
    /// the cap by up to one page. Items restored from a checkpoint count.
    pub max_items: usize,

    /// Continue from here instead of the first page.
    pub resume_from: Option<Checkpoint>,
}

impl FetchRequest {
    pub fn new(shape: QueryShape) -> Self {
        Self {
            shape,
            page_size: 50,
            max_items: usize::MAX,
            resume_from: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn resume_from(mut self, checkpoint: Option<Checkpoint>) -> Self {
        self.resume_from = checkpoint;
        self
    }
}

/// Why a fetch stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The upstream reported no further pages.
    Exhausted,
    /// `max_items` was reached.
    ItemCap,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub shape: QueryShape,

    /// Validated records from the pages fetched by this call.
    pub records: Vec<Record>,

    /// Where the next call should continue. `None` once exhausted.
    pub cursor: Option<Cursor>,

    pub stop: StopReason,

    /// Raw items accepted so far, including those before a resume.
    pub items_so_far: usize,

    /// Pages fetched by this call.
    pub pages: u64,

    /// Raw items that failed validation and were dropped.
    pub rejected: usize,
}

impl FetchOutcome {
    pub fn exhausted(&self) -> bool {
        self.stop == StopReason::Exhausted
    }
}

/// A fetch that failed part-way. Records collected before the failure and the
/// last durable checkpoint are handed back so the caller can keep them and
/// resume later.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct PartialFetch {
    pub error: FetchError,
    pub records: Vec<Record>,
    pub checkpoint: Option<Checkpoint>,
    pub rejected: usize,
}

impl PartialFetch {
    fn empty(error: FetchError) -> Self {
        Self {
            error,
            records: Vec::new(),
            checkpoint: None,
            rejected: 0,
        }
    }
}

/// Drains cursor-paginated listings from a [`PageSource`], pacing requests
/// through a shared [`RateLimiter`] and checkpointing after every page.
pub struct Fetcher<S: PageSource> {
    source: Arc<S>,
    limiter: Arc<RateLimiter>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: FetchConfig,
}

impl<S: PageSource> Fetcher<S> {
    pub fn new(source: Arc<S>, checkpoints: Arc<dyn CheckpointStore>, config: FetchConfig) -> Self {
        Self {
            source,
            limiter: Arc::new(RateLimiter::new()),
            checkpoints,
            config,
        }
    }

    /// Share a limiter with other fetchers hitting the same upstream.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Request with the configured page size.
    pub fn request(&self, shape: QueryShape) -> FetchRequest {
        FetchRequest::new(shape).with_page_size(self.config.page_size)
    }

    /// Stored checkpoint for `shape`, if any. Read failures are logged and
    /// treated as "start over".
    pub fn stored_checkpoint(&self, shape: &QueryShape) -> Option<Checkpoint> {
        match self.checkpoints.load(shape) {
            Ok(cp) => cp,
            Err(e) => {
                log::warn!("Unreadable checkpoint for {}: {}. Starting over.", shape, e);
                None
            }
        }
    }

    /// Fetch pages until the listing is exhausted, `max_items` is reached or
    /// `cancel` fires.
    pub async fn fetch_all(
        &self,
        request: FetchRequest,
        cancel: &CancelSignal,
    ) -> Result<FetchOutcome, PartialFetch> {
        let FetchRequest {
            shape,
            page_size,
            max_items,
            resume_from,
        } = request;

        if page_size == 0 {
            return Err(PartialFetch::empty(FetchError::InvalidRequest(
                "page_size must be positive".into(),
            )));
        }

        let (mut cursor, mut items_so_far, mut last_page, mut last_good) = match resume_from {
            Some(cp) if cp.shape != shape => {
                return Err(PartialFetch::empty(FetchError::InvalidRequest(format!(
                    "checkpoint for {} cannot resume {}",
                    cp.shape, shape
                ))));
            }
            Some(cp) => {
                log::info!(
                    "Resuming {} after page {} ({} items)",
                    shape,
                    cp.last_page,
                    cp.items_so_far
                );
                (Some(cp.cursor.clone()), cp.items_so_far, cp.last_page, Some(cp))
            }
            None => {
                // A fresh pass supersedes any stale position.
                if let Err(e) = self.checkpoints.clear(&shape) {
                    return Err(PartialFetch::empty(FetchError::Checkpoint(e.to_string())));
                }
                (None, 0, 0, None)
            }
        };

        let policy = self.config.policy_for(&shape).clone();
        let mut records = Vec::new();
        let mut rejected = 0usize;
        let mut pages = 0u64;

        let stop = loop {
            if items_so_far >= max_items {
                break StopReason::ItemCap;
            }
            if cancel.is_cancelled() {
                log::info!("Fetch of {} cancelled after {} pages", shape, pages);
                break StopReason::Cancelled;
            }

            let page = match self
                .fetch_page_with_retry(&shape, cursor.clone(), page_size, &policy)
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    log::warn!("Fetch of {} stopped: {}", shape, error);
                    return Err(PartialFetch {
                        error,
                        records,
                        checkpoint: last_good,
                        rejected,
                    });
                }
            };

            if page.next_cursor.is_some() && page.next_cursor == cursor {
                return Err(PartialFetch {
                    error: FetchError::Fatal {
                        shape: shape.to_string(),
                        reason: "upstream returned the same cursor twice".into(),
                    },
                    records,
                    checkpoint: last_good,
                    rejected,
                });
            }

            let collected_at = Utc::now();
            for raw in &page.items {
                match ingest::decode(&shape, raw, collected_at) {
                    Ok(decoded) => {
                        records.extend(decoded);
                        items_so_far += 1;
                    }
                    Err(e) => {
                        rejected += 1;
                        log::warn!("Dropping item from {}: {}", shape, e);
                    }
                }
            }
            pages += 1;
            last_page += 1;

            match page.next_cursor {
                None => {
                    if let Err(e) = self.checkpoints.clear(&shape) {
                        log::warn!("Could not clear checkpoint for {}: {}", shape, e);
                    }
                    cursor = None;
                    break StopReason::Exhausted;
                }
                Some(next) => {
                    let checkpoint = Checkpoint {
                        shape: shape.clone(),
                        cursor: next.clone(),
                        items_so_far,
                        last_page,
                        updated_at: Utc::now(),
                    };
                    if let Err(e) = self.checkpoints.save(&checkpoint) {
                        return Err(PartialFetch {
                            error: FetchError::Checkpoint(e.to_string()),
                            records,
                            checkpoint: last_good,
                            rejected,
                        });
                    }
                    last_good = Some(checkpoint);
                    cursor = Some(next);
                }
            }
        };

        log::debug!(
            "Fetched {} pages of {} ({} items total, {} rejected, stop: {:?})",
            pages,
            shape,
            items_so_far,
            rejected,
            stop
        );

        Ok(FetchOutcome {
            shape,
            records,
            cursor,
            stop,
            items_so_far,
            pages,
            rejected,
        })
    }

    /// One page, retried on rate limits, timeouts and transient failures
    /// up to `policy.max_retries` times. Fatal failures return immediately.
    async fn fetch_page_with_retry(
        &self,
        shape: &QueryShape,
        cursor: Option<Cursor>,
        page_size: usize,
        policy: &FetchPolicy,
    ) -> Result<Page, FetchError> {
        let request = PageRequest {
            shape: shape.clone(),
            cursor,
            page_size,
        };
        let mut attempt = 0u32;

        loop {
            self.limiter.acquire(policy.min_interval()).await;

            let result = match tokio::time::timeout(
                policy.request_timeout(),
                self.source.fetch_page(&request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Timeout),
            };

            let err = match result {
                Ok(page) => return Ok(page),
                Err(UpstreamError::Fatal(reason)) => {
                    return Err(FetchError::Fatal {
                        shape: shape.to_string(),
                        reason,
                    });
                }
                Err(err) => err,
            };

            if attempt >= policy.max_retries {
                return Err(FetchError::Transient {
                    shape: shape.to_string(),
                    attempts: attempt + 1,
                    reason: err.to_string(),
                });
            }

            let retry_after = match &err {
                UpstreamError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = policy.backoff_delay(attempt, retry_after);
            log::warn!(
                "{} from {} on {} (attempt {}/{}), retrying in {:?}",
                err,
                self.source.name(),
                shape,
                attempt + 1,
                policy.max_retries + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
