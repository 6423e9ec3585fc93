//! In-memory upstream for tests and offline replays.

use crate::error::UpstreamError;
use crate::fetch::{Cursor, Page, PageRequest, PageSource, QueryShape};
use crate::types::EngagementKind;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A [`PageSource`] serving pre-recorded pages per query shape.
///
/// Shapes with no script answer with one empty, final page. Failures can be
/// queued in front of any page; each queued failure is consumed by one call.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<HashMap<QueryShape, Vec<Vec<Value>>>>,
    failures: Mutex<HashMap<(QueryShape, usize), VecDeque<UpstreamError>>>,
    calls: Mutex<Vec<PageRequest>>,
    latency: Option<Duration>,
    reference_kinds: Option<Vec<EngagementKind>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Declare which engagement kinds reference listings can return.
    pub fn with_reference_kinds(mut self, kinds: Vec<EngagementKind>) -> Self {
        self.reference_kinds = Some(kinds);
        self
    }

    /// Serve `pages` for `shape`, in order.
    pub fn with_pages(self, shape: QueryShape, pages: Vec<Vec<Value>>) -> Self {
        if let Ok(mut scripts) = self.pages.lock() {
            scripts.insert(shape, pages);
        }
        self
    }

    /// Serve `items` for `shape`, split into pages of `per_page`.
    pub fn with_items(self, shape: QueryShape, items: Vec<Value>, per_page: usize) -> Self {
        let pages = items
            .chunks(per_page.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        self.with_pages(shape, pages)
    }

    /// Answer the next requests for page `page` (0-based) of `shape` with
    /// `errors`, one per call, before serving the page.
    pub fn fail_page(self, shape: QueryShape, page: usize, errors: Vec<UpstreamError>) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures
                .entry((shape, page))
                .or_default()
                .extend(errors);
        }
        self
    }

    /// Every request received so far, retries included.
    pub fn calls(&self) -> Vec<PageRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, shape: &QueryShape) -> usize {
        self.calls().iter().filter(|r| &r.shape == shape).count()
    }

    fn page_index(cursor: Option<&Cursor>) -> Result<usize, UpstreamError> {
        match cursor {
            None => Ok(0),
            Some(c) => c
                .as_str()
                .rsplit(':')
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| UpstreamError::Fatal(format!("unknown cursor {}", c.as_str()))),
        }
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn reference_kinds(&self) -> &[EngagementKind] {
        self.reference_kinds.as_deref().unwrap_or(&EngagementKind::ALL)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let index = Self::page_index(request.cursor.as_ref())?;

        let queued = self
            .failures
            .lock()
            .ok()
            .and_then(|mut f| f.get_mut(&(request.shape.clone(), index))?.pop_front());
        if let Some(err) = queued {
            return Err(err);
        }

        let scripts = self
            .pages
            .lock()
            .map_err(|_| UpstreamError::Fatal("script lock poisoned".into()))?;
        let Some(pages) = scripts.get(&request.shape) else {
            return Ok(Page::default());
        };

        let items = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < pages.len())
            .then(|| Cursor::new(format!("{}:{}", request.shape.checkpoint_id(), index + 1)));
        Ok(Page { items, next_cursor })
    }
}
