use std::sync::Arc;

use anyhow::Result;

use crate::api::WikiQueryApi;
use crate::config::ScrapeSettings;
use crate::dispatch::FetchDispatcher;
use crate::error_log::ErrorLog;
use crate::fetch::{FetchOptions, PageBatch};
use crate::graph::CategoryGraph;
use crate::progress::Progress;
use crate::store::ScrapeStore;

/// Run context threaded through the walker and reconciler.
///
/// The session owns the store and the error log; fetch workers only ever see a
/// [`PageBatch`] and hand back results that the session applies.
pub struct ScrapeSession {
    pub store: ScrapeStore,
    pub errors: ErrorLog,
    pub settings: ScrapeSettings,
    pub graph: CategoryGraph,
    api: Arc<dyn WikiQueryApi>,
    dispatcher: FetchDispatcher,
    progress: Progress,
}

impl ScrapeSession {
    pub fn new(
        api: Arc<dyn WikiQueryApi>,
        settings: ScrapeSettings,
        store: ScrapeStore,
        errors: ErrorLog,
        progress: Progress,
    ) -> Result<Self> {
        let dispatcher = FetchDispatcher::new(
            Arc::clone(&api),
            settings.workers,
            FetchOptions::from_settings(&settings),
        )?;
        let graph = CategoryGraph::seeded_from(&store);
        Ok(Self {
            store,
            errors,
            settings,
            graph,
            api,
            dispatcher,
            progress,
        })
    }

    pub fn api_handle(&self) -> Arc<dyn WikiQueryApi> {
        Arc::clone(&self.api)
    }

    pub fn submit(&mut self, batch: PageBatch) -> bool {
        let queued = self.dispatcher.submit(&mut self.store, batch);
        self.pump();
        queued
    }

    /// Dispatch `titles` in batches of at most 50; returns the number of batches sent.
    pub fn submit_titles(
        &mut self,
        titles: &[String],
        lang: &str,
        is_category: bool,
        quick_scan: bool,
    ) -> usize {
        let batches = PageBatch::chunked(titles, lang, is_category, quick_scan);
        let sent = self.dispatcher.submit_all(&mut self.store, batches);
        self.pump();
        sent
    }

    /// Apply finished fetches without waiting for the rest.
    pub fn pump(&mut self) {
        self.dispatcher.drain_ready(&mut self.store, &mut self.errors);
        self.progress
            .update(&self.store.stats, self.dispatcher.in_flight());
    }

    /// Wait for every dispatched fetch of the current phase.
    pub fn join(&mut self) {
        self.dispatcher
            .join(&mut self.store, &mut self.errors, &self.progress);
    }

    pub fn phase(&self, name: &str) {
        self.progress.phase(name);
    }

    pub fn finish(mut self) -> (ScrapeStore, ErrorLog) {
        self.join();
        self.progress.finish();
        (self.store, self.errors)
    }
}
