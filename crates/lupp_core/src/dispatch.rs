use std::sync::Arc;

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::api::{ApiError, WikiQueryApi};
use crate::error_log::ErrorLog;
use crate::fetch::{BatchFetch, FetchOptions, PageBatch, fetch_page_batch};
use crate::progress::Progress;
use crate::store::ScrapeStore;

/// A finished worker job, sent back to the owner of the store.
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch: PageBatch,
    pub result: Result<BatchFetch, ApiError>,
}

/// Bounded pool of fetch workers.
///
/// Workers only talk to the API. Every store write happens on the thread that owns
/// the dispatcher, when outcomes are drained from the channel.
pub struct FetchDispatcher {
    pool: ThreadPool,
    api: Arc<dyn WikiQueryApi>,
    options: Arc<FetchOptions>,
    sender: Sender<BatchOutcome>,
    receiver: Receiver<BatchOutcome>,
    in_flight: usize,
    submitted: usize,
}

impl FetchDispatcher {
    pub fn new(api: Arc<dyn WikiQueryApi>, workers: usize, options: FetchOptions) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("lupp-fetch-{index}"))
            .build()
            .context("failed to build fetch worker pool")?;
        let (sender, receiver) = flume::unbounded();
        Ok(Self {
            pool,
            api,
            options: Arc::new(options),
            sender,
            receiver,
            in_flight: 0,
            submitted: 0,
        })
    }

    /// Reserve skeletons for the batch and hand the remaining titles to a worker.
    ///
    /// Returns `false` when every title was already known and nothing was dispatched.
    pub fn submit(&mut self, store: &mut ScrapeStore, batch: PageBatch) -> bool {
        let reserved = store.reserve_pages(&batch.titles, &batch.lang, batch.is_category);
        if reserved.is_empty() {
            return false;
        }
        let batch = PageBatch {
            titles: reserved,
            ..batch
        };
        debug!(lang = %batch.lang, pages = batch.titles.len(), quick = batch.quick_scan, "dispatching batch");

        let api = Arc::clone(&self.api);
        let options = Arc::clone(&self.options);
        let sender = self.sender.clone();
        self.in_flight += 1;
        self.submitted += 1;
        self.pool.spawn(move || {
            let result = fetch_page_batch(api.as_ref(), &batch, &options);
            if sender.send(BatchOutcome { batch, result }).is_err() {
                debug!("fetch outcome dropped; dispatcher is gone");
            }
        });
        true
    }

    /// Submit every batch, returning how many were actually dispatched.
    pub fn submit_all(&mut self, store: &mut ScrapeStore, batches: Vec<PageBatch>) -> usize {
        batches
            .into_iter()
            .map(|batch| usize::from(self.submit(store, batch)))
            .sum()
    }

    /// Apply outcomes that are already waiting, without blocking.
    pub fn drain_ready(&mut self, store: &mut ScrapeStore, errors: &mut ErrorLog) -> usize {
        let mut settled = 0;
        while let Ok(outcome) = self.receiver.try_recv() {
            self.settle(outcome, store, errors);
            settled += 1;
        }
        settled
    }

    /// Block until every submitted batch has been applied.
    pub fn join(&mut self, store: &mut ScrapeStore, errors: &mut ErrorLog, progress: &Progress) {
        while self.in_flight > 0 {
            match self.receiver.recv() {
                Ok(outcome) => {
                    self.settle(outcome, store, errors);
                    progress.update(&store.stats, self.in_flight);
                }
                Err(_) => break,
            }
        }
        info!(batches = self.submitted, pages = store.stats.pages_cnt, "fetch phase drained");
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn settle(&mut self, outcome: BatchOutcome, store: &mut ScrapeStore, errors: &mut ErrorLog) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome.result {
            Ok(fetched) => {
                fetched.apply(store, errors);
            }
            Err(error) => {
                let subject = format!("{} ({})", outcome.batch.titles.join("|"), outcome.batch.lang);
                errors.record("scrape_pages", &subject, error.payload());
            }
        }
    }
}
