pub mod analyze;
pub mod api;
pub mod config;
pub mod contributors;
pub mod dispatch;
pub mod error_log;
pub mod fetch;
pub mod graph;
pub mod persist;
pub mod progress;
pub mod reconcile;
pub mod retry;
pub mod scrape;
pub mod session;
pub mod split;
pub mod store;
pub mod walk;
pub mod wire;

#[cfg(test)]
mod test_support;
