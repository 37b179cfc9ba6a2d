use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error_log::ErrorLog;
use crate::store::{FieldCounts, LangFigures, PageStats, ScrapeStore, page_key, strip_anchor};

const PAGEVIEW_DATE_FORMAT: &str = "%Y-%m-%d";

/// A data-shape problem found while aggregating. Aggregation carries on past it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisIssue {
    #[error("page `{page}` has no length")]
    MissingLength { page: String },
    #[error("page `{page}` has no stats yet")]
    MissingStats { page: String },
    #[error("page `{page}` has pageview date `{date}` not in YYYY-MM-DD form")]
    BadPageviewDate { page: String, date: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub issues: Vec<AnalysisIssue>,
}

impl AnalysisReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Log all issues under a single `error_analyze` entry.
    pub fn record_into(&self, errors: &mut ErrorLog) {
        if self.is_clean() {
            return;
        }
        let info = self.issues.iter().map(ToString::to_string).collect();
        errors.record("analyze", "", info);
    }
}

/// Weighted richness score of a page.
pub fn quality(counts: &FieldCounts, contributors_tot: u64) -> u64 {
    3 * counts.categories
        + 4 * counts.images
        + 4 * counts.langlinks
        + counts.links
        + counts.linkshere
        + 2 * counts.extlinks
        + 3 * counts.redirects
        + contributors_tot
}

/// Run the three passes in order.
pub fn analyse(store: &mut ScrapeStore) -> AnalysisReport {
    let mut issues = analyse_pagestats(store);
    issues.extend(analyse_langstats(store));
    issues.extend(analyse_time_interval(store));
    info!(pages = store.pages.len(), issues = issues.len(), "aggregation finished");
    AnalysisReport { issues }
}

/// Pass 1: counts, totals and quality of every page, recomputed from scratch.
pub fn analyse_pagestats(store: &mut ScrapeStore) -> Vec<AnalysisIssue> {
    let tracked = [store.stats.lang_1.clone(), store.stats.lang_2.clone()];
    let mut issues = Vec::new();
    for (key, page) in &mut store.pages {
        let counts = FieldCounts::of(page);
        let contributors_tot = counts.contributors + page.anoncontributors.unwrap_or(0);
        let pageviews_tot = page.pageviews.values().flatten().sum();
        let mut stats = PageStats {
            counts,
            contributors_tot,
            pageviews_tot,
            quality: quality(&counts, contributors_tot),
            total_langs: None,
            per_lang: Default::default(),
        };
        page.lang_stats.clear();
        if tracked.contains(&page.lang) {
            if page.length.is_none() {
                issues.push(AnalysisIssue::MissingLength { page: key.clone() });
            }
            stats.per_lang.insert(
                page.lang.clone(),
                LangFigures {
                    pageviews: pageviews_tot,
                    length: page.length,
                },
            );
            page.lang_stats.insert(page.lang.clone(), stats.clone());
        }
        page.stats = Some(stats);
    }
    debug!(pages = store.pages.len(), "per-page stats computed");
    issues
}

/// Pass 2: cross-reference each page with its langlink targets in the requested
/// languages. Targets are read from a snapshot taken before any page is updated.
pub fn analyse_langstats(store: &mut ScrapeStore) -> Vec<AnalysisIssue> {
    let languages = store.stats.languages.clone();
    let mut issues = Vec::new();

    for page in store.pages.values_mut() {
        let distinct = page
            .langlinks
            .iter()
            .map(|link| link.lang.as_str())
            .collect::<BTreeSet<_>>()
            .len() as u64;
        if let Some(stats) = page.stats.as_mut() {
            stats.total_langs = Some(distinct);
        }
    }

    let snapshot: HashMap<String, (PageStats, Option<u64>)> = store
        .pages
        .iter()
        .filter_map(|(key, page)| {
            page.stats
                .clone()
                .map(|stats| (key.clone(), (stats, page.length)))
        })
        .collect();

    for (key, page) in &mut store.pages {
        let Some(stats) = page.stats.as_mut() else {
            issues.push(AnalysisIssue::MissingStats { page: key.clone() });
            continue;
        };
        for link in &page.langlinks {
            if !languages.contains(&link.lang) {
                continue;
            }
            let target = page_key(strip_anchor(&link.title), &link.lang);
            let Some((target_stats, length)) = snapshot.get(&target) else {
                continue;
            };
            stats.per_lang.insert(
                link.lang.clone(),
                LangFigures {
                    pageviews: target_stats.pageviews_tot,
                    length: *length,
                },
            );
            page.lang_stats
                .insert(link.lang.clone(), target_stats.clone());
        }
    }
    issues
}

/// Pass 3: earliest and latest pageview date over the whole store.
pub fn analyse_time_interval(store: &mut ScrapeStore) -> Vec<AnalysisIssue> {
    let mut issues = Vec::new();
    let mut window: Option<(NaiveDate, NaiveDate)> = None;
    for (key, page) in &store.pages {
        for date in page.pageviews.keys() {
            let Ok(day) = NaiveDate::parse_from_str(date, PAGEVIEW_DATE_FORMAT) else {
                issues.push(AnalysisIssue::BadPageviewDate {
                    page: key.clone(),
                    date: date.clone(),
                });
                continue;
            };
            window = Some(match window {
                Some((first, last)) => (first.min(day), last.max(day)),
                None => (day, day),
            });
        }
    }

    let stats = &mut store.stats;
    match window {
        Some((first, last)) => {
            stats.date_from = Some(first.format(PAGEVIEW_DATE_FORMAT).to_string());
            stats.date_to = Some(last.format(PAGEVIEW_DATE_FORMAT).to_string());
            stats.pv_days = Some((last - first).num_days() + 1);
        }
        None => {
            stats.date_from = None;
            stats.date_to = None;
            stats.pv_days = None;
        }
    }
    issues
}
