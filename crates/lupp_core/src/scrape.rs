use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::analyze::{AnalysisReport, analyse};
use crate::api::WikiQueryApi;
use crate::config::ScrapeSettings;
use crate::error_log::{ErrorLog, now_timestamp};
use crate::progress::Progress;
use crate::reconcile::{LanguageScope, expand_langlinks, scrape_missing_secondary};
use crate::session::ScrapeSession;
use crate::store::{GlobalStats, ScrapeStore, page_key};
use crate::walk::{WalkOptions, register_article_list, scrape_category};

/// Below this many pages a store with aggregation issues is not worth keeping.
const MIN_VIABLE_PAGES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeTarget {
    /// Category name, with or without its namespace prefix.
    Category(String),
    /// Explicit titles grouped under a mock category called `name`.
    ArticleList { name: String, titles: Vec<String> },
}

impl ScrapeTarget {
    pub fn title(&self) -> &str {
        match self {
            Self::Category(title) => title,
            Self::ArticleList { name, .. } => name,
        }
    }
}

#[derive(Debug)]
pub struct ScrapeOutcome {
    pub store: ScrapeStore,
    pub errors: ErrorLog,
    pub report: AnalysisReport,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("category `{0}` does not exist")]
    InvalidCategory(String),
    #[error("only {pages} pages scraped and aggregation is incomplete")]
    TooSmall { pages: usize },
    #[error("failed to start fetch workers: {0}")]
    WorkerPool(String),
}

/// A run that produced nothing worth persisting except its error log.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct ScrapeFailure {
    pub reason: FailureReason,
    pub errors: ErrorLog,
}

/// Scrape `target` in every configured language and aggregate the result.
///
/// Phases run strictly one after another, each drained before the next starts:
/// primary-language walk, secondary-language re-walk, langlink expansion. Article
/// lists skip the re-walk and expand into every language.
pub fn scrape_launch(
    api: Arc<dyn WikiQueryApi>,
    settings: ScrapeSettings,
    target: &ScrapeTarget,
    progress: Progress,
) -> Result<ScrapeOutcome, ScrapeFailure> {
    let started = Instant::now();
    let store = ScrapeStore::new(GlobalStats::begin(
        target.title(),
        &settings.languages,
        now_timestamp(),
    ));
    let mut session = open_session(api, settings, store, ErrorLog::default(), progress)?;
    let lang = session.settings.primary_lang().to_string();

    match target {
        ScrapeTarget::Category(title) => {
            session.phase("primary language");
            if let Err(error) = scrape_category(&mut session, title, &lang, WalkOptions::top_level())
            {
                let key = page_key(&session.settings.category_title(&lang, title), &lang);
                session
                    .errors
                    .record("scrape_category", &key, error.payload());
                if error.is_invalid_category() {
                    let (_, errors) = session.finish();
                    return Err(ScrapeFailure {
                        reason: FailureReason::InvalidCategory(key),
                        errors,
                    });
                }
            }
            session.join();

            session.phase("secondary language");
            scrape_missing_secondary(&mut session);
            session.join();

            session.phase("langlinks");
            let scope = LanguageScope::configured(&session.settings.languages);
            expand_langlinks(&mut session, &scope);
        }
        ScrapeTarget::ArticleList { name, titles } => {
            session.phase("article list");
            register_article_list(&mut session, name, titles, &lang);
            session.join();

            session.phase("langlinks");
            expand_langlinks(&mut session, &LanguageScope::All);
        }
    }

    let (mut store, mut errors) = session.finish();
    let report = analyse(&mut store);
    if !report.is_clean() {
        report.record_into(&mut errors);
        if store.pages.len() < MIN_VIABLE_PAGES {
            return Err(ScrapeFailure {
                reason: FailureReason::TooSmall {
                    pages: store.pages.len(),
                },
                errors,
            });
        }
        warn!(issues = report.issues.len(), "aggregation incomplete, keeping partial stats");
    }
    stamp_finished(&mut store, started);
    info!(
        title = %store.stats.category_title,
        categories = store.stats.categories_cnt,
        pages = store.stats.pages_cnt,
        errors = errors.len(),
        "scrape finished"
    );
    Ok(ScrapeOutcome {
        store,
        errors,
        report,
    })
}

/// Re-run only the secondary-language re-walk on a persisted store, then aggregate.
pub fn reconcile_existing(
    api: Arc<dyn WikiQueryApi>,
    settings: ScrapeSettings,
    store: ScrapeStore,
    errors: ErrorLog,
    progress: Progress,
) -> Result<ScrapeOutcome, ScrapeFailure> {
    let started = Instant::now();
    let mut session = open_session(api, settings, store, errors, progress)?;
    session.phase("secondary language");
    scrape_missing_secondary(&mut session);

    let (mut store, mut errors) = session.finish();
    let report = reanalyse(&mut store, &mut errors);
    stamp_finished(&mut store, started);
    Ok(ScrapeOutcome {
        store,
        errors,
        report,
    })
}

/// Aggregate an existing store again without fetching anything.
pub fn reanalyse(store: &mut ScrapeStore, errors: &mut ErrorLog) -> AnalysisReport {
    let report = analyse(store);
    report.record_into(errors);
    report
}

fn open_session(
    api: Arc<dyn WikiQueryApi>,
    settings: ScrapeSettings,
    store: ScrapeStore,
    errors: ErrorLog,
    progress: Progress,
) -> Result<ScrapeSession, ScrapeFailure> {
    ScrapeSession::new(api, settings, store, errors.clone(), progress).map_err(|error| {
        ScrapeFailure {
            reason: FailureReason::WorkerPool(format!("{error:#}")),
            errors,
        }
    })
}

fn stamp_finished(store: &mut ScrapeStore, started: Instant) {
    store.stats.scraped = Some(now_timestamp());
    store.stats.response_time_s = Some(started.elapsed().as_secs());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{FailureReason, ScrapeTarget, reanalyse, reconcile_existing, scrape_launch};
    use crate::api::WikiQueryApi;
    use crate::config::ScrapeSettings;
    use crate::error_log::ErrorLog;
    use crate::progress::Progress;
    use crate::retry::RetryPolicy;
    use crate::test_support::{MockPage, MockWiki};

    fn settings(languages: &[&str], max_depth: usize) -> ScrapeSettings {
        let mut settings = ScrapeSettings::new(
            languages.iter().map(ToString::to_string).collect(),
        )
        .expect("settings");
        settings.max_depth = max_depth;
        settings.workers = 3;
        settings.retry = RetryPolicy::none();
        settings
    }

    fn launch(
        wiki: &Arc<MockWiki>,
        settings: ScrapeSettings,
        target: ScrapeTarget,
    ) -> Result<super::ScrapeOutcome, super::ScrapeFailure> {
        let api: Arc<dyn WikiQueryApi> = wiki.clone();
        scrape_launch(api, settings, &target, Progress::hidden())
    }

    fn testo_wiki() -> Arc<MockWiki> {
        let wiki = Arc::new(MockWiki::new());
        wiki.add_article(
            "sv",
            "Kategori:Testö",
            "Exempel",
            MockPage::with_length(140)
                .langlink("fi", "Esimerkki")
                .langlink("en", "Example")
                .views(&[
                    ("2023-01-01", Some(3)),
                    ("2023-01-02", None),
                    ("2023-01-03", Some(5)),
                ]),
        );
        wiki.add_page("fi", "Esimerkki", MockPage::with_length(90));
        wiki.add_page("en", "Example", MockPage::with_length(300));
        wiki
    }

    #[test]
    fn scrapes_a_small_category_end_to_end() {
        let wiki = testo_wiki();
        let outcome = launch(
            &wiki,
            settings(&["sv", "fi"], 1),
            ScrapeTarget::Category("Testö".to_string()),
        )
        .expect("scrape succeeds");
        let store = outcome.store;

        assert!(outcome.report.is_clean());
        assert!(outcome.errors.is_empty());
        assert_eq!(store.categories.len(), 1);
        assert_eq!(store.categories["Kategori:Testö (sv)"].order, 1);
        assert!(store.pages.contains_key("Exempel (sv)"));
        assert!(store.pages.contains_key("Esimerkki (fi)"));
        assert!(!store.pages.contains_key("Example (en)"));

        let exempel = &store.pages["Exempel (sv)"];
        let stats = exempel.stats.as_ref().expect("stats");
        assert_eq!(stats.total_langs, Some(2));
        assert_eq!(stats.per_lang["fi"].length, Some(90));

        let value = serde_json::to_value(&store).expect("json");
        assert_eq!(
            value["pages"]["Exempel (sv)"]["stats"]["pageviews_tot"],
            json!("8")
        );
        assert_eq!(value["stats"]["languages"], json!("sv|fi"));
        assert_eq!(store.stats.category_title, "Testö");
        assert_eq!(store.stats.pv_days, Some(3));
        assert!(store.stats.scraped.is_some());
        assert!(store.stats.response_time_s.is_some());
        assert_eq!(store.stats.pages_cnt, store.pages.len() as u64);
    }

    #[test]
    fn invalid_top_category_aborts_with_error_log() {
        let wiki = Arc::new(MockWiki::new());
        wiki.invalid_category("sv", "Kategori:Saknas");

        let failure = launch(
            &wiki,
            settings(&["sv", "fi"], 3),
            ScrapeTarget::Category("Saknas".to_string()),
        )
        .expect_err("must fail");
        assert_eq!(
            failure.reason,
            FailureReason::InvalidCategory("Kategori:Saknas (sv)".to_string())
        );
        let entry = failure
            .errors
            .get("scrape_category", "Kategori:Saknas (sv)")
            .expect("logged");
        assert!(entry.info.iter().any(|line| line.contains("invalidcategory")));
    }

    #[test]
    fn tiny_incomplete_store_is_not_kept() {
        let wiki = Arc::new(MockWiki::new());
        wiki.add_members("sv", "Kategori:Liten", &[(0, "Försvunnen")]);

        let failure = launch(
            &wiki,
            settings(&["sv", "fi"], 3),
            ScrapeTarget::Category("Liten".to_string()),
        )
        .expect_err("must fail");
        assert_eq!(failure.reason, FailureReason::TooSmall { pages: 2 });
        assert!(failure.errors.get("analyze", "").is_some());
    }

    #[test]
    fn article_list_expands_into_every_language() {
        let wiki = testo_wiki();
        let outcome = launch(
            &wiki,
            settings(&["sv", "fi"], 1),
            ScrapeTarget::ArticleList {
                name: "lista".to_string(),
                titles: vec!["Exempel".to_string(), "  ".to_string()],
            },
        )
        .expect("scrape succeeds");
        let store = outcome.store;

        assert_eq!(store.categories["lista (sv)"].order, 1);
        assert!(store.categories["lista (sv)"].pages.contains_key("Exempel (sv)"));
        assert_eq!(store.pages["Example (en)"].length, Some(300));
        assert_eq!(store.pages["Esimerkki (fi)"].length, Some(90));
        assert_eq!(wiki.count("list", "categorymembers"), 0);
    }

    #[test]
    fn reconcile_picks_up_pages_added_in_secondary_language() {
        let wiki = testo_wiki();
        wiki.add_page(
            "sv",
            "Kategori:Testö",
            MockPage::with_length(50).langlink("fi", "Luokka:Testö"),
        );
        wiki.add_members("fi", "Luokka:Testö", &[]);
        let first = launch(
            &wiki,
            settings(&["sv", "fi"], 2),
            ScrapeTarget::Category("Testö".to_string()),
        )
        .expect("scrape succeeds");
        assert!(!first.store.pages.contains_key("Uusi (fi)"));

        wiki.add_article("fi", "Luokka:Testö", "Uusi", MockPage::with_length(30));
        let api: Arc<dyn WikiQueryApi> = wiki.clone();
        let outcome = reconcile_existing(
            api,
            settings(&["sv", "fi"], 2),
            first.store,
            first.errors,
            Progress::hidden(),
        )
        .expect("reconcile succeeds");
        let store = outcome.store;

        assert!(store.categories["Kategori:Testö (sv)"].pages.contains_key("Uusi (fi)"));
        assert_eq!(store.pages["Uusi (fi)"].length, Some(30));
        assert_eq!(store.categories["Kategori:Testö (sv)"].order, 1);
        assert_eq!(store.categories["Luokka:Testö (fi)"].order, 2);
        assert!(store.pages["Uusi (fi)"].stats.is_some());
    }

    #[test]
    fn reanalyse_records_issues_in_error_log() {
        let wiki = testo_wiki();
        let mut outcome = launch(
            &wiki,
            settings(&["sv", "fi"], 1),
            ScrapeTarget::Category("Testö".to_string()),
        )
        .expect("scrape succeeds");
        let before = outcome.store.clone();

        let mut errors = ErrorLog::default();
        let report = reanalyse(&mut outcome.store, &mut errors);
        assert!(report.is_clean());
        assert!(errors.is_empty());
        assert_eq!(outcome.store, before);

        outcome
            .store
            .pages
            .get_mut("Esimerkki (fi)")
            .expect("page")
            .length = None;
        let report = reanalyse(&mut outcome.store, &mut errors);
        assert_eq!(report.issues.len(), 1);
        assert!(errors.get("analyze", "").is_some());
    }
}
