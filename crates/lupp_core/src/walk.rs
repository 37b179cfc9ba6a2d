use serde_json::Value;
use tracing::{debug, info};

use crate::api::{ApiError, params, query};
use crate::fetch::PageBatch;
use crate::session::ScrapeSession;
use crate::store::{NS_CATEGORY, NS_MAIN, Registration, page_key};

const MEMBER_LIMIT: &str = "500";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions<'a> {
    pub depth: usize,
    /// Prepend the category namespace of the walked language to the title.
    pub add_prefix: bool,
    /// Record members in this existing category instead of the walked one.
    pub add_to_category: Option<&'a str>,
    /// Walk even if the category is already known.
    pub force: bool,
}

impl WalkOptions<'_> {
    pub fn top_level() -> Self {
        Self {
            depth: 0,
            add_prefix: true,
            add_to_category: None,
            force: false,
        }
    }

    fn child(&self) -> WalkOptions<'static> {
        WalkOptions {
            depth: self.depth + 1,
            add_prefix: false,
            add_to_category: None,
            force: false,
        }
    }
}

/// Recursively register `title` and its subcategories, dispatching page fetches.
///
/// Subcategories are walked synchronously on the calling thread; page batches go to
/// the session's worker pool and are not awaited here. Errors in a subcategory are
/// logged and its siblings continue; an error enumerating this category is returned
/// after the members seen so far have been dispatched.
pub fn scrape_category(
    session: &mut ScrapeSession,
    title: &str,
    lang: &str,
    options: WalkOptions<'_>,
) -> Result<(), ApiError> {
    let title = if options.add_prefix {
        session.settings.category_title(lang, title)
    } else {
        title.trim().to_string()
    };
    let key = page_key(&title, lang);
    session.errors.touch(&key);

    if session.graph.is_visited(&key) && !options.force {
        debug!(category = %key, "already scraped, skipping");
        return Ok(());
    }
    if options.depth >= session.settings.max_depth {
        debug!(category = %key, depth = options.depth, "depth limit reached");
        session.submit(PageBatch::new(vec![title], lang, true, true));
        return Ok(());
    }

    session.graph.enter(&key, options.force);
    match session.store.register_category(&title, lang) {
        Registration::Created(order) => {
            info!(category = %key, order, depth = options.depth, "category registered");
        }
        Registration::Existing(order) => {
            debug!(category = %key, order, "re-walking known category");
        }
    }
    session.submit(PageBatch::new(vec![title.clone()], lang, true, true));

    let mut queued = Vec::new();
    let outcome = walk_members(session, &title, &key, lang, &options, &mut queued);
    session.submit_titles(&queued, lang, false, false);
    outcome
}

fn walk_members(
    session: &mut ScrapeSession,
    title: &str,
    key: &str,
    lang: &str,
    options: &WalkOptions<'_>,
    queued: &mut Vec<String>,
) -> Result<(), ApiError> {
    let api = session.api_handle();
    let request = params(&[
        ("action", "query"),
        ("list", "categorymembers"),
        ("cmtitle", title),
        ("cmlimit", MEMBER_LIMIT),
    ]);
    for response in query(api.as_ref(), lang, request) {
        let response = response?;
        let members = response
            .get("query")
            .and_then(|body| body.get("categorymembers"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for member in members {
            let Some(member_title) = member.get("title").and_then(Value::as_str) else {
                continue;
            };
            let namespace = member.get("ns").and_then(Value::as_i64).unwrap_or(NS_MAIN);

            if let Some(term) = session.settings.blacklist_match(member_title) {
                let term = term.to_string();
                debug!(title = %member_title, term = %term, "blacklisted member skipped");
                session.store.record_blacklisted(member_title, lang, &term);
                continue;
            }

            let target = options.add_to_category.unwrap_or(key);
            session.store.add_member(target, member_title, lang);

            if namespace == NS_CATEGORY {
                let child_key = page_key(member_title, lang);
                session.graph.link(key, &child_key);
                if let Err(error) = scrape_category(session, member_title, lang, options.child()) {
                    session
                        .errors
                        .record("scrape_category", &child_key, error.payload());
                }
            } else {
                queued.push(member_title.to_string());
            }
        }
        session.pump();
    }
    Ok(())
}

/// Register a list of article titles as a mock category named `name` and fetch them.
pub fn register_article_list(
    session: &mut ScrapeSession,
    name: &str,
    titles: &[String],
    lang: &str,
) -> usize {
    let key = page_key(name, lang);
    session.errors.touch(&key);
    session.graph.enter(&key, true);
    session.store.register_category(name, lang);

    let mut listed = Vec::new();
    for title in titles.iter().map(|title| title.trim()) {
        if title.is_empty() {
            continue;
        }
        session.store.add_member(&key, title, lang);
        listed.push(title.to_string());
    }
    info!(list = %key, pages = listed.len(), "article list registered");
    session.submit_titles(&listed, lang, false, false);
    listed.len()
}
