use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, trace};

use crate::api::{ApiError, QueryParams, WikiQueryApi, params, query};
use crate::config::ScrapeSettings;
use crate::error_log::ErrorLog;
use crate::retry::RetryPolicy;
use crate::store::{LangLink, Page, Revision, ScrapeStore, page_key};
use crate::wire::count_from_value;

/// Titles per property request; the API's multi-title limit for normal accounts.
pub const BATCH_SIZE: usize = 50;
const LIST_LIMIT: &str = "500";

const FULL_PROPS: &str =
    "redirects|linkshere|links|images|categories|contributors|langlinks|extlinks|revisions|pageviews|info";
const FULL_LIMITS: [&str; 8] = [
    "rdlimit", "lhlimit", "pllimit", "imlimit", "cllimit", "pclimit", "lllimit", "ellimit",
];
const QUICK_PROPS: &str = "contributors|langlinks|pageviews|info";
const QUICK_LIMITS: [&str; 2] = ["pclimit", "lllimit"];
const TITLED_FIELDS: [&str; 5] = ["redirects", "linkshere", "links", "images", "categories"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBatch {
    pub titles: Vec<String>,
    pub lang: String,
    pub is_category: bool,
    pub quick_scan: bool,
}

impl PageBatch {
    pub fn new(titles: Vec<String>, lang: &str, is_category: bool, quick_scan: bool) -> Self {
        Self {
            titles,
            lang: lang.to_string(),
            is_category,
            quick_scan,
        }
    }

    /// Split `titles` into batches of at most [`BATCH_SIZE`].
    pub fn chunked(titles: &[String], lang: &str, is_category: bool, quick_scan: bool) -> Vec<Self> {
        titles
            .chunks(BATCH_SIZE)
            .map(|chunk| Self::new(chunk.to_vec(), lang, is_category, quick_scan))
            .collect()
    }

    fn query_params(&self) -> QueryParams {
        let titles = self.titles.join("|");
        let (props, limits) = if self.quick_scan {
            (QUICK_PROPS, &QUICK_LIMITS[..])
        } else {
            (FULL_PROPS, &FULL_LIMITS[..])
        };
        let mut request = params(&[("action", "query"), ("titles", &titles), ("prop", props)]);
        for limit in limits {
            request.push(((*limit).to_string(), LIST_LIMIT.to_string()));
        }
        request
    }
}

/// Worker-side knobs of a batch fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub revision_cutoff: String,
    pub retry: RetryPolicy,
}

impl FetchOptions {
    pub fn from_settings(settings: &ScrapeSettings) -> Self {
        Self {
            revision_cutoff: settings.revision_cutoff.clone(),
            retry: settings.retry,
        }
    }
}

/// Raw fields of one page as returned by the API, not yet in the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedPage {
    pub title: String,
    pub pagelanguage: Option<String>,
    pub touched: Option<String>,
    pub length: Option<u64>,
    pub anoncontributors: Option<u64>,
    pub pageviews: BTreeMap<String, Option<u64>>,
    pub contributors: Vec<String>,
    pub langlinks: Vec<LangLink>,
    pub redirects: Vec<String>,
    pub linkshere: Vec<String>,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub categories: Vec<String>,
    pub extlinks: Vec<String>,
    /// `None` when the sub-request failed.
    pub sections: Option<Vec<String>>,
    pub revisions: Option<Vec<Revision>>,
}

impl FetchedPage {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn absorb_scalars(&mut self, entry: &Value) {
        self.pagelanguage = entry
            .get("pagelanguage")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        self.touched = entry
            .get("touched")
            .and_then(Value::as_str)
            .map(|touched| touched.replace('T', " ").replace('Z', ""));
        self.length = entry.get("length").and_then(count_from_value);
        self.anoncontributors = entry.get("anoncontributors").and_then(count_from_value);
    }

    fn absorb_lists(&mut self, entry: &Value, quick_scan: bool) {
        if let Some(views) = entry.get("pageviews").and_then(Value::as_object) {
            for (date, count) in views {
                self.pageviews.insert(date.clone(), count_from_value(count));
            }
        }
        for item in array(entry, "contributors") {
            if let Some(name) = item.get("name").and_then(Value::as_str) {
                self.contributors.push(name.to_string());
            }
        }
        for item in array(entry, "langlinks") {
            let lang = item.get("lang").and_then(Value::as_str);
            let title = text_field(item, "title");
            if let (Some(lang), Some(title)) = (lang, title) {
                self.langlinks.push(LangLink::new(lang, title));
            }
        }
        if quick_scan {
            return;
        }
        for field in TITLED_FIELDS {
            let titles = array(entry, field)
                .filter_map(|item| item.get("title").and_then(Value::as_str))
                .map(ToString::to_string);
            match field {
                "redirects" => self.redirects.extend(titles),
                "linkshere" => self.linkshere.extend(titles),
                "links" => self.links.extend(titles),
                "images" => self.images.extend(titles),
                _ => self.categories.extend(titles),
            }
        }
        for item in array(entry, "extlinks") {
            if let Some(url) = text_field(item, "url") {
                self.extlinks.push(url.to_string());
            }
        }
    }
}

/// A sub-request failure for one page; the rest of the page is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailError {
    pub operation: &'static str,
    pub subject: String,
    pub info: Vec<String>,
}

/// Everything a worker learned about one [`PageBatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFetch {
    pub lang: String,
    pub is_category: bool,
    pub pages: Vec<FetchedPage>,
    /// Requested titles the wiki reports as nonexistent.
    pub missing: Vec<String>,
    pub detail_errors: Vec<DetailError>,
}

impl BatchFetch {
    /// Write the fetched pages into the store and log sub-request failures.
    pub fn apply(self, store: &mut ScrapeStore, errors: &mut ErrorLog) -> usize {
        for title in &self.missing {
            debug!(lang = %self.lang, title = %title, "page does not exist");
        }
        for detail in self.detail_errors {
            errors.record(detail.operation, &detail.subject, detail.info);
        }
        let merged = self.pages.len();
        for page in self.pages {
            store.merge_fetched(&self.lang, self.is_category, page);
        }
        merged
    }
}

impl ScrapeStore {
    /// Merge one fetched page into its skeleton: scalars overwrite, lists append.
    pub fn merge_fetched(&mut self, lang: &str, is_category: bool, fetched: FetchedPage) {
        let key = page_key(&fetched.title, lang);
        if !self.pages.contains_key(&key) {
            self.stats.pages_cnt += 1;
        }
        let page = self
            .pages
            .entry(key)
            .or_insert_with(|| Page::skeleton(&fetched.title, lang, is_category));

        if fetched.pagelanguage.is_some() {
            page.pagelanguage = fetched.pagelanguage;
        }
        if fetched.touched.is_some() {
            page.touched = fetched.touched;
        }
        if fetched.length.is_some() {
            page.length = fetched.length;
        }
        if fetched.anoncontributors.is_some() {
            page.anoncontributors = fetched.anoncontributors;
        }
        page.pageviews.extend(fetched.pageviews);
        page.contributors.extend(fetched.contributors);
        page.langlinks.extend(fetched.langlinks);
        page.redirects.extend(fetched.redirects);
        page.linkshere.extend(fetched.linkshere);
        page.links.extend(fetched.links);
        page.images.extend(fetched.images);
        page.categories.extend(fetched.categories);
        page.extlinks.extend(fetched.extlinks);
        if let Some(sections) = fetched.sections {
            page.sections = sections;
        }
        if let Some(revisions) = fetched.revisions {
            page.revisions = revisions;
        }
    }
}

/// Fetch one batch. Runs on a worker thread and never touches the store.
pub fn fetch_page_batch<A>(
    api: &A,
    batch: &PageBatch,
    options: &FetchOptions,
) -> Result<BatchFetch, ApiError>
where
    A: WikiQueryApi + ?Sized,
{
    let (mut pages, missing) = options.retry.run(|| fetch_properties(api, batch))?;
    trace!(lang = %batch.lang, pages = pages.len(), missing = missing.len(), "fetched batch");

    let mut detail_errors = Vec::new();
    for page in &mut pages {
        let subject = page_key(&page.title, &batch.lang);
        match options.retry.run(|| fetch_sections(api, &batch.lang, &page.title)) {
            Ok(sections) => page.sections = Some(sections),
            Err(error) => detail_errors.push(DetailError {
                operation: "scrape_sections",
                subject: subject.clone(),
                info: error.payload(),
            }),
        }
        match options
            .retry
            .run(|| fetch_revisions(api, &batch.lang, &page.title, &options.revision_cutoff))
        {
            Ok(revisions) => page.revisions = Some(revisions),
            Err(error) => detail_errors.push(DetailError {
                operation: "scrape_revisions",
                subject,
                info: error.payload(),
            }),
        }
    }

    Ok(BatchFetch {
        lang: batch.lang.clone(),
        is_category: batch.is_category,
        pages,
        missing,
        detail_errors,
    })
}

fn fetch_properties<A>(api: &A, batch: &PageBatch) -> Result<(Vec<FetchedPage>, Vec<String>), ApiError>
where
    A: WikiQueryApi + ?Sized,
{
    let mut order: Vec<String> = Vec::new();
    let mut collected: HashMap<String, FetchedPage> = HashMap::new();
    let mut scalars_seen: HashSet<String> = HashSet::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();
    let mut renames: HashMap<String, String> = HashMap::new();

    for response in query(api, &batch.lang, batch.query_params()) {
        let response = response?;
        let Some(body) = response.get("query") else {
            continue;
        };
        for item in array(body, "normalized") {
            let from = item.get("from").and_then(Value::as_str);
            let to = item.get("to").and_then(Value::as_str);
            if let (Some(from), Some(to)) = (from, to) {
                renames.insert(to.to_string(), from.to_string());
            }
        }
        for entry in response_pages(body) {
            let Some(returned) = entry.get("title").and_then(Value::as_str) else {
                continue;
            };
            let title = renames
                .get(returned)
                .cloned()
                .unwrap_or_else(|| returned.to_string());
            if is_missing(entry) {
                missing.insert(title);
                continue;
            }
            let page = collected.entry(title.clone()).or_insert_with(|| {
                order.push(title.clone());
                FetchedPage::new(&title)
            });
            if scalars_seen.insert(title) {
                page.absorb_scalars(entry);
            }
            page.absorb_lists(entry, batch.quick_scan);
        }
    }

    let pages = order
        .into_iter()
        .filter_map(|title| collected.remove(&title))
        .collect();
    Ok((pages, missing.into_iter().collect()))
}

/// Section headers, indented with one dash per level below the top.
fn fetch_sections<A>(api: &A, lang: &str, title: &str) -> Result<Vec<String>, ApiError>
where
    A: WikiQueryApi + ?Sized,
{
    let response = api.request(
        lang,
        &params(&[("action", "parse"), ("page", title), ("prop", "sections")]),
    )?;
    let sections = response
        .get("parse")
        .map(|parse| array(parse, "sections"))
        .into_iter()
        .flatten()
        .filter_map(|section| {
            let line = section.get("line").and_then(Value::as_str)?;
            let level = section.get("toclevel").and_then(Value::as_u64).unwrap_or(1);
            let depth = usize::try_from(level.saturating_sub(1)).unwrap_or(0);
            Some(format!("{}{line}", "-".repeat(depth)))
        })
        .collect();
    Ok(sections)
}

fn fetch_revisions<A>(api: &A, lang: &str, title: &str, cutoff: &str) -> Result<Vec<Revision>, ApiError>
where
    A: WikiQueryApi + ?Sized,
{
    let request = params(&[
        ("action", "query"),
        ("titles", title),
        ("prop", "revisions"),
        ("rvprop", "timestamp|user|comment"),
        ("rvdir", "newer"),
        ("rvstart", cutoff),
        ("rvlimit", LIST_LIMIT),
    ]);
    let mut revisions = Vec::new();
    for response in query(api, lang, request) {
        let response = response?;
        let Some(page) = response.get("query").and_then(|body| response_pages(body).next()) else {
            continue;
        };
        for revision in array(page, "revisions") {
            revisions.push(Revision {
                timestamp: revision
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                user: revision
                    .get("user")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                comment: revision
                    .get("comment")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
            });
        }
    }
    Ok(revisions)
}

/// Page objects of a query body: an array in formatversion 2, an id map in version 1.
fn response_pages(body: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match body.get("pages") {
        Some(Value::Array(pages)) => Box::new(pages.iter()),
        Some(Value::Object(pages)) => Box::new(pages.values()),
        _ => Box::new(std::iter::empty()),
    }
}

fn is_missing(entry: &Value) -> bool {
    entry.get("missing").is_some()
        || entry.get("invalid").is_some()
        || entry.get("pageid").and_then(Value::as_i64) == Some(-1)
}

fn array<'a>(value: &'a Value, field: &str) -> impl Iterator<Item = &'a Value> + 'a {
    value
        .get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// A string field, or its formatversion 1 spelling under `*`.
fn text_field<'a>(item: &'a Value, field: &str) -> Option<&'a str> {
    item.get(field)
        .or_else(|| item.get("*"))
        .and_then(Value::as_str)
}
