use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire;

pub const NS_MAIN: i64 = 0;
pub const NS_CATEGORY: i64 = 14;

/// Store key for a page or category: `"{title} ({lang})"`.
pub fn page_key(title: &str, lang: &str) -> String {
    format!("{title} ({lang})")
}

/// Inverse of [`page_key`].
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (title, rest) = key.rsplit_once(" (")?;
    let lang = rest.strip_suffix(')')?;
    if lang.is_empty() {
        return None;
    }
    Some((title, lang))
}

/// Drop an in-page `#section` fragment from a link title.
pub fn strip_anchor(title: &str) -> &str {
    match title.find('#') {
        Some(index) => &title[..index],
        None => title,
    }
}

/// The whole result of a scrape run and the handoff artifact to renderers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeStore {
    pub stats: GlobalStats,
    #[serde(default)]
    pub blacklist: BTreeMap<String, String>,
    #[serde(default)]
    pub categories: BTreeMap<String, Category>,
    #[serde(default)]
    pub pages: BTreeMap<String, Page>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created(u64),
    Existing(u64),
}

impl Registration {
    pub fn order(self) -> u64 {
        match self {
            Self::Created(order) | Self::Existing(order) => order,
        }
    }
}

impl ScrapeStore {
    pub fn new(stats: GlobalStats) -> Self {
        Self {
            stats,
            blacklist: BTreeMap::new(),
            categories: BTreeMap::new(),
            pages: BTreeMap::new(),
        }
    }

    /// Create empty skeleton pages for titles not yet in the store.
    ///
    /// Returns the titles that were actually reserved, in request order, without
    /// duplicates. An empty result means there is nothing left to fetch.
    pub fn reserve_pages(&mut self, titles: &[String], lang: &str, is_category: bool) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut reserved = Vec::new();
        for title in titles {
            let title = title.trim();
            if title.is_empty() || !seen.insert(title.to_string()) {
                continue;
            }
            let key = page_key(title, lang);
            if self.pages.contains_key(&key) {
                continue;
            }
            self.pages
                .insert(key, Page::skeleton(title, lang, is_category));
            self.stats.pages_cnt += 1;
            reserved.push(title.to_string());
        }
        reserved
    }

    /// Register a category, assigning the next order value on first discovery only.
    pub fn register_category(&mut self, title: &str, lang: &str) -> Registration {
        let key = page_key(title, lang);
        if let Some(existing) = self.categories.get(&key) {
            return Registration::Existing(existing.order);
        }
        self.stats.categories_cnt += 1;
        let order = self.next_order();
        let mut category = Category {
            title: title.to_string(),
            lang: lang.to_string(),
            order,
            pages: BTreeMap::new(),
        };
        category
            .pages
            .insert(key.clone(), MemberStub::new(title, lang));
        self.categories.insert(key, category);
        Registration::Created(order)
    }

    /// Record category membership. Existing stubs are left untouched.
    pub fn add_member(&mut self, category_key: &str, title: &str, lang: &str) -> bool {
        let Some(category) = self.categories.get_mut(category_key) else {
            return false;
        };
        let key = page_key(title, lang);
        if category.pages.contains_key(&key) {
            return false;
        }
        category.pages.insert(key, MemberStub::new(title, lang));
        true
    }

    pub fn record_blacklisted(&mut self, title: &str, lang: &str, term: &str) {
        self.blacklist
            .insert(page_key(title, lang), term.to_string());
    }

    /// Category keys in ascending discovery order.
    pub fn category_keys_in_order(&self) -> Vec<String> {
        let mut keys = self
            .categories
            .iter()
            .map(|(key, category)| (category.order, key.clone()))
            .collect::<Vec<_>>();
        keys.sort();
        keys.into_iter().map(|(_, key)| key).collect()
    }

    /// Restore fields that older files derive from the key rather than store.
    pub fn normalize_loaded(&mut self) {
        for (key, page) in &mut self.pages {
            if page.lang.is_empty()
                && let Some((_, lang)) = split_key(key)
            {
                page.lang = lang.to_string();
            }
        }
    }

    fn next_order(&self) -> u64 {
        self.categories
            .values()
            .map(|category| category.order)
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GlobalStats {
    pub category_title: String,
    #[serde(with = "wire::pipe_list")]
    pub languages: Vec<String>,
    pub lang_1: String,
    pub lang_2: String,
    #[serde(default)]
    pub categories_cnt: u64,
    #[serde(default)]
    pub pages_cnt: u64,
    #[serde(default)]
    pub scrape_start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped: Option<String>,
    #[serde(
        default,
        with = "wire::opt_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_time_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv_days: Option<i64>,
}

impl GlobalStats {
    pub fn begin(category_title: &str, languages: &[String], scrape_start: String) -> Self {
        Self {
            category_title: category_title.to_string(),
            languages: languages.to_vec(),
            lang_1: languages.first().cloned().unwrap_or_default(),
            lang_2: languages.get(1).cloned().unwrap_or_default(),
            scrape_start,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Page {
    pub title: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub is_category: bool,
    #[serde(default)]
    pub redirects: Vec<String>,
    #[serde(default)]
    pub linkshere: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub contributors: Vec<String>,
    #[serde(default)]
    pub langlinks: Vec<LangLink>,
    #[serde(default)]
    pub extlinks: Vec<String>,
    #[serde(default)]
    pub revisions: Vec<Revision>,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagelanguage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touched: Option<String>,
    #[serde(
        default,
        with = "wire::opt_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub length: Option<u64>,
    #[serde(
        default,
        with = "wire::opt_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub anoncontributors: Option<u64>,
    #[serde(default)]
    pub pageviews: BTreeMap<String, Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PageStats>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lang_stats: BTreeMap<String, PageStats>,
}

impl Page {
    pub fn skeleton(title: &str, lang: &str, is_category: bool) -> Self {
        Self {
            title: title.to_string(),
            lang: lang.to_string(),
            is_category,
            ..Default::default()
        }
    }

    /// Title of this page's langlink to `lang`, anchor removed.
    pub fn langlink_title(&self, lang: &str) -> Option<&str> {
        self.langlinks
            .iter()
            .find(|link| link.lang == lang)
            .map(|link| strip_anchor(&link.title))
    }
}

/// One `{lang: title}` entry of a page's language links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<String, String>",
    try_from = "BTreeMap<String, String>"
)]
pub struct LangLink {
    pub lang: String,
    pub title: String,
}

impl LangLink {
    pub fn new(lang: &str, title: &str) -> Self {
        Self {
            lang: lang.to_string(),
            title: title.to_string(),
        }
    }
}

impl From<LangLink> for BTreeMap<String, String> {
    fn from(link: LangLink) -> Self {
        BTreeMap::from([(link.lang, link.title)])
    }
}

impl TryFrom<BTreeMap<String, String>> for LangLink {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let mut entries = map.into_iter();
        match (entries.next(), entries.next()) {
            (Some((lang, title)), None) => Ok(Self { lang, title }),
            _ => Err("langlink entry must hold exactly one {lang: title} pair".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Revision {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RawCategory", try_from = "RawCategory")]
pub struct Category {
    pub title: String,
    pub lang: String,
    pub order: u64,
    pub pages: BTreeMap<String, MemberStub>,
}

#[derive(Serialize, Deserialize)]
struct RawCategory {
    #[serde(default)]
    order: u64,
    #[serde(default)]
    pages: BTreeMap<String, MemberStub>,
    #[serde(flatten)]
    titles: BTreeMap<String, Value>,
}

impl From<Category> for RawCategory {
    fn from(category: Category) -> Self {
        Self {
            order: category.order,
            pages: category.pages,
            titles: BTreeMap::from([(
                format!("title_{}", category.lang),
                Value::String(category.title),
            )]),
        }
    }
}

impl TryFrom<RawCategory> for Category {
    type Error = String;

    fn try_from(raw: RawCategory) -> Result<Self, Self::Error> {
        let (lang, title) = raw
            .titles
            .into_iter()
            .find_map(|(key, value)| {
                let lang = key.strip_prefix("title_")?.to_string();
                let title = value.as_str()?.to_string();
                Some((lang, title))
            })
            .ok_or_else(|| "category is missing its title_<lang> field".to_string())?;
        Ok(Self {
            title,
            lang,
            order: raw.order,
            pages: raw.pages,
        })
    }
}

/// Minimal `{title_<lang>: title}` record of a category member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<String, String>",
    try_from = "BTreeMap<String, String>"
)]
pub struct MemberStub {
    pub lang: String,
    pub title: String,
}

impl MemberStub {
    pub fn new(title: &str, lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
            title: title.to_string(),
        }
    }
}

impl From<MemberStub> for BTreeMap<String, String> {
    fn from(stub: MemberStub) -> Self {
        BTreeMap::from([(format!("title_{}", stub.lang), stub.title)])
    }
}

impl TryFrom<BTreeMap<String, String>> for MemberStub {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        map.into_iter()
            .find_map(|(key, title)| {
                key.strip_prefix("title_")
                    .map(|lang| Self::new(&title, lang))
            })
            .ok_or_else(|| "member stub is missing its title_<lang> field".to_string())
    }
}

/// Per-field list lengths of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldCounts {
    pub redirects: u64,
    pub linkshere: u64,
    pub links: u64,
    pub images: u64,
    pub categories: u64,
    pub contributors: u64,
    pub langlinks: u64,
    pub extlinks: u64,
    pub revisions: u64,
    pub sections: u64,
}

impl FieldCounts {
    pub fn of(page: &Page) -> Self {
        let len = |items: usize| items as u64;
        Self {
            redirects: len(page.redirects.len()),
            linkshere: len(page.linkshere.len()),
            links: len(page.links.len()),
            images: len(page.images.len()),
            categories: len(page.categories.len()),
            contributors: len(page.contributors.len()),
            langlinks: len(page.langlinks.len()),
            extlinks: len(page.extlinks.len()),
            revisions: len(page.revisions.len()),
            sections: len(page.sections.len()),
        }
    }
}

/// Pageviews and length of a page as seen in one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LangFigures {
    pub pageviews: u64,
    pub length: Option<u64>,
}

/// Derived statistics of one page, filled by the aggregator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "RawPageStats", try_from = "RawPageStats")]
pub struct PageStats {
    pub counts: FieldCounts,
    pub contributors_tot: u64,
    pub pageviews_tot: u64,
    pub quality: u64,
    pub total_langs: Option<u64>,
    pub per_lang: BTreeMap<String, LangFigures>,
}

#[derive(Serialize, Deserialize)]
struct RawPageStats {
    #[serde(default, with = "wire::count")]
    redirects_cnt: u64,
    #[serde(default, with = "wire::count")]
    linkshere_cnt: u64,
    #[serde(default, with = "wire::count")]
    links_cnt: u64,
    #[serde(default, with = "wire::count")]
    images_cnt: u64,
    #[serde(default, with = "wire::count")]
    categories_cnt: u64,
    #[serde(default, with = "wire::count")]
    contributors_cnt: u64,
    #[serde(default, with = "wire::count")]
    langlinks_cnt: u64,
    #[serde(default, with = "wire::count")]
    extlinks_cnt: u64,
    #[serde(default, with = "wire::count")]
    revisions_cnt: u64,
    #[serde(default, with = "wire::count")]
    sections_cnt: u64,
    #[serde(default, with = "wire::count")]
    contributors_tot: u64,
    #[serde(default, with = "wire::count")]
    pageviews_tot: u64,
    #[serde(default, with = "wire::number")]
    quality: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_langs: Option<u64>,
    #[serde(flatten)]
    per_lang: BTreeMap<String, Value>,
}

impl From<PageStats> for RawPageStats {
    fn from(stats: PageStats) -> Self {
        let mut per_lang = BTreeMap::new();
        for (lang, figures) in stats.per_lang {
            per_lang.insert(
                format!("pageviews_{lang}"),
                Value::String(figures.pageviews.to_string()),
            );
            let length = figures
                .length
                .map(|length| length.to_string())
                .unwrap_or_else(|| "-1".to_string());
            per_lang.insert(format!("len_{lang}"), Value::String(length));
        }
        let counts = stats.counts;
        Self {
            redirects_cnt: counts.redirects,
            linkshere_cnt: counts.linkshere,
            links_cnt: counts.links,
            images_cnt: counts.images,
            categories_cnt: counts.categories,
            contributors_cnt: counts.contributors,
            langlinks_cnt: counts.langlinks,
            extlinks_cnt: counts.extlinks,
            revisions_cnt: counts.revisions,
            sections_cnt: counts.sections,
            contributors_tot: stats.contributors_tot,
            pageviews_tot: stats.pageviews_tot,
            quality: stats.quality,
            total_langs: stats.total_langs,
            per_lang,
        }
    }
}

impl TryFrom<RawPageStats> for PageStats {
    type Error = String;

    fn try_from(raw: RawPageStats) -> Result<Self, Self::Error> {
        let mut per_lang: BTreeMap<String, LangFigures> = BTreeMap::new();
        for (key, value) in raw.per_lang {
            if let Some(lang) = key.strip_prefix("pageviews_") {
                per_lang.entry(lang.to_string()).or_default().pageviews =
                    wire::count_from_value(&value).unwrap_or(0);
            } else if let Some(lang) = key.strip_prefix("len_") {
                per_lang.entry(lang.to_string()).or_default().length =
                    wire::count_from_value(&value);
            }
        }
        Ok(Self {
            counts: FieldCounts {
                redirects: raw.redirects_cnt,
                linkshere: raw.linkshere_cnt,
                links: raw.links_cnt,
                images: raw.images_cnt,
                categories: raw.categories_cnt,
                contributors: raw.contributors_cnt,
                langlinks: raw.langlinks_cnt,
                extlinks: raw.extlinks_cnt,
                revisions: raw.revisions_cnt,
                sections: raw.sections_cnt,
            },
            contributors_tot: raw.contributors_tot,
            pageviews_tot: raw.pageviews_tot,
            quality: raw.quality,
            total_langs: raw.total_langs,
            per_lang,
        })
    }
}
