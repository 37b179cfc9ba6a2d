//! In-memory MediaWiki used by the unit tests of every component.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value, json};

use crate::api::{ApiError, QueryParams, WikiQueryApi};
use crate::store::{NS_CATEGORY, NS_MAIN};

#[derive(Debug, Clone, Default)]
pub(crate) struct MockPage {
    pub length: Option<u64>,
    pub touched: Option<String>,
    pub pagelanguage: Option<String>,
    pub anoncontributors: u64,
    pub contributors: Vec<String>,
    pub langlinks: Vec<(String, String)>,
    pub pageviews: Vec<(String, Option<u64>)>,
    pub redirects: Vec<String>,
    pub linkshere: Vec<String>,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub categories: Vec<String>,
    pub extlinks: Vec<String>,
    pub sections: Vec<(u64, String)>,
    pub revisions: Vec<(String, String, String)>,
}

impl MockPage {
    pub fn with_length(length: u64) -> Self {
        Self {
            length: Some(length),
            touched: Some("2024-03-01T10:20:30Z".to_string()),
            ..Default::default()
        }
    }

    pub fn langlink(mut self, lang: &str, title: &str) -> Self {
        self.langlinks.push((lang.to_string(), title.to_string()));
        self
    }

    pub fn views(mut self, views: &[(&str, Option<u64>)]) -> Self {
        self.pageviews = views
            .iter()
            .map(|(date, count)| ((*date).to_string(), *count))
            .collect();
        self
    }

    pub fn contributors(mut self, names: &[&str]) -> Self {
        self.contributors = names.iter().map(ToString::to_string).collect();
        self
    }

    pub fn links(mut self, titles: &[&str]) -> Self {
        self.links = titles.iter().map(ToString::to_string).collect();
        self
    }
}

#[derive(Debug, Clone)]
struct Failure {
    code: String,
    remaining: Option<usize>,
}

#[derive(Default)]
struct MockState {
    pages: HashMap<(String, String), MockPage>,
    members: HashMap<(String, String), Vec<(i64, String)>>,
    invalid_categories: Vec<(String, String)>,
    broken_sections: Vec<(String, String)>,
    failures: HashMap<(String, String), Failure>,
    member_page_size: Option<usize>,
    split_properties: bool,
    log: Vec<(String, QueryParams)>,
}

#[derive(Default)]
pub(crate) struct MockWiki {
    state: Mutex<MockState>,
}

fn key(lang: &str, title: &str) -> (String, String) {
    (lang.to_string(), title.to_string())
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// First letter uppercased, as MediaWiki does for most namespaces.
fn normalize(title: &str) -> String {
    let mut chars = title.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl MockWiki {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&self, lang: &str, title: &str, page: MockPage) {
        self.lock().pages.insert(key(lang, title), page);
    }

    /// Register members `(namespace, title)` of a category. The category page itself is
    /// created if absent.
    pub fn add_members(&self, lang: &str, category: &str, members: &[(i64, &str)]) {
        let mut state = self.lock();
        state
            .pages
            .entry(key(lang, category))
            .or_insert_with(|| MockPage::with_length(100));
        state.members.entry(key(lang, category)).or_default().extend(
            members
                .iter()
                .map(|(namespace, title)| (*namespace, (*title).to_string())),
        );
    }

    pub fn add_subcategory(&self, lang: &str, parent: &str, child: &str) {
        self.add_members(lang, parent, &[(NS_CATEGORY, child)]);
        self.add_members(lang, child, &[]);
    }

    pub fn add_article(&self, lang: &str, category: &str, title: &str, page: MockPage) {
        self.add_members(lang, category, &[(NS_MAIN, title)]);
        self.add_page(lang, title, page);
    }

    pub fn invalid_category(&self, lang: &str, title: &str) {
        self.lock().invalid_categories.push(key(lang, title));
    }

    /// Requests naming `title` fail with `code`, `times` times or forever.
    pub fn fail(&self, lang: &str, title: &str, code: &str, times: Option<usize>) {
        self.lock().failures.insert(
            key(lang, title),
            Failure {
                code: code.to_string(),
                remaining: times,
            },
        );
    }

    /// `action=parse` fails for this page while property queries still work.
    pub fn break_sections(&self, lang: &str, title: &str) {
        self.lock().broken_sections.push(key(lang, title));
    }

    pub fn member_page_size(&self, size: usize) {
        self.lock().member_page_size = Some(size);
    }

    /// Split property queries into two continuation pages.
    pub fn split_properties(&self) {
        self.lock().split_properties = true;
    }

    pub fn count(&self, name: &str, value: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(_, params)| param(params, name) == Some(value))
            .count()
    }

    pub fn requested_titles(&self, lang: &str) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|(request_lang, params)| {
                request_lang == lang
                    && param(params, "prop").is_some()
                    && param(params, "rvprop").is_none()
            })
            .filter_map(|(_, params)| param(params, "titles"))
            .flat_map(|titles| titles.split('|').map(ToString::to_string))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_failure(state: &mut MockState, lang: &str, subjects: &[&str]) -> Result<(), ApiError> {
        for subject in subjects {
            let Some(failure) = state.failures.get_mut(&key(lang, subject)) else {
                continue;
            };
            match &mut failure.remaining {
                Some(0) => continue,
                Some(remaining) => *remaining -= 1,
                None => {}
            }
            return Err(ApiError::api(&failure.code, &format!("mock failure for {subject}")));
        }
        Ok(())
    }

    fn category_members(
        state: &MockState,
        lang: &str,
        params: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let title = param(params, "cmtitle").unwrap_or_default();
        if state.invalid_categories.contains(&key(lang, title)) {
            return Err(ApiError::api(
                "invalidcategory",
                "The category name you entered is not valid.",
            ));
        }
        let members = state
            .members
            .get(&key(lang, title))
            .cloned()
            .unwrap_or_default();
        let limit = param(params, "cmlimit")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(10);
        let size = state.member_page_size.unwrap_or(limit).min(limit).max(1);
        let start = param(params, "cmcontinue")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);
        let end = (start + size).min(members.len());
        let page = members[start.min(end)..end]
            .iter()
            .map(|(namespace, title)| json!({"ns": namespace, "title": title}))
            .collect::<Vec<_>>();
        let mut response = json!({"query": {"categorymembers": page}});
        if end < members.len() {
            response["continue"] = json!({"cmcontinue": end.to_string(), "continue": "-||"});
        }
        Ok(response)
    }

    fn sections(state: &MockState, lang: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        let title = param(params, "page").unwrap_or_default();
        if state.broken_sections.contains(&key(lang, title)) {
            return Err(ApiError::api("internal_api_error_DBQueryError", "Database query error."));
        }
        let Some(page) = state.pages.get(&key(lang, &normalize(title))) else {
            return Err(ApiError::api(
                "missingtitle",
                "The page you specified doesn't exist.",
            ));
        };
        let sections = page
            .sections
            .iter()
            .map(|(level, line)| json!({"toclevel": level, "line": line}))
            .collect::<Vec<_>>();
        Ok(json!({"parse": {"title": title, "sections": sections}}))
    }

    fn revisions(state: &MockState, lang: &str, params: &[(String, String)]) -> Value {
        let title = normalize(param(params, "titles").unwrap_or_default());
        let Some(page) = state.pages.get(&key(lang, &title)) else {
            return json!({"query": {"pages": [{"title": title, "missing": true}]}});
        };
        let start = param(params, "rvstart").unwrap_or_default();
        let revisions = page
            .revisions
            .iter()
            .filter(|(timestamp, _, _)| timestamp.as_str() >= start)
            .map(|(timestamp, user, comment)| {
                json!({"timestamp": timestamp, "user": user, "comment": comment})
            })
            .collect::<Vec<_>>();
        json!({"query": {"pages": [{"title": title, "revisions": revisions}]}})
    }

    fn properties(state: &MockState, lang: &str, params: &[(String, String)]) -> Value {
        let requested = param(params, "titles").unwrap_or_default();
        let prop = param(params, "prop").unwrap_or_default();
        let wants = |name: &str| prop.split('|').any(|item| item == name);
        let continued = param(params, "plcontinue").is_some();
        let split = state.split_properties;

        let mut normalized = Vec::new();
        let mut pages = Vec::new();
        for title in requested.split('|').filter(|title| !title.is_empty()) {
            let canonical = normalize(title);
            if canonical != title {
                normalized.push(json!({"from": title, "to": canonical}));
            }
            let Some(page) = state.pages.get(&key(lang, &canonical)) else {
                pages.push(json!({"ns": 0, "title": canonical, "missing": true}));
                continue;
            };
            let half = |items: &[String]| -> Vec<String> {
                if !split {
                    return items.to_vec();
                }
                let middle = items.len().div_ceil(2);
                if continued {
                    items[middle..].to_vec()
                } else {
                    items[..middle].to_vec()
                }
            };
            let mut entry = Map::new();
            entry.insert("pageid".into(), json!(1));
            entry.insert("title".into(), json!(canonical));
            if wants("info") {
                let length = page.length.map(|length| if continued { length + 1000 } else { length });
                entry.insert("length".into(), json!(length));
                entry.insert("touched".into(), json!(page.touched));
                entry.insert(
                    "pagelanguage".into(),
                    json!(page.pagelanguage.clone().unwrap_or_else(|| lang.to_string())),
                );
            }
            if wants("contributors") {
                let names = half(page.contributors.as_slice());
                entry.insert(
                    "contributors".into(),
                    Value::Array(names.iter().map(|name| json!({"name": name})).collect()),
                );
                entry.insert("anoncontributors".into(), json!(page.anoncontributors));
            }
            if wants("langlinks") && !continued {
                entry.insert(
                    "langlinks".into(),
                    Value::Array(
                        page.langlinks
                            .iter()
                            .map(|(lang, title)| json!({"lang": lang, "title": title}))
                            .collect(),
                    ),
                );
            }
            if wants("pageviews") && !continued {
                let mut views = Map::new();
                for (date, count) in &page.pageviews {
                    views.insert(date.clone(), json!(count));
                }
                entry.insert("pageviews".into(), Value::Object(views));
            }
            let titled = [
                ("redirects", &page.redirects),
                ("linkshere", &page.linkshere),
                ("links", &page.links),
                ("images", &page.images),
                ("categories", &page.categories),
            ];
            for (field, values) in titled {
                if wants(field) {
                    entry.insert(
                        field.into(),
                        Value::Array(
                            half(values.as_slice())
                                .iter()
                                .map(|title| json!({"ns": 0, "title": title}))
                                .collect(),
                        ),
                    );
                }
            }
            if wants("extlinks") && !continued {
                entry.insert(
                    "extlinks".into(),
                    Value::Array(page.extlinks.iter().map(|url| json!({"url": url})).collect()),
                );
            }
            pages.push(Value::Object(entry));
        }

        let mut response = json!({"query": {"pages": pages}});
        if !normalized.is_empty() {
            response["query"]["normalized"] = Value::Array(normalized);
        }
        if split && !continued {
            response["continue"] = json!({"plcontinue": "1", "continue": "||"});
        }
        response
    }
}

impl WikiQueryApi for MockWiki {
    fn request(&self, lang: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.log.push((lang.to_string(), params.to_vec()));

        let subjects = ["cmtitle", "page", "titles"]
            .iter()
            .filter_map(|name| param(params, name))
            .flat_map(|value| value.split('|'))
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let subjects = subjects.iter().map(String::as_str).collect::<Vec<_>>();
        Self::check_failure(&mut state, lang, &subjects)?;

        if param(params, "action") == Some("parse") {
            return Self::sections(&state, lang, params);
        }
        if param(params, "list") == Some("categorymembers") {
            return Self::category_members(&state, lang, params);
        }
        if param(params, "rvprop").is_some() {
            return Ok(Self::revisions(&state, lang, params));
        }
        if param(params, "titles").is_some() {
            return Ok(Self::properties(&state, lang, params));
        }
        Ok(json!({}))
    }

    fn request_count(&self) -> usize {
        self.lock().log.len()
    }
}
