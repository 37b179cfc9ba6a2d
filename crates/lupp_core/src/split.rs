use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::graph::CategoryGraph;
use crate::store::{GlobalStats, ScrapeStore, page_key, split_key, strip_anchor};

/// One self-contained store cut out of a larger scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitStore {
    /// Subcategory title without namespace prefix, used for the file name.
    pub name: String,
    pub store: ScrapeStore,
}

/// Cut every direct primary-language subcategory of the top category into its
/// own store. Secondary-language subcategories merged into the top only travel
/// along with their primary counterpart. The source is left untouched; nothing
/// is fetched.
pub fn split_by_subcategory(source: &ScrapeStore) -> Vec<SplitStore> {
    let order = source.category_keys_in_order();
    let Some(top) = order.first() else {
        return Vec::new();
    };
    let graph = CategoryGraph::seeded_from(source);
    let primary = source.stats.lang_1.as_str();
    graph
        .children(top)
        .into_iter()
        .filter(|child| split_key(child).is_some_and(|(_, lang)| lang == primary))
        .map(|child| extract(source, &graph, &order, child))
        .collect()
}

fn extract(source: &ScrapeStore, graph: &CategoryGraph, order: &[String], key: &str) -> SplitStore {
    let mut included = ordered_subset(order, graph.descendants(key));

    let counterpart = source
        .pages
        .get(key)
        .and_then(|page| page.langlink_title(&source.stats.lang_2))
        .map(|title| page_key(title, &source.stats.lang_2));
    if let Some(counterpart) = counterpart {
        if source.categories.contains_key(&counterpart) {
            for extra in ordered_subset(order, graph.descendants(&counterpart)) {
                if !included.contains(&extra) {
                    included.push(extra);
                }
            }
        } else {
            debug!(category = %key, counterpart = %counterpart, "secondary category not in store");
        }
    }

    let name = short_title(source, key);
    let mut store = ScrapeStore::new(GlobalStats {
        category_title: name.clone(),
        languages: source.stats.languages.clone(),
        lang_1: source.stats.lang_1.clone(),
        lang_2: source.stats.lang_2.clone(),
        categories_cnt: 0,
        pages_cnt: 0,
        scrape_start: source.stats.scrape_start.clone(),
        scraped: source.stats.scraped.clone(),
        response_time_s: None,
        date_from: source.stats.date_from.clone(),
        date_to: source.stats.date_to.clone(),
        pv_days: source.stats.pv_days,
    });

    for (index, category_key) in included.iter().enumerate() {
        let Some(category) = source.categories.get(category_key) else {
            continue;
        };
        let mut category = category.clone();
        category.order = index as u64 + 1;
        for member in category.pages.keys() {
            copy_page(source, &mut store, member);
        }
        copy_page(source, &mut store, category_key);
        store.categories.insert(category_key.clone(), category);
    }
    store.stats.categories_cnt = store.categories.len() as u64;
    store.stats.pages_cnt = store.pages.len() as u64;
    debug!(
        category = %key,
        categories = store.stats.categories_cnt,
        pages = store.stats.pages_cnt,
        "split out subcategory"
    );
    SplitStore { name, store }
}

/// `keys` restricted to `wanted`, in the order of `keys`.
fn ordered_subset(keys: &[String], wanted: Vec<&str>) -> Vec<String> {
    let wanted = wanted.into_iter().collect::<BTreeSet<_>>();
    keys.iter()
        .filter(|key| wanted.contains(key.as_str()))
        .cloned()
        .collect()
}

fn copy_page(source: &ScrapeStore, target: &mut ScrapeStore, key: &str) {
    if target.pages.contains_key(key) {
        return;
    }
    let Some(page) = source.pages.get(key) else {
        warn!(page = %key, "category member missing from store, not copied");
        return;
    };
    target.pages.insert(key.to_string(), page.clone());
    for link in &page.langlinks {
        if !source.stats.languages.contains(&link.lang) {
            continue;
        }
        let linked = page_key(strip_anchor(&link.title), &link.lang);
        if target.pages.contains_key(&linked) {
            continue;
        }
        if let Some(linked_page) = source.pages.get(&linked) {
            target.pages.insert(linked, linked_page.clone());
        }
    }
}

fn short_title(source: &ScrapeStore, key: &str) -> String {
    let title = source
        .categories
        .get(key)
        .map(|category| category.title.as_str())
        .or_else(|| split_key(key).map(|(title, _)| title))
        .unwrap_or(key);
    title
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(title)
        .to_string()
}
