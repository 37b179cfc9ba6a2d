use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::session::ScrapeSession;
use crate::store::{page_key, strip_anchor};
use crate::walk::{WalkOptions, scrape_category};

/// Which langlink languages the expansion stage follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageScope {
    All,
    Only(Vec<String>),
}

impl LanguageScope {
    /// The configured languages other than the primary one.
    pub fn configured(languages: &[String]) -> Self {
        Self::Only(languages.iter().skip(1).cloned().collect())
    }

    fn admits(&self, lang: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(languages) => languages.iter().any(|item| item == lang),
        }
    }
}

/// Wiki codes longer than three letters are special projects, except `simple`.
pub fn is_standard_wiki_code(lang: &str) -> bool {
    lang.len() < 4 || lang == "simple"
}

/// Re-walk every known category in the secondary language, merging members found
/// there into the primary-language category. Returns the number of categories walked.
pub fn scrape_missing_secondary(session: &mut ScrapeSession) -> usize {
    let secondary = session.settings.secondary_lang().to_string();
    let mut walked = 0;
    for key in session.store.category_keys_in_order() {
        let Some(target) = session
            .store
            .pages
            .get(&key)
            .and_then(|page| page.langlink_title(&secondary))
            .map(ToString::to_string)
        else {
            continue;
        };
        debug!(category = %key, counterpart = %target, lang = %secondary, "re-walking in secondary language");
        let options = WalkOptions {
            depth: 0,
            add_prefix: false,
            add_to_category: Some(&key),
            force: true,
        };
        if let Err(error) = scrape_category(session, &target, &secondary, options) {
            session.errors.record(
                "scrape_missing_primary_language",
                &page_key(&target, &secondary),
                error.payload(),
            );
        }
        walked += 1;
    }
    info!(categories = walked, lang = %secondary, "secondary language pass walked");
    walked
}

/// Fetch the langlink targets of every category member in the admitted languages.
/// Returns the number of batches dispatched.
pub fn expand_langlinks(session: &mut ScrapeSession, scope: &LanguageScope) -> usize {
    let mut targets: BTreeMap<(String, bool), Vec<String>> = BTreeMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for key in session.store.category_keys_in_order() {
        let Some(category) = session.store.categories.get(&key) else {
            continue;
        };
        for member in category.pages.keys() {
            let Some(page) = session.store.pages.get(member) else {
                continue;
            };
            for link in &page.langlinks {
                if !is_standard_wiki_code(&link.lang) || !scope.admits(&link.lang) {
                    continue;
                }
                let title = strip_anchor(&link.title).trim();
                if title.is_empty() || !seen.insert((link.lang.clone(), title.to_string())) {
                    continue;
                }
                targets
                    .entry((link.lang.clone(), page.is_category))
                    .or_default()
                    .push(title.to_string());
            }
        }
    }

    let mut dispatched = 0;
    for ((lang, is_category), titles) in targets {
        debug!(lang = %lang, pages = titles.len(), is_category, "expanding langlinks");
        dispatched += session.submit_titles(&titles, &lang, is_category, false);
    }
    info!(batches = dispatched, "langlink expansion dispatched");
    dispatched
}
