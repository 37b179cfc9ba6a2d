use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::store::{ScrapeStore, split_key};

/// Above this many distinct contributors the ranking drops occasional editors.
const LARGE_CROWD: usize = 1000;
const MIN_EDITS_IN_LARGE_CROWD: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorTally {
    pub name: String,
    pub edits: u64,
    pub per_lang: BTreeMap<String, u64>,
}

impl ContributorTally {
    pub fn edits_in(&self, lang: &str) -> u64 {
        self.per_lang.get(lang).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorRanking {
    pub languages: Vec<String>,
    pub contributors: Vec<ContributorTally>,
    /// Distinct contributors before any filtering.
    pub total_contributors: usize,
    pub total_pages: usize,
    /// Sum over pages of the contributors listed on each.
    pub total_pairs: u64,
}

pub fn rank_contributors(store: &ScrapeStore) -> ContributorRanking {
    let mut tallies: HashMap<&str, ContributorTally> = HashMap::new();
    let mut total_pairs = 0;
    for (key, page) in &store.pages {
        let lang = if page.lang.is_empty() {
            split_key(key).map(|(_, lang)| lang).unwrap_or_default()
        } else {
            page.lang.as_str()
        };
        for name in &page.contributors {
            total_pairs += 1;
            let tally = tallies
                .entry(name.as_str())
                .or_insert_with(|| ContributorTally {
                    name: name.clone(),
                    edits: 0,
                    per_lang: BTreeMap::new(),
                });
            tally.edits += 1;
            *tally.per_lang.entry(lang.to_string()).or_default() += 1;
        }
    }

    let total_contributors = tallies.len();
    let mut contributors = tallies.into_values().collect::<Vec<_>>();
    if total_contributors > LARGE_CROWD {
        contributors.retain(|tally| tally.edits > MIN_EDITS_IN_LARGE_CROWD);
    }
    let languages = store.stats.languages.clone();
    contributors.sort_by(|left, right| {
        languages
            .iter()
            .map(|lang| right.edits_in(lang).cmp(&left.edits_in(lang)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| left.name.cmp(&right.name))
    });

    ContributorRanking {
        languages,
        contributors,
        total_contributors,
        total_pages: store.pages.len(),
        total_pairs,
    }
}
