use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::wire::pipe_list::split_pipe_list;

pub const CONFIG_FILENAME: &str = "lupp.toml";
pub const DEFAULT_USER_AGENT: &str = "lupp/0.1";
pub const DEFAULT_API_URL_TEMPLATE: &str = "https://{lang}.wikipedia.org/w/api.php";
pub const DEFAULT_LANGUAGES: &str = "sv|fi|en|de";
pub const DEFAULT_MAX_DEPTH: usize = 10;
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_BLACKLIST: [&str; 3] = ["olympiska", "användare", "mall:"];
pub const DEFAULT_REVISION_CUTOFF: &str = "2017-01-01T00:00:00Z";
pub const FALLBACK_CATEGORY_PREFIX: &str = "Category:";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RATE_LIMIT_MS: u64 = 50;

const BUILTIN_CATEGORY_PREFIXES: [(&str, &str); 4] = [
    ("sv", "Kategori:"),
    ("fi", "Luokka:"),
    ("en", "Category:"),
    ("de", "Kategorie:"),
];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LuppConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub scrape: ScrapeSection,
    #[serde(default)]
    pub category_prefixes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ApiSection {
    pub url_template: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ScrapeSection {
    pub languages: Option<String>,
    pub max_depth: Option<usize>,
    pub workers: Option<usize>,
    pub blacklist: Option<Vec<String>>,
    pub retry_attempts: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub revision_cutoff: Option<String>,
}

/// Values given on the command line, which win over the config file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub languages: Option<String>,
    pub max_depth: Option<usize>,
}

impl LuppConfig {
    /// Resolve the endpoint template: env LUPP_API_URL_TEMPLATE > config > default.
    pub fn api_url_template(&self) -> String {
        env_override("LUPP_API_URL_TEMPLATE")
            .or_else(|| self.api.url_template.clone())
            .unwrap_or_else(|| DEFAULT_API_URL_TEMPLATE.to_string())
    }

    /// Resolve user agent: env LUPP_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("LUPP_USER_AGENT")
            .or_else(|| self.api.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        env_override_u64("LUPP_HTTP_TIMEOUT_MS")
            .or(self.api.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn rate_limit_ms(&self) -> u64 {
        env_override_u64("LUPP_RATE_LIMIT_READ")
            .or(self.api.rate_limit_ms)
            .unwrap_or(DEFAULT_RATE_LIMIT_MS)
    }

    /// Build validated scrape settings from this config and command-line overrides.
    pub fn settings(&self, overrides: &SettingsOverrides) -> Result<ScrapeSettings> {
        let languages = overrides
            .languages
            .as_deref()
            .or(self.scrape.languages.as_deref())
            .unwrap_or(DEFAULT_LANGUAGES);
        let mut settings = ScrapeSettings::new(split_pipe_list(languages))?;
        if let Some(max_depth) = overrides.max_depth.or(self.scrape.max_depth) {
            settings.max_depth = max_depth;
        }
        if let Some(workers) = self.scrape.workers {
            if workers == 0 {
                bail!("scrape.workers must be at least 1");
            }
            settings.workers = workers;
        }
        if let Some(blacklist) = &self.scrape.blacklist {
            settings.blacklist = normalize_blacklist(blacklist.iter().map(String::as_str));
        }
        if let Some(max_retries) = self.scrape.retry_attempts {
            settings.retry.max_retries = max_retries;
        }
        if let Some(retry_delay_ms) = self.scrape.retry_delay_ms {
            settings.retry.retry_delay_ms = retry_delay_ms;
        }
        if let Some(cutoff) = &self.scrape.revision_cutoff {
            settings.revision_cutoff = cutoff.trim().to_string();
        }
        for (lang, prefix) in &self.category_prefixes {
            settings
                .category_prefixes
                .insert(lang.clone(), prefix.clone());
        }
        Ok(settings)
    }
}

/// Load and parse a LuppConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<LuppConfig> {
    if !config_path.exists() {
        return Ok(LuppConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: LuppConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Resolved, validated parameters of one scrape run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeSettings {
    /// Requested languages; the first is primary, the second secondary.
    pub languages: Vec<String>,
    pub max_depth: usize,
    pub workers: usize,
    /// Lowercased denylist terms matched as substrings.
    pub blacklist: Vec<String>,
    pub retry: RetryPolicy,
    pub revision_cutoff: String,
    pub category_prefixes: BTreeMap<String, String>,
}

impl ScrapeSettings {
    pub fn new(languages: Vec<String>) -> Result<Self> {
        let mut unique = Vec::with_capacity(languages.len());
        for lang in languages {
            let lang = lang.trim().to_string();
            if lang.is_empty() {
                continue;
            }
            if unique.contains(&lang) {
                bail!("language `{lang}` is listed more than once");
            }
            unique.push(lang);
        }
        if unique.len() < 2 {
            bail!("at least two languages are required (primary and secondary), e.g. \"sv|fi\"");
        }
        Ok(Self {
            languages: unique,
            max_depth: DEFAULT_MAX_DEPTH,
            workers: DEFAULT_WORKERS,
            blacklist: normalize_blacklist(DEFAULT_BLACKLIST),
            retry: RetryPolicy::default(),
            revision_cutoff: DEFAULT_REVISION_CUTOFF.to_string(),
            category_prefixes: BUILTIN_CATEGORY_PREFIXES
                .iter()
                .map(|(lang, prefix)| ((*lang).to_string(), (*prefix).to_string()))
                .collect(),
        })
    }

    /// Empty when `languages` was emptied after construction.
    pub fn primary_lang(&self) -> &str {
        self.languages.first().map(String::as_str).unwrap_or_default()
    }

    pub fn secondary_lang(&self) -> &str {
        self.languages.get(1).map(String::as_str).unwrap_or_default()
    }

    pub fn category_prefix(&self, lang: &str) -> &str {
        self.category_prefixes
            .get(lang)
            .map(String::as_str)
            .unwrap_or(FALLBACK_CATEGORY_PREFIX)
    }

    /// Prefix a bare category name with the namespace of `lang`, unless it already has one.
    pub fn category_title(&self, lang: &str, name: &str) -> String {
        let name = name.trim();
        let known = self
            .category_prefixes
            .values()
            .map(String::as_str)
            .chain([FALLBACK_CATEGORY_PREFIX]);
        for prefix in known {
            if name.starts_with(prefix) {
                return name.to_string();
            }
        }
        format!("{}{name}", self.category_prefix(lang))
    }

    /// The denylist term contained in `title`, if any.
    pub fn blacklist_match(&self, title: &str) -> Option<&str> {
        let lowered = title.to_lowercase();
        self.blacklist
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
    }
}

fn normalize_blacklist<'a>(terms: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    terms
        .into_iter()
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty())
        .collect()
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_override_u64(key: &str) -> Option<u64> {
    env_override(key).and_then(|value| value.parse::<u64>().ok())
}
