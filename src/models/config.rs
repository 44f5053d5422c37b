//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::{sanitize_label, url_label};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Accepted/candidate storage locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// HTTP and fetch timing settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Change notification sink
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Plain pages, stored whole as one record each
    #[serde(default)]
    pub simple_urls: Vec<String>,

    /// Paginated registry listings
    #[serde(default = "defaults::registries")]
    pub registries: Vec<RegistryConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Recognised: `SIMPLE_URLS` (comma separated), `SLACK_WEBHOOK_URL`, and the
    /// base URL / category id pairs of the preset registries.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(urls) = non_empty("SIMPLE_URLS") {
            self.simple_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(webhook) = non_empty("SLACK_WEBHOOK_URL") {
            self.notify.webhook_url = Some(webhook);
        }

        for (name, url_var, category_var) in defaults::REGISTRY_ENV {
            let Some(registry) = self.registries.iter_mut().find(|r| r.name == name) else {
                continue;
            };
            if let Some(url) = non_empty(url_var) {
                registry.base_url = Some(url.trim_end_matches('/').to_string());
            }
            if let Some(category) = category_var.and_then(|var| non_empty(var)) {
                registry.category_ids = vec![category.trim().to_string()];
            }
        }
    }

    /// Registries with enough configuration to run.
    pub fn enabled_registries(&self) -> impl Iterator<Item = &RegistryConfig> {
        self.registries.iter().filter(|r| r.is_enabled())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.fetch_timeout_secs == 0 {
            return Err(AppError::validation("http.fetch_timeout_secs must be > 0"));
        }
        if self.http.max_concurrent == 0 {
            return Err(AppError::validation("http.max_concurrent must be > 0"));
        }
        if self.paths.accepted_dir.as_os_str().is_empty()
            || self.paths.candidate_dir.as_os_str().is_empty()
        {
            return Err(AppError::validation("paths must not be empty"));
        }
        if self.paths.accepted_dir == self.paths.candidate_dir {
            return Err(AppError::validation(
                "paths.accepted_dir and paths.candidate_dir must differ",
            ));
        }
        for url in &self.simple_urls {
            url::Url::parse(url)
                .map_err(|e| AppError::validation(format!("simple url {url}: {e}")))?;
        }

        let mut names = HashSet::new();
        for registry in &self.registries {
            if registry.name.trim().is_empty() {
                return Err(AppError::validation("registry name is empty"));
            }
            if !names.insert(registry.name.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate registry name '{}'",
                    registry.name
                )));
            }
            registry.validate()?;
        }

        // Sources sharing a storage name would overwrite each other's state.
        let mut sources = HashSet::new();
        let source_names = self
            .simple_urls
            .iter()
            .map(|url| url_label(url))
            .chain(self.enabled_registries().map(|r| sanitize_label(&r.name)));
        for source in source_names {
            if !sources.insert(source.clone()) {
                return Err(AppError::validation(format!(
                    "two sources share the storage name '{source}'"
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            http: HttpConfig::default(),
            notify: NotifyConfig::default(),
            simple_urls: Vec::new(),
            registries: defaults::registries(),
        }
    }
}

/// Storage roots for the two snapshot slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Authoritative state, persisted between runs
    #[serde(default = "defaults::accepted_dir")]
    pub accepted_dir: PathBuf,

    /// Staging area, only populated while a run is active
    #[serde(default = "defaults::candidate_dir")]
    pub candidate_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            accepted_dir: defaults::accepted_dir(),
            candidate_dir: defaults::candidate_dir(),
        }
    }
}

/// HTTP client and fetch timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request (page load) timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Upper bound for fetching one whole source
    #[serde(default = "defaults::fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Delay between listing page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum concurrent detail page requests within one source
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl HttpConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            fetch_timeout_secs: defaults::fetch_timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Notification sink settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Incoming-webhook endpoint; changes are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// How a registry derives the record id of a detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordIdStrategy {
    /// Text of `title_selector` on the detail page
    #[default]
    Title,
    /// Value after the last `=` of the detail link
    LinkQuery,
    /// The whole detail link, flattened
    LinkPath,
}

/// A paginated registry listing and how to read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Source name; first component of every record key
    pub name: String,

    /// Registry endpoint; the registry is skipped while unset
    #[serde(default)]
    pub base_url: Option<String>,

    /// Category/filter ids to walk; empty walks the unfiltered listing once
    #[serde(default)]
    pub category_ids: Vec<String>,

    /// Category labels to walk when no ids are given; resolved on the base page
    #[serde(default)]
    pub category_labels: Vec<String>,

    /// `<option>` elements on the base page that map category ids to labels
    #[serde(default)]
    pub category_option_selector: Option<String>,

    /// Skip the registry unless a category id is configured
    #[serde(default)]
    pub category_required: bool,

    /// Listing URL with `{base}`, `{category}` and `{page}` placeholders
    pub list_url: String,

    /// Number of the first listing page
    #[serde(default = "defaults::first_page")]
    pub first_page: u32,

    /// Hard limit on listing pages per category
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    /// Anchors pointing at detail pages
    pub link_selector: String,

    /// Element that must exist for another page to be requested (`{next}` = next page number)
    #[serde(default)]
    pub next_selector: Option<String>,

    /// Element whose text names the category (`{category}` = category id)
    #[serde(default)]
    pub category_label_selector: Option<String>,

    /// Title element on the detail page
    #[serde(default)]
    pub title_selector: Option<String>,

    /// Body element on the detail page; whole document when unset
    #[serde(default)]
    pub body_selector: Option<String>,

    #[serde(default)]
    pub record_id: RecordIdStrategy,

    /// Keep records without a title under a synthetic id instead of dropping them
    #[serde(default = "defaults::keep_untitled")]
    pub keep_untitled: bool,
}

impl RegistryConfig {
    /// Whether enough is configured to fetch this registry.
    pub fn is_enabled(&self) -> bool {
        let has_base = self
            .base_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        has_base && (!self.category_required || !self.category_ids.is_empty())
    }

    /// Listing page URL for a category and page number.
    pub fn list_page_url(&self, category: &str, page: u32) -> String {
        self.list_url
            .replace("{base}", self.base_url.as_deref().unwrap_or_default())
            .replace("{category}", category)
            .replace("{page}", &page.to_string())
    }

    fn validate(&self) -> Result<()> {
        if !self.list_url.contains("{page}") {
            return Err(AppError::validation(format!(
                "registry '{}': list_url must contain {{page}}",
                self.name
            )));
        }
        if self.max_pages == 0 {
            return Err(AppError::validation(format!(
                "registry '{}': max_pages must be > 0",
                self.name
            )));
        }
        if !self.category_labels.is_empty() && self.category_option_selector.is_none() {
            return Err(AppError::validation(format!(
                "registry '{}': category_labels need a category_option_selector",
                self.name
            )));
        }
        if self.record_id == RecordIdStrategy::Title && self.title_selector.is_none() {
            return Err(AppError::validation(format!(
                "registry '{}': record_id = \"title\" needs a title_selector",
                self.name
            )));
        }

        let selectors = [
            Some(&self.link_selector),
            self.next_selector.as_ref(),
            self.category_label_selector.as_ref(),
            self.category_option_selector.as_ref(),
            self.title_selector.as_ref(),
            self.body_selector.as_ref(),
        ];
        for raw in selectors.into_iter().flatten() {
            let filled = raw.replace("{next}", "2").replace("{category}", "0");
            Selector::parse(&filled).map_err(|e| AppError::selector(raw, format!("{e:?}")))?;
        }
        Ok(())
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::{RecordIdStrategy, RegistryConfig};

    /// `(registry, base url variable, category id variable)`
    pub const REGISTRY_ENV: [(&str, &str, Option<&str>); 3] = [
        ("fma", "FMA_URL", None),
        (
            "bafin_company",
            "BAFIN_DB_COMPANY",
            Some("BAFIN_DB_COMPANY_CATEGORY_ID"),
        ),
        (
            "bafin_institution",
            "BAFIN_INSTITUTION",
            Some("BAFIN_INSTITUTION_CATEGORY_ID"),
        ),
    ];

    /// FMA register categories that are watched.
    pub const FMA_CATEGORIES: [&str; 3] = [
        "Banks - Banks licensed in Austria",
        "Payment institutions - Account information service provider (AISP)",
        "Payment institutions - Payment initiation service provider (PISP)",
    ];

    // Path defaults
    pub fn accepted_dir() -> PathBuf {
        PathBuf::from("uploads/current_state")
    }
    pub fn candidate_dir() -> PathBuf {
        PathBuf::from("uploads/candidate_state")
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; regwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        120
    }
    pub fn fetch_timeout() -> u64 {
        900
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn max_concurrent() -> usize {
        2
    }

    // Registry defaults
    pub fn first_page() -> u32 {
        1
    }
    pub fn max_pages() -> u32 {
        200
    }
    pub fn keep_untitled() -> bool {
        true
    }

    pub fn registries() -> Vec<RegistryConfig> {
        vec![
            RegistryConfig {
                name: "fma".into(),
                base_url: None,
                category_ids: Vec::new(),
                category_labels: FMA_CATEGORIES.iter().map(|c| c.to_string()).collect(),
                category_option_selector: Some("#category option".into()),
                category_required: false,
                list_url: "{base}?cname=&place=&bic=&category={category}&per_page=10&submitted=1&to={page}".into(),
                first_page: first_page(),
                max_pages: max_pages(),
                link_selector: ".print-view-button-wrap a".into(),
                next_selector: Some("li.copy.next a:not(.disabled)".into()),
                category_label_selector: Some("#category option[value=\"{category}\"]".into()),
                title_selector: Some("title".into()),
                body_selector: None,
                record_id: RecordIdStrategy::Title,
                keep_untitled: keep_untitled(),
            },
            RegistryConfig {
                name: "bafin_company".into(),
                base_url: None,
                category_ids: Vec::new(),
                category_labels: Vec::new(),
                category_option_selector: None,
                category_required: true,
                list_url: "{base}/sucheForm.do?institutName=&institutId=&institutBakNr=&institutRegNr=&kategorieId={category}&sucheButtonInstitut=Suche&locale=en_GB&d-4012550-p={page}".into(),
                first_page: first_page(),
                max_pages: max_pages(),
                link_selector: "tbody tr a".into(),
                next_selector: Some("span.pagelinks a".into()),
                category_label_selector: Some(
                    "#institutKategorie option[value=\"{category}\"]".into(),
                ),
                title_selector: Some("#wrapperContent #content p strong".into()),
                body_selector: Some("#wrapperContent #content".into()),
                record_id: RecordIdStrategy::Title,
                keep_untitled: keep_untitled(),
            },
            RegistryConfig {
                name: "bafin_institution".into(),
                base_url: None,
                category_ids: Vec::new(),
                category_labels: Vec::new(),
                category_option_selector: None,
                category_required: true,
                list_url: "{base}/suche.do?filterObjektart={category}&d-16544-p={page}".into(),
                first_page: first_page(),
                max_pages: max_pages(),
                link_selector: "tbody tr a".into(),
                next_selector: Some("a[title=\"zum Abschnitt {next}\"]".into()),
                category_label_selector: Some(
                    "#filterObjektart option[value=\"{category}\"]".into(),
                ),
                title_selector: None,
                body_selector: Some("body".into()),
                record_id: RecordIdStrategy::LinkQuery,
                keep_untitled: keep_untitled(),
            },
        ]
    }
}
