// src/services/registry.rs

//! Paginated registry fetcher.
//!
//! Walks the listing pages of each configured category, collects detail
//! links, then fetches every detail page with bounded concurrency. Listing
//! failures fail the whole source (a partial listing would read as mass
//! removal); detail failures only drop the affected record.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{HttpConfig, Record, RecordContent, RecordIdStrategy, RegistryConfig};
use crate::services::Fetcher;
use crate::utils::{clean_href, digest, http, resolve_url, url_label};

/// Category label used when a registry is walked without a filter.
const UNFILTERED: &str = "all";

/// What one listing page yielded.
#[derive(Debug, Default, PartialEq, Eq)]
struct ListingPage {
    links: Vec<String>,
    has_next: bool,
    category_label: Option<String>,
}

/// A category to walk: its filter id and, once known, its label.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Category {
    id: Option<String>,
    label: Option<String>,
}

/// Title and body pulled from a detail page.
#[derive(Debug, PartialEq, Eq)]
struct Detail {
    title: Option<String>,
    body: String,
}

/// Fetcher for one `[[registries]]` entry.
pub struct RegistryFetcher {
    config: RegistryConfig,
    client: Client,
    delay: Duration,
    concurrency: usize,
}

impl RegistryFetcher {
    pub fn new(config: RegistryConfig, http: &HttpConfig, client: Client) -> Self {
        Self {
            config,
            client,
            delay: http.request_delay(),
            concurrency: http.max_concurrent.max(1),
        }
    }

    /// Categories to walk: configured ids, ids resolved from configured
    /// labels, or the unfiltered listing.
    ///
    /// Every configured label must be offered by the registry; a missing one
    /// would otherwise read as the removal of all its records.
    async fn categories(&self) -> Result<Vec<Category>> {
        if !self.config.category_ids.is_empty() {
            return Ok(self
                .config
                .category_ids
                .iter()
                .map(|id| Category {
                    id: Some(id.clone()),
                    label: None,
                })
                .collect());
        }
        if self.config.category_labels.is_empty() {
            return Ok(vec![Category {
                id: None,
                label: None,
            }]);
        }

        let base = self.config.base_url.as_deref().unwrap_or_default();
        let html = http::fetch_text(&self.client, base)
            .await
            .map_err(|e| AppError::fetch(&self.config.name, format!("category page {base}: {e}")))?;
        let categories = match_categories(&self.config, &html)?;

        let missing: Vec<&str> = self
            .config
            .category_labels
            .iter()
            .filter(|wanted| !categories.iter().any(|c| c.label.as_ref() == Some(*wanted)))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(AppError::fetch(
                &self.config.name,
                format!("categories not offered: {}", missing.join(", ")),
            ));
        }
        Ok(categories)
    }

    /// Walk every listing page of one category.
    ///
    /// Returns the category label and the de-duplicated detail links in
    /// listing order.
    async fn collect_links(&self, category: &Category) -> Result<(String, Vec<String>)> {
        let category_id = category.id.as_deref().unwrap_or_default();
        let mut label = category.label.clone();
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        let mut page = self.config.first_page;

        for _ in 0..self.config.max_pages {
            let page_url = self.config.list_page_url(category_id, page);
            log::debug!("[{}] listing {}", self.config.name, page_url);

            let html = http::fetch_text(&self.client, &page_url)
                .await
                .map_err(|e| AppError::fetch(&self.config.name, format!("listing {page_url}: {e}")))?;
            let listing = parse_listing(&self.config, &html, &page_url, category_id, page)?;

            if label.is_none() {
                label = listing.category_label;
            }

            let before = links.len();
            for link in listing.links {
                if seen.insert(link.clone()) {
                    links.push(link);
                }
            }

            if links.len() == before || !listing.has_next {
                break;
            }
            page += 1;

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        let label = label
            .or_else(|| category.id.clone())
            .unwrap_or_else(|| UNFILTERED.to_string());
        log::info!(
            "[{}] category '{}': {} detail links",
            self.config.name,
            label,
            links.len()
        );
        Ok((label, links))
    }

    /// Fetch one detail page. `Ok(None)` means the record was deliberately dropped.
    async fn fetch_detail(&self, category: &str, link: String) -> Result<Option<Record>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let html = http::fetch_text(&self.client, &link).await?;
        let detail = extract_detail(&self.config, &html)?;
        Ok(build_record(&self.config, category, link, detail))
    }
}

#[async_trait]
impl Fetcher for RegistryFetcher {
    fn source(&self) -> &str {
        &self.config.name
    }

    async fn fetch(&self) -> Result<Vec<Record>> {
        let mut jobs = Vec::new();
        for category in self.categories().await? {
            let (label, links) = self.collect_links(&category).await?;
            jobs.extend(links.into_iter().map(|link| (label.clone(), link)));
        }

        let detail_total = jobs.len();
        let mut failures = 0usize;
        let mut records = Vec::with_capacity(detail_total);

        let mut details = stream::iter(jobs)
            .map(|(label, link)| async move {
                let result = self.fetch_detail(&label, link.clone()).await;
                (link, result)
            })
            .buffered(self.concurrency);

        while let Some((link, result)) = details.next().await {
            match result {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(error) => {
                    failures += 1;
                    log::warn!("[{}] failed to fetch {}: {}", self.config.name, link, error);
                }
            }
        }

        log::info!(
            "[{}] {} records from {} detail pages ({} failed)",
            self.config.name,
            records.len(),
            detail_total,
            failures
        );
        Ok(records)
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Options of the category `<select>` whose text is a configured label, in page order.
fn match_categories(config: &RegistryConfig, html: &str) -> Result<Vec<Category>> {
    let Some(raw) = &config.category_option_selector else {
        return Ok(Vec::new());
    };
    let document = Html::parse_document(html);
    let sel = parse_selector(raw)?;

    let categories = document
        .select(&sel)
        .filter_map(|option| {
            let id = option.value().attr("value")?.trim();
            let label = element_text(option);
            (!id.is_empty() && config.category_labels.contains(&label)).then(|| Category {
                id: Some(id.to_string()),
                label: Some(label),
            })
        })
        .collect();
    Ok(categories)
}

/// Extract detail links, the next-page marker and the category label.
fn parse_listing(
    config: &RegistryConfig,
    html: &str,
    page_url: &str,
    category: &str,
    page: u32,
) -> Result<ListingPage> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url)?;

    let link_sel = parse_selector(&config.link_selector)?;
    let links = document
        .select(&link_sel)
        .filter_map(|a| a.value().attr("href"))
        .map(clean_href)
        .filter(|href| !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:"))
        .map(|href| resolve_url(&base, &href))
        .collect();

    let has_next = match &config.next_selector {
        Some(raw) => {
            let sel = parse_selector(&raw.replace("{next}", &(page + 1).to_string()))?;
            document.select(&sel).next().is_some()
        }
        None => true,
    };

    let category_label = match &config.category_label_selector {
        Some(raw) if !category.is_empty() => {
            let sel = parse_selector(&raw.replace("{category}", category))?;
            document
                .select(&sel)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty())
        }
        _ => None,
    };

    Ok(ListingPage {
        links,
        has_next,
        category_label,
    })
}

/// Pull title and body out of a detail page.
fn extract_detail(config: &RegistryConfig, html: &str) -> Result<Detail> {
    let document = Html::parse_document(html);

    let title = match &config.title_selector {
        Some(raw) => {
            let sel = parse_selector(raw)?;
            document
                .select(&sel)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty())
        }
        None => None,
    };

    let body = match &config.body_selector {
        Some(raw) => {
            let sel = parse_selector(raw)?;
            document
                .select(&sel)
                .next()
                .map(|e| e.inner_html())
                .unwrap_or_default()
        }
        None => html.to_string(),
    };

    Ok(Detail { title, body })
}

/// Record id for a detail page according to the registry's strategy.
fn derive_record_id(strategy: RecordIdStrategy, link: &str, title: Option<&str>) -> Option<String> {
    match strategy {
        RecordIdStrategy::Title => title.map(str::to_string),
        RecordIdStrategy::LinkQuery => link
            .rsplit_once('=')
            .map(|(_, id)| id.trim().to_string())
            .filter(|id| !id.is_empty()),
        RecordIdStrategy::LinkPath => Some(url_label(link)),
    }
}

/// Stable fallback id for records whose title could not be extracted.
fn untitled_id(link: &str) -> String {
    format!("untitled-{}", &digest(link.as_bytes())[..12])
}

fn build_record(config: &RegistryConfig, category: &str, link: String, detail: Detail) -> Option<Record> {
    let record_id = match derive_record_id(config.record_id, &link, detail.title.as_deref()) {
        Some(id) => id,
        None if config.keep_untitled => {
            let id = untitled_id(&link);
            log::warn!("[{}] no title for {}, stored as {}", config.name, link, id);
            id
        }
        None => {
            log::warn!("[{}] no title for {}, record dropped", config.name, link);
            return None;
        }
    };

    let mut content = RecordContent::new(category, link).with_body(detail.body);
    if let Some(title) = detail.title {
        content = content.with_title(title);
    }
    Some(Record::new(&config.name, &record_id, content))
}
