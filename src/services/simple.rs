// src/services/simple.rs

//! Whole-page fetcher for plain static sites.

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{Record, RecordContent};
use crate::services::Fetcher;
use crate::utils::{http, url_label};

/// Category under which whole pages are stored.
const PAGE_CATEGORY: &str = "page";

/// Stores one page as a single record; the source is named after its URL.
pub struct SimpleSiteFetcher {
    url: String,
    source: String,
    client: Client,
}

impl SimpleSiteFetcher {
    pub fn new(url: &str, client: Client) -> Self {
        Self {
            url: url.trim().to_string(),
            source: url_label(url),
            client,
        }
    }

    fn record(&self, html: String) -> Record {
        let content = RecordContent::new(PAGE_CATEGORY, &self.url).with_body(html);
        Record::new(&self.source, &self.source, content)
    }
}

#[async_trait]
impl Fetcher for SimpleSiteFetcher {
    fn source(&self) -> &str {
        &self.source
    }

    async fn fetch(&self) -> Result<Vec<Record>> {
        let html = http::fetch_text(&self.client, &self.url)
            .await
            .map_err(|e| AppError::fetch(&self.source, e))?;
        Ok(vec![self.record(html)])
    }
}
