//! Service layer: the collaborators the run pipeline talks to.
//!
//! - Record producers (`Fetcher`): `SimpleSiteFetcher`, `RegistryFetcher`
//! - Change notification (`Notifier`): `WebhookNotifier`, `LogNotifier`

mod notifier;
mod registry;
mod simple;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Config, Record};

pub use notifier::{LogNotifier, Notifier, WebhookNotifier, notifier_from_config};
pub use registry::RegistryFetcher;
pub use simple::SimpleSiteFetcher;

/// Produces the records of one logical source.
///
/// Individual records that cannot be extracted are logged and left out; the
/// call as a whole fails only when the source itself is unreachable.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Source name, the first component of every produced key.
    fn source(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<Record>>;
}

/// Build one fetcher per configured source, simple pages first.
pub fn fetchers_from_config(config: &Config, client: &reqwest::Client) -> Vec<Box<dyn Fetcher>> {
    let mut fetchers: Vec<Box<dyn Fetcher>> = Vec::new();

    for url in &config.simple_urls {
        fetchers.push(Box::new(SimpleSiteFetcher::new(url, client.clone())));
    }
    for registry in config.enabled_registries() {
        fetchers.push(Box::new(RegistryFetcher::new(
            registry.clone(),
            &config.http,
            client.clone(),
        )));
    }

    fetchers
}
