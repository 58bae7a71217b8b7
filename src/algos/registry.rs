use std::{collections::BTreeMap, sync::Arc};

use anyhow::{bail, Result};
use log::{info, warn};

use super::{builtin, FeedAlgorithm};

pub const FEED_GENERATOR_COLLECTION: &str = "app.bsky.feed.generator";

/// The app view rejects feed generator record names longer than this.
const MAX_RECORD_NAME_LEN: usize = 15;

/// Maps published feed URIs to the algorithm serving them. Built once at
/// startup and read-only afterwards.
pub struct AlgorithmRegistry {
    service_did: String,
    algos: BTreeMap<String, Arc<dyn FeedAlgorithm>>,
}

impl AlgorithmRegistry {
    /// Registers every candidate under
    /// `at://{service_did}/app.bsky.feed.generator/{record-name}`. A candidate
    /// with an unusable name, or one whose name is already taken, is logged
    /// and skipped without affecting the rest.
    pub fn discover<I>(service_did: &str, candidates: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn FeedAlgorithm>>,
    {
        let mut algos: BTreeMap<String, Arc<dyn FeedAlgorithm>> = BTreeMap::new();

        for algo in candidates {
            let name = algo.name().to_string();
            if let Err(err) = validate_name(&name) {
                warn!("Could not register feed algorithm {name:?}: {err}");
                continue;
            }

            let uri = feed_uri(service_did, &name);
            if algos.contains_key(&uri) {
                warn!("Could not register feed algorithm {name:?}: {uri} is already registered");
                continue;
            }

            info!("Successfully registered feed: {uri}");
            algos.insert(uri, algo);
        }

        Self {
            service_did: service_did.to_string(),
            algos,
        }
    }

    pub fn with_builtin(service_did: &str) -> Self {
        Self::discover(service_did, builtin())
    }

    pub fn service_did(&self) -> &str {
        &self.service_did
    }

    pub fn lookup(&self, feed: &str) -> Option<Arc<dyn FeedAlgorithm>> {
        self.algos.get(feed).cloned()
    }

    /// Published feed URIs in stable (sorted) order.
    pub fn list_feeds(&self) -> Vec<String> {
        self.algos.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.algos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algos.is_empty()
    }
}

/// `personal_feed` -> `personal-feed`
pub fn record_name(name: &str) -> String {
    name.replace('_', "-")
}

pub fn feed_uri(service_did: &str, name: &str) -> String {
    format!(
        "at://{service_did}/{FEED_GENERATOR_COLLECTION}/{}",
        record_name(name)
    )
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name is empty");
    }
    if name.len() > MAX_RECORD_NAME_LEN {
        bail!("name is longer than {MAX_RECORD_NAME_LEN} characters");
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
    {
        bail!("name contains invalid character {bad:?}");
    }
    Ok(())
}
