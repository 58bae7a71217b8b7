//! Feed algorithms and the registry that publishes them.
//!
//! Every algorithm returns a feed *skeleton*: post URIs plus an opaque cursor.
//! Clients hydrate the posts from the app view themselves.

pub mod cursor;
pub mod personal_feed;
pub mod registry;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::Database;

pub use personal_feed::PersonalFeed;
pub use registry::AlgorithmRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonItem {
    pub post: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSkeleton {
    pub feed: Vec<SkeletonItem>,
    /// Absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[async_trait]
pub trait FeedAlgorithm: Send + Sync {
    /// Internal short name, `snake_case`. The published record name is the same
    /// with dashes.
    fn name(&self) -> &str;

    async fn query(&self, db: &Database, cursor: Option<&str>, limit: usize) -> Result<FeedSkeleton>;
}

/// Every algorithm compiled into this binary.
pub fn builtin() -> Vec<Arc<dyn FeedAlgorithm>> {
    vec![Arc::new(PersonalFeed)]
}
