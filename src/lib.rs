//! Feed generator for a Bluesky account's follows.
//!
//! A background loop keeps the set of accounts the operator follows fresh;
//! commits from the firehose are filtered against that set and stored; the
//! stored posts are served back as paginated feed skeletons.

pub mod algos;
pub mod db;
pub mod follows;
pub mod ingest;
pub mod server;
pub mod service;
pub mod settings;
pub mod utils;

pub use algos::{AlgorithmRegistry, FeedAlgorithm, FeedSkeleton, SkeletonItem};
pub use db::{Database, Post, SubscriptionState};
pub use follows::{FollowedSet, FollowsSynchronizer, GraphClient};
pub use ingest::{CommitEvent, CommitHandler};
pub use service::Service;
pub use settings::Settings;
