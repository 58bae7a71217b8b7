pub mod client;
pub mod controller;
pub mod followed_set;
pub mod loop_worker;

pub use client::{Follow, FollowsPage, GraphClient, GraphError, XrpcClient, XrpcConfig};
pub use controller::FollowsController;
pub use followed_set::FollowedSet;
pub use loop_worker::{follows_loop, FollowsSynchronizer, DEFAULT_REFRESH_INTERVAL};
