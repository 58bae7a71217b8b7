//! Commit ingestion: filters the firehose down to posts by followed accounts.
//!
//! Decoding the firehose itself happens upstream; this module only sees
//! [`CommitEvent`]s.

pub mod controller;
pub mod event;
pub mod handler;
pub mod loop_worker;

pub use controller::{IngestController, DEFAULT_QUEUE_CAPACITY};
pub use event::{CommitEvent, OpAction, PostRecord, ReplyRef, RepoOp, StrongRef, POST_COLLECTION};
pub use handler::{CommitHandler, DEFAULT_CHECKPOINT_EVERY};
pub use loop_worker::ingest_loop;
