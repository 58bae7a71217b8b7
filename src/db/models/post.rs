//! Stored post model.
//!
//! A `Post` is a reference to one matched post from the firehose. Only the
//! skeleton is kept (uri, cid, reply refs); clients hydrate content themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::helpers::truncate_timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub reply_parent: Option<String>,
    pub reply_root: Option<String>,
    /// Sole ordering key for feed pagination.
    pub indexed_at: DateTime<Utc>,
}

impl Post {
    /// A top-level post indexed now.
    pub fn new(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cid: cid.into(),
            reply_parent: None,
            reply_root: None,
            indexed_at: truncate_timestamp(Utc::now()),
        }
    }

    pub fn with_reply(mut self, parent: Option<String>, root: Option<String>) -> Self {
        self.reply_parent = parent;
        self.reply_root = root;
        self
    }

    pub fn with_indexed_at(mut self, at: DateTime<Utc>) -> Self {
        self.indexed_at = truncate_timestamp(at);
        self
    }
}
