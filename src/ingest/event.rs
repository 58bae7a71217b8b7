//! Decoded firehose commits, as handed over by the stream consumer.

use serde::{Deserialize, Serialize};

use crate::db::Post;

pub const POST_COLLECTION: &str = "app.bsky.feed.post";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub parent: StrongRef,
    pub root: StrongRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
}

/// One operation inside a repo commit. `path` is `{collection}/{rkey}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoOp {
    pub action: OpAction,
    pub path: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub record: Option<PostRecord>,
}

impl RepoOp {
    pub fn collection(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEvent {
    /// Stream sequence number; doubles as the checkpoint cursor.
    pub seq: i64,
    /// DID of the repo (the author).
    pub repo: String,
    #[serde(default)]
    pub ops: Vec<RepoOp>,
}

impl CommitEvent {
    /// Posts created by this commit. Updates, deletes and other collections
    /// are ignored, as are creates without a CID.
    pub fn created_posts(&self) -> Vec<Post> {
        self.ops
            .iter()
            .filter(|op| op.action == OpAction::Create && op.collection() == POST_COLLECTION)
            .filter_map(|op| {
                let cid = op.cid.as_ref()?;
                let uri = format!("at://{}/{}", self.repo, op.path);
                let reply = op.record.as_ref().and_then(|record| record.reply.as_ref());

                Some(Post::new(uri, cid.clone()).with_reply(
                    reply.map(|r| r.parent.uri.clone()),
                    reply.map(|r| r.root.uri.clone()),
                ))
            })
            .collect()
    }
}
