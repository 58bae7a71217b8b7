use anyhow::Result;
use async_trait::async_trait;
use log::debug;

use super::cursor::{format_cursor, parse_cursor};
use super::{FeedAlgorithm, FeedSkeleton, SkeletonItem};
use crate::db::Database;

/// Reverse-chronological feed of every stored post, i.e. everything the
/// operator's followed accounts posted since ingestion started.
///
/// Posts sharing an identical `indexed_at` have no secondary sort key, so a
/// page boundary falling between them can skip or repeat one of them.
pub struct PersonalFeed;

#[async_trait]
impl FeedAlgorithm for PersonalFeed {
    fn name(&self) -> &str {
        "personal_feed"
    }

    async fn query(&self, db: &Database, cursor: Option<&str>, limit: usize) -> Result<FeedSkeleton> {
        let before = match cursor.filter(|raw| !raw.is_empty()) {
            Some(raw) => match parse_cursor(raw) {
                Some(at) => Some(at),
                None => {
                    // A malformed cursor is the client's problem: answer with
                    // an empty page rather than an error.
                    debug!("ignoring malformed feed cursor {raw:?}");
                    return Ok(FeedSkeleton::default());
                }
            },
            None => None,
        };

        if limit == 0 {
            return Ok(FeedSkeleton::default());
        }

        let posts = db.list_posts_before(before, limit).await?;
        let cursor = posts.last().map(|post| format_cursor(&post.indexed_at));

        Ok(FeedSkeleton {
            feed: posts
                .into_iter()
                .map(|post| SkeletonItem { post: post.uri })
                .collect(),
            cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Post;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    async fn seeded(dir: &TempDir, count: i64) -> Database {
        let db = Database::new(dir.path().join("feed.sqlite3")).unwrap();
        for i in 0..count {
            let post = Post::new(format!("at://did:plc:a/app.bsky.feed.post/{i}"), format!("cid{i}"))
                .with_indexed_at(base() + Duration::seconds(i));
            db.upsert_post(&post).await.unwrap();
        }
        db
    }

    fn uris(skeleton: &FeedSkeleton) -> Vec<&str> {
        skeleton.feed.iter().map(|item| item.post.as_str()).collect()
    }

    #[tokio::test]
    async fn pages_walk_backwards_in_time() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir, 4).await;

        let first = PersonalFeed.query(&db, None, 2).await.unwrap();
        assert_eq!(
            uris(&first),
            vec!["at://did:plc:a/app.bsky.feed.post/3", "at://did:plc:a/app.bsky.feed.post/2"]
        );
        assert_eq!(first.cursor.as_deref(), Some("2024-06-01T08:00:02.000000Z"));

        let second = PersonalFeed.query(&db, first.cursor.as_deref(), 2).await.unwrap();
        assert_eq!(
            uris(&second),
            vec!["at://did:plc:a/app.bsky.feed.post/1", "at://did:plc:a/app.bsky.feed.post/0"]
        );
        assert_eq!(second.cursor.as_deref(), Some("2024-06-01T08:00:00.000000Z"));

        let end = PersonalFeed.query(&db, second.cursor.as_deref(), 2).await.unwrap();
        assert!(end.feed.is_empty());
        assert_eq!(end.cursor, None);
    }

    #[tokio::test]
    async fn malformed_cursor_yields_empty_page() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir, 2).await;

        let page = PersonalFeed.query(&db, Some("not-a-date"), 20).await.unwrap();
        assert_eq!(page, FeedSkeleton::default());
    }

    #[tokio::test]
    async fn empty_cursor_means_first_page() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir, 2).await;

        let page = PersonalFeed.query(&db, Some(""), 20).await.unwrap();
        assert_eq!(page.feed.len(), 2);
    }

    #[tokio::test]
    async fn zero_limit_is_empty() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir, 2).await;

        let page = PersonalFeed.query(&db, None, 0).await.unwrap();
        assert!(page.feed.is_empty());
        assert_eq!(page.cursor, None);
    }

    #[tokio::test]
    async fn repeated_query_is_stable() {
        let dir = TempDir::new().unwrap();
        let db = seeded(&dir, 5).await;

        let a = PersonalFeed.query(&db, None, 3).await.unwrap();
        let b = PersonalFeed.query(&db, None, 3).await.unwrap();
        assert_eq!(a, b);
    }
}
