use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::subscription_state::write_cursor;
use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, to_i64, to_u64},
    models::Post,
};

fn row_to_post(row: &Row) -> Result<Post> {
    let indexed_at: String = row.get("indexed_at")?;

    Ok(Post {
        uri: row.get("uri")?,
        cid: row.get("cid")?,
        reply_parent: row.get("reply_parent")?,
        reply_root: row.get("reply_root")?,
        indexed_at: parse_datetime(&indexed_at, "indexed_at")?,
    })
}

/// Returns whether a row was written; a `uri` that is already stored is skipped.
fn insert_post(conn: &Connection, post: &Post) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO posts (uri, cid, reply_parent, reply_root, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(uri) DO NOTHING",
        params![
            post.uri,
            post.cid,
            post.reply_parent,
            post.reply_root,
            format_timestamp(&post.indexed_at),
        ],
    )?;
    Ok(inserted > 0)
}

fn insert_all(conn: &Connection, posts: &[Post]) -> Result<usize> {
    let mut inserted = 0;
    for post in posts {
        if insert_post(conn, post).with_context(|| format!("failed to insert post {}", post.uri))? {
            inserted += 1;
        }
    }
    Ok(inserted)
}

impl Database {
    pub async fn upsert_post(&self, post: &Post) -> Result<bool> {
        let record = post.clone();
        self.execute(move |conn| {
            insert_post(conn, &record).with_context(|| format!("failed to insert post {}", record.uri))
        })
        .await
    }

    /// Persists `posts` and then advances the checkpoint for `service`, in one
    /// transaction. A crash before commit loses both, so a resumed stream never
    /// skips past a post that was not written.
    pub async fn record_commit(&self, posts: &[Post], service: &str, cursor: i64) -> Result<usize> {
        let records = posts.to_vec();
        let service = service.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let inserted = insert_all(&tx, &records)?;
            write_cursor(&tx, &service, cursor)
                .with_context(|| format!("failed to checkpoint {service}"))?;

            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Persists `posts` in one transaction without touching any checkpoint.
    pub async fn insert_posts(&self, posts: &[Post]) -> Result<usize> {
        let records = posts.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let inserted = insert_all(&tx, &records)?;
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Newest-first page of posts, optionally restricted to those indexed
    /// strictly before `before`.
    pub async fn list_posts_before(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let limit = to_i64(limit)?;
        let before = before.as_ref().map(format_timestamp);
        self.read(move |conn| {
            let mut posts = Vec::new();

            match before {
                Some(before) => {
                    let mut stmt = conn.prepare(
                        "SELECT uri, cid, reply_parent, reply_root, indexed_at
                         FROM posts
                         WHERE indexed_at < ?1
                         ORDER BY indexed_at DESC
                         LIMIT ?2",
                    )?;
                    let mut rows = stmt.query(params![before, limit])?;
                    while let Some(row) = rows.next()? {
                        posts.push(row_to_post(row)?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT uri, cid, reply_parent, reply_root, indexed_at
                         FROM posts
                         ORDER BY indexed_at DESC
                         LIMIT ?1",
                    )?;
                    let mut rows = stmt.query(params![limit])?;
                    while let Some(row) = rows.next()? {
                        posts.push(row_to_post(row)?);
                    }
                }
            }

            Ok(posts)
        })
        .await
    }

    pub async fn count_posts(&self) -> Result<u64> {
        self.read(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
            to_u64(count, "post count")
        })
        .await
    }
}
