use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedgen::follows::{Follow, FollowsPage, GraphError};
use feedgen::ingest::{OpAction, RepoOp};
use feedgen::{CommitEvent, GraphClient, Service, Settings};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const FEED: &str = "at://did:web:localhost/app.bsky.feed.generator/personal-feed";

/// Follows exactly one account.
struct SingleFollow;

#[async_trait]
impl GraphClient for SingleFollow {
    async fn login(&self) -> Result<(), GraphError> {
        Ok(())
    }

    async fn follows_count(&self, _actor: &str) -> Result<Option<u64>, GraphError> {
        Ok(Some(1))
    }

    async fn get_follows(
        &self,
        _actor: &str,
        _limit: u8,
        _cursor: Option<&str>,
    ) -> Result<FollowsPage, GraphError> {
        Ok(FollowsPage {
            follows: vec![Follow {
                did: "did:plc:friend".into(),
                handle: Some("friend.test".into()),
            }],
            cursor: None,
        })
    }

    async fn get_posts(&self, uris: &[String]) -> Result<Vec<Value>, GraphError> {
        Ok(uris
            .iter()
            .map(|uri| serde_json::json!({ "uri": uri, "record": { "text": "hello" } }))
            .collect())
    }
}

fn settings(dir: &TempDir) -> Settings {
    let db_path = dir.path().join("feed.sqlite3");
    let db_path = db_path.to_string_lossy().into_owned();
    Settings::from_lookup(move |key: &str| {
        let value = match key {
            "FEEDGEN_HOSTNAME" => "localhost",
            "FEEDGEN_HANDLE" => "me.test",
            "FEEDGEN_PASSWORD" => "app-password",
            "FEEDGEN_SERVICE_DID" => "did:web:localhost",
            "FEEDGEN_DB_PATH" => db_path.as_str(),
            "FEEDGEN_FOLLOWS_REFRESH_SECS" => "3600",
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap()
}

fn post_commit(seq: i64, repo: &str) -> CommitEvent {
    CommitEvent {
        seq,
        repo: repo.to_string(),
        ops: vec![RepoOp {
            action: OpAction::Create,
            path: format!("app.bsky.feed.post/{seq}"),
            cid: Some(format!("bafy{seq}")),
            record: None,
        }],
    }
}

#[tokio::test]
async fn serves_ingested_posts_over_http() {
    let dir = TempDir::new().unwrap();
    let shutdown = CancellationToken::new();
    let service = Service::start_with_client(settings(&dir), Arc::new(SingleFollow), shutdown.clone())
        .await
        .unwrap();

    assert!(service.followed().contains("did:plc:friend"));
    assert_eq!(service.resume_cursor(), None);

    let commits = service.commit_sender();
    commits.send(post_commit(1, "did:plc:friend")).await.unwrap();
    commits.send(post_commit(2, "did:plc:stranger")).await.unwrap();
    commits.send(post_commit(3, "did:plc:friend")).await.unwrap();

    let mut stored = 0;
    for _ in 0..100 {
        stored = service.database().count_posts().await.unwrap();
        if stored == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stored, 2);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let service = Arc::new(service);
    let server = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.serve(listener).await }
    });

    let http = reqwest::Client::new();

    let described: Value = http
        .get(format!("{base}/xrpc/app.bsky.feed.describeFeedGenerator"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(described["did"], "did:web:localhost");
    assert_eq!(described["feeds"][0]["uri"], FEED);

    let response = http
        .get(format!("{base}/xrpc/app.bsky.feed.getFeedSkeleton"))
        .header("Origin", "http://localhost:5173")
        .query(&[("feed", FEED), ("limit", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["feed"].as_array().unwrap().len(), 1);
    assert!(page["cursor"].is_string());

    let detailed: Value = http
        .get(format!("{base}/get-feed-with-details"))
        .query(&[("feed", FEED)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let posts = detailed["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().any(|post| post["uri"] == page["feed"][0]["post"]));
    assert_eq!(posts[0]["record"]["text"], "hello");

    let unknown = http
        .get(format!("{base}/xrpc/app.bsky.feed.getFeedSkeleton"))
        .query(&[("feed", "at://did:web:localhost/app.bsky.feed.generator/nope")])
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::BAD_REQUEST);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();

    let service = Arc::try_unwrap(service).ok().expect("service still shared");
    service.stop().await.unwrap();
}

#[tokio::test]
async fn restart_resumes_from_stored_checkpoint() {
    let dir = TempDir::new().unwrap();

    let shutdown = CancellationToken::new();
    let service = Service::start_with_client(settings(&dir), Arc::new(SingleFollow), shutdown.clone())
        .await
        .unwrap();
    service.database().set_cursor("wss://bsky.network", 42).await.unwrap();
    service.stop().await.unwrap();

    let service = Service::start_with_client(settings(&dir), Arc::new(SingleFollow), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(service.resume_cursor(), Some(42));
    service.stop().await.unwrap();
}
