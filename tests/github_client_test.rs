//! GitHub client against a mock server.

use chrono::Duration;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;

use stagehand::domain::errors::DomainError;
use stagehand::domain::models::{
    CommitStatus, GitHubConfig, Head, HeadKind, RateLimitConfig, Repository, StatusState,
};
use stagehand::domain::ports::CodeHost;
use stagehand::infrastructure::github::{GitHubClient, ResponseCache};

fn client(server: &Server) -> (GitHubClient, Arc<ResponseCache>) {
    let config = GitHubConfig {
        api_url: server.url(),
        token: Some("t0ken".to_string()),
        ..GitHubConfig::default()
    };
    let rate_limit = RateLimitConfig {
        requests_per_second: 100,
        burst_size: 100,
    };
    let cache = Arc::new(ResponseCache::in_memory(Duration::hours(1)));
    (GitHubClient::new(&config, &rate_limit, cache.clone()), cache)
}

fn repository() -> Repository {
    Repository::new("owner", "repo")
}

fn path(prefix: &str) -> Matcher {
    Matcher::Regex(format!("^{}", regex::escape(prefix)))
}

#[tokio::test]
async fn test_whoami_sends_token() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/user")
        .match_header("authorization", "Bearer t0ken")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"login": "stagehand-bot"}"#)
        .create_async()
        .await;
    let (client, _) = client(&server);

    assert_eq!(client.whoami().await.unwrap(), "stagehand-bot");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_conditional_get_reuses_cached_body() {
    let mut server = Server::new_async().await;
    let fresh = server
        .mock("GET", "/user")
        .match_header("if-none-match", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("etag", "\"abc\"")
        .with_body(r#"{"login": "stagehand-bot"}"#)
        .expect(1)
        .create_async()
        .await;
    let unchanged = server
        .mock("GET", "/user")
        .match_header("if-none-match", "\"abc\"")
        .with_status(304)
        .expect(1)
        .create_async()
        .await;
    let (client, cache) = client(&server);

    assert_eq!(client.whoami().await.unwrap(), "stagehand-bot");
    assert_eq!(cache.len(), 1);
    assert_eq!(client.whoami().await.unwrap(), "stagehand-bot");

    fresh.assert_async().await;
    unchanged.assert_async().await;
}

#[tokio::test]
async fn test_lists_follow_next_links() {
    let mut server = Server::new_async().await;
    let next = format!("<{}/page2/collaborators>; rel=\"next\"", server.url());
    server
        .mock("GET", path("/repos/owner/repo/collaborators"))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("link", &next)
        .with_body(r#"[{"login": "alice"}]"#)
        .create_async()
        .await;
    server
        .mock("GET", "/page2/collaborators")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"login": "bob"}]"#)
        .create_async()
        .await;
    let (client, _) = client(&server);

    let collaborators = client.list_collaborators(&repository()).await.unwrap();
    assert_eq!(collaborators, vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_errors_are_classified() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/owner/gone")
        .with_status(404)
        .with_body(r#"{"message": "Not Found"}"#)
        .create_async()
        .await;
    server
        .mock("GET", path("/repos/owner/private/collaborators"))
        .with_status(403)
        .with_body(r#"{"message": "Must have push access"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/repos/owner/repo/statuses/cafed0d0")
        .with_status(422)
        .with_body(r#"{"message": "This SHA and context has reached the maximum number of statuses."}"#)
        .create_async()
        .await;
    let (client, _) = client(&server);

    let err = client
        .default_branch(&Repository::new("owner", "gone"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = client
        .list_collaborators(&Repository::new("owner", "private"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::UnauthorizedRepository(_)));

    let status = CommitStatus::new("units", StatusState::Pending).with_description("Queued");
    let err = client
        .push_status(&repository(), "cafed0d0", &status)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::UpstreamQuotaExceeded(_)));
}

#[tokio::test]
async fn test_report_issue_returns_issue_number() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/repos/owner/repo/issues")
        .match_body(Matcher::PartialJson(json!({
            "title": "master is broken",
            "body": "Commit cafed0d is broken on master",
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"number": 12, "title": "master is broken"}"#)
        .create_async()
        .await;
    let (client, _) = client(&server);

    let issue = client
        .report_issue(&repository(), "master is broken", "Commit cafed0d is broken on master")
        .await
        .unwrap();

    assert_eq!(issue, 12);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_push_status_returns_stored_status() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/repos/owner/repo/statuses/cafed0d0")
        .match_body(Matcher::PartialJson(json!({
            "context": "units",
            "state": "pending",
            "description": "Queued",
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "context": "units",
                "state": "pending",
                "description": "Queued",
                "target_url": null,
                "updated_at": "2016-08-03T09:00:00Z",
            })
            .to_string(),
        )
        .create_async()
        .await;
    let (client, _) = client(&server);

    let status = CommitStatus::new("units", StatusState::Pending).with_description("Queued");
    let stored = client.push_status(&repository(), "cafed0d0", &status).await.unwrap();

    mock.assert_async().await;
    assert!(stored.same_as(&status));
    assert!(stored.updated_at.is_some());
}

#[tokio::test]
async fn test_list_heads_includes_branches_and_pull_requests() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/owner/repo")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"default_branch": "master", "html_url": "https://github.com/owner/repo"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/repos/owner/repo/branches/master")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"name": "master", "commit": {"sha": "aaaa1111"}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/repos/owner/repo/branches/stable")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", path("/repos/owner/repo/pulls"))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!([{
                "number": 7,
                "html_url": "https://github.com/owner/repo/pull/7",
                "body": "Fix things",
                "user": {"login": "alice"},
                "updated_at": "2016-08-03T09:00:00Z",
                "head": {"ref": "feature", "sha": "bbbb2222"},
            }])
            .to_string(),
        )
        .create_async()
        .await;
    let (client, _) = client(&server);

    let heads = client
        .list_heads(&repository(), &["master".to_string(), "stable".to_string()])
        .await
        .unwrap();

    assert_eq!(heads.len(), 2);
    assert_eq!(heads[0].ref_name, "master");
    assert_eq!(heads[0].url, "https://github.com/owner/repo/tree/master");
    assert_eq!(heads[1].kind, HeadKind::PullRequest { number: 7 });
    assert_eq!(heads[1].sha, "bbbb2222");
}

#[tokio::test]
async fn test_pull_request_comments_start_with_description() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/owner/repo/pulls/7")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "number": 7,
                "html_url": "https://github.com/owner/repo/pull/7",
                "body": "jenkins: skip",
                "user": {"login": "alice"},
                "updated_at": "2016-08-03T09:00:00Z",
                "head": {"ref": "feature", "sha": "bbbb2222"},
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", path("/repos/owner/repo/issues/7/comments"))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!([{
                "user": {"login": "bob"},
                "body": "jenkins: rebuild",
                "updated_at": "2016-08-04T09:00:00Z",
            }])
            .to_string(),
        )
        .create_async()
        .await;
    let (client, _) = client(&server);
    let head = Head::pull_request(
        repository(),
        7,
        "feature",
        "bbbb2222",
        "https://github.com/owner/repo/pull/7",
    );

    let comments = client.fetch_comments(&head).await.unwrap();

    let authors: Vec<&str> = comments.iter().map(|c| c.author.as_str()).collect();
    assert_eq!(authors, vec!["alice", "bob"]);
    assert_eq!(comments[0].body, "jenkins: skip");
}

#[tokio::test]
async fn test_save_hook_subscribes_to_events() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("POST", "/repos/owner/repo/hooks")
        .match_body(Matcher::PartialJson(json!({
            "name": "web",
            "active": true,
            "events": ["commit_comment", "issue_comment", "pull_request", "push"],
            "config": {"url": "https://bot.test/github-webhook", "content_type": "json", "secret": "s3cret"},
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 1}"#)
        .create_async()
        .await;
    let update = server
        .mock("PATCH", "/repos/owner/repo/hooks/42")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 42}"#)
        .create_async()
        .await;
    let (client, _) = client(&server);

    client
        .save_hook(&repository(), None, "https://bot.test/github-webhook", Some("s3cret"))
        .await
        .unwrap();
    client
        .save_hook(&repository(), Some(42), "https://bot.test/github-webhook", None)
        .await
        .unwrap();

    create.assert_async().await;
    update.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_reads_core_quota() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/rate_limit")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"resources": {"core": {"limit": 5000, "remaining": 4321, "reset": 1470214800}}}"#)
        .create_async()
        .await;
    let (client, _) = client(&server);

    let rate = client.rate_limit().await.unwrap();
    assert_eq!(rate.limit, 5000);
    assert_eq!(rate.remaining, 4321);
    assert_eq!(rate.reset_at.timestamp(), 1_470_214_800);
}
