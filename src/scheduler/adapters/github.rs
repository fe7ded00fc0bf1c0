//! GitHub REST adapter for commit discovery and article publishing.

use super::{HttpClientError, insert_header, join_url};
use crate::scheduler::{
    domain::{CommitAuthor, CommitRecord, CommitSha, RepositoryRef},
    ports::{PutFileRequest, SourceControlClient, SourceControlError, SourceControlResult},
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Public GitHub API root.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Connection settings for [`GitHubSourceControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubConfig {
    /// Personal access or OAuth token.
    pub token: String,
    /// API root, overridable for GitHub Enterprise.
    pub api_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Commits requested per page.
    pub per_page: u8,
    /// Pages walked per listing before giving up on finding `since`.
    pub max_pages: u32,
}

impl GitHubConfig {
    /// Creates a configuration for the public API.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: DEFAULT_GITHUB_API_URL.to_owned(),
            timeout: Duration::from_secs(30),
            per_page: 100,
            max_pages: 10,
        }
    }

    /// Sets the API root.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Non-success HTTP answer from the API.
#[derive(Debug, Error)]
#[error("GitHub answered {status}: {body}")]
pub struct GitHubStatusError {
    /// Response status.
    pub status: StatusCode,
    /// Response body, as returned.
    pub body: String,
}

/// Which kind of call produced a status, for error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Listing, head lookup, or file metadata read.
    Read,
    /// File create or update.
    Publish,
}

/// Maps a non-success status to a [`SourceControlError`].
#[must_use]
pub fn classify(kind: CallKind, path: &str, error: GitHubStatusError) -> SourceControlError {
    let status = error.status;
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return SourceControlError::auth(error.to_string());
    }
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return SourceControlError::transient(error);
    }
    match kind {
        CallKind::Publish
            if matches!(
                status,
                StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
            ) =>
        {
            SourceControlError::Conflict {
                path: path.to_owned(),
            }
        }
        CallKind::Publish => SourceControlError::publish(error),
        CallKind::Read => SourceControlError::InvalidResponse(error.to_string()),
    }
}

/// Source-control adapter backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubSourceControl {
    client: Client,
    config: GitHubConfig,
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    author: Option<GitActor>,
    committer: Option<GitActor>,
}

#[derive(Debug, Deserialize)]
struct GitActor {
    name: Option<String>,
    email: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutFileResponse {
    content: ShaOnly,
}

#[derive(Debug, Serialize)]
struct PutFileBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

impl CommitItem {
    fn into_record(self) -> SourceControlResult<CommitRecord> {
        let sha = CommitSha::new(self.sha)
            .map_err(|err| SourceControlError::InvalidResponse(err.to_string()))?;
        let CommitDetail {
            message,
            author,
            committer,
        } = self.commit;
        let committed_at = author
            .as_ref()
            .and_then(|actor| actor.date)
            .or_else(|| committer.as_ref().and_then(|actor| actor.date))
            .ok_or_else(|| {
                SourceControlError::InvalidResponse(format!("commit {sha} has no date"))
            })?;
        let commit_author = author.map_or_else(
            || CommitAuthor::named("unknown"),
            |actor| {
                let named = CommitAuthor::named(actor.name.unwrap_or_else(|| "unknown".to_owned()));
                match actor.email {
                    Some(email) => named.with_email(email),
                    None => named,
                }
            },
        );
        Ok(CommitRecord::new(sha, message, commit_author, committed_at))
    }
}

async fn send(request: RequestBuilder) -> SourceControlResult<Response> {
    request.send().await.map_err(SourceControlError::transient)
}

fn decode_error(err: &reqwest::Error) -> SourceControlError {
    SourceControlError::InvalidResponse(err.to_string())
}

async fn status_error(response: Response) -> GitHubStatusError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    GitHubStatusError { status, body }
}

impl GitHubSourceControl {
    /// Builds the adapter and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError`] when the token is not a valid header value
    /// or the client cannot be built.
    pub fn new(config: GitHubConfig) -> Result<Self, HttpClientError> {
        let mut headers = HeaderMap::new();
        insert_header(
            &mut headers,
            "authorization",
            &format!("Bearer {}", config.token),
            true,
        )?;
        insert_header(&mut headers, "accept", "application/vnd.github+json", false)?;
        insert_header(&mut headers, "x-github-api-version", "2022-11-28", false)?;
        insert_header(
            &mut headers,
            "user-agent",
            concat!("chronicler/", env!("CARGO_PKG_VERSION")),
            false,
        )?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn repo_url(&self, repository: &RepositoryRef, suffix: &str) -> String {
        join_url(
            &self.config.api_url,
            &format!(
                "repos/{}/{}/{suffix}",
                repository.owner(),
                repository.name()
            ),
        )
    }

    async fn list_page(
        &self,
        repository: &RepositoryRef,
        page: u32,
    ) -> SourceControlResult<Option<Vec<CommitItem>>> {
        let request = self.client.get(self.repo_url(repository, "commits")).query(&[
            ("sha", repository.branch().to_owned()),
            ("per_page", self.config.per_page.to_string()),
            ("page", page.to_string()),
        ]);
        let response = send(request).await?;
        // An empty repository answers 409.
        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error = status_error(response).await;
            return Err(classify(CallKind::Read, "commits", error));
        }
        let items = response
            .json::<Vec<CommitItem>>()
            .await
            .map_err(|err| decode_error(&err))?;
        Ok(Some(items))
    }
}

/// Appends the commits of one newest-first page that lie above `since`.
///
/// Returns `true` once `since` is reached. Entries that cannot be decoded
/// are skipped with a warning so the rest of the history stays reachable.
fn collect_page(
    repository: &RepositoryRef,
    items: Vec<CommitItem>,
    since: Option<&CommitSha>,
    newest_first: &mut Vec<CommitRecord>,
) -> bool {
    for item in items {
        if since.is_some_and(|marker| marker.as_str() == item.sha.to_ascii_lowercase()) {
            return true;
        }
        match item.into_record() {
            Ok(record) => newest_first.push(record),
            Err(err) => warn!(
                repository = %repository,
                error = %err,
                "skipping commit that could not be decoded"
            ),
        }
    }
    false
}

#[async_trait]
impl SourceControlClient for GitHubSourceControl {
    async fn head(&self, repository: &RepositoryRef) -> SourceControlResult<Option<CommitSha>> {
        let url = self.repo_url(repository, &format!("commits/{}", repository.branch()));
        let response = send(self.client.get(url)).await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error = status_error(response).await;
            return Err(classify(CallKind::Read, "head", error));
        }
        let head = response
            .json::<ShaOnly>()
            .await
            .map_err(|err| decode_error(&err))?;
        CommitSha::new(head.sha)
            .map(Some)
            .map_err(|err| SourceControlError::InvalidResponse(err.to_string()))
    }

    async fn list_commits_since(
        &self,
        repository: &RepositoryRef,
        since: Option<&CommitSha>,
    ) -> SourceControlResult<Vec<CommitRecord>> {
        let page_size = usize::from(self.config.per_page);
        let mut newest_first = Vec::new();
        let mut reached_since = since.is_none();

        for page in 1..=self.config.max_pages {
            let Some(items) = self.list_page(repository, page).await? else {
                break;
            };
            let item_count = items.len();
            if collect_page(repository, items, since, &mut newest_first) {
                reached_since = true;
                break;
            }
            if item_count < page_size {
                break;
            }
        }

        if !reached_since {
            warn!(
                repository = %repository,
                since = ?since,
                listed = newest_first.len(),
                "marker not found in recent history; listing is truncated"
            );
        }
        debug!(repository = %repository, listed = newest_first.len(), "commits listed");
        newest_first.reverse();
        Ok(newest_first)
    }

    async fn file_hash(
        &self,
        repository: &RepositoryRef,
        path: &str,
    ) -> SourceControlResult<Option<String>> {
        let request = self
            .client
            .get(self.repo_url(repository, &format!("contents/{path}")))
            .query(&[("ref", repository.branch())]);
        let response = send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error = status_error(response).await;
            return Err(classify(CallKind::Read, path, error));
        }
        let file = response
            .json::<ShaOnly>()
            .await
            .map_err(|err| decode_error(&err))?;
        Ok(Some(file.sha))
    }

    async fn put_file(
        &self,
        repository: &RepositoryRef,
        request: PutFileRequest,
    ) -> SourceControlResult<String> {
        let body = PutFileBody {
            message: &request.message,
            content: BASE64_STANDARD.encode(request.content.as_bytes()),
            branch: repository.branch(),
            sha: request.existing_hash.as_deref(),
        };
        let http_request = self
            .client
            .put(self.repo_url(repository, &format!("contents/{}", request.path)))
            .json(&body);
        let response = send(http_request).await?;
        if !response.status().is_success() {
            let error = status_error(response).await;
            return Err(classify(CallKind::Publish, &request.path, error));
        }
        let written = response
            .json::<PutFileResponse>()
            .await
            .map_err(|err| decode_error(&err))?;
        Ok(written.content.sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn status(code: StatusCode) -> GitHubStatusError {
        GitHubStatusError {
            status: code,
            body: "{}".to_owned(),
        }
    }

    #[rstest]
    #[case(CallKind::Read, StatusCode::UNAUTHORIZED)]
    #[case(CallKind::Publish, StatusCode::FORBIDDEN)]
    fn credential_failures_are_auth(#[case] kind: CallKind, #[case] code: StatusCode) {
        assert!(classify(kind, "posts/a.md", status(code)).is_auth());
    }

    #[rstest]
    #[case(StatusCode::REQUEST_TIMEOUT)]
    #[case(StatusCode::TOO_MANY_REQUESTS)]
    #[case(StatusCode::BAD_GATEWAY)]
    #[case(StatusCode::SERVICE_UNAVAILABLE)]
    fn retryable_statuses_are_transient(#[case] code: StatusCode) {
        let error = classify(CallKind::Read, "commits", status(code));
        assert!(matches!(error, SourceControlError::TransientNetwork(_)));
    }

    #[rstest]
    #[case(StatusCode::CONFLICT)]
    #[case(StatusCode::UNPROCESSABLE_ENTITY)]
    fn stale_hash_on_publish_is_conflict(#[case] code: StatusCode) {
        let error = classify(CallKind::Publish, "posts/a.md", status(code));
        assert!(matches!(
            error,
            SourceControlError::Conflict { ref path } if path == "posts/a.md"
        ));
    }

    #[rstest]
    fn other_publish_rejections_are_publish_errors() {
        let error = classify(CallKind::Publish, "posts/a.md", status(StatusCode::NOT_FOUND));
        assert!(matches!(error, SourceControlError::Publish(_)));
    }

    #[rstest]
    fn other_read_rejections_are_invalid_responses() {
        let error = classify(CallKind::Read, "commits", status(StatusCode::NOT_FOUND));
        assert!(matches!(error, SourceControlError::InvalidResponse(_)));
    }

    #[rstest]
    fn commit_items_decode_into_records() {
        let payload = r#"{
            "sha": "ABCDEF1234567890",
            "commit": {
                "message": "feat: add feeds\n\nbody",
                "author": {"name": "Ada", "email": "ada@example.com", "date": "2024-05-01T10:00:00Z"},
                "committer": null
            }
        }"#;
        let item = serde_json::from_str::<CommitItem>(payload).expect("commit item decodes");
        let record = item.into_record().expect("record converts");

        assert_eq!(record.sha().as_str(), "abcdef1234567890");
        assert_eq!(record.author().name, "Ada");
        assert_eq!(record.author().email.as_deref(), Some("ada@example.com"));
        assert_eq!(record.message(), "feat: add feeds\n\nbody");
    }

    #[rstest]
    fn commit_items_without_dates_are_rejected() {
        let payload = r#"{"sha": "abc123", "commit": {"message": "x", "author": null, "committer": null}}"#;
        let item = serde_json::from_str::<CommitItem>(payload).expect("commit item decodes");
        assert!(matches!(
            item.into_record(),
            Err(SourceControlError::InvalidResponse(_))
        ));
    }

    fn page(payload: &str) -> Vec<CommitItem> {
        serde_json::from_str::<Vec<CommitItem>>(payload).expect("page decodes")
    }

    #[rstest]
    fn undated_commits_are_skipped_without_failing_the_listing() {
        let repository = RepositoryRef::parse("acme/widgets").expect("valid repository");
        let items = page(
            r#"[
                {"sha": "c3", "commit": {"message": "newest", "author": {"name": "Ada", "email": null, "date": "2024-05-01T12:00:00Z"}, "committer": null}},
                {"sha": "c2", "commit": {"message": "undated", "author": null, "committer": null}},
                {"sha": "c1", "commit": {"message": "marker", "author": null, "committer": null}}
            ]"#,
        );
        let since = CommitSha::new("c1").expect("valid sha");
        let mut newest_first = Vec::new();

        let reached = collect_page(&repository, items, Some(&since), &mut newest_first);

        assert!(reached);
        assert_eq!(
            newest_first
                .iter()
                .map(|record| record.sha().as_str())
                .collect::<Vec<_>>(),
            vec!["c3"]
        );
    }

    #[rstest]
    fn pages_without_the_marker_keep_listing() {
        let repository = RepositoryRef::parse("acme/widgets").expect("valid repository");
        let items = page(
            r#"[{"sha": "c2", "commit": {"message": "only", "author": null, "committer": {"name": "Bot", "email": null, "date": "2024-05-01T12:00:00Z"}}}]"#,
        );
        let mut newest_first = Vec::new();

        assert!(!collect_page(&repository, items, None, &mut newest_first));
        assert_eq!(newest_first.len(), 1);
    }

    #[rstest]
    fn publish_body_omits_missing_hash() {
        let body = PutFileBody {
            message: "Add article: feeds",
            content: BASE64_STANDARD.encode("hello"),
            branch: "main",
            sha: None,
        };
        let value = serde_json::to_value(&body).expect("body serializes");
        assert_eq!(
            value.get("content").and_then(serde_json::Value::as_str),
            Some("aGVsbG8=")
        );
        assert!(value.get("sha").is_none());
    }
}
