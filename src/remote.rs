//! Repository traits over the HTTP API.
//!
//! The bearer token decides who acts, so the `user_id` arguments of the
//! traits are ignored here.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::feed::{FeedQuery, FeedSort};
use crate::models::*;
use crate::repo::{PostRepo, RepoError, RepoResult, SavedPostRepo, VoteRepo};
use crate::routes::{PinRequest, SavedStatus, VoteRequest, VoteStatus};

#[derive(Clone)]
pub struct HttpRepo {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct FeedParamsOut {
    community_id: Option<Id>,
    author_id: Option<Id>,
    sort: FeedSort,
    offset: usize,
    limit: usize,
}

#[derive(Serialize)]
struct WindowOut {
    offset: usize,
    limit: usize,
}

pub(crate) fn status_error(status: StatusCode, body: &str) -> RepoError {
    match status {
        StatusCode::CONFLICT => RepoError::Conflict,
        StatusCode::NOT_FOUND => RepoError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepoError::Forbidden,
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS || s == StatusCode::REQUEST_TIMEOUT => {
            RepoError::Unavailable(format!("{s}: {body}"))
        }
        s => RepoError::Internal(format!("unexpected status {s}: {body}")),
    }
}

fn transport(e: reqwest::Error) -> RepoError {
    RepoError::Unavailable(e.to_string())
}

impl HttpRepo {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into(), token: None }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.client.request(method, self.url(path));
        match &self.token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    async fn checked(rb: RequestBuilder) -> RepoResult<Response> {
        let resp = rb.send().await.map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::debug!(%status, %body, "remote call rejected");
        Err(status_error(status, &body))
    }

    async fn json<T: DeserializeOwned>(rb: RequestBuilder) -> RepoResult<T> {
        Self::checked(rb)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RepoError::Internal(format!("bad response body: {e}")))
    }
}

#[async_trait]
impl PostRepo for HttpRepo {
    async fn create_post(&self, _user_id: Id, new: NewPost) -> RepoResult<Post> {
        Self::json(self.request(Method::POST, "/posts").json(&new)).await
    }
    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        Self::json(self.request(Method::GET, &format!("/posts/{id}"))).await
    }
    async fn list_posts(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
        let params = FeedParamsOut {
            community_id: query.community_id,
            author_id: query.author_id,
            sort: query.sort,
            offset,
            limit,
        };
        Self::json(self.request(Method::GET, "/feed").query(&params)).await
    }
    async fn set_pinned(&self, id: Id, pinned: bool) -> RepoResult<Post> {
        Self::json(self.request(Method::PUT, &format!("/posts/{id}/pin")).json(&PinRequest { pinned })).await
    }
    async fn delete_post(&self, id: Id) -> RepoResult<()> {
        Self::checked(self.request(Method::DELETE, &format!("/posts/{id}"))).await?;
        Ok(())
    }
}

#[async_trait]
impl VoteRepo for HttpRepo {
    async fn apply_vote(&self, subject: SubjectRef, _user_id: Id, requested: Polarity) -> RepoResult<VoteOutcome> {
        let path = format!("/votes/{}/{}", subject.kind, subject.id);
        Self::json(self.request(Method::POST, &path).json(&VoteRequest { vote_type: requested })).await
    }
    async fn user_vote(&self, subject: SubjectRef, _user_id: Id) -> RepoResult<Option<Polarity>> {
        let path = format!("/votes/{}/{}", subject.kind, subject.id);
        let status: VoteStatus = Self::json(self.request(Method::GET, &path)).await?;
        Ok(status.vote_type)
    }
}

#[async_trait]
impl SavedPostRepo for HttpRepo {
    // the server absorbs a duplicate save, so this never reports Conflict
    async fn save_post(&self, _user_id: Id, post_id: Id) -> RepoResult<()> {
        Self::checked(self.request(Method::PUT, &format!("/posts/{post_id}/save"))).await?;
        Ok(())
    }
    async fn unsave_post(&self, _user_id: Id, post_id: Id) -> RepoResult<()> {
        Self::checked(self.request(Method::DELETE, &format!("/posts/{post_id}/save"))).await?;
        Ok(())
    }
    async fn is_saved(&self, _user_id: Id, post_id: Id) -> RepoResult<bool> {
        let status: SavedStatus = Self::json(self.request(Method::GET, &format!("/posts/{post_id}/save"))).await?;
        Ok(status.saved)
    }
    async fn list_saved(&self, _user_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
        Self::json(self.request(Method::GET, "/me/saved").query(&WindowOut { offset, limit })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_repo_errors() {
        assert_eq!(status_error(StatusCode::CONFLICT, ""), RepoError::Conflict);
        assert_eq!(status_error(StatusCode::NOT_FOUND, ""), RepoError::NotFound);
        assert_eq!(status_error(StatusCode::FORBIDDEN, "banned"), RepoError::Forbidden);
        assert_eq!(status_error(StatusCode::UNAUTHORIZED, ""), RepoError::Forbidden);
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!status_error(StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn urls_are_rooted_under_api_v1() {
        let repo = HttpRepo::new("http://localhost:8080/");
        assert_eq!(repo.url("/posts/3"), "http://localhost:8080/api/v1/posts/3");
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        // port 9 (discard) is closed on test hosts
        let repo = HttpRepo::new("http://127.0.0.1:9");
        let err = repo.get_post(1).await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
