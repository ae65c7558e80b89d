//! Page-by-page feeds.
//!
//! A [`FeedCursor`] appends one page at a time from any [`PageSource`]. At
//! most one fetch runs at once; a request made while another is in flight is
//! turned away instead of racing it and appending the same page twice.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Comment, Id, Page, Post};
use crate::repo::{CommentRepo, PostRepo, RepoResult, SavedPostRepo};

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FeedSort {
    /// Pinned first, then newest. Recency stands in for a hotness score.
    #[default]
    Hot,
    New,
    Top,
}

impl FeedSort {
    /// Ordering used by in-memory stores; ties fall back to the newer id.
    pub fn compare(self, a: &Post, b: &Post) -> CmpOrdering {
        let newest = b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id));
        match self {
            FeedSort::Hot => b.is_pinned.cmp(&a.is_pinned).then(newest),
            FeedSort::New => newest,
            FeedSort::Top => (b.upvotes - b.downvotes).cmp(&(a.upvotes - a.downvotes)).then(newest),
        }
    }

    /// The same ordering as an SQL `ORDER BY` list over `posts`.
    pub fn order_by(self) -> &'static str {
        match self {
            FeedSort::Hot => "is_pinned DESC, created_at DESC, id DESC",
            FeedSort::New => "created_at DESC, id DESC",
            FeedSort::Top => "(upvotes - downvotes) DESC, created_at DESC, id DESC",
        }
    }
}

/// Which posts a feed shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQuery {
    pub community_id: Option<Id>,
    pub author_id: Option<Id>,
    #[serde(default)]
    pub sort: FeedSort,
}

impl FeedQuery {
    pub fn community(community_id: Id, sort: FeedSort) -> Self {
        Self { community_id: Some(community_id), author_id: None, sort }
    }

    pub fn author(author_id: Id) -> Self {
        Self { community_id: None, author_id: Some(author_id), sort: FeedSort::New }
    }

    pub fn matches(&self, post: &Post) -> bool {
        self.community_id.map_or(true, |c| post.community_id == c) && self.author_id.map_or(true, |u| post.user_id == u)
    }
}

/// Row offset of a zero-based page.
pub fn page_offset(page: usize, page_size: usize) -> usize {
    page.saturating_mul(page_size)
}

#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, page: usize, page_size: usize) -> RepoResult<Vec<T>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded { appended: usize, has_more: bool },
    /// Another fetch is still running; nothing was requested.
    Busy,
    /// The last page was short; there is nothing further to fetch.
    Exhausted,
}

struct CursorState<T> {
    items: Vec<T>,
    next_page: usize,
    has_more: bool,
}

// Clears the in-flight flag even when the fetching future is dropped midway.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct FeedCursor<T, S> {
    source: S,
    page_size: usize,
    state: Mutex<CursorState<T>>,
    in_flight: AtomicBool,
}

impl<T, S> FeedCursor<T, S>
where
    T: Clone + Send,
    S: PageSource<T>,
{
    pub fn new(source: S, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            state: Mutex::new(CursorState { items: Vec::new(), next_page: 0, has_more: true }),
            in_flight: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CursorState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_flight(&self) -> Option<FlightGuard<'_>> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(FlightGuard(&self.in_flight))
        }
    }

    /// Fetch the next page and append it.
    ///
    /// A failed fetch leaves the items and the page index untouched, so the
    /// same page is requested again next time.
    pub async fn load_more(&self) -> RepoResult<LoadStatus> {
        let Some(_flight) = self.take_flight() else {
            return Ok(LoadStatus::Busy);
        };
        let page_index = {
            let state = self.lock();
            if !state.has_more {
                return Ok(LoadStatus::Exhausted);
            }
            state.next_page
        };
        let fetched = self.source.fetch_page(page_index, self.page_size).await?;
        let page = Page::from_items(fetched, self.page_size);
        let appended = page.items.len();

        let mut state = self.lock();
        state.items.extend(page.items);
        state.next_page = page_index + 1;
        state.has_more = page.has_more;
        Ok(LoadStatus::Loaded { appended, has_more: page.has_more })
    }

    /// Drop everything accumulated and fetch page 0 again.
    pub async fn reset(&self) -> RepoResult<LoadStatus> {
        let Some(_flight) = self.take_flight() else {
            return Ok(LoadStatus::Busy);
        };
        let fetched = self.source.fetch_page(0, self.page_size).await?;
        let page = Page::from_items(fetched, self.page_size);
        let appended = page.items.len();

        let mut state = self.lock();
        state.items = page.items;
        state.next_page = 1;
        state.has_more = page.has_more;
        Ok(LoadStatus::Loaded { appended, has_more: page.has_more })
    }

    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Posts matching a [`FeedQuery`].
pub struct PostFeed<R: ?Sized> {
    repo: Arc<R>,
    query: FeedQuery,
}

impl<R: ?Sized> PostFeed<R> {
    pub fn new(repo: Arc<R>, query: FeedQuery) -> Self {
        Self { repo, query }
    }
}

#[async_trait]
impl<R: PostRepo + ?Sized> PageSource<Post> for PostFeed<R> {
    async fn fetch_page(&self, page: usize, page_size: usize) -> RepoResult<Vec<Post>> {
        self.repo.list_posts(&self.query, page_offset(page, page_size), page_size).await
    }
}

/// A user's bookmarked posts, most recently saved first.
pub struct SavedFeed<R: ?Sized> {
    repo: Arc<R>,
    user_id: Id,
}

impl<R: ?Sized> SavedFeed<R> {
    pub fn new(repo: Arc<R>, user_id: Id) -> Self {
        Self { repo, user_id }
    }
}

#[async_trait]
impl<R: SavedPostRepo + ?Sized> PageSource<Post> for SavedFeed<R> {
    async fn fetch_page(&self, page: usize, page_size: usize) -> RepoResult<Vec<Post>> {
        self.repo.list_saved(self.user_id, page_offset(page, page_size), page_size).await
    }
}

/// A post's comments in arrival order. Rebuild the tree from the accumulated items.
pub struct CommentFeed<R: ?Sized> {
    repo: Arc<R>,
    post_id: Id,
}

impl<R: ?Sized> CommentFeed<R> {
    pub fn new(repo: Arc<R>, post_id: Id) -> Self {
        Self { repo, post_id }
    }
}

#[async_trait]
impl<R: CommentRepo + ?Sized> PageSource<Comment> for CommentFeed<R> {
    async fn fetch_page(&self, page: usize, page_size: usize) -> RepoResult<Vec<Comment>> {
        self.repo.list_comments_page(self.post_id, page_offset(page, page_size), page_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct Numbers {
        total: u32,
        calls: AtomicUsize,
    }

    impl Numbers {
        fn new(total: u32) -> Self {
            Self { total, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl PageSource<u32> for Numbers {
        async fn fetch_page(&self, page: usize, page_size: usize) -> RepoResult<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = page_offset(page, page_size) as u32;
            let end = (start + page_size as u32).min(self.total);
            Ok((start..end.max(start)).collect())
        }
    }

    #[tokio::test]
    async fn short_page_ends_the_feed() {
        let cursor = FeedCursor::new(Numbers::new(25), 10);
        assert_eq!(cursor.load_more().await.unwrap(), LoadStatus::Loaded { appended: 10, has_more: true });
        assert_eq!(cursor.load_more().await.unwrap(), LoadStatus::Loaded { appended: 10, has_more: true });
        assert_eq!(cursor.load_more().await.unwrap(), LoadStatus::Loaded { appended: 5, has_more: false });
        assert_eq!(cursor.load_more().await.unwrap(), LoadStatus::Exhausted);
        assert_eq!(cursor.items(), (0..25).collect::<Vec<_>>());
        assert_eq!(cursor.source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_empty_page() {
        let cursor = FeedCursor::new(Numbers::new(20), 10);
        cursor.load_more().await.unwrap();
        cursor.load_more().await.unwrap();
        assert!(cursor.has_more());
        assert_eq!(cursor.load_more().await.unwrap(), LoadStatus::Loaded { appended: 0, has_more: false });
        assert_eq!(cursor.len(), 20);
    }

    #[tokio::test]
    async fn reset_returns_the_same_first_page() {
        let cursor = FeedCursor::new(Numbers::new(15), 10);
        cursor.load_more().await.unwrap();
        let first = cursor.items();
        cursor.load_more().await.unwrap();
        assert_eq!(cursor.len(), 15);
        cursor.reset().await.unwrap();
        assert_eq!(cursor.items(), first);
        assert!(cursor.has_more());
        cursor.load_more().await.unwrap();
        assert_eq!(cursor.len(), 15);
    }

    struct Gated {
        gate: Notify,
    }

    #[async_trait]
    impl PageSource<u32> for Gated {
        async fn fetch_page(&self, page: usize, page_size: usize) -> RepoResult<Vec<u32>> {
            self.gate.notified().await;
            Ok(vec![page as u32; page_size])
        }
    }

    #[tokio::test]
    async fn second_request_while_in_flight_is_ignored() {
        let cursor = FeedCursor::new(Gated { gate: Notify::new() }, 2);
        let first = cursor.load_more();
        let second = async {
            tokio::task::yield_now().await;
            let status = cursor.load_more().await;
            cursor.source.gate.notify_one();
            status
        };
        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap(), LoadStatus::Loaded { appended: 2, has_more: true });
        assert_eq!(b.unwrap(), LoadStatus::Busy);
        assert_eq!(cursor.items(), vec![0, 0]);
        assert!(!cursor.is_loading());
    }

    #[tokio::test]
    async fn dropped_fetch_releases_the_cursor() {
        let cursor = FeedCursor::new(Gated { gate: Notify::new() }, 2);
        {
            let fut = cursor.load_more();
            tokio::pin!(fut);
            let _ = futures_poll_once(fut.as_mut()).await;
            assert!(cursor.is_loading());
        }
        assert!(!cursor.is_loading());
        cursor.source.gate.notify_one();
        assert!(matches!(cursor.load_more().await.unwrap(), LoadStatus::Loaded { .. }));
    }

    async fn futures_poll_once<F: std::future::Future + Unpin>(fut: F) -> Option<F::Output> {
        let mut fut = fut;
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut fut).poll(cx) {
                std::task::Poll::Ready(v) => Some(v),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }

    struct FailFirst {
        failed: AtomicBool,
    }

    #[async_trait]
    impl PageSource<u32> for FailFirst {
        async fn fetch_page(&self, page: usize, _page_size: usize) -> RepoResult<Vec<u32>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(RepoError::Unavailable("timeout".into()));
            }
            Ok(vec![page as u32])
        }
    }

    #[tokio::test]
    async fn failed_fetch_does_not_advance() {
        let cursor = FeedCursor::new(FailFirst { failed: AtomicBool::new(false) }, 1);
        assert!(cursor.load_more().await.is_err());
        assert!(cursor.is_empty());
        assert!(!cursor.is_loading());
        cursor.load_more().await.unwrap();
        assert_eq!(cursor.items(), vec![0]);
    }

    #[test]
    fn sorts_match_feed_rules() {
        use chrono::{Duration, TimeZone, Utc};
        use crate::models::PostType;
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let post = |id: Id, age_h: i64, up: i64, down: i64, pinned: bool| Post {
            id,
            community_id: 1,
            user_id: 1,
            title: format!("p{id}"),
            content: None,
            post_type: PostType::Discussion,
            link_url: None,
            upvotes: up,
            downvotes: down,
            comment_count: 0,
            is_pinned: pinned,
            created_at: t0 - Duration::hours(age_h),
        };
        let posts = vec![post(1, 5, 10, 0, false), post(2, 1, 0, 3, false), post(3, 9, 2, 0, true)];
        let order = |sort: FeedSort| {
            let mut v = posts.clone();
            v.sort_by(|a, b| sort.compare(a, b));
            v.iter().map(|p| p.id).collect::<Vec<_>>()
        };
        assert_eq!(order(FeedSort::Hot), vec![3, 2, 1]);
        assert_eq!(order(FeedSort::New), vec![2, 1, 3]);
        assert_eq!(order(FeedSort::Top), vec![1, 3, 2]);
    }
}
