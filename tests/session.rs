#![cfg(feature = "inmem-store")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use actix_web::{web::Data, App, HttpServer};
use async_trait::async_trait;
use campus::auth::{create_jwt, Role};
use campus::feed::{FeedQuery, FeedSort, LoadStatus};
use campus::models::*;
use campus::remote::HttpRepo;
use campus::repo::inmem::InMemRepo;
use campus::repo::*;
use campus::session::VoteState;
use campus::{config, AppState, Session};
use serial_test::serial;

/// In-memory store whose post, vote and bookmark calls can be made to fail.
struct FlakyRepo {
    inner: InMemRepo,
    failure: std::sync::Mutex<Option<RepoError>>,
    calls_failed: AtomicBool,
}

impl FlakyRepo {
    fn new(inner: InMemRepo) -> Self {
        Self { inner, failure: std::sync::Mutex::new(None), calls_failed: AtomicBool::new(false) }
    }

    fn fail_with(&self, e: Option<RepoError>) {
        *self.failure.lock().unwrap() = e;
    }

    fn check(&self) -> RepoResult<()> {
        match self.failure.lock().unwrap().clone() {
            Some(e) => {
                self.calls_failed.store(true, Ordering::SeqCst);
                Err(e)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PostRepo for FlakyRepo {
    async fn create_post(&self, user_id: Id, new: NewPost) -> RepoResult<Post> {
        self.check()?;
        self.inner.create_post(user_id, new).await
    }
    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        self.check()?;
        self.inner.get_post(id).await
    }
    async fn list_posts(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
        self.check()?;
        self.inner.list_posts(query, offset, limit).await
    }
    async fn set_pinned(&self, id: Id, pinned: bool) -> RepoResult<Post> {
        self.check()?;
        self.inner.set_pinned(id, pinned).await
    }
    async fn delete_post(&self, id: Id) -> RepoResult<()> {
        self.check()?;
        self.inner.delete_post(id).await
    }
}

#[async_trait]
impl VoteRepo for FlakyRepo {
    async fn apply_vote(&self, subject: SubjectRef, user_id: Id, requested: Polarity) -> RepoResult<VoteOutcome> {
        self.check()?;
        self.inner.apply_vote(subject, user_id, requested).await
    }
    async fn user_vote(&self, subject: SubjectRef, user_id: Id) -> RepoResult<Option<Polarity>> {
        self.check()?;
        self.inner.user_vote(subject, user_id).await
    }
}

#[async_trait]
impl SavedPostRepo for FlakyRepo {
    async fn save_post(&self, user_id: Id, post_id: Id) -> RepoResult<()> {
        self.check()?;
        self.inner.save_post(user_id, post_id).await
    }
    async fn unsave_post(&self, user_id: Id, post_id: Id) -> RepoResult<()> {
        self.check()?;
        self.inner.unsave_post(user_id, post_id).await
    }
    async fn is_saved(&self, user_id: Id, post_id: Id) -> RepoResult<bool> {
        self.check()?;
        self.inner.is_saved(user_id, post_id).await
    }
    async fn list_saved(&self, user_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
        self.check()?;
        self.inner.list_saved(user_id, offset, limit).await
    }
}

async fn seeded(posts: usize) -> (InMemRepo, Id, Vec<Post>) {
    let store = InMemRepo::ephemeral();
    let c = store
        .create_community(1, NewCommunity {
            name: "Physics".into(),
            slug: "physics".into(),
            description: None,
            community_type: CommunityType::StudyHelp,
            is_private: false,
        })
        .await
        .unwrap();
    let mut created = Vec::new();
    for i in 0..posts {
        let p = store
            .create_post(1, NewPost {
                community_id: c.id,
                title: format!("post {i}"),
                content: None,
                post_type: PostType::Question,
                link_url: None,
            })
            .await
            .unwrap();
        created.push(p);
    }
    (store, c.id, created)
}

#[tokio::test]
async fn failed_vote_rolls_back_exactly() {
    let (store, _, posts) = seeded(1).await;
    store.apply_vote(SubjectRef::post(posts[0].id), 50, Polarity::Up).await.unwrap();
    let post = store.get_post(posts[0].id).await.unwrap();
    let remote = Arc::new(FlakyRepo::new(store));
    let session = Session::new(7, Arc::clone(&remote), 10);
    session.track_post(&post, None, false);
    let subject = SubjectRef::post(post.id);
    let before = session.vote_state(subject).unwrap();
    assert_eq!(before.tally, Tally::new(1, 0));

    remote.fail_with(Some(RepoError::Unavailable("connection reset".into())));
    let err = session.vote(subject, Polarity::Down).await.unwrap_err();
    assert!(err.rolled_back);
    assert!(err.notice().retryable);
    assert_eq!(session.vote_state(subject), Some(before));
    assert!(remote.calls_failed.load(Ordering::SeqCst));

    remote.fail_with(None);
    let outcome = session.vote(subject, Polarity::Down).await.unwrap();
    assert_eq!(outcome.tally, Tally::new(1, 1));
    assert_eq!(session.vote_state(subject), Some(VoteState { tally: Tally::new(1, 1), polarity: Some(Polarity::Down) }));

    // same direction again retracts
    let outcome = session.vote(subject, Polarity::Down).await.unwrap();
    assert_eq!(outcome.polarity, None);
    assert_eq!(session.vote_state(subject).unwrap().tally, Tally::new(1, 0));
}

#[tokio::test]
async fn success_reconciles_with_the_server_tally() {
    let (store, _, posts) = seeded(1).await;
    let stale = posts[0].clone();
    // someone else voted after this client fetched the post
    store.apply_vote(SubjectRef::post(stale.id), 51, Polarity::Up).await.unwrap();

    let session = Session::new(7, Arc::new(FlakyRepo::new(store)), 10);
    session.track_post(&stale, None, false);
    let outcome = session.vote(SubjectRef::post(stale.id), Polarity::Up).await.unwrap();
    assert_eq!(outcome.tally, Tally::new(2, 0));
    assert_eq!(session.vote_state(SubjectRef::post(stale.id)).unwrap().tally, Tally::new(2, 0));
}

#[tokio::test]
async fn toggle_save_absorbs_duplicates_and_rolls_back() {
    let (store, _, posts) = seeded(1).await;
    let post_id = posts[0].id;
    // saved from another device; this session still thinks it is unsaved
    store.save_post(7, post_id).await.unwrap();
    let remote = Arc::new(FlakyRepo::new(store));
    let session = Session::new(7, Arc::clone(&remote), 10);
    session.track_post(&posts[0], None, false);

    assert!(session.toggle_save(post_id).await.unwrap());
    assert_eq!(session.is_saved(post_id), Some(true));

    remote.fail_with(Some(RepoError::Unavailable("timeout".into())));
    assert!(session.toggle_save(post_id).await.is_err());
    assert_eq!(session.is_saved(post_id), Some(true));

    remote.fail_with(None);
    assert!(!session.toggle_save(post_id).await.unwrap());
    assert!(!remote.inner.is_saved(7, post_id).await.unwrap());
}

#[tokio::test]
async fn refused_pin_is_undone_and_not_retryable() {
    let (store, _, posts) = seeded(1).await;
    let remote = Arc::new(FlakyRepo::new(store));
    let session = Session::new(7, Arc::clone(&remote), 10);
    session.track_post(&posts[0], None, false);

    remote.fail_with(Some(RepoError::Forbidden));
    let err = session.toggle_pin(posts[0].id).await.unwrap_err();
    assert_eq!(session.is_pinned(posts[0].id), Some(false));
    assert!(!err.notice().retryable);

    remote.fail_with(None);
    let post = session.toggle_pin(posts[0].id).await.unwrap();
    assert!(post.is_pinned);
    assert_eq!(session.is_pinned(posts[0].id), Some(true));
}

#[tokio::test]
async fn deleting_forgets_local_state() {
    let (store, _, posts) = seeded(1).await;
    let session = Session::new(7, Arc::new(FlakyRepo::new(store)), 10);
    session.track_post(&posts[0], None, true);
    session.delete_post(posts[0].id).await.unwrap();
    assert_eq!(session.vote_state(SubjectRef::post(posts[0].id)), None);
    assert_eq!(session.is_saved(posts[0].id), None);
}

#[tokio::test]
async fn session_feed_pages_until_short_page() {
    let (store, community_id, posts) = seeded(12).await;
    let remote = Arc::new(FlakyRepo::new(store));
    let session = Session::new(7, Arc::clone(&remote), 5);
    let feed = session.feed(FeedQuery::community(community_id, FeedSort::New));

    assert_eq!(feed.load_more().await.unwrap(), LoadStatus::Loaded { appended: 5, has_more: true });

    remote.fail_with(Some(RepoError::Unavailable("offline".into())));
    assert!(feed.load_more().await.is_err());
    assert_eq!(feed.len(), 5);
    remote.fail_with(None);

    assert_eq!(feed.load_more().await.unwrap(), LoadStatus::Loaded { appended: 5, has_more: true });
    assert_eq!(feed.load_more().await.unwrap(), LoadStatus::Loaded { appended: 2, has_more: false });
    assert_eq!(feed.load_more().await.unwrap(), LoadStatus::Exhausted);

    let ids: Vec<Id> = feed.items().iter().map(|p| p.id).collect();
    let mut expected: Vec<Id> = posts.iter().map(|p| p.id).collect();
    expected.reverse();
    assert_eq!(ids, expected);
}

#[actix_web::test]
#[serial]
async fn session_over_http() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let (store, community_id, posts) = seeded(3).await;
    let state = AppState::new(Arc::new(store), 10);
    let server = HttpServer::new(move || App::new().app_data(Data::new(state.clone())).configure(config))
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
    let addr = server.addrs()[0];
    let handle = server.run();
    actix_web::rt::spawn(handle);

    let token = create_jwt(7, vec![Role::User]).unwrap();
    let remote = Arc::new(HttpRepo::new(format!("http://{addr}")).with_token(token));
    let session = Session::new(7, Arc::clone(&remote), 2);

    let feed = session.feed(FeedQuery::community(community_id, FeedSort::New));
    assert_eq!(feed.load_more().await.unwrap(), LoadStatus::Loaded { appended: 2, has_more: true });
    assert_eq!(feed.load_more().await.unwrap(), LoadStatus::Loaded { appended: 1, has_more: false });
    assert_eq!(feed.items()[0].id, posts[2].id);

    let post = &posts[0];
    session.track_post(post, None, false);
    let outcome = session.vote(SubjectRef::post(post.id), Polarity::Up).await.unwrap();
    assert_eq!(outcome.tally, Tally::new(1, 0));
    assert_eq!(remote.user_vote(SubjectRef::post(post.id), 7).await.unwrap(), Some(Polarity::Up));

    assert!(session.toggle_save(post.id).await.unwrap());
    let saved = session.saved_feed();
    saved.load_more().await.unwrap();
    assert_eq!(saved.items().iter().map(|p| p.id).collect::<Vec<_>>(), vec![post.id]);

    // user 7 does not moderate; the server refuses and the pin is undone
    let err = session.toggle_pin(post.id).await.unwrap_err();
    assert_eq!(err.error, RepoError::Forbidden);
    assert_eq!(session.is_pinned(post.id), Some(false));

    let missing = session.vote(SubjectRef::post(9999), Polarity::Up).await.unwrap_err();
    assert_eq!(missing.error, RepoError::NotFound);
}
