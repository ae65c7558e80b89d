//! Client-side application context.
//!
//! A [`Session`] belongs to one signed-in user and owns the optimistic state
//! for everything that user can toggle: votes, bookmarks and pins. It is
//! constructed explicitly and handed to whatever renders; nothing here is
//! global.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::feed::{FeedCursor, FeedQuery, PostFeed, SavedFeed};
use crate::models::{Id, Polarity, Post, SubjectRef, Tally, Votable, VoteOutcome};
use crate::optimistic::{MutationError, OptimisticMutator};
use crate::repo::{PostRepo, RepoError, SavedPostRepo, VoteRepo};
use crate::votes::apply_vote;

/// Locally shown vote state of one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteState {
    pub tally: Tally,
    pub polarity: Option<Polarity>,
}

impl From<VoteOutcome> for VoteState {
    fn from(o: VoteOutcome) -> Self {
        Self { tally: o.tally, polarity: o.polarity }
    }
}

pub struct Session<R: ?Sized> {
    user_id: Id,
    remote: Arc<R>,
    page_size: usize,
    votes: OptimisticMutator<SubjectRef, VoteState>,
    saved: OptimisticMutator<Id, bool>,
    pinned: OptimisticMutator<Id, bool>,
}

impl<R> Session<R>
where
    R: PostRepo + VoteRepo + SavedPostRepo + ?Sized,
{
    pub fn new(user_id: Id, remote: Arc<R>, page_size: usize) -> Self {
        Self {
            user_id,
            remote,
            page_size,
            votes: OptimisticMutator::new(),
            saved: OptimisticMutator::new(),
            pinned: OptimisticMutator::new(),
        }
    }

    pub fn user_id(&self) -> Id {
        self.user_id
    }

    /// Seed local state from a freshly fetched votable item.
    pub fn track<T: Votable>(&self, id: Id, item: &T, polarity: Option<Polarity>) {
        let subject = SubjectRef { kind: T::KIND, id };
        self.votes.seed(subject, VoteState { tally: item.tally(), polarity });
    }

    /// Seed votes, bookmark and pin for a fetched post.
    pub fn track_post(&self, post: &Post, polarity: Option<Polarity>, saved: bool) {
        self.track(post.id, post, polarity);
        self.saved.seed(post.id, saved);
        self.pinned.seed(post.id, post.is_pinned);
    }

    pub fn vote_state(&self, subject: SubjectRef) -> Option<VoteState> {
        self.votes.get(&subject)
    }

    pub fn is_saved(&self, post_id: Id) -> Option<bool> {
        self.saved.get(&post_id)
    }

    pub fn is_pinned(&self, post_id: Id) -> Option<bool> {
        self.pinned.get(&post_id)
    }

    /// Vote with the local tally moving before the server answers.
    pub async fn vote(&self, subject: SubjectRef, requested: Polarity) -> Result<VoteOutcome, MutationError> {
        let remote = Arc::clone(&self.remote);
        let user_id = self.user_id;
        self.votes
            .mutate(
                subject,
                |current| {
                    let current = current.copied().unwrap_or_default();
                    apply_vote(current.tally, current.polarity, requested, subject.kind).into()
                },
                move |_| async move { remote.apply_vote(subject, user_id, requested).await },
                |confirmed: &VoteOutcome| Some(VoteState::from(*confirmed)),
            )
            .await
    }

    /// Flip the bookmark. Saving something already saved counts as saved.
    pub async fn toggle_save(&self, post_id: Id) -> Result<bool, MutationError> {
        let remote = Arc::clone(&self.remote);
        let user_id = self.user_id;
        self.saved
            .mutate(
                post_id,
                |current| !current.copied().unwrap_or(false),
                move |save| async move {
                    if save {
                        match remote.save_post(user_id, post_id).await {
                            Ok(()) | Err(RepoError::Conflict) => Ok(true),
                            Err(e) => Err(e),
                        }
                    } else {
                        remote.unsave_post(user_id, post_id).await.map(|()| false)
                    }
                },
                |confirmed: &bool| Some(*confirmed),
            )
            .await
    }

    /// Flip the pin. Authorization is the server's call; a refusal rolls back.
    pub async fn toggle_pin(&self, post_id: Id) -> Result<Post, MutationError> {
        let remote = Arc::clone(&self.remote);
        self.pinned
            .mutate(
                post_id,
                |current| !current.copied().unwrap_or(false),
                move |pinned| async move { remote.set_pinned(post_id, pinned).await },
                |post: &Post| Some(post.is_pinned),
            )
            .await
    }

    /// Forget local state of a deleted post.
    pub async fn delete_post(&self, post_id: Id) -> Result<(), RepoError> {
        self.remote.delete_post(post_id).await?;
        self.votes.forget(&SubjectRef::post(post_id));
        self.saved.forget(&post_id);
        self.pinned.forget(&post_id);
        Ok(())
    }

    pub fn feed(&self, query: FeedQuery) -> FeedCursor<Post, PostFeed<R>> {
        FeedCursor::new(PostFeed::new(Arc::clone(&self.remote), query), self.page_size)
    }

    pub fn saved_feed(&self) -> FeedCursor<Post, SavedFeed<R>> {
        FeedCursor::new(SavedFeed::new(Arc::clone(&self.remote), self.user_id), self.page_size)
    }
}
