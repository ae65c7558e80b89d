use async_trait::async_trait;

use crate::feed::FeedQuery;
use crate::models::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("forbidden")] Forbidden,
    #[error("store unavailable: {0}")] Unavailable(String),
    #[error("internal store error: {0}")] Internal(String),
}

impl RepoError {
    /// Worth retrying unchanged; everything else needs a different request.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Unavailable(_))
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait CommunityRepo: Send + Sync {
    async fn list_communities(&self) -> RepoResult<Vec<Community>>;
    async fn get_community(&self, id: Id) -> RepoResult<Community>;
    /// Also makes `owner_id` the community's owner.
    async fn create_community(&self, owner_id: Id, new: NewCommunity) -> RepoResult<Community>;
    async fn update_community(&self, id: Id, update: CommunityUpdate) -> RepoResult<Community>;
    /// Ordered by `rule_number`.
    async fn list_rules(&self, community_id: Id) -> RepoResult<Vec<CommunityRule>>;
    /// Conflict when the community already has a rule with that number.
    async fn create_rule(&self, community_id: Id, new: NewCommunityRule) -> RepoResult<CommunityRule>;
    /// NotFound unless the rule belongs to `community_id`.
    async fn update_rule(&self, community_id: Id, rule_id: Id, edit: NewCommunityRule) -> RepoResult<CommunityRule>;
    async fn delete_rule(&self, community_id: Id, rule_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, user_id: Id, new: NewPost) -> RepoResult<Post>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn list_posts(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Vec<Post>>;
    async fn set_pinned(&self, id: Id, pinned: bool) -> RepoResult<Post>;
    /// Removes the post with its comments, votes and bookmarks.
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Every comment on the post, oldest first.
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>>;
    async fn list_comments_page(&self, post_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Comment>>;
    /// `NotFound` when the post or the parent is missing, or the parent sits on another post.
    async fn create_comment(&self, post_id: Id, user_id: Id, new: NewComment) -> RepoResult<Comment>;
}

#[async_trait]
pub trait VoteRepo: Send + Sync {
    /// Cast, retract or flip `user_id`'s vote and move the subject's counters with it.
    async fn apply_vote(&self, subject: SubjectRef, user_id: Id, requested: Polarity) -> RepoResult<VoteOutcome>;
    async fn user_vote(&self, subject: SubjectRef, user_id: Id) -> RepoResult<Option<Polarity>>;
}

#[async_trait]
pub trait SavedPostRepo: Send + Sync {
    /// `Conflict` when already saved.
    async fn save_post(&self, user_id: Id, post_id: Id) -> RepoResult<()>;
    async fn unsave_post(&self, user_id: Id, post_id: Id) -> RepoResult<()>;
    async fn is_saved(&self, user_id: Id, post_id: Id) -> RepoResult<bool>;
    /// Most recently saved first.
    async fn list_saved(&self, user_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Post>>;
}

#[async_trait]
pub trait MembershipRepo: Send + Sync {
    async fn get_membership(&self, community_id: Id, user_id: Id) -> RepoResult<Option<CommunityMembership>>;
    async fn list_members(&self, community_id: Id) -> RepoResult<Vec<CommunityMembership>>;
    /// `Conflict` when a membership row already exists.
    async fn insert_membership(&self, community_id: Id, user_id: Id, role: CommunityRole) -> RepoResult<CommunityMembership>;
    async fn delete_membership(&self, community_id: Id, user_id: Id) -> RepoResult<()>;
    async fn get_ban(&self, community_id: Id, user_id: Id) -> RepoResult<Option<CommunityBan>>;
    async fn list_bans(&self, community_id: Id) -> RepoResult<Vec<CommunityBan>>;
    /// `Conflict` when the user already has a ban row, expired or not.
    async fn insert_ban(&self, new: NewBan) -> RepoResult<CommunityBan>;
    async fn delete_ban(&self, community_id: Id, user_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ProblemRepo: Send + Sync {
    async fn list_problems(&self, offset: usize, limit: usize) -> RepoResult<Vec<Problem>>;
    async fn create_problem(&self, user_id: Id, new: NewProblem) -> RepoResult<Problem>;
    async fn get_problem(&self, id: Id) -> RepoResult<Problem>;
    async fn get_solution(&self, id: Id) -> RepoResult<Solution>;
    /// Best solution first, then by upvotes.
    async fn list_solutions(&self, problem_id: Id) -> RepoResult<Vec<Solution>>;
    async fn create_solution(&self, problem_id: Id, user_id: Id, new: NewSolution) -> RepoResult<Solution>;
    /// Unmarks every other solution of the problem and marks the problem solved.
    async fn mark_best_solution(&self, problem_id: Id, solution_id: Id) -> RepoResult<Solution>;
}

pub trait Repo: CommunityRepo + PostRepo + CommentRepo + VoteRepo + SavedPostRepo + MembershipRepo + ProblemRepo {}

impl<T> Repo for T where
    T: CommunityRepo + PostRepo + CommentRepo + VoteRepo + SavedPostRepo + MembershipRepo + ProblemRepo
{
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use tracing::{info, warn};

    use crate::votes::VoteLedger;

    pub const DATA_DIR_ENV: &str = "CAMPUS_DATA_DIR";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        communities: HashMap<Id, Community>,
        memberships: HashMap<Id, CommunityMembership>,
        bans:        HashMap<Id, CommunityBan>,
        #[serde(default)]
        rules:       HashMap<Id, CommunityRule>,
        posts:       HashMap<Id, Post>,
        comments:    HashMap<Id, Comment>,
        saved:       HashMap<Id, SavedPost>,
        problems:    HashMap<Id, Problem>,
        solutions:   HashMap<Id, Solution>,
        votes:       VoteLedger,
        next_id: Id,
    }

    /// Process-local store. With a data dir it reloads and rewrites a JSON
    /// snapshot on every change; without one it lives only in memory.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Snapshot under `$CAMPUS_DATA_DIR/state.json` when the variable is set.
        pub fn new() -> Self {
            match std::env::var(DATA_DIR_ENV) {
                Ok(dir) => Self::with_snapshot(PathBuf::from(dir).join("state.json")),
                Err(_) => Self::ephemeral(),
            }
        }

        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        pub fn with_snapshot(path: PathBuf) -> Self {
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "unreadable snapshot; starting empty");
                        State::default()
                    }
                },
                Err(e) => {
                    info!(path = %path.display(), error = %e, "no snapshot; starting empty");
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = match self.state.read() {
                Ok(s) => serde_json::to_vec_pretty(&*s),
                Err(_) => {
                    warn!("state lock poisoned; snapshot skipped");
                    return;
                }
            };
            match bytes {
                Ok(bytes) => {
                    if let Some(dir) = path.parent() {
                        let _ = std::fs::create_dir_all(dir);
                    }
                    if let Err(e) = std::fs::write(path, bytes) {
                        warn!(path = %path.display(), error = %e, "failed to write snapshot");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode snapshot"),
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    fn window<T>(rows: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
        rows.into_iter().skip(offset).take(limit).collect()
    }

    fn vote_on<T: Votable>(
        ledger: &mut VoteLedger,
        rows: &mut HashMap<Id, T>,
        subject: SubjectRef,
        user_id: Id,
        requested: Polarity,
    ) -> RepoResult<VoteOutcome> {
        let row = rows.get_mut(&subject.id).ok_or(RepoError::NotFound)?;
        let mut tally = row.tally();
        let outcome = ledger.apply(subject, user_id, requested, &mut tally);
        row.set_tally(tally);
        Ok(outcome)
    }

    #[async_trait]
    impl CommunityRepo for InMemRepo {
        async fn list_communities(&self) -> RepoResult<Vec<Community>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.communities.values().cloned().collect();
            v.sort_by_key(|c| c.id);
            Ok(v)
        }
        async fn get_community(&self, id: Id) -> RepoResult<Community> {
            let s = self.read()?;
            s.communities.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_community(&self, owner_id: Id, new: NewCommunity) -> RepoResult<Community> {
            let mut s = self.write()?;
            if s.communities.values().any(|c| c.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let community = Community {
                id,
                name: new.name,
                slug: new.slug,
                description: new.description,
                community_type: new.community_type,
                is_private: new.is_private,
                created_by: owner_id,
                created_at: now,
            };
            s.communities.insert(id, community.clone());
            let mid = Self::next_id(&mut s);
            s.memberships.insert(mid, CommunityMembership {
                id: mid,
                community_id: id,
                user_id: owner_id,
                role: CommunityRole::Owner,
                joined_at: now,
            });
            drop(s);
            self.persist();
            Ok(community)
        }
        async fn update_community(&self, id: Id, update: CommunityUpdate) -> RepoResult<Community> {
            let mut s = self.write()?;
            let community = s.communities.get_mut(&id).ok_or(RepoError::NotFound)?;
            update.apply_to(community);
            let community = community.clone();
            drop(s);
            self.persist();
            Ok(community)
        }
        async fn list_rules(&self, community_id: Id) -> RepoResult<Vec<CommunityRule>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.rules.values().filter(|r| r.community_id == community_id).cloned().collect();
            v.sort_by_key(|r| (r.rule_number, r.id));
            Ok(v)
        }
        async fn create_rule(&self, community_id: Id, new: NewCommunityRule) -> RepoResult<CommunityRule> {
            let mut s = self.write()?;
            if !s.communities.contains_key(&community_id) { return Err(RepoError::NotFound); }
            if s.rules.values().any(|r| r.community_id == community_id && r.rule_number == new.rule_number) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let rule = CommunityRule {
                id,
                community_id,
                rule_number: new.rule_number,
                title: new.title,
                description: new.description,
                created_at: Utc::now(),
            };
            s.rules.insert(id, rule.clone());
            drop(s);
            self.persist();
            Ok(rule)
        }
        async fn update_rule(&self, community_id: Id, rule_id: Id, edit: NewCommunityRule) -> RepoResult<CommunityRule> {
            let mut s = self.write()?;
            match s.rules.get(&rule_id) {
                Some(r) if r.community_id == community_id => {}
                _ => return Err(RepoError::NotFound),
            }
            if s.rules.values().any(|r| r.community_id == community_id && r.id != rule_id && r.rule_number == edit.rule_number) {
                return Err(RepoError::Conflict);
            }
            let rule = s.rules.get_mut(&rule_id).ok_or(RepoError::NotFound)?;
            rule.rule_number = edit.rule_number;
            rule.title = edit.title;
            rule.description = edit.description;
            let rule = rule.clone();
            drop(s);
            self.persist();
            Ok(rule)
        }
        async fn delete_rule(&self, community_id: Id, rule_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            match s.rules.get(&rule_id) {
                Some(r) if r.community_id == community_id => {}
                _ => return Err(RepoError::NotFound),
            }
            s.rules.remove(&rule_id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, user_id: Id, new: NewPost) -> RepoResult<Post> {
            let mut s = self.write()?;
            if !s.communities.contains_key(&new.community_id) { return Err(RepoError::NotFound); }
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                community_id: new.community_id,
                user_id,
                title: new.title,
                content: new.content,
                post_type: new.post_type,
                link_url: new.link_url,
                upvotes: 0,
                downvotes: 0,
                comment_count: 0,
                is_pinned: false,
                created_at: Utc::now(),
            };
            s.posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let s = self.read()?;
            s.posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn list_posts(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.posts.values().filter(|p| query.matches(p)).cloned().collect();
            v.sort_by(|a, b| query.sort.compare(a, b));
            Ok(window(v, offset, limit))
        }
        async fn set_pinned(&self, id: Id, pinned: bool) -> RepoResult<Post> {
            let mut s = self.write()?;
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.is_pinned = pinned;
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.posts.remove(&id).is_none() { return Err(RepoError::NotFound); }
            let comment_ids: Vec<Id> = s.comments.values().filter(|c| c.post_id == id).map(|c| c.id).collect();
            for cid in comment_ids {
                s.comments.remove(&cid);
                s.votes.forget_subject(SubjectRef::comment(cid));
            }
            s.votes.forget_subject(SubjectRef::post(id));
            s.saved.retain(|_, sp| sp.post_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.comments.values().filter(|c| c.post_id == post_id).cloned().collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));    // ascending
            Ok(v)
        }
        async fn list_comments_page(&self, post_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Comment>> {
            Ok(window(self.list_comments(post_id).await?, offset, limit))
        }
        async fn create_comment(&self, post_id: Id, user_id: Id, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.posts.contains_key(&post_id) { return Err(RepoError::NotFound); }
            if let Some(pid) = new.parent_id {
                match s.comments.get(&pid) {
                    Some(parent) if parent.post_id == post_id => {}
                    _ => return Err(RepoError::NotFound),
                }
            }
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                post_id,
                parent_id: new.parent_id,
                user_id,
                content: new.content,
                upvotes: 0,
                downvotes: 0,
                created_at: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            if let Some(p) = s.posts.get_mut(&post_id) { p.comment_count += 1; }
            drop(s);
            self.persist();
            Ok(comment)
        }
    }

    #[async_trait]
    impl VoteRepo for InMemRepo {
        async fn apply_vote(&self, subject: SubjectRef, user_id: Id, requested: Polarity) -> RepoResult<VoteOutcome> {
            let mut guard = self.write()?;
            let s = &mut *guard;
            let outcome = match subject.kind {
                SubjectKind::Post => vote_on(&mut s.votes, &mut s.posts, subject, user_id, requested),
                SubjectKind::Comment => vote_on(&mut s.votes, &mut s.comments, subject, user_id, requested),
                SubjectKind::Solution => vote_on(&mut s.votes, &mut s.solutions, subject, user_id, requested),
            }?;
            drop(guard);
            self.persist();
            Ok(outcome)
        }
        async fn user_vote(&self, subject: SubjectRef, user_id: Id) -> RepoResult<Option<Polarity>> {
            let s = self.read()?;
            Ok(s.votes.polarity(subject, user_id))
        }
    }

    #[async_trait]
    impl SavedPostRepo for InMemRepo {
        async fn save_post(&self, user_id: Id, post_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if !s.posts.contains_key(&post_id) { return Err(RepoError::NotFound); }
            if s.saved.values().any(|sp| sp.user_id == user_id && sp.post_id == post_id) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            s.saved.insert(id, SavedPost { id, user_id, post_id, created_at: Utc::now() });
            drop(s);
            self.persist();
            Ok(())
        }
        async fn unsave_post(&self, user_id: Id, post_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.saved.retain(|_, sp| !(sp.user_id == user_id && sp.post_id == post_id));
            drop(s);
            self.persist();
            Ok(())
        }
        async fn is_saved(&self, user_id: Id, post_id: Id) -> RepoResult<bool> {
            let s = self.read()?;
            Ok(s.saved.values().any(|sp| sp.user_id == user_id && sp.post_id == post_id))
        }
        async fn list_saved(&self, user_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
            let s = self.read()?;
            let mut marks: Vec<&SavedPost> = s.saved.values().filter(|sp| sp.user_id == user_id).collect();
            marks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            let posts: Vec<Post> = marks.into_iter().filter_map(|sp| s.posts.get(&sp.post_id).cloned()).collect();
            Ok(window(posts, offset, limit))
        }
    }

    #[async_trait]
    impl MembershipRepo for InMemRepo {
        async fn get_membership(&self, community_id: Id, user_id: Id) -> RepoResult<Option<CommunityMembership>> {
            let s = self.read()?;
            Ok(s.memberships.values().find(|m| m.community_id == community_id && m.user_id == user_id).cloned())
        }
        async fn list_members(&self, community_id: Id) -> RepoResult<Vec<CommunityMembership>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.memberships.values().filter(|m| m.community_id == community_id).cloned().collect();
            v.sort_by_key(|m| m.id);
            Ok(v)
        }
        async fn insert_membership(&self, community_id: Id, user_id: Id, role: CommunityRole) -> RepoResult<CommunityMembership> {
            let mut s = self.write()?;
            if !s.communities.contains_key(&community_id) { return Err(RepoError::NotFound); }
            if s.memberships.values().any(|m| m.community_id == community_id && m.user_id == user_id) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let membership = CommunityMembership { id, community_id, user_id, role, joined_at: Utc::now() };
            s.memberships.insert(id, membership.clone());
            drop(s);
            self.persist();
            Ok(membership)
        }
        async fn delete_membership(&self, community_id: Id, user_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.memberships.retain(|_, m| !(m.community_id == community_id && m.user_id == user_id));
            drop(s);
            self.persist();
            Ok(())
        }
        async fn get_ban(&self, community_id: Id, user_id: Id) -> RepoResult<Option<CommunityBan>> {
            let s = self.read()?;
            Ok(s.bans.values().find(|b| b.community_id == community_id && b.user_id == user_id).cloned())
        }
        async fn list_bans(&self, community_id: Id) -> RepoResult<Vec<CommunityBan>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.bans.values().filter(|b| b.community_id == community_id).cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }
        async fn insert_ban(&self, new: NewBan) -> RepoResult<CommunityBan> {
            let mut s = self.write()?;
            if !s.communities.contains_key(&new.community_id) { return Err(RepoError::NotFound); }
            if s.bans.values().any(|b| b.community_id == new.community_id && b.user_id == new.user_id) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let ban = CommunityBan {
                id,
                community_id: new.community_id,
                user_id: new.user_id,
                banned_by: new.banned_by,
                reason: new.reason,
                expires_at: new.expires_at,
                created_at: Utc::now(),
            };
            s.bans.insert(id, ban.clone());
            drop(s);
            self.persist();
            Ok(ban)
        }
        async fn delete_ban(&self, community_id: Id, user_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.bans.retain(|_, b| !(b.community_id == community_id && b.user_id == user_id));
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl ProblemRepo for InMemRepo {
        async fn list_problems(&self, offset: usize, limit: usize) -> RepoResult<Vec<Problem>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.problems.values().cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(window(v, offset, limit))
        }
        async fn create_problem(&self, user_id: Id, new: NewProblem) -> RepoResult<Problem> {
            let mut s = self.write()?;
            let id = Self::next_id(&mut s);
            let problem = Problem {
                id,
                user_id,
                title: new.title,
                description: new.description,
                subject: new.subject,
                difficulty: new.difficulty,
                status: ProblemStatus::Open,
                created_at: Utc::now(),
            };
            s.problems.insert(id, problem.clone());
            drop(s);
            self.persist();
            Ok(problem)
        }
        async fn get_problem(&self, id: Id) -> RepoResult<Problem> {
            let s = self.read()?;
            s.problems.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_solution(&self, id: Id) -> RepoResult<Solution> {
            let s = self.read()?;
            s.solutions.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn list_solutions(&self, problem_id: Id) -> RepoResult<Vec<Solution>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.solutions.values().filter(|x| x.problem_id == problem_id).cloned().collect();
            v.sort_by(|a, b| {
                b.is_best_solution
                    .cmp(&a.is_best_solution)
                    .then(b.upvotes.cmp(&a.upvotes))
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            });
            Ok(v)
        }
        async fn create_solution(&self, problem_id: Id, user_id: Id, new: NewSolution) -> RepoResult<Solution> {
            let mut s = self.write()?;
            if !s.problems.contains_key(&problem_id) { return Err(RepoError::NotFound); }
            let id = Self::next_id(&mut s);
            let solution = Solution {
                id,
                problem_id,
                user_id,
                content: new.content,
                upvotes: 0,
                is_best_solution: false,
                created_at: Utc::now(),
            };
            s.solutions.insert(id, solution.clone());
            drop(s);
            self.persist();
            Ok(solution)
        }
        async fn mark_best_solution(&self, problem_id: Id, solution_id: Id) -> RepoResult<Solution> {
            let mut s = self.write()?;
            match s.solutions.get(&solution_id) {
                Some(sol) if sol.problem_id == problem_id => {}
                _ => return Err(RepoError::NotFound),
            }
            for sol in s.solutions.values_mut().filter(|x| x.problem_id == problem_id) {
                sol.is_best_solution = sol.id == solution_id;
            }
            if let Some(p) = s.problems.get_mut(&problem_id) { p.status = ProblemStatus::Solved; }
            let best = s.solutions.get(&solution_id).cloned().ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(best)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::{Pool, Postgres};

    use crate::votes::VoteTransition;

    const COMMUNITY_COLS: &str = "id, name, slug, description, community_type, is_private, created_by, created_at";
    const POST_COLS: &str =
        "id, community_id, user_id, title, content, post_type, link_url, upvotes, downvotes, comment_count, is_pinned, created_at";
    const COMMENT_COLS: &str = "id, post_id, parent_id, user_id, content, upvotes, downvotes, created_at";
    const MEMBER_COLS: &str = "id, community_id, user_id, role, joined_at";
    const RULE_COLS: &str = "id, community_id, rule_number, title, description, created_at";
    const BAN_COLS: &str = "id, community_id, user_id, banned_by, reason, expires_at, created_at";
    const PROBLEM_COLS: &str = "id, user_id, title, description, subject, difficulty, status, created_at";
    const SOLUTION_COLS: &str = "id, problem_id, user_id, content, upvotes, is_best_solution, created_at";

    pub(crate) fn map_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => RepoError::Conflict,    // unique_violation
                Some("23503") => RepoError::NotFound,    // foreign_key_violation
                _ => RepoError::Internal(db.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepoError::Unavailable(e.to_string())
            }
            _ => RepoError::Internal(e.to_string()),
        }
    }

    fn bounds(offset: usize, limit: usize) -> (i64, i64) {
        (i64::try_from(limit).unwrap_or(i64::MAX), i64::try_from(offset).unwrap_or(i64::MAX))
    }

    /// Subject table and vote table for one subject kind.
    struct VoteTables {
        subject: &'static str,
        votes: &'static str,
        fk: &'static str,
        has_downvotes: bool,
    }

    impl VoteTables {
        fn of(kind: SubjectKind) -> Self {
            match kind {
                SubjectKind::Post => Self { subject: "posts", votes: "post_votes", fk: "post_id", has_downvotes: true },
                SubjectKind::Comment => Self { subject: "comments", votes: "comment_votes", fk: "comment_id", has_downvotes: true },
                SubjectKind::Solution => Self { subject: "solutions", votes: "solution_votes", fk: "solution_id", has_downvotes: false },
            }
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
            let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
            Ok(Self::new(pool))
        }

        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }
    }

    #[async_trait]
    impl CommunityRepo for PgRepo {
        async fn list_communities(&self) -> RepoResult<Vec<Community>> {
            let sql = format!("SELECT {COMMUNITY_COLS} FROM communities ORDER BY id");
            sqlx::query_as::<_, Community>(&sql).fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn get_community(&self, id: Id) -> RepoResult<Community> {
            let sql = format!("SELECT {COMMUNITY_COLS} FROM communities WHERE id = $1");
            sqlx::query_as::<_, Community>(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn create_community(&self, owner_id: Id, new: NewCommunity) -> RepoResult<Community> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let sql = format!(
                "INSERT INTO communities (name, slug, description, community_type, is_private, created_by)
                 VALUES ($1,$2,$3,$4,$5,$6) RETURNING {COMMUNITY_COLS}"
            );
            let community = sqlx::query_as::<_, Community>(&sql)
                .bind(&new.name)
                .bind(&new.slug)
                .bind(new.description.as_ref())
                .bind(new.community_type)
                .bind(new.is_private)
                .bind(owner_id)
                .fetch_one(&mut *tx).await.map_err(map_err)?;
            sqlx::query("INSERT INTO community_members (community_id, user_id, role) VALUES ($1,$2,$3)")
                .bind(community.id)
                .bind(owner_id)
                .bind(CommunityRole::Owner)
                .execute(&mut *tx).await.map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            Ok(community)
        }
        async fn update_community(&self, id: Id, update: CommunityUpdate) -> RepoResult<Community> {
            let sql = format!(
                "UPDATE communities SET
                    name = COALESCE($2, name),
                    description = COALESCE($3, description),
                    community_type = COALESCE($4, community_type),
                    is_private = COALESCE($5, is_private)
                 WHERE id = $1 RETURNING {COMMUNITY_COLS}"
            );
            sqlx::query_as::<_, Community>(&sql)
                .bind(id)
                .bind(update.name)
                .bind(update.description)
                .bind(update.community_type)
                .bind(update.is_private)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn list_rules(&self, community_id: Id) -> RepoResult<Vec<CommunityRule>> {
            let sql = format!("SELECT {RULE_COLS} FROM community_rules WHERE community_id = $1 ORDER BY rule_number, id");
            sqlx::query_as::<_, CommunityRule>(&sql).bind(community_id).fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn create_rule(&self, community_id: Id, new: NewCommunityRule) -> RepoResult<CommunityRule> {
            let sql = format!(
                "INSERT INTO community_rules (community_id, rule_number, title, description)
                 VALUES ($1,$2,$3,$4) RETURNING {RULE_COLS}"
            );
            sqlx::query_as::<_, CommunityRule>(&sql)
                .bind(community_id)
                .bind(new.rule_number)
                .bind(&new.title)
                .bind(new.description.as_ref())
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn update_rule(&self, community_id: Id, rule_id: Id, edit: NewCommunityRule) -> RepoResult<CommunityRule> {
            let sql = format!(
                "UPDATE community_rules SET rule_number = $3, title = $4, description = $5
                 WHERE id = $1 AND community_id = $2 RETURNING {RULE_COLS}"
            );
            sqlx::query_as::<_, CommunityRule>(&sql)
                .bind(rule_id)
                .bind(community_id)
                .bind(edit.rule_number)
                .bind(&edit.title)
                .bind(edit.description.as_ref())
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn delete_rule(&self, community_id: Id, rule_id: Id) -> RepoResult<()> {
            let done = sqlx::query("DELETE FROM community_rules WHERE id = $1 AND community_id = $2")
                .bind(rule_id)
                .bind(community_id)
                .execute(&self.pool).await.map_err(map_err)?;
            if done.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, user_id: Id, new: NewPost) -> RepoResult<Post> {
            let sql = format!(
                "INSERT INTO posts (community_id, user_id, title, content, post_type, link_url)
                 VALUES ($1,$2,$3,$4,$5,$6) RETURNING {POST_COLS}"
            );
            sqlx::query_as::<_, Post>(&sql)
                .bind(new.community_id)
                .bind(user_id)
                .bind(&new.title)
                .bind(new.content.as_ref())
                .bind(new.post_type)
                .bind(new.link_url.as_ref())
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let sql = format!("SELECT {POST_COLS} FROM posts WHERE id = $1");
            sqlx::query_as::<_, Post>(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn list_posts(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
            let (limit, offset) = bounds(offset, limit);
            let sql = format!(
                "SELECT {POST_COLS} FROM posts
                 WHERE ($1::BIGINT IS NULL OR community_id = $1) AND ($2::BIGINT IS NULL OR user_id = $2)
                 ORDER BY {} LIMIT $3 OFFSET $4",
                query.sort.order_by()
            );
            sqlx::query_as::<_, Post>(&sql)
                .bind(query.community_id)
                .bind(query.author_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn set_pinned(&self, id: Id, pinned: bool) -> RepoResult<Post> {
            let sql = format!("UPDATE posts SET is_pinned = $2 WHERE id = $1 RETURNING {POST_COLS}");
            sqlx::query_as::<_, Post>(&sql).bind(id).bind(pinned).fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            // comments, votes and bookmarks go with it (ON DELETE CASCADE)
            let res = sqlx::query("DELETE FROM posts WHERE id = $1").bind(id).execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            let sql = format!("SELECT {COMMENT_COLS} FROM comments WHERE post_id = $1 ORDER BY created_at ASC, id ASC");
            sqlx::query_as::<_, Comment>(&sql).bind(post_id).fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn list_comments_page(&self, post_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Comment>> {
            let (limit, offset) = bounds(offset, limit);
            let sql = format!(
                "SELECT {COMMENT_COLS} FROM comments WHERE post_id = $1 ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3"
            );
            sqlx::query_as::<_, Comment>(&sql)
                .bind(post_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn create_comment(&self, post_id: Id, user_id: Id, new: NewComment) -> RepoResult<Comment> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            if let Some(pid) = new.parent_id {
                let parent_post: Option<Id> = sqlx::query_scalar("SELECT post_id FROM comments WHERE id = $1")
                    .bind(pid)
                    .fetch_optional(&mut *tx).await.map_err(map_err)?;
                if parent_post != Some(post_id) { return Err(RepoError::NotFound); }
            }
            let sql = format!(
                "INSERT INTO comments (post_id, parent_id, user_id, content) VALUES ($1,$2,$3,$4) RETURNING {COMMENT_COLS}"
            );
            let comment = sqlx::query_as::<_, Comment>(&sql)
                .bind(post_id)
                .bind(new.parent_id)
                .bind(user_id)
                .bind(&new.content)
                .fetch_one(&mut *tx).await.map_err(map_err)?;
            sqlx::query("UPDATE posts SET comment_count = comment_count + 1 WHERE id = $1")
                .bind(post_id)
                .execute(&mut *tx).await.map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            Ok(comment)
        }
    }

    #[async_trait]
    impl VoteRepo for PgRepo {
        async fn apply_vote(&self, subject: SubjectRef, user_id: Id, requested: Polarity) -> RepoResult<VoteOutcome> {
            let t = VoteTables::of(subject.kind);
            let down = if t.has_downvotes { "downvotes" } else { "0::BIGINT" };
            let mut tx = self.pool.begin().await.map_err(map_err)?;

            // the row lock serializes concurrent voters on one subject
            let sql = format!("SELECT upvotes, {down} FROM {} WHERE id = $1 FOR UPDATE", t.subject);
            let (up, dn): (i64, i64) = sqlx::query_as(&sql)
                .bind(subject.id)
                .fetch_optional(&mut *tx).await.map_err(map_err)?
                .ok_or(RepoError::NotFound)?;

            let sql = format!("SELECT vote_type FROM {} WHERE {} = $1 AND user_id = $2", t.votes, t.fk);
            let existing = sqlx::query_scalar::<_, i16>(&sql)
                .bind(subject.id)
                .bind(user_id)
                .fetch_optional(&mut *tx).await.map_err(map_err)?
                .map(Polarity::try_from)
                .transpose()
                .map_err(RepoError::Internal)?;

            let transition = VoteTransition::between(existing, requested, subject.kind);
            match transition {
                VoteTransition::Cast(p) => {
                    let sql = format!("INSERT INTO {} ({}, user_id, vote_type) VALUES ($1,$2,$3)", t.votes, t.fk);
                    sqlx::query(&sql).bind(subject.id).bind(user_id).bind(i16::from(p))
                        .execute(&mut *tx).await.map_err(map_err)?;
                }
                VoteTransition::Retract(_) => {
                    let sql = format!("DELETE FROM {} WHERE {} = $1 AND user_id = $2", t.votes, t.fk);
                    sqlx::query(&sql).bind(subject.id).bind(user_id)
                        .execute(&mut *tx).await.map_err(map_err)?;
                }
                VoteTransition::Flip { to, .. } => {
                    let sql = format!("UPDATE {} SET vote_type = $3 WHERE {} = $1 AND user_id = $2", t.votes, t.fk);
                    sqlx::query(&sql).bind(subject.id).bind(user_id).bind(i16::from(to))
                        .execute(&mut *tx).await.map_err(map_err)?;
                }
                VoteTransition::Unsupported => {}
            }

            let tally = transition.apply(Tally::new(up, dn));
            if transition != VoteTransition::Unsupported {
                let sql = if t.has_downvotes {
                    format!("UPDATE {} SET upvotes = $2, downvotes = $3 WHERE id = $1", t.subject)
                } else {
                    format!("UPDATE {} SET upvotes = $2 WHERE id = $1", t.subject)
                };
                let mut q = sqlx::query(&sql).bind(subject.id).bind(tally.upvotes);
                if t.has_downvotes {
                    q = q.bind(tally.downvotes);
                }
                q.execute(&mut *tx).await.map_err(map_err)?;
            }
            tx.commit().await.map_err(map_err)?;
            Ok(VoteOutcome { tally, polarity: transition.resulting_polarity(existing) })
        }
        async fn user_vote(&self, subject: SubjectRef, user_id: Id) -> RepoResult<Option<Polarity>> {
            let t = VoteTables::of(subject.kind);
            let sql = format!("SELECT vote_type FROM {} WHERE {} = $1 AND user_id = $2", t.votes, t.fk);
            sqlx::query_scalar::<_, i16>(&sql)
                .bind(subject.id)
                .bind(user_id)
                .fetch_optional(&self.pool).await.map_err(map_err)?
                .map(Polarity::try_from)
                .transpose()
                .map_err(RepoError::Internal)
        }
    }

    #[async_trait]
    impl SavedPostRepo for PgRepo {
        async fn save_post(&self, user_id: Id, post_id: Id) -> RepoResult<()> {
            sqlx::query("INSERT INTO saved_posts (user_id, post_id) VALUES ($1,$2)")
                .bind(user_id)
                .bind(post_id)
                .execute(&self.pool).await.map_err(map_err)?;
            Ok(())
        }
        async fn unsave_post(&self, user_id: Id, post_id: Id) -> RepoResult<()> {
            sqlx::query("DELETE FROM saved_posts WHERE user_id = $1 AND post_id = $2")
                .bind(user_id)
                .bind(post_id)
                .execute(&self.pool).await.map_err(map_err)?;
            Ok(())
        }
        async fn is_saved(&self, user_id: Id, post_id: Id) -> RepoResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM saved_posts WHERE user_id = $1 AND post_id = $2)")
                .bind(user_id)
                .bind(post_id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn list_saved(&self, user_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
            let (limit, offset) = bounds(offset, limit);
            sqlx::query_as::<_, Post>(r#"
                SELECT p.id, p.community_id, p.user_id, p.title, p.content, p.post_type, p.link_url,
                       p.upvotes, p.downvotes, p.comment_count, p.is_pinned, p.created_at
                FROM saved_posts s
                JOIN posts p ON p.id = s.post_id
                WHERE s.user_id = $1
                ORDER BY s.created_at DESC, s.id DESC
                LIMIT $2 OFFSET $3
            "#)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool).await.map_err(map_err)
        }
    }

    #[async_trait]
    impl MembershipRepo for PgRepo {
        async fn get_membership(&self, community_id: Id, user_id: Id) -> RepoResult<Option<CommunityMembership>> {
            let sql = format!("SELECT {MEMBER_COLS} FROM community_members WHERE community_id = $1 AND user_id = $2");
            sqlx::query_as::<_, CommunityMembership>(&sql)
                .bind(community_id)
                .bind(user_id)
                .fetch_optional(&self.pool).await.map_err(map_err)
        }
        async fn list_members(&self, community_id: Id) -> RepoResult<Vec<CommunityMembership>> {
            let sql = format!("SELECT {MEMBER_COLS} FROM community_members WHERE community_id = $1 ORDER BY id");
            sqlx::query_as::<_, CommunityMembership>(&sql)
                .bind(community_id)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn insert_membership(&self, community_id: Id, user_id: Id, role: CommunityRole) -> RepoResult<CommunityMembership> {
            let sql = format!(
                "INSERT INTO community_members (community_id, user_id, role) VALUES ($1,$2,$3) RETURNING {MEMBER_COLS}"
            );
            sqlx::query_as::<_, CommunityMembership>(&sql)
                .bind(community_id)
                .bind(user_id)
                .bind(role)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn delete_membership(&self, community_id: Id, user_id: Id) -> RepoResult<()> {
            sqlx::query("DELETE FROM community_members WHERE community_id = $1 AND user_id = $2")
                .bind(community_id)
                .bind(user_id)
                .execute(&self.pool).await.map_err(map_err)?;
            Ok(())
        }
        async fn get_ban(&self, community_id: Id, user_id: Id) -> RepoResult<Option<CommunityBan>> {
            let sql = format!("SELECT {BAN_COLS} FROM community_bans WHERE community_id = $1 AND user_id = $2");
            sqlx::query_as::<_, CommunityBan>(&sql)
                .bind(community_id)
                .bind(user_id)
                .fetch_optional(&self.pool).await.map_err(map_err)
        }
        async fn list_bans(&self, community_id: Id) -> RepoResult<Vec<CommunityBan>> {
            let sql = format!("SELECT {BAN_COLS} FROM community_bans WHERE community_id = $1 ORDER BY created_at DESC, id DESC");
            sqlx::query_as::<_, CommunityBan>(&sql)
                .bind(community_id)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn insert_ban(&self, new: NewBan) -> RepoResult<CommunityBan> {
            let sql = format!(
                "INSERT INTO community_bans (community_id, user_id, banned_by, reason, expires_at)
                 VALUES ($1,$2,$3,$4,$5) RETURNING {BAN_COLS}"
            );
            sqlx::query_as::<_, CommunityBan>(&sql)
                .bind(new.community_id)
                .bind(new.user_id)
                .bind(new.banned_by)
                .bind(new.reason.as_ref())
                .bind(new.expires_at)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn delete_ban(&self, community_id: Id, user_id: Id) -> RepoResult<()> {
            sqlx::query("DELETE FROM community_bans WHERE community_id = $1 AND user_id = $2")
                .bind(community_id)
                .bind(user_id)
                .execute(&self.pool).await.map_err(map_err)?;
            Ok(())
        }
    }

    #[async_trait]
    impl ProblemRepo for PgRepo {
        async fn list_problems(&self, offset: usize, limit: usize) -> RepoResult<Vec<Problem>> {
            let (limit, offset) = bounds(offset, limit);
            let sql = format!("SELECT {PROBLEM_COLS} FROM problems ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2");
            sqlx::query_as::<_, Problem>(&sql).bind(limit).bind(offset).fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn create_problem(&self, user_id: Id, new: NewProblem) -> RepoResult<Problem> {
            let sql = format!(
                "INSERT INTO problems (user_id, title, description, subject, difficulty)
                 VALUES ($1,$2,$3,$4,$5) RETURNING {PROBLEM_COLS}"
            );
            sqlx::query_as::<_, Problem>(&sql)
                .bind(user_id)
                .bind(&new.title)
                .bind(&new.description)
                .bind(new.subject.as_ref())
                .bind(new.difficulty)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn get_problem(&self, id: Id) -> RepoResult<Problem> {
            let sql = format!("SELECT {PROBLEM_COLS} FROM problems WHERE id = $1");
            sqlx::query_as::<_, Problem>(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn get_solution(&self, id: Id) -> RepoResult<Solution> {
            let sql = format!("SELECT {SOLUTION_COLS} FROM solutions WHERE id = $1");
            sqlx::query_as::<_, Solution>(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn list_solutions(&self, problem_id: Id) -> RepoResult<Vec<Solution>> {
            let sql = format!(
                "SELECT {SOLUTION_COLS} FROM solutions WHERE problem_id = $1
                 ORDER BY is_best_solution DESC, upvotes DESC, created_at ASC, id ASC"
            );
            sqlx::query_as::<_, Solution>(&sql).bind(problem_id).fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn create_solution(&self, problem_id: Id, user_id: Id, new: NewSolution) -> RepoResult<Solution> {
            let sql = format!(
                "INSERT INTO solutions (problem_id, user_id, content) VALUES ($1,$2,$3) RETURNING {SOLUTION_COLS}"
            );
            sqlx::query_as::<_, Solution>(&sql)
                .bind(problem_id)
                .bind(user_id)
                .bind(&new.content)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn mark_best_solution(&self, problem_id: Id, solution_id: Id) -> RepoResult<Solution> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            sqlx::query_scalar::<_, Id>("SELECT id FROM problems WHERE id = $1 FOR UPDATE")
                .bind(problem_id)
                .fetch_one(&mut *tx).await.map_err(map_err)?;
            sqlx::query("UPDATE solutions SET is_best_solution = FALSE WHERE problem_id = $1 AND is_best_solution")
                .bind(problem_id)
                .execute(&mut *tx).await.map_err(map_err)?;
            let sql = format!(
                "UPDATE solutions SET is_best_solution = TRUE WHERE id = $1 AND problem_id = $2 RETURNING {SOLUTION_COLS}"
            );
            let best = sqlx::query_as::<_, Solution>(&sql)
                .bind(solution_id)
                .bind(problem_id)
                .fetch_optional(&mut *tx).await.map_err(map_err)?
                .ok_or(RepoError::NotFound)?;
            sqlx::query("UPDATE problems SET status = $2 WHERE id = $1")
                .bind(problem_id)
                .bind(ProblemStatus::Solved)
                .execute(&mut *tx).await.map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            Ok(best)
        }
    }
}
