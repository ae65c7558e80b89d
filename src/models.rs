use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Postgres BIGSERIAL everywhere, user ids included (JWT `sub`)
pub type Id = i64;

/// Sign of a vote. Travels as the integer `vote_type` (+1 / -1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum Polarity {
    Up,
    Down,
}

impl TryFrom<i16> for Polarity {
    type Error = String;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Polarity::Up),
            -1 => Ok(Polarity::Down),
            other => Err(format!("vote_type must be 1 or -1, got {other}")),
        }
    }
}

impl From<Polarity> for i16 {
    fn from(p: Polarity) -> i16 {
        match p {
            Polarity::Up => 1,
            Polarity::Down => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Post,
    Comment,
    Solution,
}

impl SubjectKind {
    /// Solutions can only be upvoted.
    pub fn supports_downvotes(self) -> bool {
        !matches!(self, SubjectKind::Solution)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Post => "post",
            SubjectKind::Comment => "comment",
            SubjectKind::Solution => "solution",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity a vote is cast on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct SubjectRef {
    pub kind: SubjectKind,
    pub id: Id,
}

impl SubjectRef {
    pub fn post(id: Id) -> Self { Self { kind: SubjectKind::Post, id } }
    pub fn comment(id: Id) -> Self { Self { kind: SubjectKind::Comment, id } }
    pub fn solution(id: Id) -> Self { Self { kind: SubjectKind::Solution, id } }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Aggregate vote counters of a subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Tally {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl Tally {
    pub fn new(upvotes: i64, downvotes: i64) -> Self {
        Self { upvotes, downvotes }
    }

    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

/// One stored vote row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub subject: SubjectRef,
    pub user_id: Id,
    pub polarity: Polarity,
}

/// Anything carrying vote counters.
pub trait Votable {
    const KIND: SubjectKind;
    fn tally(&self) -> Tally;
    fn set_tally(&mut self, tally: Tally);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "community_type", rename_all = "snake_case")]
pub enum CommunityType {
    General,
    StudyHelp,
    Interest,
    Gaming,
    Tech,
    Creative,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Community {
    pub id: Id,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub community_type: CommunityType,
    pub is_private: bool,
    pub created_by: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCommunity {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub community_type: CommunityType,
    #[serde(default)]
    pub is_private: bool,
}

/// Settings edit; absent fields keep their value. The slug never changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CommunityUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub community_type: Option<CommunityType>,
    pub is_private: Option<bool>,
}

impl CommunityUpdate {
    pub fn apply_to(self, c: &mut Community) {
        if let Some(name) = self.name { c.name = name; }
        if let Some(description) = self.description { c.description = Some(description); }
        if let Some(t) = self.community_type { c.community_type = t; }
        if let Some(p) = self.is_private { c.is_private = p; }
    }
}

/// Numbered rule shown on a community page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct CommunityRule {
    pub id: Id,
    pub community_id: Id,
    pub rule_number: i32,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Body of both rule create and rule edit.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCommunityRule {
    pub rule_number: i32,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "post_type", rename_all = "snake_case")]
pub enum PostType {
    Discussion,
    Question,
    Announcement,
    Link,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub community_id: Id,
    pub user_id: Id,
    pub title: String,
    pub content: Option<String>,
    pub post_type: PostType,
    pub link_url: Option<String>,
    pub upvotes: i64,
    pub downvotes: i64,
    pub comment_count: i64,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
}

impl Votable for Post {
    const KIND: SubjectKind = SubjectKind::Post;
    fn tally(&self) -> Tally { Tally::new(self.upvotes, self.downvotes) }
    fn set_tally(&mut self, tally: Tally) {
        self.upvotes = tally.upvotes;
        self.downvotes = tally.downvotes;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub community_id: Id,
    pub title: String,
    pub content: Option<String>,
    pub post_type: PostType,
    pub link_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub parent_id: Option<Id>, // same-post reply target
    pub user_id: Id,
    pub content: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub created_at: DateTime<Utc>,
}

impl Votable for Comment {
    const KIND: SubjectKind = SubjectKind::Comment;
    fn tally(&self) -> Tally { Tally::new(self.upvotes, self.downvotes) }
    fn set_tally(&mut self, tally: Tally) {
        self.upvotes = tally.upvotes;
        self.downvotes = tally.downvotes;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub content: String,
    pub parent_id: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "difficulty", rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "problem_status", rename_all = "lowercase")]
pub enum ProblemStatus {
    Open,
    Solved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Problem {
    pub id: Id,
    pub user_id: Id,
    pub title: String,
    pub description: String,
    pub subject: Option<String>, // academic subject, e.g. "Calculus"
    pub difficulty: Difficulty,
    pub status: ProblemStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewProblem {
    pub title: String,
    pub description: String,
    pub subject: Option<String>,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Solution {
    pub id: Id,
    pub problem_id: Id,
    pub user_id: Id,
    pub content: String,
    pub upvotes: i64,
    pub is_best_solution: bool,
    pub created_at: DateTime<Utc>,
}

impl Votable for Solution {
    const KIND: SubjectKind = SubjectKind::Solution;
    fn tally(&self) -> Tally { Tally::new(self.upvotes, 0) }
    fn set_tally(&mut self, tally: Tally) {
        self.upvotes = tally.upvotes;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewSolution {
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "community_role", rename_all = "lowercase")]
pub enum CommunityRole {
    Owner,
    Moderator,
    Member,
}

impl CommunityRole {
    pub fn can_moderate(self) -> bool {
        matches!(self, CommunityRole::Owner | CommunityRole::Moderator)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct CommunityMembership {
    pub id: Id,
    pub community_id: Id,
    pub user_id: Id,
    pub role: CommunityRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct CommunityBan {
    pub id: Id,
    pub community_id: Id,
    pub user_id: Id,
    pub banned_by: Id,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>, // None = permanent
    pub created_at: DateTime<Utc>,
}

impl CommunityBan {
    /// Expired bans stay in storage until an explicit unban.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(at) => at > now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NewBan {
    pub community_id: Id,
    pub user_id: Id,
    pub banned_by: Id,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct SavedPost {
    pub id: Id,
    pub user_id: Id,
    pub post_id: Id,
    pub created_at: DateTime<Utc>,
}

/// Result of a vote as seen by the voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VoteOutcome {
    pub tally: Tally,
    #[schema(value_type = Option<i16>)]
    pub polarity: Option<Polarity>, // None once retracted
}

/// One slice of a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// A full page may be followed by more; a short page is terminal.
    pub fn from_items(items: Vec<T>, page_size: usize) -> Self {
        let has_more = page_size > 0 && items.len() == page_size;
        Self { items, has_more }
    }
}
