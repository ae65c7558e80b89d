//! Community membership and ban lifecycle, plus post-level moderation.
//!
//! Transitions are planned here as a list of row effects and executed by
//! [`ModerationService`] against the store. Authorization of the acting user
//! happens before a plan is requested; the planner only checks that the
//! transition itself is legal.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::models::{CommunityBan, CommunityMembership, CommunityRole, Id, NewBan};
use crate::repo::{MembershipRepo, RepoError};

/// Where a user stands in one community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Standing {
    NonMember,
    Member(CommunityRole),
    Banned { expires_at: Option<DateTime<Utc>>, expired: bool },
}

impl Standing {
    /// A membership row outranks an expired ban; an active ban outranks everything.
    pub fn of(membership: Option<&CommunityMembership>, ban: Option<&CommunityBan>, now: DateTime<Utc>) -> Self {
        match (membership, ban) {
            (_, Some(b)) if b.is_active_at(now) => Standing::Banned { expires_at: b.expires_at, expired: false },
            (Some(m), _) => Standing::Member(m.role),
            (None, Some(b)) => Standing::Banned { expires_at: b.expires_at, expired: true },
            (None, None) => Standing::NonMember,
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, Standing::Member(_))
    }

    pub fn can_moderate(&self) -> bool {
        matches!(self, Standing::Member(role) if role.can_moderate())
    }

    pub fn role(&self) -> Option<CommunityRole> {
        match self {
            Standing::Member(role) => Some(*role),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    InsertMembership { community_id: Id, user_id: Id, role: CommunityRole },
    DeleteMembership { community_id: Id, user_id: Id },
    InsertBan(NewBan),
    DeleteBan { community_id: Id, user_id: Id },
}

/// Ordered row changes for one transition. Empty means nothing to do.
pub type Plan = Vec<Effect>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModerationError {
    #[error("user is banned from this community")]
    Banned,
    #[error("user is already banned")]
    AlreadyBanned,
    #[error("only owners and moderators may do that")]
    InsufficientRole,
    #[error("ban duration out of range")]
    DurationOutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    TogglePin,
    Delete,
}

/// Current rows for one (community, user) pair.
#[derive(Debug, Clone, Default)]
pub struct MemberRecord {
    pub community_id: Id,
    pub user_id: Id,
    pub membership: Option<CommunityMembership>,
    pub ban: Option<CommunityBan>,
}

impl MemberRecord {
    pub fn standing(&self, now: DateTime<Utc>) -> Standing {
        Standing::of(self.membership.as_ref(), self.ban.as_ref(), now)
    }

    pub fn join(&self, now: DateTime<Utc>) -> Result<Plan, ModerationError> {
        match self.standing(now) {
            Standing::Banned { expired: false, .. } => Err(ModerationError::Banned),
            Standing::Member(_) => Ok(Vec::new()),
            Standing::NonMember | Standing::Banned { expired: true, .. } => Ok(vec![Effect::InsertMembership {
                community_id: self.community_id,
                user_id: self.user_id,
                role: CommunityRole::Member,
            }]),
        }
    }

    /// Owners leave like anyone else; nothing hands the community to someone else.
    pub fn leave(&self) -> Plan {
        match &self.membership {
            None => Vec::new(),
            Some(m) => {
                if m.role == CommunityRole::Owner {
                    warn!(community_id = self.community_id, user_id = self.user_id, "owner left community; it has no owner now");
                }
                vec![Effect::DeleteMembership { community_id: self.community_id, user_id: self.user_id }]
            }
        }
    }

    pub fn ban(
        &self,
        banned_by: Id,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Plan, ModerationError> {
        if self.ban.is_some() {
            return Err(ModerationError::AlreadyBanned);
        }
        let mut plan = Vec::with_capacity(2);
        if self.membership.is_some() {
            plan.push(Effect::DeleteMembership { community_id: self.community_id, user_id: self.user_id });
        }
        plan.push(Effect::InsertBan(NewBan {
            community_id: self.community_id,
            user_id: self.user_id,
            banned_by,
            reason: reason.filter(|r| !r.trim().is_empty()),
            expires_at,
        }));
        Ok(plan)
    }

    pub fn unban(&self) -> Plan {
        match self.ban {
            Some(_) => vec![Effect::DeleteBan { community_id: self.community_id, user_id: self.user_id }],
            None => Vec::new(),
        }
    }
}

/// Bans and post actions are reserved for owners and moderators.
pub fn authorize_moderation(role: Option<CommunityRole>) -> Result<(), ModerationError> {
    match role {
        Some(r) if r.can_moderate() => Ok(()),
        _ => Err(ModerationError::InsufficientRole),
    }
}

pub fn authorize_post_action(role: Option<CommunityRole>, action: PostAction) -> Result<(), ModerationError> {
    authorize_moderation(role).map_err(|e| {
        tracing::debug!(?action, "post action refused");
        e
    })
}

/// `None` days means a permanent ban.
pub fn ban_expiry(now: DateTime<Utc>, days: Option<u32>) -> Result<Option<DateTime<Utc>>, ModerationError> {
    let Some(days) = days else { return Ok(None) };
    Duration::try_days(i64::from(days))
        .and_then(|d| now.checked_add_signed(d))
        .map(Some)
        .ok_or(ModerationError::DurationOutOfRange)
}

#[derive(Debug, thiserror::Error)]
pub enum ModerationFailure {
    #[error(transparent)]
    Rejected(#[from] ModerationError),
    #[error(transparent)]
    Store(#[from] RepoError),
}

/// Loads member records and executes plans against the store.
pub struct ModerationService<R: ?Sized> {
    repo: Arc<R>,
}

impl<R: ?Sized> Clone for ModerationService<R> {
    fn clone(&self) -> Self {
        Self { repo: Arc::clone(&self.repo) }
    }
}

impl<R: MembershipRepo + ?Sized> ModerationService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn role(&self, community_id: Id, user_id: Id) -> Result<Option<CommunityRole>, RepoError> {
        Ok(self.record(community_id, user_id).await?.standing(Utc::now()).role())
    }

    pub async fn list_bans(&self, community_id: Id) -> Result<Vec<CommunityBan>, RepoError> {
        self.repo.list_bans(community_id).await
    }

    pub async fn record(&self, community_id: Id, user_id: Id) -> Result<MemberRecord, RepoError> {
        let membership = self.repo.get_membership(community_id, user_id).await?;
        let ban = self.repo.get_ban(community_id, user_id).await?;
        Ok(MemberRecord { community_id, user_id, membership, ban })
    }

    pub async fn standing(&self, community_id: Id, user_id: Id) -> Result<Standing, RepoError> {
        Ok(self.record(community_id, user_id).await?.standing(Utc::now()))
    }

    pub async fn join(&self, community_id: Id, user_id: Id) -> Result<Standing, ModerationFailure> {
        let now = Utc::now();
        let record = self.record(community_id, user_id).await?;
        let plan = record.join(now)?;
        self.execute(plan).await?;
        Ok(self.record(community_id, user_id).await?.standing(now))
    }

    pub async fn leave(&self, community_id: Id, user_id: Id) -> Result<(), ModerationFailure> {
        let record = self.record(community_id, user_id).await?;
        self.execute(record.leave()).await?;
        Ok(())
    }

    pub async fn ban(
        &self,
        community_id: Id,
        user_id: Id,
        banned_by: Id,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CommunityBan, ModerationFailure> {
        let record = self.record(community_id, user_id).await?;
        let plan = record.ban(banned_by, reason, expires_at)?;
        self.execute(plan).await?;
        info!(community_id, user_id, banned_by, "user banned");
        self.repo
            .get_ban(community_id, user_id)
            .await?
            .ok_or(ModerationFailure::Store(RepoError::NotFound))
    }

    pub async fn unban(&self, community_id: Id, user_id: Id) -> Result<(), ModerationFailure> {
        let record = self.record(community_id, user_id).await?;
        self.execute(record.unban()).await?;
        Ok(())
    }

    async fn execute(&self, plan: Plan) -> Result<(), ModerationFailure> {
        for effect in plan {
            match effect {
                Effect::InsertMembership { community_id, user_id, role } => {
                    match self.repo.insert_membership(community_id, user_id, role).await {
                        // someone else's request got there first
                        Ok(_) | Err(RepoError::Conflict) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Effect::DeleteMembership { community_id, user_id } => {
                    self.repo.delete_membership(community_id, user_id).await?;
                }
                Effect::InsertBan(new) => match self.repo.insert_ban(new).await {
                    Ok(_) => {}
                    // a racing ban won; the membership removed above stays removed, the user is banned either way
                    Err(RepoError::Conflict) => return Err(ModerationError::AlreadyBanned.into()),
                    Err(e) => return Err(e.into()),
                },
                Effect::DeleteBan { community_id, user_id } => {
                    self.repo.delete_ban(community_id, user_id).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn ban(expires_at: Option<DateTime<Utc>>) -> CommunityBan {
        CommunityBan {
            id: 1,
            community_id: 10,
            user_id: 20,
            banned_by: 30,
            reason: None,
            expires_at,
            created_at: now() - Duration::days(10),
        }
    }

    fn membership(role: CommunityRole) -> CommunityMembership {
        CommunityMembership { id: 1, community_id: 10, user_id: 20, role, joined_at: now() - Duration::days(30) }
    }

    fn record(membership: Option<CommunityMembership>, ban: Option<CommunityBan>) -> MemberRecord {
        MemberRecord { community_id: 10, user_id: 20, membership, ban }
    }

    #[test]
    fn permanent_ban_blocks_join() {
        let r = record(None, Some(ban(None)));
        assert_eq!(r.join(now()), Err(ModerationError::Banned));
    }

    #[test]
    fn expired_ban_allows_join_and_keeps_row() {
        let r = record(None, Some(ban(Some(now() - Duration::days(1)))));
        assert_eq!(r.standing(now()), Standing::Banned { expires_at: Some(now() - Duration::days(1)), expired: true });
        let plan = r.join(now()).unwrap();
        assert_eq!(
            plan,
            vec![Effect::InsertMembership { community_id: 10, user_id: 20, role: CommunityRole::Member }]
        );
    }

    #[test]
    fn future_expiry_still_blocks() {
        let r = record(None, Some(ban(Some(now() + Duration::hours(1)))));
        assert_eq!(r.join(now()), Err(ModerationError::Banned));
    }

    #[test]
    fn join_twice_is_absorbed() {
        let r = record(Some(membership(CommunityRole::Member)), None);
        assert_eq!(r.join(now()), Ok(vec![]));
    }

    #[test]
    fn ban_removes_membership_first() {
        let r = record(Some(membership(CommunityRole::Moderator)), None);
        let plan = r.ban(30, Some("spam".into()), None).unwrap();
        assert!(matches!(plan[0], Effect::DeleteMembership { community_id: 10, user_id: 20 }));
        assert!(matches!(&plan[1], Effect::InsertBan(b) if b.reason.as_deref() == Some("spam")));
    }

    #[test]
    fn second_ban_is_reported() {
        let expired = record(None, Some(ban(Some(now() - Duration::days(1)))));
        assert_eq!(expired.ban(30, None, None), Err(ModerationError::AlreadyBanned));
    }

    #[test]
    fn owner_may_leave() {
        let r = record(Some(membership(CommunityRole::Owner)), None);
        assert_eq!(r.leave(), vec![Effect::DeleteMembership { community_id: 10, user_id: 20 }]);
        assert!(record(None, None).leave().is_empty());
    }

    #[test]
    fn unban_without_ban_is_empty() {
        assert!(record(None, None).unban().is_empty());
        assert_eq!(record(None, Some(ban(None))).unban().len(), 1);
    }

    #[test]
    fn post_actions_need_moderator() {
        assert!(authorize_post_action(Some(CommunityRole::Owner), PostAction::Delete).is_ok());
        assert!(authorize_post_action(Some(CommunityRole::Moderator), PostAction::TogglePin).is_ok());
        assert_eq!(
            authorize_post_action(Some(CommunityRole::Member), PostAction::TogglePin),
            Err(ModerationError::InsufficientRole)
        );
        assert_eq!(authorize_post_action(None, PostAction::Delete), Err(ModerationError::InsufficientRole));
    }

    #[test]
    fn active_ban_outranks_stale_membership() {
        let r = record(Some(membership(CommunityRole::Member)), Some(ban(None)));
        assert!(matches!(r.standing(now()), Standing::Banned { expired: false, .. }));
    }

    #[test]
    fn ban_expiry_in_days() {
        assert_eq!(ban_expiry(now(), None), Ok(None));
        assert_eq!(ban_expiry(now(), Some(7)), Ok(Some(now() + Duration::days(7))));
        assert_eq!(ban_expiry(now(), Some(u32::MAX)), Err(ModerationError::DurationOutOfRange));
    }

    #[cfg(feature = "inmem-store")]
    #[tokio::test]
    async fn racing_ban_leaves_user_banned_without_membership() {
        use crate::models::{CommunityType, NewCommunity};
        use crate::repo::inmem::InMemRepo;
        use crate::repo::CommunityRepo;

        let repo = Arc::new(InMemRepo::ephemeral());
        let c = repo
            .create_community(1, NewCommunity {
                name: "Chem".into(),
                slug: "chem".into(),
                description: None,
                community_type: CommunityType::General,
                is_private: false,
            })
            .await
            .unwrap();
        repo.insert_membership(c.id, 2, CommunityRole::Member).await.unwrap();
        let service = ModerationService::new(Arc::clone(&repo));

        // plan while unbanned, then let another moderator's ban land first
        let plan = service.record(c.id, 2).await.unwrap().ban(1, None, None).unwrap();
        repo.insert_ban(NewBan { community_id: c.id, user_id: 2, banned_by: 3, reason: None, expires_at: None })
            .await
            .unwrap();

        let err = service.execute(plan).await.unwrap_err();
        assert!(matches!(err, ModerationFailure::Rejected(ModerationError::AlreadyBanned)));
        assert!(repo.get_membership(c.id, 2).await.unwrap().is_none());
        assert!(matches!(service.standing(c.id, 2).await.unwrap(), Standing::Banned { expired: false, .. }));
    }
}
