use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Auth;
use crate::comments::{self, CommentNode};
use crate::error::ApiError;
use crate::feed::{page_offset, FeedQuery, FeedSort};
use crate::models::*;
use crate::moderation::{authorize_moderation, authorize_post_action, ban_expiry, ModerationService, PostAction, Standing};
use crate::repo::{Repo, RepoError};

pub const MAX_PAGE_SIZE: usize = 100;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/communities")
                    .route(web::get().to(list_communities))
                    .route(web::post().to(create_community)),
            )
            .service(
                web::resource("/communities/{id}")
                    .route(web::get().to(get_community))
                    .route(web::patch().to(update_community)),
            )
            .service(
                web::resource("/communities/{id}/rules")
                    .route(web::get().to(list_rules))
                    .route(web::post().to(create_rule)),
            )
            .service(
                web::resource("/communities/{id}/rules/{rule_id}")
                    .route(web::put().to(update_rule))
                    .route(web::delete().to(delete_rule)),
            )
            .service(web::resource("/communities/{id}/members").route(web::get().to(list_members)))
            .service(
                web::resource("/communities/{id}/membership")
                    .route(web::get().to(get_standing))
                    .route(web::put().to(join_community))
                    .route(web::delete().to(leave_community)),
            )
            .service(
                web::resource("/communities/{id}/bans")
                    .route(web::get().to(list_bans))
                    .route(web::post().to(ban_user)),
            )
            .service(web::resource("/communities/{id}/bans/{user_id}").route(web::delete().to(unban_user)))
            .service(web::resource("/feed").route(web::get().to(list_feed)))
            .service(web::resource("/posts").route(web::post().to(create_post)))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/posts/{id}/pin").route(web::put().to(set_pinned)))
            .service(
                web::resource("/posts/{id}/comments")
                    .route(web::get().to(comment_tree))
                    .route(web::post().to(create_comment)),
            )
            .service(web::resource("/posts/{id}/comments/flat").route(web::get().to(comment_page)))
            .service(
                web::resource("/posts/{id}/save")
                    .route(web::get().to(saved_status))
                    .route(web::put().to(save_post))
                    .route(web::delete().to(unsave_post)),
            )
            .service(web::resource("/me/saved").route(web::get().to(list_saved)))
            .service(
                web::resource("/votes/{kind}/{id}")
                    .route(web::get().to(get_vote))
                    .route(web::post().to(cast_vote)),
            )
            .service(
                web::resource("/problems")
                    .route(web::get().to(list_problems))
                    .route(web::post().to(create_problem)),
            )
            .service(web::resource("/problems/{id}").route(web::get().to(get_problem)))
            .service(
                web::resource("/problems/{id}/solutions")
                    .route(web::get().to(list_solutions))
                    .route(web::post().to(create_solution)),
            )
            .service(web::resource("/problems/{id}/best").route(web::put().to(mark_best_solution))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub moderation: ModerationService<dyn Repo>,
    pub page_size: usize,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, page_size: usize) -> Self {
        let moderation = ModerationService::new(Arc::clone(&repo));
        Self { repo, moderation, page_size: page_size.clamp(1, MAX_PAGE_SIZE) }
    }

    fn window(&self, params: &PageParams) -> (usize, usize) {
        let limit = params.limit.unwrap_or(self.page_size).clamp(1, MAX_PAGE_SIZE);
        let offset = params.offset.unwrap_or_else(|| page_offset(params.page.unwrap_or(0), limit));
        (offset, limit)
    }

    /// Site admins moderate every community.
    async fn require_moderator(&self, auth: &Auth, community_id: Id) -> Result<Id, ApiError> {
        let user_id = auth.user_id()?;
        if !auth.is_admin() {
            authorize_moderation(self.moderation.role(community_id, user_id).await?)?;
        }
        Ok(user_id)
    }

    async fn require_member(&self, community_id: Id, user_id: Id) -> Result<(), ApiError> {
        match self.moderation.standing(community_id, user_id).await? {
            Standing::Member(_) => Ok(()),
            Standing::Banned { expired: false, .. } => Err(ApiError::Banned),
            _ => Err(ApiError::Forbidden),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<usize>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub community_id: Option<Id>,
    pub author_id: Option<Id>,
    #[serde(default)]
    pub sort: FeedSort,
    pub page: Option<usize>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl FeedParams {
    fn page_params(&self) -> PageParams {
        PageParams { page: self.page, offset: self.offset, limit: self.limit }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StandingView {
    pub status: String, // non_member | member | banned
    pub role: Option<CommunityRole>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

impl From<Standing> for StandingView {
    fn from(s: Standing) -> Self {
        match s {
            Standing::NonMember => Self { status: "non_member".into(), role: None, expires_at: None, expired: false },
            Standing::Member(role) => Self { status: "member".into(), role: Some(role), expires_at: None, expired: false },
            Standing::Banned { expires_at, expired } => Self { status: "banned".into(), role: None, expires_at, expired },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BanRequest {
    pub user_id: Id,
    pub reason: Option<String>,
    pub duration_days: Option<u32>, // None = permanent
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PinRequest {
    pub pinned: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VoteRequest {
    #[schema(value_type = i16)]
    pub vote_type: Polarity,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VoteStatus {
    #[schema(value_type = Option<i16>)]
    pub vote_type: Option<Polarity>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SavedStatus {
    pub saved: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BestSolutionRequest {
    pub solution_id: Id,
}

// ── communities ───────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/api/v1/communities",
    responses((status = 200, description = "List communities", body = [Community]))
)]
pub async fn list_communities(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_communities().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/communities",
    request_body = NewCommunity,
    responses(
        (status = 201, description = "Community created; the creator is its owner", body = Community),
        (status = 409, description = "Slug taken")
    )
)]
pub async fn create_community(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewCommunity>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.name.trim().is_empty() || new.slug.trim().is_empty() {
        return Err(ApiError::BadRequest("name and slug are required".into()));
    }
    let community = data.repo.create_community(auth.user_id()?, new).await?;
    log::info!("community {} created by {}", community.slug, community.created_by);
    Ok(HttpResponse::Created().json(community))
}

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}",
    params(("id" = Id, Path, description = "Community id")),
    responses(
        (status = 200, description = "Community", body = Community),
        (status = 404, description = "Community not found")
    )
)]
pub async fn get_community(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.get_community(path.into_inner()).await?))
}

#[utoipa::path(
    patch,
    path = "/api/v1/communities/{id}",
    params(("id" = Id, Path, description = "Community id")),
    request_body = CommunityUpdate,
    responses(
        (status = 200, description = "Settings saved", body = Community),
        (status = 400, description = "Blank name"),
        (status = 403, description = "Moderators only")
    )
)]
pub async fn update_community(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommunityUpdate>,
) -> Result<HttpResponse, ApiError> {
    let community_id = path.into_inner();
    let moderator = data.require_moderator(&auth, community_id).await?;
    let update = payload.into_inner();
    if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::BadRequest("name cannot be blank".into()));
    }
    let community = data.repo.update_community(community_id, update).await?;
    log::info!("community {} settings changed by {}", community.slug, moderator);
    Ok(HttpResponse::Ok().json(community))
}

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/rules",
    params(("id" = Id, Path, description = "Community id")),
    responses((status = 200, description = "Rules by number", body = [CommunityRule]))
)]
pub async fn list_rules(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_rules(path.into_inner()).await?))
}

fn check_rule(rule: &NewCommunityRule) -> Result<(), ApiError> {
    if rule.rule_number < 1 {
        return Err(ApiError::BadRequest("rule_number starts at 1".into()));
    }
    if rule.title.trim().is_empty() {
        return Err(ApiError::BadRequest("rule title is required".into()));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/rules",
    params(("id" = Id, Path, description = "Community id")),
    request_body = NewCommunityRule,
    responses(
        (status = 201, description = "Rule added", body = CommunityRule),
        (status = 403, description = "Moderators only"),
        (status = 409, description = "Rule number taken")
    )
)]
pub async fn create_rule(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewCommunityRule>,
) -> Result<HttpResponse, ApiError> {
    let community_id = path.into_inner();
    data.require_moderator(&auth, community_id).await?;
    let new = payload.into_inner();
    check_rule(&new)?;
    Ok(HttpResponse::Created().json(data.repo.create_rule(community_id, new).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/communities/{id}/rules/{rule_id}",
    params(("id" = Id, Path, description = "Community id"), ("rule_id" = Id, Path, description = "Rule id")),
    request_body = NewCommunityRule,
    responses(
        (status = 200, description = "Rule replaced", body = CommunityRule),
        (status = 403, description = "Moderators only"),
        (status = 404, description = "No such rule in this community"),
        (status = 409, description = "Rule number taken")
    )
)]
pub async fn update_rule(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    payload: web::Json<NewCommunityRule>,
) -> Result<HttpResponse, ApiError> {
    let (community_id, rule_id) = path.into_inner();
    data.require_moderator(&auth, community_id).await?;
    let edit = payload.into_inner();
    check_rule(&edit)?;
    Ok(HttpResponse::Ok().json(data.repo.update_rule(community_id, rule_id, edit).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/communities/{id}/rules/{rule_id}",
    params(("id" = Id, Path, description = "Community id"), ("rule_id" = Id, Path, description = "Rule id")),
    responses(
        (status = 204, description = "Rule removed"),
        (status = 403, description = "Moderators only"),
        (status = 404, description = "No such rule in this community")
    )
)]
pub async fn delete_rule(auth: Auth, data: web::Data<AppState>, path: web::Path<(Id, Id)>) -> Result<HttpResponse, ApiError> {
    let (community_id, rule_id) = path.into_inner();
    data.require_moderator(&auth, community_id).await?;
    data.repo.delete_rule(community_id, rule_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/members",
    params(("id" = Id, Path, description = "Community id")),
    responses((status = 200, description = "Members", body = [CommunityMembership]))
)]
pub async fn list_members(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_members(path.into_inner()).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/membership",
    params(("id" = Id, Path, description = "Community id")),
    responses((status = 200, description = "Caller's standing", body = StandingView))
)]
pub async fn get_standing(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let standing = data.moderation.standing(path.into_inner(), auth.user_id()?).await?;
    Ok(HttpResponse::Ok().json(StandingView::from(standing)))
}

#[utoipa::path(
    put,
    path = "/api/v1/communities/{id}/membership",
    params(("id" = Id, Path, description = "Community id")),
    responses(
        (status = 200, description = "Joined (or already a member)", body = StandingView),
        (status = 403, description = "Banned from this community"),
        (status = 404, description = "Community not found")
    )
)]
pub async fn join_community(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let community_id = path.into_inner();
    data.repo.get_community(community_id).await?;
    let standing = data.moderation.join(community_id, auth.user_id()?).await?;
    Ok(HttpResponse::Ok().json(StandingView::from(standing)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/communities/{id}/membership",
    params(("id" = Id, Path, description = "Community id")),
    responses((status = 204, description = "Left the community"))
)]
pub async fn leave_community(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    data.moderation.leave(path.into_inner(), auth.user_id()?).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/bans",
    params(("id" = Id, Path, description = "Community id")),
    responses(
        (status = 200, description = "Bans, newest first; expired ones included", body = [CommunityBan]),
        (status = 403, description = "Moderators only")
    )
)]
pub async fn list_bans(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let community_id = path.into_inner();
    data.require_moderator(&auth, community_id).await?;
    Ok(HttpResponse::Ok().json(data.moderation.list_bans(community_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/bans",
    params(("id" = Id, Path, description = "Community id")),
    request_body = BanRequest,
    responses(
        (status = 201, description = "User banned and removed from the community", body = CommunityBan),
        (status = 400, description = "Banning yourself, or a duration past the supported date range"),
        (status = 403, description = "Moderators only"),
        (status = 409, description = "User is already banned")
    )
)]
pub async fn ban_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<BanRequest>,
) -> Result<HttpResponse, ApiError> {
    let community_id = path.into_inner();
    let moderator = data.require_moderator(&auth, community_id).await?;
    let req = payload.into_inner();
    if req.user_id == moderator {
        return Err(ApiError::BadRequest("cannot ban yourself".into()));
    }
    let expires_at = ban_expiry(Utc::now(), req.duration_days)?;
    let ban = data.moderation.ban(community_id, req.user_id, moderator, req.reason, expires_at).await?;
    Ok(HttpResponse::Created().json(ban))
}

#[utoipa::path(
    delete,
    path = "/api/v1/communities/{id}/bans/{user_id}",
    params(("id" = Id, Path, description = "Community id"), ("user_id" = Id, Path, description = "Banned user")),
    responses((status = 204, description = "Ban lifted"), (status = 403, description = "Moderators only"))
)]
pub async fn unban_user(auth: Auth, data: web::Data<AppState>, path: web::Path<(Id, Id)>) -> Result<HttpResponse, ApiError> {
    let (community_id, user_id) = path.into_inner();
    data.require_moderator(&auth, community_id).await?;
    data.moderation.unban(community_id, user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ── posts ─────────────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/api/v1/feed",
    params(
        ("community_id" = Option<Id>, Query, description = "Only this community"),
        ("author_id" = Option<Id>, Query, description = "Only this author"),
        ("sort" = Option<String>, Query, description = "hot | new | top"),
        ("page" = Option<usize>, Query, description = "Zero-based page"),
        ("offset" = Option<usize>, Query, description = "Row offset; overrides page"),
        ("limit" = Option<usize>, Query, description = "Page size")
    ),
    responses((status = 200, description = "One page of posts", body = [Post]))
)]
pub async fn list_feed(data: web::Data<AppState>, query: web::Query<FeedParams>) -> Result<HttpResponse, ApiError> {
    let params = query.into_inner();
    let (offset, limit) = data.window(&params.page_params());
    let feed = FeedQuery { community_id: params.community_id, author_id: params.author_id, sort: params.sort };
    Ok(HttpResponse::Ok().json(data.repo.list_posts(&feed, offset, limit).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 403, description = "Not a member, or banned"),
        (status = 404, description = "Community not found")
    )
)]
pub async fn create_post(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewPost>) -> Result<HttpResponse, ApiError> {
    let user_id = auth.user_id()?;
    let new = payload.into_inner();
    if new.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }
    if new.post_type == PostType::Link && new.link_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
        return Err(ApiError::BadRequest("link posts need a link_url".into()));
    }
    data.repo.get_community(new.community_id).await?;
    data.require_member(new.community_id, user_id).await?;
    let post = data.repo.create_post(user_id, new).await?;
    Ok(HttpResponse::Created().json(post))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Post", body = Post), (status = 404, description = "Post not found"))
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.get_post(path.into_inner()).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 204, description = "Post deleted with its comments"),
        (status = 403, description = "Owners and moderators only"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    authorize_post(&data, &auth, &post, PostAction::Delete).await?;
    data.repo.delete_post(post.id).await?;
    log::info!("post {} deleted from community {}", post.id, post.community_id);
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    put,
    path = "/api/v1/posts/{id}/pin",
    params(("id" = Id, Path, description = "Post id")),
    request_body = PinRequest,
    responses(
        (status = 200, description = "Updated post", body = Post),
        (status = 403, description = "Owners and moderators only")
    )
)]
pub async fn set_pinned(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<PinRequest>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    authorize_post(&data, &auth, &post, PostAction::TogglePin).await?;
    let updated = data.repo.set_pinned(post.id, payload.pinned).await?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn authorize_post(data: &AppState, auth: &Auth, post: &Post, action: PostAction) -> Result<(), ApiError> {
    if auth.is_admin() {
        return Ok(());
    }
    let role = data.moderation.role(post.community_id, auth.user_id()?).await?;
    Ok(authorize_post_action(role, action)?)
}

// ── comments ──────────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/comments",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Comment forest in arrival order", body = [CommentNode]))
)]
pub async fn comment_tree(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let post_id = path.into_inner();
    data.repo.get_post(post_id).await?;
    let forest = comments::build(data.repo.list_comments(post_id).await?);
    Ok(HttpResponse::Ok().json(forest))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/comments/flat",
    params(
        ("id" = Id, Path, description = "Post id"),
        ("page" = Option<usize>, Query, description = "Zero-based page"),
        ("limit" = Option<usize>, Query, description = "Page size")
    ),
    responses((status = 200, description = "One page of comments, oldest first", body = [Comment]))
)]
pub async fn comment_page(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let (offset, limit) = data.window(&query);
    Ok(HttpResponse::Ok().json(data.repo.list_comments_page(path.into_inner(), offset, limit).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/comments",
    params(("id" = Id, Path, description = "Post id")),
    request_body = NewComment,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Empty comment or reply too deep"),
        (status = 403, description = "Not a member, or banned"),
        (status = 404, description = "Post or parent comment not found")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let user_id = auth.user_id()?;
    let post = data.repo.get_post(path.into_inner()).await?;
    let new = payload.into_inner();
    if new.content.trim().is_empty() {
        return Err(ApiError::BadRequest("comment is empty".into()));
    }
    data.require_member(post.community_id, user_id).await?;
    if let Some(parent_id) = new.parent_id {
        let forest = comments::build(data.repo.list_comments(post.id).await?);
        let depth = comments::flatten(&forest)
            .into_iter()
            .find(|f| f.comment.id == parent_id)
            .map(|f| f.depth)
            .ok_or(ApiError::NotFound)?;
        if !comments::can_reply(depth) {
            return Err(ApiError::BadRequest("replies are limited to three levels".into()));
        }
    }
    let comment = data.repo.create_comment(post.id, user_id, new).await?;
    Ok(HttpResponse::Created().json(comment))
}

// ── saved posts ───────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/save",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Whether the caller saved the post", body = SavedStatus))
)]
pub async fn saved_status(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let saved = data.repo.is_saved(auth.user_id()?, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(SavedStatus { saved }))
}

#[utoipa::path(
    put,
    path = "/api/v1/posts/{id}/save",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Saved; saving twice is not an error", body = SavedStatus))
)]
pub async fn save_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    match data.repo.save_post(auth.user_id()?, path.into_inner()).await {
        Ok(_) | Err(RepoError::Conflict) => Ok(HttpResponse::Ok().json(SavedStatus { saved: true })),
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{id}/save",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Unsaved", body = SavedStatus))
)]
pub async fn unsave_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    data.repo.unsave_post(auth.user_id()?, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(SavedStatus { saved: false }))
}

#[utoipa::path(
    get,
    path = "/api/v1/me/saved",
    params(
        ("page" = Option<usize>, Query, description = "Zero-based page"),
        ("offset" = Option<usize>, Query, description = "Row offset; overrides page"),
        ("limit" = Option<usize>, Query, description = "Page size")
    ),
    responses((status = 200, description = "Saved posts, most recent first", body = [Post]))
)]
pub async fn list_saved(auth: Auth, data: web::Data<AppState>, query: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    let (offset, limit) = data.window(&query);
    Ok(HttpResponse::Ok().json(data.repo.list_saved(auth.user_id()?, offset, limit).await?))
}

// ── votes ─────────────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/api/v1/votes/{kind}/{id}",
    params(("kind" = String, Path, description = "post | comment | solution"), ("id" = Id, Path, description = "Subject id")),
    responses((status = 200, description = "Caller's current vote", body = VoteStatus))
)]
pub async fn get_vote(auth: Auth, data: web::Data<AppState>, path: web::Path<(SubjectKind, Id)>) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let vote_type = data.repo.user_vote(SubjectRef { kind, id }, auth.user_id()?).await?;
    Ok(HttpResponse::Ok().json(VoteStatus { vote_type }))
}

#[utoipa::path(
    post,
    path = "/api/v1/votes/{kind}/{id}",
    params(("kind" = String, Path, description = "post | comment | solution"), ("id" = Id, Path, description = "Subject id")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote cast, flipped or retracted; the new tally", body = VoteOutcome),
        (status = 404, description = "Subject not found")
    )
)]
pub async fn cast_vote(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(SubjectKind, Id)>,
    payload: web::Json<VoteRequest>,
) -> Result<HttpResponse, ApiError> {
    let (kind, id) = path.into_inner();
    let outcome = data.repo.apply_vote(SubjectRef { kind, id }, auth.user_id()?, payload.vote_type).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

// ── problems ──────────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/api/v1/problems",
    params(("page" = Option<usize>, Query, description = "Zero-based page"), ("limit" = Option<usize>, Query, description = "Page size")),
    responses((status = 200, description = "Problems, newest first", body = [Problem]))
)]
pub async fn list_problems(data: web::Data<AppState>, query: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    let (offset, limit) = data.window(&query);
    Ok(HttpResponse::Ok().json(data.repo.list_problems(offset, limit).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/problems",
    request_body = NewProblem,
    responses((status = 201, description = "Problem posted", body = Problem))
)]
pub async fn create_problem(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewProblem>) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.title.trim().is_empty() || new.description.trim().is_empty() {
        return Err(ApiError::BadRequest("title and description are required".into()));
    }
    Ok(HttpResponse::Created().json(data.repo.create_problem(auth.user_id()?, new).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/problems/{id}",
    params(("id" = Id, Path, description = "Problem id")),
    responses((status = 200, description = "Problem", body = Problem), (status = 404, description = "Problem not found"))
)]
pub async fn get_problem(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.get_problem(path.into_inner()).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/problems/{id}/solutions",
    params(("id" = Id, Path, description = "Problem id")),
    responses((status = 200, description = "Best solution first, then by upvotes", body = [Solution]))
)]
pub async fn list_solutions(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_solutions(path.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/problems/{id}/solutions",
    params(("id" = Id, Path, description = "Problem id")),
    request_body = NewSolution,
    responses((status = 201, description = "Solution posted", body = Solution), (status = 404, description = "Problem not found"))
)]
pub async fn create_solution(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewSolution>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.content.trim().is_empty() {
        return Err(ApiError::BadRequest("solution is empty".into()));
    }
    let solution = data.repo.create_solution(path.into_inner(), auth.user_id()?, new).await?;
    Ok(HttpResponse::Created().json(solution))
}

#[utoipa::path(
    put,
    path = "/api/v1/problems/{id}/best",
    params(("id" = Id, Path, description = "Problem id")),
    request_body = BestSolutionRequest,
    responses(
        (status = 200, description = "Marked best; the problem is now solved", body = Solution),
        (status = 403, description = "Only the problem's author may choose"),
        (status = 404, description = "Problem or solution not found")
    )
)]
pub async fn mark_best_solution(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<BestSolutionRequest>,
) -> Result<HttpResponse, ApiError> {
    let problem = data.repo.get_problem(path.into_inner()).await?;
    if problem.user_id != auth.user_id()? {
        return Err(ApiError::Forbidden);
    }
    let best = data.repo.mark_best_solution(problem.id, payload.solution_id).await?;
    Ok(HttpResponse::Ok().json(best))
}
