use crate::comments::CommentNode;
use crate::feed::FeedSort;
use crate::models::{
    Comment, Community, CommunityBan, CommunityMembership, CommunityRole, CommunityRule, CommunityType, CommunityUpdate,
    Difficulty, NewComment, NewCommunity, NewCommunityRule, NewPost, NewProblem, NewSolution, Post, PostType, Problem,
    ProblemStatus, Solution, SubjectKind, Tally, VoteOutcome,
};
use crate::routes::{BanRequest, BestSolutionRequest, PinRequest, SavedStatus, StandingView, VoteRequest, VoteStatus};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_communities,
        crate::routes::create_community,
        crate::routes::get_community,
        crate::routes::update_community,
        crate::routes::list_rules,
        crate::routes::create_rule,
        crate::routes::update_rule,
        crate::routes::delete_rule,
        crate::routes::list_members,
        crate::routes::get_standing,
        crate::routes::join_community,
        crate::routes::leave_community,
        crate::routes::list_bans,
        crate::routes::ban_user,
        crate::routes::unban_user,
        crate::routes::list_feed,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::delete_post,
        crate::routes::set_pinned,
        crate::routes::comment_tree,
        crate::routes::comment_page,
        crate::routes::create_comment,
        crate::routes::saved_status,
        crate::routes::save_post,
        crate::routes::unsave_post,
        crate::routes::list_saved,
        crate::routes::get_vote,
        crate::routes::cast_vote,
        crate::routes::list_problems,
        crate::routes::create_problem,
        crate::routes::get_problem,
        crate::routes::list_solutions,
        crate::routes::create_solution,
        crate::routes::mark_best_solution,
    ),
    components(schemas(
        Community, NewCommunity, CommunityUpdate, CommunityRule, NewCommunityRule, CommunityType, CommunityMembership, CommunityRole, CommunityBan,
        Post, NewPost, PostType, Comment, NewComment, CommentNode,
        Problem, NewProblem, Difficulty, ProblemStatus, Solution, NewSolution,
        SubjectKind, Tally, VoteOutcome, FeedSort,
        StandingView, BanRequest, PinRequest, VoteRequest, VoteStatus, SavedStatus, BestSolutionRequest
    )),
    tags(
        (name = "communities", description = "Communities, membership and bans"),
        (name = "posts", description = "Posts, feeds and bookmarks"),
        (name = "comments", description = "Threaded comments"),
        (name = "votes", description = "Votes on posts, comments and solutions"),
        (name = "problems", description = "Problems and solutions"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_vote_route() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/votes/{kind}/{id}"));
        assert!(doc.paths.paths.contains_key("/api/v1/communities/{id}/bans"));
        assert!(doc.paths.paths.contains_key("/api/v1/communities/{id}/rules/{rule_id}"));
    }
}
