use crate::models::{
    BlogAuthor, BlogPost, Category, Comment, NewBlogAuthor, NewBlogPost, NewCategory, NewComment,
    NewProject, NewRewardItem, NewTag, NewThread, Project, ProjectMember, ProjectStatus, Purchase,
    RewardItem, Tag, Thread, UpdateBlogPost, User, UserReward, Vote, VoteOutcome,
};
use crate::reputation::VoteTally;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::get_user_profile,
        crate::routes::update_user_profile,
        crate::routes::list_categories,
        crate::routes::list_tags,
        crate::routes::list_threads,
        crate::routes::get_thread,
        crate::routes::create_thread,
        crate::routes::create_comment,
        crate::routes::search_threads,
        crate::routes::cast_vote,
        crate::routes::retract_vote,
        crate::routes::list_rewards,
        crate::routes::purchase_reward,
        crate::routes::list_blog_posts,
        crate::routes::create_blog_post,
        crate::routes::list_projects,
        crate::routes::create_project,
        crate::routes::join_project,
        crate::routes::refresh_token,
        crate::routes::list_user_rewards,
        crate::routes::set_user_admin,
        crate::routes::get_category,
        crate::routes::create_category,
        crate::routes::create_tag,
        crate::routes::create_reward,
        crate::routes::get_blog_post,
        crate::routes::update_blog_post,
        crate::routes::list_blog_authors,
        crate::routes::check_blog_author,
        crate::routes::add_blog_author,
        crate::routes::remove_blog_author,
    ),
    components(schemas(
        User, Category, NewCategory, Tag, NewTag, Thread, NewThread, Comment, NewComment,
        Vote, VoteOutcome, VoteTally, RewardItem, NewRewardItem, UserReward, Purchase,
        BlogPost, NewBlogPost, UpdateBlogPost, BlogAuthor, NewBlogAuthor,
        Project, NewProject, ProjectStatus, ProjectMember,
        crate::routes::AuthResponse, crate::routes::RegisterRequest, crate::routes::LoginRequest,
        crate::routes::UpdateProfileRequest, crate::routes::UserProfile, crate::routes::UserThread,
        crate::routes::ThreadSummary, crate::routes::ThreadDetail, crate::routes::CommentView,
        crate::routes::VoteRequest, crate::routes::RetractVoteRequest,
        crate::routes::PurchaseRequest, crate::routes::PurchaseResponse,
        crate::routes::BlogPostView, crate::routes::BlogAuthorView, crate::routes::ProjectView,
        crate::routes::SetAdminRequest
    )),
    tags(
        (name = "threads", description = "Forum threads and comments"),
        (name = "votes", description = "Voting and reputation"),
        (name = "rewards", description = "Reputation-funded rewards"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_routed_api_path_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/auth/refresh",
            "/api/users/{id}/rewards",
            "/api/admin/users/{id}/admin",
            "/api/categories/{id}",
            "/api/blog/{slug}",
            "/api/blog/{id}",
            "/api/blog/authors",
            "/api/blog/authors/{user_id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing from /docs");
        }
        let authors = &doc.paths.paths["/api/blog/authors/{user_id}"];
        assert!(authors.operations.len() >= 2);
    }
}
