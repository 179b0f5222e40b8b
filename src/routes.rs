use std::sync::Arc;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{self, Auth};
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{Repo, RepoError};
use crate::reputation::{VoteTarget, VoteValue};
use crate::telemetry;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .app_data(web::JsonConfig::default().error_handler(|err, _| ApiError::bad_request(err.to_string()).into()))
            .app_data(web::QueryConfig::default().error_handler(|err, _| ApiError::bad_request(err.to_string()).into()))
            .app_data(web::PathConfig::default().error_handler(|err, _| ApiError::bad_request(err.to_string()).into()))
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/auth/refresh").route(web::post().to(refresh_token)))
            .service(
                web::resource("/users/{id}")
                    .route(web::get().to(get_user_profile))
                    .route(web::put().to(update_user_profile)),
            )
            .service(web::resource("/users/{id}/rewards").route(web::get().to(list_user_rewards)))
            .service(web::resource("/admin/users/{id}/admin").route(web::post().to(set_user_admin)))
            .service(
                web::resource("/categories")
                    .route(web::get().to(list_categories))
                    .route(web::post().to(create_category)),
            )
            .service(web::resource("/categories/{id}").route(web::get().to(get_category)))
            .service(
                web::resource("/tags")
                    .route(web::get().to(list_tags))
                    .route(web::post().to(create_tag)),
            )
            .service(
                web::resource("/threads")
                    .route(web::get().to(list_threads))
                    .route(web::post().to(create_thread)),
            )
            .service(web::resource("/threads/{id}").route(web::get().to(get_thread)))
            .service(web::resource("/threads/{id}/comments").route(web::post().to(create_comment)))
            .service(
                web::resource("/votes")
                    .route(web::post().to(cast_vote))
                    .route(web::delete().to(retract_vote)),
            )
            .service(web::resource("/search").route(web::get().to(search_threads)))
            .service(
                web::resource("/rewards")
                    .route(web::get().to(list_rewards))
                    .route(web::post().to(create_reward)),
            )
            .service(web::resource("/rewards/purchase").route(web::post().to(purchase_reward)))
            .service(
                web::resource("/blog")
                    .route(web::get().to(list_blog_posts))
                    .route(web::post().to(create_blog_post)),
            )
            // author routes must be registered before the `/blog/{key}` catch-all
            .service(
                web::resource("/blog/authors")
                    .route(web::get().to(list_blog_authors))
                    .route(web::post().to(add_blog_author)),
            )
            .service(
                web::resource("/blog/authors/{user_id}")
                    .route(web::get().to(check_blog_author))
                    .route(web::delete().to(remove_blog_author)),
            )
            .service(
                web::resource("/blog/{key}")
                    .route(web::get().to(get_blog_post))
                    .route(web::put().to(update_blog_post)),
            )
            .service(
                web::resource("/projects")
                    .route(web::get().to(list_projects))
                    .route(web::post().to(create_project)),
            )
            .service(web::resource("/projects/{id}/join").route(web::post().to(join_project))),
    );
    cfg.route("/metrics", web::get().to(metrics_endpoint));
}

#[derive(Clone)]
pub struct AppState { pub repo: Arc<dyn Repo>, pub rate_limiter: Option<RateLimiterFacade> }

macro_rules! ensure_admin { ($auth:expr) => { if !$auth.is_admin() { return Err(ApiError::Forbidden); } }; }

fn current_user(auth: &Auth) -> Result<Id, ApiError> {
    auth.user_id().ok_or(ApiError::Unauthorized)
}

fn check_rate(data: &AppState, allow: impl FnOnce(&RateLimiterFacade) -> bool) -> Result<(), ApiError> {
    match &data.rate_limiter {
        Some(rl) if !allow(rl) => Err(ApiError::TooManyRequests),
        _ => Ok(()),
    }
}

fn require_text(field: &str, value: &str, max: usize) -> Result<(), ApiError> {
    let len = value.trim().chars().count();
    if len == 0 { return Err(ApiError::bad_request(format!("{field} is required"))); }
    if len > max { return Err(ApiError::bad_request(format!("{field} must be at most {max} characters"))); }
    Ok(())
}

/// Lowercase, collapse every run outside `[a-z0-9]` into one `-`, trim dashes.
pub fn blog_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() { slug.push('-'); }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// `NotFound` becomes `None`; any other store failure is surfaced.
fn found<T>(res: Result<T, RepoError>) -> Result<Option<T>, ApiError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(RepoError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn author_of(repo: &dyn Repo, user_id: Id) -> Result<Option<User>, ApiError> {
    found(repo.get_user(user_id).await)
}

// ---------------- response shapes -------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    #[serde(flatten)]
    pub thread: Thread,
    pub author: Option<User>,
    pub vote_score: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub comment_count: i64,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Option<User>,
    pub vote_score: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub user_vote: Option<Vote>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetail {
    #[serde(flatten)]
    pub thread: Thread,
    pub author: Option<User>,
    pub vote_score: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub user_vote: Option<Vote>,
    pub comments: Vec<CommentView>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserThread {
    #[serde(flatten)]
    pub thread: Thread,
    pub vote_score: i64,
    pub comment_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserProfile {
    pub user: User,
    pub threads: Vec<UserThread>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PurchaseResponse {
    pub message: String,
    pub reward: RewardItem,
    pub balance: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BlogPostView {
    #[serde(flatten)]
    pub post: BlogPost,
    pub author: Option<User>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BlogAuthorView {
    #[serde(flatten)]
    pub author: BlogAuthor,
    pub user: Option<User>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub owner: Option<User>,
    pub members: Vec<ProjectMember>,
}

async fn thread_summary(repo: &dyn Repo, thread: Thread) -> Result<ThreadSummary, ApiError> {
    let tally = repo.tally(VoteTarget::Thread(thread.id)).await?;
    Ok(ThreadSummary {
        author: author_of(repo, thread.user_id).await?,
        vote_score: tally.score,
        upvotes: tally.upvotes,
        downvotes: tally.downvotes,
        comment_count: repo.count_comments(thread.id).await?,
        tags: repo.tags_for_thread(thread.id).await?,
        thread,
    })
}

async fn comment_view(repo: &dyn Repo, comment: Comment, viewer: Option<Id>) -> Result<CommentView, ApiError> {
    let target = VoteTarget::Comment(comment.id);
    let tally = repo.tally(target).await?;
    let user_vote = match viewer {
        Some(v) => repo.get_user_vote(v, target).await?,
        None => None,
    };
    Ok(CommentView {
        author: author_of(repo, comment.user_id).await?,
        vote_score: tally.score,
        upvotes: tally.upvotes,
        downvotes: tally.downvotes,
        user_vote,
        comment,
    })
}

// ---------------- auth -------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

fn is_bootstrap_admin(username: &str) -> bool {
    std::env::var("BOOTSTRAP_ADMIN_USERNAMES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .any(|s| !s.is_empty() && s.to_lowercase() == username.to_lowercase())
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Username or email taken")
    )
)]
pub async fn register(data: web::Data<AppState>, payload: web::Json<RegisterRequest>) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let username = req.username.trim().to_string();
    let ulen = username.chars().count();
    if !(3..=32).contains(&ulen) {
        return Err(ApiError::bad_request("username must be 3-32 characters"));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }
    let email = req.email.trim().to_string();
    if !email.contains('@') {
        return Err(ApiError::bad_request("email is invalid"));
    }
    let password_hash = auth::hash_password(&req.password).map_err(|e| {
        log::error!("password hashing failed: {e}");
        ApiError::Internal
    })?;
    let is_admin = is_bootstrap_admin(&username);
    let user = data.repo.create_user(NewUserRecord { username, email, name: req.name, password_hash, is_admin }).await?;
    let token = auth::create_user_jwt(&user).map_err(|e| {
        log::error!("token issue failed: {e}");
        ApiError::Internal
    })?;
    log::info!("registered user {} (admin: {})", user.id, user.is_admin);
    Ok(HttpResponse::Created().json(AuthResponse { user, token }))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid username or password")
    )
)]
pub async fn login(data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    let user = match data.repo.get_user_by_username(payload.username.trim()).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => return Err(ApiError::Unauthorized),
        Err(e) => return Err(e.into()),
    };
    let hash = data.repo.get_password_hash(user.id).await?;
    if !auth::verify_password(&payload.password, &hash) {
        return Err(ApiError::Unauthorized);
    }
    let token = auth::create_user_jwt(&user).map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(AuthResponse { user, token }))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(current_user(&auth)?).await.map_err(|e| match e {
        RepoError::NotFound => ApiError::Unauthorized,
        other => other.into(),
    })?;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    responses(
        (status = 200, description = "Fresh token carrying the current roles"),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn refresh_token(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    // re-read so role changes since the last token take effect
    let user = data.repo.get_user(current_user(&auth)?).await.map_err(|_| ApiError::Unauthorized)?;
    let jwt = auth::create_user_jwt(&user).map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": jwt })))
}

// ---------------- users -----------------------------------------------

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Profile with authored threads", body = UserProfile),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_profile(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    let repo = data.repo.as_ref();
    let user = repo.get_user(user_id).await?;
    let threads = repo.list_threads(&ThreadQuery { author_id: Some(user_id), ..Default::default() }).await?;
    let mut out = Vec::with_capacity(threads.len());
    for thread in threads {
        let tally = repo.tally(VoteTarget::Thread(thread.id)).await?;
        let comment_count = repo.count_comments(thread.id).await?;
        out.push(UserThread { thread, vote_score: tally.score, comment_count });
    }
    Ok(HttpResponse::Ok().json(UserProfile { user, threads: out }))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    request_body = UpdateProfileRequest,
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Updated profile", body = User),
        (status = 400, description = "Invalid input or wrong current password"),
        (status = 403, description = "Can only update your own profile"),
        (status = 409, description = "Username or email taken")
    )
)]
pub async fn update_user_profile(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    if current_user(&auth)? != user_id {
        return Err(ApiError::Forbidden);
    }
    let req = payload.into_inner();
    let mut upd = ProfileUpdate { name: req.name, bio: req.bio, ..Default::default() };
    if let Some(username) = req.username {
        let username = username.trim().to_string();
        if !(3..=32).contains(&username.chars().count()) {
            return Err(ApiError::bad_request("username must be 3-32 characters"));
        }
        upd.username = Some(username);
    }
    if let Some(email) = req.email {
        if !email.contains('@') { return Err(ApiError::bad_request("email is invalid")); }
        upd.email = Some(email.trim().to_string());
    }
    if let Some(new_password) = req.new_password {
        let current = req.current_password.unwrap_or_default();
        let hash = data.repo.get_password_hash(user_id).await?;
        if !auth::verify_password(&current, &hash) {
            return Err(ApiError::bad_request("current password is incorrect"));
        }
        if new_password.chars().count() < 8 {
            return Err(ApiError::bad_request("password must be at least 8 characters"));
        }
        upd.password_hash = Some(auth::hash_password(&new_password).map_err(|_| ApiError::Internal)?);
    }
    let user = data.repo.update_profile(user_id, upd).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}/rewards",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Rewards owned by the user", body = [UserReward]),
        (status = 403, description = "Not the user or an admin"),
        (status = 404, description = "User not found")
    )
)]
pub async fn list_user_rewards(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    if current_user(&auth)? != user_id && !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    data.repo.get_user(user_id).await?;
    let rewards = data.repo.list_user_rewards(user_id).await?;
    Ok(HttpResponse::Ok().json(rewards))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetAdminRequest {
    pub is_admin: bool,
}

#[utoipa::path(
    post,
    path = "/api/admin/users/{id}/admin",
    request_body = SetAdminRequest,
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found")
    )
)]
pub async fn set_user_admin(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SetAdminRequest>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let user = data.repo.set_admin(path.into_inner(), payload.is_admin).await?;
    log::info!("user {} admin flag set to {} by {}", user.id, user.is_admin, auth.0.sub);
    Ok(HttpResponse::Ok().json(user))
}

// ---------------- categories & tags ------------------------------------

#[utoipa::path(
    get,
    path = "/api/categories",
    responses((status = 200, description = "List categories", body = [Category]))
)]
pub async fn list_categories(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_categories().await?))
}

#[utoipa::path(
    get,
    path = "/api/categories/{id}",
    params(("id" = i64, Path, description = "Category id")),
    responses(
        (status = 200, description = "Category", body = Category),
        (status = 404, description = "Category not found")
    )
)]
pub async fn get_category(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.get_category(path.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/categories",
    request_body = NewCategory,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 403, description = "Admin only")
    )
)]
pub async fn create_category(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewCategory>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    require_text("name", &payload.name, 100)?;
    let category = data.repo.create_category(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(category))
}

#[utoipa::path(
    get,
    path = "/api/tags",
    responses((status = 200, description = "List tags", body = [Tag]))
)]
pub async fn list_tags(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_tags().await?))
}

#[utoipa::path(
    post,
    path = "/api/tags",
    request_body = NewTag,
    responses(
        (status = 201, description = "Tag created", body = Tag),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Tag name taken")
    )
)]
pub async fn create_tag(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewTag>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    require_text("name", &payload.name, 50)?;
    let tag = data.repo.create_tag(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(tag))
}

// ---------------- threads & comments -----------------------------------

#[utoipa::path(
    get,
    path = "/api/threads",
    params(
        ("categoryId" = Option<i64>, Query, description = "Filter by category"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses(
        (status = 200, description = "Threads, newest first", body = [ThreadSummary]),
        (status = 400, description = "Negative limit or offset")
    )
)]
pub async fn list_threads(data: web::Data<AppState>, query: web::Query<ThreadQuery>) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    if q.limit.map_or(false, |l| l < 0) || q.offset.map_or(false, |o| o < 0) {
        return Err(ApiError::bad_request("limit and offset must be non-negative"));
    }
    let repo = data.repo.as_ref();
    let threads = repo.list_threads(&q).await?;
    let mut out = Vec::with_capacity(threads.len());
    for thread in threads {
        out.push(thread_summary(repo, thread).await?);
    }
    Ok(HttpResponse::Ok().json(out))
}

#[utoipa::path(
    get,
    path = "/api/threads/{id}",
    params(("id" = i64, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread with comments; counts a view", body = ThreadDetail),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn get_thread(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let repo = data.repo.as_ref();
    let viewer = auth.as_ref().and_then(Auth::user_id);
    let thread = repo.record_view(path.into_inner()).await?;
    let target = VoteTarget::Thread(thread.id);
    let tally = repo.tally(target).await?;
    let user_vote = match viewer {
        Some(v) => repo.get_user_vote(v, target).await?,
        None => None,
    };
    let mut comments = Vec::new();
    for comment in repo.list_comments(thread.id).await? {
        comments.push(comment_view(repo, comment, viewer).await?);
    }
    let detail = ThreadDetail {
        author: author_of(repo, thread.user_id).await?,
        vote_score: tally.score,
        upvotes: tally.upvotes,
        downvotes: tally.downvotes,
        user_vote,
        comments,
        tags: repo.tags_for_thread(thread.id).await?,
        thread,
    };
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    post,
    path = "/api/threads",
    request_body = NewThread,
    responses(
        (status = 201, description = "Thread created", body = Thread),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Category or tag not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_thread(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewThread>) -> Result<HttpResponse, ApiError> {
    let author = current_user(&auth)?;
    require_text("title", &payload.title, 200)?;
    require_text("content", &payload.content, 20_000)?;
    check_rate(&data, |rl| rl.allow_thread(&auth.0.sub))?;
    let thread = data.repo.create_thread(author, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(thread))
}

#[utoipa::path(
    post,
    path = "/api/threads/{id}/comments",
    request_body = NewComment,
    params(("id" = i64, Path, description = "Thread id")),
    responses(
        (status = 201, description = "Comment created", body = CommentView),
        (status = 404, description = "Thread not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let author = current_user(&auth)?;
    require_text("content", &payload.content, 10_000)?;
    check_rate(&data, |rl| rl.allow_comment(&auth.0.sub))?;
    let comment = data.repo.create_comment(author, path.into_inner(), payload.into_inner()).await?;
    let view = CommentView {
        author: author_of(data.repo.as_ref(), author).await?,
        vote_score: 0,
        upvotes: 0,
        downvotes: 0,
        user_vote: None,
        comment,
    };
    Ok(HttpResponse::Created().json(view))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/search",
    params(("q" = String, Query, description = "Case-insensitive text in title or content")),
    responses(
        (status = 200, description = "Matching threads", body = [ThreadSummary]),
        (status = 400, description = "Search query is required")
    )
)]
pub async fn search_threads(data: web::Data<AppState>, query: web::Query<SearchQuery>) -> Result<HttpResponse, ApiError> {
    let q = query.q.as_deref().map(str::trim).unwrap_or_default();
    if q.is_empty() {
        return Err(ApiError::bad_request("search query is required"));
    }
    let repo = data.repo.as_ref();
    let mut out = Vec::new();
    for thread in repo.search_threads(q).await? {
        out.push(thread_summary(repo, thread).await?);
    }
    Ok(HttpResponse::Ok().json(out))
}

// ---------------- votes -------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub thread_id: Option<Id>,
    pub comment_id: Option<Id>,
    /// 1 (upvote) or -1 (downvote)
    pub value: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetractVoteRequest {
    pub thread_id: Option<Id>,
    pub comment_id: Option<Id>,
}

fn vote_target(thread_id: Option<Id>, comment_id: Option<Id>) -> Result<VoteTarget, ApiError> {
    VoteTarget::from_ids(thread_id, comment_id)
        .ok_or_else(|| ApiError::bad_request("provide either threadId or commentId, but not both or neither"))
}

#[utoipa::path(
    post,
    path = "/api/votes",
    request_body = VoteRequest,
    responses(
        (status = 201, description = "Vote stored; author reputation adjusted", body = VoteOutcome),
        (status = 400, description = "Invalid target or value"),
        (status = 404, description = "Target not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn cast_vote(auth: Auth, data: web::Data<AppState>, payload: web::Json<VoteRequest>) -> Result<HttpResponse, ApiError> {
    let voter = current_user(&auth)?;
    let target = vote_target(payload.thread_id, payload.comment_id)?;
    let value = VoteValue::try_from(payload.value).map_err(|e| ApiError::bad_request(e.to_string()))?;
    check_rate(&data, |rl| rl.allow_vote(&auth.0.sub))?;
    let outcome = data.repo.cast_vote(voter, target, value).await?;
    telemetry::vote_cast(target, outcome.reputation_delta);
    log::debug!("user {voter} voted {} on {target:?} (delta {})", value.as_i64(), outcome.reputation_delta);
    Ok(HttpResponse::Created().json(outcome))
}

#[utoipa::path(
    delete,
    path = "/api/votes",
    request_body = RetractVoteRequest,
    responses(
        (status = 200, description = "Vote removed; reputation effect reversed", body = VoteOutcome),
        (status = 404, description = "No vote on that target")
    )
)]
pub async fn retract_vote(auth: Auth, data: web::Data<AppState>, payload: web::Json<RetractVoteRequest>) -> Result<HttpResponse, ApiError> {
    let voter = current_user(&auth)?;
    let target = vote_target(payload.thread_id, payload.comment_id)?;
    check_rate(&data, |rl| rl.allow_vote(&auth.0.sub))?;
    let outcome = data.repo.retract_vote(voter, target).await?;
    telemetry::vote_retracted(target);
    Ok(HttpResponse::Ok().json(outcome))
}

// ---------------- rewards ---------------------------------------------

#[utoipa::path(
    get,
    path = "/api/rewards",
    responses((status = 200, description = "Reward catalogue", body = [RewardItem]))
)]
pub async fn list_rewards(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_rewards().await?))
}

#[utoipa::path(
    post,
    path = "/api/rewards",
    request_body = NewRewardItem,
    responses(
        (status = 201, description = "Reward created", body = RewardItem),
        (status = 400, description = "Missing name or non-positive cost"),
        (status = 403, description = "Admin only")
    )
)]
pub async fn create_reward(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewRewardItem>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    require_text("name", &payload.name, 100)?;
    if payload.cost <= 0 {
        return Err(ApiError::bad_request("cost must be positive"));
    }
    let item = data.repo.create_reward(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(item))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub reward_id: Id,
}

#[utoipa::path(
    post,
    path = "/api/rewards/purchase",
    request_body = PurchaseRequest,
    responses(
        (status = 200, description = "Reputation debited and reward granted", body = PurchaseResponse),
        (status = 400, description = "Not enough reputation points"),
        (status = 404, description = "Reward not found")
    )
)]
pub async fn purchase_reward(auth: Auth, data: web::Data<AppState>, payload: web::Json<PurchaseRequest>) -> Result<HttpResponse, ApiError> {
    let user_id = current_user(&auth)?;
    let purchase = match data.repo.purchase_reward(user_id, payload.reward_id).await {
        Ok(p) => p,
        Err(e) => {
            telemetry::purchase_rejected(match e {
                RepoError::InsufficientReputation { .. } => "insufficient_reputation",
                RepoError::NotFound => "not_found",
                _ => "error",
            });
            return Err(e.into());
        }
    };
    telemetry::reward_purchased(purchase.reward.cost);
    log::info!("user {user_id} bought reward {} for {}", purchase.reward.id, purchase.reward.cost);
    Ok(HttpResponse::Ok().json(PurchaseResponse {
        message: "Reward purchased successfully".into(),
        reward: purchase.reward,
        balance: purchase.balance,
    }))
}

// ---------------- blog -------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/blog",
    responses((status = 200, description = "Blog posts, newest first", body = [BlogPostView]))
)]
pub async fn list_blog_posts(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let repo = data.repo.as_ref();
    let mut out = Vec::new();
    for post in repo.list_posts().await? {
        out.push(BlogPostView { author: author_of(repo, post.user_id).await?, post });
    }
    Ok(HttpResponse::Ok().json(out))
}

#[utoipa::path(
    get,
    path = "/api/blog/{slug}",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Post with author", body = BlogPostView),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_blog_post(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let repo = data.repo.as_ref();
    let post = repo.get_post_by_slug(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(BlogPostView { author: author_of(repo, post.user_id).await?, post }))
}

#[utoipa::path(
    post,
    path = "/api/blog",
    request_body = NewBlogPost,
    responses(
        (status = 201, description = "Post created", body = BlogPost),
        (status = 403, description = "Only blog authors can create posts"),
        (status = 409, description = "Slug already used")
    )
)]
pub async fn create_blog_post(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewBlogPost>) -> Result<HttpResponse, ApiError> {
    let user_id = current_user(&auth)?;
    if !data.repo.is_author(user_id).await? {
        return Err(ApiError::Forbidden);
    }
    require_text("title", &payload.title, 200)?;
    require_text("content", &payload.content, 100_000)?;
    let slug = blog_slug(&payload.title);
    if slug.is_empty() {
        return Err(ApiError::bad_request("title must contain letters or digits"));
    }
    let post = data.repo.create_post(user_id, slug, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(post))
}

#[utoipa::path(
    put,
    path = "/api/blog/{id}",
    request_body = UpdateBlogPost,
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 200, description = "Updated post; slug unchanged", body = BlogPost),
        (status = 400, description = "Empty title or content"),
        (status = 403, description = "Not the author or an admin"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn update_blog_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateBlogPost>,
) -> Result<HttpResponse, ApiError> {
    let post_id: Id = path.into_inner().parse().map_err(|_| ApiError::NotFound)?;
    let post = data.repo.get_post(post_id).await?;
    if post.user_id != current_user(&auth)? && !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    if let Some(ref t) = payload.title { require_text("title", t, 200)?; }
    if let Some(ref c) = payload.content { require_text("content", c, 100_000)?; }
    let updated = data.repo.update_post(post_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    get,
    path = "/api/blog/authors",
    responses(
        (status = 200, description = "Registered authors", body = [BlogAuthorView]),
        (status = 403, description = "Admin only")
    )
)]
pub async fn list_blog_authors(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let repo = data.repo.as_ref();
    let mut out = Vec::new();
    for author in repo.list_authors().await? {
        out.push(BlogAuthorView { user: author_of(repo, author.user_id).await?, author });
    }
    Ok(HttpResponse::Ok().json(out))
}

#[utoipa::path(
    get,
    path = "/api/blog/authors/{user_id}",
    params(("user_id" = i64, Path, description = "User id")),
    responses((status = 200, description = "Whether the user is a registered author"))
)]
pub async fn check_blog_author(_auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let is_author = data.repo.is_author(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "isAuthor": is_author })))
}

#[utoipa::path(
    post,
    path = "/api/blog/authors",
    request_body = NewBlogAuthor,
    responses(
        (status = 201, description = "Author registered", body = BlogAuthor),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Already an author")
    )
)]
pub async fn add_blog_author(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewBlogAuthor>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let author = data.repo.add_author(payload.user_id).await?;
    Ok(HttpResponse::Created().json(author))
}

#[utoipa::path(
    delete,
    path = "/api/blog/authors/{user_id}",
    params(("user_id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Author removed"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not an author")
    )
)]
pub async fn remove_blog_author(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    data.repo.remove_author(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Author removed successfully" })))
}

// ---------------- projects -------------------------------------------

#[utoipa::path(
    get,
    path = "/api/projects",
    responses((status = 200, description = "Projects with owner and members", body = [ProjectView]))
)]
pub async fn list_projects(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let repo = data.repo.as_ref();
    let mut out = Vec::new();
    for project in repo.list_projects().await? {
        out.push(ProjectView {
            owner: author_of(repo, project.owner_id).await?,
            members: repo.list_members(project.id).await?,
            project,
        });
    }
    Ok(HttpResponse::Ok().json(out))
}

#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = NewProject,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Invalid input")
    )
)]
pub async fn create_project(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewProject>) -> Result<HttpResponse, ApiError> {
    let owner = current_user(&auth)?;
    require_text("title", &payload.title, 200)?;
    if payload.max_members < 1 {
        return Err(ApiError::bad_request("maxMembers must be at least 1"));
    }
    let project = data.repo.create_project(owner, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(project))
}

#[utoipa::path(
    post,
    path = "/api/projects/{id}/join",
    params(("id" = i64, Path, description = "Project id")),
    responses(
        (status = 200, description = "Joined", body = ProjectMember),
        (status = 404, description = "Project not found"),
        (status = 409, description = "Project closed, or caller is owner or already a member")
    )
)]
pub async fn join_project(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user_id = current_user(&auth)?;
    let member = data.repo.join_project(path.into_inner(), user_id).await?;
    Ok(HttpResponse::Ok().json(member))
}

// ---------------- metrics ---------------------------------------------

pub async fn metrics_endpoint() -> Result<HttpResponse, ApiError> {
    let body = telemetry::render().ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::VoteTally;

    #[test]
    fn slug_collapses_non_alphanumerics() {
        assert_eq!(blog_slug("Hello, World!"), "hello-world");
        assert_eq!(blog_slug("  Rust 2024 -- what's new?  "), "rust-2024-what-s-new");
        assert_eq!(blog_slug("!!!"), "");
        assert_eq!(blog_slug("Café au lait"), "caf-au-lait");
    }

    #[test]
    fn tally_fields_are_camel_case() {
        let v = serde_json::to_value(VoteTally::new(3, 1)).unwrap();
        assert_eq!(v["upvotes"], 3);
        assert_eq!(v["score"], 2);
    }

    #[test]
    fn missing_author_is_none_but_store_failure_propagates() {
        assert!(matches!(found(Ok::<_, RepoError>(1)), Ok(Some(1))));
        assert!(matches!(found::<User>(Err(RepoError::NotFound)), Ok(None)));
        assert!(matches!(
            found::<User>(Err(RepoError::Internal("connection reset".into()))),
            Err(ApiError::Internal)
        ));
    }
}
