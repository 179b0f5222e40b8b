use chrono::Utc;

use crate::models::*;
use crate::reputation::{author_delta, VoteTally, VoteTarget, VoteValue};

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("insufficient reputation: balance {balance}, cost {cost}")]
    InsufficientReputation { balance: i64, cost: i64 },
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUserRecord) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    /// Case-insensitive lookup.
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
    async fn get_password_hash(&self, id: Id) -> RepoResult<String>;
    async fn update_profile(&self, id: Id, upd: ProfileUpdate) -> RepoResult<User>;
    async fn set_admin(&self, id: Id, is_admin: bool) -> RepoResult<User>;
    async fn adjust_reputation(&self, id: Id, delta: i64) -> RepoResult<User>;
}

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn list_categories(&self) -> RepoResult<Vec<Category>>;
    async fn get_category(&self, id: Id) -> RepoResult<Category>;
    async fn create_category(&self, new: NewCategory) -> RepoResult<Category>;
}

#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn list_tags(&self) -> RepoResult<Vec<Tag>>;
    async fn create_tag(&self, new: NewTag) -> RepoResult<Tag>;
    async fn tags_for_thread(&self, thread_id: Id) -> RepoResult<Vec<Tag>>;
}

#[async_trait]
pub trait ThreadRepo: Send + Sync {
    /// Newest first.
    async fn list_threads(&self, q: &ThreadQuery) -> RepoResult<Vec<Thread>>;
    async fn get_thread(&self, id: Id) -> RepoResult<Thread>;
    /// Creates the thread and its tag links in one unit of work.
    async fn create_thread(&self, author: Id, new: NewThread) -> RepoResult<Thread>;
    async fn record_view(&self, id: Id) -> RepoResult<Thread>;
    async fn search_threads(&self, query: &str) -> RepoResult<Vec<Thread>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Oldest first.
    async fn list_comments(&self, thread_id: Id) -> RepoResult<Vec<Comment>>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn create_comment(&self, author: Id, thread_id: Id, new: NewComment) -> RepoResult<Comment>;
    async fn count_comments(&self, thread_id: Id) -> RepoResult<i64>;
}

/// One vote per user and target. Every mutation updates the vote row and the
/// author's reputation together or not at all.
#[async_trait]
pub trait VoteRepo: Send + Sync {
    async fn cast_vote(&self, voter: Id, target: VoteTarget, value: VoteValue) -> RepoResult<VoteOutcome>;
    async fn retract_vote(&self, voter: Id, target: VoteTarget) -> RepoResult<VoteOutcome>;
    async fn get_user_vote(&self, voter: Id, target: VoteTarget) -> RepoResult<Option<Vote>>;
    async fn tally(&self, target: VoteTarget) -> RepoResult<VoteTally>;
}

#[async_trait]
pub trait RewardRepo: Send + Sync {
    async fn list_rewards(&self) -> RepoResult<Vec<RewardItem>>;
    async fn get_reward(&self, id: Id) -> RepoResult<RewardItem>;
    async fn create_reward(&self, new: NewRewardItem) -> RepoResult<RewardItem>;
    /// Debits `cost` and grants the item atomically.
    async fn purchase_reward(&self, user_id: Id, reward_id: Id) -> RepoResult<Purchase>;
    async fn list_user_rewards(&self, user_id: Id) -> RepoResult<Vec<UserReward>>;
}

#[async_trait]
pub trait BlogRepo: Send + Sync {
    async fn list_posts(&self) -> RepoResult<Vec<BlogPost>>;
    async fn get_post(&self, id: Id) -> RepoResult<BlogPost>;
    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<BlogPost>;
    async fn create_post(&self, author: Id, slug: String, new: NewBlogPost) -> RepoResult<BlogPost>;
    async fn update_post(&self, id: Id, upd: UpdateBlogPost) -> RepoResult<BlogPost>;
    async fn list_authors(&self) -> RepoResult<Vec<BlogAuthor>>;
    async fn is_author(&self, user_id: Id) -> RepoResult<bool>;
    async fn add_author(&self, user_id: Id) -> RepoResult<BlogAuthor>;
    async fn remove_author(&self, user_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn list_projects(&self) -> RepoResult<Vec<Project>>;
    async fn get_project(&self, id: Id) -> RepoResult<Project>;
    async fn create_project(&self, owner: Id, new: NewProject) -> RepoResult<Project>;
    /// Closes the project once it reaches `max_members`.
    async fn join_project(&self, project_id: Id, user_id: Id) -> RepoResult<ProjectMember>;
    async fn list_members(&self, project_id: Id) -> RepoResult<Vec<ProjectMember>>;
}

pub trait Repo:
    UserRepo + CategoryRepo + TagRepo + ThreadRepo + CommentRepo + VoteRepo + RewardRepo + BlogRepo + ProjectRepo
{
}

impl<T> Repo for T where
    T: UserRepo + CategoryRepo + TagRepo + ThreadRepo + CommentRepo + VoteRepo + RewardRepo + BlogRepo + ProjectRepo
{
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Serialize, Deserialize};
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use tracing::{error, info, warn};

    const SNAPSHOT_FILE: &str = "state.json";

    const DEFAULT_CATEGORIES: &[(&str, &str, &str)] = &[
        ("Development", "Programming, Web, Mobile", "laptop-code"),
        ("Design", "UI/UX, Graphics, Illustration", "paint-brush"),
        ("General Discussion", "Industry News, Careers", "globe"),
        ("Help & Support", "Questions, Troubleshooting", "question-circle"),
        ("Announcements", "Updates, Events", "bullhorn"),
    ];

    const DEFAULT_TAGS: &[(&str, &str)] = &[
        ("Announcement", "#22c55e"),
        ("Question", "#eab308"),
        ("Discussion", "#3b82f6"),
        ("Resource", "#a855f7"),
    ];

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        passwords: HashMap<Id, String>,
        categories: HashMap<Id, Category>,
        tags: HashMap<Id, Tag>,
        threads: HashMap<Id, Thread>,
        thread_tags: HashSet<(Id, Id)>,
        comments: HashMap<Id, Comment>,
        votes: HashMap<Id, Vote>,
        rewards: HashMap<Id, RewardItem>,
        user_rewards: HashMap<Id, UserReward>,
        blog_posts: HashMap<Id, BlogPost>,
        blog_authors: HashMap<Id, BlogAuthor>,
        projects: HashMap<Id, Project>,
        project_members: Vec<ProjectMember>,
        next_id: Id,
    }

    impl State {
        fn seeded() -> Self {
            let mut s = State::default();
            for (name, description, icon) in DEFAULT_CATEGORIES {
                let id = s.next_id();
                s.categories.insert(id, Category {
                    id,
                    name: name.to_string(),
                    description: Some(description.to_string()),
                    icon: Some(icon.to_string()),
                });
            }
            for (name, color) in DEFAULT_TAGS {
                let id = s.next_id();
                s.tags.insert(id, Tag { id, name: name.to_string(), color: color.to_string() });
            }
            s
        }

        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn username_taken(&self, username: &str, except: Option<Id>) -> bool {
            self.users.values().any(|u| Some(u.id) != except && same_ignoring_case(&u.username, username))
        }

        fn email_taken(&self, email: &str, except: Option<Id>) -> bool {
            self.users.values().any(|u| Some(u.id) != except && same_ignoring_case(&u.email, email))
        }

        fn author_of(&self, target: VoteTarget) -> RepoResult<Id> {
            match target {
                VoteTarget::Thread(id) => self.threads.get(&id).map(|t| t.user_id),
                VoteTarget::Comment(id) => self.comments.get(&id).map(|c| c.user_id),
            }
            .ok_or(RepoError::NotFound)
        }

        fn find_vote(&self, voter: Id, target: VoteTarget) -> Option<Id> {
            self.votes
                .values()
                .find(|v| v.user_id == voter && v.target() == Some(target))
                .map(|v| v.id)
        }

        fn tally(&self, target: VoteTarget) -> VoteTally {
            VoteTally::from_values(
                self.votes.values().filter(|v| v.target() == Some(target)).map(|v| v.value),
            )
        }

        fn bump_reputation(&mut self, user_id: Id, delta: i64) {
            if delta == 0 { return; }
            if let Some(u) = self.users.get_mut(&user_id) { u.reputation += delta; }
        }
    }

    /// Unicode-aware, like the `lower(...)` indexes on the Postgres side.
    fn same_ignoring_case(a: &str, b: &str) -> bool {
        a.to_lowercase() == b.to_lowercase()
    }

    fn newest_first(v: &mut [Thread]) {
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    }

    fn sorted_by_id<T: Clone, F: Fn(&T) -> Id>(m: &HashMap<Id, T>, key: F) -> Vec<T> {
        let mut v: Vec<T> = m.values().cloned().collect();
        v.sort_by_key(|x| key(x));
        v
    }

    /// Process-local store. One `RwLock` guards all tables, so every
    /// mutating call is a single atomic unit of work.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
        // one snapshot write at a time, each reading the latest state
        persist_lock: Arc<Mutex<()>>,
    }

    impl InMemRepo {
        fn snapshot_path_from_env() -> PathBuf {
            let mut p = std::env::var("AGORA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"));
            p.push(SNAPSHOT_FILE);
            p
        }

        /// Returns the state to start from and whether `path` may be written.
        /// An unreadable snapshot is moved aside rather than overwritten.
        fn load_state_from(path: &Path) -> (State, bool) {
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    info!("no snapshot at '{}' ({e}); starting from seed data", path.display());
                    return (State::seeded(), true);
                }
            };
            match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!("loaded snapshot '{}'", path.display());
                    (s, true)
                }
                Err(e) => {
                    let aside = corrupt_path(path);
                    match std::fs::rename(path, &aside) {
                        Ok(()) => {
                            error!(
                                "failed to parse snapshot '{}': {e}; moved to '{}', starting from seed data",
                                path.display(),
                                aside.display()
                            );
                            (State::seeded(), true)
                        }
                        Err(re) => {
                            error!(
                                "failed to parse snapshot '{}': {e}; could not move it aside ({re}), persistence disabled",
                                path.display()
                            );
                            (State::seeded(), false)
                        }
                    }
                }
            }
        }

        fn from_parts(state: State, snapshot_path: Option<PathBuf>) -> Self {
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: snapshot_path.map(Arc::new),
                persist_lock: Arc::new(Mutex::new(())),
            }
        }

        /// Snapshot under `$AGORA_DATA_DIR` (default `./data`).
        pub fn new() -> Self {
            Self::at(Self::snapshot_path_from_env())
        }

        /// Snapshot at an explicit path; loads it when present.
        pub fn at(path: impl Into<PathBuf>) -> Self {
            let path = path.into();
            let (state, writable) = Self::load_state_from(&path);
            Self::from_parts(state, writable.then_some(path))
        }

        /// Seeded store that never touches disk.
        pub fn ephemeral() -> Self {
            Self::from_parts(State::seeded(), None)
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        /// Write the current state to a sibling temp file, then rename it
        /// over the snapshot so readers never see a partial file.
        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let Ok(_guard) = self.persist_lock.lock() else {
                warn!("snapshot lock poisoned; skipping persist");
                return;
            };
            let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
                Ok(Ok(b)) => b,
                Ok(Err(e)) => { warn!("failed to encode snapshot: {e}"); return; }
                Err(e) => { warn!("failed to read state for snapshot: {e}"); return; }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            let tmp = sibling(path, "tmp");
            if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path)) {
                warn!("failed to write snapshot '{}': {e}", path.display());
            }
        }
    }

    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".");
        name.push(suffix);
        path.with_file_name(name)
    }

    fn corrupt_path(path: &Path) -> PathBuf {
        sibling(path, &format!("corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.f")))
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUserRecord) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.username_taken(&new.username, None) || s.email_taken(&new.email, None) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let user = User {
                id,
                username: new.username,
                email: new.email,
                name: new.name,
                bio: None,
                avatar_url: None,
                reputation: 0,
                is_admin: new.is_admin,
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            s.passwords.insert(id, new.password_hash);
            drop(s);                       // release lock before persisting
            self.persist();
            Ok(user)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            let s = self.read()?;
            s.users.values().find(|u| same_ignoring_case(&u.username, username)).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_password_hash(&self, id: Id) -> RepoResult<String> {
            self.read()?.passwords.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn update_profile(&self, id: Id, upd: ProfileUpdate) -> RepoResult<User> {
            let mut s = self.write()?;

            // uniqueness checks before taking the mutable borrow
            if let Some(ref name) = upd.username {
                if s.username_taken(name, Some(id)) { return Err(RepoError::Conflict); }
            }
            if let Some(ref email) = upd.email {
                if s.email_taken(email, Some(id)) { return Err(RepoError::Conflict); }
            }

            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.username { user.username = v; }
            if let Some(v) = upd.email { user.email = v; }
            if let Some(v) = upd.name { user.name = Some(v); }
            if let Some(v) = upd.bio { user.bio = Some(v); }
            let updated = user.clone();
            if let Some(hash) = upd.password_hash { s.passwords.insert(id, hash); }
            drop(s);
            self.persist();
            Ok(updated)
        }
        async fn set_admin(&self, id: Id, is_admin: bool) -> RepoResult<User> {
            let mut s = self.write()?;
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.is_admin = is_admin;
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
        async fn adjust_reputation(&self, id: Id, delta: i64) -> RepoResult<User> {
            let mut s = self.write()?;
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.reputation += delta;
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl CategoryRepo for InMemRepo {
        async fn list_categories(&self) -> RepoResult<Vec<Category>> {
            Ok(sorted_by_id(&self.read()?.categories, |c| c.id))
        }
        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            self.read()?.categories.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            let mut s = self.write()?;
            let id = s.next_id();
            let category = Category { id, name: new.name, description: new.description, icon: new.icon };
            s.categories.insert(id, category.clone());
            drop(s);
            self.persist();
            Ok(category)
        }
    }

    #[async_trait]
    impl TagRepo for InMemRepo {
        async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
            Ok(sorted_by_id(&self.read()?.tags, |t| t.id))
        }
        async fn create_tag(&self, new: NewTag) -> RepoResult<Tag> {
            let mut s = self.write()?;
            if s.tags.values().any(|t| t.name == new.name) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let tag = Tag { id, name: new.name, color: new.color };
            s.tags.insert(id, tag.clone());
            drop(s);
            self.persist();
            Ok(tag)
        }
        async fn tags_for_thread(&self, thread_id: Id) -> RepoResult<Vec<Tag>> {
            let s = self.read()?;
            let mut v: Vec<Tag> = s.thread_tags
                .iter()
                .filter(|(t, _)| *t == thread_id)
                .filter_map(|(_, tag)| s.tags.get(tag).cloned())
                .collect();
            v.sort_by_key(|t| t.id);
            Ok(v)
        }
    }

    #[async_trait]
    impl ThreadRepo for InMemRepo {
        async fn list_threads(&self, q: &ThreadQuery) -> RepoResult<Vec<Thread>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.threads.values()
                .filter(|t| q.category_id.map_or(true, |c| t.category_id == c))
                .filter(|t| q.author_id.map_or(true, |a| t.user_id == a))
                .cloned()
                .collect();
            newest_first(&mut v);
            let offset = q.offset.unwrap_or(0).max(0) as usize;
            let limit = q.limit.map_or(usize::MAX, |l| l.max(0) as usize);
            Ok(v.into_iter().skip(offset).take(limit).collect())
        }
        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            self.read()?.threads.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_thread(&self, author: Id, new: NewThread) -> RepoResult<Thread> {
            let mut s = self.write()?;
            if !s.users.contains_key(&author) { return Err(RepoError::NotFound); }
            if !s.categories.contains_key(&new.category_id) { return Err(RepoError::NotFound); }
            if new.tag_ids.iter().any(|t| !s.tags.contains_key(t)) { return Err(RepoError::NotFound); }
            let now = Utc::now();
            let id = s.next_id();
            let thread = Thread {
                id,
                title: new.title,
                content: new.content,
                user_id: author,
                category_id: new.category_id,
                created_at: now,
                updated_at: now,
                views: 0,
            };
            s.threads.insert(id, thread.clone());
            for tag_id in new.tag_ids {
                s.thread_tags.insert((id, tag_id));
            }
            drop(s);
            self.persist();
            Ok(thread)
        }
        async fn record_view(&self, id: Id) -> RepoResult<Thread> {
            let mut s = self.write()?;
            let thread = s.threads.get_mut(&id).ok_or(RepoError::NotFound)?;
            thread.views += 1;
            let updated = thread.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
        async fn search_threads(&self, query: &str) -> RepoResult<Vec<Thread>> {
            let needle = query.to_lowercase();
            let s = self.read()?;
            let mut v: Vec<_> = s.threads.values()
                .filter(|t| t.title.to_lowercase().contains(&needle) || t.content.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            newest_first(&mut v);
            Ok(v)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, thread_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.comments
                .values()
                .filter(|c| c.thread_id == thread_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));    // ascending
            Ok(v)
        }
        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            self.read()?.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_comment(&self, author: Id, thread_id: Id, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.threads.contains_key(&thread_id) { return Err(RepoError::NotFound); }
            if !s.users.contains_key(&author) { return Err(RepoError::NotFound); }
            let id = s.next_id();
            let comment = Comment { id, content: new.content, user_id: author, thread_id, created_at: Utc::now() };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }
        async fn count_comments(&self, thread_id: Id) -> RepoResult<i64> {
            Ok(self.read()?.comments.values().filter(|c| c.thread_id == thread_id).count() as i64)
        }
    }

    #[async_trait]
    impl VoteRepo for InMemRepo {
        async fn cast_vote(&self, voter: Id, target: VoteTarget, value: VoteValue) -> RepoResult<VoteOutcome> {
            let mut s = self.write()?;
            if !s.users.contains_key(&voter) { return Err(RepoError::NotFound); }
            let author = s.author_of(target)?;
            let now = Utc::now();

            let (vote, previous) = match s.find_vote(voter, target) {
                Some(vote_id) => {
                    let v = s.votes.get_mut(&vote_id).ok_or(RepoError::NotFound)?;
                    let previous = v.value;
                    v.value = value;
                    v.updated_at = now;
                    (v.clone(), Some(previous))
                }
                None => {
                    let id = s.next_id();
                    let v = Vote {
                        id,
                        user_id: voter,
                        thread_id: target.thread_id(),
                        comment_id: target.comment_id(),
                        value,
                        created_at: now,
                        updated_at: now,
                    };
                    s.votes.insert(id, v.clone());
                    (v, None)
                }
            };

            let delta = author_delta(voter, author, previous, Some(value));
            s.bump_reputation(author, delta);
            let tally = s.tally(target);
            drop(s);
            self.persist();
            Ok(VoteOutcome { vote: Some(vote), previous, reputation_delta: delta, tally })
        }

        async fn retract_vote(&self, voter: Id, target: VoteTarget) -> RepoResult<VoteOutcome> {
            let mut s = self.write()?;
            let author = s.author_of(target)?;
            let vote_id = s.find_vote(voter, target).ok_or(RepoError::NotFound)?;
            let removed = s.votes.remove(&vote_id).ok_or(RepoError::NotFound)?;
            let delta = author_delta(voter, author, Some(removed.value), None);
            s.bump_reputation(author, delta);
            let tally = s.tally(target);
            drop(s);
            self.persist();
            Ok(VoteOutcome { vote: None, previous: Some(removed.value), reputation_delta: delta, tally })
        }

        async fn get_user_vote(&self, voter: Id, target: VoteTarget) -> RepoResult<Option<Vote>> {
            let s = self.read()?;
            Ok(s.find_vote(voter, target).and_then(|id| s.votes.get(&id).cloned()))
        }

        async fn tally(&self, target: VoteTarget) -> RepoResult<VoteTally> {
            Ok(self.read()?.tally(target))
        }
    }

    #[async_trait]
    impl RewardRepo for InMemRepo {
        async fn list_rewards(&self) -> RepoResult<Vec<RewardItem>> {
            Ok(sorted_by_id(&self.read()?.rewards, |r| r.id))
        }
        async fn get_reward(&self, id: Id) -> RepoResult<RewardItem> {
            self.read()?.rewards.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_reward(&self, new: NewRewardItem) -> RepoResult<RewardItem> {
            let mut s = self.write()?;
            let id = s.next_id();
            let item = RewardItem { id, name: new.name, description: new.description, cost: new.cost, created_at: Utc::now() };
            s.rewards.insert(id, item.clone());
            drop(s);
            self.persist();
            Ok(item)
        }
        async fn purchase_reward(&self, user_id: Id, reward_id: Id) -> RepoResult<Purchase> {
            let mut s = self.write()?;
            let reward = s.rewards.get(&reward_id).cloned().ok_or(RepoError::NotFound)?;
            let user = s.users.get_mut(&user_id).ok_or(RepoError::NotFound)?;
            if user.reputation < reward.cost {
                return Err(RepoError::InsufficientReputation { balance: user.reputation, cost: reward.cost });
            }
            user.reputation -= reward.cost;
            let balance = user.reputation;
            let id = s.next_id();
            let user_reward = UserReward { id, user_id, reward_id, purchased_at: Utc::now() };
            s.user_rewards.insert(id, user_reward.clone());
            drop(s);
            self.persist();
            Ok(Purchase { reward, user_reward, balance })
        }
        async fn list_user_rewards(&self, user_id: Id) -> RepoResult<Vec<UserReward>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.user_rewards.values().filter(|r| r.user_id == user_id).cloned().collect();
            v.sort_by_key(|r| r.id);
            Ok(v)
        }
    }

    #[async_trait]
    impl BlogRepo for InMemRepo {
        async fn list_posts(&self) -> RepoResult<Vec<BlogPost>> {
            let mut v = sorted_by_id(&self.read()?.blog_posts, |p| p.id);
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }
        async fn get_post(&self, id: Id) -> RepoResult<BlogPost> {
            self.read()?.blog_posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_post_by_slug(&self, slug: &str) -> RepoResult<BlogPost> {
            let s = self.read()?;
            s.blog_posts.values().find(|p| p.slug == slug).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_post(&self, author: Id, slug: String, new: NewBlogPost) -> RepoResult<BlogPost> {
            let mut s = self.write()?;
            if s.blog_posts.values().any(|p| p.slug == slug) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let id = s.next_id();
            let post = BlogPost { id, title: new.title, slug, content: new.content, user_id: author, created_at: now, updated_at: now };
            s.blog_posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }
        async fn update_post(&self, id: Id, upd: UpdateBlogPost) -> RepoResult<BlogPost> {
            let mut s = self.write()?;
            let post = s.blog_posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title { post.title = title; }
            if let Some(content) = upd.content { post.content = content; }
            post.updated_at = Utc::now();
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
        async fn list_authors(&self) -> RepoResult<Vec<BlogAuthor>> {
            Ok(sorted_by_id(&self.read()?.blog_authors, |a| a.id))
        }
        async fn is_author(&self, user_id: Id) -> RepoResult<bool> {
            Ok(self.read()?.blog_authors.values().any(|a| a.user_id == user_id))
        }
        async fn add_author(&self, user_id: Id) -> RepoResult<BlogAuthor> {
            let mut s = self.write()?;
            if !s.users.contains_key(&user_id) { return Err(RepoError::NotFound); }
            if s.blog_authors.values().any(|a| a.user_id == user_id) { return Err(RepoError::Conflict); }
            let id = s.next_id();
            let author = BlogAuthor { id, user_id, created_at: Utc::now() };
            s.blog_authors.insert(id, author.clone());
            drop(s);
            self.persist();
            Ok(author)
        }
        async fn remove_author(&self, user_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            let before = s.blog_authors.len();
            s.blog_authors.retain(|_, a| a.user_id != user_id);
            if s.blog_authors.len() == before { return Err(RepoError::NotFound); }
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl ProjectRepo for InMemRepo {
        async fn list_projects(&self) -> RepoResult<Vec<Project>> {
            Ok(sorted_by_id(&self.read()?.projects, |p| p.id))
        }
        async fn get_project(&self, id: Id) -> RepoResult<Project> {
            self.read()?.projects.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_project(&self, owner: Id, new: NewProject) -> RepoResult<Project> {
            let mut s = self.write()?;
            if !s.users.contains_key(&owner) { return Err(RepoError::NotFound); }
            let id = s.next_id();
            let project = Project {
                id,
                title: new.title,
                description: new.description,
                owner_id: owner,
                max_members: new.max_members,
                status: ProjectStatus::Open,
                created_at: Utc::now(),
            };
            s.projects.insert(id, project.clone());
            drop(s);
            self.persist();
            Ok(project)
        }
        async fn join_project(&self, project_id: Id, user_id: Id) -> RepoResult<ProjectMember> {
            let mut s = self.write()?;
            let project = s.projects.get(&project_id).cloned().ok_or(RepoError::NotFound)?;
            if !s.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            if project.status != ProjectStatus::Open || project.owner_id == user_id {
                return Err(RepoError::Conflict);
            }
            if s.project_members.iter().any(|m| m.project_id == project_id && m.user_id == user_id) {
                return Err(RepoError::Conflict);
            }
            let member = ProjectMember { project_id, user_id, joined_at: Utc::now() };
            s.project_members.push(member.clone());
            let count = s.project_members.iter().filter(|m| m.project_id == project_id).count();
            if count >= project.max_members.max(0) as usize {
                if let Some(p) = s.projects.get_mut(&project_id) { p.status = ProjectStatus::Closed; }
            }
            drop(s);
            self.persist();
            Ok(member)
        }
        async fn list_members(&self, project_id: Id) -> RepoResult<Vec<ProjectMember>> {
            let s = self.read()?;
            Ok(s.project_members.iter().filter(|m| m.project_id == project_id).cloned().collect())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{PgConnection, Pool, Postgres};
    use tracing::error;

    const USER_COLS: &str = "id, username, email, name, bio, avatar_url, reputation, is_admin, created_at";
    const THREAD_COLS: &str = "id, title, content, user_id, category_id, created_at, updated_at, views";
    const COMMENT_COLS: &str = "id, content, user_id, thread_id, created_at";
    const VOTE_COLS: &str = "id, user_id, thread_id, comment_id, value, created_at, updated_at";
    const REWARD_COLS: &str = "id, name, description, cost, created_at";
    const POST_COLS: &str = "id, title, slug, content, user_id, created_at, updated_at";
    const PROJECT_COLS: &str = "id, title, description, owner_id, max_members, status, created_at";

    /// Map driver errors onto repository semantics (unique → Conflict, FK → NotFound).
    fn db_err(e: sqlx::Error) -> RepoError {
        if let sqlx::Error::RowNotFound = e {
            return RepoError::NotFound;
        }
        if let Some(code) = e.as_database_error().and_then(|d| d.code()) {
            match code.as_ref() {
                "23505" => return RepoError::Conflict,
                "23503" => return RepoError::NotFound,
                _ => {}
            }
        }
        error!("postgres error: {e}");
        RepoError::Internal(e.to_string())
    }

    #[derive(sqlx::FromRow)]
    struct VoteRow {
        id: Id,
        user_id: Id,
        thread_id: Option<Id>,
        comment_id: Option<Id>,
        value: i16,
        created_at: chrono::DateTime<Utc>,
        updated_at: chrono::DateTime<Utc>,
    }

    impl TryFrom<VoteRow> for Vote {
        type Error = RepoError;
        fn try_from(r: VoteRow) -> Result<Self, Self::Error> {
            let value = VoteValue::try_from(i64::from(r.value)).map_err(|e| RepoError::Internal(e.to_string()))?;
            Ok(Vote {
                id: r.id,
                user_id: r.user_id,
                thread_id: r.thread_id,
                comment_id: r.comment_id,
                value,
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
        }
    }

    #[derive(sqlx::FromRow)]
    struct ProjectRow {
        id: Id,
        title: String,
        description: String,
        owner_id: Id,
        max_members: i32,
        status: String,
        created_at: chrono::DateTime<Utc>,
    }

    impl TryFrom<ProjectRow> for Project {
        type Error = RepoError;
        fn try_from(r: ProjectRow) -> Result<Self, Self::Error> {
            let status = r.status.parse::<ProjectStatus>().map_err(RepoError::Internal)?;
            Ok(Project {
                id: r.id,
                title: r.title,
                description: r.description,
                owner_id: r.owner_id,
                max_members: r.max_members,
                status,
                created_at: r.created_at,
            })
        }
    }

    fn target_column(target: VoteTarget) -> (&'static str, Id) {
        match target {
            VoteTarget::Thread(id) => ("thread_id", id),
            VoteTarget::Comment(id) => ("comment_id", id),
        }
    }

    async fn tally_on(conn: &mut PgConnection, target: VoteTarget) -> RepoResult<VoteTally> {
        let (col, id) = target_column(target);
        let (up, down): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FILTER (WHERE value > 0), COUNT(*) FILTER (WHERE value < 0) FROM votes WHERE {col} = $1"
        ))
        .bind(id)
        .fetch_one(conn).await.map_err(db_err)?;
        Ok(VoteTally::new(up, down))
    }

    async fn author_on(conn: &mut PgConnection, target: VoteTarget) -> RepoResult<Id> {
        let sql = match target {
            VoteTarget::Thread(_) => "SELECT user_id FROM threads WHERE id = $1",
            VoteTarget::Comment(_) => "SELECT user_id FROM comments WHERE id = $1",
        };
        let (_, id) = target_column(target);
        sqlx::query_scalar::<_, Id>(sql).bind(id).fetch_one(conn).await.map_err(db_err)
    }

    fn like_pattern(q: &str) -> String {
        let escaped = q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        format!("%{escaped}%")
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUserRecord) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "INSERT INTO users (username, email, name, password_hash, is_admin) VALUES ($1,$2,$3,$4,$5) RETURNING {USER_COLS}"
            ))
            .bind(&new.username).bind(&new.email).bind(&new.name).bind(&new.password_hash).bind(new.is_admin)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE lower(username) = lower($1)"))
                .bind(username).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn get_password_hash(&self, id: Id) -> RepoResult<String> {
            sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = $1")
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn update_profile(&self, id: Id, upd: ProfileUpdate) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "UPDATE users SET username = COALESCE($2, username), email = COALESCE($3, email), \
                 name = COALESCE($4, name), bio = COALESCE($5, bio), password_hash = COALESCE($6, password_hash) \
                 WHERE id = $1 RETURNING {USER_COLS}"
            ))
            .bind(id)
            .bind(upd.username.as_ref())
            .bind(upd.email.as_ref())
            .bind(upd.name.as_ref())
            .bind(upd.bio.as_ref())
            .bind(upd.password_hash.as_ref())
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn set_admin(&self, id: Id, is_admin: bool) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!("UPDATE users SET is_admin = $2 WHERE id = $1 RETURNING {USER_COLS}"))
                .bind(id).bind(is_admin).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn adjust_reputation(&self, id: Id, delta: i64) -> RepoResult<User> {
            sqlx::query_as::<_, User>(&format!(
                "UPDATE users SET reputation = reputation + $2 WHERE id = $1 RETURNING {USER_COLS}"
            ))
            .bind(id).bind(delta).fetch_one(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl CategoryRepo for PgRepo {
        async fn list_categories(&self) -> RepoResult<Vec<Category>> {
            sqlx::query_as::<_, Category>("SELECT id, name, description, icon FROM categories ORDER BY id")
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("SELECT id, name, description, icon FROM categories WHERE id = $1")
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>(
                "INSERT INTO categories (name, description, icon) VALUES ($1,$2,$3) RETURNING id, name, description, icon"
            )
            .bind(&new.name).bind(&new.description).bind(&new.icon)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl TagRepo for PgRepo {
        async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
            sqlx::query_as::<_, Tag>("SELECT id, name, color FROM tags ORDER BY id")
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn create_tag(&self, new: NewTag) -> RepoResult<Tag> {
            sqlx::query_as::<_, Tag>("INSERT INTO tags (name, color) VALUES ($1,$2) RETURNING id, name, color")
                .bind(&new.name).bind(&new.color)
                .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn tags_for_thread(&self, thread_id: Id) -> RepoResult<Vec<Tag>> {
            sqlx::query_as::<_, Tag>(
                "SELECT t.id, t.name, t.color FROM tags t JOIN thread_tags tt ON tt.tag_id = t.id \
                 WHERE tt.thread_id = $1 ORDER BY t.id"
            )
            .bind(thread_id).fetch_all(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl ThreadRepo for PgRepo {
        async fn list_threads(&self, q: &ThreadQuery) -> RepoResult<Vec<Thread>> {
            sqlx::query_as::<_, Thread>(&format!(
                "SELECT {THREAD_COLS} FROM threads \
                 WHERE ($1::BIGINT IS NULL OR category_id = $1) AND ($2::BIGINT IS NULL OR user_id = $2) \
                 ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
            ))
            .bind(q.category_id)
            .bind(q.author_id)
            .bind(q.limit)
            .bind(q.offset)
            .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            sqlx::query_as::<_, Thread>(&format!("SELECT {THREAD_COLS} FROM threads WHERE id = $1"))
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn create_thread(&self, author: Id, new: NewThread) -> RepoResult<Thread> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let thread = sqlx::query_as::<_, Thread>(&format!(
                "INSERT INTO threads (title, content, user_id, category_id) VALUES ($1,$2,$3,$4) RETURNING {THREAD_COLS}"
            ))
            .bind(&new.title).bind(&new.content).bind(author).bind(new.category_id)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            for tag_id in &new.tag_ids {
                sqlx::query("INSERT INTO thread_tags (thread_id, tag_id) VALUES ($1,$2) ON CONFLICT DO NOTHING")
                    .bind(thread.id).bind(tag_id)
                    .execute(&mut *tx).await.map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
            Ok(thread)
        }
        async fn record_view(&self, id: Id) -> RepoResult<Thread> {
            sqlx::query_as::<_, Thread>(&format!("UPDATE threads SET views = views + 1 WHERE id = $1 RETURNING {THREAD_COLS}"))
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn search_threads(&self, query: &str) -> RepoResult<Vec<Thread>> {
            sqlx::query_as::<_, Thread>(&format!(
                "SELECT {THREAD_COLS} FROM threads WHERE title ILIKE $1 OR content ILIKE $1 ORDER BY created_at DESC, id DESC"
            ))
            .bind(like_pattern(query))
            .fetch_all(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, thread_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(&format!(
                "SELECT {COMMENT_COLS} FROM comments WHERE thread_id = $1 ORDER BY created_at ASC, id ASC"
            ))
            .bind(thread_id).fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(&format!("SELECT {COMMENT_COLS} FROM comments WHERE id = $1"))
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn create_comment(&self, author: Id, thread_id: Id, new: NewComment) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(&format!(
                "INSERT INTO comments (content, user_id, thread_id) VALUES ($1,$2,$3) RETURNING {COMMENT_COLS}"
            ))
            .bind(&new.content).bind(author).bind(thread_id)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn count_comments(&self, thread_id: Id) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments WHERE thread_id = $1")
                .bind(thread_id).fetch_one(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl VoteRepo for PgRepo {
        async fn cast_vote(&self, voter: Id, target: VoteTarget, value: VoteValue) -> RepoResult<VoteOutcome> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            // lock the voter row so concurrent votes by the same user serialize
            sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(voter).fetch_one(&mut *tx).await.map_err(db_err)?;
            let author = author_on(&mut tx, target).await?;
            let (col, target_id) = target_column(target);

            let existing = sqlx::query_as::<_, VoteRow>(&format!(
                "SELECT {VOTE_COLS} FROM votes WHERE user_id = $1 AND {col} = $2"
            ))
            .bind(voter).bind(target_id)
            .fetch_optional(&mut *tx).await.map_err(db_err)?;
            let previous = existing.map(Vote::try_from).transpose()?;

            let row = match &previous {
                Some(old) => sqlx::query_as::<_, VoteRow>(&format!(
                    "UPDATE votes SET value = $2, updated_at = now() WHERE id = $1 RETURNING {VOTE_COLS}"
                ))
                .bind(old.id).bind(value.as_i64() as i16)
                .fetch_one(&mut *tx).await.map_err(db_err)?,
                None => sqlx::query_as::<_, VoteRow>(&format!(
                    "INSERT INTO votes (user_id, thread_id, comment_id, value) VALUES ($1,$2,$3,$4) RETURNING {VOTE_COLS}"
                ))
                .bind(voter).bind(target.thread_id()).bind(target.comment_id()).bind(value.as_i64() as i16)
                .fetch_one(&mut *tx).await.map_err(db_err)?,
            };
            let vote = Vote::try_from(row)?;
            let previous = previous.map(|v| v.value);

            let delta = author_delta(voter, author, previous, Some(value));
            if delta != 0 {
                sqlx::query("UPDATE users SET reputation = reputation + $2 WHERE id = $1")
                    .bind(author).bind(delta)
                    .execute(&mut *tx).await.map_err(db_err)?;
            }
            let tally = tally_on(&mut tx, target).await?;
            tx.commit().await.map_err(db_err)?;
            Ok(VoteOutcome { vote: Some(vote), previous, reputation_delta: delta, tally })
        }

        async fn retract_vote(&self, voter: Id, target: VoteTarget) -> RepoResult<VoteOutcome> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(voter).fetch_one(&mut *tx).await.map_err(db_err)?;
            let author = author_on(&mut tx, target).await?;
            let (col, target_id) = target_column(target);
            let removed = sqlx::query_as::<_, VoteRow>(&format!(
                "DELETE FROM votes WHERE user_id = $1 AND {col} = $2 RETURNING {VOTE_COLS}"
            ))
            .bind(voter).bind(target_id)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            let removed = Vote::try_from(removed)?;

            let delta = author_delta(voter, author, Some(removed.value), None);
            if delta != 0 {
                sqlx::query("UPDATE users SET reputation = reputation + $2 WHERE id = $1")
                    .bind(author).bind(delta)
                    .execute(&mut *tx).await.map_err(db_err)?;
            }
            let tally = tally_on(&mut tx, target).await?;
            tx.commit().await.map_err(db_err)?;
            Ok(VoteOutcome { vote: None, previous: Some(removed.value), reputation_delta: delta, tally })
        }

        async fn get_user_vote(&self, voter: Id, target: VoteTarget) -> RepoResult<Option<Vote>> {
            let (col, target_id) = target_column(target);
            let row = sqlx::query_as::<_, VoteRow>(&format!(
                "SELECT {VOTE_COLS} FROM votes WHERE user_id = $1 AND {col} = $2"
            ))
            .bind(voter).bind(target_id)
            .fetch_optional(&self.pool).await.map_err(db_err)?;
            row.map(Vote::try_from).transpose()
        }

        async fn tally(&self, target: VoteTarget) -> RepoResult<VoteTally> {
            let mut conn = self.pool.acquire().await.map_err(db_err)?;
            tally_on(&mut conn, target).await
        }
    }

    #[async_trait]
    impl RewardRepo for PgRepo {
        async fn list_rewards(&self) -> RepoResult<Vec<RewardItem>> {
            sqlx::query_as::<_, RewardItem>(&format!("SELECT {REWARD_COLS} FROM reward_items ORDER BY id"))
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn get_reward(&self, id: Id) -> RepoResult<RewardItem> {
            sqlx::query_as::<_, RewardItem>(&format!("SELECT {REWARD_COLS} FROM reward_items WHERE id = $1"))
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn create_reward(&self, new: NewRewardItem) -> RepoResult<RewardItem> {
            sqlx::query_as::<_, RewardItem>(&format!(
                "INSERT INTO reward_items (name, description, cost) VALUES ($1,$2,$3) RETURNING {REWARD_COLS}"
            ))
            .bind(&new.name).bind(&new.description).bind(new.cost)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn purchase_reward(&self, user_id: Id, reward_id: Id) -> RepoResult<Purchase> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let reward = sqlx::query_as::<_, RewardItem>(&format!("SELECT {REWARD_COLS} FROM reward_items WHERE id = $1"))
                .bind(reward_id).fetch_one(&mut *tx).await.map_err(db_err)?;

            // conditional debit: no row back means missing user or short balance
            let balance = sqlx::query_scalar::<_, i64>(
                "UPDATE users SET reputation = reputation - $2 WHERE id = $1 AND reputation >= $2 RETURNING reputation"
            )
            .bind(user_id).bind(reward.cost)
            .fetch_optional(&mut *tx).await.map_err(db_err)?;
            let Some(balance) = balance else {
                let current = sqlx::query_scalar::<_, i64>("SELECT reputation FROM users WHERE id = $1")
                    .bind(user_id).fetch_optional(&mut *tx).await.map_err(db_err)?;
                return Err(match current {
                    Some(balance) => RepoError::InsufficientReputation { balance, cost: reward.cost },
                    None => RepoError::NotFound,
                });
            };

            let user_reward = sqlx::query_as::<_, UserReward>(
                "INSERT INTO user_rewards (user_id, reward_id) VALUES ($1,$2) RETURNING id, user_id, reward_id, purchased_at"
            )
            .bind(user_id).bind(reward_id)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(Purchase { reward, user_reward, balance })
        }
        async fn list_user_rewards(&self, user_id: Id) -> RepoResult<Vec<UserReward>> {
            sqlx::query_as::<_, UserReward>(
                "SELECT id, user_id, reward_id, purchased_at FROM user_rewards WHERE user_id = $1 ORDER BY id"
            )
            .bind(user_id).fetch_all(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl BlogRepo for PgRepo {
        async fn list_posts(&self) -> RepoResult<Vec<BlogPost>> {
            sqlx::query_as::<_, BlogPost>(&format!("SELECT {POST_COLS} FROM blog_posts ORDER BY created_at DESC, id DESC"))
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn get_post(&self, id: Id) -> RepoResult<BlogPost> {
            sqlx::query_as::<_, BlogPost>(&format!("SELECT {POST_COLS} FROM blog_posts WHERE id = $1"))
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn get_post_by_slug(&self, slug: &str) -> RepoResult<BlogPost> {
            sqlx::query_as::<_, BlogPost>(&format!("SELECT {POST_COLS} FROM blog_posts WHERE slug = $1"))
                .bind(slug).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn create_post(&self, author: Id, slug: String, new: NewBlogPost) -> RepoResult<BlogPost> {
            sqlx::query_as::<_, BlogPost>(&format!(
                "INSERT INTO blog_posts (title, slug, content, user_id) VALUES ($1,$2,$3,$4) RETURNING {POST_COLS}"
            ))
            .bind(&new.title).bind(&slug).bind(&new.content).bind(author)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn update_post(&self, id: Id, upd: UpdateBlogPost) -> RepoResult<BlogPost> {
            sqlx::query_as::<_, BlogPost>(&format!(
                "UPDATE blog_posts SET title = COALESCE($2, title), content = COALESCE($3, content), updated_at = now() \
                 WHERE id = $1 RETURNING {POST_COLS}"
            ))
            .bind(id).bind(upd.title.as_ref()).bind(upd.content.as_ref())
            .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn list_authors(&self) -> RepoResult<Vec<BlogAuthor>> {
            sqlx::query_as::<_, BlogAuthor>("SELECT id, user_id, created_at FROM blog_authors ORDER BY id")
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn is_author(&self, user_id: Id) -> RepoResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM blog_authors WHERE user_id = $1)")
                .bind(user_id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn add_author(&self, user_id: Id) -> RepoResult<BlogAuthor> {
            sqlx::query_as::<_, BlogAuthor>(
                "INSERT INTO blog_authors (user_id) VALUES ($1) RETURNING id, user_id, created_at"
            )
            .bind(user_id).fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn remove_author(&self, user_id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM blog_authors WHERE user_id = $1")
                .bind(user_id).execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl ProjectRepo for PgRepo {
        async fn list_projects(&self) -> RepoResult<Vec<Project>> {
            sqlx::query_as::<_, ProjectRow>(&format!("SELECT {PROJECT_COLS} FROM projects ORDER BY id"))
                .fetch_all(&self.pool).await.map_err(db_err)?
                .into_iter()
                .map(Project::try_from)
                .collect()
        }
        async fn get_project(&self, id: Id) -> RepoResult<Project> {
            sqlx::query_as::<_, ProjectRow>(&format!("SELECT {PROJECT_COLS} FROM projects WHERE id = $1"))
                .bind(id).fetch_one(&self.pool).await.map_err(db_err)?
                .try_into()
        }
        async fn create_project(&self, owner: Id, new: NewProject) -> RepoResult<Project> {
            sqlx::query_as::<_, ProjectRow>(&format!(
                "INSERT INTO projects (title, description, owner_id, max_members) VALUES ($1,$2,$3,$4) RETURNING {PROJECT_COLS}"
            ))
            .bind(&new.title).bind(&new.description).bind(owner).bind(new.max_members)
            .fetch_one(&self.pool).await.map_err(db_err)?
            .try_into()
        }
        async fn join_project(&self, project_id: Id, user_id: Id) -> RepoResult<ProjectMember> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let project: Project = sqlx::query_as::<_, ProjectRow>(&format!("SELECT {PROJECT_COLS} FROM projects WHERE id = $1 FOR UPDATE"))
                .bind(project_id).fetch_one(&mut *tx).await.map_err(db_err)?
                .try_into()?;
            if project.status != ProjectStatus::Open || project.owner_id == user_id {
                return Err(RepoError::Conflict);
            }
            let member = sqlx::query_as::<_, ProjectMember>(
                "INSERT INTO project_members (project_id, user_id) VALUES ($1,$2) RETURNING project_id, user_id, joined_at"
            )
            .bind(project_id).bind(user_id)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM project_members WHERE project_id = $1")
                .bind(project_id).fetch_one(&mut *tx).await.map_err(db_err)?;
            if count >= i64::from(project.max_members) {
                sqlx::query("UPDATE projects SET status = 'closed' WHERE id = $1")
                    .bind(project_id).execute(&mut *tx).await.map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
            Ok(member)
        }
        async fn list_members(&self, project_id: Id) -> RepoResult<Vec<ProjectMember>> {
            sqlx::query_as::<_, ProjectMember>(
                "SELECT project_id, user_id, joined_at FROM project_members WHERE project_id = $1 ORDER BY joined_at"
            )
            .bind(project_id).fetch_all(&self.pool).await.map_err(db_err)
        }
    }
}
