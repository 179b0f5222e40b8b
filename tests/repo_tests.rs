#![cfg(feature = "inmem-store")]

use agora::{
    models::*,
    repo::{inmem::InMemRepo, RepoError},
    reputation::{VoteTarget, VoteValue},
};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use agora::repo::{BlogRepo, CommentRepo, ProjectRepo, RewardRepo, ThreadRepo, UserRepo, VoteRepo};

/// Seeded store that never touches disk.
fn repo() -> InMemRepo {
    InMemRepo::ephemeral()
}

async fn user(r: &InMemRepo, name: &str) -> User {
    r.create_user(NewUserRecord {
        username: name.into(),
        email: format!("{name}@example.com"),
        name: None,
        password_hash: "x".into(),
        is_admin: false,
    })
    .await
    .unwrap()
}

async fn thread_by(r: &InMemRepo, author: Id) -> Thread {
    r.create_thread(author, NewThread {
        title: "Hello".into(),
        content: "World".into(),
        category_id: 1,
        tag_ids: vec![],
    })
    .await
    .unwrap()
}

async fn reputation(r: &InMemRepo, id: Id) -> i64 {
    r.get_user(id).await.unwrap().reputation
}

#[tokio::test]
async fn duplicate_username_is_conflict_case_insensitive() {
    let r = repo();
    user(&r, "alice").await;
    let err = r
        .create_user(NewUserRecord {
            username: "ALICE".into(),
            email: "other@example.com".into(),
            name: None,
            password_hash: "x".into(),
            is_admin: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
async fn username_and_email_fold_non_ascii_case() {
    let r = repo();
    let emile = user(&r, "Émile").await;
    let err = r
        .create_user(NewUserRecord {
            username: "émile".into(),
            email: "someone@example.com".into(),
            name: None,
            password_hash: "x".into(),
            is_admin: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
    let err = r
        .create_user(NewUserRecord {
            username: "zoë".into(),
            email: "ÉMILE@EXAMPLE.COM".into(),
            name: None,
            password_hash: "x".into(),
            is_admin: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
    assert_eq!(r.get_user_by_username("ÉMILE").await.unwrap().id, emile.id);
}

#[tokio::test]
async fn thread_requires_existing_category_and_tags() {
    let r = repo();
    let a = user(&r, "alice").await;
    let err = r
        .create_thread(a.id, NewThread { title: "t".into(), content: "c".into(), category_id: 9999, tag_ids: vec![] })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
    let err = r
        .create_thread(a.id, NewThread { title: "t".into(), content: "c".into(), category_id: 1, tag_ids: vec![9999] })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn upvote_then_flip_then_retract_moves_reputation_by_delta() {
    let r = repo();
    let author = user(&r, "author").await;
    let voter = user(&r, "voter").await;
    let t = thread_by(&r, author.id).await;
    let target = VoteTarget::Thread(t.id);

    let out = r.cast_vote(voter.id, target, VoteValue::Up).await.unwrap();
    assert_eq!(out.reputation_delta, 1);
    assert_eq!(out.previous, None);
    assert_eq!(reputation(&r, author.id).await, 1);

    // flipping swings by two, not by one
    let out = r.cast_vote(voter.id, target, VoteValue::Down).await.unwrap();
    assert_eq!(out.reputation_delta, -2);
    assert_eq!(out.previous, Some(VoteValue::Up));
    assert_eq!(reputation(&r, author.id).await, -1);
    assert_eq!(out.tally.upvotes, 0);
    assert_eq!(out.tally.downvotes, 1);

    let out = r.retract_vote(voter.id, target).await.unwrap();
    assert_eq!(out.reputation_delta, 1);
    assert!(out.vote.is_none());
    assert_eq!(reputation(&r, author.id).await, 0);
    assert_eq!(out.tally.score, 0);
}

#[tokio::test]
async fn repeated_identical_vote_changes_nothing() {
    let r = repo();
    let author = user(&r, "author").await;
    let voter = user(&r, "voter").await;
    let t = thread_by(&r, author.id).await;
    let target = VoteTarget::Thread(t.id);

    let first = r.cast_vote(voter.id, target, VoteValue::Up).await.unwrap();
    let second = r.cast_vote(voter.id, target, VoteValue::Up).await.unwrap();
    assert_eq!(second.reputation_delta, 0);
    // one row per user and target, updated in place
    assert_eq!(first.vote.unwrap().id, second.vote.unwrap().id);
    assert_eq!(second.tally.upvotes, 1);
    assert_eq!(reputation(&r, author.id).await, 1);
}

#[tokio::test]
async fn self_vote_is_tallied_but_earns_nothing() {
    let r = repo();
    let author = user(&r, "author").await;
    let t = thread_by(&r, author.id).await;
    let out = r.cast_vote(author.id, VoteTarget::Thread(t.id), VoteValue::Up).await.unwrap();
    assert_eq!(out.reputation_delta, 0);
    assert_eq!(out.tally.score, 1);
    assert_eq!(reputation(&r, author.id).await, 0);
}

#[tokio::test]
async fn comment_votes_are_separate_from_thread_votes() {
    let r = repo();
    let op = user(&r, "op").await;
    let commenter = user(&r, "commenter").await;
    let voter = user(&r, "voter").await;
    let t = thread_by(&r, op.id).await;
    let c = r.create_comment(commenter.id, t.id, NewComment { content: "nice".into() }).await.unwrap();
    assert_eq!(r.get_comment(c.id).await.unwrap().user_id, commenter.id);

    r.cast_vote(voter.id, VoteTarget::Thread(t.id), VoteValue::Up).await.unwrap();
    r.cast_vote(voter.id, VoteTarget::Comment(c.id), VoteValue::Down).await.unwrap();

    assert_eq!(reputation(&r, op.id).await, 1);
    assert_eq!(reputation(&r, commenter.id).await, -1);
    assert_eq!(r.tally(VoteTarget::Thread(t.id)).await.unwrap().score, 1);
    assert_eq!(r.tally(VoteTarget::Comment(c.id)).await.unwrap().score, -1);
    let mine = r.get_user_vote(voter.id, VoteTarget::Comment(c.id)).await.unwrap().unwrap();
    assert_eq!(mine.value, VoteValue::Down);
    assert_eq!(mine.comment_id, Some(c.id));
    assert_eq!(mine.thread_id, None);
}

#[tokio::test]
async fn vote_on_missing_target_or_retract_without_vote_is_not_found() {
    let r = repo();
    let voter = user(&r, "voter").await;
    let err = r.cast_vote(voter.id, VoteTarget::Thread(424242), VoteValue::Up).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    let t = thread_by(&r, voter.id).await;
    let err = r.retract_vote(voter.id, VoteTarget::Thread(t.id)).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn purchase_debits_and_grants_atomically() {
    let r = repo();
    let buyer = user(&r, "buyer").await;
    r.adjust_reputation(buyer.id, 10).await.unwrap();
    let item = r
        .create_reward(NewRewardItem { name: "Badge".into(), description: None, cost: 7 })
        .await
        .unwrap();

    assert_eq!(r.get_reward(item.id).await.unwrap().cost, 7);
    let p = r.purchase_reward(buyer.id, item.id).await.unwrap();
    assert_eq!(p.balance, 3);
    assert_eq!(p.user_reward.reward_id, item.id);
    assert_eq!(reputation(&r, buyer.id).await, 3);

    // second purchase would go negative: rejected with nothing changed
    let err = r.purchase_reward(buyer.id, item.id).await.unwrap_err();
    assert!(matches!(err, RepoError::InsufficientReputation { balance: 3, cost: 7 }));
    assert_eq!(reputation(&r, buyer.id).await, 3);
    assert_eq!(r.list_user_rewards(buyer.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn purchase_with_exact_balance_reaches_zero() {
    let r = repo();
    let buyer = user(&r, "buyer").await;
    r.adjust_reputation(buyer.id, 5).await.unwrap();
    let item = r.create_reward(NewRewardItem { name: "Hat".into(), description: None, cost: 5 }).await.unwrap();
    assert_eq!(r.purchase_reward(buyer.id, item.id).await.unwrap().balance, 0);
}

#[tokio::test]
async fn purchase_of_unknown_reward_is_not_found() {
    let r = repo();
    let buyer = user(&r, "buyer").await;
    let err = r.purchase_reward(buyer.id, 999_999).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn project_closes_when_full_and_rejects_owner_and_duplicates() {
    let r = repo();
    let owner = user(&r, "owner").await;
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let p = r
        .create_project(owner.id, NewProject { title: "P".into(), description: "d".into(), max_members: 2 })
        .await
        .unwrap();
    assert_eq!(p.status, ProjectStatus::Open);

    assert!(matches!(r.join_project(p.id, owner.id).await.unwrap_err(), RepoError::Conflict));
    r.join_project(p.id, a.id).await.unwrap();
    assert!(matches!(r.join_project(p.id, a.id).await.unwrap_err(), RepoError::Conflict));
    r.join_project(p.id, b.id).await.unwrap();

    assert_eq!(r.get_project(p.id).await.unwrap().status, ProjectStatus::Closed);
    assert!(matches!(r.join_project(p.id, c.id).await.unwrap_err(), RepoError::Conflict));
    assert_eq!(r.list_members(p.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_user_cannot_join_a_project() {
    let r = repo();
    let owner = user(&r, "owner").await;
    let p = r
        .create_project(owner.id, NewProject { title: "P".into(), description: "d".into(), max_members: 1 })
        .await
        .unwrap();
    assert!(matches!(r.join_project(p.id, 987_654).await.unwrap_err(), RepoError::NotFound));
    assert!(r.list_members(p.id).await.unwrap().is_empty());
    assert_eq!(r.get_project(p.id).await.unwrap().status, ProjectStatus::Open);
}

#[tokio::test]
async fn blog_author_registry_and_slug_uniqueness() {
    let r = repo();
    let u = user(&r, "writer").await;
    assert!(!r.is_author(u.id).await.unwrap());
    r.add_author(u.id).await.unwrap();
    assert!(r.is_author(u.id).await.unwrap());
    assert!(matches!(r.add_author(u.id).await.unwrap_err(), RepoError::Conflict));

    let post = r
        .create_post(u.id, "first-post".into(), NewBlogPost { title: "First post".into(), content: "body".into() })
        .await
        .unwrap();
    let dup = r
        .create_post(u.id, "first-post".into(), NewBlogPost { title: "First Post!".into(), content: "again".into() })
        .await
        .unwrap_err();
    assert!(matches!(dup, RepoError::Conflict));

    let updated = r
        .update_post(post.id, UpdateBlogPost { title: Some("Renamed".into()), content: None })
        .await
        .unwrap();
    assert_eq!(updated.slug, "first-post");
    assert_eq!(updated.content, "body");

    r.remove_author(u.id).await.unwrap();
    assert!(matches!(r.remove_author(u.id).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn listing_paginates_newest_first() {
    let r = repo();
    let a = user(&r, "alice").await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(thread_by(&r, a.id).await.id);
    }
    let page = r
        .list_threads(&ThreadQuery { limit: Some(2), offset: Some(1), ..Default::default() })
        .await
        .unwrap();
    let got: Vec<Id> = page.iter().map(|t| t.id).collect();
    assert_eq!(got, vec![ids[3], ids[2]]);

    // offset alone still applies
    let tail = r.list_threads(&ThreadQuery { offset: Some(4), ..Default::default() }).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, ids[0]);
}

#[tokio::test]
async fn snapshot_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let author_id;
    {
        let r = InMemRepo::at(&path);
        let a = user(&r, "author").await;
        let v = user(&r, "voter").await;
        let t = thread_by(&r, a.id).await;
        r.cast_vote(v.id, VoteTarget::Thread(t.id), VoteValue::Up).await.unwrap();
        author_id = a.id;
    }
    let reloaded = InMemRepo::at(&path);
    assert_eq!(reloaded.get_user(author_id).await.unwrap().reputation, 1);
}

#[tokio::test]
async fn snapshot_is_replaced_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let r = InMemRepo::at(&path);
    user(&r, "alice").await;
    user(&r, "bob").await;
    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["state.json".to_string()]);
    let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(v["users"].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn unreadable_snapshot_is_moved_aside_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let r = InMemRepo::at(&path);
        for name in ["alice", "bob", "carol"] {
            user(&r, name).await;
        }
    }
    let full = std::fs::read(&path).unwrap();
    let truncated = &full[..full.len() / 2];
    std::fs::write(&path, truncated).unwrap();

    let r = InMemRepo::at(&path);
    assert!(matches!(r.get_user_by_username("alice").await.unwrap_err(), RepoError::NotFound));
    user(&r, "dave").await;

    let aside: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("state.json.corrupt"))
        .collect();
    assert_eq!(aside.len(), 1);
    assert_eq!(std::fs::read(&aside[0]).unwrap(), truncated);
    assert!(InMemRepo::at(&path).get_user_by_username("dave").await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_by_one_voter_leave_one_row() {
    let r = repo();
    let author = user(&r, "author").await;
    let voter = user(&r, "voter").await.id;
    let target = VoteTarget::Thread(thread_by(&r, author.id).await.id);

    let mut handles = Vec::new();
    for i in 0..32 {
        let r = r.clone();
        let value = if i % 2 == 0 { VoteValue::Up } else { VoteValue::Down };
        handles.push(tokio::spawn(async move { r.cast_vote(voter, target, value).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let tally = r.tally(target).await.unwrap();
    assert_eq!(tally.upvotes + tally.downvotes, 1);
    let last = r.get_user_vote(voter, target).await.unwrap().unwrap();
    // reputation tracks the single surviving vote exactly
    let expected = if last.value == VoteValue::Up { 1 } else { -1 };
    assert_eq!(reputation(&r, author.id).await, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_purchases_spend_the_balance_once() {
    let r = repo();
    let buyer = user(&r, "buyer").await.id;
    r.adjust_reputation(buyer, 5).await.unwrap();
    let item = r.create_reward(NewRewardItem { name: "Hat".into(), description: None, cost: 5 }).await.unwrap().id;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let r = r.clone();
        handles.push(tokio::spawn(async move { r.purchase_reward(buyer, item).await }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(matches!(e, RepoError::InsufficientReputation { balance: 0, cost: 5 })),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(reputation(&r, buyer).await, 0);
    assert_eq!(r.list_user_rewards(buyer).await.unwrap().len(), 1);
}
