//! Conformance checks shared by every [`Repository`] implementation.
//!
//! Each function takes a fresh, empty backend and panics if the backend
//! violates the contract. Backend test suites call them one per test.

use burrow_core::{Insertion, Lookup, Repository, ShortCode};
use std::collections::HashSet;
use std::sync::Arc;

fn code(s: &str) -> ShortCode {
    ShortCode::new_unchecked(s)
}

pub async fn create_then_get_round_trips<R: Repository>(repo: &R) {
    let url = "https://example.org/round-trip";
    let inserted = repo.create("u1", url).await.unwrap();

    assert!(matches!(inserted, Insertion::Created(_)));
    assert_eq!(
        repo.get(inserted.code()).await.unwrap(),
        Lookup::Found(url.to_string())
    );
}

pub async fn get_unknown_code_is_not_found<R: Repository>(repo: &R) {
    assert_eq!(repo.get(&code("missing1")).await.unwrap(), Lookup::NotFound);
}

pub async fn duplicate_url_returns_first_code<R: Repository>(repo: &R) {
    let url = "https://example.org/duplicate";
    let first = repo.create("u1", url).await.unwrap();
    let same_owner = repo.create("u1", url).await.unwrap();
    let other_owner = repo.create("u2", url).await.unwrap();

    assert!(matches!(first, Insertion::Created(_)));
    assert_eq!(same_owner, Insertion::Existing(first.code().clone()));
    assert_eq!(other_owner, Insertion::Existing(first.code().clone()));
}

pub async fn list_by_owner_filters_owner<R: Repository>(repo: &R) {
    let a = repo.create("u1", "https://example.org/a").await.unwrap();
    let b = repo.create("u1", "https://example.org/b").await.unwrap();
    repo.create("u2", "https://example.org/c").await.unwrap();

    let listed: HashSet<_> = repo
        .list_by_owner("u1")
        .await
        .unwrap()
        .into_iter()
        .map(|record| {
            assert_eq!(record.owner_id.as_deref(), Some("u1"));
            assert!(!record.deleted);
            record.short_code
        })
        .collect();

    assert_eq!(listed, HashSet::from([a.code().clone(), b.code().clone()]));
    assert!(repo.list_by_owner("nobody").await.unwrap().is_empty());
}

pub async fn delete_batch_soft_deletes<R: Repository>(repo: &R) {
    let a = repo.create("u1", "https://example.org/a").await.unwrap();
    let b = repo.create("u1", "https://example.org/b").await.unwrap();

    let deleted = repo
        .delete_batch("u1", &[a.code().clone(), code("missing1")])
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(repo.get(a.code()).await.unwrap(), Lookup::Deleted);
    let listed: Vec<_> = repo
        .list_by_owner("u1")
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.short_code)
        .collect();
    assert_eq!(listed, vec![b.code().clone()]);
}

pub async fn delete_batch_is_idempotent<R: Repository>(repo: &R) {
    let a = repo.create("u1", "https://example.org/a").await.unwrap();
    let batch = [a.code().clone()];

    assert_eq!(repo.delete_batch("u1", &batch).await.unwrap(), 1);
    assert_eq!(repo.delete_batch("u1", &batch).await.unwrap(), 0);
    assert_eq!(repo.delete_batch("u1", &[]).await.unwrap(), 0);
    assert_eq!(repo.get(a.code()).await.unwrap(), Lookup::Deleted);
}

pub async fn delete_by_other_owner_is_noop<R: Repository>(repo: &R) {
    let url = "https://example.org/owned";
    let a = repo.create("u1", url).await.unwrap();

    assert_eq!(repo.delete_batch("u2", &[a.code().clone()]).await.unwrap(), 0);
    assert_eq!(repo.get(a.code()).await.unwrap(), Lookup::Found(url.to_string()));
    assert_eq!(repo.list_by_owner("u1").await.unwrap().len(), 1);
}

pub async fn deleted_url_stays_claimed<R: Repository>(repo: &R) {
    let url = "https://example.org/claimed";
    let a = repo.create("u1", url).await.unwrap();
    repo.delete_batch("u1", &[a.code().clone()]).await.unwrap();

    assert_eq!(
        repo.create("u2", url).await.unwrap(),
        Insertion::Existing(a.code().clone())
    );
    assert_eq!(repo.get(a.code()).await.unwrap(), Lookup::Deleted);
}

pub async fn ping_succeeds<R: Repository>(repo: &R) {
    repo.ping().await.unwrap();
}

/// The walkthrough: shorten for `u1`, conflict for `u2`, list, delete, list.
pub async fn owner_scenario<R: Repository>(repo: &R) {
    let url = "https://example.org/a";

    let created = repo.create("u1", url).await.unwrap();
    let Insertion::Created(x) = created else {
        panic!("expected a fresh code, got {created:?}");
    };
    assert_eq!(x.as_str().len(), 8);

    assert_eq!(
        repo.create("u2", url).await.unwrap(),
        Insertion::Existing(x.clone())
    );

    let listed = repo.list_by_owner("u1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].short_code, x);
    assert_eq!(listed[0].original_url, url);

    repo.delete_batch("u1", &[x.clone()]).await.unwrap();
    assert_eq!(repo.get(&x).await.unwrap(), Lookup::Deleted);
    assert!(repo.list_by_owner("u1").await.unwrap().is_empty());
}

/// Many tasks shortening the same URL converge on exactly one code.
pub async fn concurrent_creates_converge<R: Repository>(repo: Arc<R>) {
    let url = "https://example.org/contended";
    let mut handles = Vec::new();

    for i in 0..16 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            repo.create(&format!("u{i}"), url).await.unwrap()
        }));
    }

    let mut created = 0;
    let mut codes = HashSet::new();
    for handle in handles {
        let insertion = handle.await.unwrap();
        if matches!(insertion, Insertion::Created(_)) {
            created += 1;
        }
        codes.insert(insertion.code().clone());
    }

    assert_eq!(created, 1, "exactly one caller must win");
    assert_eq!(codes.len(), 1, "all callers must observe the same code");
}

/// Many tasks shortening distinct URLs all get distinct codes.
pub async fn concurrent_distinct_creates<R: Repository>(repo: Arc<R>) {
    let mut handles = Vec::new();

    for i in 0..16 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            let url = format!("https://example.org/distinct/{i}");
            let inserted = repo.create("u1", &url).await.unwrap();
            (url, inserted)
        }));
    }

    let mut codes = HashSet::new();
    for handle in handles {
        let (url, inserted) = handle.await.unwrap();
        assert!(matches!(inserted, Insertion::Created(_)));
        assert_eq!(repo.get(inserted.code()).await.unwrap(), Lookup::Found(url));
        codes.insert(inserted.code().clone());
    }
    assert_eq!(codes.len(), 16);
}
