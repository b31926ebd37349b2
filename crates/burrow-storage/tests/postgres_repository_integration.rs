//! Runs the conformance suite against a disposable PostgreSQL container.
//!
//! These tests need a Docker daemon; run them with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use burrow_generator::{RandomGenerator, SeqGenerator};
use burrow_storage::{
    conformance, Insertion, Lookup, PostgresRepository, Repository, ShortCode, StorageError,
};
use burrow_test_infra::postgres::{PostgresConfig, PostgresServer};
use sqlx::postgres::PgPoolOptions;

struct Fixture {
    _postgres: PostgresServer,
    pool: sqlx::PgPool,
    repo: PostgresRepository,
}

impl Fixture {
    async fn start() -> Self {
        let postgres = PostgresServer::new(PostgresConfig::builder().build())
            .await
            .expect("start postgres");
        let url = postgres.database_url().await.expect("postgres url");
        let pool = connect_with_retry(&url).await;

        let repo = PostgresRepository::new(pool.clone(), RandomGenerator::new());
        repo.ensure_schema().await.expect("create schema");

        Self {
            _postgres: postgres,
            pool,
            repo,
        }
    }

    /// A second repository over the same pool, for tests that need ownership.
    fn shared(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone(), RandomGenerator::new())
    }
}

async fn connect_with_retry(url: &str) -> sqlx::PgPool {
    let mut last_error = None;

    for _ in 0..20 {
        match PgPoolOptions::new().max_connections(20).connect(url).await {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

macro_rules! postgres_conformance {
    ($($check:ident),* $(,)?) => {
        $(
            #[tokio::test]
            #[ignore = "requires a docker daemon"]
            async fn $check() {
                let fixture = Fixture::start().await;
                conformance::$check(&fixture.repo).await;
            }
        )*
    };
}

postgres_conformance!(
    create_then_get_round_trips,
    get_unknown_code_is_not_found,
    duplicate_url_returns_first_code,
    list_by_owner_filters_owner,
    delete_batch_soft_deletes,
    delete_batch_is_idempotent,
    delete_by_other_owner_is_noop,
    deleted_url_stays_claimed,
    ping_succeeds,
    owner_scenario,
);

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn concurrent_creates_converge() {
    let fixture = Fixture::start().await;
    conformance::concurrent_creates_converge(Arc::new(fixture.shared())).await;
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn concurrent_distinct_creates() {
    let fixture = Fixture::start().await;
    conformance::concurrent_distinct_creates(Arc::new(fixture.shared())).await;
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn ensure_schema_is_idempotent() {
    let fixture = Fixture::start().await;
    fixture.repo.ensure_schema().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn colliding_code_is_regenerated() {
    let fixture = Fixture::start().await;
    let repo = PostgresRepository::new(fixture.pool.clone(), SeqGenerator::with_period("c", 2));

    let first = repo.create("u1", "https://a.example").await.unwrap();
    let second = repo.create("u1", "https://b.example").await.unwrap();
    // the generator wraps to c000000, which the first row holds
    let err = repo.create("u1", "https://c.example").await.unwrap_err();

    assert_eq!(first, Insertion::Created(ShortCode::new_unchecked("c000000")));
    assert_eq!(second, Insertion::Created(ShortCode::new_unchecked("c000001")));
    assert!(matches!(err, StorageError::CodeSpaceExhausted { .. }));
    assert_eq!(
        repo.get(&ShortCode::new_unchecked("c000000")).await.unwrap(),
        Lookup::Found("https://a.example".to_string())
    );
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn records_carry_ids_and_owners() {
    let fixture = Fixture::start().await;

    let inserted = fixture.repo.create("u1", "https://example.com").await.unwrap();
    let records = fixture.repo.list_by_owner("u1").await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(&records[0].short_code, inserted.code());
    assert_eq!(records[0].owner_id.as_deref(), Some("u1"));
    assert!(!records[0].id.is_empty());
}

#[tokio::test]
#[ignore = "requires a docker daemon"]
async fn ping_fails_after_close() {
    let fixture = Fixture::start().await;

    fixture.repo.close().await.unwrap();
    let err = fixture.repo.ping().await.unwrap_err();

    assert!(matches!(err, StorageError::Unavailable(_)));
}
