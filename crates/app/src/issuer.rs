use std::future::Future;
use std::time::Instant;

use axum::http::StatusCode;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{error, info, warn};

use estate_desk_core::{AllocationError, Category, Code, CodeAllocator, RngDraws};
use estate_desk_storage::{CodeIndexRepository, InsertOutcome};

use crate::problem::ProblemResponse;

/// Allocate-and-insert rounds before giving up on a contended code space.
const INSERT_ROUNDS: u32 = 3;

/// Assigns reference codes to new entities and persists them.
#[derive(Clone)]
pub struct CodeIssuer {
    allocator: CodeAllocator,
    codes: CodeIndexRepository,
}

impl CodeIssuer {
    pub fn new(allocator: CodeAllocator, codes: CodeIndexRepository) -> Self {
        Self { allocator, codes }
    }

    /// Allocates a free code and hands it to `insert`.
    ///
    /// When the insert reports [`InsertOutcome::CodeTaken`] (another request
    /// claimed the code after our check) a fresh code is allocated, up to
    /// [`INSERT_ROUNDS`] times. Nothing is persisted unless `insert` succeeds.
    pub async fn issue<F, Fut, E>(
        &self,
        category: Category,
        mut insert: F,
    ) -> Result<Code, IssueError<E>>
    where
        F: FnMut(Code) -> Fut,
        Fut: Future<Output = Result<InsertOutcome, E>>,
    {
        let started = Instant::now();
        let mut draws = RngDraws::from_entropy();
        for round in 1..=INSERT_ROUNDS {
            let allocated = match self.allocator.allocate(category, &self.codes, &mut draws).await {
                Ok(allocated) => allocated,
                Err(err) => {
                    if let AllocationError::Exhausted { attempts, .. } = &err {
                        counter!("code_allocation_attempts_total", "category" => category.as_str())
                            .increment(u64::from(*attempts));
                        counter!("code_allocation_exhausted_total", "category" => category.as_str())
                            .increment(1);
                    }
                    error!(
                        stage = "codes",
                        category = %category,
                        error = %err,
                        "code allocation failed"
                    );
                    return Err(IssueError::Allocation(err));
                }
            };
            counter!("code_allocation_attempts_total", "category" => category.as_str())
                .increment(u64::from(allocated.attempts));

            let code = allocated.code;
            match insert(code.clone()).await.map_err(IssueError::Insert)? {
                InsertOutcome::Inserted => {
                    histogram!("code_allocation_seconds", "category" => category.as_str())
                        .record(started.elapsed().as_secs_f64());
                    info!(
                        stage = "codes",
                        category = %category,
                        %code,
                        attempts = allocated.attempts,
                        round,
                        "code issued"
                    );
                    return Ok(code);
                }
                InsertOutcome::CodeTaken => {
                    counter!("code_insert_conflicts_total", "category" => category.as_str())
                        .increment(1);
                    warn!(
                        stage = "codes",
                        category = %category,
                        %code,
                        round,
                        "code claimed concurrently, reallocating"
                    );
                }
            }
        }

        Err(IssueError::Conflict {
            category,
            rounds: INSERT_ROUNDS,
        })
    }
}

#[derive(Debug, Error)]
pub enum IssueError<E> {
    #[error(transparent)]
    Allocation(AllocationError<sqlx::Error>),
    #[error("{category} code kept colliding on insert after {rounds} rounds")]
    Conflict { category: Category, rounds: u32 },
    #[error(transparent)]
    Insert(E),
}

impl<E> IssueError<E> {
    /// Maps the failure to an HTTP problem, delegating insert errors to `insert_problem`.
    pub fn into_problem(
        self,
        insert_problem: impl FnOnce(E) -> ProblemResponse,
    ) -> ProblemResponse {
        match self {
            Self::Allocation(AllocationError::Exhausted { category, attempts }) => {
                ProblemResponse::internal(
                    "allocation_exhausted",
                    format!("no free {category} code after {attempts} attempts"),
                )
            }
            Self::Allocation(AllocationError::Store(err)) => ProblemResponse::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                format!("store query failed: {err}"),
            ),
            Self::Conflict { category, rounds } => ProblemResponse::internal(
                "code_conflict",
                format!("{category} code kept colliding on insert after {rounds} rounds"),
            ),
            Self::Insert(err) => insert_problem(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::test_support::setup_database;
    use estate_desk_core::AllocatorPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Error)]
    #[error("insert failed")]
    struct InsertFailed;

    #[tokio::test]
    async fn returns_code_after_successful_insert() {
        let database = setup_database().await;
        let issuer = CodeIssuer::new(CodeAllocator::default(), database.codes());
        let calls = AtomicU32::new(0);

        let code = issuer
            .issue(Category::Lead, |code| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(code.category(), Category::Lead);
                async { Ok::<_, InsertFailed>(InsertOutcome::Inserted) }
            })
            .await
            .expect("issue succeeds");

        assert!(code.as_str().starts_with("L-"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reallocates_when_insert_loses_the_race() {
        let database = setup_database().await;
        let issuer = CodeIssuer::new(CodeAllocator::default(), database.codes());
        let calls = AtomicU32::new(0);

        let err = issuer
            .issue(Category::Property, |_code| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, InsertFailed>(InsertOutcome::CodeTaken) }
            })
            .await
            .expect_err("every insert conflicts");

        assert!(matches!(
            err,
            IssueError::Conflict {
                category: Category::Property,
                rounds: INSERT_ROUNDS
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), INSERT_ROUNDS);
        assert_eq!(
            err.into_problem(|_| unreachable!()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn insert_errors_propagate_without_retry() {
        let database = setup_database().await;
        let issuer = CodeIssuer::new(CodeAllocator::default(), database.codes());
        let calls = AtomicU32::new(0);

        let err = issuer
            .issue(Category::Property, |_code| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<InsertOutcome, _>(InsertFailed) }
            })
            .await
            .expect_err("insert fails");

        assert!(matches!(err, IssueError::Insert(InsertFailed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_never_calls_insert() {
        let database = setup_database().await;
        let repo = database.properties();
        for value in 0..10 {
            let property = crate::router::test_support::property_with_code(
                Code::format(Category::Property, value, 1),
            );
            repo.insert(&property).await.expect("seed");
        }
        let allocator = CodeAllocator::new(AllocatorPolicy::new(1, 5).unwrap());
        let issuer = CodeIssuer::new(allocator, database.codes());
        let calls = AtomicU32::new(0);

        let err = issuer
            .issue(Category::Property, |_code| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, InsertFailed>(InsertOutcome::Inserted) }
            })
            .await
            .expect_err("code space is full");

        assert!(matches!(
            err,
            IssueError::Allocation(AllocationError::Exhausted { attempts: 5, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let problem = err.into_problem(|_| unreachable!());
        assert_eq!(problem.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn store_failure_during_allocation_maps_to_unavailable() {
        let database = setup_database().await;
        let issuer = CodeIssuer::new(CodeAllocator::default(), database.codes());
        database.pool().close().await;
        let calls = AtomicU32::new(0);

        let err = issuer
            .issue(Category::Lead, |_code| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, InsertFailed>(InsertOutcome::Inserted) }
            })
            .await
            .expect_err("pool is closed");

        assert!(matches!(
            err,
            IssueError::Allocation(AllocationError::Store(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let problem = err.into_problem(|_| unreachable!());
        assert_eq!(problem.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
