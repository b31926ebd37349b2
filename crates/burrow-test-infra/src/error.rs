use thiserror::Error;

/// Failures while managing a test container.
#[derive(Debug, Error)]
pub enum TestInfraError {
    #[error("test container failed: {0}")]
    Container(#[from] testcontainers::TestcontainersError),
}

pub type Result<T> = std::result::Result<T, TestInfraError>;
