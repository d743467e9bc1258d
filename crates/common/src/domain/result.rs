use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Sink error: {0}")]
    SinkError(String),

    #[error("Broker error: {0}")]
    BrokerError(#[from] anyhow::Error),
}
