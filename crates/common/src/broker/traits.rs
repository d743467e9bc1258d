use crate::broker::{ConsumerLink, InboundMessage};
use crate::domain::{DomainResult, MessageCategory};
use async_trait::async_trait;
use std::sync::Arc;

/// Invoked for every message delivered on a consumer link
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Invoked when the broker closes a consumer link
pub type LinkClosedHandler = Arc<dyn Fn() + Send + Sync>;

/// Invoked when the transport to the broker is lost
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Broker capability used to open the single logical connection
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Connect to the broker
    ///
    /// `on_disconnect` must be called at most once per lost transport and
    /// never from inside this call.
    async fn connect(
        &self,
        on_disconnect: DisconnectHandler,
    ) -> DomainResult<Arc<dyn BrokerConnection>>;
}

/// An established broker connection on which consumers are created
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Create a consumer for `category` messages of `tenant_id`
    ///
    /// # Arguments
    /// * `on_message` - called for every delivered message
    /// * `on_closed` - called when the broker closes the link
    async fn create_consumer(
        &self,
        category: MessageCategory,
        tenant_id: &str,
        on_message: MessageHandler,
        on_closed: LinkClosedHandler,
    ) -> DomainResult<ConsumerLink>;
}
