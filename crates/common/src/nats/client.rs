use crate::broker::{
    BrokerClient, BrokerConnection, ConsumerLink, DisconnectHandler, LinkClosedHandler,
    MessageHandler,
};
use crate::domain::{DomainError, DomainResult, MessageCategory};
use crate::nats::{consumer_subject, inbound_message_from_nats, set_parent_from_headers};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Span};

/// Broker capability backed by core NATS subscriptions
pub struct NatsBroker {
    url: String,
    connect_timeout: Duration,
}

impl NatsBroker {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl BrokerClient for NatsBroker {
    async fn connect(
        &self,
        on_disconnect: DisconnectHandler,
    ) -> DomainResult<Arc<dyn BrokerConnection>> {
        info!(
            url = %self.url,
            timeout_ms = self.connect_timeout.as_millis() as u64,
            "Connecting to NATS"
        );

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(self.connect_timeout)
            .event_callback(move |event| {
                let on_disconnect = Arc::clone(&on_disconnect);
                async move {
                    match event {
                        async_nats::Event::Disconnected => {
                            warn!("NATS connection lost");
                            on_disconnect();
                        }
                        other => debug!(event = ?other, "NATS connection event"),
                    }
                }
            })
            .connect(self.url.as_str())
            .await
            .map_err(|e| DomainError::ConnectionFailed(format!("{}: {}", self.url, e)))?;

        info!("Successfully connected to NATS");
        Ok(Arc::new(NatsConnection { client }))
    }
}

/// An open NATS connection; each consumer is a plain subscription
pub struct NatsConnection {
    client: async_nats::Client,
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    async fn create_consumer(
        &self,
        category: MessageCategory,
        tenant_id: &str,
        on_message: MessageHandler,
        on_closed: LinkClosedHandler,
    ) -> DomainResult<ConsumerLink> {
        let subject = consumer_subject(category, tenant_id);

        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| DomainError::SubscriptionFailed(format!("{}: {}", subject, e)))?;

        info!(category = %category, subject = %subject, "Consumer created successfully");

        let close_token = CancellationToken::new();
        let link = ConsumerLink::new(category, close_token.clone());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = close_token.cancelled() => {
                        if let Err(e) = subscriber.unsubscribe().await {
                            debug!(error = %e, subject = %subject, "failed to unsubscribe closed consumer");
                        }
                        debug!(subject = %subject, "consumer link closed locally");
                        return;
                    }
                    next = subscriber.next() => {
                        match next {
                            Some(message) => forward_message(category, &message, &on_message),
                            None => break,
                        }
                    }
                }
            }

            warn!(category = %category, subject = %subject, "consumer link closed by broker");
            on_closed();
        });

        Ok(link)
    }
}

/// Hand one NATS message to the consumer's handler
///
/// Each message gets its own root span, parented to the publisher's trace
/// when the message carries W3C trace context headers.
fn forward_message(
    category: MessageCategory,
    message: &async_nats::Message,
    on_message: &MessageHandler,
) {
    let span = info_span!(
        parent: Span::none(),
        "broker_message",
        category = %category,
        subject = %message.subject,
        payload_size = message.payload.len(),
    );
    let _entered = span.enter();

    if let Some(headers) = &message.headers {
        set_parent_from_headers(headers);
    }

    on_message(inbound_message_from_nats(message));
}
