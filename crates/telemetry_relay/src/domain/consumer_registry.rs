use crate::domain::{RelayError, RelayResult};
use common::broker::{
    BrokerConnection, ConsumerLink, InboundMessage, LinkClosedHandler, MessageHandler,
};
use common::domain::MessageCategory;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Message handler shared by all category consumers
pub type CategoryMessageHandler = Arc<dyn Fn(MessageCategory, InboundMessage) + Send + Sync>;

/// Link-closed handler shared by all category consumers
pub type CategoryClosedHandler = Arc<dyn Fn(MessageCategory) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    Pending,
    Succeeded,
    Failed(String),
}

/// Outcome of creating one category consumer within a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRegistration {
    pub category: MessageCategory,
    pub status: RegistrationStatus,
}

/// Resolved registration attempt: per-category outcomes plus the live links
#[derive(Debug)]
pub struct Registration {
    registrations: Vec<CategoryRegistration>,
    links: Vec<ConsumerLink>,
}

impl Registration {
    pub fn registrations(&self) -> &[CategoryRegistration] {
        &self.registrations
    }

    pub fn links(&self) -> &[ConsumerLink] {
        &self.links
    }

    pub fn into_links(self) -> Vec<ConsumerLink> {
        self.links
    }

    /// Composite result: `Ok` only if every requested category succeeded,
    /// otherwise the first failure in category order.
    pub fn result(&self) -> RelayResult<()> {
        match self.registrations.iter().find_map(|registration| {
            match &registration.status {
                RegistrationStatus::Failed(reason) => Some((registration.category, reason)),
                _ => None,
            }
        }) {
            Some((category, reason)) => Err(RelayError::ConsumerCreationFailed {
                category,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn failed_categories(&self) -> BTreeSet<MessageCategory> {
        self.registrations
            .iter()
            .filter(|registration| matches!(registration.status, RegistrationStatus::Failed(_)))
            .map(|registration| registration.category)
            .collect()
    }
}

/// Creates one consumer per enabled category on a broker connection
pub struct ConsumerRegistry {
    tenant_id: String,
}

impl ConsumerRegistry {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Create consumers for `categories` concurrently.
    ///
    /// Every creation request is awaited, failures included, so one failing
    /// category never cancels its siblings. Only an empty category set is
    /// an error here; per-category failures are reported in the returned
    /// [`Registration`].
    #[instrument(skip_all, fields(tenant_id = %self.tenant_id, categories = ?categories))]
    pub async fn register(
        &self,
        connection: &dyn BrokerConnection,
        categories: &BTreeSet<MessageCategory>,
        on_message: CategoryMessageHandler,
        on_link_closed: CategoryClosedHandler,
    ) -> RelayResult<Registration> {
        if categories.is_empty() {
            return Err(RelayError::no_category_selected());
        }

        let mut registrations: Vec<CategoryRegistration> = categories
            .iter()
            .map(|&category| CategoryRegistration {
                category,
                status: RegistrationStatus::Pending,
            })
            .collect();

        let requests = categories.iter().map(|&category| {
            let on_message = Arc::clone(&on_message);
            let on_link_closed = Arc::clone(&on_link_closed);

            let message_handler: MessageHandler =
                Arc::new(move |message| on_message(category, message));
            let closed_handler: LinkClosedHandler = Arc::new(move || on_link_closed(category));

            debug!(category = %category, "creating consumer");
            connection.create_consumer(category, &self.tenant_id, message_handler, closed_handler)
        });

        let outcomes = join_all(requests).await;

        let mut links = Vec::with_capacity(outcomes.len());
        for (registration, outcome) in registrations.iter_mut().zip(outcomes) {
            match outcome {
                Ok(link) => {
                    registration.status = RegistrationStatus::Succeeded;
                    links.push(link);
                }
                Err(e) => {
                    warn!(
                        category = %registration.category,
                        error = %e,
                        "failed to create consumer"
                    );
                    registration.status = RegistrationStatus::Failed(e.to_string());
                }
            }
        }

        Ok(Registration {
            registrations,
            links,
        })
    }
}
