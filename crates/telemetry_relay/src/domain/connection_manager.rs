use crate::domain::{
    CategoryClosedHandler, CategoryMessageHandler, ConsumerRegistry, IngestPipeline, RelayConfig,
    RelayError, RelayResult,
};
use common::broker::{BrokerClient, BrokerConnection, ConsumerLink, DisconnectHandler};
use common::domain::MessageCategory;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but at least one category has no live consumer link
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Snapshot published on every lifecycle change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleStatus {
    pub state: ConnectionState,
    pub armed_retries: usize,
}

/// What an armed retry timer will re-attempt when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RetryTarget {
    Connect,
    Category(MessageCategory),
}

impl fmt::Display for RetryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryTarget::Connect => f.write_str("connect"),
            RetryTarget::Category(category) => write!(f, "{} consumer", category),
        }
    }
}

#[derive(Debug)]
enum LifecycleEvent {
    Connect,
    TransportLost {
        generation: u64,
    },
    LinkClosed {
        generation: u64,
        link_id: u64,
        category: MessageCategory,
    },
    RetryFired {
        target: RetryTarget,
        timer_id: u64,
    },
}

struct ArmedRetry {
    timer_id: u64,
    cancel: CancellationToken,
}

/// A live consumer link and the id its closed callback reports
struct OpenLink {
    link_id: u64,
    link: ConsumerLink,
}

/// Cloneable handle to a running [`ConnectionManager`]
#[derive(Clone)]
pub struct RelayHandle {
    events: mpsc::UnboundedSender<LifecycleEvent>,
    status: watch::Receiver<LifecycleStatus>,
}

impl RelayHandle {
    pub fn status(&self) -> watch::Receiver<LifecycleStatus> {
        self.status.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Request an immediate connect. A no-op when already connected.
    pub fn reconnect_now(&self) {
        if self.events.send(LifecycleEvent::Connect).is_err() {
            warn!("connection manager is not running, reconnect request dropped");
        }
    }
}

/// Owns the broker connection, its consumer links and the connection state
///
/// Broker callbacks and retry timers never touch this state directly: they
/// post [`LifecycleEvent`]s that [`ConnectionManager::run`] handles one at a
/// time. Every callback is stamped with the connection generation it was
/// created for so that notifications from a replaced connection are dropped,
/// and link-closed callbacks also carry the id of the link they belong to.
pub struct ConnectionManager {
    broker: Arc<dyn BrokerClient>,
    registry: ConsumerRegistry,
    pipeline: IngestPipeline,
    message_type: String,
    categories: BTreeSet<MessageCategory>,
    retry_delay: Duration,
    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
    events_rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    status_tx: watch::Sender<LifecycleStatus>,
    state: ConnectionState,
    generation: u64,
    connection: Option<Arc<dyn BrokerConnection>>,
    links: BTreeMap<MessageCategory, OpenLink>,
    next_link_id: u64,
    armed: BTreeMap<RetryTarget, ArmedRetry>,
    next_timer_id: u64,
    timers: CancellationToken,
}

impl ConnectionManager {
    pub fn new(broker: Arc<dyn BrokerClient>, pipeline: IngestPipeline, config: &RelayConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(LifecycleStatus {
            state: ConnectionState::Disconnected,
            armed_retries: 0,
        });

        Self {
            broker,
            registry: ConsumerRegistry::new(config.tenant_id.clone()),
            pipeline,
            message_type: config.message_type.clone(),
            categories: config.enabled_categories(),
            retry_delay: config.retry_delay(),
            events_tx,
            events_rx,
            status_tx,
            state: ConnectionState::Disconnected,
            generation: 0,
            connection: None,
            links: BTreeMap::new(),
            next_link_id: 0,
            armed: BTreeMap::new(),
            next_timer_id: 0,
            timers: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            events: self.events_tx.clone(),
            status: self.status_tx.subscribe(),
        }
    }

    /// Connect and keep the relay connected until `shutdown` is cancelled
    ///
    /// Returns `Err` only for a configuration fault, which is never retried.
    #[instrument(
        name = "connection_manager",
        skip_all,
        fields(tenant_id = %self.registry.tenant_id(), mode = %self.message_type)
    )]
    pub async fn run(mut self, shutdown: CancellationToken) -> RelayResult<()> {
        info!(
            retry_delay_ms = self.retry_delay.as_millis() as u64,
            "starting connection manager"
        );

        if self.categories.is_empty() {
            let e = RelayError::no_category_selected();
            error!(error = %e, "invalid relay configuration, not connecting");
            self.stop();
            return Err(e);
        }

        // The receiver lives in `self`, so sending to it cannot fail
        let _ = self.events_tx.send(LifecycleEvent::Connect);

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => break Ok(()),
                },
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                result = self.handle_event(event) => {
                    if let Err(e) = result {
                        break Err(e);
                    }
                }
            }
        };

        self.stop();
        info!("connection manager stopped");
        outcome
    }

    async fn handle_event(&mut self, event: LifecycleEvent) -> RelayResult<()> {
        debug!(event = ?event, state = %self.state, "handling lifecycle event");

        match event {
            LifecycleEvent::Connect => self.connect().await,
            LifecycleEvent::TransportLost { generation } => {
                self.on_transport_lost(generation);
                Ok(())
            }
            LifecycleEvent::LinkClosed {
                generation,
                link_id,
                category,
            } => {
                self.on_link_closed(generation, link_id, category);
                Ok(())
            }
            LifecycleEvent::RetryFired { target, timer_id } => {
                match self.armed.get(&target) {
                    Some(armed) if armed.timer_id == timer_id => {
                        self.armed.remove(&target);
                        self.publish_status();
                    }
                    _ => {
                        debug!(target = %target, "ignoring superseded retry timer");
                        return Ok(());
                    }
                }

                info!(target = %target, "retry timer fired");
                match target {
                    RetryTarget::Connect => self.connect().await,
                    RetryTarget::Category(category) => self.reopen_category(category).await,
                }
            }
        }
    }

    async fn connect(&mut self) -> RelayResult<()> {
        if self.state != ConnectionState::Disconnected {
            debug!(state = %self.state, "connection already established, skipping connect");
            return Ok(());
        }

        self.transition(ConnectionState::Connecting);
        self.generation += 1;

        let generation = self.generation;
        let events = self.events_tx.clone();
        let on_disconnect: DisconnectHandler = Arc::new(move || {
            let _ = events.send(LifecycleEvent::TransportLost { generation });
        });

        match self.broker.connect(on_disconnect).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.disarm(RetryTarget::Connect);
                self.transition(ConnectionState::Connected);
                self.register_categories(self.categories.clone()).await
            }
            Err(e) => {
                error!(error = %e, "failed to connect to broker");
                self.transition(ConnectionState::Disconnected);
                self.schedule_retry(RetryTarget::Connect);
                Ok(())
            }
        }
    }

    async fn register_categories(&mut self, categories: BTreeSet<MessageCategory>) -> RelayResult<()> {
        let Some(connection) = self.connection.clone() else {
            return Ok(());
        };

        self.next_link_id += 1;
        let link_id = self.next_link_id;

        let registration = match self
            .registry
            .register(
                connection.as_ref(),
                &categories,
                self.message_handler(),
                self.link_closed_handler(link_id),
            )
            .await
        {
            Ok(registration) => registration,
            Err(e) if e.is_configuration_fault() => {
                error!(error = %e, "invalid relay configuration, not retrying");
                self.drop_connection();
                self.transition(ConnectionState::Disconnected);
                return Err(e);
            }
            Err(e) => {
                error!(error = %e, "consumer registration failed");
                self.drop_connection();
                self.transition(ConnectionState::Disconnected);
                self.schedule_retry(RetryTarget::Connect);
                return Ok(());
            }
        };

        let result = registration.result();
        let failed = registration.failed_categories();
        for link in registration.into_links() {
            if let Some(stale) = self.links.insert(link.category(), OpenLink { link_id, link }) {
                stale.link.close();
            }
        }

        if let Err(e) = result {
            error!(error = %e, "failed to create relay");

            if self.links.is_empty() {
                self.drop_connection();
                self.transition(ConnectionState::Disconnected);
                self.schedule_retry(RetryTarget::Connect);
            } else {
                self.transition(ConnectionState::Degraded);
                for category in failed {
                    self.schedule_retry(RetryTarget::Category(category));
                }
            }
            return Ok(());
        }

        if self.categories.iter().all(|c| self.links.contains_key(c)) {
            self.transition(ConnectionState::Connected);
            info!(
                tenant_id = %self.registry.tenant_id(),
                mode = %self.message_type,
                "relay created successfully"
            );
        }
        Ok(())
    }

    async fn reopen_category(&mut self, category: MessageCategory) -> RelayResult<()> {
        if self.connection.is_none() {
            debug!(category = %category, "no connection, category re-registers on reconnect");
            return Ok(());
        }
        if self.links.contains_key(&category) {
            debug!(category = %category, "consumer link already open");
            return Ok(());
        }

        self.register_categories(BTreeSet::from([category])).await
    }

    fn on_transport_lost(&mut self, generation: u64) {
        if generation != self.generation || self.connection.is_none() {
            debug!(generation, "ignoring disconnect from a replaced connection");
            return;
        }

        warn!("broker connection lost");
        self.drop_connection();
        self.transition(ConnectionState::Disconnected);
        self.schedule_retry(RetryTarget::Connect);
    }

    fn on_link_closed(&mut self, generation: u64, link_id: u64, category: MessageCategory) {
        if generation != self.generation || self.connection.is_none() {
            debug!(generation, category = %category, "ignoring link closure from a replaced connection");
            return;
        }
        match self.links.get(&category) {
            Some(open) if open.link_id == link_id => {
                self.links.remove(&category);
            }
            Some(_) => {
                debug!(link_id, category = %category, "ignoring closure of a replaced link");
                return;
            }
            None => {
                debug!(category = %category, "consumer link already removed");
                return;
            }
        }

        warn!(category = %category, "consumer link closed by broker");
        self.transition(ConnectionState::Degraded);
        self.schedule_retry(RetryTarget::Category(category));
    }

    fn schedule_retry(&mut self, target: RetryTarget) {
        if self.armed.contains_key(&target) {
            debug!(target = %target, "retry already armed");
            return;
        }

        self.next_timer_id += 1;
        let timer_id = self.next_timer_id;
        let cancel = self.timers.child_token();
        let events = self.events_tx.clone();
        let delay = self.retry_delay;

        info!(
            target = %target,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );

        let timer = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(LifecycleEvent::RetryFired { target, timer_id });
                }
            }
        });

        self.armed.insert(target, ArmedRetry { timer_id, cancel });
        self.publish_status();
    }

    /// Cancel the armed timer for `target`, if any
    fn disarm(&mut self, target: RetryTarget) {
        if let Some(armed) = self.armed.remove(&target) {
            debug!(target = %target, "disarming retry timer");
            armed.cancel.cancel();
            self.publish_status();
        }
    }

    /// Close every link and forget the connection. Category retries die with
    /// it; a pending connect retry re-registers every category.
    fn drop_connection(&mut self) {
        for open in std::mem::take(&mut self.links).into_values() {
            open.link.close();
        }

        self.armed.retain(|target, armed| match target {
            RetryTarget::Connect => true,
            RetryTarget::Category(_) => {
                armed.cancel.cancel();
                false
            }
        });
        self.connection = None;
        self.publish_status();
    }

    fn stop(&mut self) {
        self.timers.cancel();
        self.armed.clear();
        self.drop_connection();
        self.transition(ConnectionState::Disconnected);
    }

    fn message_handler(&self) -> CategoryMessageHandler {
        let pipeline = self.pipeline.clone();
        Arc::new(move |category, message| pipeline.handle_message(category, message))
    }

    fn link_closed_handler(&self, link_id: u64) -> CategoryClosedHandler {
        let events = self.events_tx.clone();
        let generation = self.generation;
        Arc::new(move |category| {
            let _ = events.send(LifecycleEvent::LinkClosed {
                generation,
                link_id,
                category,
            });
        })
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(LifecycleStatus {
            state: self.state,
            armed_retries: self.armed.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JsonPayloadDecoder, SinkDispatcher};
    use common::broker::{MockBrokerClient, MockBrokerConnection};
    use common::domain::{DomainError, MockRecordSink};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn test_pipeline() -> IngestPipeline {
        let (dispatcher, _worker) =
            SinkDispatcher::spawn(Arc::new(MockRecordSink::new()), CancellationToken::new());
        IngestPipeline::new(Arc::new(JsonPayloadDecoder::new()), dispatcher)
    }

    fn test_config(message_type: &str) -> RelayConfig {
        RelayConfig {
            tenant_id: "acme".to_string(),
            message_type: message_type.to_string(),
            retry_delay_ms: 1000,
        }
    }

    fn accepting_connection() -> Arc<dyn BrokerConnection> {
        let mut connection = MockBrokerConnection::new();
        connection
            .expect_create_consumer()
            .returning(|category, _, _, _| Ok(ConsumerLink::new(category, CancellationToken::new())));
        Arc::new(connection)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_retries_after_delay() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let mut broker = MockBrokerClient::new();
        broker.expect_connect().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DomainError::ConnectionFailed("connection refused".to_string()))
            } else {
                Ok(accepting_connection())
            }
        });

        let manager = ConnectionManager::new(Arc::new(broker), test_pipeline(), &test_config("all"));
        let handle = manager.handle();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(manager.run(shutdown.clone()));

        let mut status = handle.status();
        status
            .wait_for(|s| s.state == ConnectionState::Disconnected && s.armed_retries == 1)
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        status
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(handle.status().borrow().armed_retries, 0);

        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_message_type_is_terminal() {
        let mut broker = MockBrokerClient::new();
        broker.expect_connect().times(0);

        let manager =
            ConnectionManager::new(Arc::new(broker), test_pipeline(), &test_config("command"));
        let handle = manager.handle();

        let result = manager.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(e) if e.is_configuration_fault()));
        assert_eq!(
            *handle.status().borrow(),
            LifecycleStatus {
                state: ConnectionState::Disconnected,
                armed_retries: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_now_is_noop_when_connected() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_connect()
            .times(1)
            .returning(|_| Ok(accepting_connection()));

        let manager =
            ConnectionManager::new(Arc::new(broker), test_pipeline(), &test_config("telemetry"));
        let handle = manager.handle();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(manager.run(shutdown.clone()));

        handle
            .status()
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();

        handle.reconnect_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.current_state(), ConnectionState::Connected);

        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_state_changes_are_logged() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_connect()
            .times(1)
            .returning(|_| Ok(accepting_connection()));

        let manager = ConnectionManager::new(Arc::new(broker), test_pipeline(), &test_config("all"));
        let handle = manager.handle();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(manager.run(shutdown.clone()));

        handle
            .status()
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();
        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert!(logs_contain("connection state changed"));
        assert!(logs_contain("relay created successfully"));
    }

    #[test]
    fn test_retry_target_display() {
        assert_eq!(RetryTarget::Connect.to_string(), "connect");
        assert_eq!(
            RetryTarget::Category(MessageCategory::Event).to_string(),
            "event consumer"
        );
        assert_eq!(ConnectionState::Degraded.to_string(), "degraded");
    }
}
