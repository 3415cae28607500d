//! Gateway lifecycle management
//!
//! Startup connects the transport, subscribes to every command topic and
//! starts the dispatcher. A session supervisor then follows the connection
//! state: each time the broker connection comes up it republishes discovery
//! and state, and runs the poller and periodic status publisher until the
//! connection drops again.

use super::connectivity::ConnectivityTracker;
use super::counter::SentCounter;
use super::dispatcher::CommandDispatcher;
use super::poller::SmsPoller;
use super::publisher::StatePublisher;
use super::status::StatusReporter;
use super::tracker::OperationTracker;
use crate::config::GatewayConfig;
use crate::modem::{Modem, Smsc};
use crate::protocol::discovery::discovery_configs;
use crate::protocol::TopicScheme;
use crate::transport::{ConnectionState, InboundMessage, Transport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const INBOUND_CHANNEL_CAPACITY: usize = 100;

/// Shared components built once the transport is connected
struct Components<T: Transport + 'static> {
    transport: Arc<T>,
    publisher: Arc<StatePublisher<T>>,
    dispatcher: Arc<CommandDispatcher<T>>,
    session: Arc<SessionRunner<T>>,
}

pub struct GatewayLifecycle<T: Transport + 'static> {
    config: GatewayConfig,
    topics: TopicScheme,
    transport: Option<T>,
    modem: Arc<dyn Modem>,
    connectivity: Arc<ConnectivityTracker>,
    counter: Arc<SentCounter>,
    components: Option<Components<T>>,
    dispatcher_handle: Option<JoinHandle<()>>,
    supervisor_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<T: Transport + 'static> GatewayLifecycle<T> {
    pub fn new(config: GatewayConfig, transport: T, modem: Arc<dyn Modem>) -> Self {
        let topics = TopicScheme::from_config(&config.mqtt);
        let connectivity = Arc::new(ConnectivityTracker::new(Duration::from_secs(
            config.modem.offline_timeout_secs,
        )));
        let counter = Arc::new(SentCounter::load(config.sms.counter_file.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            topics,
            transport: Some(transport),
            modem,
            connectivity,
            counter,
            components: None,
            dispatcher_handle: None,
            supervisor_handle: None,
            shutdown_tx,
        }
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityTracker> {
        &self.connectivity
    }

    pub fn counter(&self) -> &Arc<SentCounter> {
        &self.counter
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    /// Connected transport; `None` before `start`
    pub fn transport(&self) -> Option<&Arc<T>> {
        self.components.as_ref().map(|c| &c.transport)
    }

    pub fn dispatcher(&self) -> Option<&Arc<CommandDispatcher<T>>> {
        self.components.as_ref().map(|c| &c.dispatcher)
    }

    pub fn is_started(&self) -> bool {
        self.components.is_some()
    }

    /// Connect, subscribe and start the dispatcher and session supervisor
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        let mut transport = self.transport.take().ok_or(LifecycleError::AlreadyStarted)?;

        info!(prefix = %self.topics.prefix(), "Starting SMS gateway");
        transport
            .connect()
            .await
            .map_err(|e| LifecycleError::TransportError(Box::new(e)))?;
        info!("MQTT transport connected");

        for topic in self.topics.subscriptions() {
            transport
                .subscribe(&topic)
                .await
                .map_err(|e| LifecycleError::TransportError(Box::new(e)))?;
        }
        info!("Subscribed to command topics");

        let state_rx = transport.watch_state().ok_or_else(|| {
            LifecycleError::InitializationError("transport exposes no connection state".to_string())
        })?;

        let transport = Arc::new(transport);
        let components = self.build_components(transport.clone());

        let (message_tx, message_rx) = mpsc::channel::<InboundMessage>(INBOUND_CHANNEL_CAPACITY);
        transport.set_message_sender(message_tx);
        self.dispatcher_handle = Some(tokio::spawn(
            components.dispatcher.clone().run(message_rx),
        ));

        let session = components.session.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.supervisor_handle = Some(tokio::spawn(async move {
            supervise_sessions(session, state_rx, shutdown_rx).await;
        }));

        self.components = Some(components);
        info!("SMS gateway started");
        Ok(())
    }

    fn build_components(&self, transport: Arc<T>) -> Components<T> {
        let publisher = Arc::new(StatePublisher::new(
            transport.clone(),
            self.topics.clone(),
            self.connectivity.clone(),
            self.counter.clone(),
            self.config.sms.cost_per_message,
        ));
        let operations = Arc::new(OperationTracker::new(
            self.connectivity.clone(),
            publisher.clone(),
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            self.modem.clone(),
            operations.clone(),
            publisher.clone(),
            self.counter.clone(),
            Smsc::from_config(self.config.smsc_number()),
        ));
        let session = Arc::new(SessionRunner {
            config: self.config.clone(),
            modem: self.modem.clone(),
            operations,
            publisher: publisher.clone(),
            dispatcher: dispatcher.clone(),
        });

        Components {
            transport,
            publisher,
            dispatcher,
            session,
        }
    }

    /// Resolve once the transport gives up reconnecting
    pub async fn wait_for_permanent_disconnect(&self) {
        let Some(mut state_rx) = self.transport().and_then(|t| t.watch_state()) else {
            return std::future::pending().await;
        };
        loop {
            if matches!(
                *state_rx.borrow_and_update(),
                ConnectionState::PermanentlyDisconnected(_)
            ) {
                return;
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop every task, publish the offline status and disconnect
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down SMS gateway");

        let Some(components) = self.components.take() else {
            self.connectivity.force_offline();
            info!("Gateway was never started");
            return Ok(());
        };

        // Tasks stop first so no late modem success flips the status back
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.supervisor_handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Session supervisor shutdown error: {}", e);
                }
            }
        }

        if let Some(handle) = self.dispatcher_handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Dispatcher shutdown error: {}", e);
                }
            }
        }

        self.connectivity.force_offline();
        components.publisher.publish_device_status().await;

        components
            .transport
            .disconnect()
            .await
            .map_err(|e| LifecycleError::TransportError(Box::new(e)))?;

        info!("SMS gateway stopped");
        Ok(())
    }
}

/// Work done for each broker connection
struct SessionRunner<T: Transport + 'static> {
    config: GatewayConfig,
    modem: Arc<dyn Modem>,
    operations: Arc<OperationTracker<T>>,
    publisher: Arc<StatePublisher<T>>,
    dispatcher: Arc<CommandDispatcher<T>>,
}

/// Tasks of one running session
struct ActiveSession {
    cancel_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    async fn stop(self) {
        let _ = self.cancel_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Session task error: {}", e);
                }
            }
        }
        debug!("Session tasks stopped");
    }
}

impl<T: Transport + 'static> SessionRunner<T> {
    async fn start(&self) -> ActiveSession {
        info!("MQTT connected, publishing discovery and initial state");
        let reporter = Arc::new(StatusReporter::new(
            self.modem.clone(),
            self.operations.clone(),
            self.publisher.clone(),
        ));

        self.publisher
            .publish_discovery(&discovery_configs(self.publisher.topics(), &self.config.sms))
            .await;
        reporter.publish_initial_states().await;

        // Home Assistant needs the new entities before their first state
        tokio::time::sleep(Duration::from_millis(self.config.mqtt.discovery_settle_ms)).await;
        self.dispatcher.clear_message_field().await;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut handles = Vec::new();

        if self.config.sms.monitoring_enabled {
            let poller = Arc::new(SmsPoller::new(
                self.modem.clone(),
                self.operations.clone(),
                self.publisher.clone(),
                self.config.sms.auto_delete_read_sms,
                Duration::from_secs(self.config.sms.check_interval_secs),
            ));
            handles.push(tokio::spawn(poller.run(cancel_rx.clone())));
        } else {
            info!("SMS monitoring disabled");
        }

        let interval = Duration::from_secs(self.config.status.publish_interval_secs);
        handles.push(tokio::spawn(reporter.run(interval, cancel_rx)));

        ActiveSession { cancel_tx, handles }
    }
}

async fn supervise_sessions<T: Transport + 'static>(
    runner: Arc<SessionRunner<T>>,
    mut state_rx: watch::Receiver<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut active: Option<ActiveSession> = None;

    loop {
        let state = state_rx.borrow_and_update().clone();
        match state {
            ConnectionState::Connected => {
                if active.is_none() {
                    let session = runner
                        .start()
                        .instrument(crate::lifecycle_span!(event = "session_start"))
                        .await;
                    active = Some(session);
                }
            }
            ConnectionState::PermanentlyDisconnected(reason) => {
                error!(reason = %reason, "MQTT connection permanently lost");
                break;
            }
            other => {
                if let Some(session) = active.take() {
                    warn!(state = ?other, "MQTT connection lost, pausing session tasks");
                    session.stop().await;
                }
            }
        }

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    if let Some(session) = active.take() {
        session.stop().await;
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Transport error: {0}")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Initialization error: {0}")]
    InitializationError(String),
    #[error("Gateway already started")]
    AlreadyStarted,
}
