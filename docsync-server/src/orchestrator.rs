//! Server orchestrator: routes every decoded message and owns shutdown.
//!
//! The orchestrator wires the transport-facing pieces (registry, security
//! filter, connections) to the engine (coordinator, batcher, ACK tracker,
//! awareness). Timer-driven engine components emit events through
//! channels; the event loop here turns them into transport sends, so all
//! socket I/O stays in one place.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionState};
use crate::registry::ConnectionRegistry;
use crate::security::{
    can_access_document, validate_document_id, validate_message, ConnectionLimiter, RateLimiter,
};
use docsync_crdt::{VectorClock, TOMBSTONE_KEY};
use docsync_engine::ack::AckEvent;
use docsync_engine::batcher::FlushedBatch;
use docsync_engine::codec::{self, Frame};
use docsync_engine::protocol::{
    AckPayload, AuthErrorPayload, AuthPayload, AuthSuccessPayload, AwarenessStatePayload,
    AwarenessSubscribePayload, AwarenessUpdatePayload, ConnectPayload, DeltaBatchChunkPayload,
    DeltaBatchPayload, DeltaPayload, Message, Payload, SubscribePayload, SyncRequestPayload,
    SyncResponsePayload, UnsubscribePayload, WireDelta,
};
use docsync_engine::awareness::AwarenessDeparture;
use docsync_engine::{
    AckTracker, AwarenessManager, DeltaBatcher, EngineConfig, EngineError, EngineResult,
    PubSub, SyncCoordinator, TokenVerifier,
};
use docsync_storage::DocumentStore;
use docsync_types::{DocumentId, MessageId};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Close code for a normal shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code for policy violations: auth failure, caps, access denial.
pub const CLOSE_POLICY: u16 = 1008;

/// The message router and component owner.
pub struct Orchestrator {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<SyncCoordinator>,
    batcher: Arc<DeltaBatcher>,
    ack_tracker: Arc<AckTracker>,
    verifier: Arc<dyn TokenVerifier>,
    pubsub: Option<Arc<dyn PubSub>>,
    connection_limiter: Arc<ConnectionLimiter>,
    rate_limiter: Arc<RateLimiter>,
    accepting: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Documents with a live cross-instance feed.
    pubsub_feeds: Mutex<HashSet<DocumentId>>,
}

impl Orchestrator {
    /// Builds the full component graph and starts the background loops.
    pub async fn new(
        config: ServerConfig,
        engine_config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        verifier: Arc<dyn TokenVerifier>,
        pubsub: Option<Arc<dyn PubSub>>,
    ) -> Arc<Self> {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (departure_tx, departure_rx) = mpsc::unbounded_channel();

        let awareness = Arc::new(AwarenessManager::new(&engine_config));
        let coordinator = Arc::new(SyncCoordinator::new(
            store,
            Arc::clone(&awareness),
            pubsub.clone(),
        ));
        let batcher = Arc::new(DeltaBatcher::new(engine_config.batch_window, flush_tx));
        let ack_tracker = Arc::new(AckTracker::new(
            engine_config.ack_timeout,
            engine_config.ack_max_retries,
            ack_tx,
        ));

        let orchestrator = Arc::new(Self {
            registry: Arc::new(ConnectionRegistry::new(config.max_connections)),
            connection_limiter: Arc::new(ConnectionLimiter::new(&config)),
            rate_limiter: Arc::new(RateLimiter::new(&config)),
            config,
            coordinator,
            batcher,
            ack_tracker,
            verifier,
            pubsub,
            accepting: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
            pubsub_feeds: Mutex::new(HashSet::new()),
        });

        let reaper = awareness.spawn_reaper(engine_config.awareness_reap_interval, departure_tx);
        let event_loop = Arc::clone(&orchestrator).spawn_event_loop(
            flush_rx,
            ack_rx,
            departure_rx,
        );
        orchestrator.tasks.lock().await.extend([reaper, event_loop]);

        orchestrator
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The sync coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// The ACK tracker.
    #[must_use]
    pub fn ack_tracker(&self) -> &Arc<AckTracker> {
        &self.ack_tracker
    }

    /// The per-connection rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// True while the server accepts new connections.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Admits a new connection: caps, limiter bookkeeping, registry.
    /// On `Err` the caller closes the endpoint with code 1008.
    pub async fn register_connection(&self, connection: Arc<Connection>) -> Result<(), &'static str> {
        if !self.is_accepting() {
            return Err("server is shutting down");
        }
        let ip = connection.remote_ip();
        if !self.connection_limiter.can_connect(ip).await {
            return Err("per-ip connection limit reached");
        }
        if !self.registry.add(Arc::clone(&connection)).await {
            return Err("server connection limit reached");
        }
        self.connection_limiter.add_connection(ip).await;
        debug!("connection {} registered from {}", connection.id(), ip);
        Ok(())
    }

    /// Handles one raw transport frame from a connection.
    pub async fn handle_frame(&self, connection: &Arc<Connection>, frame: Frame) {
        if !self.rate_limiter.can_send_message(&connection.id()).await {
            connection.send_error(&EngineError::RateLimitExceeded);
            return;
        }

        if let Err(e) = connection.latch_protocol(frame.mode()).await {
            connection.send_error(&e);
            return;
        }

        let message = match codec::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                connection.send_error(&EngineError::FrameMalformed(e.to_string()));
                return;
            }
        };

        if let Err(e) = validate_message(&message) {
            connection.send_error(&e);
            return;
        }

        self.dispatch(connection, message).await;
    }

    /// Routes one validated message.
    pub async fn dispatch(&self, connection: &Arc<Connection>, message: Message) {
        let result = match message.payload.clone() {
            Payload::Connect(payload) => self.handle_connect(connection, payload).await,
            Payload::Auth(payload) => self.handle_auth(connection, payload).await,
            Payload::Subscribe(payload) => {
                self.handle_subscribe(connection, &message.id, payload).await
            }
            Payload::Unsubscribe(payload) => self.handle_unsubscribe(connection, payload).await,
            Payload::SyncRequest(payload) => {
                self.handle_sync_request(connection, &message.id, payload).await
            }
            Payload::Delta(payload) => {
                self.handle_delta(connection, &message, payload).await
            }
            Payload::DeltaBatch(payload) => {
                self.handle_delta_batch(connection, &message, payload).await
            }
            Payload::DeltaBatchChunk(payload) => {
                self.handle_chunk(connection, payload).await
            }
            Payload::Ack(payload) => self.handle_ack(connection, payload).await,
            Payload::Ping => {
                let _ = connection.send(Message::pong());
                Ok(())
            }
            Payload::Pong => Ok(()),
            Payload::AwarenessSubscribe(payload) => {
                self.handle_awareness_subscribe(connection, payload).await
            }
            Payload::AwarenessUpdate(payload) => {
                self.handle_awareness_update(connection, payload).await
            }
            Payload::Error(payload) => {
                debug!(
                    "client {} reported error {}: {:?}",
                    connection.id(),
                    payload.error,
                    payload.details
                );
                Ok(())
            }
            Payload::AuthSuccess(_)
            | Payload::AuthError(_)
            | Payload::SyncResponse(_)
            | Payload::AwarenessState(_) => Err(EngineError::MessageInvalid(
                "server-to-client message received from client".into(),
            )),
        };

        if let Err(e) = result {
            connection.send_error(&e);
            match &e {
                EngineError::AuthFailed(_) => {
                    connection.close(CLOSE_POLICY, "authentication failed");
                }
                EngineError::DocumentAccessDenied(_) => {
                    connection.close(CLOSE_POLICY, "document access denied");
                }
                _ => {}
            }
        }
    }

    async fn handle_connect(
        &self,
        connection: &Arc<Connection>,
        payload: ConnectPayload,
    ) -> EngineResult<()> {
        if let Some(client_id) = payload.client_id {
            connection.set_client_id(client_id.clone()).await;
            self.registry.link_client(connection.id(), client_id).await;
        }
        if connection.state().await == ConnectionState::Connecting {
            connection.set_state(ConnectionState::Authenticating).await;
        }
        Ok(())
    }

    async fn handle_auth(
        &self,
        connection: &Arc<Connection>,
        payload: AuthPayload,
    ) -> EngineResult<()> {
        let claims = match (&payload.token, &payload.api_key) {
            (Some(token), _) => self.verifier.verify_token(token).await,
            (None, Some(api_key)) => self.verifier.verify_api_key(api_key).await,
            (None, None) => None,
        };

        match claims {
            Some(claims) => {
                connection
                    .set_authenticated(claims.user_id.clone(), claims.permissions.clone())
                    .await;
                self.registry
                    .link_user(connection.id(), claims.user_id.clone())
                    .await;
                info!("connection {} authenticated as {}", connection.id(), claims.user_id);
                connection.send(Message::new(Payload::AuthSuccess(AuthSuccessPayload {
                    user_id: claims.user_id,
                    permissions: claims.permissions,
                })))
            }
            None => {
                let _ = connection.send(Message::new(Payload::AuthError(AuthErrorPayload {
                    error: "invalid credentials".into(),
                })));
                Err(EngineError::AuthFailed("invalid credentials".into()))
            }
        }
    }

    async fn handle_subscribe(
        &self,
        connection: &Arc<Connection>,
        request_id: &MessageId,
        payload: SubscribePayload,
    ) -> EngineResult<()> {
        self.ensure_document_access(connection, &payload.document_id, false)
            .await?;
        self.coordinator
            .subscribe(&payload.document_id, connection.id())
            .await;
        connection.add_subscription(payload.document_id.clone()).await;
        self.ensure_pubsub_feed(&payload.document_id).await;
        let response = self
            .sync_response(request_id.clone(), &payload.document_id, None)
            .await;
        connection.send(response)
    }

    async fn handle_unsubscribe(
        &self,
        connection: &Arc<Connection>,
        payload: UnsubscribePayload,
    ) -> EngineResult<()> {
        self.coordinator
            .unsubscribe(&payload.document_id, &connection.id())
            .await;
        connection.remove_subscription(&payload.document_id).await;
        Ok(())
    }

    async fn handle_sync_request(
        &self,
        connection: &Arc<Connection>,
        request_id: &MessageId,
        payload: SyncRequestPayload,
    ) -> EngineResult<()> {
        self.ensure_document_access(connection, &payload.document_id, false)
            .await?;
        // A syncing client wants subsequent updates too.
        self.coordinator
            .subscribe(&payload.document_id, connection.id())
            .await;
        connection.add_subscription(payload.document_id.clone()).await;
        self.ensure_pubsub_feed(&payload.document_id).await;
        let response = self
            .sync_response(
                request_id.clone(),
                &payload.document_id,
                payload.vector_clock.as_ref(),
            )
            .await;
        connection.send(response)
    }

    async fn handle_delta(
        &self,
        connection: &Arc<Connection>,
        message: &Message,
        payload: DeltaPayload,
    ) -> EngineResult<()> {
        self.ensure_document_access(connection, &payload.document_id, true)
            .await?;

        let client_id = connection.effective_client_id().await;
        let result = self
            .coordinator
            .apply_fields(
                &payload.document_id,
                &client_id,
                payload.fields(),
                &payload.clock,
                message.timestamp_ms,
            )
            .await;

        for (field, authoritative) in &result.authoritative {
            let value = authoritative
                .clone()
                .unwrap_or_else(|| json!({ TOMBSTONE_KEY: true }));
            self.batcher
                .enqueue(&payload.document_id, field.clone(), value, &result.clock)
                .await;
        }

        let ack_id = payload.message_id.unwrap_or_else(|| message.id.clone());
        connection.send(Message::ack(ack_id))
    }

    async fn handle_delta_batch(
        &self,
        connection: &Arc<Connection>,
        message: &Message,
        payload: DeltaBatchPayload,
    ) -> EngineResult<()> {
        self.ensure_document_access(connection, &payload.document_id, true)
            .await?;

        let client_id = connection.effective_client_id().await;
        for delta in &payload.deltas {
            let result = self
                .coordinator
                .apply_fields(
                    &payload.document_id,
                    &client_id,
                    delta.fields(),
                    &delta.clock,
                    message.timestamp_ms,
                )
                .await;
            for (field, authoritative) in &result.authoritative {
                let value = authoritative
                    .clone()
                    .unwrap_or_else(|| json!({ TOMBSTONE_KEY: true }));
                self.batcher
                    .enqueue(&payload.document_id, field.clone(), value, &result.clock)
                    .await;
            }
        }

        let ack_id = payload.message_id.unwrap_or_else(|| message.id.clone());
        connection.send(Message::ack(ack_id))
    }

    async fn handle_chunk(
        &self,
        connection: &Arc<Connection>,
        payload: DeltaBatchChunkPayload,
    ) -> EngineResult<()> {
        let Some(assembled) = connection
            .add_chunk(&payload, self.config.chunk_ttl)
            .await
        else {
            return Ok(());
        };

        let message = codec::decode_json(&assembled)
            .map_err(|e| EngineError::FrameMalformed(format!("reassembled batch: {e}")))?;
        validate_message(&message)?;
        match message.payload.clone() {
            Payload::DeltaBatch(batch) => {
                self.handle_delta_batch(connection, &message, batch).await
            }
            Payload::Delta(delta) => self.handle_delta(connection, &message, delta).await,
            _ => Err(EngineError::MessageInvalid(
                "reassembled chunk stream is not a delta batch".into(),
            )),
        }
    }

    async fn handle_ack(
        &self,
        connection: &Arc<Connection>,
        payload: AckPayload,
    ) -> EngineResult<()> {
        let cleared = self
            .ack_tracker
            .acknowledge(&connection.id(), &payload.message_id)
            .await;
        if !cleared {
            debug!(
                "ignored ack for unknown message {} from {}",
                payload.message_id,
                connection.id()
            );
        }
        Ok(())
    }

    async fn handle_awareness_subscribe(
        &self,
        connection: &Arc<Connection>,
        payload: AwarenessSubscribePayload,
    ) -> EngineResult<()> {
        self.ensure_document_access(connection, &payload.document_id, false)
            .await?;
        let states = self
            .coordinator
            .subscribe_awareness(&payload.document_id, connection.id())
            .await;
        connection.send(Message::new(Payload::AwarenessState(AwarenessStatePayload {
            document_id: payload.document_id,
            states,
        })))
    }

    async fn handle_awareness_update(
        &self,
        connection: &Arc<Connection>,
        payload: AwarenessUpdatePayload,
    ) -> EngineResult<()> {
        self.ensure_document_access(connection, &payload.document_id, false)
            .await?;
        let subscribers = self
            .coordinator
            .awareness()
            .update(
                &payload.document_id,
                &payload.client_id,
                payload.state.clone(),
                payload.clock.clone(),
            )
            .await;

        let update = Message::new(Payload::AwarenessUpdate(payload));
        for subscriber in self.registry.get_many(&subscribers).await {
            let _ = subscriber.send(update.clone());
        }
        Ok(())
    }

    /// Tears a closed connection out of every structure.
    pub async fn handle_close(&self, connection: &Arc<Connection>) {
        connection.set_state(ConnectionState::Disconnecting).await;
        for document_id in connection.take_subscriptions().await {
            self.coordinator
                .unsubscribe(&document_id, &connection.id())
                .await;
        }
        self.coordinator
            .awareness()
            .remove_connection(&connection.id())
            .await;
        self.ack_tracker.purge_connection(&connection.id()).await;
        self.rate_limiter.remove_connection(&connection.id()).await;
        self.connection_limiter
            .remove_connection(connection.remote_ip())
            .await;
        self.registry.remove(&connection.id()).await;
        connection.release().await;
        debug!("connection {} released", connection.id());
    }

    /// Fans one flushed batch out to every subscriber, sender included,
    /// and arms delivery tracking per recipient.
    pub async fn fan_out(&self, batch: FlushedBatch) {
        let document = self.coordinator.get_document(&batch.document_id).await;
        let clock = document.clock().await;
        let subscribers = document.subscribers().await;
        if subscribers.is_empty() {
            return;
        }

        let mut deltas: Vec<DeltaPayload> = batch
            .fields
            .into_iter()
            .map(|(field, value)| DeltaPayload {
                document_id: batch.document_id.clone(),
                delta: None,
                field: Some(field),
                value: Some(value),
                clock: clock.clone(),
                message_id: None,
            })
            .collect();

        let payload = if deltas.len() == 1 {
            Payload::Delta(deltas.remove(0))
        } else {
            deltas.sort_by(|a, b| a.field.cmp(&b.field));
            Payload::DeltaBatch(DeltaBatchPayload {
                document_id: batch.document_id.clone(),
                deltas,
                message_id: None,
            })
        };
        let message = Message::new(payload);

        for connection in self.registry.get_many(&subscribers).await {
            if connection.send(message.clone()).is_ok() {
                self.ack_tracker
                    .track(
                        connection.id(),
                        batch.document_id.clone(),
                        message.clone(),
                    )
                    .await;
            }
        }
    }

    /// Stops accepting, flushes pending batches, closes every connection
    /// and cancels the background loops.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("shutting down: flushing pending batches");

        for batch in self.batcher.flush_all().await {
            self.fan_out(batch).await;
        }
        if let Some(pubsub) = &self.pubsub {
            if let Err(e) = pubsub.announce_shutdown().await {
                warn!("pubsub shutdown announcement failed: {e}");
            }
        }
        self.registry
            .close_all(CLOSE_GOING_AWAY, "server shutting down")
            .await;
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.coordinator.shutdown().await;
        info!("shutdown complete");
    }

    async fn ensure_document_access(
        &self,
        connection: &Arc<Connection>,
        document_id: &DocumentId,
        write: bool,
    ) -> EngineResult<()> {
        validate_document_id(document_id, self.config.document_id_max_len)?;

        let authenticated = connection.is_authenticated().await;
        if !can_access_document(document_id, authenticated, &self.config.open_namespaces) {
            return Err(EngineError::DocumentAccessDenied(document_id.to_string()));
        }
        if self.config.auth_required && !authenticated {
            return Err(EngineError::AuthRequired);
        }
        if let Some(permissions) = connection.permissions().await {
            let allowed = if write {
                permissions.can_write(document_id)
            } else {
                permissions.can_read(document_id)
            };
            if !allowed {
                return Err(EngineError::PermissionDenied(document_id.to_string()));
            }
        }
        Ok(())
    }

    /// Builds a `SyncResponse` snapshot for one document.
    async fn sync_response(
        &self,
        request_id: MessageId,
        document_id: &DocumentId,
        since: Option<&VectorClock>,
    ) -> Message {
        let document = self.coordinator.get_document(document_id).await;
        let snapshot = document.snapshot(since).await;
        let text_state = self
            .coordinator
            .get_text_state(document_id)
            .await
            .map(|text| text.crdt_state);

        let deltas = snapshot
            .deltas
            .into_iter()
            .map(|delta| WireDelta {
                id: delta.id,
                client_id: delta.client_id,
                timestamp_ms: delta.timestamp_ms,
                data: delta.fields,
                clock: delta.clock,
            })
            .collect();

        Message::new(Payload::SyncResponse(SyncResponsePayload {
            request_id,
            document_id: document_id.clone(),
            state: snapshot.state,
            deltas,
            clock: snapshot.clock,
            text_state,
        }))
    }

    fn spawn_event_loop(
        self: Arc<Self>,
        mut flush_rx: mpsc::UnboundedReceiver<FlushedBatch>,
        mut ack_rx: mpsc::UnboundedReceiver<AckEvent>,
        mut departure_rx: mpsc::UnboundedReceiver<AwarenessDeparture>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(batch) = flush_rx.recv() => {
                        self.fan_out(batch).await;
                    }
                    Some(event) = ack_rx.recv() => {
                        self.handle_ack_event(event).await;
                    }
                    Some(departure) = departure_rx.recv() => {
                        self.broadcast_departure(departure).await;
                    }
                    else => break,
                }
            }
        })
    }

    async fn handle_ack_event(&self, event: AckEvent) {
        match event {
            AckEvent::Retry {
                connection_id,
                message,
            } => match self.registry.get(&connection_id).await {
                Some(connection) => {
                    let _ = connection.send(message);
                }
                None => {
                    self.ack_tracker.purge_connection(&connection_id).await;
                }
            },
            AckEvent::Dropped {
                connection_id,
                message_id,
                ..
            } => {
                debug!("gave up delivering {} to {}", message_id, connection_id);
            }
        }
    }

    /// Opens the cross-instance feed for a document on its first local
    /// subscriber. Deltas published by other instances are relayed to
    /// local subscribers; durable convergence runs through the shared
    /// storage backend.
    async fn ensure_pubsub_feed(&self, document_id: &DocumentId) {
        let Some(pubsub) = &self.pubsub else {
            return;
        };
        {
            let mut feeds = self.pubsub_feeds.lock().await;
            if !feeds.insert(document_id.clone()) {
                return;
            }
        }

        let mut feed_rx = match pubsub.subscribe_to_document(document_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("failed to open pubsub feed for {document_id}: {e}");
                self.pubsub_feeds.lock().await.remove(document_id);
                return;
            }
        };

        let registry = Arc::clone(&self.registry);
        let coordinator = Arc::clone(&self.coordinator);
        let document_id = document_id.clone();
        let feed = tokio::spawn(async move {
            while let Some(message) = feed_rx.recv().await {
                if let Payload::Delta(delta) = &message.payload {
                    coordinator
                        .merge_vector_clock(&document_id, &delta.clock)
                        .await;
                }
                let document = coordinator.get_document(&document_id).await;
                for connection in registry.get_many(&document.subscribers().await).await {
                    let _ = connection.send(message.clone());
                }
            }
        });
        self.tasks.lock().await.push(feed);
    }

    async fn broadcast_departure(&self, departure: AwarenessDeparture) {
        let update = Message::new(Payload::AwarenessUpdate(AwarenessUpdatePayload {
            document_id: departure.document_id,
            client_id: departure.client_id,
            state: None,
            clock: VectorClock::new(),
        }));
        for connection in self.registry.get_many(&departure.subscribers).await {
            let _ = connection.send(update.clone());
        }
    }
}
