use crate::channel::{
    ChannelDispatcher, ChannelPreference, ChannelTransport, DispatchResult, MeshChannel,
    MeshRadio, OutboundMessage,
};
use crate::clock::{Clock, IdSource};
use crate::config::BeaconConfig;
use crate::mesh::{DeduplicationStore, InboundOutcome, PacketCodec, RelayEngine};
use crate::metrics::recorder;
use crate::node::error::{NodeError, NodeResult};
use crate::node::types::{FlushReport, NodeEvent, NodeStats};
use crate::queue::{
    AttemptDisposition, EnqueueReceipt, OutboundQueue, Priority, QueueEntry, QueuePayload,
    QueueStore,
};
use crate::sms::{self, SmsPayload};
use bytes::Bytes;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type RelayLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One device: outbound queue, channel dispatcher and mesh relay.
///
/// Inbound work (mesh frames, SMS) is pushed in by the host through
/// [`handle_mesh_frame`](Self::handle_mesh_frame) and
/// [`handle_sms`](Self::handle_sms). Outbound entries are drained by
/// [`flush_once`](Self::flush_once), either on demand or from the loop
/// started by [`spawn_flush_loop`](Self::spawn_flush_loop).
pub struct BeaconNode {
    config: BeaconConfig,
    clock: Arc<dyn Clock>,
    queue: Arc<OutboundQueue>,
    dispatcher: Arc<ChannelDispatcher>,
    relay: Arc<RelayEngine>,
    radio: Option<Arc<dyn MeshRadio>>,
    relay_limiter: Arc<RelayLimiter>,
    cancel: CancellationToken,
    flush_wake: Notify,
    event_tx: Option<mpsc::Sender<NodeEvent>>,
    relay_throttled: AtomicU64,
    relay_broadcast_failures: AtomicU64,
    events_dropped: AtomicU64,
}

impl BeaconNode {
    /// Build a node from configuration, opening (or creating) its queue
    pub async fn open(config: BeaconConfig, clock: Arc<dyn Clock>) -> NodeResult<Self> {
        config.validate()?;
        crate::metrics::init_metrics();

        let store = match &config.queue.database_path {
            Some(path) => QueueStore::open(path).await?,
            None => QueueStore::new_in_memory().await?,
        };
        let queue = OutboundQueue::open(store, config.queue.queue_config(), clock.clone()).await?;

        let dedup = Arc::new(DeduplicationStore::with_limits(
            clock.clone(),
            config.mesh.dedup_window(),
            config.mesh.max_dedup_entries,
        ));
        let relay = RelayEngine::new(config.node_id.clone(), dedup, clock.clone())
            .with_codec(PacketCodec::with_mtu(config.mesh.mtu))
            .with_fragment_limit(config.mesh.max_pending_fragment_groups);

        let rate = NonZeroU32::new(config.mesh.relay_rate_per_sec).unwrap_or(NonZeroU32::MIN);
        let relay_limiter = RateLimiter::direct(Quota::per_second(rate));

        info!(
            "Beacon node {} ready ({} queued entries restored)",
            config.node_id,
            queue.len().await
        );

        Ok(Self {
            dispatcher: Arc::new(ChannelDispatcher::new(config.dispatch.send_timeout())),
            queue: Arc::new(queue),
            relay: Arc::new(relay),
            radio: None,
            relay_limiter: Arc::new(relay_limiter),
            cancel: CancellationToken::new(),
            flush_wake: Notify::new(),
            event_tx: None,
            relay_throttled: AtomicU64::new(0),
            relay_broadcast_failures: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            clock,
            config,
        })
    }

    /// Set event channel for notifications. Events that do not fit in the
    /// channel are dropped and counted in [`NodeStats::events_dropped`].
    pub fn with_events(mut self, tx: mpsc::Sender<NodeEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Attach the mesh radio: used to rebroadcast relayed frames and
    /// registered as the mesh delivery channel for outbound entries.
    pub fn with_mesh_radio(mut self, radio: Arc<dyn MeshRadio>, ids: Arc<dyn IdSource>) -> Self {
        let channel = MeshChannel::new(
            radio.clone(),
            self.config.node_id.clone(),
            ids,
            self.clock.clone(),
        )
        .with_ttl(self.config.mesh.default_ttl);
        self.dispatcher.register(Arc::new(channel));
        self.radio = Some(radio);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    pub fn dispatcher(&self) -> &Arc<ChannelDispatcher> {
        &self.dispatcher
    }

    pub fn relay(&self) -> &Arc<RelayEngine> {
        &self.relay
    }

    /// Register a delivery channel (replacing any previous one for it)
    pub fn register_channel(&self, transport: Arc<dyn ChannelTransport>) {
        let channel = transport.channel();
        if self.dispatcher.register(transport).is_some() {
            debug!("Replaced {} transport on {}", channel, self.config.node_id);
        }
        self.notify_channel_available();
    }

    /// Ask the flush loop to run now, e.g. after connectivity returns
    pub fn notify_channel_available(&self) {
        self.flush_wake.notify_one();
    }

    /// Queue an entry for delivery
    pub async fn submit(
        &self,
        priority: Priority,
        payload: impl Into<QueuePayload>,
        channel: ChannelPreference,
    ) -> NodeResult<EnqueueReceipt> {
        if self.cancel.is_cancelled() {
            return Err(NodeError::ShutDown);
        }

        let receipt = self.queue.enqueue(priority, payload, channel, None).await?;
        if let Some(dead) = &receipt.evicted {
            self.emit_event(NodeEvent::DeadLettered(dead.clone()));
        }
        if receipt.is_queued() {
            self.flush_wake.notify_one();
        }
        Ok(receipt)
    }

    pub async fn send_panic(&self, payload: impl Into<QueuePayload>) -> NodeResult<EnqueueReceipt> {
        self.submit(Priority::Panic, payload, ChannelPreference::Any)
            .await
    }

    /// Queue a status report as its compact SMS text, so any channel
    /// (including SMS) can carry it unchanged
    pub async fn send_status(&self, status: &SmsPayload) -> NodeResult<EnqueueReceipt> {
        let body = sms::encode(status)?;
        self.submit(Priority::Status, body, ChannelPreference::Any)
            .await
    }

    pub async fn send_message(&self, text: impl Into<String>) -> NodeResult<EnqueueReceipt> {
        self.submit(Priority::Message, text.into(), ChannelPreference::Any)
            .await
    }

    /// Claim due entries and attempt each once.
    ///
    /// Entries with no available channel, and entries interrupted by
    /// shutdown, go back to the queue without an attempt being counted.
    pub async fn flush_once(&self) -> NodeResult<FlushReport> {
        let mut report = FlushReport::default();
        if self.cancel.is_cancelled() {
            return Ok(report);
        }

        let batch = self
            .queue
            .claim_due(self.config.dispatch.batch_size)
            .await;

        for (index, entry) in batch.iter().enumerate() {
            if let Err(e) = self.flush_entry(entry, &mut report).await {
                self.release_all(&batch[index..]).await;
                return Err(e);
            }
            if self.cancel.is_cancelled() {
                let rest = &batch[index + 1..];
                self.release_all(rest).await;
                report.cancelled += rest.len();
                break;
            }
        }

        if !report.is_empty() {
            debug!("Flush on {}: {}", self.config.node_id, report);
        }
        Ok(report)
    }

    async fn flush_entry(&self, entry: &QueueEntry, report: &mut FlushReport) -> NodeResult<()> {
        let message = OutboundMessage::from(entry);

        match self
            .dispatcher
            .dispatch(&message, entry.channel, &self.cancel)
            .await
        {
            DispatchResult::Attempted { channel, outcome } => {
                match self.queue.record_attempt(entry.id, &outcome).await? {
                    AttemptDisposition::Sent(sent) => {
                        recorder::record_entry_sent(channel.as_str(), sent.priority.as_str());
                        report.sent += 1;
                        self.emit_event(NodeEvent::EntrySent {
                            entry_id: sent.id,
                            channel,
                        });
                    }
                    AttemptDisposition::Retry { .. } => report.retried += 1,
                    AttemptDisposition::DeadLettered(dead) => {
                        report.dead_lettered += 1;
                        self.emit_event(NodeEvent::DeadLettered(dead));
                    }
                }
            }
            DispatchResult::Unavailable => {
                self.queue.release(entry.id).await;
                report.deferred += 1;
            }
            DispatchResult::Cancelled => {
                self.queue.release(entry.id).await;
                report.cancelled += 1;
            }
        }
        Ok(())
    }

    async fn release_all(&self, entries: &[QueueEntry]) {
        for entry in entries {
            self.queue.release(entry.id).await;
        }
    }

    /// Run flushes on the configured interval (or when woken) until shutdown.
    /// Each pass also expires dedup and fragment state.
    pub fn spawn_flush_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.config.dispatch.flush_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = node.cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = node.flush_wake.notified() => {}
                }

                if let Err(e) = node.flush_once().await {
                    warn!("Flush on {} failed: {}", node.config.node_id, e);
                }
                let expired = node.relay.evict_expired();
                if expired > 0 {
                    debug!("Expired {} dedup entries on {}", expired, node.config.node_id);
                }
            }

            info!("Flush loop on {} stopped", node.config.node_id);
        })
    }

    /// Process one frame heard on the mesh: deliver, rebroadcast or drop
    pub async fn handle_mesh_frame(&self, frame: &[u8]) -> InboundOutcome {
        let outcome = self.relay.handle_frame(frame);

        if let Some(delivery) = &outcome.delivery {
            if let Some(status) = decode_status(&delivery.payload) {
                self.emit_event(NodeEvent::StatusReceived(status));
            }
            self.emit_event(NodeEvent::MeshDelivery(delivery.clone()));
        }
        if let Some(relay_frame) = &outcome.relay_frame {
            self.rebroadcast(relay_frame.clone()).await;
        }

        outcome
    }

    async fn rebroadcast(&self, frame: Bytes) {
        let Some(radio) = &self.radio else {
            debug!("No mesh radio attached; not relaying frame");
            return;
        };

        if self.relay_limiter.check().is_err() {
            self.relay_throttled.fetch_add(1, Ordering::Relaxed);
            recorder::record_relay_throttled();
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.relay_limiter.until_ready() => {}
            }
        }

        let timeout = self.config.dispatch.send_timeout();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = tokio::time::timeout(timeout, radio.broadcast(frame)) => result,
        };

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.relay_broadcast_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Relay broadcast failed: {}", e);
            }
            Err(_) => {
                self.relay_broadcast_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Relay broadcast timed out after {:?}", timeout);
            }
        }
    }

    /// Process an inbound SMS. Text without the `BCN|` prefix is not ours
    /// and is ignored; malformed status bodies are dropped with a warning.
    pub async fn handle_sms(&self, text: &str) -> Option<SmsPayload> {
        if !sms::is_recognized(text) {
            debug!("Ignoring SMS without status prefix");
            return None;
        }

        match sms::decode(text) {
            Ok(status) => {
                recorder::record_sms_received(status.status.as_code());
                debug!(
                    "Status {} from {} at {}",
                    status.status, status.student_id, status.timestamp
                );
                self.emit_event(NodeEvent::StatusReceived(status.clone()));
                Some(status)
            }
            Err(e) => {
                recorder::record_sms_rejected();
                warn!("Dropping malformed status SMS: {}", e);
                None
            }
        }
    }

    pub async fn stats(&self) -> NodeStats {
        NodeStats {
            node_id: self.config.node_id.clone(),
            queue: self.queue.stats().await,
            relay: self.relay.stats(),
            relay_throttled: self.relay_throttled.load(Ordering::Relaxed),
            relay_broadcast_failures: self.relay_broadcast_failures.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the flush loop and interrupt any in-flight send. Interrupted
    /// entries stay queued with their attempt count unchanged.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Shutting down beacon node {}", self.config.node_id);
            self.cancel.cancel();
        }
    }

    /// Shut down and close the queue database
    pub async fn close(&self) {
        self.shutdown();
        self.queue.close().await;
    }

    /// Emit an event if there's a listener
    /// Never waits on the receiver: a full or closed event channel drops the
    /// event so flushing and relaying keep running.
    fn emit_event(&self, event: NodeEvent) {
        let Some(ref tx) = self.event_tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            let dropped = self.events_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let cause = match e {
                TrySendError::Full(_) => "full",
                TrySendError::Closed(_) => "closed",
            };
            debug!(
                "Event channel {} on {}, {} events dropped",
                cause, self.config.node_id, dropped
            );
        }
    }
}

/// Status report carried as a mesh payload, if it is one
fn decode_status(payload: &[u8]) -> Option<SmsPayload> {
    let text = std::str::from_utf8(payload).ok()?;
    if !sms::is_recognized(text) {
        return None;
    }
    sms::decode(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelResult, SendOutcome};
    use crate::clock::{ManualClock, SequentialIds};
    use crate::mesh::{MeshPacket, PacketId, PacketType, RelayDecision};
    use crate::queue::FailureKind;
    use crate::sms::StatusCode;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    struct FakeTransport {
        channel: Channel,
        available: AtomicBool,
        outcome: Mutex<SendOutcome>,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl FakeTransport {
        fn new(channel: Channel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                available: AtomicBool::new(true),
                outcome: Mutex::new(SendOutcome::Success),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChannelTransport for FakeTransport {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn send(&self, message: &OutboundMessage) -> SendOutcome {
            self.sent.lock().push(message.clone());
            self.outcome.lock().clone()
        }
    }

    struct FakeRadio {
        frames: Mutex<Vec<Bytes>>,
        broadcasts: AtomicUsize,
    }

    impl FakeRadio {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                broadcasts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MeshRadio for FakeRadio {
        fn has_peers(&self) -> bool {
            true
        }

        fn mtu(&self) -> usize {
            512
        }

        async fn broadcast(&self, frame: Bytes) -> ChannelResult<()> {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn config(node_id: &str) -> BeaconConfig {
        let mut config = BeaconConfig {
            node_id: node_id.to_string(),
            ..Default::default()
        };
        config.queue.retry_initial_ms = 0;
        config.queue.retry_max_ms = 0;
        config.queue.retry_multiplier = 1.0;
        config.queue.default_max_attempts = 2;
        config
    }

    async fn node(node_id: &str) -> (BeaconNode, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let node = BeaconNode::open(config(node_id), clock.clone())
            .await
            .unwrap();
        (node, clock)
    }

    fn frame_from(source: &str, target: Option<&str>, id: u64, payload: &[u8]) -> Bytes {
        let mut packet = MeshPacket::new(
            PacketId::new(id.to_be_bytes()),
            PacketType::Message,
            source,
            1_700_000_000_000,
            Bytes::copy_from_slice(payload),
        );
        if let Some(target) = target {
            packet = packet.with_target(target);
        }
        PacketCodec::new().encode(&packet).unwrap()
    }

    #[tokio::test]
    async fn test_flush_sends_in_priority_order() {
        let (node, _clock) = node("phone-1").await;
        let data = FakeTransport::new(Channel::Data);
        node.register_channel(data.clone());

        node.send_message("hello").await.unwrap();
        let panic = node.send_panic("help").await.unwrap();

        let report = node.flush_once().await.unwrap();
        assert_eq!(report.sent, 2);
        assert!(node.queue().is_empty().await);

        let sent = data.sent.lock();
        assert_eq!(sent[0].entry_id, panic.entry.id);
        assert_eq!(sent[0].priority, Priority::Panic);
        assert_eq!(sent[1].priority, Priority::Message);
    }

    #[tokio::test]
    async fn test_flush_defers_without_channel() {
        let (node, _clock) = node("phone-1").await;
        let sms_only = FakeTransport::new(Channel::Sms);
        sms_only.available.store(false, Ordering::SeqCst);
        node.register_channel(sms_only);

        let receipt = node.send_panic("help").await.unwrap();
        let report = node.flush_once().await.unwrap();
        assert_eq!(report.deferred, 1);

        let entry = node.queue().get(receipt.entry.id).await.unwrap();
        assert_eq!(entry.attempts, 0);
        assert_eq!(node.queue().stats().await.in_flight, 0);
    }

    #[tokio::test]
    async fn test_flush_retries_then_dead_letters() {
        let (tx, mut rx) = mpsc::channel(16);
        let (node, _clock) = node("phone-1").await;
        let node = node.with_events(tx);
        let data = FakeTransport::new(Channel::Data);
        *data.outcome.lock() = SendOutcome::TransientFailure("503".into());
        node.register_channel(data);

        let receipt = node.send_message("hello").await.unwrap();

        let first = node.flush_once().await.unwrap();
        assert_eq!(first.retried, 1);
        let second = node.flush_once().await.unwrap();
        assert_eq!(second.dead_lettered, 1);
        assert!(node.queue().is_empty().await);

        match rx.recv().await.unwrap() {
            NodeEvent::DeadLettered(dead) => {
                assert_eq!(dead.entry.id, receipt.entry.id);
                assert_eq!(dead.entry.attempts, 2);
                assert!(dead
                    .entry
                    .history
                    .iter()
                    .all(|attempt| attempt.kind == FailureKind::Transient));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_status_queues_sms_body() {
        let (node, _clock) = node("phone-1").await;
        let status = SmsPayload::new(
            "a1b2c3d4",
            18.0425,
            -63.0548,
            StatusCode::Ok,
            Utc.timestamp_opt(101_044_754, 0).unwrap(),
        );

        let receipt = node.send_status(&status).await.unwrap();
        assert_eq!(receipt.entry.priority, Priority::Status);
        assert_eq!(
            receipt.entry.payload.as_text(),
            Some("BCN|a1b2c3d4|18.0425,-63.0548|OK|1o5qmq")
        );
    }

    #[tokio::test]
    async fn test_handle_sms() {
        let (tx, mut rx) = mpsc::channel(16);
        let (node, _clock) = node("gateway").await;
        let node = node.with_events(tx);

        assert!(node.handle_sms("see you at 5").await.is_none());
        assert!(node.handle_sms("BCN|a1b2c3d4|north|OK|1o5qmq").await.is_none());

        let status = node
            .handle_sms("BCN|a1b2c3d4|18.0425,-63.0548|MED|1o5qmq")
            .await
            .unwrap();
        assert_eq!(status.status, StatusCode::Medical);

        match rx.try_recv().unwrap() {
            NodeEvent::StatusReceived(received) => assert_eq!(received, status),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mesh_frame_relayed_through_radio() {
        let radio = FakeRadio::new();
        let (node, _clock) = node("relay-1").await;
        let node = node.with_mesh_radio(radio.clone(), Arc::new(SequentialIds::starting_at(1)));

        let frame = frame_from("phone-9", Some("gateway"), 77, b"hi");
        let outcome = node.handle_mesh_frame(&frame).await;
        assert!(matches!(outcome.decision, RelayDecision::Relay(_)));
        assert_eq!(radio.broadcasts.load(Ordering::SeqCst), 1);

        let relayed = PacketCodec::new().decode(&radio.frames.lock()[0]).unwrap();
        assert_eq!(relayed.ttl, 6);

        // second copy is a duplicate and is not rebroadcast
        node.handle_mesh_frame(&frame).await;
        assert_eq!(radio.broadcasts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mesh_delivery_event() {
        let (tx, mut rx) = mpsc::channel(16);
        let (node, _clock) = node("gateway").await;
        let node = node.with_events(tx);

        let frame = frame_from(
            "phone-9",
            Some("gateway"),
            5,
            b"BCN|a1b2c3d4|18.0425,-63.0548|UR|1o5qmq",
        );
        let outcome = node.handle_mesh_frame(&frame).await;
        assert!(matches!(outcome.decision, RelayDecision::Deliver(_)));

        assert!(matches!(
            rx.try_recv().unwrap(),
            NodeEvent::StatusReceived(status) if status.status == StatusCode::Urgent
        ));
        match rx.try_recv().unwrap() {
            NodeEvent::MeshDelivery(delivery) => {
                assert_eq!(delivery.source_id, "phone-9");
                assert!(!delivery.broadcast);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undrained_events_do_not_block() {
        let (tx, mut rx) = mpsc::channel(1);
        let (node, _clock) = node("gateway").await;
        let node = node.with_events(tx);
        let data = FakeTransport::new(Channel::Data);
        node.register_channel(data.clone());

        for id in 1..=3u64 {
            let frame = frame_from("phone-9", Some("gateway"), id, b"hi");
            tokio::time::timeout(Duration::from_secs(1), node.handle_mesh_frame(&frame))
                .await
                .unwrap();
        }
        node.send_message("hello").await.unwrap();
        let report = tokio::time::timeout(Duration::from_secs(1), node.flush_once())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(node.stats().await.events_dropped, 3);

        // the first delivery is still there
        assert!(matches!(rx.try_recv().unwrap(), NodeEvent::MeshDelivery(_)));

        drop(rx);
        node.handle_mesh_frame(&frame_from("phone-9", Some("gateway"), 9, b"hi"))
            .await;
        assert_eq!(node.stats().await.events_dropped, 4);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_submit() {
        let (node, _clock) = node("phone-1").await;
        node.shutdown();
        assert!(node.is_shut_down());
        assert!(matches!(
            node.send_panic("help").await,
            Err(NodeError::ShutDown)
        ));
        assert_eq!(node.flush_once().await.unwrap(), FlushReport::default());
    }

    #[tokio::test]
    async fn test_flush_loop_runs_until_shutdown() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut config = config("phone-1");
        config.dispatch.flush_interval_ms = 20;
        let node = BeaconNode::open(config, Arc::new(ManualClock::new(1_000)))
            .await
            .unwrap()
            .with_events(tx);
        let node = Arc::new(node);
        node.register_channel(FakeTransport::new(Channel::Mesh));

        let handle = node.spawn_flush_loop();
        let receipt = node.send_panic("help").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            NodeEvent::EntrySent { entry_id, channel } => {
                assert_eq!(entry_id, receipt.entry.id);
                assert_eq!(channel, Channel::Mesh);
            }
            other => panic!("unexpected event {:?}", other),
        }

        node.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
