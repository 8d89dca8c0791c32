//! Channel transports built on the mesh and SMS codecs

use crate::channel::transport::{ChannelTransport, MeshRadio, SmsGateway};
use crate::channel::types::{Channel, OutboundMessage, SendOutcome};
use crate::clock::{Clock, IdSource};
use crate::mesh::{MeshPacket, PacketCodec, PacketType, DEFAULT_TTL};
use crate::queue::types::Priority;
use crate::sms;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Mesh packet type used to carry an entry of the given priority
pub fn packet_type_for(priority: Priority) -> PacketType {
    match priority {
        Priority::Panic => PacketType::Panic,
        Priority::Status | Priority::CheckIn | Priority::Telemetry => PacketType::Status,
        Priority::Message => PacketType::Message,
    }
}

/// Floods entries into the mesh as broadcast packets
pub struct MeshChannel {
    radio: Arc<dyn MeshRadio>,
    codec: PacketCodec,
    source_id: String,
    target_id: Option<String>,
    ttl: u8,
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
}

impl MeshChannel {
    pub fn new(
        radio: Arc<dyn MeshRadio>,
        source_id: impl Into<String>,
        ids: Arc<dyn IdSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = PacketCodec::with_mtu(radio.mtu());
        Self {
            radio,
            codec,
            source_id: source_id.into(),
            target_id: None,
            ttl: DEFAULT_TTL,
            ids,
            clock,
        }
    }

    /// Address packets to one device (typically a gateway) instead of all
    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Packet (or fragments) for one outbound message
    pub fn packets_for(&self, message: &OutboundMessage) -> Result<Vec<MeshPacket>, SendOutcome> {
        let mut packet = MeshPacket::new(
            self.ids.next_packet_id(),
            packet_type_for(message.priority),
            self.source_id.clone(),
            self.clock.now_millis(),
            message.payload.to_bytes(),
        )
        .with_ttl(self.ttl);
        if let Some(target) = &self.target_id {
            packet = packet.with_target(target.clone());
        }

        self.codec
            .packetize(packet, self.ids.as_ref())
            .map_err(|e| SendOutcome::PermanentFailure(e.to_string()))
    }
}

#[async_trait]
impl ChannelTransport for MeshChannel {
    fn channel(&self) -> Channel {
        Channel::Mesh
    }

    fn is_available(&self) -> bool {
        self.radio.has_peers()
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let packets = match self.packets_for(message) {
            Ok(packets) => packets,
            Err(outcome) => return outcome,
        };

        for packet in &packets {
            let frame = match self.codec.encode(packet) {
                Ok(frame) => frame,
                Err(e) => return SendOutcome::PermanentFailure(e.to_string()),
            };
            if let Err(e) = self.radio.broadcast(frame).await {
                return e.into();
            }
        }

        debug!(
            "Broadcast entry {} as {} mesh packet(s)",
            message.entry_id,
            packets.len()
        );
        SendOutcome::Success
    }
}

/// Sends pre-rendered `BCN|` bodies to a fixed recipient
pub struct SmsChannel {
    gateway: Arc<dyn SmsGateway>,
    recipient: String,
}

impl SmsChannel {
    pub fn new(gateway: Arc<dyn SmsGateway>, recipient: impl Into<String>) -> Self {
        Self {
            gateway,
            recipient: recipient.into(),
        }
    }

    /// The SMS body for `message`, or why it can never be sent
    pub fn body_for<'a>(&self, message: &'a OutboundMessage) -> Result<&'a str, SendOutcome> {
        let text = message
            .payload
            .as_text()
            .map(str::trim)
            .ok_or_else(|| SendOutcome::PermanentFailure("payload is not text".into()))?;

        if !sms::is_recognized(text) {
            return Err(SendOutcome::PermanentFailure(
                "payload is not a BCN status body".into(),
            ));
        }
        let len = text.chars().count();
        if len > sms::MAX_SMS_LEN {
            return Err(SendOutcome::PermanentFailure(format!(
                "body is {} characters (max {})",
                len,
                sms::MAX_SMS_LEN
            )));
        }
        sms::decode(text).map_err(|e| SendOutcome::PermanentFailure(e.to_string()))?;

        Ok(text)
    }
}

#[async_trait]
impl ChannelTransport for SmsChannel {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn is_available(&self) -> bool {
        self.gateway.has_signal()
    }

    fn accepts(&self, message: &OutboundMessage) -> bool {
        self.body_for(message).is_ok()
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let body = match self.body_for(message) {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        match self.gateway.send_sms(&self.recipient, body).await {
            Ok(()) => SendOutcome::Success,
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::error::{ChannelError, ChannelResult};
    use crate::clock::{ManualClock, SequentialIds};
    use crate::mesh::fragment::reassemble;
    use crate::mesh::Reassembly;
    use crate::queue::types::QueuePayload;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct RecordingRadio {
        mtu: usize,
        frames: Mutex<Vec<Bytes>>,
        fail: Option<ChannelError>,
    }

    impl RecordingRadio {
        fn new(mtu: usize) -> Arc<Self> {
            Arc::new(Self {
                mtu,
                frames: Mutex::new(Vec::new()),
                fail: None,
            })
        }
    }

    #[async_trait]
    impl MeshRadio for RecordingRadio {
        fn has_peers(&self) -> bool {
            true
        }

        fn mtu(&self) -> usize {
            self.mtu
        }

        async fn broadcast(&self, frame: Bytes) -> ChannelResult<()> {
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    struct RecordingGateway {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SmsGateway for RecordingGateway {
        fn has_signal(&self) -> bool {
            true
        }

        async fn send_sms(&self, recipient: &str, body: &str) -> ChannelResult<()> {
            self.sent
                .lock()
                .push((recipient.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn message(priority: Priority, payload: impl Into<QueuePayload>) -> OutboundMessage {
        OutboundMessage {
            entry_id: Uuid::new_v4(),
            priority,
            payload: payload.into(),
            attempt: 1,
        }
    }

    fn mesh_channel(radio: Arc<RecordingRadio>) -> MeshChannel {
        MeshChannel::new(
            radio,
            "phone-1",
            Arc::new(SequentialIds::starting_at(1)),
            Arc::new(ManualClock::new(42)),
        )
    }

    #[tokio::test]
    async fn test_mesh_single_frame() {
        let radio = RecordingRadio::new(512);
        let channel = mesh_channel(radio.clone());

        let outcome = channel
            .send(&message(Priority::Panic, vec![7u8; 40]))
            .await;
        assert_eq!(outcome, SendOutcome::Success);

        let frames = radio.frames.lock();
        assert_eq!(frames.len(), 1);
        let packet = PacketCodec::new().decode(&frames[0]).unwrap();
        assert_eq!(packet.kind, PacketType::Panic);
        assert_eq!(packet.source_id, "phone-1");
        assert_eq!(packet.timestamp, 42);
        assert!(packet.is_broadcast());
    }

    #[tokio::test]
    async fn test_mesh_fragments_large_payload() {
        let radio = RecordingRadio::new(128);
        let channel = mesh_channel(radio.clone());
        let payload: Vec<u8> = (0..=255u8).cycle().take(1_000).collect();

        let outcome = channel
            .send(&message(Priority::Message, payload.clone()))
            .await;
        assert_eq!(outcome, SendOutcome::Success);

        let codec = PacketCodec::with_mtu(128);
        let frames = radio.frames.lock();
        assert!(frames.len() > 1);
        let packets: Vec<MeshPacket> = frames
            .iter()
            .map(|frame| {
                assert!(frame.len() <= 128);
                codec.decode(frame).unwrap()
            })
            .collect();

        match reassemble(&packets, 0).unwrap() {
            Reassembly::Complete(message) => {
                assert_eq!(message.kind, PacketType::Message);
                assert_eq!(message.payload, Bytes::from(payload));
            }
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mesh_radio_error_is_transient() {
        let radio = Arc::new(RecordingRadio {
            mtu: 512,
            frames: Mutex::new(Vec::new()),
            fail: Some(ChannelError::Transport("no peers".into())),
        });
        let channel = mesh_channel(radio);

        let outcome = channel.send(&message(Priority::Status, "x")).await;
        assert!(matches!(outcome, SendOutcome::TransientFailure(_)));
    }

    #[tokio::test]
    async fn test_sms_sends_valid_body() {
        let gateway = Arc::new(RecordingGateway {
            sent: Mutex::new(Vec::new()),
        });
        let channel = SmsChannel::new(gateway.clone(), "+15550100");
        let body = "BCN|a1b2c3d4|18.0425,-63.0548|OK|1o5qmq";

        let outcome = channel.send(&message(Priority::Status, body)).await;
        assert_eq!(outcome, SendOutcome::Success);
        assert_eq!(
            gateway.sent.lock().as_slice(),
            &[("+15550100".to_string(), body.to_string())]
        );
    }

    #[tokio::test]
    async fn test_sms_rejects_non_beacon_text() {
        let gateway = Arc::new(RecordingGateway {
            sent: Mutex::new(Vec::new()),
        });
        let channel = SmsChannel::new(gateway.clone(), "+15550100");

        for payload in [
            QueuePayload::from("hello there"),
            QueuePayload::from("BCN|x|bad|OK|1o5qmq"),
            QueuePayload::from(vec![0xff, 0x00]),
        ] {
            let outcome = channel.send(&message(Priority::Message, payload)).await;
            assert!(matches!(outcome, SendOutcome::PermanentFailure(_)));
        }
        assert!(gateway.sent.lock().is_empty());
    }

    #[test]
    fn test_sms_accepts_only_status_bodies() {
        let gateway = Arc::new(RecordingGateway {
            sent: Mutex::new(Vec::new()),
        });
        let channel = SmsChannel::new(gateway, "+15550100");

        assert!(channel.accepts(&message(
            Priority::Status,
            "BCN|a1b2c3d4|18.0425,-63.0548|OK|1o5qmq"
        )));
        assert!(!channel.accepts(&message(Priority::Panic, vec![1u8, 2, 3])));
        assert!(!channel.accepts(&message(Priority::Message, "are you ok?")));

        let mesh = mesh_channel(RecordingRadio::new(512));
        assert!(mesh.accepts(&message(Priority::Panic, vec![1u8, 2, 3])));
    }

    #[test]
    fn test_packet_type_for_priority() {
        assert_eq!(packet_type_for(Priority::Panic), PacketType::Panic);
        assert_eq!(packet_type_for(Priority::CheckIn), PacketType::Status);
        assert_eq!(packet_type_for(Priority::Message), PacketType::Message);
    }
}
