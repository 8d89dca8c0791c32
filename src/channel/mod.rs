//! Delivery channels
//!
//! The physical transports (radio stack, SMS modem, HTTP client) live outside
//! this crate. Each is consumed through [`ChannelTransport`]; the
//! [`ChannelDispatcher`] picks one per attempt and bounds it with a timeout.

pub mod adapters;
pub mod dispatcher;
pub mod error;
pub mod transport;
pub mod types;

pub use adapters::{packet_type_for, MeshChannel, SmsChannel};
pub use dispatcher::{ChannelDispatcher, DEFAULT_SEND_TIMEOUT};
pub use error::{ChannelError, ChannelResult};
pub use transport::{ChannelTransport, MeshRadio, SmsGateway};
pub use types::{Channel, ChannelPreference, DispatchResult, OutboundMessage, SendOutcome};
