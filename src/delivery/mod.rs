//! Outbound delivery: the transport seam and its retry wrapper.

mod retrier;
mod transport;

pub use retrier::{DeliveryError, DeliveryRetrier, Operation};
pub use transport::{
    LogTransport, RecordingTransport, SendOptions, SentMessage, Transport, TransportError,
};
