//! # relay-media
//!
//! Media data-plane contract for a real-time audio/video relay.
//!
//! Transports, codecs, mixers and relay stages exchange media through the
//! capability traits defined here, and feedback (loss reports, keyframe
//! requests, bandwidth estimates) flows back through the same wiring in the
//! opposite direction. Packets are shared, never copied, on fan-out.
//!
//! This layer does not parse wire bytes, does not order or retransmit, and
//! owns no sockets.
//!
//! ## Crate structure
//!
//! - [`packet`] — Immutable-once-shared media packet, layer tagging
//! - [`monitor`] — Per-object exclusive-access guard and lifecycle
//! - [`feedback`] — `FeedbackSink` trait and the `FeedbackSource` slot
//! - [`sink`] — `MediaSink` capability
//! - [`source`] — `MediaSource` capability
//! - [`passthrough`] — Dual-role relay stage sharing one monitor
//! - [`fanout`] — One-to-many relay stage with layer tiers and PLI throttling
//! - [`stats`] — Delivery counters with serializable snapshots
//! - [`config`] — TOML relay configuration
//! - [`clock`] — Monotonic millisecond clock
//! - [`error`] — Status codes and error types

pub mod clock;
pub mod config;
pub mod error;
pub mod fanout;
pub mod feedback;
pub mod monitor;
pub mod packet;
pub mod passthrough;
pub mod sink;
pub mod source;
pub mod stats;

pub use error::{status_code, DeliveryError, DeliveryResult, MediaError, PacketError};
pub use feedback::{FeedbackSink, FeedbackSource};
pub use monitor::{Monitor, Monitored};
pub use packet::{LayerId, Packet, PacketKind, SharedPacket, MAX_PACKET_SIZE};
pub use sink::MediaSink;
pub use source::MediaSource;
