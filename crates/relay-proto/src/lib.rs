//! Wire protocol for the fleet-tracking relay.
//!
//! The transport is message-oriented: every frame is a JSON object with an
//! `event` name and a `data` payload (mirroring the Socket.IO-flavored
//! protocol the driver and map clients already speak). This crate owns the
//! shape of those frames and the validation rules from the inbound side,
//! independent of how the engine acts on them.

pub mod geometry;
pub mod inbound;
pub mod outbound;
pub mod role;
pub mod validate;
pub mod wire;

pub use geometry::RouteGeometry;
pub use inbound::{DriverPayloadFields, InboundEvent};
pub use outbound::{DriverSummary, OutboundEvent};
pub use role::Role;
pub use validate::ValidationError;
pub use wire::WireMessage;
