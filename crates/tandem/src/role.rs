//! Which end of the connection a component belongs to.
//!
//! The role is a type parameter rather than a runtime flag, so a
//! client-side dispatch table can't be handed to a server.

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for [`ServerSide`] and [`ClientSide`]. Sealed.
pub trait Role: sealed::Sealed + Send + Sync + 'static {
    /// Used in log fields.
    const NAME: &'static str;
}

/// The authoritative end: owns the roster and admits participants.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerSide;

/// A participant's end: mirrors the roster it is told about.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSide;

impl sealed::Sealed for ServerSide {}
impl sealed::Sealed for ClientSide {}

impl Role for ServerSide {
    const NAME: &'static str = "server";
}

impl Role for ClientSide {
    const NAME: &'static str = "client";
}
