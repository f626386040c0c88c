//! # Tandem
//!
//! A small client/server transport for multiplayer applications.
//!
//! Each session rides on a TCP stream and a UDP socket at once. A client
//! announces its UDP address with a discovery datagram, the server pairs
//! it with the TCP connection, hands out an identifier, and registers the
//! client under a display name. From then on both sides exchange typed
//! [`Packet`]s, routed to handlers through a [`Dispatcher`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem::prelude::*;
//!
//! const CHAT: PacketType = PacketType::Application(0x0100);
//!
//! # async fn example() -> Result<(), TandemError> {
//! let dispatcher = Dispatcher::<ServerSide>::new().with(CHAT, |packet, from| {
//!     let text = packet.read_string()?;
//!     if let Some(from) = from {
//!         println!("{}: {text}", from.display_name());
//!     }
//!     Ok(())
//! })?;
//! let server = start_server(7070, 4, dispatcher).await?;
//!
//! let client = connect_client("127.0.0.1", 7070, "alice", Dispatcher::new()).await?;
//! let mut packet = Packet::new(CHAT);
//! packet.write_str("hello")?;
//! client.send(&packet).await?;
//! # server.shutdown();
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod dispatch;
mod error;
mod handler;
mod role;
mod server;

pub use client::Client;
pub use config::{ClientConfig, DEFAULT_PORT, ServerConfig};
pub use dispatch::{DispatchError, Dispatcher, Handler};
pub use error::TandemError;
pub use role::{ClientSide, Role, ServerSide};
pub use server::{Server, ServerBuilder, ServerHandle};

pub use tandem_protocol::{KickReason, Packet, PacketType, ParticipantId, RosterEntry};
pub use tandem_session::{DisplayName, Participant};

/// Binds on all interfaces at `port` and runs the server in the
/// background.
///
/// The returned handle stays valid until [`ServerHandle::shutdown`].
pub async fn start_server(
    port: u16,
    max_participants: usize,
    dispatcher: Dispatcher<ServerSide>,
) -> Result<ServerHandle, TandemError> {
    let server = ServerBuilder::new()
        .port(port)
        .max_participants(max_participants)
        .build(dispatcher)
        .await?;
    let handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "server stopped with error");
        }
    });
    Ok(handle)
}

/// Connects to `address:port` and registers as `display_name`.
pub async fn connect_client(
    address: &str,
    port: u16,
    display_name: &str,
    dispatcher: Dispatcher<ClientSide>,
) -> Result<Client, TandemError> {
    let server_addr = if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    };
    Client::connect(ClientConfig::new(server_addr, display_name), dispatcher).await
}

/// Commonly used types, re-exported for convenience.
///
/// ```rust
/// use tandem::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Client, ClientConfig, ClientSide, DispatchError, Dispatcher, DisplayName, KickReason,
        Packet, PacketType, Participant, ParticipantId, RosterEntry, Server, ServerBuilder,
        ServerConfig, ServerHandle, ServerSide, TandemError, connect_client, start_server,
    };
}
