//! A chat lobby on top of Tandem.
//!
//! ```text
//! lobby server --port 7070 --max 4
//! lobby client --name alice --host 127.0.0.1 --port 7070
//! ```
//!
//! Clients send `Say` packets; the server stamps them with the sender's
//! name and relays them to everyone else as `Said`.

use std::sync::{Arc, OnceLock};

use clap::{Parser, Subcommand};
use tandem::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Client → server: one line of text.
const SAY: PacketType = PacketType::Application(0x0100);
/// Server → clients: sender name, then the line.
const SAID: PacketType = PacketType::Application(0x0101);

#[derive(Parser)]
#[command(name = "lobby")]
#[command(about = "Chat lobby over a TCP+UDP session", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host the lobby
    Server {
        /// Port for both TCP and UDP
        #[arg(short, long, default_value_t = tandem::DEFAULT_PORT)]
        port: u16,

        /// Most participants at once
        #[arg(short, long, default_value_t = 8)]
        max: usize,
    },

    /// Join a lobby
    Client {
        /// Display name, 3 to 20 characters
        #[arg(short, long)]
        name: String,

        /// Server host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = tandem::DEFAULT_PORT)]
        port: u16,
    },
}

// ---------------------------------------------------------------------------
// Dispatch tables
// ---------------------------------------------------------------------------

/// Relays every `Say` to everyone but the speaker.
///
/// The handle only exists once the server is built, so handlers reach it
/// through a cell filled right after.
fn server_table(
    handle: Arc<OnceLock<ServerHandle>>,
) -> Result<Dispatcher<ServerSide>, DispatchError> {
    Dispatcher::new().with(SAY, move |packet, from| {
        let (Some(from), Some(server)) = (from, handle.get()) else {
            return Ok(());
        };
        let line = packet.read_string()?;
        let mut said = Packet::new(SAID);
        said.write_str(from.display_name())?.write_str(&line)?;
        server.broadcast_except(&said, from.id());
        Ok(())
    })
}

/// Hands every `Said` to `on_line` as `(name, line)`.
fn client_table(
    on_line: impl Fn(String, String) + Send + Sync + 'static,
) -> Result<Dispatcher<ClientSide>, DispatchError> {
    Dispatcher::new().with(SAID, move |packet, _| {
        let name = packet.read_string()?;
        let line = packet.read_string()?;
        on_line(name, line);
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_server(port: u16, max: usize) -> Result<(), TandemError> {
    let handle = Arc::new(OnceLock::new());
    let server = ServerBuilder::new()
        .port(port)
        .max_participants(max)
        .build(server_table(Arc::clone(&handle))?)
        .await?;
    let _ = handle.set(server.handle());
    server.run().await
}

async fn run_client(name: &str, host: &str, port: u16) -> Result<(), TandemError> {
    let table = client_table(|name, line| println!("{name}: {line}"))?;
    let client = connect_client(host, port, name, table).await?;
    println!("joined as {} ({})", client.display_name(), client.local_id());
    println!("type to chat, /who to list participants, /quit to leave");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            reason = client.closed() => {
                match reason {
                    Some(reason) => println!("kicked: {reason}"),
                    None => println!("server closed the connection"),
                }
                return Ok(());
            }
            line = lines.next_line() => line,
        };
        let Ok(Some(line)) = line else { break };
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/who" => {
                for entry in client.participants() {
                    println!("  {} {}", entry.id, entry.display_name);
                }
            }
            text => {
                let mut say = Packet::new(SAY);
                say.write_str(text)?;
                client.send(&say).await?;
            }
        }
    }
    client.disconnect().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Server { port, max } => run_server(port, max).await?,
        Commands::Client { name, host, port } => run_client(&name, &host, port).await?,
    }
    Ok(())
}
