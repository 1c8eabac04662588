//! Gateway configuration, parsed from the command line.

use clap::{Parser, ValueEnum};
use std::{net::SocketAddr, time::Duration};

/// Time between writing a disconnect frame and closing the socket,
/// so the frame reaches the client first.
pub const DISCONNECT_FLUSH_DELAY: Duration = Duration::from_millis(50);

/// How long the RakNet open-connection handshake may take before the
/// client is disconnected.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// When a Java client is told that login succeeded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LoginGate {
    /// As soon as the bridge has sent Open Connection Request #1.
    HandshakeStarted,
    /// Only once the RakNet open-connection handshake has completed.
    #[default]
    RaknetConnected,
}

/// Lets Minecraft Java 1.8.9 clients join a Minecraft PE server.
#[derive(Debug, Parser)]
#[command(name = "pe-bridge", version)]
pub struct Args {
    /// Address to accept Java clients on.
    #[arg(long, default_value = "0.0.0.0:25565")]
    pub listen: SocketAddr,
    /// Host name or IP of the PE server.
    #[arg(long, default_value = "nostalgiape.online")]
    pub target_host: String,
    /// UDP port of the PE server.
    #[arg(long, default_value_t = 19132)]
    pub target_port: u16,
    #[arg(long, value_enum, default_value_t = LoginGate::RaknetConnected)]
    pub login_gate: LoginGate,
    /// Description shown in the Java server list.
    #[arg(long, default_value = "Java to PE bridge")]
    pub motd: String,
    #[arg(long, default_value_t = 20)]
    pub max_players: u32,
    /// Seconds to wait for the PE server to complete the RakNet handshake.
    #[arg(long, default_value_t = HANDSHAKE_TIMEOUT.as_secs())]
    pub handshake_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_address: SocketAddr,
    pub target_host: String,
    pub target_port: u16,
    pub login_gate: LoginGate,
    pub motd: String,
    pub max_players: u32,
    pub disconnect_flush_delay: Duration,
    pub handshake_timeout: Duration,
}

impl GatewayConfig {
    /// `host:port` of the PE server, suitable for DNS lookup.
    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 25565)),
            target_host: String::from("127.0.0.1"),
            target_port: 19132,
            login_gate: LoginGate::default(),
            motd: String::from("Java to PE bridge"),
            max_players: 20,
            disconnect_flush_delay: DISCONNECT_FLUSH_DELAY,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

impl From<Args> for GatewayConfig {
    fn from(args: Args) -> Self {
        Self {
            listen_address: args.listen,
            target_host: args.target_host,
            target_port: args.target_port,
            login_gate: args.login_gate,
            motd: args.motd,
            max_players: args.max_players,
            disconnect_flush_delay: DISCONNECT_FLUSH_DELAY,
            handshake_timeout: Duration::from_secs(args.handshake_timeout),
        }
    }
}
