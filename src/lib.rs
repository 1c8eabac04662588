//! Gateway that lets Minecraft Java Edition 1.8.9 clients connect to a
//! Minecraft PE (Bedrock) server.
//!
//! The bridged connection looks like this:
//! Java client => TCP => this gateway => UDP (RakNet) => PE server
//!
//! # Bridging process
//! A Java client connects over TCP and sends a handshake. Status requests are
//! answered by the gateway itself. When the client starts logging in, the
//! gateway opens a UDP socket to the PE server and performs the RakNet
//! open-connection handshake on it (two request/reply pairs). By default the
//! client receives Login Success only once that handshake has completed;
//! see [`config::LoginGate`].
//!
//! Each Java connection and each PE bridge run in their own task. The bridge
//! reports back to its connection over a channel, and the connection owns the
//! right to close the TCP stream.
//!
//! Translation of Play-phase packets between the two protocols plugs in
//! through [`translation::HandlerTable`]. The RakNet reliability layer and PE
//! login are not implemented; the bridge stops in `LOGGING_IN`.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod player;
pub mod protocol;
pub mod session;
pub mod translation;
