//! Drives one Java client connection: reads frames into a [`JavaSession`],
//! carries out its actions, and owns the session's PE bridge.

use crate::{
    bridge::{self, BridgeEvent, BridgeHandle},
    config::GatewayConfig,
    protocol::FrameCodec,
    session::{JavaSession, SessionAction},
    translation::HandlerTable,
};
use anyhow::Context;
use futures::{SinkExt, StreamExt};
use std::{future, pin::Pin, sync::Arc};
use tokio::{
    net::TcpStream,
    time::{sleep, Sleep},
};
use tokio_util::codec::Framed;

/// Runs the connection until either side closes it.
///
/// Dropping the returned future closes the TCP stream, shuts the bridge down
/// and cancels a pending delayed close.
pub async fn drive(
    stream: TcpStream,
    config: Arc<GatewayConfig>,
    handlers: Arc<HandlerTable>,
) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut session = JavaSession::new(Arc::clone(&config), handlers);
    let mut bridge: Option<BridgeHandle> = None;
    let mut close_timer: Option<Pin<Box<Sleep>>> = None;

    loop {
        while let Some(action) = session.poll_action() {
            match action {
                SessionAction::Send(payload) => framed
                    .send(payload)
                    .await
                    .context("failed to write to client")?,
                SessionAction::ConnectBridge(player) => {
                    tracing::debug!("Starting PE bridge to {}", config.target());
                    bridge = Some(bridge::spawn(
                        config.target(),
                        config.handshake_timeout,
                        &player,
                    ));
                }
                SessionAction::Close => {
                    tracing::debug!("Closing connection");
                    return Ok(());
                }
                SessionAction::CloseAfter(delay) => {
                    tracing::debug!("Closing connection in {delay:?}");
                    close_timer = Some(Box::pin(sleep(delay)));
                }
            }
        }

        tokio::select! {
            () = expire(&mut close_timer) => {
                tracing::debug!("Closing connection");
                return Ok(());
            }
            event = next_event(&bridge) => match event {
                Some(event) => {
                    tracing::trace!("Bridge event {event:?}");
                    if let Err(e) = session.handle_bridge_event(event) {
                        tracing::warn!("Closing connection: {e}");
                    }
                }
                None => {
                    tracing::debug!("PE bridge exited");
                    bridge = None;
                }
            },
            frame = framed.next(), if !session.is_closing() => match frame {
                Some(Ok(frame)) => {
                    if let Err(e) = session.handle_frame(&frame) {
                        tracing::warn!("Closing connection: {e}");
                    }
                }
                Some(Err(e)) => return Err(e).context("failed to read frame"),
                None => {
                    tracing::info!("Client disconnected");
                    return Ok(());
                }
            },
        }
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => future::pending().await,
    }
}

async fn next_event(bridge: &Option<BridgeHandle>) -> Option<BridgeEvent> {
    match bridge {
        Some(bridge) => bridge.recv_event().await,
        None => future::pending().await,
    }
}
