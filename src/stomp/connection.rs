// One STOMP-over-WebSocket connection: handshake, subscribe, then pump frames until
// the socket drops, the broker sends ERROR, or shutdown is signalled.

use anyhow::{anyhow, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::frame::{Command, Frame, FrameDecoder};
use super::{publish_destination, subscription_destination, wait_for_shutdown, SUBSCRIPTION_ID};
use crate::config::ClientConfig;
use crate::models::OutboundMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// How a connection that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Shutdown was requested (or the session owner went away)
    Shutdown,
    /// The broker closed the socket
    Dropped,
}

pub(crate) struct ConnectionParams<'a> {
    pub config: &'a ClientConfig,
    pub token: &'a str,
    pub inquiry_id: i64,
}

/// Negotiated heart-beat periods; zero means disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeartBeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl HeartBeat {
    /// `client` is what we advertised, `server` is the CONNECTED frame's heart-beat header
    pub fn negotiate(client: (u64, u64), server: (u64, u64)) -> Self {
        let (cx, cy) = client;
        let (sx, sy) = server;
        let outgoing = if cx == 0 || sy == 0 { 0 } else { cx.max(sy) };
        let incoming = if cy == 0 || sx == 0 { 0 } else { cy.max(sx) };
        HeartBeat {
            outgoing: Duration::from_millis(outgoing),
            incoming: Duration::from_millis(incoming),
        }
    }

    fn tick_period(&self) -> Duration {
        [self.outgoing, self.incoming]
            .into_iter()
            .filter(|d| !d.is_zero())
            .min()
            .map(|d| d / 2)
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Run a single connection to completion.
///
/// `connected_tx` is raised only once the subscription is in place; the caller lowers it.
pub(crate) async fn run_connection(
    params: &ConnectionParams<'_>,
    connected_tx: &watch::Sender<bool>,
    inbound_tx: &mpsc::Sender<String>,
    outbound_rx: &mut mpsc::Receiver<OutboundMessage>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<ConnectionEnd> {
    let handshake = handshake(params);
    let (mut sink, mut source, mut decoder, heart_beat) = tokio::select! {
        result = handshake => result?,
        _ = wait_for_shutdown(shutdown_rx) => {
            debug!("Shutdown requested during broker handshake");
            return Ok(ConnectionEnd::Shutdown);
        }
    };

    let subscribe = Frame::subscribe(SUBSCRIPTION_ID, &subscription_destination(params.inquiry_id));
    sink.send(WsMessage::Text(subscribe.encode()))
        .await
        .context("Failed to send SUBSCRIBE")?;

    connected_tx.send_replace(true);
    info!(
        "Connected to broker and subscribed to inquiry {}",
        params.inquiry_id
    );

    let destination = publish_destination(params.inquiry_id);
    let mut ticker = tokio::time::interval(heart_beat.tick_period());
    let mut last_received = Instant::now();
    let mut last_sent = Instant::now();

    loop {
        tokio::select! {
            incoming = source.next() => {
                let ws_message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => return Err(anyhow!("WebSocket error: {}", e)),
                    None => {
                        warn!("Broker closed the WebSocket stream");
                        return Ok(ConnectionEnd::Dropped);
                    }
                };
                last_received = Instant::now();

                let text = match ws_message {
                    WsMessage::Text(text) => text,
                    WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Ignoring non UTF-8 binary frame from broker");
                            continue;
                        }
                    },
                    WsMessage::Close(reason) => {
                        warn!("Broker closed the connection: {:?}", reason);
                        return Ok(ConnectionEnd::Dropped);
                    }
                    _ => continue,
                };

                let frames = match decoder.push(&text) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!("Dropping undecodable broker data: {}", e);
                        continue;
                    }
                };
                for frame in frames {
                    match frame.command {
                        Command::Message => {
                            if frame.header("subscription").map_or(false, |s| s != SUBSCRIPTION_ID) {
                                debug!("Ignoring MESSAGE for foreign subscription");
                                continue;
                            }
                            // A full inbound buffer must not hold off shutdown
                            let delivered = tokio::select! {
                                sent = inbound_tx.send(frame.body) => sent.is_ok(),
                                _ = wait_for_shutdown(shutdown_rx) => {
                                    debug!("Shutdown requested while inbound buffer was full");
                                    disconnect(&mut sink).await;
                                    return Ok(ConnectionEnd::Shutdown);
                                }
                            };
                            if !delivered {
                                debug!("Inbound receiver gone, closing connection");
                                disconnect(&mut sink).await;
                                return Ok(ConnectionEnd::Shutdown);
                            }
                        }
                        Command::Error => {
                            let reason = frame.header("message").unwrap_or(frame.body.as_str()).to_string();
                            error!("Broker sent ERROR: {}", reason);
                            return Err(anyhow!("Broker error: {}", reason));
                        }
                        Command::Receipt => debug!("Receipt {:?}", frame.header("receipt-id")),
                        other => debug!("Ignoring unexpected {:?} frame", other),
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                let message = match outbound {
                    Some(message) => message,
                    None => {
                        debug!("Outbound sender gone, closing connection");
                        disconnect(&mut sink).await;
                        return Ok(ConnectionEnd::Shutdown);
                    }
                };
                let body = message.to_json().context("Failed to encode outbound message")?;
                sink.send(WsMessage::Text(Frame::send_json(&destination, &body).encode()))
                    .await
                    .context("Failed to send SEND frame")?;
                last_sent = Instant::now();
                debug!("Published message {}", message.client_msg_id);
            }
            _ = ticker.tick() => {
                if !heart_beat.outgoing.is_zero() && last_sent.elapsed() >= heart_beat.outgoing {
                    sink.send(WsMessage::Text("\n".to_string()))
                        .await
                        .context("Failed to send heart-beat")?;
                    last_sent = Instant::now();
                }
                // Allow twice the negotiated period before declaring the broker dead
                if !heart_beat.incoming.is_zero() && last_received.elapsed() > heart_beat.incoming * 2 {
                    return Err(anyhow!("No heart-beat from broker for {:?}", last_received.elapsed()));
                }
            }
            _ = wait_for_shutdown(shutdown_rx) => {
                disconnect(&mut sink).await;
                return Ok(ConnectionEnd::Shutdown);
            }
        }
    }
}

async fn handshake(params: &ConnectionParams<'_>) -> Result<(WsSink, WsSource, FrameDecoder, HeartBeat)> {
    let config = params.config;
    let url = config.ws_url.as_str();
    debug!("Opening WebSocket to {}", url);

    let (ws, _response) = timeout(config.connect_timeout, connect_async(url))
        .await
        .map_err(|_| anyhow!("Timed out connecting to {} after {:?}", url, config.connect_timeout))?
        .with_context(|| format!("Failed to open WebSocket to {}", url))?;
    let (mut sink, mut source) = ws.split();

    let advertised = config.heartbeat.as_millis() as u64;
    let connect = Frame::connect(&config.broker_host(), params.token, (advertised, advertised));
    sink.send(WsMessage::Text(connect.encode()))
        .await
        .context("Failed to send CONNECT")?;

    let mut decoder = FrameDecoder::new();
    let connected = timeout(config.connect_timeout, await_connected(&mut source, &mut decoder))
        .await
        .map_err(|_| anyhow!("Timed out waiting for CONNECTED"))??;

    let server = connected.heart_beat().unwrap_or((0, 0));
    let heart_beat = HeartBeat::negotiate((advertised, advertised), server);
    debug!(
        "STOMP session established (version {:?}, heart-beat {:?})",
        connected.header("version"),
        heart_beat
    );
    Ok((sink, source, decoder, heart_beat))
}

async fn await_connected(source: &mut WsSource, decoder: &mut FrameDecoder) -> Result<Frame> {
    while let Some(message) = source.next().await {
        let text = match message.context("WebSocket error during handshake")? {
            WsMessage::Text(text) => text,
            WsMessage::Binary(bytes) => String::from_utf8(bytes).map_err(|_| anyhow!("Non UTF-8 handshake reply"))?,
            WsMessage::Close(_) => return Err(anyhow!("Broker closed the connection during handshake")),
            _ => continue,
        };
        for frame in decoder.push(&text)? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    let reason = frame.header("message").unwrap_or(frame.body.as_str()).to_string();
                    return Err(anyhow!("Broker rejected CONNECT: {}", reason));
                }
                other => debug!("Ignoring {:?} before CONNECTED", other),
            }
        }
    }
    Err(anyhow!("Broker closed the stream during handshake"))
}

/// Best-effort UNSUBSCRIBE + DISCONNECT, then close the socket
async fn disconnect(sink: &mut WsSink) {
    let frames = [
        Frame::unsubscribe(SUBSCRIPTION_ID),
        Frame::disconnect("disconnect-0"),
    ];
    for frame in frames {
        if let Err(e) = sink.send(WsMessage::Text(frame.encode())).await {
            debug!("Failed to send {:?} while disconnecting: {}", frame.command, e);
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("Error closing WebSocket: {}", e);
    }
    info!("Disconnected from broker");
}
