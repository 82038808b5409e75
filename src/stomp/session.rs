// Long-lived transport session: a background task that keeps one broker
// connection alive for a conversation, reconnecting after a fixed delay.

use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::connection::{run_connection, ConnectionEnd, ConnectionParams};
use super::wait_for_shutdown;
use crate::config::ClientConfig;
use crate::models::OutboundMessage;
use crate::reconcile::Publisher;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner's side of a transport session.
///
/// Dropping the handle signals shutdown as well; `close` additionally waits for the
/// background task to say goodbye to the broker.
#[derive(Debug)]
pub struct SessionHandle {
    inquiry_id: i64,
    connected_rx: watch::Receiver<bool>,
    inbound_rx: mpsc::Receiver<String>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start a session for `inquiry_id`. Must be called from within a tokio runtime.
    ///
    /// Without a token nothing is spawned and the session reports disconnected forever.
    pub fn open(config: &ClientConfig, inquiry_id: i64, token: Option<&str>) -> Self {
        let (connected_tx, connected_rx) = watch::channel(false);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = match token.filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                let worker = SessionWorker {
                    config: config.clone(),
                    token: token.to_string(),
                    inquiry_id,
                    connected_tx,
                    inbound_tx,
                    outbound_rx,
                    shutdown_rx,
                };
                Some(tokio::spawn(worker.run()))
            }
            None => {
                warn!("No auth token available, not connecting to broker for inquiry {}", inquiry_id);
                None
            }
        };

        SessionHandle {
            inquiry_id,
            connected_rx,
            inbound_rx,
            outbound_tx,
            shutdown_tx,
            task,
        }
    }

    pub fn inquiry_id(&self) -> i64 {
        self.inquiry_id
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// Queue a publish on the live connection. Nothing is queued while disconnected.
    pub fn send(&self, message: OutboundMessage) -> bool {
        if !self.is_connected() {
            debug!("Not connected, dropping outbound message {}", message.client_msg_id);
            return false;
        }
        match self.outbound_tx.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to queue outbound message: {}", e);
                false
            }
        }
    }

    /// Next inbound message body, or `None` once the session has ended
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound_rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.inbound_rx.try_recv().ok()
    }

    /// Unsubscribe, disconnect and stop reconnecting. Waits for the task to finish.
    pub async fn close(mut self) {
        self.shutdown_tx.send_replace(true);
        let Some(task) = self.task.take() else {
            return;
        };
        let abort = task.abort_handle();
        match tokio::time::timeout(CLOSE_TIMEOUT, task).await {
            Ok(Ok(())) => debug!("Transport session for inquiry {} closed", self.inquiry_id),
            Ok(Err(e)) => warn!("Transport session task failed: {}", e),
            Err(_) => {
                warn!("Transport session did not stop within {:?}, aborting", CLOSE_TIMEOUT);
                abort.abort();
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Publisher for SessionHandle {
    fn is_connected(&self) -> bool {
        SessionHandle::is_connected(self)
    }

    fn publish(&self, message: OutboundMessage) -> bool {
        self.send(message)
    }
}

struct SessionWorker {
    config: ClientConfig,
    token: String,
    inquiry_id: i64,
    connected_tx: watch::Sender<bool>,
    inbound_tx: mpsc::Sender<String>,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionWorker {
    async fn run(mut self) {
        let mut attempt: u64 = 0;
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            attempt += 1;
            info!(
                "Connecting to broker {} for inquiry {} (attempt {})",
                self.config.ws_url, self.inquiry_id, attempt
            );

            let params = ConnectionParams {
                config: &self.config,
                token: &self.token,
                inquiry_id: self.inquiry_id,
            };
            let outcome = run_connection(
                &params,
                &self.connected_tx,
                &self.inbound_tx,
                &mut self.outbound_rx,
                &mut self.shutdown_rx,
            )
            .await;
            self.connected_tx.send_replace(false);

            match outcome {
                Ok(ConnectionEnd::Shutdown) => break,
                Ok(ConnectionEnd::Dropped) => warn!("Broker connection for inquiry {} dropped", self.inquiry_id),
                Err(e) => warn!("Broker connection for inquiry {} failed: {:#}", self.inquiry_id, e),
            }

            // Publishes that never reached the dead connection are not replayed
            let mut discarded = 0;
            while self.outbound_rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                warn!("Discarded {} unsent message(s) after disconnect", discarded);
            }

            if self.inbound_tx.is_closed() {
                debug!("Session owner gone, not reconnecting");
                break;
            }

            debug!("Reconnecting in {:?}", self.config.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            }
        }
        self.connected_tx.send_replace(false);
        info!("Transport session for inquiry {} stopped", self.inquiry_id);
    }
}
