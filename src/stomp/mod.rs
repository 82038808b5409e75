pub mod connection;
pub mod frame;
pub mod session;

pub use frame::{Command, Frame, FrameDecoder};
pub use session::SessionHandle;

use tokio::sync::watch;

/// Subscription id used for the single conversation subscription of a session
pub const SUBSCRIPTION_ID: &str = "sub-0";

/// Destination the server pushes a conversation's messages to
pub fn subscription_destination(inquiry_id: i64) -> String {
    format!("/user/queue/inquiry/{}/messages", inquiry_id)
}

/// Destination for publishing into a conversation
pub fn publish_destination(inquiry_id: i64) -> String {
    format!("/app/inquiry/{}/send", inquiry_id)
}

/// Resolves once shutdown is signalled or the signalling side is gone
pub(crate) async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
