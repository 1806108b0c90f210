use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lanshare_protocol::WireMessage;
use lanshare_protocol::constants::SEND_QUEUE_CAPACITY;

/// One registered connection, as the hub sees it.
///
/// The socket itself lives in the connection pumps; the hub only ever
/// touches the outbound queue, the liveness timestamp and the cancel
/// token, so eviction never blocks on socket I/O.
pub struct Client {
    id: String,
    device_name: RwLock<String>,
    sender: mpsc::Sender<WireMessage>,
    last_seen: Mutex<Instant>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl Client {
    /// Creates a client and the receiving end of its outbound queue.
    /// The receiver goes to the connection's write pump.
    pub fn new(id: String, device_name: String) -> (Self, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let client = Self {
            id,
            device_name: RwLock::new(device_name),
            sender: tx,
            last_seen: Mutex::new(Instant::now()),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        };
        (client, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device_name(&self) -> String {
        self.device_name.read().expect("device_name lock").clone()
    }

    /// Updates the display name, normally from an inbound hello.
    pub fn set_device_name(&self, name: String) {
        *self.device_name.write().expect("device_name lock") = name;
    }

    /// Refreshes the liveness timestamp.
    pub fn touch(&self) {
        *self.last_seen.lock().expect("last_seen lock") = Instant::now();
    }

    /// Time since the last liveness signal.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().expect("last_seen lock").elapsed()
    }

    /// Non-blocking enqueue onto the outbound queue. Returns false if
    /// the queue is full or the write pump is gone; the caller decides
    /// whether that means eviction.
    pub fn enqueue(&self, msg: WireMessage) -> bool {
        self.sender.try_send(msg).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Marks the client disconnected and cancels both pumps. Closing
    /// the queue is implicit: dropping the hub's map entry drops the
    /// last sender once the pumps observe the cancel.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: &str, text: &str) -> WireMessage {
        WireMessage::Chat {
            id: id.into(),
            text: text.into(),
            from: String::new(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn enqueue_is_fifo() {
        let (client, mut rx) = Client::new("c1".into(), "laptop".into());
        assert!(client.enqueue(chat("1", "first")));
        assert!(client.enqueue(chat("2", "second")));

        match rx.recv().await.unwrap() {
            WireMessage::Chat { id, .. } => assert_eq!(id, "1"),
            other => panic!("unexpected {other:?}"),
        }
        match rx.recv().await.unwrap() {
            WireMessage::Chat { id, .. } => assert_eq!(id, "2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn enqueue_fails_when_queue_full() {
        let (client, _rx) = Client::new("c1".into(), "laptop".into());
        for _ in 0..SEND_QUEUE_CAPACITY {
            assert!(client.enqueue(WireMessage::ping()));
        }
        assert!(!client.enqueue(WireMessage::ping()));
    }

    #[tokio::test]
    async fn touch_resets_idle_time() {
        tokio::time::pause();
        let (client, _rx) = Client::new("c1".into(), "laptop".into());

        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(client.idle_for() >= Duration::from_secs(90));

        client.touch();
        assert!(client.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn disconnect_cancels_token() {
        let (client, _rx) = Client::new("c1".into(), "laptop".into());
        let token = client.cancel_token();
        assert!(client.is_connected());

        client.disconnect();
        assert!(!client.is_connected());
        assert!(token.is_cancelled());
    }
}
