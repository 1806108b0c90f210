use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lanshare_protocol::WireMessage;
use lanshare_protocol::constants::HUB_SWEEP_PERIOD;

use crate::client::Client;

struct Shared {
    /// Membership map. Written only by the runner loop; read-locked
    /// elsewhere for queries like the connected-device listing.
    clients: RwLock<HashMap<String, Arc<Client>>>,
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<String>,
    broadcast_tx: mpsc::Sender<WireMessage>,
    device_name: String,
}

/// Cloneable handle to the hub's event loop.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
}

/// The event loop half. Owns the channel receivers; [`Hub::new`]
/// yields exactly one and the caller spawns [`HubRunner::run`].
pub struct HubRunner {
    shared: Arc<Shared>,
    register_rx: mpsc::Receiver<Arc<Client>>,
    unregister_rx: mpsc::Receiver<String>,
    broadcast_rx: mpsc::Receiver<WireMessage>,
}

impl Hub {
    pub fn new(device_name: String) -> (Hub, HubRunner) {
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::channel(64);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(256);

        let shared = Arc::new(Shared {
            clients: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            broadcast_tx,
            device_name,
        });

        let runner = HubRunner {
            shared: Arc::clone(&shared),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        (Hub { shared }, runner)
    }

    /// The server's own device name, used in welcome messages.
    pub fn device_name(&self) -> &str {
        &self.shared.device_name
    }

    /// Hands a freshly upgraded connection to the event loop.
    pub async fn register(&self, client: Arc<Client>) {
        let _ = self.shared.register_tx.send(client).await;
    }

    pub async fn unregister(&self, id: &str) {
        let _ = self.shared.unregister_tx.send(id.to_string()).await;
    }

    /// Queues a message for fan-out to every live connection. The
    /// membership snapshot is taken when the loop dequeues it, not
    /// when this call returns.
    pub async fn broadcast(&self, msg: WireMessage) {
        let _ = self.shared.broadcast_tx.send(msg).await;
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.read().expect("clients lock").len()
    }

    /// `(connection id, device name)` of every live connection.
    pub fn devices(&self) -> Vec<(String, String)> {
        self.shared
            .clients
            .read()
            .expect("clients lock")
            .values()
            .map(|c| (c.id().to_string(), c.device_name()))
            .collect()
    }
}

impl HubRunner {
    /// Runs the event loop until `cancel` fires. Registration,
    /// unregistration and broadcast are processed one at a time in
    /// arrival order; the sweep runs on a fixed period.
    pub async fn run(mut self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + HUB_SWEEP_PERIOD;
        let mut sweep = tokio::time::interval_at(start, HUB_SWEEP_PERIOD);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(client) = self.register_rx.recv() => self.handle_register(client),
                Some(id) = self.unregister_rx.recv() => self.handle_unregister(&id),
                Some(msg) = self.broadcast_rx.recv() => self.handle_broadcast(msg),
                _ = sweep.tick() => self.handle_sweep(),
            }
        }

        // Shutdown: tear down every remaining connection.
        let clients = std::mem::take(&mut *self.shared.clients.write().expect("clients lock"));
        for client in clients.values() {
            client.disconnect();
        }
        info!("hub stopped");
    }

    fn handle_register(&self, client: Arc<Client>) {
        let welcome = WireMessage::hello(&self.shared.device_name);
        if !client.enqueue(welcome) {
            warn!(client_id = %client.id(), "welcome rejected, dropping connection");
            client.disconnect();
            return;
        }

        info!(client_id = %client.id(), device = %client.device_name(), "client registered");
        self.shared
            .clients
            .write()
            .expect("clients lock")
            .insert(client.id().to_string(), client);
    }

    fn handle_unregister(&self, id: &str) {
        let removed = self.shared.clients.write().expect("clients lock").remove(id);
        if let Some(client) = removed {
            client.disconnect();
            info!(client_id = %id, "client unregistered");
        }
    }

    /// Non-blocking fan-out. A connection whose queue is full is
    /// evicted on the spot so one slow consumer never stalls the rest;
    /// the message it missed is gone, which is the documented
    /// trade-off of this policy.
    fn handle_broadcast(&self, msg: WireMessage) {
        let snapshot: Vec<Arc<Client>> = self
            .shared
            .clients
            .read()
            .expect("clients lock")
            .values()
            .cloned()
            .collect();

        debug!(msg_type = msg.tag(), clients = snapshot.len(), "broadcast");

        for client in snapshot {
            if !client.enqueue(msg.clone()) {
                warn!(client_id = %client.id(), "send queue full, evicting slow consumer");
                self.evict(client.id());
            }
        }
    }

    /// Evicts connections idle past twice the sweep period and probes
    /// everyone else with an application-level ping.
    fn handle_sweep(&self) {
        let snapshot: Vec<Arc<Client>> = self
            .shared
            .clients
            .read()
            .expect("clients lock")
            .values()
            .cloned()
            .collect();

        for client in snapshot {
            if client.idle_for() > 2 * HUB_SWEEP_PERIOD {
                warn!(
                    client_id = %client.id(),
                    idle_secs = client.idle_for().as_secs(),
                    "liveness timeout, evicting"
                );
                self.evict(client.id());
            } else if !client.enqueue(WireMessage::ping()) {
                warn!(client_id = %client.id(), "send queue full during sweep, evicting");
                self.evict(client.id());
            }
        }
    }

    fn evict(&self, id: &str) {
        if let Some(client) = self.shared.clients.write().expect("clients lock").remove(id) {
            client.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanshare_protocol::constants::SEND_QUEUE_CAPACITY;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_hub(name: &str) -> (Hub, CancellationToken) {
        let (hub, runner) = Hub::new(name.to_string());
        let cancel = CancellationToken::new();
        tokio::spawn(runner.run(cancel.clone()));
        (hub, cancel)
    }

    #[tokio::test]
    async fn register_sends_welcome_hello() {
        let (hub, _cancel) = spawn_hub("server-box");
        let (client, mut rx) = Client::new("c1".into(), "phone".into());
        hub.register(Arc::new(client)).await;

        match rx.recv().await.unwrap() {
            WireMessage::Hello { device, .. } => assert_eq!(device, "server-box"),
            other => panic!("expected hello, got {other:?}"),
        }
        settle().await;
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_all_live_connections() {
        let (hub, _cancel) = spawn_hub("srv");
        let (a, mut rx_a) = Client::new("a".into(), "phone".into());
        let (b, mut rx_b) = Client::new("b".into(), "laptop".into());
        hub.register(Arc::new(a)).await;
        hub.register(Arc::new(b)).await;
        settle().await;

        // Drain welcomes.
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        hub.broadcast(WireMessage::presence("phone")).await;
        settle().await;

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await.unwrap() {
                WireMessage::Presence { device, .. } => assert_eq!(device, "phone"),
                other => panic!("expected presence, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn full_queue_evicts_only_the_slow_consumer() {
        let (hub, _cancel) = spawn_hub("srv");
        let (slow, _slow_rx) = Client::new("slow".into(), "phone".into());
        let (fast, mut fast_rx) = Client::new("fast".into(), "laptop".into());
        let slow = Arc::new(slow);

        hub.register(Arc::clone(&slow)).await;
        hub.register(Arc::new(fast)).await;
        settle().await;
        assert_eq!(hub.client_count(), 2);

        // Fill the slow client's queue to the brim (welcome took one slot).
        while slow.enqueue(WireMessage::ping()) {}

        hub.broadcast(WireMessage::presence("phone")).await;
        settle().await;

        assert_eq!(hub.client_count(), 1);
        assert!(!slow.is_connected());

        // The fast client still got the broadcast.
        fast_rx.recv().await.unwrap(); // welcome
        match fast_rx.recv().await.unwrap() {
            WireMessage::Presence { .. } => {}
            other => panic!("expected presence, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_probes_live_and_evicts_idle() {
        let (hub, _cancel) = spawn_hub("srv");
        let (client, mut rx) = Client::new("c1".into(), "phone".into());
        let client = Arc::new(client);
        hub.register(Arc::clone(&client)).await;
        settle().await;
        rx.recv().await.unwrap(); // welcome

        // First sweep: idle_for is small, so the client gets a probe.
        tokio::time::advance(HUB_SWEEP_PERIOD + Duration::from_millis(1)).await;
        settle().await;
        match rx.recv().await.unwrap() {
            WireMessage::Ping { .. } => {}
            other => panic!("expected ping, got {other:?}"),
        }

        // Stay silent past the threshold; the next sweeps evict.
        tokio::time::advance(2 * HUB_SWEEP_PERIOD + Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(hub.client_count(), 0);
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn touched_client_survives_sweeps() {
        let (hub, _cancel) = spawn_hub("srv");
        let (client, mut rx) = Client::new("c1".into(), "phone".into());
        let client = Arc::new(client);
        hub.register(Arc::clone(&client)).await;
        settle().await;

        for _ in 0..5 {
            tokio::time::advance(HUB_SWEEP_PERIOD).await;
            settle().await;
            client.touch();
            // Keep the queue from filling with probes.
            while rx.try_recv().is_ok() {}
        }
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let (hub, _cancel) = spawn_hub("srv");
        let (client, _rx) = Client::new("c1".into(), "phone".into());
        hub.register(Arc::new(client)).await;
        settle().await;

        hub.unregister("c1").await;
        hub.unregister("c1").await;
        hub.unregister("never-existed").await;
        settle().await;
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn devices_lists_current_names() {
        let (hub, _cancel) = spawn_hub("srv");
        let (client, _rx) = Client::new("c1".into(), "old-name".into());
        let client = Arc::new(client);
        hub.register(Arc::clone(&client)).await;
        settle().await;

        client.set_device_name("new-name".into());
        let devices = hub.devices();
        assert_eq!(devices, vec![("c1".to_string(), "new-name".to_string())]);
    }

    #[tokio::test]
    async fn cancel_disconnects_everyone() {
        let (hub, cancel) = spawn_hub("srv");
        let (client, _rx) = Client::new("c1".into(), "phone".into());
        let client = Arc::new(client);
        hub.register(Arc::clone(&client)).await;
        settle().await;

        cancel.cancel();
        settle().await;
        assert!(!client.is_connected());
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn queue_capacity_matches_protocol_constant() {
        let (client, _rx) = Client::new("c1".into(), "x".into());
        let mut sent = 0;
        while client.enqueue(WireMessage::ping()) {
            sent += 1;
        }
        assert_eq!(sent, SEND_QUEUE_CAPACITY);
    }
}
