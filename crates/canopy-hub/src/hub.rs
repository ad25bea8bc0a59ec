use canopy_core::wire::HubMessage;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Outbound queue depth per connected client.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

const EVENT_QUEUE_CAPACITY: usize = 256;

/// Everything the control loop reacts to. All membership state lives inside
/// the loop; producers only ever send events.
enum HubEvent {
    Register(HubClient),
    Unregister(u64),
    Subscribe { conn_id: u64, topics: Vec<String> },
    Broadcast(HubMessage),
}

struct HubClient {
    conn_id: u64,
    sender: mpsc::Sender<HubMessage>,
    /// Advisory only; broadcasts are delivered regardless of topics.
    topics: Vec<String>,
}

/// Handle onto the hub's control loop. Cheap to clone; every clone feeds the
/// same loop.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    conn_counter: Arc<AtomicU64>,
}

impl HubHandle {
    /// Spawns the control loop and returns its handle.
    pub fn spawn() -> Self {
        let (events, inbox) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        tokio::spawn(control_loop(inbox));
        Self {
            events,
            conn_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Adds a client and returns its connection id. `sender` is the client's
    /// bounded outbound queue; the hub drops messages for this client when
    /// it fills up.
    pub async fn register(&self, sender: mpsc::Sender<HubMessage>) -> u64 {
        let conn_id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self
            .events
            .send(HubEvent::Register(HubClient {
                conn_id,
                sender,
                topics: Vec::new(),
            }))
            .await;
        conn_id
    }

    /// Removes a client and closes its outbound queue. Unknown ids are a
    /// no-op.
    pub async fn unregister(&self, conn_id: u64) {
        let _ = self.events.send(HubEvent::Unregister(conn_id)).await;
    }

    /// Records the topics a client asked for.
    pub async fn subscribe(&self, conn_id: u64, topics: Vec<String>) {
        let _ = self
            .events
            .send(HubEvent::Subscribe { conn_id, topics })
            .await;
    }

    /// Fans a message out to every connected client, dropping it for clients
    /// whose queue is full. Never blocks on a slow subscriber.
    pub async fn broadcast(&self, message: HubMessage) {
        let _ = self.events.send(HubEvent::Broadcast(message)).await;
    }
}

async fn control_loop(mut inbox: mpsc::Receiver<HubEvent>) {
    let mut clients: HashMap<u64, HubClient> = HashMap::new();

    while let Some(event) = inbox.recv().await {
        match event {
            HubEvent::Register(client) => {
                info!(event = "client_connected", conn_id = client.conn_id, total = clients.len() + 1);
                clients.insert(client.conn_id, client);
            }
            HubEvent::Unregister(conn_id) => {
                // Dropping the entry drops the only sender for the client's
                // queue; its writer task observes the close and exits.
                if clients.remove(&conn_id).is_some() {
                    info!(event = "client_disconnected", conn_id, total = clients.len());
                }
            }
            HubEvent::Subscribe { conn_id, topics } => {
                if let Some(client) = clients.get_mut(&conn_id) {
                    debug!(event = "client_subscribed", conn_id, topics = ?topics);
                    client.topics = topics;
                }
            }
            HubEvent::Broadcast(message) => {
                for client in clients.values() {
                    match client.sender.try_send(message.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // Dropped for this client only; the others still
                            // get their copy.
                            warn!(event = "client_queue_full", conn_id = client.conn_id);
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!(event = "client_queue_closed", conn_id = client.conn_id);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn recv(rx: &mut mpsc::Receiver<HubMessage>) -> HubMessage {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("message within a second")
            .expect("queue still open")
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_client() {
        let hub = HubHandle::spawn();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        hub.register(tx_a).await;
        hub.register(tx_b).await;

        hub.broadcast(HubMessage::AgentsUpdated(Vec::new())).await;

        assert!(matches!(recv(&mut rx_a).await, HubMessage::AgentsUpdated(_)));
        assert!(matches!(recv(&mut rx_b).await, HubMessage::AgentsUpdated(_)));
    }

    #[tokio::test]
    async fn full_queue_drops_the_message_for_that_client_only() {
        let hub = HubHandle::spawn();
        let (tx_a, mut rx_a) = mpsc::channel(1);
        let (tx_b, mut rx_b) = mpsc::channel(1);
        let (tx_c, mut rx_c) = mpsc::channel(1);
        // The third client is stuck: its queue is already full.
        tx_c.try_send(HubMessage::Ping).expect("prefill");

        hub.register(tx_a).await;
        hub.register(tx_b).await;
        hub.register(tx_c).await;

        hub.broadcast(HubMessage::WorkspacesUpdated(Vec::new())).await;

        assert!(matches!(
            recv(&mut rx_a).await,
            HubMessage::WorkspacesUpdated(_)
        ));
        assert!(matches!(
            recv(&mut rx_b).await,
            HubMessage::WorkspacesUpdated(_)
        ));

        // The stuck client still only holds its prefilled message.
        assert!(matches!(rx_c.try_recv(), Ok(HubMessage::Ping)));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn messages_arrive_in_broadcast_order_per_client() {
        let hub = HubHandle::spawn();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register(tx).await;

        hub.broadcast(HubMessage::WorkspacesUpdated(Vec::new())).await;
        hub.broadcast(HubMessage::AgentsUpdated(Vec::new())).await;

        assert!(matches!(recv(&mut rx).await, HubMessage::WorkspacesUpdated(_)));
        assert!(matches!(recv(&mut rx).await, HubMessage::AgentsUpdated(_)));
    }

    #[tokio::test]
    async fn unregister_closes_the_outbound_queue() {
        let hub = HubHandle::spawn();
        let (tx, mut rx) = mpsc::channel(4);
        let conn_id = hub.register(tx).await;

        hub.unregister(conn_id).await;
        let closed = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("close within a second");
        assert!(closed.is_none());

        // Unregistering an absent client is a no-op.
        hub.unregister(conn_id).await;
        hub.broadcast(HubMessage::Ping).await;
    }

    #[tokio::test]
    async fn subscribed_clients_still_receive_every_broadcast() {
        let hub = HubHandle::spawn();
        let (tx, mut rx) = mpsc::channel(4);
        let conn_id = hub.register(tx).await;
        hub.subscribe(conn_id, vec!["workspaces".to_string()]).await;

        // Topic-agnostic delivery: an agents update arrives regardless.
        hub.broadcast(HubMessage::AgentsUpdated(Vec::new())).await;
        assert!(matches!(recv(&mut rx).await, HubMessage::AgentsUpdated(_)));

        // Subscribing an unknown client must not disturb the loop.
        hub.subscribe(9999, vec!["agents".to_string()]).await;
        hub.broadcast(HubMessage::Ping).await;
        assert!(matches!(recv(&mut rx).await, HubMessage::Ping));
    }
}
