//! Notification dispatcher
//!
//! The only consumer of the notification queue. Each event becomes one frame
//! that is queued on every connection in the broadcast set; a peer that cannot
//! take it is dropped from the set without affecting the others.

use crate::client_manager::ClientManager;
use crate::notification::{Notification, NotificationReceiver};
use dungeon_shared::Frame;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct Dispatcher {
    receiver: NotificationReceiver,
    clients: Arc<RwLock<ClientManager>>,
}

impl Dispatcher {
    pub fn new(receiver: NotificationReceiver, clients: Arc<RwLock<ClientManager>>) -> Self {
        Self { receiver, clients }
    }

    /// Delivers events until a shutdown event arrives or every producer is gone
    pub async fn run(mut self) {
        info!("Dispatcher started");
        while let Some(notification) = self.receiver.dequeue().await {
            if !self.dispatch(&notification).await {
                info!("Dispatcher received shutdown at turn {}", notification.turn);
                return;
            }
        }
        info!("Dispatcher stopped: notification queue closed");
    }

    /// Broadcasts one event and releases its pending count
    ///
    /// Returns false for a shutdown event.
    pub async fn dispatch(&mut self, notification: &Notification) -> bool {
        let message = notification.to_message();
        if let Some(message) = &message {
            let delivered = self.broadcast(message.to_frame()).await;
            debug!(
                "Turn {} {} delivered to {} clients",
                notification.turn,
                message.command(),
                delivered
            );
        }

        if let Err(e) = self.receiver.release(notification) {
            error!("Pending count out of balance: {}", e);
        }
        message.is_some()
    }

    /// Queues `frame` on every member and returns how many accepted it
    pub async fn broadcast(&self, frame: Frame) -> usize {
        let connections = self.clients.read().await.connections();
        let mut delivered = 0;
        let mut failed = Vec::new();

        for connection in &connections {
            match connection.deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Dropping client {} ({}): {}",
                        connection.id(),
                        connection.peer(),
                        e
                    );
                    connection.drop_peer();
                    failed.push(connection.id());
                }
            }
        }

        if !failed.is_empty() {
            let mut clients = self.clients.write().await;
            for id in &failed {
                clients.remove_client(id);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{spawn_writer, Connection};
    use crate::notification::{notification_queue, NotificationKind};
    use crate::turn_clock::TurnClock;
    use dungeon_shared::FrameReader;
    use std::net::SocketAddr;
    use tokio::io::DuplexStream;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// A joined connection whose frames can be read back from the returned reader
    async fn live_client(
        clients: &Arc<RwLock<ClientManager>>,
        nick: &str,
    ) -> (Arc<Connection>, FrameReader<DuplexStream>) {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let mut manager = clients.write().await;
        let id = manager.allocate_id();
        let (connection, outbox) = Connection::new(id, peer(), server_side, 16);
        connection.bind_nick(nick);
        spawn_writer(id, outbox);
        manager.add_client(Arc::clone(&connection)).unwrap();
        (connection, FrameReader::new(client_side))
    }

    async fn failing_client(clients: &Arc<RwLock<ClientManager>>, nick: &str) -> Arc<Connection> {
        let mut manager = clients.write().await;
        let id = manager.allocate_id();
        let (connection, outbox) = Connection::new(id, peer(), tokio::io::sink(), 16);
        connection.bind_nick(nick);
        drop(outbox);
        manager.add_client(Arc::clone(&connection)).unwrap();
        connection
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let clock = Arc::new(TurnClock::new());
        let (tx, rx) = notification_queue(Arc::clone(&clock));
        let clients = Arc::new(RwLock::new(ClientManager::new(4)));
        let (_a, mut reader_a) = live_client(&clients, "a").await;
        let (_b, mut reader_b) = live_client(&clients, "b").await;
        let mut dispatcher = Dispatcher::new(rx, Arc::clone(&clients));

        tx.enqueue_at(42, NotificationKind::TurnStarted).unwrap();
        let notification = dispatcher.receiver.dequeue().await.unwrap();
        assert!(dispatcher.dispatch(&notification).await);

        let expected = Some(Frame::new("newturn", "42"));
        assert_eq!(reader_a.next_frame().await.unwrap(), expected);
        assert_eq!(reader_b.next_frame().await.unwrap(), expected);
        assert_eq!(clock.pending_for(42), 0);
    }

    #[tokio::test]
    async fn test_failed_peer_does_not_block_others() {
        let clock = Arc::new(TurnClock::new());
        let (tx, rx) = notification_queue(Arc::clone(&clock));
        let clients = Arc::new(RwLock::new(ClientManager::new(4)));
        let a = failing_client(&clients, "a").await;
        let (_b, mut reader_b) = live_client(&clients, "b").await;
        let mut dispatcher = Dispatcher::new(rx, Arc::clone(&clients));

        tx.enqueue_at(42, NotificationKind::TurnStarted).unwrap();
        let notification = dispatcher.receiver.dequeue().await.unwrap();
        dispatcher.dispatch(&notification).await;

        assert_eq!(
            reader_b.next_frame().await.unwrap(),
            Some(Frame::new("newturn", "42"))
        );
        assert!(a.is_dropped());
        assert!(clients.read().await.get(&a.id()).is_none());
        assert_eq!(clients.read().await.len(), 1);
        assert_eq!(clock.backlog(), 0);
    }

    #[tokio::test]
    async fn test_slow_peer_dropped_when_outbox_fills() {
        let clients = Arc::new(RwLock::new(ClientManager::new(4)));
        // No writer task: nothing ever drains this outbox.
        let (slow, _outbox) = {
            let mut manager = clients.write().await;
            let id = manager.allocate_id();
            let (connection, outbox) = Connection::new(id, peer(), tokio::io::sink(), 2);
            connection.bind_nick("slow");
            manager.add_client(Arc::clone(&connection)).unwrap();
            (connection, outbox)
        };
        let (_tx, rx) = notification_queue(Arc::new(TurnClock::new()));
        let dispatcher = Dispatcher::new(rx, Arc::clone(&clients));

        assert_eq!(dispatcher.broadcast(Frame::bare("a")).await, 1);
        assert_eq!(dispatcher.broadcast(Frame::bare("b")).await, 1);
        assert_eq!(dispatcher.broadcast(Frame::bare("c")).await, 0);
        assert!(slow.is_dropped());
        assert!(clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_delivers_in_order_until_shutdown() {
        let clock = Arc::new(TurnClock::new());
        let (tx, rx) = notification_queue(Arc::clone(&clock));
        let clients = Arc::new(RwLock::new(ClientManager::new(4)));
        let (_a, mut reader) = live_client(&clients, "a").await;

        tx.enqueue_at(1, NotificationKind::TurnStarted).unwrap();
        tx.enqueue_at(
            1,
            NotificationKind::ClearDestinations {
                entity: "Imp_1".to_string(),
            },
        )
        .unwrap();
        tx.enqueue_at(2, NotificationKind::TurnStarted).unwrap();
        tx.enqueue_at(2, NotificationKind::Shutdown).unwrap();
        tx.enqueue_at(3, NotificationKind::TurnStarted).unwrap();

        Dispatcher::new(rx, Arc::clone(&clients)).run().await;

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::new("newturn", "1"))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::new("animatedObjectClearDestinations", "Imp_1"))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::new("newturn", "2"))
        );
        assert_eq!(clock.pending_for(1), 0);
        assert_eq!(clock.pending_for(2), 0);
    }

    #[tokio::test]
    async fn test_no_clients_still_releases() {
        let clock = Arc::new(TurnClock::new());
        let (tx, rx) = notification_queue(Arc::clone(&clock));
        let clients = Arc::new(RwLock::new(ClientManager::new(4)));

        tx.enqueue_at(7, NotificationKind::TurnStarted).unwrap();
        drop(tx);
        Dispatcher::new(rx, clients).run().await;

        assert_eq!(clock.backlog(), 0);
    }
}
