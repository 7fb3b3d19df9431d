use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use crate::error::Result;
use super::protocol::ServerEvent;

type RoomMembers = HashMap<String, mpsc::UnboundedSender<Message>>;

/// Tracks which websocket connections are watching which exam room.
///
/// Rooms are keyed by the exam's room id. A room springs into existence on
/// the first join and disappears when its last member leaves; countdown
/// tickers are managed elsewhere and do not depend on room membership.
pub struct RoomManager {
    connections: Arc<RwLock<HashMap<String, String>>>,
    rooms: Arc<RwLock<HashMap<String, RoomMembers>>>,
}

impl RoomManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Register a connection in a room.
    ///
    /// A connection sits in at most one room. Joining again with the same
    /// connection id replaces the stored sender; joining a different room
    /// moves the connection there.
    pub async fn join_room(&self, room_id: &str, conn_id: &str, sender: mpsc::UnboundedSender<Message>) {
        let previous = {
            let mut connections = self.connections.write().await;
            connections.insert(conn_id.to_string(), room_id.to_string())
        };

        let mut rooms = self.rooms.write().await;
        if let Some(previous_room) = previous {
            if previous_room != room_id {
                Self::detach(&mut rooms, &previous_room, conn_id);
                tracing::info!(
                    conn_id = %conn_id,
                    from_room = %previous_room,
                    to_room = %room_id,
                    "Connection moved between exam rooms"
                );
            }
        }

        rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id.to_string(), sender);

        tracing::info!(conn_id = %conn_id, room_id = %room_id, "Connection joined exam room");
    }

    /// Remove a connection from whatever room it is in.
    /// Returns the room id if the connection was registered.
    pub async fn remove_connection(&self, conn_id: &str) -> Option<String> {
        let room_id = self.connections.write().await.remove(conn_id)?;

        let mut rooms = self.rooms.write().await;
        Self::detach(&mut rooms, &room_id, conn_id);

        tracing::info!(conn_id = %conn_id, room_id = %room_id, "Connection left exam room");
        Some(room_id)
    }

    /// Send an event to every member of a room.
    /// Returns the number of members the event was delivered to.
    pub async fn broadcast(&self, room_id: &str, event: &ServerEvent) -> Result<usize> {
        let payload = serde_json::to_string(event)?;

        let mut delivered = 0usize;
        let mut closed = Vec::new();
        {
            let rooms = self.rooms.read().await;
            let members = match rooms.get(room_id) {
                Some(members) => members,
                None => return Ok(0),
            };

            for (conn_id, sender) in members {
                if sender.send(Message::text(payload.clone())).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(conn_id.clone());
                }
            }
        }

        for conn_id in closed {
            tracing::debug!(
                conn_id = %conn_id,
                room_id = %room_id,
                "Dropping closed connection from exam room"
            );
            self.remove_connection(&conn_id).await;
        }

        Ok(delivered)
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|members| members.len()).unwrap_or(0)
    }

    fn detach(rooms: &mut HashMap<String, RoomMembers>, room_id: &str, conn_id: &str) {
        if let Some(members) = rooms.get_mut(room_id) {
            members.remove(conn_id);
            if members.is_empty() {
                rooms.remove(room_id);
                tracing::info!(room_id = %room_id, "Exam room emptied");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_room_registers_member() {
        let rooms = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        rooms.join_room("room_1", "conn_a", tx).await;

        assert_eq!(rooms.member_count("room_1").await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members() {
        let rooms = RoomManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        rooms.join_room("room_1", "conn_a", tx1).await;
        rooms.join_room("room_1", "conn_b", tx2).await;

        let delivered = rooms
            .broadcast("room_1", &ServerEvent::TimeUpdate { remaining_time: 5 })
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        let expected = r#"{"type":"time-update","remainingTime":5}"#;
        assert_eq!(rx1.recv().await.unwrap().to_str().unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap().to_str().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_room_is_noop() {
        let rooms = RoomManager::new();

        let delivered = rooms
            .broadcast("no_such_room", &ServerEvent::ExamExpired)
            .await
            .unwrap();

        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_remove_connection_drops_empty_room() {
        let rooms = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        rooms.join_room("room_1", "conn_a", tx).await;
        let removed = rooms.remove_connection("conn_a").await;

        assert_eq!(removed, Some("room_1".to_string()));
        assert_eq!(rooms.member_count("room_1").await, 0);

        // Second removal is a no-op.
        assert_eq!(rooms.remove_connection("conn_a").await, None);
    }

    #[tokio::test]
    async fn test_rejoin_moves_connection_between_rooms() {
        let rooms = RoomManager::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        rooms.join_room("room_1", "conn_a", tx1).await;
        rooms.join_room("room_2", "conn_a", tx2).await;

        assert_eq!(rooms.member_count("room_1").await, 0);
        assert_eq!(rooms.member_count("room_2").await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_prunes_closed_connections() {
        let rooms = RoomManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        rooms.join_room("room_1", "conn_live", tx1).await;
        rooms.join_room("room_1", "conn_dead", tx2).await;
        drop(rx2);

        let delivered = rooms
            .broadcast("room_1", &ServerEvent::TimeUpdate { remaining_time: 9 })
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(rx1.recv().await.is_some());
        assert_eq!(rooms.member_count("room_1").await, 1);
    }
}
