//! Optional concurrency-safe session-object pool (spec §5, §9 "Object pool /
//! worker reuse"). Not load-bearing for correctness — `rtsp::handle_connection`
//! runs identically whether its `PooledSession` came from a pool or a plain
//! `PooledSession::empty()`.
//!
//! The reference's `WorkerCache` (see `examples/original_source/service/utils.go`)
//! is a LIFO stack that is explicitly not thread-safe. This keeps the same
//! acquire/release shape behind a `Mutex`, satisfying spec §5's requirement
//! that a pool's Get/Put be externally synchronized.

use crate::transport::MediaSockets;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::net::TcpStream;

/// A reusable slot for per-connection state. `conn` and `media` are `None`
/// when the slot is idle in the pool.
pub struct PooledSession {
    pub id: i64,
    pub conn: Option<TcpStream>,
    pub client_addr: Option<SocketAddr>,
    pub media: Option<MediaSockets>,
}

impl PooledSession {
    pub fn empty() -> Self {
        PooledSession {
            id: -1,
            conn: None,
            client_addr: None,
            media: None,
        }
    }

    fn reset(&mut self, id: i64, conn: TcpStream, client_addr: SocketAddr) {
        self.id = id;
        self.conn = Some(conn);
        self.client_addr = Some(client_addr);
        self.media = None; // any previously held UDP sockets are dropped (closed) here
    }
}

/// Capacity-bounded pool of `PooledSession` slots, LIFO like the reference.
pub struct SessionPool {
    slots: Mutex<Vec<PooledSession>>,
    capacity: usize,
}

impl SessionPool {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| PooledSession::empty()).collect();
        SessionPool {
            slots: Mutex::new(slots),
            capacity,
        }
    }

    /// Acquire a slot, freshly reset for the given connection. Allocates a
    /// new slot if the pool is currently empty.
    pub fn get(&self, id: i64, conn: TcpStream, client_addr: SocketAddr) -> PooledSession {
        let mut slot = {
            let mut slots = self.slots.lock().unwrap();
            slots.pop().unwrap_or_else(PooledSession::empty)
        };
        slot.reset(id, conn, client_addr);
        slot
    }

    /// Release a slot back to the pool. A no-op that drops `slot` if the
    /// pool is already at capacity (P6).
    pub fn put(&self, mut slot: PooledSession) {
        let mut slots = self.slots.lock().unwrap();
        if slots.len() >= self.capacity {
            return;
        }
        slot.conn = None;
        slot.media = None;
        slots.push(slot);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn dummy_conn() -> (TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_result, connect_result) = tokio::join!(listener.accept(), connect);
        let (_accepted, peer) = accept_result.unwrap();
        (connect_result.unwrap(), peer)
    }

    #[tokio::test]
    async fn get_resets_slot_fields() {
        let pool = SessionPool::new(2);
        let (conn, addr) = dummy_conn().await;
        let slot = pool.get(7, conn, addr);
        assert_eq!(slot.id, 7);
        assert!(slot.conn.is_some());
        assert!(slot.media.is_none());
        assert_eq!(pool.len(), 1);
    }

    // P6: Put never grows the pool past its configured capacity.
    #[tokio::test]
    async fn put_beyond_capacity_is_a_no_op() {
        let pool = SessionPool::new(1);
        let (conn_a, addr_a) = dummy_conn().await;
        let (conn_b, addr_b) = dummy_conn().await;

        let slot_a = pool.get(1, conn_a, addr_a);
        let slot_b = pool.get(2, conn_b, addr_b);
        assert_eq!(pool.len(), 0);

        pool.put(slot_a);
        assert_eq!(pool.len(), 1);

        pool.put(slot_b);
        assert_eq!(pool.len(), 1, "pool must not exceed its configured capacity");
    }

    #[tokio::test]
    async fn put_clears_connection_and_media_before_storing() {
        let pool = SessionPool::new(1);
        let (conn, addr) = dummy_conn().await;
        let slot = pool.get(1, conn, addr);
        pool.put(slot);

        let (conn2, addr2) = dummy_conn().await;
        let reused = pool.get(2, conn2, addr2);
        assert_eq!(reused.id, 2);
        assert!(reused.media.is_none());
    }
}
