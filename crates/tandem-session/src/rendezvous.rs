//! Discovery rendezvous between the UDP receiver and the TCP acceptor.
//!
//! A client announces its UDP source address with a discovery datagram
//! and then opens its TCP connection. The UDP worker pushes each source
//! onto a FIFO; the accept worker pops the oldest one for each new
//! stream. Pairing is purely by arrival order, so two clients whose
//! datagrams and connects interleave can be crossed.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// FIFO of UDP source addresses waiting to be paired with a TCP stream.
#[derive(Debug, Default)]
pub struct DiscoveryQueue {
    pending: Mutex<VecDeque<SocketAddr>>,
}

impl DiscoveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `addr`. A retransmitted discovery from an address that is
    /// already waiting is ignored; returns whether `addr` was added.
    pub fn push(&self, addr: SocketAddr) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains(&addr) {
            return false;
        }
        pending.push_back(addr);
        true
    }

    /// Dequeues the oldest waiting address.
    pub fn pop(&self) -> Option<SocketAddr> {
        self.pending.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Polls every `interval` until an address is available.
    ///
    /// With `timeout` set, gives up and returns `None` once it elapses.
    /// With `None`, waits indefinitely.
    pub async fn wait_pop(
        &self,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> Option<SocketAddr> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(addr) = self.pop() {
                return Some(addr);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_pop_is_fifo() {
        let queue = DiscoveryQueue::new();
        assert!(queue.push(addr(1)));
        assert!(queue.push(addr(2)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(addr(1)));
        assert_eq!(queue.pop(), Some(addr(2)));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_push_ignored() {
        let queue = DiscoveryQueue::new();
        assert!(queue.push(addr(1)));
        assert!(!queue.push(addr(1)));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_pop_sees_later_push() {
        let queue = Arc::new(DiscoveryQueue::new());
        let pusher = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                queue.push(addr(7));
            })
        };
        let got = queue
            .wait_pop(Duration::from_millis(5), Some(Duration::from_secs(2)))
            .await;
        assert_eq!(got, Some(addr(7)));
        pusher.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_pop_times_out() {
        let queue = DiscoveryQueue::new();
        let got = queue
            .wait_pop(Duration::from_millis(10), Some(Duration::from_millis(50)))
            .await;
        assert_eq!(got, None);
    }
}
