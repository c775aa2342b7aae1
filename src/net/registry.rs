//! Registry of live relay sessions.
//!
//! Every spawned session holds a [`SessionTicket`]. The registry counts the
//! tickets, hands out sequential ids, and broadcasts the closing flag that
//! tells idle sessions to stop. Shutdown waits on [`SessionRegistry::drained`],
//! which wakes as soon as the last ticket is dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};

/// Identifier of one client session, rendered as `conn-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl From<u64> for SessionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct Shared {
    live: AtomicUsize,
    opened: AtomicU64,
    idle: Notify,
    closing: watch::Sender<bool>,
}

/// Live session bookkeeping shared by the accept loop and its sessions.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    shared: Arc<Shared>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                live: AtomicUsize::new(0),
                opened: AtomicU64::new(0),
                idle: Notify::new(),
                closing,
            }),
        }
    }

    /// Register a session for `peer`.
    pub fn open(&self, peer: SocketAddr) -> SessionTicket {
        let id = SessionId(self.shared.opened.fetch_add(1, Ordering::Relaxed) + 1);
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        SessionTicket {
            shared: Arc::clone(&self.shared),
            id,
            peer,
            opened_at: Instant::now(),
        }
    }

    /// Sessions currently holding a ticket.
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Sessions registered since startup.
    pub fn opened(&self) -> u64 {
        self.shared.opened.load(Ordering::Relaxed)
    }

    /// Ask every session to stop once it is idle.
    pub fn begin_close(&self) {
        self.shared.closing.send_replace(true);
    }

    /// Wait for the last ticket to drop, at most `limit`.
    ///
    /// Returns `true` if the registry emptied in time.
    pub async fn drained(&self, limit: Duration) -> bool {
        let emptied = async {
            loop {
                let notified = self.shared.idle.notified();
                if self.live() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, emptied).await.is_ok()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of registration, dropped when the session task ends.
#[derive(Debug)]
pub struct SessionTicket {
    shared: Arc<Shared>,
    id: SessionId,
    peer: SocketAddr,
    opened_at: Instant,
}

impl SessionTicket {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Flag that flips to `true` when the relay starts shutting down.
    pub fn closing(&self) -> watch::Receiver<bool> {
        self.shared.closing.subscribe()
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        if self.shared.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.idle.notify_waiters();
        }
        tracing::trace!(
            connection_id = %self.id,
            peer_addr = %self.peer,
            lifetime_ms = self.opened_at.elapsed().as_millis() as u64,
            "Session released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn tickets_are_numbered_and_counted() {
        let registry = SessionRegistry::new();
        let a = registry.open(peer(1000));
        let b = registry.open(peer(1001));

        assert_eq!(a.id().to_string(), "conn-1");
        assert_eq!(b.id().to_string(), "conn-2");
        assert_eq!(b.peer(), peer(1001));
        assert_eq!(registry.live(), 2);

        drop(a);
        assert_eq!(registry.live(), 1);
        drop(b);
        assert_eq!(registry.live(), 0);
        assert_eq!(registry.opened(), 2);
    }

    #[tokio::test]
    async fn closing_flag_reaches_open_tickets() {
        let registry = SessionRegistry::new();
        let ticket = registry.open(peer(1000));
        let mut closing = ticket.closing();
        assert!(!*closing.borrow());

        registry.begin_close();
        closing.changed().await.unwrap();
        assert!(*closing.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn drained_wakes_when_last_ticket_drops() {
        let registry = SessionRegistry::new();
        let ticket = registry.open(peer(1000));

        assert!(!registry.drained(Duration::from_millis(200)).await);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.drained(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        drop(ticket);
        assert!(waiter.await.unwrap());
    }
}
