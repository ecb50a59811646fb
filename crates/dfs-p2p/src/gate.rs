//! One-shot rendezvous between a connection's decode loop and the consumer
//! that drains the raw stream following a control message.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

/// Create a gate for one decoded message.
///
/// `draining` is raised immediately and lowered when the release half is
/// either fired or dropped.
pub fn channel(peer: impl Into<String>, draining: Arc<AtomicBool>) -> (StreamRelease, Drained) {
    let (tx, rx) = oneshot::channel();
    draining.store(true, Ordering::SeqCst);
    (
        StreamRelease {
            peer: peer.into(),
            tx: Some(tx),
            draining,
        },
        Drained { rx },
    )
}

/// Held by the consumer. Call [`release`](Self::release) once exactly the
/// announced number of bytes has been read from the peer.
///
/// Dropping it without releasing tells the decode loop that the stream was
/// not drained, which leaves the connection misaligned; the loop then closes
/// the connection.
pub struct StreamRelease {
    peer: String,
    tx: Option<oneshot::Sender<()>>,
    draining: Arc<AtomicBool>,
}

impl StreamRelease {
    /// Identity of the connection this gate belongs to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn release(mut self) {
        if let Some(tx) = self.tx.take() {
            // Lowered before waking the decode loop, which may raise it again
            // for its next frame straight away.
            self.draining.store(false, Ordering::SeqCst);
            let _ = tx.send(());
        }
    }
}

impl Drop for StreamRelease {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.draining.store(false, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for StreamRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRelease")
            .field("peer", &self.peer)
            .field("released", &self.tx.is_none())
            .finish()
    }
}

/// Held by the decode loop while the consumer drains the stream.
#[derive(Debug)]
pub struct Drained {
    rx: oneshot::Receiver<()>,
}

impl Drained {
    /// Wait for the consumer. Returns `false` if the release half was dropped
    /// without being fired.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_resumes_waiter() {
        let flag = Arc::new(AtomicBool::new(false));
        let (release, drained) = channel("p", Arc::clone(&flag));
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(release.peer(), "p");

        let waiter = tokio::spawn(drained.wait());
        release.release();
        assert!(waiter.await.unwrap());
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropped_release_reports_abandoned() {
        let flag = Arc::new(AtomicBool::new(false));
        let (release, drained) = channel("p", Arc::clone(&flag));
        drop(release);
        assert!(!drained.wait().await);
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn waiter_blocks_until_released() {
        let flag = Arc::new(AtomicBool::new(false));
        let (release, drained) = channel("p", flag);
        let mut waiter = tokio::spawn(drained.wait());

        let early = tokio::time::timeout(std::time::Duration::from_millis(50), &mut waiter).await;
        assert!(early.is_err(), "waiter finished before release");

        release.release();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_does_not_clear_the_next_gate() {
        let flag = Arc::new(AtomicBool::new(false));
        for _ in 0..200 {
            let (release, drained) = channel("p", Arc::clone(&flag));
            let next_flag = Arc::clone(&flag);
            let waiter = tokio::spawn(async move {
                assert!(drained.wait().await);
                channel("p", next_flag)
            });
            release.release();

            let (next, _next_drained) = waiter.await.unwrap();
            assert!(flag.load(Ordering::SeqCst), "flag lowered while the next stream is undrained");
            drop(next);
            assert!(!flag.load(Ordering::SeqCst));
        }
    }
}
