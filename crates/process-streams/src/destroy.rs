//! One-shot channel carrying the forced-termination action of a process

use async_channel::{Receiver, Sender};
use std::fmt;
use tracing::debug;

use crate::error::Result;

/// The deferred kill bound to one process instance
pub(crate) type DestroyAction = Box<dyn FnOnce() -> Result<()> + Send>;

/// Single-slot broadcast of a process's destroy action
///
/// Any clone can fire it; only the first firing runs the action. Once the
/// process has been released the channel is closed for good and firing
/// becomes a no-op.
#[derive(Clone)]
pub struct DestroyChannel {
    tx: Sender<DestroyAction>,
    rx: Receiver<DestroyAction>,
}

impl DestroyChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self { tx, rx }
    }

    /// Install the destroy action; returns false if the channel is closed or
    /// already armed
    pub(crate) fn arm(&self, action: DestroyAction) -> bool {
        self.tx.try_send(action).is_ok()
    }

    /// Destroy the process, waiting for it to be spawned if necessary
    ///
    /// Returns `Ok(true)` if this call ran the destroy action and `Ok(false)`
    /// if the channel was closed first (the process already exited, was
    /// destroyed by another holder, or never launched).
    pub async fn destroy(&self) -> Result<bool> {
        match self.rx.recv().await {
            Ok(action) => self.fire(action),
            Err(_) => {
                debug!("destroy channel closed, nothing to destroy");
                Ok(false)
            }
        }
    }

    /// Destroy the process only if it is running right now
    ///
    /// Unlike [`destroy`](Self::destroy) this never waits for the process to
    /// be spawned.
    pub fn try_destroy(&self) -> Result<bool> {
        match self.rx.try_recv() {
            Ok(action) => self.fire(action),
            Err(_) => Ok(false),
        }
    }

    fn fire(&self, action: DestroyAction) -> Result<bool> {
        self.close();
        action()?;
        Ok(true)
    }

    /// Returns true once the channel can no longer deliver an action
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the channel and discard any action still waiting in it
    pub(crate) fn close(&self) {
        self.tx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl fmt::Debug for DestroyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestroyChannel")
            .field("armed", &!self.rx.is_empty())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_action(counter: &Arc<AtomicUsize>) -> DestroyAction {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[smol_potat::test]
    async fn test_action_runs_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let channel = DestroyChannel::new();
        assert!(channel.arm(counting_action(&fired)));
        assert!(!channel.arm(counting_action(&fired)));

        let other = channel.clone();
        assert!(channel.destroy().await.unwrap());
        assert!(!other.destroy().await.unwrap());
        assert!(!channel.try_destroy().unwrap());

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(channel.is_closed());
    }

    #[smol_potat::test]
    async fn test_close_discards_pending_action() {
        let fired = Arc::new(AtomicUsize::new(0));
        let channel = DestroyChannel::new();
        channel.arm(counting_action(&fired));
        channel.close();

        assert!(!channel.destroy().await.unwrap());
        assert!(!channel.arm(counting_action(&fired)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[smol_potat::test]
    async fn test_destroy_waits_for_arming() {
        let fired = Arc::new(AtomicUsize::new(0));
        let channel = DestroyChannel::new();

        let pending = {
            let channel = channel.clone();
            smol::spawn(async move { channel.destroy().await })
        };

        smol::Timer::after(std::time::Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        channel.arm(counting_action(&fired));

        assert!(pending.await.unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_destroy_before_arming_is_noop() {
        let channel = DestroyChannel::new();
        assert!(!channel.try_destroy().unwrap());
        assert!(!channel.is_closed());
    }
}
