//! Foreground/background signal
//!
//! Hosts that can suspend the process (a backgrounded page, a sleeping
//! laptop) feed this channel; the manager reconnects when it flips back to
//! [`Visibility::Visible`] while the connection is down.

use tokio::sync::watch;

/// Host visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Create a signal starting out visible
pub fn visibility_channel() -> (VisibilityNotifier, VisibilityWatcher) {
    let (tx, rx) = watch::channel(Visibility::Visible);
    (VisibilityNotifier { tx }, VisibilityWatcher { rx })
}

/// Producer side, owned by the host
#[derive(Debug)]
pub struct VisibilityNotifier {
    tx: watch::Sender<Visibility>,
}

impl VisibilityNotifier {
    /// Publish a change; repeated values are not re-announced
    pub fn set(&self, visibility: Visibility) {
        self.tx.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
    }

    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }
}

/// Consumer side, handed to the manager
#[derive(Debug, Clone)]
pub struct VisibilityWatcher {
    rx: watch::Receiver<Visibility>,
}

impl VisibilityWatcher {
    /// Wait for the next change; `None` once the notifier is gone
    pub async fn changed(&mut self) -> Option<Visibility> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
