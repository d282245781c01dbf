use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// A one-shot timer that posts `event` back into the event loop.
///
/// Dropping the timer aborts it. Aborting a timer that already fired, or
/// cancelling twice, does nothing.
#[derive(Debug)]
pub struct Timer {
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn after<E>(delay: Duration, sender: mpsc::UnboundedSender<E>, event: E) -> Self
    where
        E: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if sender.send(event).is_err() {
                debug!("Timer fired after its receiver was closed");
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Fire on the next scheduler tick, once the current event has been
    /// fully handled.
    pub fn idle<E>(sender: mpsc::UnboundedSender<E>, event: E) -> Self
    where
        E: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            if sender.send(event).is_err() {
                debug!("Idle callback fired after its receiver was closed");
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}
