//! process-scoped singletons with reference counted teardown.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct Slot<T> {
    value: Option<Arc<T>>,
    holders: usize,
}

/// a value built once on first acquire and torn down when the last holder releases it.
///
/// used for expensive fixtures such as a shared cluster that several
/// acceptance tests lean on.
pub struct Shared<T> {
    name: &'static str,
    slot: Mutex<Slot<T>>,
}

impl<T> Shared<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::const_new(Slot {
                value: None,
                holders: 0,
            }),
        }
    }

    /// hand out the value, building it with `init` if nobody holds it.
    ///
    /// concurrent callers wait for the one running `init`; a failed init
    /// leaves the slot empty for the next caller.
    pub async fn acquire<E, F, Fut>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        let value = match &slot.value {
            Some(value) => value.clone(),
            None => {
                debug!(name = self.name, "initialising shared value");
                let value = Arc::new(init().await?);
                slot.value = Some(value.clone());
                value
            }
        };
        slot.holders += 1;
        Ok(value)
    }

    /// drop one hold; the last release runs `teardown` on the value.
    pub async fn release<E, F, Fut>(&self, teardown: F) -> Result<(), E>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut slot = self.slot.lock().await;
        slot.holders = slot.holders.saturating_sub(1);
        if slot.holders > 0 {
            return Ok(());
        }
        match slot.value.take() {
            Some(value) => {
                debug!(name = self.name, "tearing down shared value");
                teardown(value).await
            }
            None => Ok(()),
        }
    }

    pub async fn holders(&self) -> usize {
        self.slot.lock().await.holders
    }
}
