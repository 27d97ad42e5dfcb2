//! Background task that keeps a tab's context converged with the shared
//! store. Two triggers feed it: change notifications from other tabs
//! (debounced) and a fixed-interval fallback for platforms where the
//! notification never arrives.

use std::{future, time::Duration};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info_span, Instrument};

use super::{context::SessionContext, store::StoreEvents};

pub const DEFAULT_FALLBACK_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub fallback_interval: Duration,
    pub debounce: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            fallback_interval: DEFAULT_FALLBACK_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Owns the running loop. Dropping it aborts the loop; [`shutdown`] stops it
/// and waits.
///
/// [`shutdown`]: ReconcilerHandle::shutdown
#[derive(Debug)]
pub struct ReconcilerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start reconciling `context`. Must be called inside a tokio runtime.
#[must_use]
pub fn spawn(context: SessionContext, events: StoreEvents, config: ReconcileConfig) -> ReconcilerHandle {
    let (stop, stopped) = oneshot::channel();
    let span = info_span!("reconcile", tab = %context.store().tab());
    let task = tokio::spawn(run(context, events, config, stopped).instrument(span));
    ReconcilerHandle {
        stop: Some(stop),
        task: Some(task),
    }
}

async fn run(
    context: SessionContext,
    events: StoreEvents,
    config: ReconcileConfig,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut events = Some(events);
    let mut fallback = time::interval(config.fallback_interval);
    fallback.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; hydration already covered it.
    fallback.tick().await;

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            event = next_event(&mut events) => {
                if event.is_none() {
                    debug!("Storage notifications closed, relying on fallback");
                    events = None;
                    continue;
                }
                tokio::select! {
                    _ = &mut stopped => break,
                    () = time::sleep(config.debounce) => {}
                }
                let coalesced = events.as_mut().map_or(0, StoreEvents::drain);
                debug!(coalesced, "Storage changed in another tab");
                context.reconcile();
                fallback.reset();
            }
            _ = fallback.tick() => {
                context.reconcile();
            }
        }
    }
    debug!("Reconciler stopped");
}

async fn next_event(events: &mut Option<StoreEvents>) -> Option<super::store::StorageEvent> {
    match events {
        Some(events) => events.recv().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        session::{
            origin::OriginKind,
            store::{OriginStorage, TabId},
        },
        token::{sign, Claims, Role},
    };

    fn raw(role: Role) -> String {
        sign(&Claims::new(role, "s", 1), b"k").unwrap()
    }

    fn tab(storage: &OriginStorage) -> (SessionContext, StoreEvents) {
        let store = storage.store_for(TabId::new());
        let events = store.subscribe();
        (SessionContext::new(OriginKind::Console, store), events)
    }

    #[tokio::test(start_paused = true)]
    async fn notification_triggers_debounced_reconcile() {
        let storage = OriginStorage::in_memory();
        let (context, events) = tab(&storage);
        let handle = spawn(context.clone(), events, ReconcileConfig::default());
        tokio::task::yield_now().await;

        storage
            .store_for(TabId::new())
            .set(Role::Doctor, &raw(Role::Doctor))
            .unwrap();
        time::sleep(Duration::from_millis(50)).await;
        assert!(context.snapshot().is_empty(), "debounce not yet elapsed");

        time::sleep(Duration::from_millis(60)).await;
        assert!(context.snapshot().is_authenticated(Role::Doctor));
        assert_eq!(context.stats().reconciliations, 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_catches_silent_writes() {
        let storage = OriginStorage::in_memory();
        let store = storage.store_for(TabId::new());
        let context = SessionContext::new(OriginKind::Console, store.clone());
        // A receiver owned by the writer's tab never hears this write.
        let events = store.subscribe();
        let handle = spawn(context.clone(), events, ReconcileConfig::default());
        tokio::task::yield_now().await;

        store.set(Role::Admin, &raw(Role::Admin)).unwrap();
        time::sleep(Duration::from_millis(400)).await;
        assert!(context.snapshot().is_empty());

        time::sleep(Duration::from_millis(150)).await;
        assert!(context.snapshot().is_authenticated(Role::Admin));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let storage = OriginStorage::in_memory();
        let (context, events) = tab(&storage);
        let handle = spawn(context.clone(), events, ReconcileConfig::default());
        assert!(handle.is_running());
        handle.shutdown().await;

        let before = context.stats().reconciliations;
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(context.stats().reconciliations, before);
    }
}
