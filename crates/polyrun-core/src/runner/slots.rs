//! Run slots: at most one running execution per logical slot (editor tab).

use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;

use super::handle::{ExecutionHandle, ExecutionStatus, KillHandle, RunControl};
use super::process::{ExecutionRequest, ProcessRunner};

#[derive(Debug, Default)]
struct Slot {
    /// Held while a run is being started, so starts in one slot queue up.
    turn: tokio::sync::Mutex<()>,
    /// Kill handle of the latest run, registered before its build begins.
    current: Mutex<Option<KillHandle>>,
}

impl Slot {
    fn take(&self) -> Option<KillHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn is_running(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|kill| kill.status().is_running())
    }
}

/// Serializes runs per slot.
///
/// Starting a run on a busy slot cancels the previous run and waits for it
/// to end before the new one is spawned. A run can be cancelled at any
/// point, including while it is still building.
#[derive(Debug)]
pub struct RunSlots {
    runner: Arc<ProcessRunner>,
    slots: Mutex<FxHashMap<String, Arc<Slot>>>,
}

impl RunSlots {
    pub fn new(runner: Arc<ProcessRunner>) -> Self {
        Self {
            runner,
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Number of slots currently tracked.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, name: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(name.to_string()).or_default().clone()
    }

    fn get(&self, name: &str) -> Option<Arc<Slot>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(name).cloned()
    }

    /// Drop slots nobody is using and that have nothing running.
    fn prune(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| Arc::strong_count(slot) > 1 || slot.is_running());
    }

    /// Start `request` in `slot`, replacing whatever ran there.
    ///
    /// Never fails: errors before spawn give a handle in
    /// [`ExecutionStatus::Failed`].
    pub async fn run(&self, name: &str, request: ExecutionRequest) -> ExecutionHandle {
        let slot = self.slot(name);

        // Signal first so a run stuck in its build gives up the turn
        let pending = slot.take();
        if let Some(previous) = &pending {
            previous.cancel();
        }
        let turn = slot.turn.lock().await;
        for previous in pending.into_iter().chain(slot.take()) {
            let status = previous.cancel_and_wait().await;
            tracing::debug!("Slot {}: previous run ended {:?}", name, status);
        }

        let (control, kill) = RunControl::new();
        *slot.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(kill.clone());
        let handle = self.runner.start_controlled(request, control, kill).await;
        if !handle.is_running() {
            let mut current = slot.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current
                .as_ref()
                .is_some_and(|kill| kill.same_run(&handle.kill_handle()))
            {
                *current = None;
            }
        }
        drop(turn);
        drop(slot);
        self.prune();
        handle
    }

    /// Cancel the run in `slot`, returning its final status.
    ///
    /// Returns `None` if nothing was registered there.
    pub async fn cancel(&self, name: &str) -> Option<ExecutionStatus> {
        let previous = self.get(name)?.take();
        let status = match previous {
            Some(previous) => Some(previous.cancel_and_wait().await),
            None => None,
        };
        self.prune();
        status
    }

    /// Cancel whatever runs in `slot` and stop tracking it.
    pub async fn remove(&self, name: &str) -> Option<ExecutionStatus> {
        let status = self.cancel(name).await;
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(name)
            .is_some_and(|slot| Arc::strong_count(slot) == 1 && !slot.is_running())
        {
            slots.remove(name);
        }
        status
    }

    /// Whether `slot` currently has a running execution.
    pub async fn is_running(&self, name: &str) -> bool {
        self.get(name).is_some_and(|slot| slot.is_running())
    }

    /// Cancel every slot.
    pub async fn cancel_all(&self) {
        let slots: Vec<(String, Arc<Slot>)> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (name, slot) in slots {
            if let Some(previous) = slot.take() {
                let status = previous.cancel_and_wait().await;
                tracing::debug!("Slot {}: cancelled ({:?})", name, status);
            }
        }
        self.prune();
    }
}
