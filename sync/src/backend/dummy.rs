//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to any GPU. Queues keep a list of submitted
//! instructions and "execute" them on the host, which lets tests play the role
//! of the GPU: they decide when a signal lands, can stall a queue on a wait,
//! and can count how many host waits actually blocked.
//!
//! Queues run in one of two [`ExecutionMode`]s:
//!
//! - [`ExecutionMode::Immediate`]: instructions execute as soon as they are
//!   submitted, like a GPU that is never behind. A queue stalled on a wait
//!   resumes by itself once another queue signals the awaited marker.
//! - [`ExecutionMode::Deferred`]: instructions only execute when someone calls
//!   [`DummyQueue::execute_next`] or [`DummyQueue::execute_until_stalled`],
//!   typically a consumer thread spawned by the test.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};

use super::{CommandQueue, CompletionEvent, Device, GpuBackend, TimelineMarker};

/// Dummy GPU backend.
#[derive(Debug)]
pub enum DummyBackend {}

impl GpuBackend for DummyBackend {
    type Queue = DummyQueue;
    type Device = DummyDevice;
    type Marker = DummyMarker;
    type Event = DummyEvent;

    fn name() -> &'static str {
        "Dummy"
    }
}

/// When a dummy queue executes the instructions submitted to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// Execute on submission.
    #[default]
    Immediate,
    /// Execute only when driven explicitly.
    Deferred,
}

/// Identifier of a dummy marker, used in recorded queue instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(u64);

impl MarkerId {
    /// Get the raw identifier.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// An instruction recorded on a dummy queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    /// Opaque unit of work, e.g. a command list.
    Work(String),
    /// Set `marker` to `value`.
    Signal {
        /// Target marker.
        marker: MarkerId,
        /// Value written.
        value: u64,
    },
    /// Stall the queue until `marker` reaches `value`.
    Wait {
        /// Awaited marker.
        marker: MarkerId,
        /// Awaited value.
        value: u64,
    },
}

/// Result of executing one queue step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The front instruction was executed.
    Executed(QueueCommand),
    /// The front instruction is a wait whose value hasn't been reached.
    Stalled {
        /// Awaited marker.
        marker: MarkerId,
        /// Awaited value.
        value: u64,
    },
    /// Nothing left to execute.
    Idle,
}

/// Resource counters kept by a [`DummyDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Markers created.
    pub markers_created: u64,
    /// Markers dropped.
    pub markers_destroyed: u64,
    /// Completion events created.
    pub events_created: u64,
    /// Completion events dropped.
    pub events_destroyed: u64,
    /// Event waits that had to block the calling thread.
    pub blocking_waits: u64,
}

impl DummyStats {
    /// Markers currently alive.
    pub fn live_markers(&self) -> u64 {
        self.markers_created - self.markers_destroyed
    }

    /// Events currently alive.
    pub fn live_events(&self) -> u64 {
        self.events_created - self.events_destroyed
    }
}

#[derive(Debug, Default)]
struct DeviceShared {
    next_marker_id: AtomicU64,
    stats: Mutex<DummyStats>,
    fail_marker_creation: AtomicBool,
    fail_event_creation: AtomicBool,
    removed: AtomicBool,
}

impl DeviceShared {
    fn check_alive(&self) -> SyncResult<()> {
        if self.removed.load(Ordering::Acquire) {
            Err(SyncError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

/// Dummy device.
///
/// Cloning yields another handle to the same device.
#[derive(Debug, Clone, Default)]
pub struct DummyDevice {
    shared: Arc<DeviceShared>,
}

impl DummyDevice {
    /// Create a new dummy device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue on this device.
    pub fn create_queue(&self, mode: ExecutionMode) -> Arc<DummyQueue> {
        log::trace!("DummyBackend: creating {:?} queue", mode);
        Arc::new_cyclic(|self_ref| DummyQueue {
            self_ref: self_ref.clone(),
            device: self.clone(),
            mode,
            state: Mutex::new(QueueState::default()),
            execution: Mutex::new(()),
        })
    }

    /// Snapshot of the resource counters.
    pub fn stats(&self) -> DummyStats {
        *self.shared.stats.lock()
    }

    /// Make subsequent marker creation fail.
    pub fn fail_marker_creation(&self, fail: bool) {
        self.shared
            .fail_marker_creation
            .store(fail, Ordering::Release);
    }

    /// Make subsequent event creation fail.
    pub fn fail_event_creation(&self, fail: bool) {
        self.shared.fail_event_creation.store(fail, Ordering::Release);
    }

    /// Simulate device removal. Every later call on the device, its queues
    /// and its markers fails with [`SyncError::DeviceLost`].
    pub fn remove(&self) {
        log::warn!("DummyBackend: device removed");
        self.shared.removed.store(true, Ordering::Release);
    }

    /// Check whether [`remove`](Self::remove) was called.
    pub fn is_removed(&self) -> bool {
        self.shared.removed.load(Ordering::Acquire)
    }
}

impl Device<DummyBackend> for DummyDevice {
    fn create_marker(&self, initial_value: u64) -> SyncResult<DummyMarker> {
        self.shared.check_alive()?;
        if self.shared.fail_marker_creation.load(Ordering::Acquire) {
            return Err(SyncError::ResourceCreationFailed(
                "dummy marker creation disabled".to_string(),
            ));
        }

        let id = MarkerId(self.shared.next_marker_id.fetch_add(1, Ordering::Relaxed));
        self.shared.stats.lock().markers_created += 1;
        log::trace!(
            "DummyBackend: creating marker {} (initial value: {})",
            id.raw(),
            initial_value
        );

        Ok(DummyMarker {
            shared: Arc::new(MarkerShared {
                id,
                state: Mutex::new(MarkerState {
                    completed: initial_value,
                    armed: Vec::new(),
                    stalled_queues: Vec::new(),
                }),
            }),
            device: self.shared.clone(),
        })
    }

    fn create_event(&self) -> SyncResult<DummyEvent> {
        self.shared.check_alive()?;
        if self.shared.fail_event_creation.load(Ordering::Acquire) {
            return Err(SyncError::ResourceCreationFailed(
                "dummy event creation disabled".to_string(),
            ));
        }

        self.shared.stats.lock().events_created += 1;
        log::trace!("DummyBackend: creating completion event");

        Ok(DummyEvent {
            shared: Arc::new(EventShared::default()),
            device: self.shared.clone(),
        })
    }
}

#[derive(Debug)]
struct MarkerShared {
    id: MarkerId,
    state: Mutex<MarkerState>,
}

#[derive(Debug)]
struct MarkerState {
    completed: u64,
    /// Events waiting for a target value.
    armed: Vec<(u64, Arc<EventShared>)>,
    /// Immediate queues stalled on a wait for this marker.
    stalled_queues: Vec<Weak<DummyQueue>>,
}

impl MarkerShared {
    /// Raise the completed value and fire every event whose target is reached.
    ///
    /// A lower value leaves the marker where it is.
    ///
    /// Returns the queues that were stalled on this marker so the caller can
    /// resume them once it no longer holds its own queue locks.
    fn advance(&self, value: u64) -> Vec<Arc<DummyQueue>> {
        let mut state = self.state.lock();
        state.completed = state.completed.max(value);
        let completed = state.completed;
        state.armed.retain(|(target, event)| {
            if *target <= completed {
                event.set();
                false
            } else {
                true
            }
        });
        std::mem::take(&mut state.stalled_queues)
            .into_iter()
            .filter_map(|queue| queue.upgrade())
            .collect()
    }
}

/// Dummy timeline marker.
#[derive(Debug)]
pub struct DummyMarker {
    shared: Arc<MarkerShared>,
    device: Arc<DeviceShared>,
}

impl DummyMarker {
    /// Identifier used in recorded queue instructions.
    pub fn id(&self) -> MarkerId {
        self.shared.id
    }
}

impl TimelineMarker<DummyBackend> for DummyMarker {
    fn completed_value(&self) -> SyncResult<u64> {
        self.device.check_alive()?;
        Ok(self.shared.state.lock().completed)
    }

    fn notify_on_completion(&self, value: u64, event: &DummyEvent) -> SyncResult<()> {
        self.device.check_alive()?;
        let mut state = self.shared.state.lock();
        if state.completed >= value {
            event.shared.set();
        } else {
            state.armed.push((value, event.shared.clone()));
        }
        Ok(())
    }
}

impl Drop for DummyMarker {
    fn drop(&mut self) {
        log::trace!("DummyBackend: destroying marker {}", self.shared.id.raw());
        self.device.stats.lock().markers_destroyed += 1;
    }
}

#[derive(Debug, Default)]
struct EventShared {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl EventShared {
    fn set(&self) {
        *self.signaled.lock() = true;
        self.condvar.notify_all();
    }
}

/// Dummy auto-reset completion event.
#[derive(Debug)]
pub struct DummyEvent {
    shared: Arc<EventShared>,
    device: Arc<DeviceShared>,
}

impl CompletionEvent for DummyEvent {
    fn wait(&self) -> SyncResult<()> {
        let mut signaled = self.shared.signaled.lock();
        if !*signaled {
            self.device.stats.lock().blocking_waits += 1;
            while !*signaled {
                self.shared.condvar.wait(&mut signaled);
            }
        }
        *signaled = false;
        Ok(())
    }
}

impl Drop for DummyEvent {
    fn drop(&mut self) {
        self.device.stats.lock().events_destroyed += 1;
    }
}

#[derive(Debug)]
struct PendingCommand {
    command: QueueCommand,
    marker: Option<Arc<MarkerShared>>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PendingCommand>,
    submitted: Vec<QueueCommand>,
    executed: u64,
}

/// Dummy command queue.
#[derive(Debug)]
pub struct DummyQueue {
    self_ref: Weak<DummyQueue>,
    device: DummyDevice,
    mode: ExecutionMode,
    state: Mutex<QueueState>,
    /// Held for the duration of one step so instructions execute in order
    /// even when several threads drive the queue.
    execution: Mutex<()>,
}

impl DummyQueue {
    /// Get the execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Get the owning device without going through the backend trait.
    pub fn dummy_device(&self) -> &DummyDevice {
        &self.device
    }

    /// Submit an opaque unit of work.
    pub fn submit_work(&self, label: impl Into<String>) -> SyncResult<()> {
        self.push(QueueCommand::Work(label.into()), None)
    }

    /// Every instruction submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<QueueCommand> {
        self.state.lock().submitted.clone()
    }

    /// Number of instructions not yet executed.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of instructions executed so far.
    pub fn executed_count(&self) -> u64 {
        self.state.lock().executed
    }

    /// Execute the front instruction, if it can run.
    pub fn execute_next(&self) -> StepOutcome {
        let (outcome, woken) = self.step();
        Self::resume(woken);
        outcome
    }

    /// Execute instructions until the queue is empty or stalled on a wait.
    ///
    /// Returns the number of instructions executed.
    pub fn execute_until_stalled(&self) -> usize {
        let mut executed = 0;
        let mut woken = Vec::new();
        loop {
            let (outcome, more) = self.step();
            woken.extend(more);
            match outcome {
                StepOutcome::Executed(_) => executed += 1,
                StepOutcome::Stalled { .. } | StepOutcome::Idle => break,
            }
        }
        Self::resume(woken);
        executed
    }

    fn push(&self, command: QueueCommand, marker: Option<Arc<MarkerShared>>) -> SyncResult<()> {
        self.device.shared.check_alive()?;
        {
            let mut state = self.state.lock();
            state.submitted.push(command.clone());
            state.pending.push_back(PendingCommand { command, marker });
        }

        if self.mode == ExecutionMode::Immediate {
            self.execute_until_stalled();
        }
        Ok(())
    }

    fn step(&self) -> (StepOutcome, Vec<Arc<DummyQueue>>) {
        let _execution = self.execution.lock();

        let front = {
            let state = self.state.lock();
            state
                .pending
                .front()
                .map(|pending| (pending.command.clone(), pending.marker.clone()))
        };
        let Some((command, marker)) = front else {
            return (StepOutcome::Idle, Vec::new());
        };

        if let (QueueCommand::Wait { marker: id, value }, Some(shared)) = (&command, &marker) {
            let mut marker_state = shared.state.lock();
            if marker_state.completed < *value {
                if self.mode == ExecutionMode::Immediate
                    && !marker_state
                        .stalled_queues
                        .iter()
                        .any(|queue| queue.ptr_eq(&self.self_ref))
                {
                    marker_state.stalled_queues.push(self.self_ref.clone());
                }
                return (
                    StepOutcome::Stalled {
                        marker: *id,
                        value: *value,
                    },
                    Vec::new(),
                );
            }
        }

        {
            let mut state = self.state.lock();
            state.pending.pop_front();
            state.executed += 1;
        }

        // Retire the instruction before firing events, so a woken waiter
        // observes the queue past it.
        let woken = match (&command, &marker) {
            (QueueCommand::Signal { value, .. }, Some(shared)) => shared.advance(*value),
            _ => Vec::new(),
        };
        log::trace!("DummyBackend: executed {:?}", command);

        (StepOutcome::Executed(command), woken)
    }

    /// Drive queues woken by a signal until each stalls or drains.
    fn resume(mut woken: Vec<Arc<DummyQueue>>) {
        while let Some(queue) = woken.pop() {
            loop {
                let (outcome, more) = queue.step();
                woken.extend(more);
                if !matches!(outcome, StepOutcome::Executed(_)) {
                    break;
                }
            }
        }
    }
}

impl CommandQueue<DummyBackend> for DummyQueue {
    fn device(&self) -> SyncResult<DummyDevice> {
        self.device.shared.check_alive()?;
        Ok(self.device.clone())
    }

    fn signal(&self, marker: &DummyMarker, value: u64) -> SyncResult<()> {
        self.push(
            QueueCommand::Signal {
                marker: marker.id(),
                value,
            },
            Some(marker.shared.clone()),
        )
    }

    fn wait(&self, marker: &DummyMarker, value: u64) -> SyncResult<()> {
        self.push(
            QueueCommand::Wait {
                marker: marker.id(),
                value,
            },
            Some(marker.shared.clone()),
        )
    }
}

static_assertions::assert_impl_all!(DummyQueue: Send, Sync);
static_assertions::assert_impl_all!(DummyDevice: Send, Sync);
static_assertions::assert_impl_all!(DummyMarker: Send, Sync);
static_assertions::assert_impl_all!(DummyEvent: Send, Sync);
