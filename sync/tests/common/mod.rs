//! Common utilities for fence integration tests.
//!
//! Provides a test context around a dummy device and a background thread that
//! plays the GPU for deferred queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use redlilium_sync::backend::dummy::{DummyDevice, DummyQueue, ExecutionMode, StepOutcome};

/// Initialize logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

// ============================================================================
// Simulated GPU
// ============================================================================

/// Background thread executing a deferred queue, one instruction at a time.
///
/// Stopped and joined on drop.
pub struct GpuThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GpuThread {
    /// Start executing `queue`, pausing `step_delay` after every instruction.
    pub fn spawn(queue: Arc<DummyQueue>, step_delay: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Acquire) {
                match queue.execute_next() {
                    StepOutcome::Executed(_) => std::thread::sleep(step_delay),
                    StepOutcome::Stalled { .. } | StepOutcome::Idle => {
                        std::thread::sleep(Duration::from_millis(1))
                    }
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Execute `steps` instructions of `queue` on another thread after `delay`.
pub fn execute_later(queue: &Arc<DummyQueue>, delay: Duration, steps: usize) -> JoinHandle<()> {
    let queue = queue.clone();
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        for _ in 0..steps {
            queue.execute_next();
        }
    })
}

// ============================================================================
// Test Context
// ============================================================================

/// Dummy device and queue, with a simulated GPU for deferred queues.
pub struct TestContext {
    /// Device owning the queue.
    pub device: DummyDevice,
    /// Queue under test.
    pub queue: Arc<DummyQueue>,
    #[allow(dead_code)]
    gpu: Option<GpuThread>,
}

impl TestContext {
    /// Create a context whose queue runs in `mode`.
    ///
    /// Deferred queues are driven by a [`GpuThread`] that lags behind the
    /// submitter.
    pub fn new(mode: ExecutionMode) -> Self {
        init_logging();

        let device = DummyDevice::new();
        let queue = device.create_queue(mode);
        let gpu = match mode {
            ExecutionMode::Immediate => None,
            ExecutionMode::Deferred => {
                Some(GpuThread::spawn(queue.clone(), Duration::from_millis(2)))
            }
        };

        Self { device, queue, gpu }
    }
}
