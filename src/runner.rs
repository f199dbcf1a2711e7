//! # Real-Time Runner
//!
//! Steps a shared [`Machine`] on a background thread at a target clock rate.
//!
//! Each iteration locks the machine, runs one batch of `ticks_per_batch`
//! cycles, unlocks it, and then sleeps for whatever is left of the batch's
//! wall-clock budget:
//!
//! ```text
//! sleep = max(0, ticks_per_batch / target_hz - elapsed)
//! ```
//!
//! The lock is never held while sleeping, so control-plane calls (`reset`,
//! `load_rom`, `receive_byte`, ...) made from other threads wait at most one
//! batch. Every `report_interval` the achieved frequency is published for
//! `frequency()`.
//!
//! # Example
//!
//! ```rust,no_run
//! use burisim::{Machine, MemoryBus, Processor, RealTimeRunner, RunnerConfig};
//! use std::time::Duration;
//!
//! struct Idle;
//!
//! impl Processor for Idle {
//!     fn reset(&mut self, _bus: &mut dyn MemoryBus) {}
//!     fn irq(&mut self) {}
//!     fn nmi(&mut self) {}
//!     fn run(&mut self, _bus: &mut dyn MemoryBus, ticks: u64) -> u64 {
//!         ticks
//!     }
//! }
//!
//! let mut runner = RealTimeRunner::new(Machine::new(Idle)?, RunnerConfig::default());
//! runner.load_rom(&[0xEA])?;
//! runner.reset();
//! runner.start()?;
//!
//! std::thread::sleep(Duration::from_secs(2));
//! println!("{:.0} Hz", runner.frequency().unwrap_or(0.0));
//!
//! runner.stop();
//! # Ok::<(), burisim::MachineError>(())
//! ```

use crate::machine::Machine;
use crate::processor::Processor;
use crate::MachineError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Pacing parameters for a `RealTimeRunner`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RunnerConfig {
    /// Target clock rate in ticks per second.
    pub target_hz: u64,
    /// Ticks requested from the machine per batch.
    pub ticks_per_batch: u64,
    /// How often the achieved frequency is recomputed.
    pub report_interval: Duration,
}

impl RunnerConfig {
    /// Wall-clock budget of one batch at the target rate.
    pub fn batch_period(&self) -> Duration {
        if self.target_hz == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.ticks_per_batch as f64 / self.target_hz as f64)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            target_hz: 2_000_000,
            ticks_per_batch: 100_000,
            report_interval: Duration::from_secs(1),
        }
    }
}

/// State shared between the runner handle and its thread.
#[derive(Debug)]
struct Shared {
    stop: AtomicBool,
    running: AtomicBool,
    /// Achieved frequency as `f64` bits; NaN until the first report.
    frequency: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            running: AtomicBool::new(false),
            frequency: AtomicU64::new(f64::NAN.to_bits()),
        }
    }
}

/// Runs a `Machine` in real time on a dedicated thread.
pub struct RealTimeRunner<P: Processor> {
    machine: Arc<Mutex<Machine<P>>>,
    config: RunnerConfig,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl<P: Processor> RealTimeRunner<P> {
    /// Wraps `machine`; nothing runs until `start()`.
    pub fn new(machine: Machine<P>, config: RunnerConfig) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            config,
            shared: Arc::new(Shared::new()),
            worker: None,
        }
    }

    /// Pacing parameters.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Starts the stepping thread. Does nothing if it is already running.
    ///
    /// # Errors
    ///
    /// `MachineError::Spawn` if the OS refuses to create the thread.
    pub fn start(&mut self) -> Result<(), MachineError> {
        if self.is_running() {
            return Ok(());
        }
        // A loop that ended on a fatal error still has to be reaped
        self.join_worker();

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let machine = Arc::clone(&self.machine);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("burisim-runner".into())
            .spawn(move || run_loop(&machine, &shared, &config));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                log::info!(
                    "runner started: {} Hz, {} ticks per batch",
                    self.config.target_hz,
                    self.config.ticks_per_batch
                );
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(MachineError::Spawn(err))
            }
        }
    }

    /// Stops the stepping thread and waits for it to exit. After this returns
    /// the machine is no longer stepped.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if self.worker.is_some() {
            self.join_worker();
            log::info!("runner stopped");
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Whether the stepping thread is active. Goes false once the loop ends
    /// for any reason, a panic in the engine included.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Achieved ticks per second over the last report window, `None` before
    /// the first window has closed.
    pub fn frequency(&self) -> Option<f64> {
        let hz = f64::from_bits(self.shared.frequency.load(Ordering::Relaxed));
        (!hz.is_nan()).then_some(hz)
    }

    /// Resets the machine.
    pub fn reset(&self) {
        lock(&self.machine).reset();
    }

    /// Loads a ROM image, see `Machine::load_rom`.
    pub fn load_rom(&self, bytes: &[u8]) -> Result<(), MachineError> {
        lock(&self.machine).load_rom(bytes)
    }

    /// Loads a RAM image, see `Machine::load_ram`.
    pub fn load_ram(&self, bytes: &[u8], addr: u16) -> Result<(), MachineError> {
        lock(&self.machine).load_ram(bytes, addr)
    }

    /// Hands a byte from the serial transport to the ACIA.
    pub fn receive_byte(&self, byte: u8) {
        lock(&self.machine).receive_byte(byte);
    }

    /// Runs `f` with exclusive access to the machine.
    pub fn with_machine<R>(&self, f: impl FnOnce(&mut Machine<P>) -> R) -> R {
        f(&mut lock(&self.machine))
    }

    /// Shared handle to the machine, for front-ends that lock it themselves.
    pub fn machine(&self) -> Arc<Mutex<Machine<P>>> {
        Arc::clone(&self.machine)
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("runner thread panicked");
            }
        }
    }
}

impl<P: Processor> Drop for RealTimeRunner<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<P: Processor> std::fmt::Debug for RealTimeRunner<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealTimeRunner")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("frequency", &self.frequency())
            .finish()
    }
}

/// Locks the machine, recovering from a panic on another thread. The image is
/// plain bytes and stays usable.
fn lock<P: Processor>(machine: &Mutex<Machine<P>>) -> MutexGuard<'_, Machine<P>> {
    machine.lock().unwrap_or_else(|poisoned| {
        log::warn!("machine lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Clears the running flag when the worker leaves its loop, unwinding included.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn run_loop<P: Processor>(machine: &Mutex<Machine<P>>, shared: &Shared, config: &RunnerConfig) {
    let _running = RunningFlag(&shared.running);
    let batch_period = config.batch_period();
    let mut window_start = Instant::now();
    let mut window_ticks = 0u64;

    while !shared.stop.load(Ordering::SeqCst) {
        let batch_start = Instant::now();

        let result = lock(machine).step(config.ticks_per_batch);
        match result {
            Ok(ticks) => window_ticks += ticks,
            Err(err) => {
                log::error!("runner stopping: {err}");
                break;
            }
        }

        // Sleep out the rest of the batch, waking early on stop()
        let deadline = batch_start + batch_period;
        loop {
            if shared.stop.load(Ordering::SeqCst) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }

        let window = window_start.elapsed();
        if window >= config.report_interval {
            let hz = window_ticks as f64 / window.as_secs_f64();
            shared.frequency.store(hz.to_bits(), Ordering::Relaxed);
            log::debug!("achieved {hz:.0} Hz");
            window_start = Instant::now();
            window_ticks = 0;
        }
    }
}
