//! Shared helpers for integration tests.
//!
//! `ScriptedProcessor` stands in for the instruction engine: every `run`
//! replays a fixed list of bus operations and reports exactly the requested
//! number of ticks. Its `Counters` handle stays with the test so calls can be
//! counted while the processor is owned by a machine or a runner thread.

#![allow(dead_code)]

use burisim::{BusError, Device, DeviceContext, MemoryBus, Processor};
use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One bus operation replayed by `ScriptedProcessor`.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    Read(u16),
    Write(u16, u8),
    Call(u16),
}

/// Counters shared between a test and its `ScriptedProcessor`.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    resets: Arc<AtomicUsize>,
    irqs: Arc<AtomicUsize>,
    nmis: Arc<AtomicUsize>,
    runs: Arc<AtomicUsize>,
    ticks: Arc<AtomicU64>,
    write_faults: Arc<AtomicUsize>,
    reads: Arc<Mutex<Vec<u8>>>,
}

impl Counters {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn irqs(&self) -> usize {
        self.irqs.load(Ordering::SeqCst)
    }

    pub fn nmis(&self) -> usize {
        self.nmis.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn write_faults(&self) -> usize {
        self.write_faults.load(Ordering::SeqCst)
    }

    /// Values returned by every scripted read so far.
    pub fn reads(&self) -> Vec<u8> {
        self.reads.lock().unwrap().clone()
    }
}

/// Engine stand-in replaying `script` on every `run`.
pub struct ScriptedProcessor {
    script: Vec<Op>,
    counters: Counters,
}

impl ScriptedProcessor {
    pub fn new() -> (Self, Counters) {
        Self::with_script(Vec::new())
    }

    pub fn with_script(script: Vec<Op>) -> (Self, Counters) {
        let counters = Counters::default();
        let processor = Self {
            script,
            counters: counters.clone(),
        };
        (processor, counters)
    }
}

impl Processor for ScriptedProcessor {
    fn reset(&mut self, _bus: &mut dyn MemoryBus) {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn irq(&mut self) {
        self.counters.irqs.fetch_add(1, Ordering::SeqCst);
    }

    fn nmi(&mut self) {
        self.counters.nmis.fetch_add(1, Ordering::SeqCst);
    }

    fn run(&mut self, bus: &mut dyn MemoryBus, ticks: u64) -> u64 {
        for op in &self.script {
            match *op {
                Op::Read(addr) => {
                    let value = bus.read(addr);
                    self.counters.reads.lock().unwrap().push(value);
                }
                Op::Write(addr, value) => {
                    if bus.write(addr, value).is_err() {
                        self.counters.write_faults.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Op::Call(addr) => bus.call(addr),
            }
        }
        self.counters.runs.fetch_add(1, Ordering::SeqCst);
        self.counters.ticks.fetch_add(ticks, Ordering::SeqCst);
        ticks
    }
}

/// One-register device whose interrupt line follows bit 0 of the last write.
#[derive(Debug, Default)]
pub struct IrqLatch {
    value: u8,
}

impl Device for IrqLatch {
    fn name(&self) -> &'static str {
        "irq-latch"
    }

    fn size(&self) -> u16 {
        1
    }

    fn read(&mut self, _offset: u16, _ctx: &mut DeviceContext<'_>) -> Result<u8, BusError> {
        Ok(self.value)
    }

    fn write(
        &mut self,
        _offset: u16,
        value: u8,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), BusError> {
        self.value = value;
        ctx.set_irq(value & 1 != 0);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Collects transmitted bytes; returns the listener and the shared buffer.
pub fn recording_listener() -> (
    impl FnMut(u8) -> anyhow::Result<()> + Send + 'static,
    Arc<Mutex<Vec<u8>>>,
) {
    let sent = Arc::new(Mutex::new(Vec::<u8>::new()));
    let sink = Arc::clone(&sent);
    let listener = move |byte: u8| -> anyhow::Result<()> {
        sink.lock().unwrap().push(byte);
        Ok(())
    };
    (listener, sent)
}
