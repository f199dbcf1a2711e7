//! The processor engine contract.
//!
//! The instruction decoder and executor are not part of this crate. A
//! `Machine` drives any engine that implements `Processor`, handing it the
//! dispatcher as its memory bus for every call that may touch memory.

use crate::memory::MemoryBus;

/// A 65C02-class execution engine.
///
/// The engine reads and writes memory only through the `MemoryBus` it is
/// given, so every access is routed through the machine's dispatch tables.
/// Control transfers (JSR/JMP) should be reported with `MemoryBus::call`.
///
/// # Examples
///
/// A trivial engine that executes one fetch per tick:
///
/// ```rust
/// use burisim::{MemoryBus, Processor};
///
/// #[derive(Default)]
/// struct Fetcher {
///     pc: u16,
///     irq_pending: bool,
/// }
///
/// impl Processor for Fetcher {
///     fn reset(&mut self, bus: &mut dyn MemoryBus) {
///         self.pc = u16::from_le_bytes([bus.read(0xFFFC), bus.read(0xFFFD)]);
///     }
///
///     fn irq(&mut self) {
///         self.irq_pending = true;
///     }
///
///     fn nmi(&mut self) {}
///
///     fn run(&mut self, bus: &mut dyn MemoryBus, ticks: u64) -> u64 {
///         for _ in 0..ticks {
///             bus.read(self.pc);
///             self.pc = self.pc.wrapping_add(1);
///         }
///         ticks
///     }
/// }
/// ```
pub trait Processor: Send + 'static {
    /// Resets the engine, typically loading the program counter from the
    /// reset vector at 0xFFFC.
    fn reset(&mut self, bus: &mut dyn MemoryBus);

    /// Signals a maskable interrupt request. Called once per rising edge of
    /// the combined device IRQ line; masking is the engine's business.
    fn irq(&mut self);

    /// Signals a non-maskable interrupt.
    fn nmi(&mut self);

    /// Executes instructions until at least `ticks` cycles have elapsed and
    /// returns the number of cycles actually executed. The engine stops on an
    /// instruction boundary, so the result may exceed `ticks`.
    fn run(&mut self, bus: &mut dyn MemoryBus, ticks: u64) -> u64;
}
