//! # The buri Machine
//!
//! `Machine` ties a processor engine to the address dispatcher and wires the
//! buri's built-in hardware:
//!
//! | Range | Device | Handlers |
//! |-------|--------|----------|
//! | `$E000-$FFFF` | 8KB ROM | write guard |
//! | `$DFFC-$DFFF` | W65C51 ACIA | read, write |
//! | everything else | RAM | none (raw image) |
//!
//! The ROM guard is registered first and the ACIA second, so a layout that
//! places the ACIA inside the ROM range still reaches the ACIA. Devices added
//! later with `attach_device` take precedence over both.
//!
//! ## Stepping
//!
//! `step(ticks)` runs one batch:
//!
//! 1. poll every device once, in attach order
//! 2. deliver `irq()` to the engine if the combined IRQ line rose since the
//!    last batch
//! 3. run the engine for at least `ticks` cycles
//! 4. drain the faults raised by device handlers during the batch
//!
//! # Example
//!
//! ```rust
//! use burisim::{Machine, MemoryBus, Processor};
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
//! let mut machine = Machine::new(Idle).unwrap();
//! machine.load_rom(&[0xEA]).unwrap();
//! machine.reset();
//!
//! assert_eq!(machine.step(1000).unwrap(), 1000);
//! assert_eq!(machine.memory()[0xFFFF], 0xEA);
//! ```

use crate::devices::{Acia6551, BusError, Device, RomGuard};
use crate::dispatch::{AccessKind, AddressDispatcher, DeviceId, FAULT_LOG_CAPACITY};
use crate::memory::{MemoryBus, ADDRESS_SPACE};
use crate::processor::Processor;
use crate::MachineError;
use std::collections::VecDeque;

/// Where the built-in hardware sits in the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MachineLayout {
    /// First ROM address. The ROM always extends to `$FFFF`.
    pub rom_base: u16,
    /// Base address of the ACIA's four registers.
    pub acia_base: u16,
}

impl MachineLayout {
    /// Number of bytes between `rom_base` and the top of memory.
    pub fn rom_size(&self) -> usize {
        ADDRESS_SPACE - self.rom_base as usize
    }
}

impl Default for MachineLayout {
    fn default() -> Self {
        Self {
            rom_base: 0xE000,
            acia_base: 0xDFFC,
        }
    }
}

/// A processor engine plus the buri's memory map and devices.
pub struct Machine<P: Processor> {
    processor: P,
    bus: AddressDispatcher,
    layout: MachineLayout,
    rom: DeviceId,
    acia: DeviceId,
    faults: VecDeque<BusError>,
    reset_done: bool,
}

impl<P: Processor> Machine<P> {
    /// Builds a machine with the default buri layout.
    ///
    /// The engine is not reset; call `reset()` before the first `step()`.
    pub fn new(processor: P) -> Result<Self, MachineError> {
        Self::with_layout(processor, MachineLayout::default())
    }

    /// Builds a machine with a custom layout.
    ///
    /// # Errors
    ///
    /// `MachineError::InvalidRange` if the ROM would cover the whole address
    /// space or the ACIA registers would run past `$FFFF`.
    pub fn with_layout(processor: P, layout: MachineLayout) -> Result<Self, MachineError> {
        let rom_size = u16::try_from(layout.rom_size()).map_err(|_| MachineError::InvalidRange {
            start: layout.rom_base,
            length: layout.rom_size(),
        })?;

        let mut bus = AddressDispatcher::new();
        let rom = bus.attach(RomGuard::new(layout.rom_base, rom_size));
        bus.register_handler(layout.rom_base, rom_size as usize, AccessKind::Write, rom)?;
        let acia = bus.attach(Acia6551::new());
        bus.map_device(layout.acia_base, acia)?;

        Ok(Self {
            processor,
            bus,
            layout,
            rom,
            acia,
            faults: VecDeque::new(),
            reset_done: false,
        })
    }

    /// The layout this machine was built with.
    pub fn layout(&self) -> MachineLayout {
        self.layout
    }

    /// Size of the ROM range in bytes.
    pub fn rom_size(&self) -> usize {
        self.layout.rom_size()
    }

    /// Opens a writable-ROM scope. Protection is restored when the returned
    /// guard is dropped, including on early return.
    pub fn writable_rom(&mut self) -> WritableRom<'_, P> {
        WritableRom::new(self)
    }

    /// Copies `bytes` into the ROM range, repeating a short image cyclically
    /// and truncating a long one so the range is filled exactly.
    ///
    /// The image is stored directly, so a device mapped inside the ROM range
    /// sees none of these writes.
    ///
    /// # Errors
    ///
    /// `MachineError::EmptyRom` if `bytes` is empty.
    pub fn load_rom(&mut self, bytes: &[u8]) -> Result<(), MachineError> {
        if bytes.is_empty() {
            return Err(MachineError::EmptyRom);
        }
        let base = self.layout.rom_base;
        let size = self.rom_size();

        let image: Vec<u8> = bytes.iter().copied().cycle().take(size).collect();
        self.writable_rom().load(base, &image)?;

        log::info!(
            "loaded {} byte ROM image into ${:04X}-$FFFF",
            bytes.len(),
            base
        );
        Ok(())
    }

    /// Copies `bytes` into RAM starting at `addr`. Nothing is written unless
    /// the whole image fits below the ROM.
    ///
    /// # Errors
    ///
    /// * `MachineError::RamOutOfRange` - image runs past `$FFFF`
    /// * `MachineError::Bus(ReadOnlyMemory)` - image overlaps the ROM range;
    ///   the error names the first ROM address the image would hit
    pub fn load_ram(&mut self, bytes: &[u8], addr: u16) -> Result<(), MachineError> {
        let start = addr as usize;
        let end = start + bytes.len();
        if end > ADDRESS_SPACE {
            return Err(MachineError::RamOutOfRange {
                address: addr,
                len: bytes.len(),
            });
        }

        let rom_base = self.layout.rom_base as usize;
        if end > rom_base {
            let first = start.max(rom_base);
            return Err(MachineError::Bus(BusError::ReadOnlyMemory {
                address: first as u16,
                value: bytes[first - start],
            }));
        }

        self.bus.image_mut().load(addr, bytes);
        log::info!("loaded {} bytes of RAM at ${:04X}", bytes.len(), addr);
        Ok(())
    }

    /// Resets every device, then the processor engine.
    pub fn reset(&mut self) {
        self.bus.reset_devices();
        self.processor.reset(&mut self.bus);
        self.reset_done = true;
        log::info!("machine reset");
    }

    /// Whether `reset()` has been called at least once.
    pub fn is_reset(&self) -> bool {
        self.reset_done
    }

    /// Runs one batch of at least `ticks` cycles and returns the cycles the
    /// engine actually executed.
    ///
    /// # Errors
    ///
    /// * `MachineError::NotReset` - called before the first `reset()`
    /// * `MachineError::Bus` - a device reported a fatal fault during the
    ///   batch; recoverable faults are logged and kept for `take_faults()`
    pub fn step(&mut self, ticks: u64) -> Result<u64, MachineError> {
        if !self.reset_done {
            return Err(MachineError::NotReset);
        }

        self.bus.poll_devices();
        if self.bus.interrupts_mut().take_edge() {
            self.processor.irq();
        }
        let executed = self.processor.run(&mut self.bus, ticks);

        match self.collect_faults() {
            Some(fatal) => Err(fatal.into()),
            None => Ok(executed),
        }
    }

    /// Signals a non-maskable interrupt to the engine.
    pub fn nmi(&mut self) {
        self.processor.nmi();
    }

    /// Dispatched read, with the same side effects an engine read would have.
    pub fn read(&mut self, addr: u16) -> u8 {
        let value = self.bus.read(addr);
        self.collect_faults();
        value
    }

    /// Dispatched write, for control-plane register pokes.
    ///
    /// # Errors
    ///
    /// The handler's fault, e.g. a write into protected ROM.
    pub fn write(&mut self, addr: u16, value: u8) -> Result<(), MachineError> {
        let result = self.bus.write(addr, value);
        self.collect_faults();
        result.map_err(MachineError::from)
    }

    /// Writes the image directly, bypassing every handler.
    pub fn poke(&mut self, addr: u16, value: u8) {
        self.bus.poke(addr, value);
    }

    /// Reads the image directly, bypassing every handler.
    pub fn peek(&self, addr: u16) -> u8 {
        self.bus.peek(addr)
    }

    /// Read-only view of the full 64KB image.
    pub fn memory(&self) -> &[u8] {
        self.bus.image().as_bytes()
    }

    /// Hands a byte from the serial transport to the built-in ACIA.
    pub fn receive_byte(&mut self, byte: u8) {
        self.bus
            .with_device(self.acia, |acia: &mut Acia6551, ctx| {
                acia.enqueue_received_byte(byte, ctx)
            });
    }

    /// Installs the listener receiving every byte the ACIA transmits.
    pub fn set_transmit_listener<F>(&mut self, listener: F)
    where
        F: FnMut(u8) -> anyhow::Result<()> + Send + 'static,
    {
        if let Some(acia) = self.bus.device_mut::<Acia6551>(self.acia) {
            acia.set_transmit_listener(listener);
        }
    }

    /// The built-in ACIA.
    pub fn acia(&self) -> Option<&Acia6551> {
        self.bus.device(self.acia)
    }

    /// Attaches a device and maps its registers at `base`, on top of any
    /// earlier mapping.
    pub fn attach_device<D: Device>(&mut self, base: u16, device: D) -> Result<DeviceId, MachineError> {
        let name = device.name();
        let id = self.bus.attach(device);
        self.bus.map_device(base, id)?;
        log::debug!("attached {} at ${:04X}", name, base);
        Ok(id)
    }

    /// Shared access to an attached device.
    pub fn device<T: Device>(&self, id: DeviceId) -> Option<&T> {
        self.bus.device(id)
    }

    /// Exclusive access to an attached device.
    pub fn device_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        self.bus.device_mut(id)
    }

    /// The dispatcher, for registering extra handlers such as call traps.
    pub fn dispatcher_mut(&mut self) -> &mut AddressDispatcher {
        &mut self.bus
    }

    /// The processor engine.
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// The processor engine, mutably.
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Removes and returns the recoverable faults seen since the last call.
    pub fn take_faults(&mut self) -> Vec<BusError> {
        self.faults.drain(..).collect()
    }

    fn set_rom_writable(&mut self, writable: bool) {
        if let Some(guard) = self.bus.device_mut::<RomGuard>(self.rom) {
            guard.set_writable(writable);
        }
    }

    /// Moves faults out of the dispatcher log. Recoverable ones are logged and
    /// kept; the first fatal one is returned.
    fn collect_faults(&mut self) -> Option<BusError> {
        let mut fatal = None;
        for fault in self.bus.take_faults() {
            if fault.is_fatal() {
                log::error!("{fault}");
                if fatal.is_none() {
                    fatal = Some(fault);
                }
                continue;
            }
            log::warn!("{fault}");
            if self.faults.len() == FAULT_LOG_CAPACITY {
                self.faults.pop_front();
            }
            self.faults.push_back(fault);
        }
        fatal
    }
}

impl<P: Processor> std::fmt::Debug for Machine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("layout", &self.layout)
            .field("bus", &self.bus)
            .field("reset_done", &self.reset_done)
            .finish()
    }
}

/// Writable-ROM scope returned by `Machine::writable_rom`.
///
/// While it lives, writes into the ROM range land in the image. Dropping it
/// restores the protection.
///
/// ```rust
/// # use burisim::{Machine, MemoryBus, Processor};
/// # struct Idle;
/// # impl Processor for Idle {
/// #     fn reset(&mut self, _bus: &mut dyn MemoryBus) {}
/// #     fn irq(&mut self) {}
/// #     fn nmi(&mut self) {}
/// #     fn run(&mut self, _bus: &mut dyn MemoryBus, ticks: u64) -> u64 { ticks }
/// # }
/// let mut machine = Machine::new(Idle).unwrap();
/// {
///     let mut rom = machine.writable_rom();
///     rom.write(0xFFFC, 0x00).unwrap();
///     rom.write(0xFFFD, 0xE0).unwrap();
/// }
/// assert!(machine.write(0xFFFC, 0x12).is_err());
/// assert_eq!(machine.peek(0xFFFD), 0xE0);
/// ```
pub struct WritableRom<'a, P: Processor> {
    machine: &'a mut Machine<P>,
}

impl<'a, P: Processor> WritableRom<'a, P> {
    fn new(machine: &'a mut Machine<P>) -> Self {
        machine.set_rom_writable(true);
        Self { machine }
    }

    /// Dispatched write with ROM protection lifted.
    pub fn write(&mut self, addr: u16, value: u8) -> Result<(), MachineError> {
        self.machine.write(addr, value)
    }

    /// Stores `bytes` at `addr` without dispatching to any handler.
    ///
    /// # Errors
    ///
    /// `MachineError::InvalidRange` unless the whole run lies in the ROM.
    pub fn load(&mut self, addr: u16, bytes: &[u8]) -> Result<(), MachineError> {
        let invalid = MachineError::InvalidRange {
            start: addr,
            length: bytes.len(),
        };
        if addr < self.machine.layout.rom_base {
            return Err(invalid);
        }
        if !self.machine.bus.image_mut().load(addr, bytes) {
            return Err(invalid);
        }
        Ok(())
    }
}

impl<P: Processor> Drop for WritableRom<'_, P> {
    fn drop(&mut self) {
        self.machine.set_rom_writable(false);
    }
}
