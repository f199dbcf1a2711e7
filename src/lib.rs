//! # buri Microcomputer Emulator Core
//!
//! Bus, device and pacing layer for the buri, a small 65C02 home-brew
//! computer with 8KB of ROM, RAM below it and a W65C51 ACIA for its serial
//! console.
//!
//! The instruction engine itself is not part of this crate. Anything that
//! implements [`Processor`] can be dropped into a [`Machine`], which routes
//! every memory access the engine makes through an [`AddressDispatcher`] to
//! the device that owns the address.
//!
//! ## Quick Start
//!
//! ```rust
//! use burisim::{Machine, MemoryBus, Processor};
//! use std::sync::{Arc, Mutex};
//!
//! /// Stores 'A' into the ACIA's data register on every batch.
//! struct Hello;
//!
//! impl Processor for Hello {
//!     fn reset(&mut self, _bus: &mut dyn MemoryBus) {}
//!     fn irq(&mut self) {}
//!     fn nmi(&mut self) {}
//!     fn run(&mut self, bus: &mut dyn MemoryBus, ticks: u64) -> u64 {
//!         bus.write(0xDFFC, b'A').unwrap();
//!         ticks
//!     }
//! }
//!
//! let sent = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&sent);
//!
//! let mut machine = Machine::new(Hello).unwrap();
//! machine.set_transmit_listener(move |byte| {
//!     sink.lock().unwrap().push(byte);
//!     Ok(())
//! });
//! machine.load_rom(&[0xEA]).unwrap();
//! machine.reset();
//! machine.step(100).unwrap();
//!
//! assert_eq!(*sent.lock().unwrap(), b"A");
//! ```
//!
//! ## Architecture
//!
//! - **Dispatch tables**: one handler slot per address and access kind, last
//!   registration wins, O(1) lookup on every access
//! - **Devices own nothing global**: a device sees the memory image and its
//!   own interrupt line only through the `DeviceContext` it is handed
//! - **Edge-triggered IRQ**: device lines are OR-ed and the engine hears
//!   about the rising edge once
//! - **Real-time pacing**: [`RealTimeRunner`] steps a shared machine on its
//!   own thread, sleeping between batches to hold a target clock rate
//!
//! ## Modules
//!
//! - `memory` - `MemoryBus` trait and the 64KB `MemoryImage`
//! - `dispatch` - `AddressDispatcher`
//! - `devices` - `Device` trait, ACIA, ROM guard, LCD, interrupt lines
//! - `processor` - engine contract
//! - `machine` - the wired buri machine
//! - `runner` - real-time execution thread

pub mod devices;
pub mod dispatch;
pub mod machine;
pub mod memory;
pub mod processor;
pub mod runner;

pub use devices::interrupts::{InterruptAggregator, LineId};
pub use devices::{Acia6551, BusError, Device, DeviceContext, DisplaySnapshot, Hd44780, RomGuard};
pub use dispatch::{AccessKind, AddressDispatcher, DeviceId};
pub use machine::{Machine, MachineLayout, WritableRom};
pub use memory::{MemoryBus, MemoryImage};
pub use processor::Processor;
pub use runner::{RealTimeRunner, RunnerConfig};

use thiserror::Error;

/// Errors reported by the machine and its control plane.
#[derive(Debug, Error)]
pub enum MachineError {
    /// A device handler faulted.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// RAM image does not fit in the address space.
    #[error("{len} bytes at ${address:04X} run past the end of memory")]
    RamOutOfRange {
        /// Requested load address
        address: u16,
        /// Image length
        len: usize,
    },

    /// ROM image has no bytes to tile the ROM range with.
    #[error("ROM image is empty")]
    EmptyRom,

    /// Handler range runs past the end of memory.
    #[error("range of {length} bytes at ${start:04X} runs past the end of memory")]
    InvalidRange {
        /// First address of the range
        start: u16,
        /// Requested length
        length: usize,
    },

    /// Device id was not issued by this dispatcher.
    #[error("no device with id {0}")]
    UnknownDevice(usize),

    /// `step` called before the first `reset`.
    #[error("machine must be reset before it is stepped")]
    NotReset,

    /// The runner thread could not be started.
    #[error("failed to spawn runner thread")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MachineError::RamOutOfRange {
            address: 0xFFF0,
            len: 32,
        };
        assert_eq!(err.to_string(), "32 bytes at $FFF0 run past the end of memory");

        let err: MachineError = BusError::ReadOnlyMemory {
            address: 0xE000,
            value: 0x01,
        }
        .into();
        assert_eq!(err.to_string(), "illegal attempt to write $01 to $E000");
    }
}
