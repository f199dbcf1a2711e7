//! Fuzz target for bus traffic through a wired machine.
//!
//! An arbitrary ROM image, serial input and sequence of engine bus operations
//! are replayed against the default buri layout. The machine must never
//! panic, ROM must never change, and stepping must keep succeeding because
//! every built-in handler only raises recoverable faults.

#![no_main]

use arbitrary::Arbitrary;
use burisim::{Machine, MemoryBus, Processor};
use libfuzzer_sys::fuzz_target;

/// One bus access made by the fake engine
#[derive(Debug, Clone, Copy, Arbitrary)]
enum BusOp {
    Read(u16),
    Write(u16, u8),
    Call(u16),
}

/// Engine replaying the fuzz input, a few operations per batch
struct Replay {
    ops: Vec<BusOp>,
    next: usize,
}

impl Processor for Replay {
    fn reset(&mut self, _bus: &mut dyn MemoryBus) {
        self.next = 0;
    }

    fn irq(&mut self) {}

    fn nmi(&mut self) {}

    fn run(&mut self, bus: &mut dyn MemoryBus, ticks: u64) -> u64 {
        for op in self.ops.iter().skip(self.next).take(ticks as usize) {
            match *op {
                BusOp::Read(addr) => {
                    bus.read(addr);
                }
                BusOp::Write(addr, value) => {
                    let _ = bus.write(addr, value);
                }
                BusOp::Call(addr) => bus.call(addr),
            }
        }
        self.next += ticks as usize;
        ticks
    }
}

/// Complete fuzz input
#[derive(Debug, Arbitrary)]
struct FuzzInput {
    rom: Vec<u8>,
    serial_in: Vec<u8>,
    ops: Vec<BusOp>,
    batch: u8,
}

fuzz_target!(|input: FuzzInput| {
    let replay = Replay {
        ops: input.ops,
        next: 0,
    };
    let Ok(mut machine) = Machine::new(replay) else {
        return;
    };
    if input.rom.is_empty() {
        return;
    }
    machine.load_rom(&input.rom).unwrap();
    machine.reset();

    let rom_before = machine.memory()[0xE000..].to_vec();
    let batch = u64::from(input.batch.max(1));

    let mut serial = input.serial_in.iter();
    let total = machine.processor().ops.len() as u64;
    let mut done = 0;
    while done < total {
        if let Some(&byte) = serial.next() {
            machine.receive_byte(byte);
        }
        done += machine.step(batch).unwrap();
    }

    assert_eq!(&machine.memory()[0xE000..], &rom_before[..]);
});
