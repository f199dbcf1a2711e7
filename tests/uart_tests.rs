//! Integration tests for the W65C51 ACIA as the processor sees it.
//!
//! The engine side is played by `ScriptedProcessor`, so every register access
//! below goes through the machine's dispatch tables at `$DFFC-$DFFF`.

mod common;

use burisim::devices::uart::{STATUS_IRQ, STATUS_RDRF, STATUS_TDRE};
use burisim::Machine;
use common::{recording_listener, Op, ScriptedProcessor};

const DATA: u16 = 0xDFFC;
const STATUS: u16 = 0xDFFD;
const COMMAND: u16 = 0xDFFE;
const CONTROL: u16 = 0xDFFF;

#[test]
fn test_transmit_hello() {
    let script = b"Hello".iter().map(|&b| Op::Write(DATA, b)).collect();
    let (cpu, counters) = ScriptedProcessor::with_script(script);
    let mut machine = Machine::new(cpu).unwrap();
    let (listener, sent) = recording_listener();
    machine.set_transmit_listener(listener);

    machine.reset();
    machine.step(10).unwrap();

    assert_eq!(*sent.lock().unwrap(), b"Hello");
    assert_eq!(counters.write_faults(), 0);
    assert_eq!(machine.acia().unwrap().status() & STATUS_TDRE, STATUS_TDRE);
}

#[test]
fn test_receive_polled_by_rom() {
    // Poll status, then read data, as a ROM getc loop would
    let (cpu, counters) = ScriptedProcessor::with_script(vec![Op::Read(STATUS), Op::Read(DATA)]);
    let mut machine = Machine::new(cpu).unwrap();
    machine.reset();

    machine.receive_byte(b'A');
    machine.receive_byte(b'B');
    machine.step(1).unwrap();
    machine.step(1).unwrap();
    machine.step(1).unwrap();

    let reads = counters.reads();
    assert_eq!(reads[0] & STATUS_RDRF, STATUS_RDRF);
    assert_eq!(reads[1], b'A');
    assert_eq!(reads[2] & STATUS_RDRF, STATUS_RDRF);
    assert_eq!(reads[3], b'B');
    // Nothing left: RDRF clear, data register holds stale 'B'
    assert_eq!(reads[4] & STATUS_RDRF, 0);
    assert_eq!(reads[5], b'B');
}

#[test]
fn test_receive_interrupt_and_status_clear() {
    let (cpu, counters) = ScriptedProcessor::new();
    let mut machine = Machine::new(cpu).unwrap();
    machine.reset();

    // Receiver interrupts on
    machine.write(COMMAND, 0x02).unwrap();
    machine.receive_byte(0x5A);
    machine.step(1).unwrap();
    assert_eq!(counters.irqs(), 1);

    let status = machine.read(STATUS);
    assert_eq!(status & STATUS_IRQ, STATUS_IRQ);
    assert_eq!(status & (STATUS_RDRF | STATUS_TDRE), STATUS_RDRF | STATUS_TDRE);

    // IRQ bit cleared by the read, RDRF still set until data is read
    let status = machine.read(STATUS);
    assert_eq!(status & STATUS_IRQ, 0);
    assert_eq!(status & STATUS_RDRF, STATUS_RDRF);

    assert_eq!(machine.read(DATA), 0x5A);
    assert_eq!(machine.read(STATUS) & STATUS_RDRF, 0);
}

#[test]
fn test_second_byte_raises_new_edge() {
    let (cpu, counters) = ScriptedProcessor::with_script(vec![Op::Read(STATUS), Op::Read(DATA)]);
    let mut machine = Machine::new(cpu).unwrap();
    machine.reset();
    machine.write(COMMAND, 0x02).unwrap();

    machine.receive_byte(1);
    machine.step(1).unwrap();
    machine.receive_byte(2);
    machine.step(1).unwrap();

    // The handler acknowledged the first byte, so the second is a new edge
    assert_eq!(counters.irqs(), 2);
    assert_eq!(counters.reads()[1], 1);
    assert_eq!(counters.reads()[3], 2);
}

#[test]
fn test_transmit_interrupt_on_empty() {
    let (cpu, counters) = ScriptedProcessor::with_script(vec![Op::Write(DATA, b'.')]);
    let mut machine = Machine::new(cpu).unwrap();
    machine.reset();

    // TIC = 01
    machine.write(COMMAND, 0b0000_0100).unwrap();
    machine.step(1).unwrap();
    assert_eq!(counters.irqs(), 0);
    // Raised during the batch, delivered before the next
    machine.step(1).unwrap();
    assert_eq!(counters.irqs(), 1);
}

#[test]
fn test_programmed_reset() {
    let (cpu, _counters) = ScriptedProcessor::new();
    let mut machine = Machine::new(cpu).unwrap();
    machine.reset();

    machine.write(CONTROL, 0x1F).unwrap();
    machine.write(COMMAND, 0x0B).unwrap();
    machine.write(STATUS, 0x00).unwrap();

    assert_eq!(machine.read(COMMAND), 0x00);
    assert_eq!(machine.read(CONTROL), 0x1F);
    assert_eq!(machine.read(STATUS), STATUS_TDRE);

    // Hardware reset clears control too
    machine.reset();
    assert_eq!(machine.read(CONTROL), 0x00);
}

#[test]
fn test_failing_listener_keeps_running() {
    let (cpu, counters) = ScriptedProcessor::with_script(vec![Op::Write(DATA, b'x')]);
    let mut machine = Machine::new(cpu).unwrap();
    machine.set_transmit_listener(|_| anyhow::bail!("terminal went away"));
    machine.reset();

    for _ in 0..3 {
        machine.step(1).unwrap();
    }
    assert_eq!(counters.runs(), 3);
    assert_eq!(machine.acia().unwrap().last_transmitted(), b'x');
    assert!(machine.take_faults().is_empty());
}

#[test]
fn test_registers_visible_in_memory() {
    let (cpu, _counters) = ScriptedProcessor::new();
    let mut machine = Machine::new(cpu).unwrap();
    machine.reset();

    machine.write(CONTROL, 0x1E).unwrap();
    machine.receive_byte(b'q');

    let mem = machine.memory();
    assert_eq!(mem[DATA as usize], b'q');
    assert_eq!(mem[STATUS as usize], STATUS_TDRE | STATUS_RDRF);
    assert_eq!(mem[CONTROL as usize], 0x1E);
}
