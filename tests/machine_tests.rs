//! Integration tests for the wired buri machine.

mod common;

use burisim::{BusError, Hd44780, Machine, MachineError, MachineLayout};
use common::{recording_listener, Op, ScriptedProcessor};

#[test]
fn test_single_byte_rom_fills_range() {
    let (cpu, _counters) = ScriptedProcessor::new();
    let mut machine = Machine::new(cpu).unwrap();
    assert_eq!(machine.rom_size(), 8192);

    machine.load_rom(&[0x42]).unwrap();
    assert!(machine.memory()[0xE000..=0xFFFF].iter().all(|&b| b == 0x42));
}

#[test]
fn test_engine_cannot_write_rom() {
    let script = vec![Op::Write(0xE000, 0x00), Op::Write(0xFFFC, 0x00), Op::Write(0x0200, 0x01)];
    let (cpu, counters) = ScriptedProcessor::with_script(script);
    let mut machine = Machine::new(cpu).unwrap();
    machine.load_rom(&[0xEA]).unwrap();
    machine.reset();

    machine.step(100).unwrap();

    assert_eq!(counters.write_faults(), 2);
    assert_eq!(machine.peek(0xE000), 0xEA);
    assert_eq!(machine.peek(0xFFFC), 0xEA);
    assert_eq!(machine.peek(0x0200), 0x01);
    assert_eq!(
        machine.take_faults(),
        vec![
            BusError::ReadOnlyMemory {
                address: 0xE000,
                value: 0x00
            },
            BusError::ReadOnlyMemory {
                address: 0xFFFC,
                value: 0x00
            },
        ]
    );
    assert!(machine.take_faults().is_empty());
}

#[test]
fn test_load_ram_all_or_nothing() {
    let (cpu, _counters) = ScriptedProcessor::new();
    let mut machine = Machine::new(cpu).unwrap();

    let image = vec![0x11; 0x100];
    machine.load_ram(&image, 0xDF80).unwrap_err();
    assert!(machine.memory()[0xDF80..0xE000].iter().all(|&b| b == 0));

    machine.load_ram(&image, 0x0300).unwrap();
    assert_eq!(&machine.memory()[0x0300..0x0400], &image[..]);

    // Right up to the ROM is fine
    machine.load_ram(&[0x22; 4], 0xDFF8).unwrap();
    assert_eq!(machine.peek(0xDFFB), 0x22);
}

#[test]
fn test_load_ram_past_end_of_memory() {
    let (cpu, _counters) = ScriptedProcessor::new();
    let layout = MachineLayout {
        rom_base: 0xF000,
        acia_base: 0xEFFC,
    };
    let mut machine = Machine::with_layout(cpu, layout).unwrap();
    assert_eq!(machine.rom_size(), 0x1000);

    let err = machine.load_ram(&[0; 3], 0xFFFE).unwrap_err();
    assert!(matches!(
        err,
        MachineError::RamOutOfRange {
            address: 0xFFFE,
            len: 3
        }
    ));
}

#[test]
fn test_step_polls_then_runs() {
    // Reads the ACIA data register once per batch
    let (cpu, counters) = ScriptedProcessor::with_script(vec![Op::Read(0xDFFC)]);
    let mut machine = Machine::new(cpu).unwrap();
    assert!(matches!(machine.step(1), Err(MachineError::NotReset)));
    assert_eq!(counters.runs(), 0);

    machine.reset();
    machine.receive_byte(b'1');
    machine.receive_byte(b'2');

    assert_eq!(machine.step(500).unwrap(), 500);
    assert_eq!(machine.step(500).unwrap(), 500);
    assert_eq!(counters.reads(), b"12");
    assert_eq!(counters.ticks(), 1000);
}

#[test]
fn test_custom_layout() {
    let (cpu, _counters) = ScriptedProcessor::new();
    let layout = MachineLayout {
        rom_base: 0xC000,
        acia_base: 0x8000,
    };
    let mut machine = Machine::with_layout(cpu, layout).unwrap();
    machine.reset();

    assert_eq!(machine.layout(), layout);
    assert_eq!(machine.read(0x8001), 0x10);
    assert!(machine.write(0xC000, 0x00).is_err());
    // Old ACIA address is plain RAM now
    machine.write(0xDFFC, 0x99).unwrap();
    assert_eq!(machine.read(0xDFFC), 0x99);
}

#[test]
fn test_rom_load_skips_acia_inside_rom() {
    let (cpu, _counters) = ScriptedProcessor::new();
    let layout = MachineLayout {
        rom_base: 0xE000,
        acia_base: 0xFFF0,
    };
    let mut machine = Machine::with_layout(cpu, layout).unwrap();
    let (listener, sent) = recording_listener();
    machine.set_transmit_listener(listener);

    let image: Vec<u8> = (0..0x2000).map(|i| i as u8).collect();
    machine.load_rom(&image).unwrap();

    assert!(sent.lock().unwrap().is_empty());
    assert_eq!(&machine.memory()[0xFFF0..0xFFF4], &[0xF0, 0xF1, 0xF2, 0xF3]);
    let acia = machine.acia().unwrap();
    assert_eq!(acia.command(), 0x00);
    assert_eq!(acia.control(), 0x00);
    assert!(machine.take_faults().is_empty());
}

#[test]
fn test_lcd_attached_by_front_end() {
    let (cpu, _counters) = ScriptedProcessor::with_script(
        b"buri".iter().map(|&b| Op::Write(0xD001, b)).collect(),
    );
    let mut machine = Machine::new(cpu).unwrap();
    let lcd = machine.attach_device(0xD000, Hd44780::new()).unwrap();
    machine.reset();
    machine.step(1).unwrap();

    let snapshot = machine.device::<Hd44780>(lcd).unwrap().snapshot();
    assert_eq!(&snapshot.ddram[..4], b"buri");
    assert_eq!(snapshot.cursor_index, 4);
}

#[test]
fn test_nmi_reaches_engine() {
    let (cpu, counters) = ScriptedProcessor::new();
    let mut machine = Machine::new(cpu).unwrap();
    machine.nmi();
    assert_eq!(counters.nmis(), 1);
}
