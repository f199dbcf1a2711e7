//! # Address Dispatch
//!
//! The `AddressDispatcher` owns the memory image, the attached devices and
//! their interrupt lines, and routes every bus access to at most one device.
//!
//! ## Dispatch Tables
//!
//! There is one table per access kind (read, write, call), each with a slot
//! for every one of the 65536 addresses. Registering a handler fills the slots
//! of its range, overwriting whatever was registered there before, so the last
//! registration covering an address wins and lookup at access time is a
//! single index:
//!
//! ```text
//! register_handler(0x1000, 0x1000, Write, A)   0x1000..0x2000 -> A
//! register_handler(0x1800, 0x0100, Write, B)   0x1800..0x1900 -> B
//!
//! write 0x1850  -> B (offset 0x50)
//! write 0x1200  -> A (offset 0x200)
//! ```
//!
//! Addresses without a handler fall through to the raw image (reads and
//! writes) or do nothing (calls).

use crate::devices::interrupts::{InterruptAggregator, LineId};
use crate::devices::{BusError, Device, DeviceContext};
use crate::memory::{MemoryBus, MemoryImage, ADDRESS_SPACE};
use crate::MachineError;
use std::collections::VecDeque;

/// Maximum number of faults kept between drains; older ones are discarded.
pub const FAULT_LOG_CAPACITY: usize = 256;

/// The kind of bus event a handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Data read
    Read,
    /// Data write
    Write,
    /// Control transfer (JSR/JMP target)
    Call,
}

impl AccessKind {
    fn index(self) -> usize {
        match self {
            AccessKind::Read => 0,
            AccessKind::Write => 1,
            AccessKind::Call => 2,
        }
    }
}

/// Handle to a device attached to an `AddressDispatcher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

impl DeviceId {
    /// Position of the device in attach order.
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Route {
    device: DeviceId,
    start: u16,
}

struct Slot {
    device: Box<dyn Device>,
    line: LineId,
    home: Option<u16>,
}

/// Routes bus accesses to devices through per-address dispatch tables.
///
/// # Examples
///
/// ```rust
/// use burisim::{AccessKind, Acia6551, AddressDispatcher, MemoryBus};
///
/// let mut bus = AddressDispatcher::new();
/// let acia = bus.attach(Acia6551::new());
/// bus.map_device(0xDFFC, acia).unwrap();
///
/// // Status register: TDRE set after power-on
/// assert_eq!(bus.read(0xDFFD) & 0x10, 0x10);
///
/// // Unmapped addresses are plain RAM
/// bus.write(0x0200, 0x42).unwrap();
/// assert_eq!(bus.read(0x0200), 0x42);
/// ```
pub struct AddressDispatcher {
    image: MemoryImage,
    slots: Vec<Slot>,
    tables: [Box<[Option<Route>]>; 3],
    interrupts: InterruptAggregator,
    faults: VecDeque<BusError>,
}

impl AddressDispatcher {
    /// Creates a dispatcher with a zeroed image and no handlers.
    pub fn new() -> Self {
        let table = || vec![None; ADDRESS_SPACE].into_boxed_slice();
        Self {
            image: MemoryImage::new(),
            slots: Vec::new(),
            tables: [table(), table(), table()],
            interrupts: InterruptAggregator::new(),
            faults: VecDeque::new(),
        }
    }

    /// Takes ownership of a device and allocates its interrupt line.
    ///
    /// The device receives no accesses until ranges are registered for it.
    pub fn attach<D: Device>(&mut self, device: D) -> DeviceId {
        let line = self.interrupts.register_line(device.name());
        self.slots.push(Slot {
            device: Box::new(device),
            line,
            home: None,
        });
        DeviceId(self.slots.len() - 1)
    }

    /// Registers `device` as the `kind` handler for `[start, start + length)`.
    ///
    /// Every address in the range is overwritten, replacing any handler of the
    /// same kind registered earlier. The device sees addresses relative to
    /// `start`.
    ///
    /// # Errors
    ///
    /// * `MachineError::InvalidRange` - range runs past 0xFFFF
    /// * `MachineError::UnknownDevice` - `device` was not attached here
    pub fn register_handler(
        &mut self,
        start: u16,
        length: usize,
        kind: AccessKind,
        device: DeviceId,
    ) -> Result<(), MachineError> {
        if device.0 >= self.slots.len() {
            return Err(MachineError::UnknownDevice(device.0));
        }
        let first = start as usize;
        let end = first
            .checked_add(length)
            .filter(|&end| end <= ADDRESS_SPACE)
            .ok_or(MachineError::InvalidRange { start, length })?;

        let route = Some(Route { device, start });
        self.tables[kind.index()][first..end].fill(route);

        log::debug!(
            "{:?} ${:04X}-${:04X} -> {}",
            kind,
            start,
            end.saturating_sub(1),
            self.slots[device.0].device.name()
        );
        Ok(())
    }

    /// Registers `device` for reads and writes over `device.size()` bytes at
    /// `start` and records `start` as its home base for register mirroring.
    pub fn map_device(&mut self, start: u16, device: DeviceId) -> Result<(), MachineError> {
        let size = self
            .slots
            .get(device.0)
            .ok_or(MachineError::UnknownDevice(device.0))?
            .device
            .size() as usize;

        self.register_handler(start, size, AccessKind::Read, device)?;
        self.register_handler(start, size, AccessKind::Write, device)?;
        self.slots[device.0].home = Some(start);
        Ok(())
    }

    /// Device currently handling `kind` accesses at `addr`.
    pub fn handler_at(&self, addr: u16, kind: AccessKind) -> Option<DeviceId> {
        self.tables[kind.index()][addr as usize].map(|route| route.device)
    }

    /// Shared access to an attached device of concrete type `T`.
    pub fn device<T: Device>(&self, id: DeviceId) -> Option<&T> {
        self.slots.get(id.0)?.device.as_any().downcast_ref::<T>()
    }

    /// Exclusive access to an attached device of concrete type `T`.
    ///
    /// Use `with_device` instead when the operation may touch the device's
    /// interrupt line or the memory image.
    pub fn device_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        self.slots
            .get_mut(id.0)?
            .device
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// Runs `f` with a device of type `T` and its `DeviceContext`.
    ///
    /// Returns `None` if `id` is unknown or the device is not a `T`.
    pub fn with_device<T, R>(
        &mut self,
        id: DeviceId,
        f: impl FnOnce(&mut T, &mut DeviceContext<'_>) -> R,
    ) -> Option<R>
    where
        T: Device,
    {
        let Self {
            image,
            slots,
            interrupts,
            ..
        } = self;
        let slot = slots.get_mut(id.0)?;
        let device = slot.device.as_any_mut().downcast_mut::<T>()?;
        let mut ctx = DeviceContext::new(image, interrupts, slot.line, slot.home);
        Some(f(device, &mut ctx))
    }

    /// Dispatches a read. Faulting handlers are logged and the raw image
    /// byte is returned instead.
    pub fn dispatch_read(&mut self, addr: u16) -> u8 {
        let Some(route) = self.tables[AccessKind::Read.index()][addr as usize] else {
            return self.image.read(addr);
        };
        let Self {
            image,
            slots,
            interrupts,
            faults,
            ..
        } = self;
        let slot = &mut slots[route.device.0];
        let mut ctx = DeviceContext::new(image, interrupts, slot.line, slot.home);
        match slot.device.read(addr.wrapping_sub(route.start), &mut ctx) {
            Ok(value) => value,
            Err(err) => {
                record_fault(faults, err);
                image.read(addr)
            }
        }
    }

    /// Dispatches a write.
    ///
    /// # Errors
    ///
    /// Returns the handler's `BusError`; the fault is also recorded in the
    /// fault log.
    pub fn dispatch_write(&mut self, addr: u16, value: u8) -> Result<(), BusError> {
        let Some(route) = self.tables[AccessKind::Write.index()][addr as usize] else {
            self.image.write(addr, value);
            return Ok(());
        };
        let Self {
            image,
            slots,
            interrupts,
            faults,
            ..
        } = self;
        let slot = &mut slots[route.device.0];
        let mut ctx = DeviceContext::new(image, interrupts, slot.line, slot.home);
        slot.device
            .write(addr.wrapping_sub(route.start), value, &mut ctx)
            .inspect_err(|&err| record_fault(faults, err))
    }

    /// Dispatches a control transfer notification.
    pub fn dispatch_call(&mut self, addr: u16) {
        let Some(route) = self.tables[AccessKind::Call.index()][addr as usize] else {
            return;
        };
        let Self {
            image,
            slots,
            interrupts,
            ..
        } = self;
        let slot = &mut slots[route.device.0];
        let mut ctx = DeviceContext::new(image, interrupts, slot.line, slot.home);
        slot.device.call(addr.wrapping_sub(route.start), &mut ctx);
    }

    /// Polls every attached device once, in attach order.
    pub fn poll_devices(&mut self) {
        let Self {
            image,
            slots,
            interrupts,
            ..
        } = self;
        for slot in slots.iter_mut() {
            let mut ctx = DeviceContext::new(image, interrupts, slot.line, slot.home);
            slot.device.poll(&mut ctx);
        }
    }

    /// Resets every attached device, in attach order, then clears any
    /// interrupt edge still latched from before the reset.
    pub fn reset_devices(&mut self) {
        let Self {
            image,
            slots,
            interrupts,
            ..
        } = self;
        for slot in slots.iter_mut() {
            let mut ctx = DeviceContext::new(image, interrupts, slot.line, slot.home);
            slot.device.reset(&mut ctx);
        }
        interrupts.clear();
    }

    /// The interrupt lines of all attached devices.
    pub fn interrupts(&self) -> &InterruptAggregator {
        &self.interrupts
    }

    /// Mutable access to the interrupt lines.
    pub fn interrupts_mut(&mut self) -> &mut InterruptAggregator {
        &mut self.interrupts
    }

    /// The memory image.
    pub fn image(&self) -> &MemoryImage {
        &self.image
    }

    /// The memory image, for raw bulk loads.
    pub fn image_mut(&mut self) -> &mut MemoryImage {
        &mut self.image
    }

    /// Removes and returns every recorded fault, oldest first.
    pub fn take_faults(&mut self) -> Vec<BusError> {
        self.faults.drain(..).collect()
    }

    /// Number of faults waiting to be drained.
    pub fn fault_count(&self) -> usize {
        self.faults.len()
    }

    /// Number of attached devices.
    pub fn device_count(&self) -> usize {
        self.slots.len()
    }
}

fn record_fault(faults: &mut VecDeque<BusError>, err: BusError) {
    if faults.len() == FAULT_LOG_CAPACITY {
        faults.pop_front();
    }
    faults.push_back(err);
}

impl Default for AddressDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AddressDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.slots.iter().map(|s| s.device.name()).collect();
        f.debug_struct("AddressDispatcher")
            .field("devices", &names)
            .field("faults", &self.faults.len())
            .finish()
    }
}

impl MemoryBus for AddressDispatcher {
    fn read(&mut self, addr: u16) -> u8 {
        self.dispatch_read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) -> Result<(), BusError> {
        self.dispatch_write(addr, value)
    }

    fn call(&mut self, addr: u16) {
        self.dispatch_call(addr);
    }

    fn peek(&self, addr: u16) -> u8 {
        self.image.read(addr)
    }

    fn poke(&mut self, addr: u16, value: u8) {
        self.image.write(addr, value);
    }
}
