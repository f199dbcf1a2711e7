//! W65C51 ACIA serial controller.
//!
//! Provides serial communication via four memory-mapped registers, with a
//! receive FIFO fed by an external transport adapter and a transmit listener
//! that forwards outgoing bytes to it.

use super::{BusError, Device, DeviceContext};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

/// Status register: interrupt request pending.
pub const STATUS_IRQ: u8 = 0b1000_0000;
/// Status register: transmit data register empty.
pub const STATUS_TDRE: u8 = 0b0001_0000;
/// Status register: receive data register full.
pub const STATUS_RDRF: u8 = 0b0000_1000;

/// Command register: receiver interrupt enable.
pub const COMMAND_RX_IRQ: u8 = 0b0000_0010;
/// Command register: transmit interrupt control field (bits 2-3).
pub const COMMAND_TIC_MASK: u8 = 0b0000_1100;
/// Transmit interrupt control value selecting "interrupt when TDRE".
pub const TIC_IRQ_ON_EMPTY: u8 = 0b01;

/// Register index of the data register.
pub const REG_DATA: u16 = 0;
/// Register index of the status register (reads) / programmed reset (writes).
pub const REG_STATUS: u16 = 1;
/// Register index of the command register.
pub const REG_COMMAND: u16 = 2;
/// Register index of the control register.
pub const REG_CONTROL: u16 = 3;

/// Status value after power-on and after either reset: transmitter empty.
const STATUS_RESET: u8 = STATUS_TDRE;

/// Default receive FIFO capacity.
pub const DEFAULT_RX_CAPACITY: usize = 4096;

/// Sink for transmitted bytes, installed by a transport adapter.
pub type TransmitListener = Box<dyn FnMut(u8) -> anyhow::Result<()> + Send>;

/// W65C51 ACIA serial controller.
///
/// ## Register Map (offsets from device base address)
///
/// | Offset | Read | Write |
/// |--------|------|-------|
/// | 0 | Receive data, clears RDRF | Transmit data |
/// | 1 | Status, clears IRQ bit | Programmed reset |
/// | 2 | Command | Command |
/// | 3 | Control | Control |
///
/// ## Status Register
///
/// | Bit | Name | Description |
/// |-----|------|-------------|
/// | 7 | IRQ  | Interrupt pending, cleared when the status register is read |
/// | 4 | TDRE | Transmit data register empty |
/// | 3 | RDRF | Receive data register full, cleared when data is read |
///
/// ## Command Register
///
/// | Bit | Description |
/// |-----|-------------|
/// | 3-2 | Transmit interrupt control, `01` = IRQ when the transmitter empties |
/// | 1 | Receiver interrupt enable |
///
/// The control register (baud rate, word format) is stored but does not
/// change how bytes move.
///
/// ## Receive Path
///
/// Bytes from the transport are queued with `enqueue_received_byte`. `poll`
/// moves one byte from the queue into the receive data register whenever RDRF
/// is clear, raising the interrupt line if receive interrupts are enabled.
///
/// # Example
///
/// ```rust
/// use burisim::{Acia6551, DeviceContext, InterruptAggregator, MemoryImage};
/// use burisim::devices::uart::STATUS_RDRF;
///
/// let mut memory = MemoryImage::new();
/// let mut irq = InterruptAggregator::new();
/// let line = irq.register_line("acia");
/// let mut ctx = DeviceContext::new(&mut memory, &mut irq, line, None);
///
/// let mut acia = Acia6551::new();
/// acia.enqueue_received_byte(b'A', &mut ctx);
///
/// assert_eq!(acia.status() & STATUS_RDRF, STATUS_RDRF);
/// assert_eq!(acia.read_register(0, &mut ctx).unwrap(), b'A');
/// assert_eq!(acia.status() & STATUS_RDRF, 0);
/// ```
pub struct Acia6551 {
    rx_data: u8,
    tx_data: u8,
    status: u8,
    command: u8,
    control: u8,

    rx_queue: VecDeque<u8>,
    rx_capacity: usize,

    listener: Option<TransmitListener>,
}

impl Acia6551 {
    /// Creates an ACIA in its power-on state with the default FIFO capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RX_CAPACITY)
    }

    /// Creates an ACIA whose receive FIFO holds at most `rx_capacity` bytes.
    pub fn with_capacity(rx_capacity: usize) -> Self {
        Self {
            rx_data: 0x00,
            tx_data: 0x00,
            status: STATUS_RESET,
            command: 0x00,
            control: 0x00,
            rx_queue: VecDeque::new(),
            rx_capacity,
            listener: None,
        }
    }

    /// Installs the transmit listener, replacing any previous one.
    ///
    /// The listener runs synchronously on the thread stepping the machine and
    /// must not block. An `Err` is logged and otherwise ignored.
    pub fn set_transmit_listener<F>(&mut self, listener: F)
    where
        F: FnMut(u8) -> anyhow::Result<()> + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Removes the transmit listener; transmitted bytes are discarded.
    pub fn clear_transmit_listener(&mut self) {
        self.listener = None;
    }

    /// Current status register value, without read side effects.
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Current command register value.
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Current control register value.
    pub fn control(&self) -> u8 {
        self.control
    }

    /// Last byte written to the transmit data register.
    pub fn last_transmitted(&self) -> u8 {
        self.tx_data
    }

    /// Number of received bytes still waiting in the FIFO.
    pub fn rx_queue_len(&self) -> usize {
        self.rx_queue.len()
    }

    /// Queues a byte arriving from the transport and polls immediately, so the
    /// byte reaches the receive data register within one poll.
    ///
    /// Bytes arriving while the FIFO is full are dropped.
    pub fn enqueue_received_byte(&mut self, byte: u8, ctx: &mut DeviceContext<'_>) {
        if self.rx_queue.len() >= self.rx_capacity {
            log::warn!("serial receive overflow: dropping input byte ${byte:02X}");
        } else {
            self.rx_queue.push_back(byte);
        }
        self.poll(ctx);
    }

    /// Moves the next queued byte into the receive data register if it is empty.
    pub fn poll(&mut self, ctx: &mut DeviceContext<'_>) {
        if self.status & STATUS_RDRF != 0 {
            return;
        }
        let Some(byte) = self.rx_queue.pop_front() else {
            return;
        };

        self.rx_data = byte;
        self.status |= STATUS_RDRF;
        if self.command & COMMAND_RX_IRQ != 0 {
            self.raise_irq(ctx);
        }
        self.mirror_registers(ctx);
    }

    /// Transmits a byte.
    ///
    /// If the transmitter is still busy (TDRE clear) the byte is dropped.
    /// Otherwise TDRE is cleared, the byte is handed to the listener, TDRE is
    /// set again and, if the transmit interrupt control selects it, the
    /// interrupt line is raised. A listener that fails or panics is logged
    /// and does not stop the transmission.
    pub fn transmit(&mut self, value: u8, ctx: &mut DeviceContext<'_>) {
        if self.status & STATUS_TDRE == 0 {
            log::warn!("serial port overflow: dropping output byte ${value:02X}");
            return;
        }

        self.status &= !STATUS_TDRE;
        self.tx_data = value;

        if let Some(listener) = self.listener.as_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("serial transmit listener failed: {err:#}"),
                Err(_) => log::warn!("serial transmit listener panicked"),
            }
        }

        self.status |= STATUS_TDRE;

        if self.transmit_irq_control() == TIC_IRQ_ON_EMPTY {
            self.raise_irq(ctx);
        }
        self.mirror_registers(ctx);
    }

    /// Hardware reset: status, command and control return to power-on values.
    pub fn hw_reset(&mut self, ctx: &mut DeviceContext<'_>) {
        self.status = STATUS_RESET;
        self.command = 0x00;
        self.control = 0x00;
        ctx.set_irq(false);
        self.mirror_registers(ctx);
    }

    /// Programmed reset: like a hardware reset but the control register is kept.
    pub fn prog_reset(&mut self, ctx: &mut DeviceContext<'_>) {
        self.status = STATUS_RESET;
        self.command = 0x00;
        ctx.set_irq(false);
        self.mirror_registers(ctx);
    }

    /// Reads a register by index (RS1/RS0).
    pub fn read_register(
        &mut self,
        index: u16,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<u8, BusError> {
        let value = match index {
            REG_DATA => {
                let value = self.rx_data;
                self.status &= !STATUS_RDRF;
                self.poll(ctx);
                value
            }
            REG_STATUS => {
                self.poll(ctx);
                let value = self.status;
                self.status &= !STATUS_IRQ;
                ctx.set_irq(false);
                value
            }
            REG_COMMAND => self.command,
            REG_CONTROL => self.control,
            _ => return Err(self.no_such_register(index)),
        };
        self.mirror_registers(ctx);
        Ok(value)
    }

    /// Writes a register by index (RS1/RS0).
    pub fn write_register(
        &mut self,
        index: u16,
        value: u8,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), BusError> {
        match index {
            REG_DATA => self.transmit(value, ctx),
            REG_STATUS => self.prog_reset(ctx),
            REG_COMMAND => {
                self.command = value;
                self.evaluate_irq(ctx);
                self.mirror_registers(ctx);
            }
            REG_CONTROL => {
                self.control = value;
                self.mirror_registers(ctx);
            }
            _ => return Err(self.no_such_register(index)),
        }
        Ok(())
    }

    fn transmit_irq_control(&self) -> u8 {
        (self.command & COMMAND_TIC_MASK) >> 2
    }

    fn raise_irq(&mut self, ctx: &mut DeviceContext<'_>) {
        self.status |= STATUS_IRQ;
        ctx.set_irq(true);
    }

    /// Re-checks interrupt conditions after the command register changed.
    fn evaluate_irq(&mut self, ctx: &mut DeviceContext<'_>) {
        let rx_enabled = self.command & COMMAND_RX_IRQ != 0;
        let tx_enabled = self.transmit_irq_control() == TIC_IRQ_ON_EMPTY;

        if rx_enabled && self.status & STATUS_RDRF != 0 {
            self.raise_irq(ctx);
        } else if !rx_enabled && !tx_enabled {
            self.status &= !STATUS_IRQ;
            ctx.set_irq(false);
        }
    }

    fn mirror_registers(&self, ctx: &mut DeviceContext<'_>) {
        ctx.mirror(REG_DATA, self.rx_data);
        ctx.mirror(REG_STATUS, self.status);
        ctx.mirror(REG_COMMAND, self.command);
        ctx.mirror(REG_CONTROL, self.control);
    }

    fn no_such_register(&self, index: u16) -> BusError {
        BusError::NoSuchRegister {
            device: self.name(),
            index,
        }
    }
}

impl Default for Acia6551 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Acia6551 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acia6551")
            .field("rx_data", &self.rx_data)
            .field("status", &self.status)
            .field("command", &self.command)
            .field("control", &self.control)
            .field("rx_queue", &self.rx_queue.len())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl Device for Acia6551 {
    fn name(&self) -> &'static str {
        "acia6551"
    }

    fn size(&self) -> u16 {
        4 // data, status, command, control
    }

    fn read(&mut self, offset: u16, ctx: &mut DeviceContext<'_>) -> Result<u8, BusError> {
        self.read_register(offset, ctx)
    }

    fn write(
        &mut self,
        offset: u16,
        value: u8,
        ctx: &mut DeviceContext<'_>,
    ) -> Result<(), BusError> {
        self.write_register(offset, value, ctx)
    }

    fn poll(&mut self, ctx: &mut DeviceContext<'_>) {
        Acia6551::poll(self, ctx);
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        self.hw_reset(ctx);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
