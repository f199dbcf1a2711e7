//! HD44780 character LCD controller.
//!
//! Only the register interface and display RAM are modelled; turning DDRAM
//! contents into pixels is left to the front-end.

use super::{BusError, Device, DeviceContext};
use std::any::Any;

/// Size of the display data RAM.
pub const DDRAM_SIZE: usize = 128;

const INSTR_SET_DDRAM_ADDR: u8 = 0x80;
const INSTR_CLEAR: u8 = 0x01;
const INSTR_HOME: u8 = 0x02;

/// Register index of the instruction/status register.
pub const REG_INSTRUCTION: u16 = 0;
/// Register index of the data register.
pub const REG_DATA: u16 = 1;

/// Copy of the display state handed to front-ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplaySnapshot {
    /// Display data RAM. Rows of a 20x4 panel start at 0, 64, 20 and 84.
    pub ddram: [u8; DDRAM_SIZE],
    /// Address counter.
    pub cursor_index: u8,
}

/// Called after every register write that may have changed the display.
pub type UpdateListener = Box<dyn FnMut(&DisplaySnapshot) + Send>;

/// HD44780-compatible LCD controller with two registers.
///
/// | Offset | Write | Read |
/// |--------|-------|------|
/// | 0 | Instruction | Address counter (busy flag always clear) |
/// | 1 | Data into DDRAM, advances counter | Data from DDRAM, advances counter |
///
/// Supported instructions: set DDRAM address (bit 7), clear display (0x01),
/// return home (bit 1). Others are accepted and ignored.
pub struct Hd44780 {
    ddram: [u8; DDRAM_SIZE],
    cursor_index: u8,
    listener: Option<UpdateListener>,
}

impl Hd44780 {
    /// Creates a controller with a blank display.
    pub fn new() -> Self {
        Self {
            ddram: [b' '; DDRAM_SIZE],
            cursor_index: 0,
            listener: None,
        }
    }

    /// Installs the change listener.
    pub fn set_update_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&DisplaySnapshot) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Current display contents.
    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            ddram: self.ddram,
            cursor_index: self.cursor_index,
        }
    }

    /// Blanks the display and homes the cursor.
    pub fn clear(&mut self) {
        self.ddram = [b' '; DDRAM_SIZE];
        self.cursor_index = 0;
    }

    fn advance(&mut self) {
        self.cursor_index = (self.cursor_index + 1) & 0x7F;
    }

    fn instruction(&mut self, value: u8) {
        if value & INSTR_SET_DDRAM_ADDR != 0 {
            self.cursor_index = value & 0x7F;
        } else if value == INSTR_CLEAR {
            self.clear();
        } else if value & INSTR_HOME != 0 {
            self.cursor_index = 0;
        }
    }

    fn notify(&mut self) {
        if self.listener.is_some() {
            let snapshot = self.snapshot();
            if let Some(listener) = self.listener.as_mut() {
                listener(&snapshot);
            }
        }
    }
}

impl Default for Hd44780 {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Hd44780 {
    fn name(&self) -> &'static str {
        "hd44780"
    }

    fn size(&self) -> u16 {
        2
    }

    fn read(&mut self, offset: u16, _ctx: &mut DeviceContext<'_>) -> Result<u8, BusError> {
        match offset {
            REG_INSTRUCTION => Ok(self.cursor_index),
            REG_DATA => {
                let value = self.ddram[self.cursor_index as usize % DDRAM_SIZE];
                self.advance();
                Ok(value)
            }
            index => Err(BusError::NoSuchRegister {
                device: self.name(),
                index,
            }),
        }
    }

    fn write(
        &mut self,
        offset: u16,
        value: u8,
        _ctx: &mut DeviceContext<'_>,
    ) -> Result<(), BusError> {
        match offset {
            REG_INSTRUCTION => self.instruction(value),
            REG_DATA => {
                if let Some(cell) = self.ddram.get_mut(self.cursor_index as usize) {
                    *cell = value;
                }
                self.advance();
            }
            index => {
                return Err(BusError::NoSuchRegister {
                    device: self.name(),
                    index,
                })
            }
        }
        self.notify();
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {
        self.clear();
        self.notify();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
