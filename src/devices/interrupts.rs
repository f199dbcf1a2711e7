//! Interrupt line aggregation for memory-mapped devices.
//!
//! Every device attached to the bus owns one interrupt request line. The
//! `InterruptAggregator` keeps the state of all lines and combines them into the
//! single IRQ input of the processor.
//!
//! # Edge Detection
//!
//! The combined signal is the logical OR of all lines, but the processor is only
//! notified when that signal goes from "no line asserted" to "at least one line
//! asserted":
//!
//! | Before       | After        | Processor notified |
//! |--------------|--------------|--------------------|
//! | NoneAsserted | AnyAsserted  | yes, exactly once  |
//! | AnyAsserted  | AnyAsserted  | no                 |
//! | AnyAsserted  | NoneAsserted | no                 |
//!
//! Whether a still-asserted line gets serviced again is up to the processor's
//! own interrupt masking; the aggregator only watches the bus-level signal.
//!
//! Lines change while the engine is executing (a device register access raises
//! or lowers its line), so the rising edge is latched and delivered by the
//! machine before the next batch through `take_edge()`.
//!
//! # Example
//!
//! ```rust
//! use burisim::InterruptAggregator;
//!
//! let mut irq = InterruptAggregator::new();
//! let uart = irq.register_line("acia");
//! let timer = irq.register_line("timer");
//!
//! assert!(irq.set_line(uart, true)); // rising edge
//! assert!(!irq.set_line(timer, true)); // already asserted
//! assert!(irq.take_edge());
//! assert!(!irq.take_edge());
//! ```

/// Handle to one interrupt line, handed out by `InterruptAggregator::register_line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineId(usize);

impl LineId {
    /// Position of the line in registration order.
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct Line {
    name: String,
    asserted: bool,
}

/// Combines per-device interrupt lines into one edge-triggered processor IRQ.
#[derive(Debug, Default)]
pub struct InterruptAggregator {
    lines: Vec<Line>,
    asserted: usize,
    edge_pending: bool,
    edges: u64,
}

impl InterruptAggregator {
    /// Creates an aggregator with no lines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new line, initially not asserted.
    ///
    /// `name` is only used for diagnostics.
    pub fn register_line(&mut self, name: impl Into<String>) -> LineId {
        self.lines.push(Line {
            name: name.into(),
            asserted: false,
        });
        LineId(self.lines.len() - 1)
    }

    /// Sets the state of one line.
    ///
    /// Returns `true` if this call moved the combined signal from "none
    /// asserted" to "any asserted". That rising edge is also latched until
    /// `take_edge()` is called. A `line` not issued by this aggregator is
    /// ignored.
    pub fn set_line(&mut self, line: LineId, asserted: bool) -> bool {
        let Some(slot) = self.lines.get_mut(line.0) else {
            log::warn!("ignoring unknown interrupt line {}", line.0);
            return false;
        };
        if slot.asserted == asserted {
            return false;
        }
        slot.asserted = asserted;

        if asserted {
            self.asserted += 1;
            if self.asserted == 1 {
                log::trace!("IRQ raised by {}", slot.name);
                self.edge_pending = true;
                self.edges += 1;
                return true;
            }
        } else {
            self.asserted -= 1;
        }
        false
    }

    /// Current state of one line.
    pub fn line(&self, line: LineId) -> bool {
        self.lines.get(line.0).is_some_and(|l| l.asserted)
    }

    /// Name the line was registered with.
    pub fn line_name(&self, line: LineId) -> Option<&str> {
        self.lines.get(line.0).map(|l| l.name.as_str())
    }

    /// Combined (OR) state of all lines.
    pub fn is_asserted(&self) -> bool {
        self.asserted > 0
    }

    /// Returns and clears the latched rising edge.
    pub fn take_edge(&mut self) -> bool {
        std::mem::take(&mut self.edge_pending)
    }

    /// Total number of rising edges seen since construction.
    pub fn edge_count(&self) -> u64 {
        self.edges
    }

    /// Number of registered lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Deasserts every line and drops any latched edge.
    pub fn clear(&mut self) {
        for line in &mut self.lines {
            line.asserted = false;
        }
        self.asserted = 0;
        self.edge_pending = false;
    }
}
