//! Architectural exceptions and their delivery.
//!
//! Executors never jump to vectors themselves: they return an `Exception`
//! through `Result` and the step loop applies the side effects here
//! (DAR/DSISR capture, SRR0/SRR1 save, MSR gating, vector jump). Nested
//! delivery (an exception while interrupt mode is set) is logged, dropped
//! and halts the core; it never recurses.

use std::fmt;

use crate::cpu::Ppc;
use crate::registers::{MSR_DR, MSR_EE, MSR_IR, MSR_PR};

/// Why a Program exception (vector 0x700) was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramCause {
    /// Reserved or unimplemented opcode combination.
    UnsupportedOpcode { opcd: u8, xo: u16 },
    /// An executor received a word whose format contradicts its contract.
    /// Indicates a decoder bug.
    InvalidFormat { opcd: u8, xo: u16 },
    /// Update-form load/store with RA == 0.
    InvalidUpdate,
    /// A trap instruction's TO condition matched.
    Trap,
    /// Ordered FP compare saw a NaN operand.
    FpCompare,
}

/// An architectural exception with its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Reset,
    MachineCheck,
    /// Data storage: translation or protection fault on a data access.
    Dsi { ea: u32, dsisr: u32 },
    /// Instruction storage: translation fault on a fetch.
    Isi,
    External,
    Alignment { ea: u32 },
    Program(ProgramCause),
    FpUnavailable,
    Decrementer,
    Syscall,
    Trace,
}

impl Exception {
    /// Fixed vector address for this exception kind.
    #[must_use]
    pub const fn vector(&self) -> u32 {
        match self {
            Self::Reset => 0x000,
            Self::MachineCheck => 0x100,
            Self::Dsi { .. } => 0x300,
            Self::Isi => 0x400,
            Self::External => 0x500,
            Self::Alignment { .. } => 0x600,
            Self::Program(_) => 0x700,
            Self::FpUnavailable => 0x800,
            Self::Decrementer => 0x900,
            Self::Syscall => 0xC00,
            Self::Trace => 0xD00,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => write!(f, "reset"),
            Self::MachineCheck => write!(f, "machine check"),
            Self::Dsi { ea, dsisr } => write!(f, "DSI at {ea:#010X} (DSISR {dsisr:#010X})"),
            Self::Isi => write!(f, "ISI"),
            Self::External => write!(f, "external interrupt"),
            Self::Alignment { ea } => write!(f, "alignment at {ea:#010X}"),
            Self::Program(ProgramCause::UnsupportedOpcode { opcd, xo }) => {
                write!(f, "program: unsupported opcode {opcd} xo {xo}")
            }
            Self::Program(ProgramCause::InvalidFormat { opcd, xo }) => {
                write!(f, "program: invalid format for opcode {opcd} xo {xo}")
            }
            Self::Program(ProgramCause::InvalidUpdate) => {
                write!(f, "program: update form with RA=0")
            }
            Self::Program(ProgramCause::Trap) => write!(f, "program: trap"),
            Self::Program(ProgramCause::FpCompare) => write!(f, "program: ordered NaN compare"),
            Self::FpUnavailable => write!(f, "floating-point unavailable"),
            Self::Decrementer => write!(f, "decrementer"),
            Self::Syscall => write!(f, "system call"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

impl Ppc {
    /// Deliver an exception raised by the current instruction.
    ///
    /// Saves (PC, MSR) into (SRR0, SRR1), captures DAR/DSISR for data
    /// faults, clears the MSR gates and redirects execution to the vector.
    /// System calls resume after the `sc` word, everything else re-reports
    /// the faulting PC.
    pub(crate) fn deliver(&mut self, exc: &Exception) {
        if self.interrupt_mode {
            self.drop_nested(exc);
            return;
        }

        match *exc {
            Exception::Dsi { ea, dsisr } => {
                self.regs.dar = ea;
                self.regs.dsisr = dsisr;
            }
            Exception::Alignment { ea } => {
                self.regs.dar = ea;
                self.regs.dsisr = 0;
            }
            _ => {}
        }

        self.regs.srr0 = if matches!(exc, Exception::Syscall) {
            self.regs.pc.wrapping_add(4)
        } else {
            self.regs.pc
        };
        self.regs.srr1 = self.regs.msr;

        self.regs.msr &= !(MSR_EE | MSR_IR | MSR_DR);
        if matches!(exc, Exception::Syscall) {
            self.regs.msr &= !MSR_PR;
        }

        self.next_pc = exc.vector();
        self.interrupt_mode = true;
    }

    /// An exception fired while one was already being serviced. Nesting
    /// is not allowed: record the event and stop the core.
    fn drop_nested(&mut self, exc: &Exception) {
        #[cfg(debug_assertions)]
        {
            if self.nested_drop_count < 16 {
                eprintln!(
                    "  PPC nested exception dropped: {exc} at pc={:#010X}",
                    self.regs.pc
                );
            }
        }
        self.nested_drop_count = self.nested_drop_count.saturating_add(1);
        self.halt_with(format!(
            "nested exception: {exc} at pc={:#010X} word={:#010X}",
            self.regs.pc, self.current_word
        ));
    }

    /// Return from interrupt: restore (PC, MSR) from (SRR0, SRR1)
    /// atomically and leave interrupt mode.
    pub(crate) fn return_from_interrupt(&mut self) {
        self.regs.msr = self.regs.srr1;
        self.next_pc = self.regs.srr0 & !3;
        self.interrupt_mode = false;
    }
}
