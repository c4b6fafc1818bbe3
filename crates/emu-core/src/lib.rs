//! Core traits and types for the emulator workspace.
//!
//! Everything addresses a flat 32-bit physical space, big-endian on the
//! wire. CPU cores execute whole instructions per step; there is no
//! cycle-level timing model.

mod bus;
mod cpu;
mod observable;
mod ticks;

pub use bus::{Bus, SimpleBus};
pub use cpu::Cpu;
pub use observable::{Observable, Value};
pub use ticks::Ticks;
