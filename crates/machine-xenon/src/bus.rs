//! System bus: routes physical addresses to MMIO devices or RAM.
//!
//! The bus holds an ordered list of (range, endpoint) mappings; the first
//! match wins and everything else falls through to RAM. Known devices are
//! tagged variants so the machine can reach them without downcasting;
//! embedders can hang extra peripherals on the bus as trait objects.
//!
//! A word access is routed whole to one endpoint; device ranges must be
//! large enough that no word straddles a boundary.

use emu_core::Bus;

use crate::console::{Console, CONSOLE_SIZE};
use crate::framebuffer::{Framebuffer, CONTROL_BASE};
use crate::memory::Memory;

// === The example memory map ===
pub const CONSOLE_BASE: u32 = 0x0FFF_0000;
pub const FRAMEBUFFER_BASE: u32 = 0x1000_0000;
pub const FRAMEBUFFER_LINEAR_SIZE: u32 = 0x0025_8000;
pub const FRAMEBUFFER_CONTROL_BASE: u32 = 0xC800_0000;
pub const FRAMEBUFFER_CONTROL_SIZE: u32 = 0x2000;

/// An MMIO endpoint. Offsets are relative to the mapping (plus its bias).
pub trait Device {
    /// Whether the device decodes this offset.
    fn contains(&self, offset: u32) -> bool;
    fn read_byte(&mut self, offset: u32) -> u8;
    fn write_byte(&mut self, offset: u32, value: u8);
    fn read_word(&mut self, offset: u32) -> u32;
    fn write_word(&mut self, offset: u32, value: u32);
}

/// Known device set, with an escape hatch for external peripherals.
enum Endpoint {
    Console(Console),
    Framebuffer(Framebuffer),
    External(Box<dyn Device>),
}

impl Endpoint {
    fn as_device(&mut self) -> &mut dyn Device {
        match self {
            Self::Console(c) => c,
            Self::Framebuffer(f) => f,
            Self::External(d) => d.as_mut(),
        }
    }
}

struct Mapping {
    start: u32,
    end: u32,
    /// Added to `addr - start` before it reaches the endpoint; lets two
    /// windows share one device (the framebuffer's linear and control
    /// views).
    bias: u32,
    endpoint: usize,
}

/// The system bus.
pub struct XenonBus {
    pub ram: Memory,
    mappings: Vec<Mapping>,
    endpoints: Vec<Endpoint>,
}

impl XenonBus {
    /// Build the bus with the standard map: console MMIO, framebuffer
    /// linear window and framebuffer control alias over the given RAM.
    #[must_use]
    pub fn new(ram: Memory, framebuffer: Framebuffer) -> Self {
        let mut bus = Self {
            ram,
            mappings: Vec::new(),
            endpoints: Vec::new(),
        };

        let console = bus.add_endpoint(Endpoint::Console(Console::new()));
        bus.add_window(CONSOLE_BASE, CONSOLE_BASE + CONSOLE_SIZE - 1, 0, console);

        let fb = bus.add_endpoint(Endpoint::Framebuffer(framebuffer));
        bus.add_window(
            FRAMEBUFFER_BASE,
            FRAMEBUFFER_BASE + FRAMEBUFFER_LINEAR_SIZE - 1,
            0,
            fb,
        );
        bus.add_window(
            FRAMEBUFFER_CONTROL_BASE,
            FRAMEBUFFER_CONTROL_BASE + FRAMEBUFFER_CONTROL_SIZE - 1,
            CONTROL_BASE,
            fb,
        );
        bus
    }

    fn add_endpoint(&mut self, endpoint: Endpoint) -> usize {
        self.endpoints.push(endpoint);
        self.endpoints.len() - 1
    }

    fn add_window(&mut self, start: u32, end: u32, bias: u32, endpoint: usize) {
        self.mappings.push(Mapping {
            start,
            end,
            bias,
            endpoint,
        });
    }

    /// Attach an external peripheral at `[start, end]`.
    pub fn map_device(&mut self, start: u32, end: u32, device: Box<dyn Device>) {
        let endpoint = self.add_endpoint(Endpoint::External(device));
        self.add_window(start, end, 0, endpoint);
    }

    /// First mapping containing `addr`, as (endpoint index, device offset).
    fn route(&self, addr: u32) -> Option<(usize, u32)> {
        self.mappings
            .iter()
            .find(|m| addr >= m.start && addr <= m.end)
            .map(|m| (m.endpoint, addr - m.start + m.bias))
    }

    /// Console access for the embedder.
    pub fn console_mut(&mut self) -> &mut Console {
        self.endpoints
            .iter_mut()
            .find_map(|e| match e {
                Endpoint::Console(c) => Some(c),
                _ => None,
            })
            .expect("bus always carries a console")
    }

    /// Framebuffer access for the embedder/display.
    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        self.endpoints
            .iter()
            .find_map(|e| match e {
                Endpoint::Framebuffer(f) => Some(f),
                _ => None,
            })
            .expect("bus always carries a framebuffer")
    }

    pub fn framebuffer_mut(&mut self) -> &mut Framebuffer {
        self.endpoints
            .iter_mut()
            .find_map(|e| match e {
                Endpoint::Framebuffer(f) => Some(f),
                _ => None,
            })
            .expect("bus always carries a framebuffer")
    }
}

impl Bus for XenonBus {
    fn read_byte(&mut self, addr: u32) -> u8 {
        match self.route(addr) {
            Some((endpoint, offset)) => self.endpoints[endpoint].as_device().read_byte(offset),
            None => self.ram.read_byte(addr),
        }
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        match self.route(addr) {
            Some((endpoint, offset)) => {
                self.endpoints[endpoint].as_device().write_byte(offset, value);
            }
            None => self.ram.write_byte(addr, value),
        }
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        match self.route(addr) {
            Some((endpoint, offset)) => self.endpoints[endpoint].as_device().read_word(offset),
            None => self.ram.read_word(addr),
        }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        match self.route(addr) {
            Some((endpoint, offset)) => {
                self.endpoints[endpoint].as_device().write_word(offset, value);
            }
            None => self.ram.write_word(addr, value),
        }
    }
}
