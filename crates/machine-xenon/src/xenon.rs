//! Top-level Xenon machine.
//!
//! Owns the CPU and the bus, loads the program image, and runs the
//! single-threaded interpreter loop: one instruction per iteration, with
//! the stop flag and the instruction budget checked between instructions.
//! A display thread may observe the framebuffer and console through the
//! accessors at its own cadence; the core never blocks on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpu_ppc::{disasm, Ppc};
use emu_core::{Observable, Value};
use format_elf::{looks_like_elf, ElfImage, Symbol};

use crate::bus::XenonBus;
use crate::config::{ImageKind, XenonConfig};
use crate::framebuffer::Framebuffer;
use crate::memory::Memory;

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The core latched an unrecoverable fault.
    Halted,
    /// The instruction budget ran out.
    CycleBudget,
    /// The external stop flag was raised.
    Stopped,
}

/// The machine.
pub struct Xenon {
    cpu: Ppc,
    bus: XenonBus,
    stop: Arc<AtomicBool>,
    max_cycles: u64,
    symbols: Vec<Symbol>,
}

impl Xenon {
    /// Assemble a machine and load the configured image.
    ///
    /// # Errors
    ///
    /// Returns an error when the image does not parse or does not fit the
    /// configured memory.
    pub fn new(config: XenonConfig) -> Result<Self, String> {
        let memory = Memory::new(config.memory_size);
        let framebuffer = Framebuffer::new(config.fb_width, config.fb_height);
        let bus = XenonBus::new(memory, framebuffer);
        let cpu = Ppc::with_policy(config.memory_size as u32, config.write_policy);

        let mut machine = Self {
            cpu,
            bus,
            stop: Arc::new(AtomicBool::new(false)),
            max_cycles: config.max_cycles,
            symbols: Vec::new(),
        };

        let treat_as_elf = match config.kind {
            ImageKind::Elf => true,
            ImageKind::Raw => false,
            ImageKind::Auto => looks_like_elf(&config.image),
        };
        if treat_as_elf {
            machine.load_elf(&config.image)?;
        } else {
            machine.load_raw(&config.image)?;
        }

        // Programs start in real mode with the FPU usable
        machine.cpu.regs.msr = cpu_ppc::registers::MSR_FP;
        Ok(machine)
    }

    /// Place ELF PT_LOAD segments and take the entry point.
    fn load_elf(&mut self, image: &[u8]) -> Result<(), String> {
        let elf = ElfImage::from_bytes(image).map_err(|e| e.to_string())?;
        let mask = (self.bus.ram.size() - 1) as u32;

        for segment in &elf.segments {
            let paddr = (segment.paddr as u32) & mask;
            self.bus
                .ram
                .write_block(paddr, &segment.data)
                .map_err(|e| e.to_string())?;
            let tail = segment.mem_size.saturating_sub(segment.data.len() as u64) as usize;
            if tail > 0 {
                self.bus
                    .ram
                    .zero_fill(paddr.wrapping_add(segment.data.len() as u32), tail)
                    .map_err(|e| e.to_string())?;
            }
        }

        self.cpu.regs.pc = (elf.entry as u32) & mask;
        self.symbols = elf.symbols;
        Ok(())
    }

    /// Raw binary: whole file at physical 0, PC at 0.
    fn load_raw(&mut self, image: &[u8]) -> Result<(), String> {
        self.bus.ram.write_block(0, image).map_err(|e| e.to_string())?;
        self.cpu.regs.pc = 0;
        Ok(())
    }

    /// Execute one instruction.
    pub fn step(&mut self) {
        self.cpu.step(&mut self.bus);
    }

    /// Run until an unrecoverable fault, the cycle budget, or the stop
    /// flag. Emits the fatal diagnostic line on halt.
    pub fn run(&mut self) -> ExitReason {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return ExitReason::Stopped;
            }
            if self.cpu.is_halted() {
                self.report_fatal();
                return ExitReason::Halted;
            }
            if self.cpu.total_steps().get() >= self.max_cycles {
                return ExitReason::CycleBudget;
            }
            self.step();
        }
    }

    fn report_fatal(&self) {
        if let Some(diagnostic) = self.cpu.fatal_diagnostic() {
            let pc = self.cpu.regs.pc;
            let label = self
                .symbol_for(pc)
                .map_or_else(String::new, |name| format!(" ({name})"));
            eprintln!(
                "fatal: {diagnostic}{label} [{}]",
                disasm::disasm(self.cpu.current_opcode())
            );
        }
    }

    /// Shared stop flag; raise it from any thread to end `run`.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Nearest symbol at or below `addr`, for diagnostics labels.
    #[must_use]
    pub fn symbol_for(&self, addr: u32) -> Option<&str> {
        self.symbols
            .iter()
            .filter(|s| s.value <= u64::from(addr))
            .filter(|s| s.size == 0 || u64::from(addr) < s.value + s.size)
            .max_by_key(|s| s.value)
            .map(|s| s.name.as_str())
    }

    #[must_use]
    pub fn cpu(&self) -> &Ppc {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Ppc {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &XenonBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut XenonBus {
        &mut self.bus
    }

    /// Drain everything the console has printed.
    pub fn console_output(&mut self) -> String {
        self.bus.console_mut().take_output()
    }

    /// Linear ARGB image for a display.
    #[must_use]
    pub fn framebuffer_image(&self) -> Vec<u32> {
        self.bus.framebuffer().untile()
    }
}

impl Observable for Xenon {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "symbols" => Some(Value::U64(self.symbols.len() as u64)),
            "memory_size" => Some(Value::U64(self.bus.ram.size() as u64)),
            "stopped" => Some(self.stop.load(Ordering::Acquire).into()),
            _ => self.cpu.query(path),
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        self.cpu.query_paths()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Big-endian instruction words as a raw image.
    fn raw_image(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    fn machine_with(words: &[u32]) -> Xenon {
        let mut config = XenonConfig::new(raw_image(words));
        config.memory_size = 0x10000;
        Xenon::new(config).unwrap()
    }

    #[test]
    fn raw_image_starts_at_zero() {
        // addi r3, r0, 7
        let mut machine = machine_with(&[0x3860_0007]);
        assert_eq!(machine.cpu().regs.pc, 0);
        machine.step();
        assert_eq!(machine.cpu().regs.gpr[3], 7);
        assert_eq!(machine.cpu().regs.pc, 4);
    }

    #[test]
    fn console_store_prints() {
        // addis r3, 0, 0x0FFF ; addi r4, 0, 'A' ; stb r4, 0(r3) ;
        // addi r4, 0, '\n' ; stb r4, 0(r3)
        let mut machine = machine_with(&[
            0x3C60_0FFF,
            0x3880_0041,
            0x9883_0000,
            0x3880_000A,
            0x9883_0000,
        ]);
        for _ in 0..5 {
            machine.step();
        }
        assert_eq!(machine.console_output(), "A\n");
    }

    #[test]
    fn run_honors_the_cycle_budget() {
        // b . (spin)
        let mut config = XenonConfig::new(raw_image(&[0x4800_0000]));
        config.memory_size = 0x10000;
        config.max_cycles = 100;
        let mut machine = Xenon::new(config).unwrap();
        assert_eq!(machine.run(), ExitReason::CycleBudget);
        assert_eq!(machine.cpu().total_steps().get(), 100);
    }

    #[test]
    fn stop_flag_ends_the_run() {
        let mut config = XenonConfig::new(raw_image(&[0x4800_0000]));
        config.memory_size = 0x10000;
        let mut machine = Xenon::new(config).unwrap();
        machine.stop_handle().store(true, Ordering::Release);
        assert_eq!(machine.run(), ExitReason::Stopped);
    }

    #[test]
    fn elf_segments_are_placed_and_zero_filled() {
        // Hand-rolled minimal big-endian ELF32 with one PT_LOAD segment
        let payload = [0x38u8, 0x60, 0x00, 0x2A]; // addi r3, r0, 42
        let mut elf = vec![0u8; 52];
        elf[..4].copy_from_slice(&format_elf::ELF_MAGIC);
        elf[4] = 1;
        elf[5] = 2;
        elf[6] = 1;
        elf[18..20].copy_from_slice(&format_elf::EM_PPC.to_be_bytes());
        elf[20..24].copy_from_slice(&1u32.to_be_bytes());
        elf[24..28].copy_from_slice(&0x8000_1000u32.to_be_bytes()); // entry
        elf[28..32].copy_from_slice(&52u32.to_be_bytes());
        elf[42..44].copy_from_slice(&32u16.to_be_bytes());
        elf[44..46].copy_from_slice(&1u16.to_be_bytes());
        let mut ph = vec![0u8; 32];
        ph[0..4].copy_from_slice(&1u32.to_be_bytes());
        ph[4..8].copy_from_slice(&84u32.to_be_bytes());
        ph[12..16].copy_from_slice(&0x8000_1000u32.to_be_bytes()); // paddr
        ph[16..20].copy_from_slice(&4u32.to_be_bytes()); // filesz
        ph[20..24].copy_from_slice(&16u32.to_be_bytes()); // memsz
        ph[28..32].copy_from_slice(&4u32.to_be_bytes());
        elf.extend_from_slice(&ph);
        elf.extend_from_slice(&payload);

        let mut config = XenonConfig::new(elf);
        config.memory_size = 0x10000;
        let mut machine = Xenon::new(config).unwrap();

        // Entry masked into the 64 KiB backing range
        assert_eq!(machine.cpu().regs.pc, 0x1000);
        assert_eq!(machine.bus().ram.read_word(0x1000), 0x3860_002A);
        // Zero-filled tail
        assert_eq!(machine.bus().ram.read_word(0x1004), 0);

        machine.step();
        assert_eq!(machine.cpu().regs.gpr[3], 42);
    }
}
