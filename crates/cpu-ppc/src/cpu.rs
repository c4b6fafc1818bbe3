//! PowerPC CPU core: architectural state plus fetch/decode/execute
//! orchestration.
//!
//! The core owns the register file, the MMU and the data cache as sibling
//! fields; executors receive `&mut self` and the bus, so no component holds
//! a back-pointer. One `step` is one instruction:
//!
//! 1. Sample pending interrupts (decrementer, external line).
//! 2. Translate PC (instruction side) and fetch the word; fetches bypass
//!    the data cache.
//! 3. Decode and dispatch to the class executor.
//! 4. Advance PC by 4 unless the executor (or an exception) moved it.
//! 5. Advance the time base and decrementer.
//!
//! Executors report faults by returning `Err(Exception)`; the step loop is
//! the only place that turns one into architectural side effects.

use emu_core::{Bus, Observable, Ticks, Value};

use crate::cache::{Cache, WritePolicy};
use crate::decode::{decode, Format, Instruction};
use crate::exceptions::{Exception, ProgramCause};
use crate::mmu::{Access, Mmu};
use crate::registers::Registers;

/// Reservation granule for lwarx/stwcx pairs.
const RESERVATION_GRANULE: u32 = !31;

/// PowerPC (Xenon-class) CPU.
pub struct Ppc {
    /// Architectural register file.
    pub regs: Registers,
    /// Address translation unit.
    pub mmu: Mmu,
    /// Data cache.
    pub cache: Cache,

    // === Execution state ===
    /// PC for the next instruction; executors overwrite it to branch.
    pub(crate) next_pc: u32,
    /// Set while servicing an exception (cleared by rfi).
    pub(crate) interrupt_mode: bool,
    /// External interrupt line, sampled between instructions.
    pub(crate) external_pending: bool,
    /// Unrecoverable-fault latch.
    pub(crate) halted: bool,
    /// Diagnostic line for the fatal fault, if any.
    pub(crate) fatal: Option<String>,
    /// Word currently being executed (for diagnostics).
    pub(crate) current_word: u32,

    // === Counters ===
    total_steps: Ticks,
    /// Diagnostic: unsupported-opcode events seen.
    pub(crate) unsupported_count: u32,
    /// Diagnostic: nested exceptions dropped.
    pub(crate) nested_drop_count: u32,
}

impl Ppc {
    /// Create a CPU with a write-through cache over `ram_size` bytes of
    /// cacheable RAM.
    #[must_use]
    pub fn new(ram_size: u32) -> Self {
        Self::with_policy(ram_size, WritePolicy::WriteThrough)
    }

    /// Create a CPU with an explicit cache write policy.
    #[must_use]
    pub fn with_policy(ram_size: u32, policy: WritePolicy) -> Self {
        Self {
            regs: Registers::new(),
            mmu: Mmu::new(),
            cache: Cache::new(policy, ram_size),
            next_pc: 0,
            interrupt_mode: false,
            external_pending: false,
            halted: false,
            fatal: None,
            current_word: 0,
            total_steps: Ticks::ZERO,
            unsupported_count: 0,
            nested_drop_count: 0,
        }
    }

    /// Total instructions executed.
    #[must_use]
    pub const fn total_steps(&self) -> Ticks {
        self.total_steps
    }

    /// The diagnostic line for an unrecoverable fault, if the core halted.
    #[must_use]
    pub fn fatal_diagnostic(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    /// The instruction word currently (or last) executed.
    #[must_use]
    pub const fn current_opcode(&self) -> u32 {
        self.current_word
    }

    /// True while an exception is being serviced (before rfi).
    #[must_use]
    pub const fn in_interrupt(&self) -> bool {
        self.interrupt_mode
    }

    /// True once the core latched an unrecoverable fault.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Raise the external interrupt line.
    pub fn raise_external(&mut self) {
        self.external_pending = true;
    }

    /// Stop the core with a diagnostic line.
    pub(crate) fn halt_with(&mut self, diagnostic: String) {
        eprintln!("PPC halt: {diagnostic}");
        self.fatal = Some(diagnostic);
        self.halted = true;
    }

    /// Execute one instruction.
    pub fn step<B: Bus>(&mut self, bus: &mut B) {
        if self.halted {
            return;
        }

        if self.deliver_pending() {
            self.regs.pc = self.next_pc;
            self.advance_time();
            return;
        }

        self.next_pc = self.regs.pc.wrapping_add(4);

        let word = match self.fetch(bus) {
            Ok(word) => word,
            Err(exc) => {
                self.deliver(&exc);
                self.regs.pc = self.next_pc;
                self.advance_time();
                return;
            }
        };
        self.current_word = word;

        match decode(word) {
            Ok(ins) => {
                if let Err(exc) = self.execute(bus, &ins) {
                    self.trace_fault(&exc);
                    self.deliver(&exc);
                }
            }
            Err(unsupported) => {
                let exc = Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: unsupported.opcd,
                    xo: unsupported.xo,
                });
                self.trace_fault(&exc);
                self.deliver(&exc);
            }
        }

        self.regs.pc = self.next_pc;
        self.advance_time();
    }

    /// Deliver a pending asynchronous interrupt, if the gates allow one.
    /// Returns true when an interrupt consumed this step.
    fn deliver_pending(&mut self) -> bool {
        if self.interrupt_mode || !self.regs.msr_ee() {
            return false;
        }
        if self.external_pending {
            self.external_pending = false;
            self.next_pc = self.regs.pc;
            self.deliver(&Exception::External);
            return true;
        }
        if self.regs.dec == 0 {
            self.next_pc = self.regs.pc;
            self.deliver(&Exception::Decrementer);
            return true;
        }
        false
    }

    /// Fetch the instruction word at PC. Instruction fetches go to the bus
    /// directly; only data traffic is cached.
    fn fetch<B: Bus>(&mut self, bus: &mut B) -> Result<u32, Exception> {
        let pa = self.mmu.translate(&self.regs, self.regs.pc, Access::InstrFetch)?;
        Ok(bus.read_word(pa))
    }

    fn advance_time(&mut self) {
        self.total_steps += Ticks::new(1);
        self.regs.tb = self.regs.tb.wrapping_add(1);
        self.regs.dec = self.regs.dec.wrapping_sub(1);
    }

    /// Bounded diagnostic trace for synchronous faults.
    fn trace_fault(&mut self, exc: &Exception) {
        if matches!(exc, Exception::Program(ProgramCause::UnsupportedOpcode { .. })) {
            #[cfg(debug_assertions)]
            if self.unsupported_count < 128 {
                eprintln!(
                    "  PPC {exc}: pc={:#010X} word={:#010X}",
                    self.regs.pc, self.current_word
                );
            }
            self.unsupported_count = self.unsupported_count.saturating_add(1);
        }
    }

    /// Route a decoded instruction to its class executor.
    pub(crate) fn execute<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
    ) -> Result<(), Exception> {
        match ins.opcd {
            2 | 3 => self.exec_trap_imm(ins),
            4 => self.exec_primary4(bus, ins),
            7 | 8 | 12..=15 => self.exec_arith_imm(ins),
            10 | 11 => self.exec_cmp_imm(ins),
            16 | 18 => self.exec_branch(ins),
            17 => self.exec_syscall(),
            19 => self.exec_xl(ins),
            20..=23 => self.exec_rotate32(ins),
            24..=29 => self.exec_logic_imm(ins),
            30 => self.exec_rotate64(ins),
            31 => self.exec_ext31(bus, ins),
            32..=47 => self.exec_load_store_d(bus, ins),
            48..=55 => self.exec_fp_load_store_d(bus, ins),
            57 | 61 => self.exec_fp_pair_d(bus, ins),
            58 => self.exec_load_dword_d(bus, ins),
            59 => self.exec_fp_single(ins),
            62 => self.exec_vector_ds(bus, ins),
            63 => self.exec_fp_double(ins),
            _ => Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                opcd: ins.opcd,
                xo: ins.xo,
            })),
        }
    }

    /// Secondary dispatch for the large opcode-31 space.
    fn exec_ext31<B: Bus>(&mut self, bus: &mut B, ins: &Instruction) -> Result<(), Exception> {
        if ins.format == Format::Xo {
            return self.exec_arith_xo(ins);
        }
        // isel occupies every xo with the low five bits 01111
        if ins.xo & 0x1F == 15 {
            return self.exec_isel(ins);
        }
        match ins.xo {
            0 | 32 => self.exec_cmp_x(ins),
            4 => self.exec_trap_x(ins),
            24 | 26 | 28 | 60 | 124 | 284 | 316 | 412 | 444 | 476 | 536 | 792 | 824 | 922
            | 954 | 986 => self.exec_logic_x(ins),
            19 | 83 | 144 | 146 | 210 | 306 | 339 | 371 | 467 | 498 | 566 | 595 => {
                self.exec_special(ins)
            }
            103 | 231 => self.exec_vector_mem_x(bus, ins),
            791 | 919 => self.exec_fp_pair_x(bus, ins),
            _ => self.exec_mem_x(bus, ins),
        }
    }

    // === Data access helpers ===
    //
    // Every data access translates through the MMU and, when it lands in
    // cacheable RAM, flows through the cache. Alignment contracts are
    // enforced here so executors stay declarative.

    pub(crate) fn read_u8<B: Bus>(&mut self, bus: &mut B, ea: u32) -> Result<u8, Exception> {
        let pa = self.mmu.translate(&self.regs, ea, Access::DataRead)?;
        Ok(self.cache.read_byte(bus, pa))
    }

    pub(crate) fn read_u16<B: Bus>(&mut self, bus: &mut B, ea: u32) -> Result<u16, Exception> {
        if ea & 1 != 0 {
            return Err(Exception::Alignment { ea });
        }
        let pa = self.mmu.translate(&self.regs, ea, Access::DataRead)?;
        let hi = self.cache.read_byte(bus, pa);
        let lo = self.cache.read_byte(bus, pa.wrapping_add(1));
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub(crate) fn read_u32<B: Bus>(&mut self, bus: &mut B, ea: u32) -> Result<u32, Exception> {
        if ea & 3 != 0 {
            return Err(Exception::Alignment { ea });
        }
        let pa = self.mmu.translate(&self.regs, ea, Access::DataRead)?;
        Ok(self.cache.read_word(bus, pa))
    }

    pub(crate) fn read_u64<B: Bus>(&mut self, bus: &mut B, ea: u32) -> Result<u64, Exception> {
        if ea & 3 != 0 {
            return Err(Exception::Alignment { ea });
        }
        let hi = self.read_u32(bus, ea)?;
        let lo = self.read_u32(bus, ea.wrapping_add(4))?;
        Ok((u64::from(hi) << 32) | u64::from(lo))
    }

    pub(crate) fn write_u8<B: Bus>(
        &mut self,
        bus: &mut B,
        ea: u32,
        value: u8,
    ) -> Result<(), Exception> {
        let pa = self.mmu.translate(&self.regs, ea, Access::DataWrite)?;
        self.clear_reservation_on_store(pa);
        self.cache.write_byte(bus, pa, value);
        Ok(())
    }

    pub(crate) fn write_u16<B: Bus>(
        &mut self,
        bus: &mut B,
        ea: u32,
        value: u16,
    ) -> Result<(), Exception> {
        if ea & 1 != 0 {
            return Err(Exception::Alignment { ea });
        }
        let pa = self.mmu.translate(&self.regs, ea, Access::DataWrite)?;
        self.clear_reservation_on_store(pa);
        let [hi, lo] = value.to_be_bytes();
        self.cache.write_byte(bus, pa, hi);
        self.cache.write_byte(bus, pa.wrapping_add(1), lo);
        Ok(())
    }

    pub(crate) fn write_u32<B: Bus>(
        &mut self,
        bus: &mut B,
        ea: u32,
        value: u32,
    ) -> Result<(), Exception> {
        if ea & 3 != 0 {
            return Err(Exception::Alignment { ea });
        }
        let pa = self.mmu.translate(&self.regs, ea, Access::DataWrite)?;
        self.clear_reservation_on_store(pa);
        self.cache.write_word(bus, pa, value);
        Ok(())
    }

    pub(crate) fn write_u64<B: Bus>(
        &mut self,
        bus: &mut B,
        ea: u32,
        value: u64,
    ) -> Result<(), Exception> {
        if ea & 3 != 0 {
            return Err(Exception::Alignment { ea });
        }
        self.write_u32(bus, ea, (value >> 32) as u32)?;
        self.write_u32(bus, ea.wrapping_add(4), value as u32)
    }

    /// Any store into the reserved granule kills the reservation.
    fn clear_reservation_on_store(&mut self, pa: u32) {
        if let Some(resv) = self.regs.reservation {
            if resv & RESERVATION_GRANULE == pa & RESERVATION_GRANULE {
                self.regs.reservation = None;
            }
        }
    }
}

impl emu_core::Cpu for Ppc {
    type Registers = Registers;

    fn step<B: Bus>(&mut self, bus: &mut B) {
        Ppc::step(self, bus);
    }

    fn pc(&self) -> u32 {
        self.regs.pc
    }

    fn registers(&self) -> Registers {
        self.regs.clone()
    }

    fn is_halted(&self) -> bool {
        self.halted
    }

    fn interrupt(&mut self) {
        self.external_pending = true;
    }

    fn reset(&mut self) {
        self.regs = Registers::new();
        self.mmu.invalidate_all();
        self.next_pc = 0;
        self.interrupt_mode = false;
        self.external_pending = false;
        self.halted = false;
        self.fatal = None;
        self.current_word = 0;
        self.total_steps = Ticks::ZERO;
        self.unsupported_count = 0;
        self.nested_drop_count = 0;
    }
}

// === Observable implementation ===

const PPC_QUERY_PATHS: &[&str] = &[
    "pc", "lr", "ctr", "cr", "xer", "msr", "fpscr", "srr0", "srr1", "dar", "dsisr", "dec",
    "tb", "acc", "halted", "interrupt_mode", "cycles", "opcode",
    "flags.so", "flags.ov", "flags.ca",
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
    "r16", "r17", "r18", "r19", "r20", "r21", "r22", "r23",
    "r24", "r25", "r26", "r27", "r28", "r29", "r30", "r31",
];

impl Observable for Ppc {
    fn query(&self, path: &str) -> Option<Value> {
        use crate::registers::{XER_CA, XER_OV, XER_SO};

        if let Some(n) = path.strip_prefix('r') {
            if let Ok(n) = n.parse::<usize>() {
                if n < 32 {
                    return Some(self.regs.gpr[n].into());
                }
            }
        }
        if let Some(n) = path.strip_prefix('f') {
            if let Ok(n) = n.parse::<usize>() {
                if n < 32 {
                    return Some(self.regs.fpr[n].into());
                }
            }
        }
        if let Some(n) = path.strip_prefix('v') {
            if let Ok(n) = n.parse::<usize>() {
                if n < 32 {
                    let lanes = self.regs.vr[n].iter().map(|&w| w.into()).collect();
                    return Some(Value::Array(lanes));
                }
            }
        }

        match path {
            "pc" => Some(self.regs.pc.into()),
            "lr" => Some(self.regs.lr.into()),
            "ctr" => Some(self.regs.ctr.into()),
            "cr" => Some(self.regs.cr.into()),
            "xer" => Some(self.regs.xer.into()),
            "msr" => Some(self.regs.msr.into()),
            "fpscr" => Some(self.regs.fpscr.into()),
            "srr0" => Some(self.regs.srr0.into()),
            "srr1" => Some(self.regs.srr1.into()),
            "dar" => Some(self.regs.dar.into()),
            "dsisr" => Some(self.regs.dsisr.into()),
            "dec" => Some(self.regs.dec.into()),
            "tb" => Some(self.regs.tb.into()),
            "acc" => Some(self.regs.acc.into()),
            "halted" => Some(self.halted.into()),
            "interrupt_mode" => Some(self.interrupt_mode.into()),
            "cycles" => Some(self.total_steps.get().into()),
            "opcode" => Some(self.current_word.into()),
            "flags.so" => Some((self.regs.xer & XER_SO != 0).into()),
            "flags.ov" => Some((self.regs.xer & XER_OV != 0).into()),
            "flags.ca" => Some((self.regs.xer & XER_CA != 0).into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        PPC_QUERY_PATHS
    }
}
