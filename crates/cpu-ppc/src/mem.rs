//! Load/store executors: D-form, DS-form, indexed, byte-reversed, string,
//! multiple, atomic reservation pairs, and cache management.
//!
//! Update (`u`) forms write the effective address back to RA on success;
//! RA == 0 in an update form is a Program exception. Halfword and word
//! accesses fault on unaligned addresses (the access helpers enforce it).

use emu_core::Bus;

use crate::cpu::Ppc;
use crate::decode::Instruction;
use crate::exceptions::{Exception, ProgramCause};
use crate::mmu::Access;
use crate::registers::XER_SO;

impl Ppc {
    fn ea_d(&self, ins: &Instruction) -> u32 {
        (self.regs.gpr_or_zero(ins.ra) as u32).wrapping_add(ins.simm as u32)
    }

    fn ea_x(&self, ins: &Instruction) -> u32 {
        (self.regs.gpr_or_zero(ins.ra) as u32).wrapping_add(self.regs.gpr32(ins.rb))
    }

    fn ea_update_d(&self, ins: &Instruction) -> Result<u32, Exception> {
        if ins.ra == 0 {
            return Err(Exception::Program(ProgramCause::InvalidUpdate));
        }
        Ok(self.regs.gpr32(ins.ra).wrapping_add(ins.simm as u32))
    }

    fn ea_update_x(&self, ins: &Instruction) -> Result<u32, Exception> {
        if ins.ra == 0 {
            return Err(Exception::Program(ProgramCause::InvalidUpdate));
        }
        Ok(self.regs.gpr32(ins.ra).wrapping_add(self.regs.gpr32(ins.rb)))
    }

    /// Primary opcodes 32-47: D-form integer loads and stores.
    pub(crate) fn exec_load_store_d<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
    ) -> Result<(), Exception> {
        let rt = ins.rt as usize;
        match ins.opcd {
            32 => {
                let ea = self.ea_d(ins);
                self.regs.gpr[rt] = u64::from(self.read_u32(bus, ea)?);
            }
            33 => {
                let ea = self.ea_update_d(ins)?;
                self.regs.gpr[rt] = u64::from(self.read_u32(bus, ea)?);
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            34 => {
                let ea = self.ea_d(ins);
                self.regs.gpr[rt] = u64::from(self.read_u8(bus, ea)?);
            }
            35 => {
                let ea = self.ea_update_d(ins)?;
                self.regs.gpr[rt] = u64::from(self.read_u8(bus, ea)?);
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            36 => {
                let ea = self.ea_d(ins);
                self.write_u32(bus, ea, self.regs.gpr32(ins.rs()))?;
            }
            37 => {
                let ea = self.ea_update_d(ins)?;
                self.write_u32(bus, ea, self.regs.gpr32(ins.rs()))?;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            38 => {
                let ea = self.ea_d(ins);
                self.write_u8(bus, ea, self.regs.gpr[ins.rs() as usize] as u8)?;
            }
            39 => {
                let ea = self.ea_update_d(ins)?;
                self.write_u8(bus, ea, self.regs.gpr[ins.rs() as usize] as u8)?;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            40 => {
                let ea = self.ea_d(ins);
                self.regs.gpr[rt] = u64::from(self.read_u16(bus, ea)?);
            }
            41 => {
                let ea = self.ea_update_d(ins)?;
                self.regs.gpr[rt] = u64::from(self.read_u16(bus, ea)?);
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            42 => {
                let ea = self.ea_d(ins);
                self.regs.gpr[rt] = (self.read_u16(bus, ea)? as i16) as i64 as u64;
            }
            43 => {
                let ea = self.ea_update_d(ins)?;
                self.regs.gpr[rt] = (self.read_u16(bus, ea)? as i16) as i64 as u64;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            44 => {
                let ea = self.ea_d(ins);
                self.write_u16(bus, ea, self.regs.gpr[ins.rs() as usize] as u16)?;
            }
            45 => {
                let ea = self.ea_update_d(ins)?;
                self.write_u16(bus, ea, self.regs.gpr[ins.rs() as usize] as u16)?;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            // lmw: load RT..R31 from consecutive words
            46 => {
                let mut ea = self.ea_d(ins);
                for r in rt..32 {
                    self.regs.gpr[r] = u64::from(self.read_u32(bus, ea)?);
                    ea = ea.wrapping_add(4);
                }
            }
            // stmw
            47 => {
                let mut ea = self.ea_d(ins);
                for r in rt..32 {
                    self.write_u32(bus, ea, self.regs.gpr[r] as u32)?;
                    ea = ea.wrapping_add(4);
                }
            }
            _ => unreachable!("routed by primary opcode"),
        }
        Ok(())
    }

    /// Primary opcode 58: DS-form doubleword loads (ld, ldu).
    pub(crate) fn exec_load_dword_d<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
    ) -> Result<(), Exception> {
        match ins.xo {
            0 => {
                let ea = (self.regs.gpr_or_zero(ins.ra) as u32).wrapping_add(ins.ds as u32);
                self.regs.gpr[ins.rt as usize] = self.read_u64(bus, ea)?;
            }
            1 => {
                if ins.ra == 0 {
                    return Err(Exception::Program(ProgramCause::InvalidUpdate));
                }
                let ea = self.regs.gpr32(ins.ra).wrapping_add(ins.ds as u32);
                self.regs.gpr[ins.rt as usize] = self.read_u64(bus, ea)?;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            _ => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        }
        Ok(())
    }

    /// Opcode 31 memory subset: indexed, byte-reversed, string, atomics,
    /// cache hints, synchronization, external control.
    pub(crate) fn exec_mem_x<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
    ) -> Result<(), Exception> {
        let rt = ins.rt as usize;
        match ins.xo {
            // Indexed loads
            23 => {
                let ea = self.ea_x(ins);
                self.regs.gpr[rt] = u64::from(self.read_u32(bus, ea)?);
            }
            55 => {
                let ea = self.ea_update_x(ins)?;
                self.regs.gpr[rt] = u64::from(self.read_u32(bus, ea)?);
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            87 => {
                let ea = self.ea_x(ins);
                self.regs.gpr[rt] = u64::from(self.read_u8(bus, ea)?);
            }
            119 => {
                let ea = self.ea_update_x(ins)?;
                self.regs.gpr[rt] = u64::from(self.read_u8(bus, ea)?);
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            279 => {
                let ea = self.ea_x(ins);
                self.regs.gpr[rt] = u64::from(self.read_u16(bus, ea)?);
            }
            311 => {
                let ea = self.ea_update_x(ins)?;
                self.regs.gpr[rt] = u64::from(self.read_u16(bus, ea)?);
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            343 => {
                let ea = self.ea_x(ins);
                self.regs.gpr[rt] = (self.read_u16(bus, ea)? as i16) as i64 as u64;
            }
            375 => {
                let ea = self.ea_update_x(ins)?;
                self.regs.gpr[rt] = (self.read_u16(bus, ea)? as i16) as i64 as u64;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            // Indexed stores
            151 => {
                let ea = self.ea_x(ins);
                self.write_u32(bus, ea, self.regs.gpr32(ins.rs()))?;
            }
            183 => {
                let ea = self.ea_update_x(ins)?;
                self.write_u32(bus, ea, self.regs.gpr32(ins.rs()))?;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            215 => {
                let ea = self.ea_x(ins);
                self.write_u8(bus, ea, self.regs.gpr[ins.rs() as usize] as u8)?;
            }
            247 => {
                let ea = self.ea_update_x(ins)?;
                self.write_u8(bus, ea, self.regs.gpr[ins.rs() as usize] as u8)?;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            407 => {
                let ea = self.ea_x(ins);
                self.write_u16(bus, ea, self.regs.gpr[ins.rs() as usize] as u16)?;
            }
            439 => {
                let ea = self.ea_update_x(ins)?;
                self.write_u16(bus, ea, self.regs.gpr[ins.rs() as usize] as u16)?;
                self.regs.gpr[ins.ra as usize] = u64::from(ea);
            }
            // Byte-reversed
            790 => {
                let ea = self.ea_x(ins);
                self.regs.gpr[rt] = u64::from(self.read_u16(bus, ea)?.swap_bytes());
            }
            534 => {
                let ea = self.ea_x(ins);
                self.regs.gpr[rt] = u64::from(self.read_u32(bus, ea)?.swap_bytes());
            }
            918 => {
                let ea = self.ea_x(ins);
                let v = (self.regs.gpr[ins.rs() as usize] as u16).swap_bytes();
                self.write_u16(bus, ea, v)?;
            }
            662 => {
                let ea = self.ea_x(ins);
                let v = self.regs.gpr32(ins.rs()).swap_bytes();
                self.write_u32(bus, ea, v)?;
            }
            // String ops
            597 => {
                let nb = if ins.rb == 0 { 32 } else { u32::from(ins.rb) };
                let ea = self.regs.gpr_or_zero(ins.ra) as u32;
                self.load_string(bus, ea, nb, ins.rt)?;
            }
            533 => {
                let nb = self.regs.xer & 0x7F;
                let ea = self.ea_x(ins);
                self.load_string(bus, ea, nb, ins.rt)?;
            }
            725 => {
                let nb = if ins.rb == 0 { 32 } else { u32::from(ins.rb) };
                let ea = self.regs.gpr_or_zero(ins.ra) as u32;
                self.store_string(bus, ea, nb, ins.rs())?;
            }
            661 => {
                let nb = self.regs.xer & 0x7F;
                let ea = self.ea_x(ins);
                self.store_string(bus, ea, nb, ins.rs())?;
            }
            // lwarx / ldarx: record the reservation on the physical address
            20 => {
                let ea = self.ea_x(ins);
                if ea & 3 != 0 {
                    return Err(Exception::Alignment { ea });
                }
                let pa = self.mmu.translate(&self.regs, ea, Access::DataRead)?;
                self.regs.gpr[rt] = u64::from(self.cache.read_word(bus, pa));
                self.regs.reservation = Some(pa);
            }
            84 => {
                let ea = self.ea_x(ins);
                if ea & 7 != 0 {
                    return Err(Exception::Alignment { ea });
                }
                let pa = self.mmu.translate(&self.regs, ea, Access::DataRead)?;
                self.regs.gpr[rt] = self.read_u64(bus, ea)?;
                self.regs.reservation = Some(pa);
            }
            // stwcx. / stdcx.: store iff the reservation still matches;
            // CR0[EQ] reports success; the reservation dies either way
            150 => {
                let ea = self.ea_x(ins);
                if ea & 3 != 0 {
                    return Err(Exception::Alignment { ea });
                }
                let pa = self.mmu.translate(&self.regs, ea, Access::DataWrite)?;
                let success = self.regs.reservation == Some(pa);
                self.regs.reservation = None;
                if success {
                    self.cache.write_word(bus, pa, self.regs.gpr32(ins.rs()));
                }
                self.record_store_conditional(success);
            }
            214 => {
                let ea = self.ea_x(ins);
                if ea & 7 != 0 {
                    return Err(Exception::Alignment { ea });
                }
                let pa = self.mmu.translate(&self.regs, ea, Access::DataWrite)?;
                let success = self.regs.reservation == Some(pa);
                self.regs.reservation = None;
                if success {
                    let v = self.regs.gpr[ins.rs() as usize];
                    self.cache.write_word(bus, pa, (v >> 32) as u32);
                    self.cache.write_word(bus, pa.wrapping_add(4), v as u32);
                }
                self.record_store_conditional(success);
            }
            // Cache touch hints: translation faults are suppressed
            278 | 246 => {
                let ea = self.ea_x(ins);
                let _ = self.mmu.translate(&self.regs, ea, Access::DataRead);
            }
            // dcbst / dcbf / icbi / dcbi
            54 => {
                let ea = self.ea_x(ins);
                let pa = self.mmu.translate(&self.regs, ea, Access::DataRead)?;
                self.cache.store_line(bus, pa);
            }
            86 => {
                let ea = self.ea_x(ins);
                let pa = self.mmu.translate(&self.regs, ea, Access::DataWrite)?;
                self.cache.flush_line(bus, pa);
            }
            982 | 470 => {
                let ea = self.ea_x(ins);
                let pa = self.mmu.translate(&self.regs, ea, Access::DataWrite)?;
                self.cache.invalidate_line(pa);
            }
            // dcbz: zero a 32-byte block
            1014 => {
                let ea = self.ea_x(ins);
                if ea & 31 != 0 {
                    return Err(Exception::Alignment { ea });
                }
                let pa = self.mmu.translate(&self.regs, ea, Access::DataWrite)?;
                for w in 0..8 {
                    self.cache.write_word(bus, pa + w * 4, 0);
                }
            }
            // sync / eieio: single-core, program order already holds
            598 | 854 => {}
            // eciwx / ecowx: plain word transfers here (EAR gating not modeled)
            310 => {
                let ea = self.ea_x(ins);
                self.regs.gpr[rt] = u64::from(self.read_u32(bus, ea)?);
            }
            438 => {
                let ea = self.ea_x(ins);
                self.write_u32(bus, ea, self.regs.gpr32(ins.rs()))?;
            }
            _ => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        }
        Ok(())
    }

    /// CR0 after a conditional store: EQ on success, SO mirrored.
    fn record_store_conditional(&mut self, success: bool) {
        let mut f = if success { 0b0010 } else { 0b0000 };
        if self.regs.xer & XER_SO != 0 {
            f |= 0b0001;
        }
        self.regs.set_cr_field(0, f);
    }

    /// lswi/lswx: fill registers four bytes at a time, MSB first, wrapping
    /// from r31 to r0; a trailing partial register is zero-filled.
    fn load_string<B: Bus>(
        &mut self,
        bus: &mut B,
        mut ea: u32,
        nb: u32,
        first: u8,
    ) -> Result<(), Exception> {
        let mut reg = first as usize;
        let mut remaining = nb;
        while remaining > 0 {
            let mut word = 0u32;
            for lane in 0..4 {
                if remaining == 0 {
                    break;
                }
                let byte = self.read_u8(bus, ea)?;
                word |= u32::from(byte) << (8 * (3 - lane));
                ea = ea.wrapping_add(1);
                remaining -= 1;
            }
            self.regs.gpr[reg] = u64::from(word);
            reg = (reg + 1) % 32;
        }
        Ok(())
    }

    fn store_string<B: Bus>(
        &mut self,
        bus: &mut B,
        mut ea: u32,
        nb: u32,
        first: u8,
    ) -> Result<(), Exception> {
        let mut reg = first as usize;
        let mut remaining = nb;
        while remaining > 0 {
            let word = self.regs.gpr32(reg as u8);
            for lane in 0..4 {
                if remaining == 0 {
                    break;
                }
                let byte = (word >> (8 * (3 - lane))) as u8;
                self.write_u8(bus, ea, byte)?;
                ea = ea.wrapping_add(1);
                remaining -= 1;
            }
            reg = (reg + 1) % 32;
        }
        Ok(())
    }
}
