//! Special-register executors: SPR file access, MSR moves, CR-field
//! moves, time-base reads, segment-register moves, TLB maintenance and
//! isel.
//!
//! The 10-bit SPR field arrives from the decoder with its two 5-bit
//! halves already swapped, so `ins.spr` is the architectural SPR number.

use crate::cpu::Ppc;
use crate::decode::Instruction;
use crate::exceptions::{Exception, ProgramCause};
use crate::registers::{
    SPR_CTR, SPR_DAR, SPR_DBAT0U, SPR_DBAT3L, SPR_DEC, SPR_DEC_USER, SPR_DSISR, SPR_EAR,
    SPR_IBAT0U, SPR_IBAT3L, SPR_LR, SPR_PVR, SPR_RTCL, SPR_RTCU, SPR_SDR1, SPR_SPRG0,
    SPR_SPRG3, SPR_SRR0, SPR_SRR1, SPR_TBL, SPR_TBU, SPR_XER,
};

impl Ppc {
    /// Opcode 31 special subset.
    pub(crate) fn exec_special(&mut self, ins: &Instruction) -> Result<(), Exception> {
        match ins.xo {
            // mfcr
            19 => {
                self.regs.gpr[ins.rt as usize] = u64::from(self.regs.cr);
            }
            // mtcrf: update the CR fields selected by FXM
            144 => {
                let src = self.regs.gpr32(ins.rs());
                for field in 0..8u8 {
                    if ins.fxm & (0x80 >> field) != 0 {
                        self.regs.set_cr_field(field, (src >> (28 - 4 * u32::from(field))) & 0xF);
                    }
                }
            }
            // mfmsr / mtmsr
            83 => {
                self.regs.gpr[ins.rt as usize] = u64::from(self.regs.msr);
            }
            146 => {
                self.regs.msr = self.regs.gpr32(ins.rs());
            }
            // mtsr / mfsr
            210 => {
                self.regs.sr[(ins.ra & 0xF) as usize] = self.regs.gpr32(ins.rs());
            }
            595 => {
                self.regs.gpr[ins.rt as usize] = u64::from(self.regs.sr[(ins.ra & 0xF) as usize]);
            }
            // mfspr / mtspr
            339 => {
                let value = self.read_spr(u32::from(ins.spr), ins)?;
                self.regs.gpr[ins.rt as usize] = u64::from(value);
            }
            467 => {
                let value = self.regs.gpr32(ins.rs());
                self.write_spr(u32::from(ins.spr), value, ins)?;
            }
            // mftb: TBR 268/269 (the SPR aliases are accepted too)
            371 => {
                let value = match u32::from(ins.spr) {
                    268 | SPR_TBL => self.regs.tbl(),
                    269 | SPR_TBU => self.regs.tbu(),
                    _ => {
                        return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                            opcd: ins.opcd,
                            xo: ins.xo,
                        }))
                    }
                };
                self.regs.gpr[ins.rt as usize] = u64::from(value);
            }
            // tlbie / tlbsync / slbia
            306 => {
                self.mmu.invalidate_ea(self.regs.gpr32(ins.rb));
            }
            566 | 498 => {}
            _ => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        }
        Ok(())
    }

    /// isel: pick RA (literal zero when RA == 0) or RB by a CR bit.
    pub(crate) fn exec_isel(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let bc = (ins.xo >> 5) as u8;
        self.regs.gpr[ins.rt as usize] = if self.regs.cr_bit(bc) {
            self.regs.gpr_or_zero(ins.ra)
        } else {
            self.regs.gpr[ins.rb as usize]
        };
        Ok(())
    }

    fn read_spr(&mut self, spr: u32, ins: &Instruction) -> Result<u32, Exception> {
        Ok(match spr {
            0 => self.regs.mq,
            SPR_XER => self.regs.xer,
            SPR_RTCU => self.regs.rtcu,
            SPR_RTCL => self.regs.rtcl,
            SPR_DEC_USER | SPR_DEC => self.regs.dec,
            SPR_LR => self.regs.lr,
            SPR_CTR => self.regs.ctr,
            SPR_DSISR => self.regs.dsisr,
            SPR_DAR => self.regs.dar,
            SPR_SDR1 => self.regs.sdr1,
            SPR_SRR0 => self.regs.srr0,
            SPR_SRR1 => self.regs.srr1,
            SPR_SPRG0..=SPR_SPRG3 => self.regs.sprg[(spr - SPR_SPRG0) as usize],
            SPR_EAR => self.regs.ear,
            SPR_TBL => self.regs.tbl(),
            SPR_TBU => self.regs.tbu(),
            SPR_PVR => self.regs.pvr,
            SPR_IBAT0U..=SPR_IBAT3L => {
                let slot = (spr - SPR_IBAT0U) as usize;
                self.regs.ibat[slot / 2][slot % 2]
            }
            SPR_DBAT0U..=SPR_DBAT3L => {
                let slot = (spr - SPR_DBAT0U) as usize;
                self.regs.dbat[slot / 2][slot % 2]
            }
            _ => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        })
    }

    fn write_spr(&mut self, spr: u32, value: u32, ins: &Instruction) -> Result<(), Exception> {
        match spr {
            0 => self.regs.mq = value,
            SPR_XER => self.regs.xer = value,
            SPR_RTCU => self.regs.rtcu = value,
            SPR_RTCL => self.regs.rtcl = value,
            SPR_DEC_USER | SPR_DEC => self.regs.dec = value,
            SPR_LR => self.regs.lr = value,
            SPR_CTR => self.regs.ctr = value,
            SPR_DSISR => self.regs.dsisr = value,
            SPR_DAR => self.regs.dar = value,
            SPR_SDR1 => self.regs.sdr1 = value,
            SPR_SRR0 => self.regs.srr0 = value,
            SPR_SRR1 => self.regs.srr1 = value,
            SPR_SPRG0..=SPR_SPRG3 => self.regs.sprg[(spr - SPR_SPRG0) as usize] = value,
            SPR_EAR => self.regs.ear = value,
            SPR_TBL => {
                self.regs.tb = (self.regs.tb & 0xFFFF_FFFF_0000_0000) | u64::from(value);
            }
            SPR_TBU => {
                self.regs.tb = (self.regs.tb & 0xFFFF_FFFF) | (u64::from(value) << 32);
            }
            // PVR is read-only; the write is silently dropped
            SPR_PVR => {}
            SPR_IBAT0U..=SPR_IBAT3L => {
                let slot = (spr - SPR_IBAT0U) as usize;
                self.regs.ibat[slot / 2][slot % 2] = value;
            }
            SPR_DBAT0U..=SPR_DBAT3L => {
                let slot = (spr - SPR_DBAT0U) as usize;
                self.regs.dbat[slot / 2][slot % 2] = value;
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
}
