//! Branch, condition-register, compare and trap executors.
//!
//! Branch targets overwrite `next_pc`; the step loop commits it after the
//! executor returns. `sc` and matched traps surface as exceptions and are
//! delivered by the step loop like any other fault.

use crate::cpu::Ppc;
use crate::decode::Instruction;
use crate::exceptions::{Exception, ProgramCause};
use crate::registers::XER_SO;

// BO field bits (big-endian bit 0 first).
const BO_IGNORE_COND: u8 = 0x10;
const BO_COND_TRUE: u8 = 0x08;
const BO_NO_DECREMENT: u8 = 0x04;
const BO_CTR_ZERO: u8 = 0x02;

// TO field bits for trap conditions.
const TO_LT: u8 = 0x10;
const TO_GT: u8 = 0x08;
const TO_EQ: u8 = 0x04;
const TO_LTU: u8 = 0x02;
const TO_GTU: u8 = 0x01;

impl Ppc {
    /// Primary opcodes 18 (b) and 16 (bc).
    pub(crate) fn exec_branch(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let pc = self.regs.pc;
        match ins.opcd {
            18 => {
                let base = if ins.aa { 0 } else { pc };
                if ins.lk {
                    self.regs.lr = pc.wrapping_add(4);
                }
                self.next_pc = base.wrapping_add(ins.li as u32);
            }
            16 => {
                let taken = self.branch_condition(ins.bo(), ins.bi(), true);
                if ins.lk {
                    self.regs.lr = pc.wrapping_add(4);
                }
                if taken {
                    let base = if ins.aa { 0 } else { pc };
                    self.next_pc = base.wrapping_add(ins.bd as u32);
                }
            }
            _ => unreachable!("routed by primary opcode"),
        }
        Ok(())
    }

    /// `sc`: handled as an exception so the step loop performs the save
    /// and vectoring exactly once.
    pub(crate) fn exec_syscall(&mut self) -> Result<(), Exception> {
        Err(Exception::Syscall)
    }

    /// Opcode 19 (XL form): register-indirect branches, CR bit ops, rfi.
    pub(crate) fn exec_xl(&mut self, ins: &Instruction) -> Result<(), Exception> {
        match ins.xo {
            // bclr(l)
            16 => {
                let target = self.regs.lr & !3;
                let taken = self.branch_condition(ins.bo(), ins.bi(), true);
                if ins.lk {
                    self.regs.lr = self.regs.pc.wrapping_add(4);
                }
                if taken {
                    self.next_pc = target;
                }
            }
            // bcctr(l): never decrements CTR
            528 => {
                let target = self.regs.ctr & !3;
                let taken = self.branch_condition(ins.bo(), ins.bi(), false);
                if ins.lk {
                    self.regs.lr = self.regs.pc.wrapping_add(4);
                }
                if taken {
                    self.next_pc = target;
                }
            }
            // mcrf
            0 => {
                let value = self.regs.cr_field(ins.ra >> 2);
                self.regs.set_cr_field(ins.rt >> 2, value);
            }
            // CR bit ops: crbD = rt, crbA = ra, crbB = rb
            257 | 449 | 193 | 225 | 33 | 129 | 417 | 289 => {
                let a = self.regs.cr_bit(ins.ra);
                let b = self.regs.cr_bit(ins.rb);
                let result = match ins.xo {
                    257 => a && b,
                    449 => a || b,
                    193 => a != b,
                    225 => !(a && b),
                    33 => !(a || b),
                    129 => a && !b,
                    417 => a || !b,
                    289 => a == b,
                    _ => unreachable!(),
                };
                self.regs.set_cr_bit(ins.rt, result);
            }
            // isync: no pipeline to discard
            150 => {}
            // rfi
            50 => self.return_from_interrupt(),
            _ => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        }
        Ok(())
    }

    /// Evaluate a (BO, BI) branch condition, optionally decrementing CTR.
    fn branch_condition(&mut self, bo: u8, bi: u8, may_decrement: bool) -> bool {
        let ctr_ok = if bo & BO_NO_DECREMENT != 0 {
            true
        } else {
            if may_decrement {
                self.regs.ctr = self.regs.ctr.wrapping_sub(1);
            }
            (self.regs.ctr == 0) == (bo & BO_CTR_ZERO != 0)
        };
        let cond_ok =
            bo & BO_IGNORE_COND != 0 || self.regs.cr_bit(bi) == (bo & BO_COND_TRUE != 0);
        ctr_ok && cond_ok
    }

    // === Compares ===

    fn set_compare_field(&mut self, crf: u8, lt: bool, gt: bool) {
        let mut f = if lt {
            0b1000
        } else if gt {
            0b0100
        } else {
            0b0010
        };
        if self.regs.xer & XER_SO != 0 {
            f |= 0b0001;
        }
        self.regs.set_cr_field(crf, f);
    }

    /// cmpi / cmpli.
    pub(crate) fn exec_cmp_imm(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let a = self.regs.gpr32(ins.ra);
        let crf = ins.crfd();
        if ins.opcd == 11 {
            let (a, b) = (a as i32, ins.simm);
            self.set_compare_field(crf, a < b, a > b);
        } else {
            let b = ins.uimm;
            self.set_compare_field(crf, a < b, a > b);
        }
        Ok(())
    }

    /// cmp / cmpl (opcode 31).
    pub(crate) fn exec_cmp_x(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let a = self.regs.gpr32(ins.ra);
        let b = self.regs.gpr32(ins.rb);
        let crf = ins.crfd();
        if ins.xo == 0 {
            let (a, b) = (a as i32, b as i32);
            self.set_compare_field(crf, a < b, a > b);
        } else {
            self.set_compare_field(crf, a < b, a > b);
        }
        Ok(())
    }

    // === Traps ===

    fn trap_matches(to: u8, a: i64, b: i64) -> bool {
        (to & TO_LT != 0 && a < b)
            || (to & TO_GT != 0 && a > b)
            || (to & TO_EQ != 0 && a == b)
            || (to & TO_LTU != 0 && (a as u64) < (b as u64))
            || (to & TO_GTU != 0 && (a as u64) > (b as u64))
    }

    /// twi (opcode 3) and tdi (opcode 2).
    pub(crate) fn exec_trap_imm(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let (a, b) = if ins.opcd == 3 {
            (i64::from(self.regs.gpr32(ins.ra) as i32), i64::from(ins.simm))
        } else {
            (self.regs.gpr[ins.ra as usize] as i64, i64::from(ins.simm))
        };
        if Self::trap_matches(ins.rt, a, b) {
            return Err(Exception::Program(ProgramCause::Trap));
        }
        Ok(())
    }

    /// tw (opcode 31).
    pub(crate) fn exec_trap_x(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let a = i64::from(self.regs.gpr32(ins.ra) as i32);
        let b = i64::from(self.regs.gpr32(ins.rb) as i32);
        if Self::trap_matches(ins.rt, a, b) {
            return Err(Exception::Program(ProgramCause::Trap));
        }
        Ok(())
    }
}
