//! Logical and shift executors.
//!
//! Bitwise ops act on the full 64-bit registers; the 32-bit shifts
//! (`slw`/`srw`/`sraw`) and `cntlzw` act on the low word and zero- or
//! sign-extend their result. `andi.`/`andis.` always record CR0.

use crate::cpu::Ppc;
use crate::decode::Instruction;
use crate::exceptions::{Exception, ProgramCause};

impl Ppc {
    /// Primary opcodes 24-29: logical immediates (zero-extended).
    pub(crate) fn exec_logic_imm(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let s = self.regs.gpr[ins.rs() as usize];
        let imm = u64::from(ins.uimm);
        let (result, record) = match ins.opcd {
            24 => (s | imm, false),
            25 => (s | (imm << 16), false),
            26 => (s ^ imm, false),
            27 => (s ^ (imm << 16), false),
            28 => (s & imm, true),
            29 => (s & (imm << 16), true),
            _ => {
                return Err(Exception::Program(ProgramCause::InvalidFormat {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        };
        self.regs.gpr[ins.ra as usize] = result;
        if record {
            self.regs.record_cr0(result as u32);
        }
        Ok(())
    }

    /// Opcode 31 X-form logical and shift subset.
    pub(crate) fn exec_logic_x(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let s = self.regs.gpr[ins.rs() as usize];
        let b = self.regs.gpr[ins.rb as usize];
        let s32 = s as u32;

        let result: u64 = match ins.xo {
            28 => s & b,
            60 => s & !b,
            444 => s | b,
            412 => s | !b,
            316 => s ^ b,
            284 => !(s ^ b),
            476 => !(s & b),
            124 => !(s | b),
            // cntlzw
            26 => u64::from(s32.leading_zeros()),
            // slw / srw: shift count is RB's low 6 bits; 32..63 gives zero
            24 => {
                let n = (b & 0x3F) as u32;
                if n > 31 { 0 } else { u64::from(s32 << n) }
            }
            536 => {
                let n = (b & 0x3F) as u32;
                if n > 31 { 0 } else { u64::from(s32 >> n) }
            }
            // sraw: CA set when the result is negative and ones shifted out
            792 => {
                let n = (b & 0x3F) as u32;
                let value = s32 as i32;
                let (res, lost) = if n > 31 {
                    (value >> 31, value < 0 && value != 0)
                } else {
                    let lost = value < 0 && (s32 & ((1u32 << n) - 1)) != 0;
                    (value >> n, lost)
                };
                self.regs.set_xer_ca(lost);
                res as i64 as u64
            }
            // srawi
            824 => {
                let n = u32::from(ins.sh);
                let value = s32 as i32;
                let lost = value < 0 && n > 0 && (s32 & ((1u32 << n) - 1)) != 0;
                self.regs.set_xer_ca(lost);
                (value >> n) as i64 as u64
            }
            954 => (s as i8) as i64 as u64,
            922 => (s as i16) as i64 as u64,
            986 => (s as i32) as i64 as u64,
            _ => {
                return Err(Exception::Program(ProgramCause::InvalidFormat {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        };

        self.regs.gpr[ins.ra as usize] = result;
        if ins.rc {
            self.regs.record_cr0(result as u32);
        }
        Ok(())
    }
}
