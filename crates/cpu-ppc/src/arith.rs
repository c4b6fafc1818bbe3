//! Integer arithmetic executors.
//!
//! Arithmetic is performed at the full 64-bit register width (so `addi
//! r3, 0, -1` leaves a sign-extended -1 in the register), while the XER
//! carry and overflow bits are defined by the 32-bit lanes, matching the
//! 32-bit programs this core runs. CR0 records the sign of the low word.

use crate::cpu::Ppc;
use crate::decode::{Format, Instruction};
use crate::exceptions::{Exception, ProgramCause};

/// 32-bit add with carry-in: returns (sum, carry-out, signed overflow).
fn add32(a: u32, b: u32, cin: u32) -> (u32, bool, bool) {
    let wide = u64::from(a) + u64::from(b) + u64::from(cin);
    let sum = wide as u32;
    let ca = wide > u64::from(u32::MAX);
    let ov = (a ^ sum) & (b ^ sum) & 0x8000_0000 != 0;
    (sum, ca, ov)
}

impl Ppc {
    fn invalid_format(ins: &Instruction) -> Exception {
        Exception::Program(ProgramCause::InvalidFormat {
            opcd: ins.opcd,
            xo: ins.xo,
        })
    }

    /// Primary opcodes 7, 8, 12-15: immediate arithmetic.
    pub(crate) fn exec_arith_imm(&mut self, ins: &Instruction) -> Result<(), Exception> {
        if ins.format != Format::D {
            return Err(Self::invalid_format(ins));
        }
        let simm = i64::from(ins.simm);
        match ins.opcd {
            // mulli
            7 => {
                let a = self.regs.gpr[ins.ra as usize] as i64;
                self.regs.gpr[ins.rt as usize] = a.wrapping_mul(simm) as u64;
            }
            // subfic: RT = SIMM - RA, CA from the 32-bit lanes
            8 => {
                let a = self.regs.gpr[ins.ra as usize];
                let (_, ca, _) = add32(!(a as u32), ins.simm as u32, 1);
                self.regs.gpr[ins.rt as usize] = (simm as u64).wrapping_sub(a);
                self.regs.set_xer_ca(ca);
            }
            // addic / addic.
            12 | 13 => {
                let a = self.regs.gpr[ins.ra as usize];
                let (_, ca, _) = add32(a as u32, ins.simm as u32, 0);
                let result = a.wrapping_add(simm as u64);
                self.regs.gpr[ins.rt as usize] = result;
                self.regs.set_xer_ca(ca);
                if ins.opcd == 13 {
                    self.regs.record_cr0(result as u32);
                }
            }
            // addi: RA == 0 reads literal zero
            14 => {
                let a = self.regs.gpr_or_zero(ins.ra);
                self.regs.gpr[ins.rt as usize] = a.wrapping_add(simm as u64);
            }
            // addis
            15 => {
                let a = self.regs.gpr_or_zero(ins.ra);
                self.regs.gpr[ins.rt as usize] = a.wrapping_add((simm << 16) as u64);
            }
            _ => return Err(Self::invalid_format(ins)),
        }
        Ok(())
    }

    /// Opcode 31 XO-form arithmetic.
    pub(crate) fn exec_arith_xo(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let xo = ins.xo & 0x1FF;
        let a = self.regs.gpr[ins.ra as usize];
        let b = self.regs.gpr[ins.rb as usize];
        let a32 = a as u32;
        let b32 = b as u32;
        let ca_in = u32::from(self.regs.xer & crate::registers::XER_CA != 0);

        let result: u64 = match xo {
            // add / addc / adde
            266 => a.wrapping_add(b),
            10 => {
                let (_, ca, _) = add32(a32, b32, 0);
                self.regs.set_xer_ca(ca);
                a.wrapping_add(b)
            }
            138 => {
                let (_, ca, _) = add32(a32, b32, ca_in);
                self.regs.set_xer_ca(ca);
                a.wrapping_add(b).wrapping_add(u64::from(ca_in))
            }
            // addme / addze
            234 => {
                let (_, ca, _) = add32(a32, 0xFFFF_FFFF, ca_in);
                self.regs.set_xer_ca(ca);
                a.wrapping_add(u64::MAX).wrapping_add(u64::from(ca_in))
            }
            202 => {
                let (_, ca, _) = add32(a32, 0, ca_in);
                self.regs.set_xer_ca(ca);
                a.wrapping_add(u64::from(ca_in))
            }
            // subf family: RT = RB - RA = RB + ~RA + carry
            40 => b.wrapping_sub(a),
            8 => {
                let (_, ca, _) = add32(!a32, b32, 1);
                self.regs.set_xer_ca(ca);
                b.wrapping_sub(a)
            }
            136 => {
                let (_, ca, _) = add32(!a32, b32, ca_in);
                self.regs.set_xer_ca(ca);
                (!a).wrapping_add(b).wrapping_add(u64::from(ca_in))
            }
            232 => {
                let (_, ca, _) = add32(!a32, 0xFFFF_FFFF, ca_in);
                self.regs.set_xer_ca(ca);
                (!a).wrapping_add(u64::MAX).wrapping_add(u64::from(ca_in))
            }
            200 => {
                let (_, ca, _) = add32(!a32, 0, ca_in);
                self.regs.set_xer_ca(ca);
                (!a).wrapping_add(u64::from(ca_in))
            }
            // neg
            104 => (a as i64).wrapping_neg() as u64,
            // mullw: full 64-bit product of the signed low words
            235 => (i64::from(a32 as i32)).wrapping_mul(i64::from(b32 as i32)) as u64,
            // mulhw / mulhwu
            75 => {
                let p = i64::from(a32 as i32).wrapping_mul(i64::from(b32 as i32));
                ((p >> 32) as i32) as i64 as u64
            }
            11 => {
                let p = u64::from(a32) * u64::from(b32);
                u64::from((p >> 32) as u32)
            }
            // divw / divwu: divide-by-zero and INT_MIN / -1 leave RT alone
            491 => {
                let (da, db) = (a32 as i32, b32 as i32);
                if db == 0 || (da == i32::MIN && db == -1) {
                    if ins.oe {
                        self.regs.set_xer_ov(true);
                    }
                    if ins.rc {
                        self.regs.record_cr0(self.regs.gpr32(ins.rt));
                    }
                    return Ok(());
                }
                (da.wrapping_div(db)) as i64 as u64
            }
            459 => {
                if b32 == 0 {
                    if ins.oe {
                        self.regs.set_xer_ov(true);
                    }
                    if ins.rc {
                        self.regs.record_cr0(self.regs.gpr32(ins.rt));
                    }
                    return Ok(());
                }
                u64::from(a32 / b32)
            }
            _ => return Err(Self::invalid_format(ins)),
        };

        if ins.oe {
            let ov = match xo {
                266 | 10 => add32(a32, b32, 0).2,
                138 => add32(a32, b32, ca_in).2,
                234 => add32(a32, 0xFFFF_FFFF, ca_in).2,
                202 => add32(a32, 0, ca_in).2,
                40 | 8 => add32(!a32, b32, 1).2,
                136 => add32(!a32, b32, ca_in).2,
                232 => add32(!a32, 0xFFFF_FFFF, ca_in).2,
                200 => add32(!a32, 0, ca_in).2,
                104 => a32 == 0x8000_0000,
                235 => {
                    let p = i64::from(a32 as i32).wrapping_mul(i64::from(b32 as i32));
                    i64::from(p as i32) != p
                }
                491 | 459 => false, // edge cases returned above
                _ => false,
            };
            self.regs.set_xer_ov(ov);
        }

        self.regs.gpr[ins.rt as usize] = result;
        if ins.rc {
            self.regs.record_cr0(result as u32);
        }
        Ok(())
    }
}
