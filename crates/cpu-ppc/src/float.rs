//! Floating-point executors.
//!
//! FPRs hold double-precision bit patterns; single-precision ops compute
//! in double and round the result through f32. The host's default
//! rounding is used; FPSCR records the invalid/zero-divide/overflow/
//! underflow/inexact conditions but not alternate rounding modes.
//!
//! Any FP instruction with MSR[FP] clear raises the FP-unavailable
//! exception before touching state.

use emu_core::Bus;

use crate::cpu::Ppc;
use crate::decode::Instruction;
use crate::exceptions::{Exception, ProgramCause};
use crate::registers::{
    FPSCR_FPRF, FPSCR_OX, FPSCR_UX, FPSCR_VXCVI, FPSCR_VXIDI, FPSCR_VXIMZ, FPSCR_VXISI,
    FPSCR_VXSNAN, FPSCR_VXSQRT, FPSCR_VXVC, FPSCR_VXZDZ, FPSCR_XX, FPSCR_ZX,
};

const F64_SIGN: u64 = 0x8000_0000_0000_0000;
const F64_EXP: u64 = 0x7FF0_0000_0000_0000;
const F64_FRAC: u64 = 0x000F_FFFF_FFFF_FFFF;
const F64_QUIET: u64 = 0x0008_0000_0000_0000;
const QNAN: u64 = 0x7FF8_0000_0000_0000;

fn is_nan(bits: u64) -> bool {
    bits & F64_EXP == F64_EXP && bits & F64_FRAC != 0
}

fn is_snan(bits: u64) -> bool {
    is_nan(bits) && bits & F64_QUIET == 0
}

/// First NaN operand, quieted: the value a NaN-producing op propagates.
fn propagate_nan(operands: &[u64]) -> Option<u64> {
    operands.iter().find(|&&b| is_nan(b)).map(|&b| b | F64_QUIET)
}

impl Ppc {
    fn check_fp(&self) -> Result<(), Exception> {
        if self.regs.msr_fp() {
            Ok(())
        } else {
            Err(Exception::FpUnavailable)
        }
    }

    fn fpr(&self, r: u8) -> f64 {
        f64::from_bits(self.regs.fpr[r as usize])
    }

    /// Raise VXSNAN if any operand is a signaling NaN.
    fn snan_check(&mut self, operands: &[u64]) {
        if operands.iter().any(|&b| is_snan(b)) {
            self.regs.raise_fpscr(FPSCR_VXSNAN);
        }
    }

    /// Record overflow/underflow/inexact for a finite-input computation,
    /// rounding through f32 for single-precision ops. Returns the stored
    /// bit pattern.
    fn settle(&mut self, value: f64, inputs_finite: bool, single: bool) -> u64 {
        let result = if single { f64::from(value as f32) } else { value };
        if single && result != value && !value.is_nan() {
            self.regs.raise_fpscr(FPSCR_XX);
        }
        if inputs_finite && result.is_infinite() {
            self.regs.raise_fpscr(FPSCR_OX | FPSCR_XX);
        }
        if result != 0.0 && result.abs() < f64::MIN_POSITIVE {
            self.regs.raise_fpscr(FPSCR_UX | FPSCR_XX);
        }
        result.to_bits()
    }

    // === Loads and stores (primary 48-55) ===

    pub(crate) fn exec_fp_load_store_d<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
    ) -> Result<(), Exception> {
        self.check_fp()?;
        let update = ins.opcd & 1 != 0;
        let ea = if update {
            if ins.ra == 0 {
                return Err(Exception::Program(ProgramCause::InvalidUpdate));
            }
            self.regs.gpr32(ins.ra).wrapping_add(ins.simm as u32)
        } else {
            (self.regs.gpr_or_zero(ins.ra) as u32).wrapping_add(ins.simm as u32)
        };

        match ins.opcd {
            // lfs(u): single load widens to double
            48 | 49 => {
                let single = f32::from_bits(self.read_u32(bus, ea)?);
                self.regs.fpr[ins.rt as usize] = f64::from(single).to_bits();
            }
            // lfd(u)
            50 | 51 => {
                self.regs.fpr[ins.rt as usize] = self.read_u64(bus, ea)?;
            }
            // stfs(u): narrow to single
            52 | 53 => {
                let value = self.fpr(ins.rs()) as f32;
                self.write_u32(bus, ea, value.to_bits())?;
            }
            // stfd(u)
            54 | 55 => {
                self.write_u64(bus, ea, self.regs.fpr[ins.rs() as usize])?;
            }
            _ => unreachable!("routed by primary opcode"),
        }
        if update {
            self.regs.gpr[ins.ra as usize] = u64::from(ea);
        }
        Ok(())
    }

    // === Xenon pair forms ===

    /// lfdp (57) / stfdp (61): two consecutive doubles, even FRT, 8-byte EA.
    pub(crate) fn exec_fp_pair_d<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
    ) -> Result<(), Exception> {
        self.check_fp()?;
        let ea = (self.regs.gpr_or_zero(ins.ra) as u32).wrapping_add(ins.ds as u32);
        self.fp_pair_transfer(bus, ins, ea, ins.opcd == 57)
    }

    /// lfdpx (791) / stfdpx (919): indexed pair forms.
    pub(crate) fn exec_fp_pair_x<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
    ) -> Result<(), Exception> {
        self.check_fp()?;
        let ea = (self.regs.gpr_or_zero(ins.ra) as u32).wrapping_add(self.regs.gpr32(ins.rb));
        self.fp_pair_transfer(bus, ins, ea, ins.xo == 791)
    }

    fn fp_pair_transfer<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
        ea: u32,
        is_load: bool,
    ) -> Result<(), Exception> {
        if ins.rt & 1 != 0 {
            return Err(Exception::Program(ProgramCause::InvalidFormat {
                opcd: ins.opcd,
                xo: ins.xo,
            }));
        }
        if ea & 7 != 0 {
            return Err(Exception::Alignment { ea });
        }
        let rt = ins.rt as usize;
        if is_load {
            self.regs.fpr[rt] = self.read_u64(bus, ea)?;
            self.regs.fpr[rt + 1] = self.read_u64(bus, ea.wrapping_add(8))?;
        } else {
            self.write_u64(bus, ea, self.regs.fpr[rt])?;
            self.write_u64(bus, ea.wrapping_add(8), self.regs.fpr[rt + 1])?;
        }
        Ok(())
    }

    // === Arithmetic ===

    /// Primary opcode 59: single-precision arithmetic.
    pub(crate) fn exec_fp_single(&mut self, ins: &Instruction) -> Result<(), Exception> {
        self.check_fp()?;
        let result = match ins.xo {
            18 | 20 | 21 | 22 | 25 | 28 | 29 | 30 | 31 => self.fp_arith(ins, true)?,
            // fres: reciprocal estimate
            24 => {
                let b = self.regs.fpr[ins.rb as usize];
                self.snan_check(&[b]);
                let value = f64::from((1.0 / f64::from_bits(b)) as f32);
                if f64::from_bits(b) == 0.0 {
                    self.regs.raise_fpscr(FPSCR_ZX);
                }
                value.to_bits()
            }
            // frsqrtes
            26 => self.recip_sqrt(ins.rb)?,
            _ => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        };
        self.regs.fpr[ins.rt as usize] = result;
        if ins.rc {
            self.regs.record_cr1();
        }
        Ok(())
    }

    /// Primary opcode 63: double-precision arithmetic, conversions,
    /// sign ops, compares and FPSCR management.
    pub(crate) fn exec_fp_double(&mut self, ins: &Instruction) -> Result<(), Exception> {
        self.check_fp()?;
        if ins.format == crate::decode::Format::A {
            let result = match ins.xo {
                18 | 20 | 21 | 22 | 25 | 28 | 29 | 30 | 31 => self.fp_arith(ins, false)?,
                // fsel: FRA >= 0 picks FRC, otherwise (including NaN) FRB
                23 => {
                    if self.fpr(ins.ra) >= 0.0 {
                        self.regs.fpr[ins.frc as usize]
                    } else {
                        self.regs.fpr[ins.rb as usize]
                    }
                }
                26 => self.recip_sqrt(ins.rb)?,
                _ => {
                    return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                        opcd: ins.opcd,
                        xo: ins.xo,
                    }))
                }
            };
            self.regs.fpr[ins.rt as usize] = result;
            if ins.rc {
                self.regs.record_cr1();
            }
            return Ok(());
        }

        match ins.xo {
            // fcmpu / fcmpo
            0 | 32 => return self.fp_compare(ins),
            // frsp
            12 => {
                let b = self.regs.fpr[ins.rb as usize];
                self.snan_check(&[b]);
                let value = f64::from_bits(b);
                self.regs.fpr[ins.rt as usize] = if value.is_nan() {
                    b | F64_QUIET
                } else {
                    self.settle(value, value.is_finite(), true)
                };
            }
            // fctiw / fctiwz
            14 | 15 => {
                let value = self.fpr(ins.rb);
                let rounded = if ins.xo == 15 { value.trunc() } else { round_even(value) };
                let int = self.saturate_i32(value, rounded);
                self.regs.fpr[ins.rt as usize] = 0xFFF8_0000_0000_0000 | u64::from(int as u32);
            }
            // fctid / fctidz
            814 | 815 => {
                let value = self.fpr(ins.rb);
                let rounded = if ins.xo == 815 { value.trunc() } else { round_even(value) };
                let int = self.saturate_i64(value, rounded);
                self.regs.fpr[ins.rt as usize] = int as u64;
            }
            // fcfid
            846 => {
                let value = self.regs.fpr[ins.rb as usize] as i64;
                self.regs.fpr[ins.rt as usize] = (value as f64).to_bits();
            }
            // Sign manipulation
            40 => self.regs.fpr[ins.rt as usize] = self.regs.fpr[ins.rb as usize] ^ F64_SIGN,
            72 => self.regs.fpr[ins.rt as usize] = self.regs.fpr[ins.rb as usize],
            136 => self.regs.fpr[ins.rt as usize] = self.regs.fpr[ins.rb as usize] | F64_SIGN,
            264 => self.regs.fpr[ins.rt as usize] = self.regs.fpr[ins.rb as usize] & !F64_SIGN,
            // mcrfs: copy an FPSCR field to CR, clearing what was reported
            64 => {
                let crfs = ins.ra >> 2;
                let nibble = (self.regs.fpscr >> (28 - 4 * u32::from(crfs))) & 0xF;
                self.regs.set_cr_field(ins.crfd(), nibble);
                // FX and the exception bits in the copied field are cleared
                let clear = (0xF << (28 - 4 * u32::from(crfs)))
                    & !(crate::registers::FPSCR_FEX | crate::registers::FPSCR_VX);
                self.regs.fpscr &= !clear;
            }
            // mtfsb1 / mtfsb0
            38 => {
                self.regs.fpscr |= 1 << (31 - u32::from(ins.rt));
            }
            70 => {
                self.regs.fpscr &= !(1 << (31 - u32::from(ins.rt)));
            }
            // mtfsfi: immediate into one FPSCR field
            134 => {
                let imm = u32::from(ins.rb >> 1);
                let shift = 28 - 4 * u32::from(ins.crfd());
                self.regs.fpscr = (self.regs.fpscr & !(0xF << shift)) | (imm << shift);
            }
            // mffs: straight read of FPSCR into the low half of FRT
            583 => {
                self.regs.fpr[ins.rt as usize] = u64::from(self.regs.fpscr);
            }
            // mtfsf: FRB low half into FPSCR under the FLM field mask
            711 => {
                let flm = (ins.word >> 17) & 0xFF;
                let mut mask = 0u32;
                for field in 0..8 {
                    if flm & (0x80 >> field) != 0 {
                        mask |= 0xF << (28 - 4 * field);
                    }
                }
                let src = self.regs.fpr[ins.rb as usize] as u32;
                self.regs.fpscr = (self.regs.fpscr & !mask) | (src & mask);
            }
            _ => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        }
        if ins.rc {
            self.regs.record_cr1();
        }
        Ok(())
    }

    /// Shared A-form arithmetic body for opcodes 59 and 63.
    fn fp_arith(&mut self, ins: &Instruction, single: bool) -> Result<u64, Exception> {
        let a_bits = self.regs.fpr[ins.ra as usize];
        let b_bits = self.regs.fpr[ins.rb as usize];
        let c_bits = self.regs.fpr[ins.frc as usize];
        let a = f64::from_bits(a_bits);
        let b = f64::from_bits(b_bits);
        let c = f64::from_bits(c_bits);

        let operands: ([u64; 3], usize) = match ins.xo {
            22 | 26 => ([b_bits, 0, 0], 1),
            25 => ([a_bits, c_bits, 0], 2),
            28 | 29 | 30 | 31 => ([a_bits, b_bits, c_bits], 3),
            _ => ([a_bits, b_bits, 0], 2),
        };
        let used = &operands.0[..operands.1];

        let value: f64 = match ins.xo {
            18 => {
                self.snan_check(used);
                if a == 0.0 && b == 0.0 {
                    self.regs.raise_fpscr(FPSCR_VXZDZ);
                } else if a.is_infinite() && b.is_infinite() {
                    self.regs.raise_fpscr(FPSCR_VXIDI);
                } else if b == 0.0 && !a.is_nan() {
                    self.regs.raise_fpscr(FPSCR_ZX);
                }
                a / b
            }
            20 => {
                self.snan_check(used);
                if a.is_infinite() && b.is_infinite() && a == b {
                    self.regs.raise_fpscr(FPSCR_VXISI);
                }
                a - b
            }
            21 => {
                self.snan_check(used);
                if a.is_infinite() && b.is_infinite() && a != b {
                    self.regs.raise_fpscr(FPSCR_VXISI);
                }
                a + b
            }
            22 => {
                self.snan_check(used);
                if b < 0.0 {
                    self.regs.raise_fpscr(FPSCR_VXSQRT);
                }
                b.sqrt()
            }
            25 => {
                self.snan_check(used);
                if (a.is_infinite() && c == 0.0) || (a == 0.0 && c.is_infinite()) {
                    self.regs.raise_fpscr(FPSCR_VXIMZ);
                }
                a * c
            }
            // Fused forms: a*c then +/- b
            28 | 29 | 30 | 31 => {
                self.snan_check(used);
                if (a.is_infinite() && c == 0.0) || (a == 0.0 && c.is_infinite()) {
                    self.regs.raise_fpscr(FPSCR_VXIMZ);
                }
                let product = a * c;
                let sum = match ins.xo {
                    28 => product - b,
                    29 => product + b,
                    30 => -(product - b),
                    31 => -(product + b),
                    _ => unreachable!(),
                };
                if product.is_infinite() && b.is_infinite() && sum.is_nan() && !product.is_nan() {
                    self.regs.raise_fpscr(FPSCR_VXISI);
                }
                sum
            }
            _ => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    opcd: ins.opcd,
                    xo: ins.xo,
                }))
            }
        };

        if value.is_nan() {
            return Ok(propagate_nan(used).unwrap_or(QNAN));
        }
        // A zero-divide infinity is ZX, not an overflow
        let divided_by_zero = ins.xo == 18 && b == 0.0;
        let inputs_finite =
            used.iter().all(|&bits| f64::from_bits(bits).is_finite()) && !divided_by_zero;
        Ok(self.settle(value, inputs_finite, single))
    }

    /// frsqrte(s): reciprocal square root estimate.
    fn recip_sqrt(&mut self, rb: u8) -> Result<u64, Exception> {
        let b_bits = self.regs.fpr[rb as usize];
        let b = f64::from_bits(b_bits);
        self.snan_check(&[b_bits]);
        if b < 0.0 {
            self.regs.raise_fpscr(FPSCR_VXSQRT);
            return Ok(QNAN);
        }
        if b == 0.0 {
            self.regs.raise_fpscr(FPSCR_ZX);
        }
        if b.is_nan() {
            return Ok(b_bits | F64_QUIET);
        }
        Ok((1.0 / b.sqrt()).to_bits())
    }

    /// fcmpu / fcmpo.
    fn fp_compare(&mut self, ins: &Instruction) -> Result<(), Exception> {
        let a_bits = self.regs.fpr[ins.ra as usize];
        let b_bits = self.regs.fpr[ins.rb as usize];
        let a = f64::from_bits(a_bits);
        let b = f64::from_bits(b_bits);

        let nibble = if a.is_nan() || b.is_nan() {
            0b0001
        } else if a < b {
            0b1000
        } else if a > b {
            0b0100
        } else {
            0b0010
        };
        self.regs.set_cr_field(ins.crfd(), nibble);
        // FPCC mirrors the comparison
        self.regs.fpscr = (self.regs.fpscr & !FPSCR_FPRF) | (nibble << 12);

        self.snan_check(&[a_bits, b_bits]);
        if ins.xo == 32 && (a.is_nan() || b.is_nan()) {
            self.regs.raise_fpscr(FPSCR_VXVC);
            return Err(Exception::Program(ProgramCause::FpCompare));
        }
        Ok(())
    }

    fn saturate_i32(&mut self, original: f64, rounded: f64) -> i32 {
        if original.is_nan() {
            self.regs.raise_fpscr(FPSCR_VXCVI);
            return i32::MIN;
        }
        if rounded > f64::from(i32::MAX) {
            self.regs.raise_fpscr(FPSCR_VXCVI);
            return i32::MAX;
        }
        if rounded < f64::from(i32::MIN) {
            self.regs.raise_fpscr(FPSCR_VXCVI);
            return i32::MIN;
        }
        if rounded != original {
            self.regs.raise_fpscr(FPSCR_XX);
        }
        rounded as i32
    }

    fn saturate_i64(&mut self, original: f64, rounded: f64) -> i64 {
        if original.is_nan() {
            self.regs.raise_fpscr(FPSCR_VXCVI);
            return i64::MIN;
        }
        if rounded >= 9.223_372_036_854_776e18 {
            self.regs.raise_fpscr(FPSCR_VXCVI);
            return i64::MAX;
        }
        if rounded < -9.223_372_036_854_776e18 {
            self.regs.raise_fpscr(FPSCR_VXCVI);
            return i64::MIN;
        }
        if rounded != original {
            self.regs.raise_fpscr(FPSCR_XX);
        }
        rounded as i64
    }
}

/// Round half to even, the PowerPC default rounding mode.
fn round_even(value: f64) -> f64 {
    let floor = value.floor();
    let diff = value - floor;
    if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snan_and_qnan_classification() {
        let qnan = QNAN;
        let snan = 0x7FF0_0000_0000_0001;
        assert!(is_nan(qnan) && !is_snan(qnan));
        assert!(is_nan(snan) && is_snan(snan));
        assert!(!is_nan(1.5f64.to_bits()));
    }

    #[test]
    fn nan_propagation_quiets_the_first_nan() {
        let snan = 0x7FF0_0000_0000_0001;
        let got = propagate_nan(&[1.0f64.to_bits(), snan]).unwrap();
        assert_eq!(got, snan | F64_QUIET);
        assert!(propagate_nan(&[1.0f64.to_bits()]).is_none());
    }

    #[test]
    fn round_even_ties() {
        assert_eq!(round_even(2.5), 2.0);
        assert_eq!(round_even(3.5), 4.0);
        assert_eq!(round_even(-2.5), -2.0);
        assert_eq!(round_even(2.3), 2.0);
        assert_eq!(round_even(2.7), 3.0);
    }
}
