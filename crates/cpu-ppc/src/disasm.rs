//! Mnemonic-only disassembly for diagnostics.
//!
//! Fatal halt lines and symbol-labelled traces want a human-readable
//! rendering of the faulting word. This is deliberately shallow: mnemonic
//! plus the registers that identify the instruction, raw word otherwise.

use crate::decode::{decode, Format, Instruction};

/// Render one instruction word.
#[must_use]
pub fn disasm(word: u32) -> String {
    match decode(word) {
        Ok(ins) => render(&ins),
        Err(_) => format!(".word {word:#010X}"),
    }
}

fn render(ins: &Instruction) -> String {
    match ins.opcd {
        14 => format!("addi r{},r{},{}", ins.rt, ins.ra, ins.simm),
        15 => format!("addis r{},r{},{}", ins.rt, ins.ra, ins.simm),
        7 => format!("mulli r{},r{},{}", ins.rt, ins.ra, ins.simm),
        8 => format!("subfic r{},r{},{}", ins.rt, ins.ra, ins.simm),
        10 => format!("cmpli cr{},r{},{}", ins.crfd(), ins.ra, ins.uimm),
        11 => format!("cmpi cr{},r{},{}", ins.crfd(), ins.ra, ins.simm),
        12 | 13 => format!("addic r{},r{},{}", ins.rt, ins.ra, ins.simm),
        16 => format!("bc {},{},{:+}", ins.bo(), ins.bi(), ins.bd),
        17 => "sc".to_string(),
        18 => format!("b{} {:+}", if ins.lk { "l" } else { "" }, ins.li),
        19 => match ins.xo {
            16 => "bclr".to_string(),
            528 => "bcctr".to_string(),
            50 => "rfi".to_string(),
            150 => "isync".to_string(),
            _ => format!("cr-op xo={}", ins.xo),
        },
        20 => format!("rlwimi r{},r{},{},{},{}", ins.ra, ins.rs(), ins.sh, ins.mb, ins.me),
        21 => format!("rlwinm r{},r{},{},{},{}", ins.ra, ins.rs(), ins.sh, ins.mb, ins.me),
        22 => format!("rlmi r{},r{}", ins.ra, ins.rs()),
        23 => format!("rlwnm r{},r{},r{}", ins.ra, ins.rs(), ins.rb),
        24..=29 => {
            let name = ["ori", "oris", "xori", "xoris", "andi.", "andis."][(ins.opcd - 24) as usize];
            format!("{name} r{},r{},{:#X}", ins.ra, ins.rs(), ins.uimm)
        }
        30 => format!("rld xo={} r{},r{}", ins.xo, ins.ra, ins.rs()),
        31 => format!("x-op xo={} r{},r{},r{}", ins.xo, ins.rt, ins.ra, ins.rb),
        32..=47 => {
            let name = [
                "lwz", "lwzu", "lbz", "lbzu", "stw", "stwu", "stb", "stbu", "lhz", "lhzu", "lha",
                "lhau", "sth", "sthu", "lmw", "stmw",
            ][(ins.opcd - 32) as usize];
            format!("{name} r{},{}(r{})", ins.rt, ins.simm, ins.ra)
        }
        48..=55 => {
            let name = ["lfs", "lfsu", "lfd", "lfdu", "stfs", "stfsu", "stfd", "stfdu"]
                [(ins.opcd - 48) as usize];
            format!("{name} f{},{}(r{})", ins.rt, ins.simm, ins.ra)
        }
        57 => format!("lfdp f{},{}(r{})", ins.rt, ins.ds, ins.ra),
        58 => format!("ld r{},{}(r{})", ins.rt, ins.ds, ins.ra),
        61 => format!("stfdp f{},{}(r{})", ins.rt, ins.ds, ins.ra),
        62 => format!("{} v{},{}(r{})", if ins.xo == 0 { "lvx128" } else { "stvx128" },
            ins.rt, ins.ds, ins.ra),
        59 | 63 => format!("fp-op {} xo={} f{}", ins.opcd, ins.xo, ins.rt),
        4 => match ins.format {
            Format::Va | Format::Vx => format!("v-op xo={} v{}", ins.xo, ins.rt),
            Format::Evx => format!("ev-op xo={} r{}", ins.xo, ins.rt),
            _ => format!("ps-op xo={} f{}", ins.xo, ins.rt),
        },
        2 | 3 => format!("trap to={} r{}", ins.rt, ins.ra),
        _ => format!(".word {:#010X}", ins.word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_words() {
        assert_eq!(disasm(0x3860_FFFF), "addi r3,r0,-1");
        assert_eq!(disasm(0x4800_0009), "bl +8");
        assert_eq!(disasm(0x4400_0002), "sc");
    }

    #[test]
    fn unknown_words_fall_back_to_raw() {
        assert!(disasm(0x0000_0000).starts_with(".word"));
    }
}
