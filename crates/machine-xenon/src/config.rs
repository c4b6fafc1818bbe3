//! Machine configuration.

use cpu_ppc::WritePolicy;

/// How to interpret the program image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Probe the magic: ELF when it matches, raw otherwise.
    #[default]
    Auto,
    Elf,
    /// Whole file copied to physical 0, PC starts at 0.
    Raw,
}

/// Xenon machine configuration.
pub struct XenonConfig {
    /// Program image contents (ELF or raw).
    pub image: Vec<u8>,
    /// Image interpretation. Defaults to probing the magic.
    pub kind: ImageKind,
    /// Physical RAM size in bytes. Defaults to 64 MiB.
    pub memory_size: usize,
    /// Data cache write policy.
    pub write_policy: WritePolicy,
    /// Framebuffer geometry.
    pub fb_width: u32,
    pub fb_height: u32,
    /// Instruction budget for `run`; `u64::MAX` means unbounded.
    pub max_cycles: u64,
}

impl XenonConfig {
    /// Configuration for the given image with the defaults above.
    #[must_use]
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            kind: ImageKind::Auto,
            memory_size: 64 * 1024 * 1024,
            write_policy: WritePolicy::WriteThrough,
            fb_width: 640,
            fb_height: 480,
            max_cycles: u64::MAX,
        }
    }
}
