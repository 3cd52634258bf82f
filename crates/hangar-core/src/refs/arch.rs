//! Host architecture naming.

/// Canonical architecture name of the running machine.
///
/// Follows the naming used in ref strings rather than the Rust target names,
/// so 32-bit x86 reports `i386`.
pub fn default_arch() -> &'static str {
    canonical_arch(std::env::consts::ARCH)
}

fn canonical_arch(target_arch: &'static str) -> &'static str {
    match target_arch {
        "x86" => "i386",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}
