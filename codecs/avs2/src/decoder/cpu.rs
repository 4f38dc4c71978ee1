//! CPU feature detection for kernel selection.

bitflags::bitflags! {
    /// SIMD capabilities the numerical kernels may exploit. The decoding
    /// pipeline itself never branches on these.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CpuFlags: u32 {
        const SSE2   = 1 << 0;
        const SSSE3  = 1 << 1;
        const SSE4   = 1 << 2;
        const AVX    = 1 << 3;
        const AVX2   = 1 << 4;
    }
}

/// Probe the running CPU. `disable_avx` masks the AVX levels, mirroring the
/// open-time option.
pub fn detect(disable_avx: bool) -> CpuFlags {
    let mut flags = CpuFlags::empty();

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if std::arch::is_x86_feature_detected!("sse2") {
            flags |= CpuFlags::SSE2;
        }
        if std::arch::is_x86_feature_detected!("ssse3") {
            flags |= CpuFlags::SSSE3;
        }
        if std::arch::is_x86_feature_detected!("sse4.1") {
            flags |= CpuFlags::SSE4;
        }
        if std::arch::is_x86_feature_detected!("avx") {
            flags |= CpuFlags::AVX;
        }
        if std::arch::is_x86_feature_detected!("avx2") {
            flags |= CpuFlags::AVX2;
        }
    }

    if disable_avx {
        flags &= !(CpuFlags::AVX | CpuFlags::AVX2);
    }

    flags
}

/// Human-readable capability list for the open-time log line.
pub fn capability_string(flags: CpuFlags) -> String {
    let names = [
        (CpuFlags::SSE2, "SSE2"),
        (CpuFlags::SSSE3, "SSSE3"),
        (CpuFlags::SSE4, "SSE4.1"),
        (CpuFlags::AVX, "AVX"),
        (CpuFlags::AVX2, "AVX2"),
    ];
    let caps: Vec<&str> = names
        .iter()
        .filter(|(f, _)| flags.contains(*f))
        .map(|(_, n)| *n)
        .collect();
    if caps.is_empty() {
        "none".to_string()
    } else {
        caps.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_avx_masks_avx_levels() {
        let flags = detect(true);
        assert!(!flags.intersects(CpuFlags::AVX | CpuFlags::AVX2));
    }

    #[test]
    fn capability_string_lists_flags() {
        assert_eq!(capability_string(CpuFlags::empty()), "none");
        assert_eq!(
            capability_string(CpuFlags::SSE2 | CpuFlags::AVX),
            "SSE2 AVX"
        );
    }
}
