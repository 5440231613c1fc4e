/// Register values returned by one CPUID invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Executes CPUID on whichever logical processor the calling thread runs on.
///
/// Returns `None` for leaves beyond the maximum the processor reports.
pub trait CpuidSource: Send + Sync {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> Option<CpuidResult>;

    /// The 12-character vendor identification string from leaf 0.
    fn vendor(&self) -> Option<String> {
        let leaf = self.cpuid(0, 0)?;
        let bytes: Vec<u8> = [leaf.ebx, leaf.edx, leaf.ecx]
            .iter()
            .flat_map(|reg| reg.to_le_bytes())
            .collect();
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// The `cpuid` instruction of the running processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCpuid;

impl CpuidSource for NativeCpuid {
    #[cfg(target_arch = "x86_64")]
    fn cpuid(&self, leaf: u32, subleaf: u32) -> Option<CpuidResult> {
        use std::arch::x86_64::{__cpuid, __cpuid_count};

        let range = leaf & 0x8000_0000;
        // SAFETY: cpuid is available on every x86_64 processor.
        let max = unsafe { __cpuid(range) }.eax;
        if leaf > max {
            return None;
        }

        // SAFETY: see above.
        let r = unsafe { __cpuid_count(leaf, subleaf) };
        Some(CpuidResult {
            eax: r.eax,
            ebx: r.ebx,
            ecx: r.ecx,
            edx: r.edx,
        })
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn cpuid(&self, _leaf: u32, _subleaf: u32) -> Option<CpuidResult> {
        None
    }
}
