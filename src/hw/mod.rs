//! Privileged hardware access: PCI configuration space, MSRs, physical memory,
//! CPUID and processor affinity.
//!
//! The traits here are the seams between the SMU protocol code and whatever
//! provides raw register access. [`device::LinuxHardware`], [`cpuid::NativeCpuid`] and
//! [`affinity::LinuxAffinity`] talk to the running kernel; [`sim`] provides a
//! simulated SMU for tests and CI.

pub mod affinity;
pub mod bus;
pub mod cpuid;
pub mod device;
pub mod sim;

use std::io;

pub use affinity::{AffinityControl, CpuMask, PinGuard};
pub use bus::{BusGuard, HwContext, SmnWindow};
pub use cpuid::{CpuidResult, CpuidSource};

/// Location of a PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    /// The root complex (bus 0, device 0, function 0) that exposes the SMN index/data pair.
    pub const HOST_BRIDGE: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }
}

/// Raw register and memory primitives provided by a privileged driver.
///
/// Implementations perform a single access per call and never lock; callers that
/// need multi-step register sequences serialize through [`HwContext`].
pub trait HardwareAccess: Send + Sync {
    fn read_pci_config(&self, address: PciAddress, offset: u16) -> io::Result<u32>;

    fn write_pci_config(&self, address: PciAddress, offset: u16, value: u32) -> io::Result<()>;

    /// Reads MSR `index` on logical processor `cpu`.
    fn read_msr(&self, cpu: usize, index: u32) -> io::Result<u64>;

    /// Writes MSR `index` on logical processor `cpu`.
    fn write_msr(&self, cpu: usize, index: u32, value: u64) -> io::Result<()>;

    /// Reads `len` bytes of physical memory starting at `address`.
    fn read_physical(&self, address: u64, len: usize) -> io::Result<Vec<u8>>;
}
