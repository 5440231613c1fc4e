use crate::hw::{HardwareAccess, PciAddress};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const PCI_DEVICES_PATH: &str = "/sys/bus/pci/devices";
const MEM_DEVICE_PATH: &str = "/dev/mem";

/// Hardware access through the Linux kernel's user-facing interfaces.
///
/// * PCI configuration space via `/sys/bus/pci/devices/<bdf>/config`
/// * MSRs via `/dev/cpu/<n>/msr` (the `msr` module must be loaded)
/// * physical memory via `/dev/mem` (requires `CONFIG_STRICT_DEVMEM` to allow the PM table region)
///
/// File handles are opened lazily and cached, so the struct is cheap to construct and
/// share. All methods need root privileges.
#[derive(Debug, Default)]
pub struct LinuxHardware {
    pci: Mutex<HashMap<PciAddress, Arc<File>>>,
    msr: Mutex<HashMap<usize, Arc<File>>>,
    mem: Mutex<Option<Arc<File>>>,
}

impl LinuxHardware {
    /// Opens the host bridge configuration space and verifies it is writable.
    ///
    /// # Errors
    /// Returns an error if the sysfs config file cannot be opened (missing privileges,
    /// non-PCI platform).
    pub fn open() -> io::Result<Self> {
        // SAFETY: geteuid has no preconditions.
        if unsafe { libc::geteuid() } != 0 {
            warn!("Not running as root, SMU access will most likely fail");
        }

        let hw = Self::default();
        hw.pci_file(PciAddress::HOST_BRIDGE)?;
        Ok(hw)
    }

    fn pci_file(&self, address: PciAddress) -> io::Result<Arc<File>> {
        let mut cache = self.pci.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = cache.get(&address) {
            return Ok(Arc::clone(file));
        }

        let path = format!(
            "{PCI_DEVICES_PATH}/0000:{:02x}:{:02x}.{:x}/config",
            address.bus, address.device, address.function
        );
        debug!("Opening {path}");
        let file = Arc::new(OpenOptions::new().read(true).write(true).open(path)?);
        cache.insert(address, Arc::clone(&file));
        Ok(file)
    }

    fn msr_file(&self, cpu: usize) -> io::Result<Arc<File>> {
        let mut cache = self.msr.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = cache.get(&cpu) {
            return Ok(Arc::clone(file));
        }

        let file = Arc::new(
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(format!("/dev/cpu/{cpu}/msr"))?,
        );
        cache.insert(cpu, Arc::clone(&file));
        Ok(file)
    }

    fn mem_file(&self) -> io::Result<Arc<File>> {
        let mut slot = self.mem.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = slot.as_ref() {
            return Ok(Arc::clone(file));
        }

        let file = Arc::new(OpenOptions::new().read(true).open(MEM_DEVICE_PATH)?);
        *slot = Some(Arc::clone(&file));
        Ok(file)
    }
}

impl HardwareAccess for LinuxHardware {
    fn read_pci_config(&self, address: PciAddress, offset: u16) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.pci_file(address)?
            .read_exact_at(&mut buf, u64::from(offset))?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_pci_config(&self, address: PciAddress, offset: u16, value: u32) -> io::Result<()> {
        self.pci_file(address)?
            .write_all_at(&value.to_le_bytes(), u64::from(offset))
    }

    fn read_msr(&self, cpu: usize, index: u32) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.msr_file(cpu)?
            .read_exact_at(&mut buf, u64::from(index))?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_msr(&self, cpu: usize, index: u32, value: u64) -> io::Result<()> {
        self.msr_file(cpu)?
            .write_all_at(&value.to_le_bytes(), u64::from(index))
    }

    fn read_physical(&self, address: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.mem_file()?.read_exact_at(&mut buf, address)?;
        Ok(buf)
    }
}
