use crate::hw::{HardwareAccess, PciAddress};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_micros(50);

/// The PCI configuration index/data register pair used to reach SMN space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmnWindow {
    pub pci: PciAddress,
    pub index_offset: u16,
    pub data_offset: u16,
}

impl SmnWindow {
    pub const HOST_BRIDGE: Self = Self {
        pci: PciAddress::HOST_BRIDGE,
        index_offset: 0x60,
        data_offset: 0x64,
    };
}

/// Shared handle to the hardware register window.
///
/// All register traffic that spans more than one access (SMN index then data,
/// a full mailbox exchange) must happen while holding the bus guard returned by
/// [`HwContext::lock_bus`]. The SMN helpers are only reachable through that guard.
pub struct HwContext {
    hw: Arc<dyn HardwareAccess>,
    bus: Mutex<()>,
}

impl std::fmt::Debug for HwContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwContext").finish_non_exhaustive()
    }
}

impl HwContext {
    pub fn new(hw: Arc<dyn HardwareAccess>) -> Self {
        Self {
            hw,
            bus: Mutex::new(()),
        }
    }

    /// Direct access for single, self-contained operations (MSR reads, memory reads).
    pub fn hardware(&self) -> &dyn HardwareAccess {
        &*self.hw
    }

    /// Acquires the bus mutex, waiting at most `timeout`.
    ///
    /// Returns `None` when the mutex stays contended; this is a normal outcome and
    /// callers report it as `Busy` rather than blocking.
    pub fn lock_bus(&self, timeout: Duration) -> Option<BusGuard<'_>> {
        let deadline = Instant::now() + timeout;
        loop {
            let lock = match self.bus.try_lock() {
                Ok(lock) => Some(lock),
                // A panic mid-exchange leaves no state behind the mutex itself.
                Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => None,
            };

            if let Some(lock) = lock {
                return Some(BusGuard {
                    _lock: lock,
                    hw: &*self.hw,
                });
            }

            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(LOCK_RETRY_INTERVAL);
        }
    }
}

/// Exclusive access to the register window. Released on drop.
pub struct BusGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    hw: &'a dyn HardwareAccess,
}

impl BusGuard<'_> {
    pub fn read_smn(&self, window: &SmnWindow, address: u32) -> io::Result<u32> {
        self.hw
            .write_pci_config(window.pci, window.index_offset, address)?;
        self.hw.read_pci_config(window.pci, window.data_offset)
    }

    pub fn write_smn(&self, window: &SmnWindow, address: u32, value: u32) -> io::Result<()> {
        self.hw
            .write_pci_config(window.pci, window.index_offset, address)?;
        self.hw
            .write_pci_config(window.pci, window.data_offset, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimulatedHardware;

    #[test]
    fn contended_bus_times_out() {
        let ctx = HwContext::new(Arc::new(SimulatedHardware::new()));
        let held = ctx.lock_bus(Duration::from_millis(1)).expect("first lock");

        let start = Instant::now();
        assert!(ctx.lock_bus(Duration::from_millis(5)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(5));

        drop(held);
        assert!(ctx.lock_bus(Duration::from_millis(1)).is_some());
    }

    #[test]
    fn smn_access_goes_through_index_data_pair() {
        let sim = Arc::new(SimulatedHardware::new());
        sim.set_smn(0x5D218, 0x1234_5678);
        let ctx = HwContext::new(sim.clone());

        let bus = ctx.lock_bus(Duration::from_millis(1)).unwrap();
        assert_eq!(
            bus.read_smn(&SmnWindow::HOST_BRIDGE, 0x5D218).unwrap(),
            0x1234_5678
        );
        bus.write_smn(&SmnWindow::HOST_BRIDGE, 0x100, 7).unwrap();
        drop(bus);

        assert_eq!(sim.smn(0x100), 7);
    }
}
