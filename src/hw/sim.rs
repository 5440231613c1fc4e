//! In-process stand-ins for the hardware traits.
//!
//! [`SimulatedHardware`] models the host bridge SMN index/data window, any number of
//! SMU mailboxes backed by firmware closures, physical memory regions and MSRs.
//! [`SimulatedCpu`] answers CPUID per logical processor and tracks thread affinity.
//! Both record what was done to them so tests can assert on exact register traffic.

use crate::hw::{
    AffinityControl, CpuMask, CpuidResult, CpuidSource, HardwareAccess, PciAddress, SmnWindow,
};
use crate::smu::mailbox::{ARG_COUNT, MailboxRegisters};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Firmware behaviour for one mailbox: receives the opcode and the argument registers,
/// may rewrite the arguments, and returns the raw response code.
pub type FirmwareHandler = dyn Fn(u32, &mut [u32; ARG_COUNT]) -> u32 + Send + Sync;

/// One SMN write as observed on the data register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmnWrite {
    pub thread: ThreadId,
    pub address: u32,
    pub value: u32,
}

struct SimMailbox {
    registers: MailboxRegisters,
    handler: Arc<FirmwareHandler>,
    silent: bool,
}

#[derive(Default)]
struct SimState {
    index: u32,
    smn: HashMap<u32, u32>,
    unreadable: HashSet<u32>,
    mailboxes: Vec<SimMailbox>,
    writes: Vec<SmnWrite>,
    pci: HashMap<(PciAddress, u16), u32>,
    memory: Vec<(u64, Vec<u8>)>,
    memory_reads: usize,
    msrs: HashMap<(usize, u32), u64>,
}

/// A host bridge with SMU mailboxes behind its SMN window.
pub struct SimulatedHardware {
    window: SmnWindow,
    state: Mutex<SimState>,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHardware {
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(SmnWindow::HOST_BRIDGE)
    }

    #[must_use]
    pub fn with_window(window: SmnWindow) -> Self {
        Self {
            window,
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches firmware to the mailbox at `registers`. Replaces any earlier handler.
    pub fn add_mailbox<F>(&self, registers: MailboxRegisters, handler: F)
    where
        F: Fn(u32, &mut [u32; ARG_COUNT]) -> u32 + Send + Sync + 'static,
    {
        let mut state = self.state();
        state
            .mailboxes
            .retain(|m| m.registers.command != registers.command);
        state.mailboxes.push(SimMailbox {
            registers,
            handler: Arc::new(handler),
            silent: false,
        });
    }

    /// A silent mailbox accepts commands but never writes a response.
    pub fn set_silent(&self, registers: MailboxRegisters, silent: bool) {
        let mut state = self.state();
        for mailbox in &mut state.mailboxes {
            if mailbox.registers == registers {
                mailbox.silent = silent;
            }
        }
    }

    pub fn set_smn(&self, address: u32, value: u32) {
        self.state().smn.insert(address, value);
    }

    #[must_use]
    pub fn smn(&self, address: u32) -> u32 {
        self.state().smn.get(&address).copied().unwrap_or(0)
    }

    /// Makes reads of `address` fail with an I/O error.
    pub fn set_unreadable(&self, address: u32) {
        self.state().unreadable.insert(address);
    }

    /// Maps `bytes` at physical `address`, replacing any region starting there.
    pub fn map_memory(&self, address: u64, bytes: Vec<u8>) {
        let mut state = self.state();
        state.memory.retain(|(start, _)| *start != address);
        state.memory.push((address, bytes));
    }

    /// Overwrites part of an already mapped region.
    pub fn write_memory(&self, address: u64, bytes: &[u8]) {
        let mut state = self.state();
        for (start, region) in &mut state.memory {
            let Some(offset) = address.checked_sub(*start) else {
                continue;
            };
            let Ok(offset) = usize::try_from(offset) else {
                continue;
            };
            if offset + bytes.len() <= region.len() {
                region[offset..offset + bytes.len()].copy_from_slice(bytes);
                return;
            }
        }
    }

    #[must_use]
    pub fn memory_reads(&self) -> usize {
        self.state().memory_reads
    }

    pub fn set_msr(&self, cpu: usize, index: u32, value: u64) {
        self.state().msrs.insert((cpu, index), value);
    }

    /// Every SMN write issued so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<SmnWrite> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Opcodes written to the command register of the mailbox at `registers`.
    #[must_use]
    pub fn commands(&self, registers: MailboxRegisters) -> Vec<u32> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.address == registers.command)
            .map(|w| w.value)
            .collect()
    }

    fn smn_write(&self, address: u32, value: u32) {
        let (handler, registers, args) = {
            let mut state = self.state();
            state.writes.push(SmnWrite {
                thread: thread::current().id(),
                address,
                value,
            });
            state.smn.insert(address, value);

            let Some(mailbox) = state
                .mailboxes
                .iter()
                .find(|m| m.registers.command == address)
            else {
                return;
            };
            if mailbox.silent {
                return;
            }

            let registers = mailbox.registers;
            let handler = Arc::clone(&mailbox.handler);
            let mut args = [0u32; ARG_COUNT];
            for (i, arg) in args.iter_mut().enumerate() {
                *arg = state.smn.get(&registers.arg(i)).copied().unwrap_or(0);
            }
            (handler, registers, args)
        };

        let mut args = args;
        let response = handler(value, &mut args);

        let mut state = self.state();
        for (i, arg) in args.iter().enumerate() {
            state.smn.insert(registers.arg(i), *arg);
        }
        state.smn.insert(registers.status, response);
    }
}

impl HardwareAccess for SimulatedHardware {
    fn read_pci_config(&self, address: PciAddress, offset: u16) -> io::Result<u32> {
        let state = self.state();
        if address == self.window.pci && offset == self.window.data_offset {
            if state.unreadable.contains(&state.index) {
                return Err(io::Error::other(format!(
                    "SMN read of {:#x} failed",
                    state.index
                )));
            }
            return Ok(state.smn.get(&state.index).copied().unwrap_or(0));
        }
        Ok(state.pci.get(&(address, offset)).copied().unwrap_or(0))
    }

    fn write_pci_config(&self, address: PciAddress, offset: u16, value: u32) -> io::Result<()> {
        if address == self.window.pci && offset == self.window.index_offset {
            self.state().index = value;
        } else if address == self.window.pci && offset == self.window.data_offset {
            let index = self.state().index;
            self.smn_write(index, value);
        } else {
            self.state().pci.insert((address, offset), value);
        }
        Ok(())
    }

    fn read_msr(&self, cpu: usize, index: u32) -> io::Result<u64> {
        self.state()
            .msrs
            .get(&(cpu, index))
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "MSR not simulated"))
    }

    fn write_msr(&self, cpu: usize, index: u32, value: u64) -> io::Result<()> {
        self.set_msr(cpu, index, value);
        Ok(())
    }

    fn read_physical(&self, address: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut state = self.state();
        state.memory_reads += 1;
        for (start, region) in &state.memory {
            let Some(offset) = address.checked_sub(*start) else {
                continue;
            };
            let Ok(offset) = usize::try_from(offset) else {
                continue;
            };
            if offset + len <= region.len() {
                return Ok(region[offset..offset + len].to_vec());
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no memory mapped at {address:#x}+{len:#x}"),
        ))
    }
}

/// Shape of a simulated processor package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCpuSpec {
    pub family: u32,
    pub model: u32,
    pub package: u32,
    /// Enabled cores of each CCX, in enumeration order.
    pub ccx_cores: Vec<u32>,
    pub ccx_per_ccd: u32,
    pub threads_per_core: u32,
}

impl SimulatedCpuSpec {
    #[must_use]
    pub fn logical_count(&self) -> u32 {
        self.ccx_cores.iter().sum::<u32>() * self.threads_per_core
    }

    fn signature(&self) -> u32 {
        let (base_family, ext_family) = if self.family > 0xF {
            (0xF, self.family - 0xF)
        } else {
            (self.family, 0)
        };
        (ext_family << 20)
            | ((self.model >> 4) << 16)
            | (base_family << 8)
            | ((self.model & 0xF) << 4)
    }
}

/// CPUID and affinity for a simulated package. CPUID answers for the lowest
/// processor in the current affinity mask.
pub struct SimulatedCpu {
    leaves: Vec<HashMap<(u32, u32), CpuidResult>>,
    affinity: Mutex<CpuMask>,
    applied: Mutex<Vec<CpuMask>>,
}

impl SimulatedCpu {
    #[must_use]
    pub fn new(spec: &SimulatedCpuSpec) -> Self {
        let threads = spec.threads_per_core.max(1);
        let slots = 8 / spec.ccx_per_ccd.max(1);
        let logical = spec.logical_count();
        let mut leaves = Vec::new();

        for (ccx, &cores) in spec.ccx_cores.iter().enumerate() {
            let ccx = u32::try_from(ccx).unwrap_or(u32::MAX);
            for core in 0..cores {
                for thread in 0..threads {
                    let apic = (ccx * slots + core) * threads + thread;
                    leaves.push(Self::leaves_for(spec, logical, apic, slots * threads));
                }
            }
        }

        let all = (0..leaves.len()).collect();
        Self {
            leaves,
            affinity: Mutex::new(all),
            applied: Mutex::new(Vec::new()),
        }
    }

    fn leaves_for(
        spec: &SimulatedCpuSpec,
        logical: u32,
        apic: u32,
        sharing: u32,
    ) -> HashMap<(u32, u32), CpuidResult> {
        let threads = spec.threads_per_core.max(1);
        let mut map = HashMap::new();
        map.insert(
            (0, 0),
            CpuidResult {
                eax: 0x10,
                ebx: u32::from_le_bytes(*b"Auth"),
                edx: u32::from_le_bytes(*b"enti"),
                ecx: u32::from_le_bytes(*b"cAMD"),
            },
        );
        map.insert(
            (1, 0),
            CpuidResult {
                eax: spec.signature(),
                ebx: ((apic & 0xFF) << 24) | ((logical.min(0xFF)) << 16),
                ..CpuidResult::default()
            },
        );
        map.insert(
            (0x8000_0000, 0),
            CpuidResult {
                eax: 0x8000_0023,
                ..CpuidResult::default()
            },
        );
        map.insert(
            (0x8000_0001, 0),
            CpuidResult {
                ebx: spec.package << 28,
                ..CpuidResult::default()
            },
        );
        map.insert(
            (0x8000_0008, 0),
            CpuidResult {
                ecx: (logical - 1) & 0xFF,
                ..CpuidResult::default()
            },
        );
        map.insert(
            (0x8000_001D, 3),
            CpuidResult {
                eax: ((sharing - 1) & 0xFFF) << 14,
                ..CpuidResult::default()
            },
        );
        map.insert(
            (0x8000_001E, 0),
            CpuidResult {
                eax: apic,
                ebx: ((threads - 1) << 8) | ((apic / threads) & 0xFF),
                ecx: 0,
                edx: 0,
            },
        );
        map
    }

    /// Replaces the vendor string reported by leaf 0 on every processor.
    #[must_use]
    pub fn with_vendor(mut self, vendor: &[u8; 12]) -> Self {
        let word = |i: usize| u32::from_le_bytes([vendor[i], vendor[i + 1], vendor[i + 2], vendor[i + 3]]);
        for map in &mut self.leaves {
            if let Some(leaf) = map.get_mut(&(0, 0)) {
                leaf.ebx = word(0);
                leaf.edx = word(4);
                leaf.ecx = word(8);
            }
        }
        self
    }

    #[must_use]
    pub fn logical_count(&self) -> usize {
        self.leaves.len()
    }

    /// Every mask passed to [`AffinityControl::apply`], in order.
    #[must_use]
    pub fn applied(&self) -> Vec<CpuMask> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CpuidSource for SimulatedCpu {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> Option<CpuidResult> {
        let cpu = self
            .affinity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .unwrap_or(0);
        self.leaves.get(cpu)?.get(&(leaf, subleaf)).copied()
    }
}

impl AffinityControl for SimulatedCpu {
    fn current(&self) -> io::Result<CpuMask> {
        Ok(self
            .affinity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn apply(&self, mask: &CpuMask) -> io::Result<()> {
        if mask.is_empty() || mask.iter().any(|cpu| cpu >= self.leaves.len()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "affinity mask outside the simulated package",
            ));
        }
        *self.affinity.lock().unwrap_or_else(PoisonError::into_inner) = mask.clone();
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mask.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vermeer() -> SimulatedCpuSpec {
        SimulatedCpuSpec {
            family: 0x19,
            model: 0x21,
            package: 2,
            ccx_cores: vec![8, 8],
            ccx_per_ccd: 1,
            threads_per_core: 2,
        }
    }

    #[test]
    fn cpuid_follows_affinity() {
        let cpu = SimulatedCpu::new(&vermeer());
        assert_eq!(cpu.logical_count(), 32);
        assert_eq!(cpu.vendor().as_deref(), Some("AuthenticAMD"));

        let leaf1 = cpu.cpuid(1, 0).unwrap();
        assert_eq!(leaf1.eax, 0x00A2_0F10);
        assert_eq!((leaf1.ebx >> 16) & 0xFF, 32);

        cpu.apply(&CpuMask::single(17)).unwrap();
        let ext = cpu.cpuid(0x8000_001E, 0).unwrap();
        // Thread 1 of the first core on the second CCX.
        assert_eq!(ext.eax, 17);
        assert_eq!((cpu.cpuid(1, 0).unwrap().ebx >> 24) & 0xFF, 17);
        assert!(cpu.apply(&CpuMask::single(32)).is_err());
    }

    #[test]
    fn mailbox_handler_sees_arguments() {
        let registers = MailboxRegisters {
            command: 0x100,
            status: 0x104,
            args: 0x200,
        };
        let sim = SimulatedHardware::new();
        sim.add_mailbox(registers, |opcode, args| {
            args[0] = opcode + args[1];
            0x01
        });

        sim.set_smn(registers.arg(1), 5);
        sim.write_pci_config(PciAddress::HOST_BRIDGE, 0x60, registers.command)
            .unwrap();
        sim.write_pci_config(PciAddress::HOST_BRIDGE, 0x64, 0x10)
            .unwrap();

        assert_eq!(sim.smn(registers.arg(0)), 0x15);
        assert_eq!(sim.smn(registers.status), 0x01);
        assert_eq!(sim.commands(registers), vec![0x10]);
    }

    #[test]
    fn physical_reads_are_bounded_by_regions() {
        let sim = SimulatedHardware::new();
        sim.map_memory(0x1000, vec![1, 2, 3, 4]);
        assert_eq!(sim.read_physical(0x1001, 2).unwrap(), vec![2, 3]);
        assert!(sim.read_physical(0x1002, 4).is_err());
        assert_eq!(sim.memory_reads(), 2);
    }
}
