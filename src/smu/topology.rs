//! Core topology discovery and per-core addressing.
//!
//! Per-core SMU commands address a physical core by CCD, CCX and position in the
//! upper 12 bits of the argument (see [`CoreAddressing`]). The OS only knows dense
//! logical processors, so the resolver combines CPUID enumeration with the CCD and
//! core-disable fuses to map every enabled core to its physical slot.

use crate::error::{SmuError, SmuResult};
use crate::hw::{AffinityControl, CpuidSource, PinGuard};
use crate::smu::Smu;
use crate::smu::mailbox::SmuStatus;
use crate::smu::profile::{Codename, CpuSignature, FAMILY_17H, FAMILY_19H};
use crate::utils::{count_set_bits, get_bits, log2};
use std::thread;
use tracing::{debug, warn};

pub const CORE_DISABLE_BASE: u32 = 0x3008_1800;
/// SMN distance between the core-disable fuses of consecutive CCDs.
pub const CCD_FUSE_STRIDE: u32 = 0x0200_0000;
/// CPPC capability register; bits [7:0] hold the highest performance of a core.
pub const MSR_CPPC_CAPABILITY_1: u32 = 0xC001_02B3;

const SLOTS_PER_CCD: u32 = 8;
const MAX_CCDS: u32 = 8;

/// Physical location of a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreAddress {
    pub ccd: u32,
    pub ccx: u32,
    pub core: u32,
}

/// Encoding of [`CoreAddress`] into the 32-bit core mask.
///
/// ```text
/// [31:28] CCD
/// [27:24] CCX within the CCD (always 0 when a CCD has a single CCX)
/// [23:20] core within the CCX
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreAddressing {
    ccx_per_ccd: u32,
}

impl CoreAddressing {
    /// Family 19h has one CCX per CCD, earlier Zen parts two.
    #[must_use]
    pub const fn for_family(family: u32) -> Self {
        Self {
            ccx_per_ccd: if family == FAMILY_19H { 1 } else { 2 },
        }
    }

    #[must_use]
    pub const fn ccx_per_ccd(self) -> u32 {
        self.ccx_per_ccd
    }

    #[must_use]
    pub const fn cores_per_ccx(self) -> u32 {
        SLOTS_PER_CCD / self.ccx_per_ccd
    }

    #[must_use]
    pub const fn encode(self, address: CoreAddress) -> u32 {
        let ccx = (address.ccx % self.ccx_per_ccd) & 0xF;
        let core = (address.core % self.cores_per_ccx()) & 0xF;
        ((((address.ccd << 4) | ccx) << 4) | core) << 20
    }

    #[must_use]
    pub const fn decode(self, mask: u32) -> CoreAddress {
        CoreAddress {
            ccd: get_bits(mask, 28, 4),
            ccx: get_bits(mask, 24, 4),
            core: get_bits(mask, 20, 4),
        }
    }

    /// Address of physical slot `slot` (`ccd * 8 + position`).
    #[must_use]
    pub const fn from_slot(self, slot: u32) -> CoreAddress {
        let ccd = slot / SLOTS_PER_CCD;
        CoreAddress {
            ccd,
            ccx: slot / self.cores_per_ccx() - self.ccx_per_ccd * ccd,
            core: slot % self.cores_per_ccx(),
        }
    }

    #[must_use]
    pub const fn slot(self, address: CoreAddress) -> u32 {
        address.ccd * SLOTS_PER_CCD + address.ccx * self.cores_per_ccx() + address.core
    }

    #[must_use]
    pub const fn slot_mask(self, slot: u32) -> u32 {
        self.encode(self.from_slot(slot))
    }
}

/// SMN locations of the CCD and core fuses for one processor generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseLayout {
    pub ccd_present: u32,
    pub ccd_down: u32,
    pub core_disable_offset: u32,
}

struct FuseRow {
    family: u32,
    /// `None` matches any model.
    models: Option<&'static [u32]>,
    /// `None` matches any codename.
    codename: Option<Codename>,
    layout: FuseLayout,
}

const fn fuses(ccd_present: u32, ccd_down: u32, core_disable_offset: u32) -> FuseLayout {
    FuseLayout {
        ccd_present,
        ccd_down,
        core_disable_offset,
    }
}

// https://gitlab.com/leogx9r/ryzen_smu/-/blob/master/userspace/monitor_cpu.c
static FUSE_TABLE: &[FuseRow] = &[
    FuseRow {
        family: FAMILY_19H,
        models: None,
        codename: Some(Codename::Raphael),
        layout: fuses(0x5D3BC, 0x5D3C0, 0x4D0),
    },
    FuseRow {
        family: FAMILY_19H,
        models: None,
        codename: None,
        layout: fuses(0x5D218, 0x5D21C, 0x598),
    },
    FuseRow {
        family: FAMILY_17H,
        models: Some(&[0x71, 0x31]),
        codename: None,
        layout: fuses(0x5D218, 0x5D21C, 0x238),
    },
    FuseRow {
        family: FAMILY_17H,
        models: None,
        codename: None,
        layout: fuses(0x5D258, 0x5D25C, 0x238),
    },
];

impl FuseLayout {
    #[must_use]
    pub fn lookup(signature: &CpuSignature, codename: Codename) -> Option<Self> {
        FUSE_TABLE
            .iter()
            .find(|row| {
                row.family == signature.family
                    && row.models.is_none_or(|m| m.contains(&signature.model))
                    && row.codename.is_none_or(|c| c == codename)
            })
            .map(|row| row.layout)
    }

    /// SMN address of the core-disable fuse of physical CCD `ccd`.
    #[must_use]
    pub const fn core_disable_address(&self, ccd: u32) -> u32 {
        (CORE_DISABLE_BASE + self.core_disable_offset) | (ccd * CCD_FUSE_STRIDE)
    }
}

/// One physical core as seen through CPUID on its first thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreEntry {
    pub logical_cpu: u32,
    pub apic_id: u32,
    /// Extended APIC id from CPUID 0x8000001E.
    pub core_id: u32,
    /// Zero-based L3 sharing group, in enumeration order.
    pub ccx_group: u32,
    pub l3_sharing: u32,
}

/// A stage of discovery that did not complete. The topology stays usable but
/// may be missing data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyIssue {
    NoFuseLayout,
    CcdFusesUnreadable,
    CoreFuseUnreadable { ccd: u32 },
    CoreCountMismatch { detected: usize, fused: usize },
    LayoutProbeExhausted { ccd: u32, probes: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreTopology {
    pub addressing: CoreAddressing,
    pub logical_cores: u32,
    pub threads_per_core: u32,
    pub nodes: u32,
    pub cores: u32,
    pub enabled_cores: u32,
    pub ccds: u32,
    pub ccxs: u32,
    pub physical_cores: u32,
    pub cores_per_ccx: u32,
    pub ccd_enable_map: u32,
    pub ccd_disable_map: u32,
    /// Core-disable fuse byte of each CCD, CCD `n` at bits `[8n+7:8n]`.
    pub core_disable_map: u64,
    /// Bitmap of enabled physical slots.
    pub core_layout: u64,
    /// Dense core index to physical slot.
    pub core_map: Vec<u32>,
    pub logical_to_apic: Vec<u32>,
    pub core_entries: Vec<CoreEntry>,
    /// Highest performance per core from CPPC, zero when unavailable.
    pub performance: Vec<u32>,
    pub issues: Vec<TopologyIssue>,
}

impl CoreTopology {
    fn new(addressing: CoreAddressing) -> Self {
        Self {
            addressing,
            logical_cores: 0,
            threads_per_core: 1,
            nodes: 1,
            cores: 0,
            enabled_cores: 0,
            ccds: 1,
            ccxs: addressing.ccx_per_ccd(),
            physical_cores: SLOTS_PER_CCD,
            cores_per_ccx: addressing.cores_per_ccx(),
            ccd_enable_map: 0,
            ccd_disable_map: 0,
            core_disable_map: 0,
            core_layout: 0,
            core_map: Vec::new(),
            logical_to_apic: Vec::new(),
            core_entries: Vec::new(),
            performance: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// All stages completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    fn set_layout(&mut self, slots: Vec<u32>) {
        self.core_layout = slots.iter().fold(0, |acc, &slot| acc | (1u64 << slot));
        self.core_map = slots;
    }

    #[must_use]
    pub fn physical_slot(&self, index: u32) -> Option<u32> {
        self.core_map.get(index as usize).copied()
    }

    #[must_use]
    pub fn core_address(&self, index: u32) -> Option<CoreAddress> {
        self.physical_slot(index)
            .map(|slot| self.addressing.from_slot(slot))
    }

    /// Core mask of dense core `index`.
    #[must_use]
    pub fn core_mask(&self, index: u32) -> Option<u32> {
        self.physical_slot(index)
            .map(|slot| self.addressing.slot_mask(slot))
    }

    #[must_use]
    pub fn apic_id(&self, index: u32) -> Option<u32> {
        self.core_entries.get(index as usize).map(|c| c.apic_id)
    }

    #[must_use]
    pub fn ccd(&self, index: u32) -> Option<u32> {
        self.core_address(index).map(|a| a.ccd)
    }

    #[must_use]
    pub fn ccx(&self, index: u32) -> Option<u32> {
        self.core_address(index).map(|a| a.ccx)
    }

    fn enabled_ccds(&self) -> impl Iterator<Item = u32> + '_ {
        (0..MAX_CCDS).filter(|&ccd| get_bits(self.ccd_enable_map, ccd, 1) == 1)
    }
}

/// Runs topology discovery once, at handle construction.
pub struct TopologyResolver<'a> {
    smu: &'a Smu,
    cpuid: &'a dyn CpuidSource,
    affinity: &'a dyn AffinityControl,
    signature: CpuSignature,
    codename: Codename,
}

impl<'a> TopologyResolver<'a> {
    pub fn new(
        smu: &'a Smu,
        cpuid: &'a dyn CpuidSource,
        affinity: &'a dyn AffinityControl,
        signature: CpuSignature,
        codename: Codename,
    ) -> Self {
        Self {
            smu,
            cpuid,
            affinity,
            signature,
            codename,
        }
    }

    /// Discovers the topology.
    ///
    /// # Errors
    /// Fails only when CPUID enumeration is impossible (missing leaves, affinity
    /// cannot be set). Fuse and layout problems are recorded in
    /// [`CoreTopology::issues`] instead.
    pub fn resolve(&self) -> SmuResult<CoreTopology> {
        let mut topology = CoreTopology::new(CoreAddressing::for_family(self.signature.family));

        self.read_counts(&mut topology)?;
        let fuses = FuseLayout::lookup(&self.signature, self.codename);
        let ccd_fuses_read = match fuses {
            Some(layout) => self.read_ccd_fuses(&mut topology, &layout),
            None => {
                warn!(
                    "No fuse layout for family {:#x} model {:#x}",
                    self.signature.family, self.signature.model
                );
                topology.issues.push(TopologyIssue::NoFuseLayout);
                false
            }
        };

        self.enumerate_cores(&mut topology)?;
        self.read_performance(&mut topology);

        if let Some(layout) = fuses
            && ccd_fuses_read
        {
            self.build_layout(&mut topology, &layout);

            if self.codename == Codename::Raphael && !topology.core_map.is_empty() {
                match self.correct_layout(&topology) {
                    Ok(slots) => topology.set_layout(slots),
                    Err(SmuError::ProbeExhausted { ccd, probes }) => {
                        warn!("Core layout probing gave up on CCD{ccd} after {probes} probes");
                        topology
                            .issues
                            .push(TopologyIssue::LayoutProbeExhausted { ccd, probes });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        debug!(
            "Topology: {} cores ({} logical) on {} CCD(s), layout {:#x}",
            topology.cores, topology.logical_cores, topology.ccds, topology.core_layout
        );
        Ok(topology)
    }

    fn read_counts(&self, topology: &mut CoreTopology) -> SmuResult<()> {
        let leaf1 = self
            .cpuid
            .cpuid(0x1, 0)
            .ok_or_else(|| SmuError::Topology("CPUID leaf 0x1 unavailable".into()))?;
        topology.logical_cores = get_bits(leaf1.ebx, 16, 8);

        let ext = self
            .cpuid
            .cpuid(0x8000_001E, 0)
            .ok_or_else(|| SmuError::Topology("CPUID leaf 0x8000001E unavailable".into()))?;
        topology.threads_per_core = get_bits(ext.ebx, 8, 4) + 1;
        topology.nodes = get_bits(ext.ecx, 8, 3) + 1;
        topology.cores = topology.logical_cores / topology.threads_per_core;

        topology.enabled_cores = self
            .cpuid
            .cpuid(0x8000_0008, 0)
            .map_or(topology.cores, |l| {
                (get_bits(l.ecx, 0, 8) + 1) / topology.threads_per_core
            });
        Ok(())
    }

    fn read_ccd_fuses(&self, topology: &mut CoreTopology, layout: &FuseLayout) -> bool {
        let read = self
            .smu
            .read_smn(layout.ccd_present)
            .and_then(|present| Ok((present, self.smu.read_smn(layout.ccd_down)?)));

        let (present, down) = match read {
            Ok(words) => words,
            Err(e) => {
                warn!("Could not read CCD fuses: {e}");
                topology.issues.push(TopologyIssue::CcdFusesUnreadable);
                return false;
            }
        };

        topology.ccd_enable_map = get_bits(present, 22, 8);
        topology.ccd_disable_map = get_bits(present, 30, 2) | (get_bits(down, 0, 6) << 2);
        topology.ccds = count_set_bits(topology.ccd_enable_map).max(1);
        topology.ccxs = topology.ccds * topology.addressing.ccx_per_ccd();
        topology.physical_cores = topology.ccds * SLOTS_PER_CCD;
        true
    }

    /// Pins to every logical processor in turn. The saved affinity is restored when
    /// the guard drops, on success and on every error path.
    fn enumerate_cores(&self, topology: &mut CoreTopology) -> SmuResult<()> {
        let threads_log2 = log2(topology.threads_per_core);
        let sharing_log2 = log2(topology.addressing.cores_per_ccx() * topology.threads_per_core);

        let pin = PinGuard::pin(self.affinity, 0)?;
        let mut previous_core = None;
        let mut previous_group = None;
        let mut group = 0;

        for cpu in 0..topology.logical_cores {
            if cpu > 0 {
                pin.repin(cpu as usize)?;
            }

            let apic_id = self
                .cpuid
                .cpuid(0x1, 0)
                .map(|l| get_bits(l.ebx, 24, 8))
                .ok_or_else(|| SmuError::Topology(format!("CPUID 0x1 failed on CPU{cpu}")))?;
            let core_id = self
                .cpuid
                .cpuid(0x8000_001E, 0)
                .map(|l| get_bits(l.eax, 0, 8))
                .ok_or_else(|| {
                    SmuError::Topology(format!("CPUID 0x8000001E failed on CPU{cpu}"))
                })?;
            let l3_sharing = self
                .cpuid
                .cpuid(0x8000_001D, 3)
                .map_or(0, |l| get_bits(l.eax, 14, 12) + 1);

            topology.logical_to_apic.push(apic_id);

            let sharing_id = core_id >> sharing_log2;
            if previous_group.is_some_and(|prev| prev != sharing_id) {
                group += 1;
            }
            previous_group = Some(sharing_id);

            let core_key = apic_id >> threads_log2;
            if previous_core != Some(core_key) {
                topology.core_entries.push(CoreEntry {
                    logical_cpu: cpu,
                    apic_id,
                    core_id,
                    ccx_group: group,
                    l3_sharing,
                });
            }
            previous_core = Some(core_key);
        }

        Ok(())
    }

    fn read_performance(&self, topology: &mut CoreTopology) {
        let hw = self.smu.context().hardware();
        topology.performance = topology
            .core_entries
            .iter()
            .map(|core| {
                hw.read_msr(core.logical_cpu as usize, MSR_CPPC_CAPABILITY_1)
                    .map_or(0, |v| (v & 0xFF) as u32)
            })
            .collect();
    }

    /// Compacts detected cores onto the physical slots left enabled by the
    /// core-disable fuses, CCD by CCD, position by position.
    fn build_layout(&self, topology: &mut CoreTopology, layout: &FuseLayout) {
        let ccx_per_ccd = topology.addressing.ccx_per_ccd();
        let mut slots = Vec::new();
        let mut first = true;

        for ccd in topology.enabled_ccds().collect::<Vec<_>>() {
            let disabled = match self.smu.read_smn(layout.core_disable_address(ccd)) {
                Ok(fuse) => fuse & 0xFF,
                Err(e) => {
                    warn!("Could not read core fuse for CCD{ccd}: {e}");
                    topology.issues.push(TopologyIssue::CoreFuseUnreadable { ccd });
                    continue;
                }
            };

            if first {
                topology.cores_per_ccx = (SLOTS_PER_CCD - count_set_bits(disabled)) / ccx_per_ccd;
                first = false;
            }
            topology.core_disable_map |= u64::from(disabled) << (ccd * SLOTS_PER_CCD);

            slots.extend(
                (0..SLOTS_PER_CCD)
                    .filter(|&pos| get_bits(disabled, pos, 1) == 0)
                    .map(|pos| ccd * SLOTS_PER_CCD + pos),
            );
        }

        let detected = topology.core_entries.len();
        if slots.len() != detected {
            warn!(
                "Fuses enable {} cores but {detected} were enumerated",
                slots.len()
            );
            topology.issues.push(TopologyIssue::CoreCountMismatch {
                detected,
                fused: slots.len(),
            });
            slots.truncate(detected);
        }

        topology.set_layout(slots);
    }

    /// Raphael fuses do not always match the real core positions. Walk each CCD and
    /// accept the first positions that answer a PSM margin read with a sane value.
    fn correct_layout(&self, topology: &CoreTopology) -> SmuResult<Vec<u32>> {
        let limit = self.smu.config().layout_probe_limit;
        let mut probes = 0;
        let mut slots = Vec::with_capacity(topology.core_map.len());

        for ccd in topology.enabled_ccds() {
            let expected = topology
                .core_map
                .iter()
                .filter(|&&slot| slot / SLOTS_PER_CCD == ccd)
                .count();
            let mut position = 0;

            for _ in 0..expected {
                loop {
                    if position >= SLOTS_PER_CCD || probes >= limit {
                        return Err(SmuError::ProbeExhausted { ccd, probes });
                    }
                    probes += 1;
                    let slot = ccd * SLOTS_PER_CCD + position;
                    position += 1;

                    if self.psm_margin_valid(topology.addressing.slot_mask(slot)) {
                        slots.push(slot);
                        break;
                    }
                }
            }
        }

        Ok(slots)
    }

    fn psm_margin_valid(&self, core_mask: u32) -> bool {
        let (low, high) = psm_margin_bounds(self.codename);
        let config = self.smu.config();

        for attempt in 0..config.psm_probe_attempts {
            if attempt > 0 {
                thread::sleep(config.psm_probe_delay);
            }
            match self.smu.psm_margin(core_mask) {
                Ok(margin) => return (low..=high).contains(&margin),
                Err(SmuStatus::Failed | SmuStatus::Unsupported) => return false,
                Err(_) => {}
            }
        }
        false
    }
}

/// Range of PSM margins a present core reports.
#[must_use]
pub const fn psm_margin_bounds(codename: Codename) -> (i32, i32) {
    match codename {
        Codename::Raphael => (-16959, 30),
        _ => (-30, 30),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmuConfig;
    use crate::hw::sim::{SimulatedCpu, SimulatedCpuSpec, SimulatedHardware};
    use crate::hw::{CpuMask, HwContext};
    use crate::smu::profile::{FAMILY_15H, PackageType, SmuProfile};
    use std::sync::Arc;

    #[test]
    fn masks_round_trip_for_every_valid_address() {
        for family in [FAMILY_17H, FAMILY_19H] {
            let addressing = CoreAddressing::for_family(family);
            for ccd in 0..16 {
                for ccx in 0..addressing.ccx_per_ccd() {
                    for core in 0..addressing.cores_per_ccx() {
                        let address = CoreAddress { ccd, ccx, core };
                        let mask = addressing.encode(address);
                        assert_eq!(mask & 0x000F_FFFF, 0);
                        assert_eq!(addressing.decode(mask), address);
                    }
                }
            }
        }
    }

    #[test]
    fn slots_map_to_addresses() {
        let zen2 = CoreAddressing::for_family(FAMILY_17H);
        assert_eq!(
            zen2.from_slot(13),
            CoreAddress {
                ccd: 1,
                ccx: 1,
                core: 1
            }
        );
        assert_eq!(zen2.slot_mask(13), 0x1110_0000);

        let zen3 = CoreAddressing::for_family(FAMILY_19H);
        for slot in 0..64 {
            assert_eq!(zen3.slot(zen3.from_slot(slot)), slot);
            assert_eq!(zen2.slot(zen2.from_slot(slot)), slot);
        }
        assert_eq!(zen3.slot_mask(10), 0x1020_0000);
    }

    #[test]
    fn fuse_table_lookup() {
        let sig = |family, model| CpuSignature {
            family,
            model,
            stepping: 0,
            package: PackageType::Am4,
        };

        let raphael = FuseLayout::lookup(&sig(FAMILY_19H, 0x61), Codename::Raphael).unwrap();
        assert_eq!(raphael.ccd_present, 0x5D3BC);
        assert_eq!(raphael.core_disable_address(1), 0x3208_1CD0);

        let vermeer = FuseLayout::lookup(&sig(FAMILY_19H, 0x21), Codename::Vermeer).unwrap();
        assert_eq!(vermeer.ccd_present, 0x5D218);
        assert_eq!(vermeer.core_disable_address(0), 0x3008_1D98);

        let matisse = FuseLayout::lookup(&sig(FAMILY_17H, 0x71), Codename::Matisse).unwrap();
        assert_eq!(matisse.ccd_present, 0x5D218);
        let pinnacle = FuseLayout::lookup(&sig(FAMILY_17H, 0x08), Codename::PinnacleRidge).unwrap();
        assert_eq!(pinnacle.ccd_down, 0x5D25C);

        assert!(FuseLayout::lookup(&sig(FAMILY_15H, 0x65), Codename::BristolRidge).is_none());
    }

    fn resolve(
        spec: &SimulatedCpuSpec,
        codename: Codename,
        setup: impl FnOnce(&SimulatedHardware),
    ) -> (SmuResult<CoreTopology>, SimulatedCpu) {
        let sim = Arc::new(SimulatedHardware::new());
        setup(&sim);
        let cpu = SimulatedCpu::new(spec);
        let smu = Smu::new(
            Arc::new(HwContext::new(sim.clone())),
            SmuProfile::for_codename(codename),
            SmuConfig {
                poll_budget: 4,
                ..SmuConfig::default()
            },
        );
        let signature = CpuSignature::read(&cpu).unwrap();
        let result = TopologyResolver::new(&smu, &cpu, &cpu, signature, codename).resolve();
        (result, cpu)
    }

    #[test]
    fn vermeer_with_disabled_cores() {
        let spec = SimulatedCpuSpec {
            family: FAMILY_19H,
            model: 0x21,
            package: 2,
            ccx_cores: vec![6, 6],
            ccx_per_ccd: 1,
            threads_per_core: 2,
        };
        let layout = fuses(0x5D218, 0x5D21C, 0x598);

        let (result, cpu) = resolve(&spec, Codename::Vermeer, |sim| {
            sim.set_smn(layout.ccd_present, 0b11 << 22);
            sim.set_smn(layout.core_disable_address(0), 0b1000_0100);
            sim.set_smn(layout.core_disable_address(1), 0b1100_0000);
        });
        let topology = result.unwrap();

        assert!(topology.is_complete(), "{:?}", topology.issues);
        assert_eq!(topology.logical_cores, 24);
        assert_eq!(topology.threads_per_core, 2);
        assert_eq!(topology.cores, 12);
        assert_eq!(topology.enabled_cores, 12);
        assert_eq!(topology.ccds, 2);
        assert_eq!(topology.cores_per_ccx, 6);
        assert_eq!(topology.core_map, vec![0, 1, 3, 4, 5, 6, 8, 9, 10, 11, 12, 13]);
        assert_eq!(topology.core_disable_map, 0xC084);
        assert_eq!(topology.core_entries.len(), 12);
        assert_eq!(topology.core_entries[6].ccx_group, 1);
        assert_eq!(topology.apic_id(6), Some(16));
        assert_eq!(topology.core_mask(2), Some(0x0030_0000));
        assert_eq!(topology.ccd(7), Some(1));

        // Affinity ends where it started.
        let all: CpuMask = (0..24).collect();
        assert_eq!(cpu.current().unwrap(), all);
    }

    #[test]
    fn unreadable_fuses_degrade_the_topology() {
        let spec = SimulatedCpuSpec {
            family: FAMILY_17H,
            model: 0x71,
            package: 2,
            ccx_cores: vec![4, 4],
            ccx_per_ccd: 2,
            threads_per_core: 2,
        };

        let (result, _) = resolve(&spec, Codename::Matisse, |sim| {
            sim.set_unreadable(0x5D218);
        });
        let topology = result.unwrap();
        assert_eq!(topology.issues, vec![TopologyIssue::CcdFusesUnreadable]);
        assert_eq!(topology.cores, 8);
        assert_eq!(topology.core_entries[4].ccx_group, 1);
        assert!(topology.core_map.is_empty());
        assert_eq!(topology.core_mask(0), None);
    }

    #[test]
    fn fuse_and_cpuid_disagreement_is_reported() {
        let spec = SimulatedCpuSpec {
            family: FAMILY_19H,
            model: 0x21,
            package: 2,
            ccx_cores: vec![8],
            ccx_per_ccd: 1,
            threads_per_core: 1,
        };
        let layout = fuses(0x5D218, 0x5D21C, 0x598);

        let (result, _) = resolve(&spec, Codename::Vermeer, |sim| {
            sim.set_smn(layout.ccd_present, 1 << 22);
            sim.set_smn(layout.core_disable_address(0), 0b0000_0011);
        });
        let topology = result.unwrap();
        assert_eq!(
            topology.issues,
            vec![TopologyIssue::CoreCountMismatch {
                detected: 8,
                fused: 6
            }]
        );
        assert_eq!(topology.core_map.len(), 6);
    }
}
