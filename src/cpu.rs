//! The processor handle: identification, topology and power table built once at
//! construction, plus the operation surface used by monitoring and tuning tools.

use crate::config::SmuConfig;
use crate::error::{SmuError, SmuResult};
use crate::hw::affinity::LinuxAffinity;
use crate::hw::cpuid::NativeCpuid;
use crate::hw::device::LinuxHardware;
use crate::hw::{AffinityControl, CpuidSource, HardwareAccess, HwContext};
use crate::smu::commands::DdrBandwidth;
use crate::smu::mailbox::{MailboxKind, SmuStatus};
use crate::smu::power_table::{Field, PowerTable, PowerTableSnapshot};
use crate::smu::profile::{
    Codename, CpuSignature, FAMILY_15H, SmuIdentity, SmuOp, SmuProfile, SviTelemetry,
};
use crate::smu::topology::{CoreAddressing, CoreTopology, TopologyResolver};
use crate::smu::{RSMU_THEN_MP1, Smu};
use crate::utils::set_bits;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MSR_PATCH_LEVEL: u32 = 0x8B;
pub const MSR_PSTATE_STATUS: u32 = 0xC001_0063;
pub const MSR_HW_PSTATE_STATUS: u32 = 0xC001_0293;

const SUPPORTED_VENDORS: [&str; 2] = ["AuthenticAMD", "HygonGenuine"];

/// Wait between a limit change and the table refresh that observes it.
const LIMIT_SETTLE_DELAY: Duration = Duration::from_millis(25);
/// Values written while probing the firmware ceiling of a limit.
const LIMIT_PROBE_POWER: u32 = 2000;
const LIMIT_PROBE_THERMAL: u32 = 200;
const BOOST_PROBE_MHZ: u32 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStatus {
    Ready,
    /// Topology or power table unavailable; the command surface still works.
    PartiallyInitialized,
}

/// An identified AMD processor package and its SMU.
#[derive(Debug)]
pub struct Cpu {
    identity: SmuIdentity,
    smu: Smu,
    topology: Option<CoreTopology>,
    power_table: Option<PowerTable>,
    status: CpuStatus,
    last_error: Option<SmuError>,
}

impl Cpu {
    /// Opens the Linux device nodes and identifies the processor running this thread.
    ///
    /// # Errors
    /// See [`Cpu::new`]. Also fails when the host bridge config space cannot be opened.
    pub fn open(config: SmuConfig) -> SmuResult<Self> {
        let hw = Arc::new(LinuxHardware::open()?);
        Self::new(hw, &NativeCpuid, &LinuxAffinity, config)
    }

    /// Identifies the processor and builds its topology and power table.
    ///
    /// # Errors
    /// [`SmuError::NotAmd`] for other vendors and [`SmuError::Identification`] when
    /// the identification CPUID leaves are missing. Everything later degrades the
    /// handle to [`CpuStatus::PartiallyInitialized`] instead.
    pub fn new(
        hw: Arc<dyn HardwareAccess>,
        cpuid: &dyn CpuidSource,
        affinity: &dyn AffinityControl,
        config: SmuConfig,
    ) -> SmuResult<Self> {
        let vendor = cpuid
            .vendor()
            .ok_or_else(|| SmuError::Identification("CPUID leaf 0x0 unavailable".into()))?;
        if !SUPPORTED_VENDORS.contains(&vendor.as_str()) {
            return Err(SmuError::NotAmd(vendor));
        }

        let signature = CpuSignature::read(cpuid).ok_or_else(|| {
            SmuError::Identification("CPUID leaf 0x1 or 0x80000001 unavailable".into())
        })?;
        let codename = signature.codename();
        let profile = SmuProfile::for_codename(codename);
        info!(
            "{vendor} family {:#x} model {:#x}: {codename:?} ({:?})",
            signature.family, signature.model, profile.smu_type
        );

        let smu = Smu::new(Arc::new(HwContext::new(hw)), profile, config);
        let mut status = CpuStatus::Ready;
        let mut last_error = None;

        let topology =
            match TopologyResolver::new(&smu, cpuid, affinity, signature, codename).resolve() {
                Ok(topology) => {
                    if !topology.is_complete() {
                        status = CpuStatus::PartiallyInitialized;
                        last_error = Some(SmuError::Topology(format!("{:?}", topology.issues)));
                    }
                    Some(topology)
                }
                Err(e) => {
                    warn!("Topology detection failed: {e}");
                    status = CpuStatus::PartiallyInitialized;
                    last_error = Some(e);
                    None
                }
            };

        let smu_version = smu.smu_version().unwrap_or(0);
        let table_version = smu.table_version().unwrap_or(0);
        let identity = SmuIdentity {
            signature,
            codename,
            profile,
            smu_version,
            table_version,
            svi: SviTelemetry::for_codename(codename, smu_version),
        };
        debug!("SMU version {smu_version:#x}, table version {table_version:#x}");

        let power_table = match PowerTable::new(&smu, table_version) {
            Ok(table) => Some(table),
            Err(e) => {
                warn!("Power table unavailable: {e}");
                status = CpuStatus::PartiallyInitialized;
                last_error = Some(e);
                None
            }
        };

        if profile.rsmu.is_some() && !smu.test_message(MailboxKind::Rsmu) {
            debug!("RSMU test message failed");
            last_error = Some(SmuError::Command {
                operation: "test message",
                status: SmuStatus::Failed,
            });
        }

        Ok(Self {
            identity,
            smu,
            topology,
            power_table,
            status,
            last_error,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &SmuIdentity {
        &self.identity
    }

    #[must_use]
    pub fn codename(&self) -> Codename {
        self.identity.codename
    }

    #[must_use]
    pub fn smu(&self) -> &Smu {
        &self.smu
    }

    #[must_use]
    pub fn status(&self) -> CpuStatus {
        self.status
    }

    /// The most recent non-fatal problem seen during construction.
    #[must_use]
    pub fn last_error(&self) -> Option<&SmuError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn topology(&self) -> Option<&CoreTopology> {
        self.topology.as_ref()
    }

    #[must_use]
    pub fn power_table(&self) -> Option<&PowerTable> {
        self.power_table.as_ref()
    }

    /// Latest power table snapshot, `None` without a power table.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<PowerTableSnapshot>> {
        self.power_table.as_ref().map(PowerTable::snapshot)
    }

    // ---- power table ----

    #[must_use]
    pub fn dram_base_address(&self) -> u64 {
        self.power_table
            .as_ref()
            .map_or_else(|| self.smu.dram_base_address(), PowerTable::dram_base_address)
    }

    pub fn transfer_table_to_dram(&self) -> SmuStatus {
        self.smu.transfer_table_to_dram()
    }

    pub fn refresh_power_table(&self) -> SmuStatus {
        match &self.power_table {
            Some(table) => table.refresh(&self.smu),
            None => SmuStatus::Failed,
        }
    }

    fn table_value(&self, field: Field) -> Option<f32> {
        self.snapshot()?.get(field).filter(|v| *v > 0.0)
    }

    // ---- limits ----

    pub fn set_ppt_limit(&self, watts: u32) -> SmuStatus {
        self.smu.set_limit(SmuOp::SetPptLimit, watts)
    }

    pub fn set_tdc_vdd_limit(&self, amps: u32) -> SmuStatus {
        self.smu.set_limit(SmuOp::SetTdcVddLimit, amps)
    }

    pub fn set_tdc_soc_limit(&self, amps: u32) -> SmuStatus {
        self.smu.set_limit(SmuOp::SetTdcSocLimit, amps)
    }

    pub fn set_edc_vdd_limit(&self, amps: u32) -> SmuStatus {
        self.smu.set_limit(SmuOp::SetEdcVddLimit, amps)
    }

    pub fn set_edc_soc_limit(&self, amps: u32) -> SmuStatus {
        self.smu.set_limit(SmuOp::SetEdcSocLimit, amps)
    }

    pub fn set_htc_limit(&self, celsius: u32) -> SmuStatus {
        self.smu.set_htc_limit(celsius)
    }

    /// Sustained (STAPM) power limit of mobile parts, in W.
    pub fn set_stapm_limit(&self, watts: u32) -> SmuStatus {
        self.smu.set_mp1_limit(SmuOp::SetStapmLimit, watts)
    }

    /// STAPM time constant in seconds.
    pub fn set_stapm_time(&self, seconds: u32) -> SmuStatus {
        self.smu.set_mp1_limit(SmuOp::SetStapmTime, seconds)
    }

    pub fn set_ppt_fast_limit(&self, watts: u32) -> SmuStatus {
        self.smu.set_mp1_limit(SmuOp::SetPptFastLimit, watts)
    }

    pub fn set_ppt_slow_time(&self, seconds: u32) -> SmuStatus {
        self.smu.set_mp1_limit(SmuOp::SetPptSlowTime, seconds)
    }

    /// Power limit of the APU share on parts with shared CPU/GPU budgets, in W.
    pub fn set_ppt_apu_limit(&self, watts: u32) -> SmuStatus {
        self.smu.set_mp1_limit(SmuOp::SetPptApuLimit, watts)
    }

    pub fn set_tools_dram_address(&self, address: u64) -> SmuStatus {
        self.smu.set_tools_dram_address(address)
    }

    #[must_use]
    pub fn some1_clock(&self) -> Option<u32> {
        self.smu.some1_clock()
    }

    /// Current PPT limit in W: HSMP when available, else the power table.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn ppt_limit(&self) -> Option<u32> {
        self.smu
            .socket_power_limit()
            .filter(|&w| w > 0)
            .or_else(|| self.table_value(Field::PptLimit).map(|w| w as u32))
    }

    #[must_use]
    pub fn tdc_limit(&self) -> Option<f32> {
        self.table_value(Field::TdcLimit)
    }

    #[must_use]
    pub fn edc_limit(&self) -> Option<f32> {
        self.table_value(Field::EdcLimit)
    }

    #[must_use]
    pub fn thm_limit(&self) -> Option<f32> {
        self.table_value(Field::ThmLimit)
    }

    /// Highest PPT limit the firmware accepts, in W.
    ///
    /// HSMP reports it directly. Otherwise the limit is raised far above any real
    /// ceiling, the clamped value read back from the power table, and the previous
    /// limit restored.
    pub fn max_ppt_limit(&self) -> Option<u32> {
        if let Some(watts) = self.smu.max_socket_power_limit().filter(|&w| w > 0) {
            return Some(watts);
        }
        self.probe_max_limit(Field::PptLimit, SmuOp::SetPptLimit, LIMIT_PROBE_POWER)
    }

    pub fn max_tdc_limit(&self) -> Option<u32> {
        self.probe_max_limit(Field::TdcLimit, SmuOp::SetTdcVddLimit, LIMIT_PROBE_POWER)
    }

    pub fn max_edc_limit(&self) -> Option<u32> {
        self.probe_max_limit(Field::EdcLimit, SmuOp::SetEdcVddLimit, LIMIT_PROBE_POWER)
    }

    pub fn max_thm_limit(&self) -> Option<u32> {
        self.probe_max_limit(Field::ThmLimit, SmuOp::SetHtcLimit, LIMIT_PROBE_THERMAL)
    }

    /// Tries RSMU, then MP1. A mailbox that rejects the raised limit, or whose
    /// change never shows in the table, hands over to the next one. The previous
    /// limit is restored on the mailbox that accepted the raise.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn probe_max_limit(&self, field: Field, op: SmuOp, probe: u32) -> Option<u32> {
        let table = self.power_table.as_ref()?;
        if !table.supports(field) {
            return None;
        }
        let mailboxes: Vec<MailboxKind> = RSMU_THEN_MP1
            .iter()
            .copied()
            .filter(|&kind| self.smu.opcode(kind, op) != 0)
            .collect();
        if mailboxes.is_empty() {
            return None;
        }

        if !table.refresh(&self.smu).is_ok() {
            return None;
        }
        let previous = table.snapshot().get(field).filter(|v| *v > 0.0)? as u32;

        for kind in mailboxes {
            let status = self.smu.set_limit_on(kind, op, probe);
            thread::sleep(LIMIT_SETTLE_DELAY);
            if !status.is_ok() {
                debug!("{} probe rejected by {kind:?}: {status}", field.name());
                continue;
            }

            let ceiling = if table.refresh(&self.smu).is_ok() {
                table.snapshot().get(field).filter(|v| *v > 0.0).map(|v| v as u32)
            } else {
                None
            };

            thread::sleep(LIMIT_SETTLE_DELAY);
            let restored = self.smu.set_limit_on(kind, op, previous);
            if !restored.is_ok() {
                warn!(
                    "Could not restore {} to {previous} on {kind:?}: {restored}",
                    field.name()
                );
            }
            if ceiling.is_some() {
                return ceiling;
            }
        }
        None
    }

    // ---- cores ----

    /// Number of enabled cores known to the topology.
    #[must_use]
    pub fn core_count(&self) -> u32 {
        self.topology.as_ref().map_or(0, |t| t.cores)
    }

    /// Core mask of dense core `index`.
    ///
    /// # Errors
    /// [`SmuError::InvalidCore`] when the topology has no slot for `index`.
    pub fn core_mask(&self, index: u32) -> SmuResult<u32> {
        self.topology
            .as_ref()
            .and_then(|t| t.core_mask(index))
            .ok_or_else(|| self.invalid_core(index))
    }

    fn apic_id(&self, index: u32) -> SmuResult<u32> {
        self.topology
            .as_ref()
            .and_then(|t| t.apic_id(index))
            .ok_or_else(|| self.invalid_core(index))
    }

    fn invalid_core(&self, index: u32) -> SmuError {
        SmuError::InvalidCore {
            index,
            count: self.core_count(),
        }
    }

    /// Effective multiplier of core `index` from the hardware P-state status,
    /// rounded to a quarter step.
    ///
    /// # Errors
    /// [`SmuError::InvalidCore`] for an unknown core, `Io` when the MSR read fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn core_multiplier(&self, index: u32) -> SmuResult<f32> {
        let cpu = self
            .topology
            .as_ref()
            .and_then(|t| t.core_entries.get(index as usize))
            .map(|c| c.logical_cpu)
            .ok_or_else(|| self.invalid_core(index))?;

        let raw = self
            .smu
            .context()
            .hardware()
            .read_msr(cpu as usize, MSR_HW_PSTATE_STATUS)?;
        let fid = (raw & 0xFF) as f32;
        let did = ((raw >> 8) & 0x3F) as f32;
        if did == 0.0 {
            return Ok(0.0);
        }
        let multiplier = 25.0 * fid / (12.5 * did);
        Ok((multiplier * 4.0).round_ties_even() / 4.0)
    }

    pub fn set_frequency_all_cores(&self, mhz: u32) -> SmuStatus {
        self.smu.set_overclock_frequency_all_cores(mhz)
    }

    pub fn set_frequency_mask(&self, core_mask: u32, mhz: u32) -> SmuStatus {
        self.smu.set_overclock_frequency_per_core(core_mask, mhz)
    }

    /// # Errors
    /// [`SmuError::InvalidCore`] for an unknown core.
    pub fn set_frequency_core(&self, index: u32, mhz: u32) -> SmuResult<SmuStatus> {
        Ok(self.set_frequency_mask(self.core_mask(index)?, mhz))
    }

    /// Sets every core position of the CCX addressed by `ccx_mask`. Stops at the
    /// first core that is not accepted.
    pub fn set_frequency_ccx(&self, ccx_mask: u32, mhz: u32) -> SmuStatus {
        let addressing = self.addressing();
        for core in 0..addressing.cores_per_ccx() {
            let status = self.set_frequency_mask(set_bits(ccx_mask, 20, 4, core), mhz);
            if !status.is_ok() {
                return status;
            }
        }
        SmuStatus::Ok
    }

    /// Sets every CCX of the CCD addressed by `ccd_mask`.
    pub fn set_frequency_ccd(&self, ccd_mask: u32, mhz: u32) -> SmuStatus {
        for ccx in 0..self.addressing().ccx_per_ccd() {
            let status = self.set_frequency_ccx(set_bits(ccd_mask, 24, 4, ccx), mhz);
            if !status.is_ok() {
                return status;
            }
        }
        SmuStatus::Ok
    }

    fn addressing(&self) -> CoreAddressing {
        self.topology.as_ref().map_or_else(
            || CoreAddressing::for_family(self.identity.signature.family),
            |t| t.addressing,
        )
    }

    #[must_use]
    pub fn psm_margin_mask(&self, core_mask: u32) -> Option<i32> {
        self.smu.psm_margin(core_mask).ok()
    }

    /// # Errors
    /// [`SmuError::InvalidCore`] for an unknown core.
    pub fn psm_margin(&self, index: u32) -> SmuResult<Option<i32>> {
        Ok(self.psm_margin_mask(self.core_mask(index)?))
    }

    pub fn set_psm_margin_mask(&self, core_mask: u32, margin: i32) -> SmuStatus {
        self.smu.set_psm_margin(core_mask, margin)
    }

    /// # Errors
    /// [`SmuError::InvalidCore`] for an unknown core.
    pub fn set_psm_margin(&self, index: u32, margin: i32) -> SmuResult<SmuStatus> {
        Ok(self.set_psm_margin_mask(self.core_mask(index)?, margin))
    }

    pub fn set_all_psm_margin(&self, margin: i32) -> SmuStatus {
        self.smu.set_all_psm_margin(margin)
    }

    /// Boost limit of core `index` in MHz.
    ///
    /// # Errors
    /// [`SmuError::InvalidCore`] for an unknown core.
    pub fn boost_limit(&self, index: u32) -> SmuResult<Option<u32>> {
        Ok(self.smu.boost_limit(self.apic_id(index)?))
    }

    /// # Errors
    /// [`SmuError::InvalidCore`] for an unknown core.
    pub fn set_boost_limit(&self, index: u32, mhz: u32) -> SmuResult<SmuStatus> {
        Ok(self.smu.set_boost_limit(self.apic_id(index)?, mhz))
    }

    pub fn set_boost_limit_all_cores(&self, mhz: u32) -> SmuStatus {
        self.smu.set_boost_limit_all_cores(mhz)
    }

    /// Highest boost limit the firmware accepts: the all-core limit is raised to an
    /// unreachable value, core 0 read back, and the previous limit restored.
    pub fn max_boost_limit(&self) -> Option<u32> {
        let previous = self.boost_limit(0).ok().flatten().filter(|&mhz| mhz > 0)?;
        if !self.set_boost_limit_all_cores(BOOST_PROBE_MHZ).is_ok() {
            return None;
        }
        let ceiling = self.boost_limit(0).ok().flatten();
        let restored = self.set_boost_limit_all_cores(previous);
        if !restored.is_ok() {
            warn!("Could not restore boost limit to {previous} MHz: {restored}");
        }
        ceiling
    }

    // ---- tuning and identification ----

    pub fn set_overclock_cpu_vid(&self, vid: u8) -> SmuStatus {
        self.smu.set_overclock_cpu_vid(vid)
    }

    pub fn enable_oc_mode(&self) -> SmuStatus {
        self.smu.set_oc_mode(true)
    }

    pub fn disable_oc_mode(&self) -> SmuStatus {
        self.smu.set_oc_mode(false)
    }

    /// Whether manual overclocking is active.
    #[must_use]
    pub fn oc_mode(&self) -> bool {
        if self.identity.codename == Codename::SummitRidge {
            return self
                .smu
                .context()
                .hardware()
                .read_msr(0, MSR_PSTATE_STATUS)
                .is_ok_and(|v| (v >> 1) & 1 == 1);
        }
        if self.identity.signature.family == FAMILY_15H {
            return false;
        }
        self.pbo_scalar() == Some(0.0)
    }

    #[must_use]
    pub fn pbo_scalar(&self) -> Option<f32> {
        self.smu.pbo_scalar()
    }

    pub fn set_pbo_scalar(&self, scalar: u32) -> SmuStatus {
        self.smu.set_pbo_scalar(scalar)
    }

    #[must_use]
    pub fn smu_version(&self) -> u32 {
        self.identity.smu_version
    }

    #[must_use]
    pub fn hsmp_version(&self) -> u32 {
        self.smu.hsmp().version()
    }

    #[must_use]
    pub fn send_test_message(&self, kind: MailboxKind) -> bool {
        self.smu.test_message(kind)
    }

    /// Current socket power in W, HSMP only.
    #[must_use]
    pub fn socket_power(&self) -> Option<f32> {
        self.smu.socket_power()
    }

    #[must_use]
    pub fn prochot_asserted(&self) -> Option<bool> {
        self.smu.prochot_asserted()
    }

    /// Data fabric and memory clocks in MHz, HSMP only.
    #[must_use]
    pub fn fclk_memclk(&self) -> Option<(u32, u32)> {
        self.smu.fclk_memclk()
    }

    #[must_use]
    pub fn cclk_frequency_limit(&self) -> Option<u32> {
        self.smu.cclk_frequency_limit()
    }

    #[must_use]
    pub fn socket_c0_residency(&self) -> Option<u32> {
        self.smu.socket_c0_residency()
    }

    pub fn set_lclk_dpm_level_range(&self, nbio: u8, min: u8, max: u8) -> SmuStatus {
        self.smu.set_lclk_dpm_level_range(nbio, min, max)
    }

    #[must_use]
    pub fn ddr_bandwidth(&self) -> Option<DdrBandwidth> {
        self.smu.ddr_bandwidth()
    }

    /// Microcode patch level.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn patch_level(&self) -> Option<u32> {
        self.smu
            .context()
            .hardware()
            .read_msr(0, MSR_PATCH_LEVEL)
            .ok()
            .map(|v| v as u32)
    }
}
