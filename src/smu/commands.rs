//! Typed SMU commands: argument packing and result decoding on top of [`Smu`].

use crate::smu::mailbox::{MailboxKind, SmuStatus};
use crate::smu::profile::{DramAddressScheme, SmuOp};
use crate::smu::{HSMP_ONLY, RSMU_THEN_MP1, Smu};
use crate::utils::{get_bits, psm_margin_arg};
use std::thread;
use tracing::{debug, warn};

/// Core mask bits that select CCD, CCX and core; the low 20 bits carry the payload.
pub const CORE_MASK_ADDRESS_BITS: u32 = 0xFFF0_0000;

impl Smu {
    /// Sends the test message with argument 1 and checks the firmware answers 2.
    pub fn test_message(&self, kind: MailboxKind) -> bool {
        let result = self.send(kind, SmuOp::TestMessage, &[1]);
        result.value() == Some(2)
    }

    pub fn smu_version(&self) -> Option<u32> {
        self.send_routed(RSMU_THEN_MP1, SmuOp::GetSmuVersion, &[])
            .value()
    }

    pub fn table_version(&self) -> Option<u32> {
        self.send_routed(RSMU_THEN_MP1, SmuOp::GetTableVersion, &[])
            .value()
    }

    /// Physical address of the power table as reported by the firmware. Zero when
    /// the request fails.
    pub fn dram_base_address(&self) -> u64 {
        let arg = self.profile().table_arg;
        match self.profile().dram_address {
            DramAddressScheme::Combined => {
                let result = self.send_routed(RSMU_THEN_MP1, SmuOp::GetDramBaseAddress, &[arg]);
                if !result.is_ok() {
                    debug!("DRAM base address request failed: {}", result.status);
                    return 0;
                }
                (u64::from(result.args[1]) << 32) | u64::from(result.args[0])
            }
            DramAddressScheme::Split => {
                let half = |selector: u32| {
                    self.send_routed(RSMU_THEN_MP1, SmuOp::GetDramBaseAddress, &[selector])
                        .value()
                };
                match (half(0), half(1)) {
                    (Some(low), Some(high)) => (u64::from(high) << 32) | u64::from(low),
                    _ => 0,
                }
            }
        }
    }

    /// One attempt of the table transfer; retrying is up to the caller.
    pub fn transfer_table_to_dram(&self) -> SmuStatus {
        let arg = self.profile().table_arg;
        self.send_routed(RSMU_THEN_MP1, SmuOp::TransferTableToDram, &[arg])
            .status
    }

    /// Transfers the table, sleeping and retrying while the firmware reports busy.
    pub fn transfer_table_with_retry(&self) -> SmuStatus {
        let attempts = self.config().transfer_attempts.max(1);
        for attempt in 1..=attempts {
            match self.transfer_table_to_dram() {
                SmuStatus::Busy => {
                    debug!("Table transfer busy (attempt {attempt}/{attempts})");
                    if attempt < attempts {
                        thread::sleep(self.config().transfer_retry_delay);
                    }
                }
                status => return status,
            }
        }
        warn!("Table transfer still busy after {attempts} attempts");
        SmuStatus::Failed
    }

    /// Sends a limit setter on the first mailbox that implements it. `value` is in
    /// W, A, degrees Celsius or seconds depending on `op`.
    pub fn set_limit(&self, op: SmuOp, value: u32) -> SmuStatus {
        self.send_routed(RSMU_THEN_MP1, op, &[limit_arg(op, value)])
            .status
    }

    /// Same as [`Smu::set_limit`] on one mailbox only.
    pub fn set_limit_on(&self, kind: MailboxKind, op: SmuOp, value: u32) -> SmuStatus {
        self.send(kind, op, &[limit_arg(op, value)]).status
    }

    /// Thermal limit in degrees Celsius, sent unscaled.
    pub fn set_htc_limit(&self, celsius: u32) -> SmuStatus {
        self.set_limit(SmuOp::SetHtcLimit, celsius)
    }

    /// Mobile limits (STAPM, fast and slow PPT, APU PPT) exist on MP1 only.
    pub fn set_mp1_limit(&self, op: SmuOp, value: u32) -> SmuStatus {
        self.set_limit_on(MailboxKind::Mp1, op, value)
    }

    /// Points the MP1 tools interface at a driver-owned buffer.
    pub fn set_tools_dram_address(&self, address: u64) -> SmuStatus {
        #[allow(clippy::cast_possible_truncation)]
        let args = [address as u32, (address >> 32) as u32];
        self.send(MailboxKind::Mp1, SmuOp::SetToolsDramAddress, &args)
            .status
    }

    pub fn some1_clock(&self) -> Option<u32> {
        self.send(MailboxKind::Mp1, SmuOp::GetSome1Clock, &[0]).value()
    }

    pub fn set_oc_mode(&self, enabled: bool) -> SmuStatus {
        let op = if enabled {
            SmuOp::EnableOcMode
        } else {
            SmuOp::DisableOcMode
        };
        self.send_routed(RSMU_THEN_MP1, op, &[]).status
    }

    pub fn set_overclock_frequency_all_cores(&self, mhz: u32) -> SmuStatus {
        self.send_routed(RSMU_THEN_MP1, SmuOp::SetOverclockFrequencyAllCores, &[mhz])
            .status
    }

    pub fn set_overclock_frequency_per_core(&self, core_mask: u32, mhz: u32) -> SmuStatus {
        let arg = core_mask | (mhz & 0xF_FFFF);
        self.send_routed(RSMU_THEN_MP1, SmuOp::SetOverclockFrequencyPerCore, &[arg])
            .status
    }

    pub fn set_overclock_cpu_vid(&self, vid: u8) -> SmuStatus {
        self.send_routed(RSMU_THEN_MP1, SmuOp::SetOverclockCpuVid, &[u32::from(vid)])
            .status
    }

    pub fn pbo_scalar(&self) -> Option<f32> {
        self.send_routed(RSMU_THEN_MP1, SmuOp::GetPboScalar, &[])
            .value()
            .map(f32::from_bits)
    }

    pub fn set_pbo_scalar(&self, scalar: u32) -> SmuStatus {
        self.send_routed(RSMU_THEN_MP1, SmuOp::SetPboScalar, &[scalar])
            .status
    }

    /// PSM (Curve Optimizer) margin of the core addressed by `core_mask`.
    pub fn psm_margin(&self, core_mask: u32) -> Result<i32, SmuStatus> {
        let result = self.send_routed(
            RSMU_THEN_MP1,
            SmuOp::GetPsmMargin,
            &[core_mask & CORE_MASK_ADDRESS_BITS],
        );
        #[allow(clippy::cast_possible_wrap)]
        result.value().map(|v| v as i32).ok_or(result.status)
    }

    pub fn set_psm_margin(&self, core_mask: u32, margin: i32) -> SmuStatus {
        let arg = (core_mask & CORE_MASK_ADDRESS_BITS) | psm_margin_arg(margin);
        self.send_routed(RSMU_THEN_MP1, SmuOp::SetPsmMargin, &[arg])
            .status
    }

    pub fn set_all_psm_margin(&self, margin: i32) -> SmuStatus {
        self.send_routed(RSMU_THEN_MP1, SmuOp::SetAllPsmMargin, &[psm_margin_arg(margin)])
            .status
    }

    /// Boost limit in MHz of the core with `apic_id`.
    pub fn boost_limit(&self, apic_id: u32) -> Option<u32> {
        self.send_routed(HSMP_ONLY, SmuOp::ReadBoostLimit, &[apic_id])
            .value()
    }

    pub fn set_boost_limit(&self, apic_id: u32, mhz: u32) -> SmuStatus {
        let arg = (apic_id << 16) | (mhz & 0xFFFF);
        self.send_routed(HSMP_ONLY, SmuOp::WriteBoostLimit, &[arg])
            .status
    }

    pub fn set_boost_limit_all_cores(&self, mhz: u32) -> SmuStatus {
        self.send_routed(HSMP_ONLY, SmuOp::WriteBoostLimitAllCores, &[mhz])
            .status
    }

    /// Current socket power in W.
    pub fn socket_power(&self) -> Option<f32> {
        self.send_routed(HSMP_ONLY, SmuOp::ReadSocketPower, &[])
            .value()
            .map(milli_to_unit)
    }

    /// Socket power limit in whole W.
    pub fn socket_power_limit(&self) -> Option<u32> {
        self.send_routed(HSMP_ONLY, SmuOp::ReadSocketPowerLimit, &[])
            .value()
            .map(|mw| mw / 1000)
    }

    pub fn max_socket_power_limit(&self) -> Option<u32> {
        self.send_routed(HSMP_ONLY, SmuOp::ReadMaxSocketPowerLimit, &[])
            .value()
            .map(|mw| mw / 1000)
    }

    /// Socket power limit in W, sent as mW.
    pub fn set_socket_power_limit(&self, watts: u32) -> SmuStatus {
        self.send_routed(
            HSMP_ONLY,
            SmuOp::WriteSocketPowerLimit,
            &[watts.saturating_mul(1000)],
        )
        .status
    }

    /// Whether PROCHOT is currently asserted.
    pub fn prochot_asserted(&self) -> Option<bool> {
        self.send_routed(HSMP_ONLY, SmuOp::ReadProchotStatus, &[])
            .value()
            .map(|v| v & 1 == 1)
    }

    /// Data fabric and memory clocks in MHz.
    pub fn fclk_memclk(&self) -> Option<(u32, u32)> {
        let result = self.send_routed(HSMP_ONLY, SmuOp::ReadFclkMemclk, &[]);
        result.is_ok().then_some((result.args[0], result.args[1]))
    }

    /// Most restrictive core clock limit of the socket in MHz.
    pub fn cclk_frequency_limit(&self) -> Option<u32> {
        self.send_routed(HSMP_ONLY, SmuOp::ReadCclkFrequencyLimit, &[])
            .value()
    }

    /// Average C0 residency of all cores, in percent.
    pub fn socket_c0_residency(&self) -> Option<u32> {
        self.send_routed(HSMP_ONLY, SmuOp::ReadSocketC0Residency, &[])
            .value()
    }

    /// Restricts the LCLK DPM levels of NBIO `nbio` to `min..=max`.
    pub fn set_lclk_dpm_level_range(&self, nbio: u8, min: u8, max: u8) -> SmuStatus {
        let arg = (u32::from(nbio) << 16) | (u32::from(max) << 8) | u32::from(min);
        self.send_routed(HSMP_ONLY, SmuOp::SetLclkDpmLevelRange, &[arg])
            .status
    }

    pub fn ddr_bandwidth(&self) -> Option<DdrBandwidth> {
        self.send_routed(HSMP_ONLY, SmuOp::ReadDdrBandwidth, &[])
            .value()
            .map(DdrBandwidth::from_raw)
    }
}

/// Memory bandwidth as reported by HSMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdrBandwidth {
    /// Theoretical maximum in GB/s.
    pub max_gbps: u32,
    pub utilized_gbps: u32,
    pub utilized_percent: u32,
}

impl DdrBandwidth {
    /// `[31:20]` maximum, `[19:8]` utilized, `[7:0]` utilization.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            max_gbps: get_bits(raw, 20, 12),
            utilized_gbps: get_bits(raw, 8, 12),
            utilized_percent: get_bits(raw, 0, 8),
        }
    }
}

/// Firmware argument of a limit setter: thermal limits and time constants go
/// through as is, power and current limits in milli-units.
const fn limit_arg(op: SmuOp, value: u32) -> u32 {
    match op {
        SmuOp::SetHtcLimit | SmuOp::SetStapmTime | SmuOp::SetPptSlowTime => value,
        _ => value.saturating_mul(1000),
    }
}

#[allow(clippy::cast_precision_loss)]
fn milli_to_unit(value: u32) -> f32 {
    value as f32 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmuConfig;
    use crate::hw::HwContext;
    use crate::hw::sim::SimulatedHardware;
    use crate::smu::mailbox::{MailboxRegisters, RESPONSE_OK, RESPONSE_REJECTED_BUSY};
    use crate::smu::profile::{MailboxProfile, SmuProfile, SmuType};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn smu_for(sim: &Arc<SimulatedHardware>, smu_type: SmuType) -> Smu {
        let config = SmuConfig {
            poll_budget: 4,
            transfer_retry_delay: Duration::from_millis(1),
            ..SmuConfig::default()
        };
        Smu::new(
            Arc::new(HwContext::new(sim.clone())),
            SmuProfile::for_type(smu_type),
            config,
        )
    }

    #[test]
    fn limits_are_sent_in_milli_units() {
        let sim = Arc::new(SimulatedHardware::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let rsmu = SmuProfile::for_type(SmuType::Cpu2).rsmu.unwrap().registers;
        sim.add_mailbox(rsmu, move |opcode, args| {
            log.lock().unwrap().push((opcode, args[0]));
            RESPONSE_OK
        });

        let smu = smu_for(&sim, SmuType::Cpu2);
        assert_eq!(smu.set_limit(SmuOp::SetPptLimit, 142), SmuStatus::Ok);
        assert_eq!(smu.set_htc_limit(90), SmuStatus::Ok);
        assert_eq!(*seen.lock().unwrap(), vec![(0x53, 142_000), (0x56, 90)]);
    }

    #[test]
    fn per_core_arguments_are_packed() {
        let sim = Arc::new(SimulatedHardware::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let rsmu = SmuProfile::for_type(SmuType::Cpu3).rsmu.unwrap().registers;
        sim.add_mailbox(rsmu, move |opcode, args| {
            log.lock().unwrap().push((opcode, args[0]));
            RESPONSE_OK
        });

        let smu = smu_for(&sim, SmuType::Cpu3);
        let mask = 0x0130_0000;
        smu.set_overclock_frequency_per_core(mask | 0x5, 4650);
        smu.set_psm_margin(mask | 0x1234, -15);
        smu.set_all_psm_margin(5);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (0x5D, 0x0130_0000 | 4650 | 0x5),
                (0xA, 0x0130_FFF1),
                (0xB, 5),
            ]
        );
    }

    #[test]
    fn busy_transfer_is_retried_up_to_the_bound() {
        let sim = Arc::new(SimulatedHardware::new());
        let rsmu = SmuProfile::for_type(SmuType::Cpu3).rsmu.unwrap().registers;
        sim.add_mailbox(rsmu, |_, _| RESPONSE_REJECTED_BUSY);

        let smu = smu_for(&sim, SmuType::Cpu3);
        assert_eq!(smu.transfer_table_with_retry(), SmuStatus::Failed);
        assert_eq!(sim.commands(rsmu), vec![0x5; 10]);
    }

    #[test]
    fn split_dram_address() {
        let sim = Arc::new(SimulatedHardware::new());
        let rsmu = SmuProfile::for_type(SmuType::Apu0).rsmu.unwrap().registers;
        sim.add_mailbox(rsmu, |_, args| {
            args[0] = if args[0] == 0 { 0xBEEF_0000 } else { 0x1 };
            RESPONSE_OK
        });

        let smu = smu_for(&sim, SmuType::Apu0);
        assert_eq!(smu.dram_base_address(), 0x1_BEEF_0000);
    }

    #[test]
    fn hsmp_limits_are_converted_to_watts() {
        let sim = Arc::new(SimulatedHardware::new());
        let hsmp = SmuProfile::for_type(SmuType::Cpu3).hsmp.unwrap();
        sim.add_mailbox(hsmp, |opcode, args| {
            args[0] = match opcode {
                0x03 => 1,
                0x06 => 142_500,
                0x07 => 230_000,
                0x0A => 4950,
                _ => args[0],
            };
            RESPONSE_OK
        });

        let smu = smu_for(&sim, SmuType::Cpu3);
        assert_eq!(smu.socket_power_limit(), Some(142));
        assert_eq!(smu.max_socket_power_limit(), Some(230));
        assert_eq!(smu.boost_limit(4), Some(4950));
        assert_eq!(smu.set_boost_limit(4, 5050), SmuStatus::Ok);

        let writes = sim.writes();
        let sent = writes
            .iter()
            .rev()
            .find(|w| w.address == hsmp.arg(0))
            .unwrap();
        assert_eq!(sent.value, (4 << 16) | 5050);
    }

    #[test]
    fn test_message_checks_the_sum() {
        let sim = Arc::new(SimulatedHardware::new());
        let profile = SmuProfile::for_type(SmuType::Cpu3);
        sim.add_mailbox(profile.rsmu.unwrap().registers, |_, args| {
            args[0] += 1;
            RESPONSE_OK
        });
        sim.add_mailbox(profile.mp1.unwrap().registers, |_, _| RESPONSE_OK);

        let smu = smu_for(&sim, SmuType::Cpu3);
        assert!(smu.test_message(MailboxKind::Rsmu));
        assert!(!smu.test_message(MailboxKind::Mp1));
    }

    #[test]
    fn mobile_limits_go_to_mp1() {
        let sim = Arc::new(SimulatedHardware::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let profile = SmuProfile::for_type(SmuType::Apu1);
        sim.add_mailbox(profile.mp1.unwrap().registers, move |opcode, args| {
            log.lock().unwrap().push((opcode, args[0]));
            RESPONSE_OK
        });

        let smu = smu_for(&sim, SmuType::Apu1);
        assert_eq!(smu.set_mp1_limit(SmuOp::SetStapmLimit, 25), SmuStatus::Ok);
        assert_eq!(smu.set_mp1_limit(SmuOp::SetPptFastLimit, 35), SmuStatus::Ok);
        assert_eq!(smu.set_mp1_limit(SmuOp::SetStapmTime, 200), SmuStatus::Ok);
        assert_eq!(smu.set_mp1_limit(SmuOp::SetPptSlowTime, 5), SmuStatus::Ok);
        // The RSMU has no PPT setter on APUs, so the generic setter lands on MP1.
        assert_eq!(smu.set_limit(SmuOp::SetPptLimit, 30), SmuStatus::Ok);
        assert_eq!(smu.set_htc_limit(95), SmuStatus::Ok);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (0x14, 25_000),
                (0x15, 35_000),
                (0x18, 200),
                (0x17, 5),
                (0x16, 30_000),
                (0x19, 95),
            ]
        );
        assert!(sim.commands(profile.rsmu.unwrap().registers).is_empty());
    }

    #[test]
    fn tools_dram_address_is_split_across_two_args() {
        let sim = Arc::new(SimulatedHardware::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let mp1 = SmuProfile::for_type(SmuType::Cpu2).mp1.unwrap().registers;
        sim.add_mailbox(mp1, move |opcode, args| {
            log.lock().unwrap().push((opcode, args[0], args[1]));
            RESPONSE_OK
        });

        let smu = smu_for(&sim, SmuType::Cpu2);
        assert_eq!(smu.set_tools_dram_address(0x1_2345_6000), SmuStatus::Ok);
        assert_eq!(*seen.lock().unwrap(), vec![(0x6, 0x2345_6000, 0x1)]);

        let apu = smu_for(&sim, SmuType::Apu1);
        assert_eq!(apu.set_tools_dram_address(0x1000), SmuStatus::Unsupported);
    }

    static CLOCK_PROFILE: SmuProfile = SmuProfile {
        smu_type: SmuType::Apu2,
        smn: crate::hw::SmnWindow::HOST_BRIDGE,
        rsmu: None,
        mp1: Some(MailboxProfile::new(
            MailboxRegisters::new(0x03B1_0528, 0x03B1_0578, 0x03B1_0998),
            &[(SmuOp::GetSome1Clock, 0x40)],
        )),
        hsmp: None,
        dram_address: DramAddressScheme::Combined,
        table_arg: 0,
    };

    #[test]
    fn some1_clock_reads_arg_zero() {
        let sim = Arc::new(SimulatedHardware::new());
        sim.add_mailbox(CLOCK_PROFILE.mp1.unwrap().registers, |opcode, args| {
            if opcode == 0x40 {
                args[0] = 1600;
            }
            RESPONSE_OK
        });
        let smu = Smu::new(
            Arc::new(HwContext::new(sim.clone())),
            &CLOCK_PROFILE,
            SmuConfig::default(),
        );
        assert_eq!(smu.some1_clock(), Some(1600));

        // Shipped profiles have no opcode for it and send nothing.
        sim.clear_writes();
        assert_eq!(smu_for(&sim, SmuType::Apu2).some1_clock(), None);
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn hsmp_telemetry_reads() {
        let sim = Arc::new(SimulatedHardware::new());
        let lclk = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&lclk);
        let hsmp = SmuProfile::for_type(SmuType::Cpu3).hsmp.unwrap();
        sim.add_mailbox(hsmp, move |opcode, args| {
            match opcode {
                0x03 => args[0] = 3,
                0x0B => args[0] = 1,
                0x0F => {
                    args[0] = 1800;
                    args[1] = 3600;
                }
                0x10 => args[0] = 4900,
                0x11 => args[0] = 37,
                0x12 => log.lock().unwrap().push(args[0]),
                0x13 => args[0] = (204 << 20) | (51 << 8) | 25,
                _ => {}
            }
            RESPONSE_OK
        });

        let smu = smu_for(&sim, SmuType::Cpu3);
        assert_eq!(smu.prochot_asserted(), Some(true));
        assert_eq!(smu.fclk_memclk(), Some((1800, 3600)));
        assert_eq!(smu.cclk_frequency_limit(), Some(4900));
        assert_eq!(smu.socket_c0_residency(), Some(37));
        assert_eq!(smu.set_lclk_dpm_level_range(2, 1, 3), SmuStatus::Ok);
        assert_eq!(*lclk.lock().unwrap(), vec![(2 << 16) | (3 << 8) | 1]);
        assert_eq!(
            smu.ddr_bandwidth(),
            Some(DdrBandwidth {
                max_gbps: 204,
                utilized_gbps: 51,
                utilized_percent: 25,
            })
        );
    }

    #[test]
    fn hsmp_reads_need_a_recent_interface() {
        let sim = Arc::new(SimulatedHardware::new());
        let hsmp = SmuProfile::for_type(SmuType::Cpu3).hsmp.unwrap();
        sim.add_mailbox(hsmp, |opcode, args| {
            if opcode == 0x03 {
                args[0] = 1;
            }
            RESPONSE_OK
        });

        let smu = smu_for(&sim, SmuType::Cpu3);
        sim.clear_writes();
        assert_eq!(smu.ddr_bandwidth(), None);
        assert_eq!(smu.set_lclk_dpm_level_range(0, 0, 1), SmuStatus::Unsupported);
        assert!(sim.writes().is_empty());
    }
}
