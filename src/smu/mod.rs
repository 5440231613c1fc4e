//! SMU client: opcode resolution, mailbox routing and SMN access.

pub mod commands;
pub mod hsmp;
pub mod mailbox;
pub mod power_table;
pub mod profile;
pub mod topology;

use crate::config::SmuConfig;
use crate::error::{SmuError, SmuResult};
use crate::hw::HwContext;
use hsmp::HsmpInterface;
use mailbox::{CommandRequest, CommandResult, MailboxKind, MailboxRegisters, SmuStatus, exchange};
use profile::{SmuOp, SmuProfile};
use std::sync::Arc;
use tracing::{debug, trace};

/// Limit and tuning setters try RSMU first, then MP1.
pub const RSMU_THEN_MP1: &[MailboxKind] = &[MailboxKind::Rsmu, MailboxKind::Mp1];
/// Boost limit and socket power operations exist on HSMP only.
pub const HSMP_ONLY: &[MailboxKind] = &[MailboxKind::Hsmp];

/// Sends commands to the SMU of one processor package.
pub struct Smu {
    ctx: Arc<HwContext>,
    profile: &'static SmuProfile,
    config: SmuConfig,
    hsmp: HsmpInterface,
}

impl std::fmt::Debug for Smu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Smu")
            .field("smu_type", &self.profile.smu_type)
            .field("hsmp", &self.hsmp)
            .finish_non_exhaustive()
    }
}

impl Smu {
    /// Creates the client and, when the profile has an HSMP mailbox, queries the
    /// HSMP interface version that gates the HSMP message table.
    pub fn new(ctx: Arc<HwContext>, profile: &'static SmuProfile, config: SmuConfig) -> Self {
        let mut smu = Self {
            ctx,
            profile,
            config,
            hsmp: HsmpInterface::default(),
        };

        if profile.hsmp.is_some() {
            let result = smu.send(MailboxKind::Hsmp, SmuOp::GetInterfaceVersion, &[]);
            match result.value() {
                Some(version) => {
                    debug!("HSMP interface version {version}");
                    smu.hsmp = HsmpInterface::new(version);
                }
                None => debug!("HSMP interface unavailable: {}", result.status),
            }
        }

        smu
    }

    #[must_use]
    pub fn profile(&self) -> &'static SmuProfile {
        self.profile
    }

    #[must_use]
    pub fn config(&self) -> &SmuConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &Arc<HwContext> {
        &self.ctx
    }

    #[must_use]
    pub fn hsmp(&self) -> HsmpInterface {
        self.hsmp
    }

    #[must_use]
    pub fn registers(&self, kind: MailboxKind) -> Option<MailboxRegisters> {
        match kind {
            MailboxKind::Hsmp => self.profile.hsmp,
            _ => self.profile.mailbox(kind).map(|m| m.registers),
        }
    }

    /// Opcode of `op` on mailbox `kind`, zero when not implemented there.
    #[must_use]
    pub fn opcode(&self, kind: MailboxKind, op: SmuOp) -> u32 {
        match kind {
            MailboxKind::Hsmp if self.profile.hsmp.is_some() => self.hsmp.opcode(op),
            MailboxKind::Hsmp => 0,
            _ => self.profile.mailbox(kind).map_or(0, |m| m.opcode(op)),
        }
    }

    /// Runs a raw request. Requests for a missing mailbox or with opcode zero are
    /// answered with `Unsupported` without touching the hardware.
    pub fn execute(&self, request: &CommandRequest) -> CommandResult {
        let Some(registers) = self.registers(request.mailbox) else {
            return CommandResult::unsupported();
        };
        if request.opcode == 0 {
            return CommandResult::unsupported();
        }

        exchange(
            &self.ctx,
            &self.profile.smn,
            &registers,
            request.opcode,
            request.args,
            &self.config,
        )
    }

    /// Resolves `op` on mailbox `kind` and sends it with `args`.
    pub fn send(&self, kind: MailboxKind, op: SmuOp, args: &[u32]) -> CommandResult {
        let opcode = self.opcode(kind, op);
        if opcode == 0 {
            trace!("{op:?} not implemented on {kind:?}");
            return CommandResult::unsupported();
        }
        self.execute(&CommandRequest::new(kind, opcode).with_args(args))
    }

    /// Sends `op` on the first mailbox of `route` that implements it.
    ///
    /// A mailbox without an opcode for `op`, or whose firmware answers
    /// `UnknownCmd`, passes the request on to the next one. Any other outcome is final.
    pub fn send_routed(&self, route: &[MailboxKind], op: SmuOp, args: &[u32]) -> CommandResult {
        let mut last = CommandResult::unsupported();
        for &kind in route {
            let result = self.send(kind, op, args);
            match result.status {
                SmuStatus::Unsupported => {}
                SmuStatus::UnknownCmd => {
                    debug!("{op:?} unknown to {kind:?} firmware");
                    last = result;
                }
                _ => return result,
            }
        }
        last
    }

    /// Reads one SMN register under the bus mutex.
    pub fn read_smn(&self, address: u32) -> SmuResult<u32> {
        let bus = self
            .ctx
            .lock_bus(self.config.bus_lock_timeout)
            .ok_or(SmuError::Command {
                operation: "SMN read",
                status: SmuStatus::Busy,
            })?;
        Ok(bus.read_smn(&self.profile.smn, address)?)
    }

    /// Writes one SMN register under the bus mutex.
    pub fn write_smn(&self, address: u32, value: u32) -> SmuResult<()> {
        let bus = self
            .ctx
            .lock_bus(self.config.bus_lock_timeout)
            .ok_or(SmuError::Command {
                operation: "SMN write",
                status: SmuStatus::Busy,
            })?;
        Ok(bus.write_smn(&self.profile.smn, address, value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimulatedHardware;
    use mailbox::{RESPONSE_OK, RESPONSE_UNKNOWN_CMD};
    use profile::SmuType;

    fn vermeer_smu(sim: &Arc<SimulatedHardware>) -> Smu {
        Smu::new(
            Arc::new(HwContext::new(sim.clone())),
            SmuProfile::for_type(SmuType::Cpu3),
            SmuConfig::default(),
        )
    }

    #[test]
    fn hsmp_version_gates_opcodes() {
        let sim = Arc::new(SimulatedHardware::new());
        let profile = SmuProfile::for_type(SmuType::Cpu3);
        sim.add_mailbox(profile.hsmp.unwrap(), |opcode, args| {
            if opcode == 0x03 {
                args[0] = 2;
            }
            RESPONSE_OK
        });

        let smu = vermeer_smu(&sim);
        assert_eq!(smu.hsmp().version(), 2);
        assert_eq!(smu.opcode(MailboxKind::Hsmp, SmuOp::SetLclkDpmLevelRange), 0x12);
        assert_eq!(smu.opcode(MailboxKind::Hsmp, SmuOp::ReadDdrBandwidth), 0);
    }

    #[test]
    fn routing_falls_through_on_unknown_command() {
        let sim = Arc::new(SimulatedHardware::new());
        let profile = SmuProfile::for_type(SmuType::Cpu3);
        let rsmu = profile.rsmu.unwrap().registers;
        let mp1 = profile.mp1.unwrap().registers;
        sim.add_mailbox(rsmu, |_, _| RESPONSE_UNKNOWN_CMD);
        sim.add_mailbox(mp1, |_, _| RESPONSE_OK);

        let smu = vermeer_smu(&sim);
        let result = smu.send_routed(RSMU_THEN_MP1, SmuOp::SetAllPsmMargin, &[0]);
        assert_eq!(result.status, SmuStatus::Ok);
        assert_eq!(sim.commands(rsmu), vec![0xB]);
        assert_eq!(sim.commands(mp1), vec![0x36]);
    }

    #[test]
    fn routing_stops_on_final_status() {
        let sim = Arc::new(SimulatedHardware::new());
        let profile = SmuProfile::for_type(SmuType::Cpu3);
        let rsmu = profile.rsmu.unwrap().registers;
        let mp1 = profile.mp1.unwrap().registers;
        sim.add_mailbox(rsmu, |_, _| mailbox::RESPONSE_REJECTED_PREREQ);
        sim.add_mailbox(mp1, |_, _| RESPONSE_OK);

        let smu = vermeer_smu(&sim);
        let result = smu.send_routed(RSMU_THEN_MP1, SmuOp::SetAllPsmMargin, &[0]);
        assert_eq!(result.status, SmuStatus::RejectedPrereq);
        assert!(sim.commands(mp1).is_empty());
    }

    #[test]
    fn missing_opcode_is_unsupported_without_writes() {
        let sim = Arc::new(SimulatedHardware::new());
        let smu = vermeer_smu(&sim);
        sim.clear_writes();

        // No CPU3 mailbox implements the SoC TDC limit.
        let result = smu.send_routed(RSMU_THEN_MP1, SmuOp::SetTdcSocLimit, &[1000]);
        assert_eq!(result.status, SmuStatus::Unsupported);
        assert!(sim.writes().is_empty());
    }
}
