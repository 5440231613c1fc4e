//! Host System Management Port message table.
//!
//! HSMP message ids are stable across generations but each message only exists
//! from a given interface version on. The running version is queried once; newer
//! messages are treated as unimplemented and never sent.

use crate::smu::profile::SmuOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HsmpMessage {
    op: SmuOp,
    id: u32,
    since: u32,
}

const fn msg(op: SmuOp, id: u32, since: u32) -> HsmpMessage {
    HsmpMessage { op, id, since }
}

static MESSAGES: &[HsmpMessage] = &[
    msg(SmuOp::TestMessage, 0x01, 0),
    msg(SmuOp::GetSmuVersion, 0x02, 0),
    msg(SmuOp::GetInterfaceVersion, 0x03, 0),
    msg(SmuOp::ReadSocketPower, 0x04, 1),
    msg(SmuOp::WriteSocketPowerLimit, 0x05, 1),
    msg(SmuOp::ReadSocketPowerLimit, 0x06, 1),
    msg(SmuOp::ReadMaxSocketPowerLimit, 0x07, 1),
    // arg: apic id << 16 | MHz
    msg(SmuOp::WriteBoostLimit, 0x08, 1),
    msg(SmuOp::WriteBoostLimitAllCores, 0x09, 1),
    msg(SmuOp::ReadBoostLimit, 0x0A, 1),
    msg(SmuOp::ReadProchotStatus, 0x0B, 1),
    msg(SmuOp::ReadFclkMemclk, 0x0F, 1),
    msg(SmuOp::ReadCclkFrequencyLimit, 0x10, 1),
    msg(SmuOp::ReadSocketC0Residency, 0x11, 1),
    msg(SmuOp::SetLclkDpmLevelRange, 0x12, 2),
    msg(SmuOp::ReadDdrBandwidth, 0x13, 3),
];

/// HSMP messages available at a given interface version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsmpInterface {
    version: u32,
}

impl HsmpInterface {
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self { version }
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Message id for `op`, zero when the op is not an HSMP message or needs a
    /// newer interface.
    #[must_use]
    pub fn opcode(&self, op: SmuOp) -> u32 {
        MESSAGES
            .iter()
            .find(|m| m.op == op && m.since <= self.version)
            .map_or(0, |m| m.id)
    }
}
