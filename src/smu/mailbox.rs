//! The SMU command mailbox handshake.
//!
//! A mailbox is three SMN registers: a command register that triggers execution, a
//! status register the firmware fills with a response code, and a block of six
//! consecutive argument registers used in both directions.

use crate::config::SmuConfig;
use crate::hw::{BusGuard, HwContext, SmnWindow};
use std::io;
use tracing::{trace, warn};

pub const ARG_COUNT: usize = 6;

pub const RESPONSE_OK: u32 = 0x01;
pub const RESPONSE_FAILED: u32 = 0xFF;
pub const RESPONSE_UNKNOWN_CMD: u32 = 0xFE;
pub const RESPONSE_REJECTED_PREREQ: u32 = 0xFD;
pub const RESPONSE_REJECTED_BUSY: u32 = 0xFC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailboxKind {
    Rsmu,
    Mp1,
    Hsmp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxRegisters {
    pub command: u32,
    pub status: u32,
    pub args: u32,
}

impl MailboxRegisters {
    #[must_use]
    pub const fn new(command: u32, status: u32, args: u32) -> Self {
        Self {
            command,
            status,
            args,
        }
    }

    /// SMN address of argument register `index`.
    #[must_use]
    pub const fn arg(&self, index: usize) -> u32 {
        self.args + (index as u32) * 4
    }
}

/// Outcome of a mailbox exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmuStatus {
    Ok,
    Failed,
    UnknownCmd,
    RejectedPrereq,
    /// The firmware or the hardware bus was busy.
    Busy,
    /// No response within the poll budget.
    Timeout,
    /// The operation has no opcode on this processor.
    Unsupported,
}

impl SmuStatus {
    /// Maps a nonzero firmware response code.
    #[must_use]
    pub const fn from_response(code: u32) -> Self {
        match code {
            RESPONSE_OK => Self::Ok,
            RESPONSE_UNKNOWN_CMD => Self::UnknownCmd,
            RESPONSE_REJECTED_PREREQ => Self::RejectedPrereq,
            RESPONSE_REJECTED_BUSY => Self::Busy,
            _ => Self::Failed,
        }
    }

    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for SmuStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Failed => "FAILED",
            Self::UnknownCmd => "UNKNOWN_CMD",
            Self::RejectedPrereq => "REJECTED_PREREQ",
            Self::Busy => "BUSY",
            Self::Timeout => "TIMEOUT",
            Self::Unsupported => "UNSUPPORTED",
        };
        f.write_str(s)
    }
}

/// A single command addressed to one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    pub mailbox: MailboxKind,
    pub opcode: u32,
    pub args: [u32; ARG_COUNT],
}

impl CommandRequest {
    #[must_use]
    pub const fn new(mailbox: MailboxKind, opcode: u32) -> Self {
        Self {
            mailbox,
            opcode,
            args: [0; ARG_COUNT],
        }
    }

    /// Copies up to [`ARG_COUNT`] leading arguments; missing ones stay zero.
    #[must_use]
    pub fn with_args(mut self, args: &[u32]) -> Self {
        for (slot, value) in self.args.iter_mut().zip(args) {
            *slot = *value;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    pub status: SmuStatus,
    /// Argument registers as read back after a successful exchange, otherwise the
    /// arguments that were sent.
    pub args: [u32; ARG_COUNT],
}

impl CommandResult {
    #[must_use]
    pub const fn with_status(status: SmuStatus, args: [u32; ARG_COUNT]) -> Self {
        Self { status, args }
    }

    #[must_use]
    pub const fn unsupported() -> Self {
        Self::with_status(SmuStatus::Unsupported, [0; ARG_COUNT])
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// First result argument on success.
    #[must_use]
    pub const fn value(&self) -> Option<u32> {
        if self.is_ok() { Some(self.args[0]) } else { None }
    }
}

/// Runs one complete exchange on the mailbox at `registers`.
///
/// The whole sequence (clear status, write arguments, write opcode, poll, read back)
/// happens under a single bus guard, so exchanges from different threads never
/// interleave. Opcode zero is never transmitted.
pub fn exchange(
    ctx: &HwContext,
    window: &SmnWindow,
    registers: &MailboxRegisters,
    opcode: u32,
    args: [u32; ARG_COUNT],
    config: &SmuConfig,
) -> CommandResult {
    if opcode == 0 {
        return CommandResult::unsupported();
    }

    let Some(bus) = ctx.lock_bus(config.bus_lock_timeout) else {
        trace!("Bus busy, command {opcode:#x} not sent");
        return CommandResult::with_status(SmuStatus::Busy, args);
    };

    match run(&bus, window, registers, opcode, args, config.poll_budget) {
        Ok(result) => {
            trace!(
                "SMU {:#x} cmd {opcode:#x} -> {} {:x?}",
                registers.command, result.status, result.args
            );
            result
        }
        Err(e) => {
            warn!("SMN access failed during command {opcode:#x}: {e}");
            CommandResult::with_status(SmuStatus::Failed, args)
        }
    }
}

fn run(
    bus: &BusGuard<'_>,
    window: &SmnWindow,
    registers: &MailboxRegisters,
    opcode: u32,
    args: [u32; ARG_COUNT],
    poll_budget: u32,
) -> io::Result<CommandResult> {
    bus.write_smn(window, registers.status, 0)?;
    for (i, arg) in args.iter().enumerate() {
        bus.write_smn(window, registers.arg(i), *arg)?;
    }
    bus.write_smn(window, registers.command, opcode)?;

    let mut response = 0;
    for _ in 0..poll_budget {
        response = bus.read_smn(window, registers.status)?;
        if response != 0 {
            break;
        }
    }
    if response == 0 {
        return Ok(CommandResult::with_status(SmuStatus::Timeout, args));
    }

    let status = SmuStatus::from_response(response);
    if !status.is_ok() {
        return Ok(CommandResult::with_status(status, args));
    }

    let mut out = [0u32; ARG_COUNT];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = bus.read_smn(window, registers.arg(i))?;
    }
    Ok(CommandResult::with_status(SmuStatus::Ok, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimulatedHardware;
    use std::sync::Arc;
    use std::time::Duration;

    const REGS: MailboxRegisters = MailboxRegisters::new(0x03B1_0524, 0x03B1_0570, 0x03B1_0A40);

    fn setup() -> (Arc<SimulatedHardware>, HwContext) {
        let sim = Arc::new(SimulatedHardware::new());
        let ctx = HwContext::new(sim.clone());
        (sim, ctx)
    }

    #[test]
    fn response_codes() {
        assert_eq!(SmuStatus::from_response(0x01), SmuStatus::Ok);
        assert_eq!(SmuStatus::from_response(0xFF), SmuStatus::Failed);
        assert_eq!(SmuStatus::from_response(0xFE), SmuStatus::UnknownCmd);
        assert_eq!(SmuStatus::from_response(0xFD), SmuStatus::RejectedPrereq);
        assert_eq!(SmuStatus::from_response(0xFC), SmuStatus::Busy);
        assert_eq!(SmuStatus::from_response(0x42), SmuStatus::Failed);
    }

    #[test]
    fn exchange_writes_in_protocol_order() {
        let (sim, ctx) = setup();
        sim.add_mailbox(REGS, |_, args| {
            args[0] += 1;
            RESPONSE_OK
        });

        let result = exchange(
            &ctx,
            &SmnWindow::HOST_BRIDGE,
            &REGS,
            0x1,
            [41, 0, 0, 0, 0, 7],
            &SmuConfig::default(),
        );
        assert_eq!(result.status, SmuStatus::Ok);
        assert_eq!(result.args, [42, 0, 0, 0, 0, 7]);

        let addresses: Vec<u32> = sim.writes().iter().map(|w| w.address).collect();
        let mut expected = vec![REGS.status];
        expected.extend((0..ARG_COUNT).map(|i| REGS.arg(i)));
        expected.push(REGS.command);
        assert_eq!(addresses, expected);
    }

    #[test]
    fn zero_opcode_never_touches_hardware() {
        let (sim, ctx) = setup();
        let result = exchange(
            &ctx,
            &SmnWindow::HOST_BRIDGE,
            &REGS,
            0,
            [0; ARG_COUNT],
            &SmuConfig::default(),
        );
        assert_eq!(result.status, SmuStatus::Unsupported);
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn silent_firmware_times_out() {
        let (sim, ctx) = setup();
        sim.add_mailbox(REGS, |_, _| RESPONSE_OK);
        sim.set_silent(REGS, true);

        let config = SmuConfig {
            poll_budget: 16,
            ..SmuConfig::default()
        };
        let result = exchange(&ctx, &SmnWindow::HOST_BRIDGE, &REGS, 0x2, [0; ARG_COUNT], &config);
        assert_eq!(result.status, SmuStatus::Timeout);
    }

    #[test]
    fn rejection_keeps_sent_arguments() {
        let (sim, ctx) = setup();
        sim.add_mailbox(REGS, |_, args| {
            args[0] = 0xDEAD;
            RESPONSE_REJECTED_PREREQ
        });

        let result = exchange(
            &ctx,
            &SmnWindow::HOST_BRIDGE,
            &REGS,
            0x5,
            [3, 0, 0, 0, 0, 0],
            &SmuConfig::default(),
        );
        assert_eq!(result.status, SmuStatus::RejectedPrereq);
        assert_eq!(result.args[0], 3);
    }

    #[test]
    fn held_bus_reports_busy_without_writes() {
        let (sim, ctx) = setup();
        sim.add_mailbox(REGS, |_, _| RESPONSE_OK);
        let _held = ctx.lock_bus(Duration::from_millis(1)).unwrap();

        let config = SmuConfig {
            bus_lock_timeout: Duration::from_millis(2),
            ..SmuConfig::default()
        };
        let result = exchange(&ctx, &SmnWindow::HOST_BRIDGE, &REGS, 0x1, [0; ARG_COUNT], &config);
        assert_eq!(result.status, SmuStatus::Busy);
        assert!(sim.writes().is_empty());
    }
}
