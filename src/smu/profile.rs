//! Processor identification and per-generation SMU command tables.
//!
//! Resolution is two table lookups: `(family, model, package)` to a [`Codename`],
//! then the codename's [`SmuType`] to a static [`SmuProfile`]. Supporting a new
//! part means adding rows here; the protocol code never changes.

use crate::hw::{CpuidSource, SmnWindow};
use crate::smu::mailbox::{MailboxKind, MailboxRegisters};
use crate::utils::get_bits;

pub const FAMILY_15H: u32 = 0x15;
pub const FAMILY_17H: u32 = 0x17;
pub const FAMILY_19H: u32 = 0x19;

/// Socket/package type from CPUID 0x80000001 EBX[31:28].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    Fpx,
    Am4,
    Sp3,
    Trx,
    Other(u8),
}

impl PackageType {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw & 0xF {
            0 => Self::Fpx,
            2 => Self::Am4,
            4 => Self::Sp3,
            7 => Self::Trx,
            other => Self::Other(other as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codename {
    Unsupported,
    BristolRidge,
    SummitRidge,
    Whitehaven,
    Naples,
    PinnacleRidge,
    Colfax,
    RavenRidge,
    RavenRidge2,
    Picasso,
    Dali,
    FireFlight,
    Matisse,
    CastlePeak,
    Rome,
    Renoir,
    Lucienne,
    VanGogh,
    Vermeer,
    Chagall,
    Milan,
    Cezanne,
    Rembrandt,
    Raphael,
    Phoenix,
    Mendocino,
}

/// SMU firmware generation. Selects the command table and the power table fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmuType {
    Cpu0,
    Cpu1,
    Cpu2,
    Cpu3,
    Cpu4,
    Apu0,
    Apu1,
    Apu2,
    Unsupported,
}

impl Codename {
    #[must_use]
    pub const fn smu_type(self) -> SmuType {
        match self {
            Self::SummitRidge | Self::Whitehaven | Self::Naples => SmuType::Cpu0,
            Self::PinnacleRidge | Self::Colfax => SmuType::Cpu1,
            Self::Matisse | Self::CastlePeak | Self::Rome => SmuType::Cpu2,
            Self::Vermeer | Self::Chagall | Self::Milan => SmuType::Cpu3,
            Self::Raphael => SmuType::Cpu4,
            Self::RavenRidge | Self::RavenRidge2 | Self::Picasso | Self::Dali | Self::FireFlight => {
                SmuType::Apu0
            }
            Self::Renoir | Self::Lucienne | Self::Cezanne => SmuType::Apu1,
            Self::VanGogh | Self::Rembrandt | Self::Phoenix | Self::Mendocino => SmuType::Apu2,
            Self::BristolRidge | Self::Unsupported => SmuType::Unsupported,
        }
    }
}

/// Family, model and package as reported by CPUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSignature {
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
    pub package: PackageType,
}

impl CpuSignature {
    /// Decodes leaf 0x1 EAX and leaf 0x80000001 EBX.
    #[must_use]
    pub const fn from_registers(leaf1_eax: u32, ext_ebx: u32) -> Self {
        let family = get_bits(leaf1_eax, 8, 4) + get_bits(leaf1_eax, 20, 8);
        let model = get_bits(leaf1_eax, 4, 4) | (get_bits(leaf1_eax, 16, 4) << 4);
        Self {
            family,
            model,
            stepping: get_bits(leaf1_eax, 0, 4),
            package: PackageType::from_raw(ext_ebx >> 28),
        }
    }

    pub fn read(cpuid: &dyn CpuidSource) -> Option<Self> {
        let leaf1 = cpuid.cpuid(0x1, 0)?;
        let ext = cpuid.cpuid(0x8000_0001, 0)?;
        Some(Self::from_registers(leaf1.eax, ext.ebx))
    }

    #[must_use]
    pub fn codename(&self) -> Codename {
        resolve_codename(self.family, self.model, self.package)
    }
}

struct CodenameRow {
    family: u32,
    model: u32,
    /// `None` matches any package. Package-specific rows precede the wildcard for the same model.
    package: Option<PackageType>,
    codename: Codename,
}

const fn row(family: u32, model: u32, package: Option<PackageType>, codename: Codename) -> CodenameRow {
    CodenameRow {
        family,
        model,
        package,
        codename,
    }
}

const ANY: Option<PackageType> = None;
const SP3: Option<PackageType> = Some(PackageType::Sp3);
const TRX: Option<PackageType> = Some(PackageType::Trx);
const AM4: Option<PackageType> = Some(PackageType::Am4);

static CODENAMES: &[CodenameRow] = &[
    row(FAMILY_15H, 0x65, ANY, Codename::BristolRidge),
    row(FAMILY_17H, 0x01, SP3, Codename::Naples),
    row(FAMILY_17H, 0x01, TRX, Codename::Whitehaven),
    row(FAMILY_17H, 0x01, ANY, Codename::SummitRidge),
    row(FAMILY_17H, 0x08, SP3, Codename::Colfax),
    row(FAMILY_17H, 0x08, TRX, Codename::Colfax),
    row(FAMILY_17H, 0x08, ANY, Codename::PinnacleRidge),
    row(FAMILY_17H, 0x11, ANY, Codename::RavenRidge),
    row(FAMILY_17H, 0x18, AM4, Codename::RavenRidge2),
    row(FAMILY_17H, 0x18, ANY, Codename::Picasso),
    row(FAMILY_17H, 0x20, ANY, Codename::Dali),
    row(FAMILY_17H, 0x31, TRX, Codename::CastlePeak),
    row(FAMILY_17H, 0x31, ANY, Codename::Rome),
    // Subor Z+, CPUID 0x00850F00
    row(FAMILY_17H, 0x50, ANY, Codename::FireFlight),
    row(FAMILY_17H, 0x60, ANY, Codename::Renoir),
    row(FAMILY_17H, 0x68, ANY, Codename::Lucienne),
    row(FAMILY_17H, 0x71, ANY, Codename::Matisse),
    row(FAMILY_17H, 0x90, ANY, Codename::VanGogh),
    row(FAMILY_19H, 0x01, TRX, Codename::Chagall),
    row(FAMILY_19H, 0x01, ANY, Codename::Milan),
    row(FAMILY_19H, 0x21, ANY, Codename::Vermeer),
    row(FAMILY_19H, 0x44, ANY, Codename::Rembrandt),
    row(FAMILY_19H, 0x50, ANY, Codename::Cezanne),
    row(FAMILY_19H, 0x61, ANY, Codename::Raphael),
    row(FAMILY_19H, 0x74, ANY, Codename::Phoenix),
    row(FAMILY_19H, 0x78, ANY, Codename::Phoenix),
    row(FAMILY_19H, 0xA0, ANY, Codename::Mendocino),
];

/// First matching row wins; anything unmatched is [`Codename::Unsupported`].
#[must_use]
pub fn resolve_codename(family: u32, model: u32, package: PackageType) -> Codename {
    CODENAMES
        .iter()
        .find(|r| {
            r.family == family && r.model == model && r.package.is_none_or(|p| p == package)
        })
        .map_or(Codename::Unsupported, |r| r.codename)
}

/// Abstract SMU operations. Each profile maps the ones it implements to an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmuOp {
    TestMessage,
    GetSmuVersion,
    GetTableVersion,
    GetDramBaseAddress,
    TransferTableToDram,
    EnableOcMode,
    DisableOcMode,
    SetOverclockFrequencyAllCores,
    SetOverclockFrequencyPerCore,
    SetOverclockCpuVid,
    SetPptLimit,
    SetTdcVddLimit,
    SetTdcSocLimit,
    SetEdcVddLimit,
    SetEdcSocLimit,
    SetHtcLimit,
    // Mobile power limits, MP1 only
    SetStapmLimit,
    SetStapmTime,
    SetPptFastLimit,
    SetPptSlowTime,
    SetPptApuLimit,
    SetToolsDramAddress,
    GetSome1Clock,
    SetPboScalar,
    GetPboScalar,
    SetPsmMargin,
    SetAllPsmMargin,
    GetPsmMargin,
    // HSMP only
    GetInterfaceVersion,
    ReadSocketPower,
    WriteSocketPowerLimit,
    ReadSocketPowerLimit,
    ReadMaxSocketPowerLimit,
    WriteBoostLimit,
    WriteBoostLimitAllCores,
    ReadBoostLimit,
    ReadProchotStatus,
    ReadFclkMemclk,
    ReadCclkFrequencyLimit,
    ReadSocketC0Residency,
    SetLclkDpmLevelRange,
    ReadDdrBandwidth,
}

/// A mailbox's registers and the opcodes it implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxProfile {
    pub registers: MailboxRegisters,
    messages: &'static [(SmuOp, u32)],
}

impl MailboxProfile {
    #[must_use]
    pub const fn new(registers: MailboxRegisters, messages: &'static [(SmuOp, u32)]) -> Self {
        Self {
            registers,
            messages,
        }
    }

    /// Opcode for `op`, zero when this mailbox does not implement it.
    #[must_use]
    pub fn opcode(&self, op: SmuOp) -> u32 {
        self.messages
            .iter()
            .find(|(o, _)| *o == op)
            .map_or(0, |(_, id)| *id)
    }
}

/// How the DRAM address of the power table comes back from the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DramAddressScheme {
    /// One exchange; low word in arg 0, high word in arg 1.
    Combined,
    /// One exchange per half, selected by arg 0 (0 low, 1 high); each half in arg 0.
    Split,
}

/// Static per-generation command profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmuProfile {
    pub smu_type: SmuType,
    pub smn: SmnWindow,
    pub rsmu: Option<MailboxProfile>,
    pub mp1: Option<MailboxProfile>,
    /// HSMP registers; its opcodes come from the version-gated table in `hsmp`.
    pub hsmp: Option<MailboxRegisters>,
    pub dram_address: DramAddressScheme,
    /// Argument 0 of the table transfer and DRAM address requests.
    pub table_arg: u32,
}

impl SmuProfile {
    #[must_use]
    pub const fn for_type(smu_type: SmuType) -> &'static Self {
        match smu_type {
            SmuType::Cpu0 => &CPU0,
            SmuType::Cpu1 => &CPU1,
            SmuType::Cpu2 => &CPU2,
            SmuType::Cpu3 => &CPU3,
            SmuType::Cpu4 => &CPU4,
            SmuType::Apu0 => &APU0,
            SmuType::Apu1 => &APU1,
            SmuType::Apu2 => &APU2,
            SmuType::Unsupported => &UNSUPPORTED,
        }
    }

    #[must_use]
    pub const fn for_codename(codename: Codename) -> &'static Self {
        Self::for_type(codename.smu_type())
    }

    #[must_use]
    pub const fn mailbox(&self, kind: MailboxKind) -> Option<&MailboxProfile> {
        match kind {
            MailboxKind::Rsmu => self.rsmu.as_ref(),
            MailboxKind::Mp1 => self.mp1.as_ref(),
            MailboxKind::Hsmp => None,
        }
    }
}

const ZEN_RSMU_REGS: MailboxRegisters = MailboxRegisters::new(0x03B1_051C, 0x03B1_0568, 0x03B1_0590);
const ZEN_MP1_REGS: MailboxRegisters = MailboxRegisters::new(0x03B1_0528, 0x03B1_0564, 0x03B1_0598);
const ZEN2_RSMU_REGS: MailboxRegisters =
    MailboxRegisters::new(0x03B1_0524, 0x03B1_0570, 0x03B1_0A40);
const ZEN2_MP1_REGS: MailboxRegisters = MailboxRegisters::new(0x03B1_0530, 0x03B1_057C, 0x03B1_09C4);
const ZEN2_HSMP_REGS: MailboxRegisters =
    MailboxRegisters::new(0x03B1_0534, 0x03B1_0980, 0x03B1_09E0);
const APU_RSMU_REGS: MailboxRegisters = MailboxRegisters::new(0x03B1_0A20, 0x03B1_0A80, 0x03B1_0A88);
const APU_MP1_REGS: MailboxRegisters = MailboxRegisters::new(0x03B1_0528, 0x03B1_0564, 0x03B1_0998);
const APU2_MP1_REGS: MailboxRegisters =
    MailboxRegisters::new(0x03B1_0528, 0x03B1_0578, 0x03B1_0998);

const BASIC_MESSAGES: &[(SmuOp, u32)] = &[(SmuOp::TestMessage, 0x1), (SmuOp::GetSmuVersion, 0x2)];

const ZEN_RSMU: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::TransferTableToDram, 0xA),
    (SmuOp::GetDramBaseAddress, 0xC),
    (SmuOp::EnableOcMode, 0x63),
    (SmuOp::DisableOcMode, 0x64),
    (SmuOp::SetOverclockFrequencyAllCores, 0x68),
    (SmuOp::SetOverclockFrequencyPerCore, 0x69),
    (SmuOp::SetOverclockCpuVid, 0x6A),
    (SmuOp::SetPboScalar, 0x6F),
    (SmuOp::GetPboScalar, 0x70),
];

const ZEN2_RSMU: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::TransferTableToDram, 0x5),
    (SmuOp::GetDramBaseAddress, 0x6),
    (SmuOp::GetTableVersion, 0x8),
    (SmuOp::SetPptLimit, 0x53),
    (SmuOp::SetTdcVddLimit, 0x54),
    (SmuOp::SetEdcVddLimit, 0x55),
    (SmuOp::SetHtcLimit, 0x56),
    (SmuOp::SetPboScalar, 0x58),
    (SmuOp::EnableOcMode, 0x5A),
    (SmuOp::DisableOcMode, 0x5B),
    (SmuOp::SetOverclockFrequencyAllCores, 0x5C),
    (SmuOp::SetOverclockFrequencyPerCore, 0x5D),
    (SmuOp::SetOverclockCpuVid, 0x61),
    (SmuOp::GetPboScalar, 0x6C),
];

const ZEN2_MP1: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::SetToolsDramAddress, 0x6),
    (SmuOp::EnableOcMode, 0x24),
    (SmuOp::DisableOcMode, 0x25),
    (SmuOp::SetOverclockFrequencyAllCores, 0x26),
    (SmuOp::SetOverclockFrequencyPerCore, 0x27),
    (SmuOp::SetOverclockCpuVid, 0x28),
    (SmuOp::SetTdcVddLimit, 0x3B),
    (SmuOp::SetEdcVddLimit, 0x3C),
    (SmuOp::SetPptLimit, 0x3D),
    (SmuOp::SetHtcLimit, 0x3E),
];

const ZEN3_RSMU: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::TransferTableToDram, 0x5),
    (SmuOp::GetDramBaseAddress, 0x6),
    (SmuOp::GetTableVersion, 0x8),
    (SmuOp::SetPsmMargin, 0xA),
    (SmuOp::SetAllPsmMargin, 0xB),
    (SmuOp::SetPptLimit, 0x53),
    (SmuOp::SetTdcVddLimit, 0x54),
    (SmuOp::SetEdcVddLimit, 0x55),
    (SmuOp::SetHtcLimit, 0x56),
    (SmuOp::SetPboScalar, 0x58),
    (SmuOp::EnableOcMode, 0x5A),
    (SmuOp::DisableOcMode, 0x5B),
    (SmuOp::SetOverclockFrequencyAllCores, 0x5C),
    (SmuOp::SetOverclockFrequencyPerCore, 0x5D),
    (SmuOp::SetOverclockCpuVid, 0x61),
    (SmuOp::GetPboScalar, 0x6C),
    (SmuOp::GetPsmMargin, 0x7C),
];

const ZEN3_MP1: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::EnableOcMode, 0x24),
    (SmuOp::DisableOcMode, 0x25),
    (SmuOp::SetOverclockFrequencyAllCores, 0x26),
    (SmuOp::SetOverclockFrequencyPerCore, 0x27),
    (SmuOp::SetOverclockCpuVid, 0x28),
    (SmuOp::SetPsmMargin, 0x35),
    (SmuOp::SetAllPsmMargin, 0x36),
    (SmuOp::SetTdcVddLimit, 0x3B),
    (SmuOp::SetEdcVddLimit, 0x3C),
    (SmuOp::SetPptLimit, 0x3D),
    (SmuOp::SetHtcLimit, 0x3E),
];

const ZEN4_RSMU: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::TransferTableToDram, 0x3),
    (SmuOp::GetDramBaseAddress, 0x4),
    (SmuOp::GetTableVersion, 0x5),
    (SmuOp::SetPsmMargin, 0x6),
    (SmuOp::SetAllPsmMargin, 0x7),
    (SmuOp::SetPptLimit, 0x56),
    (SmuOp::SetTdcVddLimit, 0x57),
    (SmuOp::SetEdcVddLimit, 0x58),
    (SmuOp::SetHtcLimit, 0x59),
    (SmuOp::SetPboScalar, 0x5B),
    (SmuOp::EnableOcMode, 0x5D),
    (SmuOp::DisableOcMode, 0x5E),
    (SmuOp::SetOverclockFrequencyAllCores, 0x5F),
    (SmuOp::SetOverclockFrequencyPerCore, 0x60),
    (SmuOp::SetOverclockCpuVid, 0x61),
    (SmuOp::GetPboScalar, 0x6D),
    (SmuOp::GetPsmMargin, 0xD5),
];

const APU0_RSMU: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::GetDramBaseAddress, 0xB),
    (SmuOp::GetTableVersion, 0xC),
    (SmuOp::TransferTableToDram, 0x3D),
    (SmuOp::GetPboScalar, 0x62),
    (SmuOp::EnableOcMode, 0x69),
    (SmuOp::DisableOcMode, 0x6A),
    (SmuOp::SetOverclockFrequencyAllCores, 0x7D),
    (SmuOp::SetOverclockFrequencyPerCore, 0x7E),
    (SmuOp::SetOverclockCpuVid, 0x7F),
];

const APU1_RSMU: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::GetTableVersion, 0x6),
    (SmuOp::GetPboScalar, 0xF),
    (SmuOp::EnableOcMode, 0x17),
    (SmuOp::DisableOcMode, 0x18),
    (SmuOp::SetOverclockFrequencyAllCores, 0x19),
    (SmuOp::SetOverclockFrequencyPerCore, 0x1A),
    (SmuOp::SetOverclockCpuVid, 0x1B),
    (SmuOp::TransferTableToDram, 0x65),
    (SmuOp::GetDramBaseAddress, 0x66),
];

// Raven, Picasso and Dali. The slow PPT limit is the generic PPT setter.
const APU0_MP1: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::SetStapmLimit, 0x1A),
    (SmuOp::SetPptFastLimit, 0x1B),
    (SmuOp::SetPptLimit, 0x1C),
    (SmuOp::SetPptSlowTime, 0x1D),
    (SmuOp::SetStapmTime, 0x1E),
    (SmuOp::SetHtcLimit, 0x1F),
    (SmuOp::SetTdcVddLimit, 0x20),
    (SmuOp::SetTdcSocLimit, 0x21),
    (SmuOp::SetEdcVddLimit, 0x22),
    (SmuOp::SetEdcSocLimit, 0x23),
];

// Renoir and later mobile parts.
const APU1_MP1: &[(SmuOp, u32)] = &[
    (SmuOp::TestMessage, 0x1),
    (SmuOp::GetSmuVersion, 0x2),
    (SmuOp::SetStapmLimit, 0x14),
    (SmuOp::SetPptFastLimit, 0x15),
    (SmuOp::SetPptLimit, 0x16),
    (SmuOp::SetPptSlowTime, 0x17),
    (SmuOp::SetStapmTime, 0x18),
    (SmuOp::SetHtcLimit, 0x19),
    (SmuOp::SetTdcVddLimit, 0x1A),
    (SmuOp::SetTdcSocLimit, 0x1B),
    (SmuOp::SetEdcVddLimit, 0x1C),
    (SmuOp::SetEdcSocLimit, 0x1D),
    (SmuOp::SetPptApuLimit, 0x23),
];

const fn mailbox(registers: MailboxRegisters, messages: &'static [(SmuOp, u32)]) -> Option<MailboxProfile> {
    Some(MailboxProfile::new(registers, messages))
}

const CPU0: SmuProfile = SmuProfile {
    smu_type: SmuType::Cpu0,
    smn: SmnWindow::HOST_BRIDGE,
    rsmu: mailbox(ZEN_RSMU_REGS, ZEN_RSMU),
    mp1: mailbox(ZEN_MP1_REGS, BASIC_MESSAGES),
    hsmp: None,
    dram_address: DramAddressScheme::Combined,
    table_arg: 0,
};

const CPU1: SmuProfile = SmuProfile {
    smu_type: SmuType::Cpu1,
    ..CPU0
};

const CPU2: SmuProfile = SmuProfile {
    smu_type: SmuType::Cpu2,
    smn: SmnWindow::HOST_BRIDGE,
    rsmu: mailbox(ZEN2_RSMU_REGS, ZEN2_RSMU),
    mp1: mailbox(ZEN2_MP1_REGS, ZEN2_MP1),
    hsmp: Some(ZEN2_HSMP_REGS),
    dram_address: DramAddressScheme::Combined,
    table_arg: 0,
};

const CPU3: SmuProfile = SmuProfile {
    smu_type: SmuType::Cpu3,
    rsmu: mailbox(ZEN2_RSMU_REGS, ZEN3_RSMU),
    mp1: mailbox(ZEN2_MP1_REGS, ZEN3_MP1),
    ..CPU2
};

const CPU4: SmuProfile = SmuProfile {
    smu_type: SmuType::Cpu4,
    rsmu: mailbox(ZEN2_RSMU_REGS, ZEN4_RSMU),
    mp1: mailbox(ZEN2_MP1_REGS, BASIC_MESSAGES),
    ..CPU2
};

const APU0: SmuProfile = SmuProfile {
    smu_type: SmuType::Apu0,
    smn: SmnWindow::HOST_BRIDGE,
    rsmu: mailbox(APU_RSMU_REGS, APU0_RSMU),
    mp1: mailbox(APU_MP1_REGS, APU0_MP1),
    hsmp: None,
    dram_address: DramAddressScheme::Split,
    table_arg: 0,
};

const APU1: SmuProfile = SmuProfile {
    smu_type: SmuType::Apu1,
    rsmu: mailbox(APU_RSMU_REGS, APU1_RSMU),
    mp1: mailbox(APU_MP1_REGS, APU1_MP1),
    dram_address: DramAddressScheme::Combined,
    table_arg: 3,
    ..APU0
};

const APU2: SmuProfile = SmuProfile {
    smu_type: SmuType::Apu2,
    mp1: mailbox(APU2_MP1_REGS, APU1_MP1),
    ..APU1
};

const UNSUPPORTED: SmuProfile = SmuProfile {
    smu_type: SmuType::Unsupported,
    smn: SmnWindow::HOST_BRIDGE,
    rsmu: None,
    mp1: None,
    hsmp: None,
    dram_address: DramAddressScheme::Combined,
    table_arg: 0,
};

const SVI_BASE: u32 = 0x0005_A000;
const SVI_APU_BASE: u32 = 0x0006_F000;

/// SMN addresses of the SVI2 core and SoC voltage telemetry planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SviTelemetry {
    pub core: u32,
    pub soc: u32,
}

impl SviTelemetry {
    /// Telemetry plane addresses for `codename`. Picasso swaps planes depending on
    /// the firmware major version.
    #[must_use]
    pub const fn for_codename(codename: Codename, smu_version: u32) -> Option<Self> {
        let (core, soc) = match codename {
            Codename::BristolRidge | Codename::Unsupported => return None,
            Codename::Whitehaven | Codename::Naples | Codename::Colfax => (0x10, 0xC),
            Codename::CastlePeak | Codename::Rome => (0x14, 0x10),
            Codename::Picasso if smu_version & 0xFF00_0000 == 0 => (0x10, 0xC),
            Codename::Matisse | Codename::Vermeer | Codename::Raphael => (0x10, 0xC),
            Codename::Chagall | Codename::Milan => (0x14, 0x10),
            Codename::Renoir
            | Codename::Lucienne
            | Codename::Mendocino
            | Codename::Cezanne
            | Codename::VanGogh
            | Codename::Rembrandt
            | Codename::Phoenix => {
                return Some(Self {
                    core: SVI_APU_BASE + 0x38,
                    soc: SVI_APU_BASE + 0x3C,
                });
            }
            _ => (0xC, 0x10),
        };
        Some(Self {
            core: SVI_BASE + core,
            soc: SVI_BASE + soc,
        })
    }
}

/// Everything known about the processor's SMU after identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmuIdentity {
    pub signature: CpuSignature,
    pub codename: Codename,
    pub profile: &'static SmuProfile,
    pub smu_version: u32,
    pub table_version: u32,
    pub svi: Option<SviTelemetry>,
}

impl SmuIdentity {
    #[must_use]
    pub const fn smu_type(&self) -> SmuType {
        self.profile.smu_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_decoding() {
        // Ryzen 9 5950X, AM4
        let sig = CpuSignature::from_registers(0x00A2_0F10, 0x2000_0000);
        assert_eq!(sig.family, FAMILY_19H);
        assert_eq!(sig.model, 0x21);
        assert_eq!(sig.stepping, 0);
        assert_eq!(sig.package, PackageType::Am4);
        assert_eq!(sig.codename(), Codename::Vermeer);

        assert_eq!(PackageType::from_raw(5), PackageType::Other(5));
    }

    #[test]
    fn every_table_row_resolves_to_itself() {
        for r in CODENAMES {
            let package = r.package.unwrap_or(PackageType::Other(0xF));
            assert_eq!(
                resolve_codename(r.family, r.model, package),
                r.codename,
                "family {:#x} model {:#x}",
                r.family,
                r.model
            );
        }
    }

    #[test]
    fn package_specific_rows_take_precedence() {
        assert_eq!(resolve_codename(FAMILY_17H, 0x01, PackageType::Sp3), Codename::Naples);
        assert_eq!(resolve_codename(FAMILY_17H, 0x01, PackageType::Trx), Codename::Whitehaven);
        assert_eq!(resolve_codename(FAMILY_17H, 0x01, PackageType::Am4), Codename::SummitRidge);
        assert_eq!(resolve_codename(FAMILY_17H, 0x08, PackageType::Trx), Codename::Colfax);
        assert_eq!(resolve_codename(FAMILY_17H, 0x18, PackageType::Am4), Codename::RavenRidge2);
        assert_eq!(resolve_codename(FAMILY_17H, 0x18, PackageType::Fpx), Codename::Picasso);
        assert_eq!(resolve_codename(FAMILY_19H, 0x01, PackageType::Trx), Codename::Chagall);
        assert_eq!(resolve_codename(FAMILY_19H, 0x01, PackageType::Sp3), Codename::Milan);
    }

    #[test]
    fn unknown_parts_are_unsupported() {
        assert_eq!(resolve_codename(FAMILY_19H, 0x22, PackageType::Am4), Codename::Unsupported);
        assert_eq!(resolve_codename(0x1A, 0x21, PackageType::Am4), Codename::Unsupported);
        assert_eq!(
            SmuProfile::for_codename(Codename::BristolRidge).smu_type,
            SmuType::Unsupported
        );
    }

    #[test]
    fn profiles_follow_smu_type() {
        assert_eq!(SmuProfile::for_codename(Codename::Vermeer).smu_type, SmuType::Cpu3);
        assert_eq!(SmuProfile::for_codename(Codename::Raphael).smu_type, SmuType::Cpu4);
        assert_eq!(SmuProfile::for_codename(Codename::Cezanne).smu_type, SmuType::Apu1);

        let cpu3 = SmuProfile::for_type(SmuType::Cpu3);
        let rsmu = cpu3.mailbox(MailboxKind::Rsmu).unwrap();
        assert_eq!(rsmu.opcode(SmuOp::TransferTableToDram), 0x5);
        assert_eq!(rsmu.opcode(SmuOp::GetPsmMargin), 0x7C);
        assert_eq!(rsmu.opcode(SmuOp::SetTdcSocLimit), 0);
        assert!(cpu3.hsmp.is_some());

        let mp1 = cpu3.mailbox(MailboxKind::Mp1).unwrap();
        assert_eq!(mp1.opcode(SmuOp::SetPptLimit), 0x3D);
        assert_eq!(mp1.opcode(SmuOp::SetStapmLimit), 0);

        let unsupported = SmuProfile::for_type(SmuType::Unsupported);
        assert!(unsupported.mailbox(MailboxKind::Rsmu).is_none());
    }

    #[test]
    fn mobile_limits_live_on_mp1() {
        for codename in [Codename::Renoir, Codename::Cezanne, Codename::Rembrandt, Codename::Phoenix] {
            let profile = SmuProfile::for_codename(codename);
            let rsmu = profile.mailbox(MailboxKind::Rsmu).unwrap();
            let mp1 = profile.mailbox(MailboxKind::Mp1).unwrap();
            assert_eq!(rsmu.opcode(SmuOp::SetPptLimit), 0, "{codename:?}");
            assert_eq!(mp1.opcode(SmuOp::SetStapmLimit), 0x14, "{codename:?}");
            assert_eq!(mp1.opcode(SmuOp::SetPptFastLimit), 0x15, "{codename:?}");
            assert_eq!(mp1.opcode(SmuOp::SetPptLimit), 0x16, "{codename:?}");
        }

        let picasso = SmuProfile::for_codename(Codename::Picasso);
        let mp1 = picasso.mailbox(MailboxKind::Mp1).unwrap();
        assert_eq!(mp1.opcode(SmuOp::SetStapmLimit), 0x1A);
        assert_eq!(mp1.opcode(SmuOp::SetPptApuLimit), 0);

        // No shipped profile knows this one.
        for smu_type in [SmuType::Cpu3, SmuType::Apu1, SmuType::Apu2] {
            let mp1 = SmuProfile::for_type(smu_type).mailbox(MailboxKind::Mp1).unwrap();
            assert_eq!(mp1.opcode(SmuOp::GetSome1Clock), 0);
        }
    }

    #[test]
    fn svi_planes() {
        let vermeer = SviTelemetry::for_codename(Codename::Vermeer, 0).unwrap();
        assert_eq!(vermeer.core, 0x0005_A010);
        assert_eq!(vermeer.soc, 0x0005_A00C);

        let old = SviTelemetry::for_codename(Codename::Picasso, 0x001E_0000).unwrap();
        let new = SviTelemetry::for_codename(Codename::Picasso, 0x0100_0000).unwrap();
        assert_eq!((old.core, old.soc), (new.soc, new.core));

        assert!(SviTelemetry::for_codename(Codename::BristolRidge, 0).is_none());
    }
}
