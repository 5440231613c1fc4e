//! The firmware power table: a telemetry block the SMU copies into DRAM on request.
//!
//! Its layout changes with every firmware table version. Known versions have an
//! exact entry in the layout table; unknown versions fall back to a generic entry
//! for the SMU generation (faux versions 0x10..0x12 for APUs, 0x100..0x300 for CPUs).

use crate::error::{SmuError, SmuResult};
use crate::smu::Smu;
use crate::smu::mailbox::SmuStatus;
use crate::smu::profile::SmuType;
use crate::utils::is_all_zero;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Named power table fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Fclk,
    Uclk,
    Mclk,
    VddcrSoc,
    CldoVddp,
    CldoVddgIod,
    CldoVddgCcd,
    PptLimit,
    PptValue,
    TdcLimit,
    TdcValue,
    ThmLimit,
    ThmValue,
    EdcLimit,
    EdcValue,
}

impl Field {
    pub const COUNT: usize = 15;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Fclk,
        Self::Uclk,
        Self::Mclk,
        Self::VddcrSoc,
        Self::CldoVddp,
        Self::CldoVddgIod,
        Self::CldoVddgCcd,
        Self::PptLimit,
        Self::PptValue,
        Self::TdcLimit,
        Self::TdcValue,
        Self::ThmLimit,
        Self::ThmValue,
        Self::EdcLimit,
        Self::EdcValue,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// Memory and fabric clocks, which need bus clock correction.
    #[must_use]
    pub const fn is_clock(self) -> bool {
        matches!(self, Self::Fclk | Self::Uclk | Self::Mclk)
    }

    #[must_use]
    pub const fn kind(self) -> NumericKind {
        NumericKind::F32
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fclk => "FCLK",
            Self::Uclk => "UCLK",
            Self::Mclk => "MCLK",
            Self::VddcrSoc => "VDDCR_SOC",
            Self::CldoVddp => "CLDO_VDDP",
            Self::CldoVddgIod => "CLDO_VDDG_IOD",
            Self::CldoVddgCcd => "CLDO_VDDG_CCD",
            Self::PptLimit => "PPT_LIMIT",
            Self::PptValue => "PPT_VALUE",
            Self::TdcLimit => "TDC_LIMIT",
            Self::TdcValue => "TDC_VALUE",
            Self::ThmLimit => "THM_LIMIT",
            Self::ThmValue => "THM_VALUE",
            Self::EdcLimit => "EDC_LIMIT",
            Self::EdcValue => "EDC_VALUE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    F32,
    U32,
}

/// Where and how one field is stored in the raw table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub field: Field,
    pub offset: usize,
    pub kind: NumericKind,
}

impl FieldDescriptor {
    pub const WIDTH: usize = 4;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    F32(f32),
    U32(u32),
}

impl FieldValue {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f32(self) -> f32 {
        match self {
            Self::F32(v) => v,
            Self::U32(v) => v as f32,
        }
    }

    /// Bitwise comparison, so that NaN readings do not report a change every refresh.
    fn same_as(self, other: Self) -> bool {
        match (self, other) {
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::U32(a), Self::U32(b)) => a == b,
            _ => false,
        }
    }
}

/// Offsets of every known field for one table version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerTableLayout {
    pub version: u32,
    /// Bytes to read from DRAM.
    pub size: usize,
    offsets: [Option<u16>; Field::COUNT],
    /// Start of the per-core power array, one f32 per core.
    pub cores_power: Option<u16>,
}

const fn offset(raw: i32) -> Option<u16> {
    if raw < 0 { None } else { Some(raw as u16) }
}

/// Limit/value pairs at the head of the Zen2 and Zen3 desktop tables.
const LIMITS: [(Field, u16); 8] = [
    (Field::PptLimit, 0x00),
    (Field::PptValue, 0x04),
    (Field::TdcLimit, 0x08),
    (Field::TdcValue, 0x0C),
    (Field::ThmLimit, 0x10),
    (Field::ThmValue, 0x14),
    (Field::EdcLimit, 0x20),
    (Field::EdcValue, 0x24),
];

// version, size, [FCLK, UCLK, MCLK, VDDCR_SOC, CLDO_VDDP, CLDO_VDDG_IOD, CLDO_VDDG_CCD, cores power]
const fn layout(version: u32, size: usize, o: [i32; 8], limits: bool) -> PowerTableLayout {
    let mut offsets = [None; Field::COUNT];
    offsets[Field::Fclk.index()] = offset(o[0]);
    offsets[Field::Uclk.index()] = offset(o[1]);
    offsets[Field::Mclk.index()] = offset(o[2]);
    offsets[Field::VddcrSoc.index()] = offset(o[3]);
    offsets[Field::CldoVddp.index()] = offset(o[4]);
    offsets[Field::CldoVddgIod.index()] = offset(o[5]);
    offsets[Field::CldoVddgCcd.index()] = offset(o[6]);

    if limits {
        let mut i = 0;
        while i < LIMITS.len() {
            offsets[LIMITS[i].0.index()] = Some(LIMITS[i].1);
            i += 1;
        }
    }

    PowerTableLayout {
        version,
        size,
        offsets,
        cores_power: offset(o[7]),
    }
}

static LAYOUTS: &[PowerTableLayout] = &[
    // Zen and Zen+ APU
    layout(0x1E_0001, 0x570, [0x460, 0x464, 0x468, 0x10C, 0xF8, -1, -1, -1], false),
    layout(0x1E_0002, 0x570, [0x474, 0x478, 0x47C, 0x10C, 0xF8, -1, -1, -1], false),
    layout(0x1E_0003, 0x610, [0x298, 0x29C, 0x2A0, 0x104, 0xF0, -1, -1, -1], false),
    layout(0x1E_0004, 0x610, [0x298, 0x29C, 0x2A0, 0x104, 0xF0, -1, -1, -1], false),
    layout(0x00_0010, 0x610, [0x298, 0x29C, 0x2A0, 0x104, 0xF0, -1, -1, -1], false),
    // FireFlight
    layout(0x26_0001, 0x610, [0x28, 0x2C, 0x30, 0x10, -1, -1, -1, -1], false),
    // Zen2 APU
    layout(0x37_0000, 0x79C, [0x4B4, 0x4B8, 0x4BC, 0x190, 0x72C, -1, -1, -1], false),
    layout(0x37_0001, 0x88C, [0x5A4, 0x5A8, 0x5AC, 0x190, 0x81C, -1, -1, -1], false),
    layout(0x37_0002, 0x894, [0x5AC, 0x5B0, 0x5B4, 0x198, 0x824, -1, -1, -1], false),
    layout(0x37_0003, 0x8B4, [0x5CC, 0x5D0, 0x5D4, 0x198, 0x844, -1, -1, -1], false),
    layout(0x37_0005, 0x8D0, [0x5E8, 0x5EC, 0x5F0, 0x198, 0x86C, -1, -1, -1], false),
    layout(0x00_0011, 0x8D0, [0x5E8, 0x5EC, 0x5F0, 0x198, 0x86C, -1, -1, -1], false),
    // Zen3 APU
    layout(0x40_0001, 0x8D0, [0x624, 0x628, 0x62C, 0x19C, 0x89C, -1, -1, -1], false),
    layout(0x40_0002, 0x8D0, [0x63C, 0x640, 0x644, 0x19C, 0x8B4, -1, -1, -1], false),
    layout(0x40_0003, 0x944, [0x660, 0x664, 0x668, 0x19C, 0x8D0, -1, -1, -1], false),
    layout(0x40_0004, 0x948, [0x664, 0x668, 0x66C, 0x19C, 0x8D4, -1, -1, -1], false),
    layout(0x40_0005, 0x948, [0x664, 0x668, 0x66C, 0x19C, 0x944, -1, -1, -1], false),
    layout(0x00_0012, 0x948, [0x664, 0x668, 0x66C, 0x19C, 0x944, -1, -1, -1], false),
    // Zen, Zen+
    layout(0x00_0100, 0x7E4, [0x84, 0x84, 0x84, 0x68, 0x44, -1, -1, -1], false),
    layout(0x00_0101, 0x7E4, [0x84, 0x84, 0x84, 0x60, 0x3C, -1, -1, -1], false),
    // Zen2, grouped by version & 7
    layout(0x00_0200, 0x7E4, [0xB0, 0xB8, 0xBC, 0xA4, 0x1E4, 0x1E8, -1, -1], true),
    layout(0x00_0202, 0x7E4, [0xBC, 0xC4, 0xC8, 0xB0, 0x1F0, 0x1F4, -1, -1], true),
    layout(0x00_0203, 0x7E4, [0xC0, 0xC8, 0xCC, 0xB4, 0x1F4, 0x1F8, -1, 0x24C], true),
    // Zen3. 0x2D0903 comes from early Vermeer beta firmware (SMU 56.27.00).
    layout(0x2D_0903, 0x7E4, [0xBC, 0xC4, 0xC8, 0xB0, 0x220, 0x224, -1, -1], true),
    layout(0x38_0804, 0x8A4, [0xC0, 0xC8, 0xCC, 0xB4, 0x224, 0x228, 0x22C, 0x24C], true),
    layout(0x38_0805, 0x8F0, [0xC0, 0xC8, 0xCC, 0xB4, 0x224, 0x228, 0x22C, 0x2B0], true),
    layout(0x38_0904, 0x5A4, [0xC0, 0xC8, 0xCC, 0xB4, 0x224, 0x228, 0x22C, 0x2A4], true),
    layout(0x38_0905, 0x5D0, [0xC0, 0xC8, 0xCC, 0xB4, 0x224, 0x228, 0x22C, 0x2B0], true),
    layout(0x00_0300, 0x948, [0xC0, 0xC8, 0xCC, 0xB4, 0x224, 0x228, 0x22C, -1], true),
];

/// Layout with every field absent, for generations without a known table.
pub static EMPTY_LAYOUT: PowerTableLayout = layout(0, 0, [-1; 8], false);

/// Generic faux version for `smu_type`, used when `table_version` has no exact entry.
#[must_use]
pub const fn fallback_version(table_version: u32, smu_type: SmuType) -> Option<u32> {
    match smu_type {
        SmuType::Cpu0 => Some(0x100),
        SmuType::Cpu1 => Some(0x101),
        SmuType::Cpu2 => match table_version & 0x7 {
            0 => Some(0x200),
            1 | 2 | 4 => Some(0x202),
            _ => Some(0x203),
        },
        SmuType::Cpu3 => Some(0x300),
        SmuType::Apu0 => Some(0x10),
        SmuType::Apu1 | SmuType::Apu2 => {
            if table_version >> 16 == 0x37 {
                Some(0x11)
            } else {
                Some(0x12)
            }
        }
        SmuType::Cpu4 | SmuType::Unsupported => None,
    }
}

fn find_layout(version: u32) -> Option<&'static PowerTableLayout> {
    LAYOUTS.iter().find(|l| l.version == version)
}

/// Exact version match, else the generation's generic layout, else [`EMPTY_LAYOUT`].
#[must_use]
pub fn resolve_layout(table_version: u32, smu_type: SmuType) -> &'static PowerTableLayout {
    find_layout(table_version)
        .or_else(|| fallback_version(table_version, smu_type).and_then(find_layout))
        .unwrap_or(&EMPTY_LAYOUT)
}

impl PowerTableLayout {
    #[must_use]
    pub fn offset(&self, field: Field) -> Option<usize> {
        self.offsets[field.index()].map(usize::from)
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<FieldDescriptor> {
        Field::ALL
            .iter()
            .filter_map(|&field| {
                self.offset(field).map(|offset| FieldDescriptor {
                    field,
                    offset,
                    kind: field.kind(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Reads every descriptor that lies fully inside `raw`. Little-endian.
#[must_use]
pub fn decode(descriptors: &[FieldDescriptor], raw: &[u8]) -> Vec<(Field, FieldValue)> {
    descriptors
        .iter()
        .filter_map(|d| {
            let bytes = raw.get(d.offset..d.offset + FieldDescriptor::WIDTH)?;
            let word = u32::from_le_bytes(bytes.try_into().ok()?);
            let value = match d.kind {
                NumericKind::F32 => FieldValue::F32(f32::from_bits(word)),
                NumericKind::U32 => FieldValue::U32(word),
            };
            Some((d.field, value))
        })
        .collect()
}

/// Reference clocks used to correct the clock fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReference {
    /// Measured bus clock in MHz. Nominal is 100.
    pub bus_clock_mhz: f32,
    /// Configured memory speed (MT/s) and memory clock ratio, when known.
    pub memory: Option<(f32, f32)>,
}

impl Default for ClockReference {
    fn default() -> Self {
        Self {
            bus_clock_mhz: 100.0,
            memory: None,
        }
    }
}

impl ClockReference {
    #[must_use]
    pub fn correction(&self) -> f32 {
        match self.memory {
            Some((configured, ratio)) if configured > 0.0 && ratio > 0.0 => {
                configured / (ratio * 200.0)
            }
            _ => self.bus_clock_mhz / 100.0,
        }
    }
}

/// One decoded copy of the power table. Immutable once published.
#[derive(Debug, Clone, Default)]
pub struct PowerTableSnapshot {
    raw: Vec<u8>,
    values: [Option<FieldValue>; Field::COUNT],
    cores_power: Option<usize>,
}

impl PowerTableSnapshot {
    fn decode(layout: &PowerTableLayout, raw: Vec<u8>, clock: &ClockReference) -> Self {
        let correction = clock.correction();
        let mut values = [None; Field::COUNT];
        for (field, value) in decode(&layout.descriptors(), &raw) {
            values[field.index()] = Some(if field.is_clock() {
                FieldValue::F32(value.as_f32() * correction)
            } else {
                value
            });
        }

        Self {
            raw,
            values,
            cores_power: layout.cores_power.map(usize::from),
        }
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn value(&self, field: Field) -> Option<FieldValue> {
        self.values[field.index()]
    }

    #[must_use]
    pub fn get(&self, field: Field) -> Option<f32> {
        self.value(field).map(FieldValue::as_f32)
    }

    /// Power of physical core `core` in W, if the layout has a per-core block.
    #[must_use]
    pub fn core_power(&self, core: usize) -> Option<f32> {
        let start = self.cores_power? + core * FieldDescriptor::WIDTH;
        let bytes = self.raw.get(start..start + FieldDescriptor::WIDTH)?;
        Some(f32::from_le_bytes(bytes.try_into().ok()?))
    }
}

/// A field whose decoded value differs from the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldChange {
    pub field: Field,
    pub previous: Option<FieldValue>,
    pub current: Option<FieldValue>,
}

/// Live power table of one processor.
pub struct PowerTable {
    dram_base: u64,
    layout: &'static PowerTableLayout,
    clock: Mutex<ClockReference>,
    current: RwLock<Arc<PowerTableSnapshot>>,
    subscribers: Mutex<Vec<Sender<FieldChange>>>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for PowerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerTable")
            .field("dram_base", &format_args!("{:#x}", self.dram_base))
            .field("version", &format_args!("{:#x}", self.layout.version))
            .field("size", &self.layout.size)
            .finish_non_exhaustive()
    }
}

impl PowerTable {
    /// Locates the table in DRAM and selects the layout for `table_version`.
    ///
    /// # Errors
    /// [`SmuError::DramBaseAddressZero`] when the firmware does not report an address.
    pub fn new(smu: &Smu, table_version: u32) -> SmuResult<Self> {
        let dram_base = smu.dram_base_address();
        if dram_base == 0 {
            return Err(SmuError::DramBaseAddressZero);
        }

        let smu_type = smu.profile().smu_type;
        let layout = resolve_layout(table_version, smu_type);
        if layout.is_empty() {
            warn!("No power table layout for version {table_version:#x} on {smu_type:?}");
        } else if layout.version != table_version {
            info!(
                "Power table version {table_version:#x} unknown, using generic layout {:#x}",
                layout.version
            );
        }
        debug!("Power table at {dram_base:#x}, {} bytes", layout.size);

        Ok(Self {
            dram_base,
            layout,
            clock: Mutex::new(ClockReference::default()),
            current: RwLock::new(Arc::new(PowerTableSnapshot::default())),
            subscribers: Mutex::new(Vec::new()),
            refresh_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn dram_base_address(&self) -> u64 {
        self.dram_base
    }

    #[must_use]
    pub fn layout(&self) -> &'static PowerTableLayout {
        self.layout
    }

    #[must_use]
    pub fn supports(&self, field: Field) -> bool {
        self.layout.offset(field).is_some()
    }

    /// Measured bus clock, used for clock correction from the next refresh on.
    pub fn set_bus_clock(&self, mhz: f32) {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bus_clock_mhz = mhz;
    }

    /// Configured memory speed and memory clock ratio. Takes precedence over the bus clock.
    pub fn set_memory_reference(&self, configured_mts: f32, ratio: f32) {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .memory = Some((configured_mts, ratio));
    }

    /// Latest published snapshot. Empty until the first successful refresh.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PowerTableSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Receives one [`FieldChange`] per field that changes on a refresh.
    pub fn subscribe(&self) -> Receiver<FieldChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Asks the firmware for a fresh copy, reads and decodes it, and publishes the
    /// new snapshot.
    pub fn refresh(&self, smu: &Smu) -> SmuStatus {
        let _serial = self
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.layout.is_empty() {
            return SmuStatus::Unsupported;
        }

        let status = smu.transfer_table_with_retry();
        if !status.is_ok() {
            return status;
        }

        let raw = match smu
            .context()
            .hardware()
            .read_physical(self.dram_base, self.layout.size)
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Reading power table at {:#x} failed: {e}", self.dram_base);
                return SmuStatus::Failed;
            }
        };
        if is_all_zero(&raw) {
            warn!("Power table read back as all zeroes");
            return SmuStatus::Failed;
        }

        let clock = *self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(PowerTableSnapshot::decode(self.layout, raw, &clock));
        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, Arc::clone(&next))
        };

        self.publish(&previous, &next);
        SmuStatus::Ok
    }

    fn publish(&self, previous: &PowerTableSnapshot, next: &PowerTableSnapshot) {
        let changes: Vec<FieldChange> = Field::ALL
            .iter()
            .filter_map(|&field| {
                let (before, after) = (previous.value(field), next.value(field));
                let same = match (before, after) {
                    (Some(a), Some(b)) => a.same_as(b),
                    (None, None) => true,
                    _ => false,
                };
                (!same).then_some(FieldChange {
                    field,
                    previous: before,
                    current: after,
                })
            })
            .collect();

        if changes.is_empty() {
            return;
        }

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| changes.iter().all(|change| tx.send(*change).is_ok()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_versions_keep_their_size() {
        for l in LAYOUTS {
            let resolved = resolve_layout(l.version, SmuType::Unsupported);
            assert_eq!(resolved.version, l.version);
            assert_eq!(resolved.size, l.size);
        }
    }

    #[test]
    fn unknown_versions_fall_back_per_generation() {
        let zen3 = resolve_layout(0x38_0806, SmuType::Cpu3);
        assert_eq!(zen3.version, 0x300);
        assert_eq!(zen3.size, 0x948);

        assert_eq!(resolve_layout(0x24_0803, SmuType::Cpu2).version, 0x203);
        assert_eq!(resolve_layout(0x24_0801, SmuType::Cpu2).version, 0x202);
        assert_eq!(resolve_layout(0x24_0800, SmuType::Cpu2).version, 0x200);
        assert_eq!(resolve_layout(0x37_0004, SmuType::Apu1).version, 0x11);
        assert_eq!(resolve_layout(0x45_0005, SmuType::Apu2).version, 0x12);
        assert_eq!(resolve_layout(0, SmuType::Cpu0).version, 0x100);
        assert_eq!(resolve_layout(0x1E_0009, SmuType::Apu0).version, 0x10);
    }

    #[test]
    fn generations_without_a_layout_get_the_empty_one() {
        let l = resolve_layout(0x54_0100, SmuType::Cpu4);
        assert!(l.is_empty());
        assert!(l.descriptors().is_empty());
        assert!(resolve_layout(0x1, SmuType::Unsupported).is_empty());
    }

    #[test]
    fn absent_offsets_are_absent() {
        let l = resolve_layout(0x37_0003, SmuType::Apu1);
        assert_eq!(l.offset(Field::Fclk), Some(0x5CC));
        assert_eq!(l.offset(Field::CldoVddgIod), None);
        assert_eq!(l.offset(Field::PptLimit), None);

        let zen2 = resolve_layout(0x203, SmuType::Cpu2);
        assert_eq!(zen2.offset(Field::EdcValue), Some(0x24));
        assert_eq!(zen2.cores_power, Some(0x24C));
    }

    #[test]
    fn decode_reads_little_endian_words_in_bounds() {
        let mut raw = vec![0u8; 16];
        raw[4..8].copy_from_slice(&1.5f32.to_le_bytes());
        raw[8..12].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

        let descriptors = [
            FieldDescriptor {
                field: Field::Fclk,
                offset: 4,
                kind: NumericKind::F32,
            },
            FieldDescriptor {
                field: Field::PptLimit,
                offset: 8,
                kind: NumericKind::U32,
            },
            FieldDescriptor {
                field: Field::Mclk,
                offset: 14,
                kind: NumericKind::F32,
            },
        ];

        let values = decode(&descriptors, &raw);
        assert_eq!(
            values,
            vec![
                (Field::Fclk, FieldValue::F32(1.5)),
                (Field::PptLimit, FieldValue::U32(0xDEAD_BEEF)),
            ]
        );
    }

    #[test]
    fn clock_correction() {
        assert!((ClockReference::default().correction() - 1.0).abs() < f32::EPSILON);

        let measured = ClockReference {
            bus_clock_mhz: 102.0,
            memory: None,
        };
        assert!((measured.correction() - 1.02).abs() < 1e-6);

        let configured = ClockReference {
            bus_clock_mhz: 100.0,
            memory: Some((3600.0, 9.0)),
        };
        assert!((configured.correction() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn snapshot_scales_only_clocks() {
        let layout = resolve_layout(0x300, SmuType::Cpu3);
        let mut raw = vec![0u8; layout.size];
        raw[0xC0..0xC4].copy_from_slice(&1800.0f32.to_le_bytes());
        raw[0xB4..0xB8].copy_from_slice(&1.1f32.to_le_bytes());

        let clock = ClockReference {
            bus_clock_mhz: 101.0,
            memory: None,
        };
        let snapshot = PowerTableSnapshot::decode(layout, raw, &clock);
        assert!((snapshot.get(Field::Fclk).unwrap() - 1818.0).abs() < 1e-3);
        assert!((snapshot.get(Field::VddcrSoc).unwrap() - 1.1).abs() < 1e-6);
        assert_eq!(snapshot.core_power(0), None);
    }
}
