#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

const fn field_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Extracts `width` bits of `value` starting at bit `offset`.
#[must_use]
pub const fn get_bits(value: u32, offset: u32, width: u32) -> u32 {
    (value >> offset) & field_mask(width)
}

/// Replaces `width` bits of `value` starting at bit `offset` with the low bits of `field`.
#[must_use]
pub const fn set_bits(value: u32, offset: u32, width: u32, field: u32) -> u32 {
    let mask = field_mask(width) << offset;
    (value & !mask) | ((field << offset) & mask)
}

#[must_use]
pub const fn count_set_bits(value: u32) -> u32 {
    value.count_ones()
}

/// Integer base-2 logarithm, zero for inputs below two.
#[must_use]
pub const fn log2(value: u32) -> u32 {
    if value < 2 { 0 } else { 31 - value.leading_zeros() }
}

/// Encodes a signed PSM margin as the 16-bit field the firmware expects.
///
/// Negative margins are biased by `0x100000` before truncation, matching the
/// two's-complement view of the low 16 bits.
#[must_use]
pub const fn psm_margin_arg(margin: i32) -> u32 {
    let offset: i64 = if margin < 0 { 0x10_0000 } else { 0 };
    ((offset + margin as i64) as u32) & 0xffff
}

#[must_use]
pub fn is_all_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_helpers() {
        assert_eq!(get_bits(0xABCD_1234, 16, 8), 0xCD);
        assert_eq!(get_bits(0xFFFF_FFFF, 0, 32), 0xFFFF_FFFF);
        assert_eq!(set_bits(0x0000_0000, 20, 2, 3), 0x0030_0000);
        assert_eq!(set_bits(0x00F0_0000, 20, 2, 1), 0x00D0_0000);
        assert_eq!(count_set_bits(0b1011_0001), 4);
        assert_eq!(log2(1), 0);
        assert_eq!(log2(2), 1);
        assert_eq!(log2(16), 4);
    }

    #[test]
    fn psm_margin_encoding() {
        assert_eq!(psm_margin_arg(0), 0);
        assert_eq!(psm_margin_arg(15), 15);
        assert_eq!(psm_margin_arg(-1), 0xffff);
        assert_eq!(psm_margin_arg(-30), 0xffe2);
    }
}
