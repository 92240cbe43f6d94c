//! Scaled-integer fixed-point codec.
//!
//! A real `r` in `[lo, hi]` is transmitted as an integer of one of seven
//! widths. Unsigned encoding is zero-based (`lo` maps to `0`); signed
//! encoding is midpoint-based (`(lo+hi)/2` maps to `0`). Both directions
//! saturate rather than error when `r` falls outside `[lo, hi]`.

/// One-shot unsigned scaled-integer codec, implemented once per width via
/// this macro rather than duplicated by hand for each of u8/u16/u32/u64.
macro_rules! unsigned_codec {
    ($encode:ident, $decode:ident, $ty:ty) => {
        /// Encode `real` (clamped to `[lo, hi]`) as a scaled
        #[doc = stringify!($ty)]
        /// . Saturates at the integer bounds for out-of-range input.
        pub fn $encode(real: f64, lo: f64, hi: f64) -> $ty {
            let max_int = <$ty>::MAX as f64;
            let range = hi - lo;
            let unit = if range != 0.0 { (real - lo) / range * max_int } else { 0.0 };
            unit.round().clamp(0.0, max_int) as $ty
        }

        /// Decode a scaled
        #[doc = stringify!($ty)]
        /// back to its real value in `[lo, hi]`.
        pub fn $decode(scaled: $ty, lo: f64, hi: f64) -> f64 {
            let max_int = <$ty>::MAX as f64;
            (scaled as f64) * (hi - lo) / max_int + lo
        }
    };
}

/// One-shot signed scaled-integer codec (midpoint-based).
macro_rules! signed_codec {
    ($encode:ident, $decode:ident, $ty:ty) => {
        /// Encode `real` (clamped to `[lo, hi]`) as a scaled
        #[doc = stringify!($ty)]
        /// about the `(lo+hi)/2` midpoint. Saturates at the integer bounds.
        pub fn $encode(real: f64, lo: f64, hi: f64) -> $ty {
            let span = (<$ty>::MAX as f64) - (<$ty>::MIN as f64) + 1.0;
            let range = hi - lo;
            let midpoint = (hi + lo) / 2.0;
            let unit = if range != 0.0 { (real - midpoint) * span / range } else { 0.0 };
            unit.round().clamp(<$ty>::MIN as f64, <$ty>::MAX as f64) as $ty
        }

        /// Decode a scaled
        #[doc = stringify!($ty)]
        /// back to its real value in `[lo, hi]`.
        pub fn $decode(scaled: $ty, lo: f64, hi: f64) -> f64 {
            let span = (<$ty>::MAX as f64) - (<$ty>::MIN as f64) + 1.0;
            let midpoint = (hi + lo) / 2.0;
            (scaled as f64) * (hi - lo) / span + midpoint
        }
    };
}

unsigned_codec!(encode_u8, decode_u8, u8);
unsigned_codec!(encode_u16, decode_u16, u16);
unsigned_codec!(encode_u32, decode_u32, u32);
unsigned_codec!(encode_u64, decode_u64, u64);

signed_codec!(encode_i8, decode_i8, i8);
signed_codec!(encode_i16, decode_i16, i16);
signed_codec!(encode_i32, decode_i32, i32);
signed_codec!(encode_i64, decode_i64, i64);

/// The seven scaled-integer wire widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaledWidth {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

/// Encode `real` at the given width, returning its little-endian bytes.
pub fn encode(real: f64, lo: f64, hi: f64, width: ScaledWidth) -> Vec<u8> {
    match width {
        ScaledWidth::U8 => vec![encode_u8(real, lo, hi)],
        ScaledWidth::U16 => encode_u16(real, lo, hi).to_le_bytes().to_vec(),
        ScaledWidth::U32 => encode_u32(real, lo, hi).to_le_bytes().to_vec(),
        ScaledWidth::U64 => encode_u64(real, lo, hi).to_le_bytes().to_vec(),
        ScaledWidth::I8 => vec![encode_i8(real, lo, hi) as u8],
        ScaledWidth::I16 => encode_i16(real, lo, hi).to_le_bytes().to_vec(),
        ScaledWidth::I32 => encode_i32(real, lo, hi).to_le_bytes().to_vec(),
        ScaledWidth::I64 => encode_i64(real, lo, hi).to_le_bytes().to_vec(),
    }
}

/// Decode a real number from little-endian bytes at the given width.
pub fn decode(bytes: &[u8], lo: f64, hi: f64, width: ScaledWidth) -> Option<f64> {
    let value = match width {
        ScaledWidth::U8 => decode_u8(*bytes.first()?, lo, hi),
        ScaledWidth::U16 => decode_u16(u16::from_le_bytes(bytes.get(0..2)?.try_into().ok()?), lo, hi),
        ScaledWidth::U32 => decode_u32(u32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?), lo, hi),
        ScaledWidth::U64 => decode_u64(u64::from_le_bytes(bytes.get(0..8)?.try_into().ok()?), lo, hi),
        ScaledWidth::I8 => decode_i8(*bytes.first()? as i8, lo, hi),
        ScaledWidth::I16 => decode_i16(i16::from_le_bytes(bytes.get(0..2)?.try_into().ok()?), lo, hi),
        ScaledWidth::I32 => decode_i32(i32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?), lo, hi),
        ScaledWidth::I64 => decode_i64(i64::from_le_bytes(bytes.get(0..8)?.try_into().ok()?), lo, hi),
    };
    Some(value)
}

/// Encode a rate in Hz over `[0.01666, 1092]`, the periodic-rate field
/// encoding used by service connections and periodic events (spec §6).
pub fn encode_rate_hz(hz: f64) -> u16 {
    encode_u16(hz, 0.01666, 1092.0)
}

/// Decode a rate in Hz from its wire representation.
pub fn decode_rate_hz(scaled: u16) -> f64 {
    decode_u16(scaled, 0.01666, 1092.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unsigned_round_trips_within_half_ulp() {
        let lo = -10.0;
        let hi = 25.0;
        for i in 0..=1000 {
            let r = lo + (hi - lo) * (i as f64) / 1000.0;
            let scaled = encode_u16(r, lo, hi);
            let back = decode_u16(scaled, lo, hi);
            assert!((back - r).abs() <= (hi - lo) / (2f64.powi(17)) + 1e-9);
        }
    }

    #[test]
    fn signed_round_trips_within_half_ulp() {
        let lo = -180.0;
        let hi = 180.0;
        for i in 0..=1000 {
            let r = lo + (hi - lo) * (i as f64) / 1000.0;
            let scaled = encode_i16(r, lo, hi);
            let back = decode_i16(scaled, lo, hi);
            assert!((back - r).abs() <= (hi - lo) / (2f64.powi(17)) + 1e-6);
        }
    }

    #[test]
    fn out_of_range_saturates_rather_than_errors() {
        assert_eq!(encode_u8(1000.0, 0.0, 255.0), 255);
        assert_eq!(encode_u8(-1000.0, 0.0, 255.0), 0);
        assert_eq!(encode_i16(1_000_000.0, -180.0, 180.0), i16::MAX);
        assert_eq!(encode_i16(-1_000_000.0, -180.0, 180.0), i16::MIN);
    }

    #[test]
    fn monotonic_unsigned() {
        let lo = 0.0;
        let hi = 1092.0;
        let mut prev = encode_u16(lo, lo, hi);
        for i in 1..=500 {
            let r = lo + (hi - lo) * (i as f64) / 500.0;
            let cur = encode_u16(r, lo, hi);
            assert!(cur >= prev);
            prev = cur;
        }
    }

    proptest! {
        #[test]
        fn prop_unsigned_round_trip(r in -1000.0f64..1000.0, lo in -2000.0f64..0.0, span in 1.0f64..4000.0) {
            let hi = lo + span;
            let r = r.clamp(lo, hi);
            let scaled = encode_u32(r, lo, hi);
            let back = decode_u32(scaled, lo, hi);
            prop_assert!((back - r).abs() <= (hi - lo) / 2f64.powi(33) + 1e-6);
        }

        #[test]
        fn prop_signed_round_trip(r in -1000.0f64..1000.0, lo in -2000.0f64..0.0, span in 1.0f64..4000.0) {
            let hi = lo + span;
            let r = r.clamp(lo, hi);
            let scaled = encode_i32(r, lo, hi);
            let back = decode_i32(scaled, lo, hi);
            prop_assert!((back - r).abs() <= (hi - lo) / 2f64.powi(33) + 1e-6);
        }
    }

    #[test]
    fn rate_hz_round_trip() {
        let scaled = encode_rate_hz(10.0);
        let back = decode_rate_hz(scaled);
        assert!((back - 10.0).abs() < 0.01);
    }
}
