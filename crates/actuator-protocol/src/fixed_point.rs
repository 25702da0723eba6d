//! Fixed-point conversion for real-valued arguments.
//!
//! Both formats live in a 16-bit two's-complement word:
//!
//! ```text
//! Q8.8   siiiiiii.ffffffff   range [-128.0, 127.99609375]     step 1/256
//! Q4.12  siii.ffffffffffff   range [-8.0, 7.999755859375]     step 1/4096
//! ```
//!
//! Encoding rounds to the nearest step and clamps to the representable range.
//! Clamping never wraps, so a large positive command cannot turn into a
//! negative one on the wire. Callers that need to know whether clamping
//! happened use [`encode_checked`].

/// A 16-bit fixed-point wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QFormat {
    /// 8 integer bits, 8 fractional bits.
    Q8_8,
    /// 4 integer bits, 12 fractional bits.
    Q4_12,
}

impl QFormat {
    /// Number of fractional bits.
    pub const fn fractional_bits(self) -> u32 {
        match self {
            QFormat::Q8_8 => 8,
            QFormat::Q4_12 => 12,
        }
    }

    /// Multiplier between the real value and the raw word.
    pub const fn scale(self) -> f64 {
        (1u32 << self.fractional_bits()) as f64
    }

    /// Smallest representable step.
    pub fn resolution(self) -> f64 {
        1.0 / self.scale()
    }

    /// Most negative representable value.
    pub fn min(self) -> f64 {
        i16::MIN as f64 / self.scale()
    }

    /// Most positive representable value.
    pub fn max(self) -> f64 {
        i16::MAX as f64 / self.scale()
    }

    /// Get the format name as used in documentation and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            QFormat::Q8_8 => "Q8.8",
            QFormat::Q4_12 => "Q4.12",
        }
    }
}

impl std::fmt::Display for QFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of encoding a real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantized {
    /// The raw 16-bit word.
    pub raw: i16,
    /// The input was outside the representable range (or NaN) and was clamped.
    pub saturated: bool,
}

/// Encode a real value, discarding the saturation flag.
pub fn encode(value: f64, format: QFormat) -> i16 {
    encode_checked(value, format).raw
}

/// Encode a real value and report whether it had to be clamped.
///
/// NaN has no meaningful nearest value; it encodes as zero and is reported as
/// saturated.
pub fn encode_checked(value: f64, format: QFormat) -> Quantized {
    if value.is_nan() {
        return Quantized { raw: 0, saturated: true };
    }

    let saturated = value < format.min() || value > format.max();
    let scaled = (value * format.scale()).round();
    let raw = scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16;

    Quantized { raw, saturated }
}

/// Decode a raw word into its real value.
pub fn decode(raw: i16, format: QFormat) -> f64 {
    raw as f64 / format.scale()
}

/// Snap a real value onto the format's grid.
///
/// Equivalent to `decode(encode(value))`, returned together with the
/// saturation flag.
pub fn quantize(value: f64, format: QFormat) -> (f64, bool) {
    let q = encode_checked(value, format);
    (decode(q.raw, format), q.saturated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_q88_ten() {
        assert_eq!(encode(10.0, QFormat::Q8_8), 2560);
        assert_eq!(encode(10.0, QFormat::Q8_8) as u16, 0x0A00);
    }

    #[test]
    fn test_decode_q412() {
        // 12 fractional bits: one whole unit is 0x1000.
        assert_eq!(decode(0x1000, QFormat::Q4_12), 1.0);
        assert_eq!(decode(0x0400, QFormat::Q4_12), 0.25);
        assert_eq!(encode(1.0, QFormat::Q4_12), 0x1000);
    }

    #[test]
    fn test_negative_is_twos_complement() {
        assert_eq!(encode(-1.0, QFormat::Q8_8), -256);
        assert_eq!((encode(-1.0, QFormat::Q8_8) as u16), 0xFF00);
        assert_eq!(decode(-256, QFormat::Q8_8), -1.0);
    }

    #[test]
    fn test_range_limits() {
        assert_eq!(QFormat::Q8_8.max(), 127.99609375);
        assert_eq!(QFormat::Q8_8.min(), -128.0);
        assert_eq!(QFormat::Q4_12.max(), 7.999755859375);
        assert_eq!(QFormat::Q4_12.min(), -8.0);
    }

    #[test]
    fn test_saturates_instead_of_wrapping() {
        let high = encode_checked(200.0, QFormat::Q8_8);
        assert_eq!(high.raw, i16::MAX);
        assert!(high.saturated);

        let low = encode_checked(-500.0, QFormat::Q8_8);
        assert_eq!(low.raw, i16::MIN);
        assert!(low.saturated);

        let inf = encode_checked(f64::INFINITY, QFormat::Q4_12);
        assert_eq!(inf.raw, i16::MAX);
        assert!(inf.saturated);
    }

    #[test]
    fn test_boundaries_are_not_saturated() {
        assert!(!encode_checked(QFormat::Q8_8.max(), QFormat::Q8_8).saturated);
        assert!(!encode_checked(QFormat::Q8_8.min(), QFormat::Q8_8).saturated);
    }

    #[test]
    fn test_nan_encodes_as_zero() {
        let q = encode_checked(f64::NAN, QFormat::Q8_8);
        assert_eq!(q.raw, 0);
        assert!(q.saturated);
    }

    #[test]
    fn test_rounds_to_nearest() {
        // 0.3 * 256 = 76.8
        assert_eq!(encode(0.3, QFormat::Q8_8), 77);
        // -0.3 * 256 = -76.8
        assert_eq!(encode(-0.3, QFormat::Q8_8), -77);
    }

    #[test]
    fn test_quantize() {
        let (value, saturated) = quantize(1.001, QFormat::Q8_8);
        assert_eq!(value, 1.0);
        assert!(!saturated);
    }
}
