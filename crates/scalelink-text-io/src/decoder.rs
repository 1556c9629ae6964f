//! Telegram decoding.
//!
//! Scale indicators from different vendors emit mutually incompatible
//! line formats. Rather than one parser per vendor, the decoder walks a
//! declarative rule table ([`DecoderConfig::rules`]) from most specific to
//! most permissive and returns the first rule that yields a finite weight.
//!
//! | Rule                                | Example     | Value                      |
//! |-------------------------------------|-------------|----------------------------|
//! | [`TelegramFormat::FlaggedFixed`]    | `P 12345`   | digits x scale factor      |
//! | [`TelegramFormat::BareFixed`]       | `12345`     | grams or already scaled    |
//! | [`TelegramFormat::PrefixedFixed`]   | `D025500`   | digits / 1000              |
//! | [`TelegramFormat::GenericDecimal`]  | `+12,7 kg`  | first decimal in the line  |

use scalelink_core::{ScaleFlag, Telegram, TelegramFormat};

/// How to interpret a bare fixed-width digit telegram.
///
/// The line itself carries no unit, so this is a deployment-time choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BareDigits {
    /// Digits are grams; multiply by the scale factor.
    #[default]
    Grams,
    /// Digits are already in display units.
    Scaled,
}

/// Decoder settings. Vendor differences are captured here as data.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// Multiplier for flagged and bare (grams) telegrams.
    pub scale_factor: f64,
    pub bare_digits: BareDigits,
    /// Status letters accepted by the flagged rule.
    pub flag_letters: String,
    /// Digit count for flagged and bare telegrams.
    pub fixed_width: usize,
    /// Marker letter for the prefixed rule.
    pub prefix_marker: char,
    /// Digit count for prefixed telegrams.
    pub prefix_width: usize,
    /// Rules tried in order.
    pub rules: Vec<TelegramFormat>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            scale_factor: 0.001,
            bare_digits: BareDigits::Grams,
            flag_letters: "PNTBR".to_string(),
            fixed_width: 5,
            prefix_marker: 'D',
            prefix_width: 6,
            rules: vec![
                TelegramFormat::FlaggedFixed,
                TelegramFormat::BareFixed,
                TelegramFormat::PrefixedFixed,
                TelegramFormat::GenericDecimal,
            ],
        }
    }
}

/// A successful decode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    pub weight: f64,
    pub format: TelegramFormat,
    pub flag: Option<ScaleFlag>,
}

/// Strip whitespace and framing control bytes from both ends.
fn trim_frame(line: &str) -> &str {
    line.trim_matches(|c: char| c.is_whitespace() || c.is_control())
}

/// Rule-table telegram decoder.
#[derive(Debug, Clone, Default)]
pub struct TelegramDecoder {
    config: DecoderConfig,
}

impl TelegramDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        TelegramDecoder { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one line. Whitespace and control characters (such as a
    /// leading STX) are trimmed first. `None` means no rule matched; that
    /// is routine (keep-alives, noise) and not an error.
    pub fn decode(&self, line: &str) -> Option<Decoded> {
        let line = trim_frame(line);
        if line.is_empty() {
            return None;
        }
        self.config
            .rules
            .iter()
            .find_map(|rule| self.apply(*rule, line))
    }

    /// Decode a raw framed line into a [`Telegram`], decoded or not.
    pub fn telegram(&self, raw_line: &str) -> Telegram {
        let trimmed = trim_frame(raw_line);
        match self.decode(trimmed) {
            Some(d) => Telegram {
                raw_line: trimmed.to_string(),
                weight: Some(d.weight),
                format: Some(d.format),
                flag: d.flag,
            },
            None => Telegram::ignored(trimmed),
        }
    }

    fn apply(&self, rule: TelegramFormat, line: &str) -> Option<Decoded> {
        let decoded = match rule {
            TelegramFormat::FlaggedFixed => self.flagged_fixed(line),
            TelegramFormat::BareFixed => self.bare_fixed(line),
            TelegramFormat::PrefixedFixed => self.prefixed_fixed(line),
            TelegramFormat::GenericDecimal => generic_decimal(line).map(|weight| Decoded {
                weight,
                format: rule,
                flag: None,
            }),
        }?;
        decoded.weight.is_finite().then_some(decoded)
    }

    fn flagged_fixed(&self, line: &str) -> Option<Decoded> {
        let mut chars = line.chars();
        let letter = chars.next()?;
        if !self.config.flag_letters.contains(letter) {
            return None;
        }
        let rest = chars.as_str();
        let digits = rest.strip_prefix(' ').unwrap_or(rest);
        let n = fixed_digits(digits, self.config.fixed_width)?;
        Some(Decoded {
            weight: n as f64 * self.config.scale_factor,
            format: TelegramFormat::FlaggedFixed,
            flag: Some(ScaleFlag::from_letter(letter)),
        })
    }

    fn bare_fixed(&self, line: &str) -> Option<Decoded> {
        let n = fixed_digits(line, self.config.fixed_width)? as f64;
        let weight = match self.config.bare_digits {
            BareDigits::Grams => n * self.config.scale_factor,
            BareDigits::Scaled => n,
        };
        Some(Decoded {
            weight,
            format: TelegramFormat::BareFixed,
            flag: None,
        })
    }

    fn prefixed_fixed(&self, line: &str) -> Option<Decoded> {
        let digits = line.strip_prefix(self.config.prefix_marker)?;
        let n = fixed_digits(digits, self.config.prefix_width)?;
        Some(Decoded {
            weight: n as f64 / 1000.0,
            format: TelegramFormat::PrefixedFixed,
            flag: None,
        })
    }
}

/// Parse exactly `width` ASCII digits and nothing else.
fn fixed_digits(s: &str, width: usize) -> Option<u64> {
    if width == 0 || s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

const MAX_INT_DIGITS: usize = 6;
const MAX_FRAC_DIGITS: usize = 3;

/// Find the leftmost `[+-]?\d{1,6}([.,]\d{1,3})?` in `line` and parse it,
/// treating a decimal comma as a point.
fn generic_decimal(line: &str) -> Option<f64> {
    let b = line.as_bytes();
    let start = (0..b.len()).find(|&i| {
        b[i].is_ascii_digit()
            || (matches!(b[i], b'+' | b'-') && b.get(i + 1).is_some_and(u8::is_ascii_digit))
    })?;

    let int_start = if b[start].is_ascii_digit() {
        start
    } else {
        start + 1
    };
    let int_end = int_start + count_digits(&b[int_start..], MAX_INT_DIGITS);

    let mut end = int_end;
    if matches!(b.get(int_end), Some(b'.' | b',')) {
        let frac = count_digits(&b[int_end + 1..], MAX_FRAC_DIGITS);
        if frac > 0 {
            end = int_end + 1 + frac;
        }
    }

    let text = line[start..end].replace(',', ".");
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn count_digits(b: &[u8], max: usize) -> usize {
    b.iter().take(max).take_while(|c| c.is_ascii_digit()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn flagged_fixed_gross() {
        let d = TelegramDecoder::default().decode("P 12345").unwrap();
        assert_eq!(d.format, TelegramFormat::FlaggedFixed);
        assert_eq!(d.flag, Some(ScaleFlag::Gross));
        assert!(approx(d.weight, 12.345));
    }

    #[test]
    fn flagged_fixed_without_space() {
        let d = TelegramDecoder::default().decode("T00250").unwrap();
        assert_eq!(d.flag, Some(ScaleFlag::Tare));
        assert!(approx(d.weight, 0.25));
    }

    #[test]
    fn flagged_fixed_other_letters() {
        let d = TelegramDecoder::default().decode("B 00001").unwrap();
        assert_eq!(d.flag, Some(ScaleFlag::Other('B')));
    }

    #[test]
    fn flagged_fixed_wrong_width_falls_through() {
        // Four digits is not a flagged telegram, but the generic rule picks it up.
        let d = TelegramDecoder::default().decode("N 1234").unwrap();
        assert_eq!(d.format, TelegramFormat::GenericDecimal);
        assert!(approx(d.weight, 1234.0));
        assert_eq!(d.flag, None);
    }

    #[test]
    fn bare_fixed_grams() {
        let d = TelegramDecoder::default().decode("12345").unwrap();
        assert_eq!(d.format, TelegramFormat::BareFixed);
        assert!(approx(d.weight, 12.345));
    }

    #[test]
    fn bare_fixed_scaled() {
        let dec = TelegramDecoder::new(DecoderConfig {
            bare_digits: BareDigits::Scaled,
            ..DecoderConfig::default()
        });
        let d = dec.decode("12345").unwrap();
        assert_eq!(d.format, TelegramFormat::BareFixed);
        assert!(approx(d.weight, 12345.0));
    }

    #[test]
    fn prefixed_fixed_ignores_scale_factor() {
        for scale_factor in [0.001, 1.0, 0.1] {
            let dec = TelegramDecoder::new(DecoderConfig {
                scale_factor,
                ..DecoderConfig::default()
            });
            let d = dec.decode("D025500").unwrap();
            assert_eq!(d.format, TelegramFormat::PrefixedFixed);
            assert!(approx(d.weight, 25.5));
        }
    }

    #[test]
    fn generic_decimal_comma() {
        let d = TelegramDecoder::default().decode("+12,7").unwrap();
        assert_eq!(d.format, TelegramFormat::GenericDecimal);
        assert!(approx(d.weight, 12.7));
    }

    #[test]
    fn generic_decimal_inside_text() {
        let dec = TelegramDecoder::default();
        assert!(approx(dec.decode("ST,GS,  -0.455kg").unwrap().weight, -0.455));
        assert!(approx(dec.decode("WT: 3.5 kg").unwrap().weight, 3.5));
    }

    #[test]
    fn generic_decimal_limits() {
        // Seven integer digits: only the first six are taken.
        assert_eq!(generic_decimal("1234567"), Some(123456.0));
        // Four fractional digits: only the first three are taken.
        assert_eq!(generic_decimal("1.2345"), Some(1.234));
        // Separator without digits is not part of the match.
        assert_eq!(generic_decimal("7. kg"), Some(7.0));
        // Lone sign is skipped.
        assert_eq!(generic_decimal("- 5"), Some(5.0));
    }

    #[test]
    fn no_match() {
        let dec = TelegramDecoder::default();
        assert_eq!(dec.decode("hello"), None);
        assert_eq!(dec.decode(""), None);
        assert_eq!(dec.decode("   "), None);
        assert_eq!(dec.decode("+-"), None);
    }

    #[test]
    fn no_match_under_every_single_rule() {
        for rule in DecoderConfig::default().rules {
            let dec = TelegramDecoder::new(DecoderConfig {
                rules: vec![rule],
                ..DecoderConfig::default()
            });
            assert_eq!(dec.decode("hello"), None, "{rule}");
        }
    }

    #[test]
    fn non_finite_scale_is_no_match() {
        let dec = TelegramDecoder::new(DecoderConfig {
            scale_factor: f64::INFINITY,
            rules: vec![TelegramFormat::FlaggedFixed],
            ..DecoderConfig::default()
        });
        assert_eq!(dec.decode("P 12345"), None);
    }

    #[test]
    fn rule_order_is_respected() {
        let dec = TelegramDecoder::new(DecoderConfig {
            rules: vec![TelegramFormat::GenericDecimal, TelegramFormat::BareFixed],
            ..DecoderConfig::default()
        });
        let d = dec.decode("12345").unwrap();
        assert_eq!(d.format, TelegramFormat::GenericDecimal);
        assert!(approx(d.weight, 12345.0));
    }

    #[test]
    fn telegram_trims_and_tags() {
        let dec = TelegramDecoder::default();
        let t = dec.telegram("  N 00120\r");
        assert_eq!(t.raw_line, "N 00120");
        assert_eq!(t.flag, Some(ScaleFlag::Net));
        assert_eq!(t.format, Some(TelegramFormat::FlaggedFixed));
        assert!(approx(t.weight.unwrap(), 0.12));

        let t = dec.telegram("noise");
        assert!(!t.is_decoded());
        assert_eq!(t.format, None);
    }

    #[test]
    fn stx_wrapped_telegram_keeps_its_rule() {
        let dec = TelegramDecoder::default();
        let d = dec.decode("\u{2}P 12345").unwrap();
        assert_eq!(d.format, TelegramFormat::FlaggedFixed);
        assert_eq!(d.flag, Some(ScaleFlag::Gross));
        assert!(approx(d.weight, 12.345));

        let t = dec.telegram("\u{2}D025500\u{3}");
        assert_eq!(t.raw_line, "D025500");
        assert_eq!(t.format, Some(TelegramFormat::PrefixedFixed));
    }
}
