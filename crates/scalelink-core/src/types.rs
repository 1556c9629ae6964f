//! Core types used throughout scalelink.
//!
//! These describe a serial link candidate ([`LinkConfig`] and its parts),
//! the identity of a physical channel ([`ChannelId`]), and a framed line
//! from a scale indicator ([`Telegram`]).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataBits {
    Seven,
    Eight,
}

impl DataBits {
    /// Numeric bit count.
    pub fn bits(&self) -> u8 {
        match self {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    /// Conventional single-letter code (`N`, `E`, `O`).
    pub fn letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    /// Numeric stop bit count.
    pub fn bits(&self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Character framing: data bits, parity and stop bits.
///
/// Displays in the usual shorthand, e.g. `8N1` or `7E1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framing {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Framing {
    /// 8 data bits, no parity, 1 stop bit.
    pub const EIGHT_N_ONE: Framing = Framing::new(DataBits::Eight, Parity::None, StopBits::One);

    pub const fn new(data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        Framing {
            data_bits,
            parity,
            stop_bits,
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.data_bits.bits(),
            self.parity.letter(),
            self.stop_bits.bits()
        )
    }
}

/// Error returned when a string cannot be parsed into a link parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLinkError(String);

impl fmt::Display for ParseLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised link parameter: {}", self.0)
    }
}

impl std::error::Error for ParseLinkError {}

impl FromStr for Framing {
    type Err = ParseLinkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bytes = upper.as_bytes();
        if bytes.len() != 3 {
            return Err(ParseLinkError(s.to_string()));
        }
        let data_bits = match bytes[0] {
            b'7' => DataBits::Seven,
            b'8' => DataBits::Eight,
            _ => return Err(ParseLinkError(s.to_string())),
        };
        let parity = match bytes[1] {
            b'N' => Parity::None,
            b'E' => Parity::Even,
            b'O' => Parity::Odd,
            _ => return Err(ParseLinkError(s.to_string())),
        };
        let stop_bits = match bytes[2] {
            b'1' => StopBits::One,
            b'2' => StopBits::Two,
            _ => return Err(ParseLinkError(s.to_string())),
        };
        Ok(Framing::new(data_bits, parity, stop_bits))
    }
}

/// Line terminator used to split the text stream into telegrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delimiter {
    /// `\r\n`
    CrLf,
    /// `\n`
    Lf,
    /// `\r`
    Cr,
    /// ASCII ETX (0x03), used by indicators that wrap telegrams in STX/ETX.
    Etx,
}

impl Delimiter {
    /// All supported delimiters, in probing order.
    pub const ALL: [Delimiter; 4] = [Delimiter::CrLf, Delimiter::Lf, Delimiter::Cr, Delimiter::Etx];

    /// The terminator as text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Delimiter::CrLf => "\r\n",
            Delimiter::Lf => "\n",
            Delimiter::Cr => "\r",
            Delimiter::Etx => "\u{3}",
        }
    }

    /// The terminator as raw bytes.
    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Short printable name used in configuration labels.
    pub fn name(&self) -> &'static str {
        match self {
            Delimiter::CrLf => "CRLF",
            Delimiter::Lf => "LF",
            Delimiter::Cr => "CR",
            Delimiter::Etx => "ETX",
        }
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Delimiter {
    type Err = ParseLinkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRLF" => Ok(Delimiter::CrLf),
            "LF" => Ok(Delimiter::Lf),
            "CR" => Ok(Delimiter::Cr),
            "ETX" => Ok(Delimiter::Etx),
            _ => Err(ParseLinkError(s.to_string())),
        }
    }
}

/// One candidate combination of serial link parameters.
///
/// Immutable once built: fields are only readable through accessors.
/// The default is 9600 8N1 CRLF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkConfig {
    baud_rate: u32,
    framing: Framing,
    delimiter: Delimiter,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            baud_rate: 9600,
            framing: Framing::EIGHT_N_ONE,
            delimiter: Delimiter::CrLf,
        }
    }
}

impl LinkConfig {
    /// Build a configuration. Fails with [`Error::InvalidParameter`] when
    /// the baud rate is zero.
    pub fn new(baud_rate: u32, framing: Framing, delimiter: Delimiter) -> Result<Self> {
        if baud_rate == 0 {
            return Err(Error::InvalidParameter("baud rate must be positive".into()));
        }
        Ok(LinkConfig {
            baud_rate,
            framing,
            delimiter,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn data_bits(&self) -> DataBits {
        self.framing.data_bits
    }

    pub fn parity(&self) -> Parity {
        self.framing.parity
    }

    pub fn stop_bits(&self) -> StopBits {
        self.framing.stop_bits
    }

    pub fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    /// Human-readable label, e.g. `9600 8N1 CRLF`.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.baud_rate, self.framing, self.delimiter)
    }
}

/// Identity of a physical channel, typically the serial port path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        ChannelId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        ChannelId(s.to_string())
    }
}

/// Which telegram rule decoded a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelegramFormat {
    /// Status letter, optional space, fixed-width digits (`P 12345`).
    FlaggedFixed,
    /// Fixed-width digits with no flag (`12345`).
    BareFixed,
    /// Marker letter followed by fixed-width gram digits (`D025500`).
    PrefixedFixed,
    /// First signed decimal number anywhere in the line (`+12,7 kg`).
    GenericDecimal,
}

impl fmt::Display for TelegramFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TelegramFormat::FlaggedFixed => "flagged-fixed",
            TelegramFormat::BareFixed => "bare-fixed",
            TelegramFormat::PrefixedFixed => "prefixed-fixed",
            TelegramFormat::GenericDecimal => "generic-decimal",
        };
        f.write_str(s)
    }
}

/// Status marker carried by flagged telegrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleFlag {
    /// `P`: gross weight.
    Gross,
    /// `N`: net weight.
    Net,
    /// `T`: tare weight.
    Tare,
    /// Any other configured flag letter (`B`, `R`, ...), kept verbatim.
    Other(char),
}

impl ScaleFlag {
    pub fn from_letter(letter: char) -> Self {
        match letter.to_ascii_uppercase() {
            'P' => ScaleFlag::Gross,
            'N' => ScaleFlag::Net,
            'T' => ScaleFlag::Tare,
            other => ScaleFlag::Other(other),
        }
    }

    pub fn letter(&self) -> char {
        match self {
            ScaleFlag::Gross => 'P',
            ScaleFlag::Net => 'N',
            ScaleFlag::Tare => 'T',
            ScaleFlag::Other(c) => *c,
        }
    }
}

/// One framed, trimmed line from the indicator and what it decoded to.
#[derive(Debug, Clone, PartialEq)]
pub struct Telegram {
    /// The line after delimiter stripping and whitespace trimming.
    pub raw_line: String,
    /// Normalized weight, if any rule matched.
    pub weight: Option<f64>,
    /// The rule that matched.
    pub format: Option<TelegramFormat>,
    /// Status marker, for flagged telegrams.
    pub flag: Option<ScaleFlag>,
}

impl Telegram {
    /// A line that no rule could decode.
    pub fn ignored(raw_line: impl Into<String>) -> Self {
        Telegram {
            raw_line: raw_line.into(),
            weight: None,
            format: None,
            flag: None,
        }
    }

    pub fn is_decoded(&self) -> bool {
        self.weight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_display() {
        assert_eq!(Framing::EIGHT_N_ONE.to_string(), "8N1");
        let f = Framing::new(DataBits::Seven, Parity::Even, StopBits::Two);
        assert_eq!(f.to_string(), "7E2");
    }

    #[test]
    fn framing_from_str() {
        assert_eq!("8n1".parse::<Framing>().unwrap(), Framing::EIGHT_N_ONE);
        assert_eq!(
            "7O1".parse::<Framing>().unwrap(),
            Framing::new(DataBits::Seven, Parity::Odd, StopBits::One)
        );
        assert!("9N1".parse::<Framing>().is_err());
        assert!("8X1".parse::<Framing>().is_err());
        assert!("8N".parse::<Framing>().is_err());
    }

    #[test]
    fn delimiter_round_trip_names() {
        for d in Delimiter::ALL {
            assert_eq!(d.name().parse::<Delimiter>().unwrap(), d);
        }
        assert!("TAB".parse::<Delimiter>().is_err());
    }

    #[test]
    fn delimiter_bytes() {
        assert_eq!(Delimiter::CrLf.as_bytes(), b"\r\n");
        assert_eq!(Delimiter::Etx.as_bytes(), &[0x03]);
    }

    #[test]
    fn link_config_label() {
        let c = LinkConfig::new(
            4800,
            Framing::new(DataBits::Seven, Parity::Even, StopBits::One),
            Delimiter::Cr,
        )
        .unwrap();
        assert_eq!(c.label(), "4800 7E1 CR");
        assert_eq!(c.baud_rate(), 4800);
        assert_eq!(c.parity(), Parity::Even);
        assert_eq!(c.delimiter(), Delimiter::Cr);
    }

    #[test]
    fn link_config_rejects_zero_baud() {
        let err = LinkConfig::new(0, Framing::EIGHT_N_ONE, Delimiter::Lf).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert_eq!(LinkConfig::default().label(), "9600 8N1 CRLF");
    }

    #[test]
    fn scale_flag_letters() {
        assert_eq!(ScaleFlag::from_letter('P'), ScaleFlag::Gross);
        assert_eq!(ScaleFlag::from_letter('n'), ScaleFlag::Net);
        assert_eq!(ScaleFlag::from_letter('B'), ScaleFlag::Other('B'));
        assert_eq!(ScaleFlag::Other('R').letter(), 'R');
    }

    #[test]
    fn telegram_ignored() {
        let t = Telegram::ignored("hello");
        assert!(!t.is_decoded());
        assert_eq!(t.raw_line, "hello");
    }

    #[test]
    fn channel_id_display() {
        let id = ChannelId::from("/dev/ttyUSB0");
        assert_eq!(id.to_string(), "/dev/ttyUSB0");
    }
}
