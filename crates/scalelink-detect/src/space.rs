//! The ordered space of candidate link configurations.
//!
//! Order matters: when a link produces plausible garbage under more than
//! one configuration, the first one enumerated wins. Baud rates are the
//! outer loop, framings the middle, delimiters the inner.

use scalelink_core::error::{Error, Result};
use scalelink_core::types::{DataBits, Delimiter, Framing, LinkConfig, Parity, StopBits};

/// Baud rates, most common on deployed indicators first.
pub const DEFAULT_BAUD_RATES: [u32; 8] = [9600, 4800, 2400, 19200, 1200, 38400, 57600, 115200];

/// Framing presets, most common first.
pub const DEFAULT_FRAMINGS: [Framing; 6] = [
    Framing::new(DataBits::Eight, Parity::None, StopBits::One),
    Framing::new(DataBits::Seven, Parity::Even, StopBits::One),
    Framing::new(DataBits::Seven, Parity::Odd, StopBits::One),
    Framing::new(DataBits::Eight, Parity::Even, StopBits::One),
    Framing::new(DataBits::Eight, Parity::None, StopBits::Two),
    Framing::new(DataBits::Seven, Parity::None, StopBits::Two),
];

/// Finite, restartable enumeration of [`LinkConfig`] candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpace {
    baud_rates: Vec<u32>,
    framings: Vec<Framing>,
    delimiters: Vec<Delimiter>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        ParameterSpace {
            baud_rates: DEFAULT_BAUD_RATES.to_vec(),
            framings: DEFAULT_FRAMINGS.to_vec(),
            delimiters: Delimiter::ALL.to_vec(),
        }
    }
}

impl ParameterSpace {
    /// Start from the default lists and narrow or reorder them.
    pub fn builder() -> ParameterSpaceBuilder {
        ParameterSpaceBuilder {
            space: ParameterSpace::default(),
        }
    }

    /// Every candidate, in order. Each call starts from the beginning.
    pub fn iter(&self) -> impl Iterator<Item = LinkConfig> + '_ {
        // Baud rates are non-zero here; the builder rejects zero.
        self.baud_rates.iter().flat_map(move |&baud| {
            self.framings.iter().flat_map(move |&framing| {
                self.delimiters
                    .iter()
                    .filter_map(move |&delim| LinkConfig::new(baud, framing, delim).ok())
            })
        })
    }

    pub fn len(&self) -> usize {
        self.baud_rates.len() * self.framings.len() * self.delimiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn baud_rates(&self) -> &[u32] {
        &self.baud_rates
    }

    pub fn framings(&self) -> &[Framing] {
        &self.framings
    }

    pub fn delimiters(&self) -> &[Delimiter] {
        &self.delimiters
    }
}

/// Builder for a custom [`ParameterSpace`].
#[derive(Debug, Clone)]
pub struct ParameterSpaceBuilder {
    space: ParameterSpace,
}

fn dedup<T: PartialEq + Copy>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

impl ParameterSpaceBuilder {
    pub fn baud_rates(mut self, rates: impl IntoIterator<Item = u32>) -> Self {
        self.space.baud_rates = dedup(rates);
        self
    }

    pub fn framings(mut self, framings: impl IntoIterator<Item = Framing>) -> Self {
        self.space.framings = dedup(framings);
        self
    }

    pub fn delimiters(mut self, delimiters: impl IntoIterator<Item = Delimiter>) -> Self {
        self.space.delimiters = dedup(delimiters);
        self
    }

    /// Validate and build. Every list must be non-empty and baud rates
    /// must be positive.
    pub fn build(self) -> Result<ParameterSpace> {
        let s = &self.space;
        if s.baud_rates.is_empty() || s.framings.is_empty() || s.delimiters.is_empty() {
            return Err(Error::InvalidParameter(
                "parameter space lists must not be empty".into(),
            ));
        }
        if s.baud_rates.contains(&0) {
            return Err(Error::InvalidParameter("baud rate must be positive".into()));
        }
        Ok(self.space)
    }
}

impl<'a> IntoIterator for &'a ParameterSpace {
    type Item = LinkConfig;
    type IntoIter = Box<dyn Iterator<Item = LinkConfig> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_space_size_and_order() {
        let space = ParameterSpace::default();
        assert_eq!(space.len(), 8 * 6 * 4);
        let all: Vec<LinkConfig> = space.iter().collect();
        assert_eq!(all.len(), space.len());
        assert_eq!(all[0].label(), "9600 8N1 CRLF");
        assert_eq!(all[1].label(), "9600 8N1 LF");
        assert_eq!(all[4].label(), "9600 7E1 CRLF");
        assert_eq!(all[24].label(), "4800 8N1 CRLF");
        assert_eq!(all.last().unwrap().label(), "115200 7N2 ETX");
    }

    #[test]
    fn iteration_is_restartable() {
        let space = ParameterSpace::default();
        let a: Vec<_> = space.iter().take(10).collect();
        let b: Vec<_> = (&space).into_iter().take(10).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn every_config_is_unique() {
        let space = ParameterSpace::default();
        let all: Vec<_> = space.iter().collect();
        for (i, c) in all.iter().enumerate() {
            assert!(!all[i + 1..].contains(c), "duplicate {c}");
        }
    }

    #[test]
    fn builder_narrows_and_dedups() {
        let space = ParameterSpace::builder()
            .baud_rates([2400, 9600, 2400])
            .framings([Framing::EIGHT_N_ONE])
            .delimiters([Delimiter::Cr])
            .build()
            .unwrap();
        let labels: Vec<String> = space.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["2400 8N1 CR", "9600 8N1 CR"]);
    }

    #[test]
    fn builder_rejects_empty_and_zero() {
        assert!(ParameterSpace::builder().baud_rates([]).build().is_err());
        assert!(ParameterSpace::builder().delimiters([]).build().is_err());
        assert!(ParameterSpace::builder().baud_rates([0]).build().is_err());
    }
}
