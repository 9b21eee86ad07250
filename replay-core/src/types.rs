//! Primitive value types shared by the session model and the wire formats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ControlError;

/// A position in a source's frame buffer, counted in frames.
///
/// Valid positions are non-negative; the wire format is a bare integer.
pub type Timecode = i64;

/// Exact playback-speed (or frame-rate) fraction.
///
/// Kept unreduced so that table entries such as `3/8` compare exactly with
/// what the controller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: u32,
    pub denominator: u32,
}

impl Rational {
    /// Build a fraction without validation; for constant tables.
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Rational {
            numerator,
            denominator,
        }
    }

    /// Build a fraction, rejecting a zero denominator.
    pub fn checked(numerator: u32, denominator: u32) -> Result<Self, ControlError> {
        if denominator == 0 {
            return Err(ControlError::InvalidSpeed(numerator, denominator));
        }
        Ok(Rational::new(numerator, denominator))
    }

    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Rational::new(1, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for Rational {
    type Err = String;

    /// Accepts `N/D` or a bare integer `N` (meaning `N/1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (n, d) = match s.split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s.trim(), "1"),
        };
        let n: u32 = n.parse().map_err(|_| format!("Invalid numerator in '{}'", s))?;
        let d: u32 = d
            .parse()
            .map_err(|_| format!("Invalid denominator in '{}'", s))?;
        Rational::checked(n, d).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rational() {
        assert_eq!("30000/1001".parse::<Rational>(), Ok(Rational::new(30000, 1001)));
        assert_eq!("25".parse::<Rational>(), Ok(Rational::new(25, 1)));
        assert!("1/0".parse::<Rational>().is_err());
        assert!("fast".parse::<Rational>().is_err());
    }

    #[test]
    fn test_checked_rejects_zero_denominator() {
        assert_eq!(
            Rational::checked(3, 0),
            Err(ControlError::InvalidSpeed(3, 0))
        );
        assert_eq!(Rational::checked(3, 4).unwrap().as_f64(), 0.75);
    }

    #[test]
    fn test_display() {
        assert_eq!(Rational::new(5, 4).to_string(), "5/4");
        assert_eq!(Rational::default(), Rational::new(1, 1));
    }
}
