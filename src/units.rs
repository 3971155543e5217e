//! Physical units attached to array values and coordinate axes.
//!
//! A [`Unit`] is a scale factor times a product of base symbols raised to
//! (possibly fractional) powers. Strings such as `"1e-20 erg/s/cm2/Angstrom"`,
//! `"10**(-20)*erg/s/cm**2/Angstrom"`, `"nm"` or `"ct"` are accepted. Known
//! symbols are reduced to a small set of bases (kg, m, s, deg) so that units
//! with the same dimensions compare and convert; unknown symbols become their
//! own base.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors from unit parsing and conversion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    /// The string could not be parsed.
    #[error("cannot parse unit '{input}': {message}")]
    Parse {
        /// Input string
        input: String,
        /// What went wrong
        message: String,
    },

    /// The two units have different dimensions.
    #[error("units '{from}' and '{to}' are not convertible")]
    Incompatible {
        /// Source unit
        from: String,
        /// Target unit
        to: String,
    },
}

const EXPONENT_EPS: f64 = 1e-12;

/// A physical unit: scale × Π base^exponent.
#[derive(Debug, Clone)]
pub struct Unit {
    label: String,
    scale: f64,
    dims: BTreeMap<String, f64>,
}

/// Reduce a known symbol to (scale, [(base, exponent)]).
fn lookup_symbol(symbol: &str) -> Option<(f64, &'static [(&'static str, f64)])> {
    const LENGTH: &[(&str, f64)] = &[("m", 1.0)];
    const MASS: &[(&str, f64)] = &[("kg", 1.0)];
    const TIME: &[(&str, f64)] = &[("s", 1.0)];
    const ANGLE: &[(&str, f64)] = &[("deg", 1.0)];
    const ENERGY: &[(&str, f64)] = &[("kg", 1.0), ("m", 2.0), ("s", -2.0)];
    const POWER: &[(&str, f64)] = &[("kg", 1.0), ("m", 2.0), ("s", -3.0)];
    const FREQUENCY: &[(&str, f64)] = &[("s", -1.0)];
    const SPECTRAL_FLUX: &[(&str, f64)] = &[("kg", 1.0), ("s", -2.0)];
    const COUNT: &[(&str, f64)] = &[("ct", 1.0)];
    const PIXEL: &[(&str, f64)] = &[("pix", 1.0)];
    const ELECTRON: &[(&str, f64)] = &[("electron", 1.0)];
    const ADU: &[(&str, f64)] = &[("adu", 1.0)];

    let entry = match symbol {
        "m" => (1.0, LENGTH),
        "cm" => (1e-2, LENGTH),
        "mm" => (1e-3, LENGTH),
        "um" | "micron" => (1e-6, LENGTH),
        "nm" => (1e-9, LENGTH),
        "Angstrom" | "angstrom" | "AA" => (1e-10, LENGTH),
        "km" => (1e3, LENGTH),
        "kg" => (1.0, MASS),
        "g" => (1e-3, MASS),
        "s" => (1.0, TIME),
        "ms" => (1e-3, TIME),
        "min" => (60.0, TIME),
        "h" => (3600.0, TIME),
        "deg" => (1.0, ANGLE),
        "arcmin" => (1.0 / 60.0, ANGLE),
        "arcsec" => (1.0 / 3600.0, ANGLE),
        "mas" => (1.0 / 3.6e6, ANGLE),
        "rad" => (180.0 / std::f64::consts::PI, ANGLE),
        "J" => (1.0, ENERGY),
        "erg" => (1e-7, ENERGY),
        "W" => (1.0, POWER),
        "Hz" => (1.0, FREQUENCY),
        "Jy" => (1e-26, SPECTRAL_FLUX),
        "ct" | "count" | "counts" => (1.0, COUNT),
        "pix" | "pixel" => (1.0, PIXEL),
        "electron" | "e-" => (1.0, ELECTRON),
        "adu" | "ADU" => (1.0, ADU),
        _ => return None,
    };
    Some(entry)
}

impl Unit {
    /// The dimensionless unit with scale 1.
    pub fn dimensionless() -> Self {
        Self {
            label: String::new(),
            scale: 1.0,
            dims: BTreeMap::new(),
        }
    }

    /// Parse a unit string.
    pub fn parse(input: &str) -> Result<Self, UnitError> {
        let trimmed = input.trim();
        let mut unit = Self::dimensionless();
        if trimmed.is_empty() {
            return Ok(unit);
        }

        let normalized = trimmed.replace("**", "^");
        for (segment_index, segment) in normalized.split('/').enumerate() {
            let sign = if segment_index == 0 { 1.0 } else { -1.0 };
            let mut empty = true;
            for factor in segment
                .split(|c: char| c.is_whitespace() || c == '*')
                .filter(|f| !f.is_empty())
            {
                empty = false;
                unit.apply_factor(factor, sign)
                    .map_err(|message| UnitError::Parse {
                        input: input.to_string(),
                        message,
                    })?;
            }
            if empty {
                return Err(UnitError::Parse {
                    input: input.to_string(),
                    message: "empty factor".to_string(),
                });
            }
        }

        unit.label = trimmed.to_string();
        Ok(unit)
    }

    fn apply_factor(&mut self, factor: &str, sign: f64) -> Result<(), String> {
        let starts_numeric = factor
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == '+' || c == '-' || c == '(');
        if starts_numeric {
            let value = parse_number(factor)?;
            self.scale *= value.powf(sign);
            return Ok(());
        }

        let split = factor
            .find(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
            .unwrap_or(factor.len());
        let (symbol, exponent_text) = factor.split_at(split);
        // "e-" is a complete symbol, so the trailing sign must not be read as an exponent
        let (symbol, exponent_text) = if symbol == "e" && exponent_text == "-" {
            ("e-", "")
        } else {
            (symbol, exponent_text)
        };
        if symbol.is_empty() {
            return Err(format!("unexpected factor '{}'", factor));
        }
        let exponent = if exponent_text.is_empty() {
            1.0
        } else {
            let text = exponent_text.trim_start_matches('^');
            parse_number(text)?
        } * sign;

        match lookup_symbol(symbol) {
            Some((scale, bases)) => {
                self.scale *= scale.powf(exponent);
                for (base, power) in bases {
                    self.add_dim(base, power * exponent);
                }
            }
            None => {
                log::debug!("Unknown unit symbol '{}' treated as a base unit", symbol);
                self.add_dim(symbol, exponent);
            }
        }
        Ok(())
    }

    fn add_dim(&mut self, base: &str, exponent: f64) {
        let entry = self.dims.entry(base.to_string()).or_insert(0.0);
        *entry += exponent;
        if entry.abs() < EXPONENT_EPS {
            self.dims.remove(base);
        }
    }

    /// Scale factor relative to the canonical bases.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// True when the unit has no dimensions (it may still carry a scale).
    pub fn is_dimensionless(&self) -> bool {
        self.dims.is_empty()
    }

    /// True when both units have the same dimensions.
    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dims.len() == other.dims.len()
            && self
                .dims
                .iter()
                .all(|(k, v)| other.dims.get(k).is_some_and(|w| (v - w).abs() < EXPONENT_EPS))
    }

    /// Factor to multiply a value in `self` by to express it in `to`.
    pub fn conversion_factor(&self, to: &Unit) -> Result<f64, UnitError> {
        if !self.is_compatible(to) {
            return Err(UnitError::Incompatible {
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        Ok(self.scale / to.scale)
    }

    /// True when both units are equivalent (same dimensions, same scale).
    pub fn is_equivalent(&self, other: &Unit) -> bool {
        self.is_compatible(other) && relative_eq(self.scale, other.scale)
    }

    /// Product of two units.
    pub fn multiply(&self, other: &Unit) -> Unit {
        let mut result = self.clone();
        result.scale *= other.scale;
        for (base, exponent) in &other.dims {
            result.add_dim(base, *exponent);
        }
        result.label = join_label(&self.label, " ", &other.label);
        result
    }

    /// Quotient of two units.
    pub fn divide(&self, other: &Unit) -> Unit {
        let mut result = self.clone();
        result.scale /= other.scale;
        for (base, exponent) in &other.dims {
            result.add_dim(base, -exponent);
        }
        result.label = if other.label.is_empty() {
            self.label.clone()
        } else if self.label.is_empty() {
            format!("1/({})", other.label)
        } else {
            format!("{}/({})", self.label, other.label)
        };
        result
    }

    /// Unit raised to a power.
    pub fn powf(&self, exponent: f64) -> Unit {
        let mut result = Self::dimensionless();
        result.scale = self.scale.powf(exponent);
        for (base, power) in &self.dims {
            result.add_dim(base, power * exponent);
        }
        result.label = if self.label.is_empty() {
            String::new()
        } else {
            format!("({})^{}", self.label, exponent)
        };
        result
    }

    /// Square root of the unit.
    pub fn sqrt(&self) -> Unit {
        self.powf(0.5)
    }
}

fn join_label(a: &str, sep: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{}{}{}", a, sep, b),
    }
}

fn relative_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs())
}

/// Parse a number, accepting `10^-20`, `10^(-20)` and `(1e-20)` forms.
fn parse_number(text: &str) -> Result<f64, String> {
    let strip = |s: &str| s.trim().trim_start_matches('(').trim_end_matches(')').to_string();
    if let Some((base, exponent)) = text.split_once('^') {
        let base: f64 = strip(base)
            .parse()
            .map_err(|_| format!("invalid number '{}'", base))?;
        let exponent: f64 = strip(exponent)
            .parse()
            .map_err(|_| format!("invalid exponent '{}'", exponent))?;
        return Ok(base.powf(exponent));
    }
    strip(text)
        .parse()
        .map_err(|_| format!("invalid number '{}'", text))
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.is_equivalent(other)
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::parse(s)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.label.is_empty() || self.dims.is_empty() {
            return write!(f, "{}", self.label);
        }
        if self.scale != 1.0 {
            write!(f, "{} ", self.scale)?;
        }
        let parts: Vec<String> = self
            .dims
            .iter()
            .map(|(base, exp)| {
                if (exp - 1.0).abs() < EXPONENT_EPS {
                    base.clone()
                } else {
                    format!("{}{}", base, exp)
                }
            })
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
    }

    #[test]
    fn test_parse_flux_unit() {
        let unit = Unit::parse("1e-20 erg/s/cm2/Angstrom").unwrap();
        // erg/s/cm2/Angstrom = 1e-7 kg m2 s-3 / (1e-4 m2) / (1e-10 m)
        assert!(close(unit.scale(), 1e-20 * 1e-7 / 1e-4 / 1e-10));
        assert!(!unit.is_dimensionless());
        assert_eq!(unit.to_string(), "1e-20 erg/s/cm2/Angstrom");
    }

    #[test]
    fn test_power_notation_equivalent() {
        let a = Unit::parse("10**(-20)*erg/s/cm**2/Angstrom").unwrap();
        let b = Unit::parse("1e-20 erg/s/cm2/Angstrom").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wavelength_conversion() {
        let nm = Unit::parse("nm").unwrap();
        let angstrom = Unit::parse("Angstrom").unwrap();
        assert!(close(nm.conversion_factor(&angstrom).unwrap(), 10.0));
        assert!(close(angstrom.conversion_factor(&nm).unwrap(), 0.1));
    }

    #[test]
    fn test_scaled_counts() {
        let two = Unit::parse("2 ct").unwrap();
        let one = Unit::parse("ct").unwrap();
        assert!(close(two.conversion_factor(&one).unwrap(), 2.0));
    }

    #[test]
    fn test_incompatible_units() {
        let err = Unit::parse("ct")
            .unwrap()
            .conversion_factor(&Unit::parse("nm").unwrap())
            .unwrap_err();
        assert!(matches!(err, UnitError::Incompatible { .. }));
    }

    #[test]
    fn test_algebra() {
        let ct = Unit::parse("ct").unwrap();
        let squared = ct.multiply(&ct);
        assert!(squared.sqrt().is_equivalent(&ct));
        assert!(squared.divide(&ct).is_equivalent(&ct));
        assert!(ct.divide(&ct).is_dimensionless());
        assert!(ct.powf(2.0).is_equivalent(&squared));
    }

    #[test]
    fn test_angles() {
        let arcsec = Unit::parse("arcsec").unwrap();
        let deg = Unit::parse("deg").unwrap();
        assert!(close(arcsec.conversion_factor(&deg).unwrap(), 1.0 / 3600.0));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Unit::parse("erg//s").is_err());
        assert!(Unit::parse("m^x").is_err());
        assert!(Unit::parse("").unwrap().is_dimensionless());
    }
}
