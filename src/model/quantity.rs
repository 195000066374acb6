/// Quantity arithmetic with unit maps
///
/// A `Quantity` is a real value tagged with a map from unit symbol to a real
/// exponent. All DSL arithmetic goes through this type so dimensional
/// consistency is checked on every intermediate value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Exponents within this tolerance of zero are treated as absent; unit maps
/// compare equal when every exponent matches within it.
pub const UNIT_EPSILON: f64 = 1e-12;

/// Map from unit symbol to exponent, kept sorted by symbol with near-zero
/// entries normalized away.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitMap {
    entries: Vec<(String, f64)>,
}

impl UnitMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build from (symbol, exponent) pairs; merges duplicates and drops
    /// near-zero exponents.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for (symbol, exponent) in pairs {
            map.push(symbol.into(), exponent);
        }
        map
    }

    /// Single-symbol unit, e.g. `UnitMap::base("tick")`.
    pub fn base(symbol: &str) -> Self {
        Self::from_pairs([(symbol, 1.0)])
    }

    /// Add `exponent` to the entry for `symbol`, normalizing afterwards.
    pub fn push(&mut self, symbol: String, exponent: f64) {
        match self.entries.binary_search_by(|(s, _)| s.as_str().cmp(symbol.as_str())) {
            Ok(idx) => {
                self.entries[idx].1 += exponent;
                if self.entries[idx].1.abs() <= UNIT_EPSILON {
                    self.entries.remove(idx);
                }
            }
            Err(idx) => {
                if exponent.abs() > UNIT_EPSILON {
                    self.entries.insert(idx, (symbol, exponent));
                }
            }
        }
    }

    pub fn exponent(&self, symbol: &str) -> f64 {
        self.entries
            .binary_search_by(|(s, _)| s.as_str().cmp(symbol))
            .map(|idx| self.entries[idx].1)
            .unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(s, e)| (s.as_str(), *e))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exponent-wise sum (unit product).
    pub fn multiply(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (symbol, exponent) in other.iter() {
            out.push(symbol.to_string(), exponent);
        }
        out
    }

    /// Exponent-wise difference (unit quotient).
    pub fn divide(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (symbol, exponent) in other.iter() {
            out.push(symbol.to_string(), -exponent);
        }
        out
    }

    /// Every exponent scaled by `power`.
    pub fn raise(&self, power: f64) -> Self {
        Self::from_pairs(self.iter().map(|(s, e)| (s.to_string(), e * power)))
    }

    pub fn inverse(&self) -> Self {
        self.raise(-1.0)
    }
}

impl PartialEq for UnitMap {
    fn eq(&self, other: &Self) -> bool {
        // Both sides are normalized, so symbol sets must line up exactly.
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((a, ea), (b, eb))| a == b && (ea - eb).abs() <= UNIT_EPSILON)
    }
}

impl Eq for UnitMap {}

impl fmt::Display for UnitMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "1");
        }

        let fmt_part = |symbol: &str, exp: f64| {
            if (exp - 1.0).abs() <= UNIT_EPSILON {
                symbol.to_string()
            } else if (exp - exp.round()).abs() <= UNIT_EPSILON {
                format!("{}^{}", symbol, exp.round() as i64)
            } else {
                format!("{}^{}", symbol, exp)
            }
        };

        let numerator: Vec<String> = self
            .iter()
            .filter(|(_, e)| *e > 0.0)
            .map(|(s, e)| fmt_part(s, e))
            .collect();
        let denominator: Vec<String> = self
            .iter()
            .filter(|(_, e)| *e < 0.0)
            .map(|(s, e)| fmt_part(s, -e))
            .collect();

        let top = if numerator.is_empty() { "1".to_string() } else { numerator.join("*") };
        if denominator.is_empty() {
            write!(f, "{}", top)
        } else {
            write!(f, "{}/{}", top, denominator.join("*"))
        }
    }
}

/// Failures of quantity arithmetic, mapped to evaluation errors at the
/// evaluator boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantityError {
    UnitMismatch { left: String, right: String },
    NonIntegerExponent { exponent: f64 },
    DimensionedExponent { units: String },
}

impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantityError::UnitMismatch { left, right } => {
                write!(f, "unit mismatch: {} vs {}", left, right)
            }
            QuantityError::NonIntegerExponent { exponent } => {
                write!(f, "non-integer exponent {} on a dimensioned base", exponent)
            }
            QuantityError::DimensionedExponent { units } => {
                write!(f, "exponent must be dimensionless, got {}", units)
            }
        }
    }
}

/// A real value with its unit map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub units: UnitMap,
}

impl Quantity {
    pub fn new(value: f64, units: UnitMap) -> Self {
        Self { value, units }
    }

    pub fn unitless(value: f64) -> Self {
        Self { value, units: UnitMap::new() }
    }

    pub fn is_unitless(&self) -> bool {
        self.units.is_empty()
    }

    pub fn add(&self, other: &Self) -> Result<Self, QuantityError> {
        self.require_same_units(other)?;
        Ok(Self::new(self.value + other.value, self.units.clone()))
    }

    pub fn sub(&self, other: &Self) -> Result<Self, QuantityError> {
        self.require_same_units(other)?;
        Ok(Self::new(self.value - other.value, self.units.clone()))
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self::new(self.value * other.value, self.units.multiply(&other.units))
    }

    pub fn div(&self, other: &Self) -> Self {
        Self::new(self.value / other.value, self.units.divide(&other.units))
    }

    /// Raise to `exponent`. A dimensioned base only admits integer exponents,
    /// since fractional powers of units rarely denote anything physical.
    pub fn pow(&self, exponent: &Self) -> Result<Self, QuantityError> {
        if !exponent.is_unitless() {
            return Err(QuantityError::DimensionedExponent {
                units: exponent.units.to_string(),
            });
        }
        let e = exponent.value;
        if !self.is_unitless() && (e - e.round()).abs() > UNIT_EPSILON {
            return Err(QuantityError::NonIntegerExponent { exponent: e });
        }
        Ok(Self::new(self.value.powf(e), self.units.raise(e)))
    }

    pub fn neg(&self) -> Self {
        Self::new(-self.value, self.units.clone())
    }

    /// Approximate equality: units must match exactly, values within an
    /// absolute tolerance of `UNIT_EPSILON`.
    pub fn approx_eq(&self, other: &Self) -> Result<bool, QuantityError> {
        self.require_same_units(other)?;
        Ok((self.value - other.value).abs() <= UNIT_EPSILON)
    }

    fn require_same_units(&self, other: &Self) -> Result<(), QuantityError> {
        if self.units == other.units {
            Ok(())
        } else {
            Err(QuantityError::UnitMismatch {
                left: self.units.to_string(),
                right: other.units.to_string(),
            })
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unitless() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {{{}}}", self.value, self.units)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn per_tick(symbol: &str) -> UnitMap {
        UnitMap::from_pairs([(symbol, 1.0), ("tick", -1.0)])
    }

    #[test]
    fn test_add_requires_matching_units() {
        let a = Quantity::new(1.0, UnitMap::base("person"));
        let b = Quantity::new(2.0, UnitMap::base("person"));
        assert_relative_eq!(a.add(&b).unwrap().value, 3.0);

        let c = Quantity::new(2.0, UnitMap::base("meter"));
        assert!(matches!(a.add(&c), Err(QuantityError::UnitMismatch { .. })));
    }

    #[test]
    fn test_mul_composes_units() {
        let rate = Quantity::new(0.5, per_tick("person"));
        let time = Quantity::new(2.0, UnitMap::base("tick"));
        let product = rate.mul(&time);
        assert_relative_eq!(product.value, 1.0);
        assert_eq!(product.units, UnitMap::base("person"));
    }

    #[test]
    fn test_div_cancels_units() {
        let a = Quantity::new(10.0, UnitMap::base("person"));
        let b = Quantity::new(2.0, UnitMap::base("person"));
        let out = a.div(&b);
        assert_relative_eq!(out.value, 5.0);
        assert!(out.is_unitless());
    }

    #[test]
    fn test_pow_integer_rule() {
        let area_base = Quantity::new(3.0, UnitMap::base("meter"));
        let squared = area_base.pow(&Quantity::unitless(2.0)).unwrap();
        assert_relative_eq!(squared.value, 9.0);
        assert_relative_eq!(squared.units.exponent("meter"), 2.0);

        // fractional power is fine on a unitless base
        let out = Quantity::unitless(4.0).pow(&Quantity::unitless(0.5)).unwrap();
        assert_relative_eq!(out.value, 2.0);

        // but rejected on a dimensioned one
        assert!(matches!(
            area_base.pow(&Quantity::unitless(0.5)),
            Err(QuantityError::NonIntegerExponent { .. })
        ));

        // and the exponent itself must be dimensionless
        let bad_exp = Quantity::new(2.0, UnitMap::base("tick"));
        assert!(matches!(
            area_base.pow(&bad_exp),
            Err(QuantityError::DimensionedExponent { .. })
        ));
    }

    #[test]
    fn test_zero_exponents_normalize_away() {
        let mut units = UnitMap::base("meter");
        units.push("meter".to_string(), -1.0);
        assert!(units.is_empty());
        assert_eq!(units, UnitMap::new());
    }

    #[test]
    fn test_unit_equality_tolerance() {
        let a = UnitMap::from_pairs([("meter", 1.0)]);
        let b = UnitMap::from_pairs([("meter", 1.0 + 1e-14)]);
        assert_eq!(a, b);

        let c = UnitMap::from_pairs([("meter", 1.0 + 1e-9)]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        assert_eq!(per_tick("person").to_string(), "person/tick");
        assert_eq!(UnitMap::new().to_string(), "1");
        assert_eq!(
            UnitMap::from_pairs([("meter", 2.0)]).to_string(),
            "meter^2"
        );
    }

    #[test]
    fn test_approx_eq_tolerance() {
        let a = Quantity::unitless(1.0);
        let b = Quantity::unitless(1.0 + 1e-13);
        assert!(a.approx_eq(&b).unwrap());
        let c = Quantity::unitless(1.0 + 1e-6);
        assert!(!a.approx_eq(&c).unwrap());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn mul_multiplies_values_and_merges_units(
                a in -1e6_f64..1e6,
                b in -1e6_f64..1e6,
            ) {
                let x = Quantity::new(a, UnitMap::base("meter"));
                let y = Quantity::new(b, UnitMap::from_pairs([("second", -1.0)]));
                let out = x.mul(&y);
                prop_assert_eq!(out.value.to_bits(), (a * b).to_bits());
                prop_assert_eq!(
                    out.units,
                    UnitMap::from_pairs([("meter", 1.0), ("second", -1.0)])
                );
            }

            #[test]
            fn add_commutes_for_matching_units(
                a in -1e6_f64..1e6,
                b in -1e6_f64..1e6,
            ) {
                let x = Quantity::new(a, UnitMap::base("person"));
                let y = Quantity::new(b, UnitMap::base("person"));
                let xy = x.add(&y).unwrap();
                let yx = y.add(&x).unwrap();
                prop_assert_eq!(xy.value.to_bits(), yx.value.to_bits());
            }

            #[test]
            fn mul_then_div_restores_units(v in 0.1_f64..1e3) {
                let x = Quantity::new(v, UnitMap::base("item"));
                let t = Quantity::new(2.0, UnitMap::base("tick"));
                let back = x.mul(&t).div(&t);
                prop_assert_eq!(back.units, x.units);
            }
        }
    }
}
