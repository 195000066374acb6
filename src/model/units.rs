/// Unit registry and dimensional coherence checks
///
/// Every symbol referenced by a unit map must be registered here. The
/// registry also offers explicit single-unit conversion; nothing in the
/// kernel converts implicitly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::quantity::{Quantity, UnitMap, UNIT_EPSILON};

/// A registered unit: case-folded symbol, dimension map and the scaling
/// factor to the base unit of that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDefinition {
    pub symbol: String,
    pub dimension: UnitMap,
    pub factor: f64,
}

impl UnitDefinition {
    pub fn new(symbol: &str, dimension: UnitMap, factor: f64) -> Self {
        Self {
            symbol: symbol.to_lowercase(),
            dimension,
            factor,
        }
    }
}

/// Registry of known units, extendable at runtime.
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    definitions: HashMap<String, UnitDefinition>,
}

impl UnitRegistry {
    pub fn empty() -> Self {
        Self { definitions: HashMap::new() }
    }

    /// Registry pre-loaded with the stock set: a time family, counts and a
    /// small SI selection.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        let time = UnitMap::base("time");

        let defaults = [
            UnitDefinition::new("tick", time.clone(), 1.0),
            UnitDefinition::new("second", time.clone(), 1.0),
            UnitDefinition::new("minute", time.clone(), 60.0),
            UnitDefinition::new("hour", time.clone(), 3600.0),
            UnitDefinition::new("day", time.clone(), 86_400.0),
            UnitDefinition::new("week", time.clone(), 604_800.0),
            UnitDefinition::new("month", time.clone(), 2_629_800.0),
            UnitDefinition::new("year", time, 31_557_600.0),
            UnitDefinition::new("item", UnitMap::base("item"), 1.0),
            UnitDefinition::new("person", UnitMap::base("person"), 1.0),
            UnitDefinition::new("meter", UnitMap::base("length"), 1.0),
            UnitDefinition::new("kilometer", UnitMap::base("length"), 1000.0),
            UnitDefinition::new("kilogram", UnitMap::base("mass"), 1.0),
            UnitDefinition::new("dollar", UnitMap::base("currency"), 1.0),
        ];
        for def in defaults {
            registry.register(def).expect("default units are coherent");
        }
        registry
    }

    pub fn register(&mut self, definition: UnitDefinition) -> Result<(), Error> {
        if definition.factor <= 0.0 || !definition.factor.is_finite() {
            return Err(Error::InvalidModel {
                detail: format!(
                    "unit '{}' must have a positive finite factor, got {}",
                    definition.symbol, definition.factor
                ),
            });
        }
        if self.definitions.contains_key(&definition.symbol) {
            return Err(Error::InvalidModel {
                detail: format!("unit '{}' is already registered", definition.symbol),
            });
        }
        self.definitions.insert(definition.symbol.clone(), definition);
        Ok(())
    }

    pub fn lookup(&self, symbol: &str) -> Result<&UnitDefinition, Error> {
        self.definitions
            .get(&symbol.to_lowercase())
            .ok_or_else(|| Error::UnitNotFound { symbol: symbol.to_string() })
    }

    /// Every symbol in the map must be registered.
    pub fn validate(&self, units: &UnitMap) -> Result<(), Error> {
        for (symbol, _) in units.iter() {
            self.lookup(symbol)?;
        }
        Ok(())
    }

    /// Dimension map of a composite unit expression.
    pub fn dimension_of(&self, units: &UnitMap) -> Result<UnitMap, Error> {
        let mut dimension = UnitMap::new();
        for (symbol, exponent) in units.iter() {
            let def = self.lookup(symbol)?;
            dimension = dimension.multiply(&def.dimension.raise(exponent));
        }
        Ok(dimension)
    }

    /// Convert a plain value between two registered units of the same
    /// dimension.
    pub fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, Error> {
        let from_def = self.lookup(from)?;
        let to_def = self.lookup(to)?;
        if from_def.dimension != to_def.dimension {
            return Err(Error::UnitDimensionMismatch {
                from: from.to_string(),
                to: to.to_string(),
                from_dimension: from_def.dimension.to_string(),
                to_dimension: to_def.dimension.to_string(),
            });
        }
        Ok(value * from_def.factor / to_def.factor)
    }

    /// Convert a quantity carrying a single first-power unit. Composite unit
    /// maps are refused; callers must decompose them explicitly.
    pub fn convert_quantity(&self, quantity: &Quantity, to: &str) -> Result<Quantity, Error> {
        let mut symbols = quantity.units.iter();
        let (symbol, exponent) = match (symbols.next(), symbols.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(Error::UnsupportedQuantity {
                    reason: "cannot convert a unitless quantity".to_string(),
                })
            }
            _ => {
                return Err(Error::UnsupportedQuantity {
                    reason: format!("composite unit '{}' cannot be converted", quantity.units),
                })
            }
        };
        if (exponent - 1.0).abs() > UNIT_EPSILON {
            return Err(Error::UnsupportedQuantity {
                reason: format!("unit '{}' with exponent {} cannot be converted", symbol, exponent),
            });
        }
        let value = self.convert(quantity.value, symbol, to)?;
        Ok(Quantity::new(value, UnitMap::base(&to.to_lowercase())))
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
