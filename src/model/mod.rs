/// Model module - defines system dynamics model structure

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod flow;
pub mod quantity;
pub mod stock;
pub mod units;
pub mod variable;

pub use flow::Flow;
pub use stock::Stock;
pub use variable::{Variable, VariableKind};

use crate::dsl;
use crate::error::Error;
use crate::model::quantity::UnitMap;
use crate::model::units::UnitRegistry;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a stock, unique within its model.
    StockId
);
string_id!(
    /// Identifier of a flow, unique within its model.
    FlowId
);
string_id!(
    /// Identifier of a variable, unique within its model.
    VariableId
);
string_id!(
    /// Identifier of a scenario definition.
    ScenarioId
);

/// Identifier of a model; fresh for every constructed (or override-cloned)
/// model, so per-model caches never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(Uuid);

impl ModelId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time configuration for simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeConfig {
    pub start: f64,
    pub end: f64,
    pub step: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 100.0,
            step: 0.25,
            units: None,
        }
    }
}

/// Complete system dynamics model. Immutable once handed to a simulation;
/// entity insertion order is the deterministic iteration order everywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default = "ModelId::generate")]
    pub id: ModelId,
    pub name: String,
    pub time: TimeConfig,
    #[serde(default)]
    pub stocks: Vec<Stock>,
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Self {
            id: ModelId::generate(),
            name: name.to_string(),
            time: TimeConfig::default(),
            stocks: Vec::new(),
            flows: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn add_stock(&mut self, stock: Stock) -> Result<(), Error> {
        if self.stocks.iter().any(|s| s.id == stock.id) {
            return Err(Error::InvalidModel {
                detail: format!("stock '{}' already exists", stock.id),
            });
        }
        self.stocks.push(stock);
        Ok(())
    }

    pub fn add_flow(&mut self, flow: Flow) -> Result<(), Error> {
        if self.flows.iter().any(|f| f.id == flow.id) {
            return Err(Error::InvalidModel {
                detail: format!("flow '{}' already exists", flow.id),
            });
        }
        self.flows.push(flow);
        Ok(())
    }

    pub fn add_variable(&mut self, variable: Variable) -> Result<(), Error> {
        if self.variables.iter().any(|v| v.id == variable.id) {
            return Err(Error::InvalidModel {
                detail: format!("variable '{}' already exists", variable.id),
            });
        }
        self.variables.push(variable);
        Ok(())
    }

    pub fn stock(&self, id: &StockId) -> Option<&Stock> {
        self.stocks.iter().find(|s| &s.id == id)
    }

    pub fn stock_by_name(&self, name: &str) -> Option<&Stock> {
        self.stocks.iter().find(|s| s.name == name)
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Declared unit map of a stock (empty when undeclared).
    pub fn stock_units(&self, stock: &Stock) -> Result<UnitMap, Error> {
        match &stock.units {
            Some(text) => dsl::parse_unit_declaration(text).map_err(Error::EquationParse),
            None => Ok(UnitMap::new()),
        }
    }

    /// Model time unit symbol; defaults to `tick`.
    pub fn time_unit(&self) -> UnitMap {
        match &self.time.units {
            Some(text) => dsl::parse_unit_declaration(text).unwrap_or_else(|_| UnitMap::base("tick")),
            None => UnitMap::base("tick"),
        }
    }

    /// Structural validation per the data-model invariants. The kernel calls
    /// this before simulating even when a builder already has.
    pub fn validate(&self, registry: &UnitRegistry) -> Result<(), Error> {
        let invalid = |detail: String| Error::InvalidModel { detail };

        if !(self.time.end > 0.0 && self.time.end > self.time.start) {
            return Err(invalid(format!(
                "time end {} must be positive and exceed start {}",
                self.time.end, self.time.start
            )));
        }
        if !(self.time.step > 0.0 && self.time.step.is_finite()) {
            return Err(invalid(format!("time step {} must be positive and finite", self.time.step)));
        }
        if !self.time.start.is_finite() || !self.time.end.is_finite() {
            return Err(invalid("time bounds must be finite".to_string()));
        }
        if let Some(units) = &self.time.units {
            let map = dsl::parse_unit_declaration(units).map_err(Error::EquationParse)?;
            registry.validate(&map)?;
        }

        for stock in &self.stocks {
            if stock.name.is_empty() {
                return Err(invalid(format!("stock '{}' has an empty name", stock.id)));
            }
            if !stock.initial_value.is_finite() {
                return Err(invalid(format!(
                    "stock '{}' has a non-finite initial value",
                    stock.name
                )));
            }
            let units = self.stock_units(stock)?;
            registry.validate(&units)?;
        }

        for flow in &self.flows {
            for endpoint in [&flow.source, &flow.target].into_iter().flatten() {
                if self.stock(endpoint).is_none() {
                    return Err(invalid(format!(
                        "flow '{}' references unknown stock '{}'",
                        flow.name, endpoint
                    )));
                }
            }
            if let (Some(source), Some(target)) = (&flow.source, &flow.target) {
                let source_units = self.stock_units(self.stock(source).unwrap())?;
                let target_units = self.stock_units(self.stock(target).unwrap())?;
                if source_units != target_units {
                    return Err(invalid(format!(
                        "flow '{}' connects stocks with different units ('{}' vs '{}')",
                        flow.name, source_units, target_units
                    )));
                }
            }
            dsl::parse(&flow.rate)?;
            if let Some(units) = &flow.units {
                let map = dsl::parse_unit_declaration(units).map_err(Error::EquationParse)?;
                registry.validate(&map)?;
            }
        }

        let mut names = std::collections::HashSet::new();
        for variable in &self.variables {
            if !names.insert(variable.name.as_str()) {
                return Err(invalid(format!("duplicate variable name '{}'", variable.name)));
            }
            match variable.kind {
                VariableKind::Constant => {
                    if variable.value.is_none() {
                        return Err(invalid(format!(
                            "constant '{}' is missing a value",
                            variable.name
                        )));
                    }
                }
                VariableKind::Auxiliary => {
                    if variable.expression.trim().is_empty() {
                        return Err(invalid(format!(
                            "auxiliary '{}' has an empty expression",
                            variable.name
                        )));
                    }
                    dsl::parse(&variable.expression)?;
                }
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidModel {
            detail: format!("model serialization failed: {}", e),
        })
    }

    pub fn from_json(payload: &str) -> Result<Self, Error> {
        serde_json::from_str(payload).map_err(|e| Error::InvalidModel {
            detail: format!("model payload rejected: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn growth_model() -> Model {
        let mut model = Model::new("growth");
        model.time = TimeConfig { start: 0.0, end: 10.0, step: 1.0, units: Some("tick".into()) };
        model
            .add_stock(Stock::new("Population", 100.0).with_units("person"))
            .unwrap();
        model
            .add_variable(Variable::constant("GrowthRate", 0.1))
            .unwrap();
        let flow = Flow::new("births", "[Population] * GrowthRate / {1 tick}")
            .with_target(StockId::new("Population"));
        model.add_flow(flow).unwrap();
        model
    }

    #[test]
    fn test_validate_accepts_growth_model() {
        let model = growth_model();
        model.validate(&UnitRegistry::standard()).unwrap();
    }

    #[test]
    fn test_validate_rejects_dangling_endpoint() {
        let mut model = growth_model();
        model.flows[0].source = Some(StockId::new("Nowhere"));
        assert!(model.validate(&UnitRegistry::standard()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_time_config() {
        let mut model = growth_model();
        model.time.end = model.time.start;
        assert!(model.validate(&UnitRegistry::standard()).is_err());

        let mut model = growth_model();
        model.time.step = 0.0;
        assert!(model.validate(&UnitRegistry::standard()).is_err());
    }

    #[test]
    fn test_validate_rejects_constant_without_value() {
        let mut model = growth_model();
        model.variables[0].value = None;
        assert!(model.validate(&UnitRegistry::standard()).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_variable_names() {
        let mut model = growth_model();
        model
            .add_variable(Variable::constant("GrowthRate2", 0.2).with_id(VariableId::new("gr2")))
            .unwrap();
        model.variables[1].name = "GrowthRate".to_string();
        assert!(model.validate(&UnitRegistry::standard()).is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_endpoint_units() {
        let mut model = growth_model();
        model
            .add_stock(Stock::new("Inventory", 5.0).with_units("item"))
            .unwrap();
        model.flows[0].source = Some(StockId::new("Inventory"));
        assert!(model.validate(&UnitRegistry::standard()).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let model = growth_model();
        let payload = model.to_json().unwrap();
        let back = Model::from_json(&payload).unwrap();
        assert_eq!(model, back);
        back.validate(&UnitRegistry::standard()).unwrap();
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut model = growth_model();
        let err = model.add_stock(Stock::new("Population", 1.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidModel { .. }));
    }
}
