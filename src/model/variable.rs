/// Auxiliary and constant variables

use serde::{Deserialize, Serialize};

use crate::model::VariableId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    /// Recomputed from its expression on every step.
    Auxiliary,
    /// A scenario-overridable parameter with a fixed value.
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub kind: VariableKind,
    #[serde(default)]
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Variable {
    pub fn auxiliary(name: &str, expression: &str) -> Self {
        Self {
            id: VariableId::new(name),
            name: name.to_string(),
            kind: VariableKind::Auxiliary,
            expression: expression.to_string(),
            value: None,
            units: None,
        }
    }

    pub fn constant(name: &str, value: f64) -> Self {
        Self {
            id: VariableId::new(name),
            name: name.to_string(),
            kind: VariableKind::Constant,
            expression: String::new(),
            value: Some(value),
            units: None,
        }
    }

    pub fn with_id(mut self, id: VariableId) -> Self {
        self.id = id;
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }
}
