/// Stock (level) variable

use serde::{Deserialize, Serialize};

use crate::model::StockId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub name: String,
    pub initial_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Stock {
    pub fn new(name: &str, initial_value: f64) -> Self {
        Self {
            id: StockId::new(name),
            name: name.to_string(),
            initial_value,
            units: None,
        }
    }

    pub fn with_id(mut self, id: StockId) -> Self {
        self.id = id;
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }
}
