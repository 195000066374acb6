/// Flow (rate) variable
///
/// A flow drains its `source` stock and fills its `target` stock; either
/// endpoint may be absent for flows across the model boundary.

use serde::{Deserialize, Serialize};

use crate::model::{FlowId, StockId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<StockId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<StockId>,
    /// Rate equation in the DSL, evaluated every derivative call.
    pub rate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Flow {
    pub fn new(name: &str, rate: &str) -> Self {
        Self {
            id: FlowId::new(name),
            name: name.to_string(),
            source: None,
            target: None,
            rate: rate.to_string(),
            units: None,
        }
    }

    pub fn with_id(mut self, id: FlowId) -> Self {
        self.id = id;
        self
    }

    pub fn with_source(mut self, source: StockId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: StockId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }
}
