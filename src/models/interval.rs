// Error/down intervals reported by synthetic monitors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

/// Absolute error window inside one source. `count` is the number of failed executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInterval {
    pub from: i64,
    pub to: i64,
    pub count: u64,
    pub message: String,
}

/// One overlay window spanning overlapping intervals from several sources.
/// `error_intervals` keeps each source's own intervals for tooltips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedMultiErrorInterval {
    pub from: i64,
    pub to: i64,
    pub error_intervals: BTreeMap<String, Vec<ErrorInterval>>,
}
