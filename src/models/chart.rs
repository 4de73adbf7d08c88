// Chart response DTOs (JSON camelCase).

use serde::Serialize;

use super::GroupedMultiErrorInterval;

/// One chart point. `value: None` is an explicit gap marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub capture_time: i64,
    pub value: Option<f64>,
}

impl DataPoint {
    pub fn new(capture_time: i64, value: f64) -> Self {
        Self {
            capture_time,
            value: Some(value),
        }
    }

    pub fn gap(capture_time: i64) -> Self {
        Self {
            capture_time,
            value: None,
        }
    }

    pub fn is_gap(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSeries {
    pub name: String,
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallValue {
    pub name: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartResponse {
    pub data_series: Vec<DataSeries>,
    pub overall: Vec<OverallValue>,
    pub data_point_interval_millis: i64,
    /// Set when the fallback ran and found nothing in the window (retention exceeded).
    pub expired: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_intervals: Vec<GroupedMultiErrorInterval>,
}
