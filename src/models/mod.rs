// Domain models: aggregate record kinds, queries, error intervals and chart DTOs.

mod aggregate;
mod chart;
mod interval;
mod query;

pub use aggregate::{
    AggregateKind, AggregateRecord, AnyAggregate, MAX_COUNT, OverviewAggregate,
    PercentileAggregate, StoredAggregate, SyntheticResult, ThreadStats, ThroughputAggregate,
    TimerNode,
};
pub use chart::{ChartResponse, DataPoint, DataSeries, OverallValue};
pub use interval::{ErrorInterval, GroupedMultiErrorInterval};
pub use query::{
    AggregateQuery, DataKind, MAX_CAPTURE_TIME, capture_time_in_range, check_window,
};
