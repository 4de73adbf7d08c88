// Chart series building: merged records become renderable points with explicit gaps, a
// leading point at the window start and a trailing point bounded by the live capture time.

pub mod service;

use crate::models::{DataPoint, DataSeries};

pub use service::ChartService;

/// What a missing stretch of data renders as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GapFill {
    /// A single null point: the line breaks.
    Null,
    /// Points at the fill value: the line drops to it (e.g. zero throughput).
    Value(f64),
}

#[derive(Debug, Clone, Copy)]
pub struct SeriesBuilder {
    from: i64,
    to: i64,
    data_point_interval_millis: i64,
    live_capture_time: i64,
    gap_multiplier: f64,
    fill: GapFill,
}

impl SeriesBuilder {
    pub fn new(from: i64, to: i64, data_point_interval_millis: i64, live_capture_time: i64) -> Self {
        Self {
            from,
            to,
            data_point_interval_millis,
            live_capture_time,
            gap_multiplier: 1.5,
            fill: GapFill::Null,
        }
    }

    pub fn with_gap_multiplier(self, gap_multiplier: f64) -> Self {
        Self {
            gap_multiplier,
            ..self
        }
    }

    pub fn with_fill(self, fill: GapFill) -> Self {
        Self { fill, ..self }
    }

    fn gap_threshold(&self) -> f64 {
        self.gap_multiplier * self.data_point_interval_millis as f64
    }

    fn fill_point(&self, capture_time: i64) -> DataPoint {
        match self.fill {
            GapFill::Null => DataPoint::gap(capture_time),
            GapFill::Value(v) => DataPoint::new(capture_time, v),
        }
    }

    /// `points` must be ascending by capture time; a `None` value is carried as a gap.
    pub fn build(
        &self,
        name: impl Into<String>,
        points: impl IntoIterator<Item = (i64, Option<f64>)>,
    ) -> DataSeries {
        let interval = self.data_point_interval_millis;
        let mut data: Vec<DataPoint> = Vec::new();
        let mut prev: Option<i64> = None;
        for (capture_time, value) in points {
            match prev {
                None => {
                    if capture_time - self.from > interval {
                        data.push(self.fill_point(self.from));
                    }
                }
                Some(prev) if (capture_time - prev) as f64 > self.gap_threshold() => {
                    self.push_gap(&mut data, prev, capture_time);
                }
                Some(_) => {}
            }
            data.push(DataPoint {
                capture_time,
                value,
            });
            prev = Some(capture_time);
        }
        if let Some(last) = prev {
            let end = self.to.min(self.live_capture_time);
            if end - last > interval {
                data.push(self.fill_point(end));
            }
        }
        DataSeries {
            name: name.into(),
            data,
        }
    }

    fn push_gap(&self, data: &mut Vec<DataPoint>, prev: i64, next: i64) {
        let interval = self.data_point_interval_millis;
        match self.fill {
            GapFill::Null => data.push(DataPoint::gap(prev + (next - prev) / 2)),
            GapFill::Value(v) => {
                let after_prev = prev + interval;
                let before_next = next - interval;
                data.push(DataPoint::new(after_prev, v));
                if before_next > after_prev {
                    data.push(DataPoint::new(before_next, v));
                }
            }
        }
    }
}

/// Display name of a percentile sub-series, e.g. "50th percentile", "99.9th percentile".
pub fn percentile_name(percentile: f64) -> String {
    if percentile.fract() != 0.0 {
        return format!("{}th percentile", percentile);
    }
    let n = percentile as i64;
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{} percentile", n, suffix)
}
