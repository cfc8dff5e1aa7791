use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zbx_common::UnixTimestamp;

use crate::aggregator::Drained;
use crate::stats::reduce;

/// A single item value sent to the trapper.
///
/// Values are always rendered as strings. The trapper converts them according to the type of the
/// item they are stored in.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct FlushPoint {
    /// The host name as configured in the monitoring backend.
    pub host: String,
    /// The item key.
    pub key: String,
    /// The rendered value.
    pub value: String,
    /// The time the value was flushed.
    pub clock: UnixTimestamp,
}

impl FlushPoint {
    /// Creates a new point.
    pub fn new(
        host: impl Into<String>,
        key: impl Into<String>,
        value: impl ToString,
        clock: UnixTimestamp,
    ) -> Self {
        Self {
            host: host.into(),
            key: key.into(),
            value: value.to_string(),
            clock,
        }
    }
}

/// All points produced by one flush, in emission order.
///
/// The batch cannot be modified after it has been built.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlushBatch {
    points: Vec<FlushPoint>,
}

impl FlushBatch {
    /// Returns the points of this batch.
    pub fn points(&self) -> &[FlushPoint] {
        &self.points
    }

    /// Returns the number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if the batch has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterates over the points of this batch.
    pub fn iter(&self) -> std::slice::Iter<'_, FlushPoint> {
        self.points.iter()
    }
}

impl From<Vec<FlushPoint>> for FlushBatch {
    fn from(points: Vec<FlushPoint>) -> Self {
        Self { points }
    }
}

impl FromIterator<FlushPoint> for FlushBatch {
    fn from_iter<T: IntoIterator<Item = FlushPoint>>(iter: T) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FlushBatch {
    type Item = &'a FlushPoint;
    type IntoIter = std::slice::Iter<'a, FlushPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Builds the batch for one flush from the drained aggregator contents.
///
/// Counters are emitted first as one point each, reporting the per-second rate over `interval`.
/// Every non-empty timer then yields six points, suffixed `[mean]`, `[upper]`, `[lower]`,
/// `[count]`, `[upper_<percentile>]` and `[median]`. Within each group, keys are ordered by host
/// and name. All points carry the same `clock`.
pub fn build_batch(
    drained: Drained,
    interval: Duration,
    percentile: u8,
    clock: UnixTimestamp,
) -> FlushBatch {
    let Drained { counters, timers } = drained;
    let seconds = interval.as_secs_f64();

    let counters: BTreeMap<_, _> = counters.into_iter().collect();
    let timers: BTreeMap<_, _> = timers.into_iter().collect();

    let mut points = Vec::with_capacity(counters.len() + timers.len() * 6);

    for (key, total) in counters {
        let rate = if seconds > 0.0 { total / seconds } else { total };
        points.push(FlushPoint::new(key.host, key.name, rate, clock));
    }

    for (key, mut samples) in timers {
        let Some(summary) = reduce(&mut samples, percentile) else {
            continue;
        };

        let host = key.host;
        let name = key.name;
        let item = |suffix: &str| format!("{name}[{suffix}]");

        points.extend([
            FlushPoint::new(&host, item("mean"), summary.mean, clock),
            FlushPoint::new(&host, item("upper"), summary.max, clock),
            FlushPoint::new(&host, item("lower"), summary.min, clock),
            FlushPoint::new(&host, item("count"), summary.count, clock),
            FlushPoint::new(
                &host,
                item(&format!("upper_{percentile}")),
                summary.threshold,
                clock,
            ),
            FlushPoint::new(&host, item("median"), summary.median, clock),
        ]);
    }

    FlushBatch { points }
}
