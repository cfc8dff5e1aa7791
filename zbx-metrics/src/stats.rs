/// Summary statistics of the timings collected for one timer within a flush window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimerSummary {
    /// The smallest sample.
    pub min: i64,
    /// The largest sample.
    pub max: i64,
    /// The mean of the lowest `threshold_index` samples.
    pub mean: f64,
    /// The median of all samples.
    pub median: f64,
    /// The number of samples.
    pub count: usize,
    /// The one-based rank of the percentile sample, always within `1..=count`.
    pub threshold_index: usize,
    /// The sample at `threshold_index`, reported as `upper_<percentile>`.
    pub threshold: i64,
}

/// Computes the rank of the percentile sample among `count` sorted samples.
///
/// Rounds `count * percentile / 100` half away from zero and clamps the result to `1..=count`.
fn threshold_index(count: usize, percentile: u8) -> usize {
    let scaled = count.saturating_mul(usize::from(percentile)).saturating_add(50) / 100;
    scaled.clamp(1, count)
}

/// Reduces raw timer samples into summary statistics.
///
/// Sorts `samples` in place. Returns `None` for an empty slice, in which case nothing must be
/// emitted for the timer.
///
/// The mean is biased towards the percentile window: it averages only the samples up to and
/// including the percentile sample.
///
/// # Example
///
/// ```
/// let mut samples = vec![3, 1, 2];
/// let summary = zbx_metrics::reduce(&mut samples, 90).unwrap();
///
/// assert_eq!(summary.min, 1);
/// assert_eq!(summary.median, 2.0);
/// assert_eq!(samples, [1, 2, 3]);
/// ```
pub fn reduce(samples: &mut [i64], percentile: u8) -> Option<TimerSummary> {
    let count = samples.len();
    if count == 0 {
        return None;
    }

    samples.sort_unstable();
    let min = samples[0];
    let max = samples[count - 1];

    if count == 1 {
        return Some(TimerSummary {
            min,
            max,
            mean: min as f64,
            median: min as f64,
            count,
            threshold_index: 1,
            threshold: min,
        });
    }

    let threshold_index = threshold_index(count, percentile);
    let threshold = samples[threshold_index - 1];

    let sum: i128 = samples[..threshold_index]
        .iter()
        .map(|&sample| i128::from(sample))
        .sum();
    let mean = sum as f64 / threshold_index as f64;

    let mid = count / 2;
    let median = if count % 2 == 0 {
        (samples[mid - 1] as f64 + samples[mid] as f64) / 2.0
    } else {
        samples[mid] as f64
    };

    Some(TimerSummary {
        min,
        max,
        mean,
        median,
        count,
        threshold_index,
        threshold,
    })
}
