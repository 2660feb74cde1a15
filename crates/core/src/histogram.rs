use anyhow::{bail, Result};

/// Number of doubling buckets below the final unbounded one.
const DOUBLING_BUCKETS: usize = 30;

/// Fixed-bucket frequency counter for latency samples and throughput peaks.
///
/// Only the bucket of each sample is retained, plus the smallest and largest
/// raw value seen, so `mean` and the percentile bounds are approximations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    upper_bounds: Vec<u64>,
    counts: Vec<u64>,
    min_value: u64,
    max_value: u64,
}

impl Histogram {
    /// Build a histogram over `upper_bounds`, which must be non-empty and
    /// strictly increasing.
    pub fn new(upper_bounds: Vec<u64>) -> Result<Self> {
        if upper_bounds.is_empty() {
            bail!("histogram needs at least one bucket");
        }
        if let Some(w) = upper_bounds.windows(2).find(|w| w[0] >= w[1]) {
            bail!(
                "histogram bounds must be strictly increasing ({} >= {})",
                w[0],
                w[1]
            );
        }
        let counts = vec![0; upper_bounds.len()];
        Ok(Self {
            upper_bounds,
            counts,
            min_value: u64::MAX,
            max_value: 0,
        })
    }

    /// 2, 4, 8 ... 2^30, then one bucket catching everything above.
    pub fn with_default_bounds() -> Self {
        let mut bounds: Vec<u64> = (1..=DOUBLING_BUCKETS as u32).map(|i| 1u64 << i).collect();
        bounds.push(u64::MAX);
        Self {
            counts: vec![0; bounds.len()],
            upper_bounds: bounds,
            min_value: u64::MAX,
            max_value: 0,
        }
    }

    pub fn upper_bounds(&self) -> &[u64] {
        &self.upper_bounds
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Index of the first bucket whose bound is >= `value`.
    pub fn bucket_index(&self, value: u64) -> Option<usize> {
        let idx = self.upper_bounds.partition_point(|&bound| bound < value);
        (idx < self.upper_bounds.len()).then_some(idx)
    }

    /// Count `value` in its bucket. Returns false if it is above the last bound.
    pub fn record(&mut self, value: u64) -> bool {
        match self.bucket_index(value) {
            Some(idx) => {
                self.counts[idx] += 1;
                self.min_value = self.min_value.min(value);
                self.max_value = self.max_value.max(value);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Smallest recorded value, or 0 when empty.
    pub fn min(&self) -> u64 {
        if self.count() == 0 {
            0
        } else {
            self.min_value
        }
    }

    /// Largest recorded value. Throughput runs use this as their peak rate.
    pub fn max(&self) -> u64 {
        self.max_value
    }

    /// Approximate mean from bucket midpoints.
    ///
    /// Bucket edges are clamped to the observed min and max, so a handful of
    /// samples in the unbounded bucket do not drag the mean towards `u64::MAX`.
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }

        let mut lower = if self.counts[0] > 0 { self.min_value } else { 0 };
        let mut total = 0.0;
        for (&bound, &n) in self.upper_bounds.iter().zip(&self.counts) {
            if n != 0 {
                let upper = bound.min(self.max_value);
                let mid = lower as f64 + upper.saturating_sub(lower) as f64 / 2.0;
                total += mid * n as f64;
            }
            lower = bound.saturating_add(1).max(self.min_value);
        }
        total / count as f64
    }

    /// Bound of the bucket where the cumulative count first reaches
    /// `percentile`% of all samples. `percentile` is clamped into (0, 100].
    pub fn upper_bound_for_percentile(&self, percentile: f64) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        let percentile = if percentile.is_nan() {
            100.0
        } else {
            percentile.clamp(f64::MIN_POSITIVE, 100.0)
        };
        let threshold = ((count as f64 * percentile / 100.0).ceil() as u64).clamp(1, count);

        let mut cumulative = 0;
        for (&bound, &n) in self.upper_bounds.iter().zip(&self.counts) {
            cumulative += n;
            if cumulative >= threshold {
                return bound;
            }
        }
        // cumulative == count by the end, and threshold <= count
        self.upper_bounds[self.upper_bounds.len() - 1]
    }

    pub fn two_nines_upper_bound(&self) -> u64 {
        self.upper_bound_for_percentile(99.0)
    }

    pub fn four_nines_upper_bound(&self) -> u64 {
        self.upper_bound_for_percentile(99.99)
    }

    /// Add every sample of `other` into `self`. Bounds must match.
    pub fn merge(&mut self, other: &Histogram) -> Result<()> {
        if self.upper_bounds != other.upper_bounds {
            bail!("cannot merge histograms with different bucket bounds");
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        if other.count() > 0 {
            self.min_value = self.min_value.min(other.min_value);
            self.max_value = self.max_value.max(other.max_value);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.min_value = u64::MAX;
        self.max_value = 0;
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::with_default_bounds()
    }
}
