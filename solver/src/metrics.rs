use std::{collections::BTreeMap, fmt::Debug};

/// How the per-iteration values of a metric collapse into a single epoch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Summed while the epoch runs, divided by the iteration count when it finishes.
    Mean,
    /// The largest value seen during the epoch.
    Max,
}

/// A closed set of metric names.
pub trait MetricKey: Copy + Ord + Debug + 'static {
    /// Every key, in reporting order.
    const ALL: &'static [Self];

    fn name(self) -> &'static str;

    fn reduction(self) -> Reduction;
}

/// Running epoch metrics, every key of `K` starts at zero.
#[derive(Debug, Clone)]
pub struct MetricAccumulator<K: MetricKey> {
    values: BTreeMap<K, f32>,
}

impl<K: MetricKey> Default for MetricAccumulator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MetricKey> MetricAccumulator<K> {
    pub fn new() -> Self {
        Self {
            values: K::ALL.iter().map(|&k| (k, 0.0)).collect(),
        }
    }

    /// Sets every metric back to zero.
    pub fn reset(&mut self) {
        self.values.values_mut().for_each(|v| *v = 0.0);
    }

    /// Folds an iteration's value into the metric.
    pub fn record(&mut self, key: K, value: f32) {
        let entry = self.values.entry(key).or_insert(0.0);

        match key.reduction() {
            Reduction::Mean => *entry += value,
            Reduction::Max => *entry = entry.max(value),
        }
    }

    /// Turns the accumulated sums into means over `iterations`. Maxima stay as they are, and
    /// nothing changes when no iteration ran.
    pub fn finish(&mut self, iterations: usize) {
        if iterations == 0 {
            return;
        }

        let n = iterations as f32;
        for (key, value) in self.values.iter_mut() {
            if key.reduction() == Reduction::Mean {
                *value /= n;
            }
        }
    }

    pub fn get(&self, key: K) -> f32 {
        self.values.get(&key).copied().unwrap_or_default()
    }

    /// Iterates the metrics in `K::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = (K, f32)> + '_ {
        K::ALL.iter().map(|&k| (k, self.get(k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Key {
        Loss,
        Norm,
    }

    impl MetricKey for Key {
        const ALL: &'static [Self] = &[Key::Loss, Key::Norm];

        fn name(self) -> &'static str {
            match self {
                Key::Loss => "loss",
                Key::Norm => "norm",
            }
        }

        fn reduction(self) -> Reduction {
            match self {
                Key::Loss => Reduction::Mean,
                Key::Norm => Reduction::Max,
            }
        }
    }

    #[test]
    fn epoch_value_is_the_mean() {
        let mut metrics = MetricAccumulator::<Key>::new();
        let values = [0.5, 1.5, 4.0];

        for v in values {
            metrics.record(Key::Loss, v);
        }
        metrics.finish(values.len());

        assert_eq!(metrics.get(Key::Loss), 2.0);
    }

    #[test]
    fn max_survives_finish_and_resets() {
        let mut metrics = MetricAccumulator::<Key>::new();

        for v in [3.0, 7.0, 2.0] {
            metrics.record(Key::Norm, v);
        }
        metrics.finish(3);
        assert_eq!(metrics.get(Key::Norm), 7.0);

        metrics.reset();
        metrics.record(Key::Norm, 1.0);
        assert_eq!(metrics.get(Key::Norm), 1.0);
    }

    #[test]
    fn empty_epoch_keeps_zeros() {
        let mut metrics = MetricAccumulator::<Key>::new();
        metrics.finish(0);

        let names: Vec<_> = metrics.iter().map(|(k, v)| (k.name(), v)).collect();
        assert_eq!(names, [("loss", 0.0), ("norm", 0.0)]);
    }
}
