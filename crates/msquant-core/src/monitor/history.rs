//! Bounded per-device telemetry history.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::gpu::GpuSample;
use crate::config::MonitorConfig;

/// Metric to extract from a history ring for charting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuMetric {
    Utilization,
    MemoryPercent,
    Temperature,
    PowerDraw,
    PowerPercent,
}

/// Per-device rings of recent samples.
///
/// Each device keeps at most `capacity` samples; recording evicts the oldest
/// first. Reads are copy-out so a chart redraw never holds the lock across
/// rendering.
pub struct GpuHistory {
    capacity: usize,
    rings: Mutex<HashMap<u32, VecDeque<GpuSample>>>,
}

impl Default for GpuHistory {
    fn default() -> Self {
        Self::new(MonitorConfig::HISTORY_SIZE)
    }
}

impl GpuHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rings: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one poll's worth of samples.
    pub fn record(&self, samples: &[GpuSample]) {
        if self.capacity == 0 {
            return;
        }
        let mut rings = self.rings.lock().expect("gpu history lock poisoned");
        for sample in samples {
            let ring = rings.entry(sample.index).or_default();
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(sample.clone());
        }
    }

    /// All retained samples for one device, oldest first.
    pub fn history(&self, index: u32) -> Vec<GpuSample> {
        let rings = self.rings.lock().expect("gpu history lock poisoned");
        rings
            .get(&index)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent sample for one device.
    pub fn latest(&self, index: u32) -> Option<GpuSample> {
        let rings = self.rings.lock().expect("gpu history lock poisoned");
        rings.get(&index).and_then(|ring| ring.back().cloned())
    }

    /// Device indices with at least one recorded sample, sorted.
    pub fn devices(&self) -> Vec<u32> {
        let rings = self.rings.lock().expect("gpu history lock poisoned");
        let mut indices: Vec<u32> = rings.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Timestamped values of one metric for one device, for charting.
    pub fn series(&self, index: u32, metric: GpuMetric) -> Vec<(DateTime<Utc>, f32)> {
        self.history(index)
            .iter()
            .map(|s| {
                let value = match metric {
                    GpuMetric::Utilization => s.utilization,
                    GpuMetric::MemoryPercent => s.memory_percent(),
                    GpuMetric::Temperature => s.temperature,
                    GpuMetric::PowerDraw => s.power_draw_w,
                    GpuMetric::PowerPercent => s.power_percent(),
                };
                (s.timestamp, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(index: u32, utilization: f32) -> GpuSample {
        GpuSample {
            timestamp: Utc::now(),
            index,
            name: "test gpu".into(),
            utilization,
            memory_used_mib: 1024,
            memory_total_mib: 8192,
            temperature: 50.0,
            power_draw_w: 100.0,
            power_limit_w: 250.0,
        }
    }

    #[test]
    fn test_empty_history() {
        let history = GpuHistory::new(4);
        assert!(history.history(0).is_empty());
        assert!(history.latest(0).is_none());
        assert!(history.devices().is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let history = GpuHistory::new(3);
        for i in 0..5 {
            history.record(&[sample(0, i as f32)]);
        }
        let retained = history.history(0);
        assert_eq!(retained.len(), 3);
        // 0 and 1 were evicted.
        let values: Vec<f32> = retained.iter().map(|s| s.utilization).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(history.latest(0).unwrap().utilization, 4.0);
    }

    #[test]
    fn test_devices_tracked_independently() {
        let history = GpuHistory::new(2);
        history.record(&[sample(1, 10.0), sample(0, 20.0)]);
        history.record(&[sample(1, 30.0)]);
        assert_eq!(history.devices(), vec![0, 1]);
        assert_eq!(history.history(0).len(), 1);
        assert_eq!(history.history(1).len(), 2);
    }

    #[test]
    fn test_series_extraction() {
        let history = GpuHistory::new(8);
        history.record(&[sample(0, 42.0)]);
        let series = history.series(0, GpuMetric::Utilization);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].1, 42.0);
        let series = history.series(0, GpuMetric::MemoryPercent);
        assert!((series[0].1 - 12.5).abs() < 0.01);
        let series = history.series(0, GpuMetric::PowerPercent);
        assert!((series[0].1 - 40.0).abs() < 0.01);
    }
}
