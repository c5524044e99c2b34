//! 处理统计
//!
//! 每个进程（读取器或对账器）持有一个 [`ProcessingStats`]，
//! 按结果分类计数，并定期输出累计数量与吞吐量。

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::{Duration, Instant};
use tracing::info;

/// 某一时刻的统计
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub records: u64,
    pub messages: u64,
    pub elapsed: Duration,
    /// 记录/秒
    pub throughput: f64,
}

/// 处理统计收集器
#[derive(Debug)]
pub struct ProcessingStats {
    component: String,
    registry: Registry,
    records_total: IntCounter,
    messages_total: IntCounter,
    outcomes_total: IntCounterVec,
    last_sequence: IntGauge,
    stats_interval: u64,
    started: Instant,
}

impl ProcessingStats {
    /// `component` 作为指标名前缀，例如 `hl7_reader`
    pub fn new(component: &str, stats_interval: u64) -> Result<Self> {
        let registry = Registry::new();

        let records_total = IntCounter::with_opts(Opts::new(
            format!("{}_records_total", component),
            "Total number of records processed",
        ))?;
        let messages_total = IntCounter::with_opts(Opts::new(
            format!("{}_messages_total", component),
            "Total number of interchange messages handled",
        ))?;
        let outcomes_total = IntCounterVec::new(
            Opts::new(format!("{}_outcomes_total", component), "Records by processing outcome"),
            &["outcome"],
        )?;
        let last_sequence = IntGauge::with_opts(Opts::new(
            format!("{}_last_sequence", component),
            "Sequence number of the last processed record",
        ))?;

        // 注册所有指标
        registry.register(Box::new(records_total.clone()))?;
        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(outcomes_total.clone()))?;
        registry.register(Box::new(last_sequence.clone()))?;

        Ok(Self {
            component: component.to_string(),
            registry,
            records_total,
            messages_total,
            outcomes_total,
            last_sequence,
            stats_interval: stats_interval.max(1),
            started: Instant::now(),
        })
    }

    /// 记录一条已处理的记录；达到统计间隔时输出并返回快照
    pub fn record(&self, outcome: &str, messages: usize, sequence: Option<i64>) -> Option<StatsSnapshot> {
        self.records_total.inc();
        self.messages_total.inc_by(messages as u64);
        self.outcomes_total.with_label_values(&[outcome]).inc();
        if let Some(sequence) = sequence {
            self.last_sequence.set(sequence);
        }

        if self.records_total.get() % self.stats_interval != 0 {
            return None;
        }
        let snapshot = self.snapshot();
        info!(
            "{}: processed {} records, {} messages in {:.1}s ({:.1} records/s)",
            self.component,
            snapshot.records,
            snapshot.messages,
            snapshot.elapsed.as_secs_f64(),
            snapshot.throughput
        );
        Some(snapshot)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.started.elapsed();
        let records = self.records_total.get();
        let seconds = elapsed.as_secs_f64();
        StatsSnapshot {
            records,
            messages: self.messages_total.get(),
            elapsed,
            throughput: if seconds > 0.0 { records as f64 / seconds } else { 0.0 },
        }
    }

    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.outcomes_total.with_label_values(&[outcome]).get()
    }

    /// Prometheus文本格式
    pub fn prometheus_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_outcome() {
        let stats = ProcessingStats::new("test_reader", 100).unwrap();
        stats.record("built", 2, Some(1));
        stats.record("built", 1, Some(2));
        stats.record("ignored", 0, Some(3));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.records, 3);
        assert_eq!(snapshot.messages, 3);
        assert_eq!(stats.outcome_count("built"), 2);
        assert_eq!(stats.outcome_count("ignored"), 1);
        assert_eq!(stats.outcome_count("rejected"), 0);
    }

    #[test]
    fn test_snapshot_every_interval() {
        let stats = ProcessingStats::new("test_star", 2).unwrap();
        assert!(stats.record("applied", 1, None).is_none());
        let snapshot = stats.record("applied", 1, None).unwrap();
        assert_eq!(snapshot.records, 2);
        assert!(stats.record("applied", 1, None).is_none());
    }

    #[test]
    fn test_prometheus_text_has_component_prefix() {
        let stats = ProcessingStats::new("hl7_reader", 10).unwrap();
        stats.record("built", 1, Some(42));
        let text = stats.prometheus_text().unwrap();
        assert!(text.contains("hl7_reader_records_total 1"));
        assert!(text.contains("hl7_reader_last_sequence 42"));
        assert!(text.contains("outcome=\"built\""));
    }
}
