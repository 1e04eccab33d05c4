use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    operator_rows_in: CounterVec,
    operator_rows_out: CounterVec,
    operator_time_seconds: HistogramVec,
    exchange_bytes_sent: CounterVec,
    exchange_bytes_received: CounterVec,
    exchange_ready_wait_seconds: HistogramVec,
    running_tasks: GaugeVec,
    task_outcomes: CounterVec,
    lock_wait_seconds: HistogramVec,
    txn_outcomes: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_operator(
        &self,
        job_id: u64,
        task_id: u64,
        operator: &str,
        rows_in: u64,
        rows_out: u64,
        secs: f64,
    ) {
        let labels: [&str; 3] = [&job_id.to_string(), &task_id.to_string(), operator];
        self.inner
            .operator_rows_in
            .with_label_values(&labels)
            .inc_by(rows_in as f64);
        self.inner
            .operator_rows_out
            .with_label_values(&labels)
            .inc_by(rows_out as f64);
        self.inner
            .operator_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn record_exchange_sent(&self, job_id: u64, bytes: u64) {
        self.inner
            .exchange_bytes_sent
            .with_label_values(&[&job_id.to_string()])
            .inc_by(bytes as f64);
    }

    pub fn record_exchange_received(&self, job_id: u64, bytes: u64) {
        self.inner
            .exchange_bytes_received
            .with_label_values(&[&job_id.to_string()])
            .inc_by(bytes as f64);
    }

    pub fn record_ready_wait(&self, job_id: u64, secs: f64) {
        self.inner
            .exchange_ready_wait_seconds
            .with_label_values(&[&job_id.to_string()])
            .observe(secs.max(0.0));
    }

    pub fn inc_running_tasks(&self, location: &str) {
        self.inner
            .running_tasks
            .with_label_values(&[location])
            .inc();
    }

    pub fn dec_running_tasks(&self, location: &str) {
        self.inner
            .running_tasks
            .with_label_values(&[location])
            .dec();
    }

    /// `outcome` is one of `finished`, `failed`, `cancelled`.
    pub fn inc_task_outcome(&self, location: &str, outcome: &str) {
        self.inner
            .task_outcomes
            .with_label_values(&[location, outcome])
            .inc();
    }

    pub fn record_lock_wait(&self, mode: &str, secs: f64) {
        self.inner
            .lock_wait_seconds
            .with_label_values(&[mode])
            .observe(secs.max(0.0));
    }

    /// `outcome` is one of `commit`, `rollback`, `conflict`.
    pub fn inc_txn_outcome(&self, outcome: &str) {
        self.inner.txn_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let operator_rows_in = counter_vec(
            &registry,
            "shardex_operator_rows_in_total",
            "Input rows processed per operator",
            &["job_id", "task_id", "operator"],
        );
        let operator_rows_out = counter_vec(
            &registry,
            "shardex_operator_rows_out_total",
            "Output rows produced per operator",
            &["job_id", "task_id", "operator"],
        );
        let operator_time_seconds = histogram_vec(
            &registry,
            "shardex_operator_time_seconds",
            "Time spent in each terminal (send, root) and mutation operator",
            &["job_id", "task_id", "operator"],
        );

        let exchange_bytes_sent = counter_vec(
            &registry,
            "shardex_exchange_bytes_sent_total",
            "Exchange payload bytes written to channels",
            &["job_id"],
        );
        let exchange_bytes_received = counter_vec(
            &registry,
            "shardex_exchange_bytes_received_total",
            "Exchange payload bytes pulled from inbound queues",
            &["job_id"],
        );
        let exchange_ready_wait_seconds = histogram_vec(
            &registry,
            "shardex_exchange_ready_wait_seconds",
            "Time send endpoints spent blocked on a NOT_READY tag",
            &["job_id"],
        );

        let running_tasks = gauge_vec(
            &registry,
            "shardex_running_tasks",
            "Currently running tasks",
            &["location"],
        );
        let task_outcomes = counter_vec(
            &registry,
            "shardex_task_outcomes_total",
            "Finished tasks by outcome",
            &["location", "outcome"],
        );

        let lock_wait_seconds = histogram_vec(
            &registry,
            "shardex_lock_wait_seconds",
            "Time spent acquiring table locks",
            &["mode"],
        );
        let txn_outcomes = counter_vec(
            &registry,
            "shardex_txn_outcomes_total",
            "Finished transactions by outcome",
            &["outcome"],
        );

        Self {
            registry,
            operator_rows_in,
            operator_rows_out,
            operator_time_seconds,
            exchange_bytes_sent,
            exchange_bytes_received,
            exchange_ready_wait_seconds,
            running_tasks,
            task_outcomes,
            lock_wait_seconds,
            txn_outcomes,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.record_operator(1, 0, "PartModify", 10, 1, 0.01);
        let text = m.render_prometheus();
        assert!(text.contains("shardex_operator_rows_out_total"));
        assert!(text.contains("PartModify"));
    }

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.record_operator(1, 2, "Send", 10, 0, 0.02);
        m.record_exchange_sent(1, 1024);
        m.record_exchange_received(1, 1024);
        m.record_ready_wait(1, 0.001);
        m.inc_running_tasks("127.0.0.1:7001");
        m.dec_running_tasks("127.0.0.1:7001");
        m.inc_task_outcome("127.0.0.1:7001", "finished");
        m.record_lock_wait("write", 0.003);
        m.inc_txn_outcome("commit");
        let text = m.render_prometheus();

        assert!(text.contains("shardex_operator_rows_in_total"));
        assert!(text.contains("shardex_operator_time_seconds"));
        assert!(text.contains("shardex_exchange_bytes_sent_total"));
        assert!(text.contains("shardex_exchange_bytes_received_total"));
        assert!(text.contains("shardex_exchange_ready_wait_seconds"));
        assert!(text.contains("shardex_running_tasks"));
        assert!(text.contains("shardex_task_outcomes_total"));
        assert!(text.contains("shardex_lock_wait_seconds"));
        assert!(text.contains("shardex_txn_outcomes_total"));
    }
}
