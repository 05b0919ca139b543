//! Operational metrics of the consumer.
//!
//! Metrics are registered on an explicitly constructed [`Registry`]: there is no global
//! registry, the caller decides where (and whether) metrics are exposed.
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};

/// Buckets for the size of message payloads, in bytes.
const MESSAGE_SIZE_BUCKETS: [f64; 8] = [64., 128., 256., 512., 1024., 2048., 4096., 8192.];

/// Where the consumer records its observations.
///
/// All methods can be invoked concurrently: the consume loop and the queue depth monitor
/// run on separate schedules.
pub trait MetricsSink: Send + Sync + 'static {
    fn increment_processed(&self);

    fn increment_failed(&self);

    fn observe_processing_seconds(&self, seconds: f64);

    fn observe_message_size_bytes(&self, bytes: f64);

    /// Record the last observed number of messages in the queue.
    fn set_queue_depth(&self, depth: f64);
}

/// [`MetricsSink`] backed by Prometheus metrics.
#[derive(Clone)]
pub struct PrometheusMetrics {
    messages_processed: IntCounter,
    messages_failed: IntCounter,
    processing_duration: Histogram,
    message_size: Histogram,
    queue_size: Gauge,
}

impl PrometheusMetrics {
    /// Create the consumer metrics and register them on `registry`.
    ///
    /// Fails if metrics with the same fully qualified names are already registered.
    pub fn new(
        registry: &Registry,
        namespace: &str,
        subsystem: &str,
    ) -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(namespace)
                .subsystem(subsystem)
        };
        let histogram_opts = |name: &str, help: &str| {
            HistogramOpts::new(name, help)
                .namespace(namespace)
                .subsystem(subsystem)
        };

        let messages_processed = IntCounter::with_opts(opts(
            "messages_processed_total",
            "The total number of processed messages",
        ))?;
        registry.register(Box::new(messages_processed.clone()))?;

        let messages_failed = IntCounter::with_opts(opts(
            "messages_failed_total",
            "The total number of failed messages",
        ))?;
        registry.register(Box::new(messages_failed.clone()))?;

        let processing_duration = Histogram::with_opts(histogram_opts(
            "message_processing_duration_seconds",
            "The time spent processing messages",
        ))?;
        registry.register(Box::new(processing_duration.clone()))?;

        let message_size = Histogram::with_opts(
            histogram_opts("message_size_bytes", "The size of processed messages in bytes")
                .buckets(MESSAGE_SIZE_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(message_size.clone()))?;

        let queue_size = Gauge::with_opts(opts(
            "queue_size",
            "The current number of messages in the queue",
        ))?;
        registry.register(Box::new(queue_size.clone()))?;

        Ok(Self {
            messages_processed,
            messages_failed,
            processing_duration,
            message_size,
            queue_size,
        })
    }

    pub fn processed_total(&self) -> u64 {
        self.messages_processed.get()
    }

    pub fn failed_total(&self) -> u64 {
        self.messages_failed.get()
    }

    pub fn queue_depth(&self) -> f64 {
        self.queue_size.get()
    }

    /// Number of processing durations observed so far.
    pub fn processing_observations(&self) -> u64 {
        self.processing_duration.get_sample_count()
    }

    /// Sum of the processing durations observed so far, in seconds.
    pub fn processing_seconds_total(&self) -> f64 {
        self.processing_duration.get_sample_sum()
    }

    /// Number of message sizes observed so far.
    pub fn size_observations(&self) -> u64 {
        self.message_size.get_sample_count()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn increment_processed(&self) {
        self.messages_processed.inc();
    }

    fn increment_failed(&self) {
        self.messages_failed.inc();
    }

    fn observe_processing_seconds(&self, seconds: f64) {
        self.processing_duration.observe(seconds);
    }

    fn observe_message_size_bytes(&self, bytes: f64) {
        self.message_size.observe(bytes);
    }

    fn set_queue_depth(&self, depth: f64) {
        self.queue_size.set(depth.max(0.));
    }
}

/// Render every metric in `registry` using the Prometheus text exposition format.
pub fn render(registry: &Registry) -> Result<String, anyhow::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
