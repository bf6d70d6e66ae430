//! Metrics definitions for request capture.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS_TRACKED: MetricDef = MetricDef {
    name: "requests.tracked",
    metric_type: MetricType::Counter,
    description: "Number of requests that entered the correlation cache",
};

pub const REQUESTS_FINALIZED: MetricDef = MetricDef {
    name: "requests.finalized",
    metric_type: MetricType::Counter,
    description: "Number of completed requests handed to the log writer",
};

pub const REQUESTS_DISCARDED: MetricDef = MetricDef {
    name: "requests.discarded",
    metric_type: MetricType::Counter,
    description: "Number of in-flight requests dropped after an error notification",
};

pub const REQUESTS_EXPIRED: MetricDef = MetricDef {
    name: "requests.expired",
    metric_type: MetricType::Counter,
    description: "Number of in-flight requests reclaimed by the TTL sweeper",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently held in the correlation cache",
};

pub const BODY_TRUNCATED: MetricDef = MetricDef {
    name: "body.truncated",
    metric_type: MetricType::Counter,
    description: "Number of request bodies cut at the capture ceiling",
};

pub const LOG_APPENDED: MetricDef = MetricDef {
    name: "log.appended",
    metric_type: MetricType::Counter,
    description: "Number of entries committed to the durable log",
};

pub const LOG_EVICTED: MetricDef = MetricDef {
    name: "log.evicted",
    metric_type: MetricType::Counter,
    description: "Number of oldest entries dropped to respect the retention bound",
};

pub const LOG_WRITE_FAILED: MetricDef = MetricDef {
    name: "log.write_failed",
    metric_type: MetricType::Counter,
    description: "Number of appends or resets that failed to reach the store",
};

pub const LOG_APPEND_DURATION: MetricDef = MetricDef {
    name: "log.append.duration",
    metric_type: MetricType::Histogram,
    description: "Time to read, trim and write back the log in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS_TRACKED,
    REQUESTS_FINALIZED,
    REQUESTS_DISCARDED,
    REQUESTS_EXPIRED,
    REQUESTS_INFLIGHT,
    BODY_TRUNCATED,
    LOG_APPENDED,
    LOG_EVICTED,
    LOG_WRITE_FAILED,
    LOG_APPEND_DURATION,
];
