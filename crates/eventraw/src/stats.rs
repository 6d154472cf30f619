//! Block counters reported through the `metrics` facade.
//!
//! Without an installed recorder every call is a no-op. Disabling the
//! `metrics` feature compiles the calls away entirely.

pub const BLOCKS_BUILT: &str = "sysevent_raw_blocks_built_total";
pub const BLOCKS_DECODED: &str = "sysevent_raw_blocks_decoded_total";
pub const BLOCKS_INVALID: &str = "sysevent_raw_blocks_invalid_total";
pub const PARAMS_DROPPED: &str = "sysevent_raw_params_dropped_total";
pub const BLOCK_SIZE: &str = "sysevent_raw_block_size_bytes";

#[cfg(feature = "metrics")]
pub(crate) fn block_built(size: usize, dropped: usize) {
    metrics::counter!(BLOCKS_BUILT).increment(1);
    if dropped > 0 {
        metrics::counter!(PARAMS_DROPPED).increment(dropped as u64);
    }
    metrics::histogram!(BLOCK_SIZE).record(size as f64);
}

#[cfg(feature = "metrics")]
pub(crate) fn block_decoded(size: usize) {
    metrics::counter!(BLOCKS_DECODED).increment(1);
    metrics::histogram!(BLOCK_SIZE).record(size as f64);
}

#[cfg(feature = "metrics")]
pub(crate) fn block_invalid() {
    metrics::counter!(BLOCKS_INVALID).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn block_built(_size: usize, _dropped: usize) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn block_decoded(_size: usize) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn block_invalid() {}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;
    use crate::builder::EventBuilder;
    use crate::decoded::DecodedEvent;
    use crate::layout::MAX_BLOCK_SIZE;
    use metrics::{
        Counter, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString,
        Unit,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Samples(Mutex<Vec<f64>>);

    impl HistogramFn for Samples {
        fn record(&self, value: f64) {
            self.0.lock().unwrap().push(value);
        }
    }

    #[derive(Default)]
    struct TestRecorder {
        counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
        samples: Arc<Samples>,
    }

    impl TestRecorder {
        fn counter(&self, name: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(name)
                .map(|c| c.load(Ordering::Relaxed))
                .unwrap_or(0)
        }
    }

    impl Recorder for TestRecorder {
        fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

        fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

        fn describe_histogram(
            &self,
            _key: KeyName,
            _unit: Option<Unit>,
            _description: SharedString,
        ) {
        }

        fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
            let handle = self
                .counters
                .lock()
                .unwrap()
                .entry(key.name().to_string())
                .or_default()
                .clone();
            Counter::from_arc(handle)
        }

        fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
            Histogram::from_arc(self.samples.clone())
        }
    }

    #[test]
    fn test_build_and_decode_counters() {
        let recorder = TestRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            let mut b = EventBuilder::with_base("D", "N", 1);
            b.append_value("OK", 1u64)
                .append_value("TOO_BIG", "x".repeat(MAX_BLOCK_SIZE));
            let block = b.build();
            DecodedEvent::parse(block.as_bytes()).unwrap();
            assert!(DecodedEvent::parse(&[0, 0]).is_err());
        });

        assert_eq!(recorder.counter(BLOCKS_BUILT), 1);
        assert_eq!(recorder.counter(PARAMS_DROPPED), 1);
        assert_eq!(recorder.counter(BLOCKS_DECODED), 1);
        assert_eq!(recorder.counter(BLOCKS_INVALID), 1);
        let samples = recorder.samples.0.lock().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], samples[1]);
    }
}
