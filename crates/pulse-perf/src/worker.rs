//! The consumer thread: drains event batches, updates aggregators, returns
//! slots to the pool.

use crate::core::PerfInner;
use crate::event::Event;

/// Worker loop body. Returns when the shutdown sentinel is dispatched.
pub(crate) fn run(inner: &PerfInner) {
    tracing::debug!("perf worker started");
    let mut batch: Vec<u32> = Vec::with_capacity(inner.batcher.batch_size());

    loop {
        inner.batcher.next(&mut batch);
        for &index in &batch {
            let Some(slot) = inner.pool.slot_ptr(index) else {
                tracing::debug!(index, "dropping event with out-of-range slot index");
                continue;
            };

            // Safety: the producer wrote one Event into this slot before
            // enqueuing its index, and the slot stays ours until released.
            let event = unsafe { slot.as_ptr().cast::<Event>().read() };
            dispatch(inner, event);
            inner.pool.release(slot.as_ptr());

            if matches!(event, Event::Shutdown) {
                tracing::debug!("perf worker stopping");
                return;
            }
        }
    }
}

/// Apply one event to its aggregator. Events for unknown indices or absent
/// histograms are dropped; a data event never brings the worker down.
fn dispatch(inner: &PerfInner, event: Event) {
    match event {
        Event::CounterAdd { key, delta } => {
            if let Some(counter) = inner.registry.counter_for_dispatch(key) {
                counter.add(delta);
            } else {
                tracing::debug!(?key, "dropping counter event");
            }
        }
        Event::TimerStart { key } => {
            if let Some(timer) = inner.registry.timer_for_dispatch(key) {
                timer.start(inner.now_ns());
            } else {
                tracing::debug!(?key, "dropping timer start");
            }
        }
        Event::TimerStop { key } => {
            if let Some(timer) = inner.registry.timer_for_dispatch(key) {
                timer.stop(inner.now_ns());
            } else {
                tracing::debug!(?key, "dropping timer stop");
            }
        }
        Event::HistogramRecord { key, sample } => {
            if let Some(histogram) = inner.registry.histogram_for_dispatch(key) {
                histogram.record(sample);
            } else {
                tracing::debug!(?key, "dropping record for absent histogram");
            }
        }
        Event::Shutdown => {}
    }
}
