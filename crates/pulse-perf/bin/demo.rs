//! End-to-end demo: several producer threads hammer counters, a timer and a
//! histogram, then the main thread flushes and prints the report.

use std::io;
use std::thread;
use std::time::Duration;

const THREADS: usize = 4;
const EVENTS_PER_THREAD: usize = 2_000;

fn main() {
    pulse_perf::init(4, 2, 2).expect("perf init");

    pulse_perf::counter_create("events").expect("counter create");
    pulse_perf::timer_create("wall").expect("timer create");
    pulse_perf::histogram_create("value_dist", &[16, 256, 1024]).expect("histogram create");

    pulse_perf::timer_start("wall").expect("timer start");

    let workers: Vec<_> = (0..THREADS)
        .map(|id| {
            thread::spawn(move || {
                for i in 0..EVENTS_PER_THREAD {
                    pulse_perf::counter_inc("events");
                    let _ = pulse_perf::histogram_record("value_dist", ((id + 1) * i) as u64);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("producer thread");
    }

    thread::sleep(Duration::from_millis(5));
    pulse_perf::timer_stop("wall").expect("timer stop");
    pulse_perf::flush().expect("flush");

    // Saturation drops are expected under this much pressure; the report
    // shows whatever made it through.
    pulse_perf::report(&mut io::stdout()).expect("report");
    pulse_perf::shutdown(None).expect("shutdown");
}
