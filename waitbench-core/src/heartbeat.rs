//! Heartbeat Units
//!
//! Non-terminating background loops used to show that independent execution
//! contexts keep running. They never touch the measurement engine and stop
//! only when their stop condition is raised.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use waitbench_ipc::HeartbeatUnit;

/// Default ticker interval
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default announcer interval
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

/// Default announcer text
pub const DEFAULT_ANNOUNCEMENT: &str = "task is running";

/// Longest single sleep between stop checks
const STOP_POLL: Duration = Duration::from_millis(50);

/// Shared stop request for units running on threads or pool workers
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A flag that has not been raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every unit watching this flag to stop
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ticker unit with the given interval
pub fn ticker(interval: Duration) -> HeartbeatUnit {
    HeartbeatUnit::Ticker {
        interval_nanos: interval.as_nanos() as u64,
    }
}

/// Announcer unit with the given interval and message
pub fn announcer(interval: Duration, message: impl Into<String>) -> HeartbeatUnit {
    HeartbeatUnit::Announcer {
        interval_nanos: interval.as_nanos() as u64,
        message: message.into(),
    }
}

/// Short label for logs
pub fn unit_name(unit: &HeartbeatUnit) -> &'static str {
    match unit {
        HeartbeatUnit::Ticker { .. } => "ticker",
        HeartbeatUnit::Announcer { .. } => "announcer",
    }
}

/// Line printed by the ticker after `seconds` whole seconds
pub fn ticker_line(seconds: u64) -> String {
    format!("{seconds} seconds elapsed")
}

/// Run `unit` until `should_stop` returns true, writing one line per beat.
///
/// The first beat is written immediately. Beats are scheduled against the
/// unit's own start time so they do not drift.
pub fn run_unit<W, F>(unit: &HeartbeatUnit, out: &mut W, should_stop: F) -> std::io::Result<()>
where
    W: Write,
    F: Fn() -> bool,
{
    let interval = match unit {
        HeartbeatUnit::Ticker { interval_nanos } | HeartbeatUnit::Announcer { interval_nanos, .. } => {
            Duration::from_nanos((*interval_nanos).max(1))
        }
    };

    let start = Instant::now();
    let mut beat: u32 = 0;
    while !should_stop() {
        match unit {
            HeartbeatUnit::Ticker { .. } => {
                writeln!(out, "{}", ticker_line(start.elapsed().as_secs()))?;
            }
            HeartbeatUnit::Announcer { message, .. } => {
                writeln!(out, "{message}")?;
            }
        }
        out.flush()?;

        beat = beat.saturating_add(1);
        let next = start + interval.saturating_mul(beat);
        if !sleep_until(next, &should_stop) {
            break;
        }
    }
    Ok(())
}

/// Sleep until `deadline`; returns false if stopped early.
fn sleep_until<F: Fn() -> bool>(deadline: Instant, should_stop: &F) -> bool {
    loop {
        if should_stop() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(STOP_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Writer that shares its buffer with the test
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn test_ticker_counts_from_zero() {
        let stop = StopFlag::new();
        let buf = SharedBuf::default();

        let handle = {
            let stop = stop.clone();
            let mut out = buf.clone();
            std::thread::spawn(move || run_unit(&ticker(Duration::from_secs(1)), &mut out, || stop.is_raised()))
        };

        std::thread::sleep(Duration::from_millis(1_300));
        stop.raise();
        handle.join().unwrap().unwrap();

        let lines = buf.lines();
        assert_eq!(lines.first().map(String::as_str), Some("0 seconds elapsed"));
        assert!(lines.contains(&"1 seconds elapsed".to_string()), "{lines:?}");
    }

    #[test]
    fn test_announcer_repeats_message() {
        let stop = StopFlag::new();
        let buf = SharedBuf::default();

        let handle = {
            let stop = stop.clone();
            let mut out = buf.clone();
            let unit = announcer(Duration::from_millis(20), "still here");
            std::thread::spawn(move || run_unit(&unit, &mut out, || stop.is_raised()))
        };

        std::thread::sleep(Duration::from_millis(110));
        stop.raise();
        handle.join().unwrap().unwrap();

        let lines = buf.lines();
        assert!(lines.len() >= 3, "{lines:?}");
        assert!(lines.iter().all(|l| l == "still here"));
    }

    #[test]
    fn test_raised_flag_stops_before_first_beat() {
        let stop = StopFlag::new();
        stop.raise();
        let mut out = Vec::new();
        run_unit(&ticker(DEFAULT_TICK_INTERVAL), &mut out, || stop.is_raised()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_unit_names() {
        assert_eq!(unit_name(&ticker(DEFAULT_TICK_INTERVAL)), "ticker");
        assert_eq!(
            unit_name(&announcer(DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_ANNOUNCEMENT)),
            "announcer"
        );
    }
}
