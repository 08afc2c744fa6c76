//! Wait strategies.

use std::hint;
use std::thread;
use std::time::{Duration, Instant};

use super::traits::{LineWait, TransportError};
use crate::line::{Level, Line, LineDriver};

/// Tight busy poll. Lowest latency; the caller does nothing else meanwhile.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWait;

/// Poll with a yield (or short sleep) between samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldWait {
    /// Pause between samples; zero yields the thread instead.
    pub interval: Duration,
}

impl YieldWait {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

fn poll_until<D, F>(
    driver: &mut D,
    line: Line,
    level: Level,
    timeout: Option<Duration>,
    mut pause: F,
) -> Result<(), TransportError>
where
    D: LineDriver + ?Sized,
    F: FnMut(),
{
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if driver.read(line)? == level {
            return Ok(());
        }
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            return Err(TransportError::Timeout {
                line,
                level,
                timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
            });
        }
        pause();
    }
}

impl LineWait for SpinWait {
    fn wait_for<D: LineDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        line: Line,
        level: Level,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        poll_until(driver, line, level, timeout, hint::spin_loop)
    }

    fn delay(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let start = Instant::now();
        while start.elapsed() < duration {
            hint::spin_loop();
        }
    }
}

impl LineWait for YieldWait {
    fn wait_for<D: LineDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        line: Line,
        level: Level,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        let interval = self.interval;
        poll_until(driver, line, level, timeout, || {
            if interval.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(interval);
            }
        })
    }

    fn delay(&mut self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::{Direction, LineError};

    /// Input clock that flips to high after a fixed number of reads.
    struct CountdownLine {
        reads_left: usize,
    }

    impl LineDriver for CountdownLine {
        fn configure(&mut self, _line: Line, _direction: Direction) -> Result<(), LineError> {
            Ok(())
        }

        fn read(&mut self, _line: Line) -> Result<Level, LineError> {
            if self.reads_left == 0 {
                return Ok(Level::High);
            }
            self.reads_left -= 1;
            Ok(Level::Low)
        }

        fn write(&mut self, _line: Line, _level: Level) -> Result<(), LineError> {
            Ok(())
        }
    }

    #[test]
    fn test_spin_wait_sees_level() {
        let mut line = CountdownLine { reads_left: 50 };
        SpinWait
            .wait_for(&mut line, Line::InputClock, Level::High, None)
            .unwrap();
        assert_eq!(line.reads_left, 0);
    }

    #[test]
    fn test_spin_wait_times_out() {
        let mut line = CountdownLine {
            reads_left: usize::MAX,
        };
        let err = SpinWait
            .wait_for(
                &mut line,
                Line::InputClock,
                Level::High,
                Some(Duration::from_millis(5)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Timeout {
                line: Line::InputClock,
                level: Level::High,
                timeout_ms: 5
            }
        ));
    }

    #[test]
    fn test_zero_timeout_still_samples_once() {
        let mut line = CountdownLine { reads_left: 0 };
        YieldWait::default()
            .wait_for(&mut line, Line::InputClock, Level::High, Some(Duration::ZERO))
            .unwrap();
    }

    #[test]
    fn test_yield_wait_times_out() {
        let mut line = CountdownLine {
            reads_left: usize::MAX,
        };
        let result = YieldWait::new(Duration::from_millis(1)).wait_for(
            &mut line,
            Line::InputData,
            Level::High,
            Some(Duration::from_millis(3)),
        );
        assert!(result.unwrap_err().is_timeout());
    }
}
