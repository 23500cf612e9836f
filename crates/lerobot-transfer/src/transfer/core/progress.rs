//! Progress tracking and reporting for transfer operations

use std::sync::Arc;
use std::time::Duration;

use crate::transfer::core::{Direction, UnitRole};

/// Progress callback for transfer operations
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted while a dataset is being moved
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PhaseStarted {
        phase: u8,
        direction: Direction,
        units: usize,
    },
    UnitStarted {
        path: String,
        role: UnitRole,
        attempt: u32,
        size: u64,
    },
    UnitProgress {
        path: String,
        transferred: u64,
        total: u64,
        speed_bps: f64,
    },
    UnitCompleted {
        path: String,
        bytes: u64,
    },
    RetryAttempt {
        path: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    LocationRenegotiated {
        path: String,
    },
    ValidationComplete {
        path: String,
        valid: bool,
    },
    UnitFailed {
        path: String,
        reason: String,
    },
    UnitSkipped {
        path: String,
        reason: String,
    },
    Warning {
        path: String,
        message: String,
    },
}

/// Trait for progress reporting with more granular control
pub trait ProgressReporter: Send + Sync {
    fn on_phase_started(&self, _phase: u8, _direction: Direction, _units: usize) {}
    fn on_unit_started(&self, _path: &str, _role: UnitRole, _attempt: u32, _size: u64) {}
    fn on_unit_progress(&self, _path: &str, _transferred: u64, _total: u64, _speed_bps: f64) {}
    fn on_unit_completed(&self, _path: &str, _bytes: u64) {}
    fn on_retry_attempt(&self, _path: &str, _attempt: u32, _max_attempts: u32, _delay: Duration) {}
    fn on_location_renegotiated(&self, _path: &str) {}
    fn on_validation_complete(&self, _path: &str, _valid: bool) {}
    fn on_unit_failed(&self, _path: &str, _reason: &str) {}
    fn on_unit_skipped(&self, _path: &str, _reason: &str) {}
    fn on_warning(&self, _path: &str, _message: &str) {}
}

/// Extension trait to convert ProgressReporter to ProgressCallback
pub trait IntoProgressCallback {
    fn into_callback(self) -> ProgressCallback;
}

impl<T: ProgressReporter + 'static> IntoProgressCallback for T {
    fn into_callback(self) -> ProgressCallback {
        Arc::new(move |event| match event {
            ProgressEvent::PhaseStarted { phase, direction, units } => {
                self.on_phase_started(phase, direction, units);
            }
            ProgressEvent::UnitStarted { path, role, attempt, size } => {
                self.on_unit_started(&path, role, attempt, size);
            }
            ProgressEvent::UnitProgress { path, transferred, total, speed_bps } => {
                self.on_unit_progress(&path, transferred, total, speed_bps);
            }
            ProgressEvent::UnitCompleted { path, bytes } => {
                self.on_unit_completed(&path, bytes);
            }
            ProgressEvent::RetryAttempt { path, attempt, max_attempts, delay } => {
                self.on_retry_attempt(&path, attempt, max_attempts, delay);
            }
            ProgressEvent::LocationRenegotiated { path } => {
                self.on_location_renegotiated(&path);
            }
            ProgressEvent::ValidationComplete { path, valid } => {
                self.on_validation_complete(&path, valid);
            }
            ProgressEvent::UnitFailed { path, reason } => {
                self.on_unit_failed(&path, &reason);
            }
            ProgressEvent::UnitSkipped { path, reason } => {
                self.on_unit_skipped(&path, &reason);
            }
            ProgressEvent::Warning { path, message } => {
                self.on_warning(&path, &message);
            }
        })
    }
}

/// Simple console progress reporter implementation
#[derive(Debug, Default)]
pub struct ConsoleProgressReporter {
    pub verbose: bool,
}

impl ConsoleProgressReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn on_phase_started(&self, phase: u8, direction: Direction, units: usize) {
        let label = if phase == 1 { "metadata" } else { "bulk" };
        println!("== Phase {} ({} {}): {} file(s)", phase, label, direction, units);
    }

    fn on_unit_started(&self, path: &str, role: UnitRole, attempt: u32, size: u64) {
        if self.verbose {
            if attempt > 1 {
                println!("-> {} [{}] attempt {} ({} bytes)", path, role, attempt, size);
            } else {
                println!("-> {} [{}] ({} bytes)", path, role, size);
            }
        }
    }

    fn on_unit_progress(&self, path: &str, transferred: u64, total: u64, speed_bps: f64) {
        if self.verbose && total > 0 {
            let percent = (transferred as f64 / total as f64) * 100.0;
            println!("   {}: {:.1}% ({}/{} bytes, {:.1} MB/s)",
                path, percent, transferred, total, speed_bps / 1_000_000.0);
        }
    }

    fn on_unit_completed(&self, path: &str, bytes: u64) {
        println!("ok  {} ({} bytes)", path, bytes);
    }

    fn on_retry_attempt(&self, path: &str, attempt: u32, max_attempts: u32, delay: Duration) {
        println!("retry {}/{} for {} in {:?}", attempt, max_attempts, path, delay);
    }

    fn on_location_renegotiated(&self, path: &str) {
        if self.verbose {
            println!("   renegotiated location for {}", path);
        }
    }

    fn on_validation_complete(&self, path: &str, valid: bool) {
        if self.verbose || !valid {
            println!("   verify {}: {}", path, if valid { "passed" } else { "FAILED" });
        }
    }

    fn on_unit_failed(&self, path: &str, reason: &str) {
        eprintln!("ERR {}: {}", path, reason);
    }

    fn on_unit_skipped(&self, path: &str, reason: &str) {
        if self.verbose {
            println!("skip {} ({})", path, reason);
        }
    }

    fn on_warning(&self, path: &str, message: &str) {
        eprintln!("warning: {}: {}", path, message);
    }
}

/// Null progress reporter that does nothing
#[derive(Debug, Default)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}

/// Composite progress reporter that forwards events to multiple reporters
pub struct CompositeProgressReporter {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl std::fmt::Debug for CompositeProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeProgressReporter")
            .field("reporters_count", &self.reporters.len())
            .finish()
    }
}

impl CompositeProgressReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn add_reporter<R: ProgressReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for CompositeProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for CompositeProgressReporter {
    fn on_phase_started(&self, phase: u8, direction: Direction, units: usize) {
        for reporter in &self.reporters {
            reporter.on_phase_started(phase, direction, units);
        }
    }

    fn on_unit_started(&self, path: &str, role: UnitRole, attempt: u32, size: u64) {
        for reporter in &self.reporters {
            reporter.on_unit_started(path, role, attempt, size);
        }
    }

    fn on_unit_progress(&self, path: &str, transferred: u64, total: u64, speed_bps: f64) {
        for reporter in &self.reporters {
            reporter.on_unit_progress(path, transferred, total, speed_bps);
        }
    }

    fn on_unit_completed(&self, path: &str, bytes: u64) {
        for reporter in &self.reporters {
            reporter.on_unit_completed(path, bytes);
        }
    }

    fn on_retry_attempt(&self, path: &str, attempt: u32, max_attempts: u32, delay: Duration) {
        for reporter in &self.reporters {
            reporter.on_retry_attempt(path, attempt, max_attempts, delay);
        }
    }

    fn on_location_renegotiated(&self, path: &str) {
        for reporter in &self.reporters {
            reporter.on_location_renegotiated(path);
        }
    }

    fn on_validation_complete(&self, path: &str, valid: bool) {
        for reporter in &self.reporters {
            reporter.on_validation_complete(path, valid);
        }
    }

    fn on_unit_failed(&self, path: &str, reason: &str) {
        for reporter in &self.reporters {
            reporter.on_unit_failed(path, reason);
        }
    }

    fn on_unit_skipped(&self, path: &str, reason: &str) {
        for reporter in &self.reporters {
            reporter.on_unit_skipped(path, reason);
        }
    }

    fn on_warning(&self, path: &str, message: &str) {
        for reporter in &self.reporters {
            reporter.on_warning(path, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        completed: Arc<Mutex<Vec<String>>>,
    }

    impl ProgressReporter for Recorder {
        fn on_unit_completed(&self, path: &str, _bytes: u64) {
            self.completed.lock().unwrap().push(path.to_string());
        }
    }

    #[test]
    fn test_composite_forwards_through_callback() {
        let first = Recorder::default();
        let second = Recorder::default();
        let first_log = first.completed.clone();
        let second_log = second.completed.clone();

        let callback = CompositeProgressReporter::new()
            .add_reporter(first)
            .add_reporter(second)
            .add_reporter(NullProgressReporter)
            .into_callback();

        callback(ProgressEvent::UnitCompleted { path: "meta/info.json".into(), bytes: 10 });
        callback(ProgressEvent::Warning { path: "x".into(), message: "ignored".into() });

        assert_eq!(*first_log.lock().unwrap(), vec!["meta/info.json".to_string()]);
        assert_eq!(*second_log.lock().unwrap(), vec!["meta/info.json".to_string()]);
    }
}
