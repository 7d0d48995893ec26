use crate::concurrency::CancelToken;
use crate::CoreError;
use igloo_runtime::Backend;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Status probe run inside the guest.
pub const PROBE: &[&str] = &["cloud-init", "status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    Pending,
    Done,
    Error,
}

impl ReadinessState {
    /// Substring match on free-form status text. `done` is checked first,
    /// so output mentioning both words counts as done.
    pub fn classify(output: &str) -> Self {
        if output.contains("done") {
            Self::Done
        } else if output.contains("error") {
            Self::Error
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

impl ReadinessOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, CoreError> {
        let opts = Self { interval, timeout };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval.is_zero() {
            return Err(CoreError::InvalidOptions(
                "poll interval must be greater than zero".to_owned(),
            ));
        }
        if self.interval >= self.timeout {
            return Err(CoreError::InvalidOptions(format!(
                "poll interval ({}ms) must be less than timeout ({}ms)",
                self.interval.as_millis(),
                self.timeout.as_millis()
            )));
        }
        Ok(())
    }
}

/// Poll the guest until its boot agent reports done, reports an error, or
/// `opts.timeout` elapses.
///
/// A failing probe (guest not reachable yet) counts as pending. A reported
/// error is terminal and not retried.
pub fn wait_for_ready(
    backend: &dyn Backend,
    instance: &str,
    opts: &ReadinessOptions,
    cancel: &CancelToken,
) -> Result<(), CoreError> {
    opts.validate()?;
    let deadline = Instant::now() + opts.timeout;
    let mut attempts = 0u32;
    loop {
        cancel.check()?;
        attempts += 1;
        match backend.exec_capture(instance, PROBE) {
            Ok(output) => {
                let status = output.trim();
                match ReadinessState::classify(status) {
                    ReadinessState::Done => {
                        debug!("{instance} ready after {attempts} probe(s)");
                        return Ok(());
                    }
                    ReadinessState::Error => {
                        return Err(CoreError::GuestReportedError(status.to_owned()));
                    }
                    ReadinessState::Pending => debug!("{instance} pending: {status}"),
                }
            }
            Err(e) => debug!("{instance} not reachable yet: {e}"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CoreError::ReadinessTimeout(opts.timeout));
        }
        cancel.sleep(opts.interval.min(deadline - now))?;
    }
}
