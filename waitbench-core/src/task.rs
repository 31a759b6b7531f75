//! Wait Tasks
//!
//! The unit of benchmarked work: do nothing for a fixed amount of time.

use crate::measure::Stopwatch;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a wait task
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// The task was configured with a duration it cannot wait for
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Idle work parameterized by a duration in seconds.
///
/// Construction does not validate; [`WaitTask::execute`] rejects a negative or
/// non-finite duration before suspending.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaitTask {
    duration_secs: f64,
}

impl WaitTask {
    /// Create a task that waits `duration_secs` seconds
    pub fn new(duration_secs: f64) -> Self {
        Self { duration_secs }
    }

    /// Create a task from a [`Duration`]
    pub fn from_duration(duration: Duration) -> Self {
        Self::new(duration.as_secs_f64())
    }

    /// Configured wait in seconds
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Check the duration and convert it to a [`Duration`].
    pub fn validate(&self) -> Result<Duration, TaskError> {
        if !self.duration_secs.is_finite() {
            return Err(TaskError::InvalidArgument(format!(
                "wait duration must be finite, got {}",
                self.duration_secs
            )));
        }
        if self.duration_secs < 0.0 {
            return Err(TaskError::InvalidArgument(format!(
                "wait duration must be non-negative, got {}s",
                self.duration_secs
            )));
        }
        Duration::try_from_secs_f64(self.duration_secs)
            .map_err(|e| TaskError::InvalidArgument(e.to_string()))
    }

    /// Block the calling thread for the configured duration.
    ///
    /// Returns the time actually spent waiting.
    pub fn execute(&self) -> Result<Duration, TaskError> {
        let duration = self.validate()?;
        let stopwatch = Stopwatch::start();
        std::thread::sleep(duration);
        Ok(stopwatch.stop())
    }

    /// Suspend the calling future for the configured duration.
    ///
    /// Needs a tokio runtime with the time driver enabled.
    pub async fn execute_async(&self) -> Result<Duration, TaskError> {
        let duration = self.validate()?;
        let stopwatch = Stopwatch::start();
        tokio::time::sleep(duration).await;
        Ok(stopwatch.stop())
    }

    /// Like [`execute_async`](Self::execute_async), then emit one completion message.
    pub async fn execute_announced(&self, task_id: usize) -> Result<Duration, TaskError> {
        let waited = self.execute_async().await?;
        tracing::info!(task_id, waited_ms = waited.as_millis() as u64, "wait finished");
        Ok(waited)
    }
}

/// An ordered sequence of wait tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskBatch {
    tasks: Vec<WaitTask>,
}

impl TaskBatch {
    /// `count` identical tasks of `duration` each
    pub fn uniform(count: usize, duration: Duration) -> Self {
        Self {
            tasks: vec![WaitTask::from_duration(duration); count],
        }
    }

    /// Batch from explicit tasks, kept in the given order
    pub fn from_tasks(tasks: Vec<WaitTask>) -> Self {
        Self { tasks }
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the batch has no tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in submission order
    pub fn tasks(&self) -> &[WaitTask] {
        &self.tasks
    }

    /// Iterate tasks in submission order
    pub fn iter(&self) -> std::slice::Iter<'_, WaitTask> {
        self.tasks.iter()
    }

    /// Sum of all task durations, the time a sequential run needs
    pub fn total_wait_secs(&self) -> f64 {
        self.tasks.iter().map(|t| t.duration_secs).sum()
    }

    /// Reject the batch if any task is invalid, reporting the first offender.
    pub fn validate(&self) -> Result<(), (usize, TaskError)> {
        for (index, task) in self.tasks.iter().enumerate() {
            task.validate().map_err(|e| (index, e))?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a TaskBatch {
    type Item = &'a WaitTask;
    type IntoIter = std::slice::Iter<'a, WaitTask>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_waits() {
        let task = WaitTask::new(0.02);
        let waited = task.execute().unwrap();
        assert!(waited >= Duration::from_millis(20));
        assert!(waited < Duration::from_millis(200));
    }

    #[test]
    fn test_zero_duration_is_valid() {
        let waited = WaitTask::new(0.0).execute().unwrap();
        assert!(waited < Duration::from_millis(50));
    }

    #[test]
    fn test_negative_duration_rejected_before_waiting() {
        let stopwatch = Stopwatch::start();
        let err = WaitTask::new(-1.0).execute().unwrap_err();
        assert!(matches!(err, TaskError::InvalidArgument(_)));
        // Never slept: a 1s wait would be visible here.
        assert!(stopwatch.stop() < Duration::from_millis(50));
    }

    #[test]
    fn test_nan_duration_rejected() {
        assert!(WaitTask::new(f64::NAN).validate().is_err());
        assert!(WaitTask::new(f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_execute_async_waits() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let waited = rt
            .block_on(WaitTask::new(0.02).execute_async())
            .unwrap();
        assert!(waited >= Duration::from_millis(20));
    }

    #[test]
    fn test_execute_async_rejects_negative() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let result = rt.block_on(WaitTask::new(-0.5).execute_announced(0));
        assert!(matches!(result, Err(TaskError::InvalidArgument(_))));
    }

    #[test]
    fn test_uniform_batch() {
        let batch = TaskBatch::uniform(10, Duration::from_secs(1));
        assert_eq!(batch.len(), 10);
        assert!(batch.iter().all(|t| t.duration_secs() == 1.0));
        assert!((batch.total_wait_secs() - 10.0).abs() < f64::EPSILON);
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn test_batch_validate_reports_first_invalid() {
        let batch = TaskBatch::from_tasks(vec![
            WaitTask::new(0.1),
            WaitTask::new(-1.0),
            WaitTask::new(-2.0),
        ]);
        let (index, _) = batch.validate().unwrap_err();
        assert_eq!(index, 1);
    }
}
