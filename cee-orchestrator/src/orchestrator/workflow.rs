///! Step execution for a single workflow run
///!
///! A run owns its step results until `finish` seals them into a
///! `ProvisioningResult`. Every step declares whether it is required and
///! which earlier steps it consumes; a step whose dependencies did not
///! complete is recorded as skipped instead of being attempted.

use super::{CancelToken, OrchestratorSettings};
use crate::retry::{call_with_timeout, poll_until_status, retry_with_backoff};
use cee_common::{
    Error, Plane, ProvisioningResult, Result, StepRequirement, StepResult, StepStatus,
    WorkflowState,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CANCELLED: &str = "cancelled";

/// Declaration of one step
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: String,
    pub requirement: StepRequirement,
    pub plane: Plane,
    pub depends_on: Vec<String>,
}

impl StepSpec {
    pub fn required(name: impl Into<String>, plane: Plane) -> Self {
        Self {
            name: name.into(),
            requirement: StepRequirement::Required,
            plane,
            depends_on: Vec::new(),
        }
    }

    pub fn optional(name: impl Into<String>, plane: Plane) -> Self {
        Self {
            requirement: StepRequirement::Optional,
            ..Self::required(name, plane)
        }
    }

    pub fn after(mut self, steps: &[&str]) -> Self {
        self.depends_on.extend(steps.iter().map(|s| s.to_string()));
        self
    }
}

/// What a successful step leaves behind on its result
pub trait StepOutput {
    fn resource_id(&self) -> Option<String>;
}

impl StepOutput for String {
    fn resource_id(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl StepOutput for () {
    fn resource_id(&self) -> Option<String> {
        None
    }
}

pub struct WorkflowRun<'a> {
    run_id: Uuid,
    workflow: &'static str,
    started_at: DateTime<Utc>,
    settings: &'a OrchestratorSettings,
    cancel: &'a CancelToken,
    cancelled: bool,
    steps: Vec<StepResult>,
}

impl<'a> WorkflowRun<'a> {
    pub fn start(
        workflow: &'static str,
        settings: &'a OrchestratorSettings,
        cancel: &'a CancelToken,
    ) -> Self {
        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            workflow = workflow,
            "Workflow {:?} -> {:?}",
            WorkflowState::Pending,
            WorkflowState::Running
        );

        Self {
            run_id,
            workflow,
            started_at: Utc::now(),
            settings,
            cancel,
            cancelled: false,
            steps: Vec::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        self.settings
    }

    /// Why `spec` must not run, if anything
    fn gate(&mut self, spec: &StepSpec) -> Option<String> {
        if self.cancelled || self.cancel.is_cancelled() {
            self.cancelled = true;
            return Some(CANCELLED.to_string());
        }

        spec.depends_on
            .iter()
            .find(|dep| !self.steps.iter().any(|s| &s.step_name == *dep && s.is_ok()))
            .map(|dep| format!("dependency '{}' did not complete", dep))
    }

    fn record(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    fn skip(&mut self, spec: &StepSpec, reason: String) {
        warn!(
            run_id = %self.run_id,
            step = %spec.name,
            reason = %reason,
            "- Step skipped: {}",
            spec.name
        );
        self.record(StepResult {
            step_name: spec.name.clone(),
            requirement: spec.requirement,
            status: StepStatus::Skipped,
            resource_id: None,
            error_kind: None,
            error_detail: Some(reason),
            attempts: 0,
            duration_ms: 0,
        });
    }

    fn complete<T: StepOutput>(
        &mut self,
        spec: &StepSpec,
        result: Result<T>,
        attempts: u32,
        started: Instant,
    ) -> Option<T> {
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                info!(
                    run_id = %self.run_id,
                    step = %spec.name,
                    plane = %spec.plane,
                    attempts = attempts,
                    "✓ Step completed: {}",
                    spec.name
                );
                self.record(StepResult {
                    step_name: spec.name.clone(),
                    requirement: spec.requirement,
                    status: StepStatus::Ok,
                    resource_id: output.resource_id(),
                    error_kind: None,
                    error_detail: None,
                    attempts,
                    duration_ms,
                });
                Some(output)
            }
            Err(e) => {
                if spec.requirement == StepRequirement::Required {
                    error!(
                        run_id = %self.run_id,
                        step = %spec.name,
                        plane = %spec.plane,
                        attempts = attempts,
                        "✗ Required step failed: {} - {}",
                        spec.name,
                        e
                    );
                } else {
                    warn!(
                        run_id = %self.run_id,
                        step = %spec.name,
                        plane = %spec.plane,
                        attempts = attempts,
                        "✗ Optional step failed: {} - {}",
                        spec.name,
                        e
                    );
                }
                self.record(StepResult {
                    step_name: spec.name.clone(),
                    requirement: spec.requirement,
                    status: StepStatus::Failed,
                    resource_id: None,
                    error_kind: Some(e.kind()),
                    error_detail: Some(e.to_string()),
                    attempts,
                    duration_ms,
                });
                None
            }
        }
    }

    /// Run a step that consumes no earlier output
    pub async fn execute<T, F, Fut>(&mut self, spec: StepSpec, timeout: Duration, mut op: F) -> Option<T>
    where
        T: StepOutput,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with(spec, Some(()), timeout, |()| op()).await
    }

    /// Run a step fed by `input`, retrying transient errors only.
    ///
    /// `input` is normally the output of a declared dependency, so it is
    /// present whenever the dependency gate lets the step through.
    pub async fn execute_with<I, T, F, Fut>(
        &mut self,
        spec: StepSpec,
        input: Option<I>,
        timeout: Duration,
        mut op: F,
    ) -> Option<T>
    where
        I: Copy,
        T: StepOutput,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(reason) = self.gate(&spec) {
            self.skip(&spec, reason);
            return None;
        }
        let Some(input) = input else {
            self.skip(&spec, "input unavailable".to_string());
            return None;
        };

        let started = Instant::now();
        let outcome = retry_with_backoff(
            &self.settings.transient_retry,
            &spec.name,
            Error::is_transient,
            || call_with_timeout(timeout, &spec.name, op(input)),
        )
        .await;

        self.complete(&spec, outcome.result, outcome.attempts, started)
    }

    /// Poll a resource until it reports `expected`
    pub async fn poll<'s, F, Fut>(
        &mut self,
        spec: StepSpec,
        resource_id: Option<&'s str>,
        expected: &str,
        failure_states: &[&str],
        timeout: Duration,
        mut fetch_status: F,
    ) -> Option<String>
    where
        F: FnMut(&'s str) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(reason) = self.gate(&spec) {
            self.skip(&spec, reason);
            return None;
        }
        let Some(id) = resource_id else {
            self.skip(&spec, "input unavailable".to_string());
            return None;
        };

        let started = Instant::now();
        let what = format!("{} {}", spec.name, id);
        let outcome = poll_until_status(
            &self.settings.poll,
            &what,
            expected,
            failure_states,
            timeout,
            || fetch_status(id),
        )
        .await;

        // The polled resource is the step's resource
        let result = outcome.result.map(|_| id.to_string());
        self.complete(&spec, result, outcome.attempts, started)
    }

    /// Seal the run
    pub fn finish(self) -> ProvisioningResult {
        let result = ProvisioningResult::finalize(
            self.run_id,
            self.workflow,
            self.steps,
            self.cancelled,
            self.started_at,
        );

        let state = result.state();
        if state == WorkflowState::Completed {
            info!(run_id = %result.run_id, workflow = %result.workflow, "Workflow Running -> {:?}", state);
        } else {
            warn!(
                run_id = %result.run_id,
                workflow = %result.workflow,
                cancelled = result.cancelled,
                "Workflow Running -> {:?}",
                state
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use cee_common::{ErrorKind, OverallStatus};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            transient_retry: RetryPolicy::with_max_attempts(3, Duration::from_millis(1)).without_jitter(),
            ..OrchestratorSettings::default()
        }
    }

    #[tokio::test]
    async fn test_dependents_of_failed_step_are_skipped() {
        let settings = settings();
        let cancel = CancelToken::new();
        let mut run = WorkflowRun::start("test", &settings, &cancel);
        let t = Duration::from_secs(1);

        let a: Option<String> = run
            .execute(StepSpec::required("a", Plane::Compute), t, || async {
                Err(Error::QuotaExceeded("cores".to_string()))
            })
            .await;
        run.execute_with(StepSpec::required("b", Plane::Compute).after(&["a"]), a.as_deref(), t, |_| async {
            Ok::<_, Error>(())
        })
        .await;
        run.execute(StepSpec::required("c", Plane::Storage), t, || async { Ok::<_, Error>("vol-1".to_string()) })
            .await;

        let result = run.finish();
        assert_eq!(result.overall_status, OverallStatus::Failed);
        assert_eq!(result.steps[0].error_kind, Some(ErrorKind::QuotaExceeded));
        assert_eq!(result.steps[1].status, StepStatus::Skipped);
        assert_eq!(result.steps[2].status, StepStatus::Ok);
        assert_eq!(result.resource_id("c"), Some("vol-1"));
    }

    #[tokio::test]
    async fn test_transient_error_retried_within_step() {
        let settings = settings();
        let cancel = CancelToken::new();
        let mut run = WorkflowRun::start("test", &settings, &cancel);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        run.execute(StepSpec::required("flaky", Plane::Network), Duration::from_secs(1), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::TransientUnavailable("db.sock".to_string()))
            } else {
                Ok(())
            }
        })
        .await;

        let result = run.finish();
        assert_eq!(result.overall_status, OverallStatus::Success);
        assert_eq!(result.steps[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_cancel_skips_remaining_steps() {
        let settings = settings();
        let cancel = CancelToken::new();
        let mut run = WorkflowRun::start("test", &settings, &cancel);
        let t = Duration::from_secs(1);

        run.execute(StepSpec::required("first", Plane::Compute), t, || async { Ok::<_, Error>(()) }).await;
        cancel.cancel();
        run.execute(StepSpec::required("second", Plane::Compute), t, || async { Ok::<_, Error>(()) }).await;
        run.execute(StepSpec::optional("third", Plane::Network), t, || async { Ok::<_, Error>(()) }).await;

        let result = run.finish();
        assert!(result.cancelled);
        assert_eq!(result.overall_status, OverallStatus::Partial);
        assert_eq!(result.steps.len(), 3);
        assert!(result.steps[1..]
            .iter()
            .all(|s| s.status == StepStatus::Skipped && s.error_detail.as_deref() == Some(CANCELLED)));
    }
}
