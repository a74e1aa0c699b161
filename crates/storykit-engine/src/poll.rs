use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::error::StudioError;
use crate::replicate::{Prediction, PredictionApi, PredictionStatus};

pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 60;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How long to keep asking a prediction for its status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollPolicy {
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub prediction: Prediction,
    /// Status requests issued after the prediction was created.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Polls `initial` until it reaches a terminal status or the attempt budget
/// runs out.
///
/// The create response counts as the first observation; every further
/// observation waits `policy.interval` and issues one status request.
/// `on_attempt` sees each refreshed prediction. Transport errors propagate.
pub fn wait_for_prediction<A, F>(
    api: &A,
    initial: Prediction,
    policy: &PollPolicy,
    operation: &str,
    mut on_attempt: F,
) -> Result<PollOutcome>
where
    A: PredictionApi + ?Sized,
    F: FnMut(u32, &Prediction),
{
    let started = Instant::now();
    let mut prediction = initial;
    let mut attempts: u32 = 0;

    while !prediction.status.is_terminal() && attempts < policy.max_attempts {
        if !policy.interval.is_zero() {
            std::thread::sleep(policy.interval);
        }
        attempts += 1;
        prediction = api
            .get_prediction(&prediction.id)
            .with_context(|| format!("{operation}: polling prediction {}", prediction.id))?;
        log::debug!(
            "{operation}: prediction {} is {} (attempt {attempts}/{})",
            prediction.id,
            prediction.status.as_str(),
            policy.max_attempts
        );
        on_attempt(attempts, &prediction);
    }

    let outcome = PollOutcome {
        prediction,
        attempts,
        elapsed: started.elapsed(),
    };
    match outcome.prediction.status {
        PredictionStatus::Succeeded => Ok(outcome),
        PredictionStatus::Failed | PredictionStatus::Canceled => {
            let reason = outcome
                .prediction
                .error_text()
                .unwrap_or_else(|| format!("prediction {}", outcome.prediction.status.as_str()));
            Err(StudioError::PredictionFailed {
                operation: operation.to_string(),
                reason,
            }
            .into())
        }
        _ => Err(StudioError::TimedOut {
            operation: operation.to_string(),
            attempts,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use anyhow::anyhow;
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::replicate::{PredictionTarget, UploadFile};

    struct StatusScript {
        statuses: RefCell<VecDeque<Prediction>>,
        polled: RefCell<u32>,
    }

    impl StatusScript {
        fn new(rows: Vec<Prediction>) -> Self {
            Self {
                statuses: RefCell::new(rows.into()),
                polled: RefCell::new(0),
            }
        }
    }

    impl PredictionApi for StatusScript {
        fn upload_file(&self, _file: UploadFile) -> Result<String> {
            Err(anyhow!("not scripted"))
        }

        fn latest_version(&self, _model: &str) -> Result<String> {
            Err(anyhow!("not scripted"))
        }

        fn create_prediction(
            &self,
            _target: &PredictionTarget,
            _input: &Map<String, Value>,
        ) -> Result<Prediction> {
            Err(anyhow!("not scripted"))
        }

        fn get_prediction(&self, _id: &str) -> Result<Prediction> {
            *self.polled.borrow_mut() += 1;
            self.statuses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow!("status script exhausted"))
        }

        fn download(&self, _url: &str) -> Result<Vec<u8>> {
            Err(anyhow!("not scripted"))
        }
    }

    fn prediction(status: PredictionStatus) -> Prediction {
        Prediction {
            id: "pred-1".to_string(),
            status,
            ..Prediction::default()
        }
    }

    fn instant(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn default_policy_allows_three_minutes() {
        assert_eq!(PollPolicy::default().budget(), Duration::from_secs(180));
    }

    #[test]
    fn already_finished_prediction_skips_polling() -> Result<()> {
        let api = StatusScript::new(Vec::new());
        let mut done = prediction(PredictionStatus::Succeeded);
        done.output = json!(["https://replicate.delivery/out.png"]);
        let outcome = wait_for_prediction(&api, done, &instant(5), "Generation", |_, _| {})?;
        assert_eq!(outcome.attempts, 0);
        assert_eq!(*api.polled.borrow(), 0);
        Ok(())
    }

    #[test]
    fn polls_until_success_and_reports_attempts() -> Result<()> {
        let mut finished = prediction(PredictionStatus::Succeeded);
        finished.output = json!("https://replicate.delivery/out.jpg");
        let api = StatusScript::new(vec![
            prediction(PredictionStatus::Starting),
            prediction(PredictionStatus::Processing),
            finished,
        ]);
        let mut seen = Vec::new();
        let outcome = wait_for_prediction(
            &api,
            prediction(PredictionStatus::Starting),
            &instant(10),
            "Generation",
            |attempt, row| seen.push((attempt, row.status)),
        )?;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.prediction.output, json!("https://replicate.delivery/out.jpg"));
        assert_eq!(
            seen,
            vec![
                (1, PredictionStatus::Starting),
                (2, PredictionStatus::Processing),
                (3, PredictionStatus::Succeeded),
            ]
        );
        Ok(())
    }

    #[test]
    fn times_out_after_max_attempts() {
        let api = StatusScript::new(
            (0..10)
                .map(|_| prediction(PredictionStatus::Processing))
                .collect(),
        );
        let err = wait_for_prediction(
            &api,
            prediction(PredictionStatus::Starting),
            &instant(4),
            "Edit",
            |_, _| {},
        )
        .unwrap_err();
        assert_eq!(*api.polled.borrow(), 4);
        assert_eq!(
            err.downcast_ref::<StudioError>(),
            Some(&StudioError::TimedOut {
                operation: "Edit".to_string(),
                attempts: 4,
            })
        );
    }

    #[test]
    fn failed_prediction_carries_provider_error() {
        let mut failed = prediction(PredictionStatus::Failed);
        failed.error = json!("E005: input flagged");
        let api = StatusScript::new(vec![failed]);
        let err = wait_for_prediction(
            &api,
            prediction(PredictionStatus::Processing),
            &instant(3),
            "Analysis",
            |_, _| {},
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Analysis failed: E005: input flagged");
    }

    #[test]
    fn canceled_prediction_without_error_names_status() {
        let api = StatusScript::new(Vec::new());
        let err = wait_for_prediction(
            &api,
            prediction(PredictionStatus::Canceled),
            &instant(3),
            "Generation",
            |_, _| {},
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Generation failed: prediction canceled");
    }

    #[test]
    fn transport_error_stops_polling() {
        let api = StatusScript::new(vec![prediction(PredictionStatus::Processing)]);
        let err = wait_for_prediction(
            &api,
            prediction(PredictionStatus::Starting),
            &instant(5),
            "Generation",
            |_, _| {},
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("status script exhausted"));
        assert_eq!(*api.polled.borrow(), 2);
    }
}
