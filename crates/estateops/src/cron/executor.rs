use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;

use super::tracker::{Completion, Failure, JobRunTracker};
use crate::payload::Payload;

/// Result of a job body. Plain counts report themselves as `recordsProcessed`.
pub trait JobOutput: Serialize {
    fn records_processed(&self) -> Option<i64> {
        None
    }
}

macro_rules! count_output {
    ($($t:ty),*) => {
        $(impl JobOutput for $t {
            fn records_processed(&self) -> Option<i64> {
                i64::try_from(*self).ok()
            }
        })*
    };
}

count_output!(i32, i64, u32, u64, usize);

impl JobOutput for () {}

impl JobOutput for Value {
    fn records_processed(&self) -> Option<i64> {
        self.as_i64()
    }
}

/// Runs a unit of work inside exactly one tracked job run.
#[derive(Clone)]
pub struct JobExecutor {
    tracker: JobRunTracker,
}

impl JobExecutor {
    pub fn new(tracker: JobRunTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &JobRunTracker {
        &self.tracker
    }

    /// Starts a run, awaits `work`, then completes or fails the run.
    ///
    /// The work's result or error is returned unchanged; no retry is attempted.
    pub async fn execute<T, F, Fut>(
        &self,
        job_name: &str,
        metadata: Option<Value>,
        work: F,
    ) -> anyhow::Result<T>
    where
        T: JobOutput,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let start_meta = metadata.as_ref().map(Payload::from_json);
        let handle = self.tracker.start(job_name, start_meta.clone()).await;
        tracing::info!(job = job_name, run_id = %handle.id, "job started");

        match work().await {
            Ok(output) => {
                let completion = Completion {
                    message: None,
                    records_processed: output.records_processed(),
                    metadata: Some(completion_metadata(metadata, &output)),
                };
                self.tracker.complete(&handle, completion).await;
                tracing::info!(job = job_name, run_id = %handle.id, "job succeeded");
                Ok(output)
            }
            Err(err) => {
                let failure = Failure {
                    records_processed: None,
                    metadata: start_meta,
                };
                self.tracker.fail(&handle, &err, failure).await;
                tracing::error!(job = job_name, run_id = %handle.id, error = %err, "job failed");
                Err(err)
            }
        }
    }
}

/// Start metadata with the serialized result under `result`.
/// Object results are stored as-is, anything else as `{"value": ..}`.
fn completion_metadata<T: Serialize>(metadata: Option<Value>, output: &T) -> Payload {
    let mut map = match metadata {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("input".into(), other);
            map
        }
    };

    let result = match serde_json::to_value(output) {
        Ok(v @ Value::Object(_)) => v,
        Ok(v) => {
            let mut wrapped = Map::new();
            wrapped.insert("value".into(), v);
            Value::Object(wrapped)
        }
        Err(e) => {
            tracing::warn!(error = %e, "job result is not serializable");
            Value::Null
        }
    };
    map.insert("result".into(), result);
    Payload::from_json(&Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_report_records_processed() {
        assert_eq!(5usize.records_processed(), Some(5));
        assert_eq!(json!(7).records_processed(), Some(7));
        assert_eq!(json!({"total": 7}).records_processed(), None);
        assert_eq!(().records_processed(), None);
    }

    #[test]
    fn result_is_merged_into_start_metadata() {
        let meta = completion_metadata(Some(json!({"trigger": "manual"})), &3u64).to_json();
        assert_eq!(meta, json!({"trigger": "manual", "result": {"value": 3}}));

        let meta = completion_metadata(None, &json!({"total": 2})).to_json();
        assert_eq!(meta, json!({"result": {"total": 2}}));
    }
}
