use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rebound_core::domain::{JobFailure, JobId, PolicyKey, ReboundError, StorageError};
use rebound_core::impls::InMemoryStorage;
use rebound_core::policy::{RETRIES_SET, RETRY_COUNT_PARAMETER, save_override};
use rebound_core::ports::JobParameterStore;
use rebound_core::{PolicySettings, RuntimeSettings, StatePipeline};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: String,
}

#[async_trait]
trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn execute(&self, payload: &serde_json::Value) -> Result<(), JobFailure>;
}

/// Fails the first `n` runs, then sends.
struct EmailHandler {
    remaining_failures: AtomicU32,
}

impl EmailHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl JobHandler for EmailHandler {
    fn job_type(&self) -> &'static str {
        "email-job"
    }

    async fn execute(&self, payload: &serde_json::Value) -> Result<(), JobFailure> {
        let p = EmailPayload::deserialize(payload).map_err(|e| JobFailure::from_error(&e))?;

        if let Ok(left) = self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        {
            return Err(JobFailure::new("SmtpError", format!("smtp timeout (left={left})")));
        }

        println!("sent mail to {}", p.to);
        Ok(())
    }
}

/// Never succeeds.
struct ReportHandler;

#[async_trait]
impl JobHandler for ReportHandler {
    fn job_type(&self) -> &'static str {
        "report-job"
    }

    async fn execute(&self, _payload: &serde_json::Value) -> Result<(), JobFailure> {
        Err(JobFailure::new("ReportError", "upstream warehouse is read-only"))
    }
}

type Pipelines = HashMap<String, StatePipeline<InMemoryStorage>>;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn demo_settings() -> RuntimeSettings {
    let mut email = PolicySettings::new("email-job");
    email.attempts = Some(5);

    let mut report = PolicySettings::new("report-job");
    report.attempts = Some(1);
    report.delays_in_seconds = Some(vec![1]);
    report.on_attempts_exceeded = rebound_core::AttemptsExceededAction::Delete;

    RuntimeSettings {
        policies: vec![email, report],
        expiration_days: Some(7),
    }
}

/// worker：pipeline と handler をつなぐ接着剤
async fn worker_loop(
    storage: Arc<InMemoryStorage>,
    pipelines: Arc<Pipelines>,
    handlers: Arc<HashMap<&'static str, Arc<dyn JobHandler>>>,
) -> Result<(), ReboundError> {
    while storage.has_pending_jobs() {
        // 1) 期限の来たリトライをキューに戻す
        for (job_type, pipeline) in pipelines.iter() {
            pipeline.promote_due(job_type)?;
        }

        // 2) 実行できるジョブを 1 件取る
        let Some(record) = storage
            .enqueued_jobs()
            .first()
            .and_then(|job_id| storage.job(*job_id))
        else {
            sleep(POLL_INTERVAL).await;
            continue;
        };
        let Some(pipeline) = pipelines.get(&record.job_type) else {
            return Err(StorageError::Unavailable(format!(
                "no pipeline for job type {}",
                record.job_type
            ))
            .into());
        };

        // 3) 実行して結果で状態を更新（リトライ判定は policy 側）
        pipeline.start_processing(record.job_id)?;
        let result = match handlers.get(record.job_type.as_str()) {
            Some(handler) => handler.execute(&record.payload).await,
            None => Err(JobFailure::new("UnknownJobType", record.job_type.clone())),
        };
        let state = match result {
            Ok(()) => pipeline.succeed(record.job_id)?,
            Err(failure) => pipeline.fail_job(record.job_id, failure)?,
        };
        info!(job_id = %record.job_id, state = %state.name(), "job run finished");
    }
    Ok(())
}

fn report(storage: &InMemoryStorage, job_id: JobId) -> Result<(), ReboundError> {
    let Some(record) = storage.job(job_id) else {
        println!("{job_id}: gone");
        return Ok(());
    };
    let retries = storage.get_job_parameter(job_id, RETRY_COUNT_PARAMETER)?;
    println!(
        "{job_id}: type={} state={} retries={} reason={:?}",
        record.job_type,
        record.state.name(),
        retries.as_deref().unwrap_or("0"),
        record.state.reason(),
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ReboundError> {
    init_tracing();

    // (A) 設定を読む（引数がなければデモ設定）
    let settings = match std::env::args().nth(1) {
        Some(path) => RuntimeSettings::load(path)?,
        None => demo_settings(),
    };

    // (B) 永続化された上書き設定を先に書いておく（運用者が hash を編集した想定）
    let storage = Arc::new(InMemoryStorage::new());
    save_override(storage.as_ref(), &PolicyKey::new("email-job"), 3, Some(vec![0, 1, 2]))?;

    // (C) policy ごとに pipeline を組み立てる
    let expiration = Arc::new(settings.expiration_policy());
    let mut pipelines = Pipelines::new();
    for policy_settings in &settings.policies {
        let policy = policy_settings.build(storage.as_ref())?;
        info!(
            policy_key = %policy.key(),
            attempts = policy.configuration().attempts(),
            delay = ?policy.configuration().delay(),
            "retry policy ready"
        );
        let pipeline = StatePipeline::new(storage.clone())
            .with_filter(Arc::new(policy))
            .with_apply_filter(expiration.clone());
        pipelines.insert(policy_settings.key.clone(), pipeline);
    }

    let handlers: Vec<Arc<dyn JobHandler>> = vec![Arc::new(EmailHandler::new(2)), Arc::new(ReportHandler)];
    let handlers: HashMap<&'static str, Arc<dyn JobHandler>> = handlers
        .into_iter()
        .map(|handler| (handler.job_type(), handler))
        .collect();

    // (D) ジョブ投入
    let jobs = [
        storage.create_job("email-job", serde_json::json!({ "to": "ops@example.com" })),
        storage.create_job("report-job", serde_json::json!({ "day": "2024-03-01" })),
    ];

    // (E) 全ジョブが落ち着くまで worker を回す
    worker_loop(storage.clone(), Arc::new(pipelines), Arc::new(handlers)).await?;

    for job_id in jobs {
        report(&storage, job_id)?;
    }
    println!("retries set: {:?}", storage.set_members(RETRIES_SET));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebound_core::domain::StateName;

    fn pipelines_for(storage: &Arc<InMemoryStorage>, settings: &RuntimeSettings) -> Pipelines {
        settings
            .policies
            .iter()
            .map(|policy_settings| {
                let policy = policy_settings.build(storage.as_ref()).unwrap();
                let pipeline = StatePipeline::new(storage.clone()).with_filter(Arc::new(policy));
                (policy_settings.key.clone(), pipeline)
            })
            .collect()
    }

    #[tokio::test]
    async fn worker_retries_until_jobs_settle() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut email = PolicySettings::new("email-job");
        email.delays_in_seconds = Some(vec![0]);
        email.log_events = false;
        let mut report = PolicySettings::new("report-job");
        report.attempts = Some(1);
        report.delays_in_seconds = Some(vec![0]);
        report.on_attempts_exceeded = rebound_core::AttemptsExceededAction::Delete;
        let settings = RuntimeSettings {
            policies: vec![email, report],
            expiration_days: None,
        };

        let handlers: HashMap<&'static str, Arc<dyn JobHandler>> = HashMap::from([
            ("email-job", Arc::new(EmailHandler::new(2)) as Arc<dyn JobHandler>),
            ("report-job", Arc::new(ReportHandler) as Arc<dyn JobHandler>),
        ]);
        let email_job = storage.create_job("email-job", serde_json::json!({ "to": "a@example.com" }));
        let report_job = storage.create_job("report-job", serde_json::json!({}));

        worker_loop(
            storage.clone(),
            Arc::new(pipelines_for(&storage, &settings)),
            Arc::new(handlers),
        )
        .await
        .unwrap();

        let email = storage.job(email_job).unwrap();
        assert_eq!(email.state.name(), StateName::Succeeded);
        assert_eq!(
            storage.get_job_parameter(email_job, RETRY_COUNT_PARAMETER).unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(storage.job(report_job).unwrap().state.name(), StateName::Deleted);
        assert!(storage.set_members(RETRIES_SET).is_empty());
    }

    #[tokio::test]
    async fn unknown_job_type_is_an_error() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.create_job("mystery-job", serde_json::json!({}));

        let result = worker_loop(storage, Arc::new(Pipelines::new()), Arc::new(HashMap::new())).await;

        assert!(matches!(result, Err(ReboundError::Storage(StorageError::Unavailable(_)))));
    }

    #[tokio::test]
    async fn email_handler_rejects_bad_payloads() {
        let handler = EmailHandler::new(0);

        let failure = handler.execute(&serde_json::json!({ "nope": 1 })).await.unwrap_err();

        assert!(failure.message.contains("to"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn email_handler_fails_exactly_n_times_under_concurrency() {
        let handler = Arc::new(EmailHandler::new(3));
        let payload = serde_json::json!({ "to": "a@example.com" });

        let runs: Vec<_> = (0..16)
            .map(|_| {
                let handler = handler.clone();
                let payload = payload.clone();
                tokio::spawn(async move { handler.execute(&payload).await })
            })
            .collect();

        let mut failures = 0;
        for run in runs {
            if run.await.unwrap().is_err() {
                failures += 1;
            }
        }

        assert_eq!(failures, 3);
        assert_eq!(handler.remaining_failures.load(Ordering::Relaxed), 0);
    }
}
