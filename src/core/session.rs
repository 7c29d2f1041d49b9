use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::comparator::{KeywordScorer, LlmScorer, SuitabilityScorer};
use super::errors::{CoreError, DocumentProcessingError, FailureKind};
use super::extraction::DocumentExtractor;
use super::gemini_client::GenerativeModel;
use super::models::{
    FileFailure, JobRequirements, MatchResult, RunReport, RunState, RuntimeSettings,
    ScorerBackend, UploadedFile,
};
use super::ranking::rank;

#[derive(Debug, Clone)]
pub enum RunEvent {
    /// One more CV finished, successfully or not.
    Progress {
        processed: usize,
        total: usize,
        file_name: String,
    },
    Completed(RunReport),
}

#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub run_id: u64,
    pub event: RunEvent,
}

enum CvOutcome {
    Scored(MatchResult),
    Failed(FileFailure),
    Skipped,
}

/// Extraction, scoring and ranking for one job ad and its CVs.
pub struct MatchPipeline {
    extractor: DocumentExtractor,
    scorer: Arc<dyn SuitabilityScorer>,
    max_concurrency: usize,
}

impl MatchPipeline {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        scorer: Arc<dyn SuitabilityScorer>,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            extractor: DocumentExtractor::new(model, settings),
            scorer,
            max_concurrency: settings.max_concurrent_requests.max(1),
        }
    }

    /// Picks the scorer named by `settings.scorer`.
    pub fn from_settings(model: Arc<dyn GenerativeModel>, settings: &RuntimeSettings) -> Self {
        let scorer: Arc<dyn SuitabilityScorer> = match settings.scorer {
            ScorerBackend::Llm => Arc::new(LlmScorer::new(Arc::clone(&model))),
            ScorerBackend::Keyword => Arc::new(KeywordScorer),
        };
        Self::new(model, scorer, settings)
    }

    /// Runs the whole pipeline. Per-CV failures end up in the report; only a
    /// failed job ad fails the run. CVs not yet started when `cancel` fires
    /// are skipped.
    pub async fn run(
        &self,
        run_id: u64,
        job_ad: &UploadedFile,
        cvs: &[UploadedFile],
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<WorkerMessage>,
    ) -> RunReport {
        let started_at = Utc::now();
        let total_files = cvs.len() + 1;
        info!(run_id, job_ad = %job_ad.file_name, cvs = cvs.len(), "match run started");

        let job = match self.extractor.extract_job_requirements(job_ad).await {
            Ok(job) => job,
            Err(err) => {
                warn!(run_id, "job advertisement failed: {err}");
                return finish_report(
                    run_id,
                    RunState::Failed,
                    None,
                    Vec::new(),
                    vec![FileFailure::from_error(&err, None)],
                    total_files,
                    started_at,
                );
            }
        };

        let mut outcomes = stream::iter(cvs.iter().cloned().enumerate())
            .map(|(index, file)| self.process_cv(run_id, &job, file, index, cancel))
            .buffer_unordered(self.max_concurrency);

        let mut results = Vec::new();
        let mut failures = Vec::new();
        let mut processed = 0_usize;
        while let Some((file_name, outcome)) = outcomes.next().await {
            match outcome {
                CvOutcome::Scored(result) => results.push(result),
                CvOutcome::Failed(failure) => failures.push(failure),
                CvOutcome::Skipped => continue,
            }

            processed += 1;
            let _ = events.send(WorkerMessage {
                run_id,
                event: RunEvent::Progress {
                    processed,
                    total: cvs.len(),
                    file_name,
                },
            });
        }
        drop(outcomes);

        if cancel.is_cancelled() {
            debug!(run_id, skipped = cvs.len() - processed, "run cancelled");
        }

        failures.sort_by_key(|failure| failure.upload_index);
        let report = finish_report(
            run_id,
            RunState::Completed,
            Some(job),
            results,
            failures,
            total_files,
            started_at,
        );
        info!(
            run_id,
            ranked = report.ranked.len(),
            failed = report.failures.len(),
            duration_seconds = report.duration_seconds,
            "match run completed"
        );
        report
    }

    async fn process_cv(
        &self,
        run_id: u64,
        job: &JobRequirements,
        file: UploadedFile,
        upload_index: usize,
        cancel: &CancellationToken,
    ) -> (String, CvOutcome) {
        if cancel.is_cancelled() {
            return (file.file_name, CvOutcome::Skipped);
        }

        let outcome = match self.evaluate(job, &file, upload_index).await {
            Ok(result) => CvOutcome::Scored(result),
            Err(err) => {
                warn!(run_id, "{err}");
                if let Some(raw_text) = err.raw_text() {
                    debug!(run_id, file_name = %err.file_name, raw_text, "unrecoverable model reply");
                }
                CvOutcome::Failed(FileFailure::from_error(&err, Some(upload_index)))
            }
        };
        (file.file_name, outcome)
    }

    async fn evaluate(
        &self,
        job: &JobRequirements,
        file: &UploadedFile,
        upload_index: usize,
    ) -> Result<MatchResult, DocumentProcessingError> {
        let profile = self
            .extractor
            .extract_candidate_profile(file, upload_index)
            .await?;

        self.scorer
            .score(job, &profile)
            .await
            .map_err(|err| DocumentProcessingError::new(&file.file_name, err))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn finish_report(
    run_id: u64,
    status: RunState,
    job: Option<JobRequirements>,
    results: Vec<MatchResult>,
    failures: Vec<FileFailure>,
    total_files: usize,
    started_at: DateTime<Utc>,
) -> RunReport {
    let completed_at = Utc::now();
    RunReport {
        run_id,
        status,
        job,
        ranked: rank(results),
        failures,
        total_files,
        started_at,
        completed_at,
        duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
    }
}

/// Owns the selected files and coordinates runs on background tasks.
///
/// Only the latest run is live: starting another run, loading new files or
/// resetting cancels it, and anything it still sends is dropped on receipt.
pub struct MatchingSession {
    pipeline: Arc<MatchPipeline>,
    job_ad: Option<UploadedFile>,
    cvs: Vec<UploadedFile>,
    state: RunState,
    next_run_id: u64,
    active_run: Option<u64>,
    cancel: Option<CancellationToken>,
    latest_report: Option<RunReport>,
    events_tx: mpsc::UnboundedSender<WorkerMessage>,
    events_rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl MatchingSession {
    pub fn new(pipeline: Arc<MatchPipeline>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            pipeline,
            job_ad: None,
            cvs: Vec::new(),
            state: RunState::Idle,
            next_run_id: 1,
            active_run: None,
            cancel: None,
            latest_report: None,
            events_tx,
            events_rx,
        }
    }

    pub fn set_job_ad(&mut self, file: UploadedFile) {
        self.invalidate();
        self.job_ad = Some(file);
    }

    pub fn set_cvs(&mut self, files: Vec<UploadedFile>) {
        self.invalidate();
        self.cvs = files;
    }

    pub fn reset(&mut self) {
        self.invalidate();
        self.job_ad = None;
        self.cvs.clear();
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn active_run(&self) -> Option<u64> {
        self.active_run
    }

    pub fn latest_report(&self) -> Option<&RunReport> {
        self.latest_report.as_ref()
    }

    /// Starts a run over the current files and returns its id.
    pub fn start_run(&mut self) -> Result<u64, CoreError> {
        let job_ad = self
            .job_ad
            .clone()
            .ok_or_else(|| CoreError::InvalidRequest("a job advertisement is required".to_string()))?;
        if self.cvs.is_empty() {
            return Err(CoreError::InvalidRequest(
                "at least one CV is required".to_string(),
            ));
        }

        self.invalidate();
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let token = CancellationToken::new();
        self.active_run = Some(run_id);
        self.cancel = Some(token.clone());
        self.state = RunState::Processing;

        let pipeline = Arc::clone(&self.pipeline);
        let cvs = self.cvs.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let started_at = Utc::now();
            let report = match AssertUnwindSafe(pipeline.run(run_id, &job_ad, &cvs, &token, &events))
                .catch_unwind()
                .await
            {
                Ok(report) => report,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(run_id, "match worker panicked: {message}");
                    finish_report(
                        run_id,
                        RunState::Failed,
                        None,
                        Vec::new(),
                        vec![FileFailure {
                            file_name: job_ad.file_name.clone(),
                            upload_index: None,
                            kind: FailureKind::Internal,
                            message: format!("match worker panicked: {message}"),
                        }],
                        cvs.len() + 1,
                        started_at,
                    )
                }
            };
            let _ = events.send(WorkerMessage {
                run_id,
                event: RunEvent::Completed(report),
            });
        });

        Ok(run_id)
    }

    /// Waits for the next event of the active run. Returns `None` when no
    /// run is active.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        while self.active_run.is_some() {
            let message = self.events_rx.recv().await?;
            if let Some(event) = self.accept(message) {
                return Some(event);
            }
        }
        None
    }

    pub async fn wait_for_report(&mut self) -> Option<RunReport> {
        while let Some(event) = self.next_event().await {
            if let RunEvent::Completed(report) = event {
                return Some(report);
            }
        }
        None
    }

    /// Non-blocking drain for callers that poll.
    pub fn try_drain(&mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.events_rx.try_recv() {
            if let Some(event) = self.accept(message) {
                events.push(event);
            }
        }
        events
    }

    fn accept(&mut self, message: WorkerMessage) -> Option<RunEvent> {
        if self.active_run != Some(message.run_id) {
            debug!(run_id = message.run_id, "discarding message from stale run");
            return None;
        }

        if let RunEvent::Completed(report) = &message.event {
            self.state = report.status;
            self.latest_report = Some(report.clone());
            self.active_run = None;
            self.cancel = None;
        }
        Some(message.event)
    }

    fn invalidate(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(run_id) = self.active_run.take() {
            debug!(run_id, "run superseded");
        }
        self.state = RunState::Idle;
        self.latest_report = None;
    }
}
