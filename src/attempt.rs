//! Client-side attempt tracking.
//!
//! [`AttemptSession`] is the synchronous state machine for one pass through a
//! quiz. [`AttemptRunner`] wraps it for async callers: a one-second ticker,
//! user actions and integrity reports all go through one lock, and every
//! submit trigger has to pass [`AttemptSession::begin_submit`], so an attempt
//! sends at most one request at a time and is consumed by exactly one
//! acknowledged submission.

use crate::client::{SubmissionTransport, TransportError};
use crate::grading::UNANSWERED;
use crate::models::{PublicQuiz, Submission};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    Manual,
    Timeout,
    IntegrityViolation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptPhase {
    Loading,
    InProgress,
    Submitting(SubmitTrigger),
    Submitted(Submission),
    /// Only reached when an integrity-triggered submit fails. Answers stay
    /// frozen; a manual submit resends them.
    Failed {
        trigger: SubmitTrigger,
        reason: String,
    },
    Abandoned,
}

impl AttemptPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptPhase::Submitted(_) | AttemptPhase::Failed { .. } | AttemptPhase::Abandoned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error("attempt is already loaded")]
    AlreadyLoaded,
    #[error("quiz has no questions")]
    EmptyQuiz,
    #[error("attempt is not in progress")]
    NotInProgress,
    #[error("question {0} does not exist")]
    QuestionOutOfRange(usize),
    #[error("option {option} does not exist for question {question}")]
    OptionOutOfRange { question: usize, option: usize },
}

/// Body of the submit call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub quiz_id: String,
    pub raw_answers: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub total: usize,
    pub answered: usize,
    pub marked: usize,
    pub visited: usize,
}

#[derive(Debug, Clone)]
pub struct AttemptSession {
    quiz: Option<PublicQuiz>,
    started_at: Option<DateTime<Utc>>,
    selected: Vec<i64>,
    visited: Vec<bool>,
    marked: Vec<bool>,
    current_index: usize,
    remaining_seconds: Option<u32>,
    fullscreen_requested: bool,
    integrity_violated: bool,
    phase: AttemptPhase,
    last_error: Option<String>,
}

impl Default for AttemptSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptSession {
    pub fn new() -> Self {
        Self {
            quiz: None,
            started_at: None,
            selected: Vec::new(),
            visited: Vec::new(),
            marked: Vec::new(),
            current_index: 0,
            remaining_seconds: None,
            fullscreen_requested: false,
            integrity_violated: false,
            phase: AttemptPhase::Loading,
            last_error: None,
        }
    }

    /// Loading -> InProgress once quiz content has arrived.
    pub fn load(&mut self, quiz: PublicQuiz, started_at: DateTime<Utc>) -> Result<(), AttemptError> {
        if self.phase != AttemptPhase::Loading {
            return Err(AttemptError::AlreadyLoaded);
        }
        let count = quiz.questions.len();
        if count == 0 {
            return Err(AttemptError::EmptyQuiz);
        }
        self.selected = vec![UNANSWERED; count];
        self.visited = vec![false; count];
        self.visited[0] = true;
        self.marked = vec![false; count];
        self.current_index = 0;
        self.remaining_seconds = quiz.time_limit_seconds;
        self.started_at = Some(started_at);
        self.quiz = Some(quiz);
        self.phase = AttemptPhase::InProgress;
        Ok(())
    }

    pub fn phase(&self) -> &AttemptPhase {
        &self.phase
    }

    pub fn quiz(&self) -> Option<&PublicQuiz> {
        self.quiz.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn selected(&self) -> &[i64] {
        &self.selected
    }

    pub fn visited(&self) -> &[bool] {
        &self.visited
    }

    pub fn marked(&self) -> &[bool] {
        &self.marked
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        self.remaining_seconds
    }

    pub fn integrity_violated(&self) -> bool {
        self.integrity_violated
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Review of the attempt stays closed after an integrity-triggered
    /// submission failed.
    pub fn is_review_blocked(&self) -> bool {
        matches!(
            self.phase,
            AttemptPhase::Failed {
                trigger: SubmitTrigger::IntegrityViolation,
                ..
            }
        )
    }

    fn ensure_in_progress(&self) -> Result<(), AttemptError> {
        if self.phase == AttemptPhase::InProgress {
            Ok(())
        } else {
            Err(AttemptError::NotInProgress)
        }
    }

    fn option_count(&self, question: usize) -> Result<usize, AttemptError> {
        self.quiz
            .as_ref()
            .and_then(|q| q.questions.get(question))
            .map(|q| q.options.len())
            .ok_or(AttemptError::QuestionOutOfRange(question))
    }

    pub fn select_answer(&mut self, question: usize, option: usize) -> Result<(), AttemptError> {
        self.ensure_in_progress()?;
        if option >= self.option_count(question)? {
            return Err(AttemptError::OptionOutOfRange { question, option });
        }
        self.selected[question] = option as i64;
        Ok(())
    }

    pub fn clear_answer(&mut self, question: usize) -> Result<(), AttemptError> {
        self.ensure_in_progress()?;
        self.option_count(question)?;
        self.selected[question] = UNANSWERED;
        Ok(())
    }

    /// Returns the new mark state.
    pub fn toggle_mark(&mut self, question: usize) -> Result<bool, AttemptError> {
        self.ensure_in_progress()?;
        self.option_count(question)?;
        self.marked[question] = !self.marked[question];
        Ok(self.marked[question])
    }

    /// Moves to `to`, clamped into the question range, and marks the target
    /// visited. Returns the index actually shown.
    pub fn navigate(&mut self, to: i64) -> Result<usize, AttemptError> {
        self.ensure_in_progress()?;
        let last = self.selected.len().saturating_sub(1) as i64;
        let clamped = to.clamp(0, last) as usize;
        self.current_index = clamped;
        self.visited[clamped] = true;
        Ok(clamped)
    }

    pub fn next_question(&mut self) -> Result<usize, AttemptError> {
        self.navigate(self.current_index as i64 + 1)
    }

    pub fn previous_question(&mut self) -> Result<usize, AttemptError> {
        self.navigate(self.current_index as i64 - 1)
    }

    /// Records that the isolated presentation mode was granted, which arms
    /// the integrity trigger.
    pub fn enable_integrity_enforcement(&mut self) -> Result<(), AttemptError> {
        self.ensure_in_progress()?;
        self.fullscreen_requested = true;
        Ok(())
    }

    pub fn integrity_enforced(&self) -> bool {
        self.fullscreen_requested
    }

    /// One elapsed second. Yields [`SubmitTrigger::Timeout`] whenever the
    /// countdown is at zero and the attempt can still submit.
    pub fn tick(&mut self) -> Option<SubmitTrigger> {
        if !matches!(self.phase, AttemptPhase::InProgress | AttemptPhase::Submitting(_)) {
            return None;
        }
        let remaining = self.remaining_seconds.as_mut()?;
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 && self.phase == AttemptPhase::InProgress {
            Some(SubmitTrigger::Timeout)
        } else {
            None
        }
    }

    /// The isolated presentation mode was lost. Ignored unless enforcement
    /// is active and the attempt is still being answered.
    pub fn report_integrity_loss(&mut self) -> Option<SubmitTrigger> {
        if !self.fullscreen_requested || self.phase != AttemptPhase::InProgress {
            return None;
        }
        self.integrity_violated = true;
        Some(SubmitTrigger::IntegrityViolation)
    }

    /// The submission guard. Succeeds once per InProgress period and moves
    /// the attempt to Submitting; every overlapping trigger gets `None`.
    ///
    /// After a failed integrity submit only a manual trigger passes. The
    /// retry keeps the integrity trigger, so another failure locks the
    /// attempt again instead of reopening it for edits.
    pub fn begin_submit(&mut self, trigger: SubmitTrigger) -> Option<SubmitRequest> {
        let next = match (&self.phase, trigger) {
            (AttemptPhase::InProgress, trigger) => trigger,
            (
                AttemptPhase::Failed {
                    trigger: SubmitTrigger::IntegrityViolation,
                    ..
                },
                SubmitTrigger::Manual,
            ) => SubmitTrigger::IntegrityViolation,
            _ => return None,
        };
        let quiz = self.quiz.as_ref()?;
        let request = SubmitRequest {
            quiz_id: quiz.id.clone(),
            raw_answers: self.selected.clone(),
            started_at: self.started_at,
        };
        self.phase = AttemptPhase::Submitting(next);
        self.last_error = None;
        Some(request)
    }

    /// Applies the server's answer to an in-flight submit. Returns false when
    /// nothing was in flight (e.g. the attempt was abandoned meanwhile).
    pub fn finish_submit(&mut self, result: Result<Submission, String>) -> bool {
        let AttemptPhase::Submitting(trigger) = self.phase else {
            return false;
        };
        self.phase = match result {
            Ok(submission) => AttemptPhase::Submitted(submission),
            Err(reason) if trigger == SubmitTrigger::IntegrityViolation => {
                AttemptPhase::Failed { trigger, reason }
            }
            Err(reason) => {
                self.last_error = Some(reason);
                AttemptPhase::InProgress
            }
        };
        true
    }

    /// Drops the attempt without recording anything.
    pub fn abandon(&mut self) -> bool {
        if matches!(
            self.phase,
            AttemptPhase::Loading | AttemptPhase::InProgress | AttemptPhase::Submitting(_)
        ) {
            self.phase = AttemptPhase::Abandoned;
            true
        } else {
            false
        }
    }

    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            total: self.selected.len(),
            answered: self.selected.iter().filter(|v| **v >= 0).count(),
            marked: self.marked.iter().filter(|m| **m).count(),
            visited: self.visited.iter().filter(|v| **v).count(),
        }
    }

    /// Countdown as `HH:MM:SS`.
    pub fn format_remaining(&self) -> Option<String> {
        self.remaining_seconds.map(format_hms)
    }
}

pub fn format_hms(total_seconds: u32) -> String {
    let h = total_seconds / 3600;
    let m = (total_seconds % 3600) / 60;
    let s = total_seconds % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Submitted(Submission),
    /// Another trigger already owns the submission, or the attempt is not
    /// in a state that can submit.
    Suppressed,
    Failed(TransportError),
    Cancelled,
}

/// State shared by the runner handles and the countdown task.
struct RunnerCore {
    session: Mutex<AttemptSession>,
    transport: Arc<dyn SubmissionTransport>,
    cancel_tx: watch::Sender<bool>,
}

/// Owned only by [`AttemptRunner`] handles, never by the countdown task.
/// Dropping the last handle cancels the attempt.
struct RunnerHandle {
    core: Arc<RunnerCore>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
}

impl RunnerHandle {
    fn stop_ticker(&self) {
        if let Some(handle) = self.ticker.lock().ok().and_then(|mut slot| slot.take()) {
            handle.abort();
        }
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.core.cancel_tx.send_replace(true);
        self.stop_ticker();
        if let Ok(mut session) = self.core.session.try_lock() {
            session.abandon();
        }
    }
}

/// Drives an [`AttemptSession`] from async code.
///
/// Clones share one attempt. When every clone is dropped the countdown
/// stops and any in-flight request is cancelled.
#[derive(Clone)]
pub struct AttemptRunner {
    handle: Arc<RunnerHandle>,
    tick_period: Duration,
}

impl AttemptRunner {
    pub fn new(transport: Arc<dyn SubmissionTransport>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let core = Arc::new(RunnerCore {
            session: Mutex::new(AttemptSession::new()),
            transport,
            cancel_tx,
        });
        Self {
            handle: Arc::new(RunnerHandle {
                core,
                ticker: StdMutex::new(None),
            }),
            tick_period: Duration::from_secs(1),
        }
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    fn core(&self) -> &RunnerCore {
        &self.handle.core
    }

    /// Loads the quiz, stamps the start time and starts the countdown for
    /// timed quizzes.
    pub async fn start(&self, quiz: PublicQuiz) -> Result<(), AttemptError> {
        let timed = {
            let mut session = self.core().session.lock().await;
            session.load(quiz, Utc::now())?;
            session.remaining_seconds().is_some()
        };
        if timed {
            self.spawn_ticker();
        }
        Ok(())
    }

    fn spawn_ticker(&self) {
        let core = self.handle.core.clone();
        let period = self.tick_period;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if *core.cancel_tx.borrow() {
                    break;
                }
                core.trigger(|session| session.tick()).await;
                if core.session.lock().await.phase().is_terminal() {
                    break;
                }
            }
        });
        let previous = match self.handle.ticker.lock() {
            Ok(mut slot) => slot.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub async fn snapshot(&self) -> AttemptSession {
        self.core().session.lock().await.clone()
    }

    pub async fn select_answer(&self, question: usize, option: usize) -> Result<(), AttemptError> {
        self.core().session.lock().await.select_answer(question, option)
    }

    pub async fn clear_answer(&self, question: usize) -> Result<(), AttemptError> {
        self.core().session.lock().await.clear_answer(question)
    }

    pub async fn toggle_mark(&self, question: usize) -> Result<bool, AttemptError> {
        self.core().session.lock().await.toggle_mark(question)
    }

    pub async fn navigate(&self, to: i64) -> Result<usize, AttemptError> {
        self.core().session.lock().await.navigate(to)
    }

    pub async fn enable_integrity_enforcement(&self) -> Result<(), AttemptError> {
        self.core().session.lock().await.enable_integrity_enforcement()
    }

    pub async fn submit(&self) -> SubmitOutcome {
        self.core().trigger(|_| Some(SubmitTrigger::Manual)).await
    }

    pub async fn report_integrity_loss(&self) -> SubmitOutcome {
        self.core().trigger(|session| session.report_integrity_loss()).await
    }

    /// Cancels the attempt: stops the countdown and drops any in-flight
    /// request. Nothing is retried.
    pub async fn abandon(&self) -> bool {
        let abandoned = self.core().session.lock().await.abandon();
        self.core().cancel_tx.send_replace(true);
        self.handle.stop_ticker();
        abandoned
    }
}

impl RunnerCore {
    async fn trigger<F>(&self, decide: F) -> SubmitOutcome
    where
        F: FnOnce(&mut AttemptSession) -> Option<SubmitTrigger>,
    {
        let (trigger, request) = {
            let mut session = self.session.lock().await;
            let Some(trigger) = decide(&mut *session) else {
                return SubmitOutcome::Suppressed;
            };
            let Some(request) = session.begin_submit(trigger) else {
                return SubmitOutcome::Suppressed;
            };
            (trigger, request)
        };

        info!(quiz_id = %request.quiz_id, trigger = ?trigger, "sending attempt submission");
        let mut cancel_rx = self.cancel_tx.subscribe();
        let result = tokio::select! {
            result = self.transport.submit(request) => result,
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => return SubmitOutcome::Cancelled,
        };

        let mut session = self.session.lock().await;
        match result {
            Ok(submission) => {
                if !session.finish_submit(Ok(submission.clone())) {
                    return SubmitOutcome::Cancelled;
                }
                info!(submission_id = %submission.id, score = submission.score, "attempt submitted");
                SubmitOutcome::Submitted(submission)
            }
            Err(err) => {
                warn!(trigger = ?trigger, "attempt submission failed: {}", err);
                if !session.finish_submit(Err(err.to_string())) {
                    return SubmitOutcome::Cancelled;
                }
                SubmitOutcome::Failed(err)
            }
        }
    }
}
