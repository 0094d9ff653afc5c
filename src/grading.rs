//! Server-side grading: answer normalization, the lateness check and the
//! final score. Each stage is a pure function so a submission can be
//! re-graded from its inputs at any time.

use crate::models::Quiz;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Marker stored for a question the student left unanswered.
pub const UNANSWERED: i64 = -1;

/// Clamps arbitrary client input to one answer per question.
///
/// The output always has exactly `quiz.questions.len()` entries. Anything
/// that is not an in-range option index for its question becomes
/// [`UNANSWERED`]; malformed input never fails.
pub fn normalize_answers(quiz: &Quiz, raw: &[Value]) -> Vec<i64> {
    quiz.questions
        .iter()
        .enumerate()
        .map(|(i, question)| {
            raw.get(i)
                .and_then(coerce_index)
                .filter(|idx| *idx >= 0 && (*idx as usize) < question.options.len())
                .unwrap_or(UNANSWERED)
        })
        .collect()
}

fn coerce_index(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    if !number.is_finite() || number.fract() != 0.0 {
        return None;
    }
    if number < i64::MIN as f64 || number > i64::MAX as f64 {
        return None;
    }
    Some(number as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingVerdict {
    pub on_time: bool,
    /// Time between attempt start and receipt, when the start is known.
    #[serde(skip)]
    pub elapsed: Option<Duration>,
}

impl TimingVerdict {
    pub fn on_time() -> Self {
        Self {
            on_time: true,
            elapsed: None,
        }
    }

    pub fn late() -> Self {
        Self {
            on_time: false,
            elapsed: None,
        }
    }

    /// Whole seconds spent on the attempt, never negative.
    pub fn time_spent_seconds(&self) -> Option<i64> {
        self.elapsed.map(|d| d.num_seconds().max(0))
    }
}

/// Parses a client-reported start time.
///
/// Accepts RFC 3339 plus the offset-less ISO forms browsers produce
/// (`2026-01-01T10:00:00`, `2026-01-01T10:00`, `2026-01-01`), read as UTC.
/// Anything else is treated as absent.
pub fn parse_started_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Best-effort lateness check against the quiz time limit.
///
/// Untimed quizzes and submissions without a usable start time are always
/// on time. The client clock only feeds this classification.
pub fn evaluate_timing(
    quiz: &Quiz,
    started_at: Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
) -> TimingVerdict {
    let elapsed = started_at.map(|start| received_at - start);
    let on_time = match (quiz.time_limit_seconds, elapsed) {
        (Some(limit), Some(elapsed)) => {
            elapsed.num_milliseconds() <= i64::from(limit) * 1000
        }
        _ => true,
    };
    TimingVerdict { on_time, elapsed }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    pub score: u32,
    pub total: u32,
    /// Matches against the answer key before the lateness rule is applied.
    pub correct: u32,
}

/// Late submissions keep their full `total` but score zero.
pub fn score_submission(quiz: &Quiz, normalized: &[i64], timing: TimingVerdict) -> ScoreCard {
    let total = quiz.questions.len() as u32;
    let correct = quiz
        .questions
        .iter()
        .zip(normalized)
        .filter(|(question, answer)| **answer == question.correct_index as i64)
        .count() as u32;
    ScoreCard {
        score: if timing.on_time { correct } else { 0 },
        total,
        correct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Question;
    use serde_json::json;

    fn quiz(time_limit_seconds: Option<u32>) -> Quiz {
        Quiz {
            id: "quiz-1".into(),
            title: "Two questions".into(),
            description: None,
            time_limit_seconds,
            questions: vec![
                Question {
                    text: "first".into(),
                    options: vec!["a".into(), "b".into()],
                    correct_index: 1,
                },
                Question {
                    text: "second".into(),
                    options: vec!["a".into(), "b".into(), "c".into()],
                    correct_index: 2,
                },
            ],
            created_by: None,
            created_at: Utc::now(),
            is_active: true,
        }
    }

    fn grade(quiz: &Quiz, raw: Value, timing: TimingVerdict) -> (Vec<i64>, ScoreCard) {
        let raw = raw.as_array().cloned().unwrap_or_default();
        let normalized = normalize_answers(quiz, &raw);
        let card = score_submission(quiz, &normalized, timing);
        (normalized, card)
    }

    #[test]
    fn all_correct_on_time() {
        let (normalized, card) = grade(&quiz(None), json!([1, 2]), TimingVerdict::on_time());
        assert_eq!(normalized, vec![1, 2]);
        assert_eq!((card.score, card.total), (2, 2));
    }

    #[test]
    fn short_answer_array_is_padded() {
        let (normalized, card) = grade(&quiz(None), json!([1]), TimingVerdict::on_time());
        assert_eq!(normalized, vec![1, -1]);
        assert_eq!((card.score, card.total), (1, 2));
    }

    #[test]
    fn out_of_range_answers_become_unanswered() {
        let (normalized, card) = grade(&quiz(None), json!([5, -3]), TimingVerdict::on_time());
        assert_eq!(normalized, vec![-1, -1]);
        assert_eq!((card.score, card.total), (0, 2));
    }

    #[test]
    fn malformed_values_become_unanswered() {
        let q = quiz(None);
        let raw = vec![json!("1"), json!(1.5)];
        assert_eq!(normalize_answers(&q, &raw), vec![1, -1]);

        let raw = vec![json!(null), json!(true)];
        assert_eq!(normalize_answers(&q, &raw), vec![-1, -1]);

        let raw = vec![json!([1]), json!({"index": 2})];
        assert_eq!(normalize_answers(&q, &raw), vec![-1, -1]);

        let raw = vec![json!(" 0 "), json!("")];
        assert_eq!(normalize_answers(&q, &raw), vec![0, -1]);

        let raw = vec![json!(1.0), json!("2e0"), json!(0), json!(1)];
        assert_eq!(normalize_answers(&q, &raw), vec![1, 2]);
    }

    #[test]
    fn normalized_length_matches_question_count() {
        let q = quiz(None);
        let inputs = [
            json!([]),
            json!([0]),
            json!([0, 1, 2, 3, 4, 5]),
            json!(["x", null, 99, -1, 1e300]),
        ];
        for input in inputs {
            let raw = input.as_array().cloned().unwrap();
            let normalized = normalize_answers(&q, &raw);
            assert_eq!(normalized.len(), q.questions.len());
            for (answer, question) in normalized.iter().zip(&q.questions) {
                assert!(*answer == UNANSWERED || (*answer as usize) < question.options.len());
            }
        }
    }

    #[test]
    fn late_submission_scores_zero_but_keeps_total() {
        let q = quiz(Some(60));
        let received = Utc::now();
        let timing = evaluate_timing(&q, Some(received - Duration::seconds(100)), received);
        assert!(!timing.on_time);
        assert_eq!(timing.time_spent_seconds(), Some(100));

        let (_, card) = grade(&q, json!([1, 2]), timing);
        assert_eq!((card.score, card.total, card.correct), (0, 2, 2));
    }

    #[test]
    fn untimed_quiz_is_always_on_time() {
        let q = quiz(None);
        let received = Utc::now();
        let timing = evaluate_timing(&q, Some(received - Duration::days(30)), received);
        assert!(timing.on_time);
    }

    #[test]
    fn missing_start_is_on_time() {
        let q = quiz(Some(1));
        let timing = evaluate_timing(&q, None, Utc::now());
        assert!(timing.on_time);
        assert_eq!(timing.time_spent_seconds(), None);
        assert_eq!(parse_started_at(Some("yesterday")), None);
        assert_eq!(parse_started_at(None), None);
    }

    #[test]
    fn limit_boundary_is_inclusive() {
        let q = quiz(Some(60));
        let received = Utc::now();
        let exact = evaluate_timing(&q, Some(received - Duration::seconds(60)), received);
        assert!(exact.on_time);
        let over = evaluate_timing(&q, Some(received - Duration::milliseconds(60_001)), received);
        assert!(!over.on_time);
    }

    #[test]
    fn client_clock_ahead_counts_as_on_time() {
        let q = quiz(Some(60));
        let received = Utc::now();
        let timing = evaluate_timing(&q, Some(received + Duration::seconds(30)), received);
        assert!(timing.on_time);
        assert_eq!(timing.time_spent_seconds(), Some(0));
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_started_at(Some("2026-01-01T03:00:00+03:00")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn offsetless_start_times_are_read_as_utc() {
        let midnight = "2026-01-01T00:00:00+00:00";
        for raw in ["2026-01-01", "2026-01-01T00:00:00", "2026-01-01T00:00", "2026-01-01 00:00:00.000"] {
            let parsed = parse_started_at(Some(raw)).unwrap();
            assert_eq!(parsed.to_rfc3339(), midnight, "{raw}");
        }
        assert_eq!(parse_started_at(Some("2026-13-01")), None);
    }

    #[test]
    fn date_only_start_still_counts_as_late() {
        let q = quiz(Some(60));
        let started = parse_started_at(Some("2026-01-01"));
        let received = started.unwrap() + Duration::hours(2);
        assert!(!evaluate_timing(&q, started, received).on_time);
    }

    #[test]
    fn grading_is_idempotent() {
        let q = quiz(Some(60));
        let raw = vec![json!(1), json!("0")];
        let first = score_submission(&q, &normalize_answers(&q, &raw), TimingVerdict::on_time());
        let second = score_submission(&q, &normalize_answers(&q, &raw), TimingVerdict::on_time());
        assert_eq!(first, second);
        assert_eq!(first.score, 1);
        assert_eq!(score_submission(&q, &[1, 2], TimingVerdict::late()).score, 0);
    }
}
