use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

fn default_true() -> bool {
    true
}

/// A stored quiz. Question order is fixed at creation; every answer index
/// refers to a position in `questions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_seconds: Option<u32>,
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub text: String,
    pub options: Vec<String>,
}

/// Student-facing projection of a quiz. The answer key is left out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuiz {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_seconds: Option<u32>,
    pub questions: Vec<PublicQuestion>,
    pub created_at: DateTime<Utc>,
}

impl From<&Quiz> for PublicQuiz {
    fn from(quiz: &Quiz) -> Self {
        Self {
            id: quiz.id.clone(),
            title: quiz.title.clone(),
            description: quiz.description.clone(),
            time_limit_seconds: quiz.time_limit_seconds,
            questions: quiz
                .questions
                .iter()
                .map(|q| PublicQuestion {
                    text: q.text.clone(),
                    options: q.options.clone(),
                })
                .collect(),
            created_at: quiz.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub quiz_id: String,
    /// Empty for submissions recorded before accounts carried an email.
    #[serde(default)]
    pub student_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub selected_indices: Vec<i64>,
    pub score: u32,
    pub total: u32,
    #[serde(default = "default_true")]
    pub on_time: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A scored submission before the store assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub quiz_id: String,
    pub student_email: String,
    pub student_name: Option<String>,
    pub selected_indices: Vec<i64>,
    pub score: u32,
    pub total: u32,
    pub on_time: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i64>,
    pub received_at: DateTime<Utc>,
}

/// Quiz as authored by a teacher, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub time_limit_seconds: Option<i64>,
    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: i64,
}

/// Fields of a quiz that passed validation; the store adds id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidQuiz {
    pub title: String,
    pub description: Option<String>,
    pub time_limit_seconds: Option<u32>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

pub fn validate_quiz(draft: &QuizDraft) -> Result<ValidQuiz, Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    let title = draft.title.trim();
    if title.is_empty() {
        issues.push(ValidationIssue::new("title", "must not be empty"));
    }
    let time_limit_seconds = match draft.time_limit_seconds {
        None => None,
        Some(secs) if secs > 0 && secs <= u32::MAX as i64 => Some(secs as u32),
        Some(_) => {
            issues.push(ValidationIssue::new("timeLimitSeconds", "must be a positive integer"));
            None
        }
    };
    if draft.questions.is_empty() {
        issues.push(ValidationIssue::new("questions", "must contain at least one question"));
    }

    let mut questions = Vec::with_capacity(draft.questions.len());
    for (i, q) in draft.questions.iter().enumerate() {
        if q.text.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("questions[{i}].text"), "must not be empty"));
        }
        if q.options.len() < 2 {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].options"),
                "must contain at least 2 options",
            ));
        }
        for (j, opt) in q.options.iter().enumerate() {
            if opt.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("questions[{i}].options[{j}]"),
                    "must not be empty",
                ));
            }
        }
        if q.correct_index < 0 || q.correct_index as usize >= q.options.len() {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].correctIndex"),
                "out of range",
            ));
            continue;
        }
        questions.push(Question {
            text: q.text.clone(),
            options: q.options.clone(),
            correct_index: q.correct_index as usize,
        });
    }

    if !issues.is_empty() {
        return Err(issues);
    }
    Ok(ValidQuiz {
        title: title.to_string(),
        description: draft
            .description
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        time_limit_seconds,
        questions,
    })
}

/// Sample quiz handed out by the template endpoint.
pub fn quiz_template() -> QuizDraft {
    QuizDraft {
        title: "Sample Quiz".into(),
        description: Some("Short description of the quiz".into()),
        time_limit_seconds: Some(600),
        questions: vec![
            QuestionDraft {
                text: "What is 2 + 2?".into(),
                options: vec!["3".into(), "4".into(), "5".into(), "6".into()],
                correct_index: 1,
            },
            QuestionDraft {
                text: "Select the capital of France".into(),
                options: vec!["Berlin".into(), "Madrid".into(), "Paris".into(), "Rome".into()],
                correct_index: 2,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_draft() -> QuizDraft {
        QuizDraft {
            title: " Arithmetic ".into(),
            description: Some("   ".into()),
            time_limit_seconds: Some(60),
            questions: vec![
                QuestionDraft {
                    text: "1+1".into(),
                    options: vec!["1".into(), "2".into()],
                    correct_index: 1,
                },
                QuestionDraft {
                    text: "2+2".into(),
                    options: vec!["3".into(), "4".into(), "5".into()],
                    correct_index: 1,
                },
            ],
        }
    }

    #[test]
    fn validate_quiz_ok() {
        let valid = validate_quiz(&sample_draft()).unwrap();
        assert_eq!(valid.title, "Arithmetic");
        assert_eq!(valid.description, None);
        assert_eq!(valid.time_limit_seconds, Some(60));
        assert_eq!(valid.questions[1].correct_index, 1);
    }

    #[test]
    fn validate_quiz_collects_every_issue() {
        let mut draft = sample_draft();
        draft.title = "".into();
        draft.time_limit_seconds = Some(0);
        draft.questions[0].options = vec!["only".into()];
        draft.questions[1].options[2] = "  ".into();
        draft.questions[1].correct_index = 7;
        let issues = validate_quiz(&draft).unwrap_err();
        let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"title"));
        assert!(fields.contains(&"timeLimitSeconds"));
        assert!(fields.contains(&"questions[0].options"));
        assert!(fields.contains(&"questions[0].correctIndex"));
        assert!(fields.contains(&"questions[1].options[2]"));
        assert!(fields.contains(&"questions[1].correctIndex"));
    }

    #[test]
    fn validate_quiz_requires_questions() {
        let mut draft = sample_draft();
        draft.questions.clear();
        let issues = validate_quiz(&draft).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "questions"));
    }

    #[test]
    fn template_is_valid() {
        assert!(validate_quiz(&quiz_template()).is_ok());
    }

    #[test]
    fn public_quiz_hides_answer_key() {
        let valid = validate_quiz(&sample_draft()).unwrap();
        let quiz = Quiz {
            id: "q".into(),
            title: valid.title,
            description: None,
            time_limit_seconds: valid.time_limit_seconds,
            questions: valid.questions,
            created_by: None,
            created_at: Utc::now(),
            is_active: true,
        };
        let raw = serde_json::to_string(&PublicQuiz::from(&quiz)).unwrap();
        assert!(!raw.contains("correctIndex"));
        assert!(raw.contains("timeLimitSeconds"));
    }

    #[test]
    fn legacy_quiz_defaults_to_active() {
        let quiz: Quiz = serde_json::from_value(serde_json::json!({
            "id": "1",
            "title": "Old",
            "questions": [{"text": "t", "options": ["a", "b"], "correctIndex": 0}],
            "createdAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(quiz.is_active);
        assert_eq!(quiz.time_limit_seconds, None);
    }
}
