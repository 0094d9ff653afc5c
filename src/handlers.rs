use crate::error::{AppError, ErrorDetail};
use crate::grading::{evaluate_timing, normalize_answers, parse_started_at, score_submission};
use crate::models::{
    quiz_template, validate_quiz, NewSubmission, PublicQuiz, Quiz, QuizDraft, Role, Submission,
    User, ValidationIssue,
};
use crate::state::{new_quiz, AppState, SessionIdentity, StoreError};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use validator::Validate;

pub const SESSION_COOKIE: &str = "quiz_session";

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn current_identity(jar: &CookieJar, state: &AppState) -> Option<SessionIdentity> {
    let sid = jar.get(SESSION_COOKIE)?.value().to_string();
    state.sessions.get(&sid).map(|entry| entry.value().clone())
}

fn require_session(jar: &CookieJar, state: &AppState, req_id: &str) -> Result<SessionIdentity, AppError> {
    current_identity(jar, state).ok_or_else(|| AppError::unauthorized(req_id))
}

fn require_role(
    jar: &CookieJar,
    state: &AppState,
    role: Role,
    req_id: &str,
) -> Result<SessionIdentity, AppError> {
    let identity = require_session(jar, state, req_id)?;
    if identity.role != role {
        return Err(AppError::forbidden(req_id));
    }
    Ok(identity)
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn verify_password(password_hash: &str, password: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn start_session(state: &AppState, jar: CookieJar, user: &User) -> CookieJar {
    let session_id = uuid::Uuid::new_v4().to_string();
    state.sessions.insert(
        session_id.clone(),
        SessionIdentity {
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        },
    );
    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    jar.add(cookie)
}

fn validation_details(errors: validator::ValidationErrors) -> Vec<ErrorDetail> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| ErrorDetail {
            field: field.to_string(),
            issue: errs
                .iter()
                .map(|e| e.code.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect()
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupPayload {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserOut {
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl From<&User> for UserOut {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

async fn create_account(
    state: &AppState,
    payload: SignupPayload,
    role: Role,
    req_id: &str,
) -> Result<User, AppError> {
    if let Err(errors) = payload.validate() {
        return Err(AppError::bad_request("invalid signup data", req_id).with_details(validation_details(errors)));
    }
    let password_hash = hash_password(&payload.password).map_err(|_| {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "password hash failed", req_id)
    })?;
    let user = User {
        email: payload.email.trim().to_lowercase(),
        name: payload.name.trim().to_string(),
        role,
        password_hash,
        created_at: Utc::now(),
    };
    match state.users.insert(user).await {
        Ok(user) => {
            info!(email = %user.email, role = user.role.as_str(), "account created");
            Ok(user)
        }
        Err(StoreError::DuplicateUser(_)) => Err(AppError::new(
            StatusCode::CONFLICT,
            "CONFLICT",
            "user with this email already exists",
            req_id,
        )),
        Err(err) => Err(AppError::store(err, req_id)),
    }
}

/// Self-service signup always creates a student and logs them in.
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<SignupPayload>,
) -> Result<(StatusCode, CookieJar, Json<Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = create_account(&state, payload, Role::Student, &req_id).await?;
    let jar = start_session(&state, jar, &user);
    Ok((
        StatusCode::CREATED,
        jar,
        Json(json!({ "ok": true, "role": user.role, "user": UserOut::from(&user) })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<LoginPayload>,
) -> Result<(CookieJar, Json<Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let invalid = || AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "invalid credentials", req_id.clone());
    let user = state
        .users
        .find_by_email(payload.email.trim())
        .await
        .ok_or_else(invalid)?;
    if !verify_password(&user.password_hash, &payload.password) {
        warn!(email = %user.email, "failed login");
        return Err(invalid());
    }
    let jar = start_session(&state, jar, &user);
    Ok((jar, Json(json!({ "ok": true, "role": user.role }))))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    let req_id = request_id_from_headers(&headers);
    let sid = jar
        .get(SESSION_COOKIE)
        .map(|v| v.value().to_string())
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "no session", req_id))?;
    state.sessions.remove(&sid);
    Ok((jar.remove(Cookie::build(SESSION_COOKIE).path("/")), StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<UserOut>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = require_session(&jar, &state, &req_id)?;
    Ok(Json(UserOut {
        email: identity.email,
        name: identity.name,
        role: identity.role,
    }))
}

pub async fn add_teacher(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<SignupPayload>,
) -> Result<(StatusCode, Json<UserOut>), AppError> {
    let req_id = request_id_from_headers(&headers);
    require_role(&jar, &state, Role::Teacher, &req_id)?;
    let user = create_account(&state, payload, Role::Teacher, &req_id).await?;
    Ok((StatusCode::CREATED, Json(UserOut::from(&user))))
}

/// Teachers see every quiz with its answer key; students only see active
/// quizzes, without answers.
pub async fn list_quizzes(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = require_session(&jar, &state, &req_id)?;
    let quizzes = state.quizzes.list().await;
    let response = match identity.role {
        Role::Teacher => Json(quizzes).into_response(),
        Role::Student => {
            let items: Vec<PublicQuiz> = quizzes
                .iter()
                .filter(|q| q.is_active)
                .map(PublicQuiz::from)
                .collect();
            Json(items).into_response()
        }
    };
    Ok(response)
}

pub async fn get_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = require_session(&jar, &state, &req_id)?;
    let quiz = state
        .quizzes
        .get_by_id(&id)
        .await
        .ok_or_else(|| AppError::not_found("quiz not found", &req_id))?;
    match identity.role {
        Role::Teacher => Ok(Json(quiz).into_response()),
        Role::Student if !quiz.is_active => Err(quiz_inactive(&req_id)),
        Role::Student => Ok(Json(PublicQuiz::from(&quiz)).into_response()),
    }
}

fn quiz_inactive(req_id: &str) -> AppError {
    AppError::new(StatusCode::CONFLICT, "QUIZ_INACTIVE", "quiz is not active", req_id)
}

pub async fn create_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Quiz>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let teacher = require_role(&jar, &state, Role::Teacher, &req_id)?;
    let draft: QuizDraft = serde_json::from_value(body)
        .map_err(|e| AppError::bad_request(format!("invalid quiz payload: {e}"), &req_id))?;
    let valid = validate_quiz(&draft)
        .map_err(|issues| AppError::validation("quiz validation failed", issues, &req_id))?;

    let quiz = new_quiz(valid, Some(teacher.email));
    state
        .quizzes
        .insert(vec![quiz.clone()])
        .await
        .map_err(|e| AppError::store(e, &req_id))?;
    info!(quiz_id = %quiz.id, questions = quiz.questions.len(), "quiz created");
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// Accepts one quiz or an array of quizzes. Either everything is imported
/// or nothing is.
pub async fn import_quizzes(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let teacher = require_role(&jar, &state, Role::Teacher, &req_id)?;

    let compiled = jsonschema::draft202012::new(&state.import_schema).map_err(|_| {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "schema build failed", &req_id)
    })?;
    if compiled.validate(&body).is_err() {
        let details = compiled
            .iter_errors(&body)
            .map(|e| ErrorDetail {
                field: e.instance_path.to_string(),
                issue: e.to_string(),
            })
            .collect();
        return Err(AppError::bad_request("import does not match schema", &req_id).with_details(details));
    }

    let items = match body {
        Value::Array(items) => items,
        single => vec![single],
    };
    let mut quizzes = Vec::with_capacity(items.len());
    for (k, item) in items.into_iter().enumerate() {
        let draft: QuizDraft = serde_json::from_value(item)
            .map_err(|e| AppError::bad_request(format!("quiz [{k}] is invalid: {e}"), &req_id))?;
        let valid = validate_quiz(&draft).map_err(|issues| {
            let prefixed = issues
                .into_iter()
                .map(|i| ValidationIssue {
                    field: format!("[{k}].{}", i.field),
                    issue: i.issue,
                })
                .collect();
            AppError::validation("quiz validation failed", prefixed, &req_id)
        })?;
        quizzes.push(new_quiz(valid, Some(teacher.email.clone())));
    }

    state
        .quizzes
        .insert(quizzes.clone())
        .await
        .map_err(|e| AppError::store(e, &req_id))?;
    info!(count = quizzes.len(), "quizzes imported");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "importedCount": quizzes.len(), "quizzes": quizzes })),
    ))
}

pub async fn download_template() -> Response {
    let body = serde_json::to_string_pretty(&quiz_template()).unwrap_or_default();
    (
        [
            (header::CONTENT_TYPE, "application/json; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=quiz-template.json"),
        ],
        body,
    )
        .into_response()
}

async fn set_quiz_active(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
    id: &str,
    active: bool,
) -> Result<Json<Quiz>, AppError> {
    let req_id = request_id_from_headers(headers);
    require_role(jar, state, Role::Teacher, &req_id)?;
    let quiz = state
        .quizzes
        .set_active(id, active)
        .await
        .map_err(|e| AppError::store(e, &req_id))?
        .ok_or_else(|| AppError::not_found("quiz not found", &req_id))?;
    info!(quiz_id = %quiz.id, active, "quiz availability changed");
    Ok(Json(quiz))
}

pub async fn activate_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<Json<Quiz>, AppError> {
    set_quiz_active(&state, &headers, &jar, &id, true).await
}

pub async fn deactivate_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<Json<Quiz>, AppError> {
    set_quiz_active(&state, &headers, &jar, &id, false).await
}

/// Submit body. Older clients send `selectedIndices` / `startedAtIso`;
/// when a body carries both spellings the older one wins.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    #[serde(default)]
    pub quiz_id: Value,
    #[serde(default)]
    pub raw_answers: Option<Vec<Value>>,
    #[serde(default)]
    pub selected_indices: Option<Vec<Value>>,
    #[serde(default)]
    pub started_at: Option<Value>,
    #[serde(default)]
    pub started_at_iso: Option<Value>,
}

impl SubmitPayload {
    fn quiz_id(&self) -> Option<String> {
        match &self.quiz_id {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn answers(&self) -> Option<&[Value]> {
        self.selected_indices
            .as_deref()
            .or(self.raw_answers.as_deref())
    }

    fn started_at(&self) -> Option<&str> {
        self.started_at_iso
            .as_ref()
            .or(self.started_at.as_ref())
            .and_then(Value::as_str)
    }
}

/// Scores an attempt and appends it to the submission log.
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let student = require_role(&jar, &state, Role::Student, &req_id)?;

    let payload: SubmitPayload = serde_json::from_value(body)
        .map_err(|e| AppError::bad_request(format!("invalid payload: {e}"), &req_id))?;
    let quiz_id = payload
        .quiz_id()
        .ok_or_else(|| AppError::bad_request("invalid payload: quizId is required", &req_id))?;
    let raw_answers = payload
        .answers()
        .ok_or_else(|| AppError::bad_request("invalid payload: rawAnswers must be an array", &req_id))?;

    let quiz = state
        .quizzes
        .get_by_id(&quiz_id)
        .await
        .ok_or_else(|| AppError::not_found("quiz not found", &req_id))?;
    if !quiz.is_active {
        return Err(quiz_inactive(&req_id));
    }

    let received_at = Utc::now();
    let normalized = normalize_answers(&quiz, raw_answers);
    let started_at = parse_started_at(payload.started_at());
    let timing = evaluate_timing(&quiz, started_at, received_at);
    let card = score_submission(&quiz, &normalized, timing);

    let submission = state
        .submissions
        .append(NewSubmission {
            quiz_id: quiz.id.clone(),
            student_email: student.email.clone(),
            student_name: Some(student.name.clone()),
            selected_indices: normalized,
            score: card.score,
            total: card.total,
            on_time: timing.on_time,
            started_at,
            time_spent_seconds: timing.time_spent_seconds(),
            received_at,
        })
        .await
        .map_err(|e| AppError::store(e, &req_id))?;

    info!(
        request_id = %req_id,
        submission_id = %submission.id,
        quiz_id = %quiz.id,
        student = %student.email,
        score = card.score,
        correct = card.correct,
        total = card.total,
        on_time = timing.on_time,
        "submission recorded"
    );
    if !timing.on_time {
        warn!(submission_id = %submission.id, "late submission scored as zero");
    }
    Ok((StatusCode::CREATED, Json(submission)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFilter {
    pub quiz_id: Option<String>,
}

pub async fn list_submissions(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(filter): Query<SubmissionFilter>,
) -> Result<Json<Vec<Submission>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    require_role(&jar, &state, Role::Teacher, &req_id)?;
    let items = match filter.quiz_id {
        Some(quiz_id) => state.submissions.list_by_quiz(&quiz_id).await,
        None => state.submissions.list_all().await,
    };
    Ok(Json(items))
}

fn newest_first(mut items: Vec<Submission>) -> Vec<Submission> {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items
}

pub async fn my_submissions(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<Submission>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let student = require_role(&jar, &state, Role::Student, &req_id)?;
    let mine = state.submissions.list_by_student(&student.email).await;
    Ok(Json(newest_first(mine)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionReview {
    pub text: String,
    pub options: Vec<String>,
    pub selected_index: i64,
    pub correct_index: usize,
    pub is_correct: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub quiz_id: String,
    pub title: String,
    pub submission: Submission,
    pub answered: usize,
    pub percentage: u32,
    pub questions: Vec<QuestionReview>,
}

/// The student's most recent submission for a quiz, with the answer key.
pub async fn quiz_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<Json<QuizResult>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let student = require_role(&jar, &state, Role::Student, &req_id)?;
    let quiz = state
        .quizzes
        .get_by_id(&id)
        .await
        .ok_or_else(|| AppError::not_found("quiz not found", &req_id))?;
    let submission = newest_first(state.submissions.list_by_student(&student.email).await)
        .into_iter()
        .find(|s| s.quiz_id == quiz.id)
        .ok_or_else(|| AppError::not_found("no submission for this quiz", &req_id))?;

    let questions = quiz
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let selected_index = submission.selected_indices.get(i).copied().unwrap_or(-1);
            QuestionReview {
                text: q.text.clone(),
                options: q.options.clone(),
                selected_index,
                correct_index: q.correct_index,
                is_correct: selected_index == q.correct_index as i64,
            }
        })
        .collect();
    let answered = submission.selected_indices.iter().filter(|i| **i >= 0).count();
    let percentage = if submission.total == 0 {
        0
    } else {
        (f64::from(submission.score) * 100.0 / f64::from(submission.total)).round() as u32
    };

    Ok(Json(QuizResult {
        quiz_id: quiz.id,
        title: quiz.title,
        submission,
        answered,
        percentage,
        questions,
    }))
}
