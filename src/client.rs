use crate::attempt::SubmitRequest;
use crate::models::{PublicQuiz, Submission};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, code: String, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Sends an attempt's single submission. Object-safe so tests and the
/// runner can swap implementations.
pub trait SubmissionTransport: Send + Sync {
    fn submit(&self, request: SubmitRequest) -> BoxFuture<'static, Result<Submission, TransportError>>;
}

/// Talks to the portal's HTTP API with a cookie-backed session.
#[derive(Clone)]
pub struct HttpSubmissionClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSubmissionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), TransportError> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }

    pub async fn fetch_quiz(&self, quiz_id: &str) -> Result<PublicQuiz, TransportError> {
        let resp = self.http.get(self.url(&format!("/quizzes/{quiz_id}"))).send().await?;
        Ok(check_status(resp).await?.json::<PublicQuiz>().await?)
    }
}

impl SubmissionTransport for HttpSubmissionClient {
    fn submit(&self, request: SubmitRequest) -> BoxFuture<'static, Result<Submission, TransportError>> {
        let http = self.http.clone();
        let url = self.url("/submissions");
        Box::pin(async move {
            let resp = http.post(url).json(&request).send().await?;
            Ok(check_status(resp).await?.json::<Submission>().await?)
        })
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    let error = &body["error"];
    Err(TransportError::Rejected {
        status: status.as_u16(),
        code: error["code"].as_str().unwrap_or("UNKNOWN").to_string(),
        message: error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
    })
}

impl TransportError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Rejected { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }
}
