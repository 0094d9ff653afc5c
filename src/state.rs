use crate::config::Config;
use crate::models::{NewSubmission, Quiz, Submission, User, ValidQuiz};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user {0} already exists")]
    DuplicateUser(String),
    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("snapshot {} cannot be read: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait QuizRepository: Send + Sync {
    async fn list(&self) -> Vec<Quiz>;
    async fn get_by_id(&self, id: &str) -> Option<Quiz>;
    async fn insert(&self, quizzes: Vec<Quiz>) -> Result<(), StoreError>;
    async fn set_active(&self, id: &str, active: bool) -> Result<Option<Quiz>, StoreError>;
}

/// Append-only submission log. `append` never merges with or replaces an
/// existing entry.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn append(&self, submission: NewSubmission) -> Result<Submission, StoreError>;
    async fn list_all(&self) -> Vec<Submission>;
    async fn list_by_student(&self, email: &str) -> Vec<Submission>;
    async fn list_by_quiz(&self, quiz_id: &str) -> Vec<Submission>;
    async fn get_by_id(&self, id: &str) -> Option<Submission>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Option<User>;
    async fn insert(&self, user: User) -> Result<User, StoreError>;
}

pub fn new_quiz(valid: ValidQuiz, created_by: Option<String>) -> Quiz {
    Quiz {
        id: uuid::Uuid::new_v4().to_string(),
        title: valid.title,
        description: valid.description,
        time_limit_seconds: valid.time_limit_seconds,
        questions: valid.questions,
        created_by,
        created_at: Utc::now(),
        is_active: true,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistentSnapshot {
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    quizzes: Vec<Quiz>,
    #[serde(default)]
    submissions: Vec<Submission>,
}

/// In-memory tables mirrored to a JSON snapshot after every write.
pub struct FileStore {
    users: RwLock<HashMap<String, User>>,
    quizzes: RwLock<Vec<Quiz>>,
    submissions: RwLock<Vec<Submission>>,
    snapshot_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl FileStore {
    pub fn in_memory() -> Self {
        Self::from_snapshot(PersistentSnapshot::default(), None)
    }

    /// Opens `<dir>/portal_state.json`, starting empty only when the file
    /// does not exist yet. A snapshot that fails to parse is never replaced.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join("portal_state.json");
        let snapshot = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<PersistentSnapshot>(&raw)
                .map_err(|source| StoreError::Unreadable {
                    path: path.clone(),
                    source,
                })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PersistentSnapshot::default(),
            Err(err) => return Err(err.into()),
        };
        info!(
            path = %path.display(),
            quizzes = snapshot.quizzes.len(),
            submissions = snapshot.submissions.len(),
            "store opened"
        );
        Ok(Self::from_snapshot(snapshot, Some(path)))
    }

    fn from_snapshot(snapshot: PersistentSnapshot, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            users: RwLock::new(snapshot.users),
            quizzes: RwLock::new(snapshot.quizzes),
            submissions: RwLock::new(snapshot.submissions),
            snapshot_path,
            persist_lock: Mutex::new(()),
        }
    }

    /// Writes the current tables. Writers are serialised and each one reads
    /// the tables after taking the lock, so the last file on disk always
    /// holds every committed write.
    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = PersistentSnapshot {
            users: self.users.read().await.clone(),
            quizzes: self.quizzes.read().await.clone(),
            submissions: self.submissions.read().await.clone(),
        };
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl QuizRepository for FileStore {
    async fn list(&self) -> Vec<Quiz> {
        self.quizzes.read().await.clone()
    }

    async fn get_by_id(&self, id: &str) -> Option<Quiz> {
        self.quizzes.read().await.iter().find(|q| q.id == id).cloned()
    }

    async fn insert(&self, quizzes: Vec<Quiz>) -> Result<(), StoreError> {
        self.quizzes.write().await.extend(quizzes);
        self.persist().await
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<Option<Quiz>, StoreError> {
        let updated = {
            let mut quizzes = self.quizzes.write().await;
            quizzes.iter_mut().find(|q| q.id == id).map(|q| {
                q.is_active = active;
                q.clone()
            })
        };
        if updated.is_some() {
            self.persist().await?;
        }
        Ok(updated)
    }
}

#[async_trait]
impl SubmissionRepository for FileStore {
    async fn append(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let submission = Submission {
            id: uuid::Uuid::new_v4().to_string(),
            quiz_id: new.quiz_id,
            student_email: new.student_email,
            student_name: new.student_name,
            selected_indices: new.selected_indices,
            score: new.score,
            total: new.total,
            on_time: new.on_time,
            started_at: new.started_at,
            time_spent_seconds: new.time_spent_seconds,
            created_at: new.received_at,
        };
        self.submissions.write().await.push(submission.clone());
        self.persist().await?;
        Ok(submission)
    }

    async fn list_all(&self) -> Vec<Submission> {
        self.submissions.read().await.clone()
    }

    async fn list_by_student(&self, email: &str) -> Vec<Submission> {
        self.submissions
            .read()
            .await
            .iter()
            .filter(|s| s.student_email.eq_ignore_ascii_case(email))
            .cloned()
            .collect()
    }

    async fn list_by_quiz(&self, quiz_id: &str) -> Vec<Submission> {
        self.submissions
            .read()
            .await
            .iter()
            .filter(|s| s.quiz_id == quiz_id)
            .cloned()
            .collect()
    }

    async fn get_by_id(&self, id: &str) -> Option<Submission> {
        self.submissions.read().await.iter().find(|s| s.id == id).cloned()
    }
}

#[async_trait]
impl UserRepository for FileStore {
    async fn find_by_email(&self, email: &str) -> Option<User> {
        self.users.read().await.get(&email.to_lowercase()).cloned()
    }

    async fn insert(&self, user: User) -> Result<User, StoreError> {
        {
            let mut users = self.users.write().await;
            let key = user.email.to_lowercase();
            if users.contains_key(&key) {
                return Err(StoreError::DuplicateUser(key));
            }
            users.insert(key, user.clone());
        }
        self.persist().await?;
        Ok(user)
    }
}

/// Who is behind a login cookie.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub email: String,
    pub name: String,
    pub role: crate::models::Role,
}

#[derive(Clone)]
pub struct AppState {
    pub quizzes: Arc<dyn QuizRepository>,
    pub submissions: Arc<dyn SubmissionRepository>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<DashMap<String, SessionIdentity>>,
    pub import_schema: Arc<serde_json::Value>,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<FileStore>, import_schema: serde_json::Value, config: Config) -> Self {
        Self {
            quizzes: store.clone(),
            submissions: store.clone(),
            users: store,
            sessions: Arc::new(DashMap::new()),
            import_schema: Arc::new(import_schema),
            config,
        }
    }
}
