use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Directory holding the JSON snapshot. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub seed_demo_users: bool,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: None,
            seed_demo_users: false,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = env::var("QUIZ_HOST").unwrap_or(defaults.host);
        let port = env::var("QUIZ_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let data_dir = env::var("QUIZ_DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let seed_demo_users = env::var("QUIZ_SEED_DEMO_USERS")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(defaults.seed_demo_users);
        let cors_origins = env::var("QUIZ_CORS_ORIGINS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        Self {
            host,
            port,
            data_dir,
            seed_demo_users,
            cors_origins,
        }
    }
}
