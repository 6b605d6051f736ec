use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Set when file logging is switched on with `ENABLE_FILE_LOGS`.
    pub log_dir: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub user_id: String,
    pub clear_past_session: bool,
    pub session_duration: Duration,
    pub initial_arousal: f64,
    pub checkpoint_interval_rounds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_dir = log_dir_from(
            std::env::var("ENABLE_FILE_LOGS").ok().as_deref(),
            std::env::var("LOG_DIR").ok(),
        );

        let state_dir = std::env::var("ADM_STATE_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let user_id = std::env::var("ADM_USER_ID").unwrap_or_else(|_| "local".to_string());

        let clear_past_session = std::env::var("ADM_CLEAR_PAST_SESSION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let session_duration = std::env::var("ADM_SESSION_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(600));

        let initial_arousal = std::env::var("ADM_INITIAL_AROUSAL")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(0.5);

        let checkpoint_interval_rounds = std::env::var("ADM_CHECKPOINT_ROUNDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(5);

        Self {
            log_level,
            log_dir,
            state_dir,
            user_id,
            clear_past_session,
            session_duration,
            initial_arousal,
            checkpoint_interval_rounds,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("attention-adm")
}

fn log_dir_from(enabled: Option<&str>, dir: Option<String>) -> Option<PathBuf> {
    if !matches!(enabled, Some("true") | Some("1")) {
        return None;
    }
    let dir = dir.filter(|value| !value.trim().is_empty());
    Some(dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./logs")))
}
