use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use attention_adm::adm::{
    AdaptiveDifficultyManager, AdmConfig, AdmService, PersistenceGateway, RoundMetrics,
    ServiceOptions,
};
use attention_adm::config::Config;
use attention_adm::logging;

/// One replayed round: the game's metrics plus an optional arousal reading.
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    #[serde(flatten)]
    metrics: RoundMetrics,
    #[serde(default)]
    arousal: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config);

    let adm_config = AdmConfig::from_env();
    let gateway = PersistenceGateway::file(&config.state_dir, &adm_config.history);
    tracing::info!(
        state_dir = %config.state_dir.display(),
        user_id = %config.user_id,
        "starting adaptive difficulty replay"
    );

    let manager = AdaptiveDifficultyManager::new(
        adm_config,
        config.user_id.clone(),
        Some(gateway),
        config.clear_past_session,
    );
    let service = AdmService::spawn(
        manager,
        ServiceOptions {
            checkpoint_interval_rounds: config.checkpoint_interval_rounds,
            ..Default::default()
        },
    );
    service
        .start_session(config.session_duration, config.initial_arousal)
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: ReplayRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "skipping malformed round record");
                continue;
            }
        };

        if let Some(arousal) = record.arousal {
            service.update_arousal(arousal).await?;
        }
        let outcome = service.record_round(record.metrics).await?;

        let mut out = serde_json::to_string(&outcome)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
    }
    stdout.flush().await?;

    let state = service.shutdown().await?;
    tracing::info!(
        history = state.performance_history.len(),
        direction = state.last_adaptation_direction.as_str(),
        "replay finished"
    );
    Ok(())
}
