mod common;

use std::sync::Arc;
use std::time::Duration;

use attention_adm::adm::{
    AdaptationDirection, AdaptiveDifficultyManager, AdmConfig, AdmService, DomType,
    MemoryStateStore, PersistenceGateway, ServiceOptions,
};

use common::{assert_close, perfect_round, very_poor_round};

fn spawn_with_store(store: Arc<MemoryStateStore>, checkpoint_every: u64) -> AdmService {
    let config = AdmConfig::default();
    let gateway = PersistenceGateway::new(store, &config.history);
    let manager = AdaptiveDifficultyManager::new(config, "svc-user", Some(gateway), false);
    AdmService::spawn(
        manager,
        ServiceOptions {
            checkpoint_interval_rounds: checkpoint_every,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_rounds_are_applied_in_order() {
    let service = spawn_with_store(Arc::new(MemoryStateStore::new()), 0);

    service.update_arousal(0.9).await.unwrap();
    let first = service.record_round(perfect_round()).await.unwrap();
    service.update_arousal(0.2).await.unwrap();
    let second = service.record_round(perfect_round()).await.unwrap();

    assert_eq!(first.round_index, 1);
    assert_eq!(second.round_index, 2);

    let snapshot = service.snapshot().await.unwrap();
    let arousals: Vec<f64> = snapshot
        .performance_history
        .iter()
        .map(|e| e.arousal_level)
        .collect();
    assert_eq!(arousals, vec![0.9, 0.2]);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_positions_published_on_watch() {
    let service = spawn_with_store(Arc::new(MemoryStateStore::new()), 0);
    let mut rx = service.subscribe_positions();
    assert_close(rx.borrow().get(DomType::TargetCount), 0.5, 1e-12);

    let outcome = service.record_round(very_poor_round()).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), outcome.positions);
    assert!(service.current_positions().difficulty(DomType::TargetCount) < 0.5);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_checkpoint_every_n_rounds() {
    let store = Arc::new(MemoryStateStore::new());
    let service = spawn_with_store(store.clone(), 2);

    service.record_round(perfect_round()).await.unwrap();
    // the snapshot command is queued behind any checkpoint
    service.snapshot().await.unwrap();
    assert!(store.is_empty());

    service.record_round(perfect_round()).await.unwrap();
    service.snapshot().await.unwrap();
    assert_eq!(store.len(), 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_saves_final_state() {
    let store = Arc::new(MemoryStateStore::new());
    let service = spawn_with_store(store.clone(), 0);

    let session = service
        .start_session(Duration::from_secs(300), 0.6)
        .await
        .unwrap();
    assert!(session.warmup_rounds >= 1);
    for _ in 0..3 {
        service.record_round(very_poor_round()).await.unwrap();
    }
    let final_state = service.shutdown().await.unwrap();
    assert_eq!(final_state.performance_history.len(), 3);
    assert_eq!(final_state.last_adaptation_direction, AdaptationDirection::Decreasing);

    let config = AdmConfig::default();
    let gateway = PersistenceGateway::new(store, &config.history);
    let reloaded = gateway.load_state("svc-user").unwrap().unwrap();
    assert_eq!(reloaded.performance_history.len(), 3);
    assert_eq!(
        reloaded.performance_history[0]
            .session_context
            .as_ref()
            .map(|c| c.session_id.clone()),
        Some(session.session_id)
    );
}
