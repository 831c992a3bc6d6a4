use std::{path::PathBuf, time::Duration};

use crate::{
    catalog::CatalogRecord,
    geo::LatLng,
    location_log::LogSourceRef,
    testing::{log_json, FakeCatalog, FakeLogSource, Gate},
    timeline::MediaKind,
};

use super::*;

fn image(id: i64, folder: &str, timestamp_ms: i64) -> CatalogRecord {
    CatalogRecord {
        id,
        folder: Some(folder.to_string()),
        date_taken: Some(timestamp_ms.to_string()),
        date_added: None,
        path: PathBuf::from(format!("/media/{folder}/{id}.jpg")),
        kind: MediaKind::Image,
    }
}

fn request(folders: &[&str]) -> LoadRequest {
    LoadRequest {
        start_time: 0,
        end_time: 100_000,
        log_source: PathBuf::from("history.json").into(),
        selected_folders: folders.iter().map(|f| f.to_string()).collect(),
    }
}

fn coordinator(log: FakeLogSource, catalog: &Arc<FakeCatalog>) -> LoadCoordinator {
    let catalog: Arc<dyn MediaCatalog> = catalog.clone();
    LoadCoordinator::new(Arc::new(log), catalog)
}

fn media_ids(state: &LoadState) -> Vec<i64> {
    state
        .result
        .as_ref()
        .map(|timeline| timeline.media_items.iter().map(|m| m.id).collect())
        .unwrap_or_default()
}

#[test]
fn completed_load_is_published_once() {
    let catalog = Arc::new(
        FakeCatalog::new(vec![image(1, "Camera", 2000)]).with_geotag(1, LatLng::new(1.0, 2.0)),
    );
    let coordinator = coordinator(FakeLogSource(log_json(&[(1000, 0.0, 0.0)])), &catalog);
    assert_eq!(coordinator.current_state(), LoadState::default());

    coordinator.submit(request(&[]));
    coordinator.wait_idle().expect("worker finished");
    let state = coordinator.current_state();
    assert!(state.completed);
    assert_eq!(state.progress, 100);
    assert_eq!(media_ids(&state), vec![1]);
}

#[test]
fn duplicate_submission_is_ignored() {
    let gate = Arc::new(Gate::default());
    let catalog = Arc::new(
        FakeCatalog::new(vec![image(1, "Camera", 2000)]).with_gate(Arc::clone(&gate)),
    );
    let coordinator = coordinator(FakeLogSource(log_json(&[(1000, 0.0, 0.0)])), &catalog);

    coordinator.submit(request(&["Camera"]));
    gate.wait_for(1);
    coordinator.submit(request(&["Camera"]));
    assert_eq!(coordinator.shared.lock().generation, 1);

    gate.open();
    coordinator.wait_idle().expect("worker finished");
    let finished = coordinator.current_state();
    assert!(finished.completed);

    // resubmitting a finished request keeps its result
    coordinator.submit(request(&["Camera"]));
    assert_eq!(coordinator.shared.lock().generation, 1);
    assert_eq!(coordinator.current_state(), finished);
    coordinator.wait_idle().expect("nothing running");
}

#[test]
fn folder_order_does_not_make_a_new_request() {
    let catalog = Arc::new(FakeCatalog::new(vec![]));
    let coordinator = coordinator(FakeLogSource(String::new()), &catalog);
    coordinator.submit(request(&["A", "B"]));
    coordinator.submit(request(&["B", "A", "B"]));
    coordinator.wait_idle().expect("worker finished");
    assert_eq!(coordinator.shared.lock().generation, 1);
}

#[test]
fn superseded_run_never_publishes() {
    let gate = Arc::new(Gate::default());
    let catalog = Arc::new(
        FakeCatalog::new(vec![image(1, "Old", 2000), image(2, "New", 3000)])
            .with_gate(Arc::clone(&gate)),
    );
    let coordinator = coordinator(FakeLogSource(log_json(&[(1000, 0.0, 0.0)])), &catalog);

    coordinator.submit(request(&["Old"]));
    gate.wait_for(1);
    assert!(coordinator.current_state().progress >= 70);

    coordinator.submit(request(&["New"]));
    assert_eq!(coordinator.current_state(), LoadState::default());

    gate.open();
    coordinator.wait_idle().expect("workers finished");
    let state = coordinator.current_state();
    assert!(state.completed);
    assert_eq!(media_ids(&state), vec![2]);
    // the superseded run stopped before touching its media
    assert_eq!(catalog.geotag_lookups(), vec![2]);
}

#[test]
fn new_request_resets_state() {
    let catalog = Arc::new(FakeCatalog::new(vec![image(1, "Camera", 2000)]));
    let coordinator = coordinator(FakeLogSource(log_json(&[(1000, 0.0, 0.0)])), &catalog);
    coordinator.submit(request(&[]));
    coordinator.wait_idle().expect("worker finished");
    assert!(coordinator.current_state().completed);

    let mut receiver = coordinator.subscribe();
    coordinator.submit(LoadRequest {
        log_source: LogSourceRef::none(),
        ..request(&[])
    });
    assert!(receiver.has_changed().expect("sender alive"));
    coordinator.wait_idle().expect("worker finished");
    let state = coordinator.current_state();
    assert!(state.completed);
    // without a log there is nothing to place the untagged image with
    assert!(media_ids(&state).is_empty());
}

#[tokio::test]
async fn observed_progress_is_monotonic_and_ends_at_100() -> anyhow::Result<()> {
    let records: Vec<(i64, f64, f64)> = (0..5000)
        .map(|i| (i * 10, 0.0, (i % 90) as f64))
        .collect();
    let catalog = Arc::new(FakeCatalog::new(
        (1..=50).map(|i| image(i, "Camera", i * 900)).collect(),
    ));
    let coordinator = coordinator(FakeLogSource(log_json(&records)), &catalog).with_config(
        PipelineConfig {
            progress_interval: 100,
            ..Default::default()
        },
    );

    let mut receiver = coordinator.subscribe();
    let idle_observer = coordinator.subscribe();
    drop(idle_observer);
    coordinator.submit(request(&[]));

    let mut last = 0;
    let finished = loop {
        tokio::time::timeout(Duration::from_secs(30), receiver.changed()).await??;
        let state = receiver.borrow_and_update().clone();
        assert!(state.progress >= last, "{} < {last}", state.progress);
        last = state.progress;
        if state.completed {
            break state;
        }
        assert!(state.progress < 100);
        assert!(state.result.is_none());
    };
    assert_eq!(finished.progress, 100);
    assert_eq!(media_ids(&finished).len(), 50);
    coordinator.wait_idle().expect("worker finished");
    Ok(())
}

#[test]
fn dropping_coordinator_cancels_run() {
    let gate = Arc::new(Gate::default());
    let catalog = Arc::new(
        FakeCatalog::new(vec![image(1, "Camera", 2000)]).with_gate(Arc::clone(&gate)),
    );
    let coordinator = coordinator(FakeLogSource(String::new()), &catalog);
    coordinator.submit(request(&[]));
    gate.wait_for(1);
    let cancel = coordinator.shared.lock().cancel.clone();
    drop(coordinator);
    assert!(cancel.is_cancelled());
    gate.open();
}

#[test]
fn stale_generation_cannot_publish() {
    let gate = Arc::new(Gate::default());
    let catalog = Arc::new(
        FakeCatalog::new(vec![image(1, "Old", 2000), image(2, "New", 3000)])
            .with_geotag(1, LatLng::new(1.0, 1.0))
            .with_gate(Arc::clone(&gate)),
    );
    let coordinator = coordinator(FakeLogSource(log_json(&[(1000, 0.0, 0.0)])), &catalog);
    coordinator.submit(request(&["Old"]));
    gate.wait_for(1);
    coordinator.submit(request(&["New"]));
    let current = coordinator.shared.lock().generation;
    assert_eq!(current, 2);

    let published = coordinator.shared.publish(1, |state| {
        state.progress = 99;
        true
    });
    assert!(!published);
    assert_eq!(coordinator.current_state(), LoadState::default());

    // a run of the old generation that was never cancelled finishes its
    // pipeline and still has its result discarded
    gate.open();
    coordinator.wait_idle().expect("workers finished");
    let finished = coordinator.current_state();
    assert_eq!(media_ids(&finished), vec![2]);
    Worker {
        generation: 1,
        request: request(&["Old"]),
        cancel: CancellationToken::new(),
        shared: Arc::clone(&coordinator.shared),
        log_source: Arc::clone(&coordinator.log_source),
        catalog: Arc::clone(&coordinator.catalog),
        config: PipelineConfig::default(),
        logger: coordinator.logger.clone(),
    }
    .run();
    assert_eq!(catalog.geotag_lookups().last(), Some(&1));
    assert_eq!(coordinator.current_state(), finished);
}
