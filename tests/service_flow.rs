use std::fs;

use fairsim::config::EngineConfig;
use fairsim::error::{ServiceError, StoreError};
use fairsim::params::ParameterInput;
use fairsim::service::{FairService, RunRequest};
use fairsim::store::ListQuery;

fn config(dir: &tempfile::TempDir) -> EngineConfig {
    EngineConfig {
        min_iterations: 10,
        default_iterations: 2_000,
        seed: Some(2024),
        db_path: dir.path().join("fairsim.db"),
        ..Default::default()
    }
}

fn breach(notes: &str, tags: &str) -> RunRequest {
    let mut request = RunRequest::new(ParameterInput {
        asset_value: 1_000_000.0,
        tef_min: 0.1,
        tef_max: 5.0,
        vulnerability_percent: 25.0,
        primary_loss_min: 10_000.0,
        primary_loss_max: 500_000.0,
        secondary_loss_min: 0.0,
        secondary_loss_max: 100_000.0,
        iterations: None,
    });
    request.notes = notes.to_string();
    request.tags = tags.to_string();
    request
}

#[test]
fn runs_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let first = {
        let mut svc = FairService::open(config(&dir)).unwrap();
        svc.run(&breach("laptop theft", "endpoint,q3")).unwrap()
    };

    let svc = FairService::open(config(&dir)).unwrap();
    let detail = svc.detail(first.id).unwrap();
    assert_eq!(detail.simulation.summary, first.summary);
    assert_eq!(detail.simulation.seed, Some(2024));
    assert_eq!(detail.simulation.notes, "laptop theft");
    assert_eq!(detail.simulation.tag_list(), vec!["endpoint", "q3"]);
    assert_eq!(detail.histogram, first.histogram);
}

#[test]
fn same_seed_reproduces_the_same_summary() {
    let dir = tempfile::tempdir().unwrap();
    let mut svc = FairService::open(config(&dir)).unwrap();
    let a = svc.run(&breach("", "")).unwrap();
    let b = svc.run(&breach("", "")).unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(a.summary, b.summary);
}

#[test]
fn list_filters_and_pages_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut svc = FairService::open(config(&dir)).unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
        let tags = if i % 2 == 0 { "cloud" } else { "onprem" };
        ids.push(svc.run(&breach(&format!("run {i}"), tags)).unwrap().id);
    }

    let mut query = ListQuery::new(svc.config());
    query.limit = 2;
    let page = svc.list(&query).unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.pages, 3);
    assert_eq!(page.items.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

    query.page = 3;
    assert_eq!(svc.list(&query).unwrap().items.len(), 1);

    let mut tagged = ListQuery::new(svc.config());
    tagged.tag = Some("cloud".to_string());
    assert_eq!(svc.list(&tagged).unwrap().total, 3);

    let mut search = ListQuery::new(svc.config());
    search.search = Some("run 1".to_string());
    let found = svc.list(&search).unwrap();
    assert_eq!(found.total, 1);
    assert_eq!(found.items[0].id, ids[1]);
}

#[test]
fn export_file_then_delete() {
    let dir = tempfile::tempdir().unwrap();
    let mut svc = FairService::open(config(&dir)).unwrap();
    let id = svc.run(&breach("with, comma", "")).unwrap().id;

    let target = dir.path().join("out.csv");
    let written = svc.export_to_file(id, Some(&target)).unwrap();
    assert_eq!(written, target);
    let text = fs::read_to_string(&target).unwrap();
    assert!(text.starts_with(&format!("Simulation ID,{id}\n")));
    let rows: Vec<&str> = text
        .lines()
        .skip_while(|l| !l.starts_with("Iteration,TEF Value"))
        .skip(1)
        .collect();
    assert_eq!(rows.len(), 2_000);
    assert!(rows[0].starts_with("1,"));
    assert!(rows[1_999].starts_with("2000,"));
    assert!(text.contains("\n99th Percentile,"));

    svc.delete(id).unwrap();
    assert_eq!(svc.list(&ListQuery::new(svc.config())).unwrap().total, 0);
    assert!(matches!(
        svc.export_to_file(id, Some(&target)),
        Err(ServiceError::Store(StoreError::NotFound { .. }))
    ));
}
