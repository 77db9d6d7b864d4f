//! Engine-level integration tests: store, index, persistence, watcher.

use decoy::expectation::Expectation;
use decoy::persistence::{
    load_initialization_file, spawn_initialization_watcher, FilePersistence,
};
use decoy::request::RequestRecord;
use decoy::store::{ClearFilter, ExpectationStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn expectation(doc: serde_json::Value) -> Expectation {
    serde_json::from_value(doc).unwrap()
}

fn request(method: &str, path: &str) -> RequestRecord {
    RequestRecord {
        method: method.to_string(),
        path: path.to_string(),
        ..Default::default()
    }
}

fn sample_set() -> Vec<Expectation> {
    vec![
        expectation(json!({
            "id": "users-get",
            "httpRequest": {"method": "GET", "path": "/api/users"},
            "httpResponse": {"statusCode": 200, "body": {"users": []}}
        })),
        expectation(json!({
            "id": "users-wildcard",
            "priority": 2,
            "httpRequest": {"path": "/api/users/*"},
            "httpResponse": {"statusCode": 200}
        })),
        expectation(json!({
            "id": "proxy",
            "httpRequest": {"path": "/proxy/*"},
            "httpForward": {"host": "upstream.test", "port": 8443, "scheme": "HTTPS"}
        })),
        expectation(json!({
            "id": "json-body",
            "httpRequest": {
                "method": "POST",
                "path": "/api/orders",
                "body": {"type": "json", "value": {"sku": "${json-unit.any-string}"}}
            },
            "httpResponse": {"statusCode": 202, "delay": 50}
        })),
    ]
}

#[tokio::test]
async fn persisted_round_trip_preserves_the_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("expectations.json");

    let store = ExpectationStore::new(Some(Arc::new(
        FilePersistence::new(path.clone()).unwrap(),
    )));
    for exp in sample_set() {
        store.upsert(exp).await.unwrap();
    }
    let before = store.list();

    // load(save(S)) == S through a fresh store on the same path.
    let restarted = ExpectationStore::new(Some(Arc::new(
        FilePersistence::new(path).unwrap(),
    )));
    restarted.initialize().await;
    assert_eq!(restarted.list(), before);
    assert!(restarted.index_in_lockstep());
}

#[tokio::test]
async fn duplicate_persisted_ids_get_fresh_ones() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("expectations.json");

    // Hand-write a persistence file with a duplicated id.
    let documents = json!([
        {"id": "dup", "httpRequest": {"path": "/a"}, "httpResponse": {"body": "one"}},
        {"id": "dup", "httpRequest": {"path": "/b"}, "httpResponse": {"body": "two"}}
    ]);
    std::fs::write(&path, serde_json::to_string_pretty(&documents).unwrap()).unwrap();

    let store = ExpectationStore::new(Some(Arc::new(FilePersistence::new(path).unwrap())));
    store.initialize().await;

    assert_eq!(store.len(), 2);
    let ids: Vec<String> = store
        .list()
        .iter()
        .map(|e| e.id().to_string())
        .collect();
    assert!(ids.contains(&"dup".to_string()));
    assert_eq!(
        ids.iter().filter(|id| id.as_str() == "dup").count(),
        1,
        "second occurrence must be re-identified"
    );
}

#[tokio::test]
async fn find_agrees_with_a_full_scan() {
    let store = ExpectationStore::new(None);
    for exp in sample_set() {
        store.upsert(exp).await.unwrap();
    }

    let requests = [
        request("GET", "/api/users"),
        request("GET", "/api/users/42"),
        request("POST", "/api/users"),
        request("GET", "/proxy/whatever"),
        request("GET", "/unrelated"),
        request("DELETE", "/api/users"),
    ];

    for req in &requests {
        let found = store.find(req);
        // Brute force over the whole set, applying the same selection
        // rules, must agree with the indexed path.
        let all = store.list();
        let matching: Vec<&Expectation> = all
            .iter()
            .filter(|e| {
                decoy::expectation::admit((*e).clone())
                    .unwrap()
                    .matcher
                    .matches(req)
            })
            .collect();

        match found {
            None => assert!(
                matching.is_empty(),
                "find missed a match for {} {}",
                req.method,
                req.path
            ),
            Some(found) => {
                let responses: Vec<&&Expectation> = matching
                    .iter()
                    .filter(|e| e.http_response.is_some())
                    .collect();
                let pool: Vec<&&Expectation> = if responses.is_empty() {
                    matching.iter().collect()
                } else {
                    responses
                };
                let best = pool
                    .into_iter()
                    .max_by(|a, b| {
                        a.priority
                            .cmp(&b.priority)
                            .then_with(|| a.id().cmp(b.id()))
                    })
                    .unwrap();
                assert_eq!(found.id(), best.id());
            }
        }
    }
}

#[tokio::test]
async fn index_stays_in_lockstep_through_mutations() {
    let store = ExpectationStore::new(None);
    for exp in sample_set() {
        store.upsert(exp).await.unwrap();
    }
    assert!(store.index_in_lockstep());

    store
        .upsert(expectation(json!({
            "id": "users-get",
            "httpRequest": {"method": "PUT", "path": "/api/users"},
            "httpResponse": {}
        })))
        .await
        .unwrap();
    assert!(store.index_in_lockstep());

    store.delete("proxy").await;
    assert!(store.index_in_lockstep());

    store
        .clear(ClearFilter::ByRequest {
            method: None,
            path: Some("/api/users/*".to_string()),
        })
        .await;
    assert!(store.index_in_lockstep());
    assert!(store.get("users-wildcard").is_none());

    store.clear(ClearFilter::All).await;
    assert!(store.is_empty());
    assert!(store.index_in_lockstep());
}

#[tokio::test]
async fn concurrent_adds_and_finds_never_see_partial_state() {
    let store = Arc::new(ExpectationStore::new(None));

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for i in 0..50 {
                store
                    .upsert(expectation(json!({
                        "id": format!("e{i:03}"),
                        "httpRequest": {"method": "GET", "path": format!("/gen/{i}")},
                        "httpResponse": {}
                    })))
                    .await
                    .unwrap();
            }
        })
    };

    let reader = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for i in 0..50 {
                // Either pre-state (no match) or post-state (a sound match);
                // a partial index would surface as an unsound result.
                if let Some(found) = store.find(&request("GET", &format!("/gen/{i}"))) {
                    assert_eq!(found.id(), format!("e{i:03}"));
                }
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(store.len(), 50);
    assert!(store.index_in_lockstep());
}

#[tokio::test]
async fn initialization_watcher_reloads_and_keeps_last_good() {
    let dir = tempfile::tempdir().unwrap();
    let init_path = dir.path().join("init.json");

    std::fs::write(
        &init_path,
        serde_json::to_string_pretty(&json!([
            {"id": "seed", "httpRequest": {"path": "/seed"}, "httpResponse": {}}
        ]))
        .unwrap(),
    )
    .unwrap();

    let store = Arc::new(ExpectationStore::new(None));
    let initial_hash = load_initialization_file(&store, &init_path).await;
    assert_eq!(store.len(), 1);

    let (shutdown, rx) = broadcast::channel(1);
    let watcher = spawn_initialization_watcher(
        Arc::clone(&store),
        init_path.clone(),
        initial_hash,
        rx,
    );

    // An operator edit replaces the whole set.
    std::fs::write(
        &init_path,
        serde_json::to_string_pretty(&json!([
            {"id": "a", "httpRequest": {"path": "/a"}, "httpResponse": {}},
            {"id": "b", "httpRequest": {"path": "/b"}, "httpResponse": {}}
        ]))
        .unwrap(),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(store.len(), 2);
    assert!(store.get("seed").is_none());

    // A broken edit is rejected wholesale; the last good set stays.
    std::fs::write(
        &init_path,
        serde_json::to_string_pretty(&json!([
            {"id": "c", "httpRequest": {"path": "/c"}}
        ]))
        .unwrap(),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(store.len(), 2);
    assert!(store.get("a").is_some());
    assert!(store.get("b").is_some());

    let _ = shutdown.send(());
    let _ = watcher.await;
}
