//! Integration tests for the pull-through mirror
//!
//! Each test runs a throwaway upstream on an ephemeral port and points the
//! registry's mirror at it.

use std::io::Read;
use std::sync::Arc;

use axum::http::StatusCode;
use flate2::read::GzDecoder;
use gem_registry::advisory::Advisory;
use gem_registry::filter::FilterAction;
use gem_registry::marshal::decode_specs;
use gem_registry::storage::gem_path;

mod common;
use common::{mirror_setup, spawn_upstream, StaticAdvisories, TestGem};

fn spec_names(gz: &[u8]) -> Vec<String> {
    let mut raw = Vec::new();
    GzDecoder::new(gz).read_to_end(&mut raw).unwrap();
    decode_specs(&raw)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect()
}

fn critical_advisory(gem: &str) -> Advisory {
    Advisory {
        gem: gem.to_string(),
        cve: Some("CVE-2024-0001".to_string()),
        url: "https://example.com/CVE-2024-0001".to_string(),
        title: "remote code execution".to_string(),
        cvss_v3: Some(9.8),
        ..Advisory::default()
    }
}

#[tokio::test]
async fn test_miss_then_hit_fetches_once() {
    let upstream = spawn_upstream(&[TestGem::new("baz", "2.0.0")]).await;
    let setup = mirror_setup(&upstream, Arc::new(StaticAdvisories::default()), |_| {});

    let first = setup.server.get("/gems/baz-2.0.0.gem").await;
    first.assert_status_ok();
    let second = setup.server.get("/gems/baz-2.0.0.gem").await;
    second.assert_status_ok();

    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(upstream.hits(), 1);

    let mirror = setup.state.mirror.as_ref().unwrap();
    let recorded = setup
        .state
        .store
        .get_versions(mirror.namespace(), "baz")
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].number, "2.0.0");
}

#[tokio::test]
async fn test_concurrent_misses_share_one_download() {
    let upstream = spawn_upstream(&[TestGem::new("baz", "2.0.0")]).await;
    let setup = mirror_setup(&upstream, Arc::new(StaticAdvisories::default()), |_| {});

    let (a, b, c) = tokio::join!(
        async { setup.server.get("/gems/baz-2.0.0.gem").await },
        async { setup.server.get("/gems/baz-2.0.0.gem").await },
        async { setup.server.get("/gems/baz-2.0.0.gem").await },
    );
    a.assert_status_ok();
    b.assert_status_ok();
    c.assert_status_ok();
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_vulnerable_gem_is_refused_and_not_cached() {
    let upstream = spawn_upstream(&[TestGem::new("vuln", "1.0.0")]).await;
    let advisories = Arc::new(StaticAdvisories::with("vuln", critical_advisory("vuln")));
    let setup = mirror_setup(&upstream, advisories.clone(), |config| {
        config.cve.max_severity = "high".to_string();
    });

    let response = setup.server.get("/gems/vuln-1.0.0.gem").await;
    response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    assert!(response.text().contains("CVE-2024-0001"));

    assert_eq!(upstream.hits(), 0);
    assert_eq!(advisories.calls(), 1);
    let mirror = setup.state.mirror.as_ref().unwrap();
    let path = gem_path(
        setup.state.indexer.gem_dir(),
        mirror.namespace(),
        "vuln-1.0.0.gem",
    )
    .unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_critical_ceiling_admits_critical_advisory() {
    let upstream = spawn_upstream(&[TestGem::new("vuln", "1.0.0")]).await;
    let advisories = Arc::new(StaticAdvisories::with("vuln", critical_advisory("vuln")));
    let setup = mirror_setup(&upstream, advisories, |config| {
        config.cve.max_severity = "critical".to_string();
    });

    setup
        .server
        .get("/gems/vuln-1.0.0.gem")
        .await
        .assert_status_ok();
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_cve_gate_disabled_skips_lookup() {
    let upstream = spawn_upstream(&[TestGem::new("vuln", "1.0.0")]).await;
    let advisories = Arc::new(StaticAdvisories::with("vuln", critical_advisory("vuln")));
    let setup = mirror_setup(&upstream, advisories.clone(), |config| {
        config.cve.enabled = false;
    });

    setup
        .server
        .get("/gems/vuln-1.0.0.gem")
        .await
        .assert_status_ok();
    assert_eq!(advisories.calls(), 0);
}

#[tokio::test]
async fn test_filter_refuses_before_advisory_lookup() {
    let upstream = spawn_upstream(&[TestGem::new("blocked", "1.0.0")]).await;
    let advisories = Arc::new(StaticAdvisories::default());
    let setup = mirror_setup(&upstream, advisories.clone(), |config| {
        config.filter.enabled = true;
        config.filter.action = FilterAction::Deny;
        config.filter.patterns = vec!["^blocked-".to_string()];
    });

    setup
        .server
        .get("/gems/blocked-1.0.0.gem")
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(advisories.calls(), 0);
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn test_upstream_not_found_is_propagated() {
    let upstream = spawn_upstream(&[]).await;
    let setup = mirror_setup(&upstream, Arc::new(StaticAdvisories::default()), |_| {});

    setup
        .server
        .get("/gems/missing-1.0.0.gem")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_index_endpoints_redirect_upstream() {
    let upstream = spawn_upstream(&[]).await;
    let setup = mirror_setup(&upstream, Arc::new(StaticAdvisories::default()), |_| {});

    let response = setup.server.get("/versions").await;
    response.assert_status(StatusCode::FOUND);
    assert_eq!(
        response.header("location"),
        format!("{}/versions", upstream.url).as_str()
    );

    let response = setup
        .server
        .get("/api/v1/dependencies")
        .add_query_param("gems", "rack")
        .await;
    response.assert_status(StatusCode::FOUND);
    assert_eq!(
        response.header("location"),
        format!("{}/api/v1/dependencies?gems=rack", upstream.url).as_str()
    );
}

#[tokio::test]
async fn test_private_dependencies_fall_back_to_upstream() {
    let upstream = spawn_upstream(&[]).await;
    let setup = mirror_setup(&upstream, Arc::new(StaticAdvisories::default()), |_| {});

    let response = setup
        .server
        .get("/private/api/v1/dependencies.json")
        .add_query_param("gems", "rack")
        .await;
    response.assert_status(StatusCode::FOUND);
    assert_eq!(
        response.header("location"),
        format!("{}/api/v1/dependencies.json?gems=rack", upstream.url).as_str()
    );
}

#[tokio::test]
async fn test_status_reports_mirror() {
    let upstream = spawn_upstream(&[]).await;
    let setup = mirror_setup(&upstream, Arc::new(StaticAdvisories::default()), |_| {});

    let status: serde_json::Value = setup.server.get("/status").await.json();
    assert_eq!(status["mirror"]["namespace"], "127.0.0.1");
    assert_eq!(status["private_namespace"], "private");
}

#[tokio::test]
async fn test_mirrored_gem_stays_out_of_private_index() {
    let upstream = spawn_upstream(&[TestGem::new("baz", "2.0.0")]).await;
    let setup = mirror_setup(&upstream, Arc::new(StaticAdvisories::default()), |_| {});
    assert_eq!(setup.state.private_namespace(), "private");

    setup
        .server
        .post("/private/api/v1/gems")
        .bytes(TestGem::new("foo", "1.0.0").build().into())
        .await
        .assert_status_ok();
    setup
        .server
        .get("/gems/baz-2.0.0.gem")
        .await
        .assert_status_ok();

    let summaries: serde_json::Value = setup.server.post("/admin/api/v1/reindex").await.json();
    let namespaces: Vec<&String> = summaries.as_object().unwrap().keys().collect();
    assert_eq!(namespaces, vec!["127.0.0.1", "private"]);
    assert_eq!(summaries["private"]["indexed"], 1);
    assert_eq!(summaries["127.0.0.1"]["indexed"], 1);

    let specs = setup.server.get("/private/specs.4.8.gz").await;
    specs.assert_status_ok();
    assert_eq!(spec_names(specs.as_bytes()), vec!["foo".to_string()]);
    assert_eq!(setup.server.get("/private/names").await.text(), "---\nfoo\n");

    let mirror = setup.state.mirror.as_ref().unwrap();
    assert!(setup
        .state
        .store
        .get_versions("private", "baz")
        .unwrap()
        .is_empty());
    assert_eq!(
        setup
            .state
            .store
            .get_versions(mirror.namespace(), "baz")
            .unwrap()
            .len(),
        1
    );
}
