//! Adapter registry and hot-reload tests

use crate::helpers::*;
use gateway_core::{
    AdapterHandle, AdapterType, GatewayError, GatewayResult, ProviderConfig, ProviderUpdate,
};
use gateway_providers::testing::{ScriptedAdapter, ScriptedFactory};
use gateway_providers::{AdapterFactory, AdapterFactoryRegistry};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Builds adapters that claim a type other than the one they are registered for
#[derive(Debug)]
struct MislabelingFactory;

impl AdapterFactory for MislabelingFactory {
    fn create(&self, config: &ProviderConfig) -> GatewayResult<AdapterHandle> {
        Ok(Arc::new(ScriptedAdapter::new(&config.name, "impostor")))
    }
}

fn scripted_factories() -> AdapterFactoryRegistry {
    AdapterFactoryRegistry::new()
        .with_factory("vllm", Arc::new(ScriptedFactory::new("vllm")))
        .with_factory("ollama", Arc::new(ScriptedFactory::new("ollama")))
}

async fn label(gateway: &TestGateway, name: &str) -> Option<String> {
    let adapter = gateway.manager.get_provider(name).ok()?;
    Some(adapter.chat(chat_request("ping")).await.ok()?.model)
}

#[tokio::test]
async fn test_factory_never_returns_mismatched_type() {
    let registry = scripted_factories().with_factory("mislabeled", Arc::new(MislabelingFactory));

    for adapter_type in ["vllm", "ollama"] {
        let config = ProviderConfig::new("p", adapter_type, "http://x");
        let adapter = registry.create(&config).expect("adapter");
        assert_eq!(adapter.adapter_type().as_str(), adapter_type);
    }

    let err = registry
        .create(&ProviderConfig::new("p", "mislabeled", "http://x"))
        .expect_err("type mismatch");
    assert!(matches!(err, GatewayError::AdapterInit { .. }));

    let err = registry
        .create(&ProviderConfig::new("p", "unregistered", "http://x"))
        .expect_err("unknown type");
    assert!(matches!(err, GatewayError::UnknownType { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reload_is_atomic_for_readers() {
    const READERS: usize = 4;

    let gateway = Arc::new(TestGateway::new(scripted_factories()));
    gateway
        .manager
        .create_provider(ProviderConfig::new("p", "vllm", "http://v0"))
        .await
        .expect("create");

    let stop = Arc::new(AtomicBool::new(false));
    let started = Arc::new(Barrier::new(READERS + 1));
    let mut readers = Vec::new();
    for _ in 0..READERS {
        let gateway = Arc::clone(&gateway);
        let stop = Arc::clone(&stop);
        let started = Arc::clone(&started);
        readers.push(tokio::spawn(async move {
            started.wait().await;
            let mut labels = HashSet::new();
            loop {
                let adapter = gateway.manager.get_provider("p").expect("always live");
                let response = adapter.chat(chat_request("ping")).await.expect("chat");
                assert!(
                    response.model.starts_with("http://v"),
                    "observed partial adapter: {}",
                    response.model
                );
                // name and type come from the same snapshot as the label
                assert_eq!(adapter.name(), "p");
                assert!(matches!(adapter.adapter_type().as_str(), "vllm" | "ollama"));
                labels.insert(response.model);

                if stop.load(Ordering::SeqCst) {
                    break;
                }
                tokio::task::yield_now().await;
            }
            labels
        }));
    }

    started.wait().await;
    for i in 1..=50 {
        let update = ProviderUpdate {
            base_url: Some(format!("http://v{i}")),
            adapter_type: Some(AdapterType::new(if i % 2 == 0 { "vllm" } else { "ollama" })),
            ..Default::default()
        };
        gateway
            .manager
            .update_provider("p", update)
            .await
            .expect("update");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    stop.store(true, Ordering::SeqCst);

    let mut seen = HashSet::new();
    for reader in readers {
        let labels = reader.await.expect("reader");
        assert!(!labels.is_empty());
        seen.extend(labels);
    }
    assert!(seen.len() > 1, "readers never overlapped a reload: {seen:?}");
    assert_eq!(label(&gateway, "p").await.as_deref(), Some("http://v50"));
}

#[tokio::test]
async fn test_disable_always_yields_not_found() {
    let gateway = TestGateway::new(scripted_factories());

    gateway
        .manager
        .create_provider(ProviderConfig::new("live", "vllm", "http://a"))
        .await
        .expect("create live");
    gateway
        .manager
        .create_provider(ProviderConfig::new("dormant", "vllm", "http://b").with_enabled(false))
        .await
        .expect("create dormant");

    for name in ["live", "dormant"] {
        if name == "dormant" {
            gateway.manager.enable(name).await.expect("enable");
        }
        gateway.manager.disable(name).await.expect("disable");

        let err = gateway.manager.get_provider(name).expect_err("disabled");
        assert!(err.is_not_found());
        let err = gateway
            .relay()
            .chat(gateway_core::CallerId::new("t"), name, chat_request("hi"))
            .await
            .expect_err("not routable");
        assert!(err.is_not_found());
    }
}

#[tokio::test]
async fn test_reload_all_isolates_invalid_provider() {
    let gateway = TestGateway::new(scripted_factories());
    gateway
        .manager
        .create_provider(ProviderConfig::new("p1", "vllm", "http://p1"))
        .await
        .expect("create p1");
    gateway
        .manager
        .create_provider(ProviderConfig::new("p2", "vllm", "http://p2"))
        .await
        .expect("create p2");

    // Break p2 in storage only; the running adapter stays until reload.
    let mut broken = gateway.manager.get_config("p2").await.expect("p2");
    broken.extra_config.insert("fail".to_string(), json!(true));
    gateway
        .manager
        .repository()
        .update(broken)
        .await
        .expect("persist broken config");

    let report = gateway.manager.reload_all().await.expect("reload all");
    assert!(!report.is_success());
    assert_eq!(report.succeeded, vec!["p1".to_string()]);
    assert_eq!(report.failed_names(), vec!["p2"]);

    assert_eq!(label(&gateway, "p1").await.as_deref(), Some("http://p1"));
    // failed construction keeps the previous adapter in service
    assert_eq!(label(&gateway, "p2").await.as_deref(), Some("http://p2"));
}

#[tokio::test]
async fn test_startup_seeds_do_not_override_records() {
    let gateway = TestGateway::new(scripted_factories());
    gateway
        .manager
        .create_provider(ProviderConfig::new("p1", "vllm", "http://persisted"))
        .await
        .expect("create");

    let inserted = gateway
        .manager
        .seed_provider(ProviderConfig::new("p1", "vllm", "http://seed"))
        .await
        .expect("seed existing");
    assert!(!inserted);

    let inserted = gateway
        .manager
        .seed_provider(ProviderConfig::new("p2", "ollama", "http://seed-2"))
        .await
        .expect("seed new");
    assert!(inserted);

    let report = gateway.manager.init_providers().await.expect("init");
    assert!(report.is_success());
    assert_eq!(label(&gateway, "p1").await.as_deref(), Some("http://persisted"));
    assert_eq!(label(&gateway, "p2").await.as_deref(), Some("http://seed-2"));
}
