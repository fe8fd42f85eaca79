//! Effect failures, nested namespaces, selector memoization and task policies

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use model_dispatch::prelude::*;
use model_dispatch::{run_effect_task, ActionLoggerConfig};

fn articles(namespace: &str) -> Model {
    Model::builder(namespace)
        .state(Value::from_iter([
            ("items".to_string(), Value::empty_list()),
            ("meta".to_string(), Value::from_iter([("page".to_string(), Value::from(1))])),
        ]))
        .mutation("add", |draft, payload| draft["items"].push(payload.clone()))
        .mutation("setPage", |draft, payload| draft["meta"]["page"] = payload.clone())
        .selector("titles", |slice, _, _| {
            Value::from(
                slice["items"]
                    .as_list()
                    .unwrap_or_default()
                    .iter()
                    .map(|item| item["title"].clone())
                    .collect::<Vec<_>>(),
            )
        })
        .build()
        .unwrap()
}

fn article(title: &str) -> Value {
    Value::from_iter([("title".to_string(), Value::from(title))])
}

#[tokio::test]
async fn test_failing_effect_rejects_with_its_own_failure() {
    let failure = EffectFailure::msg("backend unavailable");
    let thrown = failure.clone();
    let model = Model::builder("articles")
        .state(Value::from_iter([("items".to_string(), Value::empty_list())]))
        .mutation("add", |draft, payload| draft["items"].push(payload.clone()))
        .effect("fetchAll", move |_, _, _| {
            let thrown = thrown.clone();
            async move { Err(thrown) }
        })
        .build()
        .unwrap();
    let store = ModelStore::new([model]).unwrap();
    let _tasks = store.run_tasks().unwrap();
    let before = store.state();

    let rejected = store
        .bound_actions()
        .invoke("articles.fetchAll", Value::empty_map())
        .unwrap()
        .await
        .unwrap_err();

    assert!(rejected.ptr_eq(&failure));
    assert_eq!(rejected.to_string(), "backend unavailable");
    assert!(store.state().same(&before));
}

#[tokio::test]
async fn test_bare_envelope_is_not_compatible() {
    let model = Model::builder("articles")
        .effect("fetchAll", |_, _, _| async { Ok(Value::Null) })
        .build()
        .unwrap();
    let store = ModelStore::new([model.clone()]).unwrap();
    let effect = model.model_effects().get("fetchAll").unwrap().clone();

    let envelope = ActionEnvelope::new("articles.fetchAll", Value::empty_map());
    let err = run_effect_task(effect, envelope, store.toolkit())
        .await
        .unwrap_err();

    match err {
        ModelError::NonCompatibleAction { action } => {
            assert_eq!(action, r#"{"type":"articles.fetchAll","payload":{}}"#);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_nested_namespaces_share_one_tree() {
    let store = ModelStore::new([articles("projectA.articles"), articles("projectB.articles")]).unwrap();
    let actions = store.bound_actions();

    let _ = actions
        .invoke("projectA.articles.add", article("Rust"))
        .unwrap();

    let state = store.state();
    assert_eq!(
        state.get_path("projectA.articles.items").map(Value::len),
        Some(1)
    );
    assert_eq!(
        state.get_path("projectB.articles.items").map(Value::len),
        Some(0)
    );
}

#[tokio::test]
async fn test_edits_preserve_untouched_identity() {
    let store = ModelStore::new([articles("projectA.articles"), articles("projectB.articles")]).unwrap();
    let before = store.state();

    store.dispatch(ActionEnvelope::new("projectA.articles.setPage", Value::from(2)));
    let after = store.state();

    let slice_before = before.get_path("projectA.articles").unwrap();
    let slice_after = after.get_path("projectA.articles").unwrap();
    assert!(!slice_after.same(slice_before));
    assert!(slice_after["items"].same(&slice_before["items"]));
    assert!(after["projectB"].same(&before["projectB"]));

    store.dispatch(ActionEnvelope::new("projectA.articles.unknown", Value::Null));
    assert!(store.state().same(&after));
}

#[test]
fn test_selector_output_is_memoized() {
    let store = ModelStore::new([articles("projectA.articles"), articles("projectB.articles")]).unwrap();
    store.dispatch(ActionEnvelope::new("projectA.articles.add", article("Rust")));

    let first = store.select("projectA.articles.titles", &[]).unwrap();
    assert_eq!(first[0].as_str(), Some("Rust"));

    store.dispatch(ActionEnvelope::new("projectB.articles.add", article("Go")));
    let second = store.select("projectA.articles.titles", &[]).unwrap();
    assert!(second.same(&first));

    store.dispatch(ActionEnvelope::new("projectA.articles.add", article("Zig")));
    let third = store.select("projectA.articles.titles", &[]).unwrap();
    assert!(!third.same(&first));
    assert_eq!(third.len(), 2);
}

#[test]
fn test_store_rejects_overlapping_namespaces() {
    let err = ModelStore::new([
        articles("projectA.articles"),
        Model::builder("projectA").build().unwrap(),
    ])
    .unwrap_err();
    assert!(matches!(err, ModelError::OverlappingNamespace { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_latest_policy_cancels_superseded_search() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let search = Model::builder("search")
        .state(Value::from_iter([("results".to_string(), Value::empty_list())]))
        .mutation("setResults", |draft, payload| draft["results"] = payload.clone())
        .effect_with_policy("query", EffectPolicy::Latest, move |payload, toolkit, actions| {
            let counter = counter.clone();
            async move {
                toolkit.delay(Duration::from_millis(100)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                toolkit.put(actions.create("setResults", Value::from(vec![payload.clone()]))?);
                Ok(payload)
            }
        })
        .build()
        .unwrap();
    let store = ModelStore::new([search]).unwrap();
    let _tasks = store.run_tasks().unwrap();
    let actions = store.bound_actions();

    let first = actions.invoke("search.query", Value::from("ru")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = actions.invoke("search.query", Value::from("rust")).unwrap();

    let cancelled = first.await.unwrap_err();
    assert!(matches!(
        cancelled.downcast_ref::<ModelError>(),
        Some(ModelError::EffectCancelled { .. })
    ));
    assert_eq!(second.await.unwrap().as_str(), Some("rust"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.state().get_path("search.results").map(|r| r[0].clone()),
        Some(Value::from("rust"))
    );
}

#[tokio::test]
async fn test_effects_share_context() {
    let session = Model::builder("session")
        .effect("login", |payload, toolkit, _| async move {
            toolkit.set_context("user", payload);
            Ok(Value::Null)
        })
        .effect("whoami", |_, toolkit, _| async move {
            Ok(toolkit.get_context("user").unwrap_or_default())
        })
        .build()
        .unwrap();
    let store = ModelStore::new([session]).unwrap();
    let _tasks = store.run_tasks().unwrap();
    let actions = store.bound_actions();

    actions
        .invoke("session.login", Value::from("ada"))
        .unwrap()
        .await
        .unwrap();
    let user = actions
        .invoke("session.whoami", Value::empty_map())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(user.as_str(), Some("ada"));
}

#[tokio::test]
async fn test_retry_inside_effect() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let flaky = Model::builder("flaky")
        .effect("load", move |_, _, _| {
            let attempts = seen.clone();
            async move {
                let value = retry(3, Duration::from_millis(1), || {
                    let attempts = attempts.clone();
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(EffectFailure::msg("try again"))
                        } else {
                            Ok(Value::from("loaded"))
                        }
                    }
                })
                .await?;
                Ok(value)
            }
        })
        .build()
        .unwrap();
    let store = ModelStore::new([flaky]).unwrap();
    let _tasks = store.run_tasks().unwrap();

    let value = store
        .bound_actions()
        .invoke("flaky.load", Value::empty_map())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(value.as_str(), Some("loaded"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn test_action_log_records_filtered_dispatches() {
    let config = StoreConfig::from_json(
        r#"{"logger": {"exclude_patterns": ["*.setPage"]}, "action_log_capacity": 2}"#,
    )
    .unwrap();
    let store = ModelStore::with_config([articles("blog")], config).unwrap();

    store.dispatch(ActionEnvelope::new("blog.add", article("a")));
    store.dispatch(ActionEnvelope::new("blog.setPage", Value::from(3)));
    store.dispatch(ActionEnvelope::new("blog.add", article("b")));
    store.dispatch(ActionEnvelope::new("blog.add", article("c")));

    let log = store.action_log().unwrap();
    let log = log.lock();
    assert_eq!(log.len(), 2);
    let sequences: Vec<_> = log.entries().map(|e| e.sequence).collect();
    assert_eq!(sequences, [1, 2]);
    assert!(log.entries().all(|e| e.action_type == "blog.add"));

    let config = ActionLoggerConfig::new(Some("blog.*"), Some("*.setPage"));
    assert!(config.should_log("blog.add"));
    assert!(!config.should_log("blog.setPage"));
}
