//! Property-based tests for URL normalization and model selection

use nexa_agent::settings::{normalize_api_url, ModelPreferences};
use nexa_agent::ServerType;
use proptest::prelude::*;

fn raw_url() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just(""), Just("http://"), Just("https://")],
        "[a-z][a-z0-9]{0,12}",
        1u16..=65535,
        prop_oneof![Just(""), Just("/"), Just("/v1"), Just("/v1/"), Just("/api"), Just("/api//")],
    )
        .prop_map(|(scheme, host, port, suffix)| format!("{scheme}{host}:{port}{suffix}"))
}

fn server_type() -> impl Strategy<Value = ServerType> {
    prop_oneof![Just(ServerType::LmStudio), Just(ServerType::Ollama)]
}

/// Normalizing an already normalized URL changes nothing
#[test]
fn test_normalization_is_idempotent() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(raw_url(), server_type(), any::<bool>()),
            |(raw, server_type, canonical)| {
                let once = normalize_api_url(&raw, server_type, canonical).unwrap();
                let twice = normalize_api_url(&once, server_type, canonical).unwrap();
                prop_assert_eq!(&once, &twice);
                prop_assert!(!once.ends_with('/'));
                prop_assert!(!once.ends_with("/v1"));
                prop_assert!(!once.ends_with("/api"));
                Ok(())
            },
        )
        .unwrap();
}

/// With canonical ports on, the result always uses the server type's port
#[test]
fn test_canonical_port_is_enforced() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(raw_url(), server_type()), |(raw, server_type)| {
            let url = normalize_api_url(&raw, server_type, true).unwrap();
            let expected = format!(":{}", server_type.conventional_port());
            prop_assert!(url.ends_with(&expected) || url.starts_with("https://"));
            Ok(())
        })
        .unwrap();
}

proptest! {
    /// Selection is deterministic and always picks a listed model
    #[test]
    fn test_selection_picks_listed_model(models in prop::collection::vec("[a-zA-Z0-9.:-]{1,16}", 1..8)) {
        let preferences = ModelPreferences::default();
        let first = preferences.select(&models).cloned();
        let second = preferences.select(&models).cloned();
        prop_assert_eq!(&first, &second);
        let chosen = first.unwrap();
        prop_assert!(models.contains(&chosen));
        if models.iter().any(|m| m.to_lowercase().contains("qwen")) {
            prop_assert!(chosen.to_lowercase().contains("qwen"));
        }
    }

    /// Selection never invents a model for an empty list
    #[test]
    fn test_selection_on_empty_list(keywords in prop::collection::vec("[a-z]{1,6}", 0..4)) {
        let preferences = ModelPreferences::new(keywords);
        prop_assert!(preferences.select(&[]).is_none());
    }
}
