//! CLI value parsing and defaults of the mode enums.

use clap::ValueEnum as _;
use shadow_pool::mode::{ExecutionMode, PoolMode, ReleasePolicy};

#[test]
fn pool_mode_defaults_to_fixed() {
    assert_eq!(PoolMode::default(), PoolMode::Fixed);
}

#[test]
fn pool_mode_parses_from_cli_values() {
    assert_eq!(PoolMode::from_str("fixed", false).expect("fixed"), PoolMode::Fixed);
    assert_eq!(
        PoolMode::from_str("dynamic", false).expect("dynamic"),
        PoolMode::Dynamic
    );
    assert!(PoolMode::from_str("swarm", false).is_err());
}

#[test]
fn execution_mode_follows_topology() {
    assert_eq!(ExecutionMode::default_for(PoolMode::Fixed), ExecutionMode::Streaming);
    assert_eq!(ExecutionMode::default_for(PoolMode::Dynamic), ExecutionMode::Batch);
}

#[test]
fn release_policy_round_trips_through_serde() {
    assert_eq!(ReleasePolicy::default(), ReleasePolicy::Reuse);
    let json = serde_json::to_string(&ReleasePolicy::Retain).expect("json");
    assert_eq!(json, "\"retain\"");
}
