use sha2::{Digest, Sha256};
use transfer_monitor::config::{ChainConfig, MonitorConfig, StartBlock};
use transfer_monitor::domain::types::{ChainId, UsdCents};
use transfer_monitor::error::Error;

fn one_chain() -> MonitorConfig {
    MonitorConfig {
        chains: vec![ChainConfig::new(1, "ethereum").with_token(
            "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "USDT",
            6,
            Some(1.0),
        )],
        ..MonitorConfig::default()
    }
}

fn invalid_field(config: MonitorConfig) -> String {
    match config.validate() {
        Err(Error::ConfigInvalid(message)) => message,
        other => panic!("expected ConfigInvalid, got {other:?}"),
    }
}

#[test]
fn defaults_follow_documented_values() {
    let config = MonitorConfig::default();
    assert_eq!(config.threshold(), UsdCents(10_000_000));
    assert_eq!(config.top_n, 50);
    assert_eq!(config.max_plausible(), Some(UsdCents(100_000_000_000_000)));
    assert_eq!(config.retry_policy.max_attempts, 5);
    let chain = ChainConfig::new(1, "ethereum");
    assert_eq!(chain.start, StartBlock::Latest);
    assert_eq!(chain.poll_interval_ms, 2_000);
    one_chain().validate().expect("valid");
}

#[test]
fn validate_names_the_offending_field() {
    assert!(invalid_field(MonitorConfig::default()).contains("chains"));
    assert!(
        invalid_field(MonitorConfig {
            top_n: 0,
            ..one_chain()
        })
        .contains("top_n")
    );
    assert!(
        invalid_field(MonitorConfig {
            threshold_usd: f64::NAN,
            ..one_chain()
        })
        .contains("threshold_usd")
    );
    assert!(
        invalid_field(MonitorConfig {
            max_plausible_usd: Some(50.0),
            ..one_chain()
        })
        .contains("max_plausible_usd")
    );
    assert!(
        invalid_field(MonitorConfig {
            event_queue_capacity: 0,
            ..one_chain()
        })
        .contains("event_queue_capacity")
    );

    let mut bad_retry = one_chain();
    bad_retry.retry_policy.max_attempts = 0;
    assert!(invalid_field(bad_retry).contains("retry_policy.max_attempts"));

    let mut bad_token = one_chain();
    bad_token.chains[0] = ChainConfig::new(1, "ethereum").with_token("0x1234", "USDT", 6, None);
    assert!(invalid_field(bad_token).contains("tokens"));

    let mut too_precise = one_chain();
    too_precise.chains[0] = ChainConfig::new(1, "ethereum").with_token(
        "0xdac17f958d2ee523a2206206994597c13d831ec7",
        "USDT",
        77,
        None,
    );
    assert!(invalid_field(too_precise).contains("decimals"));

    let mut twice = one_chain();
    twice.chains.push(twice.chains[0].clone());
    assert!(invalid_field(twice).contains("configured twice"));

    let mut backwards = one_chain();
    backwards.chains[0].start = StartBlock::Block(100);
    backwards.chains[0].end_block = Some(99);
    assert!(invalid_field(backwards).contains("end_block"));
}

#[test]
fn parses_json_with_start_forms() {
    let raw = r#"{
        "threshold_usd": 250000,
        "top_n": 10,
        "chains": [
            {
                "chain_id": 56,
                "name": "bsc",
                "start": 41000000,
                "end_block": 41000100,
                "tokens": {
                    "0x55d398326f99059ff775485246999027b3197955": {"symbol": "USDT", "decimals": 18, "price_usd": 1.0}
                }
            },
            {
                "chain_id": 43114,
                "name": "avalanche",
                "start": "latest",
                "tokens": {
                    "0x49d5c2bdffac6ce2bfdb6640f4f80f226bc10bab": {"symbol": "WETH.e", "decimals": 18}
                }
            }
        ]
    }"#;
    let config = MonitorConfig::from_json_str(raw).expect("parse");
    assert_eq!(config.threshold(), UsdCents(25_000_000));
    assert_eq!(config.top_n, 10);
    assert_eq!(config.dedup_window_blocks, 10_000);
    let bsc = config.chain(ChainId(56)).expect("bsc");
    assert_eq!(bsc.start, StartBlock::Block(41_000_000));
    assert_eq!(bsc.max_blocks_per_batch, 500);
    let avax = config.chain(ChainId(43114)).expect("avalanche");
    assert_eq!(avax.start, StartBlock::Latest);

    let bad = raw.replace("\"latest\"", "\"earliest\"");
    assert!(matches!(
        MonitorConfig::from_json_str(&bad),
        Err(Error::Serialization(_))
    ));
}

#[test]
fn config_hash_is_sha256_of_canonical_json() {
    let config = one_chain();
    let value = serde_json::to_value(&config).expect("to value");
    let canonical = serde_json_canonicalizer::to_vec(&value).expect("canonical");
    let expected = hex::encode(Sha256::digest(&canonical));
    assert_eq!(config.config_hash().expect("hash"), expected);

    let mut changed = one_chain();
    changed.top_n = 51;
    assert_ne!(changed.config_hash().expect("hash"), expected);
}

#[test]
fn loads_config_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("monitor.json");
    std::fs::write(&path, serde_json::to_vec(&one_chain()).expect("json")).expect("write");
    let loaded = MonitorConfig::from_json_file(&path).expect("load");
    assert_eq!(loaded, one_chain());
    assert!(MonitorConfig::from_json_file(&tmp.path().join("missing.json")).is_err());
}
