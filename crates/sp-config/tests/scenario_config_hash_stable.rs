use sp_config::{load_layered_yaml_from_strings, SettlementConfig};

const BASE: &str = r#"
ledger:
  network: testnet
  platform_address: "rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe"
settlement:
  default_hourly_rate: 15
"#;

const OVERRIDE: &str = r#"
settlement:
  default_hourly_rate: 20
"#;

#[test]
fn same_layers_produce_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE, OVERRIDE]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE, OVERRIDE]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.config_hash.len(), 64);
}

#[test]
fn override_changes_hash_and_effective_value() {
    let base_only = load_layered_yaml_from_strings(&[BASE]).unwrap();
    let layered = load_layered_yaml_from_strings(&[BASE, OVERRIDE]).unwrap();
    assert_ne!(base_only.config_hash, layered.config_hash);

    let cfg = SettlementConfig::from_config_json(&layered.config_json).unwrap();
    assert_eq!(cfg.settlement.default_hourly_rate, 20.0);
    assert_eq!(
        cfg.ledger.platform_address.as_deref(),
        Some("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe")
    );
}
