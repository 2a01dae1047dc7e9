use sp_config::{load_layered_yaml_from_strings, report_unused_keys, LedgerNetwork, UnusedKeyPolicy};

const YAML: &str = r#"
ledger:
  network: paper
  rpc_url: "https://s.altnet.rippletest.net:51234"
settlement:
  fee_buffer_xrp: 5

unused_section:
  foo: 123
"#;

#[test]
fn warn_reports_unused_keys_without_error() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).expect("config load must succeed");
    let report = report_unused_keys(LedgerNetwork::Paper, &loaded.config_json, UnusedKeyPolicy::Warn)
        .expect("warn must not error");

    assert!(!report.is_clean());
    assert!(report
        .unused_leaf_pointers
        .contains(&"/unused_section/foo".to_string()));
    // The paper ledger never reads the RPC endpoint.
    assert!(report
        .unused_leaf_pointers
        .contains(&"/ledger/rpc_url".to_string()));
    assert!(!report
        .unused_leaf_pointers
        .contains(&"/settlement/fee_buffer_xrp".to_string()));
}

#[test]
fn fail_policy_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).expect("config load must succeed");
    let err = report_unused_keys(LedgerNetwork::Testnet, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_UNUSED_KEYS"), "got: {msg}");
    assert!(msg.contains("network=testnet"), "got: {msg}");
    assert!(msg.contains("/unused_section/foo"), "got: {msg}");
}

#[test]
fn unused_pointers_are_sorted() {
    let yaml = "zeta: 1\nalpha: 2\nsettlement:\n  certificate_taxon: 0\n";
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report =
        report_unused_keys(LedgerNetwork::Paper, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(report.unused_leaf_pointers, vec!["/alpha", "/zeta"]);
}
