use std::io::Write;

use predicates::prelude::*;

fn yaml_file(body: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut f = tempfile::Builder::new().suffix(".yaml").tempfile()?;
    f.write_all(body.as_bytes())?;
    Ok(f)
}

#[allow(deprecated)]
#[test]
fn config_hash_prints_hash_and_canonical_json() -> anyhow::Result<()> {
    let base = yaml_file("ledger:\n  network: paper\nsettlement:\n  fee_buffer_xrp: 5\n")?;
    let over = yaml_file("settlement:\n  fee_buffer_xrp: 7\n")?;

    let mut cmd = assert_cmd::Command::cargo_bin("sp-cli")?;
    cmd.arg("config-hash")
        .arg(base.path())
        .arg(over.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("config_hash="))
        .stdout(predicate::str::contains("\"fee_buffer_xrp\":7"));
    Ok(())
}

#[allow(deprecated)]
#[test]
fn config_hash_is_stable_across_runs() -> anyhow::Result<()> {
    let base = yaml_file("ledger:\n  network: paper\n")?;

    let run = || -> anyhow::Result<String> {
        let out = assert_cmd::Command::cargo_bin("sp-cli")?
            .arg("config-hash")
            .arg(base.path())
            .output()?;
        Ok(String::from_utf8(out.stdout)?)
    };
    assert_eq!(run()?, run()?);
    Ok(())
}

#[allow(deprecated)]
#[test]
fn secret_literal_in_config_is_refused() -> anyhow::Result<()> {
    let bad = yaml_file("ledger:\n  platform_secret: snoPBrXtMeMyMHUVTgbuqAfg1SUTb\n")?;

    let mut cmd = assert_cmd::Command::cargo_bin("sp-cli")?;
    cmd.arg("config-hash").arg(bad.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("snoPBrXtMeMyMHUVTgbuqAfg1SUTb").not());
    Ok(())
}
