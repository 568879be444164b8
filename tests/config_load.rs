//! Loading configuration files from disk.

use smsfwd::config::Config;
use smsfwd::forwarder::EngineTuning;
use smsfwd::rules::RuleSet;
use tokio::time::Duration;

fn path_in(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

#[tokio::test]
async fn loads_json_rule_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "config.json");
    tokio::fs::write(
        &path,
        r#"{
            "rules": [
                { "pattern": "*", "out_numbers": ["+41790000001"] },
                { "pattern": "Bank", "out_numbers": ["+41790000002", "0790000003"] }
            ],
            "forwarding": { "send_gap_ms": 500 }
        }"#,
    )
    .await
    .unwrap();

    let config = Config::load(&path).await.unwrap();
    let rules = RuleSet::from_config(&config.rules);
    assert_eq!(rules.match_sender("Bank"), vec!["+41790000001", "+41790000002", "0790000003"]);

    let tuning = EngineTuning::from(&config.forwarding);
    assert_eq!(tuning.send_gap, Duration::from_millis(500));
    assert_eq!(tuning.poll_interval, Duration::from_millis(2000));
    assert_eq!(config.modem.port, "/dev/ttyUSB0");
}

#[tokio::test]
async fn loads_toml_with_modem_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "smsfwd.toml");
    tokio::fs::write(
        &path,
        r#"
[[rules]]
pattern = "+41791234567"
out_numbers = ["+41797654321"]

[modem]
port = "/dev/ttyACM0"
sim_pin = "1234"
storage = "ME"

[logging]
transmission_file = "sms.log"
"#,
    )
    .await
    .unwrap();

    let config = Config::load(&path).await.unwrap();
    assert_eq!(config.modem.port, "/dev/ttyACM0");
    assert_eq!(config.modem.sim_pin.as_deref(), Some("1234"));
    assert_eq!(config.modem.storage, "ME");
    assert_eq!(config.logging.transmission_file.as_deref(), Some("sms.log"));
}

#[tokio::test]
async fn create_default_writes_a_loadable_file() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["config.json", "config.toml"] {
        let path = path_in(&dir, name);
        Config::create_default(&path).await.unwrap();
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].pattern, "*");
    }
}

#[tokio::test]
async fn invalid_destination_fails_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "config.json");
    tokio::fs::write(&path, r#"{ "rules": [ { "pattern": "*", "out_numbers": ["call me"] } ] }"#)
        .await
        .unwrap();

    let err = Config::load(&path).await.unwrap_err().to_string();
    assert!(err.contains("Rule 1"), "{err}");
}

#[tokio::test]
async fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_in(&dir, "absent.json");
    let err = Config::load(&path).await.unwrap_err().to_string();
    assert!(err.contains("absent.json"), "{err}");
}
