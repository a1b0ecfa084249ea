use assert_cmd::Command;
use predicates::str::contains;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("pforge.yaml"),
        format!(
            "dataDir: {}\nrefresh:\n  concurrency: 2\n  timeout: 5s\n",
            dir.path().join("data").display()
        ),
    )
    .unwrap();
    dir
}

fn pforge(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pforge").unwrap();
    cmd.current_dir(dir)
        .env_remove("PF_DATA_DIR")
        .env_remove("PF_RELAY_PREFIX")
        .env("PF_LOG_LEVEL", "warn")
        .arg("-c")
        .arg(dir.join("pforge.yaml"));
    cmd
}

fn write_json(dir: &Path, name: &str, v: serde_json::Value) -> String {
    let p = dir.join(name);
    fs::write(&p, serde_json::to_string_pretty(&v).unwrap()).unwrap();
    p.display().to_string()
}

#[test]
fn defaults_validate_for_both_engines() {
    let dir = workspace();
    pforge(dir.path())
        .args(["validate"])
        .assert()
        .success()
        .stdout(contains("mihomo: ok"))
        .stdout(contains("singbox: ok"));
}

#[test]
fn preset_then_preview() {
    let dir = workspace();
    pforge(dir.path())
        .args(["template", "preset", "mihomo-minimal"])
        .assert()
        .success();
    pforge(dir.path())
        .args(["preview", "-e", "mihomo"])
        .assert()
        .success()
        .stdout(contains("MATCH,proxy"));
    // preview has no side effects
    assert!(!dir.path().join("data").join("config.yaml").exists());
}

#[test]
fn rejected_replace_exits_2_and_keeps_template() {
    let dir = workspace();
    pforge(dir.path())
        .args(["template", "preset", "singbox-minimal"])
        .assert()
        .success();
    let rules = write_json(
        dir.path(),
        "rules.json",
        json!([
            {"conditionKind": "domain-suffix", "payload": "example.com", "target": "nowhere"},
            {"conditionKind": "match-all", "target": "proxy"}
        ]),
    );
    pforge(dir.path())
        .args(["--json", "template", "replace-rules", "-e", "singbox", &rules])
        .assert()
        .code(2)
        .stdout(contains("UnknownReference"))
        .stdout(contains("/rules/0/target"));

    let out = pforge(dir.path())
        .args(["--json", "template", "show", "-e", "singbox"])
        .output()
        .unwrap();
    let t: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(t["rules"]
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["target"] != "nowhere"));
}

#[test]
fn batch_rules_from_yaml() {
    let dir = workspace();
    pforge(dir.path())
        .args(["template", "preset", "mihomo-minimal"])
        .assert()
        .success();
    let p = dir.path().join("rules.yaml");
    fs::write(
        &p,
        "- conditionKind: domain-suffix\n  payload: |\n    a.example\n    # skip\n    b.example\n  target: proxy\n- conditionKind: match-all\n  target: proxy\n",
    )
    .unwrap();
    pforge(dir.path())
        .args(["template", "replace-rules", "-e", "mihomo"])
        .arg(&p)
        .assert()
        .success()
        .stdout(contains("3 rule(s)"));
}

#[test]
fn generate_writes_artifact_and_import_reads_it_back() {
    let dir = workspace();
    pforge(dir.path())
        .args(["template", "preset", "singbox-minimal"])
        .assert()
        .success();
    pforge(dir.path())
        .args(["generate", "-e", "singbox"])
        .assert()
        .success()
        .stdout(contains("wrote"))
        .stdout(contains("not checked"));
    let artifact = dir.path().join("data").join("config.json");
    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&artifact).unwrap()).unwrap();
    assert_eq!(doc["route"]["final"], "proxy");

    pforge(dir.path())
        .args(["generate", "-e", "singbox"])
        .assert()
        .success()
        .stdout(contains("unchanged"));

    pforge(dir.path())
        .args(["import", "-e", "singbox"])
        .arg(&artifact)
        .assert()
        .success()
        .stdout(contains("imported"));
}

#[test]
fn refresh_with_only_local_rule_sets_is_a_no_op() {
    let dir = workspace();
    pforge(dir.path())
        .args(["template", "preset", "singbox-minimal"])
        .assert()
        .success();
    let rule_sets = write_json(
        dir.path(),
        "rule_sets.json",
        json!([{"tag": "mine", "sourceKind": "local", "format": "source", "localPath": "/etc/mine.json"}]),
    );
    pforge(dir.path())
        .args(["template", "replace-rule-sets", "-e", "singbox", &rule_sets])
        .assert()
        .success();
    pforge(dir.path())
        .args(["--json", "ruleset", "refresh", "-e", "singbox"])
        .assert()
        .success()
        .stdout(contains("\"ruleSets\": []"));
    pforge(dir.path())
        .args(["ruleset", "refresh", "-e", "singbox", "--tag", "mine"])
        .assert()
        .code(1)
        .stderr(contains("local"));
}
