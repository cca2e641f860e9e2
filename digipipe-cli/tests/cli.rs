use approx::assert_relative_eq;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const PIPELINE: &str = r#"{
    "num_threads": 2,
    "actions": [
        {
            "type": "sequence",
            "name": "digi",
            "min_energy": 0.5,
            "properties": {"output_mask": 1},
            "processors": [
                {
                    "containers": ["ecal", "hcal"],
                    "processor": {
                        "type": "sequence",
                        "name": "calo",
                        "parallel": true,
                        "processors": [
                            {"type": "collect", "name": "copy"},
                            {"type": "collect", "name": "sum", "output_container": "calo_sum"}
                        ]
                    }
                }
            ]
        }
    ]
}"#;

const EVENTS: &str = r#"[
    {"event_number": 1, "segments": [{"name": "inputs", "containers": [
        {"name": "ecal", "deposits": [{"cell": 1, "energy": 1.0}, {"cell": 2, "energy": 0.1}]},
        {"name": "hcal", "deposits": [{"cell": 3, "energy": 2.0}]},
        {"name": "trk", "deposits": [{"cell": 4, "energy": 9.0}]}
    ]}]},
    {"event_number": 2, "segments": [{"name": "inputs", "containers": [
        {"name": "hcal", "deposits": [{"cell": 3, "energy": 4.0}]}
    ]}]}
]"#;

fn digipipe() -> Command {
    Command::new(env!("CARGO_BIN_EXE_digipipe"))
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn container<'a>(event: &'a Value, name: &str) -> Option<&'a Value> {
    event["segments"][0]["containers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == name)
}

#[test]
fn test_run_writes_output_segments() {
    let dir = TempDir::new().unwrap();
    let pipeline = write(dir.path(), "pipeline.json", PIPELINE);
    let events = write(dir.path(), "events.json", EVENTS);
    let output = dir.path().join("out.json");

    let status = digipipe()
        .arg("run")
        .arg("--pipeline")
        .arg(&pipeline)
        .arg("--events")
        .arg(&events)
        .arg("--output")
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());

    let written: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let written = written.as_array().unwrap();
    assert_eq!(written.len(), 2);

    let first = &written[0];
    assert_eq!(first["event_number"], 1);
    assert_eq!(first["segments"][0]["name"], "outputs");
    let ecal = container(first, "ecal").unwrap();
    assert_eq!(ecal["mask"], 1);
    assert_eq!(ecal["kind"], "mapping");
    assert_eq!(ecal["deposits"].as_array().unwrap().len(), 1);
    assert!(container(first, "trk").is_none());
    let sum = container(first, "calo_sum").unwrap();
    let total: f64 = sum["deposits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["energy"].as_f64().unwrap())
        .sum();
    assert_relative_eq!(total, 3.0);

    let second = &written[1];
    assert!(container(second, "ecal").is_none());
    assert!(container(second, "hcal").is_some());
}

#[test]
fn test_sequential_override_matches_parallel() {
    let dir = TempDir::new().unwrap();
    let pipeline = write(dir.path(), "pipeline.json", PIPELINE);
    let events = write(dir.path(), "events.json", EVENTS);
    let parallel = dir.path().join("parallel.json");
    let sequential = dir.path().join("sequential.json");

    for (path, threads) in [(&parallel, "4"), (&sequential, "0")] {
        let status = digipipe()
            .args(["run", "--threads", threads, "--pipeline"])
            .arg(&pipeline)
            .arg("--events")
            .arg(&events)
            .arg("--output")
            .arg(path)
            .status()
            .unwrap();
        assert!(status.success());
    }

    let parallel: Value = serde_json::from_str(&fs::read_to_string(&parallel).unwrap()).unwrap();
    let sequential: Value =
        serde_json::from_str(&fs::read_to_string(&sequential).unwrap()).unwrap();
    assert_eq!(parallel, sequential);
}

#[test]
fn test_info_and_bad_pipeline() {
    let dir = TempDir::new().unwrap();
    let events = write(dir.path(), "events.json", EVENTS);

    let info = digipipe().args(["info", "--events"]).arg(&events).output().unwrap();
    assert!(info.status.success());
    let stdout = String::from_utf8(info.stdout).unwrap();
    assert!(stdout.contains("Events: 2"));
    assert!(stdout.contains("trk (mask 0, Vector): 1 deposits"));

    let pipeline = write(
        dir.path(),
        "broken.json",
        r#"{"actions": [{"type": "sequence", "name": "digi", "processors": []}], "threads": 3}"#,
    );
    let status = digipipe()
        .arg("run")
        .arg("--pipeline")
        .arg(&pipeline)
        .arg("--events")
        .arg(&events)
        .arg("--output")
        .arg(dir.path().join("never.json"))
        .status()
        .unwrap();
    assert!(!status.success());
}
