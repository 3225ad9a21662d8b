
use serde_json::json;
use test_support::{admin, open_sidecar, spawn_sidecar};

#[test]
fn health_and_protocol_errors() {
    let mut sc = spawn_sidecar();

    let health = sc.request("health", json!({}), None);
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["version"].is_string());
    assert!(health["result"]["workspacePath"].is_null());

    let bad = sc.send_line("{not json");
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("bad_json"));

    // The loop keeps going after a bad line.
    let unknown = sc.request("grades.explode", json!({}), Some(&admin()));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));

    let no_ws = sc.request("exams.list", json!({}), Some(&admin()));
    assert_eq!(no_ws["error"]["code"], json!("no_workspace"));

    let no_path = sc.request("workspace.select", json!({}), None);
    assert_eq!(no_path["error"]["code"], json!("bad_params"));
}

#[test]
fn requests_without_a_caller_are_rejected() {
    let mut sc = open_sidecar();
    let resp = sc.request("exams.list", json!({}), None);
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));

    let bad_role = sc.send_line(
        &json!({
            "id": "x",
            "method": "exams.list",
            "params": {},
            "caller": { "id": "u", "role": "principal" }
        })
        .to_string(),
    );
    assert_eq!(bad_role["error"]["code"], json!("bad_json"));
}

#[test]
fn every_method_family_is_routed() {
    let mut sc = open_sidecar();
    let boss = admin();
    for method in [
        "users.list",
        "classes.list",
        "students.list",
        "semesters.list",
        "exams.list",
    ] {
        let resp = sc.request(method, json!({}), Some(&boss));
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
    }
    for method in [
        "scores.byExam",
        "scores.calculateRanks",
        "stats.exam",
        "stats.classComparison",
    ] {
        let code = sc.err_code(method, json!({ "examId": "missing" }), &boss);
        assert_eq!(code, "not_found", "{}", method);
    }
}

#[test]
fn workspace_persists_across_restarts() {
    let mut first = open_sidecar();
    let boss = admin();
    first.create_semester(&boss, "Fall");
    let path = first.workspace.path().to_string_lossy().to_string();

    let mut second = spawn_sidecar();
    let resp = second.request("workspace.select", json!({ "path": path }), None);
    assert_eq!(resp["ok"], json!(true));
    let list = second.ok("semesters.list", json!({}), &boss);
    assert_eq!(list["semesters"].as_array().map(|a| a.len()), Some(1));
}
