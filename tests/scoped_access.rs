
use serde_json::json;
use test_support::{admin, grade_leader, open_sidecar, teacher};

fn ids(list: &serde_json::Value, key: &str) -> Vec<String> {
    list[key]
        .as_array()
        .expect("list")
        .iter()
        .map(|v| v["id"].as_str().unwrap_or("").to_string())
        .collect()
}

#[test]
fn teachers_see_their_own_and_their_classes() {
    let mut sc = open_sidecar();
    let boss = admin();
    let t1 = teacher("t1", &["1-1"]);
    let t2 = teacher("t2", &["1-2"]);

    let mine = sc.create_exam(&t1, "3-3", "2024-10-01", None);
    let my_class = sc.create_exam(&boss, "1-1", "2024-10-02", None);
    let theirs = sc.create_exam(&t2, "1-2", "2024-10-03", None);

    let listed = sc.ok("exams.list", json!({}), &t1);
    let listed = ids(&listed, "exams");
    assert_eq!(listed, vec![my_class.clone(), mine.clone()]);

    let all = sc.ok("exams.list", json!({}), &grade_leader());
    assert_eq!(ids(&all, "exams").len(), 3);

    assert_eq!(sc.err_code("exams.get", json!({ "examId": theirs }), &t1), "not_found");
    assert_eq!(sc.err_code("exams.delete", json!({ "examId": theirs }), &t1), "not_found");
    let got = sc.ok("exams.get", json!({ "examId": my_class }), &t1);
    assert_eq!(got["exam"]["className"], json!("1-1"));

    // A teacher with no classes and nothing owned sees nothing.
    let nobody = sc.ok("exams.list", json!({}), &teacher("t3", &[]));
    assert_eq!(nobody["exams"], json!([]));
}

#[test]
fn caller_class_names_are_normalized() {
    let mut sc = open_sidecar();
    let boss = admin();
    let exam = sc.create_exam(&boss, "2年级3班", "2024-10-01", None);
    let got = sc.ok("exams.get", json!({ "examId": exam }), &boss);
    assert_eq!(got["exam"]["className"], json!("2-3"));

    let t = teacher("t1", &["二年级3班"]);
    let listed = sc.ok("exams.list", json!({}), &t);
    assert_eq!(ids(&listed, "exams"), vec![exam]);
}

#[test]
fn students_are_scoped_and_unique_by_number() {
    let mut sc = open_sidecar();
    let boss = admin();
    let t1 = teacher("t1", &[]);
    let own = sc.create_student(&t1, "Own", "s-1", "1-1");
    let other = sc.create_student(&boss, "Other", "s-2", "1-2");

    let listed = sc.ok("students.list", json!({}), &t1);
    assert_eq!(ids(&listed, "students"), vec![own.clone()]);
    assert_eq!(sc.err_code("students.get", json!({ "studentId": other }), &t1), "not_found");

    let code = sc.err_code(
        "students.create",
        json!({ "name": "Dup", "studentNumber": "s-1" }),
        &boss,
    );
    assert_eq!(code, "bad_params");

    let code = sc.err_code(
        "students.update",
        json!({ "studentId": own, "teacherId": "t9" }),
        &t1,
    );
    assert_eq!(code, "forbidden");
    let renamed = sc.ok("students.update", json!({ "studentId": own, "name": "Renamed" }), &t1);
    assert_eq!(renamed["student"]["name"], json!("Renamed"));

    let by_class = sc.ok("students.list", json!({ "className": "1-2" }), &boss);
    assert_eq!(ids(&by_class, "students"), vec![other]);
}

#[test]
fn deleting_a_student_drops_scores_and_reranks() {
    let mut sc = open_sidecar();
    let t = teacher("t1", &[]);
    let exam = sc.create_exam(&t, "1-1", "2024-10-01", None);
    let top = sc.create_student(&t, "Top", "d-1", "1-1");
    let next = sc.create_student(&t, "Next", "d-2", "1-1");
    sc.put_score(&t, &exam, &top, 99.0);
    sc.put_score(&t, &exam, &next, 50.0);

    let res = sc.ok("students.delete", json!({ "studentId": top }), &t);
    assert_eq!(res["rerankedExams"], json!([exam]));
    let rows = sc.ok("scores.byExam", json!({ "examId": exam }), &t);
    assert_eq!(rows["scores"].as_array().map(|r| r.len()), Some(1));
    assert_eq!(rows["scores"][0]["rank"], json!(1));
}

#[test]
fn users_are_admin_managed_and_teachers_see_only_themselves() {
    let mut sc = open_sidecar();
    let boss = admin();
    let created = sc.ok(
        "users.create",
        json!({ "username": "liu", "name": "Teacher Liu", "role": "teacher", "classNames": ["一（2）班"] }),
        &boss,
    );
    let user_id = created["user"]["id"].as_str().expect("user id").to_string();
    assert_eq!(created["user"]["classNames"], json!(["1-2"]));

    let dup = sc.err_code(
        "users.create",
        json!({ "username": "liu", "name": "Again", "role": "teacher" }),
        &boss,
    );
    assert_eq!(dup, "bad_params");
    let code = sc.err_code(
        "users.create",
        json!({ "username": "x", "name": "X", "role": "teacher" }),
        &grade_leader(),
    );
    assert_eq!(code, "forbidden");

    let me = teacher(&user_id, &["1-2"]);
    let listed = sc.ok("users.list", json!({}), &me);
    assert_eq!(ids(&listed, "users"), vec![user_id.clone()]);
    assert_eq!(sc.err_code("users.get", json!({ "userId": "other" }), &me), "not_found");
    assert_eq!(ids(&sc.ok("users.list", json!({}), &boss), "users").len(), 1);
}

#[test]
fn classes_normalize_labels_and_toggle() {
    let mut sc = open_sidecar();
    let t = teacher("t1", &[]);
    let created = sc.ok("classes.create", json!({ "name": "一（2）班" }), &t);
    let class = &created["class"];
    assert_eq!(class["name"], json!("1-2"));
    assert_eq!(class["grade"], json!("一年级"));
    assert_eq!(class["displayName"], json!("一（2）班"));
    let class_id = class["id"].as_str().expect("class id").to_string();

    let code = sc.err_code("classes.create", json!({ "name": "1-2" }), &admin());
    assert_eq!(code, "bad_params");

    let free = sc.ok("classes.create", json!({ "name": "Robotics Club" }), &t);
    assert_eq!(free["class"]["name"], json!("Robotics Club"));
    assert!(free["class"]["grade"].is_null());

    let toggled = sc.ok("classes.toggleActive", json!({ "classId": class_id }), &t);
    assert_eq!(toggled["class"]["isActive"], json!(false));
    let active = sc.ok("classes.list", json!({ "activeOnly": true }), &t);
    assert_eq!(active["classes"].as_array().map(|c| c.len()), Some(1));

    let student = sc.create_student(&t, "Linked", "c-1", "1-2");
    let got = sc.ok("students.get", json!({ "studentId": student }), &t);
    assert_eq!(got["student"]["classId"], json!(class_id));

    let stranger = teacher("t2", &[]);
    assert_eq!(sc.err_code("classes.get", json!({ "classId": class_id }), &stranger), "not_found");
    sc.ok("classes.delete", json!({ "classId": class_id }), &t);
    let got = sc.ok("students.get", json!({ "studentId": student }), &t);
    assert!(got["student"]["classId"].is_null());
    assert_eq!(got["student"]["className"], json!("1-2"));
}
