//! Statistics over scoped score sets: one exam, a semester, sibling classes,
//! one student's history, one subject.

use crate::calc::{aggregate_exam, cmp_desc, summarize, ExamAggregate, ScoreEntry, Thresholds};
use crate::error::{ServiceError, ServiceResult};
use crate::model::{CallerIdentity, Exam, Score};
use crate::scope::{resolve_scope, ResourceKind, ScoreInExam};
use crate::store::{self, ExamOrder, ExamQuery};
use crate::trend::{split_half_trend, thirds_trend, Trend};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

const UNKNOWN_SEMESTER: &str = "unknown semester";
const UNKNOWN_TEACHER: &str = "unknown teacher";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamStatistics {
    pub exam_id: String,
    pub exam_name: String,
    pub thresholds: Thresholds,
    #[serde(flatten)]
    pub aggregate: ExamAggregate,
}

pub fn get_exam_statistics(
    conn: &Connection,
    caller: &CallerIdentity,
    exam_id: &str,
    thresholds: &Thresholds,
) -> ServiceResult<ExamStatistics> {
    info!(exam_id, caller = %caller.id, role = %caller.role, "exam statistics requested");
    thresholds.validate()?;

    let Some(exam) = store::find_exam_by_id(conn, exam_id)? else {
        warn!(exam_id, "exam not found");
        return Err(ServiceError::not_found("exam not found"));
    };
    let scope = resolve_scope(caller, ResourceKind::Exam);
    if !scope.owns(exam.teacher_id.as_deref()) {
        warn!(
            exam_id,
            caller = %caller.id,
            exam_teacher = exam.teacher_id.as_deref().unwrap_or("-"),
            "exam statistics forbidden"
        );
        return Err(ServiceError::forbidden(
            "not allowed to view statistics for this exam",
        ));
    }

    let scores = store::find_scores_by_exam(conn, exam_id)?;
    info!(exam_id, rows = scores.len(), "scores loaded");
    let aggregate = aggregate_exam(scores.iter().map(ScoreEntry::from), thresholds);
    info!(
        exam_id,
        average = aggregate.average_score,
        pass_rate = aggregate.pass_rate,
        "exam statistics done"
    );

    Ok(ExamStatistics {
        exam_id: exam.id,
        exam_name: exam.name,
        thresholds: *thresholds,
        aggregate,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub student_id: String,
    pub student_name: String,
    pub student_number: String,
    pub scores: Vec<f64>,
    pub trend: Trend,
    pub average_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAverage {
    pub exam_id: String,
    pub exam_name: String,
    pub subject: String,
    pub class_name: String,
    pub exam_date: String,
    pub submitted_count: usize,
    pub average_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterStatistics {
    pub semester_id: String,
    pub semester_name: String,
    pub total_exams: usize,
    pub average_score: f64,
    pub student_progress: Vec<StudentProgress>,
    pub exams: Vec<ExamAverage>,
}

pub fn get_semester_statistics(
    conn: &Connection,
    caller: &CallerIdentity,
    semester_id: &str,
    class_filter: Option<&str>,
) -> ServiceResult<SemesterStatistics> {
    info!(
        semester_id,
        caller = %caller.id,
        role = %caller.role,
        class_filter = class_filter.unwrap_or("-"),
        "semester statistics requested"
    );

    let scope = resolve_scope(caller, ResourceKind::Exam);
    let predicate = scope.predicate(&["e.teacher_id"], Some("e.class_name"));
    let exams = store::find_exams_by_semester(conn, semester_id, class_filter, &predicate)?;
    if exams.is_empty() {
        warn!(semester_id, "no visible exams in semester");
        return Err(ServiceError::not_found("no exams found for this semester"));
    }
    info!(semester_id, exams = exams.len(), "exams selected");

    let exam_ids: Vec<String> = exams.iter().map(|e| e.id.clone()).collect();
    let scores = store::find_scores_for_exams(conn, &exam_ids)?;
    let submitted: Vec<(&Score, f64)> = scores
        .iter()
        .filter_map(|s| s.submitted_value().map(|v| (s, v)))
        .collect();
    let average_score = summarize(submitted.iter().map(|(_, v)| *v)).average;

    // First-seen order keeps each student's values in exam-date order.
    let mut order: Vec<String> = Vec::new();
    let mut per_student: HashMap<String, Vec<f64>> = HashMap::new();
    for (s, v) in &submitted {
        per_student
            .entry(s.student_id.clone())
            .or_insert_with(|| {
                order.push(s.student_id.clone());
                Vec::new()
            })
            .push(*v);
    }

    let students = store::find_students_by_ids(conn, &order)?;
    let mut student_progress: Vec<StudentProgress> = order
        .iter()
        .filter_map(|id| {
            let values = per_student.remove(id)?;
            let student = students.get(id);
            Some(StudentProgress {
                student_id: id.clone(),
                student_name: student.map(|s| s.name.clone()).unwrap_or_default(),
                student_number: student.map(|s| s.student_number.clone()).unwrap_or_default(),
                trend: split_half_trend(&values),
                average_score: summarize(values.iter().copied()).average,
                scores: values,
            })
        })
        .collect();
    student_progress.sort_by(|a, b| cmp_desc(a.average_score, b.average_score));

    let exams_out: Vec<ExamAverage> = exams
        .iter()
        .map(|e| {
            let summary = summarize(
                submitted
                    .iter()
                    .filter(|(s, _)| s.exam_id == e.id)
                    .map(|(_, v)| *v),
            );
            ExamAverage {
                exam_id: e.id.clone(),
                exam_name: e.name.clone(),
                subject: e.subject.clone(),
                class_name: e.class_name.clone(),
                exam_date: e.exam_date.clone(),
                submitted_count: summary.count,
                average_score: summary.average,
            }
        })
        .collect();

    let semester_name = store::find_semester_by_id(conn, semester_id)?
        .map(|s| s.name)
        .unwrap_or_else(|| UNKNOWN_SEMESTER.to_string());

    info!(
        semester_id,
        exams = exams_out.len(),
        students = student_progress.len(),
        average = average_score,
        "semester statistics done"
    );
    Ok(SemesterStatistics {
        semester_id: semester_id.to_string(),
        semester_name,
        total_exams: exams_out.len(),
        average_score,
        student_progress,
        exams: exams_out,
    })
}

/// Which exams count as siblings of the reference exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingRule {
    /// Same subject and same exam date.
    SameDate,
    /// Same subject within the reference exam's semester.
    SameSemester,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamInfo {
    pub exam_id: String,
    pub name: String,
    pub subject: String,
    pub exam_date: String,
    pub semester_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassComparisonRow {
    pub class_name: String,
    pub teacher_name: String,
    #[serde(flatten)]
    pub statistics: ExamStatistics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassComparison {
    pub exam_info: ExamInfo,
    pub sibling_rule: SiblingRule,
    pub class_comparison: Vec<ClassComparisonRow>,
}

pub fn get_class_comparison(
    conn: &Connection,
    caller: &CallerIdentity,
    exam_id: &str,
    rule: SiblingRule,
) -> ServiceResult<ClassComparison> {
    info!(exam_id, caller = %caller.id, role = %caller.role, ?rule, "class comparison requested");

    let Some(exam) = store::find_exam_by_id(conn, exam_id)? else {
        warn!(exam_id, "exam not found");
        return Err(ServiceError::not_found("exam not found"));
    };
    let scope = resolve_scope(caller, ResourceKind::Exam);
    if !scope.owns(exam.teacher_id.as_deref()) {
        warn!(exam_id, caller = %caller.id, "class comparison forbidden");
        return Err(ServiceError::forbidden(
            "not allowed to view statistics for this exam",
        ));
    }

    let siblings = match rule {
        SiblingRule::SameDate => store::find_sibling_exams(conn, &exam.subject, &exam.exam_date)?,
        SiblingRule::SameSemester => {
            let Some(semester_id) = exam.semester_id.as_deref() else {
                return Err(ServiceError::invalid(
                    "exam is not assigned to a semester",
                ));
            };
            store::find_semester_siblings(conn, &exam.subject, semester_id)?
        }
    };
    info!(exam_id, siblings = siblings.len(), "sibling exams found");

    let thresholds = Thresholds::default();
    let mut rows: Vec<ClassComparisonRow> = Vec::new();
    for sibling in &siblings {
        let statistics = match get_exam_statistics(conn, caller, &sibling.id, &thresholds) {
            Ok(v) => v,
            Err(e) => {
                warn!(sibling = %sibling.id, error = %e, "skipping sibling exam");
                continue;
            }
        };
        let teacher_name = store::user_display_name(conn, sibling.teacher_id.as_deref())?
            .unwrap_or_else(|| UNKNOWN_TEACHER.to_string());
        rows.push(ClassComparisonRow {
            class_name: sibling.class_name.clone(),
            teacher_name,
            statistics,
        });
    }
    rows.sort_by(|a, b| {
        cmp_desc(
            a.statistics.aggregate.average_score,
            b.statistics.aggregate.average_score,
        )
    });

    info!(exam_id, classes = rows.len(), "class comparison done");
    Ok(ClassComparison {
        exam_info: ExamInfo {
            exam_id: exam.id,
            name: exam.name,
            subject: exam.subject,
            exam_date: exam.exam_date,
            semester_id: exam.semester_id,
        },
        sibling_rule: rule,
        class_comparison: rows,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentExamScore {
    pub exam_id: String,
    pub exam_name: String,
    pub subject: String,
    pub exam_date: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatistics {
    pub student_id: String,
    pub student_name: String,
    pub student_number: String,
    pub semester_id: Option<String>,
    pub total_exams: usize,
    pub valid_exams: usize,
    pub average_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub trend: Trend,
    pub scores: Vec<StudentExamScore>,
}

pub fn get_student_statistics(
    conn: &Connection,
    caller: &CallerIdentity,
    student_id: &str,
    semester_id: Option<&str>,
) -> ServiceResult<StudentStatistics> {
    info!(
        student_id,
        semester_id = semester_id.unwrap_or("-"),
        caller = %caller.id,
        "student statistics requested"
    );
    let scope = resolve_scope(caller, ResourceKind::Student);
    let student = scope.visible(store::find_student_by_id(conn, student_id)?, "student")?;

    let score_scope = resolve_scope(caller, ResourceKind::Score);
    let history: Vec<(Score, Exam)> = store::find_student_history(conn, student_id, semester_id)?
        .into_iter()
        .filter(|(score, exam)| score_scope.permits(&ScoreInExam { score, exam }))
        .collect();
    let valid: Vec<(&Score, &Exam, f64)> = history
        .iter()
        .filter_map(|(s, e)| s.submitted_value().map(|v| (s, e, v)))
        .collect();
    let values: Vec<f64> = valid.iter().map(|(_, _, v)| *v).collect();
    let summary = summarize(values.iter().copied());

    Ok(StudentStatistics {
        student_id: student.id,
        student_name: student.name,
        student_number: student.student_number,
        semester_id: semester_id.map(str::to_string),
        total_exams: history.len(),
        valid_exams: valid.len(),
        average_score: summary.average,
        max_score: summary.max,
        min_score: summary.min,
        trend: thirds_trend(&values),
        scores: valid
            .iter()
            .map(|(_, e, v)| StudentExamScore {
                exam_id: e.id.clone(),
                exam_name: e.name.clone(),
                subject: e.subject.clone(),
                exam_date: e.exam_date.clone(),
                score: *v,
            })
            .collect(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectExamStats {
    pub exam_id: String,
    pub exam_name: String,
    pub exam_date: String,
    pub class_name: String,
    pub total_students: usize,
    pub valid_students: usize,
    pub average_score: f64,
    pub max_score: f64,
    pub min_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStatistics {
    pub subject: String,
    pub semester_id: Option<String>,
    pub class_name: Option<String>,
    pub total_exams: usize,
    pub total_students: usize,
    pub valid_students: usize,
    pub average_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub exam_stats: Vec<SubjectExamStats>,
}

pub fn get_subject_statistics(
    conn: &Connection,
    caller: &CallerIdentity,
    subject: &str,
    semester_id: Option<&str>,
    class_filter: Option<&str>,
) -> ServiceResult<SubjectStatistics> {
    info!(
        subject,
        semester_id = semester_id.unwrap_or("-"),
        class_filter = class_filter.unwrap_or("-"),
        caller = %caller.id,
        "subject statistics requested"
    );
    let scope = resolve_scope(caller, ResourceKind::Exam);
    let predicate = scope.predicate(&["e.teacher_id"], Some("e.class_name"));
    let query = ExamQuery {
        semester_id: semester_id.map(str::to_string),
        subject: Some(subject.to_string()),
        class_name: class_filter.map(str::to_string),
        exam_date: None,
    };
    let exams = store::find_exams(conn, &query, &predicate, ExamOrder::DateAsc)?;
    if exams.is_empty() {
        warn!(subject, "no visible exams for subject");
        return Err(ServiceError::not_found("no exams found for this subject"));
    }

    let exam_ids: Vec<String> = exams.iter().map(|e| e.id.clone()).collect();
    let scores = store::find_scores_for_exams(conn, &exam_ids)?;
    let overall = summarize(scores.iter().filter_map(Score::submitted_value));

    let exam_stats: Vec<SubjectExamStats> = exams
        .iter()
        .map(|e| {
            let rows: Vec<&Score> = scores.iter().filter(|s| s.exam_id == e.id).collect();
            let summary = summarize(rows.iter().filter_map(|s| s.submitted_value()));
            SubjectExamStats {
                exam_id: e.id.clone(),
                exam_name: e.name.clone(),
                exam_date: e.exam_date.clone(),
                class_name: e.class_name.clone(),
                total_students: rows.len(),
                valid_students: summary.count,
                average_score: summary.average,
                max_score: summary.max,
                min_score: summary.min,
            }
        })
        .collect();

    Ok(SubjectStatistics {
        subject: subject.to_string(),
        semester_id: semester_id.map(str::to_string),
        class_name: class_filter.map(str::to_string),
        total_exams: exams.len(),
        total_students: scores.len(),
        valid_students: overall.count,
        average_score: overall.average,
        max_score: overall.max,
        min_score: overall.min,
        exam_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;
    use crate::model::Role;

    fn caller(id: &str, role: Role, classes: &[&str]) -> CallerIdentity {
        CallerIdentity {
            id: id.to_string(),
            role,
            class_names: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn seed_exam(
        conn: &Connection,
        id: &str,
        class_name: &str,
        date: &str,
        teacher: Option<&str>,
        semester: Option<&str>,
    ) {
        conn.execute(
            "INSERT INTO exams(id, name, subject, class_name, exam_date, total_score, teacher_id,
                               semester_id, created_at)
             VALUES(?, ?, 'math', ?, ?, 100, ?, ?, '2024-01-01T00:00:00Z')",
            (id, format!("exam {}", id), class_name, date, teacher, semester),
        )
        .expect("insert exam");
    }

    fn seed_student(conn: &Connection, id: &str, class_name: &str, teacher: Option<&str>) {
        conn.execute(
            "INSERT INTO students(id, name, student_number, class_name, teacher_id, created_at)
             VALUES(?, ?, ?, ?, ?, '2024-01-01T00:00:00Z')",
            (id, format!("student {}", id), format!("no-{}", id), class_name, teacher),
        )
        .expect("insert student");
    }

    fn seed_score(conn: &Connection, exam: &str, student: &str, value: Option<f64>, absent: bool) {
        conn.execute(
            "INSERT INTO scores(id, student_id, exam_id, value, is_absent, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            (
                format!("{}-{}", exam, student),
                student,
                exam,
                value,
                absent as i64,
            ),
        )
        .expect("insert score");
    }

    fn seed_semester(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO semesters(id, name, school_year, start_date, end_date, created_at)
             VALUES(?, 'Fall', '2024-2025', '2024-09-01', '2025-01-31', '2024-01-01T00:00:00Z')",
            [id],
        )
        .expect("insert semester");
    }

    #[test]
    fn exam_statistics_count_absent_but_exclude_them_from_rates() {
        let (_dir, conn) = open_test_db();
        seed_exam(&conn, "e1", "1-1", "2024-10-01", Some("t1"), None);
        for (sid, v) in [("a", 95.0), ("b", 88.0), ("c", 88.0)] {
            seed_student(&conn, sid, "1-1", Some("t1"));
            seed_score(&conn, "e1", sid, Some(v), false);
        }
        seed_student(&conn, "d", "1-1", Some("t1"));
        seed_score(&conn, "e1", "d", Some(10.0), true);

        let stats = get_exam_statistics(
            &conn,
            &caller("t1", Role::Teacher, &[]),
            "e1",
            &Thresholds::default(),
        )
        .expect("stats");
        assert_eq!(stats.aggregate.total_students, 4);
        assert_eq!(stats.aggregate.submitted_count, 3);
        assert_eq!(stats.aggregate.absent_count, 1);
        assert_eq!(stats.aggregate.average_score, 90.33);
        assert_eq!(stats.aggregate.excellent_rate, 100.0);
        assert_eq!(stats.aggregate.min_score, 88.0);
    }

    #[test]
    fn exam_statistics_are_forbidden_for_other_teachers_even_with_the_class() {
        let (_dir, conn) = open_test_db();
        seed_exam(&conn, "e1", "1-1", "2024-10-01", Some("t1"), None);

        let other = caller("t2", Role::Teacher, &["1-1"]);
        let e = get_exam_statistics(&conn, &other, "e1", &Thresholds::default())
            .expect_err("forbidden");
        assert_eq!(e.code(), "forbidden");

        let missing = get_exam_statistics(&conn, &other, "nope", &Thresholds::default())
            .expect_err("missing");
        assert_eq!(missing.code(), "not_found");

        for role in [Role::Admin, Role::GradeLeader] {
            let stats = get_exam_statistics(&conn, &caller("x", role, &[]), "e1", &Thresholds::default())
                .expect("full scope");
            assert_eq!(stats.aggregate.total_students, 0);
            assert_eq!(stats.aggregate.average_score, 0.0);
        }
    }

    #[test]
    fn comparison_skips_siblings_the_caller_cannot_see() {
        let (_dir, conn) = open_test_db();
        seed_exam(&conn, "e1", "1-1", "2024-10-01", Some("t1"), None);
        seed_exam(&conn, "e2", "1-2", "2024-10-01", Some("t2"), None);
        seed_exam(&conn, "e3", "1-3", "2024-10-01", Some("t1"), None);
        seed_exam(&conn, "e4", "1-4", "2024-10-02", Some("t1"), None);
        seed_student(&conn, "a", "1-1", None);
        seed_student(&conn, "b", "1-3", None);
        seed_score(&conn, "e1", "a", Some(70.0), false);
        seed_score(&conn, "e3", "b", Some(90.0), false);

        let cmp = get_class_comparison(
            &conn,
            &caller("t1", Role::Teacher, &[]),
            "e1",
            SiblingRule::SameDate,
        )
        .expect("comparison");
        let classes: Vec<&str> = cmp
            .class_comparison
            .iter()
            .map(|r| r.class_name.as_str())
            .collect();
        assert_eq!(classes, vec!["1-3", "1-1"]);
        assert!(cmp
            .class_comparison
            .iter()
            .all(|r| r.teacher_name == UNKNOWN_TEACHER));
    }

    #[test]
    fn semester_comparison_needs_a_semester() {
        let (_dir, conn) = open_test_db();
        seed_exam(&conn, "e1", "1-1", "2024-10-01", None, None);
        let e = get_class_comparison(
            &conn,
            &caller("boss", Role::Admin, &[]),
            "e1",
            SiblingRule::SameSemester,
        )
        .expect_err("no semester");
        assert_eq!(e.code(), "bad_params");
    }

    #[test]
    fn semester_statistics_track_per_student_trend() {
        let (_dir, conn) = open_test_db();
        seed_semester(&conn, "s1");
        seed_exam(&conn, "e1", "1-1", "2024-09-10", Some("t1"), Some("s1"));
        seed_exam(&conn, "e2", "1-1", "2024-10-10", Some("t1"), Some("s1"));
        seed_student(&conn, "a", "1-1", Some("t1"));
        seed_student(&conn, "b", "1-1", Some("t1"));
        seed_score(&conn, "e1", "a", Some(70.0), false);
        seed_score(&conn, "e2", "a", Some(80.0), false);
        seed_score(&conn, "e1", "b", Some(90.0), false);
        seed_score(&conn, "e2", "b", Some(89.0), false);

        let stats = get_semester_statistics(&conn, &caller("t1", Role::Teacher, &[]), "s1", None)
            .expect("semester stats");
        assert_eq!(stats.semester_name, "Fall");
        assert_eq!(stats.total_exams, 2);
        assert_eq!(stats.average_score, 82.25);
        assert_eq!(stats.student_progress.len(), 2);
        assert_eq!(stats.student_progress[0].student_id, "b");
        assert_eq!(stats.student_progress[0].trend, Trend::Stable);
        assert_eq!(stats.student_progress[1].scores, vec![70.0, 80.0]);
        assert_eq!(stats.student_progress[1].trend, Trend::Up);
        assert_eq!(stats.exams[0].exam_id, "e1");
        assert_eq!(stats.exams[0].average_score, 80.0);

        let outsider = caller("t9", Role::Teacher, &["2-1"]);
        let e = get_semester_statistics(&conn, &outsider, "s1", None).expect_err("nothing visible");
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn student_statistics_use_the_thirds_rule() {
        let (_dir, conn) = open_test_db();
        seed_student(&conn, "a", "1-1", Some("t1"));
        for (i, v) in [60.0, 62.0, 70.0, 75.0, 80.0, 85.0].iter().enumerate() {
            let id = format!("e{}", i);
            seed_exam(&conn, &id, "1-1", &format!("2024-10-0{}", i + 1), Some("t1"), None);
            seed_score(&conn, &id, "a", Some(*v), false);
        }
        seed_exam(&conn, "gone", "1-1", "2024-10-09", Some("t1"), None);
        seed_score(&conn, "gone", "a", None, true);

        let stats = get_student_statistics(&conn, &caller("t1", Role::Teacher, &[]), "a", None)
            .expect("student stats");
        assert_eq!(stats.total_exams, 7);
        assert_eq!(stats.valid_exams, 6);
        assert_eq!(stats.max_score, 85.0);
        assert_eq!(stats.min_score, 60.0);
        assert_eq!(stats.trend, Trend::Up);
        assert_eq!(stats.scores.first().map(|s| s.exam_id.as_str()), Some("e0"));

        let e = get_student_statistics(&conn, &caller("t2", Role::Teacher, &["2-2"]), "a", None)
            .expect_err("invisible student");
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn student_statistics_only_count_scores_in_scope() {
        let (_dir, conn) = open_test_db();
        seed_student(&conn, "a", "1-1", None);
        seed_exam(&conn, "e1", "1-1", "2024-10-01", Some("t1"), None);
        seed_exam(&conn, "e2", "2-2", "2024-10-02", Some("t2"), None);
        seed_score(&conn, "e1", "a", Some(90.0), false);
        seed_score(&conn, "e2", "a", Some(10.0), false);

        let class_teacher = caller("t1", Role::Teacher, &["1-1"]);
        let stats =
            get_student_statistics(&conn, &class_teacher, "a", None).expect("class teacher stats");
        assert_eq!(stats.total_exams, 1);
        assert_eq!(stats.valid_exams, 1);
        assert_eq!(stats.average_score, 90.0);
        let ids: Vec<&str> = stats.scores.iter().map(|s| s.exam_id.as_str()).collect();
        assert_eq!(ids, vec!["e1"]);

        let stats = get_student_statistics(&conn, &caller("admin", Role::Admin, &[]), "a", None)
            .expect("admin stats");
        assert_eq!(stats.total_exams, 2);
        assert_eq!(stats.average_score, 50.0);
    }

    #[test]
    fn subject_statistics_roll_up_visible_exams() {
        let (_dir, conn) = open_test_db();
        seed_exam(&conn, "e1", "1-1", "2024-10-01", Some("t1"), None);
        seed_exam(&conn, "e2", "1-2", "2024-10-05", Some("t2"), None);
        seed_student(&conn, "a", "1-1", None);
        seed_student(&conn, "b", "1-2", None);
        seed_score(&conn, "e1", "a", Some(60.0), false);
        seed_score(&conn, "e2", "b", Some(100.0), false);
        seed_score(&conn, "e2", "a", None, false);

        let all = get_subject_statistics(&conn, &caller("gl", Role::GradeLeader, &[]), "math", None, None)
            .expect("subject stats");
        assert_eq!(all.total_exams, 2);
        assert_eq!(all.total_students, 3);
        assert_eq!(all.valid_students, 2);
        assert_eq!(all.average_score, 80.0);
        assert_eq!(all.exam_stats[1].exam_id, "e2");

        let mine = get_subject_statistics(&conn, &caller("t1", Role::Teacher, &[]), "math", None, None)
            .expect("scoped subject stats");
        assert_eq!(mine.total_exams, 1);
        assert_eq!(mine.max_score, 60.0);

        let e = get_subject_statistics(&conn, &caller("t1", Role::Teacher, &[]), "art", None, None)
            .expect_err("no exams");
        assert_eq!(e.code(), "not_found");
    }
}
