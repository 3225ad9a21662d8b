//! Filtered lookups and batch writes over the gradebook tables.

use crate::error::ServiceResult;
use crate::model::{ClassRecord, Exam, ExamStatus, ExamType, Score, Semester, Student, User};
use crate::scope::ScopePredicate;
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::str::FromStr;

pub const EXAM_COLUMNS: &str = "e.id, e.name, e.subject, e.class_name, e.exam_date, e.total_score,
     e.exam_type, e.status, e.teacher_id, e.semester_id, e.created_at";
pub const SCORE_COLUMNS: &str = "sc.id, sc.student_id, sc.exam_id, sc.user_id, sc.value,
     sc.is_absent, sc.rank, sc.created_at, sc.updated_at";
pub const STUDENT_COLUMNS: &str =
    "s.id, s.name, s.student_number, s.class_id, s.class_name, s.teacher_id, s.created_at";
pub const SEMESTER_COLUMNS: &str =
    "sem.id, sem.name, sem.school_year, sem.start_date, sem.end_date, sem.is_current, sem.created_at";
pub const USER_COLUMNS: &str =
    "u.id, u.username, u.name, u.role, u.subject, u.class_names, u.is_active, u.created_at";
pub const CLASS_COLUMNS: &str = "c.id, c.name, c.grade, c.description, c.is_active, c.created_by,
     (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id), c.created_at";

fn parse_column<T: FromStr<Err = String>>(r: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = r.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

pub fn exam_from_row(r: &Row<'_>, offset: usize) -> rusqlite::Result<Exam> {
    Ok(Exam {
        id: r.get(offset)?,
        name: r.get(offset + 1)?,
        subject: r.get(offset + 2)?,
        class_name: r.get(offset + 3)?,
        exam_date: r.get(offset + 4)?,
        total_score: r.get(offset + 5)?,
        exam_type: parse_column::<ExamType>(r, offset + 6)?,
        status: parse_column::<ExamStatus>(r, offset + 7)?,
        teacher_id: r.get(offset + 8)?,
        semester_id: r.get(offset + 9)?,
        created_at: r.get(offset + 10)?,
    })
}

pub fn score_from_row(r: &Row<'_>, offset: usize) -> rusqlite::Result<Score> {
    Ok(Score {
        id: r.get(offset)?,
        student_id: r.get(offset + 1)?,
        exam_id: r.get(offset + 2)?,
        user_id: r.get(offset + 3)?,
        value: r.get(offset + 4)?,
        is_absent: r.get::<_, i64>(offset + 5)? != 0,
        rank: r.get(offset + 6)?,
        created_at: r.get(offset + 7)?,
        updated_at: r.get(offset + 8)?,
    })
}

pub fn student_from_row(r: &Row<'_>, offset: usize) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(offset)?,
        name: r.get(offset + 1)?,
        student_number: r.get(offset + 2)?,
        class_id: r.get(offset + 3)?,
        class_name: r.get(offset + 4)?,
        teacher_id: r.get(offset + 5)?,
        created_at: r.get(offset + 6)?,
    })
}

pub fn semester_from_row(r: &Row<'_>) -> rusqlite::Result<Semester> {
    Ok(Semester {
        id: r.get(0)?,
        name: r.get(1)?,
        school_year: r.get(2)?,
        start_date: r.get(3)?,
        end_date: r.get(4)?,
        is_current: r.get::<_, i64>(5)? != 0,
        created_at: r.get(6)?,
    })
}

/// Stored as a JSON array; older rows may hold a comma list.
pub fn parse_class_names(raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str::<Vec<String>>(&raw).unwrap_or_else(|_| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

pub fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = r.get(3)?;
    Ok(User {
        id: r.get(0)?,
        username: r.get(1)?,
        name: r.get(2)?,
        role: role.parse().unwrap_or(crate::model::Role::Teacher),
        subject: r.get(4)?,
        class_names: parse_class_names(r.get(5)?),
        is_active: r.get::<_, i64>(6)? != 0,
        created_at: r.get(7)?,
    })
}

pub fn class_from_row(r: &Row<'_>) -> rusqlite::Result<ClassRecord> {
    Ok(ClassRecord {
        id: r.get(0)?,
        name: r.get(1)?,
        grade: r.get(2)?,
        description: r.get(3)?,
        is_active: r.get::<_, i64>(4)? != 0,
        created_by: r.get(5)?,
        student_count: r.get(6)?,
        created_at: r.get(7)?,
    })
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

pub fn find_exam_by_id(conn: &Connection, id: &str) -> ServiceResult<Option<Exam>> {
    let sql = format!("SELECT {} FROM exams e WHERE e.id = ?", EXAM_COLUMNS);
    Ok(conn
        .query_row(&sql, [id], |r| exam_from_row(r, 0))
        .optional()?)
}

pub fn find_student_by_id(conn: &Connection, id: &str) -> ServiceResult<Option<Student>> {
    let sql = format!("SELECT {} FROM students s WHERE s.id = ?", STUDENT_COLUMNS);
    Ok(conn
        .query_row(&sql, [id], |r| student_from_row(r, 0))
        .optional()?)
}

pub fn find_semester_by_id(conn: &Connection, id: &str) -> ServiceResult<Option<Semester>> {
    let sql = format!("SELECT {} FROM semesters sem WHERE sem.id = ?", SEMESTER_COLUMNS);
    Ok(conn.query_row(&sql, [id], semester_from_row).optional()?)
}

pub fn find_user_by_id(conn: &Connection, id: &str) -> ServiceResult<Option<User>> {
    let sql = format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS);
    Ok(conn.query_row(&sql, [id], user_from_row).optional()?)
}

pub fn find_class_by_id(conn: &Connection, id: &str) -> ServiceResult<Option<ClassRecord>> {
    let sql = format!("SELECT {} FROM classes c WHERE c.id = ?", CLASS_COLUMNS);
    Ok(conn.query_row(&sql, [id], class_from_row).optional()?)
}

pub fn find_class_id_by_name(conn: &Connection, name: &str) -> ServiceResult<Option<String>> {
    Ok(conn
        .query_row("SELECT id FROM classes WHERE name = ?", [name], |r| r.get(0))
        .optional()?)
}

pub fn user_display_name(conn: &Connection, id: Option<&str>) -> ServiceResult<Option<String>> {
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(conn
        .query_row("SELECT name FROM users WHERE id = ?", [id], |r| r.get(0))
        .optional()?)
}

pub fn find_score_by_id(conn: &Connection, id: &str) -> ServiceResult<Option<Score>> {
    let sql = format!("SELECT {} FROM scores sc WHERE sc.id = ?", SCORE_COLUMNS);
    Ok(conn
        .query_row(&sql, [id], |r| score_from_row(r, 0))
        .optional()?)
}

/// Highest value first; absent and unscored rows last.
pub fn find_scores_by_exam(conn: &Connection, exam_id: &str) -> ServiceResult<Vec<Score>> {
    let sql = format!(
        "SELECT {} FROM scores sc
         WHERE sc.exam_id = ?
         ORDER BY sc.is_absent, sc.value IS NULL, sc.value DESC, sc.student_id",
        SCORE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([exam_id], |r| score_from_row(r, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every score of a student with its exam, most recent exam first.
pub fn find_scores_by_student(
    conn: &Connection,
    student_id: &str,
) -> ServiceResult<Vec<(Score, Exam)>> {
    let sql = format!(
        "SELECT {}, {} FROM scores sc
         JOIN exams e ON e.id = sc.exam_id
         WHERE sc.student_id = ?
         ORDER BY e.exam_date DESC, e.created_at DESC",
        SCORE_COLUMNS, EXAM_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], |r| Ok((score_from_row(r, 0)?, exam_from_row(r, 9)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A student's scores in exam-date order, optionally limited to one semester.
pub fn find_student_history(
    conn: &Connection,
    student_id: &str,
    semester_id: Option<&str>,
) -> ServiceResult<Vec<(Score, Exam)>> {
    let mut sql = format!(
        "SELECT {}, {} FROM scores sc
         JOIN exams e ON e.id = sc.exam_id
         WHERE sc.student_id = ?",
        SCORE_COLUMNS, EXAM_COLUMNS
    );
    let mut values: Vec<Value> = vec![Value::Text(student_id.to_string())];
    if let Some(sem) = semester_id {
        sql.push_str(" AND e.semester_id = ?");
        values.push(Value::Text(sem.to_string()));
    }
    sql.push_str(" ORDER BY e.exam_date, e.created_at");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| {
            Ok((score_from_row(r, 0)?, exam_from_row(r, 9)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_score_by_exam_and_student(
    conn: &Connection,
    exam_id: &str,
    student_id: &str,
) -> ServiceResult<Option<Score>> {
    let sql = format!(
        "SELECT {} FROM scores sc WHERE sc.exam_id = ? AND sc.student_id = ?",
        SCORE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (exam_id, student_id), |r| score_from_row(r, 0))
        .optional()?)
}

/// Upsert keyed on (exam, student). The student and exam of an existing row
/// never change; value, absence, rank and the update stamp do.
pub fn save_scores(conn: &Connection, scores: &[Score]) -> ServiceResult<usize> {
    if scores.is_empty() {
        return Ok(0);
    }
    let mut stmt = conn.prepare(
        "INSERT INTO scores(id, student_id, exam_id, user_id, value, is_absent, rank, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_id, student_id) DO UPDATE SET
           value = excluded.value,
           is_absent = excluded.is_absent,
           rank = excluded.rank,
           updated_at = excluded.updated_at",
    )?;
    let mut written = 0_usize;
    for s in scores {
        written += stmt.execute((
            &s.id,
            &s.student_id,
            &s.exam_id,
            &s.user_id,
            s.value,
            s.is_absent as i64,
            s.rank,
            &s.created_at,
            &s.updated_at,
        ))?;
    }
    Ok(written)
}

/// Conjunctive exam filter; `None` fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct ExamQuery {
    pub semester_id: Option<String>,
    pub subject: Option<String>,
    pub class_name: Option<String>,
    pub exam_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamOrder {
    DateAsc,
    DateDesc,
}

pub fn find_exams(
    conn: &Connection,
    query: &ExamQuery,
    scope: &ScopePredicate,
    order: ExamOrder,
) -> ServiceResult<Vec<Exam>> {
    let mut sql = format!("SELECT {} FROM exams e WHERE {}", EXAM_COLUMNS, scope.clause);
    let mut values: Vec<Value> = scope.params.clone();
    for (col, v) in [
        ("e.semester_id", &query.semester_id),
        ("e.subject", &query.subject),
        ("e.class_name", &query.class_name),
        ("e.exam_date", &query.exam_date),
    ] {
        if let Some(v) = v {
            sql.push_str(&format!(" AND {} = ?", col));
            values.push(Value::Text(v.clone()));
        }
    }
    sql.push_str(match order {
        ExamOrder::DateAsc => " ORDER BY e.exam_date, e.created_at, e.id",
        ExamOrder::DateDesc => " ORDER BY e.exam_date DESC, e.created_at DESC, e.id",
    });

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| exam_from_row(r, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_exams_by_semester(
    conn: &Connection,
    semester_id: &str,
    class_name: Option<&str>,
    scope: &ScopePredicate,
) -> ServiceResult<Vec<Exam>> {
    let query = ExamQuery {
        semester_id: Some(semester_id.to_string()),
        class_name: class_name.map(str::to_string),
        ..ExamQuery::default()
    };
    find_exams(conn, &query, scope, ExamOrder::DateAsc)
}

/// Exams of the same subject on the same date, unscoped; each sibling is
/// authorized on its own by the caller.
pub fn find_sibling_exams(
    conn: &Connection,
    subject: &str,
    exam_date: &str,
) -> ServiceResult<Vec<Exam>> {
    let query = ExamQuery {
        subject: Some(subject.to_string()),
        exam_date: Some(exam_date.to_string()),
        ..ExamQuery::default()
    };
    let everything = ScopePredicate {
        clause: "1 = 1".to_string(),
        params: Vec::new(),
    };
    find_exams(conn, &query, &everything, ExamOrder::DateAsc)
}

pub fn find_semester_siblings(
    conn: &Connection,
    subject: &str,
    semester_id: &str,
) -> ServiceResult<Vec<Exam>> {
    let query = ExamQuery {
        subject: Some(subject.to_string()),
        semester_id: Some(semester_id.to_string()),
        ..ExamQuery::default()
    };
    let everything = ScopePredicate {
        clause: "1 = 1".to_string(),
        params: Vec::new(),
    };
    find_exams(conn, &query, &everything, ExamOrder::DateAsc)
}

/// Scores of several exams, ordered by exam date so per-student sequences come
/// out chronological.
pub fn find_scores_for_exams(conn: &Connection, exam_ids: &[String]) -> ServiceResult<Vec<Score>> {
    if exam_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM scores sc
         JOIN exams e ON e.id = sc.exam_id
         WHERE sc.exam_id IN ({})
         ORDER BY e.exam_date, e.created_at, e.id, sc.student_id",
        SCORE_COLUMNS,
        placeholders(exam_ids.len())
    );
    let values: Vec<Value> = exam_ids.iter().map(|id| Value::Text(id.clone())).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| score_from_row(r, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_students_by_ids(
    conn: &Connection,
    ids: &[String],
) -> ServiceResult<HashMap<String, Student>> {
    let mut out = HashMap::new();
    if ids.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        "SELECT {} FROM students s WHERE s.id IN ({})",
        STUDENT_COLUMNS,
        placeholders(ids.len())
    );
    let values: Vec<Value> = ids.iter().map(|id| Value::Text(id.clone())).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| student_from_row(r, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    for s in rows {
        out.insert(s.id.clone(), s);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{now_ts, open_test_db};

    fn seed(conn: &Connection) {
        let ts = now_ts();
        conn.execute(
            "INSERT INTO students(id, name, student_number, class_name, created_at)
             VALUES('st1', 'Ada', '001', '1-1', ?), ('st2', 'Ben', '002', '1-1', ?)",
            (&ts, &ts),
        )
        .expect("students");
        conn.execute(
            "INSERT INTO exams(id, name, subject, class_name, exam_date, total_score, teacher_id, created_at)
             VALUES('e1', 'Quiz', 'math', '1-1', '2024-03-01', 100, 't1', ?),
                   ('e2', 'Quiz', 'math', '1-2', '2024-03-01', 100, 't2', ?),
                   ('e3', 'Quiz', 'art', '1-1', '2024-03-01', 100, 't1', ?)",
            (&ts, &ts, &ts),
        )
        .expect("exams");
    }

    fn score(id: &str, student: &str, exam: &str, value: Option<f64>) -> Score {
        Score {
            id: id.into(),
            student_id: student.into(),
            exam_id: exam.into(),
            user_id: Some("t1".into()),
            value,
            is_absent: false,
            rank: None,
            created_at: now_ts(),
            updated_at: now_ts(),
        }
    }

    #[test]
    fn save_scores_upserts_on_exam_student_pair() {
        let (_dir, conn) = open_test_db();
        seed(&conn);
        save_scores(&conn, &[score("a", "st1", "e1", Some(70.0))]).expect("insert");
        save_scores(&conn, &[score("b", "st1", "e1", Some(90.0))]).expect("upsert");

        let rows = find_scores_by_exam(&conn, "e1").expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[0].value, Some(90.0));
    }

    #[test]
    fn scores_by_exam_put_unscored_last() {
        let (_dir, conn) = open_test_db();
        seed(&conn);
        save_scores(
            &conn,
            &[score("a", "st1", "e1", None), score("b", "st2", "e1", Some(50.0))],
        )
        .expect("insert");
        let rows = find_scores_by_exam(&conn, "e1").expect("list");
        assert_eq!(rows[0].id, "b");
        assert_eq!(rows[1].id, "a");
    }

    #[test]
    fn unknown_exam_type_is_a_read_error() {
        let (_dir, conn) = open_test_db();
        seed(&conn);
        conn.execute("UPDATE exams SET exam_type = 'pop_quiz' WHERE id = 'e1'", [])
            .expect("corrupt type");
        let err = find_exam_by_id(&conn, "e1").expect_err("bad exam_type");
        assert_eq!(err.code(), "db_query_failed");
        assert!(find_exam_by_id(&conn, "e2").expect("e2").is_some());
    }

    #[test]
    fn siblings_share_subject_and_date() {
        let (_dir, conn) = open_test_db();
        seed(&conn);
        let ids: Vec<String> = find_sibling_exams(&conn, "math", "2024-03-01")
            .expect("siblings")
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"e1".to_string()) && ids.contains(&"e2".to_string()));
    }

    #[test]
    fn class_names_accept_json_or_comma_list() {
        assert_eq!(
            parse_class_names(Some("[\"1-1\",\"1-2\"]".into())),
            vec!["1-1", "1-2"]
        );
        assert_eq!(parse_class_names(Some("1-1, 1-2".into())), vec!["1-1", "1-2"]);
        assert!(parse_class_names(None).is_empty());
    }
}
