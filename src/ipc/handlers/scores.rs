use crate::error::ServiceError;
use crate::ipc::handlers::exams::visible_exam;
use crate::ipc::helpers::{
    dispatch, optional_bool, required_str, to_result, Ctx, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Exam, Score, Student};
use crate::scope::{resolve_scope, ResourceKind, ScoreInExam};
use crate::{db, rank, store};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

fn visible_student(ctx: &Ctx<'_>, student_id: &str) -> Result<Student, HandlerErr> {
    let scope = resolve_scope(&ctx.caller, ResourceKind::Student);
    Ok(scope.visible(store::find_student_by_id(ctx.conn, student_id)?, "student")?)
}

/// A score and its exam, both visible to the caller.
fn visible_score(ctx: &Ctx<'_>, score_id: &str) -> Result<(Score, Exam), HandlerErr> {
    let not_found = || HandlerErr::from(ServiceError::not_found("score not found"));
    let score = store::find_score_by_id(ctx.conn, score_id)?.ok_or_else(not_found)?;
    let exam = store::find_exam_by_id(ctx.conn, &score.exam_id)?.ok_or_else(not_found)?;
    let scope = resolve_scope(&ctx.caller, ResourceKind::Score);
    if !scope.permits(&ScoreInExam {
        score: &score,
        exam: &exam,
    }) {
        return Err(not_found());
    }
    Ok((score, exam))
}

/// The `score` param: absent key, `null` or a number within `[0, totalScore]`.
fn score_value(
    params: &serde_json::Value,
    exam: &Exam,
) -> Result<Option<Option<f64>>, HandlerErr> {
    match params.get("score") {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(Some(None)),
        Some(v) => {
            let value = v
                .as_f64()
                .ok_or_else(|| HandlerErr::bad_params("score must be a number"))?;
            check_value(value, exam)?;
            Ok(Some(Some(value)))
        }
    }
}

fn check_value(value: f64, exam: &Exam) -> Result<(), HandlerErr> {
    if !value.is_finite() || value < 0.0 || value > exam.total_score {
        return Err(HandlerErr::bad_params(format!(
            "score must be between 0 and {}",
            exam.total_score
        ))
        .with_details(json!({ "examId": exam.id, "score": value })));
    }
    Ok(())
}

fn new_score(ctx: &Ctx<'_>, student_id: &str, exam_id: &str) -> Score {
    let now = db::now_ts();
    Score {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        exam_id: exam_id.to_string(),
        user_id: Some(ctx.caller.id.clone()),
        value: None,
        is_absent: false,
        rank: None,
        created_at: now.clone(),
        updated_at: now,
    }
}

/// Writes the rows and reranks every touched exam as one unit.
fn save_and_rerank(ctx: &Ctx<'_>, scores: &[Score]) -> Result<Vec<String>, HandlerErr> {
    let exam_ids: BTreeSet<&str> = scores.iter().map(|s| s.exam_id.as_str()).collect();
    let tx = ctx.conn.unchecked_transaction()?;
    store::save_scores(&tx, scores)?;
    for exam_id in &exam_ids {
        rank::rerank_exam(&tx, exam_id)?;
    }
    tx.commit()?;
    Ok(exam_ids.into_iter().map(str::to_string).collect())
}

fn reload(ctx: &Ctx<'_>, exam_id: &str, student_id: &str) -> Result<Score, HandlerErr> {
    store::find_score_by_exam_and_student(ctx.conn, exam_id, student_id)?
        .ok_or_else(|| ServiceError::not_found("score not found").into())
}

fn scores_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let exam = visible_exam(ctx, &required_str(params, "examId")?)?;
    let student = visible_student(ctx, &required_str(params, "studentId")?)?;
    if store::find_score_by_exam_and_student(ctx.conn, &exam.id, &student.id)?.is_some() {
        return Err(HandlerErr::bad_params(
            "score already exists for this student and exam; use scores.update",
        ));
    }

    let mut score = new_score(ctx, &student.id, &exam.id);
    score.value = score_value(params, &exam)?.flatten();
    score.is_absent = optional_bool(params, "isAbsent")?.unwrap_or(false);
    save_and_rerank(ctx, std::slice::from_ref(&score))?;
    info!(exam_id = %exam.id, student_id = %student.id, "score created");

    let score = reload(ctx, &exam.id, &student.id)?;
    Ok(json!({ "score": to_result(&score)? }))
}

fn scores_update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let (mut score, exam) = visible_score(ctx, &required_str(params, "scoreId")?)?;
    for (key, current) in [("studentId", &score.student_id), ("examId", &score.exam_id)] {
        if let Some(v) = params.get(key).and_then(|v| v.as_str()) {
            if v != current.as_str() {
                return Err(HandlerErr::bad_params(format!("{} cannot be changed", key)));
            }
        }
    }

    if let Some(value) = score_value(params, &exam)? {
        score.value = value;
    }
    if let Some(absent) = optional_bool(params, "isAbsent")? {
        score.is_absent = absent;
    }
    score.updated_at = db::now_ts();
    save_and_rerank(ctx, std::slice::from_ref(&score))?;
    info!(score_id = %score.id, exam_id = %exam.id, "score updated");

    let score = reload(ctx, &score.exam_id, &score.student_id)?;
    Ok(json!({ "score": to_result(&score)? }))
}

fn scores_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let (score, exam) = visible_score(ctx, &required_str(params, "scoreId")?)?;
    Ok(json!({ "score": to_result(&score)?, "exam": to_result(&exam)? }))
}

fn scores_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let (score, exam) = visible_score(ctx, &required_str(params, "scoreId")?)?;
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute("DELETE FROM scores WHERE id = ?", [&score.id])?;
    rank::rerank_exam(&tx, &exam.id)?;
    tx.commit()?;
    info!(score_id = %score.id, exam_id = %exam.id, "score deleted");
    Ok(json!({ "ok": true }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExamScoreRow<'a> {
    #[serde(flatten)]
    score: &'a Score,
    student_name: Option<&'a str>,
    student_number: Option<&'a str>,
}

fn scores_by_exam(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let exam = visible_exam(ctx, &required_str(params, "examId")?)?;
    let scores = store::find_scores_by_exam(ctx.conn, &exam.id)?;
    let ids: Vec<String> = scores.iter().map(|s| s.student_id.clone()).collect();
    let students = store::find_students_by_ids(ctx.conn, &ids)?;
    let rows: Vec<ExamScoreRow<'_>> = scores
        .iter()
        .map(|s| {
            let student = students.get(&s.student_id);
            ExamScoreRow {
                score: s,
                student_name: student.map(|st| st.name.as_str()),
                student_number: student.map(|st| st.student_number.as_str()),
            }
        })
        .collect();
    Ok(json!({ "exam": to_result(&exam)?, "scores": to_result(&rows)? }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentScoreRow<'a> {
    #[serde(flatten)]
    score: &'a Score,
    exam_name: &'a str,
    subject: &'a str,
    exam_date: &'a str,
    total_score: f64,
}

fn scores_by_student(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student = visible_student(ctx, &required_str(params, "studentId")?)?;
    let scope = resolve_scope(&ctx.caller, ResourceKind::Score);
    let pairs = store::find_scores_by_student(ctx.conn, &student.id)?;
    let rows: Vec<StudentScoreRow<'_>> = pairs
        .iter()
        .filter(|(score, exam)| scope.permits(&ScoreInExam { score, exam }))
        .map(|(score, exam)| StudentScoreRow {
            score,
            exam_name: &exam.name,
            subject: &exam.subject,
            exam_date: &exam.exam_date,
            total_score: exam.total_score,
        })
        .collect();
    Ok(json!({ "student": to_result(&student)?, "scores": to_result(&rows)? }))
}

fn scores_import(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let Some(items) = params.get("scores").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing scores"));
    };
    if items.is_empty() {
        return Ok(json!({ "imported": 0, "created": 0, "updated": 0, "rankedExams": [] }));
    }
    info!(rows = items.len(), caller = %ctx.caller.id, "score import started");

    let mut exams: HashMap<String, Exam> = HashMap::new();
    let mut checked_students: BTreeSet<String> = BTreeSet::new();
    let mut batch: Vec<Score> = Vec::new();
    let mut slot: HashMap<(String, String), usize> = HashMap::new();
    let mut created = 0_usize;

    for (index, item) in items.iter().enumerate() {
        let at = |e: HandlerErr| {
            let message = format!("scores[{}]: {}", index, e.message);
            HandlerErr {
                code: e.code,
                message,
                details: Some(json!({ "index": index })),
            }
        };
        let exam_id = required_str(item, "examId").map_err(at)?;
        let student_id = required_str(item, "studentId").map_err(at)?;

        if !exams.contains_key(&exam_id) {
            let exam = visible_exam(ctx, &exam_id).map_err(at)?;
            exams.insert(exam_id.clone(), exam);
        }
        if checked_students.insert(student_id.clone()) {
            visible_student(ctx, &student_id).map_err(at)?;
        }
        let Some(exam) = exams.get(&exam_id) else {
            continue;
        };

        let key = (exam_id.clone(), student_id.clone());
        let mut score = match slot.get(&key) {
            Some(&i) => batch[i].clone(),
            None => match store::find_score_by_exam_and_student(ctx.conn, &exam_id, &student_id)? {
                Some(existing) => existing,
                None => {
                    created += 1;
                    new_score(ctx, &student_id, &exam_id)
                }
            },
        };
        if let Some(value) = score_value(item, exam).map_err(at)? {
            score.value = value;
        }
        if let Some(absent) = optional_bool(item, "isAbsent").map_err(at)? {
            score.is_absent = absent;
        }
        score.updated_at = db::now_ts();

        match slot.get(&key) {
            Some(&i) => batch[i] = score,
            None => {
                slot.insert(key, batch.len());
                batch.push(score);
            }
        }
    }

    let ranked = save_and_rerank(ctx, &batch)?;
    debug!(exams = ranked.len(), "import reranked exams");
    info!(
        imported = batch.len(),
        created,
        updated = batch.len() - created,
        "score import done"
    );
    Ok(json!({
        "imported": batch.len(),
        "created": created,
        "updated": batch.len() - created,
        "rankedExams": ranked,
    }))
}

fn scores_calculate_ranks(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let exam = visible_exam(ctx, &required_str(params, "examId")?)?;
    let outcome = rank::compute_ranks(ctx.conn, &exam.id)?;
    info!(exam_id = %exam.id, ranked = outcome.ranked_count, "ranks computed");
    to_result(&outcome)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.create" => Some(dispatch(state, req, scores_create)),
        "scores.update" => Some(dispatch(state, req, scores_update)),
        "scores.get" => Some(dispatch(state, req, scores_get)),
        "scores.delete" => Some(dispatch(state, req, scores_delete)),
        "scores.byExam" => Some(dispatch(state, req, scores_by_exam)),
        "scores.byStudent" => Some(dispatch(state, req, scores_by_student)),
        "scores.import" => Some(dispatch(state, req, scores_import)),
        "scores.calculateRanks" => Some(dispatch(state, req, scores_calculate_ranks)),
        _ => None,
    }
}
