use crate::error::ServiceError;
use crate::ipc::helpers::{
    dispatch, optional_date, optional_f64, optional_str, required_date, required_str, to_result,
    Ctx, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Exam, ExamStatus, ExamType, Role};
use crate::scope::{resolve_scope, ResourceKind};
use crate::store::{self, ExamOrder, ExamQuery};
use crate::db;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub(crate) fn visible_exam(ctx: &Ctx<'_>, exam_id: &str) -> Result<Exam, HandlerErr> {
    let scope = resolve_scope(&ctx.caller, ResourceKind::Exam);
    Ok(scope.visible(store::find_exam_by_id(ctx.conn, exam_id)?, "exam")?)
}

fn parse_total(v: f64) -> Result<f64, HandlerErr> {
    if !v.is_finite() || v <= 0.0 {
        return Err(HandlerErr::bad_params("totalScore must be greater than 0"));
    }
    Ok(v)
}

fn require_semester(ctx: &Ctx<'_>, semester_id: Option<String>) -> Result<Option<String>, HandlerErr> {
    let Some(id) = semester_id else {
        return Ok(None);
    };
    if store::find_semester_by_id(ctx.conn, &id)?.is_none() {
        return Err(ServiceError::not_found("semester not found").into());
    }
    Ok(Some(id))
}

fn exams_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let subject = required_str(params, "subject")?;
    let class_name = ctx.label(&required_str(params, "className")?);
    let exam_date = required_date(params, "examDate")?;
    let total_score = parse_total(
        optional_f64(params, "totalScore")?
            .ok_or_else(|| HandlerErr::bad_params("missing totalScore"))?,
    )?;
    let exam_type: ExamType = match optional_str(params, "examType")? {
        Some(s) => s.parse().map_err(HandlerErr::bad_params)?,
        None => ExamType::Other,
    };
    let status: ExamStatus = match optional_str(params, "status")? {
        Some(s) => s.parse().map_err(HandlerErr::bad_params)?,
        None => ExamStatus::NotStarted,
    };
    let semester_id = require_semester(ctx, optional_str(params, "semesterId")?)?;
    let teacher_id = match ctx.caller.role {
        Role::Teacher => Some(ctx.caller.id.clone()),
        Role::Admin | Role::GradeLeader => optional_str(params, "teacherId")?,
    };

    let exam_id = Uuid::new_v4().to_string();
    ctx.conn.execute(
        "INSERT INTO exams(id, name, subject, class_name, exam_date, total_score, exam_type,
                           status, teacher_id, semester_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &exam_id,
            &name,
            &subject,
            &class_name,
            &exam_date,
            total_score,
            exam_type.as_str(),
            status.as_str(),
            &teacher_id,
            &semester_id,
            db::now_ts(),
        ),
    )?;
    info!(exam_id = %exam_id, subject = %subject, class_name = %class_name, "exam created");

    let exam = visible_exam(ctx, &exam_id)?;
    Ok(json!({ "exam": to_result(&exam)? }))
}

fn exams_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let scope = resolve_scope(&ctx.caller, ResourceKind::Exam);
    let predicate = scope.predicate(&["e.teacher_id"], Some("e.class_name"));
    let query = ExamQuery {
        semester_id: optional_str(params, "semesterId")?,
        subject: optional_str(params, "subject")?,
        class_name: optional_str(params, "className")?.map(|c| ctx.label(&c)),
        exam_date: None,
    };
    let exams = store::find_exams(ctx.conn, &query, &predicate, ExamOrder::DateDesc)?;
    Ok(json!({ "exams": to_result(&exams)? }))
}

fn exams_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let exam = visible_exam(ctx, &required_str(params, "examId")?)?;
    Ok(json!({ "exam": to_result(&exam)? }))
}

fn exams_update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let mut exam = visible_exam(ctx, &required_str(params, "examId")?)?;

    if let Some(name) = optional_str(params, "name")? {
        exam.name = name;
    }
    if let Some(subject) = optional_str(params, "subject")? {
        exam.subject = subject;
    }
    if let Some(raw) = optional_str(params, "className")? {
        exam.class_name = ctx.label(&raw);
    }
    if let Some(date) = optional_date(params, "examDate")? {
        exam.exam_date = date;
    }
    if let Some(s) = optional_str(params, "examType")? {
        exam.exam_type = s.parse().map_err(HandlerErr::bad_params)?;
    }
    if let Some(s) = optional_str(params, "status")? {
        exam.status = s.parse().map_err(HandlerErr::bad_params)?;
    }
    if params.get("semesterId").is_some() {
        exam.semester_id = require_semester(ctx, optional_str(params, "semesterId")?)?;
    }
    if params.get("teacherId").is_some() {
        ctx.require_manager("reassign exams")?;
        exam.teacher_id = optional_str(params, "teacherId")?;
    }
    if let Some(total) = optional_f64(params, "totalScore")? {
        let total = parse_total(total)?;
        let highest: Option<f64> = ctx.conn.query_row(
            "SELECT MAX(value) FROM scores WHERE exam_id = ? AND is_absent = 0",
            [&exam.id],
            |r| r.get(0),
        )?;
        if highest.is_some_and(|h| h > total) {
            return Err(HandlerErr::bad_params("totalScore is below an existing score")
                .with_details(json!({ "highestScore": highest })));
        }
        exam.total_score = total;
    }

    ctx.conn.execute(
        "UPDATE exams
         SET name = ?, subject = ?, class_name = ?, exam_date = ?, total_score = ?,
             exam_type = ?, status = ?, teacher_id = ?, semester_id = ?
         WHERE id = ?",
        (
            &exam.name,
            &exam.subject,
            &exam.class_name,
            &exam.exam_date,
            exam.total_score,
            exam.exam_type.as_str(),
            exam.status.as_str(),
            &exam.teacher_id,
            &exam.semester_id,
            &exam.id,
        ),
    )?;
    info!(exam_id = %exam.id, "exam updated");
    Ok(json!({ "exam": to_result(&exam)? }))
}

fn exams_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let exam = visible_exam(ctx, &required_str(params, "examId")?)?;
    ctx.conn.execute("DELETE FROM exams WHERE id = ?", [&exam.id])?;
    info!(exam_id = %exam.id, "exam deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.create" => Some(dispatch(state, req, exams_create)),
        "exams.list" => Some(dispatch(state, req, exams_list)),
        "exams.get" => Some(dispatch(state, req, exams_get)),
        "exams.update" => Some(dispatch(state, req, exams_update)),
        "exams.delete" => Some(dispatch(state, req, exams_delete)),
        _ => None,
    }
}
