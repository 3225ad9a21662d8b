use crate::error::ServiceError;
use crate::ipc::helpers::{
    dispatch, optional_str, required_str, to_result, unique_violation, Ctx, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Role, Student};
use crate::scope::{resolve_scope, ResourceKind};
use crate::{db, rank, store};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn visible_student(ctx: &Ctx<'_>, student_id: &str) -> Result<Student, HandlerErr> {
    let scope = resolve_scope(&ctx.caller, ResourceKind::Student);
    Ok(scope.visible(store::find_student_by_id(ctx.conn, student_id)?, "student")?)
}

/// Label plus the id of a stored class carrying that label, if any.
fn class_link(
    ctx: &Ctx<'_>,
    raw: Option<String>,
) -> Result<(Option<String>, Option<String>), HandlerErr> {
    let Some(raw) = raw else {
        return Ok((None, None));
    };
    let label = ctx.label(&raw);
    let class_id = store::find_class_id_by_name(ctx.conn, &label)?;
    Ok((Some(label), class_id))
}

fn students_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let student_number = required_str(params, "studentNumber")?;
    let (class_name, class_id) = class_link(ctx, optional_str(params, "className")?)?;
    let teacher_id = match ctx.caller.role {
        Role::Teacher => Some(ctx.caller.id.clone()),
        Role::Admin | Role::GradeLeader => optional_str(params, "teacherId")?,
    };

    let student_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO students(id, name, student_number, class_id, class_name, teacher_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &student_id,
                &name,
                &student_number,
                &class_id,
                &class_name,
                &teacher_id,
                db::now_ts(),
            ),
        )
        .map_err(|e| unique_violation(e, "student number already exists"))?;
    info!(student_id = %student_id, "student created");

    let student = visible_student(ctx, &student_id)?;
    Ok(json!({ "student": to_result(&student)? }))
}

fn students_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let scope = resolve_scope(&ctx.caller, ResourceKind::Student);
    let predicate = scope.predicate(&["s.teacher_id"], Some("s.class_name"));
    let mut sql = format!(
        "SELECT {} FROM students s WHERE {}",
        store::STUDENT_COLUMNS,
        predicate.clause
    );
    let mut values: Vec<Value> = predicate.params;
    if let Some(raw) = optional_str(params, "className")? {
        sql.push_str(" AND s.class_name = ?");
        values.push(Value::Text(ctx.label(&raw)));
    }
    sql.push_str(" ORDER BY s.class_name, s.student_number");

    let mut stmt = ctx.conn.prepare(&sql)?;
    let students = stmt
        .query_map(params_from_iter(values), |r| store::student_from_row(r, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": to_result(&students)? }))
}

fn students_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student = visible_student(ctx, &required_str(params, "studentId")?)?;
    Ok(json!({ "student": to_result(&student)? }))
}

fn students_update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let mut student = visible_student(ctx, &required_str(params, "studentId")?)?;

    if let Some(name) = optional_str(params, "name")? {
        student.name = name;
    }
    if let Some(number) = optional_str(params, "studentNumber")? {
        student.student_number = number;
    }
    if params.get("className").is_some() {
        let (class_name, class_id) = class_link(ctx, optional_str(params, "className")?)?;
        student.class_name = class_name;
        student.class_id = class_id;
    }
    if params.get("teacherId").is_some() {
        ctx.require_manager("reassign students")?;
        student.teacher_id = optional_str(params, "teacherId")?;
    }

    ctx.conn
        .execute(
            "UPDATE students
             SET name = ?, student_number = ?, class_id = ?, class_name = ?, teacher_id = ?
             WHERE id = ?",
            (
                &student.name,
                &student.student_number,
                &student.class_id,
                &student.class_name,
                &student.teacher_id,
                &student.id,
            ),
        )
        .map_err(|e| unique_violation(e, "student number already exists"))?;
    info!(student_id = %student.id, "student updated");
    Ok(json!({ "student": to_result(&student)? }))
}

fn students_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student = visible_student(ctx, &required_str(params, "studentId")?)?;

    let tx = ctx.conn.unchecked_transaction()?;
    let exam_ids: Vec<String> = {
        let mut stmt = tx.prepare("SELECT DISTINCT exam_id FROM scores WHERE student_id = ?")?;
        let ids = stmt
            .query_map([&student.id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        ids
    };
    let deleted = tx.execute("DELETE FROM students WHERE id = ?", [&student.id])?;
    if deleted == 0 {
        return Err(ServiceError::not_found("student not found").into());
    }
    for exam_id in &exam_ids {
        rank::rerank_exam(&tx, exam_id)?;
    }
    tx.commit()?;

    info!(student_id = %student.id, reranked = exam_ids.len(), "student deleted");
    Ok(json!({ "ok": true, "rerankedExams": exam_ids }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(dispatch(state, req, students_create)),
        "students.list" => Some(dispatch(state, req, students_list)),
        "students.get" => Some(dispatch(state, req, students_get)),
        "students.update" => Some(dispatch(state, req, students_update)),
        "students.delete" => Some(dispatch(state, req, students_delete)),
        _ => None,
    }
}
