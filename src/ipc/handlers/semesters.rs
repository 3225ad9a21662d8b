use crate::error::ServiceError;
use crate::ipc::helpers::{
    dispatch, optional_bool, optional_date, optional_str, required_date, required_str, to_result,
    Ctx, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Semester;
use crate::scope::{resolve_scope, ResourceKind};
use crate::{db, store};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn check_range(start: &str, end: &str) -> Result<(), HandlerErr> {
    // Both are canonical YYYY-MM-DD, so string order is date order.
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not be before startDate")
            .with_details(json!({ "startDate": start, "endDate": end })));
    }
    Ok(())
}

fn visible_semester(ctx: &Ctx<'_>, semester_id: &str) -> Result<Semester, HandlerErr> {
    let scope = resolve_scope(&ctx.caller, ResourceKind::Semester);
    Ok(scope.visible(store::find_semester_by_id(ctx.conn, semester_id)?, "semester")?)
}

/// Clears every flag, then sets one; callers run this inside a transaction.
fn mark_current(conn: &Connection, semester_id: &str) -> Result<(), HandlerErr> {
    conn.execute("UPDATE semesters SET is_current = 0 WHERE is_current = 1", [])?;
    let n = conn.execute(
        "UPDATE semesters SET is_current = 1 WHERE id = ?",
        [semester_id],
    )?;
    if n == 0 {
        return Err(ServiceError::not_found("semester not found").into());
    }
    Ok(())
}

fn semesters_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    ctx.require_manager("create semesters")?;
    let name = required_str(params, "name")?;
    let school_year = required_str(params, "schoolYear")?;
    let start_date = required_date(params, "startDate")?;
    let end_date = required_date(params, "endDate")?;
    check_range(&start_date, &end_date)?;
    let is_current = optional_bool(params, "isCurrent")?.unwrap_or(false);

    let semester_id = Uuid::new_v4().to_string();
    let tx = ctx.conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO semesters(id, name, school_year, start_date, end_date, is_current, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (
            &semester_id,
            &name,
            &school_year,
            &start_date,
            &end_date,
            db::now_ts(),
        ),
    )?;
    if is_current {
        mark_current(&tx, &semester_id)?;
    }
    tx.commit()?;
    info!(semester_id = %semester_id, is_current, "semester created");

    let semester = visible_semester(ctx, &semester_id)?;
    Ok(json!({ "semester": to_result(&semester)? }))
}

fn semesters_list(ctx: &Ctx<'_>, _params: &serde_json::Value) -> HandlerResult {
    let sql = format!(
        "SELECT {} FROM semesters sem ORDER BY sem.start_date DESC, sem.created_at DESC",
        store::SEMESTER_COLUMNS
    );
    let mut stmt = ctx.conn.prepare(&sql)?;
    let semesters = stmt
        .query_map([], store::semester_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "semesters": to_result(&semesters)? }))
}

fn semesters_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let semester = visible_semester(ctx, &required_str(params, "semesterId")?)?;
    Ok(json!({ "semester": to_result(&semester)? }))
}

fn semesters_current(ctx: &Ctx<'_>, _params: &serde_json::Value) -> HandlerResult {
    let sql = format!(
        "SELECT {} FROM semesters sem WHERE sem.is_current = 1 LIMIT 1",
        store::SEMESTER_COLUMNS
    );
    let semester = ctx
        .conn
        .query_row(&sql, [], store::semester_from_row)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("no current semester"))?;
    Ok(json!({ "semester": to_result(&semester)? }))
}

fn semesters_update(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    ctx.require_manager("update semesters")?;
    let mut semester = visible_semester(ctx, &required_str(params, "semesterId")?)?;
    if let Some(name) = optional_str(params, "name")? {
        semester.name = name;
    }
    if let Some(year) = optional_str(params, "schoolYear")? {
        semester.school_year = year;
    }
    if let Some(start) = optional_date(params, "startDate")? {
        semester.start_date = start;
    }
    if let Some(end) = optional_date(params, "endDate")? {
        semester.end_date = end;
    }
    check_range(&semester.start_date, &semester.end_date)?;

    ctx.conn.execute(
        "UPDATE semesters SET name = ?, school_year = ?, start_date = ?, end_date = ? WHERE id = ?",
        (
            &semester.name,
            &semester.school_year,
            &semester.start_date,
            &semester.end_date,
            &semester.id,
        ),
    )?;
    info!(semester_id = %semester.id, "semester updated");
    Ok(json!({ "semester": to_result(&semester)? }))
}

fn semesters_set_current(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    ctx.require_manager("change the current semester")?;
    let semester_id = required_str(params, "semesterId")?;
    let tx = ctx.conn.unchecked_transaction()?;
    mark_current(&tx, &semester_id)?;
    tx.commit()?;
    info!(semester_id = %semester_id, "current semester switched");

    let semester = visible_semester(ctx, &semester_id)?;
    Ok(json!({ "semester": to_result(&semester)? }))
}

fn semesters_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    ctx.require_manager("delete semesters")?;
    let semester = visible_semester(ctx, &required_str(params, "semesterId")?)?;
    ctx.conn
        .execute("DELETE FROM semesters WHERE id = ?", [&semester.id])?;
    info!(semester_id = %semester.id, "semester deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "semesters.create" => Some(dispatch(state, req, semesters_create)),
        "semesters.list" => Some(dispatch(state, req, semesters_list)),
        "semesters.get" => Some(dispatch(state, req, semesters_get)),
        "semesters.current" => Some(dispatch(state, req, semesters_current)),
        "semesters.update" => Some(dispatch(state, req, semesters_update)),
        "semesters.setCurrent" => Some(dispatch(state, req, semesters_set_current)),
        "semesters.delete" => Some(dispatch(state, req, semesters_delete)),
        _ => None,
    }
}
