use crate::db;
use crate::error::ServiceError;
use crate::ipc::helpers::{
    dispatch, optional_bool, optional_str, required_str, to_result, unique_violation, Ctx,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::labels::{display_label, grade_name};
use crate::model::ClassRecord;
use crate::scope::{resolve_scope, ResourceKind};
use crate::store;
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn visible_class(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<ClassRecord, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let scope = resolve_scope(&ctx.caller, ResourceKind::Class);
    Ok(scope.visible(store::find_class_by_id(ctx.conn, &class_id)?, "class")?)
}

fn class_json(ctx: &Ctx<'_>, class: &ClassRecord) -> HandlerResult {
    let label = (ctx.normalize)(&class.name);
    let display_name = match (label.grade, label.class_number) {
        (Some(g), Some(c)) => display_label(g, c),
        _ => class.name.clone(),
    };
    let mut v = to_result(class)?;
    v["displayName"] = json!(display_name);
    Ok(v)
}

fn classes_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let raw = required_str(params, "name")?;
    let label = (ctx.normalize)(&raw);
    if label.canonical.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let grade = match optional_str(params, "grade")? {
        Some(g) => Some(g),
        None => label.grade.map(grade_name),
    };
    let description = optional_str(params, "description")?;

    let class_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO classes(id, name, grade, description, is_active, created_by, created_at)
             VALUES(?, ?, ?, ?, 1, ?, ?)",
            (
                &class_id,
                &label.canonical,
                &grade,
                &description,
                &ctx.caller.id,
                db::now_ts(),
            ),
        )
        .map_err(|e| unique_violation(e, "class name already exists"))?;
    info!(class_id = %class_id, name = %label.canonical, "class created");

    let class = store::find_class_by_id(ctx.conn, &class_id)?
        .ok_or_else(|| ServiceError::not_found("class not found"))?;
    Ok(json!({ "class": class_json(ctx, &class)? }))
}

fn classes_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let active_only = optional_bool(params, "activeOnly")?.unwrap_or(false);
    let scope = resolve_scope(&ctx.caller, ResourceKind::Class);
    let predicate = scope.predicate(&["c.created_by"], Some("c.name"));

    let mut sql = format!(
        "SELECT {} FROM classes c WHERE {}",
        store::CLASS_COLUMNS,
        predicate.clause
    );
    let values: Vec<Value> = predicate.params;
    if active_only {
        sql.push_str(" AND c.is_active = 1");
    }
    sql.push_str(" ORDER BY c.name");

    let mut stmt = ctx.conn.prepare(&sql)?;
    let classes = stmt
        .query_map(params_from_iter(values), store::class_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let out = classes
        .iter()
        .map(|c| class_json(ctx, c))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": out }))
}

fn classes_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let class = visible_class(ctx, params)?;
    Ok(json!({ "class": class_json(ctx, &class)? }))
}

fn classes_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let class = visible_class(ctx, params)?;
    // Students keep their label; only the link is cleared.
    ctx.conn
        .execute("DELETE FROM classes WHERE id = ?", [&class.id])?;
    info!(class_id = %class.id, "class deleted");
    Ok(json!({ "ok": true }))
}

fn classes_toggle_active(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let class = visible_class(ctx, params)?;
    ctx.conn.execute(
        "UPDATE classes SET is_active = CASE is_active WHEN 0 THEN 1 ELSE 0 END WHERE id = ?",
        [&class.id],
    )?;
    let class = store::find_class_by_id(ctx.conn, &class.id)?
        .ok_or_else(|| ServiceError::not_found("class not found"))?;
    info!(class_id = %class.id, active = class.is_active, "class toggled");
    Ok(json!({ "class": class_json(ctx, &class)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(dispatch(state, req, classes_create)),
        "classes.list" => Some(dispatch(state, req, classes_list)),
        "classes.get" => Some(dispatch(state, req, classes_get)),
        "classes.delete" => Some(dispatch(state, req, classes_delete)),
        "classes.toggleActive" => Some(dispatch(state, req, classes_toggle_active)),
        _ => None,
    }
}
