use crate::error::ServiceError;
use crate::ipc::helpers::{
    dispatch, optional_str, optional_str_list, required_str, to_result, unique_violation, Ctx,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Role, User};
use crate::scope::{resolve_scope, ResourceKind};
use crate::{db, store};
use rusqlite::params_from_iter;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn users_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    if ctx.caller.role != Role::Admin {
        return Err(ServiceError::forbidden("only admins may create users").into());
    }
    let username = required_str(params, "username")?;
    let name = required_str(params, "name")?;
    let role: Role = required_str(params, "role")?
        .parse()
        .map_err(HandlerErr::bad_params)?;
    let subject = optional_str(params, "subject")?;
    let class_names: Vec<String> = optional_str_list(params, "classNames")?
        .unwrap_or_default()
        .iter()
        .filter(|c| !c.is_empty())
        .map(|c| ctx.label(c))
        .collect();
    let class_names_json = serde_json::to_string(&class_names)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let user_id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO users(id, username, name, role, subject, class_names, is_active, created_at)
             VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
            (
                &user_id,
                &username,
                &name,
                role.as_str(),
                &subject,
                &class_names_json,
                db::now_ts(),
            ),
        )
        .map_err(|e| unique_violation(e, "username already exists"))?;
    info!(user_id = %user_id, %role, "user created");

    let user = store::find_user_by_id(ctx.conn, &user_id)?
        .ok_or_else(|| ServiceError::not_found("user not found"))?;
    Ok(json!({ "user": to_result(&user)? }))
}

fn users_list(ctx: &Ctx<'_>, _params: &serde_json::Value) -> HandlerResult {
    let scope = resolve_scope(&ctx.caller, ResourceKind::User);
    let predicate = scope.predicate(&["u.id"], None);
    let sql = format!(
        "SELECT {} FROM users u WHERE {} ORDER BY u.username",
        store::USER_COLUMNS,
        predicate.clause
    );
    let mut stmt = ctx.conn.prepare(&sql)?;
    let users: Vec<User> = stmt
        .query_map(params_from_iter(predicate.params), store::user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "users": to_result(&users)? }))
}

fn users_get(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let user_id = required_str(params, "userId")?;
    let scope = resolve_scope(&ctx.caller, ResourceKind::User);
    let user = scope.visible(store::find_user_by_id(ctx.conn, &user_id)?, "user")?;
    Ok(json!({ "user": to_result(&user)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(dispatch(state, req, users_create)),
        "users.list" => Some(dispatch(state, req, users_list)),
        "users.get" => Some(dispatch(state, req, users_get)),
        _ => None,
    }
}
