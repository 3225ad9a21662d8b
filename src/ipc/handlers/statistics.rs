use crate::calc::Thresholds;
use crate::ipc::helpers::{dispatch, optional_str, required_str, to_result, Ctx, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::reports::{self, SiblingRule};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThresholdOverrides {
    excellent: Option<f64>,
    pass: Option<f64>,
    poor: Option<f64>,
}

/// Defaults with any provided fields replaced.
fn parse_thresholds(params: &serde_json::Value) -> Result<Thresholds, HandlerErr> {
    let overrides = match params.get("thresholds") {
        None | Some(serde_json::Value::Null) => ThresholdOverrides::default(),
        Some(v) => ThresholdOverrides::deserialize(v)
            .map_err(|e| HandlerErr::bad_params(format!("invalid thresholds: {}", e)))?,
    };
    let defaults = Thresholds::default();
    Ok(Thresholds {
        excellent: overrides.excellent.unwrap_or(defaults.excellent),
        pass: overrides.pass.unwrap_or(defaults.pass),
        poor: overrides.poor.unwrap_or(defaults.poor),
    })
}

fn parse_sibling_rule(params: &serde_json::Value) -> Result<SiblingRule, HandlerErr> {
    match optional_str(params, "siblings")?.as_deref() {
        None | Some("date") => Ok(SiblingRule::SameDate),
        Some("semester") => Ok(SiblingRule::SameSemester),
        Some(other) => Err(HandlerErr::bad_params(format!(
            "siblings must be one of: date, semester (got {})",
            other
        ))),
    }
}

fn stats_exam(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let exam_id = required_str(params, "examId")?;
    let thresholds = parse_thresholds(params)?;
    let stats = reports::get_exam_statistics(ctx.conn, &ctx.caller, &exam_id, &thresholds)?;
    to_result(&stats)
}

fn stats_semester(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let semester_id = required_str(params, "semesterId")?;
    let class_name = optional_str(params, "className")?.map(|c| ctx.label(&c));
    let stats =
        reports::get_semester_statistics(ctx.conn, &ctx.caller, &semester_id, class_name.as_deref())?;
    to_result(&stats)
}

fn stats_class_comparison(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    ctx.require_manager("compare classes")?;
    let exam_id = required_str(params, "examId")?;
    let rule = parse_sibling_rule(params)?;
    let comparison = reports::get_class_comparison(ctx.conn, &ctx.caller, &exam_id, rule)?;
    to_result(&comparison)
}

fn stats_student(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let semester_id = optional_str(params, "semesterId")?;
    let stats = reports::get_student_statistics(
        ctx.conn,
        &ctx.caller,
        &student_id,
        semester_id.as_deref(),
    )?;
    to_result(&stats)
}

fn stats_subject(ctx: &Ctx<'_>, params: &serde_json::Value) -> HandlerResult {
    let subject = required_str(params, "subject")?;
    let semester_id = optional_str(params, "semesterId")?;
    let class_name = optional_str(params, "className")?.map(|c| ctx.label(&c));
    let stats = reports::get_subject_statistics(
        ctx.conn,
        &ctx.caller,
        &subject,
        semester_id.as_deref(),
        class_name.as_deref(),
    )?;
    to_result(&stats)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.exam" => Some(dispatch(state, req, stats_exam)),
        "stats.semester" => Some(dispatch(state, req, stats_semester)),
        "stats.classComparison" => Some(dispatch(state, req, stats_class_comparison)),
        "stats.student" => Some(dispatch(state, req, stats_student)),
        "stats.subject" => Some(dispatch(state, req, stats_subject)),
        _ => None,
    }
}
