use crate::catalog;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_query_failed, get_grade, get_optional_str, get_required_str, write_text_file, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::provisioning::HashedLoginProvisioner;
use crate::reconcile::apply::{apply, ApplyOptions, Hints};
use crate::reconcile::error::SessionError;
use crate::reconcile::export::{render_export, template_csv, ExportKind};
use crate::reconcile::session::SessionStore;
use crate::reconcile::{analyze, tabular, UploadAnalysis, UploadParams};
use crate::settings::UploadSettings;
use serde_json::{json, Value};
use std::sync::Arc;

fn session_err(e: SessionError, token: &str) -> HandlerErr {
    HandlerErr::new(e.code(), e.to_string()).with_details(json!({ "token": token }))
}

fn summary_json(analysis: &UploadAnalysis) -> Value {
    let mut summary = serde_json::to_value(&analysis.summary).unwrap_or_else(|_| json!({}));
    if let Some(obj) = summary.as_object_mut() {
        obj.insert("subjectColumns".into(), json!(analysis.subject_columns));
        obj.insert("ignoredColumns".into(), json!(analysis.ignored_columns));
        obj.insert("missingColumns".into(), json!(analysis.missing_columns));
        obj.insert("structuralErrors".into(), json!(analysis.structural_errors));
        obj.insert("warnings".into(), json!(analysis.warnings));
    }
    summary
}

fn read_upload(params: &Value) -> Result<Vec<u8>, HandlerErr> {
    if let Some(text) = params.get("csvText").and_then(|v| v.as_str()) {
        return Ok(text.as_bytes().to_vec());
    }
    let in_path = get_required_str(params, "inPath")
        .map_err(|_| HandlerErr::bad_params("missing inPath or csvText"))?;
    std::fs::read(&in_path).map_err(|e| {
        HandlerErr::new("parse_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })
}

fn handle_preview(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let exam_year_id = get_required_str(&req.params, "examYearId")?;
    let grade = get_grade(&req.params)?;
    let bytes = read_upload(&req.params)?;

    if !catalog::exam_year_exists(conn, &exam_year_id).map_err(db_query_failed)? {
        return Err(HandlerErr::new("not_found", "exam year not found")
            .with_details(json!({ "examYearId": exam_year_id })));
    }
    let settings = UploadSettings::load(conn).map_err(db_query_failed)?;
    let table = tabular::parse_table(&bytes, settings.max_upload_bytes)
        .map_err(|e| HandlerErr::new("parse_failed", e.to_string()))?;
    let subjects = catalog::subjects_for_grade(conn, grade).map_err(db_query_failed)?;
    let analysis = analyze(
        conn,
        table,
        &subjects,
        UploadParams {
            grade,
            exam_year_id,
        },
        &settings.auto_create,
    )
    .map_err(db_query_failed)?;

    let summary = summary_json(&analysis);
    let can_confirm = analysis.summary.can_confirm;
    tracing::info!(
        total = analysis.summary.total_rows,
        matched = analysis.summary.matched_rows,
        unmatched = analysis.summary.unmatched_location_rows,
        invalid = analysis.summary.invalid_marks_rows,
        structural = analysis.summary.structural_error_rows,
        "upload previewed"
    );
    let token = state.sessions.create(analysis);
    Ok(json!({
        "token": token,
        "expiresInSeconds": state.sessions.ttl().as_secs(),
        "summary": summary,
        "canConfirm": can_confirm
    }))
}

fn handle_summary(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let token = get_required_str(&req.params, "token")?;
    let analysis = state.sessions.get(&token).map_err(|e| session_err(e, &token))?;
    Ok(json!({
        "token": token,
        "summary": summary_json(&analysis),
        "canConfirm": analysis.summary.can_confirm
    }))
}

fn handle_confirm(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let token = get_required_str(&req.params, "token")?;
    let hints = Hints {
        default_region: get_optional_str(&req.params, "defaultRegion"),
        default_cluster: get_optional_str(&req.params, "defaultCluster"),
    };

    // The gate is checked before consuming so a refused confirm leaves the
    // session usable.
    let peek = state.sessions.get(&token).map_err(|e| session_err(e, &token))?;
    if !peek.summary.can_confirm && hints.is_empty() {
        return Err(HandlerErr::new("nothing_to_apply", "no applicable rows in this upload")
            .with_details(json!({ "token": token })));
    }
    drop(peek);

    let settings = UploadSettings::load(conn).map_err(db_query_failed)?;
    let analysis: Arc<UploadAnalysis> =
        state.sessions.consume(&token).map_err(|e| session_err(e, &token))?;
    let opts = ApplyOptions {
        policy: settings.auto_create,
        school_defaults: settings.school_defaults,
        provision_logins: settings.provision_school_logins,
    };
    let summary = apply(conn, &analysis, &hints, &opts, &HashedLoginProvisioner);
    serde_json::to_value(&summary).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn handle_template_export(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let grade = get_grade(&req.params)?;
    let out_path = get_required_str(&req.params, "outPath")?;
    let subjects = catalog::subjects_for_grade(conn, grade).map_err(db_query_failed)?;
    let text = template_csv(&subjects);
    write_text_file(&out_path, &text)?;
    let mut columns = subjects.iter().map(|s| s.name.clone()).collect::<Vec<_>>();
    columns.sort_by_key(|n| n.to_lowercase());
    Ok(json!({
        "ok": true,
        "path": out_path,
        "grade": grade,
        "subjectColumns": columns,
        "rowsExported": 1
    }))
}

fn handle_error_export(
    state: &mut AppState,
    req: &Request,
    kind: ExportKind,
) -> Result<Value, HandlerErr> {
    let token = get_required_str(&req.params, "token")?;
    let out_path = get_required_str(&req.params, "outPath")?;
    // Exports stay available after confirm until the session TTL lapses.
    let analysis = state
        .sessions
        .snapshot(&token)
        .map_err(|e| session_err(e, &token))?;
    let (text, rows_exported) = render_export(&analysis, kind);
    write_text_file(&out_path, &text)?;
    Ok(json!({
        "ok": true,
        "rowsExported": rows_exported,
        "path": out_path
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "results.upload.preview" => handle_preview(state, req),
        "results.upload.summary" => handle_summary(state, req),
        "results.upload.confirm" => handle_confirm(state, req),
        "results.template.export" => handle_template_export(state, req),
        "results.upload.exportUnmatchedSchools" => {
            handle_error_export(state, req, ExportKind::UnmatchedSchools)
        }
        "results.upload.exportUnmatchedStudents" => {
            handle_error_export(state, req, ExportKind::UnmatchedStudents)
        }
        "results.upload.exportNoMarks" => handle_error_export(state, req, ExportKind::NoMarks),
        "results.upload.exportInvalidMarks" => {
            handle_error_export(state, req, ExportKind::InvalidMarks)
        }
        "results.upload.export" => {
            let kind = req
                .params
                .get("kind")
                .and_then(|v| v.as_str())
                .and_then(ExportKind::parse);
            match kind {
                Some(kind) => handle_error_export(state, req, kind),
                None => Err(HandlerErr::bad_params(
                    "kind must be one of: unmatched, unmatchedstudents, nomarks, invalid",
                )),
            }
        }
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            if e.code != "bad_params" {
                tracing::debug!(method = %req.method, code = e.code, "request failed: {}", e.message);
            }
            e.response(&req.id)
        }
    })
}
