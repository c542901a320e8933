use crate::db::now_rfc3339;
use crate::grading::{is_pass, percent_of, ResultStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query_failed, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn results_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let exam_year_id = get_required_str(params, "examYearId")?;
    let school_id = get_optional_str(params, "schoolId");
    let student_id = get_optional_str(params, "studentId");
    let status = match get_optional_str(params, "status") {
        None => None,
        Some(s) => Some(
            ResultStatus::parse(&s)
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", s)))?,
        ),
    };

    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.student_id, st.first_name, st.last_name, st.school_id,
                    r.subject_id, sb.name, sb.max_score, sb.pass_score,
                    r.first_term_score, r.exam_score, r.total_score, r.grade, r.status,
                    r.updated_at
             FROM results r
             JOIN students st ON st.id = r.student_id
             JOIN subjects sb ON sb.id = r.subject_id
             WHERE r.exam_year_id = ?1
               AND (?2 IS NULL OR st.school_id = ?2)
               AND (?3 IS NULL OR r.student_id = ?3)
               AND (?4 IS NULL OR r.status = ?4)
             ORDER BY st.last_name COLLATE NOCASE, st.first_name COLLATE NOCASE, sb.name COLLATE NOCASE",
        )
        .map_err(db_query_failed)?;
    let results = stmt
        .query_map(
            rusqlite::params![exam_year_id, school_id, student_id, status.map(|s| s.as_str())],
            |r| {
                let max_score: f64 = r.get(7)?;
                let pass_score: f64 = r.get(8)?;
                let total: f64 = r.get(11)?;
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "studentName": format!("{} {}", r.get::<_, String>(2)?, r.get::<_, String>(3)?).trim().to_string(),
                    "schoolId": r.get::<_, String>(4)?,
                    "subjectId": r.get::<_, String>(5)?,
                    "subjectName": r.get::<_, String>(6)?,
                    "maxScore": max_score,
                    "firstTermScore": r.get::<_, Option<f64>>(9)?,
                    "examScore": r.get::<_, Option<f64>>(10)?,
                    "totalScore": total,
                    "percent": percent_of(total, max_score),
                    "grade": r.get::<_, String>(12)?,
                    "passed": is_pass(total, pass_score),
                    "status": r.get::<_, String>(13)?,
                    "updatedAt": r.get::<_, String>(14)?
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;
    Ok(json!({ "results": results }))
}

fn results_set_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let raw = get_required_str(params, "status")?;
    let next = ResultStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", raw)))?;

    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM results WHERE id = ?",
            [&result_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_failed)?;
    let Some(current) = current else {
        return Err(HandlerErr::new("not_found", "result not found")
            .with_details(json!({ "resultId": result_id })));
    };
    let current = ResultStatus::parse(&current).unwrap_or(ResultStatus::Pending);
    if !current.can_transition_to(next) {
        return Err(HandlerErr::new(
            "invalid_transition",
            format!("cannot move a {} result back to {}", current.as_str(), next.as_str()),
        )
        .with_details(json!({ "from": current.as_str(), "to": next.as_str() })));
    }
    if current != next {
        conn.execute(
            "UPDATE results SET status = ?, updated_at = ? WHERE id = ?",
            (next.as_str(), now_rfc3339(), &result_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    Ok(json!({ "resultId": result_id, "status": next.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "results.list" => results_list,
        "results.setStatus" => results_set_status,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match handler(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
