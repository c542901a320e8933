use crate::catalog::{self, SchoolDefaults};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_insert_failed, db_query_failed, get_grade, get_optional_f64, get_optional_str,
    get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::provisioning;
use crate::reconcile::normalize::{name_key, split_full_name};
use crate::settings::ResultsSettings;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_query_failed)
}

fn require_parent(conn: &Connection, table: &str, key: &str, id: &str) -> Result<(), HandlerErr> {
    if exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::new("not_found", format!("{} not found", key))
            .with_details(json!({ "field": key, "id": id })))
    }
}

fn collect(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Value>,
) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(db_query_failed)?;
    let rows = stmt
        .query_map(params, map)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_failed)?;
    Ok(rows)
}

fn regions_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let regions = collect(
        conn,
        "SELECT r.id, r.name,
           (SELECT COUNT(*) FROM clusters c WHERE c.region_id = r.id)
         FROM regions r
         ORDER BY r.name COLLATE NOCASE",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "clusterCount": r.get::<_, i64>(2)?
            }))
        },
    )?;
    Ok(json!({ "regions": regions }))
}

fn regions_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let id = catalog::insert_region(conn, &name)
        .map_err(|e| db_insert_failed(e).with_details(json!({ "table": "regions" })))?;
    Ok(json!({ "regionId": id, "name": name }))
}

fn clusters_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let region_id = get_optional_str(params, "regionId");
    let clusters = collect(
        conn,
        "SELECT c.id, c.region_id, c.name,
           (SELECT COUNT(*) FROM schools s WHERE s.cluster_id = c.id)
         FROM clusters c
         WHERE (?1 IS NULL OR c.region_id = ?1)
         ORDER BY c.name COLLATE NOCASE",
        [region_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "regionId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "schoolCount": r.get::<_, i64>(3)?
            }))
        },
    )?;
    Ok(json!({ "clusters": clusters }))
}

fn clusters_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let region_id = get_required_str(params, "regionId")?;
    let name = get_required_str(params, "name")?;
    require_parent(conn, "regions", "regionId", &region_id)?;
    let id = catalog::insert_cluster(conn, &region_id, &name)
        .map_err(|e| db_insert_failed(e).with_details(json!({ "table": "clusters" })))?;
    Ok(json!({ "clusterId": id, "regionId": region_id, "name": name }))
}

fn schools_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let cluster_id = get_optional_str(params, "clusterId");
    let schools = collect(
        conn,
        "SELECT s.id, s.cluster_id, s.code, s.name, s.address, s.phone, s.email,
           EXISTS(SELECT 1 FROM school_logins l WHERE l.school_id = s.id),
           (SELECT COUNT(*) FROM students st WHERE st.school_id = s.id)
         FROM schools s
         WHERE (?1 IS NULL OR s.cluster_id = ?1)
         ORDER BY s.name COLLATE NOCASE",
        [cluster_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "clusterId": r.get::<_, String>(1)?,
                "code": r.get::<_, Option<String>>(2)?,
                "name": r.get::<_, String>(3)?,
                "address": r.get::<_, String>(4)?,
                "phone": r.get::<_, String>(5)?,
                "email": r.get::<_, String>(6)?,
                "hasLogin": r.get::<_, bool>(7)?,
                "studentCount": r.get::<_, i64>(8)?
            }))
        },
    )?;
    Ok(json!({ "schools": schools }))
}

fn schools_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let cluster_id = get_required_str(params, "clusterId")?;
    let name = get_required_str(params, "name")?;
    let code = get_optional_str(params, "code");
    require_parent(conn, "clusters", "clusterId", &cluster_id)?;
    let contact = SchoolDefaults {
        address: get_optional_str(params, "address").unwrap_or_default(),
        phone: get_optional_str(params, "phone").unwrap_or_default(),
        email: get_optional_str(params, "email").unwrap_or_default(),
    };
    let id = catalog::insert_school(conn, &cluster_id, &name, code.as_deref(), &contact)
        .map_err(|e| db_insert_failed(e).with_details(json!({ "table": "schools" })))?;
    Ok(json!({ "schoolId": id, "clusterId": cluster_id, "name": name, "code": code }))
}

fn schools_verify_login(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    let school_id = provisioning::check_login(conn, &username, &password).map_err(db_query_failed)?;
    Ok(json!({ "valid": school_id.is_some(), "schoolId": school_id }))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let school_id = get_optional_str(params, "schoolId");
    let grade = match params.get("grade") {
        None | Some(Value::Null) => None,
        Some(_) => Some(get_grade(params)?),
    };
    let students = collect(
        conn,
        "SELECT id, school_id, first_name, last_name, grade, index_number
         FROM students
         WHERE (?1 IS NULL OR school_id = ?1) AND (?2 IS NULL OR grade = ?2)
         ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE",
        rusqlite::params![school_id, grade],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "schoolId": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "lastName": r.get::<_, String>(3)?,
                "grade": r.get::<_, i64>(4)?,
                "indexNumber": r.get::<_, Option<String>>(5)?
            }))
        },
    )?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let grade = get_grade(params)?;
    let (first_name, last_name) = match get_optional_str(params, "firstName") {
        Some(first) => (first, get_optional_str(params, "lastName").unwrap_or_default()),
        None => split_full_name(&get_required_str(params, "name")?),
    };
    let index_number = get_optional_str(params, "indexNumber");
    require_parent(conn, "schools", "schoolId", &school_id)?;
    let id = catalog::insert_student(
        conn,
        &school_id,
        &first_name,
        &last_name,
        grade,
        index_number.as_deref(),
    )
    .map_err(|e| db_insert_failed(e).with_details(json!({ "table": "students" })))?;
    Ok(json!({
        "studentId": id,
        "schoolId": school_id,
        "firstName": first_name,
        "lastName": last_name,
        "grade": grade
    }))
}

fn subjects_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let grade = match params.get("grade") {
        None | Some(Value::Null) => None,
        Some(_) => Some(get_grade(params)?),
    };
    let subjects = collect(
        conn,
        "SELECT id, name, arabic_name, grade, max_score, pass_score
         FROM subjects
         WHERE (?1 IS NULL OR grade = ?1)
         ORDER BY grade, name COLLATE NOCASE",
        [grade],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "arabicName": r.get::<_, String>(2)?,
                "grade": r.get::<_, i64>(3)?,
                "maxScore": r.get::<_, f64>(4)?,
                "passScore": r.get::<_, f64>(5)?
            }))
        },
    )?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let arabic_name = get_optional_str(params, "arabicName").unwrap_or_default();
    let grade = get_grade(params)?;
    let defaults = ResultsSettings::load(conn).map_err(db_query_failed)?;
    let max_score = get_optional_f64(params, "maxScore")?.unwrap_or(defaults.default_max_score);
    let pass_score =
        get_optional_f64(params, "passScore")?.unwrap_or(defaults.default_pass_score);
    if max_score <= 0.0 {
        return Err(HandlerErr::bad_params("maxScore must be positive"));
    }
    if pass_score < 0.0 || pass_score > max_score {
        return Err(HandlerErr::bad_params("passScore must be in 0..=maxScore"));
    }

    // Subject columns are matched by normalized name, so near-duplicates
    // within a grade would make headers ambiguous.
    let key = name_key(&name);
    let clash = collect(
        conn,
        "SELECT name FROM subjects WHERE grade = ?",
        [grade],
        |r| Ok(Value::String(r.get::<_, String>(0)?)),
    )?
    .into_iter()
    .any(|v| v.as_str().map(name_key).as_deref() == Some(key.as_str()));
    if clash {
        return Err(HandlerErr::new(
            "db_insert_failed",
            format!("subject {} already exists for grade {}", name, grade),
        )
        .with_details(json!({ "table": "subjects" })));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, arabic_name, grade, max_score, pass_score)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &name, &arabic_name, grade, max_score, pass_score),
    )
    .map_err(|e| db_insert_failed(e).with_details(json!({ "table": "subjects" })))?;
    Ok(json!({
        "subjectId": id,
        "name": name,
        "grade": grade,
        "maxScore": max_score,
        "passScore": pass_score
    }))
}

fn exam_years_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let years = collect(
        conn,
        "SELECT id, label, is_active FROM exam_years ORDER BY label DESC",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
                "isActive": r.get::<_, bool>(2)?
            }))
        },
    )?;
    Ok(json!({ "examYears": years }))
}

fn exam_years_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let label = get_required_str(params, "label")?;
    let is_active = match params.get("isActive") {
        None | Some(Value::Null) => false,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("isActive must be boolean"))?,
    };
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(db_insert_failed)?;
    if is_active {
        // One active exam year at a time.
        tx.execute("UPDATE exam_years SET is_active = 0", [])
            .map_err(db_insert_failed)?;
    }
    tx.execute(
        "INSERT INTO exam_years(id, label, is_active) VALUES(?, ?, ?)",
        (&id, &label, is_active),
    )
    .map_err(|e| db_insert_failed(e).with_details(json!({ "table": "exam_years" })))?;
    tx.commit().map_err(db_insert_failed)?;
    Ok(json!({ "examYearId": id, "label": label, "isActive": is_active }))
}

type Handler = fn(&Connection, &Value) -> Result<Value, HandlerErr>;

fn route(method: &str) -> Option<Handler> {
    let handler: Handler = match method {
        "regions.list" => regions_list,
        "regions.create" => regions_create,
        "clusters.list" => clusters_list,
        "clusters.create" => clusters_create,
        "schools.list" => schools_list,
        "schools.create" => schools_create,
        "schools.verifyLogin" => schools_verify_login,
        "students.list" => students_list,
        "students.create" => students_create,
        "subjects.list" => subjects_list,
        "subjects.create" => subjects_create,
        "examYears.list" => exam_years_list,
        "examYears.create" => exam_years_create,
        _ => return None,
    };
    Some(handler)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler = route(req.method.as_str())?;
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match handler(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
