use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: impl ToString) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    if class_exists(conn, class_id)? {
        Ok(())
    } else {
        Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: Some(json!({ "classId": class_id })),
        })
    }
}

fn next_sort_order(conn: &Connection, table: &str, class_id: &str) -> Result<i64, HandlerErr> {
    let sql = format!(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM {} WHERE class_id = ?",
        table
    );
    conn.query_row(&sql, [class_id], |r| r.get(0)).map_err(db_err)
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, admission_no, active, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let students = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lastName": last.clone(),
                "firstName": first.clone(),
                "displayName": format!("{}, {}", last, first),
                "admissionNo": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
                "sortOrder": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "students": students }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let admission_no = params
        .get("admissionNo")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    require_class(conn, &class_id)?;

    let student_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn, "students", &class_id)?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, admission_no, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
        (&student_id, &class_id, &last_name, &first_name, &admission_no, sort_order, &now),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id, "sortOrder": sort_order }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let existing: Option<(String, String, Option<String>, i64)> = conn
        .query_row(
            "SELECT last_name, first_name, admission_no, active FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((last, first, admission, active)) = existing else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    };

    let last_name = params
        .get("lastName")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(last);
    let first_name = params
        .get("firstName")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(first);
    let admission_no = match params.get("admissionNo") {
        None => admission,
        Some(v) if v.is_null() => None,
        Some(v) => v.as_str().map(|s| s.to_string()),
    };
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .map(|b| b as i64)
        .unwrap_or(active);

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE students
         SET last_name = ?, first_name = ?, admission_no = ?, active = ?, updated_at = ?
         WHERE id = ?",
        (&last_name, &first_name, &admission_no, active, &now, &student_id),
    )
    .map_err(db_err)?;

    Ok(json!({ "studentId": student_id }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let score_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM score_entries WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    if score_count > 0 {
        return Err(HandlerErr {
            code: "has_scores",
            message: "student has recorded scores; mark inactive instead".to_string(),
            details: Some(json!({ "scoreCount": score_count })),
        });
    }

    conn.execute(
        "DELETE FROM attendance_summary WHERE student_id = ?",
        [&student_id],
    )
    .map_err(db_err)?;
    let deleted = conn
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(db_err)?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }

    Ok(json!({ "deleted": true }))
}

fn subjects_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, sort_order
             FROM subjects
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let subjects = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "sortOrder": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?;
    let name = name.trim();
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name must not be blank".to_string(),
            details: None,
        });
    }
    require_class(conn, &class_id)?;

    let subject_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn, "subjects", &class_id)?;
    conn.execute(
        "INSERT INTO subjects(id, class_id, name, sort_order) VALUES(?, ?, ?, ?)",
        (&subject_id, &class_id, name, sort_order),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "subjects" })),
    })?;

    Ok(json!({ "subjectId": subject_id, "sortOrder": sort_order }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "students.list"
            | "students.create"
            | "students.update"
            | "students.delete"
            | "subjects.list"
            | "subjects.create"
    );
    if !handled {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let outcome = match req.method.as_str() {
        "students.list" => students_list(conn, &req.params),
        "students.create" => students_create(conn, &req.params),
        "students.update" => students_update(conn, &req.params),
        "students.delete" => students_delete(conn, &req.params),
        "subjects.list" => subjects_list(conn, &req.params),
        "subjects.create" => subjects_create(conn, &req.params),
        _ => unreachable!(),
    };

    Some(match outcome {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
