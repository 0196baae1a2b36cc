use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn get_required_term(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    params
        .get("term")
        .and_then(|v| v.as_i64())
        .filter(|t| (1..=3).contains(t))
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "term must be 1, 2 or 3".to_string(),
            details: None,
        })
}

fn attendance_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let term = get_required_term(params)?;
    let session = get_required_str(params, "session")?;
    let percent = params
        .get("percent")
        .and_then(|v| v.as_f64())
        .filter(|p| (0.0..=100.0).contains(p))
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "percent must be between 0 and 100".to_string(),
            details: None,
        })?;

    let in_class: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if in_class.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found in class".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }

    conn.execute(
        "INSERT INTO attendance_summary(class_id, student_id, term, session, percent)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_id, student_id, term, session) DO UPDATE SET
           percent = excluded.percent",
        (&class_id, &student_id, term, &session, percent),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_summary" })),
    })?;

    Ok(json!({ "percent": percent }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let term = get_required_term(params)?;
    let session = get_required_str(params, "session")?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, a.percent
             FROM students s
             LEFT JOIN attendance_summary a
               ON a.student_id = s.id
              AND a.class_id = s.class_id
              AND a.term = ?
              AND a.session = ?
             WHERE s.class_id = ?
             ORDER BY s.sort_order",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map((term, &session, &class_id), |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "percent": r.get::<_, Option<f64>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(req.method.as_str(), "attendance.set" | "attendance.list");
    if !handled {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let outcome = match req.method.as_str() {
        "attendance.set" => attendance_set(conn, &req.params),
        "attendance.list" => attendance_list(conn, &req.params),
        _ => unreachable!(),
    };

    Some(match outcome {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
