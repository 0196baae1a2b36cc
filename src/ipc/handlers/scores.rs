use crate::grading;
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

fn require_student_in_class(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (student_id, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found in class".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }
    Ok(())
}

fn require_subject_in_class(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> Result<String, HandlerErr> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM subjects WHERE id = ? AND class_id = ?",
            (subject_id, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    name.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "subject not found in class".to_string(),
        details: Some(json!({ "subjectId": subject_id })),
    })
}

/// A component is "given" when the key is present and non-null. Given
/// components must parse and land within their scale; blank entries stay
/// pending (NULL) and keep the total pending too.
fn resolve_component(
    params: &serde_json::Value,
    key: &str,
    max_score: i64,
) -> Result<Option<i64>, HandlerErr> {
    let Some(raw) = params.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    if !grading::validate_score(raw, max_score) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("{} must be an integer between 0 and {}", key, max_score),
            details: Some(json!({ "field": key, "value": raw.clone() })),
        });
    }
    Ok(grading::parse_score(raw))
}

fn scores_enter(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let term = get_required_term(params)?;
    let session = get_required_str(params, "session")?;
    require_student_in_class(conn, &class_id, &student_id)?;
    require_subject_in_class(conn, &class_id, &subject_id)?;

    let existing: Option<(Option<f64>, Option<f64>)> = conn
        .query_row(
            "SELECT ca_score, exam_score FROM score_entries
             WHERE student_id = ? AND subject_id = ? AND term = ? AND session = ?",
            (&student_id, &subject_id, term, &session),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let (prev_ca, prev_exam) = existing.unwrap_or((None, None));

    let ca = match resolve_component(params, "caScore", grading::CA_MAX)? {
        Some(v) => Some(v as f64),
        None if params.get("caScore").map(|v| v.is_null()).unwrap_or(false) => None,
        None => prev_ca,
    };
    let exam = match resolve_component(params, "examScore", grading::EXAM_MAX)? {
        Some(v) => Some(v as f64),
        None if params.get("examScore").map(|v| v.is_null()).unwrap_or(false) => None,
        None => prev_exam,
    };

    // Total settles only once both components are in.
    let total = match (ca, exam) {
        (Some(c), Some(e)) => Some(grading::total_score(&json!(c), &json!(e)) as f64),
        _ => None,
    };

    let entry_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO score_entries(id, class_id, student_id, subject_id, term, session,
                                   ca_score, exam_score, total_score, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, term, session) DO UPDATE SET
           ca_score = excluded.ca_score,
           exam_score = excluded.exam_score,
           total_score = excluded.total_score,
           updated_at = excluded.updated_at",
        (
            &entry_id, &class_id, &student_id, &subject_id, term, &session, ca, exam, total, &now,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "score_entries" })),
    })?;

    Ok(json!({
        "caScore": ca,
        "examScore": exam,
        "totalScore": total,
        "grade": total.map(grading::grade_for_score),
        "remark": total.map(grading::remark_for_score),
    }))
}

fn scores_grid(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let term = get_required_term(params)?;
    let session = get_required_str(params, "session")?;
    let subject_name = require_subject_in_class(conn, &class_id, &subject_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, s.active,
                    e.ca_score, e.exam_score, e.total_score
             FROM students s
             LEFT JOIN score_entries e
               ON e.student_id = s.id
              AND e.subject_id = ?
              AND e.term = ?
              AND e.session = ?
             WHERE s.class_id = ?
             ORDER BY s.sort_order",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map((&subject_id, term, &session, &class_id), |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let total: Option<f64> = r.get(6)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "active": r.get::<_, i64>(3)? != 0,
                "caScore": r.get::<_, Option<f64>>(4)?,
                "examScore": r.get::<_, Option<f64>>(5)?,
                "totalScore": total,
                "grade": total.map(grading::grade_for_score),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({
        "subject": { "id": subject_id, "name": subject_name },
        "term": term,
        "session": session,
        "rows": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(req.method.as_str(), "scores.enter" | "scores.grid");
    if !handled {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let outcome = match req.method.as_str() {
        "scores.enter" => scores_enter(conn, &req.params),
        "scores.grid" => scores_grid(conn, &req.params),
        _ => unreachable!(),
    };

    Some(match outcome {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
