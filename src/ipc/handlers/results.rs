use crate::grading::{self, ClassStanding};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

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

#[derive(Debug, Clone)]
struct RosterRow {
    id: String,
    display_name: String,
}

fn active_roster(conn: &Connection, class_id: &str) -> Result<Vec<RosterRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name
             FROM students
             WHERE class_id = ? AND active = 1
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    stmt.query_map([class_id], |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        Ok(RosterRow {
            id: r.get(0)?,
            display_name: format!("{}, {}", last, first),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

/// Settled totals for the whole class, keyed by student and subject name.
fn settled_totals(
    conn: &Connection,
    class_id: &str,
    term: i64,
    session: &str,
) -> Result<HashMap<String, BTreeMap<String, f64>>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT e.student_id, sub.name, e.total_score
             FROM score_entries e
             JOIN subjects sub ON sub.id = e.subject_id
             WHERE e.class_id = ? AND e.term = ? AND e.session = ?
               AND e.total_score IS NOT NULL",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map((class_id, term, session), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut by_student: HashMap<String, BTreeMap<String, f64>> = HashMap::new();
    for (student_id, subject_name, total) in rows {
        by_student
            .entry(student_id)
            .or_default()
            .insert(subject_name, total);
    }
    Ok(by_student)
}

fn load_standings(
    conn: &Connection,
    class_id: &str,
    term: i64,
    session: &str,
) -> Result<Vec<ClassStanding>, HandlerErr> {
    let roster = active_roster(conn, class_id)?;
    let mut totals = settled_totals(conn, class_id, term, session)?;
    Ok(roster
        .into_iter()
        .map(|s| {
            let scores = totals.remove(&s.id).unwrap_or_default();
            ClassStanding::new(s.id, s.display_name, scores)
        })
        .collect())
}

fn subject_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let term = get_required_term(params)?;
    let session = get_required_str(params, "session")?;

    let subject_name: Option<String> = conn
        .query_row(
            "SELECT name FROM subjects WHERE id = ? AND class_id = ?",
            (&subject_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(subject_name) = subject_name else {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found in class".to_string(),
            details: Some(json!({ "subjectId": subject_id })),
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT e.total_score
             FROM score_entries e
             JOIN students s ON s.id = e.student_id
             WHERE e.subject_id = ? AND e.term = ? AND e.session = ?
               AND e.total_score IS NOT NULL AND s.active = 1
             ORDER BY s.sort_order",
        )
        .map_err(db_err)?;
    let scores: Vec<f64> = stmt
        .query_map((&subject_id, term, &session), |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    // The engine's stats have a non-empty precondition; guard it here so the
    // NaN artifacts never reach the wire.
    if scores.is_empty() {
        return Err(HandlerErr {
            code: "no_scores",
            message: "no settled scores for subject".to_string(),
            details: Some(json!({ "subjectId": subject_id })),
        });
    }

    let stats = grading::subject_stats(&scores);
    Ok(json!({
        "subject": { "id": subject_id, "name": subject_name },
        "scoredCount": scores.len(),
        "stats": stats,
    }))
}

fn class_ranking(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let term = get_required_term(params)?;
    let session = get_required_str(params, "session")?;

    let standings = grading::rank_class(load_standings(conn, &class_id, term, &session)?);
    Ok(json!({
        "term": term,
        "session": session,
        "rows": standings,
    }))
}

fn student_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let term = get_required_term(params)?;
    let session = get_required_str(params, "session")?;

    let display_name: Option<String> = conn
        .query_row(
            "SELECT last_name || ', ' || first_name
             FROM students WHERE id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(display_name) = display_name else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found in class".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    };

    // One line per subject on the class roster; unsettled entries stay
    // pending and are skipped by the average.
    let mut stmt = conn
        .prepare(
            "SELECT sub.name, e.ca_score, e.exam_score, e.total_score
             FROM subjects sub
             LEFT JOIN score_entries e
               ON e.subject_id = sub.id
              AND e.student_id = ?
              AND e.term = ?
              AND e.session = ?
             WHERE sub.class_id = ?
             ORDER BY sub.sort_order",
        )
        .map_err(db_err)?;
    let lines: Vec<(String, Option<f64>, Option<f64>, Option<f64>)> = stmt
        .query_map((&student_id, term, &session, &class_id), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let totals: Vec<Option<f64>> = lines.iter().map(|(_, _, _, t)| *t).collect();
    let average = grading::student_average(&totals);

    let subjects: Vec<serde_json::Value> = lines
        .into_iter()
        .map(|(name, ca, exam, total)| {
            json!({
                "subject": name,
                "caScore": ca,
                "examScore": exam,
                "totalScore": total,
                "grade": total.map(grading::grade_for_score),
                "remark": total.map(grading::remark_for_score),
                "gradePoints": total.map(|t| grading::points_for_grade(grading::grade_for_score(t))),
            })
        })
        .collect();

    let attendance: f64 = conn
        .query_row(
            "SELECT percent FROM attendance_summary
             WHERE class_id = ? AND student_id = ? AND term = ? AND session = ?",
            (&class_id, &student_id, term, &session),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?
        .unwrap_or(grading::DEFAULT_ATTENDANCE);

    let standings = grading::rank_class(load_standings(conn, &class_id, term, &session)?);
    let class_size = standings.len();
    let standing = standings.iter().find(|s| s.student_id == student_id);

    Ok(json!({
        "studentId": student_id,
        "displayName": display_name,
        "term": term,
        "session": session,
        "subjects": subjects,
        "average": average,
        "attendancePercent": attendance,
        "performanceRemark": grading::performance_remark(average, attendance),
        "position": standing.map(|s| s.position),
        "totalScore": standing.map(|s| s.total_score),
        "classSize": class_size,
    }))
}

fn overview(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let term = get_required_term(params)?;
    let session = get_required_str(params, "session")?;

    let roster = active_roster(conn, &class_id)?;
    let totals = settled_totals(conn, &class_id, term, &session)?;

    // Overall average over per-student term totals; an empty class averages 0.
    let per_student: Vec<f64> = roster
        .iter()
        .map(|s| {
            totals
                .get(&s.id)
                .map(|m| m.values().sum::<f64>())
                .unwrap_or(0.0)
        })
        .collect();
    let scored_students = roster
        .iter()
        .filter(|s| totals.contains_key(&s.id))
        .count();

    Ok(json!({
        "term": term,
        "session": session,
        "studentCount": roster.len(),
        "scoredStudentCount": scored_students,
        "overallAverage": grading::overall_average(per_student),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "results.subjectStats"
            | "results.classRanking"
            | "results.studentReport"
            | "results.overview"
    );
    if !handled {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let outcome = match req.method.as_str() {
        "results.subjectStats" => subject_stats(conn, &req.params),
        "results.classRanking" => class_ranking(conn, &req.params),
        "results.studentReport" => student_report(conn, &req.params),
        "results.overview" => overview(conn, &req.params),
        _ => unreachable!(),
    };

    Some(match outcome {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
