use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebankd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebankd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Fixture {
    class_id: String,
    musa: String,
    zara: String,
    math: String,
    science: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(stdin, reader, "s2", "classes.create", json!({ "name": "SS 2B" }));
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut make_student = |id: &str, last: &str, first: &str| -> String {
        request_ok(
            stdin,
            reader,
            id,
            "students.create",
            json!({ "classId": class_id, "lastName": last, "firstName": first }),
        )
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
    };
    let musa = make_student("s3", "Garba", "Musa");
    let zara = make_student("s4", "Hassan", "Zara");

    let mut make_subject = |id: &str, name: &str| -> String {
        request_ok(
            stdin,
            reader,
            id,
            "subjects.create",
            json!({ "classId": class_id, "name": name }),
        )
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string()
    };
    let math = make_subject("s5", "Mathematics");
    let english_id = make_subject("s6", "English");
    let science = make_subject("s7", "Basic Science");

    let mut enter = |id: &str, student: &str, subject: &str, body: serde_json::Value| {
        let mut params = json!({
            "classId": class_id,
            "studentId": student,
            "subjectId": subject,
            "term": 1,
            "session": "2025/2026",
        });
        for (k, v) in body.as_object().expect("body object") {
            params[k] = v.clone();
        }
        let _ = request_ok(stdin, reader, id, "scores.enter", params);
    };

    // Musa: 85 + 85 settled, Basic Science still pending.
    enter("s8", &musa, &math, json!({ "caScore": 35, "examScore": 50 }));
    enter("s9", &musa, &english_id, json!({ "caScore": 35, "examScore": 50 }));
    enter("s10", &musa, &science, json!({ "caScore": 20 }));
    // Zara: 90 + 80 settled.
    enter("s11", &zara, &math, json!({ "caScore": 40, "examScore": 50 }));
    enter("s12", &zara, &english_id, json!({ "caScore": 30, "examScore": 50 }));

    Fixture {
        class_id,
        musa,
        zara,
        math,
        science,
    }
}

#[test]
fn report_average_skips_pending_and_attendance_gates_the_remark() {
    let workspace = temp_dir("gradebank-report");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let f = seed(&mut stdin, &mut reader, &workspace);

    // Musa attended poorly; his 85 average falls past the top two bands.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.set",
        json!({
            "classId": f.class_id,
            "studentId": f.musa,
            "term": 1,
            "session": "2025/2026",
            "percent": 80.0,
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.studentReport",
        json!({
            "classId": f.class_id,
            "studentId": f.musa,
            "term": 1,
            "session": "2025/2026",
        }),
    );
    assert_eq!(report.get("average").and_then(|v| v.as_f64()), Some(85.0));
    assert_eq!(
        report.get("attendancePercent").and_then(|v| v.as_f64()),
        Some(80.0)
    );
    assert_eq!(
        report.get("performanceRemark").and_then(|v| v.as_str()),
        Some("Good performance. There is room for improvement.")
    );

    let subjects = report
        .get("subjects")
        .and_then(|v| v.as_array())
        .expect("subjects");
    assert_eq!(subjects.len(), 3);
    assert_eq!(subjects[0].get("subject").and_then(|v| v.as_str()), Some("Mathematics"));
    assert_eq!(subjects[0].get("totalScore").and_then(|v| v.as_f64()), Some(85.0));
    assert_eq!(subjects[0].get("grade").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(subjects[0].get("gradePoints").and_then(|v| v.as_f64()), Some(5.0));
    // The pending subject shows up without a settled total or grade.
    assert_eq!(subjects[2].get("subject").and_then(|v| v.as_str()), Some("Basic Science"));
    assert!(subjects[2].get("totalScore").map(|v| v.is_null()).unwrap_or(false));
    assert!(subjects[2].get("grade").map(|v| v.is_null()).unwrap_or(false));

    // Both students total 170: tied at position 1.
    assert_eq!(report.get("position").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(report.get("classSize").and_then(|v| v.as_u64()), Some(2));

    // Zara has no attendance row; the default 95 keeps her in the top band.
    let zara_report = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.studentReport",
        json!({
            "classId": f.class_id,
            "studentId": f.zara,
            "term": 1,
            "session": "2025/2026",
        }),
    );
    assert_eq!(zara_report.get("average").and_then(|v| v.as_f64()), Some(85.0));
    assert_eq!(
        zara_report.get("attendancePercent").and_then(|v| v.as_f64()),
        Some(95.0)
    );
    assert_eq!(
        zara_report.get("performanceRemark").and_then(|v| v.as_str()),
        Some("Excellent performance. Keep up the good work!")
    );
    assert_eq!(zara_report.get("position").and_then(|v| v.as_u64()), Some(1));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn subject_stats_and_overview_roll_up_the_class() {
    let workspace = temp_dir("gradebank-overview");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let f = seed(&mut stdin, &mut reader, &workspace);

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "results.subjectStats",
        json!({
            "classId": f.class_id,
            "subjectId": f.math,
            "term": 1,
            "session": "2025/2026",
        }),
    );
    assert_eq!(stats.get("scoredCount").and_then(|v| v.as_u64()), Some(2));
    let inner = stats.get("stats").expect("stats");
    assert_eq!(inner.get("total").and_then(|v| v.as_f64()), Some(175.0));
    assert_eq!(inner.get("average").and_then(|v| v.as_f64()), Some(87.5));
    assert_eq!(inner.get("highest").and_then(|v| v.as_f64()), Some(90.0));
    assert_eq!(inner.get("lowest").and_then(|v| v.as_f64()), Some(85.0));
    assert_eq!(inner.get("grade").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(inner.get("remark").and_then(|v| v.as_str()), Some("Very Good"));

    // Basic Science has no settled totals yet.
    let pending = request(
        &mut stdin,
        &mut reader,
        "2",
        "results.subjectStats",
        json!({
            "classId": f.class_id,
            "subjectId": f.science,
            "term": 1,
            "session": "2025/2026",
        }),
    );
    assert_eq!(pending.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        pending
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("no_scores")
    );

    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.overview",
        json!({
            "classId": f.class_id,
            "term": 1,
            "session": "2025/2026",
        }),
    );
    assert_eq!(overview.get("studentCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        overview.get("scoredStudentCount").and_then(|v| v.as_u64()),
        Some(2)
    );
    // Both students total 170 for the term.
    assert_eq!(
        overview.get("overallAverage").and_then(|v| v.as_f64()),
        Some(170.0)
    );

    drop(stdin);
    let _ = child.wait();
}
