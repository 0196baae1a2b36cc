use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const CA_MAX: i64 = 40;
pub const EXAM_MAX: i64 = 60;
pub const TOTAL_MAX: i64 = 100;

pub const DEFAULT_ATTENDANCE: f64 = 95.0;

#[derive(Debug, Clone, Copy)]
struct GradeBand {
    min_score: f64,
    grade: &'static str,
    remark: &'static str,
    points: f64,
}

/// One ordered ladder for grade symbol, short remark and grade points.
/// First band whose minimum the score clears wins; NaN and anything below
/// 40 fall through to the fail band.
const GRADE_BANDS: [GradeBand; 6] = [
    GradeBand { min_score: 90.0, grade: "A+", remark: "Excellent", points: 5.0 },
    GradeBand { min_score: 80.0, grade: "A", remark: "Very Good", points: 5.0 },
    GradeBand { min_score: 70.0, grade: "B", remark: "Good", points: 4.0 },
    GradeBand { min_score: 60.0, grade: "C", remark: "Credit", points: 3.0 },
    GradeBand { min_score: 50.0, grade: "D", remark: "Pass", points: 2.0 },
    GradeBand { min_score: 40.0, grade: "E", remark: "Poor", points: 1.0 },
];

const FAIL_BAND: GradeBand = GradeBand {
    min_score: f64::NEG_INFINITY,
    grade: "F",
    remark: "Fail",
    points: 0.0,
};

fn band_for_score(score: f64) -> GradeBand {
    GRADE_BANDS
        .iter()
        .copied()
        .find(|b| score >= b.min_score)
        .unwrap_or(FAIL_BAND)
}

pub fn grade_for_score(score: f64) -> &'static str {
    band_for_score(score).grade
}

pub fn remark_for_score(score: f64) -> &'static str {
    band_for_score(score).remark
}

/// Grade points for a grade symbol. Unknown symbols score 0.0 rather than
/// erroring; callers do no validation of their own.
pub fn points_for_grade(grade: &str) -> f64 {
    GRADE_BANDS
        .iter()
        .find(|b| b.grade == grade)
        .map(|b| b.points)
        .unwrap_or(0.0)
}

/// Integer-parse a raw score the way the dashboard's form fields did:
/// leading optional-sign digits of a string count, fractional numbers are
/// truncated, anything else is not a number.
pub fn parse_score(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) => n.as_f64().map(|v| v.trunc() as i64),
        serde_json::Value::String(s) => {
            let t = s.trim();
            let (sign, digits) = match t.strip_prefix('-') {
                Some(rest) => (-1_i64, rest),
                None => (1_i64, t.strip_prefix('+').unwrap_or(t)),
            };
            let lead: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
            if lead.is_empty() {
                return None;
            }
            lead.parse::<i64>().ok().map(|v| sign * v)
        }
        _ => None,
    }
}

/// CA + exam, clamped to 100. Unparseable components count as 0. There is
/// deliberately no lower clamp: negative parseable input passes through.
pub fn total_score(ca: &serde_json::Value, exam: &serde_json::Value) -> i64 {
    let ca = parse_score(ca).unwrap_or(0);
    let exam = parse_score(exam).unwrap_or(0);
    (ca + exam).min(TOTAL_MAX)
}

/// True iff the raw value parses and lands in `[0, max_score]` inclusive.
pub fn validate_score(raw: &serde_json::Value, max_score: i64) -> bool {
    match parse_score(raw) {
        Some(v) => (0..=max_score).contains(&v),
        None => false,
    }
}

/// Mean of the settled per-subject totals, rounded to 1 decimal. Pending
/// entries (None) are skipped; no settled entries at all averages to 0.
pub fn student_average(totals: &[Option<f64>]) -> f64 {
    let settled: Vec<f64> = totals.iter().copied().flatten().collect();
    if settled.is_empty() {
        return 0.0;
    }
    round1(settled.iter().sum::<f64>() / settled.len() as f64)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub total: f64,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub grade: &'static str,
    pub remark: &'static str,
}

/// Sum/mean/max/min over one subject's recorded totals, with grade and
/// remark derived from the mean. Callers must pass a non-empty slice: an
/// empty one yields NaN and infinity artifacts, not an error.
pub fn subject_stats(scores: &[f64]) -> SubjectStats {
    let total: f64 = scores.iter().sum();
    let average = round2(total / scores.len() as f64);
    let highest = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let lowest = scores.iter().copied().fold(f64::INFINITY, f64::min);
    SubjectStats {
        total,
        average,
        highest,
        lowest,
        grade: grade_for_score(average),
        remark: remark_for_score(average),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStanding {
    pub student_id: String,
    pub display_name: String,
    pub scores: BTreeMap<String, f64>,
    pub total_score: f64,
    pub position: usize,
    pub grade: &'static str,
    pub remark: &'static str,
}

impl ClassStanding {
    pub fn new(student_id: String, display_name: String, scores: BTreeMap<String, f64>) -> Self {
        Self {
            student_id,
            display_name,
            scores,
            total_score: 0.0,
            position: 0,
            grade: "",
            remark: "",
        }
    }
}

/// Class ranking over per-subject totals.
///
/// Totals are summed from each row's scores map, rows are stable-sorted by
/// total descending (roster order breaks exact ties), and positions are
/// 1-based with one twist kept from the original dashboard: a row whose
/// total exactly equals its predecessor's copies the predecessor's position
/// instead of taking index+1, so totals [50, 50, 30] place [1, 1, 3].
///
/// Grade and remark are then recomputed from total / number-of-subjects. A
/// row with no scores at all averages NaN and lands on F/Fail; that is the
/// observed behavior and is not special-cased.
pub fn rank_class(mut rows: Vec<ClassStanding>) -> Vec<ClassStanding> {
    for row in rows.iter_mut() {
        row.total_score = row.scores.values().sum();
    }

    rows.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(Ordering::Equal)
    });

    for i in 0..rows.len() {
        let position = if i > 0 && rows[i].total_score == rows[i - 1].total_score {
            rows[i - 1].position
        } else {
            i + 1
        };
        rows[i].position = position;
    }

    for row in rows.iter_mut() {
        let average = row.total_score / row.scores.len() as f64;
        row.grade = grade_for_score(average);
        row.remark = remark_for_score(average);
    }

    rows
}

struct RemarkBand {
    min_average: f64,
    min_attendance: f64,
    sentence: &'static str,
}

const REMARK_BANDS: [RemarkBand; 5] = [
    RemarkBand {
        min_average: 80.0,
        min_attendance: 90.0,
        sentence: "Excellent performance. Keep up the good work!",
    },
    RemarkBand {
        min_average: 70.0,
        min_attendance: 85.0,
        sentence: "Very good performance. Aim higher next term.",
    },
    RemarkBand {
        min_average: 60.0,
        min_attendance: 80.0,
        sentence: "Good performance. There is room for improvement.",
    },
    RemarkBand {
        min_average: 50.0,
        min_attendance: 75.0,
        sentence: "Fair performance. More effort is required.",
    },
    RemarkBand {
        min_average: 40.0,
        min_attendance: 70.0,
        sentence: "Below average performance. Needs serious improvement.",
    },
];

const DEFAULT_REMARK: &str = "Poor performance. Parent should see the form master.";

/// Report-card sentence from average score and attendance percentage.
/// Bands are checked in order and both minima must clear; a strong average
/// with weak attendance falls through to a lower band.
pub fn performance_remark(average: f64, attendance: f64) -> &'static str {
    REMARK_BANDS
        .iter()
        .find(|b| average >= b.min_average && attendance >= b.min_attendance)
        .map(|b| b.sentence)
        .unwrap_or(DEFAULT_REMARK)
}

/// Mean of all values rounded to 2 decimals; an empty set averages to 0.
pub fn overall_average<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    round2(sum / count as f64)
}

/// JS `Math.round(x * 10) / 10` parity.
fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grade_ladder_boundaries() {
        assert_eq!(grade_for_score(100.0), "A+");
        assert_eq!(grade_for_score(90.0), "A+");
        assert_eq!(grade_for_score(89.9), "A");
        assert_eq!(grade_for_score(80.0), "A");
        assert_eq!(grade_for_score(79.9), "B");
        assert_eq!(grade_for_score(70.0), "B");
        assert_eq!(grade_for_score(60.0), "C");
        assert_eq!(grade_for_score(50.0), "D");
        assert_eq!(grade_for_score(40.0), "E");
        assert_eq!(grade_for_score(39.9), "F");
        assert_eq!(grade_for_score(0.0), "F");
        assert_eq!(grade_for_score(-5.0), "F");
        assert_eq!(grade_for_score(f64::NAN), "F");
    }

    #[test]
    fn remark_ladder_matches_grade_ladder() {
        assert_eq!(remark_for_score(95.0), "Excellent");
        assert_eq!(remark_for_score(85.0), "Very Good");
        assert_eq!(remark_for_score(70.0), "Good");
        assert_eq!(remark_for_score(65.0), "Credit");
        assert_eq!(remark_for_score(55.0), "Pass");
        assert_eq!(remark_for_score(45.0), "Poor");
        assert_eq!(remark_for_score(10.0), "Fail");
    }

    #[test]
    fn grade_points_lookup() {
        assert_eq!(points_for_grade(grade_for_score(95.0)), 5.0);
        assert_eq!(points_for_grade(grade_for_score(85.0)), 5.0);
        assert_eq!(points_for_grade(grade_for_score(45.0)), 1.0);
        assert_eq!(points_for_grade(grade_for_score(10.0)), 0.0);
        assert_eq!(points_for_grade("B"), 4.0);
        assert_eq!(points_for_grade("Z"), 0.0);
        assert_eq!(points_for_grade(""), 0.0);
    }

    #[test]
    fn parse_score_parseint_semantics() {
        assert_eq!(parse_score(&json!("35")), Some(35));
        assert_eq!(parse_score(&json!(" 35 ")), Some(35));
        assert_eq!(parse_score(&json!("35.9")), Some(35));
        assert_eq!(parse_score(&json!("12abc")), Some(12));
        assert_eq!(parse_score(&json!("-7")), Some(-7));
        assert_eq!(parse_score(&json!(40)), Some(40));
        assert_eq!(parse_score(&json!(40.7)), Some(40));
        assert_eq!(parse_score(&json!("abc")), None);
        assert_eq!(parse_score(&json!("")), None);
        assert_eq!(parse_score(&json!(null)), None);
        assert_eq!(parse_score(&json!(true)), None);
    }

    #[test]
    fn total_score_sums_and_clamps() {
        assert_eq!(total_score(&json!("35"), &json!("50")), 85);
        assert_eq!(total_score(&json!("70"), &json!("50")), 100);
        assert_eq!(total_score(&json!(40), &json!(60)), 100);
        assert_eq!(total_score(&json!("abc"), &json!("50")), 50);
        assert_eq!(total_score(&json!(null), &json!(null)), 0);
        // No lower clamp: negative parseable input passes through.
        assert_eq!(total_score(&json!("-10"), &json!("5")), -5);
    }

    #[test]
    fn validate_score_inclusive_range() {
        assert!(validate_score(&json!("40"), CA_MAX));
        assert!(validate_score(&json!("0"), CA_MAX));
        assert!(!validate_score(&json!("41"), CA_MAX));
        assert!(!validate_score(&json!("-1"), CA_MAX));
        assert!(!validate_score(&json!("abc"), CA_MAX));
        assert!(validate_score(&json!(60), EXAM_MAX));
        assert!(!validate_score(&json!(61), EXAM_MAX));
    }

    #[test]
    fn student_average_skips_pending_entries() {
        assert_eq!(student_average(&[Some(70.0), None, Some(75.0)]), 72.5);
        assert_eq!(student_average(&[Some(70.0), Some(71.0), Some(72.0)]), 71.0);
        // 64.333... rounds to one decimal.
        assert_eq!(student_average(&[Some(60.0), Some(65.0), Some(68.0)]), 64.3);
        assert_eq!(student_average(&[None, None]), 0.0);
        assert_eq!(student_average(&[]), 0.0);
    }

    #[test]
    fn subject_stats_fixed_case() {
        let stats = subject_stats(&[60.0, 70.0, 80.0]);
        assert_eq!(stats.total, 210.0);
        assert_eq!(stats.average, 70.0);
        assert_eq!(stats.highest, 80.0);
        assert_eq!(stats.lowest, 60.0);
        assert_eq!(stats.grade, "B");
        assert_eq!(stats.remark, "Good");
    }

    #[test]
    fn subject_stats_mean_rounds_to_two_decimals() {
        let stats = subject_stats(&[50.0, 51.0, 53.0]);
        assert_eq!(stats.average, 51.33);
    }

    fn standing(id: &str, pairs: &[(&str, f64)]) -> ClassStanding {
        let scores = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<BTreeMap<String, f64>>();
        ClassStanding::new(id.to_string(), id.to_string(), scores)
    }

    #[test]
    fn ranking_copies_position_on_exact_tie() {
        let rows = rank_class(vec![
            standing("a", &[("Mathematics", 30.0), ("English", 20.0)]),
            standing("b", &[("Mathematics", 25.0), ("English", 25.0)]),
            standing("c", &[("Mathematics", 10.0), ("English", 20.0)]),
        ]);
        assert_eq!(rows[0].total_score, 50.0);
        assert_eq!(rows[1].total_score, 50.0);
        assert_eq!(rows[2].total_score, 30.0);
        // Totals [50, 50, 30] place [1, 1, 3], not [1, 1, 2].
        assert_eq!(rows[0].position, 1);
        assert_eq!(rows[1].position, 1);
        assert_eq!(rows[2].position, 3);
    }

    #[test]
    fn ranking_middle_tie_keeps_index_after_run() {
        let rows = rank_class(vec![
            standing("a", &[("Mathematics", 90.0)]),
            standing("b", &[("Mathematics", 80.0)]),
            standing("c", &[("Mathematics", 80.0)]),
            standing("d", &[("Mathematics", 70.0)]),
        ]);
        let positions: Vec<usize> = rows.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 2, 4]);
    }

    #[test]
    fn ranking_ties_preserve_roster_order() {
        let rows = rank_class(vec![
            standing("first", &[("Mathematics", 50.0)]),
            standing("second", &[("Mathematics", 50.0)]),
        ]);
        assert_eq!(rows[0].student_id, "first");
        assert_eq!(rows[1].student_id, "second");
    }

    #[test]
    fn ranking_grades_from_per_subject_average() {
        let rows = rank_class(vec![standing(
            "a",
            &[("Mathematics", 80.0), ("English", 90.0)],
        )]);
        // 170 total over 2 subjects averages 85 => A, not A+.
        assert_eq!(rows[0].grade, "A");
        assert_eq!(rows[0].remark, "Very Good");
    }

    #[test]
    fn ranking_empty_scores_fall_to_fail() {
        let rows = rank_class(vec![standing("a", &[])]);
        assert_eq!(rows[0].total_score, 0.0);
        assert_eq!(rows[0].position, 1);
        // total / 0 subjects averages NaN; the ladder falls through to F.
        assert_eq!(rows[0].grade, "F");
        assert_eq!(rows[0].remark, "Fail");
    }

    #[test]
    fn performance_remark_checks_both_minima_in_order() {
        assert_eq!(
            performance_remark(85.0, 95.0),
            "Excellent performance. Keep up the good work!"
        );
        // Strong average, weak attendance: falls past the 80/90 and 70/85
        // bands to the 60/80 band.
        assert_eq!(
            performance_remark(85.0, 80.0),
            "Good performance. There is room for improvement."
        );
        assert_eq!(
            performance_remark(55.0, 75.0),
            "Fair performance. More effort is required."
        );
        assert_eq!(performance_remark(85.0, 60.0), DEFAULT_REMARK);
        assert_eq!(performance_remark(30.0, 100.0), DEFAULT_REMARK);
    }

    #[test]
    fn performance_remark_default_attendance_is_generous() {
        assert_eq!(
            performance_remark(85.0, DEFAULT_ATTENDANCE),
            "Excellent performance. Keep up the good work!"
        );
    }

    #[test]
    fn overall_average_handles_empty_mapping() {
        assert_eq!(overall_average(std::iter::empty::<f64>()), 0.0);
        assert_eq!(overall_average([10.0, 20.0]), 15.0);
        assert_eq!(overall_average([10.0, 20.0, 21.0]), 17.0);
        assert_eq!(overall_average([10.0, 11.0, 11.0]), 10.67);
    }
}
