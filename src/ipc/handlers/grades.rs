//! Score entry for grade rows. Quarters and finals live on a 0-100 scale;
//! the stored final follows the autoComputeFinal setting.

use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};

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

#[derive(Debug, Clone, Copy, PartialEq)]
struct GradeRow {
    q1: Option<f64>,
    q2: Option<f64>,
    q3: Option<f64>,
    q4: Option<f64>,
    final_score: Option<f64>,
}

fn fetch_grade(conn: &Connection, grade_id: &str) -> Result<GradeRow, HandlerErr> {
    let row: Option<GradeRow> = conn
        .query_row(
            "SELECT q1, q2, q3, q4, final FROM grades WHERE id = ?",
            [grade_id],
            |r| {
                Ok(GradeRow {
                    q1: r.get(0)?,
                    q2: r.get(1)?,
                    q3: r.get(2)?,
                    q4: r.get(3)?,
                    final_score: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    row.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "grade not found".to_string(),
        details: Some(json!({ "gradeId": grade_id })),
    })
}

/// Distinguishes "key absent" (keep stored value) from "key: null" (clear).
/// A present value must be a number within [0, 100].
fn parse_score_field(
    scores: &Map<String, Value>,
    key: &str,
) -> Result<Option<Option<f64>>, HandlerErr> {
    let Some(raw) = scores.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(Some(None));
    }
    let Some(v) = raw.as_f64() else {
        return Err(HandlerErr {
            code: "validation_failed",
            message: format!("{} must be null or a number", key),
            details: Some(json!({ "field": key, "value": raw.clone() })),
        });
    };
    if !grading::score_in_range(v) {
        return Err(HandlerErr {
            code: "validation_failed",
            message: format!("{} must be within [0, 100]", key),
            details: Some(json!({ "field": key, "value": v })),
        });
    }
    Ok(Some(Some(v)))
}

fn handle_grades_update_scores(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let grade_id = match req.params.get("gradeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeId", None),
    };
    let Some(scores) = req.params.get("scores").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing scores object", None);
    };

    let mut row = match fetch_grade(conn, &grade_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Validate the whole edit before writing anything.
    let q_edits = [
        parse_score_field(scores, "q1"),
        parse_score_field(scores, "q2"),
        parse_score_field(scores, "q3"),
        parse_score_field(scores, "q4"),
    ];
    let mut quarters = [row.q1, row.q2, row.q3, row.q4];
    for (i, edit) in q_edits.into_iter().enumerate() {
        match edit {
            Ok(Some(v)) => quarters[i] = v,
            Ok(None) => {}
            Err(e) => return e.response(&req.id),
        }
    }
    let final_edit = match parse_score_field(scores, "final") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    row.q1 = quarters[0];
    row.q2 = quarters[1];
    row.q3 = quarters[2];
    row.q4 = quarters[3];

    // The autoComputeFinal setting owns the stored final; a caller-provided
    // final only lands when the setting is off.
    row.final_score = if setup::auto_compute_final(conn) {
        grading::compute_final(quarters)
    } else {
        match final_edit {
            Some(v) => v,
            None => row.final_score,
        }
    };

    let updated_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE grades SET q1 = ?, q2 = ?, q3 = ?, q4 = ?, final = ?, updated_at = ?
         WHERE id = ?",
        (
            row.q1,
            row.q2,
            row.q3,
            row.q4,
            row.final_score,
            &updated_at,
            &grade_id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "gradeId": grade_id,
            "q1": row.q1,
            "q2": row.q2,
            "q3": row.q3,
            "q4": row.q4,
            "final": row.final_score,
            "updatedAt": updated_at
        }),
    )
}

fn grade_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let enrollment_id: String = row.get(1)?;
    let offering_id: String = row.get(2)?;
    let subject_code: String = row.get(3)?;
    let subject_name: String = row.get(4)?;
    let q1: Option<f64> = row.get(5)?;
    let q2: Option<f64> = row.get(6)?;
    let q3: Option<f64> = row.get(7)?;
    let q4: Option<f64> = row.get(8)?;
    let final_score: Option<f64> = row.get(9)?;
    Ok(json!({
        "id": id,
        "enrollmentId": enrollment_id,
        "offeringId": offering_id,
        "subjectCode": subject_code,
        "subjectName": subject_name,
        "q1": q1,
        "q2": q2,
        "q3": q3,
        "q4": q4,
        "final": final_score
    }))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "grades": [] }));
    };

    let enrollment_id = req.params.get("enrollmentId").and_then(|v| v.as_str());
    let class_group_id = req.params.get("classGroupId").and_then(|v| v.as_str());

    let (sql, key) = match (enrollment_id, class_group_id) {
        (Some(eid), _) => (
            "SELECT g.id, g.enrollment_id, g.subject_offering_id, sub.code, sub.name,
                    g.q1, g.q2, g.q3, g.q4, g.final
             FROM grades g
             JOIN subject_offerings so ON so.id = g.subject_offering_id
             JOIN subjects sub ON sub.id = so.subject_id
             WHERE g.enrollment_id = ?
             ORDER BY sub.code",
            eid.to_string(),
        ),
        (None, Some(cgid)) => (
            "SELECT g.id, g.enrollment_id, g.subject_offering_id, sub.code, sub.name,
                    g.q1, g.q2, g.q3, g.q4, g.final
             FROM grades g
             JOIN subject_offerings so ON so.id = g.subject_offering_id
             JOIN subjects sub ON sub.id = so.subject_id
             JOIN enrollments e ON e.id = g.enrollment_id
             WHERE e.class_group_id = ?
             ORDER BY g.enrollment_id, sub.code",
            cgid.to_string(),
        ),
        (None, None) => {
            return err(
                &req.id,
                "bad_params",
                "missing enrollmentId or classGroupId",
                None,
            )
        }
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&key], grade_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.updateScores" => Some(handle_grades_update_scores(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        _ => None,
    }
}
