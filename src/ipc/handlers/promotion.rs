//! Graduation eligibility over each student's latest enrollment, and the
//! admin action that flags a student as graduated.

use crate::grading::{self, Standing};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, Utc};
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

struct LatestEnrollment {
    enrollment_id: String,
    school_year: String,
    section: String,
    grade_level: String,
    level_sort_order: i64,
}

/// Latest enrollment: highest school year wins; within one school year the
/// most recent enrollment timestamp wins, then insertion order.
fn latest_enrollment(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<LatestEnrollment>, HandlerErr> {
    conn.query_row(
        "SELECT e.id, sy.name, s.name, gl.name, gl.sort_order
         FROM enrollments e
         JOIN class_groups cg ON cg.id = e.class_group_id
         JOIN school_years sy ON sy.id = cg.school_year_id
         JOIN sections s ON s.id = cg.section_id
         JOIN grade_levels gl ON gl.id = s.grade_level_id
         WHERE e.student_id = ?
         ORDER BY sy.start_year DESC, e.enrolled_at DESC, e.rowid DESC
         LIMIT 1",
        [student_id],
        |r| {
            Ok(LatestEnrollment {
                enrollment_id: r.get(0)?,
                school_year: r.get(1)?,
                section: r.get(2)?,
                grade_level: r.get(3)?,
                level_sort_order: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn enrollment_finals(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<Vec<Option<f64>>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT final FROM grades WHERE enrollment_id = ? ORDER BY rowid")
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    stmt.query_map([enrollment_id], |r| r.get::<_, Option<f64>>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })
}

struct CandidateStudent {
    id: String,
    last_name: String,
    first_name: String,
    student_no: Option<String>,
}

fn candidate_students(
    conn: &Connection,
    req: &Request,
) -> Result<Vec<CandidateStudent>, HandlerErr> {
    let from_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<CandidateStudent> {
        Ok(CandidateStudent {
            id: r.get(0)?,
            last_name: r.get(1)?,
            first_name: r.get(2)?,
            student_no: r.get(3)?,
        })
    };

    if let Some(ids) = req.params.get("studentIds").and_then(|v| v.as_array()) {
        let mut out = Vec::with_capacity(ids.len());
        for raw in ids {
            let Some(id) = raw.as_str() else {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: "studentIds must be an array of strings".to_string(),
                    details: None,
                });
            };
            let found = conn
                .query_row(
                    "SELECT id, last_name, first_name, student_no FROM students WHERE id = ?",
                    [id],
                    from_row,
                )
                .optional()
                .map_err(|e| HandlerErr {
                    code: "db_query_failed",
                    message: e.to_string(),
                    details: None,
                })?;
            match found {
                Some(s) => out.push(s),
                None => {
                    return Err(HandlerErr {
                        code: "not_found",
                        message: "student not found".to_string(),
                        details: Some(json!({ "studentId": id })),
                    })
                }
            }
        }
        return Ok(out);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, student_no FROM students
             WHERE graduated = 0 ORDER BY last_name, first_name",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    stmt.query_map([], from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })
}

fn handle_find_eligible(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // The terminal grade level is the highest-ordered one.
    let terminal_sort_order: Option<i64> = match conn
        .query_row("SELECT MAX(sort_order) FROM grade_levels", [], |r| r.get(0))
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(terminal_sort_order) = terminal_sort_order else {
        return err(&req.id, "not_found", "no grade levels defined", None);
    };

    let students = match candidate_students(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let passing = setup::passing_final(conn);
    let year_graduated = Utc::now().year();

    let mut eligible: Vec<serde_json::Value> = Vec::new();
    let mut not_eligible: Vec<serde_json::Value> = Vec::new();

    for student in students {
        let latest = match latest_enrollment(conn, &student.id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };

        let projection = |extra_reason: Option<&str>, latest: Option<&LatestEnrollment>| {
            let mut row = json!({
                "studentId": student.id.clone(),
                "lastName": student.last_name.clone(),
                "firstName": student.first_name.clone(),
                "studentNo": student.student_no.clone(),
                "schoolYear": latest.map(|l| l.school_year.clone()),
                "section": latest.map(|l| l.section.clone()),
                "gradeLevel": latest.map(|l| l.grade_level.clone()),
                "yearGraduated": year_graduated
            });
            if let Some(reason) = extra_reason {
                row["reason"] = json!(reason);
            }
            row
        };

        let Some(latest) = latest else {
            not_eligible.push(projection(Some("no_enrollment"), None));
            continue;
        };
        if latest.level_sort_order != terminal_sort_order {
            not_eligible.push(projection(Some("not_terminal_level"), Some(&latest)));
            continue;
        }

        let finals = match enrollment_finals(conn, &latest.enrollment_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        match grading::graduation_standing(&finals, passing) {
            Standing::Eligible => eligible.push(projection(None, Some(&latest))),
            standing => {
                not_eligible.push(projection(standing.reason_code(), Some(&latest)));
            }
        }
    }

    ok(
        &req.id,
        json!({
            "passingFinal": passing,
            "eligible": eligible,
            "notEligible": not_eligible
        }),
    )
}

fn handle_mark_graduated(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(graduated) = req.params.get("graduated").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing graduated flag", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE students SET graduated = ? WHERE id = ?",
        (graduated as i64, &student_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // First-or-create: re-flagging never duplicates an alumni row. Clearing
    // the flag leaves any existing alumni row untouched (observed behavior).
    let mut alumni_created = false;
    if graduated {
        let alumni_id = Uuid::new_v4().to_string();
        let year = Utc::now().year();
        match tx.execute(
            "INSERT INTO alumni(id, student_id, year_graduated, company, job_title)
             VALUES(?, ?, ?, NULL, NULL)
             ON CONFLICT(student_id) DO NOTHING",
            (&alumni_id, &student_id, year),
        ) {
            Ok(n) => alumni_created = n > 0,
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "alumni" })),
                );
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "graduated": graduated,
            "alumniCreated": alumni_created
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotion.findEligible" => Some(handle_find_eligible(state, req)),
        "promotion.markGraduated" => Some(handle_mark_graduated(state, req)),
        _ => None,
    }
}
