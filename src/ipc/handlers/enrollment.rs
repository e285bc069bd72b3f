//! Enrollment creation and its grade-row fan-out. Every enrollment must end
//! up with exactly one grade row per subject offering in its class group;
//! the parent insert and the fan-out share one transaction.

use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::roster::row_exists;
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let class_group_id = match req.params.get("classGroupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classGroupId", None),
    };
    let status = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("new")
        .to_string();
    if !grading::is_valid_enrollment_status(&status) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: new, promoted, retained, transferred, dropped",
            Some(json!({ "status": status })),
        );
    }
    let enrolled_at = req
        .params
        .get("enrolledAt")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    if !row_exists(conn, "students", &student_id) {
        return err(&req.id, "not_found", "student not found", None);
    }
    if !row_exists(conn, "class_groups", &class_group_id) {
        return err(&req.id, "not_found", "class group not found", None);
    }

    // At most one enrollment per (student, class group); the UNIQUE index
    // backs this against racing requests.
    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM enrollments WHERE student_id = ? AND class_group_id = ?",
            (&student_id, &class_group_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(id) = existing {
        return err(
            &req.id,
            "duplicate_enrollment",
            "student is already enrolled in this class group",
            Some(json!({ "enrollmentId": id })),
        );
    }

    // Dropped and transferred students free their seat.
    let (capacity, occupied): (i64, i64) = match conn.query_row(
        "SELECT
           cg.capacity,
           (SELECT COUNT(*) FROM enrollments e
            WHERE e.class_group_id = cg.id
              AND e.status NOT IN ('dropped', 'transferred')) AS occupied
         FROM class_groups cg WHERE cg.id = ?",
        [&class_group_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if occupied >= capacity {
        return err(
            &req.id,
            "class_full",
            "class group is at capacity",
            Some(json!({ "capacity": capacity, "occupied": occupied })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO enrollments(id, student_id, class_group_id, status, enrolled_at)
         VALUES(?, ?, ?, ?, ?)",
        (&enrollment_id, &student_id, &class_group_id, &status, &enrolled_at),
    ) {
        let _ = tx.rollback();
        let code = if e.to_string().contains("UNIQUE") {
            "duplicate_enrollment"
        } else {
            "db_insert_failed"
        };
        return err(&req.id, code, e.to_string(), Some(json!({ "table": "enrollments" })));
    }

    // Fan out one blank grade row per offering currently in the class group.
    // Returning here drops the uncommitted transaction, which rolls it back;
    // an explicit rollback would move `tx` while `stmt` still borrows it.
    let offering_ids = {
        let mut stmt = match tx.prepare(
            "SELECT id FROM subject_offerings WHERE class_group_id = ? ORDER BY rowid",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&class_group_id], |row| row.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    for offering_id in &offering_ids {
        let grade_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO grades(id, enrollment_id, subject_offering_id) VALUES(?, ?, ?)",
            (&grade_id, &enrollment_id, offering_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grades" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "enrollmentId": enrollment_id,
            "studentId": student_id,
            "classGroupId": class_group_id,
            "status": status,
            "enrolledAt": enrolled_at,
            "gradeRowsCreated": offering_ids.len()
        }),
    )
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "enrollments": [] }));
    };
    let class_group_id = match req.params.get("classGroupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classGroupId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, e.student_id, st.last_name, st.first_name, e.status, e.enrolled_at,
                (SELECT COUNT(*) FROM grades g WHERE g.enrollment_id = e.id) AS grade_count
         FROM enrollments e
         JOIN students st ON st.id = e.student_id
         WHERE e.class_group_id = ?
         ORDER BY st.last_name, st.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_group_id], |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let first_name: String = row.get(3)?;
            let status: String = row.get(4)?;
            let enrolled_at: String = row.get(5)?;
            let grade_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "lastName": last_name,
                "firstName": first_name,
                "status": status,
                "enrolledAt": enrolled_at,
                "gradeCount": grade_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };
    let status = match req.params.get("status").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing status", None),
    };
    if !grading::is_valid_enrollment_status(&status) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: new, promoted, retained, transferred, dropped",
            Some(json!({ "status": status })),
        );
    }

    let changed = match conn.execute(
        "UPDATE enrollments SET status = ? WHERE id = ?",
        (&status, &enrollment_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "enrollment not found", None);
    }
    ok(&req.id, json!({ "enrollmentId": enrollment_id, "status": status }))
}

fn handle_enrollments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };
    if !row_exists(conn, "enrollments", &enrollment_id) {
        return err(&req.id, "not_found", "enrollment not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // Grades go with their enrollment.
    if let Err(e) = tx.execute("DELETE FROM grades WHERE enrollment_id = ?", [&enrollment_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM enrollments WHERE id = ?", [&enrollment_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.setStatus" => Some(handle_enrollments_set_status(state, req)),
        "enrollments.delete" => Some(handle_enrollments_delete(state, req)),
        _ => None,
    }
}
