//! Subject-offering creation, the other half of the grade-row fan-out.
//! Creating an offering after enrollments exist must leave the same grade
//! matrix as enrolling after the offering existed.

use crate::ipc::error::{err, ok};
use crate::ipc::handlers::roster::row_exists;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_offerings_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let class_group_id = match req.params.get("classGroupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classGroupId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    if !row_exists(conn, "subjects", &subject_id) {
        return err(&req.id, "not_found", "subject not found", None);
    }
    if !row_exists(conn, "class_groups", &class_group_id) {
        return err(&req.id, "not_found", "class group not found", None);
    }
    if !row_exists(conn, "teachers", &teacher_id) {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // First-or-create on (class group, subject): a re-run reuses the existing
    // offering and only backfills grade rows that are still missing.
    let existing: Option<String> = match tx
        .query_row(
            "SELECT id FROM subject_offerings WHERE class_group_id = ? AND subject_id = ?",
            (&class_group_id, &subject_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    let created = existing.is_none();
    let offering_id = match existing {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            if let Err(e) = tx.execute(
                "INSERT INTO subject_offerings(id, class_group_id, subject_id, teacher_id)
                 VALUES(?, ?, ?, ?)",
                (&id, &class_group_id, &subject_id, &teacher_id),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "subject_offerings" })),
                );
            }
            id
        }
    };

    // Fan out a blank grade row per existing enrollment; create-if-absent so
    // enrollments that already have one are left alone. Returning here drops
    // the uncommitted transaction, which rolls it back; an explicit rollback
    // would move `tx` while `stmt` still borrows it.
    let enrollment_ids = {
        let mut stmt = match tx.prepare(
            "SELECT id FROM enrollments WHERE class_group_id = ? ORDER BY rowid",
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

    let mut grade_rows_created: usize = 0;
    for enrollment_id in &enrollment_ids {
        let grade_id = Uuid::new_v4().to_string();
        let inserted = match tx.execute(
            "INSERT INTO grades(id, enrollment_id, subject_offering_id)
             VALUES(?, ?, ?)
             ON CONFLICT(enrollment_id, subject_offering_id) DO NOTHING",
            (&grade_id, enrollment_id, &offering_id),
        ) {
            Ok(n) => n,
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "grades" })),
                );
            }
        };
        grade_rows_created += inserted;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "offeringId": offering_id,
            "subjectId": subject_id,
            "classGroupId": class_group_id,
            "teacherId": teacher_id,
            "created": created,
            "gradeRowsCreated": grade_rows_created
        }),
    )
}

fn handle_offerings_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "offerings": [] }));
    };
    let class_group_id = match req.params.get("classGroupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classGroupId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT so.id, sub.id, sub.code, sub.name, t.id, t.last_name, t.first_name,
                (SELECT COUNT(*) FROM grades g WHERE g.subject_offering_id = so.id) AS grade_count
         FROM subject_offerings so
         JOIN subjects sub ON sub.id = so.subject_id
         JOIN teachers t ON t.id = so.teacher_id
         WHERE so.class_group_id = ?
         ORDER BY sub.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_group_id], |row| {
            let id: String = row.get(0)?;
            let subject_id: String = row.get(1)?;
            let subject_code: String = row.get(2)?;
            let subject_name: String = row.get(3)?;
            let teacher_id: String = row.get(4)?;
            let teacher_last: String = row.get(5)?;
            let teacher_first: String = row.get(6)?;
            let grade_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "subjectId": subject_id,
                "subjectCode": subject_code,
                "subjectName": subject_name,
                "teacherId": teacher_id,
                "teacherLastName": teacher_last,
                "teacherFirstName": teacher_first,
                "gradeCount": grade_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(offerings) => ok(&req.id, json!({ "offerings": offerings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_offerings_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let offering_id = match req.params.get("offeringId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing offeringId", None),
    };
    if !row_exists(conn, "subject_offerings", &offering_id) {
        return err(&req.id, "not_found", "subject offering not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM grades WHERE subject_offering_id = ?",
        [&offering_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM subject_offerings WHERE id = ?", [&offering_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subject_offerings" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "offerings.create" => Some(handle_offerings_create(state, req)),
        "offerings.list" => Some(handle_offerings_list(state, req)),
        "offerings.delete" => Some(handle_offerings_delete(state, req)),
        _ => None,
    }
}
