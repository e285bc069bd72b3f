use crate::ipc::error::{err, ok};
use crate::ipc::handlers::roster::row_exists;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const DEFAULT_CAPACITY: i64 = 40;

fn handle_class_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };
    let school_year_id = match req.params.get("schoolYearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing schoolYearId", None),
    };
    let capacity = req
        .params
        .get("capacity")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_CAPACITY);
    if capacity <= 0 {
        return err(
            &req.id,
            "bad_params",
            "capacity must be > 0",
            Some(json!({ "capacity": capacity })),
        );
    }

    if !row_exists(conn, "sections", &section_id) {
        return err(&req.id, "not_found", "section not found", None);
    }
    if !row_exists(conn, "school_years", &school_year_id) {
        return err(&req.id, "not_found", "school year not found", None);
    }

    // One class group per (section, school year); also backed by the UNIQUE index.
    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM class_groups WHERE section_id = ? AND school_year_id = ?",
            (&section_id, &school_year_id),
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
            "duplicate_class_group",
            "class group already exists for this section and school year",
            Some(json!({ "classGroupId": id })),
        );
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO class_groups(id, section_id, school_year_id, capacity) VALUES(?, ?, ?, ?)",
        (&id, &section_id, &school_year_id, capacity),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_groups" })),
        );
    }

    ok(
        &req.id,
        json!({
            "classGroupId": id,
            "sectionId": section_id,
            "schoolYearId": school_year_id,
            "capacity": capacity
        }),
    )
}

fn handle_class_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classGroups": [] }));
    };

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           cg.id,
           s.name,
           gl.name,
           sy.name,
           sy.start_year,
           cg.capacity,
           (SELECT COUNT(*) FROM enrollments e WHERE e.class_group_id = cg.id) AS enrollment_count,
           (SELECT COUNT(*) FROM subject_offerings so WHERE so.class_group_id = cg.id) AS offering_count
         FROM class_groups cg
         JOIN sections s ON s.id = cg.section_id
         JOIN grade_levels gl ON gl.id = s.grade_level_id
         JOIN school_years sy ON sy.id = cg.school_year_id
         ORDER BY sy.start_year, gl.sort_order, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let section: String = row.get(1)?;
            let grade_level: String = row.get(2)?;
            let school_year: String = row.get(3)?;
            let start_year: i64 = row.get(4)?;
            let capacity: i64 = row.get(5)?;
            let enrollment_count: i64 = row.get(6)?;
            let offering_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "section": section,
                "gradeLevel": grade_level,
                "schoolYear": school_year,
                "startYear": start_year,
                "capacity": capacity,
                "enrollmentCount": enrollment_count,
                "offeringCount": offering_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(groups) => ok(&req.id, json!({ "classGroups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_class_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_group_id = match req.params.get("classGroupId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classGroupId", None),
    };
    if !row_exists(conn, "class_groups", &class_group_id) {
        return err(&req.id, "not_found", "class group not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM grades
         WHERE enrollment_id IN (
           SELECT e.id FROM enrollments e WHERE e.class_group_id = ?
         )",
        [&class_group_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM enrollments WHERE class_group_id = ?",
        [&class_group_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM subject_offerings WHERE class_group_id = ?",
        [&class_group_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subject_offerings" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM class_groups WHERE id = ?", [&class_group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_groups" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classGroups.create" => Some(handle_class_groups_create(state, req)),
        "classGroups.list" => Some(handle_class_groups_list(state, req)),
        "classGroups.delete" => Some(handle_class_groups_delete(state, req)),
        _ => None,
    }
}
