//! Thin roster records the enrollment/grading core hangs off: school years,
//! grade levels, sections, subjects, teachers, students. Identity and
//! field-level validation beyond presence checks belong to the caller.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

fn require_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

fn handle_school_years_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match require_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(start_year) = req.params.get("startYear").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing startYear", None);
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO school_years(id, name, start_year) VALUES(?, ?, ?)",
        (&id, &name, start_year),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "school_years" })),
        );
    }
    ok(&req.id, json!({ "schoolYearId": id, "name": name, "startYear": start_year }))
}

fn handle_school_years_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schoolYears": [] }));
    };
    let mut stmt = match conn
        .prepare("SELECT id, name, start_year FROM school_years ORDER BY start_year")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let start_year: i64 = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "startYear": start_year }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(years) => ok(&req.id, json!({ "schoolYears": years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grade_levels_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match require_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(sort_order) = req.params.get("sortOrder").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing sortOrder", None);
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grade_levels(id, name, sort_order) VALUES(?, ?, ?)",
        (&id, &name, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grade_levels" })),
        );
    }
    ok(&req.id, json!({ "gradeLevelId": id, "name": name, "sortOrder": sort_order }))
}

fn handle_grade_levels_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "gradeLevels": [] }));
    };
    let mut stmt = match conn
        .prepare("SELECT id, name, sort_order FROM grade_levels ORDER BY sort_order")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let sort_order: i64 = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "sortOrder": sort_order }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(levels) => ok(&req.id, json!({ "gradeLevels": levels })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sections_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grade_level_id = match require_str(req, "gradeLevelId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match require_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !row_exists(conn, "grade_levels", &grade_level_id) {
        return err(&req.id, "not_found", "grade level not found", None);
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sections(id, grade_level_id, name) VALUES(?, ?, ?)",
        (&id, &grade_level_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sections" })),
        );
    }
    ok(&req.id, json!({ "sectionId": id, "gradeLevelId": grade_level_id, "name": name }))
}

fn handle_sections_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sections": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, gl.id, gl.name
         FROM sections s
         JOIN grade_levels gl ON gl.id = s.grade_level_id
         ORDER BY gl.sort_order, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let grade_level_id: String = row.get(2)?;
            let grade_level: String = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "gradeLevelId": grade_level_id,
                "gradeLevel": grade_level
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let code = match require_str(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match require_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, code, name) VALUES(?, ?, ?)",
        (&id, &code, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    ok(&req.id, json!({ "subjectId": id, "code": code, "name": name }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };
    let mut stmt = match conn.prepare("SELECT id, code, name FROM subjects ORDER BY code") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            Ok(json!({ "id": id, "code": code, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let last_name = match require_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match require_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, last_name, first_name) VALUES(?, ?, ?)",
        (&id, &last_name, &first_name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }
    ok(&req.id, json!({ "teacherId": id, "lastName": last_name, "firstName": first_name }))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };
    let mut stmt = match conn
        .prepare("SELECT id, last_name, first_name FROM teachers ORDER BY last_name, first_name")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            Ok(json!({ "id": id, "lastName": last_name, "firstName": first_name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let last_name = match require_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match require_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_no = req
        .params
        .get("studentNo")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string());

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, last_name, first_name, student_no, graduated, created_at)
         VALUES(?, ?, ?, ?, 0, ?)",
        (&id, &last_name, &first_name, &student_no, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(
        &req.id,
        json!({
            "studentId": id,
            "lastName": last_name,
            "firstName": first_name,
            "studentNo": student_no,
            "graduated": false
        }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let include_graduated = req
        .params
        .get("includeGraduated")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let sql = if include_graduated {
        "SELECT id, last_name, first_name, student_no, graduated FROM students
         ORDER BY last_name, first_name"
    } else {
        "SELECT id, last_name, first_name, student_no, graduated FROM students
         WHERE graduated = 0 ORDER BY last_name, first_name"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let student_no: Option<String> = row.get(3)?;
            let graduated: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "lastName": last_name,
                "firstName": first_name,
                "studentNo": student_no,
                "graduated": graduated != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn row_exists(conn: &rusqlite::Connection, table: &str, id: &str) -> bool {
    use rusqlite::OptionalExtension;
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .ok()
        .flatten()
        .is_some()
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schoolYears.create" => Some(handle_school_years_create(state, req)),
        "schoolYears.list" => Some(handle_school_years_list(state, req)),
        "gradeLevels.create" => Some(handle_grade_levels_create(state, req)),
        "gradeLevels.list" => Some(handle_grade_levels_list(state, req)),
        "sections.create" => Some(handle_sections_create(state, req)),
        "sections.list" => Some(handle_sections_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
