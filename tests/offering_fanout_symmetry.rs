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
    let exe = env!("CARGO_BIN_EXE_sisd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sisd");
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
    class_group_id: String,
    teacher_id: String,
    subject_id: String,
    enrollment_ids: Vec<String>,
}

/// Class group with two enrolled students and no offerings yet.
fn seed_enrolled_class_group(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let year = request_ok(
        stdin,
        reader,
        "s2",
        "schoolYears.create",
        json!({ "name": "2025-2026", "startYear": 2025 }),
    );
    let level = request_ok(
        stdin,
        reader,
        "s3",
        "gradeLevels.create",
        json!({ "name": "Grade 11", "sortOrder": 11 }),
    );
    let section = request_ok(
        stdin,
        reader,
        "s4",
        "sections.create",
        json!({ "gradeLevelId": level["gradeLevelId"], "name": "Bonifacio" }),
    );
    let group = request_ok(
        stdin,
        reader,
        "s5",
        "classGroups.create",
        json!({
            "sectionId": section["sectionId"],
            "schoolYearId": year["schoolYearId"]
        }),
    );
    let class_group_id = group["classGroupId"].as_str().expect("classGroupId").to_string();

    let teacher = request_ok(
        stdin,
        reader,
        "s6",
        "teachers.create",
        json!({ "lastName": "Santos", "firstName": "Maria" }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "s7",
        "subjects.create",
        json!({ "code": "FIL", "name": "Filipino" }),
    );

    let mut enrollment_ids = Vec::new();
    for (i, (last, first)) in [("Cruz", "Juan"), ("Reyes", "Ana")].iter().enumerate() {
        let student = request_ok(
            stdin,
            reader,
            &format!("s8-{}", i),
            "students.create",
            json!({ "lastName": last, "firstName": first }),
        );
        let enrolled = request_ok(
            stdin,
            reader,
            &format!("s9-{}", i),
            "enrollments.create",
            json!({ "studentId": student["studentId"], "classGroupId": class_group_id }),
        );
        // No offerings exist yet, so enrollment fans out nothing.
        assert_eq!(enrolled.get("gradeRowsCreated").and_then(|v| v.as_u64()), Some(0));
        enrollment_ids.push(enrolled["enrollmentId"].as_str().expect("enrollmentId").to_string());
    }

    Fixture {
        class_group_id,
        teacher_id: teacher["teacherId"].as_str().expect("teacherId").to_string(),
        subject_id: subject["subjectId"].as_str().expect("subjectId").to_string(),
        enrollment_ids,
    }
}

#[test]
fn offering_backfills_one_grade_row_per_existing_enrollment() {
    let workspace = temp_dir("sisd-offering-fanout");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_enrolled_class_group(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "offerings.create",
        json!({
            "subjectId": fx.subject_id,
            "classGroupId": fx.class_group_id,
            "teacherId": fx.teacher_id
        }),
    );
    assert_eq!(created.get("created").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(created.get("gradeRowsCreated").and_then(|v| v.as_u64()), Some(2));

    for (i, enrollment_id) in fx.enrollment_ids.iter().enumerate() {
        let grades = request_ok(
            &mut stdin,
            &mut reader,
            &format!("2-{}", i),
            "grades.list",
            json!({ "enrollmentId": enrollment_id }),
        );
        let rows = grades["grades"].as_array().expect("grades array");
        assert_eq!(rows.len(), 1, "one grade row per enrollment after fan-out");
        assert!(rows[0]["final"].is_null());
    }
}

#[test]
fn rerunning_offering_create_duplicates_nothing() {
    let workspace = temp_dir("sisd-offering-idem");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_enrolled_class_group(&mut stdin, &mut reader, &workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "offerings.create",
        json!({
            "subjectId": fx.subject_id,
            "classGroupId": fx.class_group_id,
            "teacherId": fx.teacher_id
        }),
    );
    let offering_id = first["offeringId"].as_str().expect("offeringId").to_string();

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "offerings.create",
        json!({
            "subjectId": fx.subject_id,
            "classGroupId": fx.class_group_id,
            "teacherId": fx.teacher_id
        }),
    );
    assert_eq!(second.get("created").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(second.get("gradeRowsCreated").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(
        second.get("offeringId").and_then(|v| v.as_str()),
        Some(offering_id.as_str())
    );

    let offerings = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "offerings.list",
        json!({ "classGroupId": fx.class_group_id }),
    );
    let rows = offerings["offerings"].as_array().expect("offerings array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("gradeCount").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn late_enrollment_after_offering_matches_fanout_symmetry() {
    let workspace = temp_dir("sisd-offering-symmetry");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_enrolled_class_group(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "offerings.create",
        json!({
            "subjectId": fx.subject_id,
            "classGroupId": fx.class_group_id,
            "teacherId": fx.teacher_id
        }),
    );

    // A third student enrolls after the offering exists; both creation orders
    // must leave the same (enrollment x offering) grade matrix.
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "lastName": "Lim", "firstName": "Carlos" }),
    );
    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.create",
        json!({ "studentId": student["studentId"], "classGroupId": fx.class_group_id }),
    );
    assert_eq!(enrolled.get("gradeRowsCreated").and_then(|v| v.as_u64()), Some(1));

    let grades = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.list",
        json!({ "classGroupId": fx.class_group_id }),
    );
    assert_eq!(grades["grades"].as_array().map(|a| a.len()), Some(3));
}

#[test]
fn deleting_an_offering_removes_its_grades() {
    let workspace = temp_dir("sisd-offering-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_enrolled_class_group(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "offerings.create",
        json!({
            "subjectId": fx.subject_id,
            "classGroupId": fx.class_group_id,
            "teacherId": fx.teacher_id
        }),
    );
    let offering_id = created["offeringId"].as_str().expect("offeringId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "offerings.delete",
        json!({ "offeringId": offering_id }),
    );

    let grades = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.list",
        json!({ "classGroupId": fx.class_group_id }),
    );
    assert_eq!(grades["grades"].as_array().map(|a| a.len()), Some(0));

    // Enrollments are untouched; only their grade rows for this offering go.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.list",
        json!({ "classGroupId": fx.class_group_id }),
    );
    assert_eq!(listed["enrollments"].as_array().map(|a| a.len()), Some(2));
}
