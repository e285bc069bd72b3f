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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]
        .get("code")
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

struct Fixture {
    section_id: String,
    school_year_id: String,
}

fn seed_section_and_year(
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
        json!({ "name": "Grade 7", "sortOrder": 7 }),
    );
    let section = request_ok(
        stdin,
        reader,
        "s4",
        "sections.create",
        json!({ "gradeLevelId": level["gradeLevelId"], "name": "Aguinaldo" }),
    );
    Fixture {
        section_id: section["sectionId"].as_str().expect("sectionId").to_string(),
        school_year_id: year["schoolYearId"].as_str().expect("schoolYearId").to_string(),
    }
}

#[test]
fn one_class_group_per_section_and_school_year() {
    let workspace = temp_dir("sisd-cg-unique");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_section_and_year(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classGroups.create",
        json!({ "sectionId": fx.section_id, "schoolYearId": fx.school_year_id }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "classGroups.create",
        json!({ "sectionId": fx.section_id, "schoolYearId": fx.school_year_id }),
    );
    assert_eq!(code, "duplicate_class_group");

    let listed = request_ok(&mut stdin, &mut reader, "3", "classGroups.list", json!({}));
    assert_eq!(listed["classGroups"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn capacity_blocks_enrollment_until_a_seat_frees_up() {
    let workspace = temp_dir("sisd-cg-capacity");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_section_and_year(&mut stdin, &mut reader, &workspace);

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classGroups.create",
        json!({
            "sectionId": fx.section_id,
            "schoolYearId": fx.school_year_id,
            "capacity": 1
        }),
    );
    let class_group_id = group["classGroupId"].as_str().expect("classGroupId").to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "lastName": "Cruz", "firstName": "Juan" }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "lastName": "Reyes", "firstName": "Ana" }),
    );

    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.create",
        json!({ "studentId": first["studentId"], "classGroupId": class_group_id }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.create",
        json!({ "studentId": second["studentId"], "classGroupId": class_group_id }),
    );
    assert_eq!(code, "class_full");

    // A dropped student no longer occupies a seat.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.setStatus",
        json!({ "enrollmentId": enrolled["enrollmentId"], "status": "dropped" }),
    );
    let retried = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.create",
        json!({ "studentId": second["studentId"], "classGroupId": class_group_id }),
    );
    assert!(retried["enrollmentId"].as_str().is_some());
}

#[test]
fn deleting_a_class_group_cascades_to_enrollments_offerings_and_grades() {
    let workspace = temp_dir("sisd-cg-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_section_and_year(&mut stdin, &mut reader, &workspace);

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classGroups.create",
        json!({ "sectionId": fx.section_id, "schoolYearId": fx.school_year_id }),
    );
    let class_group_id = group["classGroupId"].as_str().expect("classGroupId").to_string();

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "lastName": "Santos", "firstName": "Maria" }),
    );
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "code": "AP", "name": "Araling Panlipunan" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "offerings.create",
        json!({
            "subjectId": subject["subjectId"],
            "classGroupId": class_group_id,
            "teacherId": teacher["teacherId"]
        }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "lastName": "Cruz", "firstName": "Juan" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.create",
        json!({ "studentId": student["studentId"], "classGroupId": class_group_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "classGroups.delete",
        json!({ "classGroupId": class_group_id }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "8", "classGroups.list", json!({}));
    assert_eq!(listed["classGroups"].as_array().map(|a| a.len()), Some(0));

    // The same (section, school year) slot reopens after the delete.
    let recreated = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classGroups.create",
        json!({ "sectionId": fx.section_id, "schoolYearId": fx.school_year_id }),
    );
    assert!(recreated["classGroupId"].as_str().is_some());
}
