use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("sis.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_year INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_levels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            grade_level_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(grade_level_id) REFERENCES grade_levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_grade_level ON sections(grade_level_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            graduated INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_groups(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            school_year_id TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            FOREIGN KEY(section_id) REFERENCES sections(id),
            FOREIGN KEY(school_year_id) REFERENCES school_years(id),
            UNIQUE(section_id, school_year_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_groups_year ON class_groups(school_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_group_id TEXT NOT NULL,
            status TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id),
            UNIQUE(student_id, class_group_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class_group ON enrollments(class_group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_offerings(
            id TEXT PRIMARY KEY,
            class_group_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            UNIQUE(class_group_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_offerings_class_group
         ON subject_offerings(class_group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            subject_offering_id TEXT NOT NULL,
            q1 REAL,
            q2 REAL,
            q3 REAL,
            q4 REAL,
            final REAL,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(subject_offering_id) REFERENCES subject_offerings(id),
            UNIQUE(enrollment_id, subject_offering_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_enrollment ON grades(enrollment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_offering ON grades(subject_offering_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS alumni(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            year_graduated INTEGER NOT NULL,
            company TEXT,
            job_title TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &raw),
    )?;
    Ok(())
}
