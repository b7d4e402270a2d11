use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("feedback.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            department TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_offerings(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            department TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            section TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_section ON students(section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback_forms(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            course_offering_id TEXT,
            course_name TEXT,
            target_sections TEXT NOT NULL,
            open_date TEXT,
            close_date TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            response_count INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(faculty_id) REFERENCES faculty(id),
            FOREIGN KEY(course_offering_id) REFERENCES course_offerings(id)
        )",
        [],
    )?;
    ensure_forms_response_count(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_forms_faculty ON feedback_forms(faculty_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_forms_status ON feedback_forms(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            form_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            prompt TEXT NOT NULL,
            kind TEXT NOT NULL,
            options TEXT NOT NULL DEFAULT '[]',
            required INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(form_id) REFERENCES feedback_forms(id),
            UNIQUE(form_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_form ON questions(form_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS responses(
            id TEXT PRIMARY KEY,
            form_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            submitted_at TEXT,
            FOREIGN KEY(form_id) REFERENCES feedback_forms(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(form_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_form ON responses(form_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_student ON responses(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS answers(
            id TEXT PRIMARY KEY,
            response_id TEXT NOT NULL,
            question_id TEXT,
            question_idx INTEGER,
            rating INTEGER,
            selected_option TEXT,
            text_response TEXT,
            raw_answer TEXT,
            FOREIGN KEY(response_id) REFERENCES responses(id)
        )",
        [],
    )?;
    ensure_answers_raw_answer(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_response ON answers(response_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id)",
        [],
    )?;

    Ok(conn)
}

// Workspaces created before the denormalized counter landed.
fn ensure_forms_response_count(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "feedback_forms", "response_count")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE feedback_forms ADD COLUMN response_count INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute(
        "UPDATE feedback_forms SET response_count =
           (SELECT COUNT(*) FROM responses r WHERE r.form_id = feedback_forms.id)",
        [],
    )?;
    Ok(())
}

// Early submission paths wrote the generic answer slot only on some rows.
fn ensure_answers_raw_answer(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "answers", "raw_answer")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE answers ADD COLUMN raw_answer TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
