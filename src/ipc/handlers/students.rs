use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, match_policy, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::section;
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Stored exactly as entered; every comparison goes through the section
    // matcher, so inconsistent entry does not have to be fixed here.
    let section_label = match required_str(req, "section") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = optional_str(req, "email");

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, email, section, sort_order, active)
         VALUES(?, ?, ?, ?, ?, 1)",
        (&student_id, &name, &email, &section_label, sort_order),
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
            "studentId": student_id,
            "name": name,
            "section": section_label,
            "canonicalSection": section::normalize(&section_label)
        }),
    )
}

struct StudentRow {
    id: String,
    name: String,
    section: String,
    active: bool,
}

fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "name": s.name,
        "section": s.section,
        "canonicalSection": section::normalize(&s.section),
        "active": s.active
    })
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(filter) = optional_str(req, "section") else {
        let mut stmt = match conn.prepare(
            "SELECT id, name, section, active FROM students ORDER BY sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    section: r.get(2)?,
                    active: r.get::<_, i64>(3)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        return match rows {
            Ok(students) => ok(
                &req.id,
                json!({ "students": students.iter().map(student_json).collect::<Vec<_>>() }),
            ),
            Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        };
    };

    // Tier 1 as a storage membership query over the variant set; the
    // normalized fallback only runs when that returns nothing.
    let variant_set = section::variants(&filter);
    let mut students: Vec<StudentRow> = Vec::new();
    if !variant_set.is_empty() {
        let placeholders = std::iter::repeat("?")
            .take(variant_set.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT id, name, section, active FROM students
             WHERE TRIM(UPPER(section)) IN ({})
             ORDER BY sort_order",
            placeholders
        );
        let values: Vec<Value> = variant_set.iter().map(|v| Value::Text(v.clone())).collect();
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map(params_from_iter(values), |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    section: r.get(2)?,
                    active: r.get::<_, i64>(3)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        students = match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    }

    if students.is_empty() {
        let policy = match_policy(req);
        let mut stmt = match conn.prepare(
            "SELECT id, name, section, active FROM students ORDER BY sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    section: r.get(2)?,
                    active: r.get::<_, i64>(3)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let all = match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        students = all
            .into_iter()
            .filter(|s| {
                section::matches(&s.section, std::slice::from_ref(&filter), policy)
            })
            .collect();
    }

    ok(
        &req.id,
        json!({
            "section": filter,
            "students": students.iter().map(student_json).collect::<Vec<_>>()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.add" => Some(handle_students_add(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
