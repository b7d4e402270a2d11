use rusqlite::Connection;
use std::collections::HashMap;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::section::{self, MatchPolicy};
use crate::stats::{AnswerRecord, QuestionDef, QuestionKind, ResponseRecord, StatsError};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn db_err(e: rusqlite::Error) -> StatsError {
    StatsError::new("db_query_failed", e.to_string())
}

/// Map an engine-layer error onto the IPC error envelope.
pub fn stats_err(id: &str, e: StatsError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}

/// Matching policy for this request. The strict year-prefix guard is opt-in
/// per call; default stays on legacy behavior.
pub fn match_policy(req: &Request) -> MatchPolicy {
    MatchPolicy {
        strict_year_prefix: req
            .params
            .get("strictSectionMatch")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

/// Target sections are stored as a JSON array of raw labels. Rows written by
/// older builds occasionally hold garbage; that degrades to an empty list,
/// never an error.
pub fn parse_sections_json(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct FormRow {
    pub id: String,
    pub title: String,
    pub faculty_id: String,
    pub course_offering_id: Option<String>,
    pub course_name: Option<String>,
    pub target_sections: Vec<String>,
    pub open_date: Option<String>,
    pub close_date: Option<String>,
    pub status: String,
    pub response_count: i64,
}

fn form_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FormRow> {
    let target_sections: String = r.get(5)?;
    Ok(FormRow {
        id: r.get(0)?,
        title: r.get(1)?,
        faculty_id: r.get(2)?,
        course_offering_id: r.get(3)?,
        course_name: r.get(4)?,
        target_sections: parse_sections_json(&target_sections),
        open_date: r.get(6)?,
        close_date: r.get(7)?,
        status: r.get(8)?,
        response_count: r.get(9)?,
    })
}

const FORM_COLUMNS: &str = "id, title, faculty_id, course_offering_id, course_name,
     target_sections, open_date, close_date, status, response_count";

pub fn load_form(conn: &Connection, form_id: &str) -> Result<Option<FormRow>, StatsError> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        &format!("SELECT {} FROM feedback_forms WHERE id = ?", FORM_COLUMNS),
        [form_id],
        |r| form_from_row(r),
    )
    .optional()
    .map_err(db_err)
}

pub fn load_forms(conn: &Connection, faculty_id: Option<&str>) -> Result<Vec<FormRow>, StatsError> {
    match faculty_id {
        Some(fid) => {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM feedback_forms WHERE faculty_id = ? ORDER BY open_date, title",
                    FORM_COLUMNS
                ))
                .map_err(db_err)?;
            stmt.query_map([fid], |r| form_from_row(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(db_err)
        }
        None => {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM feedback_forms ORDER BY open_date, title",
                    FORM_COLUMNS
                ))
                .map_err(db_err)?;
            stmt.query_map([], |r| form_from_row(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(db_err)
        }
    }
}

/// Questions in form order. Rows with an unrecognized kind are skipped; the
/// aggregation layer treats their answers as orphans.
pub fn load_questions(conn: &Connection, form_id: &str) -> Result<Vec<QuestionDef>, StatsError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, idx, prompt, kind, options, required
             FROM questions
             WHERE form_id = ?
             ORDER BY idx",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([form_id], |r| {
            let kind: String = r.get(3)?;
            let options: String = r.get(4)?;
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                kind,
                options,
                r.get::<_, i64>(5)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut out = Vec::new();
    for (id, idx, prompt, kind, options, required) in rows {
        let Some(kind) = QuestionKind::parse(&kind) else {
            continue;
        };
        out.push(QuestionDef {
            id,
            idx,
            prompt,
            kind,
            options: serde_json::from_str(&options).unwrap_or_default(),
            required,
        });
    }
    Ok(out)
}

/// All responses for a form with their answers attached.
pub fn load_responses(conn: &Connection, form_id: &str) -> Result<Vec<ResponseRecord>, StatsError> {
    let mut stmt = conn
        .prepare("SELECT id, student_id FROM responses WHERE form_id = ? ORDER BY submitted_at, id")
        .map_err(db_err)?;
    let headers: Vec<(String, String)> = stmt
        .query_map([form_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut answer_stmt = conn
        .prepare(
            "SELECT question_id, question_idx, rating, selected_option, text_response, raw_answer
             FROM answers
             WHERE response_id = ?
             ORDER BY id",
        )
        .map_err(db_err)?;

    let mut out = Vec::with_capacity(headers.len());
    for (response_id, student_id) in headers {
        let answers = answer_stmt
            .query_map([&response_id], |r| {
                let raw_answer: Option<String> = r.get(5)?;
                Ok(AnswerRecord {
                    question_id: r.get(0)?,
                    question_idx: r.get(1)?,
                    rating: r.get(2)?,
                    selected_option: r.get(3)?,
                    text_response: r.get(4)?,
                    raw_answer: raw_answer.map(|raw| {
                        serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
                    }),
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        out.push(ResponseRecord {
            student_id,
            answers,
        });
    }
    Ok(out)
}

/// Raw section label per active student. The aggregation scope filter and
/// eligibility counts both key off this map.
pub fn load_student_sections(conn: &Connection) -> Result<HashMap<String, String>, StatsError> {
    let mut stmt = conn
        .prepare("SELECT id, section FROM students WHERE active = 1")
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(db_err)
}

/// Enrollment denominator for a form: active students whose section matches
/// any of the form's target sections.
pub fn eligible_count(
    student_sections: &HashMap<String, String>,
    target_sections: &[String],
    policy: MatchPolicy,
) -> u64 {
    student_sections
        .values()
        .filter(|label| section::matches(label, target_sections, policy))
        .count() as u64
}
