use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, load_forms, match_policy, optional_str, required_str, stats_err, FormRow,
};
use crate::ipc::types::{AppState, Request};
use crate::section;
use crate::stats::QuestionKind;
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const FORM_STATUSES: [&str; 3] = ["draft", "open", "closed"];

struct QuestionInput {
    prompt: String,
    kind: QuestionKind,
    options: Vec<String>,
    required: bool,
}

fn parse_date_param(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    let Some(raw) = optional_str(req, key) else {
        return Ok(None);
    };
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(_) => Ok(Some(raw)),
        Err(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            Some(json!({ "value": raw })),
        )),
    }
}

fn parse_questions(req: &Request) -> Result<Vec<QuestionInput>, serde_json::Value> {
    let Some(raw) = req.params.get("questions").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing questions", None));
    };
    if raw.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            "questions must not be empty",
            None,
        ));
    }

    let mut out = Vec::with_capacity(raw.len());
    for (i, q) in raw.iter().enumerate() {
        let prompt = q
            .get("prompt")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let Some(prompt) = prompt else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("questions[{}].prompt is required", i),
                None,
            ));
        };
        let kind = q
            .get("kind")
            .and_then(|v| v.as_str())
            .and_then(QuestionKind::parse);
        let Some(kind) = kind else {
            return Err(err(
                &req.id,
                "bad_params",
                format!(
                    "questions[{}].kind must be one of: rating, multiple_choice, text",
                    i
                ),
                None,
            ));
        };
        let options: Vec<String> = q
            .get("options")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if kind == QuestionKind::MultipleChoice && options.len() < 2 {
            return Err(err(
                &req.id,
                "bad_params",
                format!("questions[{}] needs at least two options", i),
                None,
            ));
        }
        let required = q.get("required").and_then(|v| v.as_bool()).unwrap_or(false);
        out.push(QuestionInput {
            prompt,
            kind,
            options,
            required,
        });
    }
    Ok(out)
}

fn parse_target_sections(req: &Request) -> Result<Vec<String>, serde_json::Value> {
    let Some(raw) = req.params.get("targetSections").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing targetSections", None));
    };
    let sections: Vec<String> = raw
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if sections.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            "targetSections must contain at least one label",
            None,
        ));
    }
    Ok(sections)
}

fn handle_forms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let faculty_id = match required_str(req, "facultyId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course_offering_id = optional_str(req, "courseOfferingId");
    let course_name = optional_str(req, "courseName");
    if course_offering_id.is_none() && course_name.is_none() {
        return err(
            &req.id,
            "bad_params",
            "one of courseOfferingId or courseName is required",
            None,
        );
    }
    let target_sections = match parse_target_sections(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let open_date = match parse_date_param(req, "openDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let close_date = match parse_date_param(req, "closeDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let questions = match parse_questions(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let faculty_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM faculty WHERE id = ?", [&faculty_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if faculty_exists.is_none() {
        return err(&req.id, "not_found", "faculty not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let form_id = Uuid::new_v4().to_string();
    let sections_json = serde_json::to_string(&target_sections).unwrap_or_else(|_| "[]".into());
    if let Err(e) = tx.execute(
        "INSERT INTO feedback_forms(
            id, title, faculty_id, course_offering_id, course_name,
            target_sections, open_date, close_date, status, response_count
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'draft', 0)",
        (
            &form_id,
            &title,
            &faculty_id,
            &course_offering_id,
            &course_name,
            &sections_json,
            &open_date,
            &close_date,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "feedback_forms" })),
        );
    }

    let mut question_ids = Vec::with_capacity(questions.len());
    for (idx, q) in questions.iter().enumerate() {
        let question_id = Uuid::new_v4().to_string();
        let options_json = serde_json::to_string(&q.options).unwrap_or_else(|_| "[]".into());
        if let Err(e) = tx.execute(
            "INSERT INTO questions(id, form_id, idx, prompt, kind, options, required)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &question_id,
                &form_id,
                idx as i64,
                &q.prompt,
                q.kind.as_str(),
                &options_json,
                q.required as i64,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "questions" })),
            );
        }
        question_ids.push(question_id);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "formId": form_id,
            "questionIds": question_ids,
            "targetSections": target_sections
        }),
    )
}

fn form_json(form: &FormRow) -> serde_json::Value {
    json!({
        "id": form.id,
        "title": form.title,
        "facultyId": form.faculty_id,
        "courseOfferingId": form.course_offering_id,
        "courseName": form.course_name,
        "targetSections": form.target_sections,
        "openDate": form.open_date,
        "closeDate": form.close_date,
        "status": form.status,
        "responseCount": form.response_count
    })
}

fn handle_forms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let faculty_id = optional_str(req, "facultyId");

    match load_forms(conn, faculty_id.as_deref()) {
        Ok(forms) => ok(
            &req.id,
            json!({ "forms": forms.iter().map(form_json).collect::<Vec<_>>() }),
        ),
        Err(e) => stats_err(&req.id, e),
    }
}

fn handle_forms_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let form_id = match required_str(req, "formId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !FORM_STATUSES.contains(&status.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: draft, open, closed",
            Some(json!({ "status": status })),
        );
    }

    let updated = match conn.execute(
        "UPDATE feedback_forms SET status = ? WHERE id = ?",
        (&status, &form_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "form not found", None);
    }

    ok(&req.id, json!({ "formId": form_id, "status": status }))
}

/// Open forms whose target sections match the student's section. This is the
/// "does this student see this form" decision, and it lives entirely in the
/// section matcher.
fn handle_forms_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let policy = match_policy(req);

    let section_label: Option<String> = match conn
        .query_row(
            "SELECT section FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(section_label) = section_label else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let forms = match load_forms(conn, None) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };

    let open_forms: Vec<FormRow> = forms.into_iter().filter(|f| f.status == "open").collect();
    let matching: Vec<serde_json::Value> =
        section::filter_matching(&section_label, &open_forms, policy, |f| {
            f.target_sections.as_slice()
        })
        .into_iter()
        .map(form_json)
        .collect();

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "section": section_label,
            "forms": matching
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "forms.create" => Some(handle_forms_create(state, req)),
        "forms.list" => Some(handle_forms_list(state, req)),
        "forms.setStatus" => Some(handle_forms_set_status(state, req)),
        "forms.forStudent" => Some(handle_forms_for_student(state, req)),
        _ => None,
    }
}
