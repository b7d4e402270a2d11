use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_form, load_questions, required_str, stats_err};
use crate::ipc::types::{AppState, Request};
use crate::stats::{coerce_answer, Answer, AnswerRecord, QuestionDef, QuestionKind};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn duplicate_submission() -> HandlerErr {
    HandlerErr {
        code: "duplicate_submission",
        message: "student already submitted feedback for this form".to_string(),
        // The storage constraint may fire under a concurrent submit; the
        // caller can safely re-read and report the same validation message.
        details: Some(json!({ "retryable": true })),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_answer_inputs(req: &Request) -> Result<Vec<AnswerRecord>, serde_json::Value> {
    let Some(raw) = req.params.get("answers").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing answers", None));
    };
    let mut out = Vec::with_capacity(raw.len());
    for a in raw {
        out.push(AnswerRecord {
            question_id: a
                .get("questionId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            question_idx: a.get("questionIdx").and_then(|v| v.as_i64()),
            rating: a.get("rating").and_then(|v| v.as_i64()),
            selected_option: a
                .get("selectedOption")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            text_response: a
                .get("textResponse")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            raw_answer: a.get("answer").cloned().filter(|v| !v.is_null()),
        });
    }
    Ok(out)
}

fn find_answer<'a>(
    question: &QuestionDef,
    answers: &'a [AnswerRecord],
) -> Option<&'a AnswerRecord> {
    answers
        .iter()
        .find(|a| a.question_id.as_deref() == Some(question.id.as_str()))
        .or_else(|| {
            answers
                .iter()
                .find(|a| a.question_id.is_none() && a.question_idx == Some(question.idx))
        })
}

/// Per-question submission validation. Distinct from aggregation-time
/// tolerance: a live submit gets a typed rejection the UI can show, while
/// historical rows are silently skipped by the aggregator.
fn validate_answers(
    questions: &[QuestionDef],
    answers: &[AnswerRecord],
) -> Result<(), HandlerErr> {
    for question in questions {
        let answer = find_answer(question, answers);
        let coerced = answer.and_then(|a| coerce_answer(question.kind, a));

        if let Some(rec) = answer {
            if question.kind == QuestionKind::Rating {
                let claimed = rec.rating.is_some() || rec.raw_answer.is_some();
                if claimed && coerced.is_none() {
                    return Err(HandlerErr {
                        code: "bad_rating",
                        message: "rating must be an integer between 1 and 5".to_string(),
                        details: Some(json!({ "questionId": question.id })),
                    });
                }
            }
            if let Some(Answer::Choice(option)) = &coerced {
                if !question.options.iter().any(|o| o == option) {
                    return Err(HandlerErr {
                        code: "invalid_option",
                        message: format!("'{}' is not an option for this question", option),
                        details: Some(json!({ "questionId": question.id })),
                    });
                }
            }
        }

        if question.required && coerced.is_none() {
            return Err(HandlerErr {
                code: "missing_required",
                message: "a required question was not answered".to_string(),
                details: Some(json!({ "questionId": question.id })),
            });
        }
    }
    Ok(())
}

fn handle_responses_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let form_id = match required_str(req, "formId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let answers = match parse_answer_inputs(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let form = match load_form(conn, &form_id) {
        Ok(Some(f)) => f,
        Ok(None) => return err(&req.id, "not_found", "form not found", None),
        Err(e) => return stats_err(&req.id, e),
    };
    if form.status != "open" {
        return err(
            &req.id,
            "form_not_open",
            "form is not accepting responses",
            Some(json!({ "status": form.status })),
        );
    }

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let already: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM responses WHERE form_id = ? AND student_id = ?",
            (&form_id, &student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if already.is_some() {
        return duplicate_submission().response(&req.id);
    }

    let questions = match load_questions(conn, &form_id) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };
    if let Err(e) = validate_answers(&questions, &answers) {
        return e.response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let response_id = Uuid::new_v4().to_string();
    let submitted_at = Utc::now().to_rfc3339();
    if let Err(e) = tx.execute(
        "INSERT INTO responses(id, form_id, student_id, submitted_at) VALUES(?, ?, ?, ?)",
        (&response_id, &form_id, &student_id, &submitted_at),
    ) {
        let _ = tx.rollback();
        if is_unique_violation(&e) {
            // Lost the race against a concurrent submit for the same pair.
            return duplicate_submission().response(&req.id);
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "responses" })),
        );
    }

    for rec in &answers {
        let answer_id = Uuid::new_v4().to_string();
        let raw_answer = rec
            .raw_answer
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "null".into()));
        if let Err(e) = tx.execute(
            "INSERT INTO answers(
                id, response_id, question_id, question_idx,
                rating, selected_option, text_response, raw_answer
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &answer_id,
                &response_id,
                &rec.question_id,
                &rec.question_idx,
                &rec.rating,
                &rec.selected_option,
                &rec.text_response,
                &raw_answer,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "answers" })),
            );
        }
    }

    // The denormalized counter moves exactly once per accepted submission,
    // inside the same transaction as the response row.
    if let Err(e) = tx.execute(
        "UPDATE feedback_forms SET response_count = response_count + 1 WHERE id = ?",
        [&form_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "responseId": response_id,
            "formId": form_id,
            "studentId": student_id,
            "submittedAt": submitted_at
        }),
    )
}

fn handle_responses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let form_id = match required_str(req, "formId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, student_id, submitted_at
         FROM responses
         WHERE form_id = ?
         ORDER BY submitted_at, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&form_id], |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let submitted_at: Option<String> = r.get(2)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "submittedAt": submitted_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(responses) => ok(&req.id, json!({ "responses": responses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "responses.submit" => Some(handle_responses_submit(state, req)),
        "responses.list" => Some(handle_responses_list(state, req)),
        _ => None,
    }
}
