mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

struct Seeded {
    form_id: String,
    student_id: String,
    rating_qid: String,
    choice_qid: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &str) -> Seeded {
    let _ = request_ok(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace }),
    );
    let faculty = request_ok(
        stdin,
        reader,
        "seed-2",
        "faculty.create",
        json!({ "name": "Dr. Rahman", "department": "CSE" }),
    );
    let faculty_id = faculty
        .get("facultyId")
        .and_then(|v| v.as_str())
        .expect("facultyId")
        .to_string();
    let form = request_ok(
        stdin,
        reader,
        "seed-3",
        "forms.create",
        json!({
            "title": "Course feedback",
            "facultyId": faculty_id,
            "courseName": "CSE-101",
            "targetSections": ["A"],
            "questions": [
                { "prompt": "Overall rating", "kind": "rating", "required": true },
                { "prompt": "Pace", "kind": "multiple_choice",
                  "options": ["Too fast", "Just right", "Too slow"] },
                { "prompt": "Comments", "kind": "text" }
            ]
        }),
    );
    let form_id = form
        .get("formId")
        .and_then(|v| v.as_str())
        .expect("formId")
        .to_string();
    let qids: Vec<String> = form
        .get("questionIds")
        .and_then(|v| v.as_array())
        .expect("questionIds")
        .iter()
        .map(|v| v.as_str().expect("qid").to_string())
        .collect();
    let _ = request_ok(
        stdin,
        reader,
        "seed-4",
        "forms.setStatus",
        json!({ "formId": form_id, "status": "open" }),
    );
    let student = request_ok(
        stdin,
        reader,
        "seed-5",
        "students.add",
        json!({ "name": "Anika", "section": "A" }),
    );
    Seeded {
        form_id,
        student_id: student
            .get("studentId")
            .and_then(|v| v.as_str())
            .expect("studentId")
            .to_string(),
        rating_qid: qids[0].clone(),
        choice_qid: qids[1].clone(),
    }
}

#[test]
fn duplicate_submission_is_rejected_and_counter_stays_put() {
    let workspace = temp_dir("feedbackd-dup-submit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace.to_string_lossy());

    let answers = json!([
        { "questionId": seeded.rating_qid, "rating": 4 }
    ]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "responses.submit",
        json!({
            "formId": seeded.form_id,
            "studentId": seeded.student_id,
            "answers": answers
        }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "responses.submit",
        json!({
            "formId": seeded.form_id,
            "studentId": seeded.student_id,
            "answers": answers
        }),
        "duplicate_submission",
    );
    assert_eq!(
        error
            .get("details")
            .and_then(|d| d.get("retryable"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    // The denormalized counter moved exactly once.
    let forms = request_ok(&mut stdin, &mut reader, "3", "forms.list", json!({}));
    let count = forms
        .get("forms")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|f| f.get("responseCount"))
        .and_then(|v| v.as_i64());
    assert_eq!(count, Some(1));

    let responses = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "responses.list",
        json!({ "formId": seeded.form_id }),
    );
    assert_eq!(
        responses
            .get("responses")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(1)
    );
}

#[test]
fn invalid_option_and_bad_rating_are_typed_rejections() {
    let workspace = temp_dir("feedbackd-bad-answers");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace.to_string_lossy());

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "responses.submit",
        json!({
            "formId": seeded.form_id,
            "studentId": seeded.student_id,
            "answers": [
                { "questionId": seeded.rating_qid, "rating": 4 },
                { "questionId": seeded.choice_qid, "selectedOption": "Absolutely perfect" }
            ]
        }),
        "invalid_option",
    );

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "responses.submit",
        json!({
            "formId": seeded.form_id,
            "studentId": seeded.student_id,
            "answers": [
                { "questionId": seeded.rating_qid, "rating": 9 }
            ]
        }),
        "bad_rating",
    );

    // Neither rejection left a partial response behind.
    let responses = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "responses.list",
        json!({ "formId": seeded.form_id }),
    );
    assert_eq!(
        responses
            .get("responses")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
}

#[test]
fn required_question_must_be_answered() {
    let workspace = temp_dir("feedbackd-required");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace.to_string_lossy());

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "responses.submit",
        json!({
            "formId": seeded.form_id,
            "studentId": seeded.student_id,
            "answers": [
                { "questionId": seeded.choice_qid, "selectedOption": "Just right" }
            ]
        }),
        "missing_required",
    );
}

#[test]
fn closed_forms_do_not_accept_responses() {
    let workspace = temp_dir("feedbackd-closed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace.to_string_lossy());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "forms.setStatus",
        json!({ "formId": seeded.form_id, "status": "closed" }),
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "responses.submit",
        json!({
            "formId": seeded.form_id,
            "studentId": seeded.student_id,
            "answers": [ { "questionId": seeded.rating_qid, "rating": 5 } ]
        }),
        "form_not_open",
    );
}

#[test]
fn legacy_generic_answer_field_is_accepted() {
    let workspace = temp_dir("feedbackd-legacy-answer");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace.to_string_lossy());

    // Older clients send the generic answer slot instead of the typed one.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "responses.submit",
        json!({
            "formId": seeded.form_id,
            "studentId": seeded.student_id,
            "answers": [ { "questionId": seeded.rating_qid, "answer": "5" } ]
        }),
    );
    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.form.stats",
        json!({
            "formId": seeded.form_id,
            "viewerRole": "system_admin"
        }),
    );
    let rating = stats
        .get("questions")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|q| q.get("rating"))
        .expect("rating stats");
    assert_eq!(rating.get("avgRating").and_then(|v| v.as_f64()), Some(5.0));
    assert_eq!(
        rating.get("totalResponses").and_then(|v| v.as_u64()),
        Some(1)
    );
}
