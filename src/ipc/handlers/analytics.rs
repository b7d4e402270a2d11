use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_err, eligible_count, load_form, load_forms, load_questions, load_responses,
    load_student_sections, match_policy, optional_str, required_str, stats_err, FormRow,
};
use crate::ipc::types::{AppState, Request};
use crate::rollup::{self, FormInput, GroupBy, ViewerRole};
use crate::stats::{aggregate_form, SectionScope, StatsError};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn parse_viewer_role(req: &Request) -> Result<ViewerRole, serde_json::Value> {
    let raw = required_str(req, "viewerRole")?;
    ViewerRole::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "viewerRole must be one of: faculty, department_admin, system_admin",
            Some(json!({ "viewerRole": raw })),
        )
    })
}

fn parse_section_scope(req: &Request) -> Option<SectionScope> {
    let sections: Vec<String> = req
        .params
        .get("sections")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if sections.is_empty() {
        return None;
    }
    Some(SectionScope {
        sections,
        policy: match_policy(req),
    })
}

fn handle_form_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let form_id = match required_str(req, "formId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let viewer = match parse_viewer_role(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scope = parse_section_scope(req);
    let policy = match_policy(req);

    let form = match load_form(conn, &form_id) {
        Ok(Some(f)) => f,
        Ok(None) => return err(&req.id, "not_found", "form not found", None),
        Err(e) => return stats_err(&req.id, e),
    };
    let questions = match load_questions(conn, &form_id) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };
    let responses = match load_responses(conn, &form_id) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };
    let student_sections = match load_student_sections(conn) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };

    // Enrollment denominator: the scope narrows it when present, otherwise
    // the form's own target sections define eligibility.
    let eligible = match &scope {
        Some(s) => eligible_count(&student_sections, &s.sections, s.policy),
        None => eligible_count(&student_sections, &form.target_sections, policy),
    };

    let mut stats = aggregate_form(
        &form_id,
        &questions,
        &responses,
        &student_sections,
        eligible,
        scope.as_ref(),
    );
    if !viewer.can_view_confidential() {
        rollup::redact_text(&mut stats);
    }

    match serde_json::to_value(&stats) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "serialize_failed", e.to_string(), None),
    }
}

struct FacultyMeta {
    name: String,
    department: String,
}

fn load_faculty_meta(conn: &Connection) -> Result<HashMap<String, FacultyMeta>, StatsError> {
    let mut stmt = conn
        .prepare("SELECT id, name, department FROM faculty")
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            FacultyMeta {
                name: r.get(1)?,
                department: r.get(2)?,
            },
        ))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(db_err)
}

fn load_course_labels(conn: &Connection) -> Result<HashMap<String, String>, StatsError> {
    let mut stmt = conn
        .prepare("SELECT id, code FROM course_offerings")
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(db_err)
}

fn build_form_input(
    conn: &Connection,
    form: &FormRow,
    faculty: &HashMap<String, FacultyMeta>,
    courses: &HashMap<String, String>,
    student_sections: &HashMap<String, String>,
    policy: crate::section::MatchPolicy,
) -> Result<FormInput, StatsError> {
    let questions = load_questions(conn, &form.id)?;
    let responses = load_responses(conn, &form.id)?;
    let eligible = eligible_count(student_sections, &form.target_sections, policy);
    let stats = aggregate_form(
        &form.id,
        &questions,
        &responses,
        student_sections,
        eligible,
        None,
    );

    let meta = faculty.get(&form.faculty_id);
    let (course_key, course_label) = match &form.course_offering_id {
        Some(id) => (
            id.clone(),
            courses.get(id).cloned().unwrap_or_else(|| id.clone()),
        ),
        None => {
            let name = form.course_name.clone().unwrap_or_default();
            (name.clone(), name)
        }
    };

    Ok(FormInput {
        form_id: form.id.clone(),
        title: form.title.clone(),
        faculty_id: form.faculty_id.clone(),
        faculty_name: meta.map(|m| m.name.clone()).unwrap_or_default(),
        department: meta.map(|m| m.department.clone()).unwrap_or_default(),
        course_key,
        course_label,
        target_sections: form.target_sections.clone(),
        open_date: form
            .open_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        stats,
    })
}

fn handle_rollup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let group_by_raw = match required_str(req, "groupBy") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(group_by) = GroupBy::parse(&group_by_raw) else {
        return err(
            &req.id,
            "bad_params",
            "groupBy must be one of: faculty, course, section, department",
            Some(json!({ "groupBy": group_by_raw })),
        );
    };
    let viewer = match parse_viewer_role(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let faculty_filter = optional_str(req, "facultyId");
    let policy = match_policy(req);

    let forms = match load_forms(conn, faculty_filter.as_deref()) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };
    let faculty = match load_faculty_meta(conn) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };
    let courses = match load_course_labels(conn) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };
    let student_sections = match load_student_sections(conn) {
        Ok(v) => v,
        Err(e) => return stats_err(&req.id, e),
    };

    let mut inputs = Vec::with_capacity(forms.len());
    for form in &forms {
        match build_form_input(conn, form, &faculty, &courses, &student_sections, policy) {
            Ok(input) => inputs.push(input),
            Err(e) => return stats_err(&req.id, e),
        }
    }

    let view = rollup::rollup(&inputs, group_by, viewer);
    match serde_json::to_value(&view) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "serialize_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.form.stats" => Some(handle_form_stats(state, req)),
        "analytics.rollup" => Some(handle_rollup(state, req)),
        _ => None,
    }
}
