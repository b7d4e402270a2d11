use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

use crate::section;
use crate::stats::{round2, FormStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Faculty,
    Course,
    Section,
    Department,
}

impl GroupBy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "faculty" => Some(GroupBy::Faculty),
            "course" => Some(GroupBy::Course),
            "section" => Some(GroupBy::Section),
            "department" => Some(GroupBy::Department),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupBy::Faculty => "faculty",
            GroupBy::Course => "course",
            GroupBy::Section => "section",
            GroupBy::Department => "department",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerRole {
    Faculty,
    DepartmentAdmin,
    SystemAdmin,
}

impl ViewerRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "faculty" => Some(ViewerRole::Faculty),
            "department_admin" => Some(ViewerRole::DepartmentAdmin),
            "system_admin" => Some(ViewerRole::SystemAdmin),
            _ => None,
        }
    }

    pub fn can_view_confidential(self) -> bool {
        matches!(self, ViewerRole::DepartmentAdmin | ViewerRole::SystemAdmin)
    }
}

/// One form plus its computed stats, as handed in by the caller. Grouping
/// never goes back to storage; everything it needs rides on this struct.
#[derive(Debug, Clone)]
pub struct FormInput {
    pub form_id: String,
    pub title: String,
    pub faculty_id: String,
    pub faculty_name: String,
    pub department: String,
    /// Offering id when the form is linked to one, else the free-text course
    /// name. Raw foreign-key equality is the grouping rule for courses.
    pub course_key: String,
    pub course_label: String,
    pub target_sections: Vec<String>,
    pub open_date: Option<NaiveDate>,
    pub stats: FormStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSummary {
    pub form_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_rating: Option<f64>,
    pub total_responses: u64,
    pub response_rate: f64,
    pub stats: FormStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupGroup {
    pub key: String,
    pub label: String,
    pub form_count: usize,
    pub rated_form_count: usize,
    pub total_responses: u64,
    /// Unweighted average of per-form averages: each form is one data point
    /// regardless of how many students answered it, so a high-volume form
    /// cannot dominate the group score. This is the default reported metric.
    pub avg_rating: f64,
    /// Pooled mean over every individual rating in the group, reported
    /// alongside for consumers that want volume-weighted numbers.
    pub pooled_avg_rating: f64,
    /// Last per-form average minus the first, in open-date order, 2
    /// decimals. `0.0` with fewer than two rated forms.
    pub trend: f64,
    pub forms: Vec<FormSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LowPerformer {
    pub faculty_id: String,
    pub faculty_name: String,
    pub avg_rating: f64,
    pub rated_form_count: usize,
}

/// Admin-only department insights. Never constructed for a faculty viewer;
/// the field carrying it is skipped entirely when absent so a redacted view
/// cannot even leak the key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidentialReport {
    pub low_performing_faculty: Vec<LowPerformer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupView {
    pub group_by: &'static str,
    pub viewer_role: String,
    pub groups: Vec<RollupGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidential: Option<ConfidentialReport>,
}

const REDACTED: &str = "[redacted]";
const LOW_PERFORMANCE_THRESHOLD: f64 = 3.0;

/// Replace free-text entries with placeholders, preserving counts. Applied
/// to anything a faculty-scoped viewer receives.
pub fn redact_text(stats: &mut FormStats) {
    for question in &mut stats.questions {
        if let Some(text) = &mut question.text {
            for entry in &mut text.entries {
                *entry = REDACTED.to_string();
            }
        }
    }
}

/// Compose per-form stats into a grouped analytics view.
///
/// Faculty and course groups key on raw foreign-key equality; section groups
/// key on the canonical section label, so `"1A"` and `"Section: A"` land in
/// the same bucket. A form targeting several sections contributes to each of
/// their groups.
pub fn rollup(forms: &[FormInput], group_by: GroupBy, viewer: ViewerRole) -> RollupView {
    // Key order of first appearance keeps the output deterministic without
    // imposing an ordering the caller didn't ask for.
    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, (String, Vec<&FormInput>)> = HashMap::new();

    for form in forms {
        for (key, label) in group_keys(form, group_by) {
            let entry = members.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                (label.clone(), Vec::new())
            });
            entry.1.push(form);
        }
    }

    let mut groups = Vec::with_capacity(order.len());
    for key in order {
        let (label, group_forms) = members.remove(&key).expect("group recorded in order");
        groups.push(build_group(key, label, &group_forms, viewer));
    }

    let confidential = if viewer.can_view_confidential() && group_by == GroupBy::Department {
        Some(build_confidential(forms))
    } else {
        None
    };

    RollupView {
        group_by: group_by.as_str(),
        viewer_role: match viewer {
            ViewerRole::Faculty => "faculty".to_string(),
            ViewerRole::DepartmentAdmin => "department_admin".to_string(),
            ViewerRole::SystemAdmin => "system_admin".to_string(),
        },
        groups,
        confidential,
    }
}

fn group_keys(form: &FormInput, group_by: GroupBy) -> Vec<(String, String)> {
    match group_by {
        GroupBy::Faculty => vec![(form.faculty_id.clone(), form.faculty_name.clone())],
        GroupBy::Course => vec![(form.course_key.clone(), form.course_label.clone())],
        GroupBy::Department => vec![(form.department.clone(), form.department.clone())],
        GroupBy::Section => {
            let mut keys: Vec<(String, String)> = Vec::new();
            for target in &form.target_sections {
                let canon = section::normalize(target);
                if canon.is_empty() {
                    continue;
                }
                if !keys.iter().any(|(k, _)| *k == canon) {
                    keys.push((canon, target.trim().to_string()));
                }
            }
            keys
        }
    }
}

fn build_group(
    key: String,
    label: String,
    forms: &[&FormInput],
    viewer: ViewerRole,
) -> RollupGroup {
    let mut ordered: Vec<&FormInput> = forms.to_vec();
    // Stable sort: undated forms keep their relative order at the end.
    ordered.sort_by_key(|f| (f.open_date.is_none(), f.open_date));

    let mut form_averages: Vec<f64> = Vec::new();
    let mut pooled_sum = 0u64;
    let mut pooled_count = 0u64;
    let mut total_responses = 0u64;
    let mut summaries = Vec::with_capacity(ordered.len());

    for form in &ordered {
        let avg = form.stats.overall_rating_average();
        if let Some(avg) = avg {
            form_averages.push(avg);
        }
        let (sum, count) = form.stats.rating_totals();
        pooled_sum += sum;
        pooled_count += count;
        total_responses += form.stats.total_responses;

        let mut stats = form.stats.clone();
        if !viewer.can_view_confidential() {
            redact_text(&mut stats);
        }
        summaries.push(FormSummary {
            form_id: form.form_id.clone(),
            title: form.title.clone(),
            open_date: form.open_date.map(|d| d.format("%Y-%m-%d").to_string()),
            avg_rating: avg,
            total_responses: form.stats.total_responses,
            response_rate: form.stats.response_rate,
            stats,
        });
    }

    let avg_rating = if form_averages.is_empty() {
        0.0
    } else {
        round2(form_averages.iter().sum::<f64>() / form_averages.len() as f64)
    };
    let pooled_avg_rating = if pooled_count > 0 {
        round2(pooled_sum as f64 / pooled_count as f64)
    } else {
        0.0
    };
    let trend = if form_averages.len() < 2 {
        0.0
    } else {
        round2(form_averages[form_averages.len() - 1] - form_averages[0])
    };

    RollupGroup {
        key,
        label,
        form_count: ordered.len(),
        rated_form_count: form_averages.len(),
        total_responses,
        avg_rating,
        pooled_avg_rating,
        trend,
        forms: summaries,
    }
}

fn build_confidential(forms: &[FormInput]) -> ConfidentialReport {
    let mut order: Vec<&str> = Vec::new();
    let mut by_faculty: HashMap<&str, (&str, Vec<f64>)> = HashMap::new();
    for form in forms {
        let Some(avg) = form.stats.overall_rating_average() else {
            continue;
        };
        let entry = by_faculty
            .entry(form.faculty_id.as_str())
            .or_insert_with(|| {
                order.push(form.faculty_id.as_str());
                (form.faculty_name.as_str(), Vec::new())
            });
        entry.1.push(avg);
    }

    let mut low = Vec::new();
    for faculty_id in order {
        let (name, averages) = &by_faculty[faculty_id];
        if averages.len() < 2 {
            continue;
        }
        let avg = round2(averages.iter().sum::<f64>() / averages.len() as f64);
        if avg < LOW_PERFORMANCE_THRESHOLD {
            low.push(LowPerformer {
                faculty_id: faculty_id.to_string(),
                faculty_name: name.to_string(),
                avg_rating: avg,
                rated_form_count: averages.len(),
            });
        }
    }
    low.sort_by(|a, b| {
        a.avg_rating
            .partial_cmp(&b.avg_rating)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ConfidentialReport {
        low_performing_faculty: low,
    }
}
