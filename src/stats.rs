use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::section::{self, MatchPolicy};

/// One decimal, plain arithmetic rounding. Rates and percentages.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Two decimals. Rating averages and trends.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StatsError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Rating,
    MultipleChoice,
    Text,
}

impl QuestionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "rating" => Some(QuestionKind::Rating),
            "multiple_choice" => Some(QuestionKind::MultipleChoice),
            "text" => Some(QuestionKind::Text),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Rating => "rating",
            QuestionKind::MultipleChoice => "multiple_choice",
            QuestionKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuestionDef {
    pub id: String,
    pub idx: i64,
    pub prompt: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub required: bool,
}

/// A stored answer as it comes off a response row. The four payload fields
/// reflect the historical submission paths; exactly one of them is expected
/// to carry the value, with `raw_answer` as the legacy generic slot.
#[derive(Debug, Clone, Default)]
pub struct AnswerRecord {
    pub question_id: Option<String>,
    pub question_idx: Option<i64>,
    pub rating: Option<i64>,
    pub selected_option: Option<String>,
    pub text_response: Option<String>,
    pub raw_answer: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub student_id: String,
    pub answers: Vec<AnswerRecord>,
}

/// The authoritative, typed form of an answer. Coercion happens once, here;
/// the aggregation below never looks at raw fields again.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Rating(i64),
    Choice(String),
    Text(String),
}

/// Coerce a stored answer into the tagged variant for its question's kind.
/// Structured fields win; the generic `raw_answer` is consulted only when
/// they are absent. Unusable values coerce to `None` and are simply not
/// counted.
pub fn coerce_answer(kind: QuestionKind, rec: &AnswerRecord) -> Option<Answer> {
    match kind {
        QuestionKind::Rating => {
            let value = rec.rating.or_else(|| raw_as_i64(rec.raw_answer.as_ref()))?;
            if (1..=5).contains(&value) {
                Some(Answer::Rating(value))
            } else {
                None
            }
        }
        QuestionKind::MultipleChoice => {
            let value = rec
                .selected_option
                .clone()
                .or_else(|| raw_as_string(rec.raw_answer.as_ref()))?;
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(Answer::Choice(trimmed.to_string()))
            }
        }
        QuestionKind::Text => {
            let value = rec
                .text_response
                .clone()
                .or_else(|| raw_as_string(rec.raw_answer.as_ref()))?;
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(Answer::Text(trimmed.to_string()))
            }
        }
    }
}

fn raw_as_i64(raw: Option<&serde_json::Value>) -> Option<i64> {
    let raw = raw?;
    if let Some(n) = raw.as_i64() {
        return Some(n);
    }
    if let Some(f) = raw.as_f64() {
        if f.fract() == 0.0 {
            return Some(f as i64);
        }
    }
    raw.as_str().and_then(|s| s.trim().parse::<i64>().ok())
}

fn raw_as_string(raw: Option<&serde_json::Value>) -> Option<String> {
    let raw = raw?;
    if let Some(s) = raw.as_str() {
        return Some(s.to_string());
    }
    if let Some(n) = raw.as_i64() {
        return Some(n.to_string());
    }
    None
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingStats {
    pub total_responses: u64,
    /// Arithmetic mean rounded to 2 decimals. `0.0` is the documented
    /// sentinel when nobody answered; check `total_responses` to tell the
    /// two apart.
    pub avg_rating: f64,
    /// Buckets 1..=5, always present, zero-initialized.
    pub distribution: BTreeMap<u8, u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionCount {
    pub option: String,
    pub count: u64,
    /// Share of respondents who answered this question, 1 decimal, `0.0`
    /// when nobody answered.
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceStats {
    pub total_answered: u64,
    pub options: Vec<OptionCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStats {
    pub count: u64,
    /// Raw entries, in submission order, duplicates preserved (a repeated
    /// complaint is signal). Redaction is the visibility layer's job.
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    pub question_id: String,
    pub prompt: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<RatingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<ChoiceStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextStats>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormStats {
    pub form_id: String,
    pub total_responses: u64,
    pub total_eligible: u64,
    /// `respondedCount / totalEligible × 100`, 1 decimal, `0.0` when there
    /// are no eligible students.
    pub response_rate: f64,
    /// Answers whose question reference resolves to nothing on the current
    /// form. Skipped, surfaced for operational visibility.
    pub orphan_answers: u64,
    /// Choice answers naming an option no longer in the question's option
    /// list. Dropped, not errored.
    pub stale_options: u64,
    pub questions: Vec<QuestionStats>,
}

impl FormStats {
    /// Form-level rating average: unweighted mean over this form's rating
    /// questions that received at least one answer. `None` when the form has
    /// no answered rating question; rollups skip such forms.
    pub fn overall_rating_average(&self) -> Option<f64> {
        let answered: Vec<f64> = self
            .questions
            .iter()
            .filter_map(|q| q.rating.as_ref())
            .filter(|r| r.total_responses > 0)
            .map(|r| r.avg_rating)
            .collect();
        if answered.is_empty() {
            return None;
        }
        Some(round2(answered.iter().sum::<f64>() / answered.len() as f64))
    }

    /// Sum and count of every individual rating on the form, recovered from
    /// the exact distributions. Feeds the pooled rollup metric.
    pub fn rating_totals(&self) -> (u64, u64) {
        let mut sum = 0u64;
        let mut count = 0u64;
        for q in &self.questions {
            if let Some(r) = &q.rating {
                for (bucket, n) in &r.distribution {
                    sum += u64::from(*bucket) * n;
                    count += n;
                }
            }
        }
        (sum, count)
    }
}

/// Optional section scope for [`aggregate_form`]: only responses from
/// students whose section matches one of these labels are counted.
#[derive(Debug, Clone)]
pub struct SectionScope {
    pub sections: Vec<String>,
    pub policy: MatchPolicy,
}

/// Aggregate one form's responses into per-question statistics.
///
/// Pure: every collection arrives from the caller, nothing is persisted.
/// `student_sections` maps student id to the raw section label from the
/// roster; `total_eligible` is the enrollment count for the form's target
/// sections and is the caller's to supply.
pub fn aggregate_form(
    form_id: &str,
    questions: &[QuestionDef],
    responses: &[ResponseRecord],
    student_sections: &HashMap<String, String>,
    total_eligible: u64,
    scope: Option<&SectionScope>,
) -> FormStats {
    let in_scope: Vec<&ResponseRecord> = match scope {
        None => responses.iter().collect(),
        Some(scope) => responses
            .iter()
            .filter(|r| {
                student_sections
                    .get(&r.student_id)
                    .map(|label| section::matches(label, &scope.sections, scope.policy))
                    .unwrap_or(false)
            })
            .collect(),
    };

    let by_id: HashMap<&str, &QuestionDef> =
        questions.iter().map(|q| (q.id.as_str(), q)).collect();
    let by_idx: HashMap<i64, &QuestionDef> = questions.iter().map(|q| (q.idx, q)).collect();

    let mut orphan_answers = 0u64;
    let mut stale_options = 0u64;
    let mut answers_by_question: HashMap<&str, Vec<Answer>> = HashMap::new();

    for response in &in_scope {
        for rec in &response.answers {
            // Resolve by stable question id; the index path is a best-effort
            // fallback for legacy rows written before answers carried ids.
            let question = match rec.question_id.as_deref() {
                Some(id) => by_id.get(id).copied(),
                None => rec.question_idx.and_then(|idx| by_idx.get(&idx).copied()),
            };
            let Some(question) = question else {
                orphan_answers += 1;
                continue;
            };
            let Some(answer) = coerce_answer(question.kind, rec) else {
                continue;
            };
            if let Answer::Choice(option) = &answer {
                if !question.options.iter().any(|o| o == option) {
                    stale_options += 1;
                    continue;
                }
            }
            answers_by_question
                .entry(question.id.as_str())
                .or_default()
                .push(answer);
        }
    }

    let mut question_stats = Vec::with_capacity(questions.len());
    for question in questions {
        let answers = answers_by_question
            .get(question.id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        question_stats.push(build_question_stats(question, answers));
    }

    let total_responses = in_scope.len() as u64;
    let response_rate = if total_eligible > 0 {
        round1(total_responses as f64 / total_eligible as f64 * 100.0)
    } else {
        0.0
    };

    FormStats {
        form_id: form_id.to_string(),
        total_responses,
        total_eligible,
        response_rate,
        orphan_answers,
        stale_options,
        questions: question_stats,
    }
}

fn build_question_stats(question: &QuestionDef, answers: &[Answer]) -> QuestionStats {
    let mut stats = QuestionStats {
        question_id: question.id.clone(),
        prompt: question.prompt.clone(),
        kind: question.kind.as_str(),
        rating: None,
        choices: None,
        text: None,
    };

    match question.kind {
        QuestionKind::Rating => {
            let mut distribution: BTreeMap<u8, u64> = (1..=5u8).map(|b| (b, 0)).collect();
            let mut sum = 0i64;
            let mut count = 0u64;
            for answer in answers {
                if let Answer::Rating(v) = answer {
                    sum += v;
                    count += 1;
                    *distribution.entry(*v as u8).or_insert(0) += 1;
                }
            }
            let avg_rating = if count > 0 {
                round2(sum as f64 / count as f64)
            } else {
                0.0
            };
            stats.rating = Some(RatingStats {
                total_responses: count,
                avg_rating,
                distribution,
            });
        }
        QuestionKind::MultipleChoice => {
            let mut counts: HashMap<&str, u64> = HashMap::new();
            let mut total = 0u64;
            for answer in answers {
                if let Answer::Choice(option) = answer {
                    *counts.entry(option.as_str()).or_insert(0) += 1;
                    total += 1;
                }
            }
            let options = question
                .options
                .iter()
                .map(|option| {
                    let count = counts.get(option.as_str()).copied().unwrap_or(0);
                    let percentage = if total > 0 {
                        round1(count as f64 / total as f64 * 100.0)
                    } else {
                        0.0
                    };
                    OptionCount {
                        option: option.clone(),
                        count,
                        percentage,
                    }
                })
                .collect();
            stats.choices = Some(ChoiceStats {
                total_answered: total,
                options,
            });
        }
        QuestionKind::Text => {
            let entries: Vec<String> = answers
                .iter()
                .filter_map(|a| match a {
                    Answer::Text(t) => Some(t.clone()),
                    _ => None,
                })
                .collect();
            stats.text = Some(TextStats {
                count: entries.len() as u64,
                entries,
            });
        }
    }

    stats
}
