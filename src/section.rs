use std::collections::BTreeSet;

/// Section labels are free text entered through several independent paths
/// (bulk imports, manual assignment, form creation), so the same physical
/// section shows up as `"A"`, `"1A"`, `"01A"`, `"Section: A"`, `" a "`.
/// Everything that compares sections goes through this module; nothing else
/// in the crate is allowed to compare labels with `==`.
///
/// Known prefixes stripped during normalization, longest first.
const PREFIXES: [&str; 3] = ["SECTION", "SEC", "S"];

/// Canonical form of a raw section label: uppercase, trimmed, known prefix
/// stripped, whitespace and hyphens removed, leading zeros removed.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)` for every input.
/// The pass below runs to a fixpoint to keep that true for inputs like
/// `"-SEC-A"` where hyphen removal re-exposes a strippable prefix.
///
/// Empty, whitespace-only, or prefix-only input normalizes to `""`, which is
/// the "unknown section" value and never matches anything.
pub fn normalize(raw: &str) -> String {
    let mut cur = raw.to_string();
    loop {
        let next = normalize_pass(&cur);
        if next == cur {
            return next;
        }
        cur = next;
    }
}

fn normalize_pass(raw: &str) -> String {
    let mut s = raw.trim().to_uppercase();

    for prefix in PREFIXES {
        if let Some(rest) = s.strip_prefix(prefix) {
            let rest = rest
                .strip_prefix([':', '-'])
                .unwrap_or(rest)
                .trim_start()
                .to_string();
            s = rest;
            break;
        }
    }

    let s: String = s.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();

    let stripped = s.trim_start_matches('0');
    stripped.to_string()
}

/// Leading digit run removed, e.g. `"2A"` -> `"A"`. Used by the tier-2
/// fallback in [`matches`] and by canonical grouping keys.
pub fn strip_leading_digits(label: &str) -> &str {
    label.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn leading_digits(label: &str) -> &str {
    let rest = strip_leading_digits(label);
    &label[..label.len() - rest.len()]
}

/// Textual forms treated as equivalent to `label` for fast-path matching.
///
/// Built from the trimmed, uppercased label rather than the canonical form;
/// the set also has to hit legacy rows stored exactly as entered. Members:
/// - the label itself;
/// - `"1"`/`"01"` prepended when the label starts with a letter (one import
///   path wrote bare letters, another wrote year-prefixed codes for the same
///   section);
/// - leading digits stripped and leading zeros removed when it starts with a
///   digit;
/// - the lowercase twin of every member, since stored values keep their
///   original casing.
///
/// At most 6 members. Deterministic order so the set can back a storage
/// membership query. Empty label yields an empty set.
pub fn variants(label: &str) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    let upper = label.trim().to_uppercase();
    if upper.is_empty() {
        return set;
    }

    set.insert(upper.clone());
    match upper.chars().next() {
        Some(c) if c.is_ascii_digit() => {
            let stripped = strip_leading_digits(&upper);
            if !stripped.is_empty() {
                set.insert(stripped.to_string());
            }
            let no_zeros = upper.trim_start_matches('0');
            if !no_zeros.is_empty() {
                set.insert(no_zeros.to_string());
            }
        }
        Some(_) => {
            set.insert(format!("1{}", upper));
            set.insert(format!("01{}", upper));
        }
        None => {}
    }

    let lowered: Vec<String> = set.iter().map(|v| v.to_lowercase()).collect();
    set.extend(lowered);
    set
}

/// Matching policy. The default keeps the legacy digit-stripping fallback
/// exactly as the historical data depends on it; `strict_year_prefix`
/// additionally requires equal leading digit runs on both sides before a
/// tier-2 match, closing the cross-year false positive at the cost of
/// behavior parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchPolicy {
    pub strict_year_prefix: bool,
}

/// Whether any of `candidates` names the same section as `subject`.
///
/// Two tiers, short-circuiting:
/// 1. direct/variant: candidate (trimmed, uppercased) is a member of
///    `variants(subject)`;
/// 2. only when tier 1 missed for the whole candidate list: canonical forms
///    are equal, or the candidate's canonical form minus leading digits
///    equals the subject's canonical form.
///
/// Matching is many-to-many; no uniqueness is assumed at this layer.
/// Unusable labels on either side mean "no match", never an error.
pub fn matches<S: AsRef<str>>(subject: &str, candidates: &[S], policy: MatchPolicy) -> bool {
    let variant_set = variants(subject);
    if variant_set.is_empty() {
        return false;
    }

    for cand in candidates {
        let cand = cand.as_ref().trim().to_uppercase();
        if variant_set.contains(&cand) {
            return true;
        }
    }

    let subject_canon = normalize(subject);
    if subject_canon.is_empty() {
        return false;
    }

    for cand in candidates {
        let cand_canon = normalize(cand.as_ref());
        if cand_canon.is_empty() {
            continue;
        }
        if cand_canon == subject_canon {
            return true;
        }
        if strip_leading_digits(&cand_canon) == subject_canon {
            if policy.strict_year_prefix {
                // The digit-stripped bridge equates a bare-letter subject
                // with every year's section of that letter. Under the strict
                // policy only the implicit year-1 omission is bridged.
                let sub_digits = leading_digits(&subject_canon);
                let cand_digits = leading_digits(&cand_canon);
                if sub_digits.is_empty() && cand_digits == "1" {
                    return true;
                }
                continue;
            }
            return true;
        }
    }

    false
}

/// Batch form: the subset of `items` whose target-section list matches
/// `subject`. `targets` pulls the candidate labels out of each item so the
/// same filter serves forms, rosters, and scope checks.
pub fn filter_matching<'a, T, F>(
    subject: &str,
    items: &'a [T],
    policy: MatchPolicy,
    targets: F,
) -> Vec<&'a T>
where
    F: Fn(&T) -> &[String],
{
    items
        .iter()
        .filter(|item| matches(subject, targets(item), policy))
        .collect()
}
