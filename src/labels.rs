//! Class label normalization.
//!
//! Labels arrive in several hand-typed shapes (`1-2`, `一（2）班`, `1年级2班`, ...).
//! Recognized shapes collapse to the storage form `G-C`; anything else is kept
//! verbatim so unrelated free-form labels never merge.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedLabel {
    pub canonical: String,
    pub grade: Option<u32>,
    pub class_number: Option<u32>,
}

/// Injected into request state so callers never depend on the parsing rules.
pub type LabelNormalizer = fn(&str) -> NormalizedLabel;

#[derive(Debug, Clone, Copy)]
enum LabelForm {
    Dashed,
    ParenOnly,
    ChineseParen,
    ChineseGrade,
    NumericGrade,
    ClassOnly,
}

static PATTERNS: LazyLock<Vec<(Regex, LabelForm)>> = LazyLock::new(|| {
    [
        (r"^(\d+)-(\d+)$", LabelForm::Dashed),
        (r"^\((\d+)\)\s*班$", LabelForm::ParenOnly),
        (r"^([一二三四五六七八九十])（(\d+)）班$", LabelForm::ChineseParen),
        (r"^([一二三四五六七八九十])年级(\d+)班$", LabelForm::ChineseGrade),
        (r"^(\d+)年级(\d+)班$", LabelForm::NumericGrade),
        (r"^(\d+)班$", LabelForm::ClassOnly),
    ]
    .into_iter()
    .filter_map(|(pattern, form)| Regex::new(pattern).ok().map(|re| (re, form)))
    .collect()
});

const CHINESE_DIGITS: [&str; 10] = ["一", "二", "三", "四", "五", "六", "七", "八", "九", "十"];

fn chinese_numeral(s: &str) -> Option<u32> {
    CHINESE_DIGITS
        .iter()
        .position(|d| *d == s)
        .map(|i| i as u32 + 1)
}

// Zero is not a real grade or class; legacy data used it as "unset".
fn positive(n: u32) -> u32 {
    if n == 0 {
        1
    } else {
        n
    }
}

fn parse_grade_and_class(label: &str) -> Option<(u32, u32)> {
    for (re, form) in PATTERNS.iter() {
        let Some(caps) = re.captures(label) else {
            continue;
        };
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let parsed = match form {
            LabelForm::Dashed | LabelForm::NumericGrade => Some((num(1)?, num(2)?)),
            LabelForm::ParenOnly | LabelForm::ClassOnly => Some((1, num(1)?)),
            LabelForm::ChineseParen | LabelForm::ChineseGrade => {
                let grade = caps.get(1).and_then(|m| chinese_numeral(m.as_str()))?;
                Some((grade, num(2)?))
            }
        };
        return parsed.map(|(g, c)| (positive(g), positive(c)));
    }
    None
}

pub fn normalize_class_label(label: &str) -> NormalizedLabel {
    let trimmed = label.trim();
    match parse_grade_and_class(trimmed) {
        Some((grade, class_number)) => NormalizedLabel {
            canonical: format!("{}-{}", grade, class_number),
            grade: Some(grade),
            class_number: Some(class_number),
        },
        None => NormalizedLabel {
            canonical: trimmed.to_string(),
            grade: None,
            class_number: None,
        },
    }
}

pub fn grade_name(grade: u32) -> String {
    match grade {
        1..=10 => format!("{}年级", CHINESE_DIGITS[(grade - 1) as usize]),
        _ => format!("{}年级", grade),
    }
}

pub fn display_label(grade: u32, class_number: u32) -> String {
    let grade_part = match grade {
        1..=10 => CHINESE_DIGITS[(grade - 1) as usize].to_string(),
        _ => grade.to_string(),
    };
    format!("{}（{}）班", grade_part, class_number)
}
