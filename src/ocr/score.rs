use regex::Regex;
use std::sync::LazyLock;

use super::extract::BloodPressureReading;

static LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)SYS|DIA|mmHg").expect("valid label regex"));
static SLASH_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2,3}\s*/\s*\d{2,3}").expect("valid slash regex"));

const BASE_SCORE: i32 = 100;

/// Ranks a parsed candidate against the text it came from. Higher is better.
///
/// Missing candidates and candidates with a zero pressure score 0.
pub fn score_candidate(reading: Option<&BloodPressureReading>, text: &str) -> i32 {
    let Some(reading) = reading else {
        return 0;
    };
    let (systolic, diastolic) = (reading.systolic, reading.diastolic);
    if systolic == 0 || diastolic == 0 {
        return 0;
    }

    let mut score = BASE_SCORE;

    if !(80..=200).contains(&systolic) {
        score -= 30;
    }
    if !(50..=130).contains(&diastolic) {
        score -= 30;
    }
    if systolic <= diastolic {
        score -= 20;
    }
    let difference = i64::from(systolic) - i64::from(diastolic);
    if !(20..=80).contains(&difference) {
        score -= 10;
    }

    if LABEL.is_match(text) {
        score += 20;
    }
    if SLASH_PAIR.is_match(text) {
        score += 15;
    }
    if reading.pulse.is_some_and(|p| (40..=150).contains(&p)) {
        score += 10;
    }

    score
}
