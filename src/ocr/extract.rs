//! Turns recognized text into a blood pressure reading.
//!
//! The parser is an ordered cascade of heuristics, most structured first.
//! The first method that produces a plausible reading wins; later methods
//! are never consulted.

use regex::Regex;
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::LazyLock;

use crate::error::{ReadingError, Result};
use crate::log;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid number regex"));

/// Systolic labels, including the usual S/5 confusions.
static SYS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)SYS[:\s=]*(\d{2,3})",
        r"(?i)5Y5[:\s=]*(\d{2,3})",
        r"(?i)SY5[:\s=]*(\d{2,3})",
        r"(?i)S\s*Y\s*S[:\s=]*(\d{2,3})",
        r"(?i)S\s*Y\s*5[:\s=]*(\d{2,3})",
    ])
});

/// Diastolic labels, including I/1 confusions.
static DIA_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)DIA[:\s=]*(\d{2,3})",
        r"(?i)D1A[:\s=]*(\d{2,3})",
        r"(?i)D\s*I\s*A[:\s=]*(\d{2,3})",
        r"(?i)D\s*1\s*A[:\s=]*(\d{2,3})",
    ])
});

/// Two numbers split by a slash or something the recognizer mistook for one.
static SEPARATOR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(\d{2,3})\s*/\s*(\d{2,3})",
        r"(\d{2,3})\s*[|\\]\s*(\d{2,3})",
        r"(\d{2,3})\s*[Il1]\s*(\d{2,3})",
        r"(\d{2,3})\s+(\d{2,3})",
        r"(\d{2,3})\s*:\s*(\d{2,3})",
    ])
});

static PULSE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)PULSE[:\s=]*(\d+)",
        r"(?i)PUL5E[:\s=]*(\d+)",
        r"(?i)P\s*U\s*L\s*S\s*E[:\s=]*(\d+)",
        r"(?i)P[:\s=]*(\d+)",
        r"(?i)BPM[:\s=]*(\d+)",
        r"(?i)/\s*min[:\s=]*(\d+)",
    ])
});

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid reading regex"))
        .collect()
}

const PULSE_RANGE: RangeInclusive<u32> = 40..=150;
const TYPICAL_PULSE: RangeInclusive<u32> = 60..=100;

/// Accepting region for a (systolic, diastolic) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityBand {
    pub systolic: RangeInclusive<u32>,
    pub diastolic: RangeInclusive<u32>,
    pub difference: RangeInclusive<u32>,
}

/// Typical clinical readings.
pub const STRICT_BAND: ValidityBand = ValidityBand {
    systolic: 80..=200,
    diastolic: 50..=130,
    difference: 20..=80,
};

/// Boundary readings. Every strict reading is also loose.
pub const LOOSE_BAND: ValidityBand = ValidityBand {
    systolic: 70..=250,
    diastolic: 40..=150,
    difference: 10..=100,
};

impl ValidityBand {
    pub fn accepts(&self, systolic: u32, diastolic: u32) -> bool {
        systolic > diastolic
            && self.systolic.contains(&systolic)
            && self.diastolic.contains(&diastolic)
            && self.difference.contains(&(systolic - diastolic))
    }
}

/// True if the pair falls in the strict or the loose band.
pub fn is_valid_blood_pressure(systolic: u32, diastolic: u32) -> bool {
    STRICT_BAND.accepts(systolic, diastolic) || LOOSE_BAND.accepts(systolic, diastolic)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BloodPressureReading {
    pub systolic: u32,
    pub diastolic: u32,
    pub pulse: Option<u32>,
}

/// What the parser does when no method succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Fail with `NoReadingFound`
    Required,
    /// Return `None`
    Speculative,
}

/// Text plus every digit run in it, in order of appearance.
struct ParseInput<'a> {
    text: &'a str,
    numbers: Vec<u32>,
}

impl<'a> ParseInput<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            numbers: all_numbers(text),
        }
    }

    /// Numbers within `range`, largest first.
    fn largest_in(&self, range: RangeInclusive<u32>) -> Vec<u32> {
        let mut nums: Vec<u32> = self
            .numbers
            .iter()
            .copied()
            .filter(|n| range.contains(n))
            .collect();
        nums.sort_unstable_by(|a, b| b.cmp(a));
        nums
    }

    fn reading(&self, systolic: u32, diastolic: u32) -> BloodPressureReading {
        BloodPressureReading {
            systolic,
            diastolic,
            pulse: extract_pulse(self.text, &[systolic, diastolic]),
        }
    }
}

/// Digit runs too long for u32 keep their position but never fall in range.
fn all_numbers(text: &str) -> Vec<u32> {
    NUMBER
        .find_iter(text)
        .map(|m| m.as_str().parse().unwrap_or(u32::MAX))
        .collect()
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<u32> {
    patterns
        .iter()
        .find_map(|p| p.captures(text))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

type ParseMethod = fn(&ParseInput) -> Option<BloodPressureReading>;

/// Parser cascade, tried in order.
const METHODS: &[(&str, ParseMethod)] = &[
    ("keyword pair", keyword_pair),
    ("partial keyword", partial_keyword),
    ("separator pair", separator_pair),
    ("global numbers", global_numbers),
    ("pairwise scan", pairwise_scan),
    ("extreme tolerance", extreme_tolerance),
    ("digit merge", digit_merge),
];

/// Parses recognized text into a reading.
///
/// Blank text and text no method can read fail with `NoReadingFound` in
/// `Required` mode and give `Ok(None)` in `Speculative` mode.
pub fn parse_reading(text: &str, mode: ParseMode) -> Result<Option<BloodPressureReading>> {
    let text = text.trim();
    let found = if text.is_empty() {
        None
    } else {
        let input = ParseInput::new(text);
        METHODS.iter().find_map(|(name, method)| {
            method(&input).inspect(|reading| {
                log(&format!(
                    "Parsed with {}: {}/{} pulse {:?}",
                    name, reading.systolic, reading.diastolic, reading.pulse
                ));
            })
        })
    };

    match (found, mode) {
        (Some(reading), _) => Ok(Some(reading)),
        (None, ParseMode::Speculative) => Ok(None),
        (None, ParseMode::Required) => Err(ReadingError::NoReadingFound(text.to_string())),
    }
}

/// Labelled SYS and DIA values.
fn keyword_pair(input: &ParseInput) -> Option<BloodPressureReading> {
    let systolic = first_capture(&SYS_PATTERNS, input.text)?;
    let diastolic = first_capture(&DIA_PATTERNS, input.text)?;
    STRICT_BAND
        .accepts(systolic, diastolic)
        .then(|| input.reading(systolic, diastolic))
}

/// One label found; the partner comes from the remaining numbers.
fn partial_keyword(input: &ParseInput) -> Option<BloodPressureReading> {
    let sys_label = first_capture(&SYS_PATTERNS, input.text);
    let dia_label = first_capture(&DIA_PATTERNS, input.text);
    if input.numbers.len() < 2 {
        return None;
    }

    let nums = input.largest_in(50..=200);
    if nums.len() < 2 {
        return None;
    }

    let (systolic, diastolic) = if let Some(systolic) = sys_label {
        let diastolic = nums
            .iter()
            .copied()
            .find(|&n| n != systolic && n < systolic && (50..=130).contains(&n))
            .unwrap_or(nums[1]);
        (systolic, diastolic)
    } else if let Some(diastolic) = dia_label {
        let systolic = nums
            .iter()
            .copied()
            .find(|&n| n != diastolic && n > diastolic && (80..=200).contains(&n))
            .unwrap_or(nums[0]);
        (systolic, diastolic)
    } else {
        return None;
    };

    STRICT_BAND
        .accepts(systolic, diastolic)
        .then(|| input.reading(systolic, diastolic))
}

/// `138/75` and the shapes a slash turns into after recognition.
fn separator_pair(input: &ParseInput) -> Option<BloodPressureReading> {
    SEPARATOR_PATTERNS.iter().find_map(|pattern| {
        let caps = pattern.captures(input.text)?;
        let first: u32 = caps.get(1)?.as_str().parse().ok()?;
        let second: u32 = caps.get(2)?.as_str().parse().ok()?;
        let (systolic, diastolic) = if first <= second {
            (second, first)
        } else {
            (first, second)
        };
        STRICT_BAND
            .accepts(systolic, diastolic)
            .then(|| input.reading(systolic, diastolic))
    })
}

/// Two largest plausible numbers anywhere in the text.
fn global_numbers(input: &ParseInput) -> Option<BloodPressureReading> {
    if input.numbers.len() < 2 {
        return None;
    }

    let nums = input.largest_in(50..=200);
    if nums.len() >= 2 && STRICT_BAND.accepts(nums[0], nums[1]) {
        return Some(input.reading(nums[0], nums[1]));
    }

    let nums = input.largest_in(40..=250);
    if nums.len() >= 2 {
        let (systolic, diastolic) = (nums[0], nums[1]);
        if (60..=250).contains(&systolic)
            && (30..=150).contains(&diastolic)
            && systolic > diastolic
        {
            return Some(input.reading(systolic, diastolic));
        }
    }

    None
}

/// First pair of numbers, in text order, that looks like a loose reading.
/// A third number becomes the pulse.
fn pairwise_scan(input: &ParseInput) -> Option<BloodPressureReading> {
    let nums = &input.numbers;
    if nums.len() < 3 {
        return None;
    }

    for i in 0..nums.len() - 1 {
        for j in i + 1..nums.len() {
            let (systolic, diastolic) = if nums[i] < nums[j] {
                (nums[j], nums[i])
            } else {
                (nums[i], nums[j])
            };
            if !LOOSE_BAND.accepts(systolic, diastolic) {
                continue;
            }

            let pulse = nums
                .iter()
                .enumerate()
                .find(|&(k, n)| k != i && k != j && PULSE_RANGE.contains(n))
                .map(|(_, &n)| n)
                .or_else(|| extract_pulse(input.text, &[systolic, diastolic]));
            return Some(BloodPressureReading {
                systolic,
                diastolic,
                pulse,
            });
        }
    }

    None
}

/// Last numeric attempt: any ordered pair with a small gap.
fn extreme_tolerance(input: &ParseInput) -> Option<BloodPressureReading> {
    if input.numbers.len() < 2 {
        return None;
    }

    let nums = input.largest_in(20..=300);
    if nums.len() < 2 {
        return None;
    }

    let (systolic, diastolic) = (nums[0], nums[1]);
    let plausible = (50..=300).contains(&systolic)
        && (20..=200).contains(&diastolic)
        && systolic > diastolic
        && systolic - diastolic >= 5;
    plausible.then(|| input.reading(systolic, diastolic))
}

/// Rejoins digits split apart by the recognizer, as in `13 8` for `138`.
fn digit_merge(input: &ParseInput) -> Option<BloodPressureReading> {
    let numbers = &input.numbers;
    if numbers.len() < 2 {
        return None;
    }

    let mut merged = Vec::with_capacity(numbers.len());
    let mut i = 0;
    while i < numbers.len() {
        let num = numbers[i];
        if num < 100 {
            if let Some(&next) = numbers.get(i + 1).filter(|&&n| n < 10) {
                let joined = num * 10 + next;
                if (50..=200).contains(&joined) {
                    merged.push(joined);
                    i += 2;
                    continue;
                }
            }
        }
        merged.push(num);
        i += 1;
    }

    let mut nums: Vec<u32> = merged
        .into_iter()
        .filter(|n| (50..=200).contains(n))
        .collect();
    if nums.len() < 2 {
        return None;
    }
    nums.sort_unstable_by(|a, b| b.cmp(a));

    STRICT_BAND
        .accepts(nums[0], nums[1])
        .then(|| input.reading(nums[0], nums[1]))
}

/// Finds the pulse rate in `text`.
///
/// Labelled values win. Otherwise the unlabelled numbers in the pulse range,
/// minus one occurrence of each value in `consumed`, are scanned and the
/// first typical rate (60 to 100) is preferred over the first in range.
pub fn extract_pulse(text: &str, consumed: &[u32]) -> Option<u32> {
    let labelled = PULSE_PATTERNS
        .iter()
        .filter_map(|p| p.captures(text))
        .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
        .find(|n| PULSE_RANGE.contains(n));
    if labelled.is_some() {
        return labelled;
    }

    let mut remaining = all_numbers(text);
    for value in consumed {
        if let Some(pos) = remaining.iter().position(|n| n == value) {
            remaining.remove(pos);
        }
    }

    let candidates: Vec<u32> = remaining
        .into_iter()
        .filter(|n| PULSE_RANGE.contains(n))
        .collect();
    candidates
        .iter()
        .copied()
        .find(|n| TYPICAL_PULSE.contains(n))
        .or_else(|| candidates.first().copied())
}
