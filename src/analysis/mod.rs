//! Normal/abnormal verdict for a reading.
//!
//! A formula computes an expected systolic value from the reading; the
//! reading is normal when the actual systolic is within `threshold` of it.

pub mod formula;

pub use formula::{Formula, FormulaError};

use serde::Serialize;

use crate::ocr::BloodPressureReading;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub is_normal: bool,
    pub formula: String,
    /// Formula result for this reading
    pub value: f64,
    /// `|value - systolic|`
    pub difference: f64,
    pub threshold: f64,
}

/// Evaluates `formula` with x = diastolic and y = systolic.
pub fn evaluate(
    reading: &BloodPressureReading,
    formula: Option<&str>,
    threshold: Option<f64>,
) -> Result<Assessment, FormulaError> {
    let formula = Formula::parse(formula.ok_or(FormulaError::MissingFormula)?)?;
    let threshold = threshold
        .filter(|t| !t.is_nan())
        .ok_or(FormulaError::MissingThreshold)?;

    let x = f64::from(reading.diastolic);
    let y = f64::from(reading.systolic);
    let value = formula.evaluate(x, y)?;
    let difference = (value - y).abs();
    let is_normal = difference <= threshold;

    crate::log(&format!(
        "Assessment: formula={} x={} y={} value={} difference={} threshold={} normal={}",
        formula.source(),
        x,
        y,
        value,
        difference,
        threshold,
        is_normal
    ));

    Ok(Assessment {
        is_normal,
        formula: formula.source().to_string(),
        value,
        difference,
        threshold,
    })
}
