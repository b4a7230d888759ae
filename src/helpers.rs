//! Small pure helpers used by the pipelines and as edge transforms

use crate::error::FlowError;
use crate::model::SubjectFiles;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Output field names of the data source, in positional order
pub const DATA_ITEMS: [&str; 5] = ["bold", "mask", "events", "regressors", "tr"];

/// Positional view of one subject's inputs (bold, mask, events, regressors, tr)
pub type SubjectTuple = (PathBuf, PathBuf, PathBuf, PathBuf, f64);

/// Pull one subject's bundle out of the mapping as a positional tuple
pub fn dict_ds(
    in_dict: &BTreeMap<String, SubjectFiles>,
    sub: &str,
) -> Result<SubjectTuple, FlowError> {
    let files = in_dict
        .get(sub)
        .ok_or_else(|| FlowError::MissingSubject(sub.to_string()))?;
    Ok((
        files.bold.clone(),
        files.mask.clone(),
        files.events.clone(),
        files.regressors.clone(),
        files.tr,
    ))
}

/// Number of items
pub fn len<T>(inlist: &[T]) -> usize {
    inlist.len()
}

/// Degrees of freedom of a one-sample group design
pub fn dof<T>(inlist: &[T]) -> i64 {
    inlist.len() as i64 - 1
}

pub fn neg(val: f64) -> f64 {
    -val
}

/// Round to `decimals` places, ties to even
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round_ties_even() / scale
}

/// Format a float like C's `%g` (six significant digits, trailing zeros dropped)
pub fn format_g(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let sci = format!("{:.5e}", value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if !(-4..6).contains(&exp) {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let precision = (5 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", precision, value)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
