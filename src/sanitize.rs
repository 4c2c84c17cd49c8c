//! Raw feature vector cleanup.
//!
//! Two separate checks guard the pipeline entrance:
//!
//! - [`check_range`] rejects requests whose values fall outside
//!   `[-VALUE_BOUND, VALUE_BOUND]`. The protocol layer runs it before anything
//!   else touches the vector.
//! - [`sanitize`] enforces the dimensionality and replaces non-finite values
//!   (`NaN -> 0.0`, `+inf -> 1.0`, `-inf -> -1.0`) instead of rejecting them.

use crate::error::InferenceError;

/// Number of hand landmarks reported per frame.
pub const LANDMARK_COUNT: usize = 21;

/// Length of a raw feature vector: 21 landmarks x (x, y, z).
pub const FEATURE_DIM: usize = LANDMARK_COUNT * 3;

/// Absolute bound on any coordinate accepted from a client.
pub const VALUE_BOUND: f32 = 10.0;

/// Validate the length of `raw` and replace non-finite values.
///
/// Pure; the input is never modified.
pub fn sanitize(raw: &[f32], expected_len: usize) -> Result<Vec<f32>, InferenceError> {
    if raw.len() != expected_len {
        return Err(InferenceError::InvalidDimension {
            expected: expected_len,
            actual: raw.len(),
        });
    }

    Ok(raw.iter().map(|&v| replace_non_finite(v)).collect())
}

#[inline]
fn replace_non_finite(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else if v == f32::INFINITY {
        1.0
    } else if v == f32::NEG_INFINITY {
        -1.0
    } else {
        v
    }
}

/// Reject the first element outside `[-bound, bound]`.
///
/// `NaN` compares false against both bounds and is left for [`sanitize`].
pub fn check_range(raw: &[f32], bound: f32) -> Result<(), InferenceError> {
    match raw
        .iter()
        .enumerate()
        .find(|&(_, &v)| v < -bound || v > bound)
    {
        Some((index, &value)) => Err(InferenceError::OutOfRangeValue {
            index,
            value,
            bound,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Vec<f32> {
        (0..FEATURE_DIM).map(|i| 0.1 * i as f32).collect()
    }

    #[test]
    fn rejects_wrong_length() {
        let err = sanitize(&[0.1; 50], FEATURE_DIM).unwrap_err();
        assert_eq!(
            err,
            InferenceError::InvalidDimension {
                expected: 63,
                actual: 50
            }
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert!(sanitize(&[], FEATURE_DIM).is_err());
    }

    #[test]
    fn replaces_non_finite_values() {
        let mut raw = ramp();
        raw[0] = f32::NAN;
        raw[1] = f32::INFINITY;
        raw[2] = f32::NEG_INFINITY;

        let clean = sanitize(&raw, FEATURE_DIM).unwrap();
        assert_eq!(clean[0], 0.0);
        assert_eq!(clean[1], 1.0);
        assert_eq!(clean[2], -1.0);
        assert_eq!(&clean[3..], &raw[3..]);
    }

    #[test]
    fn finite_values_pass_through() {
        let raw = ramp();
        assert_eq!(sanitize(&raw, FEATURE_DIM).unwrap(), raw);
    }

    #[test]
    fn idempotent() {
        let mut raw = ramp();
        raw[10] = f32::NAN;
        raw[20] = f32::NEG_INFINITY;
        let once = sanitize(&raw, FEATURE_DIM).unwrap();
        let twice = sanitize(&once, FEATURE_DIM).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn range_check_reports_first_offender() {
        let mut raw = ramp();
        raw[4] = 100.0;
        raw[7] = -11.0;
        match check_range(&raw, VALUE_BOUND) {
            Err(InferenceError::OutOfRangeValue { index, value, .. }) => {
                assert_eq!(index, 4);
                assert_eq!(value, 100.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn range_check_is_inclusive() {
        let mut raw = vec![0.0; FEATURE_DIM];
        raw[0] = 10.0;
        raw[1] = -10.0;
        assert!(check_range(&raw, VALUE_BOUND).is_ok());
    }

    #[test]
    fn range_check_ignores_nan() {
        let mut raw = vec![0.0; FEATURE_DIM];
        raw[0] = f32::NAN;
        assert!(check_range(&raw, VALUE_BOUND).is_ok());
    }
}
