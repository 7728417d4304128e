//! Camera pixel -> seat plane mapping.

use anyhow::Result;

use crate::calibration::CalibrationTransform;
use crate::detect::Detection;
use crate::{ErrorKind, Label, PixelPoint, SeatError, SeatPoint};

/// Fixed shift from the transformed origin to the seat-plane origin used at provisioning.
pub const OFFSET_X: i64 = 300;
pub const OFFSET_Y: i64 = 220;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedDetection {
    pub label: Label,
    pub position: SeatPoint,
}

/// Transform, truncate toward zero, then offset.
pub fn map_point(pixel: PixelPoint, transform: &CalibrationTransform) -> Result<SeatPoint> {
    let (tx, ty) = transform.apply(pixel)?;
    Ok(SeatPoint::new(
        offset_axis(tx, OFFSET_X, pixel)?,
        offset_axis(ty, OFFSET_Y, pixel)?,
    ))
}

// i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn offset_axis(value: f64, offset: i64, pixel: PixelPoint) -> Result<i64> {
    let truncated = value.trunc();
    let out_of_range = || -> anyhow::Error {
        SeatError::new(
            ErrorKind::InvalidTransform,
            format!(
                "pixel ({}, {}) maps outside the seat plane ({})",
                pixel.x, pixel.y, value
            ),
        )
        .into()
    };
    if !(-I64_LIMIT..I64_LIMIT).contains(&truncated) {
        return Err(out_of_range());
    }
    (truncated as i64).checked_add(offset).ok_or_else(out_of_range)
}

pub fn map_detections(
    detections: &[Detection],
    transform: &CalibrationTransform,
) -> Result<Vec<MappedDetection>> {
    detections
        .iter()
        .map(|d| {
            Ok(MappedDetection {
                label: d.label,
                position: map_point(d.pixel, transform)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_only_adds_offset() {
        let p = map_point(PixelPoint::new(200, 180), &CalibrationTransform::identity()).unwrap();
        assert_eq!(p, SeatPoint::new(500, 400));
    }

    #[test]
    fn truncates_toward_zero_before_offset() {
        let t = CalibrationTransform::new([[0.5, 0.0, 0.0], [0.0, 0.5, 0.0], [0.0, 0.0, 1.0]])
            .unwrap();
        // 0.5 * 7 = 3.5 -> 3 ; 0.5 * -7 = -3.5 -> -3
        let p = map_point(PixelPoint::new(7, -7), &t).unwrap();
        assert_eq!(p, SeatPoint::new(303, 217));
    }

    #[test]
    fn projection_beyond_integer_range_is_invalid() {
        let t = CalibrationTransform::new([[1e19, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
            .unwrap();
        let err = map_point(PixelPoint::new(1, 1), &t).unwrap_err();
        assert_eq!(crate::error_kind(&err), Some(ErrorKind::InvalidTransform));
    }

    #[test]
    fn largest_projection_below_limit_still_maps() {
        // Largest f64 below 2^63; the offset still fits in i64.
        let edge = 9_223_372_036_854_774_784.0;
        let t = CalibrationTransform::new([[edge, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
            .unwrap();
        let p = map_point(PixelPoint::new(1, 1), &t).unwrap();
        assert_eq!(p.x, i64::MAX - 1023 + OFFSET_X);
        assert_eq!(p.y, 1 + OFFSET_Y);

        let err = map_point(PixelPoint::new(-2, 1), &t).unwrap_err();
        assert_eq!(crate::error_kind(&err), Some(ErrorKind::InvalidTransform));
    }

    #[test]
    fn maps_every_detection_in_order() {
        let t = CalibrationTransform::new([[1.0, 0.0, 10.0], [0.0, 1.0, 20.0], [0.0, 0.0, 1.0]])
            .unwrap();
        let detections = vec![
            Detection::new(Label::Object, PixelPoint::new(0, 0)),
            Detection::new(Label::Person, PixelPoint::new(5, 5)),
        ];
        let mapped = map_detections(&detections, &t).unwrap();
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].label, Label::Object);
        assert_eq!(mapped[0].position, SeatPoint::new(310, 240));
        assert_eq!(mapped[1].position, SeatPoint::new(315, 245));
    }
}
