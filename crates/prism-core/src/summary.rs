//! Summary values: the mean colour of an image as a `#rrggbb` token.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EnvelopeError, ImageError};

/// A normalized, fixed-width colour token (`#rrggbb` or `#rrggbbaa`).
///
/// Values arriving off the wire are carried as-is; call
/// [`SummaryValue::is_well_formed`] before trusting one (e.g. as a directory
/// name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SummaryValue(String);

impl SummaryValue {
    /// Parse and normalize (lowercase) a colour token.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        let candidate = Self(s.to_ascii_lowercase());
        if candidate.is_well_formed() {
            Ok(candidate)
        } else {
            Err(EnvelopeError::InvalidSummary(s.to_string()))
        }
    }

    /// Wrap a raw token without validating it.
    pub(crate) fn from_wire(s: String) -> Self {
        Self(s)
    }

    /// `#` followed by exactly 6 or 8 hex digits.
    pub fn is_well_formed(&self) -> bool {
        match self.0.strip_prefix('#') {
            Some(hex) => {
                (hex.len() == 6 || hex.len() == 8) && hex.bytes().all(|b| b.is_ascii_hexdigit())
            }
            None => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SummaryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode per-channel means as a summary token.
///
/// Each component is rounded half away from zero and clamped to `[0, 255]`.
/// Three components give `#rrggbb`; a fourth (alpha) gives `#rrggbbaa`.
pub fn encode_summary(channels: &[f64]) -> Result<SummaryValue, ImageError> {
    if !(channels.len() == 3 || channels.len() == 4) || channels.iter().any(|c| c.is_nan()) {
        return Err(ImageError::Channels(channels.len()));
    }

    let mut token = String::with_capacity(1 + channels.len() * 2);
    token.push('#');
    for &c in channels {
        let byte = c.round().clamp(0.0, 255.0) as u8;
        token.push_str(&format!("{byte:02x}"));
    }
    Ok(SummaryValue(token))
}

/// Mean colour of every pixel in the image.
///
/// Images with an alpha channel produce four components; everything else is
/// converted to RGB first.
pub fn compute_summary(image: &DynamicImage) -> Result<SummaryValue, ImageError> {
    let means = if image.color().has_alpha() {
        channel_means(image.to_rgba8().as_raw(), 4)
    } else {
        channel_means(image.to_rgb8().as_raw(), 3)
    };
    let means = means.ok_or(ImageError::Decode("image has no pixels".to_string()))?;
    let summary = encode_summary(&means)?;
    tracing::debug!("Image processed, result mean: {:?}, hex: {}", means, summary);
    Ok(summary)
}

fn channel_means(samples: &[u8], channels: usize) -> Option<Vec<f64>> {
    let mut sums = vec![0u64; channels];
    let mut count = 0u64;
    for pixel in samples.chunks_exact(channels) {
        for (sum, &value) in sums.iter_mut().zip(pixel) {
            *sum += u64::from(value);
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(sums.into_iter().map(|s| s as f64 / count as f64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn test_encode_summary_known_values() {
        let cases: [(&[f64], &str); 5] = [
            (&[86.0, 84.0, 86.0], "#565456"),
            (&[94.0, 153.0, 256.0], "#5e99ff"),
            (&[159.0, 201.0, 126.0], "#9fc97e"),
            (&[158.89, 201.0, 126.49], "#9fc97e"),
            (&[158.89, 201.0, 126.49, 255.0], "#9fc97eff"),
        ];
        for (input, expected) in cases {
            assert_eq!(encode_summary(input).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_encode_summary_clamps_and_rounds() {
        let summary = encode_summary(&[-5.0, 300.0, 127.6]).unwrap();
        assert_eq!(summary.as_str(), "#00ff80");
    }

    #[test]
    fn test_encode_summary_rejects_bad_arity() {
        assert_eq!(encode_summary(&[1.0, 2.0]), Err(ImageError::Channels(2)));
        assert!(encode_summary(&[1.0, 2.0, 3.0, 4.0, 5.0]).is_err());
        assert!(encode_summary(&[1.0, f64::NAN, 3.0]).is_err());
    }

    #[test]
    fn test_compute_summary_solid_rgb() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([192, 192, 192])));
        assert_eq!(compute_summary(&img).unwrap().as_str(), "#c0c0c0");
    }

    #[test]
    fn test_compute_summary_mean_of_two_halves() {
        let mut img = RgbImage::from_pixel(2, 1, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([255, 100, 51]));
        let summary = compute_summary(&DynamicImage::ImageRgb8(img)).unwrap();
        // (127.5, 50, 25.5) rounds half away from zero
        assert_eq!(summary.as_str(), "#80321a");
    }

    #[test]
    fn test_compute_summary_with_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 128])));
        assert_eq!(compute_summary(&img).unwrap().as_str(), "#01020380");
    }

    #[test]
    fn test_compute_summary_is_deterministic() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(16, 16, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, 7])
        }));
        assert_eq!(compute_summary(&img), compute_summary(&img));
    }

    #[test]
    fn test_parse_normalizes_case() {
        assert_eq!(SummaryValue::parse("#C0C0C0").unwrap().as_str(), "#c0c0c0");
    }

    #[test]
    fn test_well_formed() {
        assert!(SummaryValue::from_wire("#c0c0c0".into()).is_well_formed());
        assert!(SummaryValue::from_wire("#c0c0c0ff".into()).is_well_formed());
        assert!(!SummaryValue::from_wire("c0c0c0".into()).is_well_formed());
        assert!(!SummaryValue::from_wire("#c0c0c".into()).is_well_formed());
        assert!(!SummaryValue::from_wire("#../../x".into()).is_well_formed());
        assert!(SummaryValue::parse("#zzzzzz").is_err());
    }
}
