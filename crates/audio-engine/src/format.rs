//! Sample format conversion.
//!
//! The host graph delivers input audio as Float32; the transport consumes
//! Int16. The converter owns a reusable staging buffer so the sink callback
//! never allocates on the audio thread after warm-up.

use crate::error::{EngineError, EngineResult};

/// Float32 to Int16 sample converter with an owned staging buffer.
pub struct Float32ToInt16Converter {
    staging: Vec<i16>,
}

impl Float32ToInt16Converter {
    /// Create a converter with staging capacity for `max_frames` samples.
    pub fn new(max_frames: usize) -> EngineResult<Self> {
        if max_frames == 0 {
            return Err(EngineError::ResourceFailure {
                reason: "converter staging capacity must be non-zero".to_string(),
            });
        }
        Ok(Self {
            staging: Vec::with_capacity(max_frames),
        })
    }

    /// Convert `input` into the staging buffer and return it.
    ///
    /// Values are clamped to [-1.0, 1.0] before scaling; NaN maps to 0.
    pub fn convert(&mut self, input: &[f32]) -> &[i16] {
        self.staging.clear();
        self.staging.extend(input.iter().map(|&sample| {
            let clamped = if sample.is_nan() {
                0.0
            } else {
                sample.clamp(-1.0, 1.0)
            };
            (clamped * i16::MAX as f32) as i16
        }));
        &self.staging
    }

    /// Drop any staged samples, keeping capacity.
    pub fn reset(&mut self) {
        self.staging.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(Float32ToInt16Converter::new(0).is_err());
    }

    #[test]
    fn test_scaling_and_clamping() {
        let mut converter = Float32ToInt16Converter::new(8).unwrap();
        let out = converter.convert(&[0.0, 1.0, -1.0, 2.0, -2.0, 0.5]);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], i16::MAX);
        assert_eq!(out[2], -i16::MAX);
        assert_eq!(out[3], i16::MAX);
        assert_eq!(out[4], -i16::MAX);
        assert_eq!(out[5], (0.5 * i16::MAX as f32) as i16);
    }

    #[test]
    fn test_nan_maps_to_silence() {
        let mut converter = Float32ToInt16Converter::new(4).unwrap();
        let out = converter.convert(&[f32::NAN]);
        assert_eq!(out, &[0]);
    }

    #[test]
    fn test_staging_reused_across_calls() {
        let mut converter = Float32ToInt16Converter::new(4).unwrap();
        assert_eq!(converter.convert(&[0.25; 4]).len(), 4);
        assert_eq!(converter.convert(&[0.25; 2]).len(), 2);
        converter.reset();
        assert_eq!(converter.convert(&[]).len(), 0);
    }
}
