// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-line post-processing of raw scan data.
//
// Lines arrive exactly as the device delivered them: 8-bit samples as
// bytes, 16-bit samples as native-endian pairs.  Both operations work in
// place on one line buffer.

use scanwerk_core::error::{Result, ScanwerkError};

/// Luminance weights for linear sRGB primaries.
const LUMA_R: f64 = 0.2126;
const LUMA_G: f64 = 0.7152;
const LUMA_B: f64 = 0.0722;

/// Lookup table mapping each sample value through a gamma curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GammaTable {
    depth: u32,
    table: Vec<u16>,
}

impl GammaTable {
    /// Build the table for `gamma` at `depth` bits per sample.
    ///
    /// Returns `Ok(None)` for gamma 1.0, where data passes through
    /// untouched.  Only 8- and 16-bit samples can be remapped.
    pub fn new(gamma: f64, depth: u32) -> Result<Option<Self>> {
        if gamma == 1.0 {
            return Ok(None);
        }
        if depth != 8 && depth != 16 {
            return Err(ScanwerkError::UnsupportedConfiguration(format!(
                "gamma correction needs 8 or 16 bits per sample, device delivers {depth}"
            )));
        }
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(ScanwerkError::UnsupportedConfiguration(format!(
                "gamma exponent must be positive, got {gamma}"
            )));
        }
        let n = 1usize << depth;
        let max = (n - 1) as f64;
        let table = (0..n)
            .map(|i| ((i as f64 / max).powf(gamma) * max + 0.5).floor() as u16)
            .collect();
        Ok(Some(Self { depth, table }))
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Mapped value of a single sample.
    pub fn map(&self, sample: u16) -> u16 {
        self.table[sample as usize]
    }

    /// Remap every sample of `line` in place.
    pub fn apply(&self, line: &mut [u8]) {
        match self.depth {
            8 => {
                for b in line.iter_mut() {
                    *b = self.table[*b as usize] as u8;
                }
            }
            _ => {
                for pair in line.chunks_exact_mut(2) {
                    let v = u16::from_ne_bytes([pair[0], pair[1]]);
                    pair.copy_from_slice(&self.map(v).to_ne_bytes());
                }
            }
        }
    }
}

/// Collapse an RGB line to gray in place.
///
/// The gray samples occupy the first third of `line` afterwards; the
/// returned length is the number of valid bytes.  Depths other than 8 and
/// 16 leave the line untouched.
pub fn synthesize_gray(line: &mut [u8], depth: u32) -> usize {
    let weigh = |r: f64, g: f64, b: f64| LUMA_R * r + LUMA_G * g + LUMA_B * b + 0.5;
    match depth {
        8 => {
            let pixels = line.len() / 3;
            for i in 0..pixels {
                let (r, g, b) = (line[3 * i], line[3 * i + 1], line[3 * i + 2]);
                let v = weigh(r as f64, g as f64, b as f64);
                line[i] = v.min(255.0) as u8;
            }
            pixels
        }
        16 => {
            let pixels = line.len() / 6;
            for i in 0..pixels {
                let s = |k: usize| u16::from_ne_bytes([line[6 * i + 2 * k], line[6 * i + 2 * k + 1]]) as f64;
                let v = weigh(s(0), s(1), s(2)).min(65535.0) as u16;
                line[2 * i..2 * i + 2].copy_from_slice(&v.to_ne_bytes());
            }
            pixels * 2
        }
        _ => line.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_gamma_builds_no_table() {
        assert!(GammaTable::new(1.0, 8).expect("gamma").is_none());
        assert!(GammaTable::new(1.0, 1).expect("gamma").is_none());
    }

    #[test]
    fn gamma_on_unsupported_depth_is_rejected() {
        let err = GammaTable::new(2.2, 1).expect_err("depth 1");
        assert!(matches!(err, ScanwerkError::UnsupportedConfiguration(_)));
        assert!(GammaTable::new(0.0, 8).is_err());
    }

    #[test]
    fn gamma_table_is_monotonic_and_keeps_end_points() {
        for depth in [8u32, 16] {
            let max = ((1u32 << depth) - 1) as u16;
            for gamma in [0.45, 1.8, 2.2] {
                let table = GammaTable::new(gamma, depth).expect("gamma").expect("table");
                assert_eq!(table.map(0), 0);
                assert_eq!(table.map(max), max);
                for i in 1..=max {
                    assert!(table.map(i) >= table.map(i - 1), "gamma {gamma} depth {depth} at {i}");
                }
            }
        }
    }

    #[test]
    fn gamma_table_values() {
        let table = GammaTable::new(2.0, 8).expect("gamma").expect("table");
        // (128/255)^2 * 255 = 64.25
        assert_eq!(table.map(128), 64);
        let mut line = vec![0u8, 128, 255];
        table.apply(&mut line);
        assert_eq!(line, vec![0, 64, 255]);
    }

    #[test]
    fn sixteen_bit_gamma_uses_native_pairs() {
        let table = GammaTable::new(0.5, 16).expect("gamma").expect("table");
        let mut line = Vec::new();
        for v in [0u16, 16384, 65535] {
            line.extend_from_slice(&v.to_ne_bytes());
        }
        table.apply(&mut line);
        let out: Vec<u16> = line
            .chunks_exact(2)
            .map(|p| u16::from_ne_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(out[0], 0);
        assert_eq!(out[2], 65535);
        assert!(out[1] > 32000 && out[1] < 33000);
    }

    #[test]
    fn gray_synthesis_eight_bit() {
        let mut line = vec![255, 255, 255, 255, 0, 0, 0, 0, 0];
        let len = synthesize_gray(&mut line, 8);
        assert_eq!(len, 3);
        assert_eq!(&line[..3], &[255, 54, 0]);
    }

    #[test]
    fn gray_synthesis_sixteen_bit_clamps_to_full_scale() {
        let mut line = Vec::new();
        for v in [65535u16, 65535, 65535, 0, 65535, 0] {
            line.extend_from_slice(&v.to_ne_bytes());
        }
        let len = synthesize_gray(&mut line, 16);
        assert_eq!(len, 4);
        assert_eq!(u16::from_ne_bytes([line[0], line[1]]), 65535);
        // 0.7152 * 65535 + 0.5 = 46871.1
        assert_eq!(u16::from_ne_bytes([line[2], line[3]]), 46871);
    }
}
