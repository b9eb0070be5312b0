// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-document — Encoding of raw scan lines into documents.
//
// Provides row-oriented JPEG, PNG, and PDF encoders behind a single trait,
// plus the per-line post-processing applied to raw device data (gamma
// lookup tables and software grayscale synthesis).

pub mod encoder;
pub mod process;

pub use encoder::{DocumentInfo, ImageEncoder, ImageGeometry, encoder_for_format};
pub use process::{GammaTable, synthesize_gray};
