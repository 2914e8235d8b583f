// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Numeric Primitives
//!
//! The kernels every stage builds on: FFT/DFT wrappers, window synthesis,
//! the IIR biquad kernel and filter design factories, windowed-sinc FIR
//! design, convolution (direct and overlap-save), matrix-vector products,
//! and the mel/DCT machinery for cepstral features.
//!
//! Stages own their loops; these modules own the math. Nothing here holds
//! per-channel state; state lives with the stage that serializes it.

pub mod convolution;
pub mod fft;
pub mod filter_design;
pub mod fir;
pub mod iir;
pub mod linalg;
pub mod mel;
pub mod window;
