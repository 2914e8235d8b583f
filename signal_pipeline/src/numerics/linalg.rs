// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Small dense linear algebra: dot products and the column-major
//! matrix-vector product used by the matrix-transform stages.

/// Dot product accumulated in `f64`.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

/// `y = Mᵀ·x` for a column-major matrix of shape `rows × cols`
/// (`matrix[col * rows + row]`): each output component is the dot product of
/// one stored column with `x`.
///
/// `x.len() == rows`, `y.len() == cols`.
pub fn mat_vec_col_major(matrix: &[f32], rows: usize, cols: usize, x: &[f32], y: &mut [f32]) {
    debug_assert_eq!(matrix.len(), rows * cols);
    debug_assert_eq!(x.len(), rows);
    debug_assert_eq!(y.len(), cols);
    for (col, out) in y.iter_mut().enumerate() {
        let column = &matrix[col * rows..(col + 1) * rows];
        *out = dot(column, x) as f32;
    }
}
