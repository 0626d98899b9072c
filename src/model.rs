//! Arithmetic oracle for the multiplier: unsigned products accumulated in a
//! fixed-width register.

use crate::config::{mask, TbConfig};
use crate::error::{SimResult, TbError};
use crate::matrix::Matrix;

#[derive(Debug, Clone, Copy)]
pub struct ReferenceModel {
    data_width: u32,
    multiply_width: u32,
    result_width: u32,
}

impl ReferenceModel {
    pub fn new(cfg: &TbConfig) -> Self {
        Self {
            data_width: cfg.data_width,
            multiply_width: cfg.multiply_data_width,
            result_width: cfg.result_width(),
        }
    }

    /// `C = A·B` with each product masked to the multiplier width and the sum
    /// to the result width.
    pub fn multiply(&self, a: &Matrix, b: &Matrix) -> SimResult<Matrix> {
        if a.cols() != b.rows() {
            return Err(TbError::DimensionMismatch {
                a_rows: a.rows(),
                a_cols: a.cols(),
                b_rows: b.rows(),
                b_cols: b.cols(),
            });
        }
        let product_mask = mask(self.multiply_width);
        let result_mask = mask(self.result_width);
        Ok(Matrix::from_fn(a.rows(), b.cols(), |i, j| {
            (0..a.cols()).fold(0u64, |acc, n| {
                let product = a.get(i, n).wrapping_mul(b.get(n, j)) & product_mask;
                acc.wrapping_add(product) & result_mask
            })
        }))
    }

    /// Expected output for one sample: the product, or its transpose when the
    /// device streams columns.
    pub fn expected(&self, a: &Matrix, b: &Matrix, output_by_row: bool) -> SimResult<Matrix> {
        let c = self.multiply(a, b)?;
        Ok(match output_by_row {
            true => c,
            false => c.transpose(),
        })
    }

    /// Whether the result width holds the worst-case sum of `inner` products of
    /// all-ones operands without wrapping.
    pub fn headroom(&self, inner: usize) -> bool {
        let max_operand = mask(self.data_width) as u128;
        let worst = max_operand * max_operand * inner as u128;
        worst <= mask(self.result_width) as u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model() -> ReferenceModel {
        ReferenceModel::new(&TbConfig::default())
    }

    #[test]
    fn multiplies_small_matrices() {
        let a = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
        let b = Matrix::from_rows(vec![vec![5, 6], vec![7, 8]]).unwrap();
        let c = model().multiply(&a, &b).unwrap();
        assert_eq!(c, Matrix::from_rows(vec![vec![19, 22], vec![43, 50]]).unwrap());
        let ct = model().expected(&a, &b, false).unwrap();
        assert_eq!(ct.row(0), &[19, 43]);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let err = model().multiply(&Matrix::zeros(2, 3), &Matrix::zeros(2, 3));
        assert_eq!(
            err,
            Err(TbError::DimensionMismatch { a_rows: 2, a_cols: 3, b_rows: 2, b_cols: 3 })
        );
    }

    #[test]
    fn all_ones_fit_default_widths() {
        // 255*255*8 = 520200 < 2^32
        assert!(model().headroom(8));
        let a = Matrix::from_fn(4, 8, |_, _| 255);
        let b = Matrix::from_fn(8, 4, |_, _| 255);
        let c = model().multiply(&a, &b).unwrap();
        assert!((0..4).all(|i| c.row(i).iter().all(|v| *v == 520_200)));
    }

    #[test]
    fn narrow_accumulator_wraps() {
        let cfg = TbConfig::default().multiply_data_width(16).accum_data_width(1);
        let m = ReferenceModel::new(&cfg);
        assert!(!m.headroom(4));
        let a = Matrix::from_fn(1, 4, |_, _| 255);
        let b = Matrix::from_fn(4, 1, |_, _| 255);
        assert_eq!(m.multiply(&a, &b).unwrap().get(0, 0), (4 * 65_025) & 0x1_ffff);
    }

    fn operands() -> impl Strategy<Value = (Matrix, Matrix)> {
        (1usize..6)
            .prop_flat_map(|inner| {
                let lane = proptest::collection::vec(0u64..256, 3 * inner);
                (Just(inner), lane.clone(), lane)
            })
            .prop_map(|(inner, a, b)| {
                (
                    Matrix::from_fn(3, inner, |i, j| a[i * inner + j]),
                    Matrix::from_fn(inner, 3, |i, j| b[i * 3 + j]),
                )
            })
    }

    proptest! {
        #[test]
        fn transpose_of_product_is_product_of_transposes((a, b) in operands()) {
            let m = model();
            let lhs = m.expected(&a, &b, false).unwrap();
            let rhs = m.multiply(&b.transpose(), &a.transpose()).unwrap();
            prop_assert_eq!(lhs, rhs);
        }

        #[test]
        fn row_stream_is_the_plain_product((a, b) in operands()) {
            let m = model();
            prop_assert_eq!(m.expected(&a, &b, true).unwrap(), m.multiply(&a, &b).unwrap());
        }
    }
}
