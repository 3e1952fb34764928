use nalgebra::DMatrix;

/// A matrix together with its row and column names.
pub struct MatWithNames<M> {
    pub rows: Vec<Box<str>>,
    pub cols: Vec<Box<str>>,
    pub mat: M,
}

/// Column centering and z-score scaling
pub trait MatOps {
    type Mat;

    fn centre_columns_inplace(&mut self);
    fn centre_columns(&self) -> Self::Mat;

    /// centre and divide by the column standard deviation (floored)
    fn scale_columns_inplace(&mut self);
    fn scale_columns(&self) -> Self::Mat;
}

impl MatOps for DMatrix<f32> {
    type Mat = DMatrix<f32>;

    fn centre_columns_inplace(&mut self) {
        let nn = self.nrows().max(1) as f32;
        for mut col in self.column_iter_mut() {
            let mu = col.sum() / nn;
            col.add_scalar_mut(-mu);
        }
    }

    fn centre_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.centre_columns_inplace();
        ret
    }

    fn scale_columns_inplace(&mut self) {
        const MIN_SD: f32 = 1e-8;
        let nn = self.nrows().max(1) as f32;
        for mut col in self.column_iter_mut() {
            let mu = col.sum() / nn;
            col.add_scalar_mut(-mu);
            let sd = (col.norm_squared() / nn).sqrt().max(MIN_SD);
            col.scale_mut(1.0 / sd);
        }
    }

    fn scale_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.scale_columns_inplace();
        ret
    }
}

/// Concatenate matrices vertically, checking column agreement.
pub fn vstack(mats: &[DMatrix<f32>]) -> anyhow::Result<DMatrix<f32>> {
    let ncols = mats
        .first()
        .map(|m| m.ncols())
        .ok_or_else(|| anyhow::anyhow!("nothing to stack"))?;

    for (i, m) in mats.iter().enumerate() {
        if m.ncols() != ncols {
            anyhow::bail!(
                "matrix #{} has {} columns, expected {}",
                i,
                m.ncols(),
                ncols
            );
        }
    }

    let ntot = mats.iter().map(|m| m.nrows()).sum();
    let mut ret = DMatrix::<f32>::zeros(ntot, ncols);
    let mut lb = 0;
    for m in mats {
        let ub = lb + m.nrows();
        ret.rows_range_mut(lb..ub).copy_from(m);
        lb = ub;
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scale_columns() {
        let mut mat = DMatrix::from_row_slice(4, 2, &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0]);
        mat.scale_columns_inplace();

        for j in 0..2 {
            let col = mat.column(j);
            assert_relative_eq!(col.sum(), 0.0, epsilon = 1e-5);
            let sd = (col.norm_squared() / 4.0).sqrt();
            assert_relative_eq!(sd, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_vstack_counts() {
        let a = DMatrix::from_element(2, 3, 1.0f32);
        let b = DMatrix::from_element(4, 3, 2.0f32);
        let s = vstack(&[a, b]).unwrap();
        assert_eq!(s.nrows(), 6);
        assert_eq!(s[(0, 0)], 1.0);
        assert_eq!(s[(5, 2)], 2.0);

        let c = DMatrix::from_element(1, 2, 0.0f32);
        assert!(vstack(&[DMatrix::from_element(1, 3, 0.0f32), c]).is_err());
    }
}
