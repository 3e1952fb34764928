//! In-memory minibatch loader
//!
//! Each row of the input matrix is one sample; rows are staged as CPU
//! tensors and stacked per minibatch on the target device.

use candle_core::{Device, Tensor};
use nalgebra::DMatrix;
use rand::prelude::SliceRandom;

type Mat = DMatrix<f32>;

pub struct MinibatchData {
    pub input: Tensor,
    pub covariate: Option<Tensor>,
    pub output: Option<Tensor>,
}

pub struct InMemoryData {
    input_rows: Vec<Tensor>,
    covariate_rows: Option<Vec<Tensor>>,
    output_rows: Option<Vec<Tensor>>,
    chunks: Vec<Vec<usize>>,
}

fn rows_to_tensors(data: &Mat) -> anyhow::Result<Vec<Tensor>> {
    let dev = Device::Cpu;
    (0..data.nrows())
        .map(|i| {
            let row: Vec<f32> = data.row(i).iter().copied().collect();
            Ok(Tensor::from_vec(row, (data.ncols(),), &dev)?)
        })
        .collect()
}

impl InMemoryData {
    pub fn new(input: &Mat) -> anyhow::Result<Self> {
        Ok(Self {
            input_rows: rows_to_tensors(input)?,
            covariate_rows: None,
            output_rows: None,
            chunks: vec![],
        })
    }

    pub fn new_with_covariate(input: &Mat, covariate: &Mat) -> anyhow::Result<Self> {
        if input.nrows() != covariate.nrows() {
            anyhow::bail!(
                "{} input rows vs {} covariate rows",
                input.nrows(),
                covariate.nrows()
            );
        }
        Ok(Self {
            input_rows: rows_to_tensors(input)?,
            covariate_rows: Some(rows_to_tensors(covariate)?),
            output_rows: None,
            chunks: vec![],
        })
    }

    pub fn new_with_covariate_output(
        input: &Mat,
        covariate: &Mat,
        output: &Mat,
    ) -> anyhow::Result<Self> {
        if input.nrows() != covariate.nrows() || input.nrows() != output.nrows() {
            anyhow::bail!("input/covariate/output row counts disagree");
        }
        Ok(Self {
            input_rows: rows_to_tensors(input)?,
            covariate_rows: Some(rows_to_tensors(covariate)?),
            output_rows: Some(rows_to_tensors(output)?),
            chunks: vec![],
        })
    }

    pub fn num_rows(&self) -> usize {
        self.input_rows.len()
    }

    pub fn num_minibatch(&self) -> usize {
        self.chunks.len()
    }

    /// Shuffle samples and partition them into minibatch chunks
    pub fn shuffle_minibatch<R: rand::Rng>(
        &mut self,
        batch_size: usize,
        rng: &mut R,
    ) -> anyhow::Result<()> {
        if batch_size == 0 {
            anyhow::bail!("batch size must be positive");
        }
        let mut samples: Vec<usize> = (0..self.input_rows.len()).collect();
        samples.shuffle(rng);
        self.chunks = samples.chunks(batch_size).map(|x| x.to_vec()).collect();
        Ok(())
    }

    pub fn minibatch_shuffled(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let chunk = self
            .chunks
            .get(batch_idx)
            .ok_or_else(|| anyhow::anyhow!("minibatch #{} out of range", batch_idx))?;

        let stack = |rows: &Vec<Tensor>| -> anyhow::Result<Tensor> {
            let picked: Vec<Tensor> = chunk.iter().map(|&i| rows[i].clone()).collect();
            Ok(Tensor::stack(&picked, 0)?.to_device(target_device)?)
        };

        Ok(MinibatchData {
            input: stack(&self.input_rows)?,
            covariate: self
                .covariate_rows
                .as_ref()
                .map(&stack)
                .transpose()?,
            output: self.output_rows.as_ref().map(&stack).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_minibatch_shapes() -> anyhow::Result<()> {
        let input = Mat::from_fn(10, 4, |i, j| (i * 4 + j) as f32);
        let covar = Mat::from_fn(10, 2, |i, _| i as f32);

        let mut data = InMemoryData::new_with_covariate(&input, &covar)?;
        let mut rng = StdRng::seed_from_u64(0);
        data.shuffle_minibatch(4, &mut rng)?;

        assert_eq!(data.num_minibatch(), 3); // 4 + 4 + 2

        let mb = data.minibatch_shuffled(0, &Device::Cpu)?;
        assert_eq!(mb.input.dims(), &[4, 4]);
        assert_eq!(mb.covariate.as_ref().unwrap().dims(), &[4, 2]);
        assert!(mb.output.is_none());

        let tail = data.minibatch_shuffled(2, &Device::Cpu)?;
        assert_eq!(tail.input.dims(), &[2, 4]);
        Ok(())
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let input = Mat::zeros(3, 2);
        let covar = Mat::zeros(4, 2);
        assert!(InMemoryData::new_with_covariate(&input, &covar).is_err());
    }
}
