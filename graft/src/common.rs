#![allow(dead_code)]

pub type Mat = nalgebra::DMatrix<f32>;
pub type DVec = nalgebra::DVector<f32>;
pub type CscMat = nalgebra_sparse::CscMatrix<f32>;

pub use matrix_extra::common_io::*;
pub use matrix_extra::knn_graph::{KnnGraphArgs, NeighborGraph};
pub use matrix_extra::mtx_io::read_mtx_triplets;
pub use matrix_extra::parquet::ParquetOps;
pub use matrix_extra::traits::*;
pub use matrix_extra::utils::create_jobs;

pub use indicatif::{ProgressBar, ProgressDrawTarget};
pub use log::info;

pub use candle_sage::{candle_core, candle_nn};
pub use clap::{Args, ValueEnum};

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

pub fn select_device(
    device: &ComputeDevice,
    device_no: usize,
) -> anyhow::Result<candle_core::Device> {
    Ok(match device {
        ComputeDevice::Metal => candle_core::Device::new_metal(device_no)?,
        ComputeDevice::Cuda => candle_core::Device::new_cuda(device_no)?,
        ComputeDevice::Cpu => candle_core::Device::Cpu,
    })
}

/// Row-major copy of a dense matrix onto a candle device
pub fn mat_to_tensor(
    mat: &Mat,
    dev: &candle_core::Device,
) -> anyhow::Result<candle_core::Tensor> {
    let data: Vec<f32> = mat
        .row_iter()
        .flat_map(|r| r.iter().copied().collect::<Vec<_>>())
        .collect();
    Ok(candle_core::Tensor::from_vec(
        data,
        (mat.nrows(), mat.ncols()),
        dev,
    )?)
}

/// Copy a `(n, k)` tensor back into a dense matrix
pub fn tensor_to_mat(tensor: &candle_core::Tensor) -> anyhow::Result<Mat> {
    let (nrows, ncols) = tensor.dims2()?;
    let data: Vec<f32> = tensor
        .to_device(&candle_core::Device::Cpu)?
        .flatten_all()?
        .to_vec1()?;
    Ok(Mat::from_row_iterator(nrows, ncols, data))
}
