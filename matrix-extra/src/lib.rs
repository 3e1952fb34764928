pub mod common_io;
pub mod dmatrix_io;
pub mod gmm;
pub mod knn_graph;
pub mod mtx_io;
pub mod parquet;
pub mod traits;
pub mod utils;
