//! Input plumbing for batch integration: sparse counts plus per-cell
//! batch membership.

use crate::common::*;
use nalgebra_sparse::CooMatrix;
use std::collections::BTreeMap;

pub struct IntegrateData {
    /// Sparse counts (genes x cells)
    pub counts: CscMat,
    pub gene_names: Vec<Box<str>>,
    pub cell_names: Vec<Box<str>>,
    /// Distinct batch labels, sorted
    pub batch_names: Vec<Box<str>>,
    /// Batch index per cell, aligned with `cell_names`
    pub batch_membership: Vec<usize>,
}

impl IntegrateData {
    pub fn num_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn num_cells(&self) -> usize {
        self.counts.ncols()
    }

    pub fn num_batches(&self) -> usize {
        self.batch_names.len()
    }

    /// One-hot batch covariate (cells x batches)
    pub fn batch_onehot(&self) -> Mat {
        let mut onehot = Mat::zeros(self.num_cells(), self.num_batches());
        for (cell, &b) in self.batch_membership.iter().enumerate() {
            onehot[(cell, b)] = 1.0;
        }
        onehot
    }

    /// Densify cells `lb..ub` into a (cells x genes) block
    pub fn dense_cell_block(&self, lb: usize, ub: usize) -> Mat {
        let offsets = self.counts.col_offsets();
        let row_indices = self.counts.row_indices();
        let values = self.counts.values();

        let mut block = Mat::zeros(ub - lb, self.num_genes());
        for (local, cell) in (lb..ub).enumerate() {
            for idx in offsets[cell]..offsets[cell + 1] {
                block[(local, row_indices[idx])] = values[idx];
            }
        }
        block
    }
}

pub struct IntegrateInputArgs<'a> {
    pub mtx_file: &'a str,
    pub row_file: &'a str,
    pub column_file: &'a str,
    pub batch_file: &'a str,
}

pub fn read_integrate_data(args: IntegrateInputArgs) -> anyhow::Result<IntegrateData> {
    let (nrows, ncols, triplets) = read_mtx_triplets(args.mtx_file)?;

    let gene_names = read_lines(args.row_file)?;
    if gene_names.len() != nrows {
        anyhow::bail!(
            "{} row names for {} matrix rows",
            gene_names.len(),
            nrows
        );
    }

    let cell_names = read_lines(args.column_file)?;
    if cell_names.len() != ncols {
        anyhow::bail!(
            "{} column names for {} matrix columns",
            cell_names.len(),
            ncols
        );
    }

    let batch_labels = read_lines(args.batch_file)?;
    if batch_labels.len() != ncols {
        anyhow::bail!(
            "{} batch labels for {} cells",
            batch_labels.len(),
            ncols
        );
    }

    // sorted distinct labels -> stable batch indices
    let batch_index: BTreeMap<&str, usize> = {
        let mut distinct: Vec<&str> = batch_labels.iter().map(|x| x.as_ref()).collect();
        distinct.sort();
        distinct.dedup();
        distinct.into_iter().enumerate().map(|(i, x)| (x, i)).collect()
    };

    let batch_membership: Vec<usize> = batch_labels
        .iter()
        .map(|x| batch_index[x.as_ref()])
        .collect();

    let batch_names: Vec<Box<str>> = {
        let mut names: Vec<(usize, &str)> =
            batch_index.iter().map(|(&name, &i)| (i, name)).collect();
        names.sort();
        names
            .into_iter()
            .map(|(_, name)| name.to_string().into_boxed_str())
            .collect()
    };

    // coerce the triplets into compressed sparse storage
    let mut coo = CooMatrix::new(nrows, ncols);
    for (r, c, v) in triplets {
        coo.push(r, c, v);
    }
    let counts = CscMat::from(&coo);

    info!(
        "{} genes x {} cells ({} non-zeros) across {} batches",
        nrows,
        ncols,
        counts.nnz(),
        batch_names.len()
    );

    Ok(IntegrateData {
        counts,
        gene_names,
        cell_names,
        batch_names,
        batch_membership,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_extra::mtx_io::write_mtx_triplets;

    fn write_fixture(dir: &std::path::Path) -> anyhow::Result<()> {
        let mtx = dir.join("counts.mtx");
        write_mtx_triplets(
            mtx.to_str().unwrap(),
            (3, 4),
            &[(0, 0, 2.0), (1, 1, 3.0), (2, 2, 1.0), (0, 3, 4.0)],
        )?;
        std::fs::write(dir.join("genes.txt"), "g0\ng1\ng2\n")?;
        std::fs::write(dir.join("cells.txt"), "c0\nc1\nc2\nc3\n")?;
        std::fs::write(dir.join("batches.txt"), "lib2\nlib1\nlib2\nlib1\n")?;
        Ok(())
    }

    fn fixture_path(dir: &std::path::Path, name: &str) -> String {
        dir.join(name).to_str().unwrap().to_string()
    }

    #[test]
    fn test_read_integrate_data() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_fixture(dir.path())?;

        let data = read_integrate_data(IntegrateInputArgs {
            mtx_file: &fixture_path(dir.path(), "counts.mtx"),
            row_file: &fixture_path(dir.path(), "genes.txt"),
            column_file: &fixture_path(dir.path(), "cells.txt"),
            batch_file: &fixture_path(dir.path(), "batches.txt"),
        })?;
        assert_eq!(data.num_genes(), 3);
        assert_eq!(data.num_cells(), 4);
        assert_eq!(data.num_batches(), 2);

        // batch names sorted, membership aligned
        assert_eq!(data.batch_names[0].as_ref(), "lib1");
        assert_eq!(data.batch_membership, vec![1, 0, 1, 0]);

        let onehot = data.batch_onehot();
        assert_eq!(onehot.nrows(), 4);
        assert_eq!(onehot[(0, 1)], 1.0);
        assert_eq!(onehot[(1, 0)], 1.0);
        assert_eq!(onehot.row(2).sum(), 1.0);

        let block = data.dense_cell_block(0, 4);
        assert_eq!(block[(0, 0)], 2.0);
        assert_eq!(block[(3, 0)], 4.0);
        assert_eq!(block[(2, 2)], 1.0);
        assert_eq!(block[(1, 2)], 0.0);
        Ok(())
    }

    #[test]
    fn test_mismatched_batch_file_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_fixture(dir.path())?;
        std::fs::write(dir.path().join("short.txt"), "a\nb\n")?;

        let result = read_integrate_data(IntegrateInputArgs {
            mtx_file: &fixture_path(dir.path(), "counts.mtx"),
            row_file: &fixture_path(dir.path(), "genes.txt"),
            column_file: &fixture_path(dir.path(), "cells.txt"),
            batch_file: &fixture_path(dir.path(), "short.txt"),
        });
        assert!(result.is_err());
        Ok(())
    }
}
