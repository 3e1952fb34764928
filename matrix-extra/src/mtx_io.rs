//! Matrix-market coordinate IO for sparse count matrices

use crate::common_io::{open_buf_reader, open_buf_writer};
use std::io::{BufRead, Write};

/// Read `%%MatrixMarket matrix coordinate` triplets (1-based on file,
/// 0-based in memory). Transparent to gzip.
pub fn read_mtx_triplets(
    mtx_file: &str,
) -> anyhow::Result<(usize, usize, Vec<(usize, usize, f32)>)> {
    let buf = open_buf_reader(mtx_file)?;
    let mut shape: Option<(usize, usize, usize)> = None;
    let mut triplets = vec![];

    for (i, line) in buf.lines().enumerate() {
        let line = line?;
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();

        if shape.is_none() {
            if tokens.len() != 3 {
                anyhow::bail!("{}: line {}: malformed size line", mtx_file, i + 1);
            }
            shape = Some((
                tokens[0].parse()?,
                tokens[1].parse()?,
                tokens[2].parse()?,
            ));
            continue;
        }

        if tokens.len() < 2 {
            anyhow::bail!("{}: line {}: malformed triplet", mtx_file, i + 1);
        }
        let row: usize = tokens[0].parse()?;
        let col: usize = tokens[1].parse()?;
        let val: f32 = if tokens.len() > 2 { tokens[2].parse()? } else { 1.0 };

        if row == 0 || col == 0 {
            anyhow::bail!("{}: line {}: matrix market is 1-based", mtx_file, i + 1);
        }
        triplets.push((row - 1, col - 1, val));
    }

    let (nrows, ncols, nnz) = shape.ok_or_else(|| anyhow::anyhow!("no size line in {}", mtx_file))?;

    if triplets.len() != nnz {
        anyhow::bail!(
            "{}: found {} triplets, header says {}",
            mtx_file,
            triplets.len(),
            nnz
        );
    }

    for &(r, c, _) in triplets.iter() {
        if r >= nrows || c >= ncols {
            anyhow::bail!("{}: triplet ({},{}) out of shape", mtx_file, r + 1, c + 1);
        }
    }

    Ok((nrows, ncols, triplets))
}

/// Write triplets in matrix-market coordinate format (1-based on file).
pub fn write_mtx_triplets(
    mtx_file: &str,
    shape: (usize, usize),
    triplets: &[(usize, usize, f32)],
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(mtx_file)?;
    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{} {} {}", shape.0, shape.1, triplets.len())?;
    for &(r, c, v) in triplets {
        writeln!(buf, "{} {} {}", r + 1, c + 1, v)?;
    }
    buf.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtx_roundtrip_gz() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("counts.mtx.gz");
        let file = file.to_str().unwrap();

        let triplets = vec![(0, 0, 2.0), (3, 1, 1.0), (2, 4, 5.0)];
        write_mtx_triplets(file, (4, 5), &triplets)?;

        let (nrows, ncols, back) = read_mtx_triplets(file)?;
        assert_eq!((nrows, ncols), (4, 5));
        assert_eq!(back, triplets);
        Ok(())
    }

    #[test]
    fn test_mtx_rejects_out_of_shape() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("bad.mtx");
        std::fs::write(&file, "%%MatrixMarket matrix coordinate real general\n2 2 1\n3 1 1.0\n")?;
        assert!(read_mtx_triplets(file.to_str().unwrap()).is_err());
        Ok(())
    }
}
