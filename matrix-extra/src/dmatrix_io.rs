use crate::common_io::{open_buf_reader, open_buf_writer};
use crate::traits::MatWithNames;
use nalgebra::DMatrix;
use std::io::{BufRead, Write};

/// Read and write dense matrices from and to delimited text files
pub trait IoOps {
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: &[char],
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, &['\t'], skip)
    }

    /// First token of each line is the row name; with `header` the
    /// first line carries column names.
    fn read_with_row_names(
        file: &str,
        delim: &[char],
        header: bool,
    ) -> anyhow::Result<MatWithNames<Self::Mat>>;

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }

    fn to_csv(&self, csv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(csv_file, ",")
    }
}

fn tokenize<'a>(line: &'a str, delim: &[char]) -> Vec<&'a str> {
    line.split(|c| delim.contains(&c))
        .filter(|x| !x.is_empty())
        .collect()
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('%')
}

impl IoOps for DMatrix<f32> {
    type Mat = DMatrix<f32>;

    fn read_file_delim(
        file: &str,
        delim: &[char],
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let buf = open_buf_reader(file)?;
        let mut data = vec![];
        let mut ncols = 0;

        for (i, line) in buf.lines().enumerate() {
            let line = line?;
            if i < skip.unwrap_or(0) || is_comment(&line) || line.trim().is_empty() {
                continue;
            }
            let row: Vec<f32> = tokenize(&line, delim)
                .iter()
                .map(|x| x.parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|e| anyhow::anyhow!("{}: line {}: {}", file, i + 1, e))?;

            if ncols == 0 {
                ncols = row.len();
            } else if row.len() != ncols {
                anyhow::bail!("{}: line {}: ragged row", file, i + 1);
            }
            data.extend(row);
        }

        if ncols == 0 {
            anyhow::bail!("no data in {}", file);
        }
        let nrows = data.len() / ncols;
        Ok(DMatrix::from_row_iterator(nrows, ncols, data))
    }

    fn read_with_row_names(
        file: &str,
        delim: &[char],
        header: bool,
    ) -> anyhow::Result<MatWithNames<Self::Mat>> {
        let buf = open_buf_reader(file)?;
        let mut rows = vec![];
        let mut cols = vec![];
        let mut data = vec![];
        let mut ncols = 0;
        let mut header_pending = header;

        for (i, line) in buf.lines().enumerate() {
            let line = line?;
            if is_comment(&line) || line.trim().is_empty() {
                continue;
            }
            let tokens = tokenize(&line, delim);

            if header_pending {
                // drop the row-name column label when present
                cols = tokens
                    .iter()
                    .skip(1)
                    .map(|x| x.to_string().into_boxed_str())
                    .collect();
                header_pending = false;
                continue;
            }

            let (name, values) = tokens
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("{}: line {}: empty row", file, i + 1))?;
            rows.push(name.to_string().into_boxed_str());

            let row: Vec<f32> = values
                .iter()
                .map(|x| x.parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|e| anyhow::anyhow!("{}: line {}: {}", file, i + 1, e))?;

            if ncols == 0 {
                ncols = row.len();
            } else if row.len() != ncols {
                anyhow::bail!("{}: line {}: ragged row", file, i + 1);
            }
            data.extend(row);
        }

        if ncols == 0 {
            anyhow::bail!("no data in {}", file);
        }
        if cols.is_empty() {
            cols = (0..ncols).map(|j| j.to_string().into_boxed_str()).collect();
        }

        let nrows = rows.len();
        Ok(MatWithNames {
            rows,
            cols,
            mat: DMatrix::from_row_iterator(nrows, ncols, data),
        })
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        let mut buf = open_buf_writer(file)?;
        for row in self.row_iter() {
            let line = row
                .iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(delim);
            writeln!(buf, "{}", line)?;
        }
        buf.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsv_roundtrip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("m.tsv");
        let file = file.to_str().unwrap();

        let mat = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.5, 6.0]);
        mat.to_tsv(file)?;

        let back = DMatrix::<f32>::from_tsv(file, None)?;
        assert_eq!(mat, back);
        Ok(())
    }

    #[test]
    fn test_read_with_row_names() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("named.csv");
        std::fs::write(&file, "node,f1,f2\nn0,1,2\nn1,3,4\n")?;

        let out = DMatrix::<f32>::read_with_row_names(file.to_str().unwrap(), &[','], true)?;
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[1].as_ref(), "n1");
        assert_eq!(out.cols.len(), 2);
        assert_eq!(out.mat[(1, 0)], 3.0);
        Ok(())
    }
}
