#![allow(dead_code)]

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Open a buffered reader, transparent to gzip (`.gz` suffix).
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)?;
    if input_file.ends_with(".gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Open a buffered writer, transparent to gzip (`.gz` suffix).
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    let file = File::create(output_file)?;
    if output_file.ends_with(".gz") {
        Ok(Box::new(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        ))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Read every line of `input_file` into memory (gzipped or not).
pub fn read_lines(input_file: &str) -> anyhow::Result<Vec<Box<str>>> {
    let buf = open_buf_reader(input_file)?;
    let mut lines = vec![];
    for x in buf.lines() {
        lines.push(x?.into_boxed_str());
    }
    Ok(lines)
}

/// Write one `Display` item per line (gzipped or not).
pub fn write_types<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    Ok(())
}

/// File name without directory components.
pub fn basename(file: &str) -> anyhow::Result<Box<str>> {
    Path::new(file)
        .file_name()
        .and_then(|x| x.to_str())
        .map(|x| x.to_string().into_boxed_str())
        .ok_or_else(|| anyhow::anyhow!("no file name in {}", file))
}

/// Last extension of a file path (e.g. `parquet`, `gz`).
pub fn file_ext(file: &str) -> anyhow::Result<Box<str>> {
    Path::new(file)
        .extension()
        .and_then(|x| x.to_str())
        .map(|x| x.to_string().into_boxed_str())
        .ok_or_else(|| anyhow::anyhow!("no extension in {}", file))
}

/// Create a directory and its parents; tolerant of pre-existing paths.
pub fn mkdir(dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// List file names in `dir` ending with `suffix`, sorted
/// lexicographically so that the discovery order is stable and
/// independent of the directory enumeration order.
pub fn list_files_with_suffix(dir: &str, suffix: &str) -> anyhow::Result<Vec<Box<str>>> {
    let mut found = vec![];
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(suffix) {
                found.push(name.to_string().into_boxed_str());
            }
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_roundtrip_gz() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("lines.txt.gz");
        let file = file.to_str().unwrap();

        let lines: Vec<Box<str>> = vec!["a".into(), "b".into(), "c".into()];
        write_types(&lines, file)?;
        let back = read_lines(file)?;
        assert_eq!(lines, back);
        Ok(())
    }

    #[test]
    fn test_list_files_with_suffix_sorted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b_meta.csv", "a_meta.csv", "c_other.txt", "z_meta.csv"] {
            std::fs::write(dir.path().join(name), "x")?;
        }

        let found = list_files_with_suffix(dir.path().to_str().unwrap(), "_meta.csv")?;
        let found: Vec<&str> = found.iter().map(|x| x.as_ref()).collect();
        assert_eq!(found, vec!["a_meta.csv", "b_meta.csv", "z_meta.csv"]);
        Ok(())
    }

    #[test]
    fn test_basename_and_ext() {
        assert_eq!(basename("/x/y/z.parquet").unwrap().as_ref(), "z.parquet");
        assert_eq!(file_ext("/x/y/z.parquet").unwrap().as_ref(), "parquet");
        assert!(file_ext("noext").is_err());
    }
}
