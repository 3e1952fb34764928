//! Named-matrix parquet IO
//!
//! One UTF-8 `row` column followed by FLOAT data columns, zstd
//! compressed. Reading tolerates FLOAT/DOUBLE/INT32/INT64 data
//! columns and recovers row and column names.

use crate::traits::MatWithNames;
use nalgebra::DMatrix;
use parquet::basic::Type as ParquetType;
use parquet::basic::{Compression, ConvertedType, Repetition, ZstdLevel};
use parquet::data_type::{ByteArray, ByteArrayType, FloatType};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::RowAccessor;
use parquet::schema::types::Type;
use std::fs::File;
use std::sync::Arc;

pub trait ParquetOps {
    type Mat;

    fn to_parquet_with_names(
        &self,
        file_path: &str,
        row_names: Option<&[Box<str>]>,
        column_names: Option<&[Box<str>]>,
    ) -> anyhow::Result<()>;

    fn to_parquet(&self, file_path: &str) -> anyhow::Result<()>;

    fn from_parquet(file_path: &str) -> anyhow::Result<MatWithNames<Self::Mat>>;
}

fn build_schema(ncols: usize, column_names: Option<&[Box<str>]>) -> anyhow::Result<Arc<Type>> {
    if let Some(names) = column_names {
        if names.len() != ncols {
            anyhow::bail!(
                "{} column names for {} data columns",
                names.len(),
                ncols
            );
        }
    }

    let mut fields = vec![Arc::new(
        Type::primitive_type_builder("row", ParquetType::BYTE_ARRAY)
            .with_repetition(Repetition::REQUIRED)
            .with_converted_type(ConvertedType::UTF8)
            .build()?,
    )];

    let fallback: Vec<Box<str>> = (0..ncols).map(|j| j.to_string().into_boxed_str()).collect();
    let names = column_names.unwrap_or(&fallback);

    for name in names {
        fields.push(Arc::new(
            Type::primitive_type_builder(name, ParquetType::FLOAT)
                .with_repetition(Repetition::REQUIRED)
                .build()?,
        ));
    }

    Ok(Arc::new(
        Type::group_type_builder("matrix").with_fields(fields).build()?,
    ))
}

impl ParquetOps for DMatrix<f32> {
    type Mat = DMatrix<f32>;

    fn to_parquet_with_names(
        &self,
        file_path: &str,
        row_names: Option<&[Box<str>]>,
        column_names: Option<&[Box<str>]>,
    ) -> anyhow::Result<()> {
        let (nrows, ncols) = self.shape();

        if let Some(names) = row_names {
            if names.len() != nrows {
                anyhow::bail!("{} row names for {} rows", names.len(), nrows);
            }
        }

        let schema = build_schema(ncols, column_names)?;
        let props = Arc::new(
            WriterProperties::builder()
                .set_compression(Compression::ZSTD(ZstdLevel::try_new(5)?))
                .build(),
        );

        let file = File::create(file_path)?;
        let mut writer = SerializedFileWriter::new(file, schema, props)?;
        let mut row_group = writer.next_row_group()?;

        let row_bytes: Vec<ByteArray> = match row_names {
            Some(names) => names.iter().map(|r| ByteArray::from(r.as_ref())).collect(),
            None => (0..nrows)
                .map(|i| ByteArray::from(i.to_string().as_str()))
                .collect(),
        };

        let mut col_writer = row_group
            .next_column()?
            .ok_or_else(|| anyhow::anyhow!("missing row-name column writer"))?;
        col_writer
            .typed::<ByteArrayType>()
            .write_batch(&row_bytes, None, None)?;
        col_writer.close()?;

        for j in 0..ncols {
            let values: Vec<f32> = self.column(j).iter().copied().collect();
            let mut col_writer = row_group
                .next_column()?
                .ok_or_else(|| anyhow::anyhow!("missing column writer #{}", j))?;
            col_writer
                .typed::<FloatType>()
                .write_batch(&values, None, None)?;
            col_writer.close()?;
        }

        row_group.close()?;
        writer.close()?;
        Ok(())
    }

    fn to_parquet(&self, file_path: &str) -> anyhow::Result<()> {
        self.to_parquet_with_names(file_path, None, None)
    }

    fn from_parquet(file_path: &str) -> anyhow::Result<MatWithNames<Self::Mat>> {
        let file = File::open(file_path)?;
        let reader = SerializedFileReader::new(file)?;
        let fields = reader.metadata().file_metadata().schema().get_fields();

        // column 0 holds row names; every numeric field after it is data
        let data_fields: Vec<(ParquetType, usize)> = fields
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(j, f)| match f.get_physical_type() {
                tt @ (ParquetType::FLOAT
                | ParquetType::DOUBLE
                | ParquetType::INT32
                | ParquetType::INT64) => Some((tt, j)),
                _ => None,
            })
            .collect();

        if data_fields.is_empty() {
            anyhow::bail!("no numeric columns in {}", file_path);
        }

        let cols: Vec<Box<str>> = data_fields
            .iter()
            .map(|&(_, j)| fields[j].name().to_string().into_boxed_str())
            .collect();

        let mut rows = vec![];
        let mut data = vec![];

        for record in reader.get_row_iter(None)? {
            let record = record?;
            rows.push(record.get_string(0)?.clone().into_boxed_str());
            for &(tt, j) in data_fields.iter() {
                let x = match tt {
                    ParquetType::FLOAT => record.get_float(j)? as f64,
                    ParquetType::DOUBLE => record.get_double(j)?,
                    ParquetType::INT32 => record.get_int(j)? as f64,
                    ParquetType::INT64 => record.get_long(j)? as f64,
                    _ => unreachable!("filtered above"),
                };
                data.push(x as f32);
            }
        }

        let nrows = rows.len();
        let ncols = cols.len();
        Ok(MatWithNames {
            rows,
            cols,
            mat: DMatrix::from_row_iterator(nrows, ncols, data),
        })
    }
}
