// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! On-disk matrix layout shared by query, truth-set and result files.
//!
//! Every `.bin` file starts with two little-endian `i32` values, the row
//! count and the column count, followed by `rows * cols` row-major elements.
//! A truth set stores the neighbour id matrix and, optionally, a distance
//! matrix of the same shape directly after it.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{BenchError, BenchResult};
use crate::harness::config::DataType;

const HEADER_BYTES: u64 = 8;

/// Element types that can be stored in a `.bin` matrix.
pub trait BinElement: Copy + Default + Send + Sync + 'static {
    const SIZE: usize;

    fn read_into<R: Read>(reader: &mut R, dst: &mut [Self]) -> io::Result<()>;
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;
    fn to_f32(self) -> f32;
}

impl BinElement for f32 {
    const SIZE: usize = 4;

    fn read_into<R: Read>(reader: &mut R, dst: &mut [Self]) -> io::Result<()> {
        reader.read_f32_into::<LittleEndian>(dst)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_f32::<LittleEndian>(*self)
    }

    fn to_f32(self) -> f32 {
        self
    }
}

impl BinElement for u32 {
    const SIZE: usize = 4;

    fn read_into<R: Read>(reader: &mut R, dst: &mut [Self]) -> io::Result<()> {
        reader.read_u32_into::<LittleEndian>(dst)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(*self)
    }

    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl BinElement for i8 {
    const SIZE: usize = 1;

    fn read_into<R: Read>(reader: &mut R, dst: &mut [Self]) -> io::Result<()> {
        reader.read_i8_into(dst)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i8(*self)
    }

    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl BinElement for u8 {
    const SIZE: usize = 1;

    fn read_into<R: Read>(reader: &mut R, dst: &mut [Self]) -> io::Result<()> {
        reader.read_exact(dst)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(*self)
    }

    fn to_f32(self) -> f32 {
        self as f32
    }
}

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    pub data: Vec<T>,
    pub rows: usize,
    pub cols: usize,
}

impl<T: Copy> Matrix<T> {
    pub fn new(data: Vec<T>, rows: usize, cols: usize) -> BenchResult<Self> {
        if data.len() != rows * cols {
            return Err(BenchError::config(format!(
                "matrix data has {} elements, expected {} x {}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { data, rows, cols })
    }

    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// A batch of query vectors widened to `f32`.
pub type QueryBatch = Matrix<f32>;

/// Ground-truth neighbours for a query batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TruthSet {
    /// `num_queries x dim` neighbour ids, closest first
    pub ids: Vec<u32>,
    /// Matching distances, when the file carries them
    pub dists: Option<Vec<f32>>,
    pub num_queries: usize,
    pub dim: usize,
}

impl TruthSet {
    pub fn neighbors(&self, query: usize) -> &[u32] {
        &self.ids[query * self.dim..(query + 1) * self.dim]
    }

    pub fn distances(&self, query: usize) -> Option<&[f32]> {
        self.dists
            .as_ref()
            .map(|d| &d[query * self.dim..(query + 1) * self.dim])
    }
}

fn read_header(reader: &mut impl Read, path: &Path) -> BenchResult<(usize, usize)> {
    let header_err = |e: io::Error| BenchError::dataset(path, format!("failed to read header: {}", e));
    let rows = reader.read_i32::<LittleEndian>().map_err(header_err)?;
    let cols = reader.read_i32::<LittleEndian>().map_err(header_err)?;
    if rows < 0 || cols < 0 {
        return Err(BenchError::dataset(
            path,
            format!("negative shape in header: {} x {}", rows, cols),
        ));
    }
    Ok((rows as usize, cols as usize))
}

fn read_elements<T: BinElement>(
    reader: &mut impl Read,
    count: usize,
    path: &Path,
) -> BenchResult<Vec<T>> {
    let mut data = vec![T::default(); count];
    T::read_into(reader, &mut data)
        .map_err(|e| BenchError::dataset(path, format!("truncated payload: {}", e)))?;
    Ok(data)
}

fn write_header(writer: &mut impl Write, rows: i32, cols: i32) -> io::Result<()> {
    writer.write_i32::<LittleEndian>(rows)?;
    writer.write_i32::<LittleEndian>(cols)
}

/// Load a typed matrix.
pub fn load_bin<T: BinElement>(path: &Path) -> BenchResult<Matrix<T>> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let (rows, cols) = read_header(&mut reader, path)?;
    let expected = HEADER_BYTES + (rows as u64) * (cols as u64) * T::SIZE as u64;
    if file_len != expected {
        return Err(BenchError::dataset(
            path,
            format!(
                "file is {} bytes, header {} x {} implies {}",
                file_len, rows, cols, expected
            ),
        ));
    }

    let data = read_elements::<T>(&mut reader, rows * cols, path)?;
    Ok(Matrix { data, rows, cols })
}

/// Load a matrix of `data_type` elements and widen it to `f32`.
pub fn load_as_f32(path: &Path, data_type: DataType) -> BenchResult<Matrix<f32>> {
    fn widen<T: BinElement>(m: Matrix<T>) -> Matrix<f32> {
        Matrix {
            data: m.data.into_iter().map(T::to_f32).collect(),
            rows: m.rows,
            cols: m.cols,
        }
    }

    match data_type {
        DataType::Float => load_bin::<f32>(path),
        DataType::Int8 => load_bin::<i8>(path).map(widen),
        DataType::Uint8 => load_bin::<u8>(path).map(widen),
    }
}

/// Save a row-major matrix.
pub fn save_bin<T: BinElement>(path: &Path, data: &[T], rows: usize, cols: usize) -> BenchResult<()> {
    if data.len() != rows * cols {
        return Err(BenchError::dataset(
            path,
            format!("{} elements do not form a {} x {} matrix", data.len(), rows, cols),
        ));
    }
    let rows_i32 = i32::try_from(rows)
        .map_err(|_| BenchError::dataset(path, format!("row count {} exceeds i32", rows)))?;
    let cols_i32 = i32::try_from(cols)
        .map_err(|_| BenchError::dataset(path, format!("column count {} exceeds i32", cols)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, rows_i32, cols_i32)?;
    for v in data {
        v.write_to(&mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Load a truth set: ids, optionally followed by distances.
pub fn load_truthset(path: &Path) -> BenchResult<TruthSet> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let (num_queries, dim) = read_header(&mut reader, path)?;
    let matrix_bytes = (num_queries as u64) * (dim as u64) * 4;

    let with_dists = if file_len == HEADER_BYTES + 2 * matrix_bytes {
        true
    } else if file_len == HEADER_BYTES + matrix_bytes {
        false
    } else {
        return Err(BenchError::dataset(
            path,
            format!(
                "file is {} bytes; neither ids-only ({}) nor ids+dists ({}) for {} x {}",
                file_len,
                HEADER_BYTES + matrix_bytes,
                HEADER_BYTES + 2 * matrix_bytes,
                num_queries,
                dim
            ),
        ));
    };

    let ids = read_elements::<u32>(&mut reader, num_queries * dim, path)?;
    let dists = if with_dists {
        Some(read_elements::<f32>(&mut reader, num_queries * dim, path)?)
    } else {
        None
    };

    Ok(TruthSet {
        ids,
        dists,
        num_queries,
        dim,
    })
}

/// Save a truth set with distances.
pub fn save_truthset(path: &Path, truth: &TruthSet) -> BenchResult<()> {
    let num_queries = i32::try_from(truth.num_queries)
        .map_err(|_| BenchError::dataset(path, "query count exceeds i32"))?;
    let dim = i32::try_from(truth.dim).map_err(|_| BenchError::dataset(path, "depth exceeds i32"))?;

    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, num_queries, dim)?;
    for id in &truth.ids {
        id.write_to(&mut writer)?;
    }
    if let Some(ref dists) = truth.dists {
        for d in dists {
            d.write_to(&mut writer)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read one filter label per line, skipping blank lines.
pub fn read_filter_labels(path: &Path) -> BenchResult<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let label = line.trim();
        if !label.is_empty() {
            labels.push(label.to_string());
        }
    }
    Ok(labels)
}
