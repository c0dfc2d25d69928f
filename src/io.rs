//! Plain-text readers and writers used by the `sketchdist` binary.
//!
//! Inputs are whitespace-separated numeric tables, one pair per row. Outputs are
//! tab-separated: a labelled square matrix (optionally zstd-compressed), COO
//! edge lists and per-row threshold labels.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use log::info;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::sparse::SparseCoo;

/// Read a numeric table. Blank lines and lines starting with `#` are skipped;
/// every other row must have the same number of fields.
pub fn read_table(path: &Path) -> Result<Array2<f32>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut values = Vec::new();
    let mut n_cols = None;
    let mut n_rows = 0usize;
    for (lineno, line) in BufReader::new(f).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let before = values.len();
        for field in line.split_whitespace() {
            let v: f32 = field.parse().with_context(|| {
                format!("{}:{}: not a number: {field:?}", path.display(), lineno + 1)
            })?;
            values.push(v);
        }
        let width = values.len() - before;
        match n_cols {
            None => n_cols = Some(width),
            Some(w) if w != width => bail!(
                "{}:{}: expected {w} columns, found {width}",
                path.display(),
                lineno + 1
            ),
            _ => {}
        }
        n_rows += 1;
    }
    let n_cols = n_cols.unwrap_or(0);
    info!("read {n_rows} x {n_cols} table from {}", path.display());
    Ok(Array2::from_shape_vec((n_rows, n_cols), values)?)
}

/// One column of a table read by [`read_table`].
pub fn read_column(path: &Path, column: usize) -> Result<Vec<f32>> {
    let table = read_table(path)?;
    if table.nrows() > 0 && column >= table.ncols() {
        bail!(
            "column {column} requested but {} has {} columns",
            path.display(),
            table.ncols()
        );
    }
    if table.nrows() == 0 {
        return Ok(Vec::new());
    }
    Ok(table.column(column).to_vec())
}

/// `path` with a `.zst` suffix, unless it already has one.
pub fn zst_path(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("zst") => path.to_path_buf(),
        _ => PathBuf::from(format!("{}.zst", path.display())),
    }
}

fn matrix_rows(names: &[String], m: ArrayView2<'_, f32>) -> Vec<String> {
    (0..m.nrows())
        .into_par_iter()
        .map(|i| {
            let row = m.row(i);
            let mut line = String::with_capacity(8 + row.len() * 12);
            line.push_str(&names[i]);
            let mut buf = ryu::Buffer::new();
            for &val in row.iter() {
                line.push('\t');
                line.push_str(buf.format(val));
            }
            line.push('\n');
            line
        })
        .collect()
}

fn write_square_to<W: Write>(out: &mut W, names: &[String], m: ArrayView2<'_, f32>) -> Result<()> {
    let mut header = String::with_capacity(m.ncols() * 16);
    for name in names {
        header.push('\t');
        header.push_str(name);
    }
    header.push('\n');
    out.write_all(header.as_bytes())?;

    let mut rows = matrix_rows(names, m);
    for line in &mut rows {
        out.write_all(line.as_bytes())?;
        line.clear();
    }
    out.flush()?;
    Ok(())
}

/// Write a square matrix as TSV with a header row and a name per row.
/// Rows are labelled `0..n` when `names` is `None`. With `compress` the
/// output is zstd-compressed and written to [`zst_path`]; the path actually
/// written is returned.
pub fn write_square(
    names: Option<&[String]>,
    m: ArrayView2<'_, f32>,
    path: &Path,
    compress: bool,
) -> Result<PathBuf> {
    if m.nrows() != m.ncols() {
        bail!("matrix is {} x {}, expected square", m.nrows(), m.ncols());
    }
    let owned: Vec<String>;
    let names = match names {
        Some(names) => {
            if names.len() != m.nrows() {
                bail!("{} names for a {} x {} matrix", names.len(), m.nrows(), m.ncols());
            }
            names
        }
        None => {
            owned = (0..m.nrows()).map(|i| i.to_string()).collect();
            &owned
        }
    };

    if compress {
        let path = zst_path(path);
        let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let mut enc = zstd::Encoder::new(file, 0)?;
        let zstd_threads = rayon::current_num_threads() as u32;
        if zstd_threads > 1 {
            enc.multithread(zstd_threads)?;
        }
        let mut out = BufWriter::with_capacity(16 << 20, enc);
        write_square_to(&mut out, names, m)?;
        // finish explicitly so a failed final frame is reported
        let enc = out.into_inner().map_err(|e| e.into_error())?;
        enc.finish()
            .with_context(|| format!("finish zstd stream {}", path.display()))?;
        Ok(path)
    } else {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::with_capacity(16 << 20, file);
        write_square_to(&mut out, names, m)?;
        Ok(path.to_path_buf())
    }
}

/// Write `row\tcol\tdist`, one edge per line.
pub fn write_coo(coo: &SparseCoo, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let mut buf = ryu::Buffer::new();
    for (r, c, d) in coo.iter() {
        writeln!(out, "{r}\t{c}\t{}", buf.format(d))?;
    }
    out.flush()?;
    Ok(())
}

/// Write one threshold label per line.
pub fn write_labels(labels: ArrayView1<'_, f32>, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for &l in labels.iter() {
        writeln!(out, "{}", l as i32)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Read;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn test_read_table_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "d.tsv", "# core acc\n0.1\t0.2\n\n0.3 0.4\n");
        let t = read_table(&p).unwrap();
        assert_eq!(t, array![[0.1f32, 0.2], [0.3, 0.4]]);
        assert_eq!(read_column(&p, 1).unwrap(), vec![0.2, 0.4]);
        assert!(read_column(&p, 2).is_err());
    }

    #[test]
    fn test_read_table_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "bad.tsv", "0.1 0.2\n0.3\n");
        assert!(read_table(&p).is_err());
        let p = write_file(dir.path(), "nan.tsv", "0.1 x\n");
        assert!(read_table(&p).is_err());
    }

    #[test]
    fn test_write_square_plain_and_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let m = array![[0.0f32, 0.5], [0.5, 0.0]];
        let names = vec!["a".to_string(), "b".to_string()];

        let plain = write_square(Some(names.as_slice()), m.view(), &dir.path().join("m.tsv"), false).unwrap();
        let text = std::fs::read_to_string(&plain).unwrap();
        assert_eq!(text, "\ta\tb\na\t0.0\t0.5\nb\t0.5\t0.0\n");

        let packed = write_square(None, m.view(), &dir.path().join("m.tsv"), true).unwrap();
        assert_eq!(packed.extension().unwrap(), "zst");
        let mut dec = zstd::Decoder::new(File::open(&packed).unwrap()).unwrap();
        let mut text = String::new();
        dec.read_to_string(&mut text).unwrap();
        assert_eq!(text, "\t0\t1\n0\t0.0\t0.5\n1\t0.5\t0.0\n");
    }

    #[test]
    fn test_write_coo_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let coo = SparseCoo {
            rows: vec![0, 1],
            cols: vec![1, 0],
            dists: vec![0.25, 0.25],
        };
        let p = dir.path().join("coo.tsv");
        write_coo(&coo, &p).unwrap();
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "0\t1\t0.25\n1\t0\t0.25\n");

        let p = dir.path().join("labels.txt");
        write_labels(array![-1.0f32, 0.0, 1.0].view(), &p).unwrap();
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "-1\n0\n1\n");
    }

    #[test]
    fn test_compressed_square_is_a_complete_frame() {
        let dir = tempfile::tempdir().unwrap();
        let m = ndarray::Array2::from_shape_fn((64, 64), |(i, j)| (i as f32 - j as f32).abs() / 64.0);
        let packed = write_square(None, m.view(), &dir.path().join("big"), true).unwrap();
        // decode_all fails on a truncated frame
        let bytes = zstd::decode_all(File::open(&packed).unwrap()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 65);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_zst_path() {
        assert_eq!(zst_path(Path::new("out.tsv")), PathBuf::from("out.tsv.zst"));
        assert_eq!(zst_path(Path::new("out.zst")), PathBuf::from("out.zst"));
    }
}
