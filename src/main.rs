//! sketchdist: square, sparsify or threshold pairwise sketch distances.
//! Input: long-form distances, one pair per row (whitespace-separated)
//! Output: TSV square matrix, COO edge list or per-pair labels

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use log::info;
use ndarray::ArrayView2;

use sketchdist::io::{read_column, read_table, write_coo, write_labels, write_square};
use sketchdist::{assemble_square, assign_threshold, samples_from_condensed_length, sparsify, BoundarySlope};

fn input_arg(help: &'static str) -> Arg {
    Arg::new("input")
        .short('i')
        .long("input")
        .help(help)
        .value_parser(clap::value_parser!(PathBuf))
        .required(true)
}

fn output_arg(default: &'static str) -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .help("Output file")
        .value_parser(clap::value_parser!(PathBuf))
        .default_value(default)
}

fn column_arg() -> Arg {
    Arg::new("column")
        .long("column")
        .short('c')
        .help("Column of the long-form input to use: 0 = core, 1 = accessory")
        .value_parser(clap::value_parser!(usize))
        .default_value("0")
}

fn cli() -> Command {
    Command::new("sketchdist")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Pairwise core/accessory sketch distances: square, sparse and threshold outputs")
        .subcommand_required(true)
        .arg(
            Arg::new("threads")
                .long("threads")
                .short('T')
                .global(true)
                .help("Number of threads, default all logical cores")
                .value_parser(clap::value_parser!(usize)),
        )
        .subcommand(
            Command::new("square")
                .about("Long-form (condensed) distances to a square matrix")
                .arg(input_arg("Reference-reference distances, condensed order"))
                .arg(column_arg())
                .arg(
                    Arg::new("query-ref")
                        .long("query-ref")
                        .help("Reference-query distances, reference-major order")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("query-query")
                        .long("query-query")
                        .help("Query-query distances, condensed order")
                        .value_parser(clap::value_parser!(PathBuf))
                        .requires("query-ref"),
                )
                .arg(output_arg("distances.tsv"))
                .arg(
                    Arg::new("compress")
                        .long("compress")
                        .help("Compress output with zstd, .zst suffix will be added to the output file name")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("sparse")
                .about("Long-form distances to a sparse nearest-neighbour graph")
                .arg(input_arg("Self-comparison distances, condensed order"))
                .arg(column_arg())
                .arg(
                    Arg::new("cutoff")
                        .long("cutoff")
                        .help("Keep distances <= cutoff (0 disables)")
                        .value_parser(clap::value_parser!(f32))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("knn")
                        .long("knn")
                        .short('k')
                        .help("Keep the k nearest neighbours of each sample (0 disables)")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                )
                .arg(output_arg("sparse.tsv")),
        )
        .subcommand(
            Command::new("threshold")
                .about("Label (core, accessory) pairs against a decision boundary")
                .arg(input_arg("Two-column (core, accessory) distances"))
                .arg(
                    Arg::new("slope")
                        .long("slope")
                        .help("Boundary: 0 = vertical, 1 = horizontal, 2 = diagonal")
                        .value_parser(clap::value_parser!(i32))
                        .default_value("2"),
                )
                .arg(
                    Arg::new("x-max")
                        .long("x-max")
                        .help("Core intercept of the boundary")
                        .value_parser(clap::value_parser!(f32))
                        .required(true),
                )
                .arg(
                    Arg::new("y-max")
                        .long("y-max")
                        .help("Accessory intercept of the boundary")
                        .value_parser(clap::value_parser!(f32))
                        .required(true),
                )
                .arg(output_arg("labels.txt")),
        )
}

fn path_of<'a>(m: &'a ArgMatches, id: &str) -> Result<&'a PathBuf> {
    m.get_one::<PathBuf>(id).with_context(|| format!("missing --{id}"))
}

/// Condensed distances from one column of `path`; an empty file is an error.
fn read_long(path: &Path, column: usize) -> Result<Vec<f32>> {
    let long = read_column(path, column)?;
    if long.is_empty() {
        anyhow::bail!("{} holds no distances", path.display());
    }
    Ok(long)
}

fn run_square(m: &ArgMatches, threads: usize) -> Result<()> {
    let column = m.get_one::<usize>("column").copied().unwrap_or(0);
    let ref_ref = read_long(path_of(m, "input")?, column)?;
    let n_ref = samples_from_condensed_length(ref_ref.len())?;

    let query_ref = match m.get_one::<PathBuf>("query-ref") {
        Some(p) => Some(read_column(p, column)?),
        None => None,
    };
    let query_query = match m.get_one::<PathBuf>("query-query") {
        Some(p) => Some(read_column(p, column)?),
        None => None,
    };
    let block = match &query_ref {
        Some(qr) => {
            if qr.len() % n_ref != 0 {
                anyhow::bail!("{} query-ref distances do not divide into {n_ref} references", qr.len());
            }
            Some(ArrayView2::from_shape((n_ref, qr.len() / n_ref), qr.as_slice())?)
        }
        None => None,
    };

    let t0 = Instant::now();
    let square = assemble_square(&ref_ref, block, query_query.as_deref(), threads)?;
    info!("{0} x {0} matrix assembled in {1} ms", square.nrows(), t0.elapsed().as_millis());

    let written = write_square(None, square.view(), path_of(m, "output")?, m.get_flag("compress"))?;
    info!("Done → {}", written.display());
    Ok(())
}

fn run_sparse(m: &ArgMatches, threads: usize) -> Result<()> {
    let column = m.get_one::<usize>("column").copied().unwrap_or(0);
    let cutoff = m.get_one::<f32>("cutoff").copied().unwrap_or(0.0);
    let knn = m.get_one::<usize>("knn").copied().unwrap_or(0);

    let long = read_long(path_of(m, "input")?, column)?;
    let square = assemble_square(&long, None, None, threads)?;
    let coo = sparsify(square.view(), cutoff, knn, threads)?;

    let out = path_of(m, "output")?;
    write_coo(&coo, out)?;
    info!("Done → {} ({} edges)", out.display(), coo.len());
    Ok(())
}

fn run_threshold(m: &ArgMatches, threads: usize) -> Result<()> {
    let slope = BoundarySlope::try_from(m.get_one::<i32>("slope").copied().unwrap_or(2))?;
    let x_max = *m.get_one::<f32>("x-max").context("missing --x-max")?;
    let y_max = *m.get_one::<f32>("y-max").context("missing --y-max")?;

    let dists = read_table(path_of(m, "input")?)?;
    let labels = assign_threshold(dists.view(), slope, x_max, y_max, threads)?;

    let out = path_of(m, "output")?;
    write_labels(labels.view(), out)?;
    info!("Done → {} ({} labels, {:?} boundary)", out.display(), labels.len(), slope);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();

    let m = cli().get_matches();
    let (name, sub) = m.subcommand().context("no subcommand given")?;
    // global args are visible from the subcommand matches
    let threads = sub
        .get_one::<usize>("threads")
        .copied()
        .unwrap_or_else(num_cpus::get)
        .max(1);

    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("build global thread pool")?;
    info!("{} threads will be used", rayon::current_num_threads());

    match name {
        "square" => run_square(sub, threads),
        "sparse" => run_sparse(sub, threads),
        "threshold" => run_threshold(sub, threads),
        other => anyhow::bail!("unknown subcommand {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_threads_is_global() {
        let m = cli()
            .try_get_matches_from(["sketchdist", "sparse", "-i", "d.tsv", "--knn", "2", "-T", "3"])
            .unwrap();
        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "sparse");
        assert_eq!(sub.get_one::<usize>("threads"), Some(&3));
        assert_eq!(sub.get_one::<usize>("knn"), Some(&2));
    }

    #[test]
    fn test_empty_long_form_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.tsv");
        std::fs::write(&empty, "# no pairs\n").unwrap();
        assert!(read_long(&empty, 0).is_err());

        let one = dir.path().join("one.tsv");
        std::fs::write(&one, "0.1\t0.2\n").unwrap();
        assert_eq!(read_long(&one, 1).unwrap(), vec![0.2]);

        let m = cli()
            .try_get_matches_from(["sketchdist", "sparse", "-i", empty.to_str().unwrap(), "--knn", "1"])
            .unwrap();
        let (_, sub) = m.subcommand().unwrap();
        assert!(run_sparse(sub, 1).is_err());
    }
}
