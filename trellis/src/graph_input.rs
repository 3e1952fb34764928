//! Input plumbing for the spatial pipeline: node features, spatial
//! edges (persisted edge list or coordinates + kNN), and walk roots.

use crate::common::*;
use std::collections::HashMap;

pub struct SpatialGraphData {
    pub graph: NeighborGraph,
    /// Node feature matrix (nodes x features)
    pub features: Mat,
    pub node_names: Vec<Box<str>>,
}

pub struct GraphInputArgs<'a> {
    pub feature_file: &'a str,
    pub edge_file: Option<&'a str>,
    pub coord_file: Option<&'a str>,
    pub knn: usize,
}

/// Read a named matrix, dispatching on the file extension like the
/// other tools: `.parquet` or delimited text with a header line.
pub fn read_named_matrix(file_path: &str) -> anyhow::Result<MatWithNames<Mat>> {
    Ok(match file_ext(file_path)?.as_ref() {
        "parquet" => Mat::from_parquet(file_path)?,
        _ => Mat::read_with_row_names(file_path, &['\t', ',', ' '], true)?,
    })
}

pub fn read_spatial_graph(args: GraphInputArgs) -> anyhow::Result<SpatialGraphData> {
    let MatWithNames {
        rows: node_names,
        cols: _,
        mat: features,
    } = read_named_matrix(args.feature_file)?;

    let nn = features.nrows();
    info!(
        "{} nodes with {} features from {}",
        nn,
        features.ncols(),
        args.feature_file
    );

    let graph = match (args.edge_file, args.coord_file) {
        (Some(edge_file), _) => {
            let edges = read_edge_list(edge_file, &node_names)?;
            info!("{} edges from {}", edges.len(), edge_file);
            NeighborGraph::from_edge_list(nn, &edges, None)?
        }
        (None, Some(coord_file)) => {
            let MatWithNames {
                rows: coord_names,
                cols: _,
                mat: coords,
            } = read_named_matrix(coord_file)?;

            if coord_names != node_names {
                anyhow::bail!(
                    "coordinate rows in {} don't match the feature rows",
                    coord_file
                );
            }

            NeighborGraph::from_rows(
                &coords,
                KnnGraphArgs {
                    knn: args.knn,
                    reciprocal: true,
                    ..Default::default()
                },
            )?
        }
        (None, None) => {
            anyhow::bail!("either an edge list or a coordinate file is required")
        }
    };

    info!(
        "spatial graph: {} nodes, {} edges",
        graph.num_nodes(),
        graph.num_edges()
    );

    Ok(SpatialGraphData {
        graph,
        features,
        node_names,
    })
}

/// Edge list rows are `src dst [dist]`, endpoints given either as
/// 0-based indices or as node names.
fn read_edge_list(
    edge_file: &str,
    node_names: &[Box<str>],
) -> anyhow::Result<Vec<(usize, usize)>> {
    let name2index: HashMap<&str, usize> = node_names
        .iter()
        .enumerate()
        .map(|(i, x)| (x.as_ref(), i))
        .collect();

    let resolve = |token: &str, line_no: usize| -> anyhow::Result<usize> {
        if let Ok(idx) = token.parse::<usize>() {
            return Ok(idx);
        }
        name2index.get(token).copied().ok_or_else(|| {
            anyhow::anyhow!("{}: line {}: unknown node '{}'", edge_file, line_no, token)
        })
    };

    let mut edges = vec![];
    for (i, line) in read_lines(edge_file)?.into_iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
            continue;
        }
        let tokens: Vec<&str> = line
            .split(|c: char| c == ' ' || c == '\t' || c == ',')
            .filter(|x| !x.is_empty())
            .collect();
        if tokens.len() < 2 {
            anyhow::bail!("{}: line {}: expected `src dst [dist]`", edge_file, i + 1);
        }
        edges.push((resolve(tokens[0], i + 1)?, resolve(tokens[1], i + 1)?));
    }

    if edges.is_empty() {
        anyhow::bail!("no edges in {}", edge_file);
    }
    Ok(edges)
}

/// Walk roots, one node per line (0-based index or node name); a
/// single leading header line is tolerated.
pub fn read_root_nodes(
    root_file: &str,
    node_names: &[Box<str>],
) -> anyhow::Result<Vec<usize>> {
    let name2index: HashMap<&str, usize> = node_names
        .iter()
        .enumerate()
        .map(|(i, x)| (x.as_ref(), i))
        .collect();

    let nn = node_names.len();
    let mut roots = vec![];

    for (i, line) in read_lines(root_file)?.into_iter().enumerate() {
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        if let Ok(idx) = token.parse::<usize>() {
            if idx >= nn {
                anyhow::bail!("{}: line {}: root {} out of range", root_file, i + 1, idx);
            }
            roots.push(idx);
        } else if let Some(&idx) = name2index.get(token) {
            roots.push(idx);
        } else if i == 0 {
            continue; // header line
        } else {
            anyhow::bail!("{}: line {}: unknown root '{}'", root_file, i + 1, token);
        }
    }

    if roots.is_empty() {
        anyhow::bail!("no walk roots in {}", root_file);
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_feature_file(dir: &std::path::Path) -> anyhow::Result<String> {
        let file = dir.join("features.tsv");
        std::fs::write(
            &file,
            "node\tf1\tf2\nn0\t1\t0\nn1\t0\t1\nn2\t1\t1\nn3\t0\t0\n",
        )?;
        Ok(file.to_str().unwrap().to_string())
    }

    #[test]
    fn test_read_graph_from_edge_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let features = write_feature_file(dir.path())?;

        let edge_file = dir.path().join("edges.tsv");
        std::fs::write(&edge_file, "n0\tn1\nn1\tn2\n2\t3\n")?;

        let data = read_spatial_graph(GraphInputArgs {
            feature_file: &features,
            edge_file: Some(edge_file.to_str().unwrap()),
            coord_file: None,
            knn: 0,
        })?;

        assert_eq!(data.graph.num_nodes(), 4);
        assert_eq!(data.graph.num_edges(), 3);
        assert_eq!(data.node_names[2].as_ref(), "n2");
        assert_eq!(data.features[(0, 0)], 1.0);
        Ok(())
    }

    #[test]
    fn test_read_root_nodes_mixed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let roots_file = dir.path().join("roots.csv");
        std::fs::write(&roots_file, "0\nn2\n1\n")?;

        let names: Vec<Box<str>> = vec!["n0".into(), "n1".into(), "n2".into()];
        let roots = read_root_nodes(roots_file.to_str().unwrap(), &names)?;
        assert_eq!(roots, vec![0, 2, 1]);
        Ok(())
    }

    #[test]
    fn test_read_root_nodes_header_and_errors() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let names: Vec<Box<str>> = vec!["n0".into(), "n1".into()];

        let with_header = dir.path().join("with_header.csv");
        std::fs::write(&with_header, "root\n1\n0\n")?;
        let roots = read_root_nodes(with_header.to_str().unwrap(), &names)?;
        assert_eq!(roots, vec![1, 0]);

        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "0\nnope\n")?;
        assert!(read_root_nodes(bad.to_str().unwrap(), &names).is_err());

        let out_of_range = dir.path().join("range.csv");
        std::fs::write(&out_of_range, "5\n")?;
        assert!(read_root_nodes(out_of_range.to_str().unwrap(), &names).is_err());
        Ok(())
    }
}
