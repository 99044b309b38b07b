use anyhow::{Context, Result};
use cavegraph::address::make_filepath;
use cavegraph::config::CleaningConfig;
use cavegraph::connection::{
    ConnectionParams, apply_connections, find_disconnected_nodes, get_potential_connection,
};
use cavegraph::export::geojson::write_geojson;
use cavegraph::export::{GocadDataType, GocadOptions, ShapeKind, export_to_gocad, to_shapefile};
use cavegraph::io::{load_csv, load_json, save_json, write_connections_csv};
use cavegraph::{CaveGraph, NodeKey};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at DEBUG level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Args, Debug)]
struct GraphInput {
    /// Graph JSON document, or the node table when --edges is given
    #[arg(short, long, env = "CAVEGRAPH_INPUT")]
    input: PathBuf,

    /// Edge table; switches the input to CSV
    #[arg(long)]
    edges: Option<PathBuf>,
}

impl GraphInput {
    fn load(&self) -> Result<CaveGraph> {
        let graph = match &self.edges {
            Some(edges) => load_csv(&self.input, edges),
            None => load_json(&self.input),
        };
        graph.with_context(|| format!("loading {}", self.input.display()))
    }
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Apply manual flags and extra shots, then remove flagged shots
    Clean {
        #[command(flatten)]
        input: GraphInput,
        #[arg(short, long, env = "CAVEGRAPH_CONFIG")]
        config: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List stations that became dead ends when flagged shots were removed
    Disconnected {
        #[command(flatten)]
        input: GraphInput,
        /// Cleaned graph JSON
        #[arg(long)]
        cleaned: PathBuf,
    },
    /// Propose shots reconnecting nearby dead ends
    Connect {
        #[command(flatten)]
        input: GraphInput,
        #[arg(long, env = "CAVEGRAPH_CONFIG")]
        config: Option<PathBuf>,
        #[arg(long)]
        dist_horiz_max: Option<f64>,
        #[arg(long)]
        dist_vert_max: Option<f64>,
        #[arg(long)]
        node_deg: Option<usize>,
        #[arg(long)]
        exclude_neighbors_up_to_edge: Option<usize>,
        /// CSV of proposals
        #[arg(short, long)]
        output: PathBuf,
        /// Also write the graph with the proposals added
        #[arg(long)]
        apply: Option<PathBuf>,
    },
    /// Write Gocad, shapefile or GeoJSON output
    Export {
        #[command(flatten)]
        input: GraphInput,
        #[arg(long, env = "CAVEGRAPH_CONFIG")]
        config: Option<PathBuf>,
        #[arg(short, long, value_enum)]
        format: ExportFormat,
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ExportFormat {
    GocadLines,
    GocadPoints,
    Shapefile,
    Geojson,
}

fn load_config(path: Option<&Path>) -> Result<CleaningConfig> {
    match path {
        Some(path) => CleaningConfig::load(path)
            .with_context(|| format!("reading config {}", path.display())),
        None => Ok(CleaningConfig::default()),
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    match args.cmd {
        Command::Clean {
            input,
            config,
            output,
        } => {
            let mut graph = input.load()?;
            let config = load_config(config.as_deref())?;
            let report = config.apply(&mut graph)?;
            info!(
                "clean: {} shots and {} stations removed",
                report.shots_removed, report.stations_removed
            );
            save_json(&graph, &output)?;
        }
        Command::Disconnected { input, cleaned } => {
            let original = input.load()?;
            let cleaned = load_json(&cleaned)?;
            match find_disconnected_nodes(&original, &cleaned)? {
                Some(keys) => {
                    for key in keys {
                        println!("{}", key);
                    }
                }
                None => println!("graph is connected"),
            }
        }
        Command::Connect {
            input,
            config,
            dist_horiz_max,
            dist_vert_max,
            node_deg,
            exclude_neighbors_up_to_edge,
            output,
            apply,
        } => {
            let mut graph = input.load()?;
            let mut params = load_config(config.as_deref())?
                .connection
                .unwrap_or_else(|| ConnectionParams::new(f64::NAN, f64::NAN));
            if let Some(d) = dist_horiz_max {
                params.dist_horiz_max = d;
            }
            if let Some(d) = dist_vert_max {
                params.dist_vert_max = d;
            }
            if let Some(d) = node_deg {
                params.node_deg = d;
            }
            if let Some(d) = exclude_neighbors_up_to_edge {
                params.exclude_neighbors_up_to_edge = d;
            }
            params.with_distance = true;
            params.with_angles = true;
            params.validate().context(
                "set --dist-horiz-max and --dist-vert-max or a connection section in the config",
            )?;

            let proposals = get_potential_connection(&graph, &params)?;
            write_connections_csv(&output, &proposals)?;
            if let Some(path) = apply {
                apply_connections(&mut graph, &proposals)?;
                save_json(&graph, &path)?;
            }
        }
        Command::Export {
            input,
            config,
            format,
            output_dir,
        } => {
            let graph = input.load()?;
            let export = load_config(config.as_deref())?.export;
            let dir = make_filepath(&output_dir, "")?;
            match format {
                ExportFormat::GocadLines | ExportFormat::GocadPoints => {
                    let opts = GocadOptions {
                        data_type: match format {
                            ExportFormat::GocadPoints => GocadDataType::Points,
                            _ => GocadDataType::Lines,
                        },
                        properties: export.properties.clone(),
                        nodata_value: export.nodata_value.clone(),
                        name: dir.join(&export.name).to_string_lossy().to_string(),
                        node_ids: Vec::new(),
                    };
                    export_to_gocad(&graph, &opts)?;
                }
                ExportFormat::Shapefile => {
                    let positions = graph.positions_3d();
                    let links: Vec<(NodeKey, NodeKey)> =
                        graph.shots().map(|(u, v, _)| (u, v)).collect();
                    let prefix = format!("{}_", export.name);
                    for kind in [ShapeKind::Nodes, ShapeKind::Edges] {
                        to_shapefile(
                            &positions,
                            &links,
                            kind,
                            export.crs_wkt.as_deref(),
                            &dir,
                            &prefix,
                        )?;
                    }
                }
                ExportFormat::Geojson => {
                    write_geojson(&graph, &dir.join(format!("{}.geojson", export.name)))?;
                }
            }
        }
    }

    Ok(())
}
