//! Command line navmesh builder and path finder

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use detour::{load_nav_mesh_set_from_file, save_nav_mesh_set_to_file, NavMesh, NavMeshQuery, QueryFilter};
use recast_navigation::{
    generate_solo_nav_mesh, generate_tiled_nav_mesh, BuildSettings, OffMeshConnectionParams, SoloNavMeshConfig,
    TiledNavMeshConfig,
};

/// Builds Recast navigation meshes and finds paths on them
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a navigation mesh from input geometry
    Build {
        /// Geometry file, JSON `{positions, indices}` or OBJ
        #[clap(long, value_parser)]
        input: PathBuf,

        /// Output navmesh set file
        #[clap(long, value_parser)]
        output: PathBuf,

        /// JSON build settings
        #[clap(long, value_parser)]
        config: Option<PathBuf>,

        /// Build a tiled navmesh with tiles of this many cells
        #[clap(long)]
        tile_size: Option<i32>,

        /// Cell size (horizontal resolution)
        #[clap(long)]
        cs: Option<f32>,

        /// Cell height (vertical resolution)
        #[clap(long)]
        ch: Option<f32>,
    },

    /// Find a path on a navigation mesh
    FindPath {
        /// Navmesh set file
        #[clap(long, value_parser)]
        mesh: PathBuf,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector, allow_hyphen_values = true)]
        start: Vec3,

        /// End position (x,y,z)
        #[clap(long, value_parser = parse_vector, allow_hyphen_values = true)]
        end: Vec3,

        /// Output path file
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Print a summary of a navigation mesh
    Info {
        /// Navmesh set file
        #[clap(long, value_parser)]
        mesh: PathBuf,
    },
}

/// Indexed triangle soup
#[derive(Debug, Default, Deserialize)]
struct Geometry {
    positions: Vec<f32>,
    indices: Vec<i32>,
}

/// Contents of the `--config` file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BuildConfig {
    #[serde(flatten)]
    settings: BuildSettings,
    tile_size: Option<i32>,
    off_mesh_connections: Vec<OffMeshConnectionParams>,
}

/// Parse a comma-separated vector
fn parse_vector(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').collect();

    if parts.len() != 3 {
        return Err(format!("Vector must have 3 components, got {}", parts.len()));
    }

    let x = parts[0].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let y = parts[1].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let z = parts[2].trim().parse::<f32>().map_err(|e| e.to_string())?;

    Ok(Vec3::new(x, y, z))
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Build {
            input,
            output,
            config,
            tile_size,
            cs,
            ch,
        } => {
            let mut build_config = match config {
                Some(path) => load_config(&path)?,
                None => BuildConfig::default(),
            };
            if tile_size.is_some() {
                build_config.tile_size = tile_size;
            }
            if let Some(cs) = cs {
                build_config.settings.cs = cs;
            }
            if let Some(ch) = ch {
                build_config.settings.ch = ch;
            }
            build_mesh(&input, &output, build_config)
        }
        Commands::FindPath {
            mesh,
            start,
            end,
            output,
        } => find_path(&mesh, start, end, output.as_deref()),
        Commands::Info { mesh } => info(&mesh),
    }
}

fn load_config(path: &Path) -> Result<BuildConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config: {}", path.display()))
}

/// Loads geometry from a JSON or OBJ file, chosen by extension
fn load_geometry(path: &Path) -> Result<Geometry> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read geometry: {}", path.display()))?;
    let is_obj = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("obj"));

    let geometry = if is_obj {
        parse_obj(&text)?
    } else {
        serde_json::from_str(&text).with_context(|| format!("Invalid geometry: {}", path.display()))?
    };

    if geometry.positions.len() % 3 != 0 || geometry.indices.len() % 3 != 0 {
        bail!("positions and indices must come in triples");
    }
    let vert_count = (geometry.positions.len() / 3) as i32;
    if let Some(bad) = geometry.indices.iter().find(|&&i| i < 0 || i >= vert_count) {
        bail!("index {} out of range for {} vertices", bad, vert_count);
    }
    Ok(geometry)
}

/// Reads `v` and `f` records, fan triangulating polygons
fn parse_obj(text: &str) -> Result<Geometry> {
    let mut geometry = Geometry::default();
    for (line_no, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("v") => {
                for _ in 0..3 {
                    let value = fields
                        .next()
                        .ok_or_else(|| anyhow!("line {}: vertex needs 3 coordinates", line_no + 1))?;
                    geometry
                        .positions
                        .push(value.parse::<f32>().with_context(|| format!("line {}", line_no + 1))?);
                }
            }
            Some("f") => {
                let vert_count = (geometry.positions.len() / 3) as i32;
                let face = fields
                    .map(|f| {
                        let index: i32 = f
                            .split('/')
                            .next()
                            .unwrap_or_default()
                            .parse::<i32>()
                            .with_context(|| format!("line {}", line_no + 1))?;
                        // 1-based, negative counts back from the last vertex
                        Ok(if index < 0 { vert_count + index } else { index - 1 })
                    })
                    .collect::<Result<Vec<i32>>>()?;
                for i in 2..face.len() {
                    geometry.indices.extend_from_slice(&[face[0], face[i - 1], face[i]]);
                }
            }
            _ => {}
        }
    }
    Ok(geometry)
}

/// Build a navigation mesh and save it as a navmesh set
fn build_mesh(input: &Path, output: &Path, config: BuildConfig) -> Result<()> {
    println!("Loading geometry from {}...", input.display());
    let geometry = load_geometry(input)?;
    println!(
        "Geometry loaded: {} vertices, {} triangles",
        geometry.positions.len() / 3,
        geometry.indices.len() / 3
    );

    let nav_mesh = match config.tile_size {
        Some(tile_size) => {
            println!("Building tiled navigation mesh with {} cell tiles...", tile_size);
            let config = TiledNavMeshConfig {
                settings: config.settings,
                tile_size,
                off_mesh_connections: config.off_mesh_connections,
            };
            generate_tiled_nav_mesh(&geometry.positions, &geometry.indices, &config, false).into_result()
        }
        None => {
            println!("Building solo navigation mesh...");
            let config = SoloNavMeshConfig {
                settings: config.settings,
                off_mesh_connections: config.off_mesh_connections,
            };
            generate_solo_nav_mesh(&geometry.positions, &geometry.indices, &config, false).into_result()
        }
    }
    .map_err(|e| anyhow!("Failed to build navigation mesh: {}", e))?;

    println!(
        "Navigation mesh built: {} tiles, {} polygons",
        nav_mesh.tile_count(),
        poly_count(&nav_mesh)
    );

    println!("Saving navigation mesh to {}...", output.display());
    save_nav_mesh_set_to_file(&nav_mesh, output)
        .map_err(|e| anyhow!("Failed to save navigation mesh: {}", e))?;
    Ok(())
}

fn load_nav_mesh(path: &Path) -> Result<NavMesh> {
    println!("Loading navigation mesh from {}...", path.display());
    load_nav_mesh_set_from_file(path).map_err(|e| anyhow!("Failed to load navigation mesh: {}", e))
}

fn poly_count(nav_mesh: &NavMesh) -> usize {
    nav_mesh.tiles().map(|t| t.polys.len()).sum()
}

/// Straight path between the mesh points closest to `start` and `end`
fn compute_path(nav_mesh: &NavMesh, start: Vec3, end: Vec3) -> Result<Vec<[f32; 3]>> {
    let mut query = NavMeshQuery::new(nav_mesh);
    query
        .compute_path(&start.to_array(), &end.to_array(), &QueryFilter::default())
        .map_err(|e| anyhow!("Failed to find path: {}", e))
}

/// Find a path on a navigation mesh
fn find_path(mesh_path: &Path, start: Vec3, end: Vec3, output: Option<&Path>) -> Result<()> {
    let nav_mesh = load_nav_mesh(mesh_path)?;

    println!("Finding path from {:?} to {:?}...", start, end);
    let path = compute_path(&nav_mesh, start, end)?;
    println!("Generated straight path with {} waypoints", path.len());

    if let Some(output_path) = output {
        println!("Saving path to {}...", output_path.display());

        let mut file = File::create(output_path)
            .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;

        writeln!(file, "# Path from {:?} to {:?}", start, end)?;
        writeln!(file, "# {} waypoints", path.len())?;
        for waypoint in &path {
            writeln!(file, "{},{},{}", waypoint[0], waypoint[1], waypoint[2])?;
        }
    } else {
        println!("Path:");
        for (i, waypoint) in path.iter().enumerate() {
            println!("{}: {},{},{}", i, waypoint[0], waypoint[1], waypoint[2]);
        }
    }

    Ok(())
}

fn info(mesh_path: &Path) -> Result<()> {
    let nav_mesh = load_nav_mesh(mesh_path)?;
    let params = nav_mesh.params();

    println!("Origin: {:?}", params.origin);
    println!("Tile size: {} x {}", params.tile_width, params.tile_height);
    println!("Tiles: {} of {}", nav_mesh.tile_count(), params.max_tiles);
    println!("Polygons: {}", poly_count(&nav_mesh));
    for tile in nav_mesh.tiles() {
        if let Some(header) = &tile.header {
            println!(
                "  tile ({}, {}, {}): {} polygons, {} off-mesh connections",
                header.x, header.y, header.layer, header.poly_count, header.off_mesh_con_count
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PLANE_JSON: &str = r#"{
        "positions": [0, 0, 0, 0, 0, 10, 10, 0, 10, 10, 0, 0],
        "indices": [0, 1, 2, 0, 2, 3]
    }"#;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("1,2.5,-3").unwrap(), Vec3::new(1.0, 2.5, -3.0));
        assert_eq!(parse_vector(" 1, 2, 3").unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert!(parse_vector("1,2").is_err());
        assert!(parse_vector("1,x,3").is_err());
    }

    #[test]
    fn test_parse_obj() {
        let obj = "# quad\nv 0 0 0\nv 0 0 10\nv 10 0 10\nv 10 0 0\nvn 0 1 0\nf 1//1 2//1 3//1 4//1\n";
        let geometry = parse_obj(obj).unwrap();
        assert_eq!(geometry.positions.len(), 12);
        assert_eq!(geometry.indices, vec![0, 1, 2, 0, 2, 3]);

        let relative = parse_obj("v 0 0 0\nv 1 0 0\nv 1 0 1\nf -3 -2 -1\n").unwrap();
        assert_eq!(relative.indices, vec![0, 1, 2]);
        assert!(parse_obj("v 0 0\n").is_err());
    }

    #[test]
    fn test_geometry_is_validated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"positions": [0, 0, 0], "indices": [0, 1, 2]}"#).unwrap();
        assert!(load_geometry(&path).is_err());
    }

    #[test]
    fn test_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"cs": 0.25, "walkable_radius": 2, "tile_size": 16}"#).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.settings.cs, 0.25);
        assert_eq!(config.settings.walkable_radius, 2);
        assert_eq!(config.settings.ch, 0.2);
        assert_eq!(config.tile_size, Some(16));
        assert!(config.off_mesh_connections.is_empty());
    }

    #[test]
    fn test_build_then_find_path() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("plane.json");
        let output = dir.path().join("plane.bin");
        fs::write(&input, PLANE_JSON).unwrap();

        build_mesh(&input, &output, BuildConfig::default()).unwrap();
        let nav_mesh = load_nav_mesh_set_from_file(&output).unwrap();
        assert_eq!(nav_mesh.tile_count(), 1);

        let path = compute_path(&nav_mesh, Vec3::new(1.0, 0.0, 1.0), Vec3::new(9.0, 0.0, 9.0)).unwrap();
        assert!(path.len() >= 2);

        let path_file = dir.path().join("path.txt");
        find_path(&output, Vec3::new(1.0, 0.0, 1.0), Vec3::new(9.0, 0.0, 5.0), Some(&path_file)).unwrap();
        let written = fs::read_to_string(&path_file).unwrap();
        assert!(written.lines().filter(|l| !l.starts_with('#')).count() >= 2);
    }

    #[test]
    fn test_build_tiled() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("plane.json");
        let output = dir.path().join("tiled.bin");
        fs::write(&input, PLANE_JSON).unwrap();

        let config = BuildConfig {
            tile_size: Some(16),
            ..Default::default()
        };
        build_mesh(&input, &output, config).unwrap();
        let nav_mesh = load_nav_mesh_set_from_file(&output).unwrap();
        assert!(nav_mesh.tile_count() > 1);
        assert!(info(&output).is_ok());
    }

    #[test]
    fn test_missing_mesh_file() {
        let dir = tempdir().unwrap();
        assert!(find_path(&dir.path().join("missing.bin"), Vec3::ZERO, Vec3::ONE, None).is_err());
    }
}
