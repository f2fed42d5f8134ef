use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{PagerError, Result};
use crate::loader::request::PayloadKind;
use crate::types::{MAX_LEVEL, Mbr, SINGLE_FRAME};

/// Which fetch-request building strategy a loader uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LoaderMode {
    /// One image/elevation payload per tile.
    #[default]
    #[value(name = "single-frame")]
    SingleFrame,
    /// One payload per animation frame per tile.
    #[value(name = "multi-frame")]
    MultiFrame,
    /// One opaque object payload (e.g. vector data) per tile.
    #[value(name = "object")]
    Object,
}

impl LoaderMode {
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            LoaderMode::SingleFrame | LoaderMode::MultiFrame => PayloadKind::Tile,
            LoaderMode::Object => PayloadKind::Object,
        }
    }

    /// Frame index carried by requests and deliveries for slot `slot`.
    pub fn frame_index(&self, slot: usize, num_frames: usize) -> i32 {
        if num_frames > 1 { slot as i32 } else { SINGLE_FRAME }
    }
}

impl std::fmt::Display for LoaderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderMode::SingleFrame => write!(f, "single-frame"),
            LoaderMode::MultiFrame => write!(f, "multi-frame"),
            LoaderMode::Object => write!(f, "object"),
        }
    }
}

/// Loader construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub num_frames: usize,
    pub mode: LoaderMode,
    /// Count tile rows from the top edge instead of the bottom.
    pub flip_y: bool,
    /// Verbose per-request logging. Never changes behavior.
    pub debug_mode: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            num_frames: 1,
            mode: LoaderMode::SingleFrame,
            flip_y: false,
            debug_mode: false,
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_frames == 0 {
            return Err(PagerError::Config("loader needs at least one frame".into()));
        }
        if matches!(self.mode, LoaderMode::SingleFrame | LoaderMode::Object) && self.num_frames != 1 {
            return Err(PagerError::Config(format!(
                "{} loader takes exactly one frame, got {}",
                self.mode, self.num_frames
            )));
        }
        Ok(())
    }
}

/// Cull tree and sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullConfig {
    pub max_depth: u32,
    pub max_draw_per_node: usize,
    /// Upper bound on simultaneously wanted tiles per loader.
    pub max_tiles: usize,
}

impl Default for CullConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_draw_per_node: 16,
            max_tiles: 64,
        }
    }
}

/// Parameters of a simulated camera session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of viewpoint updates.
    pub steps: u32,
    /// Synthetic drawables scattered over the root bounds.
    pub drawables: usize,
    /// Every n-th fetch fails; 0 disables failures.
    pub fail_every: u64,
    /// View size as a fraction of the root bounds.
    pub view_fraction: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: 16,
            drawables: 2_000,
            fail_every: 0,
            view_fraction: 0.25,
        }
    }
}

/// Fully resolved session configuration (from CLI args or a JSON file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub bounds: Mbr,
    pub loader: LoaderConfig,
    pub cull: CullConfig,
    pub simulation: SimulationConfig,
    pub threads: Option<usize>,
    pub verbose: bool,
    pub json: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bounds: Mbr::from_coords(-180.0, -90.0, 180.0, 90.0),
            loader: LoaderConfig::default(),
            cull: CullConfig::default(),
            simulation: SimulationConfig::default(),
            threads: None,
            verbose: false,
            json: false,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        config.loader.validate()?;
        Ok(config)
    }
}

/// CLI argument definition (clap derive).
#[derive(Parser, Debug)]
#[command(
    name = "quad-pager",
    about = "Simulate quad-tree tile paging against a panning viewpoint",
    version
)]
pub struct CliArgs {
    /// JSON session file; overrides every option except -v and --json
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Frames per tile
    #[arg(long, default_value_t = 1)]
    pub frames: usize,

    /// Loader mode
    #[arg(long, value_enum, default_value = "single-frame")]
    pub mode: LoaderMode,

    /// Count tile rows from the top edge
    #[arg(long)]
    pub flip_y: bool,

    /// Per-request debug logging
    #[arg(long)]
    pub debug: bool,

    /// Max cull tree depth (1..=31)
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_LEVEL)))]
    pub max_depth: u32,

    /// Max drawables per cull tree leaf
    #[arg(long, default_value_t = 16)]
    pub max_draw: usize,

    /// Max tiles wanted at once
    #[arg(long, default_value_t = 64)]
    pub max_tiles: usize,

    /// Viewpoint updates to simulate
    #[arg(long, default_value_t = 16)]
    pub steps: u32,

    /// Synthetic drawable count
    #[arg(long, default_value_t = 2_000)]
    pub drawables: usize,

    /// Fail every n-th fetch (0 = never)
    #[arg(long, default_value_t = 0)]
    pub fail_every: u64,

    /// Print the session report as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Fetch worker thread count (default: all cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}

impl From<CliArgs> for SessionConfig {
    fn from(args: CliArgs) -> Self {
        SessionConfig {
            loader: LoaderConfig {
                num_frames: args.frames,
                mode: args.mode,
                flip_y: args.flip_y,
                debug_mode: args.debug,
            },
            cull: CullConfig {
                max_depth: args.max_depth,
                max_draw_per_node: args.max_draw,
                max_tiles: args.max_tiles,
            },
            simulation: SimulationConfig {
                steps: args.steps,
                drawables: args.drawables,
                fail_every: args.fail_every,
                ..SimulationConfig::default()
            },
            threads: args.threads,
            verbose: args.verbose,
            json: args.json,
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_loader_config() {
        let lc = LoaderConfig::default();
        assert_eq!(lc.num_frames, 1);
        assert_eq!(lc.mode, LoaderMode::SingleFrame);
        assert!(!lc.flip_y);
        assert!(!lc.debug_mode);
        assert!(lc.validate().is_ok());
    }

    #[test]
    fn validate_frame_counts() {
        let multi = LoaderConfig {
            num_frames: 4,
            mode: LoaderMode::MultiFrame,
            ..Default::default()
        };
        assert!(multi.validate().is_ok());

        let bad_single = LoaderConfig {
            num_frames: 2,
            ..Default::default()
        };
        assert!(matches!(bad_single.validate(), Err(PagerError::Config(_))));

        let bad_object = LoaderConfig {
            num_frames: 3,
            mode: LoaderMode::Object,
            ..Default::default()
        };
        assert!(bad_object.validate().is_err());

        let zero = LoaderConfig {
            num_frames: 0,
            mode: LoaderMode::MultiFrame,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn mode_frame_indices_and_kinds() {
        assert_eq!(LoaderMode::SingleFrame.frame_index(0, 1), SINGLE_FRAME);
        assert_eq!(LoaderMode::MultiFrame.frame_index(0, 1), SINGLE_FRAME);
        assert_eq!(LoaderMode::MultiFrame.frame_index(2, 3), 2);
        assert_eq!(LoaderMode::Object.payload_kind(), PayloadKind::Object);
        assert_eq!(LoaderMode::MultiFrame.payload_kind(), PayloadKind::Tile);
    }

    #[test]
    fn mode_display() {
        assert_eq!(LoaderMode::SingleFrame.to_string(), "single-frame");
        assert_eq!(LoaderMode::MultiFrame.to_string(), "multi-frame");
        assert_eq!(LoaderMode::Object.to_string(), "object");
    }

    #[test]
    fn cli_args_to_session_config() {
        let args = CliArgs::parse_from([
            "quad-pager",
            "--frames",
            "3",
            "--mode",
            "multi-frame",
            "--flip-y",
            "--max-depth",
            "5",
            "--max-tiles",
            "20",
            "--steps",
            "4",
            "--fail-every",
            "7",
            "-v",
            "-j",
            "2",
        ]);
        let config: SessionConfig = args.into();

        assert_eq!(config.loader.num_frames, 3);
        assert_eq!(config.loader.mode, LoaderMode::MultiFrame);
        assert!(config.loader.flip_y);
        assert!(!config.loader.debug_mode);
        assert_eq!(config.cull.max_depth, 5);
        assert_eq!(config.cull.max_tiles, 20);
        assert_eq!(config.simulation.steps, 4);
        assert_eq!(config.simulation.fail_every, 7);
        assert!(config.verbose);
        assert_eq!(config.threads, Some(2));
    }

    #[test]
    fn cli_rejects_unaddressable_depth() {
        assert!(CliArgs::try_parse_from(["quad-pager", "--max-depth", "32"]).is_err());
        assert!(CliArgs::try_parse_from(["quad-pager", "--max-depth", "0"]).is_err());
        let args = CliArgs::try_parse_from(["quad-pager", "--max-depth", "31"]).unwrap();
        assert_eq!(args.max_depth, MAX_LEVEL);
    }

    #[test]
    fn cli_args_minimal() {
        let config: SessionConfig = CliArgs::parse_from(["quad-pager"]).into();
        assert_eq!(config.loader, LoaderConfig::default());
        assert_eq!(config.cull, CullConfig::default());
        assert_eq!(config.threads, None);
        assert!(!config.json);
    }

    #[test]
    fn session_config_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "loader": {{ "num_frames": 2, "mode": "multi-frame", "debug_mode": true }},
                "cull": {{ "max_depth": 3 }},
                "simulation": {{ "steps": 2 }}
            }}"#
        )
        .unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.loader.num_frames, 2);
        assert_eq!(config.loader.mode, LoaderMode::MultiFrame);
        assert!(config.loader.debug_mode);
        assert_eq!(config.cull.max_depth, 3);
        assert_eq!(config.cull.max_draw_per_node, 16);
        assert_eq!(config.simulation.steps, 2);
        assert_eq!(config.bounds, SessionConfig::default().bounds);
    }

    #[test]
    fn session_config_rejects_invalid_loader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "loader": {{ "num_frames": 2 }} }}"#).unwrap();
        let err = SessionConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, PagerError::Config(_)));
    }
}
