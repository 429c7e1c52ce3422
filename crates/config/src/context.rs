//! Per-unit evaluation state threaded through the evaluator. See spec.md
//! §3 (ParsingContext), §4.3 (parse-depth guard), §5 (deep-copy-on-clone).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{ParseCache, PartialParseCache};
use crate::errors::{ConfigError, Result};
use crate::include::TrackInclude;

/// Stack-overflow guard on recursive descent (include, nested
/// `read_terragrunt_config`-style reads). Spec.md §3.
pub const MAX_PARSE_DEPTH: u32 = 1000;

/// Block kinds that `partial parsing` may be asked to decode (spec.md
/// §4.3). Every other block in a file is stored raw and left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockKind {
    Dependencies,
    Dependency,
    Terraform,
    RemoteState,
    FeatureFlags,
    Engine,
    Exclude,
    Errors,
    Flags,
    VersionConstraints,
    TerraformSource,
    Locals,
    Include,
}

impl BlockKind {
    /// The HCL block identifier this kind decodes.
    fn identifier(self) -> &'static str {
        match self {
            BlockKind::Dependencies => "dependencies",
            BlockKind::Dependency => "dependency",
            BlockKind::Terraform => "terraform",
            BlockKind::RemoteState => "remote_state",
            BlockKind::FeatureFlags => "feature_flags",
            BlockKind::Engine => "engine",
            BlockKind::Exclude => "exclude",
            BlockKind::Errors => "errors",
            BlockKind::Flags => "flags",
            BlockKind::VersionConstraints => "terraform_version_constraint",
            BlockKind::TerraformSource => "terraform_source",
            BlockKind::Locals => "locals",
            BlockKind::Include => "include",
        }
    }
}

/// Per-unit evaluation state. Cloned on every recursion step; maps are
/// deep-copied on `Clone` so credential injection on one clone (e.g. a
/// SOPS decrypt setting `Env["TOKEN"]`) cannot leak to a sibling clone
/// used by a concurrent worker (spec.md §3, §5, §8 scenario 6).
#[derive(Debug, Clone)]
pub struct ParsingContext {
    pub config_path: PathBuf,
    pub working_dir: PathBuf,
    pub locals: BTreeMap<String, hcl::Value>,
    pub feature_flags: BTreeMap<String, hcl::Value>,
    pub decoded_dependencies: BTreeMap<String, hcl::Value>,
    pub track_include: TrackInclude,
    pub parse_depth: u32,
    pub partial_decode_list: Vec<BlockKind>,
    pub env: BTreeMap<String, String>,
    pub skip_outputs_resolution: bool,

    // Shared, not deep-copied: process-wide caches are intentionally
    // shared across clones (documented exception to the deep-copy rule;
    // spec.md §9 "any field holding a pointer to mutable state must
    // either be deep-copied or explicitly documented as shared").
    pub parse_cache: Arc<ParseCache>,
    pub partial_parse_cache: Arc<PartialParseCache>,
}

impl ParsingContext {
    pub fn new(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let working_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            working_dir,
            locals: BTreeMap::new(),
            feature_flags: BTreeMap::new(),
            decoded_dependencies: BTreeMap::new(),
            track_include: TrackInclude::default(),
            parse_depth: 0,
            partial_decode_list: Vec::new(),
            env: BTreeMap::new(),
            skip_outputs_resolution: false,
            parse_cache: Arc::new(ParseCache::new()),
            partial_parse_cache: Arc::new(PartialParseCache::new()),
        })
    }

    /// Re-roots the context at a new config path; `working_dir` always
    /// equals `dir(config_path)` afterwards (spec.md §3 invariant (c)).
    pub fn with_config_path(mut self, config_path: impl Into<PathBuf>) -> Self {
        self.config_path = config_path.into();
        self.working_dir = self
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self
    }

    pub fn with_partial_decode_list(mut self, blocks: Vec<BlockKind>) -> Self {
        self.partial_decode_list = blocks;
        self
    }

    pub fn is_partial(&self) -> bool {
        !self.partial_decode_list.is_empty()
    }

    /// Clones the context for one recursive descent step, incrementing
    /// `parse_depth` and failing if `MAX_PARSE_DEPTH` would be exceeded
    /// (spec.md §4.3, §8 "Max parse depth").
    pub fn descend(&self, next_config_path: impl Into<PathBuf>) -> Result<Self> {
        if self.parse_depth >= MAX_PARSE_DEPTH {
            return Err(ConfigError::MaxParseDepth {
                max: MAX_PARSE_DEPTH,
                path: next_config_path.into().display().to_string(),
            });
        }

        let mut next = self.clone();
        next.parse_depth += 1;
        Ok(next.with_config_path(next_config_path))
    }

    /// Decodes only the block kinds in `partial_decode_list`, keyed in the
    /// partial-parse cache by `(caller, self.config_path)` (spec.md §4.3,
    /// §9 "Cache-key scope"). Every other top-level block in the file is
    /// dropped rather than evaluated. A no-op full decode (empty
    /// `partial_decode_list`) still runs through the ordinary parse cache.
    pub fn decode_partial(&self, caller: &Path) -> Result<Arc<hcl::Body>> {
        if let Some(cached) = self.partial_parse_cache.get(caller, &self.config_path) {
            return Ok(cached);
        }

        let (_, parsed) = self.parse_cache.parse_file(&self.config_path)?;

        let mut builder = hcl::Body::builder();
        for block in parsed.body.blocks() {
            if self
                .partial_decode_list
                .iter()
                .any(|kind| kind.identifier() == block.identifier.as_str())
            {
                builder = builder.add_block(block.clone());
            }
        }
        let body = Arc::new(builder.build());
        self.partial_parse_cache.insert(caller, &self.config_path, body.clone());
        Ok(body)
    }
}
