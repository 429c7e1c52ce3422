//! Resolves `dependency` block outputs. See spec.md §4.4. Two read paths
//! are supported: a fast direct read of the remote state object (wired to
//! the backend's own client) and a subprocess-based fallback that shells
//! out to read the dependency's own outputs. Per-target-path locking keeps
//! concurrent units from racing to populate the same cache entry twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::errors::{ConfigError, Result};

/// One `dependency "name" { ... }` block, already partially decoded.
#[derive(Debug, Clone)]
pub struct DependencyConfig {
    pub name: String,
    pub config_path: PathBuf,
    pub enabled: bool,
    pub skip_outputs: bool,
    pub mock_outputs: Option<hcl::Value>,
    pub mock_outputs_allowed_terraform_commands: Vec<String>,
}

/// Abstracts over how a dependency's outputs are actually obtained, so the
/// resolver itself has no knowledge of Azure, Terraform, or any other
/// concrete backend.
#[async_trait]
pub trait OutputSource: Send + Sync {
    /// Attempts to read the dependency's state object directly. Returning
    /// `Ok(None)` (not an error) means "no direct path available, fall
    /// back to the subprocess route" — this is the common case for
    /// backends or dependency configs the direct reader doesn't support.
    async fn read_state_object(&self, unit_dir: &Path) -> Result<Option<Vec<u8>>>;

    /// Shells out to the dependency's own tooling to print its outputs as
    /// JSON. Used when a direct state read isn't available or fails.
    async fn run_output_command(&self, unit_dir: &Path) -> Result<Vec<u8>>;
}

struct CacheEntry {
    outputs: hcl::Value,
}

/// Resolves and caches dependency outputs for the lifetime of one run.
pub struct DependencyResolver {
    source: Arc<dyn OutputSource>,
    locks: AsyncMutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
    cache: AsyncMutex<HashMap<PathBuf, Arc<CacheEntry>>>,
    current_command: String,
}

impl DependencyResolver {
    pub fn new(source: Arc<dyn OutputSource>, current_command: impl Into<String>) -> Self {
        Self {
            source,
            locks: AsyncMutex::new(HashMap::new()),
            cache: AsyncMutex::new(HashMap::new()),
            current_command: current_command.into(),
        }
    }

    async fn lock_for(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Resolves a dependency block to the `{ outputs = { ... } }` value
    /// exposed to the evaluator as `dependency.<name>`.
    pub async fn fetch(&self, dep: &DependencyConfig) -> Result<hcl::Value> {
        if !dep.enabled {
            return Ok(wrap_outputs(hcl::Value::Object(hcl::Map::new())));
        }
        if dep.skip_outputs {
            return Ok(wrap_outputs(mock_or_empty(dep)));
        }

        let path_lock = self.lock_for(&dep.config_path).await;
        let _guard = path_lock.lock().await;

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&dep.config_path) {
                debug!(target = %dep.name, "dependency outputs served from cache");
                return Ok(wrap_outputs(entry.outputs.clone()));
            }
        }

        let unit_dir = dep
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let fetched = match self.source.read_state_object(&unit_dir).await {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => None,
            Err(err) => {
                debug!(target = %dep.name, %err, "direct state read failed, falling back to subprocess");
                None
            }
        };
        let bytes = match fetched {
            Some(bytes) => bytes,
            None => match self.source.run_output_command(&unit_dir).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    if let Some(mock) = self.mock_if_allowed(dep) {
                        warn!(target = %dep.name, "using mock outputs after subprocess failure: {err}");
                        return Ok(wrap_outputs(mock));
                    }
                    return Err(ConfigError::Dependency {
                        target: dep.name.clone(),
                        message: err.to_string(),
                    });
                }
            },
        };

        let outputs = decode_outputs(&dep.name, &bytes)?;

        let mut cache = self.cache.lock().await;
        cache.insert(dep.config_path.clone(), Arc::new(CacheEntry { outputs: outputs.clone() }));
        debug!(target = %dep.name, "dependency outputs resolved and cached");

        Ok(wrap_outputs(outputs))
    }

    fn mock_if_allowed(&self, dep: &DependencyConfig) -> Option<hcl::Value> {
        let mock = dep.mock_outputs.clone()?;
        if dep.mock_outputs_allowed_terraform_commands.is_empty()
            || dep
                .mock_outputs_allowed_terraform_commands
                .iter()
                .any(|cmd| cmd == &self.current_command)
        {
            Some(mock)
        } else {
            None
        }
    }
}

fn mock_or_empty(dep: &DependencyConfig) -> hcl::Value {
    dep.mock_outputs.clone().unwrap_or_else(|| hcl::Value::Object(hcl::Map::new()))
}

fn wrap_outputs(outputs: hcl::Value) -> hcl::Value {
    let mut obj = hcl::Map::new();
    obj.insert("outputs".to_string(), outputs);
    hcl::Value::Object(obj)
}

fn decode_outputs(target: &str, bytes: &[u8]) -> Result<hcl::Value> {
    let json: serde_json::Value = serde_json::from_slice(bytes).map_err(|source| ConfigError::MalformedOutputs {
        target: target.to_string(),
        source,
    })?;
    Ok(json_to_hcl_value(json))
}

fn json_to_hcl_value(json: serde_json::Value) -> hcl::Value {
    match json {
        serde_json::Value::Null => hcl::Value::Null,
        serde_json::Value::Bool(b) => hcl::Value::Bool(b),
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(hcl::Number::from_f64)
            .map(hcl::Value::Number)
            .unwrap_or(hcl::Value::Null),
        serde_json::Value::String(s) => hcl::Value::String(s),
        serde_json::Value::Array(items) => hcl::Value::Array(items.into_iter().map(json_to_hcl_value).collect()),
        serde_json::Value::Object(map) => {
            let mut out = hcl::Map::new();
            for (k, v) in map {
                out.insert(k, json_to_hcl_value(v));
            }
            hcl::Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        outputs_json: Vec<u8>,
        direct_reads: AtomicUsize,
        subprocess_reads: AtomicUsize,
        direct_available: bool,
    }

    #[async_trait]
    impl OutputSource for FakeSource {
        async fn read_state_object(&self, _unit_dir: &Path) -> Result<Option<Vec<u8>>> {
            self.direct_reads.fetch_add(1, Ordering::SeqCst);
            if self.direct_available {
                Ok(Some(self.outputs_json.clone()))
            } else {
                Ok(None)
            }
        }

        async fn run_output_command(&self, _unit_dir: &Path) -> Result<Vec<u8>> {
            self.subprocess_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.outputs_json.clone())
        }
    }

    fn sample_dep(path: &str) -> DependencyConfig {
        DependencyConfig {
            name: "vpc".to_string(),
            config_path: PathBuf::from(path),
            enabled: true,
            skip_outputs: false,
            mock_outputs: None,
            mock_outputs_allowed_terraform_commands: Vec::new(),
        }
    }

    #[tokio::test]
    async fn direct_read_bypasses_subprocess_when_available() {
        let source = Arc::new(FakeSource {
            outputs_json: br#"{"vpc_id": "vpc-1"}"#.to_vec(),
            direct_reads: AtomicUsize::new(0),
            subprocess_reads: AtomicUsize::new(0),
            direct_available: true,
        });
        let resolver = DependencyResolver::new(source.clone(), "apply");
        let value = resolver.fetch(&sample_dep("/units/vpc/terragrunt.hcl")).await.unwrap();

        assert_eq!(source.direct_reads.load(Ordering::SeqCst), 1);
        assert_eq!(source.subprocess_reads.load(Ordering::SeqCst), 0);

        let hcl::Value::Object(obj) = value else { panic!("expected object") };
        let hcl::Value::Object(outputs) = obj.get("outputs").unwrap() else { panic!("expected outputs object") };
        assert_eq!(outputs.get("vpc_id"), Some(&hcl::Value::String("vpc-1".to_string())));
    }

    #[tokio::test]
    async fn falls_back_to_subprocess_when_direct_read_unavailable() {
        let source = Arc::new(FakeSource {
            outputs_json: br#"{"vpc_id": "vpc-2"}"#.to_vec(),
            direct_reads: AtomicUsize::new(0),
            subprocess_reads: AtomicUsize::new(0),
            direct_available: false,
        });
        let resolver = DependencyResolver::new(source.clone(), "apply");
        resolver.fetch(&sample_dep("/units/vpc/terragrunt.hcl")).await.unwrap();

        assert_eq!(source.subprocess_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_fetch_for_same_path_hits_cache() {
        let source = Arc::new(FakeSource {
            outputs_json: br#"{"vpc_id": "vpc-3"}"#.to_vec(),
            direct_reads: AtomicUsize::new(0),
            subprocess_reads: AtomicUsize::new(0),
            direct_available: false,
        });
        let resolver = DependencyResolver::new(source.clone(), "apply");
        let dep = sample_dep("/units/vpc/terragrunt.hcl");
        resolver.fetch(&dep).await.unwrap();
        resolver.fetch(&dep).await.unwrap();

        assert_eq!(source.subprocess_reads.load(Ordering::SeqCst), 1, "cache should avoid a second fetch");
    }

    #[tokio::test]
    async fn disabled_dependency_yields_empty_outputs_without_touching_source() {
        let source = Arc::new(FakeSource {
            outputs_json: br#"{"vpc_id": "unused"}"#.to_vec(),
            direct_reads: AtomicUsize::new(0),
            subprocess_reads: AtomicUsize::new(0),
            direct_available: true,
        });
        let resolver = DependencyResolver::new(source.clone(), "apply");
        let mut dep = sample_dep("/units/vpc/terragrunt.hcl");
        dep.enabled = false;

        let value = resolver.fetch(&dep).await.unwrap();
        assert_eq!(source.direct_reads.load(Ordering::SeqCst), 0);
        let hcl::Value::Object(obj) = value else { panic!("expected object") };
        assert_eq!(obj.get("outputs"), Some(&hcl::Value::Object(hcl::Map::new())));
    }

    #[tokio::test]
    async fn mock_outputs_used_when_subprocess_fails_and_command_allowed() {
        struct FailingSource;
        #[async_trait]
        impl OutputSource for FailingSource {
            async fn read_state_object(&self, _unit_dir: &Path) -> Result<Option<Vec<u8>>> {
                Ok(None)
            }
            async fn run_output_command(&self, _unit_dir: &Path) -> Result<Vec<u8>> {
                Err(ConfigError::Evaluation("boom".to_string()))
            }
        }

        let resolver = DependencyResolver::new(Arc::new(FailingSource), "plan");
        let mut dep = sample_dep("/units/vpc/terragrunt.hcl");
        let mut mock = hcl::Map::new();
        mock.insert("vpc_id".to_string(), hcl::Value::String("mocked".to_string()));
        dep.mock_outputs = Some(hcl::Value::Object(mock));
        dep.mock_outputs_allowed_terraform_commands = vec!["plan".to_string()];

        let value = resolver.fetch(&dep).await.unwrap();
        let hcl::Value::Object(obj) = value else { panic!("expected object") };
        let hcl::Value::Object(outputs) = obj.get("outputs").unwrap() else { panic!("expected outputs object") };
        assert_eq!(outputs.get("vpc_id"), Some(&hcl::Value::String("mocked".to_string())));
    }
}
