use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::metadata::OBJECTS_DIRNAME;

pub const STATE_DIRNAME: &str = ".realmwiki";
pub const METADATA_DIRNAME: &str = "metadata";
pub const DB_FILENAME: &str = "realmwiki.db";
pub const CONFIG_FILENAME: &str = "config.toml";
pub const REVIEW_DIRNAME: &str = "review";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub metadata_dir: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub review_dir: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub metadata_exists: bool,
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nmetadata_dir={}\nstate_dir={}\ndata_dir={} ({})\ndb_path={}\nconfig_path={} ({})\nreview_dir={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.metadata_dir),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.review_dir),
        )
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let metadata_exists = paths.metadata_dir.exists();
    let state_dir_exists = paths.state_dir.exists();
    let data_dir_exists = paths.data_dir.exists();
    let config_exists = paths.config_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !metadata_exists {
        warnings.push("metadata/ is missing; run `realmwiki init` and add object files".to_string());
    }
    if !state_dir_exists {
        warnings.push(".realmwiki/ is missing; run `realmwiki init` before sync commands".to_string());
    }

    Ok(RuntimeStatus {
        project_root_exists,
        metadata_exists,
        state_dir_exists,
        data_dir_exists,
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
}

pub fn ensure_runtime_ready_for_sync(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.metadata_exists {
        bail!(
            "No metadata directory at {}.\nRun: realmwiki init --project-root {}",
            normalize_for_display(&paths.metadata_dir),
            normalize_for_display(&paths.project_root)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;

    let state_dir = project_root.join(STATE_DIRNAME);
    let metadata_dir = project_root.join(METADATA_DIRNAME);

    let (data_dir, data_source) = if let Some(path) = overrides.data_dir.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("REALMWIKI_DATA_DIR") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("data"), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("REALMWIKI_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        review_dir: state_dir.join(REVIEW_DIRNAME),
        project_root,
        metadata_dir,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    })
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    let required_dirs = [
        paths.metadata_dir.clone(),
        paths.metadata_dir.join(OBJECTS_DIRNAME),
        paths.state_dir.clone(),
        paths.data_dir.clone(),
        paths.review_dir.clone(),
    ];
    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let metadata_dir = normalize_for_display(&paths.metadata_dir);
    let db_path = normalize_for_display(&paths.db_path);

    format!(
        "# realmwiki configuration (materialized by `realmwiki init`)\n# metadata: {metadata_dir}\n# cache:    {db_path}\n\n[wiki]\n# api_url = \"https://your-wiki.example.org/api.php\"\n# user_agent = \"realmwiki/0.2\"\n# edit_summary = \"Edited by Spongybot! :D\"\n\n[sync]\n# Tiers at or above this priority hide the Obtaining text in a spoiler.\ncollapsible_threshold = 11\n# Below this many uncached titles, one query per title; otherwise batched.\nbatch_threshold = 100\nbatch_size = 50\nexistence_workers = 8\ncontent_workers = 4\nexistence_timeout_ms = 5000\ncontent_timeout_ms = 15000\nwrite_timeout_ms = 20000\n# Failed checks count as: \"absent\" | \"present\" | \"leave\"\nunresolved = \"absent\"\ncache_flush_every = 25\n",
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = lookup_env("REALMWIKI_PROJECT_ROOT") {
        return Ok((
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        ));
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    Ok((root, ValueSource::Heuristic))
}

/// Nearest ancestor of the working directory, then of the executable, that
/// holds a `metadata/` directory. Falls back to the working directory.
fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut visited = HashSet::new();
    cwd.ancestors()
        .chain(executable_dir.into_iter().flat_map(Path::ancestors))
        .filter(|candidate| visited.insert(candidate.to_path_buf()))
        .find(|candidate| candidate.join(METADATA_DIRNAME).is_dir())
        .map_or_else(|| cwd.to_path_buf(), Path::to_path_buf)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, ValueSource, ensure_runtime_ready_for_sync,
        init_layout, inspect_runtime, resolve_paths_with_lookup,
    };
    use crate::config::load_config;

    fn context_at(cwd: &Path) -> ResolutionContext {
        ResolutionContext {
            cwd: cwd.to_path_buf(),
            executable_dir: None,
        }
    }

    fn rooted_at(root: &Path) -> PathOverrides {
        PathOverrides {
            project_root: Some(root.to_path_buf()),
            ..PathOverrides::default()
        }
    }

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = rooted_at(&from_flag);
        let context = context_at(&cwd);

        let env = HashMap::from([(
            "REALMWIKI_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.metadata_dir, from_flag.join("metadata"));
        assert_eq!(
            resolved.db_path,
            from_flag.join(".realmwiki").join("data").join("realmwiki.db")
        );
    }

    #[test]
    fn heuristic_finds_ancestor_with_metadata() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let nested = root.join("metadata").join("objects");
        fs::create_dir_all(&nested).expect("create nested");

        let context = context_at(&nested);
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn env_data_dir_is_relative_to_project_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = context_at(&root);
        let overrides = rooted_at(&root);
        let env = HashMap::from([("REALMWIKI_DATA_DIR".to_string(), "state".to_string())]);
        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve");
        assert_eq!(resolved.data_dir, root.join("state"));
        assert_eq!(resolved.data_source, ValueSource::Env);
        assert!(resolved.diagnostics().contains("data_dir="));
    }

    #[test]
    fn init_layout_creates_expected_dirs_and_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");

        let context = context_at(&root);
        let overrides = rooted_at(&root);
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let report = init_layout(&paths, &InitOptions::default()).expect("init");

        assert!(report.wrote_config);
        assert!(!report.created_dirs.is_empty());
        assert!(paths.metadata_dir.join("objects").exists());
        assert!(paths.state_dir.exists());
        assert!(paths.data_dir.exists());
        assert!(paths.review_dir.exists());

        let config = load_config(&paths.config_path).expect("materialized config parses");
        assert_eq!(config.sync.batch_threshold, Some(100));
        assert_eq!(config.sync.unresolved.as_deref(), Some("absent"));

        let again = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(!again.wrote_config);
        assert!(again.created_dirs.is_empty());
    }

    #[test]
    fn sync_readiness_fails_without_metadata() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");
        let context = context_at(&root);
        let overrides = rooted_at(&root);
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");
        let status = inspect_runtime(&paths).expect("inspect");
        assert_eq!(status.warnings.len(), 2);
        let err = ensure_runtime_ready_for_sync(&paths, &status).expect_err("must fail");
        assert!(err.to_string().contains("No metadata directory"));
    }
}
