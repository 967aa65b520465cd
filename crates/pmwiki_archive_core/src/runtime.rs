use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{WikiConfig, load_config, render_default_config};

pub const STATE_DIR_NAME: &str = ".pmwiki-archive";
pub const DEFAULT_SOURCE_DIR: &str = "wiki.d";
pub const DEFAULT_OUTPUT_DIR: &str = "converted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
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
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub source_dir_source: ValueSource,
    pub output_dir_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({})\nsource_dir={} ({})\noutput_dir={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.source_dir),
            self.source_dir_source.as_str(),
            normalize_for_display(&self.output_dir),
            self.output_dir_source.as_str(),
        )
    }
}

/// Resolved paths together with the configuration they were resolved against.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub paths: ResolvedPaths,
    pub config: WikiConfig,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub config_exists: bool,
    pub source_dir_exists: bool,
    pub output_dir_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> RuntimeStatus {
    let project_root_exists = paths.project_root.exists();
    let config_exists = paths.config_path.exists();
    let source_dir_exists = paths.source_dir.is_dir();
    let output_dir_exists = paths.output_dir.is_dir();

    let mut warnings = Vec::new();
    if !source_dir_exists {
        warnings.push(format!(
            "{} is missing; point --source-dir at the wiki.d directory to convert",
            normalize_for_display(&paths.source_dir)
        ));
    }
    if !config_exists {
        warnings.push(format!(
            "{} is missing; run `pmwiki-archive init` to materialize a config",
            normalize_for_display(&paths.config_path)
        ));
    }

    RuntimeStatus {
        project_root_exists,
        config_exists,
        source_dir_exists,
        output_dir_exists,
        warnings,
    }
}

pub fn ensure_runtime_ready_for_convert(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.source_dir_exists {
        bail!(
            "Source directory does not exist: {}\nPass --source-dir, set PMWIKI_SOURCE_DIR, or set [convert].source_dir in {}",
            normalize_for_display(&paths.source_dir),
            normalize_for_display(&paths.config_path)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_runtime(context: &ResolutionContext, overrides: &PathOverrides) -> Result<Runtime> {
    resolve_runtime_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_runtime_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<Runtime>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("PMWIKI_ARCHIVE_CONFIG")) {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };
    let config = load_config(&config_path)?;

    let (source_dir, source_dir_source) = resolve_dir(
        overrides.source_dir.as_deref(),
        non_empty(lookup_env("PMWIKI_SOURCE_DIR")),
        config.convert.source_dir.as_deref(),
        DEFAULT_SOURCE_DIR,
        &project_root,
    );
    let (output_dir, output_dir_source) = resolve_dir(
        overrides.output_dir.as_deref(),
        non_empty(lookup_env("PMWIKI_OUTPUT_DIR")),
        config.convert.output_dir.as_deref(),
        DEFAULT_OUTPUT_DIR,
        &project_root,
    );

    Ok(Runtime {
        paths: ResolvedPaths {
            project_root,
            state_dir,
            config_path,
            source_dir,
            output_dir,
            root_source,
            config_source,
            source_dir_source,
            output_dir_source,
        },
        config,
    })
}

pub fn init_layout(paths: &ResolvedPaths, force: bool) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.state_dir, &paths.output_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }
    let wrote_config = write_text_file(&paths.config_path, &render_default_config(), force)?;
    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = non_empty(lookup_env("PMWIKI_ARCHIVE_PROJECT_ROOT")) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    (root, ValueSource::Heuristic)
}

fn resolve_dir(
    flag: Option<&Path>,
    env_value: Option<String>,
    config_value: Option<&str>,
    default: &str,
    project_root: &Path,
) -> (PathBuf, ValueSource) {
    if let Some(path) = flag {
        (absolutize(path, project_root), ValueSource::Flag)
    } else if let Some(value) = env_value {
        (absolutize(Path::new(&value), project_root), ValueSource::Env)
    } else if let Some(value) = config_value.filter(|value| !value.trim().is_empty()) {
        (absolutize(Path::new(value.trim()), project_root), ValueSource::Config)
    } else {
        (project_root.join(default), ValueSource::Default)
    }
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join(DEFAULT_SOURCE_DIR).is_dir() || candidate.join(STATE_DIR_NAME).is_dir()
        {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out = cwd.ancestors().map(Path::to_path_buf).collect::<Vec<_>>();
    if let Some(exe_dir) = executable_dir {
        out.extend(exe_dir.ancestors().map(Path::to_path_buf));
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
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
