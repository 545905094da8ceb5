//! Step actions and idempotency checks.
//!
//! Each step type (shell, clone, patch, toggle, package, build, download) is its own
//! struct implementing [`Action`]. [`ActionSpec`] is the serde-tagged union
//! the manifest deserializes into; the orchestrator only ever sees
//! `&dyn Action`.
//!
//! `is_satisfied` is each action's built-in answer to "is the effect already
//! here?". It has to tell a finished effect from a half-finished one: a clone
//! is only done when `.git` exists, and a non-empty directory without it is an
//! error rather than a skip.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{BootError, ConfigError, Result};
use crate::io::{atomic_write, dir_has_entries, ensure_dir, is_populated, replace_dir};
use crate::process;

// ---------------------------------------------------------------------------
// ExecContext
// ---------------------------------------------------------------------------

/// Where actions run. Relative paths in step definitions resolve against `root`.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub root: PathBuf,
}

impl ExecContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `~/`-prefixed, absolute or root-relative paths.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path == "~" || path.starts_with("~/") {
            let home = home::home_dir().ok_or(BootError::HomeNotFound)?;
            return Ok(home.join(path.trim_start_matches('~').trim_start_matches('/')));
        }
        let p = Path::new(path);
        if p.is_absolute() {
            Ok(p.to_path_buf())
        } else {
            Ok(self.root.join(p))
        }
    }

    fn cwd(&self, dir: Option<&str>) -> Result<PathBuf> {
        match dir {
            Some(d) => self.resolve(d),
            None => Ok(self.root.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Action trait
// ---------------------------------------------------------------------------

/// A unit of setup work with a way to detect that its effect already exists.
pub trait Action {
    /// One-line summary for plans and logs.
    fn describe(&self) -> String;

    /// Whether the action's effect is fully present.
    fn is_satisfied(&self, ctx: &ExecContext) -> Result<bool>;

    fn execute(&self, ctx: &ExecContext) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ActionSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    Shell(ShellAction),
    Clone(CloneAction),
    Patch(PatchAction),
    Toggle(ToggleAction),
    Package(PackageAction),
    Build(BuildAction),
    Download(DownloadAction),
}

impl ActionSpec {
    pub fn as_action(&self) -> &dyn Action {
        match self {
            ActionSpec::Shell(a) => a,
            ActionSpec::Clone(a) => a,
            ActionSpec::Patch(a) => a,
            ActionSpec::Toggle(a) => a,
            ActionSpec::Package(a) => a,
            ActionSpec::Build(a) => a,
            ActionSpec::Download(a) => a,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ActionSpec::Shell(_) => "shell",
            ActionSpec::Clone(_) => "clone",
            ActionSpec::Patch(_) => "patch",
            ActionSpec::Toggle(_) => "toggle",
            ActionSpec::Package(_) => "package",
            ActionSpec::Build(_) => "build",
            ActionSpec::Download(_) => "download",
        }
    }

    /// Surface malformed patterns as configuration errors before anything runs.
    pub fn validate(&self, step: &str) -> std::result::Result<(), ConfigError> {
        match self {
            ActionSpec::Patch(p) if p.regex => {
                Regex::new(&p.find).map_err(|e| ConfigError::InvalidPattern {
                    step: step.to_string(),
                    reason: e.to_string(),
                })?;
            }
            ActionSpec::Toggle(t) => {
                t.patterns(step)?;
            }
            _ => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// shell
// ---------------------------------------------------------------------------

/// Arbitrary script. Never satisfied on its own; pair with a `check`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellAction {
    pub run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Action for ShellAction {
    fn describe(&self) -> String {
        format!("shell: {}", first_line(&self.run))
    }

    fn is_satisfied(&self, _ctx: &ExecContext) -> Result<bool> {
        Ok(false)
    }

    fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let cwd = ctx.cwd(self.cwd.as_deref())?;
        process::run(&mut process::shell(&self.run, &cwd, &self.env))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// clone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneAction {
    pub repo: String,
    pub dest: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

fn default_depth() -> u32 {
    1
}

impl CloneAction {
    /// Bring an existing checkout up to date instead of recloning.
    fn update(&self, dest: &Path) -> Result<()> {
        info!(dest = %dest.display(), "updating existing checkout");
        let git = || {
            let mut cmd = Command::new("git");
            cmd.arg("-C").arg(dest);
            cmd
        };
        match &self.git_ref {
            Some(r) => {
                let mut fetch = git();
                fetch.arg("fetch");
                if self.depth > 0 {
                    fetch.args(["--depth", &self.depth.to_string()]);
                }
                fetch.args(["origin", r]);
                process::run(&mut fetch)?;
                process::run(git().args(["checkout", "--force", "FETCH_HEAD"]))?;
            }
            None => {
                process::run(git().args(["pull", "--ff-only"]))?;
            }
        }
        Ok(())
    }
}

impl Action for CloneAction {
    fn describe(&self) -> String {
        match &self.git_ref {
            Some(r) => format!("clone {}@{} -> {}", self.repo, r, self.dest),
            None => format!("clone {} -> {}", self.repo, self.dest),
        }
    }

    fn is_satisfied(&self, ctx: &ExecContext) -> Result<bool> {
        Ok(ctx.resolve(&self.dest)?.join(".git").exists())
    }

    fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let dest = ctx.resolve(&self.dest)?;
        let checkout = dest.join(".git").exists();
        if !checkout && dir_has_entries(&dest)? {
            return Err(BootError::DestinationNotEmpty(dest));
        }
        process::require_binary("git")?;
        if checkout {
            return self.update(&dest);
        }
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }

        let mut cmd = Command::new("git");
        cmd.arg("clone");
        if self.depth > 0 {
            cmd.args(["--depth", &self.depth.to_string()]);
        }
        if let Some(r) = &self.git_ref {
            cmd.args(["--branch", r]);
        }
        cmd.arg(&self.repo).arg(&dest).current_dir(&ctx.root);
        info!(repo = %self.repo, dest = %dest.display(), "cloning");
        process::run(&mut cmd)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// patch
// ---------------------------------------------------------------------------

/// In-place text substitution.
///
/// Satisfied once `find` no longer occurs outside an already-replaced span;
/// for literal patches `replace` must also be present, so a file that lost
/// both is reported as unpatched. A literal `replace` may contain `find`
/// (commenting a line out), and re-applying never stacks the edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchAction {
    pub file: String,
    pub find: String,
    pub replace: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default = "default_backup")]
    pub backup: bool,
}

fn default_backup() -> bool {
    true
}

impl PatchAction {
    fn matcher(&self) -> Result<Option<Regex>> {
        if !self.regex {
            return Ok(None);
        }
        Regex::new(&self.find).map(Some).map_err(|e| {
            BootError::Config(ConfigError::InvalidPattern {
                step: self.file.clone(),
                reason: e.to_string(),
            })
        })
    }

    /// Whether some occurrence of `find` still needs rewriting.
    fn pending(&self, content: &str, re: Option<&Regex>) -> bool {
        match re {
            Some(re) => re.is_match(content),
            None => self
                .unreplaced(content)
                .iter()
                .any(|segment| segment.contains(self.find.as_str())),
        }
    }

    /// Text between existing occurrences of `replace`.
    fn unreplaced<'a>(&self, content: &'a str) -> Vec<&'a str> {
        if self.replace.is_empty() {
            vec![content]
        } else {
            content.split(self.replace.as_str()).collect()
        }
    }

    fn rewrite(&self, content: &str, re: Option<&Regex>) -> String {
        match re {
            Some(re) => re.replace_all(content, self.replace.as_str()).into_owned(),
            None => self
                .unreplaced(content)
                .iter()
                .map(|segment| segment.replace(self.find.as_str(), &self.replace))
                .collect::<Vec<_>>()
                .join(&self.replace),
        }
    }

    pub fn backup_path(file: &Path) -> PathBuf {
        let mut name = file.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }
}

impl Action for PatchAction {
    fn describe(&self) -> String {
        format!("patch {}", self.file)
    }

    fn is_satisfied(&self, ctx: &ExecContext) -> Result<bool> {
        let path = ctx.resolve(&self.file)?;
        if !path.is_file() {
            return Ok(false);
        }
        let content = std::fs::read_to_string(&path)?;
        let re = self.matcher()?;
        if self.pending(&content, re.as_ref()) {
            return Ok(false);
        }
        Ok(self.regex || content.contains(&self.replace))
    }

    fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let path = ctx.resolve(&self.file)?;
        let content = std::fs::read_to_string(&path)?;
        let re = self.matcher()?;
        if !self.pending(&content, re.as_ref()) {
            if self.regex || content.contains(&self.replace) {
                debug!(file = %path.display(), "already patched");
                return Ok(());
            }
            return Err(BootError::PatchTargetMissing {
                file: path,
                pattern: self.find.clone(),
            });
        }
        let patched = self.rewrite(&content, re.as_ref());
        if self.backup {
            let bak = Self::backup_path(&path);
            std::fs::copy(&path, &bak)?;
            info!(backup = %bak.display(), "wrote backup");
        }
        atomic_write(&path, patched.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// toggle
// ---------------------------------------------------------------------------

/// Comment out or uncomment whole blocks of lines, e.g. switching Unitree
/// robot configs between `UnitreeUrdfFileCfg` and `UnitreeUsdFileCfg` spawning.
///
/// A block starts at a line matching `enable` or `disable` and ends at the
/// next line matching `footer`. Patterns match the whole line with its
/// indentation and any leading `#` removed, so a block is found whether or
/// not it is currently commented. Satisfied when at least one block exists
/// and every block is already in its wanted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToggleAction {
    pub file: String,
    /// Header of blocks to uncomment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<String>,
    /// Header of blocks to comment out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable: Option<String>,
    #[serde(default = "default_footer")]
    pub footer: String,
    #[serde(default = "default_backup")]
    pub backup: bool,
}

fn default_footer() -> String {
    r"\)\s*,".to_string()
}

struct BlockPatterns {
    enable: Option<Regex>,
    disable: Option<Regex>,
    footer: Regex,
}

impl ToggleAction {
    fn patterns(&self, step: &str) -> std::result::Result<BlockPatterns, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPattern {
            step: step.to_string(),
            reason,
        };
        if self.enable.is_none() && self.disable.is_none() {
            return Err(invalid("toggle needs `enable` or `disable`".to_string()));
        }
        let line = |p: &str| {
            Regex::new(&format!("^(?:{p})$")).map_err(|e| invalid(e.to_string()))
        };
        Ok(BlockPatterns {
            enable: self.enable.as_deref().map(line).transpose()?,
            disable: self.disable.as_deref().map(line).transpose()?,
            footer: line(&self.footer)?,
        })
    }

    /// Returns the toggled text and how many blocks were found.
    fn toggle(content: &str, patterns: &BlockPatterns) -> (String, usize) {
        let hits = |re: &Option<Regex>, line: &str| re.as_ref().is_some_and(|r| r.is_match(line));
        let mut lines: Vec<String> = content
            .split_inclusive('\n')
            .map(str::to_string)
            .collect();
        let mut blocks = 0;
        let mut i = 0;
        while i < lines.len() {
            let head = code_of(&lines[i]);
            let enable = if hits(&patterns.enable, head) {
                true
            } else if hits(&patterns.disable, head) {
                false
            } else {
                i += 1;
                continue;
            };
            let footer =
                (i + 1..lines.len()).find(|&j| patterns.footer.is_match(code_of(&lines[j])));
            let Some(end) = footer else {
                i += 1;
                continue;
            };
            for line in &mut lines[i..=end] {
                *line = if enable {
                    uncomment_line(line)
                } else {
                    comment_line(line)
                };
            }
            blocks += 1;
            i = end + 1;
        }
        (lines.concat(), blocks)
    }
}

/// Line content without indentation or a leading comment marker.
fn code_of(line: &str) -> &str {
    let t = line.trim();
    t.strip_prefix('#').map(str::trim_start).unwrap_or(t)
}

fn split_indent(line: &str) -> (&str, &str) {
    let rest = line.trim_start_matches([' ', '\t']);
    (&line[..line.len() - rest.len()], rest)
}

/// `<indent># <rest>`; blank and already-commented lines are kept as they are.
fn comment_line(line: &str) -> String {
    let (indent, rest) = split_indent(line);
    if line.trim().is_empty() || rest.starts_with('#') {
        return line.to_string();
    }
    format!("{indent}# {rest}")
}

fn uncomment_line(line: &str) -> String {
    let (indent, rest) = split_indent(line);
    match rest.strip_prefix('#') {
        Some(body) => format!("{indent}{}", body.strip_prefix(' ').unwrap_or(body)),
        None => line.to_string(),
    }
}

impl Action for ToggleAction {
    fn describe(&self) -> String {
        format!("toggle blocks in {}", self.file)
    }

    fn is_satisfied(&self, ctx: &ExecContext) -> Result<bool> {
        let path = ctx.resolve(&self.file)?;
        if !path.is_file() {
            return Ok(false);
        }
        let content = std::fs::read_to_string(&path)?;
        let (toggled, blocks) = Self::toggle(&content, &self.patterns(&self.file)?);
        Ok(blocks > 0 && toggled == content)
    }

    fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let path = ctx.resolve(&self.file)?;
        let content = std::fs::read_to_string(&path)?;
        let (toggled, blocks) = Self::toggle(&content, &self.patterns(&self.file)?);
        if blocks == 0 {
            return Err(BootError::PatchTargetMissing {
                file: path,
                pattern: self
                    .enable
                    .clone()
                    .or_else(|| self.disable.clone())
                    .unwrap_or_default(),
            });
        }
        if toggled == content {
            debug!(file = %path.display(), blocks, "blocks already toggled");
            return Ok(());
        }
        if self.backup {
            let bak = PatchAction::backup_path(&path);
            std::fs::copy(&path, &bak)?;
            info!(backup = %bak.display(), "wrote backup");
        }
        info!(file = %path.display(), blocks, "toggled blocks");
        atomic_write(&path, toggled.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// package
// ---------------------------------------------------------------------------

/// `<manager> <subcommand> <args..> <packages..>`, e.g. `pip install -e .`.
/// The package manager is a black box; use a `check` to make this idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageAction {
    pub manager: String,
    #[serde(default = "default_subcommand")]
    pub subcommand: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

fn default_subcommand() -> String {
    "install".to_string()
}

impl Action for PackageAction {
    fn describe(&self) -> String {
        format!(
            "{} {} {}",
            self.manager,
            self.subcommand,
            self.packages.join(" ")
        )
        .trim_end()
        .to_string()
    }

    fn is_satisfied(&self, _ctx: &ExecContext) -> Result<bool> {
        Ok(false)
    }

    fn execute(&self, ctx: &ExecContext) -> Result<()> {
        process::require_binary(&self.manager)?;
        let mut cmd = Command::new(&self.manager);
        cmd.arg(&self.subcommand)
            .args(&self.args)
            .args(&self.packages)
            .current_dir(ctx.cwd(self.cwd.as_deref())?);
        process::run(&mut cmd)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildAction {
    pub dir: String,
    pub command: String,
    /// File or directory the build produces. Without it, the build always runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl Action for BuildAction {
    fn describe(&self) -> String {
        format!("build in {}: {}", self.dir, first_line(&self.command))
    }

    fn is_satisfied(&self, ctx: &ExecContext) -> Result<bool> {
        match &self.artifact {
            Some(a) => Ok(ctx.resolve(a)?.exists()),
            None => Ok(false),
        }
    }

    fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let dir = ctx.resolve(&self.dir)?;
        ensure_dir(&dir)?;
        process::run(&mut process::shell(&self.command, &dir, &BTreeMap::new()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// download
// ---------------------------------------------------------------------------

/// Fetch a URL into `dest`, or unpack a `.tar.gz` into the `dest` directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadAction {
    pub url: String,
    pub dest: String,
    #[serde(default)]
    pub extract: bool,
    /// Leading path components dropped on extraction (release tarballs nest
    /// everything under one top-level directory).
    #[serde(default = "default_strip")]
    pub strip_components: u32,
}

fn default_strip() -> u32 {
    1
}

impl DownloadAction {
    fn fetch(&self, into: &mut NamedTempFile) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("envboot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BootError::Download(e.to_string()))?;
        let mut resp = client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| BootError::Download(format!("{}: {e}", self.url)))?;
        resp.copy_to(into.as_file_mut())
            .map_err(|e| BootError::Download(format!("{}: {e}", self.url)))?;
        Ok(())
    }
}

impl Action for DownloadAction {
    fn describe(&self) -> String {
        let verb = if self.extract { "download+extract" } else { "download" };
        format!("{verb} {} -> {}", self.url, self.dest)
    }

    fn is_satisfied(&self, ctx: &ExecContext) -> Result<bool> {
        is_populated(&ctx.resolve(&self.dest)?)
    }

    fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let dest = ctx.resolve(&self.dest)?;
        if dest.exists() && !dest.is_dir() && self.extract {
            return Err(BootError::Download(format!(
                "{} exists and is not a directory",
                dest.display()
            )));
        }
        let parent = dest.parent().unwrap_or(&ctx.root).to_path_buf();
        ensure_dir(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        info!(url = %self.url, "downloading");
        self.fetch(&mut tmp)?;

        if !self.extract {
            tmp.persist(&dest).map_err(|e| e.error)?;
            return Ok(());
        }

        // Unpack beside `dest`, then move into place: `dest` is never half-filled.
        process::require_binary("tar")?;
        let staging = tempfile::Builder::new()
            .prefix(".envboot-extract-")
            .tempdir_in(&parent)?;
        let mut cmd = Command::new("tar");
        cmd.arg("-xzf")
            .arg(tmp.path())
            .arg("-C")
            .arg(staging.path())
            .arg(format!("--strip-components={}", self.strip_components));
        process::run(&mut cmd)?;

        replace_dir(staging.path(), &dest)
    }
}

// ---------------------------------------------------------------------------
// CheckSpec
// ---------------------------------------------------------------------------

/// Explicit idempotency predicate; overrides the action's own `is_satisfied`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckSpec {
    PathExists { path: String },
    DirNotEmpty { path: String },
    GitRepo { path: String },
    FileContains { path: String, text: String },
    /// Satisfied when the script exits 0.
    Command {
        run: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
}

impl CheckSpec {
    pub fn evaluate(&self, ctx: &ExecContext) -> Result<bool> {
        match self {
            CheckSpec::PathExists { path } => Ok(ctx.resolve(path)?.exists()),
            CheckSpec::DirNotEmpty { path } => dir_has_entries(&ctx.resolve(path)?),
            CheckSpec::GitRepo { path } => Ok(ctx.resolve(path)?.join(".git").exists()),
            CheckSpec::FileContains { path, text } => {
                let p = ctx.resolve(path)?;
                if !p.is_file() {
                    return Ok(false);
                }
                Ok(std::fs::read_to_string(p)?.contains(text.as_str()))
            }
            CheckSpec::Command { run, cwd } => {
                let dir = ctx.cwd(cwd.as_deref())?;
                process::probe(&mut process::shell(run, &dir, &BTreeMap::new()))
            }
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
