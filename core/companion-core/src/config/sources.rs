//! Where configuration layers live on disk.
//!
//! For an agent named `A`:
//!
//! | priority | scope          | path                                   |
//! |----------|----------------|----------------------------------------|
//! | 0        | global         | `<config>/A/A.jsonc`, else `A.json`    |
//! | 1        | project root   | `<root>/A.json`                        |
//! | 2        | project subdir | `<root>/.A/A.json`                     |
//!
//! `<config>` is `$XDG_CONFIG_HOME`, else `~/.config`, on every platform; the
//! agent itself reads from there even on macOS.

use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigScope {
    Global,
    ProjectRoot,
    ProjectSubdir,
}

impl ConfigScope {
    pub fn priority(self) -> u8 {
        match self {
            ConfigScope::Global => 0,
            ConfigScope::ProjectRoot => 1,
            ConfigScope::ProjectSubdir => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub scope: ConfigScope,
    pub priority: u8,
}

impl ConfigSource {
    fn new(path: PathBuf, scope: ConfigScope) -> Self {
        Self {
            path,
            priority: scope.priority(),
            scope,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    agent_name: String,
    global_dir: Option<PathBuf>,
}

impl ConfigLayout {
    pub fn for_agent(agent_name: impl Into<String>) -> Self {
        let agent_name = agent_name.into();
        let global_dir = config_home().map(|home| home.join(&agent_name));
        Self {
            agent_name,
            global_dir,
        }
    }

    /// Layout with an explicit global directory (the one holding `A.jsonc`).
    pub fn with_global_dir(agent_name: impl Into<String>, global_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent_name: agent_name.into(),
            global_dir: Some(global_dir.into()),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn global_dir(&self) -> Option<&Path> {
        self.global_dir.as_deref()
    }

    /// Every path that could contribute a layer, existing or not.
    pub fn candidate_paths(&self, project_root: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(4);
        if let Some(dir) = &self.global_dir {
            paths.push(dir.join(format!("{}.jsonc", self.agent_name)));
            paths.push(dir.join(format!("{}.json", self.agent_name)));
        }
        if let Some(root) = project_root {
            paths.push(self.project_root_file(root));
            paths.push(self.project_subdir_file(root));
        }
        paths
    }

    /// Existing layer files in ascending priority. The global slot holds at
    /// most one file; `.jsonc` wins over `.json`.
    pub fn existing_sources(&self, project_root: Option<&Path>) -> Vec<ConfigSource> {
        let mut sources = Vec::with_capacity(3);

        if let Some(dir) = &self.global_dir {
            let global = [
                dir.join(format!("{}.jsonc", self.agent_name)),
                dir.join(format!("{}.json", self.agent_name)),
            ]
            .into_iter()
            .find(|path| path.is_file());
            if let Some(path) = global {
                sources.push(ConfigSource::new(path, ConfigScope::Global));
            }
        }

        if let Some(root) = project_root {
            let root_file = self.project_root_file(root);
            if root_file.is_file() {
                sources.push(ConfigSource::new(root_file, ConfigScope::ProjectRoot));
            }
            let subdir_file = self.project_subdir_file(root);
            if subdir_file.is_file() {
                sources.push(ConfigSource::new(subdir_file, ConfigScope::ProjectSubdir));
            }
        }

        sources
    }

    fn project_root_file(&self, root: &Path) -> PathBuf {
        root.join(format!("{}.json", self.agent_name))
    }

    fn project_subdir_file(&self, root: &Path) -> PathBuf {
        root.join(format!(".{}", self.agent_name))
            .join(format!("{}.json", self.agent_name))
    }
}

fn config_home() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|path| path.is_absolute())
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn jsonc_wins_over_json_in_global_slot() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("opencode.json"), "{}").expect("write");
        std::fs::write(dir.path().join("opencode.jsonc"), "{}").expect("write");

        let layout = ConfigLayout::with_global_dir("opencode", dir.path());
        let sources = layout.existing_sources(None);
        assert_eq!(sources.len(), 1);
        assert!(sources[0].path.ends_with("opencode.jsonc"));
        assert_eq!(sources[0].priority, 0);
    }

    #[test]
    fn project_layers_follow_global() {
        let global = tempdir().expect("tempdir");
        let project = tempdir().expect("tempdir");
        std::fs::write(global.path().join("opencode.json"), "{}").expect("write");
        std::fs::write(project.path().join("opencode.json"), "{}").expect("write");
        std::fs::create_dir(project.path().join(".opencode")).expect("mkdir");
        std::fs::write(project.path().join(".opencode/opencode.json"), "{}").expect("write");

        let layout = ConfigLayout::with_global_dir("opencode", global.path());
        let scopes: Vec<ConfigScope> = layout
            .existing_sources(Some(project.path()))
            .into_iter()
            .map(|source| source.scope)
            .collect();
        assert_eq!(
            scopes,
            vec![
                ConfigScope::Global,
                ConfigScope::ProjectRoot,
                ConfigScope::ProjectSubdir
            ]
        );
    }

    #[test]
    fn candidates_include_missing_files() {
        let layout = ConfigLayout::with_global_dir("opencode", "/cfg/opencode");
        let candidates = layout.candidate_paths(Some(Path::new("/work")));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/cfg/opencode/opencode.jsonc"),
                PathBuf::from("/cfg/opencode/opencode.json"),
                PathBuf::from("/work/opencode.json"),
                PathBuf::from("/work/.opencode/opencode.json"),
            ]
        );
    }
}
