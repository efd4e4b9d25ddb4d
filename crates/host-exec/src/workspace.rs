//! On-disk task workspace
//!
//! Each run gets its own directory under
//! `<host_root>/node-agent/node-tasks/<run_id>/` holding the wrapper script
//! the process executes. Directory names are run ids, which is how the
//! cleanup sweep correlates filesystem artifacts with task resources.

use crate::error::ExecError;
use std::fs;
use std::path::{Path, PathBuf};

/// Task directory tree, relative to the host mount root.
pub const TASKS_SUBDIR: &str = "node-agent/node-tasks";

/// Wrapper script file name inside a run directory.
pub const SCRIPT_FILE_NAME: &str = "task.sh";

/// Environment variable exposing the host mount root to task scripts.
pub const HOST_ROOT_ENV: &str = "NEON_HOST_ROOT";

/// Environment variable exposing the run's script directory to task scripts.
pub const SCRIPT_DIR_ENV: &str = "NEON_SCRIPT_DIR";

/// Per-run script directories rooted under the host mount.
#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    host_root: PathBuf,
    tasks_root: PathBuf,
}

impl TaskWorkspace {
    /// Creates a workspace rooted at `host_root`.
    pub fn new(host_root: impl Into<PathBuf>) -> Self {
        let host_root = host_root.into();
        let tasks_root = host_root.join(TASKS_SUBDIR);
        Self {
            host_root,
            tasks_root,
        }
    }

    /// Root of the per-run directory tree.
    #[must_use]
    pub fn tasks_root(&self) -> &Path {
        &self.tasks_root
    }

    /// Directory for one run.
    #[must_use]
    pub fn script_dir(&self, run_id: &str) -> PathBuf {
        self.tasks_root.join(run_id)
    }

    /// Wrapper script path for one run.
    #[must_use]
    pub fn script_path(&self, run_id: &str) -> PathBuf {
        self.script_dir(run_id).join(SCRIPT_FILE_NAME)
    }

    /// Writes the wrapper script for a run and returns its path.
    ///
    /// The wrapper exports the host root and script directory, then appends
    /// the task's raw body verbatim.
    pub fn write_script(&self, run_id: &str, body: &str) -> Result<PathBuf, ExecError> {
        let dir = self.script_dir(run_id);
        fs::create_dir_all(&dir).map_err(|source| ExecError::Workspace {
            path: dir.clone(),
            source,
        })?;

        let script = format!(
            "#!/bin/bash\n\
             export {HOST_ROOT_ENV}={host_root}\n\
             export {SCRIPT_DIR_ENV}={script_dir}\n\
             \n\
             {body}\n",
            host_root = shell_quote(&self.host_root.display().to_string()),
            script_dir = shell_quote(&dir.display().to_string()),
        );

        let path = dir.join(SCRIPT_FILE_NAME);
        fs::write(&path, script).map_err(|source| ExecError::Workspace {
            path: path.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).map_err(|source| {
                ExecError::Workspace {
                    path: path.clone(),
                    source,
                }
            })?;
        }

        Ok(path)
    }

    /// Names of all per-run directories currently on disk.
    ///
    /// A missing tasks root is not an error: no task has run yet.
    pub fn list_run_dirs(&self) -> Result<Vec<String>, ExecError> {
        let entries = match fs::read_dir(&self.tasks_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ExecError::Workspace {
                    path: self.tasks_root.clone(),
                    source,
                });
            }
        };

        let mut run_ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ExecError::Workspace {
                path: self.tasks_root.clone(),
                source,
            })?;
            if entry.path().is_dir() {
                run_ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(run_ids)
    }

    /// Recursively deletes one run directory. Already-gone is not an error.
    pub fn remove_run_dir(&self, run_id: &str) -> Result<(), ExecError> {
        let dir = self.script_dir(run_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ExecError::Workspace { path: dir, source }),
        }
    }
}

/// Single-quotes a value for safe interpolation into the wrapper script.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_script_wraps_body() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = TaskWorkspace::new(tmp.path());

        let path = workspace.write_script("run-1", "echo hello\nexit 3").unwrap();
        assert_eq!(path, workspace.script_path("run-1"));

        let script = fs::read_to_string(&path).unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains(&format!("export {HOST_ROOT_ENV}=")));
        assert!(script.contains(&format!("export {SCRIPT_DIR_ENV}=")));
        // Raw body appended verbatim
        assert!(script.ends_with("echo hello\nexit 3\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let workspace = TaskWorkspace::new(tmp.path());
        let path = workspace.write_script("run-1", "true").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_list_run_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = TaskWorkspace::new(tmp.path());

        // Empty before anything ran
        assert!(workspace.list_run_dirs().unwrap().is_empty());

        workspace.write_script("a", "true").unwrap();
        workspace.write_script("b", "true").unwrap();
        // Stray files at the root are not run directories
        fs::write(workspace.tasks_root().join("notes.txt"), "x").unwrap();

        let mut dirs = workspace.list_run_dirs().unwrap();
        dirs.sort();
        assert_eq!(dirs, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_remove_run_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = TaskWorkspace::new(tmp.path());

        workspace.write_script("a", "true").unwrap();
        workspace.remove_run_dir("a").unwrap();
        assert!(workspace.list_run_dirs().unwrap().is_empty());

        // Second delete is a no-op
        workspace.remove_run_dir("a").unwrap();
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/mnt/host"), "'/mnt/host'");
        assert_eq!(shell_quote("a'b"), r"'a'\''b'");
    }
}
