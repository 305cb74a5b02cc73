use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Branch checked out in `project_path`, or `None` when it is not a git
/// work tree, `git` is missing, or HEAD is detached.
pub fn current_git_branch(project_path: &Path) -> Option<String> {
    if !project_path.is_dir() {
        return None;
    }
    let output = Command::new("git")
        .arg("rev-parse")
        .arg("--abbrev-ref")
        .arg("HEAD")
        .current_dir(project_path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();
    let output = match output {
        Ok(output) => output,
        Err(error) => {
            debug!(%error, "git unavailable");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    parse_branch(&String::from_utf8_lossy(&output.stdout))
}

fn parse_branch(stdout: &str) -> Option<String> {
    let branch = stdout.trim();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detached_head_and_empty_output_have_no_branch() {
        assert_eq!(parse_branch("main\n").as_deref(), Some("main"));
        assert_eq!(parse_branch("HEAD\n"), None);
        assert_eq!(parse_branch(""), None);
    }

    #[test]
    fn missing_directory_has_no_branch() {
        let dir = tempdir().expect("tempdir");
        assert_eq!(current_git_branch(&dir.path().join("missing")), None);
    }
}
