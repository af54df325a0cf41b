//! Git operations (`checkout`, plus a few branch helpers), run through a
//! session's own shell so they share its credentials, environment, and
//! working directory.

use crate::error::Result;
use crate::security;
use crate::session::{ExecResult, Session};

const GIT_TIMEOUT_MS: u64 = 60_000;

pub struct GitService;

impl GitService {
    /// Clones `url` into `dir` if it doesn't already contain a repo, then
    /// checks out `branch` (creating it from the default branch if it
    /// doesn't exist yet). Returns the result of whichever command ran
    /// last, since that's what the route reports stdout/stderr/exitCode for.
    pub async fn checkout(session: &Session, url: &str, dir: &str, branch: Option<&str>) -> Result<ExecResult> {
        security::require_absolute_path(dir)?;
        security::validate_git_url(url)?;
        if let Some(branch) = branch {
            security::validate_branch_name(branch)?;
        }

        let url_q = security::shell_single_quote_escape(url);
        let dir_q = security::shell_single_quote_escape(dir);

        let clone_cmd = format!(
            "if [ -d {dir_q}/.git ]; then echo already-cloned; else git clone {url_q} {dir_q}; fi"
        );
        let clone_result = run(session, &clone_cmd).await?;

        match branch {
            Some(branch) => {
                let branch_q = security::shell_single_quote_escape(branch);
                let checkout_cmd = format!(
                    "cd {dir_q} && (git checkout {branch_q} || git checkout -b {branch_q})"
                );
                run(session, &checkout_cmd).await
            }
            None => Ok(clone_result),
        }
    }

    pub async fn current_branch(session: &Session, dir: &str) -> Result<String> {
        security::require_absolute_path(dir)?;
        let dir_q = security::shell_single_quote_escape(dir);
        let result = run(session, &format!("cd {dir_q} && git rev-parse --abbrev-ref HEAD")).await?;
        Ok(String::from_utf8_lossy(&result.stdout).trim().to_string())
    }

    pub async fn list_branches(session: &Session, dir: &str) -> Result<Vec<String>> {
        security::require_absolute_path(dir)?;
        let dir_q = security::shell_single_quote_escape(dir);
        let result = run(session, &format!("cd {dir_q} && git branch --format='%(refname:short)'")).await?;
        Ok(String::from_utf8_lossy(&result.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

async fn run(session: &Session, command: &str) -> Result<ExecResult> {
    Ok(session.exec(command.to_string(), None, GIT_TIMEOUT_MS, false).await?)
}
