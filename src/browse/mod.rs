use std::process::{Command, Stdio};
use thiserror::Error;
use url::Url;

const AZURE_SSH_HOST: &str = "git@ssh.dev.azure.com";
const AZURE_MAIN_REF: &str = "?refName=refs%2Fheads%2Fmain";

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("unable to handle '{0}'")]
    UnsupportedHost(String),
    #[error("can only handle v3 urls but is '{0}'")]
    UnsupportedAzureVersion(String),
    #[error("unable to parse '{0}'")]
    Unparseable(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to launch browser: {0}")]
    Launch(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrowseError>;

/// Web location of a repository, without credentials.
pub fn sanitize_repo_url(raw: &str) -> Result<String> {
    if raw.starts_with("git") {
        let (prefix, path) = raw
            .split_once(':')
            .ok_or_else(|| BrowseError::Unparseable(raw.to_string()))?;
        if prefix == AZURE_SSH_HOST {
            return sanitize_azure_path(path);
        }
        return Err(BrowseError::UnsupportedHost(prefix.to_string()));
    }

    if raw.starts_with("http") {
        let mut parsed = Url::parse(raw)?;
        // Only fails for URLs that cannot carry credentials at all.
        let _ = parsed.set_username("");
        let _ = parsed.set_password(None);
        return Ok(parsed.to_string());
    }

    Err(BrowseError::Unparseable(raw.to_string()))
}

/// `v3/<org>/<project>/<repo>` of an Azure DevOps SSH remote.
fn sanitize_azure_path(path: &str) -> Result<String> {
    let parts: Vec<&str> = path.split('/').collect();
    let [version, org, project, repo, ..] = parts.as_slice() else {
        return Err(BrowseError::Unparseable(path.to_string()));
    };
    if *version != "v3" {
        return Err(BrowseError::UnsupportedAzureVersion(version.to_string()));
    }
    Ok(format!(
        "https://dev.azure.com/{}/{}/_git/{}",
        org, project, repo
    ))
}

/// Web page of a commit. Azure needs the branch to resolve it.
pub fn commit_url(repo: &str, hash: &str) -> Result<String> {
    let base = sanitize_repo_url(repo)?;
    let mut url = format!("{}/commit/{}", base.trim_end_matches('/'), hash);
    if base.contains("dev.azure.com") {
        url.push_str(AZURE_MAIN_REF);
    }
    Ok(url)
}

/// Hand a URL to the desktop's default browser. The opener's output is discarded.
pub fn open_in_browser(url: &str) -> Result<()> {
    let mut cmd = opener(url);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd.spawn()?;
    Ok(())
}

#[cfg(target_os = "macos")]
fn opener(url: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(target_os = "windows")]
fn opener(url: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", url]);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn opener(url: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    cmd
}
