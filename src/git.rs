//! The manifest repository, driven through the `git` command line.

use serde::Serialize;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, info};

/// Notes ref holding the job record of each release commit.
pub const NOTES_REF: &str = "tagsync";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("git {0} failed with exit code {1}")]
    Command(&'static str, ExitStatus),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unexpected output of git {0}")]
    Output(&'static str),
    #[error("failed to encode note: {0}")]
    Note(#[from] serde_json::Error),
}

#[derive(Clone, Debug)]
pub struct Repo {
    path: PathBuf,
    /// No pull or push without a remote.
    remote: Option<String>,
    branch: String,
    author: Author,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    /// Parse `Name <email>`, an address alone is used for both.
    pub fn parse(s: &str) -> Self {
        match s.trim().split_once('<') {
            Some((name, email)) => Self {
                name: name.trim().to_string(),
                email: email.trim_end_matches('>').trim().to_string(),
            },
            None => Self {
                name: s.trim().to_string(),
                email: s.trim().to_string(),
            },
        }
    }
}

impl Repo {
    pub fn new(
        path: impl Into<PathBuf>,
        remote: Option<String>,
        branch: impl Into<String>,
        author: Author,
    ) -> Self {
        Self {
            path: path.into(),
            remote,
            branch: branch.into(),
            author,
        }
    }

    fn git(&self, command: &'static str) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.path)
            .env("GIT_AUTHOR_NAME", &self.author.name)
            .env("GIT_AUTHOR_EMAIL", &self.author.email)
            .env("GIT_COMMITTER_NAME", &self.author.name)
            .env("GIT_COMMITTER_EMAIL", &self.author.email)
            .arg(command)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit());
        cmd
    }

    /// Fast-forward to the remote branch.
    pub fn pull(&self) -> Result<(), Error> {
        let Some(remote) = &self.remote else {
            return Ok(());
        };

        debug!(%remote, branch = %self.branch, "Pulling");
        run(
            "pull",
            self.git("pull").args(["--ff-only", "--quiet", remote.as_str(), self.branch.as_str()]),
        )
    }

    /// Commit the given files, returning the new revision.
    pub fn commit(&self, files: &[PathBuf], message: &str) -> Result<String, Error> {
        run("add", self.git("add").arg("--").args(files))?;
        run("commit", self.git("commit").args(["--quiet", "-m", message]))?;
        self.head()
    }

    pub fn head(&self) -> Result<String, Error> {
        let output = self.git("rev-parse").arg("HEAD").output()?;
        if !output.status.success() {
            return Err(Error::Command("rev-parse", output.status));
        }

        let rev = String::from_utf8(output.stdout).map_err(|_| Error::Output("rev-parse"))?;
        match rev.trim() {
            "" => Err(Error::Output("rev-parse")),
            rev => Ok(rev.to_string()),
        }
    }

    /// Move the branch back to a revision, discarding all local changes.
    pub fn reset(&self, rev: &str) -> Result<(), Error> {
        debug!(%rev, "Resetting");
        run("reset", self.git("reset").args(["--hard", "--quiet", rev]))
    }

    /// Attach a JSON note to a revision.
    pub fn add_note(&self, rev: &str, note: &impl Serialize) -> Result<(), Error> {
        let note = serde_json::to_string(note)?;
        run(
            "notes",
            self.git("notes")
                .arg(format!("--ref={NOTES_REF}"))
                .args(["add", "-m", note.as_str(), rev]),
        )
    }

    /// Push the branch and the notes.
    pub fn push(&self) -> Result<(), Error> {
        let Some(remote) = &self.remote else {
            return Ok(());
        };

        run(
            "push",
            self.git("push")
                .args(["--quiet", remote.as_str()])
                .arg(format!("HEAD:refs/heads/{}", self.branch))
                .arg(format!("refs/notes/{NOTES_REF}")),
        )
    }
}

fn run(command: &'static str, cmd: &mut Command) -> Result<(), Error> {
    let status = cmd.stdout(Stdio::null()).status()?;
    match status.success() {
        true => Ok(()),
        false => Err(Error::Command(command, status)),
    }
}

/// Commit the changed files, note the release on the commit, and push.
pub fn commit_release(
    repo: &Repo,
    files: &[PathBuf],
    message: &str,
    note: &impl Serialize,
) -> Result<String, Error> {
    let rev = repo.commit(files, message)?;
    repo.add_note(&rev, note)?;
    repo.push()?;

    info!(%rev, files = files.len(), "Committed release");

    Ok(rev)
}
