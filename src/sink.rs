//! Sink pipeline for received files: sanitize the advertised name, apply
//! directory renames, resolve conflicts interactively, re-check containment
//! against the canonical destination, cap sizes, and stream bytes to disk.
//! The observable guarantee: no byte is ever written outside the canonical
//! destination root.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::debug;
use tokio::io::AsyncWriteExt;

use crate::{Error, Result, MAX_FILE_SIZE};

/// Seam for the interactive rename prompts, so the pipeline is testable
/// without a terminal.
pub trait RenamePrompt {
    /// An empty answer means the user declined.
    fn ask(&mut self, question: &str) -> std::io::Result<String>;
}

pub struct StdinPrompt;

impl RenamePrompt for StdinPrompt {
    fn ask(&mut self, question: &str) -> std::io::Result<String> {
        print!("{}", question);
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

/// Splits on both separator styles, drops `.` and empty components (which
/// covers absolute prefixes), and treats `..` as a traversal attempt rather
/// than something to silently repair.
pub fn sanitize(name: &str) -> Result<Vec<String>> {
    let mut components = Vec::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return Err(Error::PathTraversal(name.to_string())),
            other => components.push(other.to_string()),
        }
    }
    if components.is_empty() {
        return Err(Error::Transfer(format!("unusable file name {:?}", name)));
    }
    Ok(components)
}

pub struct FileSink<P> {
    root: PathBuf,
    root_canonical: PathBuf,
    /// Source top-level directory → directory actually used on disk. Identity
    /// entries mark directories this transfer created itself, so later files
    /// in the same source directory never re-prompt.
    renames: HashMap<String, String>,
    prompt: P,
}

impl<P: RenamePrompt> FileSink<P> {
    pub fn new(root: impl Into<PathBuf>, prompt: P) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root_canonical = root.canonicalize()?;
        Ok(Self {
            root,
            root_canonical,
            renames: HashMap::new(),
            prompt,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs the pipeline for one advertised file and returns the path to
    /// write to. Order matters: sanitize, remap, conflict, containment, then
    /// the a-priori size check.
    pub fn resolve(&mut self, advertised: &str, size: u64) -> Result<PathBuf> {
        let mut components = sanitize(advertised)?;
        let remapped = self.apply_rename(&mut components);
        if !remapped {
            self.resolve_conflict(&mut components)?;
        }
        let target = self.contained_path(&components, advertised)?;
        if size > MAX_FILE_SIZE {
            return Err(Error::SizeCap {
                name: advertised.to_string(),
                limit: MAX_FILE_SIZE,
            });
        }
        debug!("Resolved {:?} -> {}", advertised, target.display());
        Ok(target)
    }

    fn apply_rename(&self, components: &mut [String]) -> bool {
        if components.len() < 2 {
            return false;
        }
        match self.renames.get(&components[0]) {
            Some(chosen) => {
                components[0] = chosen.clone();
                true
            }
            None => false,
        }
    }

    fn resolve_conflict(&mut self, components: &mut Vec<String>) -> Result<()> {
        if components.len() == 1 {
            if self.root.join(&components[0]).exists() {
                *components = self.prompt_file_rename(&components[0])?;
            }
        } else {
            let top = components[0].clone();
            if self.root.join(&top).exists() {
                let chosen = self.prompt_dir_rename(&top)?;
                components[0] = chosen.clone();
                self.renames.insert(top, chosen);
            } else {
                self.renames.insert(top.clone(), top);
            }
        }
        Ok(())
    }

    fn prompt_file_rename(&mut self, name: &str) -> Result<Vec<String>> {
        loop {
            let answer = self
                .prompt
                .ask(&format!("\"{}\" already exists, enter a new name: ", name))?;
            if answer.is_empty() {
                return Err(Error::Cancelled(format!(
                    "no replacement name given for \"{}\"",
                    name
                )));
            }
            let Ok(candidate) = sanitize(&answer) else {
                println!("That name is not usable, try again.");
                continue;
            };
            let joined: PathBuf = candidate.iter().fold(self.root.clone(), |p, c| p.join(c));
            if joined.exists() {
                println!("\"{}\" also exists, try again.", answer);
                continue;
            }
            return Ok(candidate);
        }
    }

    fn prompt_dir_rename(&mut self, dir: &str) -> Result<String> {
        loop {
            let answer = self.prompt.ask(&format!(
                "directory \"{}\" already exists, enter a new directory name: ",
                dir
            ))?;
            if answer.is_empty() {
                return Err(Error::Cancelled(format!(
                    "no replacement directory given for \"{}\"",
                    dir
                )));
            }
            let valid = !answer.contains(['/', '\\']) && answer != "." && answer != "..";
            if !valid {
                println!("Directory names cannot contain separators, try again.");
                continue;
            }
            if self.root.join(&answer).exists() {
                println!("\"{}\" also exists, try again.", answer);
                continue;
            }
            return Ok(answer);
        }
    }

    /// Re-validates that the target stays under the canonical destination.
    /// The deepest existing ancestor is canonicalized (resolving any symlinks
    /// already on disk) before the remaining components are appended.
    fn contained_path(&self, components: &[String], advertised: &str) -> Result<PathBuf> {
        let mut target = self.root_canonical.clone();
        for c in components {
            target.push(c);
        }

        let mut existing = target.clone();
        let mut tail: Vec<std::ffi::OsString> = Vec::new();
        while std::fs::symlink_metadata(&existing).is_err() {
            match existing.file_name() {
                Some(name) => {
                    tail.push(name.to_os_string());
                    existing.pop();
                }
                None => break,
            }
        }
        let mut effective = existing.canonicalize()?;
        for part in tail.iter().rev() {
            effective.push(part);
        }

        if !effective.starts_with(&self.root_canonical) {
            return Err(Error::PathTraversal(advertised.to_string()));
        }
        Ok(target)
    }
}

/// Streams a response body into `target`, enforcing the size cap as bytes
/// arrive. On overflow the partial file is deleted before the error returns.
pub async fn write_stream<S, E>(target: &Path, stream: S, name: &str) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Into<Error>,
{
    write_stream_with_cap(target, stream, name, MAX_FILE_SIZE).await
}

async fn write_stream_with_cap<S, E>(
    target: &Path,
    mut stream: S,
    name: &str,
    cap: u64,
) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Into<Error>,
{
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(target).await?;
    let mut received: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        received += chunk.len() as u64;
        if received > cap {
            drop(file);
            let _ = tokio::fs::remove_file(target).await;
            return Err(Error::SizeCap {
                name: name.to_string(),
                limit: cap,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(received)
}
