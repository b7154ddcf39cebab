//! Append-only record of releases that finished activation.
//!
//! One entry per line. Entries are release ids; older ledgers stored the full
//! release path, so an entry also matches when its last path component equals
//! the id.

use super::paths::ReleaseLayout;
use super::ReleaseId;
use crate::command::RemoteCommand;
use crate::error::{Error, Result};
use crate::executor::Host;
use crate::utils::remote_path;

pub struct ReleaseRecord<'a> {
    host: Host<'a>,
    path: String,
}

impl<'a> ReleaseRecord<'a> {
    pub fn new(host: Host<'a>, layout: &ReleaseLayout) -> Self {
        Self {
            host,
            path: layout.ledger.clone(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// All entries in order. A ledger that does not exist yet is empty.
    pub fn entries(&self) -> Result<Vec<String>> {
        if !self.host.exists(&self.path)? {
            return Ok(Vec::new());
        }
        let raw = self.host.sudo(&RemoteCommand::new("cat").arg(&self.path))?;
        parse_entries(&self.path, &raw)
    }

    pub fn append(&self, id: &ReleaseId) -> Result<()> {
        if self.lacks_final_newline()? {
            self.host
                .sudo(&RemoteCommand::new("printf").arg("\\n").append_stdout_to(&self.path))?;
        }
        let cmd = RemoteCommand::new("printf")
            .args(["%s\\n", id.as_str()])
            .append_stdout_to(&self.path);
        self.host.sudo(&cmd)?;
        log_status!("release", "Recorded {} in {}", id, self.path);
        Ok(())
    }

    /// A hand-edited ledger may end mid-line; appending to it as-is would glue
    /// two ids together.
    fn lacks_final_newline(&self) -> Result<bool> {
        if !self.host.exists(&self.path)? {
            return Ok(false);
        }
        let last = self
            .host
            .sudo(&RemoteCommand::new("tail").args(["-c", "1", self.path.as_str()]))?;
        Ok(!last.is_empty())
    }

    /// Drop the last line. Nothing happens when the ledger is empty or absent.
    pub fn pop_last(&self) -> Result<()> {
        if !self.host.exists(&self.path)? {
            return Ok(());
        }
        self.host
            .sudo(&RemoteCommand::new("sed").args(["-i", "$d", self.path.as_str()]))?;
        Ok(())
    }

    pub fn contains(&self, id: &ReleaseId) -> Result<bool> {
        Ok(self
            .entries()?
            .iter()
            .any(|entry| entry_matches(entry, id.as_str())))
    }

    /// The release recorded before the most recent one.
    pub fn previous(&self) -> Result<Option<String>> {
        Ok(previous_entry(&self.entries()?))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }
}

/// Parse ledger text. Blank lines are ignored; anything else must be one token.
pub fn parse_entries(path: &str, raw: &str) -> Result<Vec<String>> {
    let mut entries = Vec::new();

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if line.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::ledger_invalid(
                path,
                format!("entry '{}' contains whitespace", line.trim()),
                Some(index + 1),
            ));
        }
        entries.push(line.to_string());
    }

    Ok(entries)
}

/// Exact match on the id, or on the basename of a path entry. Never substring.
pub fn entry_matches(entry: &str, id: &str) -> bool {
    entry == id || remote_path::basename(entry) == id
}

pub fn previous_entry(entries: &[String]) -> Option<String> {
    if entries.len() < 2 {
        return None;
    }
    entries
        .get(entries.len() - 2)
        .map(|entry| remote_path::basename(entry).to_string())
}
