//! Release retention.
//!
//! Planning is a pure function over what was found on the host; the manager
//! gathers the inputs, applies the safety guards, and deletes. A guard trip is
//! an outcome with a warning, never an error.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use super::keep_until::{self, MarkerScan};
use super::ledger::{self, ReleaseRecord};
use super::lifecycle::current_target;
use super::paths::ReleaseLayout;
use super::{git, ReleaseId};
use crate::command::RemoteCommand;
use crate::config::Environment;
use crate::error::Result;
use crate::executor::{Host, RunOptions};
use crate::utils::remote_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    /// Target of the current link. Never counted toward `keep`.
    Current,
    /// Release being deployed right now. Counted toward `keep`.
    InProgress,
    WithinWindow,
    BeyondWindow,
    KeepUntil,
    KeepUntilExpired,
    MarkerUnreadable,
    /// Never finished activation.
    Unrecorded,
}

impl Decision {
    pub fn removes(&self) -> bool {
        matches!(
            self,
            Decision::BeyondWindow | Decision::KeepUntilExpired | Decision::Unrecorded
        )
    }

    fn by_marker(&self) -> bool {
        matches!(self, Decision::KeepUntil | Decision::MarkerUnreadable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub id: ReleaseId,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_until: Option<NaiveDateTime>,
}

pub struct PlanInput<'a> {
    pub releases: &'a [ReleaseId],
    pub current: Option<&'a ReleaseId>,
    pub in_progress: Option<&'a ReleaseId>,
    pub ledger: &'a [String],
    pub keep: usize,
    pub now: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Newest first.
    pub verdicts: Vec<Verdict>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<String>,
}

impl Plan {
    pub fn slated(&self) -> impl Iterator<Item = &ReleaseId> {
        self.verdicts
            .iter()
            .filter(|v| v.decision.removes())
            .map(|v| &v.id)
    }
}

/// Decide the fate of every release.
///
/// `markers` is only consulted for releases the ledger does not vouch for.
pub fn plan<F>(input: &PlanInput, mut markers: F) -> Result<Plan>
where
    F: FnMut(&ReleaseId) -> Result<MarkerScan>,
{
    let mut ordered: Vec<&ReleaseId> = input.releases.iter().collect();
    ordered.sort_by(|a, b| b.cmp(a));
    ordered.dedup();

    let mut result = Plan::default();
    let mut valid = 0usize;

    for id in ordered {
        let recorded = input
            .ledger
            .iter()
            .any(|entry| ledger::entry_matches(entry, id.as_str()));
        let mut keep_until = None;

        let decision = if input.current == Some(id) {
            Decision::Current
        } else if input.in_progress == Some(id) {
            valid += 1;
            Decision::InProgress
        } else if recorded {
            valid += 1;
            if valid > input.keep {
                Decision::BeyondWindow
            } else {
                Decision::WithinWindow
            }
        } else {
            let scan = markers(id)?;
            keep_until = scan.until;
            if !scan.unreadable.is_empty() {
                result.warnings.push(format!(
                    "{} kept: unreadable KeepUntil marker {}",
                    id,
                    scan.unreadable.join(", ")
                ));
                Decision::MarkerUnreadable
            } else {
                match scan.until {
                    Some(until) if until < input.now => Decision::KeepUntilExpired,
                    Some(_) => Decision::KeepUntil,
                    None => Decision::Unrecorded,
                }
            }
        };

        result.verdicts.push(Verdict {
            id: id.clone(),
            decision,
            keep_until,
        });
    }

    result.abort = guard(input, &result);
    if let Some(reason) = &result.abort {
        result.warnings.push(reason.clone());
    }
    Ok(result)
}

fn guard(input: &PlanInput, plan: &Plan) -> Option<String> {
    let slated = plan.slated().count();
    if slated == 0 {
        return None;
    }

    if slated == plan.verdicts.len() {
        return Some("Aborting clean: every release is slated for removal".to_string());
    }

    if let Some(in_progress) = input.in_progress {
        if plan.slated().any(|id| id == in_progress) {
            return Some(format!(
                "Aborting clean: in-progress release {} is slated for removal",
                in_progress
            ));
        }
    }

    let vouched = plan.verdicts.iter().any(|v| {
        input
            .ledger
            .iter()
            .any(|entry| ledger::entry_matches(entry, v.id.as_str()))
    });
    if !vouched {
        return Some(
            "Aborting clean: the ledger records none of the releases on disk".to_string(),
        );
    }

    None
}

/// Parameters for one clean run.
#[derive(Debug, Clone)]
pub struct CleanRequest {
    pub keep: usize,
    pub in_progress: Option<ReleaseId>,
    pub now: DateTime<Utc>,
}

impl CleanRequest {
    pub fn new(keep: usize) -> Self {
        Self {
            keep,
            in_progress: None,
            now: Utc::now(),
        }
    }

    pub fn in_progress(mut self, id: Option<ReleaseId>) -> Self {
        self.in_progress = id;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RetentionStatus {
    Cleaned,
    Aborted,
    /// No releases on the host.
    Empty,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub status: RetentionStatus,
    pub removed: Vec<ReleaseId>,
    pub retained: Vec<ReleaseId>,
    /// Kept only because of a KeepUntil marker.
    pub protected: Vec<ReleaseId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub verdicts: Vec<Verdict>,
}

impl RetentionReport {
    fn empty(warnings: Vec<String>) -> Self {
        Self {
            status: RetentionStatus::Empty,
            removed: Vec::new(),
            retained: Vec::new(),
            protected: Vec::new(),
            abort_reason: None,
            warnings,
            verdicts: Vec::new(),
        }
    }

    fn from_plan(plan: Plan, removed: Vec<ReleaseId>) -> Self {
        let kept = |by_marker: bool| {
            plan.verdicts
                .iter()
                .filter(|v| !v.decision.removes() && v.decision.by_marker() == by_marker)
                .map(|v| v.id.clone())
                .collect::<Vec<_>>()
        };

        Self {
            status: if plan.abort.is_some() {
                RetentionStatus::Aborted
            } else {
                RetentionStatus::Cleaned
            },
            removed,
            retained: kept(false),
            protected: kept(true),
            abort_reason: plan.abort.clone(),
            warnings: plan.warnings.clone(),
            verdicts: plan.verdicts,
        }
    }
}

pub struct RetentionManager<'a> {
    host: Host<'a>,
    env: &'a Environment,
    layout: ReleaseLayout,
}

impl<'a> RetentionManager<'a> {
    pub fn new(host: Host<'a>, env: &'a Environment) -> Self {
        Self {
            host,
            env,
            layout: ReleaseLayout::new(env),
        }
    }

    /// Release directories on the host. Names that are not valid ids are
    /// reported and left alone.
    pub fn list_releases(&self) -> Result<(Vec<ReleaseId>, Vec<String>)> {
        if !self.host.exists(&self.layout.releases_dir)? {
            return Ok((Vec::new(), Vec::new()));
        }

        let listing = self.host.sudo(
            &RemoteCommand::new("find")
                .arg(&self.layout.releases_dir)
                .args(["-mindepth", "1", "-maxdepth", "1", "-type", "d"]),
        )?;

        let mut releases = Vec::new();
        let mut warnings = Vec::new();
        for line in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let name = remote_path::basename(line);
            match ReleaseId::parse(name) {
                Ok(id) => releases.push(id),
                Err(_) => warnings.push(format!("Ignoring unexpected entry {}", line)),
            }
        }
        Ok((releases, warnings))
    }

    pub fn current_release(&self) -> Result<Option<ReleaseId>> {
        let Some(target) = current_target(&self.host, &self.layout)? else {
            return Ok(None);
        };
        Ok(ReleaseId::parse(remote_path::basename(&target)).ok())
    }

    pub fn markers(&self, id: &ReleaseId) -> Result<MarkerScan> {
        let prefix = &self.env.retention.keep_until_prefix;
        let listing = self.host.sudo(
            &RemoteCommand::new("find")
                .arg(self.layout.release_dir(id))
                .args(["-maxdepth", "1", "-name"])
                .arg(format!("{}*", prefix)),
        )?;

        Ok(keep_until::scan(
            listing.lines().map(|l| remote_path::basename(l.trim())),
            prefix,
            &self.env.retention.keep_until_format,
        ))
    }

    pub fn clean_releases(&self, request: &CleanRequest) -> Result<RetentionReport> {
        let (releases, mut warnings) = self.list_releases()?;
        if releases.is_empty() {
            return Ok(RetentionReport::empty(warnings));
        }

        let current = self.current_release()?;
        let entries = ReleaseRecord::new(self.host, &self.layout).entries()?;

        let input = PlanInput {
            releases: &releases,
            current: current.as_ref(),
            in_progress: request.in_progress.as_ref(),
            ledger: &entries,
            keep: request.keep,
            now: request.now.naive_utc(),
        };
        let mut plan = plan(&input, |id| self.markers(id))?;
        warnings.append(&mut plan.warnings);
        plan.warnings = warnings;

        for warning in &plan.warnings {
            log_status!("clean", "Warning on {}: {}", self.host.name(), warning);
        }

        if plan.abort.is_some() {
            return Ok(RetentionReport::from_plan(plan, Vec::new()));
        }

        let mut removed = Vec::new();
        for id in plan.slated() {
            self.host
                .sudo(&RemoteCommand::new("rm").args(["-rf", self.layout.release_dir(id).as_str()]))?;
            log_status!("clean", "Removed {} on {}", id, self.host.name());
            removed.push(id.clone());
        }

        if current.is_some() {
            git::gc(
                &self.host,
                &self.layout.current,
                &RunOptions::as_user(&self.env.sudo_user),
            )?;
        }

        Ok(RetentionReport::from_plan(plan, removed))
    }
}
