//! Part aggregation by release
//!
//! Groups [`PartLink`]s by [`ReleaseKey`] into [`ReleaseBundle`]s, tracks the
//! declared total and the bundle's lifecycle state, and answers completeness.

use crate::config::TotalConflictPolicy;
use crate::error::FailureKind;
use crate::types::{Fingerprint, Locator, PartLink, ReleaseKey, ReleaseState};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The part that made a bundle fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartFailure {
    /// Failing part index
    pub index: u32,
    /// Locator that failed; a different locator for the same index revives the bundle
    pub locator: Locator,
    /// Failure category
    pub kind: FailureKind,
    /// Error message
    pub reason: String,
}

/// All parts seen so far for one release
#[derive(Clone, Debug)]
pub struct ReleaseBundle {
    /// Aggregation key
    pub release: ReleaseKey,
    /// Display title from the first observed part
    pub title: String,
    /// Part links by index
    pub parts: BTreeMap<u32, PartLink>,
    /// Total part count, once any message declares one or it is settled
    pub declared_total: Option<u32>,
    /// True when `declared_total` was inferred from the highest index seen
    pub total_settled: bool,
    /// Lifecycle state
    pub state: ReleaseState,
    /// Set while the bundle is `Failed`
    pub failure: Option<PartFailure>,
}

impl ReleaseBundle {
    fn new(link: &PartLink) -> Self {
        Self {
            release: link.release.clone(),
            title: link.title.clone(),
            parts: BTreeMap::new(),
            declared_total: None,
            total_settled: false,
            state: ReleaseState::Pending,
            failure: None,
        }
    }

    /// True when the total is known, every index `1..=total` is present and
    /// no index lies beyond the total
    pub fn is_complete(&self) -> bool {
        let Some(total) = self.declared_total else {
            return false;
        };
        total >= 1
            && (1..=total).all(|i| self.parts.contains_key(&i))
            && self.parts.keys().next_back().is_some_and(|&last| last <= total)
    }

    /// Indices in `1..=total` that have no link yet (empty while the total is unknown)
    pub fn missing(&self) -> Vec<u32> {
        match self.declared_total {
            Some(total) => (1..=total)
                .filter(|i| !self.parts.contains_key(i))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Part links in ascending index order
    pub fn ordered_parts(&self) -> Vec<PartLink> {
        self.parts.values().cloned().collect()
    }

    /// Highest index when indices `1..=highest` are all present
    fn contiguous_highest(&self) -> Option<u32> {
        let (&last, _) = self.parts.last_key_value()?;
        (self.parts.len() as u32 == last).then_some(last)
    }

    /// Fingerprints (without content) for every present part
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.parts
            .keys()
            .map(|&index| Fingerprint::new(self.release.clone(), index))
            .collect()
    }
}

/// Groups part links into release bundles
pub struct PartAggregator {
    bundles: HashMap<ReleaseKey, ReleaseBundle>,
    policy: TotalConflictPolicy,
}

impl PartAggregator {
    /// Create an empty aggregator
    pub fn new(policy: TotalConflictPolicy) -> Self {
        Self {
            bundles: HashMap::new(),
            policy,
        }
    }

    /// Record a part link and return the bundle it belongs to
    ///
    /// A link for an index already present replaces the earlier one. A `Failed`
    /// bundle returns to `Pending` when a different link arrives for the index
    /// that failed. `Done` bundles are left untouched.
    pub fn observe(&mut self, link: PartLink) -> &ReleaseBundle {
        let policy = self.policy;
        let bundle = self
            .bundles
            .entry(link.release.clone())
            .or_insert_with(|| ReleaseBundle::new(&link));

        if bundle.state == ReleaseState::Done {
            debug!(
                release = %bundle.title,
                part_index = link.index,
                "Ignoring part for an already published release"
            );
            return bundle;
        }

        if let Some(total) = link.total {
            if bundle.total_settled {
                // A stated total replaces one inferred from the indices
                bundle.total_settled = false;
                bundle.declared_total = Some(total);
            } else {
                bundle.declared_total = Some(resolve_total(policy, bundle, total));
            }
        } else if bundle.total_settled
            && bundle.declared_total.is_some_and(|settled| link.index > settled)
        {
            debug!(
                release = %bundle.title,
                part_index = link.index,
                "Part beyond the settled total, total unknown again"
            );
            bundle.total_settled = false;
            bundle.declared_total = None;
        }

        if let Some(existing) = bundle.parts.get(&link.index)
            && existing.locator != link.locator
        {
            debug!(
                release = %bundle.title,
                part_index = link.index,
                old = %existing.locator.file_id,
                new = %link.locator.file_id,
                "Replacing part link"
            );
        }

        let revives = bundle.state == ReleaseState::Failed
            && bundle
                .failure
                .as_ref()
                .is_some_and(|f| f.index == link.index && f.locator != link.locator);
        if revives {
            debug!(
                release = %bundle.title,
                part_index = link.index,
                "Replacement link for failed part, release pending again"
            );
            bundle.state = ReleaseState::Pending;
            bundle.failure = None;
        }

        bundle.parts.insert(link.index, link);

        if bundle.state == ReleaseState::CompleteUnverified && !bundle.is_complete() {
            bundle.state = ReleaseState::Pending;
        }

        bundle
    }

    /// Completeness of a bundle (see [`ReleaseBundle::is_complete`])
    pub fn is_complete(&self, bundle: &ReleaseBundle) -> bool {
        bundle.is_complete()
    }

    /// Look up a bundle by key
    pub fn get(&self, release: &ReleaseKey) -> Option<&ReleaseBundle> {
        self.bundles.get(release)
    }

    /// Move a bundle to `state`, returning the previous state
    pub fn transition(&mut self, release: &ReleaseKey, state: ReleaseState) -> Option<ReleaseState> {
        let bundle = self.bundles.get_mut(release)?;
        let previous = bundle.state;
        bundle.state = state;
        if state != ReleaseState::Failed {
            bundle.failure = None;
        }
        debug!(release = %bundle.title, from = %previous, to = %state, "Release state change");
        Some(previous)
    }

    /// Mark a bundle failed at `failure.index`, returning the resulting state
    ///
    /// If a replacement link for the failing index arrived while the release
    /// was in flight, the bundle goes straight back to `Pending`.
    pub fn fail(&mut self, release: &ReleaseKey, failure: PartFailure) -> Option<ReleaseState> {
        let bundle = self.bundles.get_mut(release)?;

        let replaced = bundle
            .parts
            .get(&failure.index)
            .is_some_and(|current| current.locator != failure.locator);

        if replaced {
            debug!(
                release = %bundle.title,
                part_index = failure.index,
                "Failed part was replaced while in flight, release pending again"
            );
            bundle.state = ReleaseState::Pending;
            bundle.failure = None;
        } else {
            bundle.state = ReleaseState::Failed;
            bundle.failure = Some(failure);
        }
        Some(bundle.state)
    }

    /// Return bundles that failed while sending to `Pending` so they are retried from scratch
    pub fn requeue_send_failures(&mut self) -> Vec<ReleaseKey> {
        let mut requeued = Vec::new();
        for bundle in self.bundles.values_mut() {
            let send_failed = bundle.state == ReleaseState::Failed
                && bundle
                    .failure
                    .as_ref()
                    .is_some_and(|f| f.kind == FailureKind::Send);
            if send_failed {
                bundle.state = ReleaseState::Pending;
                bundle.failure = None;
                requeued.push(bundle.release.clone());
            }
        }
        requeued
    }

    /// Settle the total of pending releases that never declared one
    ///
    /// A release qualifies when indices `1..=highest` are all present and its
    /// newest part was posted at least `quiet` before `now`. The highest index
    /// becomes the total. Returns the settled releases.
    pub fn settle_unknown_totals(&mut self, now: DateTime<Utc>, quiet: Duration) -> Vec<ReleaseKey> {
        let Ok(quiet) = chrono::Duration::from_std(quiet) else {
            return Vec::new();
        };

        let mut settled = Vec::new();
        for bundle in self.bundles.values_mut() {
            if bundle.state != ReleaseState::Pending || bundle.declared_total.is_some() {
                continue;
            }
            let Some(highest) = bundle.contiguous_highest() else {
                continue;
            };
            let newest = bundle.parts.values().map(|p| p.posted_at).max();
            if newest.is_none_or(|posted| now - posted < quiet) {
                continue;
            }

            info!(
                release = %bundle.title,
                total = highest,
                "No total declared, settling on the highest part index"
            );
            bundle.declared_total = Some(highest);
            bundle.total_settled = true;
            settled.push(bundle.release.clone());
        }
        settled
    }

    /// Complete releases that are not being handled yet
    pub fn ready(&self) -> Vec<ReleaseKey> {
        self.bundles
            .values()
            .filter(|b| {
                matches!(
                    b.state,
                    ReleaseState::Pending | ReleaseState::CompleteUnverified
                ) && b.is_complete()
            })
            .map(|b| b.release.clone())
            .collect()
    }

    /// Number of tracked releases
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// True when no release has been observed
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Iterate over all tracked bundles
    pub fn bundles(&self) -> impl Iterator<Item = &ReleaseBundle> {
        self.bundles.values()
    }
}

fn resolve_total(policy: TotalConflictPolicy, bundle: &ReleaseBundle, observed: u32) -> u32 {
    let Some(current) = bundle.declared_total else {
        return observed;
    };
    if current != observed {
        warn!(
            release = %bundle.title,
            current,
            observed,
            policy = ?policy,
            "Conflicting declared part totals"
        );
    }
    match policy {
        TotalConflictPolicy::Max => current.max(observed),
        TotalConflictPolicy::First => current,
        TotalConflictPolicy::Latest => observed,
    }
}
