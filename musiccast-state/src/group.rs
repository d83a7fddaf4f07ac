//! Multi-room group reconciliation.
//!
//! Every device independently reports its believed group membership through
//! `dist/getDistributionInfo` (or the UDP hint that invalidates it). Those
//! per-device views disagree transiently during join/leave: a client may
//! claim a group before the leader lists it, and a leader may drop a client
//! the client still believes it belongs to. The coordinator folds the views
//! into one logical group per group id:
//!
//! - the leader's member list is authoritative;
//! - a client the leader does not (yet, or no longer) confirm is held
//!   `pending` for one more reconciliation cycle before being dropped, where
//!   a cycle is the next processed report from the group's leader device —
//!   including a report in which that device no longer claims the group;
//! - a group with no members left is removed, exactly once.
//!
//! Invariant violations (a second leader for a live group) are defects: the
//! offending report is logged and ignored in favor of the prior state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use musiccast_api::DistributionInfo;

use crate::delta::fields;
use crate::error::{Result, StateError};
use crate::model::{DeviceId, GroupId, GroupRole, ZoneId};
use crate::snapshot::{GroupMemberSnapshot, GroupSnapshot};
use crate::store::{ChangedFields, Inner, StateStore};

/// Confirmation status of a group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Listed by the group's leader (or the leader itself).
    Confirmed,
    /// Self-reported only; dropped if the leader's next report still omits it.
    Pending,
}

/// A device's own claim of group membership, from its latest report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupClaim {
    pub group: GroupId,
    pub role: GroupRole,
}

/// One device's view of its distribution state, normalized from the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributionView {
    pub group: Option<GroupId>,
    pub role: Option<GroupRole>,
    pub server_zone: Option<ZoneId>,
    pub name: Option<String>,
    /// Client addresses as the leader lists them; resolved to device ids
    /// against the store's host index when the report is applied.
    pub client_hosts: Vec<String>,
}

impl DistributionView {
    pub fn from_info(info: &DistributionInfo) -> Self {
        let group = info.group_id.as_deref().and_then(GroupId::parse);
        let role = info.role.as_deref().and_then(GroupRole::parse);
        let server_zone = info.server_zone.as_deref().and_then(|raw| {
            let parsed = raw.parse::<ZoneId>().ok();
            if parsed.is_none() {
                tracing::warn!(zone = raw, "unrecognized server zone in distribution info");
            }
            parsed
        });
        let client_hosts = info
            .client_list
            .iter()
            .filter_map(|client| client.ip_address.clone())
            .collect();
        Self {
            group,
            role,
            server_zone,
            name: info.group_name.clone(),
            client_hosts,
        }
    }

    /// Whether this view claims membership in any group.
    pub fn claim(&self) -> Option<GroupClaim> {
        match (&self.group, self.role) {
            (Some(group), Some(role)) => Some(GroupClaim {
                group: group.clone(),
                role,
            }),
            _ => None,
        }
    }
}

/// A change to one group, expressed as the same changed-field sets the rest
/// of the store uses.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDiff {
    pub group: GroupId,
    pub changed: ChangedFields,
}

impl GroupDiff {
    fn one(group: &GroupId, field: &'static str) -> Self {
        Self {
            group: group.clone(),
            changed: BTreeSet::from([field]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Member {
    pub(crate) device: DeviceId,
    pub(crate) status: MemberStatus,
}

#[derive(Debug, Default)]
pub(crate) struct GroupRecord {
    pub(crate) name: Option<String>,
    pub(crate) leader: Option<DeviceId>,
    pub(crate) server_zone: Option<ZoneId>,
    pub(crate) members: Vec<Member>,
    /// The device whose reports advance this group's pending decay: the
    /// current leader, or the last known one after it departed.
    pub(crate) cycle_driver: Option<DeviceId>,
}

impl GroupRecord {
    pub(crate) fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            name: self.name.clone(),
            leader: self.leader.clone(),
            server_zone: self.server_zone,
            members: self
                .members
                .iter()
                .map(|member| GroupMemberSnapshot {
                    device: member.device.clone(),
                    status: member.status,
                })
                .collect(),
        }
    }

    fn contains(&self, device: &DeviceId) -> bool {
        self.members.iter().any(|member| &member.device == device)
    }
}

/// Reconciles per-device distribution reports into the store's group slice.
#[derive(Clone)]
pub struct GroupCoordinator {
    store: StateStore,
}

impl GroupCoordinator {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Apply one device's distribution report.
    ///
    /// Returns the group diffs the report produced, in the order they
    /// should be dispatched.
    pub fn apply_report(&self, reporter: &DeviceId, view: &DistributionView) -> Result<Vec<GroupDiff>> {
        let mut inner = self.store.inner.write();
        let inner = &mut *inner;

        if !inner.devices.contains_key(reporter) {
            return Err(StateError::UnknownDevice(reporter.clone()));
        }

        let new_claim = view.claim();
        let old_claim = {
            let record = inner.devices.get_mut(reporter).expect("checked above");
            std::mem::replace(&mut record.claim, new_claim.clone())
        };

        let mut diffs = Vec::new();

        // Departure from the previously claimed group, if any.
        if let Some(old) = &old_claim {
            if new_claim.as_ref().map(|claim| &claim.group) != Some(&old.group) {
                depart(inner, reporter, &old.group, &mut diffs);
            }
        }

        // A report from a group's (former) leader that no longer claims the
        // group is still a reconciliation cycle for that group: pending
        // members decay.
        let driven: Vec<GroupId> = inner
            .groups
            .iter()
            .filter(|(id, record)| {
                record.cycle_driver.as_ref() == Some(reporter)
                    && new_claim.as_ref().map(|claim| &claim.group) != Some(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for group_id in driven {
            decay_members(inner, &group_id, &[], &mut diffs);
        }

        let Some(claim) = new_claim else {
            return Ok(diffs);
        };

        match claim.role {
            GroupRole::Leader => {
                self.apply_leader_report(inner, reporter, &claim.group, view, &mut diffs)
            }
            GroupRole::Client => {
                apply_client_report(inner, reporter, &claim.group, &mut diffs);
            }
        }

        Ok(diffs)
    }

    fn apply_leader_report(
        &self,
        inner: &mut Inner,
        reporter: &DeviceId,
        group_id: &GroupId,
        view: &DistributionView,
        diffs: &mut Vec<GroupDiff>,
    ) {
        // Reject a second leader while the current one still claims the
        // group: two leaders is a protocol invariant violation.
        if let Some(record) = inner.groups.get(group_id) {
            if let Some(current) = &record.leader {
                let current_still_leads = current != reporter
                    && inner
                        .devices
                        .get(current)
                        .and_then(|device| device.claim.as_ref())
                        .map(|claim| &claim.group == group_id && claim.role == GroupRole::Leader)
                        .unwrap_or(false);
                if current_still_leads {
                    tracing::warn!(
                        group = %group_id,
                        current_leader = %current,
                        reporter = %reporter,
                        "second leader reported for group, ignoring report"
                    );
                    return;
                }
            }
        }

        let is_new = !inner.groups.contains_key(group_id);
        if is_new {
            inner.groups.insert(group_id.clone(), GroupRecord::default());
            diffs.push(GroupDiff::one(group_id, fields::GROUP_ADDED));
        }

        // Authoritative member list: the leader itself plus the clients it
        // lists, in report order. Clients at hosts we do not track cannot be
        // represented and are skipped.
        let mut authoritative = vec![reporter.clone()];
        for host in &view.client_hosts {
            match inner.host_index.get(host) {
                Some(device) => {
                    if !authoritative.contains(device) {
                        authoritative.push(device.clone());
                    }
                }
                None => {
                    tracing::debug!(
                        group = %group_id,
                        host = host.as_str(),
                        "leader lists a client at an untracked host, skipping"
                    );
                }
            }
        }

        decay_members(inner, group_id, &authoritative, diffs);

        let record = inner
            .groups
            .get_mut(group_id)
            .expect("group exists while its leader reports");

        if record.leader.as_ref() != Some(reporter) {
            record.leader = Some(reporter.clone());
            diffs.push(GroupDiff::one(group_id, fields::GROUP_LEADER));
        }
        record.cycle_driver = Some(reporter.clone());

        if view.name.is_some() && record.name != view.name {
            record.name = view.name.clone();
            diffs.push(GroupDiff::one(group_id, fields::GROUP_NAME));
        }
        if view.server_zone.is_some() && record.server_zone != view.server_zone {
            record.server_zone = view.server_zone;
            diffs.push(GroupDiff::one(group_id, fields::GROUP_SERVER_ZONE));
        }
    }

    /// Drop a device from every group it appears in (device untracked).
    pub fn remove_device(&self, device: &DeviceId) -> Vec<GroupDiff> {
        let mut inner = self.store.inner.write();
        let inner = &mut *inner;

        let mut diffs = Vec::new();
        let group_ids: Vec<GroupId> = inner.groups.keys().cloned().collect();
        for group_id in group_ids {
            depart(inner, device, &group_id, &mut diffs);
        }
        diffs
    }
}

/// Remove `device` from `group_id` because it no longer claims it (or is
/// being untracked). A departing leader leaves the group leaderless but
/// remains the cycle driver so pending members still decay on its reports.
fn depart(inner: &mut Inner, device: &DeviceId, group_id: &GroupId, diffs: &mut Vec<GroupDiff>) {
    let Some(record) = inner.groups.get_mut(group_id) else {
        return;
    };
    if !record.contains(device) && record.leader.as_ref() != Some(device) {
        return;
    }

    let before = record.members.len();
    record.members.retain(|member| &member.device != device);
    let removed = record.members.len() != before;

    let mut leader_changed = false;
    if record.leader.as_ref() == Some(device) {
        record.leader = None;
        leader_changed = true;
    }

    if record.members.is_empty() {
        inner.groups.remove(group_id);
        diffs.push(GroupDiff::one(group_id, fields::GROUP_REMOVED));
        return;
    }
    if removed {
        diffs.push(GroupDiff::one(group_id, fields::GROUP_MEMBERS));
    }
    if leader_changed {
        diffs.push(GroupDiff::one(group_id, fields::GROUP_LEADER));
    }
}

/// Advance one reconciliation cycle for a group given the authoritative
/// member list (empty when the leader no longer claims the group).
///
/// Two-phase rule per member not in the authoritative list: a confirmed
/// member that still claims the group turns pending; a pending one expires
/// and is removed. Members that stopped claiming are removed immediately.
fn decay_members(
    inner: &mut Inner,
    group_id: &GroupId,
    authoritative: &[DeviceId],
    diffs: &mut Vec<GroupDiff>,
) {
    let Inner {
        devices, groups, ..
    } = inner;
    let Some(record) = groups.get_mut(group_id) else {
        return;
    };

    let claims_group = |device: &DeviceId| {
        devices
            .get(device)
            .and_then(|record| record.claim.as_ref())
            .map(|claim| &claim.group == group_id)
            .unwrap_or(false)
    };

    let before: Vec<DeviceId> = record.members.iter().map(|m| m.device.clone()).collect();

    let mut kept: Vec<Member> = Vec::with_capacity(record.members.len());
    for member in record.members.drain(..) {
        if authoritative.contains(&member.device) {
            kept.push(Member {
                device: member.device,
                status: MemberStatus::Confirmed,
            });
        } else if claims_group(&member.device) {
            match member.status {
                MemberStatus::Confirmed => kept.push(Member {
                    device: member.device,
                    status: MemberStatus::Pending,
                }),
                MemberStatus::Pending => {
                    tracing::debug!(
                        group = %group_id,
                        device = %member.device,
                        "pending member expired"
                    );
                }
            }
        }
        // members that no longer claim the group drop immediately
    }

    // New authoritative members come in, in report order: leader first.
    let mut members: Vec<Member> = authoritative
        .iter()
        .map(|device| Member {
            device: device.clone(),
            status: MemberStatus::Confirmed,
        })
        .collect();
    for member in kept {
        if !members.iter().any(|m| m.device == member.device) {
            members.push(member);
        }
    }
    record.members = members;

    let after: Vec<DeviceId> = record.members.iter().map(|m| m.device.clone()).collect();

    if record.members.is_empty() {
        groups.remove(group_id);
        diffs.push(GroupDiff::one(group_id, fields::GROUP_REMOVED));
        return;
    }
    if before != after {
        diffs.push(GroupDiff::one(group_id, fields::GROUP_MEMBERS));
    }
}

/// A client claiming a group the leader has not confirmed yet is held as a
/// pending member; the leader's next report either confirms or expires it.
fn apply_client_report(
    inner: &mut Inner,
    reporter: &DeviceId,
    group_id: &GroupId,
    diffs: &mut Vec<GroupDiff>,
) {
    let is_new = !inner.groups.contains_key(group_id);
    let record = inner.groups.entry(group_id.clone()).or_default();
    if is_new {
        diffs.push(GroupDiff::one(group_id, fields::GROUP_ADDED));
    }
    if !record.contains(reporter) {
        record.members.push(Member {
            device: reporter.clone(),
            status: MemberStatus::Pending,
        });
        diffs.push(GroupDiff::one(group_id, fields::GROUP_MEMBERS));
    }
}
