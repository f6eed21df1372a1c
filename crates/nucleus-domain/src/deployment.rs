use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config_value::ConfigValue;
use crate::identifiers::{ComponentName, VersionRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureHandling {
    DoNothing,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentUpdatePolicy {
    Notify,
    SkipNotify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policies {
    pub failure_handling: FailureHandling,
    pub component_update_policy: ComponentUpdatePolicy,
    pub configuration_validation_timeout_sec: u64,
    pub component_update_timeout_sec: u64,
}

impl Default for Policies {
    fn default() -> Self {
        Policies {
            failure_handling: FailureHandling::DoNothing,
            component_update_policy: ComponentUpdatePolicy::Notify,
            configuration_validation_timeout_sec: 30,
            component_update_timeout_sec: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: ComponentName,
    pub version: VersionRange,
    pub root_component: bool,
    pub configuration: ConfigValue,
}

/// A signed, timestamped directive from the cloud control plane (§3, §6).
/// Deployments are totally ordered by `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub timestamp: i64,
    pub group_name: String,
    pub packages: Vec<PackageSpec>,
    pub policies: Policies,
}

impl Deployment {
    pub fn root_constraints(&self) -> HashMap<ComponentName, VersionRange> {
        self.packages
            .iter()
            .filter(|p| p.root_component)
            .map(|p| (p.name.clone(), p.version.clone()))
            .collect()
    }
}

/// The set of deployment groups currently applied to the device (§3).
/// The active component set is the union of root components across all
/// active groups; each group's constraints stay live until the group is
/// removed, even after the deployment that introduced it has committed.
#[derive(Debug, Clone, Default)]
pub struct GroupMembership {
    groups: HashMap<String, HashMap<ComponentName, VersionRange>>,
}

impl GroupMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace (or insert) a group's root constraint set, e.g. after a
    /// deployment targeting that group commits.
    pub fn set_group(&mut self, group: impl Into<String>, roots: HashMap<ComponentName, VersionRange>) {
        self.groups.insert(group.into(), roots);
    }

    pub fn remove_group(&mut self, group: &str) {
        self.groups.remove(group);
    }

    pub fn group_names(&self) -> HashSet<&str> {
        self.groups.keys().map(|s| s.as_str()).collect()
    }

    /// The union of every active group's root constraints. When two groups
    /// constrain the same component name, both constraints are kept so the
    /// resolver can detect a conflict between them rather than one silently
    /// shadowing the other.
    pub fn union_constraints(&self) -> HashMap<ComponentName, Vec<VersionRange>> {
        let mut out: HashMap<ComponentName, Vec<VersionRange>> = HashMap::new();
        for roots in self.groups.values() {
            for (name, range) in roots {
                out.entry(name.clone()).or_default().push(range.clone());
            }
        }
        out
    }

    /// Project the constraint set as it would be with `group` replaced by
    /// `roots`, without mutating membership — used by DeploymentController
    /// to resolve a candidate deployment before committing it.
    pub fn with_group_preview(
        &self,
        group: &str,
        roots: HashMap<ComponentName, VersionRange>,
    ) -> HashMap<ComponentName, Vec<VersionRange>> {
        let mut preview = self.clone();
        preview.set_group(group.to_string(), roots);
        preview.union_constraints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_constraints_keeps_both_on_overlap() {
        let mut membership = GroupMembership::new();
        let name = ComponentName::new("Mosquitto").unwrap();
        let mut g1 = HashMap::new();
        g1.insert(name.clone(), VersionRange::parse("<=1.5.0").unwrap());
        membership.set_group("g1", g1);
        let mut g2 = HashMap::new();
        g2.insert(name.clone(), VersionRange::parse(">=2.0.0").unwrap());
        membership.set_group("g2", g2);

        let union = membership.union_constraints();
        assert_eq!(union.get(&name).unwrap().len(), 2);
    }

    #[test]
    fn preview_does_not_mutate_membership() {
        let membership = GroupMembership::new();
        let mut roots = HashMap::new();
        roots.insert(
            ComponentName::new("CustomerApp").unwrap(),
            VersionRange::parse("1.0.0").unwrap(),
        );
        let preview = membership.with_group_preview("new-group", roots);
        assert_eq!(preview.len(), 1);
        assert!(membership.group_names().is_empty());
    }
}
