//! Read-only control-plane projection.
//!
//! Answers the scale questions over one cluster's machines: which need
//! rollout, which are current, where to add the next machine, and which
//! machine to delete first.

use crate::cluster::ClusterDeclaration;
use crate::machine::Machine;
use chrono::{DateTime, Utc};

/// A point-in-time view over one cluster's control-plane machines.
pub struct ControlPlaneView<'a> {
    decl: &'a ClusterDeclaration,
    machines: Vec<&'a Machine>,
    declared_domains: Vec<String>,
    rollout_after: Option<DateTime<Utc>>,
    /// All "now" comparisons use the view's creation instant.
    now: DateTime<Utc>,
}

impl<'a> ControlPlaneView<'a> {
    pub fn new(
        decl: &'a ClusterDeclaration,
        machines: impl IntoIterator<Item = &'a Machine>,
        declared_domains: Vec<String>,
        rollout_after: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            decl,
            machines: machines.into_iter().collect(),
            declared_domains,
            rollout_after,
            now: Utc::now(),
        }
    }

    /// All machines in the view.
    pub fn machines(&self) -> &[&'a Machine] {
        &self.machines
    }

    /// Whether any machine is being deleted.
    pub fn has_deleting_machine(&self) -> bool {
        self.machines.iter().any(|m| m.is_deleting())
    }

    /// A machine is scheduled for rollout when the rollout-after deadline
    /// has passed and the machine predates it.
    fn scheduled_for_rollout(&self, machine: &Machine) -> bool {
        match self.rollout_after {
            Some(deadline) => deadline <= self.now && machine.created < deadline,
            None => false,
        }
    }

    /// A machine drifts when its spec no longer matches the declaration.
    fn spec_drifted(&self, machine: &Machine) -> bool {
        machine.spec.distribution != self.decl.distribution
            || machine.spec.version != self.decl.version
            || (!self.decl.distribution.embeds_container_runtime()
                && machine.spec.container_manager != self.decl.container_manager)
    }

    /// Machines that need to be rolled out (deleting machines excluded).
    pub fn machines_needing_rollout(&self) -> Vec<&'a Machine> {
        self.machines
            .iter()
            .copied()
            .filter(|m| !m.is_deleting())
            .filter(|m| self.scheduled_for_rollout(m) || self.spec_drifted(m))
            .collect()
    }

    /// Machines current with the declaration.
    pub fn up_to_date_machines(&self) -> Vec<&'a Machine> {
        self.machines
            .iter()
            .copied()
            .filter(|m| !m.is_deleting())
            .filter(|m| !self.scheduled_for_rollout(m) && !self.spec_drifted(m))
            .collect()
    }

    fn count_in_domain<'b>(machines: &[&'b Machine], domain: &str) -> usize {
        machines
            .iter()
            .filter(|m| m.spec.failure_domain.as_deref() == Some(domain))
            .count()
    }

    /// The failure domain to place the next machine in: the declared domain
    /// with the fewest up-to-date machines. `None` when no domains are
    /// declared.
    pub fn next_failure_domain_for_scale_up(&self) -> Option<&str> {
        if self.declared_domains.is_empty() {
            return None;
        }
        let up_to_date = self.up_to_date_machines();
        self.declared_domains
            .iter()
            .min_by_key(|domain| Self::count_in_domain(&up_to_date, domain))
            .map(String::as_str)
    }

    /// The failure domain to take a machine from.
    ///
    /// Machines outside every declared domain go first: the oldest such
    /// machine's domain is returned (possibly `None`, meaning no domain).
    /// Otherwise the declared domain holding the most of the given machines
    /// wins.
    pub fn failure_domain_with_most_machines(
        &self,
        machines: &[&'a Machine],
    ) -> Option<&'a str> {
        let mut outside: Vec<&&Machine> = machines
            .iter()
            .filter(|m| match &m.spec.failure_domain {
                Some(domain) => !self.declared_domains.iter().any(|d| d == domain),
                None => true,
            })
            .collect();
        if !outside.is_empty() {
            outside.sort_by_key(|m| m.created);
            return outside[0].spec.failure_domain.as_deref();
        }

        let mut best: Option<&'a str> = None;
        let mut best_count = 0;
        for machine in machines {
            if let Some(domain) = machine.spec.failure_domain.as_deref()
                && self.declared_domains.iter().any(|d| d == domain)
            {
                let count = Self::count_in_domain(machines, domain);
                if count > best_count {
                    best = Some(domain);
                    best_count = count;
                }
            }
        }
        best
    }

    /// The machine to delete first.
    ///
    /// An explicit delete annotation wins; among annotated machines (and
    /// otherwise within the most-populated failure domain) the oldest goes
    /// first.
    pub fn deletion_candidate(&self, machines: &[&'a Machine]) -> Option<&'a Machine> {
        let mut annotated: Vec<&'a Machine> = machines
            .iter()
            .copied()
            .filter(|m| m.has_delete_annotation())
            .collect();
        if !annotated.is_empty() {
            annotated.sort_by_key(|m| m.created);
            return Some(annotated[0]);
        }

        let domain = self.failure_domain_with_most_machines(machines);
        let mut in_domain: Vec<&'a Machine> = machines
            .iter()
            .copied()
            .filter(|m| m.spec.failure_domain.as_deref() == domain)
            .collect();
        in_domain.sort_by_key(|m| m.created);
        in_domain.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ContainerManager, Distribution};
    use crate::machine::DELETE_MACHINE_ANNOTATION;
    use chrono::Duration;
    use sshkit::{Auth, Host};

    fn decl() -> ClusterDeclaration {
        ClusterDeclaration::new("test", Distribution::Kubernetes, "v1.29.2")
    }

    fn machine(name: &str, domain: Option<&str>, age_hours: i64) -> Machine {
        let host = Host::new(name, "10.0.0.1", "root", Auth::PrivateKey("/k".into()));
        let mut machine = Machine::new(
            host,
            Distribution::Kubernetes,
            "v1.29.2",
            ContainerManager::Containerd,
        );
        machine.spec.failure_domain = domain.map(str::to_string);
        machine.created = Utc::now() - Duration::hours(age_hours);
        machine
    }

    #[test]
    fn test_spec_drift_triggers_rollout() {
        let decl = decl();
        let mut stale = machine("m1", None, 1);
        stale.spec.version = "v1.28.0".to_string();
        let fresh = machine("m2", None, 1);
        let machines = [stale, fresh];
        let view = ControlPlaneView::new(&decl, machines.iter(), vec![], None);

        let needing: Vec<&str> = view
            .machines_needing_rollout()
            .iter()
            .map(|m| m.name())
            .collect();
        assert_eq!(needing, ["m1"]);
        let current: Vec<&str> = view.up_to_date_machines().iter().map(|m| m.name()).collect();
        assert_eq!(current, ["m2"]);
    }

    #[test]
    fn test_rollout_after_deadline() {
        let decl = decl();
        let old = machine("m1", None, 48);
        let new = machine("m2", None, 1);
        let machines = [old, new];
        // Deadline a day ago: m1 predates it, m2 does not.
        let deadline = Utc::now() - Duration::hours(24);
        let view = ControlPlaneView::new(&decl, machines.iter(), vec![], Some(deadline));

        let needing: Vec<&str> = view
            .machines_needing_rollout()
            .iter()
            .map(|m| m.name())
            .collect();
        assert_eq!(needing, ["m1"]);
    }

    #[test]
    fn test_future_rollout_deadline_is_inert() {
        let decl = decl();
        let machines = [machine("m1", None, 48)];
        let deadline = Utc::now() + Duration::hours(24);
        let view = ControlPlaneView::new(&decl, machines.iter(), vec![], Some(deadline));
        assert!(view.machines_needing_rollout().is_empty());
    }

    #[test]
    fn test_scale_up_picks_fewest_up_to_date() {
        let decl = decl();
        let machines = [
            machine("m1", Some("az-a"), 3),
            machine("m2", Some("az-a"), 2),
            machine("m3", Some("az-b"), 1),
        ];
        let view = ControlPlaneView::new(
            &decl,
            machines.iter(),
            vec!["az-a".into(), "az-b".into(), "az-c".into()],
            None,
        );
        assert_eq!(view.next_failure_domain_for_scale_up(), Some("az-c"));
    }

    #[test]
    fn test_scale_up_without_domains() {
        let decl = decl();
        let machines = [machine("m1", None, 1)];
        let view = ControlPlaneView::new(&decl, machines.iter(), vec![], None);
        assert_eq!(view.next_failure_domain_for_scale_up(), None);
    }

    #[test]
    fn test_scale_down_prefers_most_populated() {
        let decl = decl();
        let machines = [
            machine("m1", Some("az-a"), 3),
            machine("m2", Some("az-a"), 2),
            machine("m3", Some("az-b"), 1),
        ];
        let view = ControlPlaneView::new(
            &decl,
            machines.iter(),
            vec!["az-a".into(), "az-b".into()],
            None,
        );
        let refs: Vec<&Machine> = machines.iter().collect();
        assert_eq!(view.failure_domain_with_most_machines(&refs), Some("az-a"));
    }

    #[test]
    fn test_scale_down_prefers_undeclared_domain_first() {
        let decl = decl();
        let machines = [
            machine("m1", Some("az-a"), 1),
            machine("m2", Some("az-gone"), 5),
        ];
        let view = ControlPlaneView::new(&decl, machines.iter(), vec!["az-a".into()], None);
        let refs: Vec<&Machine> = machines.iter().collect();
        assert_eq!(
            view.failure_domain_with_most_machines(&refs),
            Some("az-gone")
        );
    }

    #[test]
    fn test_deletion_candidate_honours_annotation() {
        let decl = decl();
        let mut annotated = machine("m1", Some("az-b"), 1);
        annotated
            .annotations
            .insert(DELETE_MACHINE_ANNOTATION.to_string(), "".to_string());
        let machines = [
            machine("m2", Some("az-a"), 10),
            machine("m3", Some("az-a"), 5),
            annotated,
        ];
        let view = ControlPlaneView::new(
            &decl,
            machines.iter(),
            vec!["az-a".into(), "az-b".into()],
            None,
        );
        let refs: Vec<&Machine> = machines.iter().collect();
        assert_eq!(view.deletion_candidate(&refs).unwrap().name(), "m1");
    }

    #[test]
    fn test_deletion_candidate_oldest_in_fullest_domain() {
        let decl = decl();
        let machines = [
            machine("m1", Some("az-a"), 10),
            machine("m2", Some("az-a"), 5),
            machine("m3", Some("az-b"), 20),
        ];
        let view = ControlPlaneView::new(
            &decl,
            machines.iter(),
            vec!["az-a".into(), "az-b".into()],
            None,
        );
        let refs: Vec<&Machine> = machines.iter().collect();
        assert_eq!(view.deletion_candidate(&refs).unwrap().name(), "m1");
    }
}
