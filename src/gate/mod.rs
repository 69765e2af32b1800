//! Migration gate.
//!
//! A running machine may only be handed off at a safe point: no active
//! node tagged no-migrate, and every active invocation tagged
//! can-interrupt. The gate is pure; callers re-evaluate it after every
//! transition while a migration is pending.

use crate::chart::{ActiveNode, MachineSnapshot, Tag};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// Reason a configuration is not a safe point.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationBlocker {
    #[error("State '{state_id}' is tagged no-migrate")]
    NoMigrate { state_id: String },

    #[error("State '{state_id}' has an invocation that cannot be interrupted")]
    UninterruptibleInvocation { state_id: String },
}

/// Check every active node, accumulating all blockers.
pub fn evaluate(active: &[ActiveNode]) -> Validation<(), NonEmptyVec<MigrationBlocker>> {
    let checks: Vec<Validation<(), NonEmptyVec<MigrationBlocker>>> =
        active.iter().flat_map(node_checks).collect();
    if checks.is_empty() {
        return Validation::success(());
    }
    Validation::all_vec(checks).map(|_| ())
}

fn node_checks(node: &ActiveNode) -> [Validation<(), NonEmptyVec<MigrationBlocker>>; 2] {
    let no_migrate = if node.tags.contains(&Tag::NoMigrate) {
        Validation::fail(MigrationBlocker::NoMigrate {
            state_id: node.state_id.clone(),
        })
    } else {
        Validation::success(())
    };
    let invocation = if node.invoking && !node.tags.contains(&Tag::CanInterrupt) {
        Validation::fail(MigrationBlocker::UninterruptibleInvocation {
            state_id: node.state_id.clone(),
        })
    } else {
        Validation::success(())
    };
    [no_migrate, invocation]
}

/// Whether the snapshot's configuration is a safe point.
pub fn can_migrate<C>(snapshot: &MachineSnapshot<C>) -> bool {
    matches!(evaluate(&snapshot.active), Validation::Success(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn node(state_id: &str, tags: &[Tag], invoking: bool) -> ActiveNode {
        ActiveNode {
            state_id: state_id.to_string(),
            tags: tags.iter().cloned().collect::<BTreeSet<_>>(),
            invoking,
        }
    }

    fn snapshot(active: Vec<ActiveNode>) -> MachineSnapshot<()> {
        MachineSnapshot {
            value: "idle".into(),
            context: (),
            active,
            done: false,
        }
    }

    #[test]
    fn quiet_configurations_can_migrate() {
        let active = vec![node("m", &[], false), node("m.idle", &[], false)];
        assert!(can_migrate(&snapshot(active)));
    }

    #[test]
    fn no_migrate_blocks_even_without_invocations() {
        let active = vec![node("m", &[], false), node("m.saving", &[Tag::NoMigrate], false)];
        assert!(!can_migrate(&snapshot(active)));
    }

    #[test]
    fn uninterruptible_invocations_block() {
        let active = vec![node("m", &[], false), node("m.fetching", &[], true)];
        assert!(!can_migrate(&snapshot(active)));
    }

    #[test]
    fn interruptible_invocations_allow_migration() {
        let active = vec![
            node("m", &[], false),
            node("m.polling", &[Tag::CanInterrupt], true),
        ];
        assert!(can_migrate(&snapshot(active)));
    }

    #[test]
    fn one_uninterruptible_invocation_is_enough_to_block() {
        let active = vec![
            node("m", &[], false),
            node("m.outer", &[Tag::CanInterrupt], true),
            node("m.outer.inner", &[], true),
        ];
        assert!(!can_migrate(&snapshot(active)));
    }

    #[test]
    fn can_interrupt_does_not_override_no_migrate() {
        let active = vec![node("m.step", &[Tag::NoMigrate, Tag::CanInterrupt], true)];
        assert!(!can_migrate(&snapshot(active)));
    }

    #[test]
    fn custom_tags_have_no_effect() {
        let active = vec![node("m.step", &[Tag::Custom("billing".to_string())], false)];
        assert!(can_migrate(&snapshot(active)));
    }

    #[test]
    fn evaluate_accumulates_every_blocker() {
        let active = vec![
            node("m.a", &[Tag::NoMigrate], true),
            node("m.a.b", &[], true),
        ];
        match evaluate(&active) {
            Validation::Failure(errors) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| matches!(
                    e,
                    MigrationBlocker::NoMigrate { state_id } if state_id == "m.a"
                )));
                assert_eq!(
                    errors
                        .iter()
                        .filter(|e| matches!(e, MigrationBlocker::UninterruptibleInvocation { .. }))
                        .count(),
                    2
                );
            }
            Validation::Success(_) => panic!("Expected blockers, got success"),
        }
    }

    #[test]
    fn empty_configuration_is_a_safe_point() {
        assert!(matches!(evaluate(&[]), Validation::Success(_)));
    }
}
