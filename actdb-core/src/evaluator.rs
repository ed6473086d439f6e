//! The transition evaluator.
//!
//! One evaluation cycle ("turn") consumes at most one action: the first
//! unconsumed action on the instance's context chain whose event has a
//! defined transition from the instance's current state. Actions with no
//! matching transition are skipped, not consumed, so an irrelevant action
//! never blocks a later relevant one. Deliberately no fast-forward through
//! multiple matches: each cycle stays auditable against one causal step.

use crate::action::ActionLog;
use crate::definition::MachineStore;
use crate::error::CoreError;
use crate::instance::Instance;
use crate::{ActionId, StateId};

/// A matched action/transition pair, ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub action_id: ActionId,
    pub next_state_id: StateId,
}

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub instance_id: u64,
    /// Whether a transition was applied this cycle.
    pub advanced: bool,
    /// The consumed action, if any.
    pub action_id: Option<ActionId>,
    pub from_state_id: StateId,
    pub to_state_id: StateId,
}

impl TurnOutcome {
    /// A cycle that found no relevant pending action.
    pub fn idle(instance: &Instance) -> Self {
        Self {
            instance_id: instance.id,
            advanced: false,
            action_id: None,
            from_state_id: instance.state_id,
            to_state_id: instance.state_id,
        }
    }
}

/// Finds the next action the instance should consume, without committing.
///
/// Walks the context chain strictly after `instance.last_action_id` in
/// order; the first action whose event yields a defined transition from the
/// current state wins. Returns `Ok(None)` when the chain is exhausted with
/// no match (a normal terminal outcome, not an error).
///
/// A `ChainIntegrity` error from the walk means the instance's recorded
/// `last_action_id` is not on its context's chain; that is corruption and
/// must be surfaced, never recovered silently.
pub fn next_turn(
    log: &ActionLog,
    machines: &MachineStore,
    instance: &Instance,
) -> Result<Option<PendingTurn>, CoreError> {
    let pending = log.chain_after(instance.context_id, instance.last_action_id)?;

    for action in pending {
        if let Some(next_state_id) =
            machines.transition(instance.machine_id, instance.state_id, action.event_id)
        {
            return Ok(Some(PendingTurn {
                action_id: action.id,
                next_state_id,
            }));
        }
        // No transition from the current state for this event: skip.
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::definition::MachineSpec;
    use crate::instance::InstanceStore;

    struct Fixture {
        catalog: Catalog,
        log: ActionLog,
        machines: MachineStore,
        instances: InstanceStore,
        machine_id: u64,
        push: u64,
        coin: u64,
        ctx: u64,
    }

    fn turnstile_fixture() -> Fixture {
        let catalog = Catalog::new();
        let push = catalog.register_event("push").unwrap();
        let coin = catalog.register_event("coin").unwrap();
        let ctx = catalog.register_context("turnstileA").unwrap();

        let machines = MachineStore::new();
        let spec = MachineSpec::from_json(&serde_json::json!({
            "name": "turnstile",
            "begin": "locked",
            "state": ["locked", "unlocked"],
            "transition": [
                {"event": "push", "from": "locked", "next": "locked"},
                {"event": "coin", "from": "locked", "next": "unlocked"},
                {"event": "push", "from": "unlocked", "next": "locked"},
                {"event": "coin", "from": "unlocked", "next": "unlocked"}
            ]
        }))
        .unwrap();
        let defined = machines
            .define(&spec, catalog.events(), |_| Ok(()))
            .unwrap();

        Fixture {
            machine_id: defined.machine.id,
            catalog,
            log: ActionLog::new(),
            machines,
            instances: InstanceStore::new(),
            push,
            coin,
            ctx,
        }
    }

    fn commit(f: &Fixture, instance: &mut Instance, turn: &PendingTurn) {
        f.instances
            .with_mut(instance.id, |i| {
                i.advance(turn.action_id, turn.next_state_id, 0);
                Ok(())
            })
            .unwrap();
        *instance = f.instances.get(instance.id).unwrap();
    }

    #[test]
    fn test_idle_when_no_pending_actions() {
        let f = turnstile_fixture();
        let machine = f.machines.machine(f.machine_id).unwrap();
        let instance = f
            .instances
            .create(Some("t"), machine.id, f.ctx, machine.initial_state_id, |_| Ok(()))
            .unwrap();

        let turn = next_turn(&f.log, &f.machines, &instance).unwrap();
        assert!(turn.is_none());

        // Idempotent no-op: instance untouched.
        let after = f.instances.get(instance.id).unwrap();
        assert_eq!(after.last_action_id, instance.last_action_id);
        assert_eq!(after.state_id, instance.state_id);
    }

    #[test]
    fn test_coin_unlocks_then_push_locks() {
        let f = turnstile_fixture();
        let machine = f.machines.machine(f.machine_id).unwrap();
        let locked = f.machines.states().resolve("locked").unwrap();
        let unlocked = f.machines.states().resolve("unlocked").unwrap();
        let mut instance =
            f.instances
                .create(Some("t"), machine.id, f.ctx, machine.initial_state_id, |_| Ok(()))
                .unwrap();

        let a_coin = f.log.append(f.ctx, f.coin, None, |_| Ok(())).unwrap();
        let turn = next_turn(&f.log, &f.machines, &instance).unwrap().unwrap();
        assert_eq!(turn.action_id, a_coin.id);
        assert_eq!(turn.next_state_id, unlocked);
        commit(&f, &mut instance, &turn);

        let a_push = f.log.append(f.ctx, f.push, None, |_| Ok(())).unwrap();
        let turn = next_turn(&f.log, &f.machines, &instance).unwrap().unwrap();
        assert_eq!(turn.action_id, a_push.id);
        assert_eq!(turn.next_state_id, locked);
        commit(&f, &mut instance, &turn);

        assert_eq!(instance.state_id, locked);
        assert_eq!(instance.last_action_id, a_push.id);
    }

    #[test]
    fn test_at_most_one_action_per_cycle() {
        let f = turnstile_fixture();
        let machine = f.machines.machine(f.machine_id).unwrap();
        let mut instance =
            f.instances
                .create(Some("t"), machine.id, f.ctx, machine.initial_state_id, |_| Ok(()))
                .unwrap();

        // Three matching actions pending; one cycle consumes only the first.
        let a1 = f.log.append(f.ctx, f.coin, None, |_| Ok(())).unwrap();
        let a2 = f.log.append(f.ctx, f.push, None, |_| Ok(())).unwrap();
        f.log.append(f.ctx, f.coin, None, |_| Ok(())).unwrap();

        let turn = next_turn(&f.log, &f.machines, &instance).unwrap().unwrap();
        assert_eq!(turn.action_id, a1.id);
        commit(&f, &mut instance, &turn);

        let turn = next_turn(&f.log, &f.machines, &instance).unwrap().unwrap();
        assert_eq!(turn.action_id, a2.id);
    }

    #[test]
    fn test_irrelevant_action_is_skipped() {
        let f = turnstile_fixture();
        let refund = f.catalog.register_event("refund").unwrap();
        let machine = f.machines.machine(f.machine_id).unwrap();
        let unlocked = f.machines.states().resolve("unlocked").unwrap();
        let mut instance =
            f.instances
                .create(Some("t"), machine.id, f.ctx, machine.initial_state_id, |_| Ok(()))
                .unwrap();

        // "refund" has no transition anywhere in the turnstile machine.
        f.log.append(f.ctx, refund, None, |_| Ok(())).unwrap();
        let a_coin = f.log.append(f.ctx, f.coin, None, |_| Ok(())).unwrap();

        let turn = next_turn(&f.log, &f.machines, &instance).unwrap().unwrap();
        assert_eq!(turn.action_id, a_coin.id);
        assert_eq!(turn.next_state_id, unlocked);
        commit(&f, &mut instance, &turn);

        // The skipped action stays unconsumed but is now behind the
        // instance's cursor; the chain is exhausted.
        assert!(next_turn(&f.log, &f.machines, &instance).unwrap().is_none());
    }

    #[test]
    fn test_out_of_context_isolation() {
        let f = turnstile_fixture();
        let other_ctx = f.catalog.register_context("turnstileB").unwrap();
        let machine = f.machines.machine(f.machine_id).unwrap();
        let instance_a =
            f.instances
                .create(Some("a"), machine.id, f.ctx, machine.initial_state_id, |_| Ok(()))
                .unwrap();
        let instance_b =
            f.instances
                .create(Some("b"), machine.id, other_ctx, machine.initial_state_id, |_| Ok(()))
                .unwrap();

        // An action in context A is invisible to the instance bound to B.
        f.log.append(f.ctx, f.coin, None, |_| Ok(())).unwrap();

        assert!(next_turn(&f.log, &f.machines, &instance_a).unwrap().is_some());
        assert!(next_turn(&f.log, &f.machines, &instance_b).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_cursor_is_fatal() {
        let f = turnstile_fixture();
        let other_ctx = f.catalog.register_context("turnstileB").unwrap();
        let machine = f.machines.machine(f.machine_id).unwrap();
        let foreign = f.log.append(other_ctx, f.coin, None, |_| Ok(())).unwrap();

        let instance = f
            .instances
            .create(Some("t"), machine.id, f.ctx, machine.initial_state_id, |_| Ok(()))
            .unwrap();
        f.instances
            .with_mut(instance.id, |i| {
                // Simulate cross-context mis-binding.
                i.last_action_id = foreign.id;
                Ok(())
            })
            .unwrap();
        let instance = f.instances.get(instance.id).unwrap();

        let err = next_turn(&f.log, &f.machines, &instance).unwrap_err();
        assert!(matches!(err, CoreError::ChainIntegrity { .. }));
    }
}
