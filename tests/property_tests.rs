//! Property-based tests for clocks, timer tracking, recomputation and the gate.
//!
//! These tests use proptest to verify properties hold across
//! many randomly generated inputs.

use chrono::{TimeZone, Utc};
use diachronic::chart::{
    ActiveNode, Chart, ChartBuilder, MachineSnapshot, NodeBuilder, Tag, TransitionBuilder,
};
use diachronic::clock::{Clock, VirtualClock};
use diachronic::continuation::recompute;
use diachronic::core::{Event, StateHistory, StateTransition, StateValue};
use diachronic::gate;
use diachronic::interpreter::{TimerDataEntry, TimerTrackingInterpreter};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

prop_compose! {
    fn arbitrary_key()(key in "[a-z]{1,8}") -> String {
        key
    }
}

prop_compose! {
    fn arbitrary_node()(
        key in arbitrary_key(),
        no_migrate in any::<bool>(),
        can_interrupt in any::<bool>(),
        invoking in any::<bool>(),
    ) -> ActiveNode {
        let mut tags = BTreeSet::new();
        if no_migrate {
            tags.insert(Tag::NoMigrate);
        }
        if can_interrupt {
            tags.insert(Tag::CanInterrupt);
        }
        ActiveNode { state_id: format!("m.{key}"), tags, invoking }
    }
}

fn timer(start_ms: i64, delay: u64) -> TimerDataEntry {
    TimerDataEntry {
        id: "after(wait)#m.a".to_string(),
        start: Utc.timestamp_millis_opt(start_ms).unwrap(),
        delay,
        delay_function_name: "wait".to_string(),
        state_id: "m.a".to_string(),
        event: Event::new("go"),
    }
}

fn pipeline() -> Arc<Chart<u32>> {
    Arc::new(
        ChartBuilder::new("pipeline")
            .context(0u32)
            .initial("idle")
            .state(
                NodeBuilder::new("idle")
                    .on("go", TransitionBuilder::to("busy"))
                    .after_ms(500, TransitionBuilder::to("busy")),
            )
            .state(
                NodeBuilder::new("busy")
                    .initial("fetching")
                    .after("patience", TransitionBuilder::to("idle"))
                    .on("stop", TransitionBuilder::to("idle"))
                    .state(
                        NodeBuilder::new("fetching")
                            .after_ms(200, TransitionBuilder::to("saving"))
                            .on("next", TransitionBuilder::to("saving")),
                    )
                    .state(
                        NodeBuilder::new("saving")
                            .after_ms(300, TransitionBuilder::to("fetching")),
                    ),
            )
            .on("bump", TransitionBuilder::internal().assign(|n: &u32, _| n + 1))
            .delay("patience", |n: &u32, _| 1_000 + u64::from(*n) * 100)
            .build()
            .unwrap(),
    )
}

#[derive(Clone, Debug)]
enum Action {
    Send(&'static str),
    Advance(u64),
}

fn arbitrary_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        prop::sample::select(vec!["go", "stop", "next", "bump"]).prop_map(Action::Send),
        (0u64..1_500).prop_map(Action::Advance),
    ]
}

proptest! {
    #[test]
    fn timer_table_matches_armed_timers(
        actions in prop::collection::vec(arbitrary_action(), 0..40),
    ) {
        let chart = pipeline();
        let clock = VirtualClock::default();
        let mut interpreter =
            TimerTrackingInterpreter::new(Arc::clone(&chart), Arc::new(clock.clone()));
        interpreter
            .start(vec!["idle".to_string()], 0, &Event::init(), HashMap::new())
            .unwrap();

        for action in actions {
            match action {
                Action::Send(event) => {
                    let _ = interpreter.send(&Event::new(event));
                }
                Action::Advance(ms) => clock.advance(Duration::from_millis(ms)),
            }
            while let Some(fired) = interpreter.try_next_fired() {
                let _ = interpreter.handle_fired(&fired);
            }

            let leaf = chart.resolve(&interpreter.state_value()).unwrap();
            let reachable: BTreeSet<String> =
                chart.reachable_delays(&leaf).iter().map(|d| d.to_string()).collect();
            let tracked: BTreeSet<String> = interpreter.timers().keys().cloned().collect();
            prop_assert_eq!(&tracked, &reachable);
            prop_assert_eq!(clock.pending(), tracked.len());
            for (id, entry) in interpreter.timers() {
                prop_assert_eq!(&entry.id, id);
            }
        }
    }

    #[test]
    fn bounded_history_keeps_the_newest_tail(
        states in prop::collection::vec(arbitrary_key(), 1..40),
        limit in 1usize..10,
    ) {
        let mut history = StateHistory::bounded(limit);
        for to in &states {
            history.push(StateTransition {
                from: StateValue::from("start"),
                to: StateValue::from(to.as_str()),
                event: "next".to_string(),
                timestamp: Utc::now(),
            });
        }

        prop_assert_eq!(history.transitions().len(), states.len().min(limit));
        let newest = history.transitions().back().map(|t| t.to.clone());
        prop_assert_eq!(newest, states.last().map(|s| StateValue::from(s.as_str())));
    }

    #[test]
    fn virtual_clock_fires_in_due_order(delays in prop::collection::vec(0u64..1_000, 1..20)) {
        let clock = VirtualClock::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (seq, delay) in delays.iter().enumerate() {
            let log = Arc::clone(&log);
            let delay = *delay;
            clock.set_timer(
                Box::new(move || log.lock().unwrap().push((delay, seq))),
                Duration::from_millis(delay),
            );
        }

        clock.advance(Duration::from_millis(1_000));

        let fired = log.lock().unwrap().clone();
        let mut expected = fired.clone();
        expected.sort();
        prop_assert_eq!(fired.len(), delays.len());
        prop_assert_eq!(fired, expected);
        prop_assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn virtual_clock_never_fires_early(
        delays in prop::collection::vec(1u64..1_000, 1..20),
        step in 0u64..1_000,
    ) {
        let clock = VirtualClock::default();
        let fired = Arc::new(Mutex::new(0usize));
        for delay in &delays {
            let fired = Arc::clone(&fired);
            clock.set_timer(
                Box::new(move || *fired.lock().unwrap() += 1),
                Duration::from_millis(*delay),
            );
        }

        clock.advance(Duration::from_millis(step));

        let due = delays.iter().filter(|delay| **delay <= step).count();
        prop_assert_eq!(*fired.lock().unwrap(), due);
        prop_assert_eq!(clock.pending(), delays.len() - due);
    }

    #[test]
    fn unchanged_delay_preserves_time_left(
        start in 0i64..1_000_000,
        delay in 2u64..10_000_000,
        elapsed_ratio in 0.0f64..1.0,
    ) {
        let entry = timer(start, delay);
        let elapsed = ((delay - 1) as f64 * elapsed_ratio) as i64;
        let now = Utc.timestamp_millis_opt(start + elapsed).unwrap();

        let plan = recompute(&entry, now, delay, 1);
        prop_assert_eq!(Duration::from_millis(plan.fire_in_ms), entry.time_left(now));
        prop_assert_eq!(plan.start, entry.start);
    }

    #[test]
    fn changed_delay_counts_from_original_start(
        start in 0i64..1_000_000,
        old_delay in 0u64..1_000_000,
        new_delay in 0u64..1_000_000,
        elapsed in 0i64..2_000_000,
        min_fire_in_ms in 1u64..50,
    ) {
        let entry = timer(start, old_delay);
        let now = Utc.timestamp_millis_opt(start + elapsed).unwrap();

        let plan = recompute(&entry, now, new_delay, min_fire_in_ms);
        let expected = (new_delay as i64 - elapsed).max(0) as u64;
        prop_assert_eq!(plan.fire_in_ms, expected.max(min_fire_in_ms));
        prop_assert_eq!(plan.delay_ms, new_delay);
        prop_assert!(plan.fire_in_ms >= min_fire_in_ms);
    }

    #[test]
    fn gate_matches_the_safe_point_rule(active in prop::collection::vec(arbitrary_node(), 0..6)) {
        let no_migrate = active.iter().any(|n| n.tags.contains(&Tag::NoMigrate));
        let all_interruptible = active
            .iter()
            .filter(|n| n.invoking)
            .all(|n| n.tags.contains(&Tag::CanInterrupt));
        let snapshot = MachineSnapshot {
            value: StateValue::from("a"),
            context: (),
            active,
            done: false,
        };

        prop_assert_eq!(gate::can_migrate(&snapshot), !no_migrate && all_interruptible);
    }

    #[test]
    fn gate_is_deterministic(active in prop::collection::vec(arbitrary_node(), 0..6)) {
        let snapshot = MachineSnapshot {
            value: StateValue::from("a"),
            context: (),
            active,
            done: false,
        };
        prop_assert_eq!(gate::can_migrate(&snapshot), gate::can_migrate(&snapshot));
    }

    #[test]
    fn state_value_paths_are_recovered(path in prop::collection::vec(arbitrary_key(), 1..5)) {
        let value = StateValue::from_path(&path).unwrap();
        prop_assert_eq!(value.leaf_paths(), vec![path.clone()]);
        prop_assert!(value.matches(&path.join(".")));
        prop_assert!(value.matches(&path[0]));
    }

    #[test]
    fn history_preserves_order(states in prop::collection::vec(arbitrary_key(), 1..10)) {
        let mut history = StateHistory::new();
        let mut expected_path = vec![StateValue::from("start")];

        for (i, to) in states.iter().enumerate() {
            let from = if i == 0 { "start" } else { states[i - 1].as_str() };
            history = history.record(StateTransition {
                from: StateValue::from(from),
                to: StateValue::from(to.as_str()),
                event: "next".to_string(),
                timestamp: Utc::now(),
            });
            expected_path.push(StateValue::from(to.as_str()));
        }

        let path = history.get_path();
        prop_assert_eq!(path.len(), expected_path.len());
        for (i, state) in path.iter().enumerate() {
            prop_assert_eq!(*state, &expected_path[i]);
        }
    }

    #[test]
    fn history_record_is_pure(from in arbitrary_key(), to in arbitrary_key()) {
        let history = StateHistory::new();
        let new_history = history.record(StateTransition {
            from: StateValue::from(from.as_str()),
            to: StateValue::from(to.as_str()),
            event: "next".to_string(),
            timestamp: Utc::now(),
        });

        // Original history unchanged
        prop_assert_eq!(history.transitions().len(), 0);
        prop_assert_eq!(new_history.transitions().len(), 1);
    }
}
