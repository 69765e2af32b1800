//! Re-arming carried-over timers against a new chart.

use crate::chart::{Chart, RestoredDelay};
use crate::interpreter::{add_millis, TimerData, TimerDataEntry};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Arming plan for a timer whose delay is now `new_delay` ms.
///
/// The delay stays anchored at the entry's original start, so an unchanged
/// delay preserves the remaining wait exactly. Timers already due fire
/// after `min_fire_in_ms`, which is never taken below 1 ms.
pub fn recompute(
    entry: &TimerDataEntry,
    now: DateTime<Utc>,
    new_delay: u64,
    min_fire_in_ms: u64,
) -> RestoredDelay {
    let fire_at = add_millis(entry.start, new_delay);
    let remaining = u64::try_from((fire_at - now).num_milliseconds()).unwrap_or(0);
    RestoredDelay {
        start: entry.start,
        delay_ms: new_delay,
        fire_in_ms: remaining.max(min_fire_in_ms.max(1)),
        event: entry.event.clone(),
    }
}

/// Outcome of matching carried-over timers to a resolved configuration.
#[derive(Debug, Default, PartialEq)]
pub struct Reconciled {
    /// Plans for timers that carry over, keyed by timer id
    pub restored: HashMap<String, RestoredDelay>,
    /// Ids of carried-over timers that were dropped
    pub dropped: Vec<String>,
}

/// Match `timers` against the delays reachable from `leaf`.
///
/// Reachable timers whose delay still has an implementation are restored
/// via [`recompute`]; the rest are dropped. Reachable delays with no
/// carried-over timer are left out, so the executor arms them fresh.
pub fn reconcile<C>(
    chart: &Chart<C>,
    leaf: &[String],
    context: &C,
    timers: &TimerData,
    now: DateTime<Utc>,
    min_fire_in_ms: u64,
) -> Reconciled {
    let mut reconciled = Reconciled::default();
    let reachable = chart.reachable_delays(leaf);

    for delay in &reachable {
        let id = delay.to_string();
        let Some(entry) = timers.get(&id) else {
            debug!(timer_id = %id, "No carried-over timer, arming fresh");
            continue;
        };
        match chart.evaluate_delay(&delay.delay_name, context, &entry.event) {
            Some(new_delay) => {
                let plan = recompute(entry, now, new_delay, min_fire_in_ms);
                debug!(
                    timer_id = %id,
                    previous_delay = entry.delay,
                    new_delay,
                    fire_in_ms = plan.fire_in_ms,
                    "Restoring timer"
                );
                reconciled.restored.insert(id, plan);
            }
            None => {
                warn!(
                    timer_id = %id,
                    delay = %delay.delay_name,
                    "Timer lost: delay no longer implemented"
                );
                reconciled.dropped.push(id);
            }
        }
    }

    for id in timers.keys() {
        if !reachable.iter().any(|delay| delay.to_string() == *id) {
            warn!(timer_id = %id, "Timer lost: not reachable from the resumed state");
            reconciled.dropped.push(id.clone());
        }
    }
    reconciled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartBuilder, NodeBuilder, TransitionBuilder};
    use crate::core::Event;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn entry(id: &str, start_ms: i64, delay: u64) -> TimerDataEntry {
        let parsed: crate::chart::DelayId = id.parse().unwrap();
        TimerDataEntry {
            id: id.to_string(),
            start: at(start_ms),
            delay,
            delay_function_name: parsed.delay_name,
            state_id: parsed.state_id,
            event: Event::new("hey"),
        }
    }

    #[test]
    fn unchanged_delay_preserves_remaining_time() {
        let timer = entry("after(wait)#m.a", 1_000, 100_000);
        let plan = recompute(&timer, at(31_000), 100_000, 1);

        assert_eq!(plan.fire_in_ms, 70_000);
        assert_eq!(plan.start, at(1_000));
        assert_eq!(plan.delay_ms, 100_000);
        assert_eq!(plan.event, Event::new("hey"));
    }

    #[test]
    fn changed_delay_counts_from_the_original_start() {
        let timer = entry("after(wait)#m.a", 1_000, 100_000);

        let longer = recompute(&timer, at(31_000), 200_000, 1);
        assert_eq!(longer.fire_in_ms, 170_000);
        assert_eq!(longer.delay_ms, 200_000);

        let shorter = recompute(&timer, at(31_000), 50_000, 1);
        assert_eq!(shorter.fire_in_ms, 20_000);
    }

    #[test]
    fn overdue_timers_fire_after_the_minimum() {
        let timer = entry("after(wait)#m.a", 0, 10);
        assert_eq!(recompute(&timer, at(5_000), 10, 1).fire_in_ms, 1);
        assert_eq!(recompute(&timer, at(5_000), 10, 25).fire_in_ms, 25);
    }

    #[test]
    fn zero_minimum_still_waits_one_millisecond() {
        let timer = entry("after(wait)#m.a", 0, 10);
        assert_eq!(recompute(&timer, at(10), 10, 0).fire_in_ms, 1);
        assert_eq!(recompute(&timer, at(5_000), 10, 0).fire_in_ms, 1);
    }

    fn chart() -> Chart<u64> {
        ChartBuilder::new("m")
            .context(7)
            .initial("a")
            .state(
                NodeBuilder::new("a")
                    .after("wait", TransitionBuilder::to("b"))
                    .after("gone", TransitionBuilder::to("b"))
                    .after("fresh", TransitionBuilder::to("b")),
            )
            .state(NodeBuilder::new("b").after_ms(500, TransitionBuilder::to("a")))
            .delay("wait", |n: &u64, _| *n * 1_000)
            .delay("fresh", |_, _| 42)
            .build()
            .unwrap()
    }

    #[test]
    fn reconcile_restores_drops_and_leaves_fresh_delays() {
        let chart = chart();
        let mut timers = TimerData::new();
        for timer in [
            entry("after(wait)#m.a", 0, 7_000),
            entry("after(gone)#m.a", 0, 10),
            entry("after(500)#m.b", 0, 500),
        ] {
            timers.insert(timer.id.clone(), timer);
        }

        let reconciled = reconcile(&chart, &["a".to_string()], &7, &timers, at(2_000), 1);

        let wait = &reconciled.restored["after(wait)#m.a"];
        assert_eq!(wait.fire_in_ms, 5_000);
        assert_eq!(reconciled.restored.len(), 1);
        assert!(!reconciled.restored.contains_key("after(fresh)#m.a"));

        let mut dropped = reconciled.dropped.clone();
        dropped.sort();
        assert_eq!(dropped, vec!["after(500)#m.b".to_string(), "after(gone)#m.a".to_string()]);
    }

    #[test]
    fn reconcile_uses_the_current_context() {
        let chart = chart();
        let mut timers = TimerData::new();
        let timer = entry("after(wait)#m.a", 0, 7_000);
        timers.insert(timer.id.clone(), timer);

        let reconciled = reconcile(&chart, &["a".to_string()], &9, &timers, at(2_000), 1);
        let wait = &reconciled.restored["after(wait)#m.a"];
        assert_eq!(wait.delay_ms, 9_000);
        assert_eq!(wait.fire_in_ms, 7_000);
    }
}
