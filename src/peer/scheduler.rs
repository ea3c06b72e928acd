//! Frame-driven task scheduler
//!
//! Replaces coroutine-style waits. Tasks are re-evaluated once per frame and
//! either fire, time out or get cancelled; nothing ever blocks the frame.

use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Trigger {
    /// Fire once at `at`
    Once { at: f64 },
    /// Fire every `every` seconds starting at `next`
    Repeat { every: f64, next: f64 },
    /// Fire as soon as the condition holds, or time out at `deadline`
    Until { deadline: f64 },
}

#[derive(Debug, Clone)]
struct Task<K> {
    key: K,
    trigger: Trigger,
}

/// What happened to a task this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired<K> {
    /// Time reached or condition met
    Due(K),
    /// A wait gave up
    TimedOut(K),
}

/// Per-peer task list keyed by `K`. Scheduling a key that already exists
/// replaces the old task.
#[derive(Debug, Clone)]
pub struct FrameScheduler<K> {
    tasks: Vec<Task<K>>,
}

impl<K> Default for FrameScheduler<K> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<K: Copy + PartialEq + Debug> FrameScheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run once, `delay` seconds from `now`
    pub fn after(&mut self, key: K, now: f64, delay: f32) {
        self.insert(
            key,
            Trigger::Once {
                at: now + delay.max(0.0) as f64,
            },
        );
    }

    /// Run every `interval` seconds, first time one interval from `now`
    pub fn every(&mut self, key: K, now: f64, interval: f32) {
        let every = (interval as f64).max(1e-3);
        self.insert(
            key,
            Trigger::Repeat {
                every,
                next: now + every,
            },
        );
    }

    /// Wait for a condition checked in [`FrameScheduler::poll`], for at most `timeout`
    pub fn wait(&mut self, key: K, now: f64, timeout: f32) {
        self.insert(
            key,
            Trigger::Until {
                deadline: now + timeout.max(0.0) as f64,
            },
        );
    }

    fn insert(&mut self, key: K, trigger: Trigger) {
        self.cancel(key);
        self.tasks.push(Task { key, trigger });
    }

    /// Remove a task. Returns false if it was not scheduled.
    pub fn cancel(&mut self, key: K) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.key != key);
        self.tasks.len() != before
    }

    pub fn is_scheduled(&self, key: K) -> bool {
        self.tasks.iter().any(|t| t.key == key)
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Advance to `now`. `ready` is asked about every pending wait.
    pub fn poll(&mut self, now: f64, mut ready: impl FnMut(K) -> bool) -> Vec<Fired<K>> {
        let mut fired = Vec::new();
        self.tasks.retain_mut(|task| match &mut task.trigger {
            Trigger::Once { at } => {
                if now >= *at {
                    fired.push(Fired::Due(task.key));
                    false
                } else {
                    true
                }
            }
            Trigger::Repeat { every, next } => {
                if now >= *next {
                    fired.push(Fired::Due(task.key));
                    *next += *every;
                    if *next <= now {
                        // Fell behind: skip the missed runs
                        *next = now + *every;
                    }
                }
                true
            }
            Trigger::Until { deadline } => {
                if ready(task.key) {
                    fired.push(Fired::Due(task.key));
                    false
                } else if now >= *deadline {
                    fired.push(Fired::TimedOut(task.key));
                    false
                } else {
                    true
                }
            }
        });
        fired
    }
}
