//! Bounded-restart supervision: restart a component on panic/unhandled
//! error up to 5 times in a 60s sliding window, then mark it `unhealthy`
//! and stop restarting until health is explicitly reset.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), SupervisorError>> + Send>>;

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            max_restarts: 5,
            window: Duration::from_secs(60),
        }
    }
}

struct ComponentGuard {
    policy: RestartPolicy,
    restart_times: VecDeque<Instant>,
    unhealthy: bool,
}

impl ComponentGuard {
    fn new(policy: RestartPolicy) -> Self {
        ComponentGuard {
            policy,
            restart_times: VecDeque::new(),
            unhealthy: false,
        }
    }

    /// Record a restart attempt; returns whether it is permitted under the
    /// sliding-window cap. Marks the component `unhealthy` and denies all
    /// further restarts once the cap is exceeded.
    fn try_restart(&mut self) -> bool {
        if self.unhealthy {
            return false;
        }
        let now = Instant::now();
        while self
            .restart_times
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.policy.window)
        {
            self.restart_times.pop_front();
        }
        if self.restart_times.len() as u32 >= self.policy.max_restarts {
            self.unhealthy = true;
            return false;
        }
        self.restart_times.push_back(now);
        true
    }

    fn reset(&mut self) {
        self.restart_times.clear();
        self.unhealthy = false;
    }
}

/// Tracks restart guards for every supervised component and reports
/// whether each is currently healthy.
#[derive(Default)]
pub struct Supervisor {
    guards: HashMap<String, ComponentGuard>,
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor::default()
    }

    pub fn register(&mut self, name: impl Into<String>, policy: RestartPolicy) {
        self.guards.insert(name.into(), ComponentGuard::new(policy));
    }

    pub fn is_unhealthy(&self, name: &str) -> bool {
        self.guards.get(name).is_some_and(|g| g.unhealthy)
    }

    pub fn reset(&mut self, name: &str) {
        if let Some(guard) = self.guards.get_mut(name) {
            guard.reset();
        }
    }

    /// Run `factory` repeatedly: each call produces one attempt at running
    /// the component. An `Ok(())` return (clean shutdown) ends supervision
    /// without counting as a failure. An `Err` counts as a failure against
    /// the restart budget; exceeding it marks the component permanently
    /// unhealthy (until `reset`) and stops restarting.
    pub async fn supervise<F>(&mut self, name: &str, mut factory: F)
    where
        F: FnMut() -> BoxFuture,
    {
        loop {
            let outcome = factory().await;
            match outcome {
                Ok(()) => {
                    info!(component = name, "component exited cleanly, not restarting");
                    return;
                }
                Err(err) => {
                    error!(component = name, error = %err, "component failed");
                    let guard = self
                        .guards
                        .entry(name.to_owned())
                        .or_insert_with(|| ComponentGuard::new(RestartPolicy::default()));
                    if guard.try_restart() {
                        warn!(component = name, "restarting component");
                        continue;
                    }
                    error!(
                        component = name,
                        "restart budget exhausted, marking unhealthy and giving up"
                    );
                    return;
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct SupervisorError(pub String);

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SupervisorError {}
