//! [`ControlLoop`] – the fixed-period driver.
//!
//! Each tick, strictly in this order:
//!
//! 1. read the clamped goal and the output flags (lock held briefly),
//! 2. apply the goal to the simulation,
//! 3. scan contacts with the [`SafetyMonitor`],
//! 4. let the [`ModeArbiter`](reach_kernel::ModeArbiter) decide (lock held
//!    briefly),
//! 5. step the simulation through the [`MotionStepper`] (no lock),
//! 6. offer the joint positions to the [`OutputGate`],
//! 7. publish tick count, bus connectivity, heartbeat and status.
//!
//! Any error from the policy or the simulation ends the loop: the watchdog
//! is tripped, a `LoopFault` event goes out and the simulation is released.
//!
//! # Example
//!
//! ```rust,no_run
//! use reach_hal::{ArmModel, ArmSide, NullBus, ReachingPolicy, SimArm};
//! use reach_runtime::control_loop::{ControlLoop, ControlLoopConfig};
//!
//! let side = ArmSide::Left;
//! let control = ControlLoop::new(
//!     Box::new(SimArm::new(side)),
//!     Box::new(ReachingPolicy::new(ArmModel::new(side))),
//!     Box::new(NullBus),
//!     ControlLoopConfig::default(),
//! )
//! .expect("sim must reset");
//! let handle = control.handle();
//! let worker = control.spawn().expect("thread must spawn");
//! handle.request_stop();
//! let stats = worker.join().expect("loop thread panicked").expect("loop faulted");
//! println!("{} ticks", stats.ticks);
//! ```

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use reach_hal::{ActuatorBus, MotorMap, Policy, Simulation};
use reach_kernel::{SafetyMonitor, SafetyReading, Watchdog};
use reach_middleware::{EventBus, Topic};
use reach_types::{Event, EventPayload, Mode, ReachError, Vec3};
use tracing::{debug, error, info, warn};

use crate::motion_stepper::{MotionStepper, StepKind};
use crate::output_gate::{MIN_SEND_INTERVAL, OutputGate};
use crate::shared::{ControlHandle, OutputFlags};

const SOURCE: &str = "reach-runtime::control_loop";

/// Default control period.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(40);

/// Shortest period the loop will run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(5);

/// Goal used when the simulation has no forward kinematics.
pub const FALLBACK_GOAL: Vec3 = Vec3::new(0.2, 0.0, 0.8);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`ControlLoop`].
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    /// Target tick period; values below [`MIN_PERIOD`] are raised to it.
    pub period: Duration,
    /// Minimum spacing of frames on the actuator bus.
    pub robot_send_interval: Duration,
    /// Initial simulation output enable.
    pub sim_output: bool,
    /// Initial physical output enable.
    pub robot_output: bool,
    pub motor_map: MotorMap,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            robot_send_interval: MIN_SEND_INTERVAL,
            sim_output: true,
            robot_output: false,
            motor_map: MotorMap::g1_arms(),
        }
    }
}

impl ControlLoopConfig {
    pub fn effective_period(&self) -> Duration {
        self.period.max(MIN_PERIOD)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Counters accumulated over the loop's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    /// Ticks that finished after their period ended.
    pub overruns: u64,
    pub policy_steps: u64,
    pub hold_steps: u64,
    pub episode_resets: u64,
    pub robot_sends: u64,
    /// Longest tick body observed.
    pub max_tick: Duration,
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop {
    sim: Box<dyn Simulation>,
    policy: Box<dyn Policy>,
    bus: Box<dyn ActuatorBus>,
    monitor: SafetyMonitor,
    stepper: MotionStepper,
    gate: OutputGate,
    handle: ControlHandle,
    events: Option<EventBus>,
    period: Duration,
    stats: LoopStats,
    /// Contact state of the previous tick; collision alerts fire on the
    /// rising edge only.
    last_collided: bool,
    closed: bool,
}

impl ControlLoop {
    /// Reset the simulation, seed the goal from the current end effector
    /// (or [`FALLBACK_GOAL`]) and build the shared state.
    ///
    /// # Errors
    ///
    /// - [`ReachError::Simulation`] if the first reset fails.
    /// - [`ReachError::Configuration`] for a zero robot send interval.
    pub fn new(
        mut sim: Box<dyn Simulation>,
        policy: Box<dyn Policy>,
        bus: Box<dyn ActuatorBus>,
        config: ControlLoopConfig,
    ) -> Result<Self, ReachError> {
        let period = config.effective_period();
        let stepper = MotionStepper::prime(&mut *sim)?;
        let initial_goal = sim.end_effector().unwrap_or(FALLBACK_GOAL);

        let monitor = SafetyMonitor::new(sim.collision_groups());
        if !monitor.is_enabled() {
            warn!("simulation exposes no collision groups; collision interlock disabled");
        }
        if sim.end_effector().is_none() {
            warn!("simulation exposes no forward kinematics; distance-based hold disabled");
        }

        let outputs = OutputFlags {
            sim_enabled: config.sim_output,
            robot_enabled: config.robot_output,
            bus_connected: bus.connected(),
        };
        let handle = ControlHandle::new(
            initial_goal,
            outputs,
            Watchdog::for_period(Instant::now(), period),
        );
        let gate = OutputGate::new(config.motor_map, config.robot_send_interval)?;

        Ok(Self {
            sim,
            policy,
            bus,
            monitor,
            stepper,
            gate,
            handle,
            events: None,
            period,
            stats: LoopStats::default(),
            last_collided: false,
            closed: false,
        })
    }

    /// Publish status and safety events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn simulation(&self) -> &dyn Simulation {
        &*self.sim
    }

    pub fn stepper(&self) -> &MotionStepper {
        &self.stepper
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run one tick now.
    ///
    /// # Errors
    ///
    /// Any policy or simulation error; the loop must not tick again.
    pub fn tick(&mut self) -> Result<Mode, ReachError> {
        self.tick_at(Instant::now())
    }

    /// Run one tick, evaluating the override window and heartbeat at `now`.
    ///
    /// # Errors
    ///
    /// Any policy or simulation error; the loop must not tick again.
    pub fn tick_at(&mut self, now: Instant) -> Result<Mode, ReachError> {
        let (goal, outputs) = self
            .handle
            .with_state(|s| (s.goal.read_clamped(), s.outputs));
        self.sim.set_goal(goal);

        let contacts = self.sim.contacts();
        let reading = self.monitor.scan(contacts.as_deref());
        let collided = reading.is_collided();
        let distance = self.sim.end_effector().map(|ee| ee.distance(goal));

        let (previous, mode) = self.handle.with_state(|s| {
            let previous = s.arbiter.mode();
            (previous, s.arbiter.decide(now, collided, distance))
        });

        let report = self.stepper.step(
            &mut *self.sim,
            &*self.policy,
            mode,
            outputs.any_active(),
            collided,
            goal,
        )?;

        let connected = self.bus.connected();
        let sent = self.gate.maybe_send(
            outputs.robot_enabled && connected,
            &*self.sim,
            &mut *self.bus,
        );

        let status = self.handle.with_state(|s| {
            s.outputs.bus_connected = connected;
            s.tick += 1;
            s.watchdog.heartbeat(now);
            s.snapshot(now)
        });

        self.stats.ticks += 1;
        match report.kind {
            StepKind::Policy => self.stats.policy_steps += 1,
            StepKind::Hold => self.stats.hold_steps += 1,
        }
        if report.reset.is_some() {
            self.stats.episode_resets += 1;
        }
        if sent {
            self.stats.robot_sends += 1;
        }

        if previous != mode {
            debug!(from = %previous, to = %mode, distance = ?distance, "mode changed");
        }
        let new_contact = collided && !self.last_collided;
        self.last_collided = collided;

        if let Some(events) = &self.events {
            if previous != mode {
                events.publish_to(
                    Topic::SafetyAlerts,
                    Event::new(SOURCE, EventPayload::ModeChanged { from: previous, to: mode }),
                );
            }
            if let (true, SafetyReading::Collided(contact)) = (new_contact, &reading) {
                events.publish_to(
                    Topic::SafetyAlerts,
                    Event::new(
                        SOURCE,
                        EventPayload::CollisionDetected {
                            geom1: contact.geom1,
                            geom2: contact.geom2,
                            penetration: contact.penetration(),
                        },
                    ),
                );
            }
            if let Some(reset) = report.reset {
                events.publish_to(
                    Topic::SafetyAlerts,
                    Event::new(
                        SOURCE,
                        EventPayload::EpisodeReset {
                            restored_safe_pose: reset.restored_safe_pose,
                        },
                    ),
                );
            }
            events.publish_to(Topic::Telemetry, Event::new(SOURCE, EventPayload::Status(status)));
        }

        Ok(mode)
    }

    /// Tick at the configured period until a stop is requested or a tick
    /// fails.  Releases the simulation before returning either way.
    ///
    /// # Errors
    ///
    /// The first policy or simulation error.
    pub fn run(mut self) -> Result<LoopStats, ReachError> {
        info!(period_ms = self.period.as_millis() as u64, "control loop started");
        let mut deadline = Instant::now() + self.period;

        while !self.handle.is_stop_requested() {
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }

            let started = Instant::now();
            if let Err(e) = self.tick_at(started) {
                self.fail(&e);
                return Err(e);
            }
            let finished = Instant::now();
            self.stats.max_tick = self.stats.max_tick.max(finished - started);

            deadline += self.period;
            if finished > deadline {
                self.stats.overruns += 1;
                debug!(
                    overrun_us = (finished - deadline).as_micros() as u64,
                    "tick overran its period"
                );
                deadline = finished;
            }
        }

        self.handle.with_state(|s| s.watchdog.mark_stopped());
        self.shutdown();
        info!(
            ticks = self.stats.ticks,
            overruns = self.stats.overruns,
            resets = self.stats.episode_resets,
            "control loop stopped"
        );
        Ok(self.stats.clone())
    }

    /// Run on a dedicated thread named `control-loop`.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Configuration`] if the thread cannot be spawned.
    pub fn spawn(self) -> Result<JoinHandle<Result<LoopStats, ReachError>>, ReachError> {
        thread::Builder::new()
            .name("control-loop".into())
            .spawn(move || self.run())
            .map_err(|e| ReachError::Configuration(format!("cannot spawn control loop: {e}")))
    }

    /// Release the simulation.  Safe to call more than once.
    pub fn shutdown(&mut self) {
        if !self.closed {
            self.sim.close();
            self.closed = true;
            debug!("simulation released");
        }
    }

    fn fail(&mut self, err: &ReachError) {
        error!(error = %err, "control loop terminated");
        self.handle.with_state(|s| s.watchdog.trip(err.to_string()));
        if let Some(events) = &self.events {
            events.publish_to(
                Topic::SafetyAlerts,
                Event::new(
                    SOURCE,
                    EventPayload::LoopFault {
                        message: err.to_string(),
                    },
                ),
            );
        }
        self.shutdown();
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
