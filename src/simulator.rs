use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::SimConfig;
use crate::controls::{clamp_fraction, clamp_steering, ControlInputs, Gear};
use crate::error::{SimError, SimResult};
use crate::physics::dynamics::{DriveInput, VehicleDynamics, VehicleState};
use crate::physics::safety::{SafetyFlags, SafetyPipeline, SafetySystem};
use crate::scheduler::{Clock, LoopState, SimulationLoop, TickSource};

/// The only values handed to the presentation side. Always replaced as a
/// whole, so readers never see speed and rpm from different ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PublishedTargets {
    pub target_speed: f32,
    pub target_rpm: f32,
    pub odometer: f64,
    /// Tick that produced this snapshot; 0 before the first tick.
    pub tick: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lock order is dynamics, controls, safety, published.
pub(crate) struct SimShared {
    config: SimConfig,
    dynamics: Mutex<VehicleDynamics>,
    controls: Mutex<ControlInputs>,
    safety: Mutex<SafetyPipeline>,
    published: Mutex<PublishedTargets>,
}

impl SimShared {
    fn new(config: SimConfig) -> SimShared {
        SimShared {
            dynamics: Mutex::new(VehicleDynamics::new(&config)),
            controls: Mutex::new(ControlInputs::default()),
            safety: Mutex::new(SafetyPipeline::new(&config)),
            published: Mutex::new(PublishedTargets::default()),
            config,
        }
    }

    /// Advances the vehicle one tick and publishes the result. Does nothing
    /// once `halted` is set.
    pub(crate) fn tick(&self, now: Instant, halted: &AtomicBool) -> Option<PublishedTargets> {
        let mut dynamics = lock(&self.dynamics);
        if halted.load(Ordering::SeqCst) {
            return None;
        }

        let controls = *lock(&self.controls);
        let safety = *lock(&self.safety);

        let target_rpm = if !controls.engine_on {
            dynamics.coast_engine_off()
        } else if !controls.simulation_running {
            dynamics.coast()
        } else {
            let speed = dynamics.state().speed();
            let pedals = safety.filter_pedals(controls.throttle, controls.brake, controls.steering_angle, speed);
            let rpm = dynamics.drive(DriveInput {
                throttle: pedals.throttle,
                brake: pedals.brake,
                clutch: controls.clutch,
                gear: controls.gear,
            });
            let limited = safety.apply_speed_limiter(dynamics.state().velocity);
            dynamics.set_velocity(limited);
            rpm
        };
        dynamics.update_odometer(now);

        let state = dynamics.state();
        let mut published = lock(&self.published);
        *published = PublishedTargets {
            target_speed: state.speed(),
            target_rpm,
            odometer: state.odometer,
            tick: published.tick + 1,
        };
        Some(*published)
    }

    /// Returns once no tick is in progress.
    pub(crate) fn quiesce(&self) {
        drop(lock(&self.dynamics));
    }

    fn reset(&self) {
        let mut dynamics = lock(&self.dynamics);
        let mut controls = lock(&self.controls);
        let mut safety = lock(&self.safety);
        let mut published = lock(&self.published);

        dynamics.reset();
        *controls = ControlInputs::default();
        safety.flags = SafetyFlags::default();
        *published = PublishedTargets::default();
    }
}

/// Cheap, cloneable access to a running simulator from either the input side
/// or the render side.
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<SimShared>,
}

impl SimHandle {
    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    fn update_controls<R>(&self, f: impl FnOnce(&mut ControlInputs) -> R) -> R {
        let mut controls = lock(&self.shared.controls);
        f(&mut *controls)
    }

    pub fn set_throttle(&self, fraction: f32) {
        self.update_controls(|c| c.throttle = clamp_fraction(fraction));
    }

    pub fn set_brake(&self, fraction: f32) {
        self.update_controls(|c| c.brake = clamp_fraction(fraction));
    }

    pub fn set_clutch(&self, fraction: f32) {
        self.update_controls(|c| c.clutch = clamp_fraction(fraction));
    }

    pub fn set_steering_angle(&self, degrees: f32) {
        self.update_controls(|c| c.steering_angle = clamp_steering(degrees));
    }

    pub fn set_gear(&self, gear: Gear) -> SimResult<()> {
        let gear = gear.validated()?;
        self.update_controls(|c| c.gear = gear);
        Ok(())
    }

    /// Switching the engine off also ends the drive simulation.
    pub fn set_engine_on(&self, on: bool) -> bool {
        self.update_controls(|c| {
            if c.engine_on != on {
                info!("Engine {}", if on { "on" } else { "off" });
            }
            c.engine_on = on;
            if !on {
                c.simulation_running = false;
            }
        });
        on
    }

    /// Refused while the engine is off. Returns the resulting flag.
    pub fn set_simulation_running(&self, running: bool) -> bool {
        self.update_controls(|c| {
            if running && !c.engine_on {
                warn!("Start the engine before running the simulation");
                return false;
            }
            if c.simulation_running != running {
                info!("Simulation {}", if running { "on" } else { "off" });
            }
            c.simulation_running = running;
            running
        })
    }

    pub fn toggle(&self, system: SafetySystem) -> bool {
        lock(&self.shared.safety).flags.toggle(system)
    }

    pub fn toggle_abs(&self) -> bool {
        self.toggle(SafetySystem::Abs)
    }

    pub fn toggle_esp(&self) -> bool {
        self.toggle(SafetySystem::Esp)
    }

    pub fn toggle_acc(&self) -> bool {
        self.toggle(SafetySystem::Acc)
    }

    pub fn toggle_ods(&self) -> bool {
        self.toggle(SafetySystem::Ods)
    }

    pub fn toggle_spd(&self) -> bool {
        self.toggle(SafetySystem::Spd)
    }

    pub fn targets(&self) -> PublishedTargets {
        *lock(&self.shared.published)
    }

    pub fn target_speed(&self) -> f32 {
        self.targets().target_speed
    }

    pub fn target_rpm(&self) -> f32 {
        self.targets().target_rpm
    }

    pub fn odometer(&self) -> f64 {
        self.targets().odometer
    }

    pub fn safety_flags(&self) -> SafetyFlags {
        lock(&self.shared.safety).flags
    }

    pub fn is_enabled(&self, system: SafetySystem) -> bool {
        self.safety_flags().get(system)
    }

    pub fn controls(&self) -> ControlInputs {
        *lock(&self.shared.controls)
    }

    pub fn engine_on(&self) -> bool {
        self.controls().engine_on
    }

    pub fn simulation_running(&self) -> bool {
        self.controls().simulation_running
    }

    /// Diagnostic view of the dynamics state. Waits for an in-flight tick.
    pub fn vehicle_state(&self) -> VehicleState {
        lock(&self.shared.dynamics).state()
    }
}

/// Owns the simulation state and the loop that advances it.
pub struct Simulator {
    handle: SimHandle,
    sim_loop: SimulationLoop,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Result<Simulator, SimError> {
        config.validate()?;
        let period = config.tick_period;
        let shared = Arc::new(SimShared::new(config));
        Ok(Simulator {
            sim_loop: SimulationLoop::new(Arc::clone(&shared), period),
            handle: SimHandle { shared },
        })
    }

    pub fn handle(&self) -> &SimHandle {
        &self.handle
    }

    /// Starts ticking at the configured period. No-op if already running.
    pub fn start(&mut self) -> bool {
        self.sim_loop.start()
    }

    pub fn start_with<T: TickSource, C: Clock>(&mut self, ticks: T, clock: C) -> bool {
        self.sim_loop.start_with(ticks, clock)
    }

    /// Blocks for at most one tick period.
    pub fn stop(&mut self) {
        self.sim_loop.stop();
    }

    pub fn loop_state(&self) -> LoopState {
        self.sim_loop.state()
    }

    pub fn is_loop_running(&self) -> bool {
        self.loop_state() == LoopState::Running
    }

    /// Stands in for the loop: runs one tick on the caller's thread. Refused
    /// unless the loop is idle.
    #[cfg(test)]
    pub(crate) fn step(&self, now: Instant) -> Option<PublishedTargets> {
        if self.loop_state() != LoopState::Idle {
            return None;
        }
        let never = AtomicBool::new(false);
        self.handle.shared.tick(now, &never)
    }

    /// Stops the loop, switches the engine off and zeroes every value.
    pub fn reset(&mut self) {
        self.sim_loop.stop();
        self.handle.shared.reset();
        info!("Simulator reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ManualClock, ManualTicks};
    use std::time::Duration;

    fn running_simulator() -> Simulator {
        let sim = Simulator::new(SimConfig::default()).unwrap();
        sim.handle().set_engine_on(true);
        assert!(sim.handle().set_simulation_running(true));
        sim
    }

    #[test]
    fn simulation_needs_the_engine() {
        let sim = Simulator::new(SimConfig::default()).unwrap();
        assert!(!sim.handle().set_simulation_running(true));
        assert!(!sim.handle().simulation_running());

        sim.handle().set_engine_on(true);
        assert!(sim.handle().set_simulation_running(true));
        sim.handle().set_engine_on(false);
        assert!(!sim.handle().simulation_running());
    }

    #[test]
    fn inputs_are_clamped_not_rejected() {
        let sim = Simulator::new(SimConfig::default()).unwrap();
        let h = sim.handle();
        h.set_throttle(4.0);
        h.set_brake(-1.0);
        h.set_clutch(0.25);
        h.set_steering_angle(720.0);
        let c = h.controls();
        assert_eq!((c.throttle, c.brake, c.clutch, c.steering_angle), (1.0, 0.0, 0.25, 550.0));
    }

    #[test]
    fn undefined_gear_is_rejected_and_ignored() {
        let sim = Simulator::new(SimConfig::default()).unwrap();
        sim.handle().set_gear(Gear::Reverse).unwrap();
        assert!(matches!(sim.handle().set_gear(Gear::Forward(7)), Err(SimError::InvalidInput(_))));
        assert_eq!(sim.handle().controls().gear, Gear::Reverse);
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = SimConfig { abs_max_brake: 2.0, ..SimConfig::default() };
        assert!(Simulator::new(config).is_err());
    }

    #[test]
    fn toggles_report_new_state() {
        let sim = Simulator::new(SimConfig::default()).unwrap();
        let h = sim.handle();
        assert!(h.toggle_abs());
        assert!(h.toggle_spd());
        assert!(!h.toggle_abs());
        assert!(h.is_enabled(SafetySystem::Spd));
        assert_eq!(h.safety_flags(), SafetyFlags { spd: true, ..SafetyFlags::default() });
    }

    #[test]
    fn engine_off_zeroes_rpm_in_one_tick() {
        let sim = running_simulator();
        let t0 = Instant::now();
        sim.handle().set_throttle(1.0);
        for i in 0..20 {
            sim.step(t0 + Duration::from_millis(50 * i));
        }
        assert!(sim.handle().target_rpm() > 0.0);

        sim.handle().set_engine_on(false);
        let targets = sim.step(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(targets.target_rpm, 0.0);
    }

    #[test]
    fn paused_simulation_idles_and_rolls_out() {
        let sim = running_simulator();
        let t0 = Instant::now();
        sim.handle().set_throttle(1.0);
        for i in 0..10 {
            sim.step(t0 + Duration::from_millis(50 * i));
        }
        let moving = sim.handle().target_speed();
        sim.handle().set_simulation_running(false);
        let targets = sim.step(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(targets.target_rpm, 800.0);
        assert!(targets.target_speed < moving);
    }

    #[test]
    fn clutch_in_forces_zero_acceleration() {
        let sim = running_simulator();
        let h = sim.handle();
        h.set_throttle(1.0);
        h.set_clutch(0.7);
        sim.step(Instant::now());
        assert_eq!(h.vehicle_state().acceleration, 0.0);
        assert_eq!(h.target_speed(), 0.0);
    }

    #[test]
    fn abs_limits_braking_force() {
        let sim = running_simulator();
        let h = sim.handle();
        let t0 = Instant::now();
        h.set_throttle(1.0);
        for i in 0..30 {
            sim.step(t0 + Duration::from_millis(50 * i));
        }
        let before = h.target_speed();
        h.set_throttle(0.0);
        h.set_brake(1.0);
        h.toggle_abs();
        let after = sim.step(t0 + Duration::from_secs(2)).unwrap().target_speed;
        assert!((before - after - 0.6 * 8.0).abs() < 1e-3, "{} -> {}", before, after);
    }

    #[test]
    fn speed_limiter_caps_published_speed() {
        let sim = running_simulator();
        let h = sim.handle();
        h.toggle_spd();
        h.set_throttle(1.0);
        let t0 = Instant::now();
        for i in 0..200 {
            let targets = sim.step(t0 + Duration::from_millis(50 * i)).unwrap();
            assert!(targets.target_speed <= 120.0);
        }
        assert_eq!(h.target_speed(), 120.0);
    }

    #[test]
    fn tick_sequence_advances() {
        let sim = running_simulator();
        let t0 = Instant::now();
        assert_eq!(sim.step(t0).unwrap().tick, 1);
        assert_eq!(sim.step(t0).unwrap().tick, 2);
    }

    #[test]
    fn manual_step_is_refused_while_the_loop_runs() {
        let mut sim = running_simulator();
        let (_trigger, ticks) = ManualTicks::new();
        assert!(sim.start_with(ticks, ManualClock::new()));
        sim.handle().set_throttle(1.0);

        assert_eq!(sim.step(Instant::now()), None);
        assert_eq!(sim.handle().targets(), PublishedTargets::default());

        sim.stop();
        assert_eq!(sim.step(Instant::now()).map(|t| t.tick), Some(1));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut sim = running_simulator();
        let h = sim.handle().clone();
        h.set_throttle(0.8);
        h.set_gear(Gear::Forward(2)).unwrap();
        h.toggle_esp();
        let t0 = Instant::now();
        for i in 0..10 {
            sim.step(t0 + Duration::from_millis(50 * i));
        }

        sim.reset();
        let first = (h.targets(), h.controls(), h.safety_flags(), h.vehicle_state());
        sim.reset();
        let second = (h.targets(), h.controls(), h.safety_flags(), h.vehicle_state());

        assert_eq!(first, second);
        assert_eq!(first.0, PublishedTargets::default());
        assert_eq!(first.1, ControlInputs::default());
        assert!(!first.1.engine_on);
        assert_eq!(first.2, SafetyFlags::default());
        assert_eq!(first.3, VehicleState::default());
    }
}
