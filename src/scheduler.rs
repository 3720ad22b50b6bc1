//! Fixed-cadence driver for the physics tick.
//!
//! The loop runs as an async-std task. Each iteration races the next tick
//! against a stop signal, so a stop request never waits out a full period.
//! Tick cadence and wall-clock time are injected through [`TickSource`] and
//! [`Clock`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_std::channel::{self, Receiver, Sender};
use async_std::future;
use async_std::prelude::*;
use async_std::stream::{self, Interval};
use async_std::task::{self, JoinHandle};
use async_trait::async_trait;

use crate::simulator::SimShared;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
pub trait TickSource: Send + 'static {
    /// Resolves when the next tick is due. `false` means the source is
    /// exhausted and the loop should exit.
    async fn next_tick(&mut self) -> bool;
}

pub struct IntervalTicks {
    interval: Interval,
}

impl IntervalTicks {
    pub fn new(period: Duration) -> IntervalTicks {
        IntervalTicks { interval: stream::interval(period) }
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn next_tick(&mut self) -> bool {
        self.interval.next().await.is_some()
    }
}

/// Ticks delivered one at a time through a [`TickTrigger`].
pub struct ManualTicks {
    receiver: Receiver<()>,
}

#[derive(Clone)]
pub struct TickTrigger {
    sender: Sender<()>,
}

impl ManualTicks {
    pub fn new() -> (TickTrigger, ManualTicks) {
        let (sender, receiver) = channel::unbounded();
        (TickTrigger { sender }, ManualTicks { receiver })
    }
}

impl TickTrigger {
    pub fn fire(&self) {
        if self.sender.try_send(()).is_err() {
            debug!("Tick dropped, simulation loop is gone");
        }
    }
}

#[async_trait]
impl TickSource for ManualTicks {
    async fn next_tick(&mut self) -> bool {
        self.receiver.recv().await.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    /// Stop returned before the task exited. Only seen when the task is
    /// stuck on a blocking call and misses the stop signal for a full period.
    Stopping,
}

enum Event {
    Tick,
    Stop,
    Exhausted,
}

struct Worker {
    halted: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    stop_signal: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct SimulationLoop {
    shared: Arc<SimShared>,
    period: Duration,
    worker: Option<Worker>,
    lingering: Option<Arc<AtomicBool>>,
}

async fn run<T: TickSource, C: Clock>(
    shared: Arc<SimShared>,
    mut ticks: T,
    clock: C,
    halted: Arc<AtomicBool>,
    stop_signal: Receiver<()>,
    finished: Arc<AtomicBool>,
) {
    info!("Simulation loop started");
    loop {
        let tick = async {
            if ticks.next_tick().await {
                Event::Tick
            } else {
                Event::Exhausted
            }
        };
        let stop = async {
            let _ = stop_signal.recv().await;
            Event::Stop
        };

        match tick.race(stop).await {
            Event::Tick => match shared.tick(clock.now(), &halted) {
                Some(targets) => {
                    if targets.tick % 60 == 0 {
                        debug!["Tick count: {}", targets.tick];
                    }
                }
                None => break,
            },
            Event::Stop => break,
            Event::Exhausted => {
                info!("Tick source exhausted");
                break;
            }
        }
    }
    finished.store(true, Ordering::SeqCst);
    info!("Simulation loop stopped");
}

impl SimulationLoop {
    pub(crate) fn new(shared: Arc<SimShared>, period: Duration) -> SimulationLoop {
        SimulationLoop {
            shared,
            period,
            worker: None,
            lingering: None,
        }
    }

    pub fn state(&self) -> LoopState {
        if let Some(worker) = &self.worker {
            if !worker.finished.load(Ordering::SeqCst) {
                return LoopState::Running;
            }
        }
        match &self.lingering {
            Some(finished) if !finished.load(Ordering::SeqCst) => LoopState::Stopping,
            _ => LoopState::Idle,
        }
    }

    /// Spawns the loop task. Returns `false` if it was already running.
    pub fn start_with<T: TickSource, C: Clock>(&mut self, ticks: T, clock: C) -> bool {
        if self.state() == LoopState::Running {
            debug!("Simulation loop already running");
            return false;
        }

        let halted = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (stop_signal, stop_receiver) = channel::bounded(1);
        let handle = task::spawn(run(
            Arc::clone(&self.shared),
            ticks,
            clock,
            Arc::clone(&halted),
            stop_receiver,
            Arc::clone(&finished),
        ));

        self.worker = Some(Worker {
            halted,
            finished,
            stop_signal,
            handle,
        });
        true
    }

    pub fn start(&mut self) -> bool {
        let ticks = IntervalTicks::new(self.period);
        self.start_with(ticks, SystemClock)
    }

    /// Signals the loop and waits up to one tick period for it to exit.
    /// Once this returns the loop will not publish again, even if the task
    /// itself is still winding down.
    pub fn stop(&mut self) {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return,
        };

        worker.halted.store(true, Ordering::SeqCst);
        worker.stop_signal.close();
        // A tick already in flight holds the dynamics lock; wait it out.
        self.shared.quiesce();

        match task::block_on(future::timeout(self.period, worker.handle)) {
            Ok(()) => self.lingering = None,
            Err(_) => {
                warn!("Simulation loop did not exit within {:?}", self.period);
                self.lingering = Some(worker.finished);
            }
        }
    }
}

impl Drop for SimulationLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new();
        let shared = clock.clone();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        shared.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - t0, Duration::from_millis(250));
    }

    #[test]
    fn manual_ticks_end_when_trigger_dropped() {
        let (trigger, mut ticks) = ManualTicks::new();
        trigger.fire();
        drop(trigger);
        task::block_on(async {
            assert!(ticks.next_tick().await);
            assert!(!ticks.next_tick().await);
        });
    }

    #[test]
    fn interval_ticks_fire() {
        let mut ticks = IntervalTicks::new(Duration::from_millis(5));
        let started = Instant::now();
        task::block_on(async {
            assert!(ticks.next_tick().await);
            assert!(ticks.next_tick().await);
        });
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
