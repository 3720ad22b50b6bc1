#[macro_use] extern crate log;
extern crate env_logger;

use std::time::{Duration, Instant};

use async_std::prelude::*;
use async_std::stream;
use async_std::task;

use dashsim::dashboard::{Dashboard, Drawable, Overlay, StateUpdater};
use dashsim::{Gear, SimConfig, SimHandle, Simulator};

const SHIFT_UP_RPM: f32 = 3000.0;
const PHASE_LIMIT: Duration = Duration::from_secs(30);

/// Scripted driver standing in for the dashboard controls.
pub struct TestDrive {
    controls: SimHandle,
    tick: Duration,
}

impl TestDrive {
    pub fn new(controls: SimHandle) -> TestDrive {
        let tick = controls.config().tick_period;
        TestDrive { controls, tick }
    }

    async fn wait_until<F: Fn(&SimHandle) -> bool>(&self, what: &str, condition: F) {
        let started = Instant::now();
        while !condition(&self.controls) {
            if started.elapsed() > PHASE_LIMIT {
                warn!["Gave up waiting for {}", what];
                return;
            }
            task::sleep(self.tick).await;
        }
    }

    async fn shift(&self, gear: Gear) {
        self.controls.set_clutch(1.0);
        task::sleep(self.tick * 2).await;
        match self.controls.set_gear(gear) {
            Ok(()) => info!["Shifted into {}", gear],
            Err(err) => error!["Shift failed: {}", err],
        }
        self.controls.set_clutch(0.0);
    }

    pub async fn execute(self) {
        info!("Starting test drive");
        self.controls.set_engine_on(true);
        task::sleep(Duration::from_millis(500)).await;
        self.controls.set_simulation_running(true);

        self.controls.set_throttle(0.8);
        for gear in 2..=4 {
            self.wait_until("shift point", |c| c.target_rpm() >= SHIFT_UP_RPM).await;
            if let Ok(next) = Gear::forward(gear) {
                self.shift(next).await;
            }
        }

        self.controls.toggle_acc();
        self.controls.set_throttle(0.3);
        task::sleep(Duration::from_secs(3)).await;
        self.controls.toggle_acc();

        self.controls.toggle_esp();
        self.controls.set_steering_angle(45.0);
        task::sleep(Duration::from_secs(1)).await;
        self.controls.set_steering_angle(0.0);
        self.controls.toggle_esp();

        self.controls.toggle_ods();
        task::sleep(Duration::from_secs(1)).await;
        self.controls.toggle_ods();

        self.controls.set_throttle(0.0);
        self.controls.toggle_abs();
        self.controls.set_brake(1.0);
        self.wait_until("standstill", |c| c.target_speed() < 0.1).await;
        self.controls.set_brake(0.0);
        self.controls.toggle_abs();

        self.shift(Gear::Reverse).await;
        self.controls.set_throttle(0.5);
        task::sleep(Duration::from_secs(2)).await;
        self.controls.set_throttle(0.0);

        self.controls.set_engine_on(false);
        self.wait_until("roll out", |c| c.target_speed() == 0.0).await;
        info!("Test drive finished");
    }
}

async fn present(readout: SimHandle, refresh: Duration) {
    let mut overlay: Box<dyn Overlay> = Box::new(Dashboard::new(readout.config()));
    let mut frames: u64 = 0;
    let mut refresh_ticks = stream::interval(refresh);

    while refresh_ticks.next().await.is_some() {
        overlay.update_state(&readout.targets());
        frames += 1;
        if frames % 15 == 0 {
            let mut line = String::new();
            if overlay.draw(&mut line).is_ok() {
                info!["{}", line];
            }
        }
    }
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match task::block_on(SimConfig::load(&path)) {
            Ok(config) => config,
            Err(err) => {
                error!["{}", err];
                std::process::exit(1);
            }
        },
        None => SimConfig::default(),
    };

    let mut simulator = match Simulator::new(config) {
        Ok(simulator) => simulator,
        Err(err) => {
            error!["{}", err];
            std::process::exit(1);
        }
    };

    let readout = simulator.handle().clone();
    let refresh = readout.config().refresh_period;
    let test_drive = TestDrive::new(simulator.handle().clone());

    simulator.start();
    task::block_on(test_drive.execute().race(present(readout, refresh)));

    info!["Distance covered: {:.3} km", simulator.handle().odometer()];
    simulator.stop();
    simulator.reset();
}
