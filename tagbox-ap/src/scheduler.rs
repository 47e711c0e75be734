//! Feeding and control contexts
//!
//! The feeding context is a dedicated OS thread that does nothing but call
//! [`PlaybackController::update`]; any stall there starves the decoder. The
//! control context polls the tag reader, handles user input and redraws the
//! display at a fixed period. The two only share the session atomics, the
//! request slot and single bus transactions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::playback::{PlaybackController, PlayerHandle};

/// The feeding thread
pub struct FeedingContext {
    stop_flag: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: PlayerHandle,
    thread: Option<JoinHandle<()>>,
}

impl FeedingContext {
    /// Move `controller` onto a new thread and start feeding.
    ///
    /// `idle_sleep` is slept only after a tick that did no work.
    pub fn spawn(controller: PlaybackController, idle_sleep: Duration) -> Result<Self> {
        let handle = controller.handle();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));

        let thread = {
            let stop_flag = Arc::clone(&stop_flag);
            let ticks = Arc::clone(&ticks);
            thread::Builder::new()
                .name("tagbox-feeder".to_string())
                .spawn(move || feeding_loop(controller, &stop_flag, &ticks, idle_sleep))?
        };

        info!("Feeding context started");
        Ok(Self {
            stop_flag,
            ticks,
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    /// `update()` calls so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop the loop, end any session and join the thread
    pub fn shutdown(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(()) => debug!("Feeding thread joined"),
                Err(e) => {
                    error!("Feeding thread panicked: {:?}", e);
                    return Err(Error::Internal("feeding thread panicked".to_string()));
                }
            }
            info!("Feeding context stopped");
        }
        Ok(())
    }
}

impl Drop for FeedingContext {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            warn!("Feeding context shutdown: {}", e);
        }
    }
}

fn feeding_loop(
    mut controller: PlaybackController,
    stop_flag: &AtomicBool,
    ticks: &AtomicU64,
    idle_sleep: Duration,
) {
    debug!("Feeding loop running");
    while !stop_flag.load(Ordering::Relaxed) {
        let tick = controller.update();
        ticks.fetch_add(1, Ordering::Relaxed);
        if !tick.did_work() {
            if idle_sleep.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(idle_sleep);
            }
        }
    }
    controller.stop();
    debug!("Feeding loop exited");
}

/// Work done once per control period
pub trait ControlTask {
    fn tick(&mut self) -> Result<()>;
}

/// Runs a [`ControlTask`] at a fixed period on the calling thread
pub struct ControlContext<T: ControlTask> {
    task: T,
    period: Duration,
}

impl<T: ControlTask> ControlContext<T> {
    pub fn new(task: T, period: Duration) -> Self {
        Self { task, period }
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }

    /// One tick; errors are logged, never fatal to the loop
    pub fn tick_once(&mut self) {
        if let Err(e) = self.task.tick() {
            warn!("Control tick failed: {}", e);
        }
    }

    /// Run exactly `ticks` periods
    pub fn run_for(&mut self, ticks: usize) {
        let mut next = Instant::now();
        for _ in 0..ticks {
            self.tick_once();
            next += self.period;
            sleep_until(next);
        }
    }

    /// Run until `stop` is set
    pub fn run_until(&mut self, stop: &AtomicBool) {
        let mut next = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            self.tick_once();
            next += self.period;
            sleep_until(next);
        }
    }

    pub fn into_task(self) -> T {
        self.task
    }
}

impl<T: ControlTask + Send + 'static> ControlContext<T> {
    /// Run on a dedicated thread until [`ControlThread::shutdown`]
    pub fn spawn(self) -> Result<ControlThread<T>> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop_flag = Arc::clone(&stop_flag);
            let mut context = self;
            thread::Builder::new()
                .name("tagbox-control".to_string())
                .spawn(move || {
                    context.run_until(&stop_flag);
                    context.into_task()
                })?
        };
        info!("Control context started");
        Ok(ControlThread {
            stop_flag,
            thread: Some(thread),
        })
    }
}

/// A [`ControlContext`] running on its own thread
pub struct ControlThread<T> {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<T>>,
}

impl<T> ControlThread<T> {
    /// Finish the current tick, join the thread and hand back the task
    pub fn shutdown(mut self) -> Result<T> {
        self.stop_flag.store(true, Ordering::Relaxed);
        let thread = self
            .thread
            .take()
            .ok_or_else(|| Error::Internal("control thread already joined".to_string()))?;
        match thread.join() {
            Ok(task) => {
                info!("Control context stopped");
                Ok(task)
            }
            Err(e) => {
                error!("Control thread panicked: {:?}", e);
                Err(Error::Internal("control thread panicked".to_string()))
            }
        }
    }
}

impl<T> Drop for ControlThread<T> {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Control thread panicked during drop");
            }
        }
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}
