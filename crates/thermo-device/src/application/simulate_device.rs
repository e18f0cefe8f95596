//! Thermometer: the simulated temperature sensor.
//!
//! The thermometer owns two pieces of state, the current reading and the
//! update interval, behind a single lock.  A background generator task calls
//! [`Thermometer::update_temperature`] and then sleeps for the interval,
//! re-reading the interval every cycle so a change made while it sleeps is
//! honoured on the next iteration.
//!
//! # Notification
//!
//! Every new reading is published on a `broadcast` channel *after* the lock is
//! released.  Subscribers (the connection manager, the shell) can be slow or
//! blocked on a socket without ever holding up the generator.
//!
//! # Shutdown
//!
//! The generator only keeps a `Weak` reference to the thermometer and watches
//! a shutdown flag, which it checks at the top of every cycle and races
//! against its sleep.  [`Thermometer::dispose`] raises the flag and waits for
//! the task; dropping the last `Arc<Thermometer>` raises it too.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use rand::Rng;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

/// Smallest accepted update interval in seconds.
pub const MIN_UPDATE_INTERVAL_SECS: i64 = 1;
/// Largest accepted update interval in seconds.
pub const MAX_UPDATE_INTERVAL_SECS: i64 = 10;

const READING_CHANNEL_CAPACITY: usize = 64;

/// Error type for thermometer operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThermometerError {
    #[error("incorrect update interval value {requested}; [1; 10] seconds are allowed")]
    IntervalOutOfRange { requested: i64 },

    /// A configured reading or step is NaN or infinite.
    #[error("{field} must be a finite number, got {value}")]
    NonFinite { field: &'static str, value: f64 },
}

/// Initial values for a [`Thermometer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThermometerConfig {
    /// Reading before the first update.
    pub initial_temperature: f64,
    /// Upper bound on the absolute change of a single update.
    pub delta: f64,
    /// Seconds between generator updates; must lie in [1, 10].
    pub update_interval_secs: i64,
}

impl Default for ThermometerConfig {
    fn default() -> Self {
        Self {
            initial_temperature: 0.0,
            delta: 1.0,
            update_interval_secs: 1,
        }
    }
}

/// State guarded by the thermometer lock.
#[derive(Debug)]
struct Readings {
    temperature: f64,
    interval_ms: u64,
    last_update: SystemTime,
}

/// The simulated thermometer.
pub struct Thermometer {
    readings: Mutex<Readings>,
    delta: f64,
    updates: broadcast::Sender<f64>,
    shutdown: watch::Sender<bool>,
    generator: Mutex<Option<JoinHandle<()>>>,
}

impl Thermometer {
    /// Creates an idle thermometer.  Call [`Thermometer::spawn_generator`] to
    /// start autonomous updates.
    ///
    /// # Errors
    ///
    /// Returns [`ThermometerError::IntervalOutOfRange`] if the configured
    /// interval is outside [1, 10], and [`ThermometerError::NonFinite`] if the
    /// initial temperature or the delta is NaN or infinite.
    pub fn new(config: ThermometerConfig) -> Result<Arc<Self>, ThermometerError> {
        let interval_ms = interval_to_ms(config.update_interval_secs)?;
        let temperature = finite("initial_temperature", config.initial_temperature)?;
        let delta = finite("delta", config.delta)?;
        let (updates, _) = broadcast::channel(READING_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            readings: Mutex::new(Readings {
                temperature,
                interval_ms,
                last_update: SystemTime::now(),
            }),
            delta: delta.abs(),
            updates,
            shutdown,
            generator: Mutex::new(None),
        }))
    }

    /// Starts the background generator.  Calling it again while the generator
    /// is running has no effect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_generator(self: &Arc<Self>) {
        let mut slot = lock(&self.generator);
        if slot.is_some() || *self.shutdown.borrow() {
            return;
        }
        let handle = tokio::spawn(run_generator(
            Arc::downgrade(self),
            self.shutdown.subscribe(),
        ));
        *slot = Some(handle);
        info!(interval_secs = self.update_interval(), "temperature generator started");
    }

    /// Applies one random perturbation to the reading and publishes it.
    ///
    /// The change is `sign * magnitude * delta` with a uniformly random sign
    /// and `magnitude` drawn from `[0, 1)`.  Returns the new reading.
    pub fn update_temperature(&self) -> f64 {
        let perturbation = {
            let mut rng = rand::thread_rng();
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            sign * rng.gen::<f64>() * self.delta
        };

        let value = {
            let mut readings = lock(&self.readings);
            readings.temperature += perturbation;
            readings.last_update = SystemTime::now();
            readings.temperature
        };

        // No subscribers is not an error.
        let _ = self.updates.send(value);
        debug!(temperature = value, "temperature updated");
        value
    }

    /// Replaces the update interval.  The running generator picks it up after
    /// its current sleep.
    ///
    /// # Errors
    ///
    /// Returns [`ThermometerError::IntervalOutOfRange`] for values outside
    /// [1, 10]; the stored interval is left unchanged.
    pub fn set_update_interval(&self, seconds: i64) -> Result<(), ThermometerError> {
        let interval_ms = interval_to_ms(seconds)?;
        lock(&self.readings).interval_ms = interval_ms;
        debug!(seconds, "update interval changed");
        Ok(())
    }

    /// Current update interval in whole seconds.
    pub fn update_interval(&self) -> u32 {
        (lock(&self.readings).interval_ms / 1000) as u32
    }

    /// Current reading.
    pub fn temperature(&self) -> f64 {
        lock(&self.readings).temperature
    }

    /// Time of the most recent update (construction time before the first).
    pub fn last_update(&self) -> SystemTime {
        lock(&self.readings).last_update
    }

    /// Subscribes to new readings.
    pub fn subscribe(&self) -> broadcast::Receiver<f64> {
        self.updates.subscribe()
    }

    /// Stops the generator and waits for it to exit.  Safe to call repeatedly
    /// and when the generator was never started.
    pub async fn dispose(&self) {
        self.shutdown.send_replace(true);
        let handle = lock(&self.generator).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!("temperature generator ended abnormally: {e}");
            }
            info!("temperature generator stopped");
        }
    }

    fn update_interval_duration(&self) -> Duration {
        Duration::from_millis(lock(&self.readings).interval_ms)
    }
}

impl Drop for Thermometer {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run_generator(thermometer: Weak<Thermometer>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let interval = match thermometer.upgrade() {
            Some(t) => {
                t.update_temperature();
                t.update_interval_duration()
            }
            None => break,
        };

        tokio::select! {
            _ = time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, ThermometerError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ThermometerError::NonFinite { field, value })
    }
}

fn interval_to_ms(seconds: i64) -> Result<u64, ThermometerError> {
    if !(MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(&seconds) {
        return Err(ThermometerError::IntervalOutOfRange { requested: seconds });
    }
    Ok(seconds as u64 * 1000)
}

/// The guarded values are plain numbers, so a panic elsewhere cannot leave
/// them half-written; recover the guard instead of propagating the poison.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn thermometer() -> Arc<Thermometer> {
        Thermometer::new(ThermometerConfig::default()).unwrap()
    }

    #[test]
    fn test_default_config_matches_device_defaults() {
        let cfg = ThermometerConfig::default();
        assert_eq!(cfg.initial_temperature, 0.0);
        assert_eq!(cfg.delta, 1.0);
        assert_eq!(cfg.update_interval_secs, 1);
    }

    #[test]
    fn test_new_rejects_out_of_range_interval() {
        let cfg = ThermometerConfig {
            update_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            Thermometer::new(cfg),
            Err(ThermometerError::IntervalOutOfRange { requested: 0 })
        ));
    }

    #[test]
    fn test_new_rejects_non_finite_temperature_and_delta() {
        // Arrange
        let bad = [
            ("initial_temperature", f64::NAN, 1.0),
            ("initial_temperature", f64::INFINITY, 1.0),
            ("delta", 0.0, f64::NAN),
            ("delta", 0.0, f64::NEG_INFINITY),
        ];

        for (field, initial_temperature, delta) in bad {
            // Act
            let result = Thermometer::new(ThermometerConfig {
                initial_temperature,
                delta,
                ..Default::default()
            });

            // Assert
            match result {
                Err(ThermometerError::NonFinite { field: got, .. }) => assert_eq!(got, field),
                Err(other) => panic!("expected NonFinite for {field}, got {other:?}"),
                Ok(_) => panic!("non-finite {field} must be rejected"),
            }
        }
    }

    #[test]
    fn test_readings_stay_finite_with_large_finite_delta() {
        let t = Thermometer::new(ThermometerConfig {
            initial_temperature: -40.5,
            delta: 1.0e6,
            ..Default::default()
        })
        .unwrap();

        for _ in 0..100 {
            assert!(t.update_temperature().is_finite());
        }
    }

    #[test]
    fn test_set_update_interval_accepts_every_valid_value() {
        let t = thermometer();
        for secs in 1..=10 {
            t.set_update_interval(secs).unwrap();
            assert_eq!(t.update_interval(), secs as u32);
        }
    }

    #[test]
    fn test_set_update_interval_rejects_out_of_range_and_keeps_value() {
        // Arrange
        let t = thermometer();
        t.set_update_interval(5).unwrap();

        // Act / Assert
        for secs in [i64::MIN, -1, 0, 11, 99, i64::MAX] {
            let result = t.set_update_interval(secs);
            assert_eq!(
                result,
                Err(ThermometerError::IntervalOutOfRange { requested: secs })
            );
            assert_eq!(t.update_interval(), 5, "interval must be unchanged after {secs}");
        }
    }

    #[test]
    fn test_update_temperature_change_is_bounded_by_delta() {
        let t = thermometer();
        let mut previous = t.temperature();
        for _ in 0..10_000 {
            let next = t.update_temperature();
            assert!(next.is_finite());
            assert!((next - previous).abs() <= 1.0, "step {previous} -> {next}");
            previous = next;
        }
    }

    #[test]
    fn test_update_temperature_respects_custom_delta() {
        let t = Thermometer::new(ThermometerConfig {
            initial_temperature: 20.0,
            delta: 0.1,
            update_interval_secs: 1,
        })
        .unwrap();

        let next = t.update_temperature();

        assert!((next - 20.0).abs() <= 0.1);
        assert_eq!(t.temperature(), next);
    }

    #[test]
    fn test_update_temperature_records_timestamp() {
        let t = thermometer();
        let before = t.last_update();
        std::thread::sleep(Duration::from_millis(5));
        t.update_temperature();
        assert!(t.last_update() > before);
    }

    #[test]
    fn test_subscriber_receives_new_reading() {
        let t = thermometer();
        let mut rx = t.subscribe();

        let value = t.update_temperature();

        assert_eq!(rx.try_recv().unwrap(), value);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_updates_once_per_interval() {
        // Arrange
        let t = thermometer();
        let mut rx = t.subscribe();
        let start = time::Instant::now();

        // Act
        t.spawn_generator();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        // Assert – first update is immediate, then one per second
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        t.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_after_current_sleep() {
        let t = thermometer();
        let mut rx = t.subscribe();
        t.spawn_generator();

        rx.recv().await.unwrap();
        t.set_update_interval(5).unwrap();

        // The sleep already in progress still uses the old 1 s interval.
        let tick = time::Instant::now();
        rx.recv().await.unwrap();
        assert_eq!(tick.elapsed(), Duration::from_secs(1));

        let tick = time::Instant::now();
        rx.recv().await.unwrap();
        assert_eq!(tick.elapsed(), Duration::from_secs(5));

        t.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_stops_generator_and_is_idempotent() {
        let t = thermometer();
        let mut rx = t.subscribe();
        t.spawn_generator();
        rx.recv().await.unwrap();

        t.dispose().await;
        t.dispose().await;

        let reading = t.temperature();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(t.temperature(), reading);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispose_without_generator_is_noop() {
        let t = thermometer();
        t.dispose().await;
        assert_eq!(t.temperature(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_generator_twice_runs_single_task() {
        let t = thermometer();
        let mut rx = t.subscribe();

        t.spawn_generator();
        t.spawn_generator();
        time::sleep(Duration::from_millis(2500)).await;
        t.dispose().await;

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        // Updates at t = 0, 1, 2 seconds.
        assert_eq!(count, 3);
    }
}
