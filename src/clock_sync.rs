//! Echo-probe clock synchronization: maps server high-resolution ticks onto
//! the client's wall-clock timeline, with optional skew estimation.
//!
//! Runs as a background task on the command channel once connect succeeds,
//! the way the teacher's `daemon/src/diag.rs::DiagTask` runs its own
//! `tokio::select!`-driven loop for the lifetime of a session.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::command_channel::CommandChannel;
use crate::protocol::mocap::FrameSuffixData;

fn wall_clock_now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[derive(Debug, Clone, Copy)]
struct State {
    t2_c: i64,
    t2_s: i64,
    initialized: bool,
    min_rtt: i64,
    beta: f64,
}

impl Default for State {
    fn default() -> Self {
        State {
            t2_c: 0,
            t2_s: 0,
            initialized: false,
            min_rtt: 1_000_000_000,
            beta: 0.0,
        }
    }
}

/// Background clock-sync task plus the conversions it maintains.
pub struct SynchronizedClock {
    freq: u64,
    state: Mutex<State>,
    count: AtomicI64,
    estimate_skew: bool,
    period: Duration,
    now_ns: Arc<dyn Fn() -> i64 + Send + Sync>,
    cancel: CancellationToken,
}

impl SynchronizedClock {
    pub fn new(freq: u64, estimate_skew: bool, period: Duration) -> Arc<Self> {
        Self::with_clock(freq, estimate_skew, period, Arc::new(wall_clock_now_ns))
    }

    pub fn with_clock(
        freq: u64,
        estimate_skew: bool,
        period: Duration,
        now_ns: Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(SynchronizedClock {
            freq,
            state: Mutex::new(State::default()),
            count: AtomicI64::new(0),
            estimate_skew,
            period,
            now_ns,
            cancel: CancellationToken::new(),
        })
    }

    /// Spawns the warm-up (ten back-to-back probes) followed by the steady
    /// periodic probe loop. Cancellable via [`Self::stop`].
    pub fn start(self: &Arc<Self>, cmd: Arc<CommandChannel>) {
        let this = self.clone();
        tokio::spawn(async move { this.run(cmd).await });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>, cmd: Arc<CommandChannel>) {
        info!("start initial clock sync");
        while self.count.load(Ordering::SeqCst) < 10 {
            if self.cancel.is_cancelled() {
                return;
            }
            self.echo(&cmd).await;
        }
        {
            let s = *self.state.lock().unwrap();
            info!(
                "initial clock sync done: min_rtt {} ns, beta {}, delta {}",
                s.min_rtt,
                s.beta,
                s.t2_c - s.t2_s
            );
        }
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.period) => {}
            }
            self.echo(&cmd).await;
        }
    }

    async fn echo(&self, cmd: &Arc<CommandChannel>) {
        let t0_c = (self.now_ns)();
        debug!("<- echo {}: client time {t0_c}", self.count.load(Ordering::SeqCst));
        let response = match cmd.send_echo(t0_c as u64, Duration::from_millis(500)).await {
            Ok(Some(r)) => r,
            Ok(None) => return,
            Err(e) => {
                warn!("echo probe failed: {e}");
                return;
            }
        };
        let t2_c = (self.now_ns)();
        if response.request_stamp != t0_c as u64 {
            warn!(
                "echo response {} does not match request {t0_c}",
                response.request_stamp
            );
            return;
        }
        let t1_s = self.ticks_to_nanoseconds(response.received_stamp as i64);
        self.update(t0_c, t1_s, t2_c);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn update(&self, t0_c: i64, t1_s: i64, t2_c: i64) {
        let rtt = t2_c - t0_c;
        let mut s = self.state.lock().unwrap();
        if !s.initialized {
            s.t2_s = t1_s + ((1.0 + s.beta) * rtt as f64 / 2.0) as i64;
            s.t2_c = t2_c;
            s.initialized = true;
        } else {
            let dt_c = t2_c - s.t2_c;
            let rtt_threshold = s.min_rtt as f64 + f64::max(1e5, 5e5 * dt_c as f64);
            if (rtt as f64) < rtt_threshold {
                let old_t2_s_extrapolated = s.t2_s as f64 + (t2_c - s.t2_c) as f64 * (1.0 + s.beta);
                let new_t2_s = t1_s + ((1.0 + s.beta) * rtt as f64 / 2.0) as i64;
                if self.estimate_skew && dt_c > 1_000_000_000 {
                    let delta = new_t2_s as f64 - old_t2_s_extrapolated;
                    let drift = delta / dt_c as f64;
                    if s.beta == 0.0 {
                        s.beta = drift;
                    } else {
                        s.beta += drift / 2.0;
                    }
                    debug!("correction {delta} ns, drift {drift}, new beta {}", s.beta);
                }
                s.t2_s = new_t2_s;
                s.t2_c = t2_c;
            }
        }
        if rtt < s.min_rtt {
            s.min_rtt = rtt;
        }
    }

    fn ticks_to_nanoseconds(&self, ticks: i64) -> i64 {
        (1e9 * ticks as f64 / self.freq as f64) as i64
    }

    pub fn server_ticks_to_client_time(&self, ticks: i64) -> i64 {
        let s = *self.state.lock().unwrap();
        let t_s = self.ticks_to_nanoseconds(ticks);
        (s.t2_c as f64 + (t_s - s.t2_s) as f64 / (1.0 + s.beta)) as i64
    }

    pub fn client_to_server_time(&self, t_c: i64) -> i64 {
        let s = *self.state.lock().unwrap();
        (s.t2_s as f64 + (t_c - s.t2_c) as f64 * (1.0 + s.beta)) as i64
    }

    /// `(system_latency, transmit_latency)`, both nanoseconds.
    pub fn compute_latencies(&self, suffix: &FrameSuffixData, t_c: i64) -> (i64, i64) {
        let system_latency = self.ticks_to_nanoseconds(suffix.stamp_transmit - suffix.stamp_camera_mid_exposure);
        let transmit_latency = t_c - self.server_ticks_to_client_time(suffix.stamp_transmit);
        (system_latency, transmit_latency)
    }

    /// Not named in the distilled spec but present in the original
    /// implementation: the client wall-clock instant the frame was
    /// actually captured, as opposed to when it was transmitted.
    pub fn compute_acquisition_stamp(&self, suffix: &FrameSuffixData) -> i64 {
        self.server_ticks_to_client_time(suffix.stamp_camera_mid_exposure)
    }

    pub fn min_rtt(&self) -> i64 {
        self.state.lock().unwrap().min_rtt
    }

    pub fn beta(&self) -> f64 {
        self.state.lock().unwrap().beta
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn clock() -> SynchronizedClock {
        SynchronizedClock {
            freq: 1_000_000_000,
            state: Mutex::new(State::default()),
            count: AtomicI64::new(0),
            estimate_skew: false,
            period: Duration::from_secs(500),
            now_ns: Arc::new(wall_clock_now_ns),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn monotonic_in_ticks() {
        let clock = clock();
        clock.update(0, 1_000_000, 2_000_000);
        let a = clock.server_ticks_to_client_time(1_000_000_000);
        let b = clock.server_ticks_to_client_time(2_000_000_000);
        assert!(b > a);
    }

    #[test]
    fn outlier_rejected_leaves_anchors_unchanged() {
        let clock = clock();
        clock.update(0, 1_000_000, 1_100_000);
        let (t2_c_before, t2_s_before) = {
            let s = clock.state.lock().unwrap();
            (s.t2_c, s.t2_s)
        };
        // A huge rtt sample far beyond any reasonable threshold, with a
        // small dt_c so the threshold itself stays small.
        clock.update(-1_000_000_000_000_000, 3_000_000, 1_200_000);
        let (t2_c_after, t2_s_after) = {
            let s = clock.state.lock().unwrap();
            (s.t2_c, s.t2_s)
        };
        assert_eq!(t2_c_before, t2_c_after);
        assert_eq!(t2_s_before, t2_s_after);
    }
}
