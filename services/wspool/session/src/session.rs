//! Core session state machine.
//!
//! A `Session` is a cloneable handle to one duplex connection. The connection
//! itself is owned by a driver task that dials the endpoint, pumps frames,
//! runs keepalive, and walks the state machine:
//!
//! ```text
//! Connecting ──► Active ──► Reconnecting ──► Active
//!     │                          │
//!     └──────► Reconnecting      └──► Dead (budget exhausted)
//!
//! any state ──► Dead (terminate)
//! ```
//!
//! Every transition is published on a `watch` channel for callers and, when
//! the session belongs to a pool, sent as a `SessionNotice` on the pool's
//! channel. Neither publication blocks the driver.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::SessionError;
use crate::keepalive::{now_corr_id, ping_payload, KeepaliveState};
use crate::reconnect::{Backoff, ReconnectTracker};
use crate::transport::{Connection, Frame, Inbound, Transport};

/// Capacity of the inbound frame broadcast per session
const INBOUND_BUFFER: usize = 256;

/// Configuration for a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Failed reconnect attempts allowed before the session is retired
    pub reconnect_budget: u32,
    /// Close the lingering connection handle when the budget runs out
    pub kill_on_exhaustion: bool,
    /// Delay before the first reconnect attempt
    pub reconnect_delay: Duration,
    /// Upper bound for the exponential reconnect delay
    pub max_reconnect_delay: Duration,
    /// Limit for a single connect attempt
    pub connect_timeout: Duration,
    /// Interval between PINGs; `None` disables keepalive pings
    pub ping_interval: Option<Duration>,
    /// Connection counts as lost after this long without inbound traffic
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect_budget: 3,
            kill_on_exhaustion: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Some(Duration::from_secs(10)),
            idle_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl SessionOptions {
    /// Check that the options describe a session that can run
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.reconnect_budget == 0 {
            return Err(SessionError::InvalidOptions(
                "reconnect_budget must be positive".to_string(),
            ));
        }
        if self.reconnect_delay.is_zero() {
            return Err(SessionError::InvalidOptions(
                "reconnect_delay must be positive".to_string(),
            ));
        }
        if self.max_reconnect_delay < self.reconnect_delay {
            return Err(SessionError::InvalidOptions(format!(
                "max_reconnect_delay {:?} is below reconnect_delay {:?}",
                self.max_reconnect_delay, self.reconnect_delay
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(SessionError::InvalidOptions(
                "connect_timeout must be positive".to_string(),
            ));
        }
        if matches!(self.ping_interval, Some(d) if d.is_zero()) {
            return Err(SessionError::InvalidOptions(
                "ping_interval must be positive when set".to_string(),
            ));
        }
        if matches!(self.idle_timeout, Some(d) if d.is_zero()) {
            return Err(SessionError::InvalidOptions(
                "idle_timeout must be positive when set".to_string(),
            ));
        }
        // Only pongs keep a quiet connection alive, so pings must outpace the idle timer
        if let Some(idle) = self.idle_timeout {
            match self.ping_interval {
                None => {
                    return Err(SessionError::InvalidOptions(
                        "idle_timeout requires ping_interval".to_string(),
                    ))
                }
                Some(ping) if ping >= idle => {
                    return Err(SessionError::InvalidOptions(format!(
                        "ping_interval {:?} must be below idle_timeout {:?}",
                        ping, idle
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Health state of a session
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum SessionState {
    /// First connect in progress
    Connecting,
    /// Connected and usable
    Active,
    /// Lost the connection, retrying within the budget
    Reconnecting,
    /// Terminal; never connects again
    Dead,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Connecting, Reconnecting)
                | (Active, Reconnecting)
                | (Reconnecting, Active)
                | (Connecting, Dead)
                | (Active, Dead)
                | (Reconnecting, Dead)
        )
    }

    /// Anything but `Dead`
    pub fn is_alive(self) -> bool {
        self != SessionState::Dead
    }

    /// Lowercase name used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Dead => "dead",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session is dead
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeathCause {
    /// Reconnect budget used up
    Exhausted {
        /// Failed attempts at the time of death
        attempts: u32,
    },
    /// Torn down by its owner
    Terminated,
}

impl DeathCause {
    /// Error reported to callers that keep using the dead session
    pub fn as_error(self) -> SessionError {
        match self {
            DeathCause::Exhausted { attempts } => SessionError::ReconnectExhausted { attempts },
            DeathCause::Terminated => SessionError::Terminated,
        }
    }
}

/// Observable status of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current state
    pub state: SessionState,
    /// Set once the session is dead
    pub cause: Option<DeathCause>,
}

/// Process-unique session identity
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// State transition report sent to the owning pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionNotice {
    /// Session that moved
    pub id: SessionId,
    /// Previous state
    pub from: SessionState,
    /// New state
    pub to: SessionState,
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Successful connects, including reconnects
    pub connects: u64,
    /// Established connections that were lost
    pub disconnects: u64,
    /// Failed connect attempts, including the initial one
    pub failed_attempts: u64,
    /// Frames received
    pub frames_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Payload bytes received
    pub bytes_in: u64,
    /// Payload bytes sent
    pub bytes_out: u64,
    /// Most recent RTT measurement
    pub last_rtt: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    disconnects: AtomicU64,
    failed_attempts: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    /// Zero means no measurement yet
    last_rtt_micros: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SessionStats {
        let rtt = self.last_rtt_micros.load(Ordering::Relaxed);
        SessionStats {
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            last_rtt: (rtt > 0).then(|| Duration::from_micros(rtt)),
        }
    }
}

struct SessionInner {
    id: SessionId,
    endpoint: Endpoint,
    kill_on_exhaustion: bool,
    status: watch::Sender<SessionStatus>,
    reconnect: ReconnectTracker,
    notices: Option<mpsc::UnboundedSender<SessionNotice>>,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    inbound_tx: broadcast::Sender<Frame>,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Compare-and-transition; returns false when the move is not allowed
    fn transition(&self, to: SessionState, cause: Option<DeathCause>) -> bool {
        let mut from = to;
        let changed = self.status.send_if_modified(|status| {
            if !status.state.can_transition_to(to) {
                return false;
            }
            from = status.state;
            status.state = to;
            if to == SessionState::Dead {
                status.cause = cause;
            }
            true
        });

        if !changed {
            return false;
        }

        match to {
            SessionState::Active => info!("Session {} to {} is active", self.id, self.endpoint),
            SessionState::Dead => warn!(
                "Session {} to {} is dead ({:?})",
                self.id, self.endpoint, cause
            ),
            _ => debug!("Session {} to {}: {} -> {}", self.id, self.endpoint, from, to),
        }

        if let Some(notices) = &self.notices {
            // Receiver gone means the pool is gone; nothing to tell
            let _ = notices.send(SessionNotice { id: self.id, from, to });
        }
        true
    }
}

/// Handle to a pooled duplex session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a session and its driver task. Must be called within a Tokio runtime.
    pub(crate) fn spawn(
        endpoint: Endpoint,
        options: SessionOptions,
        transport: Arc<dyn Transport>,
        notices: Option<mpsc::UnboundedSender<SessionNotice>>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Connecting,
            cause: None,
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, _) = broadcast::channel(INBOUND_BUFFER);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(SessionInner {
            id: SessionId::next(),
            endpoint,
            kill_on_exhaustion: options.kill_on_exhaustion,
            status,
            reconnect: ReconnectTracker::new(options.reconnect_budget),
            notices,
            outbound_tx,
            inbound_tx,
            shutdown,
            counters: Counters::default(),
        });

        debug!("Created session {} to {}", inner.id, inner.endpoint);
        tokio::spawn(drive(Arc::clone(&inner), transport, options, outbound_rx));

        Self { inner }
    }

    /// Process-unique identity
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Endpoint this session dials
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Current state and death cause
    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Why the session died, if it did
    pub fn death_cause(&self) -> Option<DeathCause> {
        self.status().cause
    }

    /// Whether the session is dead
    pub fn is_dead(&self) -> bool {
        self.state() == SessionState::Dead
    }

    /// Whether the session is connected
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Failed reconnect attempts since the session was last active
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect.attempts()
    }

    /// Attempts allowed before the session dies
    pub fn reconnect_budget(&self) -> u32 {
        self.inner.reconnect.budget()
    }

    /// Change the reconnect budget of a running session
    pub fn set_reconnect_budget(&self, budget: u32) {
        debug!("Session {} reconnect budget set to {}", self.inner.id, budget);
        self.inner.reconnect.set_budget(budget);
    }

    /// Whether exhaustion closes the lingering connection handle
    pub fn kill_on_exhaustion(&self) -> bool {
        self.inner.kill_on_exhaustion
    }

    /// Traffic and connection counters
    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    /// Receiver that observes every status change
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Wait until the status satisfies `predicate` and return it
    pub async fn wait_until<F>(&self, mut predicate: F) -> SessionStatus
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut rx = self.inner.status.subscribe();
        let waited = rx.wait_for(|status| predicate(status)).await.map(|status| *status);
        // Sender lives in `inner`, which we hold
        waited.unwrap_or_else(|_| self.status())
    }

    /// Wait until the session is active; fails if it dies first
    pub async fn wait_active(&self) -> Result<(), SessionError> {
        let status = self
            .wait_until(|s| matches!(s.state, SessionState::Active | SessionState::Dead))
            .await;
        match status.cause {
            Some(cause) => Err(cause.as_error()),
            None => Ok(()),
        }
    }

    /// Queue a frame for the peer.
    ///
    /// Frames queued while the session is connecting or reconnecting go out
    /// after the next successful connect. A dead session rejects frames.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), SessionError> {
        if let Some(cause) = self.death_cause() {
            return Err(cause.as_error());
        }
        self.inner
            .outbound_tx
            .send(frame.into())
            .map_err(|_| self.death_cause().map_or(SessionError::Terminated, DeathCause::as_error))
    }

    /// Receiver for frames arriving from the peer
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.inner.inbound_tx.subscribe()
    }

    /// Force the session to `Dead` and close its connection. Idempotent.
    pub fn terminate(&self) {
        if self.inner.transition(SessionState::Dead, Some(DeathCause::Terminated)) {
            info!("Session {} to {} terminated", self.inner.id, self.inner.endpoint);
        }
        self.inner.shutdown.send_replace(true);
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint.to_string())
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}

/// How an established connection ended
enum ConnectionEnd {
    /// Session was terminated
    Shutdown,
    /// Connection failed or the peer went away
    Lost(String),
}

/// Driver task: connect, run, reconnect until dead
async fn drive(
    inner: Arc<SessionInner>,
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
) {
    let mut shutdown_rx = inner.shutdown.subscribe();
    let mut backoff = Backoff::new(options.reconnect_delay, options.max_reconnect_delay);
    // Handle of the last connection that failed, kept until replaced or killed
    let mut lingering: Option<Box<dyn Connection>> = None;

    loop {
        debug!("Session {} connecting to {}", inner.id, inner.endpoint);
        let attempt = tokio::time::timeout(options.connect_timeout, transport.connect(&inner.endpoint));

        let result = tokio::select! {
            biased;

            _ = stopped(&mut shutdown_rx) => break,

            result = attempt => match result {
                Ok(result) => result,
                Err(_) => Err(SessionError::ConnectFailure(format!(
                    "{}: connect timed out after {:?}",
                    inner.endpoint, options.connect_timeout
                ))),
            },
        };

        match result {
            Ok(mut conn) => {
                lingering = None;
                inner.reconnect.record_success();
                inner.counters.connects.fetch_add(1, Ordering::Relaxed);
                backoff.reset();

                if !inner.transition(SessionState::Active, None) {
                    // Terminated while the connect was in flight
                    let _ = conn.close().await;
                    break;
                }

                match run_connection(&inner, conn.as_mut(), &mut outbound_rx, &mut shutdown_rx, &options).await {
                    ConnectionEnd::Shutdown => {
                        let _ = conn.close().await;
                        break;
                    }
                    ConnectionEnd::Lost(reason) => {
                        warn!("Session {} lost connection to {}: {}", inner.id, inner.endpoint, reason);
                        inner.counters.disconnects.fetch_add(1, Ordering::Relaxed);
                        lingering = Some(conn);
                        if !inner.transition(SessionState::Reconnecting, None) {
                            break;
                        }
                    }
                }
            }

            Err(e) => {
                inner.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);

                match inner.state() {
                    SessionState::Connecting => {
                        warn!("Session {} failed to connect to {}: {}", inner.id, inner.endpoint, e);
                        if !inner.transition(SessionState::Reconnecting, None) {
                            break;
                        }
                    }
                    SessionState::Reconnecting => {
                        let (attempts, exhausted) = inner.reconnect.record_failure();
                        if exhausted {
                            inner.transition(SessionState::Dead, Some(DeathCause::Exhausted { attempts }));
                            break;
                        }
                        warn!(
                            "Session {} reconnect to {} failed ({}/{}): {}",
                            inner.id,
                            inner.endpoint,
                            attempts,
                            inner.reconnect.budget(),
                            e
                        );
                    }
                    // Dead: terminated while the attempt was in flight
                    _ => break,
                }
            }
        }

        let delay = backoff.next_delay();
        debug!("Session {} retrying {} in {:?}", inner.id, inner.endpoint, delay);

        tokio::select! {
            biased;
            _ = stopped(&mut shutdown_rx) => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    if let Some(mut conn) = lingering.take() {
        let terminated = inner.status.borrow().cause == Some(DeathCause::Terminated);
        if inner.kill_on_exhaustion || terminated {
            if let Err(e) = conn.close().await {
                debug!("Session {} close of lingering connection failed: {}", inner.id, e);
            }
        } else {
            debug!("Session {} releasing lingering connection without close", inner.id);
        }
    }

    let dropped = drain(&mut outbound_rx);
    if dropped > 0 {
        debug!("Session {} discarded {} queued frames", inner.id, dropped);
    }
    debug!("Session {} driver for {} stopped", inner.id, inner.endpoint);
}

/// Resolves once the session is asked to stop
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which also means stop
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

fn drain(outbound_rx: &mut mpsc::UnboundedReceiver<Frame>) -> usize {
    outbound_rx.close();
    let mut dropped = 0;
    while outbound_rx.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

/// Pump one established connection until it ends
async fn run_connection(
    inner: &SessionInner,
    conn: &mut dyn Connection,
    outbound_rx: &mut mpsc::UnboundedReceiver<Frame>,
    shutdown_rx: &mut watch::Receiver<bool>,
    options: &SessionOptions,
) -> ConnectionEnd {
    let mut keepalive = KeepaliveState::default();
    let mut ping_timer = options.ping_interval.map(|period| {
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = stopped(shutdown_rx) => return ConnectionEnd::Shutdown,

            inbound = conn.recv() => {
                match inbound {
                    Some(Ok(Inbound::Frame(frame))) => {
                        last_activity = Instant::now();
                        inner.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                        inner.counters.bytes_in.fetch_add(frame.len() as u64, Ordering::Relaxed);
                        // No subscribers is fine
                        let _ = inner.inbound_tx.send(frame);
                    }
                    Some(Ok(Inbound::Pong(payload))) => {
                        last_activity = Instant::now();
                        if let Some(rtt) = keepalive.process_pong(&payload) {
                            let micros = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX).max(1);
                            inner.counters.last_rtt_micros.store(micros, Ordering::Relaxed);
                            debug!("Session {} RTT: {:?}", inner.id, rtt);
                        } else {
                            debug!("Session {} received unsolicited pong", inner.id);
                        }
                    }
                    Some(Err(e)) => return ConnectionEnd::Lost(e.to_string()),
                    None => return ConnectionEnd::Lost("closed by peer".to_string()),
                }
            }

            Some(frame) = outbound_rx.recv() => {
                let len = frame.len() as u64;
                if let Err(e) = conn.send(frame).await {
                    return ConnectionEnd::Lost(e.to_string());
                }
                inner.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                inner.counters.bytes_out.fetch_add(len, Ordering::Relaxed);
            }

            _ = async {
                match &mut ping_timer {
                    Some(timer) => timer.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                let corr_id = now_corr_id();
                if let Err(e) = conn.ping(ping_payload(corr_id)).await {
                    return ConnectionEnd::Lost(e.to_string());
                }
                keepalive.record_ping(corr_id);
                debug!("Session {} sent PING (corr_id: {})", inner.id, corr_id);
            }

            _ = async {
                match options.idle_timeout {
                    Some(idle) => tokio::time::sleep_until(last_activity + idle).await,
                    None => std::future::pending().await,
                }
            } => {
                return ConnectionEnd::Lost(format!(
                    "no inbound traffic for {:?}",
                    last_activity.elapsed()
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::SessionFactory;
    use crate::transport::MemoryTransport;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_options() -> SessionOptions {
        SessionOptions {
            reconnect_budget: 3,
            kill_on_exhaustion: true,
            reconnect_delay: Duration::from_millis(5),
            max_reconnect_delay: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(1),
            ping_interval: None,
            idle_timeout: None,
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::parse("ws://127.0.0.1:8546").unwrap()
    }

    fn observed(
        transport: &MemoryTransport,
        options: SessionOptions,
    ) -> (Session, mpsc::UnboundedReceiver<SessionNotice>) {
        let factory = SessionFactory::new(Arc::new(transport.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        (factory.create_observed(&endpoint(), &options, tx), rx)
    }

    async fn next_notice(rx: &mut mpsc::UnboundedReceiver<SessionNotice>) -> SessionNotice {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    async fn wait_dead(session: &Session) -> SessionStatus {
        timeout(WAIT, session.wait_until(|s| s.state == SessionState::Dead))
            .await
            .unwrap()
    }

    #[test]
    fn test_transition_table() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Active));
        assert!(Connecting.can_transition_to(Reconnecting));
        assert!(Active.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Active));
        for state in [Connecting, Active, Reconnecting] {
            assert!(state.can_transition_to(Dead));
        }
        for state in [Connecting, Active, Reconnecting, Dead] {
            assert!(!Dead.can_transition_to(state));
        }
        assert!(!Active.can_transition_to(Connecting));
        assert!(!Reconnecting.can_transition_to(Reconnecting));
    }

    #[test]
    fn test_options_validation() {
        assert!(SessionOptions::default().validate().is_ok());

        let zero_budget = SessionOptions {
            reconnect_budget: 0,
            ..SessionOptions::default()
        };
        assert!(matches!(zero_budget.validate(), Err(SessionError::InvalidOptions(_))));

        let inverted = SessionOptions {
            reconnect_delay: Duration::from_secs(10),
            max_reconnect_delay: Duration::from_secs(1),
            ..SessionOptions::default()
        };
        assert!(inverted.validate().is_err());

        let zero_ping = SessionOptions {
            ping_interval: Some(Duration::ZERO),
            ..SessionOptions::default()
        };
        assert!(zero_ping.validate().is_err());

        let idle_without_ping = SessionOptions {
            ping_interval: None,
            ..SessionOptions::default()
        };
        assert!(matches!(idle_without_ping.validate(), Err(SessionError::InvalidOptions(_))));

        let ping_slower_than_idle = SessionOptions {
            ping_interval: Some(Duration::from_millis(100)),
            idle_timeout: Some(Duration::from_millis(30)),
            ..SessionOptions::default()
        };
        assert!(ping_slower_than_idle.validate().is_err());

        let no_keepalive = SessionOptions {
            ping_interval: None,
            idle_timeout: None,
            ..SessionOptions::default()
        };
        assert!(no_keepalive.validate().is_ok());
    }

    #[tokio::test]
    async fn test_connects_and_becomes_active() {
        let transport = MemoryTransport::new();
        let (session, mut notices) = observed(&transport, fast_options());

        timeout(WAIT, session.wait_active()).await.unwrap().unwrap();

        let notice = next_notice(&mut notices).await;
        assert_eq!(notice.id, session.id());
        assert_eq!(notice.from, SessionState::Connecting);
        assert_eq!(notice.to, SessionState::Active);
        assert_eq!(session.reconnect_attempts(), 0);
        assert_eq!(session.stats().connects, 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_peer_reset() {
        let transport = MemoryTransport::new();
        let (session, mut notices) = observed(&transport, fast_options());

        assert_eq!(next_notice(&mut notices).await.to, SessionState::Active);

        transport.sever_all();

        let lost = next_notice(&mut notices).await;
        assert_eq!((lost.from, lost.to), (SessionState::Active, SessionState::Reconnecting));
        let back = next_notice(&mut notices).await;
        assert_eq!((back.from, back.to), (SessionState::Reconnecting, SessionState::Active));

        assert_eq!(session.reconnect_attempts(), 0);
        let stats = session.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.disconnects, 1);
    }

    #[tokio::test]
    async fn test_budget_one_dies_after_first_failed_reconnect() {
        let transport = MemoryTransport::new();
        let options = SessionOptions {
            reconnect_budget: 1,
            ..fast_options()
        };
        let (session, mut notices) = observed(&transport, options);
        assert_eq!(next_notice(&mut notices).await.to, SessionState::Active);

        // Failure one: the live connection is reset. Failure two: the reconnect is refused.
        transport.go_down();

        let status = wait_dead(&session).await;
        assert_eq!(status.cause, Some(DeathCause::Exhausted { attempts: 1 }));
        assert_eq!(session.reconnect_attempts(), 1);
        assert_eq!(transport.connect_attempts(), 2);

        assert_eq!(next_notice(&mut notices).await.to, SessionState::Reconnecting);
        let dead = next_notice(&mut notices).await;
        assert_eq!((dead.from, dead.to), (SessionState::Reconnecting, SessionState::Dead));

        // Lingering handle closed because kill_on_exhaustion is set
        timeout(WAIT, async {
            while transport.closes() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            session.send("eth_blockNumber"),
            Err(SessionError::ReconnectExhausted { attempts: 1 })
        );
    }

    #[tokio::test]
    async fn test_exhaustion_without_kill_leaves_handle_unclosed() {
        let transport = MemoryTransport::new();
        let options = SessionOptions {
            reconnect_budget: 1,
            kill_on_exhaustion: false,
            ..fast_options()
        };
        let (session, _notices) = observed(&transport, options);
        timeout(WAIT, session.wait_active()).await.unwrap().unwrap();

        transport.go_down();
        wait_dead(&session).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!session.kill_on_exhaustion());
        assert_eq!(transport.closes(), 0);
    }

    #[tokio::test]
    async fn test_initial_failure_then_budget() {
        let transport = MemoryTransport::unreachable();
        let options = SessionOptions {
            reconnect_budget: 2,
            ..fast_options()
        };
        let (session, mut notices) = observed(&transport, options);

        // Never waits for the connection: the handle starts in Connecting
        assert_eq!(session.state(), SessionState::Connecting);

        let first = next_notice(&mut notices).await;
        assert_eq!((first.from, first.to), (SessionState::Connecting, SessionState::Reconnecting));

        let status = wait_dead(&session).await;
        assert_eq!(status.cause, Some(DeathCause::Exhausted { attempts: 2 }));
        // Initial attempt plus two reconnect attempts
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(session.stats().failed_attempts, 3);
        assert!(timeout(WAIT, session.wait_active()).await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_recovers_when_endpoint_returns() {
        let transport = MemoryTransport::unreachable();
        let options = SessionOptions {
            reconnect_budget: 50,
            ..fast_options()
        };
        let (session, _notices) = observed(&transport, options);

        timeout(WAIT, async {
            while session.reconnect_attempts() < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        transport.set_reachable(true);
        timeout(WAIT, session.wait_active()).await.unwrap().unwrap();
        assert_eq!(session.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_frames_queued_while_reconnecting_are_delivered() {
        let transport = MemoryTransport::new();
        let options = SessionOptions {
            reconnect_budget: 50,
            ..fast_options()
        };
        let (session, mut notices) = observed(&transport, options);
        let mut inbound = session.subscribe();
        assert_eq!(next_notice(&mut notices).await.to, SessionState::Active);

        transport.go_down();
        assert_eq!(next_notice(&mut notices).await.to, SessionState::Reconnecting);

        session.send("{\"id\":7}").unwrap();
        transport.set_reachable(true);

        let echoed = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
        assert_eq!(echoed, Frame::from("{\"id\":7}"));
        assert_eq!(session.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn test_terminate_is_terminal_and_idempotent() {
        let transport = MemoryTransport::new();
        let (session, mut notices) = observed(&transport, fast_options());
        timeout(WAIT, session.wait_active()).await.unwrap().unwrap();
        assert_eq!(next_notice(&mut notices).await.to, SessionState::Active);

        session.terminate();
        session.terminate();

        assert_eq!(session.state(), SessionState::Dead);
        assert_eq!(session.death_cause(), Some(DeathCause::Terminated));
        assert_eq!(session.send("late"), Err(SessionError::Terminated));

        let dead = next_notice(&mut notices).await;
        assert_eq!((dead.from, dead.to), (SessionState::Active, SessionState::Dead));

        // The driver closes the connection once
        timeout(WAIT, async {
            while transport.closes() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.closes(), 1);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_terminate_while_connecting() {
        let transport = MemoryTransport::unreachable();
        let (session, _notices) = observed(&transport, fast_options());
        session.terminate();
        assert_eq!(session.status().cause, Some(DeathCause::Terminated));

        transport.set_reachable(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.state(), SessionState::Dead);
    }

    #[tokio::test]
    async fn test_idle_timeout_counts_as_lost() {
        let transport = MemoryTransport::new();
        transport.set_responsive(false);
        let options = SessionOptions {
            ping_interval: Some(Duration::from_millis(10)),
            idle_timeout: Some(Duration::from_millis(40)),
            ..fast_options()
        };
        options.validate().unwrap();
        let (_session, mut notices) = observed(&transport, options);

        assert_eq!(next_notice(&mut notices).await.to, SessionState::Active);
        let lost = next_notice(&mut notices).await;
        assert_eq!((lost.from, lost.to), (SessionState::Active, SessionState::Reconnecting));
    }

    #[tokio::test]
    async fn test_healthy_connection_with_valid_keepalive_is_not_recycled() {
        let transport = MemoryTransport::new();
        let options = SessionOptions {
            ping_interval: Some(Duration::from_millis(10)),
            idle_timeout: Some(Duration::from_millis(60)),
            ..fast_options()
        };
        options.validate().unwrap();
        let (session, mut notices) = observed(&transport, options);
        assert_eq!(next_notice(&mut notices).await.to, SessionState::Active);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(notices.try_recv().is_err());
        assert_eq!(session.stats().connects, 1);
        assert_eq!(transport.connections(), 1);
    }

    #[tokio::test]
    async fn test_keepalive_measures_rtt_and_holds_idle_off() {
        let transport = MemoryTransport::new();
        let options = SessionOptions {
            ping_interval: Some(Duration::from_millis(10)),
            idle_timeout: Some(Duration::from_millis(80)),
            ..fast_options()
        };
        let (session, mut notices) = observed(&transport, options);
        assert_eq!(next_notice(&mut notices).await.to, SessionState::Active);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(session.is_active());
        assert!(session.stats().last_rtt.is_some());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lowering_budget_on_live_session() {
        let transport = MemoryTransport::new();
        let (session, _notices) = observed(&transport, fast_options());
        timeout(WAIT, session.wait_active()).await.unwrap().unwrap();

        session.set_reconnect_budget(1);
        assert_eq!(session.reconnect_budget(), 1);

        transport.go_down();
        let status = wait_dead(&session).await;
        assert_eq!(status.cause, Some(DeathCause::Exhausted { attempts: 1 }));
    }
}
