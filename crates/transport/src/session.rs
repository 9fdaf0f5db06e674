//! Connection lifecycle of one logical session, kept free of I/O.
//!
//! ```text
//! Disconnected ──start──> Connecting ──open──> Open(Socket)
//!                             ▲                   │ error / unclean close
//!                             └── retry (backoff) ┤
//!                                                 │ budget spent
//!                              Open(fallback) <───┘ + periodic socket probe
//! ```
//!
//! The driver feeds channel events in and executes the returned [`Action`]s.

use crate::backoff::Backoff;
use crate::config::TransportConfig;
use std::fmt;
use std::time::Duration;

/// Channel kind carrying inbound batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Socket,
    Push,
    Polling,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Push => "push",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason attached to a channel close. The named ones are the client's own
/// deliberate closes and never trigger reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    RouteChange,
    TransportSwitch,
    ManualRestart,
    Other(String),
}

impl CloseReason {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "route-change" => Self::RouteChange,
            "transport-switch" => Self::TransportSwitch,
            "manual-restart" => Self::ManualRestart,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RouteChange => "route-change",
            Self::TransportSwitch => "transport-switch",
            Self::ManualRestart => "manual-restart",
            Self::Other(reason) => reason,
        }
    }

    pub fn is_intentional(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open(Mode),
    Closed { clean: bool },
}

/// Work the driver must perform after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a channel now
    Connect(Mode),
    /// Reopen the socket after a delay
    ReconnectAfter(Duration),
    /// Start the fallback channel after a delay (zero for immediately)
    StartFallback { mode: Mode, delay: Duration },
    StopFallback,
    /// Try the socket again after a delay without touching the fallback
    ScheduleProbe(Duration),
    CancelProbe,
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    socket_enabled: bool,
    max_retries: u32,
    fallback: Mode,
    probe_interval: Duration,
    socket_backoff: Backoff,
    fallback_backoff: Backoff,
    degraded: bool,
}

impl SessionMachine {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            socket_enabled: config.socket_enabled,
            max_retries: config.max_retries,
            fallback: config.fallback.mode(),
            probe_interval: config.probe_interval(),
            socket_backoff: Backoff::new(config.backoff_base(), config.backoff_max()),
            fallback_backoff: Backoff::new(config.backoff_base(), config.backoff_max()),
            degraded: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while batches arrive over a fallback instead of the socket.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// The socket is open; edits can go over it and inputs need no debounce.
    pub fn is_realtime(&self) -> bool {
        self.state == SessionState::Open(Mode::Socket)
    }

    /// Begin a fresh session, forgetting retry counters.
    pub fn start(&mut self) -> Vec<Action> {
        self.socket_backoff.reset();
        self.fallback_backoff.reset();
        self.state = SessionState::Connecting;
        if self.socket_enabled {
            self.degraded = false;
            vec![Action::Connect(Mode::Socket)]
        } else {
            self.degraded = true;
            vec![Action::StartFallback {
                mode: self.fallback,
                delay: Duration::ZERO,
            }]
        }
    }

    /// Teardown before a route change or shutdown.
    pub fn stop(&mut self) {
        self.state = SessionState::Closed { clean: true };
        self.degraded = false;
    }

    pub fn on_open(&mut self, mode: Mode) -> Vec<Action> {
        if mode == Mode::Socket {
            self.socket_backoff.reset();
            self.state = SessionState::Open(Mode::Socket);
            if self.degraded {
                log::info!("Socket is back, leaving the {} fallback", self.fallback);
                self.degraded = false;
                return vec![Action::StopFallback, Action::CancelProbe];
            }
            return Vec::new();
        }
        self.fallback_backoff.reset();
        if self.degraded && !self.is_realtime() {
            self.state = SessionState::Open(mode);
        }
        Vec::new()
    }

    pub fn on_close(&mut self, mode: Mode, clean: bool, reason: &CloseReason) -> Vec<Action> {
        if clean && reason.is_intentional() {
            log::debug!("{mode} closed on purpose ({reason})");
            if self.state == SessionState::Open(mode) {
                self.state = SessionState::Closed { clean: true };
            }
            return Vec::new();
        }

        match mode {
            Mode::Socket if self.degraded => {
                log::debug!("Socket probe failed ({reason})");
                vec![Action::ScheduleProbe(self.probe_interval)]
            }
            Mode::Socket => {
                self.state = SessionState::Closed { clean };
                if self.socket_backoff.attempts() < self.max_retries {
                    let delay = self.socket_backoff.next_delay();
                    log::info!(
                        "Socket closed ({reason}), retry {}/{} in {delay:?}",
                        self.socket_backoff.attempts(),
                        self.max_retries
                    );
                    self.state = SessionState::Connecting;
                    vec![Action::ReconnectAfter(delay)]
                } else {
                    log::warn!(
                        "Socket unavailable after {} retries, falling back to {}",
                        self.max_retries,
                        self.fallback
                    );
                    self.degraded = true;
                    self.state = SessionState::Connecting;
                    vec![
                        Action::StartFallback {
                            mode: self.fallback,
                            delay: Duration::ZERO,
                        },
                        Action::ScheduleProbe(self.probe_interval),
                    ]
                }
            }
            fallback if self.degraded => {
                if self.state == SessionState::Open(fallback) {
                    self.state = SessionState::Closed { clean };
                }
                let delay = self.fallback_backoff.next_delay();
                log::warn!("{fallback} channel dropped ({reason}), restarting in {delay:?}");
                vec![Action::StartFallback {
                    mode: fallback,
                    delay,
                }]
            }
            fallback => {
                log::debug!("Ignoring close of inactive {fallback} channel");
                Vec::new()
            }
        }
    }

    /// Probe timer fired.
    pub fn on_probe(&mut self) -> Vec<Action> {
        if self.degraded && self.socket_enabled {
            vec![Action::Connect(Mode::Socket)]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackMode;
    use pretty_assertions::assert_eq;

    fn machine(max_retries: u32) -> SessionMachine {
        SessionMachine::new(&TransportConfig {
            max_retries,
            fallback: FallbackMode::Polling,
            ..Default::default()
        })
    }

    fn error() -> CloseReason {
        CloseReason::Other("connection refused".to_string())
    }

    #[test]
    fn close_reasons() {
        assert_eq!(CloseReason::parse("route-change"), CloseReason::RouteChange);
        assert!(CloseReason::parse("manual-restart").is_intentional());
        assert!(!CloseReason::parse("going away").is_intentional());
        assert_eq!(CloseReason::TransportSwitch.to_string(), "transport-switch");
    }

    #[test]
    fn open_resets_retries() {
        let mut m = machine(3);
        assert_eq!(m.start(), vec![Action::Connect(Mode::Socket)]);
        assert_eq!(
            m.on_close(Mode::Socket, false, &error()),
            vec![Action::ReconnectAfter(Duration::from_millis(500))]
        );
        assert_eq!(
            m.on_close(Mode::Socket, false, &error()),
            vec![Action::ReconnectAfter(Duration::from_millis(1000))]
        );
        assert!(m.on_open(Mode::Socket).is_empty());
        assert!(m.is_realtime());
        assert_eq!(
            m.on_close(Mode::Socket, false, &error()),
            vec![Action::ReconnectAfter(Duration::from_millis(500))]
        );
    }

    #[test]
    fn intentional_close_does_not_reconnect() {
        let mut m = machine(3);
        m.start();
        m.on_open(Mode::Socket);
        assert!(m
            .on_close(Mode::Socket, true, &CloseReason::RouteChange)
            .is_empty());
        assert_eq!(m.state(), SessionState::Closed { clean: true });

        m.start();
        m.on_open(Mode::Socket);
        assert_eq!(
            m.on_close(Mode::Socket, true, &CloseReason::Other("bye".into())).len(),
            1,
            "a clean close without a known reason still reconnects"
        );
    }

    #[test]
    fn spent_budget_degrades_then_probe_promotes() {
        let mut m = machine(1);
        m.start();
        assert_eq!(m.on_close(Mode::Socket, false, &error()).len(), 1);
        assert_eq!(
            m.on_close(Mode::Socket, false, &error()),
            vec![
                Action::StartFallback {
                    mode: Mode::Polling,
                    delay: Duration::ZERO
                },
                Action::ScheduleProbe(Duration::from_secs(15)),
            ]
        );
        assert!(m.is_degraded());
        assert!(m.on_open(Mode::Polling).is_empty());
        assert_eq!(m.state(), SessionState::Open(Mode::Polling));
        assert!(!m.is_realtime());

        assert_eq!(m.on_probe(), vec![Action::Connect(Mode::Socket)]);
        assert_eq!(
            m.on_close(Mode::Socket, false, &error()),
            vec![Action::ScheduleProbe(Duration::from_secs(15))]
        );
        assert_eq!(m.state(), SessionState::Open(Mode::Polling));

        assert_eq!(m.on_probe(), vec![Action::Connect(Mode::Socket)]);
        assert_eq!(
            m.on_open(Mode::Socket),
            vec![Action::StopFallback, Action::CancelProbe]
        );
        assert!(m.is_realtime());
        assert!(!m.is_degraded());
    }

    #[test]
    fn dropped_fallback_restarts_with_backoff() {
        let mut m = machine(0);
        m.start();
        m.on_close(Mode::Socket, false, &error());
        m.on_open(Mode::Polling);
        assert_eq!(
            m.on_close(Mode::Polling, false, &error()),
            vec![Action::StartFallback {
                mode: Mode::Polling,
                delay: Duration::from_millis(500)
            }]
        );
        assert_eq!(m.state(), SessionState::Closed { clean: false });
    }

    #[test]
    fn socket_disabled_starts_on_fallback() {
        let mut m = SessionMachine::new(&TransportConfig {
            socket_enabled: false,
            ..Default::default()
        });
        assert_eq!(
            m.start(),
            vec![Action::StartFallback {
                mode: Mode::Push,
                delay: Duration::ZERO
            }]
        );
        assert!(m.on_probe().is_empty());
    }
}
