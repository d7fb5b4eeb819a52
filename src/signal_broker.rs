// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The process-wide signal broker.
//!
//! A single [`SignalBroker`] instance lives behind a `OnceLock` for the life
//! of the process. It installs OS signal handlers once (on the first
//! subscription) and fans graceful/forceful shutdown intents out to every
//! subscribed pool, escalating graceful to forceful on a second signal or a
//! 5s timeout, then re-raises the original signal to itself so a process
//! supervisor still observes the expected termination signal.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::config::TermSignal;
use crate::error::SignalBrokerError;

const ESCALATION_TIMEOUT: Duration = Duration::from_secs(5);
const FORCEFUL_REMOVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// A shutdown intent delivered to a subscriber.
#[derive(Debug, Clone)]
pub enum ShutdownIntent {
    Graceful(Option<Arc<str>>),
    Forceful(Arc<str>),
}

#[derive(Debug)]
struct Subscriber {
    intent_tx: mpsc::UnboundedSender<ShutdownIntent>,
}

#[derive(Debug)]
struct BrokerState {
    installed: bool,
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    graceful_latch: bool,
    forceful_latch: bool,
    signal_task: Option<tokio::task::JoinHandle<()>>,
    /// Ids that still owe an ack for the in-flight graceful (or forceful)
    /// round; `None` when no round is in flight.
    awaiting_ack: Option<HashSet<u64>>,
    ack_tx: Option<mpsc::UnboundedSender<u64>>,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            installed: false,
            next_id: 0,
            subscribers: HashMap::new(),
            graceful_latch: false,
            forceful_latch: false,
            signal_task: None,
            awaiting_ack: None,
            ack_tx: None,
        }
    }
}

/// The process-wide signal broker. Access via [`SignalBroker::global`].
#[derive(Debug)]
pub struct SignalBroker {
    state: Mutex<BrokerState>,
}

static GLOBAL: std::sync::OnceLock<SignalBroker> = std::sync::OnceLock::new();
static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(0);

impl SignalBroker {
    pub fn global() -> &'static SignalBroker {
        GLOBAL.get_or_init(|| SignalBroker {
            state: Mutex::new(BrokerState::new()),
        })
    }

    /// Subscribes to both shutdown intents. The first subscriber installs OS
    /// signal handlers; later subscribers reuse them. Fails with
    /// [`SignalBrokerError::AlreadyShuttingDown`] if either shutdown latch is
    /// already set.
    pub async fn subscribe(
        &'static self,
        signals: &[TermSignal],
    ) -> Result<SignalSubscription, SignalBrokerError> {
        let mut state = self.state.lock().await;
        if state.graceful_latch || state.forceful_latch {
            return Err(SignalBrokerError::AlreadyShuttingDown);
        }

        let id = NEXT_SUB_ID.fetch_add(1, Ordering::Relaxed);
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        state.subscribers.insert(id, Subscriber { intent_tx });
        state.next_id = state.next_id.max(id + 1);

        if !state.installed {
            state.installed = true;
            let signals = signals.to_vec();
            state.signal_task = Some(tokio::spawn(run_signal_task(self, signals)));
            info!("signal broker installed OS handlers");
        }
        drop(state);

        Ok(SignalSubscription {
            id,
            broker: self,
            intent_rx,
            released: false,
        })
    }

    async fn release(&'static self, id: u64) {
        let mut state = self.state.lock().await;
        state.subscribers.remove(&id);
        if let Some(awaiting) = state.awaiting_ack.as_mut() {
            awaiting.remove(&id);
        }
        if state.subscribers.is_empty() && state.installed {
            if state.graceful_latch || state.forceful_latch {
                warn!("last signal-broker subscriber released during shutdown; keeping OS handlers installed");
            } else {
                state.installed = false;
                if let Some(task) = state.signal_task.take() {
                    task.abort();
                }
                info!("signal broker uninstalled OS handlers");
            }
        }
    }

    async fn ack(&'static self, id: u64) {
        let state = self.state.lock().await;
        if let Some(tx) = &state.ack_tx {
            let _ = tx.send(id);
        }
    }

    async fn emit_graceful(&'static self, message: Option<Arc<str>>) -> (HashSet<u64>, mpsc::UnboundedReceiver<u64>) {
        let mut state = self.state.lock().await;
        state.graceful_latch = true;
        let ids: HashSet<u64> = state.subscribers.keys().copied().collect();
        for sub in state.subscribers.values() {
            let _ = sub.intent_tx.send(ShutdownIntent::Graceful(message.clone()));
        }
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        state.ack_tx = Some(ack_tx);
        state.awaiting_ack = Some(ids.clone());
        (ids, ack_rx)
    }

    async fn emit_forceful(&'static self, message: Arc<str>) -> (HashSet<u64>, mpsc::UnboundedReceiver<u64>) {
        let mut state = self.state.lock().await;
        state.forceful_latch = true;
        let ids: HashSet<u64> = state.subscribers.keys().copied().collect();
        for sub in state.subscribers.values() {
            let _ = sub.intent_tx.send(ShutdownIntent::Forceful(message.clone()));
        }
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        state.ack_tx = Some(ack_tx);
        state.awaiting_ack = Some(ids.clone());
        (ids, ack_rx)
    }
}

/// A handle returned by [`SignalBroker::subscribe`]. Drop (or [`Self::release`])
/// removes the subscription; the last release uninstalls OS handlers unless a
/// shutdown is in progress.
#[derive(Debug)]
pub struct SignalSubscription {
    id: u64,
    broker: &'static SignalBroker,
    intent_rx: mpsc::UnboundedReceiver<ShutdownIntent>,
    released: bool,
}

impl SignalSubscription {
    /// Awaits the next shutdown intent directed at this subscriber.
    pub async fn recv(&mut self) -> Option<ShutdownIntent> {
        self.intent_rx.recv().await
    }

    /// Acknowledges that this subscriber's reaction to the most recent
    /// intent (graceful or forceful shutdown) has completed. The broker uses
    /// this to know when it is safe to re-raise the original signal.
    pub async fn ack(&self) {
        self.broker.ack(self.id).await;
    }

    pub async fn release(mut self) {
        self.broker.release(self.id).await;
        self.released = true;
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        if !self.released {
            let broker = self.broker;
            let id = self.id;
            tokio::spawn(async move { broker.release(id).await });
        }
    }
}

#[cfg(unix)]
fn to_raw_signal(sig: TermSignal) -> libc::c_int {
    match sig {
        TermSignal::Term => libc::SIGTERM,
        TermSignal::Int => libc::SIGINT,
        TermSignal::Usr2 => libc::SIGUSR2,
    }
}

#[cfg(unix)]
async fn run_signal_task(broker: &'static SignalBroker, signals: Vec<TermSignal>) {
    use tokio::signal::unix::{signal, SignalKind};

    let kind_of = |s: TermSignal| match s {
        TermSignal::Term => SignalKind::terminate(),
        TermSignal::Int => SignalKind::interrupt(),
        TermSignal::Usr2 => SignalKind::user_defined2(),
    };

    let mut streams: Vec<_> = signals
        .iter()
        .map(|s| (*s, signal(kind_of(*s)).expect("failed to register signal handler")))
        .collect();

    let first = wait_for_any(&mut streams).await;
    info!(signal = ?first, "first termination signal received; starting graceful shutdown");

    let (mut awaiting, mut ack_rx) = broker.emit_graceful(None).await;
    let mut escalation_timer = Box::pin(tokio::time::sleep(ESCALATION_TIMEOUT));

    let escalate_signal = loop {
        if awaiting.is_empty() {
            info!("graceful shutdown acknowledged by all subscribers; re-raising original signal");
            raise(first);
            return;
        }
        tokio::select! {
            _ = &mut escalation_timer => {
                warn!("graceful shutdown escalation timer elapsed; forcing shutdown");
                break first;
            }
            second = wait_for_any(&mut streams) => {
                warn!(signal = ?second, "second termination signal received; forcing shutdown");
                break second;
            }
            Some(id) = ack_rx.recv() => {
                awaiting.remove(&id);
            }
        }
    };

    let message: Arc<str> = Arc::from(format!("received {escalate_signal:?} during graceful shutdown"));
    let (mut awaiting, mut ack_rx) = broker.emit_forceful(message).await;
    let mut removal_timer = Box::pin(tokio::time::sleep(FORCEFUL_REMOVAL_TIMEOUT));

    loop {
        if awaiting.is_empty() {
            break;
        }
        tokio::select! {
            _ = &mut removal_timer => break,
            Some(id) = ack_rx.recv() => { awaiting.remove(&id); }
            else => break,
        }
    }

    info!("forceful shutdown complete; re-raising original signal");
    raise(escalate_signal);
}

#[cfg(unix)]
async fn wait_for_any(streams: &mut [(TermSignal, tokio::signal::unix::Signal)]) -> TermSignal {
    use futures::future::select_all;

    let futures: Vec<_> = streams
        .iter_mut()
        .map(|(kind, stream)| {
            let kind = *kind;
            Box::pin(async move {
                stream.recv().await;
                kind
            })
        })
        .collect();
    let (result, _, _) = select_all(futures).await;
    result
}

#[cfg(unix)]
fn raise(signal: TermSignal) {
    let raw = to_raw_signal(signal);
    // SAFETY: `signal`/`raise` only touch process-wide signal disposition
    // and send a signal to the current process; neither touches
    // Rust-managed memory. The handler `tokio::signal::unix::signal`
    // installed stays registered for the life of the process, so without
    // restoring the default disposition first, this re-raise would just be
    // caught by that handler again instead of actually terminating the
    // process.
    unsafe {
        libc::signal(raw, libc::SIG_DFL);
        libc::raise(raw);
    }
}

#[cfg(not(unix))]
async fn run_signal_task(broker: &'static SignalBroker, _signals: Vec<TermSignal>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("ctrl-c received; starting graceful shutdown");
    let (mut awaiting, mut ack_rx) = broker.emit_graceful(None).await;
    while let Some(id) = ack_rx.recv().await {
        awaiting.remove(&id);
        if awaiting.is_empty() {
            break;
        }
    }
    std::process::exit(130);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The broker is a process-wide singleton, so exercising it end-to-end
    // has to happen in a single test: running these as separate `#[tokio::test]`
    // functions would race on the same global latches under cargo's default
    // parallel test execution.
    #[tokio::test]
    async fn broker_lifecycle() {
        let broker = SignalBroker::global();

        let sub_a = broker.subscribe(&TermSignal::ALL).await.unwrap();
        let sub_b = broker.subscribe(&TermSignal::ALL).await.unwrap();
        assert_ne!(sub_a.id, sub_b.id);

        let mut sub_a = sub_a;
        let (_ids, _rx) = broker.emit_graceful(Some(Arc::from("bye"))).await;
        let intent = sub_a.recv().await.unwrap();
        match intent {
            ShutdownIntent::Graceful(msg) => assert_eq!(msg.as_deref(), Some("bye")),
            _ => panic!("expected graceful intent"),
        }
        sub_a.ack().await;

        {
            let state = broker.state.lock().await;
            assert!(state.graceful_latch);
            assert!(!state.forceful_latch);
        }

        sub_a.release().await;
        sub_b.release().await;

        // Further subscriptions must be rejected once a latch is set.
        let err = broker.subscribe(&TermSignal::ALL).await.unwrap_err();
        assert_eq!(err, SignalBrokerError::AlreadyShuttingDown);
    }
}
