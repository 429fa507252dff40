use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Dialer};
use crate::error::{Error, WorkError};
use crate::reconnect::backoff::Backoff;
use crate::reconnect::config::ReconnectConfig;
use crate::reconnect::state::ManagerState;
use crate::target::Target;
use crate::transport::GrpcDialer;

/// The connection type a manager hands to its work routine.
pub type ManagedConnection<D> = Arc<Connection<<D as Dialer>::Transport>>;

/// Keeps a working connection to one target.
///
/// The acquisition task dials and runs the caller's work routine until both succeed,
/// then publishes the connection as current. The supervision loop, driven by
/// [`start`](Self::start), reacts to ready signals, reconnect requests and
/// [`stop`](Self::stop). Handles are cheap to clone and share one manager.
pub struct AutoReconnectingConnection<D: Dialer = GrpcDialer> {
    inner: Arc<Inner<D>>,
}

impl<D: Dialer> Clone for AutoReconnectingConnection<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<D: Dialer> {
    target: Target,
    config: ReconnectConfig,
    dialer: D,

    /// Written only by the acquisition task, cleared once on shutdown.
    current: watch::Sender<Option<ManagedConnection<D>>>,
    state: watch::Sender<ManagerState>,

    ready: mpsc::Sender<()>,
    reconnect: mpsc::Sender<()>,
    signals: Mutex<Option<Signals>>,

    done: CancellationToken,
    dial_attempts: AtomicU64,
    acquisitions: AtomicU64,
}

/// Receiving ends of the supervision signals, claimed by the first `start`.
struct Signals {
    ready: mpsc::Receiver<()>,
    reconnect: mpsc::Receiver<()>,
}

impl AutoReconnectingConnection<GrpcDialer> {
    /// Parse `address` and validate `config`. Nothing is dialed until
    /// [`start`](Self::start).
    pub fn new(address: &str, config: ReconnectConfig) -> Result<Self, Error> {
        let target = Target::parse(address)?;
        Self::with_dialer(target, config, GrpcDialer)
    }
}

impl<D: Dialer> AutoReconnectingConnection<D> {
    /// Like [`new`](AutoReconnectingConnection::new), with a parsed target and a custom dialer.
    pub fn with_dialer(target: Target, config: ReconnectConfig, dialer: D) -> Result<Self, Error> {
        config.validate()?;

        let (ready, ready_rx) = mpsc::channel(1);
        let (reconnect, reconnect_rx) = mpsc::channel(1);
        let (current, _) = watch::channel(None);
        let (state, _) = watch::channel(ManagerState::Acquiring);

        Ok(Self {
            inner: Arc::new(Inner {
                target,
                config,
                dialer,
                current,
                state,
                ready,
                reconnect,
                signals: Mutex::new(Some(Signals {
                    ready: ready_rx,
                    reconnect: reconnect_rx,
                })),
                done: CancellationToken::new(),
                dial_attempts: AtomicU64::new(0),
                acquisitions: AtomicU64::new(0),
            }),
        })
    }

    /// The target this manager dials.
    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &ReconnectConfig {
        &self.inner.config
    }

    /// Acquire a connection and supervise it until [`stop`](Self::stop).
    ///
    /// `work` runs once per candidate connection. `Ok` installs the connection as
    /// current. [`WorkError::Routine`] retries on the same connection while it stays
    /// valid; any other error discards it and redials.
    ///
    /// Returns once the manager has stopped and its current connection is closed. May
    /// only be called once per manager.
    pub async fn start<F, Fut>(&self, work: F) -> Result<(), Error>
    where
        F: Fn(ManagedConnection<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        let inner = &self.inner;
        let Signals {
            mut ready,
            mut reconnect,
        } = inner
            .take_signals()
            .ok_or_else(|| Error::AlreadyStarted(inner.target.address().to_owned()))?;

        info!(address = %inner.target, "Starting connection manager");
        let work = Arc::new(work);
        let mut acquisition = inner.spawn_acquisition(Arc::clone(&work));

        loop {
            tokio::select! {
                biased;
                _ = inner.done.cancelled() => break,
                Some(()) = ready.recv() => {
                    inner.transition(ManagerState::Active);
                }
                Some(()) = reconnect.recv() => {
                    if inner.state() == ManagerState::Acquiring {
                        debug!(
                            address = %inner.target,
                            "Ignoring reconnect request while acquiring"
                        );
                        continue;
                    }
                    inner.transition(ManagerState::Reconnecting);

                    let recovered = tokio::select! {
                        biased;
                        _ = inner.done.cancelled() => break,
                        recovered = inner.wait_current_ready() => recovered,
                    };
                    if recovered {
                        info!(address = %inner.target, "Connection ready again");
                        inner.transition(ManagerState::Active);
                        continue;
                    }

                    warn!(
                        address = %inner.target,
                        ceiling = ?inner.config.readiness_ceiling,
                        "Connection not ready within readiness ceiling"
                    );
                    if inner.config.redial_on_failed_wait && acquisition.is_finished() {
                        inner.transition(ManagerState::Acquiring);
                        acquisition = inner.spawn_acquisition(Arc::clone(&work));
                    }
                }
            }
        }

        inner.shutdown(acquisition).await;
        Ok(())
    }

    /// Signal the manager to stop. Idempotent and non-blocking; await
    /// [`stopped`](Self::stopped) or the `start` future to observe completion.
    pub fn stop(&self) {
        if !self.inner.done.is_cancelled() {
            info!(address = %self.inner.target, "Stop requested");
            self.inner.done.cancel();
        }
    }

    /// Ask the supervision loop to re-check the current connection. Requests made
    /// while one is already pending are coalesced.
    pub fn request_reconnect(&self) {
        if self.inner.reconnect.try_send(()).is_err() {
            debug!(address = %self.inner.target, "Reconnect request already pending");
        }
    }

    /// True iff there is a current connection and it reports ready.
    pub fn is_valid(&self) -> bool {
        self.inner
            .current
            .borrow()
            .as_ref()
            .is_some_and(|connection| connection.is_valid())
    }

    /// The current connection, if one has been acquired.
    ///
    /// The returned handle may be closed at any time by a later acquisition or by
    /// shutdown; check [`Connection::is_valid`] before use.
    pub fn current(&self) -> Option<ManagedConnection<D>> {
        self.inner.current.borrow().clone()
    }

    /// The current manager state.
    pub fn state(&self) -> ManagerState {
        self.inner.state()
    }

    /// Observe manager state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.inner.state.subscribe()
    }

    /// Observed manager states, starting with the current one. Ends after
    /// [`ManagerState::Stopped`]. Intermediate states may be skipped by slow consumers.
    pub fn state_changes(&self) -> Pin<Box<dyn Stream<Item = ManagerState> + Send>> {
        let mut states = self.inner.state.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                let state = *states.borrow_and_update();
                yield state;
                if state.is_terminal() || states.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Resolves once the manager has fully stopped.
    pub async fn stopped(&self) {
        let mut states = self.inner.state.subscribe();
        let _ = states.wait_for(ManagerState::is_terminal).await;
    }

    /// Total dial attempts made so far.
    pub fn dial_attempts(&self) -> u64 {
        self.inner.dial_attempts.load(Ordering::Acquire)
    }

    /// Total connections installed as current so far.
    pub fn acquisitions(&self) -> u64 {
        self.inner.acquisitions.load(Ordering::Acquire)
    }
}

impl<D: Dialer> Inner<D> {
    fn take_signals(&self) -> Option<Signals> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    fn transition(&self, next: ManagerState) {
        let target = &self.target;
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            if !state.can_transition_to(next) {
                debug!(
                    address = %target,
                    from = %state,
                    to = %next,
                    "Ignoring invalid state transition"
                );
                return false;
            }
            info!(address = %target, from = %state, to = %next, "Connection manager state changed");
            *state = next;
            true
        });
    }

    fn spawn_acquisition<F, Fut>(self: &Arc<Self>, work: Arc<F>) -> JoinHandle<()>
    where
        F: Fn(ManagedConnection<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        tokio::spawn(Arc::clone(self).acquire(work))
    }

    /// Dial and run `work` until both succeed, then install the connection.
    async fn acquire<F, Fut>(self: Arc<Self>, work: Arc<F>)
    where
        F: Fn(ManagedConnection<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        let mut first = true;

        'dial: loop {
            if first {
                first = false;
                if self.done.is_cancelled() {
                    return;
                }
            } else if !self.pause(&mut backoff).await {
                return;
            }

            let attempt = self.dial_attempts.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(address = %self.target, attempt, "Dialing");

            let connection = match Connection::establish(
                &self.dialer,
                &self.target,
                &self.config.connection,
                &self.done,
            )
            .await
            {
                Ok(connection) => Arc::new(connection),
                Err(e) if e.is_cancelled() => return,
                Err(e) => {
                    warn!(address = %self.target, attempt, error = %e, "Dial failed, retrying");
                    continue;
                }
            };

            loop {
                let outcome = tokio::select! {
                    biased;
                    _ = self.done.cancelled() => {
                        connection.close();
                        return;
                    }
                    outcome = (*work)(Arc::clone(&connection)) => outcome,
                };

                match outcome {
                    Ok(()) => {
                        self.install(connection);
                        return;
                    }
                    Err(WorkError::Routine(e)) if connection.is_valid() => {
                        warn!(
                            address = %self.target,
                            attempt,
                            error = %e,
                            "Work routine failed, retrying on the same connection"
                        );
                        if !self.pause(&mut backoff).await {
                            connection.close();
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(
                            address = %self.target,
                            attempt,
                            error = %e,
                            "Work routine failed, redialing"
                        );
                        connection.close();
                        continue 'dial;
                    }
                }
            }
        }
    }

    /// Sleep for the next backoff delay. Returns `false` if shutdown fired first.
    ///
    /// A zero delay still yields, so a retry loop that never awaits cannot starve the
    /// runtime.
    async fn pause(&self, backoff: &mut Backoff) -> bool {
        let delay = backoff.next_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return !self.done.is_cancelled();
        }
        debug!(address = %self.target, delay = ?delay, "Backing off");
        tokio::select! {
            biased;
            _ = self.done.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Publish `connection` as current, then release the one it replaces.
    fn install(&self, connection: ManagedConnection<D>) {
        let previous = self.current.send_replace(Some(connection));
        let acquisitions = self.acquisitions.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = previous {
            previous.close();
        }
        info!(address = %self.target, acquisitions, "Connection acquired");
        let _ = self.ready.try_send(());
    }

    async fn wait_current_ready(&self) -> bool {
        let current = self.current.borrow().clone();
        match current {
            Some(connection) => {
                connection
                    .wait_until_ready(self.config.readiness_ceiling)
                    .await
            }
            None => false,
        }
    }

    async fn shutdown(&self, acquisition: JoinHandle<()>) {
        if let Err(e) = acquisition.await {
            warn!(address = %self.target, error = %e, "Acquisition task ended abnormally");
        }
        if let Some(connection) = self.current.send_replace(None) {
            connection.close();
        }
        self.transition(ManagerState::Stopped);
        info!(address = %self.target, "Connection manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::connection::ConnectivityState;
    use crate::reconnect::backoff::BackoffConfig;
    use crate::testing::{DialStep, ScriptedDialer, ScriptedTransport};

    type TestManager = AutoReconnectingConnection<Arc<ScriptedDialer>>;

    fn target() -> Target {
        Target::parse("grpc://svc.internal:50051").unwrap()
    }

    fn manager(
        script: impl IntoIterator<Item = DialStep>,
        config: ReconnectConfig,
    ) -> (TestManager, Arc<ScriptedDialer>) {
        let dialer = Arc::new(ScriptedDialer::new(script));
        let manager =
            AutoReconnectingConnection::with_dialer(target(), config, Arc::clone(&dialer)).unwrap();
        (manager, dialer)
    }

    async fn accept(_connection: Arc<Connection<ScriptedTransport>>) -> Result<(), WorkError> {
        Ok(())
    }

    fn spawn_accepting(manager: &TestManager) -> JoinHandle<Result<(), Error>> {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start(accept).await })
    }

    async fn wait_for_state(manager: &TestManager, expected: ManagerState) {
        let mut states = manager.subscribe_state();
        tokio::time::timeout(Duration::from_secs(600), states.wait_for(|state| *state == expected))
            .await
            .expect("state not reached")
            .expect("manager dropped");
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(600), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_before_first_acquisition() {
        let (manager, _dialer) = manager([DialStep::Hang], ReconnectConfig::default());
        assert!(!manager.is_valid());
        assert!(manager.current().is_none());
        assert_eq!(manager.state(), ManagerState::Acquiring);
        assert_eq!(manager.dial_attempts(), 0);
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(matches!(
            AutoReconnectingConnection::new("grpc://", ReconnectConfig::default()),
            Err(Error::Address(_))
        ));
        assert!(matches!(
            AutoReconnectingConnection::new(
                "grpc://svc.internal:50051",
                ReconnectConfig::default().with_readiness_ceiling(Duration::ZERO)
            ),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_failure_then_success() {
        let script = [DialStep::Fail, DialStep::Ready];
        let (manager, dialer) = manager(script, ReconnectConfig::default());
        let task = spawn_accepting(&manager);

        wait_for_state(&manager, ManagerState::Active).await;
        assert!(manager.is_valid());
        assert_eq!(dialer.attempts(), 2);
        assert_eq!(manager.dial_attempts(), 2);
        assert_eq!(manager.acquisitions(), 1);

        manager.stop();
        task.await.unwrap().unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_errors_redial_until_work_succeeds() {
        let (manager, dialer) = manager([DialStep::Ready], ReconnectConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let task = {
            let manager = manager.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                manager
                    .start(move |_connection| {
                        let call = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if call < 3 {
                                Err(WorkError::connection(io::Error::other("handshake rejected")))
                            } else {
                                Ok(())
                            }
                        }
                    })
                    .await
            })
        };

        wait_for_state(&manager, ManagerState::Active).await;
        assert_eq!(dialer.attempts(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(dialer.closes(), 3);
        assert!(manager.is_valid());

        manager.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_routine_errors_retry_on_same_connection() {
        let (manager, dialer) = manager([DialStep::Ready], ReconnectConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let task = {
            let manager = manager.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                manager
                    .start(move |_connection| {
                        let call = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if call < 3 {
                                Err(WorkError::routine(io::Error::other("not yet")))
                            } else {
                                Ok(())
                            }
                        }
                    })
                    .await
            })
        };

        wait_for_state(&manager, ManagerState::Active).await;
        assert_eq!(dialer.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(dialer.closes(), 0);

        manager.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_routine_error_on_broken_connection_redials() {
        let (manager, dialer) = manager([DialStep::Ready], ReconnectConfig::default());

        let task = {
            let manager = manager.clone();
            let dialer = Arc::clone(&dialer);
            tokio::spawn(async move {
                manager
                    .start(move |_connection| {
                        let first = dialer.attempts() == 1;
                        if first && let Some(handle) = dialer.transport(0) {
                            handle.set_state(ConnectivityState::TransientFailure);
                        }
                        async move {
                            if first {
                                Err(WorkError::routine(io::Error::other("stream reset")))
                            } else {
                                Ok(())
                            }
                        }
                    })
                    .await
            })
        };

        wait_for_state(&manager, ManagerState::Active).await;
        assert_eq!(dialer.attempts(), 2);
        assert_eq!(dialer.closes(), 1);

        manager.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_current_exactly_once() {
        let (manager, dialer) = manager([DialStep::Ready], ReconnectConfig::default());
        let task = spawn_accepting(&manager);
        wait_for_state(&manager, ManagerState::Active).await;

        manager.stop();
        manager.stop();
        task.await.unwrap().unwrap();
        manager.stop();

        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(!manager.is_valid());
        assert!(manager.current().is_none());
        assert_eq!(dialer.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_hanging_dial() {
        let (manager, dialer) = manager([DialStep::Hang], ReconnectConfig::default());
        let task = spawn_accepting(&manager);
        wait_until(|| dialer.attempts() == 1).await;

        manager.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("manager did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert_eq!(manager.acquisitions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff() {
        let backoff = BackoffConfig::fixed(Duration::from_secs(3600));
        let config = ReconnectConfig::default().with_backoff(backoff);
        let (manager, dialer) = manager([DialStep::Fail], config);
        let task = spawn_accepting(&manager);
        wait_until(|| dialer.attempts() == 1).await;

        manager.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("manager did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(dialer.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_routine_failures_without_backoff_yield() {
        let config = ReconnectConfig::default().with_backoff(BackoffConfig::none());
        let (manager, dialer) = manager([DialStep::Ready], config);
        let calls = Arc::new(AtomicUsize::new(0));

        let task = {
            let manager = manager.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                manager
                    .start(move |_connection| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(WorkError::routine(io::Error::other("always busy"))) }
                    })
                    .await
            })
        };

        // Single-threaded runtime: this loop only advances if the retry loop yields.
        while calls.load(Ordering::SeqCst) < 100 {
            tokio::task::yield_now().await;
        }
        manager.stop();
        task.await.unwrap().unwrap();

        assert_eq!(dialer.attempts(), 1);
        assert_eq!(dialer.closes(), 1);
        assert_eq!(manager.acquisitions(), 0);
        assert_eq!(manager.state(), ManagerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_resolves() {
        let (manager, _dialer) = manager([DialStep::Ready], ReconnectConfig::default());
        let task = spawn_accepting(&manager);
        wait_for_state(&manager, ManagerState::Active).await;

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.stopped().await })
        };
        manager.stop();
        waiter.await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_recovers_when_connection_becomes_ready() {
        let (manager, dialer) = manager([DialStep::Ready], ReconnectConfig::default());
        let task = spawn_accepting(&manager);
        wait_for_state(&manager, ManagerState::Active).await;

        let handle = dialer.transport(0).unwrap();
        handle.set_state(ConnectivityState::TransientFailure);
        assert!(!manager.is_valid());

        manager.request_reconnect();
        wait_for_state(&manager, ManagerState::Reconnecting).await;

        handle.set_state(ConnectivityState::Ready);
        wait_for_state(&manager, ManagerState::Active).await;
        assert!(manager.is_valid());
        assert_eq!(dialer.attempts(), 1);

        manager.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_readiness_wait_does_not_redial_by_default() {
        let config = ReconnectConfig::default().with_readiness_ceiling(Duration::from_secs(10));
        let (manager, dialer) = manager([DialStep::Ready], config);
        let task = spawn_accepting(&manager);
        wait_for_state(&manager, ManagerState::Active).await;

        dialer.transport(0).unwrap().set_state(ConnectivityState::TransientFailure);
        manager.request_reconnect();
        wait_for_state(&manager, ManagerState::Reconnecting).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(manager.state(), ManagerState::Reconnecting);
        assert_eq!(dialer.attempts(), 1);
        assert!(!manager.is_valid());

        manager.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_readiness_wait_redials_when_enabled() {
        let config = ReconnectConfig::default()
            .with_readiness_ceiling(Duration::from_secs(10))
            .with_redial_on_failed_wait(true);
        let (manager, dialer) = manager([DialStep::Ready], config);
        let task = spawn_accepting(&manager);
        wait_for_state(&manager, ManagerState::Active).await;

        dialer.transport(0).unwrap().set_state(ConnectivityState::TransientFailure);
        manager.request_reconnect();

        wait_until(|| manager.acquisitions() == 2).await;
        wait_for_state(&manager, ManagerState::Active).await;
        assert_eq!(dialer.attempts(), 2);
        assert_eq!(dialer.closes(), 1);
        assert!(manager.is_valid());

        manager.stop();
        task.await.unwrap().unwrap();
        assert_eq!(dialer.closes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_ignored_while_acquiring() {
        let (manager, dialer) = manager([DialStep::Hang], ReconnectConfig::default());
        let task = spawn_accepting(&manager);
        wait_until(|| dialer.attempts() == 1).await;

        manager.request_reconnect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.state(), ManagerState::Acquiring);

        manager.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let (manager, _dialer) = manager([DialStep::Ready], ReconnectConfig::default());
        let task = spawn_accepting(&manager);
        wait_for_state(&manager, ManagerState::Active).await;

        let err = manager.start(accept).await.unwrap_err();
        assert!(matches!(
            err,
            Error::AlreadyStarted(address) if address == "grpc://svc.internal:50051"
        ));

        manager.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start() {
        let (manager, dialer) = manager([DialStep::Ready], ReconnectConfig::default());
        manager.stop();
        manager.start(accept).await.unwrap();

        assert_eq!(manager.state(), ManagerState::Stopped);
        assert_eq!(dialer.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_end_at_stopped() {
        let (manager, _dialer) = manager([DialStep::Ready], ReconnectConfig::default());
        let collector = tokio::spawn(manager.state_changes().collect::<Vec<_>>());
        let task = spawn_accepting(&manager);
        wait_for_state(&manager, ManagerState::Active).await;

        manager.stop();
        task.await.unwrap().unwrap();

        let states = collector.await.unwrap();
        assert_eq!(states.first(), Some(&ManagerState::Acquiring));
        assert_eq!(states.last(), Some(&ManagerState::Stopped));
    }
}
