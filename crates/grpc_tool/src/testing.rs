//! Scripted dialer and transport for exercising connection logic without a network.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::connection::{ConnectionConfig, ConnectivityState, Dialer, Transport};
use crate::error::{DialError, DialErrorKind};
use crate::target::Target;

/// What the next dial does. Once the script is exhausted every dial is `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DialStep {
    Ready,
    NeverReady,
    Fail,
    Hang,
}

pub(crate) struct ScriptedDialer {
    script: Mutex<VecDeque<DialStep>>,
    attempts: AtomicUsize,
    closes: Arc<AtomicUsize>,
    transports: Mutex<Vec<TransportHandle>>,
}

impl ScriptedDialer {
    pub(crate) fn new(script: impl IntoIterator<Item = DialStep>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            transports: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Handle to the `index`-th transport handed out.
    pub(crate) fn transport(&self, index: usize) -> Option<TransportHandle> {
        self.transports.lock().unwrap().get(index).cloned()
    }
}

impl Dialer for ScriptedDialer {
    type Transport = ScriptedTransport;

    async fn dial(
        &self,
        target: &Target,
        _config: &ConnectionConfig,
    ) -> Result<ScriptedTransport, DialError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DialStep::Ready);

        let initial = match step {
            DialStep::Ready => ConnectivityState::Ready,
            DialStep::NeverReady => ConnectivityState::Connecting,
            DialStep::Fail => {
                return Err(DialError::new(
                    target,
                    DialErrorKind::Io(io::Error::from(io::ErrorKind::ConnectionRefused)),
                ));
            }
            DialStep::Hang => std::future::pending().await,
        };

        let (tx, _) = watch::channel(initial);
        let handle = TransportHandle { tx: Arc::new(tx) };
        self.transports.lock().unwrap().push(handle.clone());

        Ok(ScriptedTransport {
            handle,
            closes: Arc::clone(&self.closes),
        })
    }
}

#[derive(Clone)]
pub(crate) struct TransportHandle {
    tx: Arc<watch::Sender<ConnectivityState>>,
}

impl TransportHandle {
    pub(crate) fn set_state(&self, state: ConnectivityState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }
}

pub(crate) struct ScriptedTransport {
    handle: TransportHandle,
    closes: Arc<AtomicUsize>,
}

impl Transport for ScriptedTransport {
    fn state(&self) -> ConnectivityState {
        self.handle.state()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.handle.tx.subscribe()
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.handle.set_state(ConnectivityState::Shutdown);
    }
}
