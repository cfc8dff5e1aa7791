use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shutdown request broadcast by the [`Controller`] to every [`ShutdownHandle`].
///
/// Services receiving this should stop accepting new work. Work that is already in flight, such
/// as an exchange with the trapper, is allowed to run to completion within `timeout`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate shutdown.
    pub timeout: Option<Duration>,
}

/// Notifies a service about an upcoming shutdown.
///
/// Obtained through [`Controller::shutdown_handle`].
#[derive(Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Returns the current shutdown state, if a shutdown has been requested.
    pub fn get(&self) -> Option<Shutdown> {
        self.0.borrow().clone()
    }

    /// Waits for a shutdown.
    ///
    /// Resolves immediately if the shutdown has been requested before, and keeps resolving on
    /// every subsequent call. If the [`Controller`] is dropped without requesting a shutdown, this
    /// resolves with an immediate shutdown.
    ///
    /// This method is cancel safe and can be used in `tokio::select!`.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = self.0.borrow_and_update().clone() {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                return Shutdown { timeout: None };
            }
        }
    }
}

/// Controls the graceful shutdown of a group of services.
///
/// Every service started by a server takes a [`ShutdownHandle`] from the server's controller. A
/// call to [`shutdown`](Self::shutdown), or a termination signal once
/// [`listen_for_signals`](Self::listen_for_signals) is active, notifies all of them at once.
///
/// The controller is cheap to clone; all clones control the same group.
///
/// ### Example
///
/// ```
/// use std::time::Duration;
/// use zbx_system::Controller;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let controller = Controller::new();
/// let mut handle = controller.shutdown_handle();
///
/// controller.shutdown(Some(Duration::from_secs(1)));
/// let shutdown = handle.notified().await;
/// assert_eq!(shutdown.timeout, Some(Duration::from_secs(1)));
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Controller {
    tx: Arc<watch::Sender<Option<Shutdown>>>,
}

impl Controller {
    /// Creates a new controller without any pending shutdown.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Returns a handle to wait for the shutdown of this controller.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.tx.subscribe())
    }

    /// Requests a shutdown of all services subscribed to this controller.
    ///
    /// Only the first request takes effect.
    pub fn shutdown(&self, timeout: Option<Duration>) {
        let requested = self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }

            *state = Some(Shutdown { timeout });
            true
        });

        if requested {
            zbx_log::debug!("shutdown requested");
        }
    }

    /// Returns `true` if a shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Spawns a task that converts process signals into a shutdown of this controller.
    ///
    /// `SIGINT` and `SIGQUIT` request an immediate shutdown, `SIGTERM` requests a graceful
    /// shutdown with the given timeout. The task ends after the first shutdown, whichever way it
    /// was requested.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn listen_for_signals(&self, timeout: Duration) -> io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sig_int = signal(SignalKind::interrupt())?;
        let mut sig_quit = signal(SignalKind::quit())?;
        let mut sig_term = signal(SignalKind::terminate())?;

        let controller = self.clone();
        let mut handle = self.shutdown_handle();

        Ok(tokio::spawn(async move {
            let timeout = tokio::select! {
                biased;

                _ = handle.notified() => return,
                Some(()) = sig_int.recv() => {
                    zbx_log::info!("SIGINT received, exiting");
                    None
                }
                Some(()) = sig_quit.recv() => {
                    zbx_log::info!("SIGQUIT received, exiting");
                    None
                }
                Some(()) = sig_term.recv() => {
                    zbx_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
                    Some(timeout)
                }
                else => return,
            };

            controller.shutdown(timeout);
        }))
    }

    /// Spawns a task that converts `Ctrl-C` into an immediate shutdown of this controller.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(not(unix))]
    pub fn listen_for_signals(&self, _timeout: Duration) -> io::Result<JoinHandle<()>> {
        let controller = self.clone();
        let mut handle = self.shutdown_handle();

        Ok(tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = handle.notified() => (),
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        zbx_log::info!("Ctrl-C received, exiting");
                        controller.shutdown(None);
                    }
                }
            }
        }))
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notified_after_shutdown() {
        let controller = Controller::new();
        let mut handle = controller.shutdown_handle();
        assert_eq!(handle.get(), None);

        controller.shutdown(Some(Duration::from_secs(3)));
        assert!(controller.is_shutting_down());

        let expected = Shutdown {
            timeout: Some(Duration::from_secs(3)),
        };
        assert_eq!(handle.notified().await, expected);
        // Subsequent calls resolve immediately.
        assert_eq!(handle.notified().await, expected);
    }

    #[tokio::test]
    async fn test_first_shutdown_wins() {
        let controller = Controller::new();
        controller.shutdown(None);
        controller.shutdown(Some(Duration::from_secs(10)));

        let mut handle = controller.shutdown_handle();
        assert_eq!(handle.notified().await.timeout, None);
    }

    #[tokio::test]
    async fn test_handle_taken_after_shutdown() {
        let controller = Controller::new();
        controller.shutdown(Some(Duration::ZERO));

        let handle = controller.shutdown_handle();
        assert!(handle.get().is_some());
    }

    #[tokio::test]
    async fn test_dropped_controller_shuts_down() {
        let controller = Controller::new();
        let mut handle = controller.shutdown_handle();
        drop(controller);

        assert_eq!(handle.notified().await.timeout, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_until_shutdown() {
        let controller = Controller::new();
        let mut handle = controller.shutdown_handle();

        let waited =
            tokio::time::timeout(Duration::from_secs(1), handle.notified()).await;
        assert!(waited.is_err());

        controller.shutdown(None);
        assert!(handle.notified().await.timeout.is_none());
    }

    #[tokio::test]
    async fn test_signal_listener_ends_on_shutdown() {
        let controller = Controller::new();
        let listener = controller
            .listen_for_signals(Duration::from_secs(1))
            .unwrap();

        controller.shutdown(None);
        listener.await.unwrap();
    }
}
