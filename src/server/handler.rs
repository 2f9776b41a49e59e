//! Session state machine
//!
//! A session is driven by repeatedly calling [`Handler::step`]. A step either
//! completes (the loop continues) or raises a [`Signal`]:
//!
//! - `Warn`: the current request failed, log it and keep going
//! - `Stop`: planned termination, cleanup already done
//! - `Fatal`: unrecoverable protocol or registration error
//! - `Transport`: low-level I/O failure, treated like `Fatal`

use std::fmt;
use std::future::Future;

use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::transport::Address;

/// Control signal raised by one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Warn(String),
    Stop,
    Fatal(String),
    Transport(ChatError),
}

impl Signal {
    pub fn warn(reason: impl Into<String>) -> Self {
        Signal::Warn(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Signal::Fatal(reason.into())
    }
}

impl From<ChatError> for Signal {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Network(_) => Signal::Transport(err),
            err if err.is_recoverable() => Signal::Warn(err.to_string()),
            err => Signal::Fatal(err.to_string()),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    Stopped,
    Fatal(String),
    Transport(ChatError),
}

impl Exit {
    /// Whether the session ended without a planned stop
    pub fn is_failure(&self) -> bool {
        !matches!(self, Exit::Stopped)
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Stopped => write!(f, "stopped"),
            Exit::Fatal(reason) => write!(f, "fatal: {}", reason),
            Exit::Transport(err) => write!(f, "transport: {}", err),
        }
    }
}

/// One session's step function and cleanup
pub trait Handler: Send {
    /// Short label for logs, e.g. "tcp"
    fn kind(&self) -> &'static str;

    /// Remote peer of this session
    fn address(&self) -> Address;

    /// Handle one inbound unit
    fn step(&mut self) -> impl Future<Output = std::result::Result<(), Signal>> + Send;

    /// Called once after the loop ends
    fn finish(&mut self, exit: &Exit) -> impl Future<Output = ()> + Send;
}

/// Run `handler` until it stops or fails
pub async fn drive<H: Handler>(mut handler: H) -> Exit {
    let span = info_span!(
        "session",
        id = %Uuid::new_v4(),
        kind = handler.kind(),
        peer = %handler.address()
    );

    async move {
        debug!("session started");
        let exit = loop {
            match handler.step().await {
                Ok(()) => {}
                Err(Signal::Warn(reason)) => warn!(reason = %reason, "request failed"),
                Err(Signal::Stop) => break Exit::Stopped,
                Err(Signal::Fatal(reason)) => {
                    error!(reason = %reason, "session failed");
                    break Exit::Fatal(reason);
                }
                Err(Signal::Transport(err)) => {
                    warn!(error = %err, "transport failed");
                    break Exit::Transport(err);
                }
            }
        };

        handler.finish(&exit).await;
        info!(exit = %exit, "session ended");
        exit
    }
    .instrument(span)
    .await
}

/// Outcome of a best-effort fan-out
#[derive(Debug, Default)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: Vec<(String, ChatError)>,
}

impl Delivery {
    /// Warn signal naming the failed recipients, if any
    pub fn into_result(self) -> std::result::Result<(), Signal> {
        if self.failed.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = self.failed.iter().map(|(name, _)| name.as_str()).collect();
        Err(Signal::warn(format!(
            "delivery failed for {} of {} recipients: {}",
            self.failed.len(),
            self.failed.len() + self.delivered,
            names.join(" ")
        )))
    }
}

/// Deliver to every recipient in turn. A failure is logged and does not stop
/// delivery to the rest.
pub async fn fan_out<T, F, Fut>(recipients: impl IntoIterator<Item = (String, T)>, deliver: F) -> Delivery
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut delivery = Delivery::default();
    for (name, target) in recipients {
        match deliver(target).await {
            Ok(()) => delivery.delivered += 1,
            Err(err) => {
                warn!(recipient = %name, error = %err, "delivery failed");
                delivery.failed.push((name, err));
            }
        }
    }
    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        script: Vec<std::result::Result<(), Signal>>,
        finished: Arc<AtomicUsize>,
    }

    impl Handler for Scripted {
        fn kind(&self) -> &'static str {
            "test"
        }

        fn address(&self) -> Address {
            Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1)
        }

        async fn step(&mut self) -> std::result::Result<(), Signal> {
            if self.script.is_empty() {
                return Err(Signal::Stop);
            }
            self.script.remove(0)
        }

        async fn finish(&mut self, _exit: &Exit) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scripted(script: Vec<std::result::Result<(), Signal>>) -> (Scripted, Arc<AtomicUsize>) {
        let finished = Arc::new(AtomicUsize::new(0));
        let handler = Scripted {
            script,
            finished: Arc::clone(&finished),
        };
        (handler, finished)
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            Signal::from(ChatError::user_not_found("bob")),
            Signal::Warn(_)
        ));
        assert!(matches!(
            Signal::from(ChatError::protocol("negative length")),
            Signal::Fatal(_)
        ));
        assert!(matches!(
            Signal::from(ChatError::network("reset")),
            Signal::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_warn_keeps_looping() {
        let (handler, finished) = scripted(vec![
            Ok(()),
            Err(Signal::warn("bad port")),
            Ok(()),
            Err(Signal::warn("no such user")),
        ]);

        assert_eq!(drive(handler).await, Exit::Stopped);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_ends_loop() {
        let (handler, finished) = scripted(vec![
            Err(Signal::fatal("registration failed")),
            Err(Signal::warn("never reached")),
        ]);

        let exit = drive(handler).await;
        assert_eq!(exit, Exit::Fatal("registration failed".into()));
        assert!(exit.is_failure());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_ends_loop() {
        let (handler, _) = scripted(vec![Err(Signal::Transport(ChatError::network("eof")))]);
        assert!(matches!(drive(handler).await, Exit::Transport(_)));
    }

    #[tokio::test]
    async fn test_fan_out_continues_past_failures() {
        let attempted = AtomicUsize::new(0);
        let recipients = vec![
            ("alice".to_string(), true),
            ("dead".to_string(), false),
            ("carol".to_string(), true),
        ];

        let delivery = fan_out(recipients, |ok| {
            attempted.fetch_add(1, Ordering::SeqCst);
            async move {
                if ok {
                    Ok(())
                } else {
                    Err(ChatError::network("broken pipe"))
                }
            }
        })
        .await;

        assert_eq!(attempted.load(Ordering::SeqCst), 3);
        assert_eq!(delivery.delivered, 2);
        assert_eq!(delivery.failed.len(), 1);
        assert_eq!(delivery.failed[0].0, "dead");

        match delivery.into_result() {
            Err(Signal::Warn(reason)) => assert!(reason.contains("dead")),
            other => panic!("expected warn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fan_out_empty() {
        let delivery = fan_out(Vec::<(String, ())>::new(), |_| async { Ok(()) }).await;
        assert_eq!(delivery.delivered, 0);
        assert!(delivery.into_result().is_ok());
    }
}
