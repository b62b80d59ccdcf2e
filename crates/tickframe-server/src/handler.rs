//! Application callback slots.
//!
//! An application plugs its logic into the engine by implementing
//! [`Handler`]. Every method has a no-op default, so an implementation only
//! overrides the slots it cares about, and `()` is a handler with every slot
//! unset.
//!
//! # Failure isolation
//!
//! Callbacks run inside engine tasks. A callback returning an error or
//! panicking fails only that one invocation:
//!
//! - `on_connect` failure tears down that connection before it reaches
//!   steady state.
//! - `on_message` failure drops that one message. Other streams on the same
//!   connection and other connections are unaffected.
//! - `on_tick`, `on_datagram` and `on_disconnect` panics are logged and the
//!   engine carries on.
//!
//! Callbacks must not call [`Server::stop`]: it waits for every engine task,
//! including the one running the callback. Use [`Server::request_stop`].

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use thiserror::Error;
use tickframe_proto::Message;

use crate::{client::ClientState, server::Server};

/// Error type returned by fallible application callbacks.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Why a client's connection ended, as reported to `on_disconnect`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The server is shutting down.
    #[error("server shutdown")]
    Shutdown,

    /// The peer closed the connection with an application close frame.
    #[error("closed by peer (code {code}): {reason}")]
    ClosedByPeer {
        /// Application close code sent by the peer
        code: u64,
        /// Close reason sent by the peer, lossily decoded as UTF-8
        reason: String,
    },

    /// The server closed the connection, e.g. through [`Server::disconnect`].
    #[error("closed locally")]
    LocallyClosed,

    /// No traffic within the configured idle timeout.
    #[error("idle timeout")]
    IdleTimeout,

    /// Transport-level failure (reset, protocol violation, peer transport
    /// close).
    #[error("transport error: {0}")]
    Transport(String),

    /// `on_connect` failed, so the connection never reached steady state.
    #[error("connect rejected: {0}")]
    ConnectRejected(String),
}

impl DisconnectCause {
    /// Whether this is a normal termination rather than a failure.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Shutdown | Self::ClosedByPeer { .. } | Self::LocallyClosed)
    }
}

impl From<&quinn::ConnectionError> for DisconnectCause {
    fn from(err: &quinn::ConnectionError) -> Self {
        match err {
            quinn::ConnectionError::ApplicationClosed(close) => Self::ClosedByPeer {
                code: close.error_code.into_inner(),
                reason: String::from_utf8_lossy(&close.reason).into_owned(),
            },
            quinn::ConnectionError::LocallyClosed => Self::LocallyClosed,
            quinn::ConnectionError::TimedOut => Self::IdleTimeout,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Application callbacks invoked by the engine.
///
/// Every method receives the server handle, which can broadcast, send to a
/// single client, enumerate clients or disconnect them.
#[async_trait]
pub trait Handler<T, M>: Send + Sync + 'static
where
    T: ClientState,
    M: Message,
{
    /// A client was registered. Returning an error rejects the connection:
    /// the client is unregistered, `on_disconnect` fires with
    /// [`DisconnectCause::ConnectRejected`] and the connection is closed.
    async fn on_connect(&self, _server: &Server<T, M>, _client: &Arc<T>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// A client was unregistered. Fires exactly once per client that was
    /// registered, after which the engine never targets it again.
    async fn on_disconnect(&self, _server: &Server<T, M>, _client: &Arc<T>, _cause: &DisconnectCause) {}

    /// A message was decoded from one inbound stream.
    async fn on_message(
        &self,
        _server: &Server<T, M>,
        _client: &Arc<T>,
        _message: M,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// The tick scheduler fired.
    async fn on_tick(&self, _server: &Server<T, M>) {}

    /// An unreliable datagram arrived. Only fires when datagrams are enabled.
    async fn on_datagram(&self, _server: &Server<T, M>, _client: &Arc<T>, _data: Bytes) {}
}

#[async_trait]
impl<T, M> Handler<T, M> for ()
where
    T: ClientState,
    M: Message,
{
}

/// Run a callback future, converting a panic into an error message.
pub(crate) async fn catch_panic<F: Future>(future: F) -> Result<F::Output, String> {
    AssertUnwindSafe(future).catch_unwind().await.map_err(|payload| panic_message(&*payload))
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
