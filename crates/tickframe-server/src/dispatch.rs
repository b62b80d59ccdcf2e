//! Inbound stream and datagram workers.
//!
//! Each inbound stream carries exactly one message: the client writes it and
//! finishes its send side. A worker reads to end of stream, decodes once via
//! the codec and [`Message::from_envelope`], and hands the typed message to
//! `on_message`.
//!
//! Every failure here is local to the one worker. A read error, an oversized
//! or undecodable message, or a failing callback drops that message and
//! nothing else.

use std::sync::Arc;

use bytes::Bytes;
use quinn::{ReadToEndError, RecvStream, SendStream, VarInt};
use tickframe_proto::{Message, close_code};

use crate::{
    client::ClientState,
    handler::catch_panic,
    server::Server,
};

/// Read, decode and dispatch one inbound message.
pub(crate) async fn stream_worker<T, M>(
    server: Server<T, M>,
    client: Arc<T>,
    send: SendStream,
    mut recv: RecvStream,
) where
    T: ClientState,
    M: Message,
{
    let id = client.connection_id();

    // Replies go out on server-opened streams; dropping finishes this half.
    drop(send);

    let limit = server.config().max_message_size;
    let bytes = tokio::select! {
        biased;
        () = server.cancel_token().cancelled() => {
            recv.stop(VarInt::from_u32(close_code::SHUTDOWN)).ok();
            return;
        },
        result = recv.read_to_end(limit) => match result {
            Ok(bytes) => bytes,
            Err(ReadToEndError::TooLong) => {
                tracing::warn!(%id, "Dropping message larger than {} bytes", limit);
                recv.stop(VarInt::from_u32(close_code::REJECTED)).ok();
                return;
            },
            Err(ReadToEndError::Read(e)) => {
                tracing::debug!(%id, "Stream read error: {}", e);
                return;
            },
        },
    };

    let message = match server.codec().decode(&bytes).and_then(M::from_envelope) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(%id, "Dropping undecodable message: {}", e);
            return;
        },
    };

    match catch_panic(server.handler().on_message(&server, &client, message)).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => tracing::warn!(%id, "Message handler failed: {}", e),
        Err(panic) => tracing::error!(%id, "Message handler panicked: {}", panic),
    }
}

/// Dispatch one inbound datagram.
pub(crate) async fn datagram_worker<T, M>(server: Server<T, M>, client: Arc<T>, data: Bytes)
where
    T: ClientState,
    M: Message,
{
    if let Err(panic) = catch_panic(server.handler().on_datagram(&server, &client, data)).await {
        tracing::error!(id = %client.connection_id(), "Datagram handler panicked: {}", panic);
    }
}
