//! Cancelable retry dialer for the validator's privval listener.

use std::io;
use std::time::Duration;

use tokio::net::{TcpStream, UnixStream};
use tokio::time::sleep;
use tokio_util::codec::Framed;
use tokio_util::either::Either;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::PrivvalCodec;

/// Stream to the validator, over TCP or a unix domain socket.
pub type Conn = Either<TcpStream, UnixStream>;

/// A connection wrapped in the privval framing.
pub type FramedConn = Framed<Conn, PrivvalCodec>;

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// The dial loop was interrupted before a connection was established.
    #[error("dialing aborted")]
    Aborted,

    #[error("unknown protocol in address: {0}")]
    UnknownProtocol(String),
}

async fn dial_once(address: &str) -> Result<io::Result<Conn>, DialError> {
    if let Some(addr) = address.strip_prefix("tcp://") {
        Ok(TcpStream::connect(addr).await.map(Either::Left))
    } else if let Some(path) = address.strip_prefix("unix://") {
        Ok(UnixStream::connect(path).await.map(Either::Right))
    } else {
        Err(DialError::UnknownProtocol(address.to_owned()))
    }
}

/// Keeps dialing the given `tcp://` or `unix://` address until success,
/// sleeping `interval` between attempts. Cancelling the token aborts the
/// loop, both mid-dial and mid-sleep.
pub async fn retry_dial(
    address: &str,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<FramedConn, DialError> {
    info!(%address, "Dialing the validator");

    loop {
        let attempt = tokio::select! {
            () = cancel.cancelled() => return Err(DialError::Aborted),
            attempt = dial_once(address) => attempt?,
        };

        match attempt {
            Ok(conn) => {
                info!("Successfully dialed the validator");
                return Ok(Framed::new(conn, PrivvalCodec));
            }
            Err(err) => {
                debug!(%err, "Retry dialing");
                tokio::select! {
                    () = cancel.cancelled() => return Err(DialError::Aborted),
                    () = sleep(interval) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn dials_a_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("tcp://{}", listener.local_addr().unwrap());

        let cancel = CancellationToken::new();
        let framed = retry_dial(&address, Duration::from_millis(10), &cancel)
            .await
            .unwrap();

        let (accepted, _) = listener.accept().await.unwrap();
        drop(accepted);
        drop(framed);
    }

    #[tokio::test]
    async fn retries_until_the_listener_appears() {
        // Reserve a port, release it, then dial while nobody listens yet.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let cancel = CancellationToken::new();
        let address = format!("tcp://{addr}");
        let dial = tokio::spawn({
            let cancel = cancel.clone();
            async move { retry_dial(&address, Duration::from_millis(20), &cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

        let mut framed = dial.await.unwrap().unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        drop(accepted);

        // The peer hung up; the stream just ends.
        assert!(matches!(framed.next().await, None | Some(Err(_))));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_dial_loop() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = retry_dial(
            "tcp://127.0.0.1:1",
            Duration::from_millis(10),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(DialError::Aborted)));
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let cancel = CancellationToken::new();
        let result = retry_dial("http://nope", Duration::from_millis(10), &cancel).await;
        assert!(matches!(result, Err(DialError::UnknownProtocol(_))));
    }
}
