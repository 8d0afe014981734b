//! Service lifecycle and run loop: dial the validator, translate frames
//! through the request handler, watch for inactivity, and persist the signer
//! state on the way out.

use std::path::PathBuf;

use color_eyre::eyre;
use futures::{SinkExt, StreamExt};
use prometheus::Registry;
use signctrl_config::state::{self, State};
use signctrl_config::Config;
use signctrl_connection::{load_conn_key, retry_dial, DialError};
use signctrl_types::{Gauges, RankedSigner};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commit::HttpCommitSource;
use crate::file_pv::FilePv;
use crate::handler::{self, Fatal};
use crate::http::{self, Status};

/// How a run loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Stopped from the outside (signal or `Handle::stop`).
    ExternalStop,
    /// Stopped itself because continuing would risk a double-sign.
    Fatal(Fatal),
}

/// The SignCTRL service. `start` restores persisted state, brings up the
/// status server and spawns the run loop.
pub struct SignCtrl {
    pub config: Config,
    pub config_dir: PathBuf,
    pub http_port: u16,
}

/// Handle to a started service.
pub struct Handle {
    cancel: CancellationToken,
    task: JoinHandle<eyre::Result<Outcome>>,
    http: JoinHandle<eyre::Result<()>>,
    pub status: watch::Receiver<Status>,
}

impl Handle {
    /// Token that stops the run loop when cancelled. Wire this to the OS
    /// signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the run loop to finish on its own, then tears down the
    /// status server.
    pub async fn join(self) -> eyre::Result<Outcome> {
        let outcome = self.task.await??;
        self.http.abort();
        Ok(outcome)
    }

    /// Cancels the run loop and waits for it to persist state and exit.
    pub async fn stop(self) -> eyre::Result<Outcome> {
        self.cancel.cancel();
        self.join().await
    }
}

fn snapshot(signer: &RankedSigner) -> Status {
    Status {
        height: signer.current_height(),
        rank: signer.rank(),
        set_size: signer.set_size(),
        counter: signer.missed_in_a_row(),
        threshold: signer.threshold(),
    }
}

impl SignCtrl {
    pub async fn start(self) -> eyre::Result<Handle> {
        // On a first-ever start this synthesizes state at the configured
        // start rank; afterwards the persisted rank wins.
        let state = state::load_or_generate(&self.config_dir, self.config.base.start_rank)?;

        let registry = Registry::new();
        let gauges = Gauges::new()?;
        gauges.register(&registry)?;

        let mut signer = RankedSigner::new(
            self.config.base.threshold,
            self.config.base.set_size,
            state.last_rank,
            gauges,
        );
        signer.set_current_height(state.last_height);
        signer.set_last_height(state.last_height);
        info!(
            rank = signer.rank(),
            height = signer.current_height(),
            "Starting SignCTRL"
        );

        let file_pv = FilePv::load_or_generate(&self.config_dir)?;

        // The identity key authenticates the transport towards the
        // validator's listener.
        let conn_key = load_conn_key(&self.config_dir)?;
        info!(
            identity = %hex::encode(conn_key.verifying_key().as_bytes()),
            "Loaded connection key"
        );

        let (status_tx, status_rx) = watch::channel(snapshot(&signer));
        let http = tokio::spawn(http::serve(status_rx.clone(), registry, self.http_port));

        let commits = HttpCommitSource::new(self.config.base.validator_laddr_rpc.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            self.config,
            self.config_dir,
            signer,
            file_pv,
            commits,
            status_tx,
            cancel.clone(),
        ));

        Ok(Handle {
            cancel,
            task,
            http,
            status: status_rx,
        })
    }
}

async fn run(
    config: Config,
    config_dir: PathBuf,
    mut signer: RankedSigner,
    mut file_pv: FilePv,
    commits: HttpCommitSource,
    status_tx: watch::Sender<Status>,
    cancel: CancellationToken,
) -> eyre::Result<Outcome> {
    let timeout = config.base.retry_dial_after;

    let outcome = 'conn: loop {
        let mut framed =
            match retry_dial(&config.base.validator_laddr, timeout, &cancel).await {
                Ok(framed) => framed,
                Err(DialError::Aborted) => break 'conn Outcome::ExternalStop,
                Err(err) => return Err(err.into()),
            };

        let mut deadline = Instant::now() + timeout;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break 'conn Outcome::ExternalStop,

                () = sleep_until(deadline) => {
                    warn!(?timeout, "No request from the validator, assuming the link is dead");
                    signer.lock_counter();
                    let _ = status_tx.send(snapshot(&signer));
                    continue 'conn;
                }

                frame = framed.next() => match frame {
                    Some(Ok(msg)) => {
                        deadline = Instant::now() + timeout;

                        // A service stop must also cancel an in-flight
                        // commit lookup.
                        let (response, fatal) = tokio::select! {
                            () = cancel.cancelled() => break 'conn Outcome::ExternalStop,
                            result = handler::handle(
                                msg,
                                &mut signer,
                                &mut file_pv,
                                &commits,
                                &config,
                            ) => result,
                        };
                        let _ = status_tx.send(snapshot(&signer));

                        if let Err(err) = framed.send(response).await {
                            // The peer hung up mid-write; the inactivity
                            // timer takes care of reconnecting.
                            error!(%err, "Couldn't write response");
                        }

                        if let Some(fatal) = fatal {
                            error!(%fatal, "Terminating SignCTRL");
                            break 'conn Outcome::Fatal(fatal);
                        }
                    }
                    Some(Err(err)) => {
                        error!(%err, "Couldn't read request");
                    }
                    None => {
                        info!("Validator closed the connection");
                        signer.lock_counter();
                        let _ = status_tx.send(snapshot(&signer));
                        continue 'conn;
                    }
                }
            }
        }
    };

    let state = State {
        last_height: signer.current_height(),
        last_rank: signer.rank(),
    };
    info!(
        rank = state.last_rank,
        height = state.last_height,
        "Saving state"
    );
    state::save(&config_dir, &state)?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use signctrl_config::{BaseConfig, LogLevel, PrivvalConfig};
    use signctrl_connection::{generate_conn_key, PrivvalCodec};
    use signctrl_types::proto::{self, message::Sum};
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    use super::*;

    fn test_config(validator_laddr: String, retry_dial_after: Duration, start_rank: u32) -> Config {
        Config {
            base: BaseConfig {
                log_level: LogLevel::Info,
                set_size: 2,
                threshold: 10,
                start_rank,
                validator_laddr,
                // Nothing listens here; commit checks would fail, but these
                // tests never trigger one.
                validator_laddr_rpc: "tcp://127.0.0.1:1".into(),
                retry_dial_after,
            },
            privval: PrivvalConfig {
                chain_id: "c".into(),
            },
        }
    }

    fn ping() -> proto::Message {
        proto::Message::wrap(Sum::PingRequest(proto::PingRequest {}))
    }

    async fn expect_pong(framed: &mut Framed<tokio::net::TcpStream, PrivvalCodec>) {
        framed.send(ping()).await.unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(response.sum, Some(Sum::PingResponse(_))));
    }

    #[tokio::test]
    async fn answers_pings_relocks_on_inactivity_and_persists_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        generate_conn_key(dir.path()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let laddr = format!("tcp://{}", listener.local_addr().unwrap());

        let handle = SignCtrl {
            config: test_config(laddr, Duration::from_millis(300), 1),
            config_dir: dir.path().to_path_buf(),
            http_port: 0,
        }
        .start()
        .await
        .unwrap();

        let (sock, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(sock, PrivvalCodec);
        expect_pong(&mut framed).await;

        // Go silent: the inactivity timer must fire and the service must
        // dial again. The fresh connection works like the first one.
        let (sock, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut framed = Framed::new(sock, PrivvalCodec);
        expect_pong(&mut framed).await;

        let outcome = handle.stop().await.unwrap();
        assert_eq!(outcome, Outcome::ExternalStop);

        // A clean stop without validator traffic leaves the state as it was
        // generated on first start.
        let state = state::load_or_generate(dir.path(), 1).unwrap();
        assert_eq!(
            state,
            State {
                last_height: 1,
                last_rank: 1
            }
        );
    }

    #[tokio::test]
    async fn first_start_adopts_the_configured_start_rank() {
        let dir = tempfile::tempdir().unwrap();
        generate_conn_key(dir.path()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let laddr = format!("tcp://{}", listener.local_addr().unwrap());

        // No signctrl_state.json exists yet: this backup must come up at
        // rank 2, not as a second active signer.
        let handle = SignCtrl {
            config: test_config(laddr, Duration::from_secs(30), 2),
            config_dir: dir.path().to_path_buf(),
            http_port: 0,
        }
        .start()
        .await
        .unwrap();

        assert_eq!(handle.status.borrow().rank, 2);

        let outcome = handle.stop().await.unwrap();
        assert_eq!(outcome, Outcome::ExternalStop);

        let state = state::load_or_generate(dir.path(), 1).unwrap();
        assert_eq!(
            state,
            State {
                last_height: 1,
                last_rank: 2
            }
        );
    }

    #[tokio::test]
    async fn obsolete_rank_terminates_the_service() {
        let dir = tempfile::tempdir().unwrap();
        generate_conn_key(dir.path()).unwrap();
        state::save(
            dir.path(),
            &State {
                last_height: 10,
                last_rank: 2,
            },
        )
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let laddr = format!("tcp://{}", listener.local_addr().unwrap());

        let handle = SignCtrl {
            config: test_config(laddr, Duration::from_secs(30), 1),
            config_dir: dir.path().to_path_buf(),
            http_port: 0,
        }
        .start()
        .await
        .unwrap();

        let (sock, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(sock, PrivvalCodec);

        let request = proto::Message::wrap(Sum::SignVoteRequest(proto::SignVoteRequest {
            vote: Some(proto::Vote {
                r#type: proto::SignedMsgType::Precommit as i32,
                height: 21,
                round: 0,
                block_id: None,
                timestamp: None,
                validator_address: Bytes::new(),
                validator_index: 0,
                signature: Bytes::new(),
            }),
            chain_id: "c".into(),
        }));
        framed.send(request).await.unwrap();

        // The refusal is written before the service stops.
        let response = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match response.sum {
            Some(Sum::SignedVoteResponse(resp)) => {
                assert!(resp.error.unwrap().description.contains("rank obsolete"));
            }
            other => panic!("expected SignedVoteResponse, got {other:?}"),
        }

        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, Outcome::Fatal(Fatal::RankObsolete));

        // Rank and height survive for the post-mortem.
        let state = state::load_or_generate(dir.path(), 1).unwrap();
        assert_eq!(
            state,
            State {
                last_height: 10,
                last_rank: 2
            }
        );
    }
}
