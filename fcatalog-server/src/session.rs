//! Per-connection protocol state machine: exactly one `ChooseDB` to reach
//! `Ready`, then any number of catalog operations until the peer disconnects
//! or a protocol violation closes the session.
//!
//! Grounded on `nix_daemon::worker_protocol::server_handshake_client`'s
//! shape: read a fixed preamble, then loop reading operations off the same
//! stream.

use std::net::SocketAddr;

use fcatalog_engine::CatalogRegistry;
use fcatalog_proto::{read_frame, write_frame, Incoming, Outgoing, WireSimilar};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_frame_bytes: u32,
}

/// Drives one connection to completion. Never returns an error: every
/// failure mode at this layer just ends the session.
#[instrument(skip(stream, registry, config), fields(peer = %peer, catalog = tracing::field::Empty))]
pub async fn run_session<S>(
    mut stream: S,
    peer: SocketAddr,
    registry: CatalogRegistry,
    config: SessionConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let store = match read_frame(&mut stream, config.max_frame_bytes).await {
        Ok(Some(body)) => match Incoming::decode(&body) {
            Ok(Incoming::ChooseDb { db_name }) => match registry.choose_db(&db_name).await {
                Ok(store) => {
                    tracing::Span::current().record("catalog", tracing::field::display(&db_name));
                    store
                }
                Err(e) => {
                    debug!(error = %e, "choose_db failed, closing session");
                    return;
                }
            },
            Ok(other) => {
                debug!(?other, "expected ChooseDB as the first message, closing session");
                return;
            }
            Err(e) => {
                debug!(error = %e, "malformed first message, closing session");
                return;
            }
        },
        Ok(None) => return,
        Err(e) => {
            debug!(error = %e, "frame error before handshake, closing session");
            return;
        }
    };

    loop {
        let body = match read_frame(&mut stream, config.max_frame_bytes).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!("peer closed connection");
                break;
            }
            Err(e) => {
                debug!(error = %e, "frame error, closing session");
                break;
            }
        };

        let incoming = match Incoming::decode(&body) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "malformed message, closing session");
                break;
            }
        };

        let response = match incoming {
            Incoming::ChooseDb { .. } => {
                debug!("ChooseDB is only valid as the first message, closing session");
                break;
            }
            Incoming::AddFunction {
                func_name,
                func_comment,
                func_data,
            } => {
                if let Err(e) = store.add_function(func_name, func_comment, func_data).await {
                    warn!(error = %e, "add_function dropped");
                }
                None
            }
            Incoming::RequestSimilars {
                func_data,
                num_similars,
            } => {
                let similars = store.get_similars(func_data, num_similars).await;
                let wire = similars
                    .into_iter()
                    .map(|s| WireSimilar {
                        name: s.func_name,
                        comment: s.func_comment,
                        grade: s.func_grade,
                    })
                    .collect();
                Some(Outgoing::ResponseSimilars(wire))
            }
            Incoming::AddStructure {
                struct_name,
                struct_dump,
            } => {
                if let Err(e) = store.add_structure(struct_name, struct_dump).await {
                    warn!(error = %e, "add_structure dropped");
                }
                None
            }
            Incoming::RequestStructNames => {
                Some(Outgoing::ResponseStructNames(store.get_struct_names().await))
            }
            Incoming::RequestStruct { struct_name } => {
                let dump = store.get_struct(struct_name).await.unwrap_or_default();
                Some(Outgoing::ResponseStruct(dump))
            }
            Incoming::Syn => Some(Outgoing::Ack),
            Incoming::RequestFuncNames => {
                Some(Outgoing::ResponseFuncNames(store.get_func_names().await))
            }
        };

        if let Some(response) = response {
            if let Err(e) = write_frame(&mut stream, &response.encode()).await {
                debug!(error = %e, "write failed, closing session");
                break;
            }
        }
    }
}
