//! Full-stack test driving a real TCP socket through the listener and
//! session layers together, rather than the in-process `duplex` streams used
//! by the unit tests in `session.rs`.

use fcatalog_engine::CatalogRegistry;
use fcatalog_proto::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
use fcatalog_proto::{Incoming, Outgoing};
use fcatalog_server::session::SessionConfig;
use tokio::net::{TcpListener, TcpStream};

fn config() -> SessionConfig {
    SessionConfig {
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    }
}

async fn connected_client(registry: CatalogRegistry) -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(fcatalog_server::listener::serve(listener, registry, config()));
    TcpStream::connect(addr).await.unwrap()
}

/// Sends a message with no response (`ChooseDB`, `AddFunction`, `AddStructure`).
async fn send(client: &mut TcpStream, msg: &Incoming) {
    write_frame(client, &msg.encode()).await.unwrap();
}

/// Sends a message and waits for the one response it's defined to produce.
async fn request(client: &mut TcpStream, msg: &Incoming) -> Outgoing {
    write_frame(client, &msg.encode()).await.unwrap();
    let body = read_frame(client, DEFAULT_MAX_FRAME_BYTES)
        .await
        .unwrap()
        .expect("server should respond");
    Outgoing::decode(&body).unwrap()
}

#[tokio::test]
async fn add_function_then_request_similars_over_a_real_socket() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CatalogRegistry::new(dir.path().to_path_buf(), 4);
    let mut client = connected_client(registry).await;

    send(
        &mut client,
        &Incoming::ChooseDb {
            db_name: "e2e".into(),
        },
    )
    .await;

    let data = b"abcdefgh".repeat(8);
    send(
        &mut client,
        &Incoming::AddFunction {
            func_name: "foo".into(),
            func_comment: "a comment".into(),
            func_data: data.clone(),
        },
    )
    .await;

    let response = request(
        &mut client,
        &Incoming::RequestSimilars {
            func_data: data,
            num_similars: 3,
        },
    )
    .await;

    match response {
        Outgoing::ResponseSimilars(sims) => {
            assert_eq!(sims.len(), 1);
            assert_eq!(sims[0].name, "foo");
            assert_eq!(sims[0].grade, 4);
        }
        other => panic!("expected ResponseSimilars, got {other:?}"),
    }
}

#[tokio::test]
async fn two_sessions_share_a_catalog_through_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CatalogRegistry::new(dir.path().to_path_buf(), 4);

    let mut writer = connected_client(registry.clone()).await;
    send(
        &mut writer,
        &Incoming::ChooseDb {
            db_name: "shared".into(),
        },
    )
    .await;
    send(
        &mut writer,
        &Incoming::AddFunction {
            func_name: "bar".into(),
            func_comment: "".into(),
            func_data: b"some function bytes here".to_vec(),
        },
    )
    .await;
    // add_structure force-commits, giving the second session visibility
    // without relying on the batch threshold (§5).
    send(
        &mut writer,
        &Incoming::AddStructure {
            struct_name: "s".into(),
            struct_dump: b"x".to_vec(),
        },
    )
    .await;
    // A request/response pair on the same session guarantees the server has
    // processed (and thus committed) everything sent before it.
    request(&mut writer, &Incoming::Syn).await;
    drop(writer);

    let mut reader = connected_client(registry).await;
    send(
        &mut reader,
        &Incoming::ChooseDb {
            db_name: "shared".into(),
        },
    )
    .await;
    let response = request(&mut reader, &Incoming::RequestFuncNames).await;
    assert_eq!(
        response,
        Outgoing::ResponseFuncNames(vec!["bar".to_string()])
    );
}
