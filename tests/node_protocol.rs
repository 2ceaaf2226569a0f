//! Line protocol against a live node on loopback

use filemesh::common::Storage;
use filemesh::protocol::{Command, Request};
use filemesh::{Node, NodeServer, RawClient};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestNode {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestNode {
    async fn start(storage: Storage) -> Self {
        let server = NodeServer::bind("127.0.0.1:0", Node::new(storage))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = server
                .serve_until(async move {
                    let _ = rx.await;
                })
                .await;
        });
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

async fn join(addr: SocketAddr, id: u64) -> RawClient {
    let mut client = RawClient::connect_node(addr, id).await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some(format!("COORDINATOR {}", id).as_str())
    );
    client
}

#[tokio::test]
async fn test_empty_list() {
    let node = TestNode::start(Storage::new_memory()).await;
    let mut client = join(node.addr, 1).await;

    client.send_line("LIST").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("FILES No files available")
    );
    assert!(client.list().await.unwrap().is_empty());

    client.exit().await.unwrap();
    node.stop().await;
}

#[tokio::test]
async fn test_upload_then_download() {
    let node = TestNode::start(Storage::new_memory()).await;
    let mut client = join(node.addr, 1).await;

    client.send_line("UPLOAD hello.txt aGk=").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("OK File uploaded: hello.txt")
    );
    client.send_line("DOWNLOAD hello.txt").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("FILE hello.txt aGk=")
    );

    let binary = vec![0u8, 1, 2, 254, 255, b'\n'];
    client.upload("blob.bin", &binary).await.unwrap();
    assert_eq!(client.download("blob.bin").await.unwrap(), binary);
    assert_eq!(
        client.list().await.unwrap(),
        vec!["blob.bin".to_string(), "hello.txt".to_string()]
    );

    node.stop().await;
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let node = TestNode::start(Storage::new_memory()).await;
    let mut client = join(node.addr, 1).await;

    client.send_line("FOO bar").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("ERROR Unknown command: FOO")
    );
    client.send_line("LIST").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("FILES No files available")
    );

    node.stop().await;
}

#[tokio::test]
async fn test_coordinator_moves_when_highest_id_leaves() {
    let node = TestNode::start(Storage::new_memory()).await;
    let mut three = join(node.addr, 3).await;
    let mut seven = join(node.addr, 7).await;
    assert_eq!(
        three.read_line().await.unwrap().as_deref(),
        Some("COORDINATOR 7")
    );

    seven.exit().await.unwrap();
    assert_eq!(
        three.read_line().await.unwrap().as_deref(),
        Some("COORDINATOR 3")
    );
    assert_eq!(three.coordinator().await.unwrap(), "3");

    node.stop().await;
}

#[tokio::test]
async fn test_mutations_are_announced_to_other_clients() {
    let node = TestNode::start(Storage::new_memory()).await;
    let mut alice = join(node.addr, 1).await;
    let mut bob = join(node.addr, 2).await;
    assert_eq!(
        alice.read_line().await.unwrap().as_deref(),
        Some("COORDINATOR 2")
    );

    alice.upload("shared.txt", b"x").await.unwrap();
    assert_eq!(
        bob.read_line().await.unwrap().as_deref(),
        Some("FILE_ADDED shared.txt")
    );
    alice.delete("shared.txt").await.unwrap();
    assert_eq!(
        bob.read_line().await.unwrap().as_deref(),
        Some("FILE_DELETED shared.txt")
    );

    node.stop().await;
}

#[tokio::test]
async fn test_seeded_samples_and_legacy_dialect() {
    let storage = Storage::new_memory();
    storage.seed_samples().unwrap();
    let node = TestNode::start(storage).await;
    let mut client = join(node.addr, 5).await;

    assert_eq!(
        client.view("readme.md").await.unwrap(),
        "# README\n\nThis is a sample markdown file."
    );

    client.send_line("view hello.txt").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("VIEW --- hello.txt ---\\nHello, World!")
    );
    client.send_line("coordinator").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("COORDINATOR Current coordinator: Client 5")
    );
    client.send_line("delete nothing.txt").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("DEL File 'nothing.txt' not found.")
    );
    client.send_line("exit").await.unwrap();
    assert_eq!(
        client.read_line().await.unwrap().as_deref(),
        Some("BYE Goodbye!")
    );
    assert_eq!(client.read_line().await.unwrap(), None);

    node.stop().await;
}

#[tokio::test]
async fn test_first_request_skips_registration_announcement() {
    let node = TestNode::start(Storage::new_memory()).await;
    let mut client = RawClient::connect_node(node.addr, 5).await.unwrap();

    let coordinator = Request::legacy(Command::Coordinator);
    assert_eq!(
        client.request(&coordinator).await.unwrap(),
        "COORDINATOR Current coordinator: Client 5"
    );

    // a later join is announced before the next answer
    let _nine = join(node.addr, 9).await;
    assert_eq!(
        client.request(&coordinator).await.unwrap(),
        "COORDINATOR Current coordinator: Client 9"
    );

    node.stop().await;
}
