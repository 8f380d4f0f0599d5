//! End-to-end tests driving the chat hub over a real WebSocket.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tandem_server::tokens::TokenService;
use tandem_server::{build_router, AppState, ServerConfig};
use tandem_shared::protocol::{ClientFrame, SendMessage, ServerFrame};
use tandem_shared::types::{ChatId, FileFlag};
use tandem_store::{Chat, StoreHandle, User};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    state: AppState,
    alice: User,
    bob: User,
    mallory: User,
    chat: Chat,
    _dir: TempDir,
}

async fn start() -> Harness {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        file_storage_path: dir.path().join("files"),
        public_base_url: "http://test.local".to_string(),
        ..ServerConfig::default()
    };

    let store = StoreHandle::open_in_memory().unwrap();
    let alice = User::new("alice", "a@example.test");
    let bob = User::new("bob", "b@example.test");
    let mallory = User::new("mallory", "m@example.test");
    let chat = Chat::new(alice.id, bob.id);
    let (a, b, m, c) = (alice.clone(), bob.clone(), mallory.clone(), chat.clone());
    store
        .call(move |db| {
            db.insert_user(&a)?;
            db.insert_user(&b)?;
            db.insert_user(&m)?;
            db.insert_chat(&c)
        })
        .await
        .unwrap();

    let state = AppState::new(config, store).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        addr,
        state,
        alice,
        bob,
        mallory,
        chat,
        _dir: dir,
    }
}

async fn connect(h: &Harness, token: &str, chat_id: ChatId) -> Socket {
    let url = format!(
        "ws://{}/chatHub?chatId={}&access_token={}",
        h.addr, chat_id, token
    );
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

/// Admission finishes after the upgrade, so wait for the group to fill.
async fn wait_for_members(h: &Harness, count: usize) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while h.state.registry.member_count(h.chat.id).await < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("members never joined");
}

async fn next_frame(socket: &mut Socket) -> ServerFrame {
    loop {
        let message = tokio::time::timeout(STEP_TIMEOUT, socket.next())
            .await
            .expect("no frame received")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return ServerFrame::from_json(text.as_str()).unwrap();
        }
    }
}

async fn close_code(socket: &mut Socket) -> u16 {
    loop {
        let message = tokio::time::timeout(STEP_TIMEOUT, socket.next())
            .await
            .expect("no close frame received")
            .expect("socket ended without close frame")
            .unwrap();
        if let Message::Close(frame) = message {
            return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
        }
    }
}

fn send_text(h: &Harness, text: &str) -> Message {
    let frame = ClientFrame::SendMessage(SendMessage {
        chat_id: h.chat.id,
        receiver_id: h.bob.id,
        message_text: Some(text.to_string()),
        file_flag: FileFlag::None,
        file_id: None,
        file_extension: None,
    });
    Message::text(frame.to_json().unwrap())
}

#[tokio::test]
async fn test_message_reaches_both_participants() {
    let h = start().await;
    let alice_token = h.state.tokens.issue_access_token(&h.alice).unwrap();
    let bob_token = h.state.tokens.issue_access_token(&h.bob).unwrap();

    let mut alice = connect(&h, &alice_token, h.chat.id).await;
    let mut bob = connect(&h, &bob_token, h.chat.id).await;
    wait_for_members(&h, 2).await;

    alice.send(send_text(&h, "hi")).await.unwrap();

    for socket in [&mut bob, &mut alice] {
        match next_frame(socket).await {
            ServerFrame::NewMessage(view) => {
                assert_eq!(view.message_text.as_deref(), Some("hi"));
                assert_eq!(view.sender_id, h.alice.id);
                assert_eq!(view.receiver_id, h.bob.id);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    let history = h
        .state
        .pipeline
        .history(h.bob.id, h.chat.id, 50, 0)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message_text.as_deref(), Some("hi"));
}

#[tokio::test]
async fn test_invalid_submission_only_errors_sender() {
    let h = start().await;
    let alice_token = h.state.tokens.issue_access_token(&h.alice).unwrap();
    let bob_token = h.state.tokens.issue_access_token(&h.bob).unwrap();

    let mut alice = connect(&h, &alice_token, h.chat.id).await;
    let mut bob = connect(&h, &bob_token, h.chat.id).await;
    wait_for_members(&h, 2).await;

    alice.send(send_text(&h, "   ")).await.unwrap();
    match next_frame(&mut alice).await {
        ServerFrame::Error(e) => assert_eq!(e.kind, "validation"),
        other => panic!("unexpected frame: {other:?}"),
    }

    alice.send(Message::text("{not json")).await.unwrap();
    assert!(matches!(next_frame(&mut alice).await, ServerFrame::Error(_)));

    // Bob sees the next valid message first, not the errors.
    alice.send(send_text(&h, "second try")).await.unwrap();
    match next_frame(&mut bob).await {
        ServerFrame::NewMessage(view) => {
            assert_eq!(view.message_text.as_deref(), Some("second try"))
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_non_member_is_closed_with_forbidden() {
    let h = start().await;
    let token = h.state.tokens.issue_access_token(&h.mallory).unwrap();

    let mut socket = connect(&h, &token, h.chat.id).await;
    assert_eq!(close_code(&mut socket).await, 4003);
    assert_eq!(h.state.registry.group_count().await, 0);
}

#[tokio::test]
async fn test_bad_credentials_close_codes() {
    let h = start().await;

    let mut socket = connect(&h, "garbage", h.chat.id).await;
    assert_eq!(close_code(&mut socket).await, 4002);

    let token = h.state.tokens.issue_access_token(&h.alice).unwrap();
    let url = format!(
        "ws://{}/chatHub?chatId=not-a-chat&access_token={}",
        h.addr, token
    );
    let (mut socket, _) = connect_async(url).await.unwrap();
    assert_eq!(close_code(&mut socket).await, 4004);
}

#[tokio::test]
async fn test_connection_closed_when_token_expires() {
    let h = start().await;
    let short = TokenService::from_config(&h.state.config, h.state.store.clone())
        .with_access_ttl(chrono::Duration::seconds(2));
    let token = short.issue_access_token(&h.alice).unwrap();

    let mut socket = connect(&h, &token, h.chat.id).await;
    wait_for_members(&h, 1).await;

    assert_eq!(close_code(&mut socket).await, 4001);
    wait_for_members_to_leave(&h).await;
}

async fn wait_for_members_to_leave(h: &Harness) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while h.state.registry.member_count(h.chat.id).await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection never left its group");
}
