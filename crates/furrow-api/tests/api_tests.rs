use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use furrow_api::middleware::issue_token;
use furrow_api::{AppStateInner, router};
use furrow_db::Database;
use furrow_gateway::{Relay, Registry};
use furrow_notify::{MessageNotifier, NewMessageNotice};
use furrow_types::events::ServerEvent;
use furrow_types::models::NewMessage;

const SECRET: &str = "test-secret";

struct NoopNotifier;

#[async_trait]
impl MessageNotifier for NoopNotifier {
    async fn notify_new_message(&self, _notice: NewMessageNotice) {}
}

fn setup() -> (Router, Arc<Database>, Relay) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.upsert_user("u1", "Ada Farmer", None).unwrap();
    db.upsert_user("u2", "Ben Grower", None).unwrap();
    db.upsert_user("u3", "Cy Miller", None).unwrap();

    let relay = Relay::new(db.clone(), Registry::new(), Arc::new(NoopNotifier), None);
    let app = router(Arc::new(AppStateInner {
        db: db.clone(),
        relay: relay.clone(),
        jwt_secret: SECRET.into(),
    }));
    (app, db, relay)
}

fn send(db: &Database, from: &str, to: &str, content: &str) {
    db.insert_message(NewMessage::new(from, to, content, None)).unwrap();
}

fn get(uri: &str, user: &str) -> Request<Body> {
    let token = issue_token(SECRET, user, chrono::Duration::minutes(5)).unwrap();
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, user: &str) -> Request<Body> {
    let mut req = get(uri, user);
    *req.method_mut() = axum::http::Method::POST;
    req
}

async fn json(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let (app, _, _) = setup();

    let bare = Request::builder().uri("/conversations").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(bare).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let forged = Request::builder()
        .uri("/conversations")
        .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(forged).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn inbox_lists_latest_first_with_unread() {
    let (app, db, _) = setup();
    send(&db, "u2", "u1", "Still have carrots?");
    send(&db, "u2", "u1", "Need 10kg");
    send(&db, "u3", "u1", "Is the tractor for sale?");
    send(&db, "u1", "u3", "Yes");

    let (status, body) = json(app.clone(), get("/conversations", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["otherUser"]["id"], "u3");
    assert_eq!(rows[0]["lastMessage"]["content"], "Yes");
    assert_eq!(rows[0]["unreadCount"], 1);
    assert_eq!(rows[1]["otherUser"]["name"], "Ben Grower");
    assert_eq!(rows[1]["unreadCount"], 2);

    let (status, body) = json(app, get("/conversations/unread", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unread"], 3);
}

#[tokio::test]
async fn history_pages_with_a_cursor() {
    let (app, db, _) = setup();
    for i in 0..5 {
        send(&db, "u1", "u2", &format!("msg {}", i));
    }

    let (status, first) = json(app.clone(), get("/conversations/u1/messages?limit=3", "u2")).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<_> = first["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, ["msg 0", "msg 1", "msg 2"]);
    let cursor = first["nextCursor"].as_i64().unwrap();

    let uri = format!("/conversations/u1/messages?limit=3&cursor={}", cursor);
    let (_, second) = json(app.clone(), get(&uri, "u2")).await;
    assert_eq!(second["messages"].as_array().unwrap().len(), 2);
    assert!(second["nextCursor"].is_null());

    let (_, newest) = json(app, get("/conversations/u1/messages?limit=1&order=desc", "u2")).await;
    assert_eq!(newest["messages"][0]["content"], "msg 4");
    assert_eq!(newest["messages"][0]["sender"]["name"], "Ada Farmer");
}

#[tokio::test]
async fn history_rejects_self_and_unknown_users() {
    let (app, _, _) = setup();

    let (status, _) = json(app.clone(), get("/conversations/u1/messages", "u1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json(app, get("/conversations/ghost/messages", "u1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mark_read_updates_once_and_notifies_sender() {
    let (app, db, relay) = setup();
    send(&db, "u1", "u2", "one");
    send(&db, "u1", "u2", "two");

    let (_sender, mut sender_rx) = relay.open_session("u1");
    assert!(matches!(sender_rx.try_recv(), Ok(ServerEvent::Ready(_))));

    let (status, body) = json(app.clone(), post("/conversations/u1/read", "u2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 2);
    match sender_rx.try_recv() {
        Ok(ServerEvent::MessagesRead(payload)) => assert_eq!(payload.read_by, "u2"),
        other => panic!("expected messages-read, got {:?}", other),
    }

    let (status, body) = json(app.clone(), post("/conversations/u1/read", "u2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 0);
    assert!(sender_rx.try_recv().is_err());

    let (status, _) = json(app, post("/conversations/u2/read", "u2")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
