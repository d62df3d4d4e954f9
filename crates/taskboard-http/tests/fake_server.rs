//! HttpAuthority against a local fake of the board API

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use taskboard_http::{HttpAuthority, HttpConfig};
use taskboard_model::{CollectionId, EntityKind, FieldMap, FieldName, Identifier};
use taskboard_sync::{
    AuthorityError, CreateRequest, EntityRef, OrderRequest, RemoteAuthority, Scope,
    TransferRequest,
};
use warp::http::StatusCode;
use warp::Filter;

type Recorded = Arc<Mutex<Vec<(String, Value)>>>;

fn board_detail() -> Value {
    json!({
        "_id": "b1",
        "title": "Roadmap",
        "favourite": true,
        "sections": [
            { "_id": "s1", "title": "Todo", "tasks": [ { "_id": "t1", "title": "Draft" }, { "_id": "t2" } ] },
            { "_id": "s2", "title": "Done", "tasks": [] }
        ]
    })
}

/// Serve a fake API; returns its address and the log of write bodies
async fn serve() -> (SocketAddr, Recorded) {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let authorized = warp::header::exact("authorization", "Bearer secret");

    let list_boards = warp::path!("api" / "v1" / "boards")
        .and(warp::get())
        .and(warp::header::optional::<String>("authorization"))
        .map(|auth: Option<String>| {
            if auth.as_deref() == Some("Bearer secret") {
                warp::reply::with_status(
                    warp::reply::json(&json!([{ "_id": "b1", "title": "Roadmap" }, { "id": "b2" }])),
                    StatusCode::OK,
                )
            } else {
                warp::reply::with_status(warp::reply::json(&json!({})), StatusCode::UNAUTHORIZED)
            }
        });

    let one_board = warp::path!("api" / "v1" / "boards" / String)
        .and(warp::get())
        .and(authorized)
        .map(|id: String| {
            if id == "b1" {
                warp::reply::with_status(warp::reply::json(&board_detail()), StatusCode::OK)
            } else {
                warp::reply::with_status(
                    warp::reply::json(&json!({ "message": "board not found" })),
                    StatusCode::NOT_FOUND,
                )
            }
        });

    let log = Arc::clone(&recorded);
    let writes = warp::path::full()
        .and(warp::method())
        .and(warp::body::json())
        .and(authorized)
        .map(move |path: warp::path::FullPath, method: warp::http::Method, body: Value| {
            log.lock()
                .unwrap()
                .push((format!("{method} {}", path.as_str()), body.clone()));
            if body.get("title").and_then(Value::as_str).is_some_and(|t| t.len() > 20) {
                return warp::reply::with_status(
                    warp::reply::json(&json!({ "errors": [ { "param": "title", "msg": "Title is too long" } ] })),
                    StatusCode::BAD_REQUEST,
                );
            }
            let reply = if method == warp::http::Method::POST {
                json!({ "_id": "new1", "title": body.get("title").cloned().unwrap_or_default() })
            } else {
                json!({})
            };
            warp::reply::with_status(warp::reply::json(&reply), StatusCode::OK)
        });

    let deletes = warp::path!("api" / "v1" / "boards" / String)
        .and(warp::delete())
        .and(authorized)
        .map(|_id: String| warp::reply::with_status(warp::reply::json(&json!({})), StatusCode::NO_CONTENT));

    let routes = list_boards.or(one_board).or(deletes).or(writes);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (addr, recorded)
}

fn authority(addr: SocketAddr) -> HttpAuthority {
    HttpAuthority::new(&HttpConfig::new(format!("http://{addr}/api/v1")).with_token("secret")).unwrap()
}

fn ids(items: &[&str]) -> Vec<Identifier> {
    items.iter().map(|id| Identifier::from(*id)).collect()
}

#[tokio::test]
async fn lists_boards_with_normalized_ids() {
    let (addr, _) = serve().await;
    let records = authority(addr).fetch(Scope::Boards).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["id"], "b1");
    assert_eq!(records[1]["id"], "b2");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let (addr, _) = serve().await;
    let anonymous = HttpAuthority::new(&HttpConfig::new(format!("http://{addr}/api/v1"))).unwrap();

    let err = anonymous.fetch(Scope::Boards).await.unwrap_err();
    assert_eq!(err, AuthorityError::Unauthorized);
}

#[tokio::test]
async fn tasks_are_read_from_the_board_record() {
    let (addr, _) = serve().await;
    let records = authority(addr)
        .fetch(Scope::Tasks {
            board: "b1".into(),
            section: "s1".into(),
        })
        .await
        .unwrap();

    let task_ids: Vec<&str> = records.iter().filter_map(|r| r["id"].as_str()).collect();
    assert_eq!(task_ids, vec!["t1", "t2"]);
}

#[tokio::test]
async fn unknown_board_is_not_found() {
    let (addr, _) = serve().await;
    let err = authority(addr).fetch_board("zz".into()).await.unwrap_err();
    assert_eq!(err, AuthorityError::NotFound("board not found".into()));
}

#[tokio::test]
async fn board_reorder_sends_complete_order() {
    let (addr, recorded) = serve().await;
    authority(addr)
        .persist_order(OrderRequest::Reorder {
            scope: Scope::Boards,
            collection: CollectionId::boards(),
            order: ids(&["b2", "b1"]),
        })
        .await
        .unwrap();

    let log = recorded.lock().unwrap();
    assert_eq!(log[0].0, "PUT /api/v1/boards");
    assert_eq!(log[0].1, json!({ "boards": [ { "id": "b2" }, { "id": "b1" } ] }));
}

#[tokio::test]
async fn transfer_sends_both_task_lists() {
    let (addr, recorded) = serve().await;
    let ack = authority(addr)
        .persist_order(OrderRequest::Transfer(TransferRequest {
            board: "b1".into(),
            moved: "t2".into(),
            source: "s1".into(),
            source_order: ids(&["t1"]),
            destination: "s2".into(),
            destination_order: ids(&["t2"]),
        }))
        .await
        .unwrap();

    assert_eq!(ack.orders.len(), 2);
    let log = recorded.lock().unwrap();
    assert_eq!(log[0].0, "PUT /api/v1/boards/b1/tasks/update-position");
    assert_eq!(
        log[0].1,
        json!({
            "resourceList": [ { "id": "t1" } ],
            "destinationList": [ { "id": "t2" } ],
            "resourceSectionId": "s1",
            "destinationSectionId": "s2",
        })
    );
}

#[tokio::test]
async fn task_create_names_its_section() {
    let (addr, recorded) = serve().await;
    let record = authority(addr)
        .create(CreateRequest {
            kind: EntityKind::Task,
            board: Some("b1".into()),
            section: Some("s2".into()),
            seed: FieldMap::new(),
        })
        .await
        .unwrap();

    assert_eq!(record["id"], "new1");
    let log = recorded.lock().unwrap();
    assert_eq!(log[0].0, "POST /api/v1/boards/b1/tasks");
    assert_eq!(log[0].1, json!({ "sectionId": "s2" }));
}

#[tokio::test]
async fn rejected_title_names_the_field() {
    let (addr, _) = serve().await;
    let err = authority(addr)
        .update(
            EntityRef::section("b1".into(), "s1".into()),
            FieldMap::single(FieldName::TITLE, "a title that is far too long"),
        )
        .await
        .unwrap_err();

    assert_eq!(err, AuthorityError::invalid_field(FieldName::TITLE, "Title is too long"));
}

#[tokio::test]
async fn update_without_record_echoes_fields() {
    let (addr, recorded) = serve().await;
    let record = authority(addr)
        .update(
            EntityRef::board("b1".into()),
            FieldMap::single(FieldName::FAVOURITE, true),
        )
        .await
        .unwrap();

    assert_eq!(record, json!({ "id": "b1", "favourite": true }));
    assert_eq!(recorded.lock().unwrap()[0].0, "PUT /api/v1/boards/b1");
}

#[tokio::test]
async fn delete_board() {
    let (addr, _) = serve().await;
    authority(addr)
        .delete(EntityRef::board("b1".into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn unreachable_server_is_transient() {
    let (addr, _) = serve().await;
    // Nothing listens on the port right after it is released.
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    assert_ne!(closed, addr);

    let err = authority(closed).fetch(Scope::Boards).await.unwrap_err();
    assert!(err.is_retryable());
}
