use courier_config::DatabaseConfig;
use courier_protocol::{ChatMessage, Identity, MessageKind, MessageStatus};
use courier_store::{
    open_message_store, prepare_database, run_migrations, MessageStore, SqliteMessageStore,
    StoreError,
};
use tempfile::TempDir;

async fn sqlite_store() -> (SqliteMessageStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite:{}", temp_dir.path().join("courier.db").display()),
        max_connections: 1,
    };
    let pool = prepare_database(&config).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (SqliteMessageStore::new(pool), temp_dir)
}

#[tokio::test]
async fn stores_and_reads_back_direct_message() {
    let (store, _dir) = sqlite_store().await;
    let mut message = ChatMessage::direct(Identity::from("alice"), Identity::from("bob"), "hello");
    message.kind = MessageKind::Image;
    message.media_url = Some("https://cdn.example/a.png".into());
    message.status = MessageStatus::Sent;

    store.create(&message).await.unwrap();
    let found = store.find(&message.id).await.unwrap().unwrap();

    assert_eq!(found.id, message.id);
    assert_eq!(found.sender_id, Identity::from("alice"));
    assert_eq!(found.receiver_id, Some(Identity::from("bob")));
    assert_eq!(found.group_id, None);
    assert_eq!(found.kind, MessageKind::Image);
    assert_eq!(found.media_url.as_deref(), Some("https://cdn.example/a.png"));
    assert_eq!(found.status, MessageStatus::Sent);
    assert_eq!(found.created_at.timestamp(), message.created_at.timestamp());
}

#[tokio::test]
async fn stores_group_message() {
    let (store, _dir) = sqlite_store().await;
    let message = ChatMessage::group(Identity::from("alice"), "team", "standup");

    store.create(&message).await.unwrap();
    let found = store.find(&message.id).await.unwrap().unwrap();

    assert_eq!(found.group_id.as_deref(), Some("team"));
    assert!(found.receiver_id.is_none());
}

#[tokio::test]
async fn duplicate_insert_is_reported() {
    let (store, _dir) = sqlite_store().await;
    let message = ChatMessage::direct(Identity::from("alice"), Identity::from("bob"), "x");

    store.create(&message).await.unwrap();
    let err = store.create(&message).await.unwrap_err();

    assert!(matches!(err, StoreError::Duplicate { id } if id == message.id));
}

#[tokio::test]
async fn status_updates_are_monotonic() {
    let (store, _dir) = sqlite_store().await;
    let mut message = ChatMessage::direct(Identity::from("alice"), Identity::from("bob"), "x");
    message.status = MessageStatus::Sent;
    store.create(&message).await.unwrap();

    store
        .update_status(&message.id, MessageStatus::Delivered)
        .await
        .unwrap();
    // Repeating the current status is accepted.
    store
        .update_status(&message.id, MessageStatus::Delivered)
        .await
        .unwrap();

    let err = store
        .update_status(&message.id, MessageStatus::Sent)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::IllegalTransition {
            from: MessageStatus::Delivered,
            to: MessageStatus::Sent,
            ..
        }
    ));

    let found = store.find(&message.id).await.unwrap().unwrap();
    assert_eq!(found.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn missing_message_is_none_or_not_found() {
    let (store, _dir) = sqlite_store().await;

    assert!(store.find("nope").await.unwrap().is_none());
    let err = store
        .update_status("nope", MessageStatus::Sent)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn memory_url_selects_memory_store() {
    let config = DatabaseConfig {
        url: "memory".into(),
        max_connections: 1,
    };
    let store = open_message_store(&config).await.unwrap();
    let message = ChatMessage::direct(Identity::from("alice"), Identity::from("bob"), "x");

    store.create(&message).await.unwrap();
    assert!(store.find(&message.id).await.unwrap().is_some());
}
