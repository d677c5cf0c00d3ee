use std::{
    collections::{BTreeSet, HashSet},
    time::Duration,
};

use tempfile::TempDir;
use tokio::sync::mpsc;
use townsquare::{
    client::RoomClient,
    db::{self, Identity, MessageStatus},
    ChangeEvent, ChatError, ChatService, Notification, Notifier, Session,
};
use uuid::Uuid;

struct Town {
    chat: ChatService,
    _dir: TempDir,
}

impl Town {
    async fn new() -> Self {
        Self::with_capacity(64).await
    }

    async fn with_capacity(capacity: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("town.db").display());
        let pool = db::connect(&url, 8).await.unwrap();
        Self {
            chat: ChatService::new(pool, Notifier::new(capacity), 50),
            _dir: dir,
        }
    }

    async fn neighbour(&self, name: &str) -> (Identity, Session) {
        let id = Uuid::now_v7();
        self.chat.provision_profile(id, name, None, None).await.unwrap();
        (id, Session::new(id))
    }
}

async fn next_change(sub: &mut townsquare::Subscription) -> ChangeEvent {
    match tokio::time::timeout(Duration::from_secs(2), sub.recv()).await {
        Ok(Ok(Notification::Change(event))) => event,
        other => panic!("expected a change event, got {other:?}"),
    }
}

#[tokio::test]
async fn first_conversation() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;

    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();
    assert_eq!(town.chat.list_members(&a_session, room).await.unwrap(), BTreeSet::from([a, b]));
    assert_eq!(town.chat.get_or_create_room(&b_session, b, a).await.unwrap(), room);
    assert_eq!(town.chat.list_rooms(&b_session, b).await.unwrap().len(), 1);

    let mut a_sub = town.chat.subscribe(&a_session, room).await.unwrap();

    let before = town.chat.get_room(&a_session, room).await.unwrap().last_message_at;
    let hi = town.chat.send_message(&a_session, room, a, "Hi", None).await.unwrap();
    assert_eq!(hi.status, MessageStatus::Sent);
    let after = town.chat.get_room(&a_session, room).await.unwrap();
    assert_eq!(after.last_message_at, hi.created_at);
    assert!(after.last_message_at >= before);
    assert_eq!(next_change(&mut a_sub).await, ChangeEvent::MessageInserted(hi.clone()));

    // B opens the room in the foreground
    let b_client = RoomClient::open(town.chat.clone(), b_session.clone(), room, true).await.unwrap();
    let seen = b_client.view().messages().next().unwrap();
    assert_eq!(seen.status, MessageStatus::Read);
    assert!(seen.read_at.is_some());

    match next_change(&mut a_sub).await {
        ChangeEvent::MessageUpdated(updated) => {
            assert_eq!(updated.id, hi.id);
            assert_eq!(updated.status, MessageStatus::Read);
            assert!(updated.read_at.is_some());
        }
        other => panic!("expected the read receipt, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_room_requests_share_one_room() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let chat = town.chat.clone();
            let (session, x, y) = if i % 2 == 0 {
                (a_session.clone(), a, b)
            } else {
                (b_session.clone(), b, a)
            };
            tokio::spawn(async move { chat.get_or_create_room(&session, x, y).await.unwrap() })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap());
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(town.chat.list_rooms(&a_session, a).await.unwrap().len(), 1);

    let (rooms,): (i64,) = sqlx::query_as("SELECT count(*) FROM rooms")
        .fetch_one(town.chat.db_pool())
        .await
        .unwrap();
    assert_eq!(rooms, 1);
}

#[tokio::test]
async fn self_chat_and_impersonation_are_rejected() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, _) = town.neighbour("Ben").await;

    assert!(matches!(
        town.chat.get_or_create_room(&a_session, a, a).await,
        Err(ChatError::InvalidArgument(_))
    ));
    // room creation must be requested by the declared creator
    assert!(matches!(
        town.chat.get_or_create_room(&a_session, b, a).await,
        Err(ChatError::Unauthorized)
    ));
}

#[tokio::test]
async fn messages_keep_insertion_order() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();

    let mut sent = Vec::new();
    for i in 0..12 {
        let (user, session) = if i % 3 == 0 { (b, &b_session) } else { (a, &a_session) };
        sent.push(town.chat.send_message(session, room, user, &format!("#{i}"), None).await.unwrap().id);
    }

    let listed = town.chat.list_messages(&b_session, room).await.unwrap();
    assert!(listed.windows(2).all(|w| (w[0].created_at, w[0].seq) < (w[1].created_at, w[1].seq)));
    assert_eq!(listed.iter().map(|m| m.id).collect::<Vec<_>>(), sent);

    let page = town.chat.list_messages_after(&a_session, room, listed[9].seq, None).await.unwrap();
    assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), sent[10..]);
}

#[tokio::test]
async fn statuses_only_move_forward() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();
    let hi = town.chat.send_message(&a_session, room, a, "Hi", None).await.unwrap();

    let mut observed = vec![hi.status];
    observed.extend(town.chat.mark_delivered(&b_session, room, b).await.unwrap().iter().map(|m| m.status));
    observed.extend(town.chat.mark_read(&b_session, room, b).await.unwrap().iter().map(|m| m.status));
    assert!(town.chat.mark_delivered(&b_session, room, b).await.unwrap().is_empty());
    observed.push(town.chat.list_messages(&a_session, room).await.unwrap()[0].status);

    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(observed.last(), Some(&MessageStatus::Read));

    assert!(matches!(
        town.chat.advance_status(&b_session, hi.id, MessageStatus::Delivered).await,
        Err(ChatError::Conflict(_))
    ));
    // the sender does not drive its own message's status
    assert!(matches!(
        town.chat.advance_status(&a_session, hi.id, MessageStatus::Read).await,
        Err(ChatError::Unauthorized)
    ));
}

#[tokio::test]
async fn marking_read_twice_changes_nothing() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();
    town.chat.send_message(&a_session, room, a, "one", None).await.unwrap();
    town.chat.send_message(&a_session, room, a, "two", None).await.unwrap();

    assert_eq!(town.chat.mark_read(&b_session, room, b).await.unwrap().len(), 2);
    let once = town.chat.list_messages(&b_session, room).await.unwrap();
    assert!(town.chat.mark_read(&b_session, room, b).await.unwrap().is_empty());
    assert_eq!(town.chat.list_messages(&b_session, room).await.unwrap(), once);

    // marking on someone else's behalf is not allowed
    assert!(matches!(town.chat.mark_read(&a_session, room, b).await, Err(ChatError::Unauthorized)));
}

#[tokio::test]
async fn outsiders_get_nothing() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, _) = town.neighbour("Ben").await;
    let (c, c_session) = town.neighbour("Cleo").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();
    town.chat.send_message(&a_session, room, a, "private", None).await.unwrap();

    let errors = [
        town.chat.list_messages(&c_session, room).await.unwrap_err(),
        town.chat.send_message(&c_session, room, c, "hello?", None).await.unwrap_err(),
        town.chat.subscribe(&c_session, room).await.err().unwrap(),
        town.chat.room_snapshot(&c_session, room).await.unwrap_err(),
        town.chat.set_typing(&c_session, room, c, true).await.unwrap_err(),
        // a member cannot write as someone else either
        town.chat.send_message(&a_session, room, b, "as Ben", None).await.unwrap_err(),
    ];
    for err in errors {
        assert!(matches!(err, ChatError::Unauthorized));
        assert!(!err.to_string().contains("private"));
        assert!(!err.to_string().contains(&room.to_string()));
    }
}

#[tokio::test]
async fn signed_out_subscriptions_stop_receiving() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();

    let mut b_sub = town.chat.subscribe(&b_session, room).await.unwrap();
    b_session.sign_out();
    town.chat.send_message(&a_session, room, a, "still there?", None).await.unwrap();

    assert!(matches!(b_sub.recv().await, Err(ChatError::Unauthorized)));
    assert!(matches!(town.chat.list_messages(&b_session, room).await, Err(ChatError::Unauthorized)));
}

#[tokio::test]
async fn typing_and_callbacks_fan_out() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = town
        .chat
        .subscribe_with(&a_session, room, move |next| {
            let _ = tx.send(next);
        })
        .await
        .unwrap();
    assert!(handle.is_active());

    town.chat.set_typing(&b_session, room, b, true).await.unwrap();
    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    match got {
        Ok(Notification::Change(ChangeEvent::MembershipUpdated(m))) => {
            assert_eq!(m.user_id, b);
            assert!(m.is_typing);
        }
        other => panic!("expected a typing update, got {other:?}"),
    }

    handle.unsubscribe();
    for _ in 0..50 {
        if town.chat.notifier().subscriber_count(room) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(town.chat.notifier().subscriber_count(room), 0);
}

#[tokio::test]
async fn hidden_client_delivers_then_reads_on_return() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();

    let mut b_client = RoomClient::open(town.chat.clone(), b_session, room, false).await.unwrap();
    let hi = town.chat.send_message(&a_session, room, a, "Hi", None).await.unwrap();

    b_client.next().await.unwrap();
    let stored = &town.chat.list_messages(&a_session, room).await.unwrap()[0];
    assert_eq!(stored.id, hi.id);
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert_eq!(b_client.view().unread(), 1);

    b_client.set_visible(true).await.unwrap();
    assert_eq!(b_client.view().unread(), 0);
    assert_eq!(town.chat.list_messages(&a_session, room).await.unwrap()[0].status, MessageStatus::Read);
}

#[tokio::test]
async fn client_send_reconciles_and_failures_keep_the_draft() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, _) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();

    let mut a_client = RoomClient::open(town.chat.clone(), a_session.clone(), room, true).await.unwrap();
    let sent = a_client.send("bike for sale").await.unwrap();
    assert!(sent.client_ref.is_some());

    // our own insert comes back through the subscription and merges
    a_client.next().await.unwrap();
    assert_eq!(a_client.view().messages().count(), 1);
    assert!(a_client.view().pending().is_empty());

    let failure = a_client.send("   ").await.unwrap_err();
    assert_eq!(failure.draft, "   ");
    assert!(matches!(failure.error, ChatError::InvalidArgument(_)));
    assert!(a_client.view().pending().is_empty());
}

#[tokio::test]
async fn lagging_subscriber_is_told_to_resync() {
    let town = Town::with_capacity(2).await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();

    let mut b_sub = town.chat.subscribe(&b_session, room).await.unwrap();
    for i in 0..5 {
        town.chat.send_message(&a_session, room, a, &format!("#{i}"), None).await.unwrap();
    }

    assert!(matches!(b_sub.recv().await.unwrap(), Notification::Resync { missed: 3 }));
    let snapshot = town.chat.room_snapshot(&b_session, room).await.unwrap();
    assert_eq!(snapshot.messages.len(), 5);
}

#[tokio::test]
async fn reconnecting_client_catches_up() {
    let town = Town::new().await;
    let (a, a_session) = town.neighbour("Ana").await;
    let (b, b_session) = town.neighbour("Ben").await;
    let room = town.chat.get_or_create_room(&a_session, a, b).await.unwrap();

    let mut b_client = RoomClient::open(town.chat.clone(), b_session, room, false).await.unwrap();
    town.chat.send_message(&a_session, room, a, "while you were away", None).await.unwrap();
    town.chat.send_message(&a_session, room, a, "and this", None).await.unwrap();

    b_client.reconnect().await.unwrap();
    let contents: Vec<_> = b_client.view().messages().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["while you were away", "and this"]);
    assert!(b_client.view().cursor() > 0);
}
