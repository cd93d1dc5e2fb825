mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{harness, wait_for_event, wait_for_joined};
use std::sync::Arc;
use std::time::Duration;
use twitch_link::bot::{BotEvent, BotExit, BotManager, BotState};
use twitch_link::store::{
    AuditEntry, LinkStore, LinkedIdentity, MemoryStore, SavedItem, TokenRecord,
};
use twitch_link::LinkError;
use uuid::Uuid;

/// Delegates to a `MemoryStore` but panics on the channel owner lookup.
struct PanickingOwnerStore(Arc<MemoryStore>);

#[async_trait]
impl LinkStore for PanickingOwnerStore {
    async fn latest_token_record(&self, login: &str) -> Result<Option<TokenRecord>, LinkError> {
        self.0.latest_token_record(login).await
    }

    async fn write_token_record(&self, record: &TokenRecord) -> Result<(), LinkError> {
        self.0.write_token_record(record).await
    }

    async fn delete_all_token_records(&self, login: &str) -> Result<(), LinkError> {
        self.0.delete_all_token_records(login).await
    }

    async fn delete_token_records_before(
        &self,
        login: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        self.0.delete_token_records_before(login, cutoff).await
    }

    async fn write_linked_identity(&self, identity: &LinkedIdentity) -> Result<(), LinkError> {
        self.0.write_linked_identity(identity).await
    }

    async fn clear_linked_identity(&self, user_id: Uuid) -> Result<(), LinkError> {
        self.0.clear_linked_identity(user_id).await
    }

    async fn linked_identity(&self, user_id: Uuid) -> Result<Option<LinkedIdentity>, LinkError> {
        self.0.linked_identity(user_id).await
    }

    async fn all_linked_identities(&self) -> Result<Vec<LinkedIdentity>, LinkError> {
        self.0.all_linked_identities().await
    }

    async fn owner_of_channel(&self, login: &str) -> Result<Option<Uuid>, LinkError> {
        panic!("corrupt owner row for {login}");
    }

    async fn latest_saved_item(&self, user_id: Uuid) -> Result<Option<SavedItem>, LinkError> {
        self.0.latest_saved_item(user_id).await
    }

    async fn write_audit_entry(&self, entry: &AuditEntry) -> Result<(), LinkError> {
        self.0.write_audit_entry(entry).await
    }
}

fn is_exit(channel: &str) -> impl Fn(&BotEvent) -> bool + '_ {
    move |e| matches!(e, BotEvent::Exited { channel: c, .. } if c == channel)
}

#[tokio::test]
async fn test_spawn_joins_with_given_token() {
    let h = harness();
    let mut events = h.state.bots.subscribe();

    h.state.bots.spawn("Shroud", "tok-1").unwrap();
    wait_for_joined(&mut events, "shroud").await;

    assert_eq!(h.state.bots.state("shroud"), Some(BotState::Joined));
    assert_eq!(h.connector.session("shroud").unwrap().access_token, "tok-1");
    let joins = h.store.audit_entries_by("join_channel");
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].message["action"], "bot_join_channel");
}

#[tokio::test]
async fn test_spawn_twice_is_rejected() {
    let h = harness();
    h.state.bots.spawn("shroud", "tok-1").unwrap();

    let err = h.state.bots.spawn("shroud", "tok-2").unwrap_err();
    assert!(matches!(err, LinkError::AlreadyRunning(c) if c == "shroud"));
    assert_eq!(h.state.bots.len(), 1);
}

#[tokio::test]
async fn test_teardown_unregistered_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.state.bots.teardown("nobody").await,
        Err(LinkError::NotFound(c)) if c == "nobody"
    ));
    assert!(h.state.bots.is_empty());

    // The registry stays usable afterwards.
    h.state.bots.spawn("nobody", "tok").unwrap();
    assert_eq!(h.state.bots.len(), 1);
}

#[tokio::test]
async fn test_teardown_closes_connection_and_reports_requested() {
    let h = harness();
    let mut events = h.state.bots.subscribe();
    h.state.bots.spawn("shroud", "tok").unwrap();
    wait_for_joined(&mut events, "shroud").await;

    h.state.bots.teardown("shroud").await.unwrap();

    let exit = wait_for_event(&mut events, is_exit("shroud")).await;
    assert_eq!(
        exit,
        BotEvent::Exited {
            channel: "shroud".into(),
            reason: BotExit::Requested
        }
    );
    assert!(h.connector.session("shroud").unwrap().is_closed());
    assert_eq!(h.state.bots.state("shroud"), None);
    assert!(h.store.audit_entries_by("connection_lost").is_empty());
}

#[tokio::test]
async fn test_teardown_during_connect() {
    let h = harness();
    h.connector.set_connect_delay(Duration::from_millis(200));
    let mut events = h.state.bots.subscribe();

    h.state.bots.spawn("shroud", "tok").unwrap();
    h.state.bots.teardown("shroud").await.unwrap();

    let exit = wait_for_event(&mut events, is_exit("shroud")).await;
    assert!(matches!(exit, BotEvent::Exited { reason: BotExit::Requested, .. }));
    assert!(h.state.bots.is_empty());
}

#[tokio::test]
async fn test_dropped_connection_is_removed_and_logged() {
    let h = harness();
    let mut events = h.state.bots.subscribe();
    h.state.bots.spawn("shroud", "tok").unwrap();
    wait_for_joined(&mut events, "shroud").await;

    h.connector.session("shroud").unwrap().drop_connection();

    let exit = wait_for_event(&mut events, is_exit("shroud")).await;
    assert!(matches!(exit, BotEvent::Exited { reason: BotExit::Dropped(_), .. }));
    assert!(h.state.bots.is_empty());
    assert_eq!(h.store.audit_entries_by("connection_lost").len(), 1);

    // A new bot can take the channel.
    h.state.bots.spawn("shroud", "tok-2").unwrap();
    wait_for_joined(&mut events, "shroud").await;
}

#[tokio::test]
async fn test_server_close_is_a_drop() {
    let h = harness();
    let mut events = h.state.bots.subscribe();
    h.state.bots.spawn("shroud", "tok").unwrap();
    wait_for_joined(&mut events, "shroud").await;

    h.connector.session("shroud").unwrap().close_from_server();

    let exit = wait_for_event(&mut events, is_exit("shroud")).await;
    assert!(matches!(exit, BotEvent::Exited { reason: BotExit::Dropped(_), .. }));
    assert!(h.state.bots.is_empty());
}

#[tokio::test]
async fn test_connect_failure_frees_the_channel() {
    let h = harness();
    h.connector.refuse("shroud");
    let mut events = h.state.bots.subscribe();

    h.state.bots.spawn("shroud", "expired").unwrap();

    let exit = wait_for_event(&mut events, is_exit("shroud")).await;
    assert!(matches!(exit, BotEvent::Exited { reason: BotExit::ConnectFailed(_), .. }));
    assert!(h.state.bots.is_empty());
    assert_eq!(h.store.audit_entries_by("connection_lost").len(), 1);
}

#[tokio::test]
async fn test_panicking_bot_task_frees_the_channel() {
    let h = harness();
    let bots = BotManager::new(
        h.connector.clone(),
        Arc::new(PanickingOwnerStore(h.store.clone())),
        "crosshairsbot",
    );
    let mut events = bots.subscribe();
    bots.spawn("shroud", "tok").unwrap();
    wait_for_joined(&mut events, "shroud").await;

    h.connector
        .session("shroud")
        .unwrap()
        .say_as("Viewer", "shroud", "!latestCH");

    let exit = wait_for_event(&mut events, is_exit("shroud")).await;
    assert_eq!(
        exit,
        BotEvent::Exited {
            channel: "shroud".into(),
            reason: BotExit::Dropped("bot task panicked".into())
        }
    );
    assert_eq!(bots.state("shroud"), None);
    assert_eq!(h.store.audit_entries_by("connection_lost").len(), 1);

    bots.spawn("shroud", "tok-2").unwrap();
    wait_for_joined(&mut events, "shroud").await;
    bots.shutdown_all().await;
}

#[tokio::test]
async fn test_commands_answer_and_failures_keep_connection_open() {
    let h = harness();
    let user = Uuid::new_v4();
    h.link(user, "shroud").await;
    let session = h.connector.session("shroud").unwrap();

    // No saved items yet.
    session.say_as("Viewer", "shroud", "!latestCH");
    let sent = session.wait_for_replies(1).await;
    assert_eq!(sent[0].0, "shroud");
    assert!(sent[0].1.starts_with("@Viewer -> "));
    assert!(!sent[0].1.contains("Latest crosshair"));

    session.say_as("Viewer", "shroud", "!status");
    let sent = session.wait_for_replies(2).await;
    assert_eq!(sent[1].1, "@Viewer -> Crosshairs bot is up and running!");

    let now = Utc::now();
    h.store.add_saved_item(user, "CSGO-older", now - ChronoDuration::days(2));
    h.store.add_saved_item(user, "CSGO-newest", now);

    session.say_as("Viewer", "shroud", "hello chat");
    session.say_as("Viewer", "shroud", "!latestCH");
    let sent = session.wait_for_replies(3).await;
    assert_eq!(sent[2].1, "@Viewer -> Latest crosshair on database: CSGO-newest");

    assert_eq!(h.state.bots.state("shroud"), Some(BotState::Joined));
    assert_eq!(h.store.audit_entries_by("handle_latest").len(), 2);
    assert_eq!(h.store.audit_entries_by("handle_status").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spawn_and_teardown_keep_one_handle_per_channel() {
    let h = harness();
    let bots = h.state.bots.clone();
    let mut workers = Vec::new();

    for i in 0..32 {
        let bots = bots.clone();
        workers.push(tokio::spawn(async move {
            let channel = format!("chan{}", i % 3);
            let mut accepted = 0;
            for _ in 0..20 {
                if bots.spawn(&channel, "tok").is_ok() {
                    accepted += 1;
                }
                assert!(bots.channels().iter().filter(|(c, _)| *c == channel).count() <= 1);
                if i % 2 == 1 {
                    let _ = bots.teardown(&channel).await;
                }
                tokio::task::yield_now().await;
            }
            accepted
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }

    assert!(bots.len() <= 3);
    bots.shutdown_all().await;
    assert!(bots.is_empty());
}

#[tokio::test]
async fn test_shutdown_all_stops_every_bot() {
    let h = harness();
    let mut events = h.state.bots.subscribe();
    for channel in ["one", "two", "three"] {
        h.state.bots.spawn(channel, "tok").unwrap();
        wait_for_joined(&mut events, channel).await;
    }

    h.state.bots.shutdown_all().await;

    assert!(h.state.bots.is_empty());
    for channel in ["one", "two", "three"] {
        assert!(h.connector.session(channel).unwrap().is_closed());
    }
}
