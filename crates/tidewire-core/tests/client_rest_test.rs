// Integration tests for the REST-backed paths of `ChatClient` using wiremock.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tidewire_api::{ConnectRequest, Error, Session};
use tidewire_core::{
    ApiClient, ChannelKey, ChatClient, ClientOptions, ConversationTab, CoreError, HistoryQuery,
    HttpConfig, MetadataUpdate, PageRequest, PullMode, TagFilter, Transport,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// These tests never open the realtime link.
struct OfflineTransport;

#[async_trait]
impl Transport for OfflineTransport {
    async fn open(&self, _request: &ConnectRequest) -> Result<Session, Error> {
        Err(Error::WebSocketConnect("offline".into()))
    }
}

async fn setup() -> (MockServer, ChatClient) {
    let server = MockServer::start().await;
    let api = ApiClient::new(
        server.uri().parse().unwrap(),
        &SecretString::from("staff-token".to_owned()),
        &HttpConfig::default(),
    )
    .unwrap();
    let client = ChatClient::with_api(Arc::new(OfflineTransport), api, ClientOptions::default());
    (server, client)
}

fn conversation(channel_id: &str, ts: i64, text: &str) -> serde_json::Value {
    json!({
        "channel_id": channel_id,
        "channel_type": 251,
        "timestamp": ts,
        "recents": [{
            "message_id": ts,
            "channel_id": channel_id,
            "channel_type": 251,
            "timestamp": ts,
            "payload": { "type": 1, "content": text }
        }]
    })
}

// ── Snapshot refresh ────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_tab_drops_malformed_and_sorts() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/conversations/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversations": [
                conversation("visitor-old", 1_700_000_000, "earlier"),
                { "channel_type": 251, "timestamp": 1_800_000_000 },
                conversation("visitor-new", 1_700_000_500, "later"),
            ]
        })))
        .mount(&server)
        .await;

    let merged = client
        .refresh_tab(ConversationTab::All, PageRequest::default(), None)
        .await
        .unwrap();

    let ids: Vec<&str> = merged.iter().map(|c| c.channel_key.channel_id()).collect();
    assert_eq!(ids, vec!["visitor-new", "visitor-old"]);
    assert_eq!(merged[0].last_message_summary, "later");
}

#[tokio::test]
async fn test_one_undecodable_record_keeps_the_rest_of_the_page() {
    let (server, client) = setup().await;

    let mut nulls = conversation("visitor-nulls", 1_700_000_200, "nulls");
    nulls["unread"] = json!(null);
    let mut wide = conversation("visitor-wide", 1_700_000_300, "wide");
    wide["channel_type"] = json!(4096);
    let mut garbled = conversation("visitor-garbled", 1_700_000_400, "garbled");
    garbled["unread"] = json!("many");

    Mock::given(method("POST"))
        .and(path("/v1/conversations/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversations": [
                conversation("visitor-good", 1_700_000_100, "fine"),
                nulls,
                wide,
                garbled,
            ],
            "channels": [{ "channel_id": 7 }]
        })))
        .mount(&server)
        .await;

    let merged = client
        .refresh_tab(ConversationTab::All, PageRequest::default(), None)
        .await
        .unwrap();

    let ids: Vec<&str> = merged.iter().map(|c| c.channel_key.channel_id()).collect();
    assert_eq!(ids, vec!["visitor-nulls", "visitor-good"]);
    assert_eq!(merged[0].unread_count, 0);
}

#[tokio::test]
async fn test_snapshot_records_ignore_tag_filter() {
    let (server, client) = setup().await;

    let mut tagged = conversation("visitor-a", 1_700_000_000, "hello");
    tagged["tags"] = json!([{ "id": "billing" }]);

    Mock::given(method("POST"))
        .and(path("/v1/conversations/waiting"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "conversations": [tagged] })),
        )
        .mount(&server)
        .await;

    let filter = TagFilter::new(["vip"]);
    let merged = client
        .refresh_tab(ConversationTab::Waiting, PageRequest::default(), Some(&filter))
        .await
        .unwrap();

    assert_eq!(merged.len(), 1);
    let key = ChannelKey::new("visitor-a", 251);
    assert_eq!(
        client.reconciler().retry().resolved_tags(&key),
        Some(vec!["billing".to_owned()])
    );
}

#[tokio::test]
async fn test_my_tab_records_channel_metadata() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/conversations/my"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversations": [],
            "channels": [{
                "channel_id": "visitor-a",
                "channel_type": 251,
                "name": "Ada",
                "tags": [{ "id": "vip" }]
            }]
        })))
        .mount(&server)
        .await;

    client
        .fetch_snapshot(ConversationTab::My, PageRequest::default())
        .await
        .unwrap();

    let meta = client
        .reconciler()
        .retry()
        .metadata(&ChannelKey::new("visitor-a", 251))
        .unwrap();
    assert_eq!(meta.name.as_deref(), Some("Ada"));
}

#[tokio::test]
async fn test_snapshot_server_error_surfaces_status() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/conversations/all"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = client
        .refresh_tab(ConversationTab::All, PageRequest::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Api { status: Some(503), .. }));
}

#[tokio::test]
async fn test_malformed_page_body_is_an_unexpected_response() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/conversations/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "conversations": 5 })))
        .mount(&server)
        .await;

    let err = client
        .refresh_tab(ConversationTab::All, PageRequest::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnexpectedResponse { .. }));
}

// ── Metadata ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_metadata_fetch_resolves_tags() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/channels/info"))
        .and(query_param("channel_id", "visitor-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "channel_id": "visitor-a",
            "channel_type": 251,
            "tags": [{ "id": "vip", "name": "VIP" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let retry = client.reconciler().retry();
    let mut updates = retry.subscribe();
    let key = ChannelKey::new("visitor-a", 251);

    assert!(retry.ensure(&key));
    assert_eq!(updates.recv().await.unwrap(), MetadataUpdate::Resolved(key.clone()));
    assert_eq!(retry.resolved_tags(&key), Some(vec!["vip".to_owned()]));
}

// ── Reply cancellation ──────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_reply_posts_and_marks_stream() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/ai/runs/cancel"))
        .and(body_json(json!({ "client_msg_no": "c-1", "reason": "user" })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "accepted": true })))
        .expect(1)
        .mount(&server)
        .await;

    client.cancel_reply("c-1", Some("user")).await.unwrap();

    assert!(!client.streams().on_delta("c-1", "late"));
    assert_eq!(client.streams().get_state("c-1").unwrap().content, "");
}

#[tokio::test]
async fn test_mark_read_resets_backend_counter() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/conversations/unread"))
        .and(body_json(
            json!({ "channel_id": "visitor-a", "channel_type": 251, "unread": 0 }),
        ))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .mark_read(&ChannelKey::new("visitor-a", 251))
        .await
        .unwrap();
}

// ── Conversation management ─────────────────────────────────────────

#[tokio::test]
async fn test_delete_conversation_targets_channel() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/conversations"))
        .and(body_json(json!({ "channel_id": "visitor-a", "channel_type": 251 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "message": "Conversation deleted successfully" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    client
        .delete_conversation(&ChannelKey::new("visitor-a", 251))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_missing_conversation_surfaces_status() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/conversations"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "detail": "Conversation not found" })),
        )
        .mount(&server)
        .await;

    let err = client
        .delete_conversation(&ChannelKey::new("visitor-z", 251))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Api { status: Some(404), .. }));
}

#[tokio::test]
async fn test_channel_history_orders_and_skips_bad_messages() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/conversations/messages"))
        .and(body_json(json!({
            "channel_id": "visitor-a",
            "channel_type": 251,
            "start_message_seq": 10,
            "end_message_seq": 0,
            "limit": 3,
            "pull_mode": 1
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "more": 0,
            "messages": [
                { "message_seq": 12, "timestamp": 1_700_000_012,
                  "payload": { "type": 1, "content": "third" } },
                { "message_seq": "eleven" },
                { "message_seq": 10, "channel_id": "visitor-a", "channel_type": 251,
                  "timestamp": 1_700_000_010, "payload": { "type": 2 } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let channel = ChannelKey::new("visitor-a", 251);
    let query = HistoryQuery {
        start_seq: 10,
        limit: 3,
        pull_mode: PullMode::Up,
        ..HistoryQuery::default()
    };
    let history = client.channel_history(&channel, query).await.unwrap();

    assert!(!history.more);
    let seqs: Vec<u64> = history.messages.iter().map(|m| m.message_seq).collect();
    assert_eq!(seqs, vec![10, 12]);
    assert_eq!(history.messages[1].channel, channel);
    assert_eq!(history.messages[0].summary(), "[Image]");
}
