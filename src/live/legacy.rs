//! Codec for the legacy room socket protocol.
//!
//! Two dispatch keys coexist on this wire: game frames carry an explicit
//! `eventName` field, room frames carry an `event` field; `eventName` frames
//! take precedence. The overloaded mailbox/poll events arrive in both
//! encodings (an `eventName` body with an embedded command, or a `live_play`
//! room event discriminated by `play_type` + `emit_type`) and are expanded
//! here into distinct phase kinds.
//!
//! Decoding never fails past this boundary: unknown keys become an
//! unrecognized-kind envelope, malformed frames become
//! [`Decoded::Malformed`].

use serde_json::{json, Value};

use crate::live::event::{
    BlockEvent, Decoded, EventEnvelope, EventPayload, GameEvent, JoinEvent, LikeEvent,
    MailboxEvent, MailboxInfo, MessageEvent, PollEvent, PollInfo, PollOption, PresentEvent,
    PresentLikeEvent, RankEvent, RoomPatch, StateEvent, TrayEvent, UpdateEvent, UseItemEvent,
    UserSummary,
};

/// Outbound message type for requests expecting a response.
const TYPE_REQUEST: &str = "live_req";
/// Outbound message type for fire-and-forget reports.
const TYPE_REPORT: &str = "live_rpt";

/// Decodes one legacy frame.
pub fn decode(text: &str) -> Decoded {
    let raw: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => return Decoded::Malformed(format!("invalid frame json: {error}")),
    };

    let payload = named_event(&raw).unwrap_or_else(|| room_event(&raw));
    Decoded::Event(EventEnvelope::new(payload, None, raw))
}

/// Game sub-protocol dispatch, keyed by `eventName`. Returns `None` for
/// unknown names so the frame falls through to room dispatch.
///
/// The gateway protocol nests the identical shapes one level deeper, so its
/// codec delegates here for the shared vocabulary.
pub(crate) fn named_event(raw: &Value) -> Option<EventPayload> {
    let name = raw.get("eventName")?.as_str()?;
    let body = raw.get("eventPayload").cloned().unwrap_or(Value::Null);
    match name {
        "LuckyBoxCreate" => Some(EventPayload::LuckyBoxCreate(game_event(&body))),
        "LuckyBoxAccept" => Some(EventPayload::LuckyBoxAccept(game_event(&body))),
        "LuckyBoxResult" => Some(EventPayload::LuckyBoxResult(game_event(&body))),
        "QuizStart" => Some(EventPayload::QuizCreate(game_event(&body))),
        "QuizAccept" => Some(EventPayload::QuizAccept(game_event(&body))),
        "QuizResult" => Some(EventPayload::QuizResult(game_event(&body))),
        "DonationTray" => Some(EventPayload::DonationTray(TrayEvent {
            room_key: str_at(&body, &["roomId"]).unwrap_or_default(),
            trays: body.get("trays").cloned().unwrap_or(Value::Null),
        })),
        "LivePlayMailbox" => {
            let mailbox = MailboxEvent {
                mailbox: MailboxInfo {
                    id: u64_at(&body, &["mailboxId"]).unwrap_or_default(),
                    title: str_at(&body, &["mailboxTitle"]).unwrap_or_default(),
                    total_count: u64_at(&body, &["mailboxCount"]).unwrap_or_default(),
                    message: str_at(&body, &["submitter", "message"]),
                    nickname: str_at(&body, &["submitter", "nickname"]),
                    is_anonymous: body
                        .pointer("/submitter/isAnonymous")
                        .and_then(Value::as_bool),
                },
            };
            match str_at(&body, &["mailboxCommand"]).as_deref() {
                Some("START") => Some(EventPayload::MailboxStart(mailbox)),
                Some("UPDATE") => Some(EventPayload::MailboxUpdate(mailbox)),
                Some("END") => Some(EventPayload::MailboxEnd(mailbox)),
                _ => Some(EventPayload::Unrecognized),
            }
        }
        "LivePlayPoll" => {
            let options = body
                .get("pollOptions")
                .and_then(Value::as_array)
                .map(|options| {
                    options
                        .iter()
                        .enumerate()
                        .map(|(index, option)| PollOption {
                            order: u64_at(option, &["order"]).unwrap_or(index as u64) as u32,
                            name: str_at(option, &["title"])
                                .or_else(|| str_at(option, &["name"]))
                                .unwrap_or_default(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            let poll = PollEvent {
                poll: PollInfo {
                    id: u64_at(&body, &["pollId"]).unwrap_or_default(),
                    title: str_at(&body, &["pollTitle"]).unwrap_or_default(),
                    total_count: u64_at(&body, &["pollTotalCount"]).unwrap_or_default(),
                    options,
                    result: body.get("pollResult").cloned(),
                },
            };
            match str_at(&body, &["pollCommand"]).as_deref() {
                Some("START") => Some(EventPayload::PollStart(poll)),
                Some("UPDATE") => Some(EventPayload::PollUpdate(poll)),
                Some("END") => Some(EventPayload::PollEnd(poll)),
                _ => Some(EventPayload::Unrecognized),
            }
        }
        _ => None,
    }
}

/// Room sub-protocol dispatch, keyed by `event`.
fn room_event(raw: &Value) -> EventPayload {
    let Some(event) = raw.get("event").and_then(Value::as_str) else {
        return EventPayload::Unrecognized;
    };
    match event {
        "live_join" => EventPayload::Join(JoinEvent {
            user: user_at(raw, &["data", "author"]),
        }),
        "live_state" => EventPayload::State(StateEvent {
            state: str_at(raw, &["state"]),
            is_call: bool_at(raw, &["is_call"]),
            is_mute: bool_at(raw, &["is_mute"]),
            is_freeze: bool_at(raw, &["is_freeze"]),
            close_status: raw.get("close_status").and_then(Value::as_i64),
        }),
        "live_message" => EventPayload::Message(MessageEvent {
            text: str_at(raw, &["update_component", "message", "value"]).unwrap_or_default(),
            user: user_at(raw, &["data", "user"]),
        }),
        "live_block" => EventPayload::Block(BlockEvent {
            user: user_at(raw, &["data", "generator"]),
            target: raw
                .pointer("/data/author")
                .map(|_| user_at(raw, &["data", "author"])),
        }),
        "live_update" => EventPayload::Update(UpdateEvent {
            author: raw
                .pointer("/data/author")
                .map(|_| user_at(raw, &["data", "author"])),
            patch: raw
                .pointer("/data/live")
                .map(room_patch)
                .unwrap_or_default(),
        }),
        "live_like" => EventPayload::Like(LikeEvent {
            user: user_at(raw, &["data", "author"]),
            count: 1,
        }),
        "live_present" => EventPayload::Present(PresentEvent {
            user: user_at(raw, &["data", "author"]),
            sticker: str_at(raw, &["data", "sticker"]).unwrap_or_default(),
            amount: u64_at(raw, &["data", "amount"]).unwrap_or_default() as u32,
            combo: u64_at(raw, &["data", "combo"]).unwrap_or(1) as u32,
            message: str_at(raw, &["data", "donation_msg"]).filter(|msg| !msg.is_empty()),
        }),
        "live_present_like" => EventPayload::PresentLike(PresentLikeEvent {
            user: user_at(raw, &["data", "user"]),
            sticker: str_at(raw, &["update_component", "like", "sticker"]),
            amount: u64_at(raw, &["update_component", "like", "amount"]).unwrap_or_default()
                as u32,
            combo: u64_at(raw, &["update_component", "like", "combo"]).unwrap_or(1) as u32,
        }),
        "use_item" => {
            let first_use = raw
                .get("use_items")
                .and_then(Value::as_array)
                .and_then(|items| items.first())
                .cloned()
                .unwrap_or(Value::Null);
            EventPayload::UseItem(UseItemEvent {
                user: user_at(raw, &["data", "user"]),
                item_id: u64_at(&first_use, &["item_id"]).unwrap_or_default(),
                effect: str_at(&first_use, &["effect"]),
            })
        }
        "live_rank" => EventPayload::Rank(RankEvent {
            now: str_at(raw, &["order", "now"]).unwrap_or_default(),
            prev: str_at(raw, &["order", "prev"]).unwrap_or_default(),
            rise: raw.pointer("/order/incrby").and_then(Value::as_i64),
        }),
        "live_play" => live_play_event(raw),
        _ => EventPayload::Unrecognized,
    }
}

/// The older encoding of the mailbox/poll features: one `live_play` event
/// discriminated by `play_type` + `emit_type`.
fn live_play_event(raw: &Value) -> EventPayload {
    let play_type = str_at(raw, &["play_type"]).unwrap_or_default();
    let emit_type = str_at(raw, &["emit_type"]).unwrap_or_default();
    match play_type.as_str() {
        "mailbox" => {
            let body = raw.get("mailbox").cloned().unwrap_or(Value::Null);
            let mailbox = MailboxEvent {
                mailbox: MailboxInfo {
                    id: u64_at(&body, &["id"]).unwrap_or_default(),
                    title: str_at(&body, &["title"]).unwrap_or_default(),
                    total_count: u64_at(&body, &["total_count"]).unwrap_or_default(),
                    message: str_at(&body, &["message"]),
                    nickname: str_at(&body, &["nickname"]),
                    is_anonymous: body.get("is_anonymous").and_then(Value::as_bool),
                },
            };
            match emit_type.as_str() {
                "play_start" => EventPayload::MailboxStart(mailbox),
                "play_update" => EventPayload::MailboxUpdate(mailbox),
                "play_end" => EventPayload::MailboxEnd(mailbox),
                _ => EventPayload::Unrecognized,
            }
        }
        "poll" => {
            let body = raw.get("poll").cloned().unwrap_or(Value::Null);
            let options = body
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|item| PollOption {
                            order: u64_at(item, &["item_order"]).unwrap_or_default() as u32,
                            name: str_at(item, &["name"]).unwrap_or_default(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            let poll = PollEvent {
                poll: PollInfo {
                    id: u64_at(&body, &["id"]).unwrap_or_default(),
                    title: str_at(&body, &["title"]).unwrap_or_default(),
                    total_count: u64_at(&body, &["total_count"]).unwrap_or_default(),
                    options,
                    result: body.get("result").cloned(),
                },
            };
            match emit_type.as_str() {
                "play_start" => EventPayload::PollStart(poll),
                "play_update" => EventPayload::PollUpdate(poll),
                "play_end" => EventPayload::PollEnd(poll),
                _ => EventPayload::Unrecognized,
            }
        }
        _ => EventPayload::Unrecognized,
    }
}

fn game_event(body: &Value) -> GameEvent {
    GameEvent {
        room_key: str_at(body, &["roomId"]).unwrap_or_default(),
        donation_id: u64_at(body, &["donationId"]).unwrap_or_default(),
        item_id: u64_at(body, &["itemId"]).unwrap_or_default(),
        user: UserSummary {
            id: u64_at(body, &["sender", "userId"]).unwrap_or_default(),
            nickname: str_at(body, &["sender", "nickname"]).unwrap_or_default(),
            profile_url: str_at(body, &["sender", "profileImageUrl"]),
            is_moderator: false,
        },
        detail: body.clone(),
    }
}

/// Room fields carried by a `live_update` snapshot.
fn room_patch(live: &Value) -> RoomPatch {
    RoomPatch {
        title: str_at(live, &["title"]),
        welcome_message: str_at(live, &["welcome_message"]),
        is_call: live.get("is_call").and_then(Value::as_bool),
        is_mute: live.get("is_mute").and_then(Value::as_bool),
        is_freeze: live.get("is_freeze").and_then(Value::as_bool),
        like_count: u64_at(live, &["like_count"]).map(|count| count as u32),
        member_count: u64_at(live, &["member_count"]).map(|count| count as u32),
        total_member_count: u64_at(live, &["total_member_count"]).map(|count| count as u32),
        donation_total: u64_at(live, &["donation_total"]),
        moderator_ids: live.get("manager_ids").and_then(Value::as_array).map(|ids| {
            ids.iter().filter_map(Value::as_u64).collect()
        }),
    }
}

fn user_at(raw: &Value, path: &[&str]) -> UserSummary {
    let mut node = raw;
    for key in path {
        match node.get(key) {
            Some(next) => node = next,
            None => return UserSummary::default(),
        }
    }
    UserSummary {
        id: u64_at(node, &["id"]).unwrap_or_default(),
        nickname: str_at(node, &["nickname"]).unwrap_or_default(),
        profile_url: str_at(node, &["profile_url"]),
        is_moderator: false,
    }
}

pub(crate) fn str_at(raw: &Value, path: &[&str]) -> Option<String> {
    let mut node = raw;
    for key in path {
        node = node.get(key)?;
    }
    node.as_str().map(str::to_string)
}

pub(crate) fn u64_at(raw: &Value, path: &[&str]) -> Option<u64> {
    let mut node = raw;
    for key in path {
        node = node.get(key)?;
    }
    node.as_u64()
}

fn bool_at(raw: &Value, path: &[&str]) -> bool {
    let mut node = raw;
    for key in path {
        match node.get(key) {
            Some(next) => node = next,
            None => return false,
        }
    }
    node.as_bool().unwrap_or(false)
}

/// Prefixes `Bearer ` onto an outbound `token` field when missing.
pub fn ensure_bearer_token(frame: &mut Value) {
    let Some(token) = frame.get("token").and_then(Value::as_str) else {
        return;
    };
    if !token.starts_with("Bearer") {
        let prefixed = format!("Bearer {token}");
        frame["token"] = Value::String(prefixed);
    }
}

/// First handshake round-trip: request the room state.
pub fn state_request(room_id: u64, user_id: u64, app_version: &str, user_agent: &str) -> Value {
    json!({
        "live_id": room_id.to_string(),
        "appversion": app_version,
        "user_id": user_id,
        "event": "live_state",
        "type": TYPE_REQUEST,
        "useragent": user_agent,
    })
}

/// Second handshake round-trip: join with the room-scoped token.
pub fn join_request(room_id: u64, token: &str, app_version: &str, user_agent: &str) -> Value {
    json!({
        "live_id": room_id.to_string(),
        "appversion": app_version,
        "reconnect": false,
        "retry": 0,
        "token": token,
        "event": "live_join",
        "type": TYPE_REQUEST,
        "useragent": user_agent,
    })
}

/// Fire-and-forget top-ranking request sent after the join completes.
pub fn ranklist_request(room_id: u64, user_id: u64, user_agent: &str) -> Value {
    json!({
        "command": "top",
        "event": "live_ranklist",
        "live_id": room_id.to_string(),
        "type": TYPE_REQUEST,
        "user_id": user_id.to_string(),
        "useragent": user_agent,
    })
}

/// Leave report sent when closing the room.
pub fn leave_report(room_id: u64, token: &str, app_version: &str, user_agent: &str) -> Value {
    json!({
        "appversion": app_version,
        "event": "live_leave",
        "type": TYPE_REPORT,
        "token": token,
        "live_id": room_id.to_string(),
        "useragent": user_agent,
    })
}

/// One outbound chat chunk. The server expects double quotes pre-escaped.
pub fn message_report(text: &str, token: &str, app_version: &str, user_agent: &str) -> Value {
    json!({
        "type": TYPE_REPORT,
        "event": "live_message",
        "appversion": app_version,
        "useragent": user_agent,
        "token": token,
        "message": text.replace('"', "\\\""),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode, ensure_bearer_token, join_request, message_report};
    use crate::live::event::{Decoded, EventKind, EventPayload};

    fn decoded_kind(frame: serde_json::Value) -> EventKind {
        match decode(&frame.to_string()) {
            Decoded::Event(envelope) => envelope.kind,
            other => panic!("expected event, got {other:?}"),
        }
    }

    fn decoded_payload(frame: serde_json::Value) -> EventPayload {
        match decode(&frame.to_string()) {
            Decoded::Event(envelope) => envelope.payload,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn mailbox_named_event_expands_into_three_phases() {
        let phases = ["START", "UPDATE", "END"].map(|command| {
            decoded_kind(json!({
                "eventName": "LivePlayMailbox",
                "eventPayload": {
                    "mailboxId": 31,
                    "mailboxCommand": command,
                    "mailboxTitle": "letters",
                    "mailboxCount": 4,
                    "submitter": {"message": "hello", "nickname": "ann", "isAnonymous": false}
                }
            }))
        });
        assert_eq!(
            phases,
            [
                EventKind::MailboxStart,
                EventKind::MailboxUpdate,
                EventKind::MailboxEnd
            ]
        );
    }

    #[test]
    fn mailbox_payload_carries_feature_fields() {
        let payload = decoded_payload(json!({
            "eventName": "LivePlayMailbox",
            "eventPayload": {
                "mailboxId": 31,
                "mailboxCommand": "UPDATE",
                "mailboxTitle": "letters",
                "mailboxCount": 4,
                "submitter": {"message": "hello", "nickname": "ann"}
            }
        }));
        let EventPayload::MailboxUpdate(event) = payload else {
            panic!("expected mailbox update");
        };
        assert_eq!(event.mailbox.id, 31);
        assert_eq!(event.mailbox.title, "letters");
        assert_eq!(event.mailbox.total_count, 4);
        assert_eq!(event.mailbox.message.as_deref(), Some("hello"));
    }

    #[test]
    fn poll_live_play_encoding_expands_into_three_phases() {
        let phases = ["play_start", "play_update", "play_end"].map(|emit| {
            decoded_kind(json!({
                "event": "live_play",
                "live_id": 9,
                "play_type": "poll",
                "emit_type": emit,
                "poll": {
                    "id": 5,
                    "title": "lunch?",
                    "total_count": 12,
                    "items": [
                        {"item_order": 0, "name": "yes"},
                        {"item_order": 1, "name": "no"}
                    ]
                }
            }))
        });
        assert_eq!(
            phases,
            [EventKind::PollStart, EventKind::PollUpdate, EventKind::PollEnd]
        );
    }

    #[test]
    fn poll_payload_keeps_option_order() {
        let payload = decoded_payload(json!({
            "event": "live_play",
            "play_type": "poll",
            "emit_type": "play_start",
            "poll": {
                "id": 5,
                "title": "lunch?",
                "total_count": 0,
                "items": [{"item_order": 0, "name": "yes"}, {"item_order": 1, "name": "no"}]
            }
        }));
        let EventPayload::PollStart(event) = payload else {
            panic!("expected poll start");
        };
        assert_eq!(event.poll.options.len(), 2);
        assert_eq!(event.poll.options[1].name, "no");
    }

    #[test]
    fn event_name_takes_precedence_over_event_field() {
        let kind = decoded_kind(json!({
            "event": "live_message",
            "eventName": "LuckyBoxCreate",
            "eventPayload": {
                "roomId": "r1",
                "donationId": 2,
                "itemId": 3,
                "sender": {"userId": 12, "nickname": "bo"}
            }
        }));
        assert_eq!(kind, EventKind::LuckyBoxCreate);
    }

    #[test]
    fn game_event_maps_the_sender() {
        let payload = decoded_payload(json!({
            "eventName": "QuizStart",
            "eventPayload": {
                "roomId": "r7",
                "donationId": 20,
                "itemId": 9,
                "timeLimit": 30,
                "sender": {"userId": 12, "nickname": "bo", "profileImageUrl": "p.png"}
            }
        }));
        let EventPayload::QuizCreate(event) = payload else {
            panic!("expected quiz create");
        };
        assert_eq!(event.room_key, "r7");
        assert_eq!(event.user.id, 12);
        assert_eq!(event.detail["timeLimit"], 30);
    }

    #[test]
    fn chat_message_pulls_text_and_user() {
        let payload = decoded_payload(json!({
            "event": "live_message",
            "data": {"user": {"id": 9, "nickname": "mod"}},
            "update_component": {"message": {"value": "hi there"}}
        }));
        let EventPayload::Message(event) = payload else {
            panic!("expected message");
        };
        assert_eq!(event.text, "hi there");
        assert_eq!(event.user.id, 9);
        assert!(!event.user.is_moderator);
    }

    #[test]
    fn update_event_extracts_a_room_patch() {
        let payload = decoded_payload(json!({
            "event": "live_update",
            "data": {
                "author": {"id": 1, "nickname": "dj"},
                "live": {
                    "title": "night talk",
                    "member_count": 42,
                    "manager_ids": [5, 9]
                }
            }
        }));
        let EventPayload::Update(event) = payload else {
            panic!("expected update");
        };
        assert_eq!(event.patch.title.as_deref(), Some("night talk"));
        assert_eq!(event.patch.member_count, Some(42));
        assert_eq!(event.patch.moderator_ids, Some(vec![5, 9]));
        assert!(event.patch.like_count.is_none());
    }

    #[test]
    fn unknown_event_key_is_unrecognized_not_an_error() {
        let kind = decoded_kind(json!({"event": "live_mystery", "data": {}}));
        assert_eq!(kind, EventKind::Unrecognized);
    }

    #[test]
    fn frame_without_any_event_key_is_unrecognized() {
        let kind = decoded_kind(json!({"type": "live_rsp", "result": {"code": 200}}));
        assert_eq!(kind, EventKind::Unrecognized);
    }

    #[test]
    fn malformed_json_is_reported_not_thrown() {
        assert!(matches!(decode("{not json"), Decoded::Malformed(_)));
    }

    #[test]
    fn bearer_prefix_added_once() {
        let mut frame = json!({"token": "jwt-a"});
        ensure_bearer_token(&mut frame);
        assert_eq!(frame["token"], "Bearer jwt-a");
        ensure_bearer_token(&mut frame);
        assert_eq!(frame["token"], "Bearer jwt-a");
    }

    #[test]
    fn join_request_carries_room_and_token() {
        let frame = join_request(77, "room-jwt", "10.10.2", "agent");
        assert_eq!(frame["live_id"], "77");
        assert_eq!(frame["event"], "live_join");
        assert_eq!(frame["type"], "live_req");
        assert_eq!(frame["token"], "room-jwt");
    }

    #[test]
    fn message_report_escapes_double_quotes() {
        let frame = message_report(r#"say "hi""#, "t", "10.10.2", "agent");
        assert_eq!(frame["message"], r#"say \"hi\""#);
    }
}
