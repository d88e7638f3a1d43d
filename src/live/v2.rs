//! Codec for the command-wrapped gateway protocol.
//!
//! One shared socket serves every joined room. Frames are a command envelope
//! `{command, payload, timestamp?}`; only the `MESSAGE` command carries
//! application events, nested one level deeper as a string-encoded
//! `{eventName, eventPayload}` body. The mailbox/poll phase expansion and the
//! game vocabulary are shared with the legacy codec so consumers see one
//! taxonomy regardless of protocol.
//!
//! Malformed encoding at either nesting level is reported as a decode
//! observation; processing stops for that frame only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::live::event::{
    BlockEvent, Decoded, EventEnvelope, EventPayload, JoinEvent, LikeEvent, MessageEvent,
    PresentEvent, PresentLikeEvent, RankEvent, RoomPatch, TrayEvent, UpdateEvent, UseItemEvent,
    UserSummary,
};
use crate::live::legacy::{named_event, str_at, u64_at};

/// Gateway command vocabulary.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Command {
    #[serde(rename = "ACTIVATE_CHANNEL")]
    ActivateChannel,
    #[serde(rename = "DEACTIVATE_CHANNEL")]
    DeactivateChannel,
    #[serde(rename = "MESSAGE")]
    Message,
}

#[derive(Debug, Deserialize)]
struct GateFrame {
    command: Command,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(rename = "channelId")]
    channel_id: String,
    /// String-encoded `{eventName, eventPayload}` body.
    body: String,
}

/// Decodes one gateway frame.
pub fn decode(text: &str) -> Decoded {
    let raw: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => return Decoded::Malformed(format!("invalid frame json: {error}")),
    };
    let frame: GateFrame = match serde_json::from_value(raw.clone()) {
        Ok(frame) => frame,
        Err(error) => return Decoded::Malformed(format!("invalid command envelope: {error}")),
    };

    // Channel bookkeeping acknowledgements carry no application events.
    if frame.command != Command::Message {
        return Decoded::Skip;
    }

    let payload: MessagePayload = match serde_json::from_value(frame.payload) {
        Ok(payload) => payload,
        Err(error) => return Decoded::Malformed(format!("invalid message payload: {error}")),
    };
    let body: Value = match serde_json::from_str(&payload.body) {
        Ok(body) => body,
        Err(error) => return Decoded::Malformed(format!("invalid event body: {error}")),
    };

    // The shared vocabulary (game events, mailbox/poll phases) decodes
    // through the legacy mapper; gateway-only names follow.
    let event = named_event(&body).unwrap_or_else(|| gateway_event(&body));
    Decoded::Event(EventEnvelope::new(event, Some(payload.channel_id), raw))
}

fn gateway_event(body: &Value) -> EventPayload {
    let Some(name) = body.get("eventName").and_then(Value::as_str) else {
        return EventPayload::Unrecognized;
    };
    let payload = body.get("eventPayload").cloned().unwrap_or(Value::Null);
    match name {
        "ChatMessage" => EventPayload::Message(MessageEvent {
            text: str_at(&payload, &["message"]).unwrap_or_default(),
            user: generator(&payload),
        }),
        "RoomJoin" => EventPayload::Join(JoinEvent {
            user: generator(&payload),
        }),
        "RoomKick" => EventPayload::Block(BlockEvent {
            user: generator(&payload),
            target: payload.get("targetUser").map(|target| UserSummary {
                id: u64_at(target, &["id"]).unwrap_or_default(),
                nickname: str_at(target, &["nickname"]).unwrap_or_default(),
                profile_url: None,
                is_moderator: false,
            }),
        }),
        "LiveMetaUpdate" => EventPayload::Update(UpdateEvent {
            author: None,
            patch: meta_patch(&payload),
        }),
        "LiveDonation" => EventPayload::Present(PresentEvent {
            user: flat_user(&payload),
            sticker: str_at(&payload, &["sticker"]).unwrap_or_default(),
            amount: u64_at(&payload, &["amount"]).unwrap_or_default() as u32,
            combo: u64_at(&payload, &["combo"]).unwrap_or(1) as u32,
            message: str_at(&payload, &["donationMessage"]).filter(|msg| !msg.is_empty()),
        }),
        "LiveFreeLike" => EventPayload::Like(LikeEvent {
            user: flat_user(&payload),
            count: u64_at(&payload, &["count"]).unwrap_or(1) as u32,
        }),
        "LivePaidLike" => EventPayload::PresentLike(PresentLikeEvent {
            user: flat_user(&payload),
            sticker: str_at(&payload, &["sticker"]),
            amount: u64_at(&payload, &["amount"]).unwrap_or_default() as u32,
            combo: u64_at(&payload, &["combo"]).unwrap_or(1) as u32,
        }),
        "LiveItemUse" => EventPayload::UseItem(UseItemEvent {
            user: flat_user(&payload),
            item_id: u64_at(&payload, &["itemId"]).unwrap_or_default(),
            effect: str_at(&payload, &["effectType"]),
        }),
        "LiveRank" => EventPayload::Rank(RankEvent {
            now: str_at(&payload, &["nowRank"]).unwrap_or_default(),
            prev: str_at(&payload, &["prevRank"]).unwrap_or_default(),
            rise: payload.get("riseRank").and_then(Value::as_i64),
        }),
        "DonationTray" => EventPayload::DonationTray(TrayEvent {
            room_key: str_at(&payload, &["roomId"]).unwrap_or_default(),
            trays: payload.get("trays").cloned().unwrap_or(Value::Null),
        }),
        _ => EventPayload::Unrecognized,
    }
}

/// Meta-update fields folded into the room snapshot.
fn meta_patch(payload: &Value) -> RoomPatch {
    RoomPatch {
        title: str_at(payload, &["title"]),
        welcome_message: str_at(payload, &["notice"]),
        is_call: payload.get("isCalling").and_then(Value::as_bool),
        is_mute: payload.get("isMute").and_then(Value::as_bool),
        is_freeze: payload.get("isFreeze").and_then(Value::as_bool),
        like_count: u64_at(payload, &["likeCount"]).map(|count| count as u32),
        member_count: u64_at(payload, &["memberCount"]).map(|count| count as u32),
        total_member_count: u64_at(payload, &["totalMemberCount"]).map(|count| count as u32),
        donation_total: u64_at(payload, &["donationCount"]),
        moderator_ids: payload
            .get("managerIds")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_u64).collect()),
    }
}

fn generator(payload: &Value) -> UserSummary {
    let Some(node) = payload.get("generator") else {
        return UserSummary::default();
    };
    UserSummary {
        id: u64_at(node, &["id"]).unwrap_or_default(),
        nickname: str_at(node, &["nickname"]).unwrap_or_default(),
        profile_url: str_at(node, &["profileUrl"]),
        is_moderator: false,
    }
}

fn flat_user(payload: &Value) -> UserSummary {
    UserSummary {
        id: u64_at(payload, &["userId"]).unwrap_or_default(),
        nickname: str_at(payload, &["nickname"]).unwrap_or_default(),
        profile_url: str_at(payload, &["profileUrl"]),
        is_moderator: false,
    }
}

/// Channel activation command sent when joining a room.
pub fn activate_channel(channel_id: &str, live_token: &str) -> Value {
    json!({
        "command": "ACTIVATE_CHANNEL",
        "payload": {
            "channelId": channel_id,
            "liveToken": live_token,
        },
    })
}

/// Channel deactivation command sent when leaving a room.
pub fn deactivate_channel(channel_id: &str) -> Value {
    json!({
        "command": "DEACTIVATE_CHANNEL",
        "payload": {
            "channelId": channel_id,
        },
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{activate_channel, decode};
    use crate::live::event::{Decoded, EventKind, EventPayload};

    fn message_frame(channel: &str, body: serde_json::Value) -> String {
        json!({
            "command": "MESSAGE",
            "payload": {
                "channelId": channel,
                "userId": 1,
                "body": body.to_string(),
            },
            "timestamp": 1_700_000_000,
        })
        .to_string()
    }

    fn decoded(frame: &str) -> (EventKind, EventPayload, Option<String>) {
        match decode(frame) {
            Decoded::Event(envelope) => (envelope.kind, envelope.payload, envelope.channel),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn chat_message_decodes_through_both_nesting_levels() {
        let frame = message_frame(
            "stream-7",
            json!({
                "eventName": "ChatMessage",
                "eventPayload": {
                    "message": "hello",
                    "messageType": "GENERAL_MESSAGE",
                    "generator": {"id": 9, "nickname": "ann", "profileUrl": "a.png"}
                }
            }),
        );
        let (kind, payload, channel) = decoded(&frame);
        assert_eq!(kind, EventKind::Message);
        assert_eq!(channel.as_deref(), Some("stream-7"));
        let EventPayload::Message(event) = payload else {
            panic!("expected message payload");
        };
        assert_eq!(event.text, "hello");
        assert_eq!(event.user.id, 9);
    }

    #[test]
    fn mailbox_phases_share_the_legacy_vocabulary() {
        let kinds = ["START", "UPDATE", "END"].map(|command| {
            let frame = message_frame(
                "stream-7",
                json!({
                    "eventName": "LivePlayMailbox",
                    "eventPayload": {
                        "mailboxId": 8,
                        "mailboxCommand": command,
                        "mailboxTitle": "letters",
                        "mailboxCount": 2
                    }
                }),
            );
            decoded(&frame).0
        });
        assert_eq!(
            kinds,
            [
                EventKind::MailboxStart,
                EventKind::MailboxUpdate,
                EventKind::MailboxEnd
            ]
        );
    }

    #[test]
    fn poll_phases_share_the_legacy_vocabulary() {
        let frame = message_frame(
            "stream-7",
            json!({
                "eventName": "LivePlayPoll",
                "eventPayload": {
                    "pollId": 3,
                    "pollCommand": "END",
                    "pollTitle": "pick one",
                    "pollTotalCount": 20,
                    "pollOptions": [{"order": 0, "title": "a"}],
                    "pollResult": [{"item_order": 0, "count": 20}]
                }
            }),
        );
        let (kind, payload, _) = decoded(&frame);
        assert_eq!(kind, EventKind::PollEnd);
        let EventPayload::PollEnd(event) = payload else {
            panic!("expected poll end");
        };
        assert_eq!(event.poll.total_count, 20);
        assert!(event.poll.result.is_some());
    }

    #[test]
    fn meta_update_becomes_a_room_patch() {
        let frame = message_frame(
            "stream-7",
            json!({
                "eventName": "LiveMetaUpdate",
                "eventPayload": {
                    "title": "late night",
                    "notice": "welcome",
                    "isFreeze": true,
                    "likeCount": 44,
                    "memberCount": 12,
                    "managerIds": [5, 9]
                }
            }),
        );
        let (kind, payload, _) = decoded(&frame);
        assert_eq!(kind, EventKind::Update);
        let EventPayload::Update(event) = payload else {
            panic!("expected update payload");
        };
        assert_eq!(event.patch.title.as_deref(), Some("late night"));
        assert_eq!(event.patch.welcome_message.as_deref(), Some("welcome"));
        assert_eq!(event.patch.is_freeze, Some(true));
        assert_eq!(event.patch.moderator_ids, Some(vec![5, 9]));
    }

    #[test]
    fn kick_maps_actor_and_target() {
        let frame = message_frame(
            "stream-7",
            json!({
                "eventName": "RoomKick",
                "eventPayload": {
                    "targetUser": {"id": 3, "nickname": "spammer"},
                    "generator": {"id": 9, "nickname": "mod"}
                }
            }),
        );
        let (kind, payload, _) = decoded(&frame);
        assert_eq!(kind, EventKind::Block);
        let EventPayload::Block(event) = payload else {
            panic!("expected block payload");
        };
        assert_eq!(event.user.id, 9);
        assert_eq!(event.target.expect("target").id, 3);
    }

    #[test]
    fn unknown_event_name_is_unrecognized_with_channel() {
        let frame = message_frame("stream-7", json!({"eventName": "LiveMystery"}));
        let (kind, _, channel) = decoded(&frame);
        assert_eq!(kind, EventKind::Unrecognized);
        assert_eq!(channel.as_deref(), Some("stream-7"));
    }

    #[test]
    fn bookkeeping_commands_are_skipped() {
        let frame = json!({
            "command": "ACTIVATE_CHANNEL",
            "payload": {"channelId": "stream-7", "liveToken": "jwt"}
        })
        .to_string();
        assert!(matches!(decode(&frame), Decoded::Skip));
    }

    #[test]
    fn malformed_outer_frame_is_an_observation() {
        assert!(matches!(decode("{oops"), Decoded::Malformed(_)));
    }

    #[test]
    fn unknown_command_is_an_observation() {
        let frame = json!({"command": "RESET", "payload": {}}).to_string();
        assert!(matches!(decode(&frame), Decoded::Malformed(_)));
    }

    #[test]
    fn malformed_nested_body_is_an_observation() {
        let frame = json!({
            "command": "MESSAGE",
            "payload": {"channelId": "stream-7", "userId": 1, "body": "{broken"}
        })
        .to_string();
        assert!(matches!(decode(&frame), Decoded::Malformed(_)));
    }

    #[test]
    fn activate_command_wraps_channel_and_token() {
        let frame = activate_channel("stream-7", "room-jwt");
        assert_eq!(frame["command"], "ACTIVATE_CHANNEL");
        assert_eq!(frame["payload"]["channelId"], "stream-7");
        assert_eq!(frame["payload"]["liveToken"], "room-jwt");
    }
}
