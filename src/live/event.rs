//! Flat event taxonomy shared by the legacy and gateway codecs.
//!
//! Both protocols decode into the same [`EventKind`] vocabulary so consumers
//! never branch on the wire protocol. The kind is resolved exactly once at
//! decode time; overloaded wire events (mailbox, poll) are expanded into
//! distinct phase kinds before dispatch, so no consumer inspects an embedded
//! command field.

use secrecy::SecretString;
use serde_json::Value;

/// Event kinds produced by both codecs.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    Join,
    State,
    Update,
    Message,
    Like,
    Present,
    PresentLike,
    UseItem,
    Block,
    Rank,
    LuckyBoxCreate,
    LuckyBoxAccept,
    LuckyBoxResult,
    QuizCreate,
    QuizAccept,
    QuizResult,
    DonationTray,
    MailboxStart,
    MailboxUpdate,
    MailboxEnd,
    PollStart,
    PollUpdate,
    PollEnd,
    /// Frame decoded cleanly but matched no known event key.
    Unrecognized,
}

/// Actor attached to an event (user, author or generator on the wire).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserSummary {
    pub id: u64,
    pub nickname: String,
    pub profile_url: Option<String>,
    /// Stamped by the room session pre-hook from the moderator-id list.
    pub is_moderator: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateEvent {
    pub state: Option<String>,
    pub is_call: bool,
    pub is_mute: bool,
    pub is_freeze: bool,
    pub close_status: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateEvent {
    pub author: Option<UserSummary>,
    pub patch: RoomPatch,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageEvent {
    pub text: String,
    pub user: UserSummary,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct JoinEvent {
    pub user: UserSummary,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LikeEvent {
    pub user: UserSummary,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PresentEvent {
    pub user: UserSummary,
    pub sticker: String,
    pub amount: u32,
    pub combo: u32,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PresentLikeEvent {
    pub user: UserSummary,
    pub sticker: Option<String>,
    pub amount: u32,
    pub combo: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UseItemEvent {
    pub user: UserSummary,
    pub item_id: u64,
    pub effect: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockEvent {
    /// Moderator who issued the block.
    pub user: UserSummary,
    pub target: Option<UserSummary>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankEvent {
    pub now: String,
    pub prev: String,
    pub rise: Option<i64>,
}

/// Lucky-box and quiz events share one core shape; the variant-specific
/// extras (box info, quiz options, results) ride along untyped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GameEvent {
    pub room_key: String,
    pub donation_id: u64,
    pub item_id: u64,
    pub user: UserSummary,
    pub detail: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrayEvent {
    pub room_key: String,
    pub trays: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MailboxInfo {
    pub id: u64,
    pub title: String,
    pub total_count: u64,
    pub message: Option<String>,
    pub nickname: Option<String>,
    pub is_anonymous: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MailboxEvent {
    pub mailbox: MailboxInfo,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollOption {
    pub order: u32,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollInfo {
    pub id: u64,
    pub title: String,
    pub total_count: u64,
    pub options: Vec<PollOption>,
    pub result: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollEvent {
    pub poll: PollInfo,
}

/// Typed payload, one variant per [`EventKind`].
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    Join(JoinEvent),
    State(StateEvent),
    Update(UpdateEvent),
    Message(MessageEvent),
    Like(LikeEvent),
    Present(PresentEvent),
    PresentLike(PresentLikeEvent),
    UseItem(UseItemEvent),
    Block(BlockEvent),
    Rank(RankEvent),
    LuckyBoxCreate(GameEvent),
    LuckyBoxAccept(GameEvent),
    LuckyBoxResult(GameEvent),
    QuizCreate(GameEvent),
    QuizAccept(GameEvent),
    QuizResult(GameEvent),
    DonationTray(TrayEvent),
    MailboxStart(MailboxEvent),
    MailboxUpdate(MailboxEvent),
    MailboxEnd(MailboxEvent),
    PollStart(PollEvent),
    PollUpdate(PollEvent),
    PollEnd(PollEvent),
    Unrecognized,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Join(_) => EventKind::Join,
            Self::State(_) => EventKind::State,
            Self::Update(_) => EventKind::Update,
            Self::Message(_) => EventKind::Message,
            Self::Like(_) => EventKind::Like,
            Self::Present(_) => EventKind::Present,
            Self::PresentLike(_) => EventKind::PresentLike,
            Self::UseItem(_) => EventKind::UseItem,
            Self::Block(_) => EventKind::Block,
            Self::Rank(_) => EventKind::Rank,
            Self::LuckyBoxCreate(_) => EventKind::LuckyBoxCreate,
            Self::LuckyBoxAccept(_) => EventKind::LuckyBoxAccept,
            Self::LuckyBoxResult(_) => EventKind::LuckyBoxResult,
            Self::QuizCreate(_) => EventKind::QuizCreate,
            Self::QuizAccept(_) => EventKind::QuizAccept,
            Self::QuizResult(_) => EventKind::QuizResult,
            Self::DonationTray(_) => EventKind::DonationTray,
            Self::MailboxStart(_) => EventKind::MailboxStart,
            Self::MailboxUpdate(_) => EventKind::MailboxUpdate,
            Self::MailboxEnd(_) => EventKind::MailboxEnd,
            Self::PollStart(_) => EventKind::PollStart,
            Self::PollUpdate(_) => EventKind::PollUpdate,
            Self::PollEnd(_) => EventKind::PollEnd,
            Self::Unrecognized => EventKind::Unrecognized,
        }
    }

    /// Mutable access to the actor sub-object, when the payload carries one.
    /// This is the hook point for moderator stamping.
    pub fn user_mut(&mut self) -> Option<&mut UserSummary> {
        match self {
            Self::Join(event) => Some(&mut event.user),
            Self::Message(event) => Some(&mut event.user),
            Self::Like(event) => Some(&mut event.user),
            Self::Present(event) => Some(&mut event.user),
            Self::PresentLike(event) => Some(&mut event.user),
            Self::UseItem(event) => Some(&mut event.user),
            Self::Block(event) => Some(&mut event.user),
            Self::Update(event) => event.author.as_mut(),
            Self::LuckyBoxCreate(event)
            | Self::LuckyBoxAccept(event)
            | Self::LuckyBoxResult(event)
            | Self::QuizCreate(event)
            | Self::QuizAccept(event)
            | Self::QuizResult(event) => Some(&mut event.user),
            _ => None,
        }
    }

    /// Read access to the actor sub-object.
    pub fn user(&self) -> Option<&UserSummary> {
        match self {
            Self::Join(event) => Some(&event.user),
            Self::Message(event) => Some(&event.user),
            Self::Like(event) => Some(&event.user),
            Self::Present(event) => Some(&event.user),
            Self::PresentLike(event) => Some(&event.user),
            Self::UseItem(event) => Some(&event.user),
            Self::Block(event) => Some(&event.user),
            Self::Update(event) => event.author.as_ref(),
            Self::LuckyBoxCreate(event)
            | Self::LuckyBoxAccept(event)
            | Self::LuckyBoxResult(event)
            | Self::QuizCreate(event)
            | Self::QuizAccept(event)
            | Self::QuizResult(event) => Some(&event.user),
            _ => None,
        }
    }
}

/// One decoded inbound frame.
///
/// The kind is fixed at decode time and drives both specific and wildcard
/// dispatch; the raw frame rides along for consumers that need wire fields
/// outside the normalized payload.
#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub payload: EventPayload,
    /// Gateway channel the frame belongs to; absent on the legacy protocol.
    pub channel: Option<String>,
    pub raw: Value,
}

impl EventEnvelope {
    pub fn new(payload: EventPayload, channel: Option<String>, raw: Value) -> Self {
        Self {
            kind: payload.kind(),
            payload,
            channel,
            raw,
        }
    }
}

/// Outcome of decoding one inbound frame.
#[derive(Clone, Debug)]
pub enum Decoded {
    /// A dispatchable event.
    Event(EventEnvelope),
    /// Valid frame carrying nothing to dispatch (gateway bookkeeping
    /// commands).
    Skip,
    /// Malformed frame; reported as an observation and dropped, never an
    /// error past the decode boundary.
    Malformed(String),
}

/// Partial room update carried by an Update event.
///
/// Folded into [`RoomState`] field by field; absent fields leave state
/// untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoomPatch {
    pub title: Option<String>,
    pub welcome_message: Option<String>,
    pub is_call: Option<bool>,
    pub is_mute: Option<bool>,
    pub is_freeze: Option<bool>,
    pub like_count: Option<u32>,
    pub member_count: Option<u32>,
    pub total_member_count: Option<u32>,
    pub donation_total: Option<u64>,
    pub moderator_ids: Option<Vec<u64>>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Mutable snapshot of the joined room.
///
/// Created on join, merged from update events, discarded on close.
#[derive(Clone)]
pub struct RoomState {
    pub id: u64,
    /// Gateway channel key (stream name).
    pub channel: String,
    pub title: String,
    pub author_id: u64,
    pub member_count: u32,
    pub total_member_count: u32,
    pub like_count: u32,
    pub donation_total: u64,
    pub is_call: bool,
    pub is_mute: bool,
    pub is_freeze: bool,
    pub welcome_message: String,
    pub moderator_ids: Vec<u64>,
    /// Room-scoped token issued at join.
    pub room_token: SecretString,
}

impl RoomState {
    /// Folds a partial update into the snapshot, field by field.
    pub fn apply(&mut self, patch: &RoomPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(welcome_message) = &patch.welcome_message {
            self.welcome_message = welcome_message.clone();
        }
        if let Some(is_call) = patch.is_call {
            self.is_call = is_call;
        }
        if let Some(is_mute) = patch.is_mute {
            self.is_mute = is_mute;
        }
        if let Some(is_freeze) = patch.is_freeze {
            self.is_freeze = is_freeze;
        }
        if let Some(like_count) = patch.like_count {
            self.like_count = like_count;
        }
        if let Some(member_count) = patch.member_count {
            self.member_count = member_count;
        }
        if let Some(total_member_count) = patch.total_member_count {
            self.total_member_count = total_member_count;
        }
        if let Some(donation_total) = patch.donation_total {
            self.donation_total = donation_total;
        }
        if let Some(moderator_ids) = &patch.moderator_ids {
            self.moderator_ids = moderator_ids.clone();
        }
    }

    /// Membership test against the moderator-id list; false when empty.
    pub fn is_moderator(&self, user_id: u64) -> bool {
        self.moderator_ids.contains(&user_id)
    }
}
