//! Pure permission and rate-limit decisions.
//!
//! Nothing here touches state or the clock; callers pass the server's `now`.

use huddle_protocol::{ChatMode, ChatSettings, Role};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ChatError;

/// Whether `role` may post under `mode`. Unknown modes deny everyone.
pub fn can_send(mode: ChatMode, role: Role) -> bool {
    match mode {
        ChatMode::AllMembers => true,
        ChatMode::ModeratorsOnly => role.is_staff(),
        ChatMode::OwnerOnly => role == Role::Owner,
        ChatMode::Disabled | ChatMode::Unknown => false,
    }
}

/// Time left before the next send is allowed, or `None` if it is allowed now.
pub fn slowmode_remaining(
    slowmode_seconds: u32,
    last_send_at: Option<Instant>,
    now: Instant,
) -> Option<Duration> {
    if slowmode_seconds == 0 {
        return None;
    }
    let last = last_send_at?;
    let window = Duration::from_secs(u64::from(slowmode_seconds));
    let elapsed = now.saturating_duration_since(last);
    (elapsed < window).then(|| window - elapsed)
}

pub fn can_slowmode_send(slowmode_seconds: u32, last_send_at: Option<Instant>, now: Instant) -> bool {
    slowmode_remaining(slowmode_seconds, last_send_at, now).is_none()
}

/// Only owners pin.
pub fn can_pin(role: Role) -> bool {
    role == Role::Owner
}

pub fn can_delete(role: Role, is_author: bool) -> bool {
    role == Role::Owner || is_author
}

/// Announcements are owner-only.
pub fn can_announce(role: Role) -> bool {
    role == Role::Owner
}

/// Full send decision, in the order the room applies it: mode, announcement
/// flag, then slowmode.
pub fn check_send(
    settings: ChatSettings,
    role: Role,
    is_announcement: bool,
    last_send_at: Option<Instant>,
    now: Instant,
    exempt_staff: bool,
) -> Result<(), ChatError> {
    if !can_send(settings.chat_mode, role) {
        return Err(match settings.chat_mode {
            ChatMode::Disabled | ChatMode::Unknown => ChatError::ChatDisabled,
            _ => ChatError::InsufficientRole,
        });
    }

    if is_announcement && !can_announce(role) {
        return Err(ChatError::InsufficientRole);
    }

    if exempt_staff && role.is_staff() {
        return Ok(());
    }

    match slowmode_remaining(settings.slowmode_seconds, last_send_at, now) {
        Some(remaining) => Err(ChatError::SlowmodeActive {
            remaining_seconds: ceil_secs(remaining),
        }),
        None => Ok(()),
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs }
}
