//! Reserved message ids.
//!
//! Lifecycle events occupy `0x0100..=0x01FF`, authentication events
//! `0x0200..=0x02FF`. Application ids start at [`FIRST_APPLICATION_ID`].

use std::ops::RangeInclusive;

use crate::message::{Message, Payload};

pub const CONNECT_SUCCESS: u16 = 0x0100;
pub const TICK: u16 = 0x0101;
pub const CLOSE: u16 = 0x0102;
pub const ERROR: u16 = 0x0103;

pub const LOGIN: u16 = 0x0200;
pub const LOGIN_SUCCESS: u16 = 0x0201;
pub const LOGIN_FAILED: u16 = 0x0202;

pub const LIFECYCLE_IDS: RangeInclusive<u16> = 0x0100..=0x01FF;
pub const AUTH_IDS: RangeInclusive<u16> = 0x0200..=0x02FF;

pub const FIRST_APPLICATION_ID: u16 = 0x0300;

/// Whether `id` belongs to a reserved block.
pub fn is_reserved(id: u16) -> bool {
    id < FIRST_APPLICATION_ID
}

/// Wire name of a reserved event, if it is one.
pub fn event_name(id: u16) -> Option<&'static str> {
    match id {
        CONNECT_SUCCESS => Some("connect_success"),
        TICK => Some("tick"),
        CLOSE => Some("close"),
        ERROR => Some("error"),
        LOGIN => Some("login"),
        LOGIN_SUCCESS => Some("login_success"),
        LOGIN_FAILED => Some("login_failed"),
        _ => None,
    }
}

/// Build a reserved event message.
///
/// Returns `None` for ids that are not named reserved events.
pub fn event(id: u16, payload: Payload) -> Option<Message> {
    let name = event_name(id)?;
    Message::new(id, name).ok().map(|m| m.with_payload(payload))
}
