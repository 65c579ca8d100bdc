//! Replies to decoded client messages.

use serde_json::json;
use wisp_core::events::{self, FIRST_APPLICATION_ID, LOGIN, LOGIN_FAILED, LOGIN_SUCCESS};
use wisp_core::{Message, Payload};

/// Build the reply to `message`, if any.
///
/// `Login` is answered with `LoginSuccess` when `payload.user` is a
/// non-empty string and `LoginFailed` otherwise. Application messages are
/// echoed back unchanged. Other reserved ids get no reply.
pub fn respond(message: &Message) -> Option<Message> {
    match message.id() {
        LOGIN => {
            let mut payload = Payload::new();
            match message.get_str("user").filter(|user| !user.is_empty()) {
                Some(user) => {
                    payload.insert("user".to_string(), json!(user));
                    events::event(LOGIN_SUCCESS, payload)
                }
                None => {
                    payload.insert("reason".to_string(), json!("missing user"));
                    events::event(LOGIN_FAILED, payload)
                }
            }
        }
        id if id >= FIRST_APPLICATION_ID => Some(message.clone()),
        _ => None,
    }
}
