use teloxide::types::{ChatId, MessageId, UserId};

use crate::transport::ChatTransport;

const SCAN_WINDOW_MULTIPLIER: i32 = 4;
const MAX_ATTEMPTS: u32 = 5;

/// Windowed message scan (4.C). Direct generalisation of
/// `leech.py::_find_consecutive_files`: chats interleave bot replies with
/// user files, so a contiguous read from the anchor id would miss files:
/// scan a window of `4*N` ids, keep the ones from `user_id` that carry
/// media, advance past the window, and give up after `MAX_ATTEMPTS` rounds.
pub fn scan_for_media<T: ChatTransport>(
    transport: &T,
    chat: ChatId,
    anchor: MessageId,
    user_id: UserId,
    needed: usize,
) -> Vec<MessageId> {
    let mut collected: Vec<MessageId> = Vec::with_capacity(needed);
    let scan_range = needed as i32 * SCAN_WINDOW_MULTIPLIER;
    let mut start_id = anchor.0;
    let mut attempts = 0;

    while collected.len() < needed && attempts < MAX_ATTEMPTS {
        for candidate_id in start_id..start_id + scan_range {
            if collected.len() >= needed {
                break;
            }
            let Some(message) = transport.message(chat, MessageId(candidate_id)) else {
                continue;
            };
            if message.from_user != Some(user_id) {
                continue;
            }
            if message.media.is_none() {
                continue;
            }
            if collected.contains(&message.message_id) {
                continue;
            }
            collected.push(message.message_id);
        }

        start_id += scan_range;
        attempts += 1;
    }

    collected.sort_by_key(|id| id.0);
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChatMessage, FakeChatTransport, MediaKind};

    fn seed_media(transport: &FakeChatTransport, chat: ChatId, id: i32, user: UserId) {
        transport.seed(
            chat,
            ChatMessage { message_id: MessageId(id), from_user: Some(user), media: Some(MediaKind::Video), file_id: None, file_name: None },
        );
    }

    fn seed_text(transport: &FakeChatTransport, chat: ChatId, id: i32, user: UserId) {
        transport.seed(
            chat,
            ChatMessage { message_id: MessageId(id), from_user: Some(user), media: None, file_id: None, file_name: None },
        );
    }

    #[test]
    fn interleaved_bot_replies_are_skipped() {
        let transport = FakeChatTransport::new();
        let chat = ChatId(1);
        let user = UserId(42);
        let bot = UserId(999);
        seed_media(&transport, chat, 100, user);
        seed_text(&transport, chat, 101, bot);
        seed_media(&transport, chat, 102, user);
        seed_text(&transport, chat, 103, bot);
        seed_media(&transport, chat, 104, user);

        let found = scan_for_media(&transport, chat, MessageId(100), user, 3);
        assert_eq!(found, vec![MessageId(100), MessageId(102), MessageId(104)]);
    }

    #[test]
    fn stops_short_when_chat_runs_out_of_messages() {
        let transport = FakeChatTransport::new();
        let chat = ChatId(1);
        let user = UserId(42);
        seed_media(&transport, chat, 100, user);

        let found = scan_for_media(&transport, chat, MessageId(100), user, 5);
        assert_eq!(found, vec![MessageId(100)]);
    }

    #[test]
    fn messages_from_another_user_are_ignored() {
        let transport = FakeChatTransport::new();
        let chat = ChatId(1);
        let user = UserId(42);
        let other = UserId(7);
        seed_media(&transport, chat, 100, other);
        seed_media(&transport, chat, 101, user);

        let found = scan_for_media(&transport, chat, MessageId(100), user, 1);
        assert_eq!(found, vec![MessageId(101)]);
    }

    #[test]
    fn result_is_deduplicated_and_ordered_by_message_id() {
        let transport = FakeChatTransport::new();
        let chat = ChatId(1);
        let user = UserId(42);
        seed_media(&transport, chat, 105, user);
        seed_media(&transport, chat, 100, user);

        let found = scan_for_media(&transport, chat, MessageId(100), user, 2);
        assert_eq!(found, vec![MessageId(100), MessageId(105)]);
    }

    #[test]
    fn gives_up_after_max_attempts_beyond_the_scan_window() {
        let transport = FakeChatTransport::new();
        let chat = ChatId(1);
        let user = UserId(42);
        // needed=1 -> scan_range=4; MAX_ATTEMPTS=5 rounds cover ids [100,120).
        // Seed a matching message just past that reachable range.
        seed_media(&transport, chat, 120, user);

        let found = scan_for_media(&transport, chat, MessageId(100), user, 1);
        assert!(found.is_empty());
    }
}
