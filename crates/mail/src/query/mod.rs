//! Query API for the command-line front end
//!
//! Provides read-only functions that return stored data shaped for
//! display.

mod messages;

pub use messages::{
    MessageDetail, MessageSummary, format_size, get_message_detail, list_contacts,
    list_messages, search_contacts, search_messages,
};
