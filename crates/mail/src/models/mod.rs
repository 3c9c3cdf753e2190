//! Domain models for backed-up mail entities

mod attachment;
mod contact;
mod message;

pub use attachment::{Attachment, AttachmentId};
pub use contact::{Contact, ContactId};
pub use message::{EmailAddress, Message, MessageBuilder, MessageId, NewMessage};
