#![deny(unsafe_code)]

//! Conversation state and the streaming session controller.
//!
//! A presentation layer owns one [`ConversationState`] and one
//! [`ChatController`], forwards user actions to the controller, and renders
//! whatever state comes back.

pub mod controller;
pub mod message;
pub mod session;
pub mod store;

pub use controller::{ChatController, GENERIC_FAILURE_MESSAGE, RequestOptions};
pub use message::{Message, MessageId, MessageIdAllocator, Role};
pub use session::{
    SessionState, SessionTransition, SessionTransitionRejection, SessionTransitionResult,
};
pub use store::{ConversationState, DEFAULT_GREETING};
