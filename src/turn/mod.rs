//! Conversational turn taking
//!
//! Turn states and events, the response interpreter, and the controller that
//! sequences a turn.

mod controller;
mod event;
mod response;

pub use controller::{
    ControllerHandle, DialogueController, DialogueSettings, IMAGE_SLOTS, TurnComponents,
};
pub use event::{EventReceiver, EventSender, StopTrigger, TurnEvent, TurnState, event_channel};
pub use response::{Emotion, InferenceResponse, parse_response};
