//! Conversation flow: sessions, the state machine and its handlers

pub mod dispatcher;
pub mod replies;
pub mod session;
pub mod state;
pub mod uploads;

pub use dispatcher::Dispatcher;
pub use replies::{Button, Outbound};
pub use session::{Session, SessionSnapshot, SessionStore};
pub use state::{resolve, Action, Command, Event, MenuAction, State, Transition, Upload};
pub use uploads::{TempUpload, UploadStore};
