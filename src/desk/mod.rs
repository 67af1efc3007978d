mod completion;
mod controller;
mod guard;
mod state;
mod store;

pub use completion::CompletionOutcome;
pub use controller::FrontDesk;
pub use state::DeskSnapshot;
pub use store::SessionStore;
