pub mod evaluator;
pub mod model;
pub mod protocol;
mod rooms;
mod session;
pub mod store;
mod ticker;

pub use rooms::RoomManager;
pub use session::{JoinedExam, SessionManager, StartedExam};
pub use ticker::TickerStore;
