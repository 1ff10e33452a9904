pub mod event;
pub mod ids;
pub mod janus;
pub mod settings;

pub use event::{Event, EventKind, UserData};
pub use ids::{ParticipantId, RoomId};
pub use settings::{JanusSettings, MailSettings, Settings, SttSettings, StorageSettings};
