//! Discovery-and-capture engine and report pipeline for janvlog: the
//! signaling client (C1), participant recorder (C2), room supervisor (C3),
//! server supervisor (C4), and report pipeline (C5) described in the
//! system specification, plus the event log store shared by C3 and C5.

pub mod errors;
pub mod log_store;
pub mod ogg_writer;
pub mod pipeline;
pub mod poll;
pub mod recorder;
pub mod room;
pub mod server;
pub mod settings;
pub mod signaling;

pub use recorder::ParticipantRecorder;
pub use room::RoomSupervisor;
pub use server::ServerSupervisor;
pub use signaling::SignalingClient;
