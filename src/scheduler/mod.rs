pub mod campaign;
pub mod engine;

pub use campaign::{Campaign, CampaignSend, NewCampaign};
pub use engine::{CampaignEngine, SkipReason, TickReport, spawn_tick_loop};
