pub mod backend;
pub mod catalog;
pub mod log_parser;
pub mod types;

pub use backend::{BackendSelector, BackendTier};
pub use catalog::{ChannelCatalog, TimeFormat};
pub use log_parser::{LoadStage, LogParser, LogSource, ShortRowPolicy};
pub use types::{
    ChannelId, ChannelInfo, ChannelStats, ChannelType, DetailLevel, TelemetryTable,
    DEFAULT_TARGET_POINTS, DOWNSAMPLE_FACTORS,
};
