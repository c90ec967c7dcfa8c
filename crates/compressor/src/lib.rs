pub mod capability;
pub mod config;
pub mod controller;
pub mod encode;
pub mod error;
pub mod events;
pub mod fs;
pub mod item;
pub mod notify;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod scan;
pub mod scheduler;
pub mod tool;
pub mod workspace;

pub use capability::{Capabilities, HardwareType};
pub use config::CompressorConfig;
pub use controller::{Collaborators, Compressor, CompressorHandle};
pub use error::CompressError;
pub use events::{BatchCounts, CompressorEvent};
pub use fs::{FileSystem, LocalFs};
pub use item::{Item, ItemStatus, Pass};
pub use notify::{LogSink, Notification, NotificationSink, Severity};
pub use planner::plan_video_bitrate;
pub use scan::{collect_videos, ScanResult};
pub use scheduler::{Scheduler, TokioScheduler};
