pub mod apply;
pub mod audit;
pub mod capture;
pub mod config;
pub mod drain;
pub mod index;
pub mod paths;
pub mod reviews;
pub mod trigger;
mod util;

pub use apply::ApplyArgs;
pub use audit::AuditArgs;
pub use capture::CaptureArgs;
pub use config::ConfigCmd;
pub use drain::DrainArgs;
pub use index::IndexArgs;
pub use paths::PathsArgs;
pub use reviews::ReviewsCmd;
pub use trigger::TriggerArgs;
