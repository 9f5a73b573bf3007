// forecourt-core: Fueling state machine and typed device clients on top of forecourt-link.

pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod fueling;
pub mod presenter;
pub mod timer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ControllerConfig, DeviceRoles, Timing};
pub use controller::{CycleOutcome, TransactionController};
pub use error::{AbortCode, CoreError};
pub use presenter::ScreenPresenter;
pub use timer::{IdleAction, IdleTimer};
