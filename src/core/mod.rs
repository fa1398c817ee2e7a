pub mod classifier;
pub mod device;
pub mod eject;
pub mod handler;
pub mod notifications;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod ripper;
pub mod source;
pub mod supervisor;
pub mod watchdog;

pub use classifier::{Classification, classify};
pub use device::{DeviceEvent, DiscKind, MediaState, PropertyBag};
pub use eject::{EjectMode, EjectStrategy};
pub use handler::{
    Capabilities, DiscHandler, HandlerOutcome, OutcomeMessage, OutcomeSender, RipRequest,
    RipperFactory, Rippers,
};
pub use orchestrator::Orchestrator;
pub use progress::{ProgressTracker, RipProgress};
pub use registry::{HandlerRecord, HandlerRegistry, HandlerState, RegistryError};
pub use source::{DeviceMonitor, EventSource, Polled};
pub use supervisor::Supervisor;
pub use watchdog::{DispatchError, Watchdog};
