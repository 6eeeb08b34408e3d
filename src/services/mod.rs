pub mod cleanup;
pub mod dispatcher;
pub mod event_bus;
pub mod firmware;
pub mod html;
pub mod model_poller;
pub mod queue;
pub mod rasterizer;
pub mod render_worker;
pub mod resolver;
pub mod scheduler;

pub use cleanup::CleanupTask;
pub use dispatcher::{BaseUrl, DisplayDecision, DisplayOutcome, Dispatcher};
pub use event_bus::{BusEvent, EventBus};
pub use firmware::{FirmwareLocation, FirmwarePoller, FirmwareService};
pub use html::HtmlRenderer;
pub use model_poller::ModelPoller;
pub use queue::RenderQueue;
pub use rasterizer::{HttpRasterizer, Rasterizer};
pub use render_worker::{RenderWorkerPool, WorkerContext};
pub use scheduler::RefreshScheduler;
