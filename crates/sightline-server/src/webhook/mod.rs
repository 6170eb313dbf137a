pub mod detector;
pub mod dispatcher;

pub use detector::{DetectedEvent, EventDetector};
pub use dispatcher::{sign_payload, DeliveryJob, DispatchSettings, WebhookDispatcher};
