pub mod cancel;
pub mod clock;
pub mod controller;
pub mod error;
pub mod report;
pub mod settings;
pub mod speedtest;

pub use cancel::CancellationToken;
pub use controller::Controller;
pub use error::MeasureError;
pub use report::{ReportSink, StatusUpdate};
pub use settings::{Settings, UploadStrategy};
pub use speedtest::MeasurementKind;
