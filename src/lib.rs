// Export modules for use in tests
pub mod annotations;
pub mod error;
pub mod event_source;
pub mod geometry;
pub mod headless;
pub mod host;
pub mod panic_handler;
pub mod pen;
pub mod registry;
pub mod search;
pub mod selection;
pub mod settings;
pub mod surface;
pub mod viewer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the main entry points
pub use annotations::{Highlight, HighlightId, HighlightStore, Stroke, StrokeId, StrokeStore};
pub use error::{HostError, LoadError};
pub use host::{AdapterEvent, DocumentEngine, PdfHostAdapter};
pub use registry::PageCanvasRegistry;
pub use viewer::{Viewer, ViewerConfig, ViewerHost};
