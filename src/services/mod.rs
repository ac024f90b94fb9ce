//! Services used by the processing pipeline
//!
//! - [`OutputFormatHandler`]: encoding selection and encoders
//! - [`Compositor`]: foreground over background blending

pub mod compositor;
pub mod format;

pub use compositor::Compositor;
pub use format::OutputFormatHandler;
