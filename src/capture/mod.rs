//! Screenshot rendering for placeholder and scripted frames.

pub mod framebuffer;

pub use framebuffer::{Framebuffer, RenderError, RenderResult, render_placeholder};
