pub mod composite;
pub mod composite_math;
pub mod painter;

pub use composite::{CompositeOp, CompositeOpId, CompositeParams, Mask};
pub use painter::Painter;
