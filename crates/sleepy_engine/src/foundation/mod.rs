//! Small shared building blocks: nalgebra aliases and the frame timer

pub mod math;
pub mod time;
