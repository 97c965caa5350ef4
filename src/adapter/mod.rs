// Engine adapter abstraction: the seam to the external inference engine.

pub mod traits;
