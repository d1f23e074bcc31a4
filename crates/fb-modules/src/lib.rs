//! Built-in control and demo processors.
//!
//! These are the generic vertices of a workflow: sources, pass-throughs,
//! fan-in joiners and the sequence adapters (accumulate a sequence into a
//! vector, unstack a vector into a sequence). Device-bound modules
//! (cameras, stages, light controllers) live outside this workspace and
//! plug into the same [`Processor`](fb_runtime::Processor) seam.

pub mod combine;
pub mod delayer;
pub mod freeze;
pub mod probe;
pub mod seq_accumulator;
pub mod unstack;
pub mod value_gen;

pub use combine::pair_combiner;
pub use delayer::delayer;
pub use freeze::freeze;
pub use probe::{ProbeHandle, probe};
pub use seq_accumulator::seq_accumulator;
pub use unstack::unstack_array;
pub use value_gen::{ValueGenConfig, value_gen};
