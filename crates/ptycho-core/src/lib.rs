//! Iterative ptychographic reconstruction engine.
//!
//! Stage 1: patch indexing, backends, overlap projection
//! Stage 2: Fourier constraint, adjoint update, constraint pipeline
//! Stage 3: probe initialization, preprocessing, reconstruction loop

pub mod adjoint;
pub mod backend;
pub mod constraints;
pub mod fourier;
pub mod model;
pub mod overlap;
pub mod patches;
pub mod preprocess;
pub mod probe;
pub mod reconstruct;
pub mod telemetry;

pub use backend::{AnyBackend, ArrayBackend, CpuBackend, ParallelBackend};
pub use preprocess::DiffractionData;
pub use probe::ProbeGuess;
pub use reconstruct::PtychographicEngine;
