//! Numerical primitives for SCPN Ptycho Core.

pub mod com;
pub mod fft;
pub mod filters;
pub mod linalg;
pub mod shift;
pub mod tv;
