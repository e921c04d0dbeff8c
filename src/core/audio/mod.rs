//! Audio decoding and normalization.

pub mod normalizer;

pub use normalizer::{
    AudioProbe, ContainerFormat, DEFAULT_TARGET_RATE, NormalizedAudio, normalize, probe,
    resample_linear,
};
