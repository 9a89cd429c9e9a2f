//! Shared ONNX Runtime session bootstrap used by every GPU-resident model
//! in the ingestion pipeline (diarizer, voice embedder, text embedder).
//!
//! Exists so the three model-loading call sites agree on execution
//! provider order, thread counts and optimization level instead of each
//! reinventing a `Session::builder()` incantation.

pub mod onnx_utils;

pub use onnx_utils::{create_cpu_session, create_gpu_session, OnnxError};
