#[cfg(feature = "engine-onnx")]
pub mod onnx;
pub mod synthetic;
