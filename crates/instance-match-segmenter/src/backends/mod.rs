#[cfg(feature = "backend-onnx")]
pub mod onnx;
pub mod synthetic;
