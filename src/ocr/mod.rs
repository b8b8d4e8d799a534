//! OCR pipeline: preprocessing, the Tesseract engine, text extraction and
//! ingredient slot reading.

pub mod engine;
pub mod extract;
pub mod preprocess;
pub mod setup;
pub mod slots;
