pub mod classify;
pub mod config;
pub mod docx;
pub mod markers;
pub mod pipeline;
pub mod progress;
pub mod proposals;
pub mod replace;
pub mod textutil;
