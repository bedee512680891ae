//! # segment-downloader
//!
//! A multi-threaded, resumable segmented HTTP file downloader.
//!
//! Features:
//! - Dynamic bisection of the largest remaining gap across worker tasks
//! - Order-first random-access file writer on a dedicated drain thread
//! - Crash-safe resumption from a checksummed record log
//! - Stalled-segment pausing and worker rebalancing
//! - File verification (xxHash)

mod segment_downloader;
mod download_tracker;
mod download_sender;
pub mod download_receiver;
pub mod buffer_pool;
pub mod checksum;
pub mod data_range;
pub mod download_segment;
pub mod segment_manager;
pub mod file_writer;
pub mod record_file;
pub mod breakpoint_resumption;
pub mod transport;
pub mod file_verify;
pub mod error;
pub mod download_status;
pub mod download_progress;
pub mod download_configuration;
pub mod downloader;
pub mod download_operation;
