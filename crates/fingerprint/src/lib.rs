//! Fingerprint Engine - Service detection and identification
//!
//! Names follow the nmap service vocabulary the classifier routes on:
//! `ssl` for anything speaking TLS, `http` for plaintext web servers, and the
//! protocol name (`mongodb`, `redis`, `msrpc`, `ssh`, ...) otherwise.

pub mod probes;
mod service_detector;

pub use service_detector::{detect_service, detect_service_from_banner, detect_service_from_port};
