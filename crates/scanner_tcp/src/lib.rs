//! TCP scanning: connect-scan discovery, banner-driven fingerprinting and a
//! ping-based OS guess.

mod banner;
mod os;
mod scanner;

pub use banner::BannerGrabber;
pub use os::{os_from_ttl, PingOsDetector};
pub use scanner::{ServiceProber, TcpScanner};
