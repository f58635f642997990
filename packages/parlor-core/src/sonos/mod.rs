//! Soundbar control over UPnP/SOAP.

pub mod soap;
pub mod transport;

pub use transport::SonosTransport;
